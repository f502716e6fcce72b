use std::rc::Rc;

use crate::{Instruction, Operand, TypeIdx};

/// Stable identity of an instruction inside its list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InsId(u32);

#[derive(Debug, Clone)]
struct Entry {
    id: InsId,
    instruction: Instruction,
}

/// Copy-on-write instruction sequence of one method.
///
/// Cloning is cheap and shares storage; the first write through either copy
/// detaches it. The watermark is the lowest position touched by a structural
/// edit (insert, remove, replace, move). Positions cached below it are still
/// exact, positions at or above it must be re-checked.
#[derive(Debug, Clone, Default)]
pub struct InstructionList {
    entries: Rc<Vec<Entry>>,
    next_id: u32,
    watermark: Option<usize>,
}

impl InstructionList {
    pub fn new(instructions: Vec<Instruction>) -> Self {
        let entries = instructions
            .into_iter()
            .enumerate()
            .map(|(i, instruction)| Entry {
                id: InsId(i as u32),
                instruction,
            })
            .collect::<Vec<_>>();
        Self {
            next_id: entries.len() as u32,
            entries: Rc::new(entries),
            watermark: None,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, position: usize) -> Option<&Instruction> {
        self.entries.get(position).map(|e| &e.instruction)
    }

    pub fn id_at(&self, position: usize) -> Option<InsId> {
        self.entries.get(position).map(|e| e.id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Instruction> + '_ {
        self.entries.iter().map(|e| &e.instruction)
    }

    pub fn ids(&self) -> impl Iterator<Item = InsId> + '_ {
        self.entries.iter().map(|e| e.id)
    }

    pub fn watermark(&self) -> Option<usize> {
        self.watermark
    }

    /// Whether another list still shares this list's storage.
    pub fn is_shared(&self) -> bool {
        Rc::strong_count(&self.entries) > 1
    }

    /// Whether a position cached before the latest edits is still exact.
    pub fn is_settled(&self, position: usize) -> bool {
        self.watermark.map_or(true, |w| position < w)
    }

    /// Current position of `id`, searching outward from `hint`.
    pub fn position_of(&self, id: InsId, hint: usize) -> Option<usize> {
        if self.id_at(hint) == Some(id) {
            return Some(hint);
        }
        let len = self.entries.len();
        (1..=len).find_map(|distance| {
            let after = hint.checked_add(distance).filter(|p| *p < len);
            let before = hint.checked_sub(distance).filter(|p| *p < len);
            after
                .filter(|p| self.entries[*p].id == id)
                .or_else(|| before.filter(|p| self.entries[*p].id == id))
        })
    }

    /// Writable access to one instruction; copies shared storage first.
    pub fn get_mut(&mut self, position: usize) -> Option<&mut Instruction> {
        if position >= self.entries.len() {
            return None;
        }
        Rc::make_mut(&mut self.entries)
            .get_mut(position)
            .map(|e| &mut e.instruction)
    }

    pub fn push(&mut self, instruction: Instruction) -> InsId {
        let position = self.entries.len();
        self.insert_entry(position, instruction)
    }

    pub fn insert(&mut self, position: usize, instruction: Instruction) -> Option<InsId> {
        if position > self.entries.len() {
            return None;
        }
        self.mark(position);
        Some(self.insert_entry(position, instruction))
    }

    /// Puts `instruction` at `position` under a fresh id.
    pub fn replace(&mut self, position: usize, instruction: Instruction) -> Option<InsId> {
        if position >= self.entries.len() {
            return None;
        }
        let id = self.allocate();
        self.mark(position);
        Rc::make_mut(&mut self.entries)[position] = Entry { id, instruction };
        Some(id)
    }

    pub fn remove(&mut self, position: usize) -> Option<Instruction> {
        if position >= self.entries.len() {
            return None;
        }
        self.mark(position);
        Some(Rc::make_mut(&mut self.entries).remove(position).instruction)
    }

    pub fn move_to(&mut self, from: usize, to: usize) -> bool {
        let len = self.entries.len();
        if from >= len || to >= len {
            return false;
        }
        if from != to {
            self.mark(from.min(to));
            let entries = Rc::make_mut(&mut self.entries);
            let entry = entries.remove(from);
            entries.insert(to, entry);
        }
        true
    }

    pub fn clear(&mut self) {
        self.mark(0);
        self.entries = Rc::new(Vec::new());
    }

    /// Address in code units of the instruction at `position`.
    pub fn address_of(&self, position: usize) -> u32 {
        self.entries
            .iter()
            .take(position)
            .map(|e| e.instruction.code_units())
            .sum()
    }

    pub fn position_at_address(&self, address: u32) -> Option<usize> {
        let mut current = 0;
        for (position, entry) in self.entries.iter().enumerate() {
            if current == address {
                return Some(position);
            }
            current += entry.instruction.code_units();
        }
        None
    }

    pub fn code_units(&self) -> u32 {
        self.address_of(self.entries.len())
    }

    fn insert_entry(&mut self, position: usize, instruction: Instruction) -> InsId {
        let id = self.allocate();
        Rc::make_mut(&mut self.entries).insert(position, Entry { id, instruction });
        id
    }

    fn allocate(&mut self) -> InsId {
        let id = InsId(self.next_id);
        self.next_id += 1;
        id
    }

    fn mark(&mut self, position: usize) {
        self.watermark = Some(self.watermark.map_or(position, |w| w.min(position)));
    }
}

impl From<Vec<Instruction>> for InstructionList {
    fn from(instructions: Vec<Instruction>) -> Self {
        Self::new(instructions)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CatchHandler {
    pub exception_type: TypeIdx,
    pub address: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TryBlock {
    pub start_address: u32,
    pub code_units: u32,
    pub handlers: Vec<CatchHandler>,
    pub catch_all: Option<u32>,
}

impl TryBlock {
    pub fn covers(&self, address: u32) -> bool {
        address >= self.start_address && address - self.start_address < self.code_units
    }

    /// Address right after the last covered code unit.
    pub fn end_address(&self) -> u32 {
        self.start_address.saturating_add(self.code_units)
    }
}

/// Where a branch or try boundary points: an instruction, or the end of the
/// body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Label {
    At(InsId),
    End,
}

#[derive(Debug)]
struct TryLabels {
    start: Label,
    end: Label,
    handlers: Vec<Label>,
    catch_all: Option<Label>,
}

/// Branch targets and try boundaries pinned to instruction ids while the
/// body is edited. Addresses that do not start an instruction are left
/// alone.
#[derive(Debug)]
struct Labels {
    branches: Vec<(InsId, Label)>,
    tries: Vec<Option<TryLabels>>,
}

impl Labels {
    fn collect(code: &CodeItem) -> Self {
        let instructions = &code.instructions;
        let mut branches = vec![];
        let mut address = 0u32;
        for entry in instructions.entries.iter() {
            if let Operand::Branch(offset) = entry.instruction.operand {
                let target = i64::from(address) + i64::from(offset);
                if let Some(label) = u32::try_from(target)
                    .ok()
                    .and_then(|t| Self::label(instructions, t))
                {
                    branches.push((entry.id, label));
                }
            }
            address += entry.instruction.code_units();
        }
        let tries = code
            .tries
            .iter()
            .map(|block| {
                let handlers = block
                    .handlers
                    .iter()
                    .map(|h| Self::label(instructions, h.address))
                    .collect::<Option<Vec<_>>>()?;
                let catch_all = match block.catch_all {
                    Some(address) => Some(Self::label(instructions, address)?),
                    None => None,
                };
                Some(TryLabels {
                    start: Self::label(instructions, block.start_address)?,
                    end: Self::label(instructions, block.end_address())?,
                    handlers,
                    catch_all,
                })
            })
            .collect();
        Self { branches, tries }
    }

    fn label(instructions: &InstructionList, address: u32) -> Option<Label> {
        if address == instructions.code_units() {
            return Some(Label::End);
        }
        let position = instructions.position_at_address(address)?;
        instructions.id_at(position).map(Label::At)
    }

    /// Points every label on `old` at `new`.
    fn rebind(&mut self, old: InsId, new: Label) {
        let swap = |label: &mut Label| {
            if *label == Label::At(old) {
                *label = new;
            }
        };
        for (_, label) in &mut self.branches {
            swap(label);
        }
        for block in self.tries.iter_mut().flatten() {
            swap(&mut block.start);
            swap(&mut block.end);
            for label in &mut block.handlers {
                swap(label);
            }
            if let Some(label) = &mut block.catch_all {
                swap(label);
            }
        }
    }

    fn address(instructions: &InstructionList, label: Label) -> Option<u32> {
        match label {
            Label::At(id) => instructions
                .position_of(id, 0)
                .map(|p| instructions.address_of(p)),
            Label::End => Some(instructions.code_units()),
        }
    }

    /// Rewrites offsets and try addresses from the current positions. Try
    /// blocks left without instructions are dropped.
    fn apply(self, code: &mut CodeItem) {
        for (source, target) in self.branches {
            let Some(position) = code.instructions.position_of(source, 0) else {
                continue;
            };
            let Some(target) = Self::address(&code.instructions, target) else {
                continue;
            };
            let offset = i64::from(target) - i64::from(code.instructions.address_of(position));
            let Ok(offset) = i32::try_from(offset) else {
                continue;
            };
            if let Some(instruction) = code.instructions.get_mut(position) {
                if let Operand::Branch(current) = &mut instruction.operand {
                    *current = offset;
                }
            }
        }
        let instructions = &code.instructions;
        let mut tries = vec![];
        for (mut block, labels) in code.tries.drain(..).zip(self.tries) {
            if let Some(labels) = labels {
                let start = Self::address(instructions, labels.start);
                let end = Self::address(instructions, labels.end);
                let (Some(start), Some(end)) = (start, end) else {
                    continue;
                };
                if end <= start {
                    continue;
                }
                block.start_address = start;
                block.code_units = end - start;
                for (handler, label) in block.handlers.iter_mut().zip(labels.handlers) {
                    if let Some(address) = Self::address(instructions, label) {
                        handler.address = address;
                    }
                }
                if let Some(label) = labels.catch_all {
                    block.catch_all = Self::address(instructions, label).or(block.catch_all);
                }
            }
            tries.push(block);
        }
        code.tries = tries;
    }
}

#[derive(Debug, Clone, Default)]
pub struct CodeItem {
    pub registers: u16,
    pub ins: u16,
    pub outs: u16,
    pub instructions: InstructionList,
    pub tries: Vec<TryBlock>,
}

impl CodeItem {
    pub fn new(registers: u16, ins: u16, instructions: Vec<Instruction>) -> Self {
        Self {
            registers,
            ins,
            outs: 0,
            instructions: InstructionList::new(instructions),
            tries: vec![],
        }
    }

    /// Inserts `instruction` at `position`. Branches and try blocks keep
    /// pointing at the instructions they pointed at before.
    pub fn insert(&mut self, position: usize, instruction: Instruction) -> Option<InsId> {
        let labels = Labels::collect(self);
        let id = self.instructions.insert(position, instruction)?;
        labels.apply(self);
        Some(id)
    }

    /// Puts `instruction` at `position`; labels on the old instruction move
    /// to the new one.
    pub fn replace(&mut self, position: usize, instruction: Instruction) -> Option<InsId> {
        let mut labels = Labels::collect(self);
        let old = self.instructions.id_at(position)?;
        let id = self.instructions.replace(position, instruction)?;
        labels.rebind(old, Label::At(id));
        labels.apply(self);
        Some(id)
    }

    /// Removes the instruction at `position`; labels on it move to the
    /// instruction that follows.
    pub fn remove(&mut self, position: usize) -> Option<Instruction> {
        let mut labels = Labels::collect(self);
        let old = self.instructions.id_at(position)?;
        let next = self
            .instructions
            .id_at(position + 1)
            .map_or(Label::End, Label::At);
        labels.rebind(old, next);
        let removed = self.instructions.remove(position)?;
        labels.apply(self);
        Some(removed)
    }

    pub fn move_to(&mut self, from: usize, to: usize) -> bool {
        let labels = Labels::collect(self);
        if !self.instructions.move_to(from, to) {
            return false;
        }
        labels.apply(self);
        true
    }
}
