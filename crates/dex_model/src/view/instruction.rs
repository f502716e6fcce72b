use std::{cell::Cell, fmt};

use dexmerge_dex_file::{
    CodeItem, InsId, Instruction, InstructionList, Key, MethodRef, Opcode, Operand,
    SectionContainer, StringKey,
};

use crate::{ClassRepository, Declaration, DexClass, DexFile, DexMethod, DexModelError, Result};

/// Key an operand refers to, if any.
pub(crate) fn operand_key(container: &SectionContainer, operand: &Operand) -> Option<Key> {
    match operand {
        Operand::String(s) => Some(Key::String(StringKey::new(container.string(*s)))),
        Operand::Type(t) => Some(Key::Type(container.type_key(*t))),
        Operand::Field(f) => Some(Key::Field(container.field_key(*f))),
        Operand::Method(m) => Some(Key::Method(container.method_key(*m))),
        _ => None,
    }
}

/// One instruction of a method body, at a fixed position.
#[derive(Clone, Copy)]
pub struct DexInstruction<'a> {
    method: DexMethod<'a>,
    position: usize,
    id: InsId,
    instruction: &'a Instruction,
}

impl<'a> DexInstruction<'a> {
    pub(crate) fn new(method: DexMethod<'a>, position: usize) -> Option<Self> {
        let instructions = &method.code()?.instructions;
        Some(Self {
            method,
            position,
            id: instructions.id_at(position)?,
            instruction: instructions.get(position)?,
        })
    }

    pub fn method(&self) -> DexMethod<'a> {
        self.method
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn id(&self) -> InsId {
        self.id
    }

    pub fn instruction(&self) -> &'a Instruction {
        self.instruction
    }

    pub fn opcode(&self) -> Opcode {
        self.instruction.opcode
    }

    pub fn registers(&self) -> &'a [u16] {
        &self.instruction.registers
    }

    pub fn operand(&self) -> &'a Operand {
        &self.instruction.operand
    }

    pub fn key(&self) -> Option<Key> {
        let container = self.method.dex_class().container();
        operand_key(container, &self.instruction.operand)
    }

    /// Offset in code units from the start of the body.
    pub fn address(&self) -> u32 {
        self.method
            .code()
            .map_or(0, |c| c.instructions.address_of(self.position))
    }

    /// Destination of a branch instruction.
    pub fn target(&self) -> Option<DexInstruction<'a>> {
        let Operand::Branch(offset) = self.instruction.operand else {
            return None;
        };
        let address = i64::from(self.address()) + i64::from(offset);
        self.method.instruction_at(u32::try_from(address).ok()?)
    }

    pub fn next(&self) -> Option<DexInstruction<'a>> {
        self.method.instruction(self.position + 1)
    }

    pub fn previous(&self) -> Option<DexInstruction<'a>> {
        self.method.instruction(self.position.checked_sub(1)?)
    }

    /// Handle that keeps following this instruction across edits.
    pub fn handle(&self) -> InstructionRef {
        InstructionRef::new(self.method.method_ref(), self.id, self.position)
    }
}

impl PartialEq for DexInstruction<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.method == other.method && self.id == other.id
    }
}

impl fmt::Debug for DexInstruction<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DexInstruction")
            .field("position", &self.position)
            .field("opcode", &self.instruction.opcode)
            .finish()
    }
}

impl fmt::Display for DexInstruction<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.instruction.opcode.mnemonic())?;
        for register in &self.instruction.registers {
            write!(f, " v{}", register)?;
        }
        match (&self.instruction.operand, self.key()) {
            (_, Some(key)) => write!(f, ", {}", key),
            (Operand::Literal(value), None) => write!(f, ", #{}", value),
            (Operand::Branch(offset), None) => write!(f, ", {:+}", offset),
            _ => Ok(()),
        }
    }
}

/// Owned handle to an instruction, usable across edits of its method.
///
/// The handle remembers the last position it saw. Lookups trust that position
/// while the body has not been edited at or before it, and otherwise search for
/// the instruction's id outward from it. Once the instruction is removed, or
/// its class removed or compacted, every operation fails with `Detached`.
#[derive(Debug, Clone)]
pub struct InstructionRef {
    method: MethodRef,
    id: InsId,
    position: Cell<usize>,
}

impl InstructionRef {
    pub(crate) fn new(method: MethodRef, id: InsId, position: usize) -> Self {
        Self {
            method,
            id,
            position: Cell::new(position),
        }
    }

    pub fn method(&self) -> MethodRef {
        self.method
    }

    pub fn id(&self) -> InsId {
        self.id
    }

    fn code<'f>(&self, file: &'f DexFile) -> Result<&'f CodeItem> {
        let container = file.container();
        let def = container
            .method_def(self.method)
            .ok_or(DexModelError::Detached)?;
        def.code
            .as_ref()
            .ok_or_else(|| DexModelError::MissingCode(container.method_key(def.method).to_string()))
    }

    fn code_mut<'f>(&self, file: &'f mut DexFile) -> Result<&'f mut CodeItem> {
        self.code(file)?;
        file.container_mut()
            .method_def_mut(self.method)
            .and_then(|d| d.code.as_mut())
            .ok_or(DexModelError::Detached)
    }

    fn resolve(&self, instructions: &InstructionList) -> Result<usize> {
        let cached = self.position.get();
        if instructions.is_settled(cached) && instructions.id_at(cached) == Some(self.id) {
            return Ok(cached);
        }
        let position = instructions
            .position_of(self.id, cached)
            .ok_or(DexModelError::Detached)?;
        self.position.set(position);
        Ok(position)
    }

    pub fn position(&self, file: &DexFile) -> Result<usize> {
        self.resolve(&self.code(file)?.instructions)
    }

    pub fn is_attached(&self, file: &DexFile) -> bool {
        self.position(file).is_ok()
    }

    pub fn get<'f>(&self, file: &'f DexFile) -> Result<&'f Instruction> {
        let instructions = &self.code(file)?.instructions;
        let position = self.resolve(instructions)?;
        instructions.get(position).ok_or(DexModelError::Detached)
    }

    /// Read view of the instruction within its method.
    pub fn view<'f>(&self, file: &'f DexFile) -> Result<DexInstruction<'f>> {
        let position = self.position(file)?;
        let class = DexClass::new(file.as_repository(), file, self.method.class)
            .ok_or(DexModelError::Detached)?;
        let def = class
            .def()
            .method(self.method.method)
            .ok_or(DexModelError::Detached)?;
        DexMethod::new(class, def)
            .instruction(position)
            .ok_or(DexModelError::Detached)
    }

    /// Writable access to the instruction; shared bodies are copied first.
    pub fn edit<'f>(&self, file: &'f mut DexFile) -> Result<&'f mut Instruction> {
        let instructions = &mut self.code_mut(file)?.instructions;
        let position = self.resolve(instructions)?;
        instructions
            .get_mut(position)
            .ok_or(DexModelError::Detached)
    }

    /// Swaps in `instruction`; the handle follows the replacement.
    pub fn replace(&mut self, file: &mut DexFile, instruction: Instruction) -> Result<()> {
        let code = self.code_mut(file)?;
        let position = self.resolve(&code.instructions)?;
        self.id = code
            .replace(position, instruction)
            .ok_or(DexModelError::Detached)?;
        Ok(())
    }

    /// Inserts `instruction` right before this one.
    pub fn insert_before(
        &self,
        file: &mut DexFile,
        instruction: Instruction,
    ) -> Result<InstructionRef> {
        let code = self.code_mut(file)?;
        let position = self.resolve(&code.instructions)?;
        let id = code
            .insert(position, instruction)
            .ok_or(DexModelError::Detached)?;
        self.position.set(position + 1);
        Ok(InstructionRef::new(self.method, id, position))
    }

    /// Inserts `instruction` right after this one.
    pub fn create_next(&self, file: &mut DexFile, instruction: Instruction) -> Result<InstructionRef> {
        let code = self.code_mut(file)?;
        let position = self.resolve(&code.instructions)? + 1;
        let id = code
            .insert(position, instruction)
            .ok_or(DexModelError::Detached)?;
        Ok(InstructionRef::new(self.method, id, position))
    }

    pub fn remove(self, file: &mut DexFile) -> Result<Instruction> {
        let code = self.code_mut(file)?;
        let position = self.resolve(&code.instructions)?;
        code.remove(position)
            .ok_or(DexModelError::Detached)
    }

    /// Moves the instruction to `to`, shifting the ones in between.
    pub fn move_to(&self, file: &mut DexFile, to: usize) -> Result<()> {
        let code = self.code_mut(file)?;
        let position = self.resolve(&code.instructions)?;
        if !code.move_to(position, to) {
            return Err(DexModelError::InvalidArgument(format!("position {}", to)));
        }
        self.position.set(to);
        Ok(())
    }

    /// Swaps with the previous instruction. Returns `false` at the start.
    pub fn move_backward(&self, file: &mut DexFile) -> Result<bool> {
        let position = self.position(file)?;
        if position == 0 {
            return Ok(false);
        }
        self.move_to(file, position - 1)?;
        Ok(true)
    }

    /// Swaps with the next instruction. Returns `false` at the end.
    pub fn move_forward(&self, file: &mut DexFile) -> Result<bool> {
        let position = self.position(file)?;
        if position + 1 >= self.code(file)?.instructions.len() {
            return Ok(false);
        }
        self.move_to(file, position + 1)?;
        Ok(true)
    }

    pub fn next(&self, file: &DexFile) -> Result<Option<InstructionRef>> {
        let instructions = &self.code(file)?.instructions;
        let position = self.resolve(instructions)? + 1;
        Ok(instructions
            .id_at(position)
            .map(|id| InstructionRef::new(self.method, id, position)))
    }

    pub fn previous(&self, file: &DexFile) -> Result<Option<InstructionRef>> {
        let instructions = &self.code(file)?.instructions;
        let Some(position) = self.resolve(instructions)?.checked_sub(1) else {
            return Ok(None);
        };
        Ok(instructions
            .id_at(position)
            .map(|id| InstructionRef::new(self.method, id, position)))
    }
}

impl PartialEq for InstructionRef {
    fn eq(&self, other: &Self) -> bool {
        self.method == other.method && self.id == other.id
    }
}

#[cfg(test)]
mod instruction_ref_tests {
    use super::*;
    use dexmerge_dex_file::{AccessFlags, MethodKey, SectionLimits, TypeKey};

    fn file_with_body(length: usize) -> (DexFile, MethodKey) {
        let mut file = DexFile::new("classes.dex", SectionLimits::default());
        file.get_or_create_class(&TypeKey::new("La/A;"));
        let key: MethodKey = "La/A;->run()V".parse().unwrap();
        file.get_or_create_method(&key, AccessFlags::PUBLIC).unwrap();
        let mut method = file.method_mut(&key).unwrap();
        for i in 0..length {
            method
                .add_instruction(Instruction::new(
                    Opcode::Const16,
                    vec![0],
                    Operand::Literal(i as i64),
                ))
                .unwrap();
        }
        (file, key)
    }

    fn literal(file: &DexFile, handle: &InstructionRef) -> i64 {
        match handle.get(file).unwrap().operand {
            Operand::Literal(value) => value,
            _ => panic!("not a literal"),
        }
    }

    #[test]
    fn it_should_follow_instructions_across_inserts() {
        let (mut file, key) = file_with_body(12);
        let fifth = file.instruction_ref(&key, 5).unwrap();
        let tenth = file.instruction_ref(&key, 10).unwrap();
        let third = file.instruction_ref(&key, 3).unwrap();

        third
            .insert_before(&mut file, Instruction::simple(Opcode::Nop))
            .unwrap();

        assert_eq!(6, fifth.position(&file).unwrap());
        assert_eq!(11, tenth.position(&file).unwrap());
        assert_eq!(5, literal(&file, &fifth));
        assert_eq!(10, literal(&file, &tenth));
    }

    #[test]
    fn it_should_detach_removed_instructions() {
        let (mut file, key) = file_with_body(4);
        let second = file.instruction_ref(&key, 1).unwrap();
        let last = file.instruction_ref(&key, 3).unwrap();

        second.clone().remove(&mut file).unwrap();

        assert!(matches!(second.position(&file), Err(DexModelError::Detached)));
        assert_eq!(2, last.position(&file).unwrap());
    }

    #[test]
    fn it_should_follow_replacements() {
        let (mut file, key) = file_with_body(3);
        let mut first = file.instruction_ref(&key, 0).unwrap();
        let stale = first.clone();

        first
            .replace(&mut file, Instruction::simple(Opcode::ReturnVoid))
            .unwrap();

        assert_eq!(Opcode::ReturnVoid, first.get(&file).unwrap().opcode);
        assert!(!stale.is_attached(&file));
    }

    #[test]
    fn it_should_move_instructions() {
        let (mut file, key) = file_with_body(3);
        let first = file.instruction_ref(&key, 0).unwrap();

        assert!(first.move_forward(&mut file).unwrap());
        assert_eq!(1, first.position(&file).unwrap());
        assert!(first.move_backward(&mut file).unwrap());
        assert!(!first.move_backward(&mut file).unwrap());
        first.move_to(&mut file, 2).unwrap();

        assert!(!first.move_forward(&mut file).unwrap());
        assert_eq!(0, literal(&file, &first));
        assert_eq!(2, first.view(&file).unwrap().position());
    }

    #[test]
    fn it_should_keep_branch_targets_when_editing_before_them() {
        let (mut file, key) = file_with_body(0);
        let mut method = file.method_mut(&key).unwrap();
        let goto = method
            .add_instruction(Instruction::new(Opcode::Goto, vec![], Operand::Branch(2)))
            .unwrap();
        let nop = method
            .add_instruction(Instruction::simple(Opcode::Nop))
            .unwrap();
        method
            .add_instruction(Instruction::simple(Opcode::ReturnVoid))
            .unwrap();

        nop.insert_before(&mut file, Instruction::simple(Opcode::Nop))
            .unwrap();

        let target = goto.view(&file).unwrap().target().unwrap();
        assert_eq!(Opcode::ReturnVoid, target.opcode());

        nop.remove(&mut file).unwrap();

        let target = goto.view(&file).unwrap().target().unwrap();
        assert_eq!(Opcode::ReturnVoid, target.opcode());
        assert_eq!(2, target.position());
    }

    #[test]
    fn it_should_not_resolve_in_another_container() {
        let (file, key) = file_with_body(2);
        let (other, _) = file_with_body(2);
        let first = file.instruction_ref(&key, 0).unwrap();
        let same_slot = other.instruction_ref(&key, 0).unwrap();

        assert!(matches!(first.get(&other), Err(DexModelError::Detached)));
        assert_ne!(first, same_slot);
    }

    #[test]
    fn it_should_detach_after_shrink() {
        let (mut file, key) = file_with_body(2);
        let first = file.instruction_ref(&key, 0).unwrap();

        file.shrink();

        assert!(matches!(first.get(&file), Err(DexModelError::Detached)));
    }

    #[test]
    fn it_should_edit_in_place() {
        let (mut file, key) = file_with_body(2);
        let first = file.instruction_ref(&key, 0).unwrap();
        let copy = file.clone();

        first.edit(&mut file).unwrap().operand = Operand::Literal(42);

        assert_eq!(42, literal(&file, &first));
        assert_eq!(0, literal(&copy, &first));
    }
}
