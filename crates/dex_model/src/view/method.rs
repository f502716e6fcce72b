use std::{collections::BTreeSet, fmt, ptr};

use dexmerge_dex_file::{
    AccessFlags, Annotation, CodeItem, Instruction, Key, MethodDef, MethodKey, MethodRef, Operand,
    TryBlock, TypeKey,
};

use crate::{
    view::instruction::operand_key, Declaration, DexAnnotation, DexClass, DexFile,
    DexInstruction, DexModelError, DexTry, InstructionRef, Result,
};

#[derive(Clone, Copy)]
pub struct DexMethod<'a> {
    class: DexClass<'a>,
    def: &'a MethodDef,
}

impl<'a> DexMethod<'a> {
    pub(crate) fn new(class: DexClass<'a>, def: &'a MethodDef) -> Self {
        Self { class, def }
    }

    pub fn def(&self) -> &'a MethodDef {
        self.def
    }

    pub fn key(&self) -> MethodKey {
        self.class.container().method_key(self.def.method)
    }

    pub fn name(&self) -> &'a str {
        let container = self.class.container();
        container.string(container.methods()[self.def.method].name)
    }

    pub fn method_ref(&self) -> MethodRef {
        MethodRef {
            class: self.class.id(),
            method: self.def.method,
        }
    }

    pub fn return_type(&self) -> TypeKey {
        self.key().return_type().clone()
    }

    pub fn parameters(&self) -> Vec<DexMethodParameter<'a>> {
        (0..self.key().parameters().len())
            .map(|index| DexMethodParameter {
                method: *self,
                index,
            })
            .collect()
    }

    pub fn is_constructor(&self) -> bool {
        self.has_access_flags(AccessFlags::CONSTRUCTOR) || self.key().is_constructor()
    }

    pub fn is_bridge(&self) -> bool {
        self.has_access_flags(AccessFlags::BRIDGE)
    }

    pub fn is_direct(&self) -> bool {
        self.def.access_flags.is_direct_method()
    }

    pub fn is_virtual(&self) -> bool {
        !self.is_direct()
    }

    pub fn code(&self) -> Option<&'a CodeItem> {
        self.def.code.as_ref()
    }

    pub fn instruction_count(&self) -> usize {
        self.code().map_or(0, |c| c.instructions.len())
    }

    pub fn instruction(&self, position: usize) -> Option<DexInstruction<'a>> {
        DexInstruction::new(*self, position)
    }

    pub fn instructions(&self) -> impl Iterator<Item = DexInstruction<'a>> + 'a {
        let method = *self;
        (0..self.instruction_count()).filter_map(move |p| method.instruction(p))
    }

    /// Instruction starting at `address`, in code units.
    pub fn instruction_at(&self, address: u32) -> Option<DexInstruction<'a>> {
        let position = self.code()?.instructions.position_at_address(address)?;
        self.instruction(position)
    }

    pub fn tries(&self) -> Vec<DexTry<'a>> {
        self.code()
            .map(|c| c.tries.iter().map(|t| DexTry::new(*self, t)).collect())
            .unwrap_or_default()
    }

    /// The method at the top of the hierarchy this one overrides, or itself.
    pub fn declared(&self) -> DexMethod<'a> {
        let mut current = *self;
        let mut seen = BTreeSet::new();
        loop {
            if current.is_private() || current.is_static() || current.is_constructor() {
                return current;
            }
            let class = current.dex_class();
            if !seen.insert(class.key()) {
                return current;
            }
            let key = current.key();
            let next = class
                .super_class()
                .into_iter()
                .chain(class.interface_classes())
                .find_map(|s| s.method(&key));
            match next {
                Some(next) => current = next,
                None => return current,
            }
        }
    }

    /// Super type declarations this method may override, accessible or not.
    pub fn super_methods(&self) -> Vec<DexMethod<'a>> {
        let own = self.key();
        self.class
            .methods(&own, true)
            .into_iter()
            .filter(|m| !ptr::eq(m.def, self.def))
            .collect()
    }

    /// Target of a compiler generated bridge: a single call to a method of the
    /// same name on the same class.
    pub fn bridged(&self) -> Option<DexMethod<'a>> {
        if !self.is_bridge() {
            return None;
        }
        let container = self.class.container();
        let mut calls = self.code()?.instructions.iter().filter_map(|i| match i.operand {
            Operand::Method(m) => Some(container.method_key(m)),
            _ => None,
        });
        let target = calls.next()?;
        if calls.next().is_some() {
            return None;
        }
        let own = self.key();
        if target.declaring != own.declaring || target.name != own.name {
            return None;
        }
        self.class.declared_method(&target, false)
    }

    pub fn extending_methods(&self) -> Vec<DexMethod<'a>> {
        self.class.extending_methods(&self.key())
    }

    pub fn implementation_methods(&self) -> Vec<DexMethod<'a>> {
        self.class.implementation_methods(&self.key())
    }

    pub fn overriding_keys(&self) -> Vec<MethodKey> {
        self.class.overriding_keys(&self.key())
    }
}

impl<'a> Declaration<'a> for DexMethod<'a> {
    fn key(&self) -> Key {
        Key::Method(DexMethod::key(self))
    }

    fn dex_class(&self) -> DexClass<'a> {
        self.class
    }

    fn access_flags(&self) -> AccessFlags {
        self.def.access_flags
    }

    fn raw_annotations(&self) -> &'a [Annotation] {
        &self.def.annotations
    }

    fn uses(&self, key: &Key) -> bool {
        let own = Key::Method(DexMethod::key(self));
        if own == *key {
            return false;
        }
        if own.uses(key) {
            return true;
        }
        let container = self.class.container();
        let Some(code) = self.code() else {
            return false;
        };
        code.instructions
            .iter()
            .filter_map(|i| operand_key(container, &i.operand))
            .any(|k| k.uses(key))
    }
}

impl PartialEq for DexMethod<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.class == other.class && ptr::eq(self.def, other.def)
    }
}

impl fmt::Debug for DexMethod<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("DexMethod").field(&DexMethod::key(self)).finish()
    }
}

impl fmt::Display for DexMethod<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", DexMethod::key(self))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DexMethodParameter<'a> {
    method: DexMethod<'a>,
    index: usize,
}

impl<'a> DexMethodParameter<'a> {
    pub fn method(&self) -> DexMethod<'a> {
        self.method
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn type_key(&self) -> TypeKey {
        self.method.key().parameters()[self.index].clone()
    }

    /// Debug name, when recorded.
    pub fn name(&self) -> Option<&'a str> {
        let container = self.method.class.container();
        let name = self.method.def.parameter_names.get(self.index)?.as_ref()?;
        Some(container.string(*name))
    }

    pub fn annotations(&self) -> Vec<DexAnnotation<'a>> {
        let container = self.method.class.container();
        self.method
            .def
            .parameter_annotations
            .get(self.index)
            .map(|a| a.iter().map(|a| DexAnnotation::new(container, a)).collect())
            .unwrap_or_default()
    }
}

/// Write access to one method of a [`DexFile`].
#[derive(Debug)]
pub struct DexMethodMut<'a> {
    file: &'a mut DexFile,
    method: MethodRef,
}

impl<'a> DexMethodMut<'a> {
    pub(crate) fn new(file: &'a mut DexFile, method: MethodRef) -> Self {
        Self { file, method }
    }

    pub fn method_ref(&self) -> MethodRef {
        self.method
    }

    fn def(&self) -> Result<&MethodDef> {
        self.file
            .container()
            .method_def(self.method)
            .ok_or(DexModelError::Detached)
    }

    fn def_mut(&mut self) -> Result<&mut MethodDef> {
        self.file
            .container_mut()
            .method_def_mut(self.method)
            .ok_or(DexModelError::Detached)
    }

    fn code_mut(&mut self) -> Result<&mut CodeItem> {
        let key = self.key()?;
        self.def_mut()?
            .code
            .as_mut()
            .ok_or_else(|| DexModelError::MissingCode(key.to_string()))
    }

    pub fn key(&self) -> Result<MethodKey> {
        let method = self.def()?.method;
        Ok(self.file.container().method_key(method))
    }

    pub fn access_flags(&self) -> Result<AccessFlags> {
        Ok(self.def()?.access_flags)
    }

    pub fn set_access_flags(&mut self, flags: AccessFlags) -> Result<()> {
        self.def_mut()?.access_flags = flags;
        Ok(())
    }

    pub fn add_access_flags(&mut self, flags: AccessFlags) -> Result<()> {
        self.def_mut()?.access_flags.insert(flags);
        Ok(())
    }

    pub fn remove_access_flags(&mut self, flags: AccessFlags) -> Result<()> {
        self.def_mut()?.access_flags.remove(flags);
        Ok(())
    }

    /// Gives an abstract or native method an empty body.
    pub fn create_code(&mut self, registers: u16, ins: u16) -> Result<()> {
        let def = self.def_mut()?;
        if def.code.is_none() {
            def.code = Some(CodeItem::new(registers, ins, vec![]));
        }
        Ok(())
    }

    pub fn set_registers(&mut self, registers: u16, ins: u16, outs: u16) -> Result<()> {
        let code = self.code_mut()?;
        code.registers = registers;
        code.ins = ins;
        code.outs = outs;
        Ok(())
    }

    /// Drops every instruction and try block, keeping the register layout.
    pub fn clear_code(&mut self) -> Result<()> {
        if let Some(code) = self.def_mut()?.code.as_mut() {
            code.instructions.clear();
            code.tries.clear();
        }
        Ok(())
    }

    pub fn clear_debug(&mut self) -> Result<()> {
        self.def_mut()?.parameter_names.clear();
        Ok(())
    }

    pub fn set_parameter_name(&mut self, index: usize, name: Option<&str>) -> Result<()> {
        let name = name.map(|n| self.file.container_mut().intern_string(n));
        let names = &mut self.def_mut()?.parameter_names;
        if names.len() <= index {
            names.resize(index + 1, None);
        }
        names[index] = name;
        Ok(())
    }

    /// Appends `instruction` to the body.
    pub fn add_instruction(&mut self, instruction: Instruction) -> Result<InstructionRef> {
        let method = self.method;
        let instructions = &mut self.code_mut()?.instructions;
        let id = instructions.push(instruction);
        Ok(InstructionRef::new(method, id, instructions.len() - 1))
    }

    /// Inserts `instruction` at `position`, shifting the ones after it.
    pub fn create_instruction(
        &mut self,
        position: usize,
        instruction: Instruction,
    ) -> Result<InstructionRef> {
        let method = self.method;
        let id = self
            .code_mut()?
            .insert(position, instruction)
            .ok_or_else(|| DexModelError::InvalidArgument(format!("position {}", position)))?;
        Ok(InstructionRef::new(method, id, position))
    }

    pub fn instruction_ref(&mut self, position: usize) -> Result<InstructionRef> {
        let method = self.method;
        let id = self
            .code_mut()?
            .instructions
            .id_at(position)
            .ok_or_else(|| DexModelError::InvalidArgument(format!("position {}", position)))?;
        Ok(InstructionRef::new(method, id, position))
    }

    pub fn add_try(&mut self, block: TryBlock) -> Result<()> {
        self.code_mut()?.tries.push(block);
        Ok(())
    }
}

#[cfg(test)]
mod dex_method_tests {
    use super::*;
    use crate::ClassRepository;
    use dexmerge_dex_file::{Opcode, SectionLimits};

    fn method(s: &str) -> MethodKey {
        s.parse().unwrap()
    }

    fn file_with_bridge() -> DexFile {
        let mut file = DexFile::new("classes.dex", SectionLimits::default());
        file.get_or_create_class(&TypeKey::new("La/Box;"));
        let target = method("La/Box;->get()La/Item;");
        let bridge = method("La/Box;->get()Ljava/lang/Object;");
        file.get_or_create_method(&target, AccessFlags::PUBLIC).unwrap();
        file.get_or_create_method(
            &bridge,
            AccessFlags::PUBLIC | AccessFlags::BRIDGE | AccessFlags::SYNTHETIC,
        )
        .unwrap();
        let callee = file.container_mut().intern_method(&target);
        let mut bridge = file.method_mut(&bridge).unwrap();
        bridge
            .add_instruction(Instruction::new(
                Opcode::InvokeVirtual,
                vec![0],
                Operand::Method(callee),
            ))
            .unwrap();
        bridge
            .add_instruction(Instruction::new(Opcode::MoveResultObject, vec![0], Operand::None))
            .unwrap();
        bridge
            .add_instruction(Instruction::new(Opcode::ReturnObject, vec![0], Operand::None))
            .unwrap();
        file
    }

    #[test]
    fn it_should_resolve_the_bridged_method() {
        let file = file_with_bridge();
        let class = file.get_class(&TypeKey::new("La/Box;")).unwrap();

        let bridge = class
            .declared_method(&method("La/Box;->get()Ljava/lang/Object;"), false)
            .unwrap();

        assert_eq!(
            method("La/Box;->get()La/Item;"),
            bridge.bridged().unwrap().key()
        );
        assert!(bridge.uses(&Key::Method(method("La/Box;->get()La/Item;"))));
    }

    #[test]
    fn it_should_report_missing_code() {
        let mut file = DexFile::new("classes.dex", SectionLimits::default());
        file.get_or_create_class(&TypeKey::new("La/Api;"));
        let key = method("La/Api;->run()V");
        file.get_or_create_method(&key, AccessFlags::PUBLIC | AccessFlags::ABSTRACT)
            .unwrap();

        let result = file
            .method_mut(&key)
            .unwrap()
            .add_instruction(Instruction::simple(Opcode::ReturnVoid));

        assert!(matches!(result, Err(DexModelError::MissingCode(_))));
    }

    #[test]
    fn it_should_find_the_top_declaration() {
        let mut file = DexFile::new("classes.dex", SectionLimits::default());
        file.get_or_create_class(&TypeKey::new("La/Base;"));
        file.get_or_create_class(&TypeKey::new("La/Child;"));
        file.class_mut(&TypeKey::new("La/Child;"))
            .unwrap()
            .set_super_class(Some(&TypeKey::new("La/Base;")))
            .unwrap();
        file.get_or_create_method(&method("La/Base;->run()V"), AccessFlags::PUBLIC)
            .unwrap();
        file.get_or_create_method(&method("La/Child;->run()V"), AccessFlags::PUBLIC)
            .unwrap();
        let child = file.get_class(&TypeKey::new("La/Child;")).unwrap();

        let run = child.declared_method(&method("La/Child;->run()V"), false).unwrap();

        assert_eq!(method("La/Base;->run()V"), run.declared().key());
        assert_eq!(1, run.super_methods().len());
    }

    #[test]
    fn it_should_name_parameters() {
        let mut file = DexFile::new("classes.dex", SectionLimits::default());
        file.get_or_create_class(&TypeKey::new("La/A;"));
        let key = method("La/A;->set(ILjava/lang/String;)V");
        file.get_or_create_method(&key, AccessFlags::PUBLIC).unwrap();
        file.method_mut(&key)
            .unwrap()
            .set_parameter_name(1, Some("label"))
            .unwrap();
        let class = file.get_class(&TypeKey::new("La/A;")).unwrap();

        let parameters = class.declared_method(&key, false).unwrap().parameters();

        assert_eq!(2, parameters.len());
        assert_eq!(None, parameters[0].name());
        assert_eq!(Some("label"), parameters[1].name());
        assert_eq!(TypeKey::new("Ljava/lang/String;"), parameters[1].type_key());
    }
}
