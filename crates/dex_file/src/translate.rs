use crate::{
    Annotation, AnnotationElement, ClassDef, CodeItem, EncodedValue, FieldDef, FieldId, FieldIdx,
    Instruction, InstructionList, MethodDef, MethodId, MethodIdx, Operand, ProtoId, ProtoIdx,
    SectionContainer, StringIdx, TypeIdx, TypeListIdx,
};

/// Re-interns entries of one container into another.
pub(crate) struct Translator<'a> {
    from: &'a SectionContainer,
    to: &'a mut SectionContainer,
}

impl<'a> Translator<'a> {
    pub fn new(from: &'a SectionContainer, to: &'a mut SectionContainer) -> Self {
        Self { from, to }
    }

    pub fn string_idx(&mut self, idx: StringIdx) -> StringIdx {
        self.to.intern_string(self.from.string(idx))
    }

    pub fn type_idx(&mut self, idx: TypeIdx) -> TypeIdx {
        let descriptor = self.string_idx(self.from.types[idx]);
        self.to.types.intern(descriptor)
    }

    pub fn type_list_idx(&mut self, idx: TypeListIdx) -> TypeListIdx {
        let from = self.from;
        let types = from.type_lists[idx]
            .iter()
            .map(|t| self.type_idx(*t))
            .collect();
        self.to.type_lists.intern(types)
    }

    pub fn proto_idx(&mut self, idx: ProtoIdx) -> ProtoIdx {
        let proto = self.from.protos[idx];
        let proto = ProtoId {
            return_type: self.type_idx(proto.return_type),
            parameters: self.type_list_idx(proto.parameters),
        };
        self.to.protos.intern(proto)
    }

    pub fn field_idx(&mut self, idx: FieldIdx) -> FieldIdx {
        let field = self.from.fields[idx];
        let field = FieldId {
            class: self.type_idx(field.class),
            field_type: self.type_idx(field.field_type),
            name: self.string_idx(field.name),
        };
        self.to.fields.intern(field)
    }

    pub fn method_idx(&mut self, idx: MethodIdx) -> MethodIdx {
        let method = self.from.methods[idx];
        let method = MethodId {
            class: self.type_idx(method.class),
            proto: self.proto_idx(method.proto),
            name: self.string_idx(method.name),
        };
        self.to.methods.intern(method)
    }

    fn value(&mut self, value: &EncodedValue) -> EncodedValue {
        match value {
            EncodedValue::Null => EncodedValue::Null,
            EncodedValue::Boolean(b) => EncodedValue::Boolean(*b),
            EncodedValue::Int(i) => EncodedValue::Int(*i),
            EncodedValue::String(s) => EncodedValue::String(self.string_idx(*s)),
            EncodedValue::Type(t) => EncodedValue::Type(self.type_idx(*t)),
            EncodedValue::Field(f) => EncodedValue::Field(self.field_idx(*f)),
            EncodedValue::Method(m) => EncodedValue::Method(self.method_idx(*m)),
            EncodedValue::Enum(f) => EncodedValue::Enum(self.field_idx(*f)),
            EncodedValue::Array(values) => {
                EncodedValue::Array(values.iter().map(|v| self.value(v)).collect())
            }
        }
    }

    fn annotations(&mut self, annotations: &[Annotation]) -> Vec<Annotation> {
        annotations
            .iter()
            .map(|a| Annotation {
                visibility: a.visibility,
                annotation_type: self.type_idx(a.annotation_type),
                elements: a
                    .elements
                    .iter()
                    .map(|e| AnnotationElement {
                        name: self.string_idx(e.name),
                        value: self.value(&e.value),
                    })
                    .collect(),
            })
            .collect()
    }

    fn instruction(&mut self, instruction: &Instruction) -> Instruction {
        let operand = match &instruction.operand {
            Operand::String(s) => Operand::String(self.string_idx(*s)),
            Operand::Type(t) => Operand::Type(self.type_idx(*t)),
            Operand::Field(f) => Operand::Field(self.field_idx(*f)),
            Operand::Method(m) => Operand::Method(self.method_idx(*m)),
            other => other.clone(),
        };
        Instruction::new(instruction.opcode, instruction.registers.clone(), operand)
    }

    fn code(&mut self, code: &CodeItem) -> CodeItem {
        let instructions = code
            .instructions
            .iter()
            .map(|i| self.instruction(i))
            .collect::<Vec<_>>();
        let mut tries = code.tries.clone();
        for handler in tries.iter_mut().flat_map(|t| t.handlers.iter_mut()) {
            handler.exception_type = self.type_idx(handler.exception_type);
        }
        CodeItem {
            registers: code.registers,
            ins: code.ins,
            outs: code.outs,
            instructions: InstructionList::new(instructions),
            tries,
        }
    }

    fn field_def(&mut self, field: &FieldDef) -> FieldDef {
        FieldDef {
            field: self.field_idx(field.field),
            access_flags: field.access_flags,
            initial_value: field.initial_value.as_ref().map(|v| self.value(v)),
            annotations: self.annotations(&field.annotations),
        }
    }

    fn method_def(&mut self, method: &MethodDef) -> MethodDef {
        MethodDef {
            method: self.method_idx(method.method),
            access_flags: method.access_flags,
            annotations: self.annotations(&method.annotations),
            parameter_annotations: method
                .parameter_annotations
                .iter()
                .map(|a| self.annotations(a))
                .collect(),
            parameter_names: method
                .parameter_names
                .iter()
                .map(|n| n.map(|n| self.string_idx(n)))
                .collect(),
            code: method.code.as_ref().map(|c| self.code(c)),
        }
    }

    pub fn class(&mut self, class: &ClassDef) -> ClassDef {
        ClassDef {
            class_type: self.type_idx(class.class_type),
            access_flags: class.access_flags,
            super_class: class.super_class.map(|s| self.type_idx(s)),
            interfaces: self.type_list_idx(class.interfaces),
            source_file: class.source_file.map(|s| self.string_idx(s)),
            annotations: self.annotations(&class.annotations),
            static_fields: class.static_fields.iter().map(|f| self.field_def(f)).collect(),
            instance_fields: class
                .instance_fields
                .iter()
                .map(|f| self.field_def(f))
                .collect(),
            direct_methods: class
                .direct_methods
                .iter()
                .map(|m| self.method_def(m))
                .collect(),
            virtual_methods: class
                .virtual_methods
                .iter()
                .map(|m| self.method_def(m))
                .collect(),
        }
    }
}
