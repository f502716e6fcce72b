use std::{io::Write, marker::PhantomData};

use byteorder::{ByteOrder, WriteBytesExt};

use crate::{
    Annotation, ClassDef, CodeItem, EncodedValue, FieldDef, Instruction, MethodDef, Operand,
    PoolIndex, Result, SectionContainer, TryBlock, DEX_MAGIC, NO_INDEX,
};

pub struct Writer<W, E: ByteOrder> {
    w: W,
    phantom: PhantomData<E>,
}

impl<W: Write, E: ByteOrder> Writer<W, E> {
    pub fn new(w: W) -> Self {
        Self {
            w,
            phantom: PhantomData,
        }
    }

    pub fn write_container(&mut self, container: &SectionContainer) -> Result<()> {
        self.w.write_all(&DEX_MAGIC)?;

        self.write_len(container.strings.len())?;
        for string in &container.strings {
            self.write_len(string.len())?;
            self.w.write_all(string.as_bytes())?;
        }

        self.write_len(container.types.len())?;
        for descriptor in &container.types {
            self.write_idx(*descriptor)?;
        }

        self.write_len(container.type_lists.len())?;
        for types in &container.type_lists {
            self.write_len(types.len())?;
            for t in types {
                self.write_idx(*t)?;
            }
        }

        self.write_len(container.protos.len())?;
        for proto in &container.protos {
            self.write_idx(proto.return_type)?;
            self.write_idx(proto.parameters)?;
        }

        self.write_len(container.fields.len())?;
        for field in &container.fields {
            self.write_idx(field.class)?;
            self.write_idx(field.field_type)?;
            self.write_idx(field.name)?;
        }

        self.write_len(container.methods.len())?;
        for method in &container.methods {
            self.write_idx(method.class)?;
            self.write_idx(method.proto)?;
            self.write_idx(method.name)?;
        }

        self.write_len(container.class_count())?;
        for (_, class) in container.classes() {
            self.write_class(class)?;
        }

        Ok(())
    }

    fn write_class(&mut self, class: &ClassDef) -> Result<()> {
        self.write_idx(class.class_type)?;
        self.write_u32(class.access_flags.bits())?;
        self.write_optional_idx(class.super_class)?;
        self.write_idx(class.interfaces)?;
        self.write_optional_idx(class.source_file)?;
        self.write_annotations(&class.annotations)?;
        self.write_fields(&class.static_fields)?;
        self.write_fields(&class.instance_fields)?;
        self.write_methods(&class.direct_methods)?;
        self.write_methods(&class.virtual_methods)
    }

    fn write_fields(&mut self, fields: &[FieldDef]) -> Result<()> {
        self.write_len(fields.len())?;
        for field in fields {
            self.write_idx(field.field)?;
            self.write_u32(field.access_flags.bits())?;
            match &field.initial_value {
                Some(value) => {
                    self.w.write_u8(1)?;
                    self.write_value(value)?;
                }
                None => self.w.write_u8(0)?,
            }
            self.write_annotations(&field.annotations)?;
        }
        Ok(())
    }

    fn write_methods(&mut self, methods: &[MethodDef]) -> Result<()> {
        self.write_len(methods.len())?;
        for method in methods {
            self.write_idx(method.method)?;
            self.write_u32(method.access_flags.bits())?;
            self.write_annotations(&method.annotations)?;
            self.write_len(method.parameter_annotations.len())?;
            for annotations in &method.parameter_annotations {
                self.write_annotations(annotations)?;
            }
            self.write_len(method.parameter_names.len())?;
            for name in &method.parameter_names {
                self.write_optional_idx(*name)?;
            }
            match &method.code {
                Some(code) => {
                    self.w.write_u8(1)?;
                    self.write_code(code)?;
                }
                None => self.w.write_u8(0)?,
            }
        }
        Ok(())
    }

    fn write_code(&mut self, code: &CodeItem) -> Result<()> {
        self.w.write_u16::<E>(code.registers)?;
        self.w.write_u16::<E>(code.ins)?;
        self.w.write_u16::<E>(code.outs)?;
        self.write_len(code.instructions.len())?;
        for instruction in code.instructions.iter() {
            self.write_instruction(instruction)?;
        }
        self.write_len(code.tries.len())?;
        for try_block in &code.tries {
            self.write_try(try_block)?;
        }
        Ok(())
    }

    fn write_instruction(&mut self, instruction: &Instruction) -> Result<()> {
        self.w.write_u8(instruction.opcode as u8)?;
        self.w.write_u8(instruction.registers.len() as u8)?;
        for register in &instruction.registers {
            self.w.write_u16::<E>(*register)?;
        }
        self.w.write_u8(instruction.operand.tag())?;
        match &instruction.operand {
            Operand::None => {}
            Operand::Literal(value) => self.w.write_i64::<E>(*value)?,
            Operand::String(idx) => self.write_idx(*idx)?,
            Operand::Type(idx) => self.write_idx(*idx)?,
            Operand::Field(idx) => self.write_idx(*idx)?,
            Operand::Method(idx) => self.write_idx(*idx)?,
            Operand::Branch(offset) => self.w.write_i32::<E>(*offset)?,
        }
        Ok(())
    }

    fn write_try(&mut self, try_block: &TryBlock) -> Result<()> {
        self.write_u32(try_block.start_address)?;
        self.write_u32(try_block.code_units)?;
        self.write_len(try_block.handlers.len())?;
        for handler in &try_block.handlers {
            self.write_idx(handler.exception_type)?;
            self.write_u32(handler.address)?;
        }
        self.write_u32(try_block.catch_all.unwrap_or(NO_INDEX))
    }

    fn write_annotations(&mut self, annotations: &[Annotation]) -> Result<()> {
        self.write_len(annotations.len())?;
        for annotation in annotations {
            self.w.write_u8(annotation.visibility as u8)?;
            self.write_idx(annotation.annotation_type)?;
            self.write_len(annotation.elements.len())?;
            for element in &annotation.elements {
                self.write_idx(element.name)?;
                self.write_value(&element.value)?;
            }
        }
        Ok(())
    }

    fn write_value(&mut self, value: &EncodedValue) -> Result<()> {
        self.w.write_u8(value.tag())?;
        match value {
            EncodedValue::Null => {}
            EncodedValue::Boolean(b) => self.w.write_u8(u8::from(*b))?,
            EncodedValue::Int(i) => self.w.write_i64::<E>(*i)?,
            EncodedValue::String(idx) => self.write_idx(*idx)?,
            EncodedValue::Type(idx) => self.write_idx(*idx)?,
            EncodedValue::Field(idx) | EncodedValue::Enum(idx) => self.write_idx(*idx)?,
            EncodedValue::Method(idx) => self.write_idx(*idx)?,
            EncodedValue::Array(values) => {
                self.write_len(values.len())?;
                for value in values {
                    self.write_value(value)?;
                }
            }
        }
        Ok(())
    }

    fn write_idx<I: PoolIndex>(&mut self, idx: I) -> Result<()> {
        self.write_u32(idx.raw())
    }

    fn write_optional_idx<I: PoolIndex>(&mut self, idx: Option<I>) -> Result<()> {
        self.write_u32(idx.map_or(NO_INDEX, PoolIndex::raw))
    }

    fn write_len(&mut self, len: usize) -> Result<()> {
        self.write_u32(len as u32)
    }

    fn write_u32(&mut self, value: u32) -> Result<()> {
        Ok(self.w.write_u32::<E>(value)?)
    }
}
