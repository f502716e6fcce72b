use std::{
    convert::TryFrom,
    io::{Cursor, Read},
    marker::PhantomData,
};

use byteorder::{ByteOrder, ReadBytesExt};

use crate::{
    AccessFlags, Annotation, AnnotationElement, CatchHandler, ClassDef, CodeItem, DexFileError,
    EncodedValue, FieldDef, FieldId, Instruction, InstructionList, MethodDef, MethodId, Opcode,
    Operand, PoolIndex, ProtoId, Result, SectionContainer, SectionKind, TryBlock, Visibility,
    DEX_MAGIC, NO_INDEX,
};

/// Pool sizes known once the id sections are read.
struct Bounds {
    strings: usize,
    types: usize,
    type_lists: usize,
    protos: usize,
    fields: usize,
    methods: usize,
}

impl Bounds {
    fn of(container: &SectionContainer) -> Self {
        Self {
            strings: container.strings.len(),
            types: container.types.len(),
            type_lists: container.type_lists.len(),
            protos: container.protos.len(),
            fields: container.fields.len(),
            methods: container.methods.len(),
        }
    }

    fn len(&self, kind: SectionKind) -> usize {
        match kind {
            SectionKind::StringId => self.strings,
            SectionKind::TypeId => self.types,
            SectionKind::TypeList => self.type_lists,
            SectionKind::ProtoId => self.protos,
            SectionKind::FieldId => self.fields,
            SectionKind::MethodId => self.methods,
            _ => 0,
        }
    }
}

pub struct Parser<'a, E: ByteOrder> {
    r: Cursor<&'a [u8]>,
    phantom: PhantomData<E>,
}

impl<'a, E: ByteOrder> Parser<'a, E> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self {
            r: Cursor::new(buf),
            phantom: PhantomData,
        }
    }

    pub fn parse_container(mut self) -> Result<SectionContainer> {
        self.parse_magic_identifier()?;

        let mut container = SectionContainer::default();

        let strings_count = self.read_u32()?;
        for _ in 0..strings_count {
            let string = self.parse_string()?;
            container.strings.push(string);
        }

        let bounds = Bounds::of(&container);
        let types_count = self.read_u32()?;
        for _ in 0..types_count {
            let descriptor = self.read_idx(SectionKind::StringId, &bounds)?;
            container.types.push(descriptor);
        }

        let bounds = Bounds::of(&container);
        let type_lists_count = self.read_u32()?;
        for _ in 0..type_lists_count {
            let size = self.read_u32()?;
            let types = (0..size)
                .map(|_| self.read_idx(SectionKind::TypeId, &bounds))
                .collect::<Result<Vec<_>>>()?;
            container.type_lists.push(types);
        }

        let bounds = Bounds::of(&container);
        let protos_count = self.read_u32()?;
        for _ in 0..protos_count {
            let return_type = self.read_idx(SectionKind::TypeId, &bounds)?;
            let parameters = self.read_idx(SectionKind::TypeList, &bounds)?;
            container.protos.push(ProtoId {
                return_type,
                parameters,
            });
        }

        let bounds = Bounds::of(&container);
        let fields_count = self.read_u32()?;
        for _ in 0..fields_count {
            let class = self.read_idx(SectionKind::TypeId, &bounds)?;
            let field_type = self.read_idx(SectionKind::TypeId, &bounds)?;
            let name = self.read_idx(SectionKind::StringId, &bounds)?;
            container.fields.push(FieldId {
                class,
                field_type,
                name,
            });
        }

        let methods_count = self.read_u32()?;
        for _ in 0..methods_count {
            let class = self.read_idx(SectionKind::TypeId, &bounds)?;
            let proto = self.read_idx(SectionKind::ProtoId, &bounds)?;
            let name = self.read_idx(SectionKind::StringId, &bounds)?;
            container.methods.push(MethodId { class, proto, name });
        }

        let bounds = Bounds::of(&container);
        let classes_count = self.read_u32()?;
        for _ in 0..classes_count {
            let class = self.parse_class(&bounds)?;
            container.add_class(class);
        }

        Ok(container)
    }

    fn parse_magic_identifier(&mut self) -> Result<()> {
        let mut magic = [0u8; 8];
        self.r.read_exact(&mut magic)?;
        if magic == DEX_MAGIC {
            Ok(())
        } else {
            Err(DexFileError::InvalidMagicIdentifier(u64::from_be_bytes(
                magic,
            )))
        }
    }

    fn parse_string(&mut self) -> Result<String> {
        let length = self.read_u32()?;
        let remaining = self.remaining();
        if length as usize > remaining {
            return Err(DexFileError::Truncated { length, remaining });
        }
        let mut bytes = vec![0u8; length as usize];
        self.r.read_exact(&mut bytes)?;

        Ok(String::from_utf8(bytes)?)
    }

    fn parse_class(&mut self, bounds: &Bounds) -> Result<ClassDef> {
        let class_type = self.read_idx(SectionKind::TypeId, bounds)?;
        let access_flags = AccessFlags::from_bits_truncate(self.read_u32()?);
        let super_class = self.read_optional_idx(SectionKind::TypeId, bounds)?;
        let interfaces = self.read_idx(SectionKind::TypeList, bounds)?;
        let source_file = self.read_optional_idx(SectionKind::StringId, bounds)?;
        let annotations = self.parse_annotations(bounds)?;
        let static_fields = self.parse_fields(bounds)?;
        let instance_fields = self.parse_fields(bounds)?;
        let direct_methods = self.parse_methods(bounds)?;
        let virtual_methods = self.parse_methods(bounds)?;

        Ok(ClassDef {
            class_type,
            access_flags,
            super_class,
            interfaces,
            source_file,
            annotations,
            static_fields,
            instance_fields,
            direct_methods,
            virtual_methods,
        })
    }

    fn parse_fields(&mut self, bounds: &Bounds) -> Result<Vec<FieldDef>> {
        let count = self.read_u32()?;
        (0..count)
            .map(|_| {
                let field = self.read_idx(SectionKind::FieldId, bounds)?;
                let access_flags = AccessFlags::from_bits_truncate(self.read_u32()?);
                let initial_value = match self.read_u8()? {
                    0 => None,
                    _ => Some(self.parse_value(bounds)?),
                };
                let annotations = self.parse_annotations(bounds)?;

                Ok(FieldDef {
                    field,
                    access_flags,
                    initial_value,
                    annotations,
                })
            })
            .collect()
    }

    fn parse_methods(&mut self, bounds: &Bounds) -> Result<Vec<MethodDef>> {
        let count = self.read_u32()?;
        (0..count)
            .map(|_| {
                let method = self.read_idx(SectionKind::MethodId, bounds)?;
                let access_flags = AccessFlags::from_bits_truncate(self.read_u32()?);
                let annotations = self.parse_annotations(bounds)?;
                let parameters_count = self.read_u32()?;
                let parameter_annotations = (0..parameters_count)
                    .map(|_| self.parse_annotations(bounds))
                    .collect::<Result<Vec<_>>>()?;
                let names_count = self.read_u32()?;
                let parameter_names = (0..names_count)
                    .map(|_| self.read_optional_idx(SectionKind::StringId, bounds))
                    .collect::<Result<Vec<_>>>()?;
                let code = match self.read_u8()? {
                    0 => None,
                    _ => Some(self.parse_code(bounds)?),
                };

                Ok(MethodDef {
                    method,
                    access_flags,
                    annotations,
                    parameter_annotations,
                    parameter_names,
                    code,
                })
            })
            .collect()
    }

    fn parse_code(&mut self, bounds: &Bounds) -> Result<CodeItem> {
        let registers = self.read_u16()?;
        let ins = self.read_u16()?;
        let outs = self.read_u16()?;

        let instructions_count = self.read_u32()?;
        let instructions = (0..instructions_count)
            .map(|_| self.parse_instruction(bounds))
            .collect::<Result<Vec<_>>>()?;

        let tries_count = self.read_u32()?;
        let tries = (0..tries_count)
            .map(|_| self.parse_try(bounds))
            .collect::<Result<Vec<_>>>()?;

        Ok(CodeItem {
            registers,
            ins,
            outs,
            instructions: InstructionList::new(instructions),
            tries,
        })
    }

    fn parse_instruction(&mut self, bounds: &Bounds) -> Result<Instruction> {
        let opcode = self.read_u8()?;
        let opcode = Opcode::try_from(opcode).map_err(DexFileError::InvalidOpcode)?;
        let registers_count = self.read_u8()?;
        let mut registers = vec![0u16; registers_count as usize];
        self.r.read_u16_into::<E>(&mut registers)?;

        let operand = match self.read_u8()? {
            Operand::NONE => Operand::None,
            Operand::LITERAL => Operand::Literal(self.r.read_i64::<E>()?),
            Operand::STRING => Operand::String(self.read_idx(SectionKind::StringId, bounds)?),
            Operand::TYPE => Operand::Type(self.read_idx(SectionKind::TypeId, bounds)?),
            Operand::FIELD => Operand::Field(self.read_idx(SectionKind::FieldId, bounds)?),
            Operand::METHOD => Operand::Method(self.read_idx(SectionKind::MethodId, bounds)?),
            Operand::BRANCH => Operand::Branch(self.r.read_i32::<E>()?),
            tag => return Err(DexFileError::InvalidOperandTag(tag)),
        };

        Ok(Instruction::new(opcode, registers, operand))
    }

    fn parse_try(&mut self, bounds: &Bounds) -> Result<TryBlock> {
        let start_address = self.read_u32()?;
        let code_units = self.read_u32()?;
        let handlers_count = self.read_u32()?;
        let handlers = (0..handlers_count)
            .map(|_| {
                Ok(CatchHandler {
                    exception_type: self.read_idx(SectionKind::TypeId, bounds)?,
                    address: self.read_u32()?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let catch_all = match self.read_u32()? {
            NO_INDEX => None,
            address => Some(address),
        };

        Ok(TryBlock {
            start_address,
            code_units,
            handlers,
            catch_all,
        })
    }

    fn parse_annotations(&mut self, bounds: &Bounds) -> Result<Vec<Annotation>> {
        let count = self.read_u32()?;
        (0..count)
            .map(|_| {
                let visibility = self.read_u8()?;
                let visibility =
                    Visibility::try_from(visibility).map_err(DexFileError::InvalidVisibility)?;
                let annotation_type = self.read_idx(SectionKind::TypeId, bounds)?;
                let elements_count = self.read_u32()?;
                let elements = (0..elements_count)
                    .map(|_| {
                        Ok(AnnotationElement {
                            name: self.read_idx(SectionKind::StringId, bounds)?,
                            value: self.parse_value(bounds)?,
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;

                Ok(Annotation {
                    visibility,
                    annotation_type,
                    elements,
                })
            })
            .collect()
    }

    fn parse_value(&mut self, bounds: &Bounds) -> Result<EncodedValue> {
        let value = match self.read_u8()? {
            EncodedValue::NULL => EncodedValue::Null,
            EncodedValue::BOOLEAN => EncodedValue::Boolean(self.read_u8()? != 0),
            EncodedValue::INT => EncodedValue::Int(self.r.read_i64::<E>()?),
            EncodedValue::STRING => {
                EncodedValue::String(self.read_idx(SectionKind::StringId, bounds)?)
            }
            EncodedValue::TYPE => EncodedValue::Type(self.read_idx(SectionKind::TypeId, bounds)?),
            EncodedValue::FIELD => {
                EncodedValue::Field(self.read_idx(SectionKind::FieldId, bounds)?)
            }
            EncodedValue::METHOD => {
                EncodedValue::Method(self.read_idx(SectionKind::MethodId, bounds)?)
            }
            EncodedValue::ENUM => EncodedValue::Enum(self.read_idx(SectionKind::FieldId, bounds)?),
            EncodedValue::ARRAY => {
                let count = self.read_u32()?;
                EncodedValue::Array(
                    (0..count)
                        .map(|_| self.parse_value(bounds))
                        .collect::<Result<Vec<_>>>()?,
                )
            }
            tag => return Err(DexFileError::InvalidValueTag(tag)),
        };
        Ok(value)
    }

    fn read_idx<I: PoolIndex>(&mut self, kind: SectionKind, bounds: &Bounds) -> Result<I> {
        let index = self.read_u32()?;
        if index as usize >= bounds.len(kind) {
            return Err(DexFileError::InvalidIndex { kind, index });
        }
        Ok(I::from_raw(index))
    }

    fn read_optional_idx<I: PoolIndex>(
        &mut self,
        kind: SectionKind,
        bounds: &Bounds,
    ) -> Result<Option<I>> {
        let index = self.read_u32()?;
        if index == NO_INDEX {
            return Ok(None);
        }
        if index as usize >= bounds.len(kind) {
            return Err(DexFileError::InvalidIndex { kind, index });
        }
        Ok(Some(I::from_raw(index)))
    }

    fn read_u32(&mut self) -> Result<u32> {
        Ok(self.r.read_u32::<E>()?)
    }

    fn read_u16(&mut self) -> Result<u16> {
        Ok(self.r.read_u16::<E>()?)
    }

    fn read_u8(&mut self) -> Result<u8> {
        Ok(self.r.read_u8()?)
    }

    fn remaining(&self) -> usize {
        let len = self.r.get_ref().len();
        len.saturating_sub(self.r.position().min(len as u64) as usize)
    }
}



#[cfg(test)]
mod parse_string_tests {
    use byteorder::LittleEndian;

    use super::*;

    #[test]
    fn it_should_read_a_length_prefixed_string() {
        let buf = b"\x03\0\0\0abc";
        let mut parser = Parser::<LittleEndian>::new(buf);

        assert_eq!("abc", parser.parse_string().unwrap());
    }

    #[test]
    fn it_should_reject_lengths_past_the_end_of_the_input() {
        let buf = b"\xFF\xFF\xFF\xFFabc";
        let mut parser = Parser::<LittleEndian>::new(buf);

        assert!(matches!(
            parser.parse_string(),
            Err(DexFileError::Truncated {
                length: 0xFFFF_FFFF,
                remaining: 3
            })
        ));
    }
}
