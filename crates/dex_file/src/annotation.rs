use std::convert::TryFrom;

use crate::{FieldIdx, MethodIdx, StringIdx, TypeIdx};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Visibility {
    Build = 0,
    Runtime = 1,
    System = 2,
}

impl TryFrom<u8> for Visibility {
    type Error = u8;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(Visibility::Build),
            1 => Ok(Visibility::Runtime),
            2 => Ok(Visibility::System),
            _ => Err(value),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EncodedValue {
    Null,
    Boolean(bool),
    Int(i64),
    String(StringIdx),
    Type(TypeIdx),
    Field(FieldIdx),
    Method(MethodIdx),
    Enum(FieldIdx),
    Array(Vec<EncodedValue>),
}

impl EncodedValue {
    pub(crate) const NULL: u8 = 0;
    pub(crate) const BOOLEAN: u8 = 1;
    pub(crate) const INT: u8 = 2;
    pub(crate) const STRING: u8 = 3;
    pub(crate) const TYPE: u8 = 4;
    pub(crate) const FIELD: u8 = 5;
    pub(crate) const METHOD: u8 = 6;
    pub(crate) const ENUM: u8 = 7;
    pub(crate) const ARRAY: u8 = 8;

    pub fn tag(&self) -> u8 {
        match self {
            EncodedValue::Null => Self::NULL,
            EncodedValue::Boolean(_) => Self::BOOLEAN,
            EncodedValue::Int(_) => Self::INT,
            EncodedValue::String(_) => Self::STRING,
            EncodedValue::Type(_) => Self::TYPE,
            EncodedValue::Field(_) => Self::FIELD,
            EncodedValue::Method(_) => Self::METHOD,
            EncodedValue::Enum(_) => Self::ENUM,
            EncodedValue::Array(_) => Self::ARRAY,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnnotationElement {
    pub name: StringIdx,
    pub value: EncodedValue,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    pub visibility: Visibility,
    pub annotation_type: TypeIdx,
    pub elements: Vec<AnnotationElement>,
}

impl Annotation {
    pub fn element(&self, name: StringIdx) -> Option<&EncodedValue> {
        self.elements
            .iter()
            .find(|e| e.name == name)
            .map(|e| &e.value)
    }

    /// Replaces the value of `name`, adding the element when missing.
    pub fn set_element(&mut self, name: StringIdx, value: EncodedValue) {
        match self.elements.iter_mut().find(|e| e.name == name) {
            Some(element) => element.value = value,
            None => self.elements.push(AnnotationElement { name, value }),
        }
    }
}
