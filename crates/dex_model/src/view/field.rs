use std::{fmt, ptr};

use dexmerge_dex_file::{AccessFlags, Annotation, FieldDef, FieldKey, FieldRef, Key, TypeKey};

use crate::{Declaration, DexClass, DexValue};

#[derive(Clone, Copy)]
pub struct DexField<'a> {
    class: DexClass<'a>,
    def: &'a FieldDef,
}

impl<'a> DexField<'a> {
    pub(crate) fn new(class: DexClass<'a>, def: &'a FieldDef) -> Self {
        Self { class, def }
    }

    pub fn def(&self) -> &'a FieldDef {
        self.def
    }

    pub fn key(&self) -> FieldKey {
        self.class.container().field_key(self.def.field)
    }

    pub fn name(&self) -> &'a str {
        let container = self.class.container();
        container.string(container.fields()[self.def.field].name)
    }

    pub fn field_type(&self) -> TypeKey {
        let container = self.class.container();
        container.type_key(container.fields()[self.def.field].field_type)
    }

    pub fn field_ref(&self) -> FieldRef {
        FieldRef {
            class: self.class.id(),
            field: self.def.field,
        }
    }

    /// Static initial value, when the field carries one.
    pub fn initial_value(&self) -> Option<DexValue<'a>> {
        let container = self.class.container();
        self.def
            .initial_value
            .as_ref()
            .map(|v| DexValue::new(container, v))
    }
}

impl<'a> Declaration<'a> for DexField<'a> {
    fn key(&self) -> Key {
        Key::Field(DexField::key(self))
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
        let own = Key::Field(DexField::key(self));
        if own == *key {
            return false;
        }
        own.uses(key)
            || self
                .initial_value()
                .and_then(|v| v.key())
                .map_or(false, |k| k.uses(key))
    }
}

impl PartialEq for DexField<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.class == other.class && ptr::eq(self.def, other.def)
    }
}

impl fmt::Debug for DexField<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("DexField").field(&DexField::key(self)).finish()
    }
}

impl fmt::Display for DexField<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", DexField::key(self))
    }
}
