use dexmerge_dex_file::{AccessFlags, Annotation, Key, TypeKey};

use crate::{DexAnnotation, DexClass, DexField, DexMethod};

/// Behavior shared by classes, methods and fields.
pub trait Declaration<'a> {
    fn key(&self) -> Key;

    fn dex_class(&self) -> DexClass<'a>;

    fn access_flags(&self) -> AccessFlags;

    fn raw_annotations(&self) -> &'a [Annotation];

    /// Whether this declaration refers to `key`; its own key does not count.
    fn uses(&self, key: &Key) -> bool;

    /// The class declaring this declaration, or the class itself.
    fn defining(&self) -> TypeKey {
        self.dex_class().key()
    }

    fn package_name(&self) -> String {
        self.defining().package_name().to_owned()
    }

    fn annotations(&self) -> Vec<DexAnnotation<'a>> {
        let container = self.dex_class().dex_file().container();
        self.raw_annotations()
            .iter()
            .map(|a| DexAnnotation::new(container, a))
            .collect()
    }

    fn annotation(&self, annotation_type: &TypeKey) -> Option<DexAnnotation<'a>> {
        self.annotations()
            .into_iter()
            .find(|a| a.annotation_type() == *annotation_type)
    }

    fn has_access_flags(&self, flags: AccessFlags) -> bool {
        self.access_flags().contains(flags)
    }

    fn is_public(&self) -> bool {
        self.has_access_flags(AccessFlags::PUBLIC)
    }

    fn is_protected(&self) -> bool {
        self.has_access_flags(AccessFlags::PROTECTED)
    }

    fn is_private(&self) -> bool {
        self.has_access_flags(AccessFlags::PRIVATE)
    }

    fn is_package_private(&self) -> bool {
        self.access_flags().is_package_private()
    }

    fn is_static(&self) -> bool {
        self.has_access_flags(AccessFlags::STATIC)
    }

    fn is_final(&self) -> bool {
        self.has_access_flags(AccessFlags::FINAL)
    }

    fn is_abstract(&self) -> bool {
        self.has_access_flags(AccessFlags::ABSTRACT)
    }

    fn is_native(&self) -> bool {
        self.has_access_flags(AccessFlags::NATIVE)
    }

    fn is_synthetic(&self) -> bool {
        self.has_access_flags(AccessFlags::SYNTHETIC)
    }

    /// Declared by `type_key`, or package-private within its package, or
    /// otherwise anything but private.
    fn is_accessible_to(&self, type_key: &TypeKey) -> bool {
        if self.defining() == *type_key {
            return true;
        }
        if self.is_package_private() {
            return self.defining().package_name() == type_key.package_name();
        }
        !self.is_private()
    }

    /// Like [`Declaration::is_accessible_to`], and the declaring class must be
    /// accessible to `class` as well.
    fn is_accessible_to_class(&self, class: &DexClass<'_>) -> bool {
        let owner = self.dex_class();
        let defining = class.key();
        if !owner.is_accessible_to(&defining) {
            return false;
        }
        if owner.key() == defining || matches!(self.key(), Key::Type(_)) {
            return true;
        }
        self.is_accessible_to(&defining)
    }
}

/// Any declaration resolved from a key.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DexDeclaration<'a> {
    Class(DexClass<'a>),
    Method(DexMethod<'a>),
    Field(DexField<'a>),
}

impl<'a> Declaration<'a> for DexDeclaration<'a> {
    fn key(&self) -> Key {
        match self {
            DexDeclaration::Class(c) => Key::Type(c.key()),
            DexDeclaration::Method(m) => Key::Method(m.key()),
            DexDeclaration::Field(f) => Key::Field(f.key()),
        }
    }

    fn dex_class(&self) -> DexClass<'a> {
        match self {
            DexDeclaration::Class(c) => *c,
            DexDeclaration::Method(m) => m.dex_class(),
            DexDeclaration::Field(f) => f.dex_class(),
        }
    }

    fn access_flags(&self) -> AccessFlags {
        match self {
            DexDeclaration::Class(c) => c.access_flags(),
            DexDeclaration::Method(m) => m.access_flags(),
            DexDeclaration::Field(f) => f.access_flags(),
        }
    }

    fn raw_annotations(&self) -> &'a [Annotation] {
        match self {
            DexDeclaration::Class(c) => c.raw_annotations(),
            DexDeclaration::Method(m) => m.raw_annotations(),
            DexDeclaration::Field(f) => f.raw_annotations(),
        }
    }

    fn uses(&self, key: &Key) -> bool {
        match self {
            DexDeclaration::Class(c) => c.uses(key),
            DexDeclaration::Method(m) => m.uses(key),
            DexDeclaration::Field(f) => f.uses(key),
        }
    }
}
