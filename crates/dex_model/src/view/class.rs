use std::{
    collections::{BTreeSet, VecDeque},
    fmt, ptr,
};

use dexmerge_dex_file::{
    AccessFlags, Annotation, AnnotationElement, ClassDef, ClassId, EncodedValue, FieldKey,
    FieldRef, Key, MethodKey, MethodRef, SectionContainer, TypeKey, Visibility,
};

use crate::{
    ClassRepository, Declaration, DexField, DexFile, DexInstruction, DexMethod, DexMethodMut,
    DexModelError, Result,
};

/// A class definition inside one file of a repository.
#[derive(Clone, Copy)]
pub struct DexClass<'a> {
    repository: &'a dyn ClassRepository,
    file: &'a DexFile,
    id: ClassId,
    def: &'a ClassDef,
}

impl<'a> DexClass<'a> {
    pub(crate) fn new(
        repository: &'a dyn ClassRepository,
        file: &'a DexFile,
        id: ClassId,
    ) -> Option<Self> {
        let def = file.container().class(id)?;
        Some(Self {
            repository,
            file,
            id,
            def,
        })
    }

    pub fn repository(&self) -> &'a dyn ClassRepository {
        self.repository
    }

    pub fn dex_file(&self) -> &'a DexFile {
        self.file
    }

    pub fn id(&self) -> ClassId {
        self.id
    }

    pub fn def(&self) -> &'a ClassDef {
        self.def
    }

    pub(crate) fn container(&self) -> &'a SectionContainer {
        self.file.container()
    }

    pub fn key(&self) -> TypeKey {
        self.container().type_key(self.def.class_type)
    }

    pub fn is_in_same_file(&self, other: &DexClass<'_>) -> bool {
        ptr::eq(self.file, other.file)
    }

    pub fn is_interface(&self) -> bool {
        self.def.access_flags.contains(AccessFlags::INTERFACE)
    }

    pub fn is_enum(&self) -> bool {
        self.def.access_flags.contains(AccessFlags::ENUM)
    }

    pub fn is_annotation(&self) -> bool {
        self.def.access_flags.contains(AccessFlags::ANNOTATION)
    }

    pub fn super_class_key(&self) -> Option<TypeKey> {
        self.def.super_class.map(|s| self.container().type_key(s))
    }

    pub fn super_class(&self) -> Option<DexClass<'a>> {
        self.repository.get_class(&self.super_class_key()?)
    }

    pub fn interfaces(&self) -> Vec<TypeKey> {
        self.container().type_list_key(self.def.interfaces).0
    }

    pub fn contains_interface(&self, key: &TypeKey) -> bool {
        self.interfaces().contains(key)
    }

    pub fn interface_classes(&self) -> Vec<DexClass<'a>> {
        self.interfaces()
            .iter()
            .filter_map(|i| self.repository.get_class(i))
            .collect()
    }

    pub fn source_file(&self) -> Option<&'a str> {
        let container = self.container();
        self.def.source_file.map(|s| container.string(s))
    }

    fn direct_super_types(&self) -> Vec<DexClass<'a>> {
        self.super_class()
            .into_iter()
            .chain(self.interface_classes())
            .collect()
    }

    /// Every class this one extends or implements, directly or not, nearest
    /// first. Types outside the repository are not followed.
    pub fn super_types(&self) -> Vec<DexClass<'a>> {
        let mut seen = BTreeSet::from([self.key()]);
        let mut result = vec![];
        let mut pending = self.direct_super_types();
        pending.reverse();
        while let Some(class) = pending.pop() {
            if !seen.insert(class.key()) {
                continue;
            }
            let mut supers = class.direct_super_types();
            supers.reverse();
            pending.extend(supers);
            result.push(class);
        }
        result
    }

    pub fn extending(&self) -> Vec<DexClass<'a>> {
        self.repository.search_extending(&self.key())
    }

    pub fn implementations(&self) -> Vec<DexClass<'a>> {
        self.repository.search_implementations(&self.key())
    }

    /// Direct subclasses and implementers.
    pub fn overriding(&self) -> Vec<DexClass<'a>> {
        let mut result = self.extending();
        result.extend(self.implementations());
        result
    }

    pub fn overriding_and_super_types(&self) -> Vec<DexClass<'a>> {
        let mut result = self.overriding();
        result.extend(self.super_types());
        result
    }

    pub fn declared_methods(&self) -> impl Iterator<Item = DexMethod<'a>> + 'a {
        let class = *self;
        self.def.methods().map(move |m| DexMethod::new(class, m))
    }

    pub fn direct_methods(&self) -> impl Iterator<Item = DexMethod<'a>> + 'a {
        let class = *self;
        self.def
            .direct_methods
            .iter()
            .map(move |m| DexMethod::new(class, m))
    }

    pub fn virtual_methods(&self) -> impl Iterator<Item = DexMethod<'a>> + 'a {
        let class = *self;
        self.def
            .virtual_methods
            .iter()
            .map(move |m| DexMethod::new(class, m))
    }

    pub fn declared_fields(&self) -> impl Iterator<Item = DexField<'a>> + 'a {
        let class = *self;
        self.def.fields().map(move |f| DexField::new(class, f))
    }

    pub fn static_fields(&self) -> impl Iterator<Item = DexField<'a>> + 'a {
        let class = *self;
        self.def
            .static_fields
            .iter()
            .map(move |f| DexField::new(class, f))
    }

    pub fn instance_fields(&self) -> impl Iterator<Item = DexField<'a>> + 'a {
        let class = *self;
        self.def
            .instance_fields
            .iter()
            .map(move |f| DexField::new(class, f))
    }

    /// Declared method with the name and parameters of `key`; the declaring
    /// type of `key` is ignored.
    pub fn declared_method(&self, key: &MethodKey, ignore_return: bool) -> Option<DexMethod<'a>> {
        self.declared_methods().find(|m| {
            let own = m.key();
            same_signature(&own, key) && (ignore_return || own.return_type() == key.return_type())
        })
    }

    pub fn contains_declared_method(&self, key: &MethodKey) -> bool {
        self.declared_method(key, false).is_some()
    }

    pub fn declared_field(&self, key: &FieldKey) -> Option<DexField<'a>> {
        self.declared_fields()
            .find(|f| f.key().equals_ignoring_declaring(key))
    }

    pub fn static_constructor(&self) -> Option<DexMethod<'a>> {
        let key = MethodKey::new(
            self.key(),
            MethodKey::STATIC_INITIALIZER,
            vec![],
            TypeKey::new("V"),
        );
        self.declared_method(&key, false)
    }

    /// Resolves a method call on this class: its own declaration first, then
    /// the nearest accessible one in its super types.
    pub fn method(&self, key: &MethodKey) -> Option<DexMethod<'a>> {
        if let Some(method) = self.declared_method(key, false) {
            return Some(method);
        }
        self.super_types().into_iter().find_map(|class| {
            class
                .declared_method(key, false)
                .filter(|m| m.is_accessible_to(&key.declaring))
        })
    }

    /// Every declaration `key` may bind to from this class: own overloads
    /// differing only in return type, then non-private super type methods.
    pub fn methods(&self, key: &MethodKey, ignore_accessibility: bool) -> Vec<DexMethod<'a>> {
        let declaring = self.key();
        let mut result = self
            .declared_methods()
            .filter(|m| same_signature(&m.key(), key))
            .collect::<Vec<_>>();
        for class in self.super_types() {
            if let Some(method) = class.declared_method(key, false) {
                if !method.is_private()
                    && (ignore_accessibility || method.is_accessible_to(&declaring))
                {
                    result.push(method);
                }
            }
        }
        result
    }

    /// Resolves a field access on this class, searching super types when it
    /// is not declared here.
    pub fn field(&self, key: &FieldKey) -> Option<DexField<'a>> {
        if !self.is_accessible_to(&key.declaring) {
            return None;
        }
        if let Some(field) = self.declared_field(key) {
            return Some(field);
        }
        let defining = self.key();
        self.super_types().into_iter().find_map(|class| {
            class
                .declared_field(key)
                .filter(|f| f.is_accessible_to(&defining))
        })
    }

    fn collect_down(
        &self,
        key: &MethodKey,
        next: impl Fn(&DexClass<'a>) -> Vec<DexClass<'a>>,
    ) -> Vec<DexMethod<'a>> {
        let mut seen = BTreeSet::new();
        let mut result = vec![];
        let mut pending = VecDeque::from([*self]);
        while let Some(class) = pending.pop_front() {
            if !seen.insert(class.key()) {
                continue;
            }
            result.extend(class.declared_method(key, false));
            pending.extend(next(&class));
        }
        result
    }

    /// This class's declaration of `key` and those of all its subclasses.
    pub fn extending_methods(&self, key: &MethodKey) -> Vec<DexMethod<'a>> {
        self.collect_down(key, |c| c.extending())
    }

    /// This class's declaration of `key` and those of all its implementers.
    pub fn implementation_methods(&self, key: &MethodKey) -> Vec<DexMethod<'a>> {
        self.collect_down(key, |c| c.implementations())
    }

    /// `key` rebased onto this class and onto every subtype, plus the targets
    /// of bridge methods met on the way.
    pub fn overriding_keys(&self, key: &MethodKey) -> Vec<MethodKey> {
        let mut seen = BTreeSet::new();
        let mut result = vec![];
        let mut pending = VecDeque::from([*self]);
        while let Some(class) = pending.pop_front() {
            if !seen.insert(class.key()) {
                continue;
            }
            let rebased = key.with_declaring(&class.key());
            if let Some(bridged) = class
                .declared_method(&rebased, false)
                .and_then(|m| m.bridged())
            {
                result.push(bridged.key());
            }
            result.push(rebased);
            pending.extend(class.overriding());
        }
        result
    }

    pub fn used_keys(&self) -> Vec<Key> {
        self.container().used_keys(self.id).unwrap_or_default()
    }

    pub fn used_types(&self) -> BTreeSet<TypeKey> {
        self.used_keys()
            .iter()
            .flat_map(|k| k.mentioned_types().into_iter().cloned())
            .collect()
    }

    /// This class and every repository class it needs, transitively.
    /// `include` limits which types are followed.
    pub fn required_classes(&self, include: &dyn Fn(&TypeKey) -> bool) -> Vec<DexClass<'a>> {
        let mut seen = BTreeSet::from([self.key()]);
        let mut result = vec![*self];
        let mut pending = vec![*self];
        while let Some(class) = pending.pop() {
            for used in class.used_types() {
                let used = used.element_type();
                if !include(&used) || seen.contains(&used) {
                    continue;
                }
                if let Some(required) = self.repository.get_class(&used) {
                    seen.insert(used);
                    result.push(required);
                    pending.push(required);
                }
            }
        }
        result
    }

    pub fn uses_native(&self) -> bool {
        self.is_native() || self.declared_methods().any(|m| m.is_native())
    }

    pub fn dalvik_inner_class_name(&self) -> Option<&'a str> {
        self.file.dalvik_inner_class_name(&self.key())
    }

    pub fn dalvik_enclosing_class(&self) -> Option<TypeKey> {
        let annotation = self.annotation(&TypeKey::new(TypeKey::DALVIK_ENCLOSING_CLASS))?;
        annotation.element("value")?.as_type()
    }

    pub fn instructions(&self) -> Vec<DexInstruction<'a>> {
        self.declared_methods()
            .flat_map(|m| m.instructions().collect::<Vec<_>>())
            .collect()
    }
}

/// Same name and parameters, whatever the declaring and return types.
fn same_signature(a: &MethodKey, b: &MethodKey) -> bool {
    a.name == b.name && a.parameters() == b.parameters()
}

impl<'a> Declaration<'a> for DexClass<'a> {
    fn key(&self) -> Key {
        Key::Type(DexClass::key(self))
    }

    fn dex_class(&self) -> DexClass<'a> {
        *self
    }

    fn access_flags(&self) -> AccessFlags {
        self.def.access_flags
    }

    fn raw_annotations(&self) -> &'a [Annotation] {
        &self.def.annotations
    }

    fn uses(&self, key: &Key) -> bool {
        if Key::Type(DexClass::key(self)) == *key {
            return false;
        }
        self.used_keys().iter().any(|k| k.uses(key))
    }
}

impl PartialEq for DexClass<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.is_in_same_file(other) && self.id == other.id
    }
}

impl fmt::Debug for DexClass<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DexClass")
            .field("key", &DexClass::key(self))
            .field("file", &self.file.name())
            .finish()
    }
}

impl fmt::Display for DexClass<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", DexClass::key(self))
    }
}

/// Write access to one class of a [`DexFile`].
#[derive(Debug)]
pub struct DexClassMut<'a> {
    file: &'a mut DexFile,
    id: ClassId,
}

impl<'a> DexClassMut<'a> {
    pub(crate) fn new(file: &'a mut DexFile, id: ClassId) -> Self {
        Self { file, id }
    }

    pub fn id(&self) -> ClassId {
        self.id
    }

    fn def(&self) -> Result<&ClassDef> {
        self.file
            .container()
            .class(self.id)
            .ok_or(DexModelError::Detached)
    }

    fn def_mut(&mut self) -> Result<&mut ClassDef> {
        self.file
            .container_mut()
            .class_mut(self.id)
            .ok_or(DexModelError::Detached)
    }

    pub fn key(&self) -> Result<TypeKey> {
        let class_type = self.def()?.class_type;
        Ok(self.file.container().type_key(class_type))
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

    pub fn set_super_class(&mut self, super_class: Option<&TypeKey>) -> Result<()> {
        let super_class = super_class.map(|s| self.file.container_mut().intern_type(s));
        self.def_mut()?.super_class = super_class;
        Ok(())
    }

    pub fn add_interface(&mut self, interface: &TypeKey) -> Result<bool> {
        let mut interfaces = self.interfaces()?;
        if interfaces.contains(interface) {
            return Ok(false);
        }
        interfaces.push(interface.clone());
        self.set_interfaces(&interfaces)?;
        Ok(true)
    }

    pub fn remove_interface(&mut self, interface: &TypeKey) -> Result<bool> {
        let mut interfaces = self.interfaces()?;
        let before = interfaces.len();
        interfaces.retain(|i| i != interface);
        if interfaces.len() == before {
            return Ok(false);
        }
        self.set_interfaces(&interfaces)?;
        Ok(true)
    }

    fn interfaces(&self) -> Result<Vec<TypeKey>> {
        let interfaces = self.def()?.interfaces;
        Ok(self.file.container().type_list_key(interfaces).0)
    }

    fn set_interfaces(&mut self, interfaces: &[TypeKey]) -> Result<()> {
        let list = self.file.container_mut().intern_type_list(interfaces);
        self.def_mut()?.interfaces = list;
        Ok(())
    }

    pub fn set_source_file(&mut self, source_file: Option<&str>) -> Result<()> {
        let source_file = source_file.map(|s| self.file.container_mut().intern_string(s));
        self.def_mut()?.source_file = source_file;
        Ok(())
    }

    /// Defines a method on this class; the declaring type of `key` is replaced.
    pub fn get_or_create_method(
        &mut self,
        key: &MethodKey,
        access_flags: AccessFlags,
    ) -> Result<MethodRef> {
        let key = key.with_declaring(&self.key()?);
        self.file.get_or_create_method(&key, access_flags)
    }

    pub fn get_or_create_field(
        &mut self,
        key: &FieldKey,
        access_flags: AccessFlags,
    ) -> Result<FieldRef> {
        let key = key.with_declaring(&self.key()?);
        self.file.get_or_create_field(&key, access_flags)
    }

    pub fn method_mut(&mut self, key: &MethodKey) -> Option<DexMethodMut<'_>> {
        let key = key.with_declaring(&self.key().ok()?);
        self.file.method_mut(&key)
    }

    pub fn remove_method(&mut self, key: &MethodKey) -> Result<bool> {
        let key = key.with_declaring(&self.key()?);
        let Some(method) = self.file.container().find_method(&key) else {
            return Ok(false);
        };
        Ok(self.def_mut()?.remove_method(method).is_some())
    }

    pub fn remove_field(&mut self, key: &FieldKey) -> Result<bool> {
        let key = key.with_declaring(&self.key()?);
        let Some(field) = self.file.container().find_field(&key) else {
            return Ok(false);
        };
        Ok(self.def_mut()?.remove_field(field).is_some())
    }

    /// Removes class level annotations of `annotation_type`.
    pub fn remove_annotation(&mut self, annotation_type: &TypeKey) -> Result<bool> {
        let Some(annotation_type) = self.file.container().find_type(annotation_type) else {
            return Ok(false);
        };
        let annotations = &mut self.def_mut()?.annotations;
        let before = annotations.len();
        annotations.retain(|a| a.annotation_type != annotation_type);
        Ok(annotations.len() != before)
    }

    /// Drops parameter names, the debug information this model keeps.
    pub fn clear_debug(&mut self) -> Result<()> {
        for method in self.def_mut()?.methods_mut() {
            method.parameter_names.clear();
        }
        Ok(())
    }

    pub fn set_dalvik_inner_class_name(&mut self, name: Option<&str>) -> Result<bool> {
        let key = self.key()?;
        Ok(self.file.set_dalvik_inner_class_name(&key, name))
    }

    pub fn fix_dalvik_inner_class_name(&mut self) -> Result<bool> {
        let key = self.key()?;
        Ok(self.file.fix_dalvik_inner_class_name(&key))
    }

    /// Sets the `InnerClass` name, adding the annotation when missing.
    pub fn create_dalvik_inner_class_name(&mut self, name: &str) -> Result<()> {
        let container = self.file.container_mut();
        let annotation_type = container.intern_type(&TypeKey::new(TypeKey::DALVIK_INNER_CLASS));
        let element = container.intern_string("name");
        let value = EncodedValue::String(container.intern_string(name));
        let class = self.def_mut()?;
        match class.annotation_mut(annotation_type) {
            Some(annotation) => annotation.set_element(element, value),
            None => class.annotations.push(Annotation {
                visibility: Visibility::System,
                annotation_type,
                elements: vec![AnnotationElement {
                    name: element,
                    value,
                }],
            }),
        }
        Ok(())
    }

    /// Deletes the class from its file.
    pub fn remove(self) -> bool {
        self.file.container_mut().remove_class(self.id).is_some()
    }
}
