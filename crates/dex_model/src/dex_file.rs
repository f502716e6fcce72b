use dexmerge_dex_file::{
    AccessFlags, ClassId, EncodedValue, FieldKey, FieldRef, Key, MethodKey, MethodRef,
    SectionContainer, SectionLimits, TypeKey,
};
use log::debug;

use crate::{
    view::{DexClassMut, DexMethodMut},
    ClassRepository, DexSource, InstructionRef, Result,
};

/// One dex container and the class repository over it.
#[derive(Debug, Clone)]
pub struct DexFile {
    name: String,
    container: SectionContainer,
}

impl DexFile {
    pub fn new(name: impl Into<String>, limits: SectionLimits) -> Self {
        Self {
            name: name.into(),
            container: SectionContainer::new(limits),
        }
    }

    pub fn from_container(name: impl Into<String>, container: SectionContainer) -> Self {
        Self {
            name: name.into(),
            container,
        }
    }

    /// Parses the bytes of `source`; an empty source yields an empty container.
    pub fn read(source: &dyn DexSource, limits: SectionLimits) -> Result<Self> {
        let bytes = source.open()?;
        let mut container = if bytes.is_empty() {
            SectionContainer::default()
        } else {
            SectionContainer::parse(&bytes)?
        };
        container.set_limits(limits);
        debug!(
            "Loaded {} with {} classes",
            source.name(),
            container.class_count()
        );
        Ok(Self::from_container(source.simple_name(), container))
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(self.container.to_bytes()?)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn container(&self) -> &SectionContainer {
        &self.container
    }

    pub fn container_mut(&mut self) -> &mut SectionContainer {
        &mut self.container
    }

    pub fn is_empty(&self) -> bool {
        self.container.is_empty()
    }

    /// Drops every class and pooled entry, keeping the limits.
    pub fn clear(&mut self) {
        self.container.remove_classes(|_| true);
        self.container.shrink();
    }

    /// Compacts the pools; every class, method and instruction handle into
    /// this file is detached afterwards.
    pub fn shrink(&mut self) {
        self.container.shrink();
    }

    pub fn get_or_create_class(&mut self, key: &TypeKey) -> ClassId {
        self.container.get_or_create_class(key)
    }

    pub fn class_mut(&mut self, key: &TypeKey) -> Option<DexClassMut<'_>> {
        let id = self.container.find_class(key)?;
        Some(DexClassMut::new(self, id))
    }

    pub fn class_mut_by_id(&mut self, id: ClassId) -> Option<DexClassMut<'_>> {
        if !self.container.is_attached(id) {
            return None;
        }
        Some(DexClassMut::new(self, id))
    }

    pub fn method_mut(&mut self, key: &MethodKey) -> Option<DexMethodMut<'_>> {
        let method = self.container.find_method_def(key)?;
        Some(DexMethodMut::new(self, method))
    }

    pub fn get_or_create_method(
        &mut self,
        key: &MethodKey,
        access_flags: AccessFlags,
    ) -> Result<MethodRef> {
        Ok(self.container.get_or_create_method(key, access_flags)?)
    }

    pub fn get_or_create_field(
        &mut self,
        key: &FieldKey,
        access_flags: AccessFlags,
    ) -> Result<FieldRef> {
        Ok(self.container.get_or_create_field(key, access_flags)?)
    }

    /// Handle to the instruction at `position` of a method defined here.
    pub fn instruction_ref(&self, method: &MethodKey, position: usize) -> Option<InstructionRef> {
        let method = self.container.find_method_def(method)?;
        let code = self.container.method_def(method)?.code.as_ref()?;
        let id = code.instructions.id_at(position)?;
        Some(InstructionRef::new(method, id, position))
    }

    pub fn access_flags(&self, key: &Key) -> Option<AccessFlags> {
        match key {
            Key::Type(t) => Some(self.container.class(self.container.find_class(t)?)?.access_flags),
            Key::Method(m) => Some(
                self.container
                    .method_def(self.container.find_method_def(m)?)?
                    .access_flags,
            ),
            Key::Field(f) => Some(
                self.container
                    .field_def(self.container.find_field_def(f)?)?
                    .access_flags,
            ),
            _ => None,
        }
    }

    /// Applies `edit` to the flags of the class, method or field defined here
    /// under `key`. Returns whether such a definition exists.
    pub fn edit_access_flags(&mut self, key: &Key, edit: impl FnOnce(&mut AccessFlags)) -> bool {
        let flags = match key {
            Key::Type(t) => self
                .container
                .find_class(t)
                .and_then(|id| self.container.class_mut(id))
                .map(|c| &mut c.access_flags),
            Key::Method(m) => self
                .container
                .find_method_def(m)
                .and_then(|r| self.container.method_def_mut(r))
                .map(|d| &mut d.access_flags),
            Key::Field(f) => self
                .container
                .find_field_def(f)
                .and_then(|r| self.container.field_def_mut(r))
                .map(|d| &mut d.access_flags),
            _ => None,
        };
        match flags {
            Some(flags) => {
                edit(flags);
                true
            }
            None => false,
        }
    }

    pub fn add_access_flags(&mut self, key: &Key, flags: AccessFlags) -> bool {
        self.edit_access_flags(key, |f| f.insert(flags))
    }

    /// Value of the `name` element of the class's `InnerClass` annotation,
    /// when it is a string.
    pub fn dalvik_inner_class_name(&self, key: &TypeKey) -> Option<&str> {
        let container = &self.container;
        let class = container.class(container.find_class(key)?)?;
        let annotation =
            class.annotation(container.find_type(&TypeKey::new(TypeKey::DALVIK_INNER_CLASS))?)?;
        match annotation.element(container.find_string("name")?)? {
            EncodedValue::String(s) => Some(container.string(*s)),
            _ => None,
        }
    }

    /// Rewrites an existing `InnerClass` name element. `None` stores null, the
    /// value anonymous classes carry.
    pub fn set_dalvik_inner_class_name(&mut self, key: &TypeKey, name: Option<&str>) -> bool {
        let Some(id) = self.container.find_class(key) else {
            return false;
        };
        let Some(annotation_type) = self
            .container
            .find_type(&TypeKey::new(TypeKey::DALVIK_INNER_CLASS))
        else {
            return false;
        };
        let Some(element) = self.container.find_string("name") else {
            return false;
        };
        let value = match name {
            Some(name) => EncodedValue::String(self.container.intern_string(name)),
            None => EncodedValue::Null,
        };
        let Some(annotation) = self
            .container
            .class_mut(id)
            .and_then(|c| c.annotation_mut(annotation_type))
        else {
            return false;
        };
        if annotation.element(element).is_none() {
            return false;
        }
        annotation.set_element(element, value);
        true
    }

    /// Brings the `InnerClass` name of `key` in line with its descriptor.
    pub fn fix_dalvik_inner_class_name(&mut self, key: &TypeKey) -> bool {
        if self.dalvik_inner_class_name(key).is_none() {
            return false;
        }
        let name = key.simple_inner_name().map(str::to_owned);
        self.set_dalvik_inner_class_name(key, name.as_deref())
    }
}

impl ClassRepository for DexFile {
    fn as_repository(&self) -> &dyn ClassRepository {
        self
    }

    fn dex_files(&self) -> Box<dyn Iterator<Item = &DexFile> + '_> {
        Box::new(std::iter::once(self))
    }

    fn dex_files_mut(&mut self) -> Box<dyn Iterator<Item = &mut DexFile> + '_> {
        Box::new(std::iter::once(self))
    }
}
