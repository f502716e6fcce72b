use crate::{
    AccessFlags, Annotation, CodeItem, EncodedValue, FieldIdx, MethodIdx, StringIdx, TypeIdx,
    TypeListIdx,
};

#[derive(Debug, Clone)]
pub struct FieldDef {
    pub field: FieldIdx,
    pub access_flags: AccessFlags,
    pub initial_value: Option<EncodedValue>,
    pub annotations: Vec<Annotation>,
}

impl FieldDef {
    pub fn new(field: FieldIdx, access_flags: AccessFlags) -> Self {
        Self {
            field,
            access_flags,
            initial_value: None,
            annotations: vec![],
        }
    }
}

#[derive(Debug, Clone)]
pub struct MethodDef {
    pub method: MethodIdx,
    pub access_flags: AccessFlags,
    pub annotations: Vec<Annotation>,
    pub parameter_annotations: Vec<Vec<Annotation>>,
    pub parameter_names: Vec<Option<StringIdx>>,
    pub code: Option<CodeItem>,
}

impl MethodDef {
    pub fn new(method: MethodIdx, access_flags: AccessFlags) -> Self {
        Self {
            method,
            access_flags,
            annotations: vec![],
            parameter_annotations: vec![],
            parameter_names: vec![],
            code: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClassDef {
    pub class_type: TypeIdx,
    pub access_flags: AccessFlags,
    pub super_class: Option<TypeIdx>,
    pub interfaces: TypeListIdx,
    pub source_file: Option<StringIdx>,
    pub annotations: Vec<Annotation>,
    pub static_fields: Vec<FieldDef>,
    pub instance_fields: Vec<FieldDef>,
    pub direct_methods: Vec<MethodDef>,
    pub virtual_methods: Vec<MethodDef>,
}

impl ClassDef {
    pub fn new(class_type: TypeIdx, interfaces: TypeListIdx) -> Self {
        Self {
            class_type,
            access_flags: AccessFlags::PUBLIC,
            super_class: None,
            interfaces,
            source_file: None,
            annotations: vec![],
            static_fields: vec![],
            instance_fields: vec![],
            direct_methods: vec![],
            virtual_methods: vec![],
        }
    }

    pub fn fields(&self) -> impl Iterator<Item = &FieldDef> + '_ {
        self.static_fields.iter().chain(self.instance_fields.iter())
    }

    pub fn methods(&self) -> impl Iterator<Item = &MethodDef> + '_ {
        self.direct_methods.iter().chain(self.virtual_methods.iter())
    }

    pub fn methods_mut(&mut self) -> impl Iterator<Item = &mut MethodDef> + '_ {
        self.direct_methods
            .iter_mut()
            .chain(self.virtual_methods.iter_mut())
    }

    pub fn field(&self, field: FieldIdx) -> Option<&FieldDef> {
        self.fields().find(|f| f.field == field)
    }

    pub fn field_mut(&mut self, field: FieldIdx) -> Option<&mut FieldDef> {
        self.static_fields
            .iter_mut()
            .chain(self.instance_fields.iter_mut())
            .find(|f| f.field == field)
    }

    pub fn method(&self, method: MethodIdx) -> Option<&MethodDef> {
        self.methods().find(|m| m.method == method)
    }

    pub fn method_mut(&mut self, method: MethodIdx) -> Option<&mut MethodDef> {
        self.methods_mut().find(|m| m.method == method)
    }

    /// Files the field under the static or instance list according to its flags.
    pub fn add_field(&mut self, field: FieldDef) {
        if field.access_flags.contains(AccessFlags::STATIC) {
            self.static_fields.push(field);
        } else {
            self.instance_fields.push(field);
        }
    }

    /// Files the method under the direct or virtual list according to its flags.
    pub fn add_method(&mut self, method: MethodDef) {
        if method.access_flags.is_direct_method() {
            self.direct_methods.push(method);
        } else {
            self.virtual_methods.push(method);
        }
    }

    pub fn remove_field(&mut self, field: FieldIdx) -> Option<FieldDef> {
        if let Some(i) = self.static_fields.iter().position(|f| f.field == field) {
            return Some(self.static_fields.remove(i));
        }
        let i = self.instance_fields.iter().position(|f| f.field == field)?;
        Some(self.instance_fields.remove(i))
    }

    pub fn remove_method(&mut self, method: MethodIdx) -> Option<MethodDef> {
        if let Some(i) = self.direct_methods.iter().position(|m| m.method == method) {
            return Some(self.direct_methods.remove(i));
        }
        let i = self.virtual_methods.iter().position(|m| m.method == method)?;
        Some(self.virtual_methods.remove(i))
    }

    pub fn annotation(&self, annotation_type: TypeIdx) -> Option<&Annotation> {
        self.annotations
            .iter()
            .find(|a| a.annotation_type == annotation_type)
    }

    pub fn annotation_mut(&mut self, annotation_type: TypeIdx) -> Option<&mut Annotation> {
        self.annotations
            .iter_mut()
            .find(|a| a.annotation_type == annotation_type)
    }
}
