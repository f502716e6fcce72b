use std::collections::{BTreeSet, HashMap};

use byteorder::LittleEndian;

use crate::{
    arena::Arena, translate::Translator, AccessFlags, Annotation, ClassDef, ClassId, CodeItem,
    DexFileError, EncodedValue, FieldDef, FieldId, FieldIdx, FieldKey, FieldRef, Key, MethodDef,
    MethodId, MethodIdx, MethodKey, MethodRef, Operand, Parser, Pool, ProtoId, ProtoIdx,
    ProtoKey, Result, SectionKind, SectionLimits, StringIdx, StringKey, TypeIdx, TypeKey,
    TypeListIdx, TypeListKey, Usage, Writer,
};

/// Outcome of copying one class into a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassMerge {
    Merged(ClassId),
    /// The destination already defines the class.
    Duplicate,
    /// Copying would push the given kind past its ceiling.
    Full(SectionKind),
}

/// Every pooled entry one class needs, including transitive references.
#[derive(Debug, Clone, Default)]
pub struct UsedIds {
    pub strings: BTreeSet<StringIdx>,
    pub types: BTreeSet<TypeIdx>,
    pub type_lists: BTreeSet<TypeListIdx>,
    pub protos: BTreeSet<ProtoIdx>,
    pub fields: BTreeSet<FieldIdx>,
    pub methods: BTreeSet<MethodIdx>,
}

impl UsedIds {
    pub fn count(&self, kind: SectionKind) -> usize {
        match kind {
            SectionKind::StringId => self.strings.len(),
            SectionKind::TypeId => self.types.len(),
            SectionKind::TypeList => self.type_lists.len(),
            SectionKind::ProtoId => self.protos.len(),
            SectionKind::FieldId => self.fields.len(),
            SectionKind::MethodId => self.methods.len(),
            _ => 0,
        }
    }
}

/// One dex container: the id pools plus the class definitions using them.
#[derive(Debug, Clone, Default)]
pub struct SectionContainer {
    pub(crate) strings: Pool<StringIdx, String>,
    pub(crate) types: Pool<TypeIdx, StringIdx>,
    pub(crate) type_lists: Pool<TypeListIdx, Vec<TypeIdx>>,
    pub(crate) protos: Pool<ProtoIdx, ProtoId>,
    pub(crate) fields: Pool<FieldIdx, FieldId>,
    pub(crate) methods: Pool<MethodIdx, MethodId>,
    pub(crate) classes: Arena<ClassDef>,
    class_lookup: HashMap<TypeIdx, ClassId>,
    limits: SectionLimits,
}

impl SectionContainer {
    pub fn new(limits: SectionLimits) -> Self {
        Self {
            limits,
            ..Default::default()
        }
    }

    pub fn parse(buf: &[u8]) -> Result<Self> {
        Parser::<LittleEndian>::new(buf).parse_container()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        Writer::<_, LittleEndian>::new(&mut buf).write_container(self)?;
        Ok(buf)
    }

    pub fn limits(&self) -> &SectionLimits {
        &self.limits
    }

    pub fn set_limits(&mut self, limits: SectionLimits) {
        self.limits = limits;
    }

    pub fn strings(&self) -> &Pool<StringIdx, String> {
        &self.strings
    }

    pub fn types(&self) -> &Pool<TypeIdx, StringIdx> {
        &self.types
    }

    pub fn type_lists(&self) -> &Pool<TypeListIdx, Vec<TypeIdx>> {
        &self.type_lists
    }

    pub fn protos(&self) -> &Pool<ProtoIdx, ProtoId> {
        &self.protos
    }

    pub fn fields(&self) -> &Pool<FieldIdx, FieldId> {
        &self.fields
    }

    pub fn methods(&self) -> &Pool<MethodIdx, MethodId> {
        &self.methods
    }

    pub fn string(&self, idx: StringIdx) -> &str {
        &self.strings[idx]
    }

    pub fn type_descriptor(&self, idx: TypeIdx) -> &str {
        &self.strings[self.types[idx]]
    }

    pub fn type_key(&self, idx: TypeIdx) -> TypeKey {
        TypeKey::new(self.type_descriptor(idx))
    }

    pub fn type_list_key(&self, idx: TypeListIdx) -> TypeListKey {
        TypeListKey::new(
            self.type_lists[idx]
                .iter()
                .map(|t| self.type_key(*t))
                .collect(),
        )
    }

    pub fn proto_key(&self, idx: ProtoIdx) -> ProtoKey {
        let proto = self.protos[idx];
        ProtoKey {
            return_type: self.type_key(proto.return_type),
            parameters: self.type_list_key(proto.parameters),
        }
    }

    pub fn field_key(&self, idx: FieldIdx) -> FieldKey {
        let field = self.fields[idx];
        FieldKey::new(
            self.type_key(field.class),
            self.string(field.name),
            self.type_key(field.field_type),
        )
    }

    pub fn method_key(&self, idx: MethodIdx) -> MethodKey {
        let method = self.methods[idx];
        MethodKey {
            declaring: self.type_key(method.class),
            name: self.string(method.name).to_owned(),
            proto: self.proto_key(method.proto),
        }
    }

    pub fn find_string(&self, value: &str) -> Option<StringIdx> {
        self.strings.find(value)
    }

    pub fn find_type(&self, key: &TypeKey) -> Option<TypeIdx> {
        self.types.find(&self.find_string(key.descriptor())?)
    }

    pub fn find_type_list(&self, key: &TypeListKey) -> Option<TypeListIdx> {
        let types = key
            .types()
            .iter()
            .map(|t| self.find_type(t))
            .collect::<Option<Vec<_>>>()?;
        self.type_lists.find(&types)
    }

    pub fn find_proto(&self, key: &ProtoKey) -> Option<ProtoIdx> {
        self.protos.find(&ProtoId {
            return_type: self.find_type(&key.return_type)?,
            parameters: self.find_type_list(&key.parameters)?,
        })
    }

    pub fn find_field(&self, key: &FieldKey) -> Option<FieldIdx> {
        self.fields.find(&FieldId {
            class: self.find_type(&key.declaring)?,
            field_type: self.find_type(&key.field_type)?,
            name: self.find_string(&key.name)?,
        })
    }

    pub fn find_method(&self, key: &MethodKey) -> Option<MethodIdx> {
        self.methods.find(&MethodId {
            class: self.find_type(&key.declaring)?,
            proto: self.find_proto(&key.proto)?,
            name: self.find_string(&key.name)?,
        })
    }

    pub fn contains(&self, key: &Key) -> bool {
        match key {
            Key::String(s) => self.find_string(s.as_str()).is_some(),
            Key::Type(t) => self.find_type(t).is_some(),
            Key::TypeList(l) => self.find_type_list(l).is_some(),
            Key::Proto(p) => self.find_proto(p).is_some(),
            Key::Field(f) => self.find_field(f).is_some(),
            Key::Method(m) => self.find_method(m).is_some(),
        }
    }

    pub fn intern_string(&mut self, value: &str) -> StringIdx {
        match self.strings.find(value) {
            Some(idx) => idx,
            None => self.strings.push(value.to_owned()),
        }
    }

    pub fn intern_type(&mut self, key: &TypeKey) -> TypeIdx {
        let descriptor = self.intern_string(key.descriptor());
        self.types.intern(descriptor)
    }

    pub fn intern_type_list(&mut self, types: &[TypeKey]) -> TypeListIdx {
        let types = types.iter().map(|t| self.intern_type(t)).collect();
        self.type_lists.intern(types)
    }

    pub fn intern_proto(&mut self, key: &ProtoKey) -> ProtoIdx {
        let proto = ProtoId {
            return_type: self.intern_type(&key.return_type),
            parameters: self.intern_type_list(key.parameters.types()),
        };
        self.protos.intern(proto)
    }

    pub fn intern_field(&mut self, key: &FieldKey) -> FieldIdx {
        let field = FieldId {
            class: self.intern_type(&key.declaring),
            field_type: self.intern_type(&key.field_type),
            name: self.intern_string(&key.name),
        };
        self.fields.intern(field)
    }

    pub fn intern_method(&mut self, key: &MethodKey) -> MethodIdx {
        let method = MethodId {
            class: self.intern_type(&key.declaring),
            proto: self.intern_proto(&key.proto),
            name: self.intern_string(&key.name),
        };
        self.methods.intern(method)
    }

    pub fn count(&self, kind: SectionKind) -> usize {
        match kind {
            SectionKind::StringId => self.strings.len(),
            SectionKind::TypeId => self.types.len(),
            SectionKind::TypeList => self.type_lists.len(),
            SectionKind::ProtoId => self.protos.len(),
            SectionKind::FieldId => self.fields.len(),
            SectionKind::MethodId => self.methods.len(),
            SectionKind::ClassDef => self.classes.len(),
            SectionKind::AnnotationItem => self
                .classes
                .iter()
                .map(|(_, c)| annotations_of(c).count())
                .sum(),
        }
    }

    pub fn usage(&self, kind: SectionKind) -> Usage {
        Usage {
            kind,
            count: self.count(kind),
            limit: self.limits.limit(kind),
        }
    }

    pub fn items(&self, kind: SectionKind) -> Vec<Key> {
        match kind {
            SectionKind::StringId => self
                .strings
                .iter()
                .map(|(_, s)| Key::String(StringKey::new(s.as_str())))
                .collect(),
            SectionKind::TypeId => self
                .types
                .iter()
                .map(|(i, _)| Key::Type(self.type_key(i)))
                .collect(),
            SectionKind::TypeList => self
                .type_lists
                .iter()
                .map(|(i, _)| Key::TypeList(self.type_list_key(i)))
                .collect(),
            SectionKind::ProtoId => self
                .protos
                .iter()
                .map(|(i, _)| Key::Proto(self.proto_key(i)))
                .collect(),
            SectionKind::FieldId => self
                .fields
                .iter()
                .map(|(i, _)| Key::Field(self.field_key(i)))
                .collect(),
            SectionKind::MethodId => self
                .methods
                .iter()
                .map(|(i, _)| Key::Method(self.method_key(i)))
                .collect(),
            SectionKind::ClassDef => self
                .classes
                .iter()
                .map(|(_, c)| Key::Type(self.type_key(c.class_type)))
                .collect(),
            SectionKind::AnnotationItem => {
                let types = self
                    .classes
                    .iter()
                    .flat_map(|(_, c)| annotations_of(c).map(|a| a.annotation_type))
                    .collect::<BTreeSet<_>>();
                types.into_iter().map(|t| Key::Type(self.type_key(t))).collect()
            }
        }
    }

    pub fn class_count(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.len() == 0
    }

    pub fn class(&self, id: ClassId) -> Option<&ClassDef> {
        self.classes.get(id)
    }

    pub fn class_mut(&mut self, id: ClassId) -> Option<&mut ClassDef> {
        self.classes.get_mut(id)
    }

    pub fn is_attached(&self, id: ClassId) -> bool {
        self.classes.get(id).is_some()
    }

    pub fn classes(&self) -> impl Iterator<Item = (ClassId, &ClassDef)> + '_ {
        self.classes.iter()
    }

    /// Handles of the current classes, safe to hold while the container changes.
    pub fn class_ids(&self) -> Vec<ClassId> {
        self.classes.iter().map(|(id, _)| id).collect()
    }

    pub fn last_class(&self) -> Option<ClassId> {
        self.classes.last()
    }

    pub fn class_key(&self, id: ClassId) -> Option<TypeKey> {
        self.class(id).map(|c| self.type_key(c.class_type))
    }

    pub fn find_class(&self, key: &TypeKey) -> Option<ClassId> {
        self.class_lookup.get(&self.find_type(key)?).copied()
    }

    pub fn contains_class(&self, key: &TypeKey) -> bool {
        self.find_class(key).is_some()
    }

    pub fn add_class(&mut self, class: ClassDef) -> ClassId {
        let class_type = class.class_type;
        let id = self.classes.insert(class);
        self.class_lookup.insert(class_type, id);
        id
    }

    /// Looks the class up, or defines an empty public class extending `Object`.
    pub fn get_or_create_class(&mut self, key: &TypeKey) -> ClassId {
        if let Some(id) = self.find_class(key) {
            return id;
        }
        let class_type = self.intern_type(key);
        let interfaces = self.intern_type_list(&[]);
        let mut class = ClassDef::new(class_type, interfaces);
        if key.descriptor() != TypeKey::OBJECT {
            class.super_class = Some(self.intern_type(&TypeKey::object()));
        }
        self.add_class(class)
    }

    pub fn remove_class(&mut self, id: ClassId) -> Option<ClassDef> {
        let class = self.classes.remove(id)?;
        if self.class_lookup.get(&class.class_type) == Some(&id) {
            self.class_lookup.remove(&class.class_type);
        }
        Some(class)
    }

    pub fn remove_class_by_key(&mut self, key: &TypeKey) -> bool {
        match self.find_class(key) {
            Some(id) => self.remove_class(id).is_some(),
            None => false,
        }
    }

    pub fn remove_classes(&mut self, mut filter: impl FnMut(&TypeKey) -> bool) -> usize {
        let doomed = self
            .classes
            .iter()
            .filter(|(_, c)| filter(&self.type_key(c.class_type)))
            .map(|(id, _)| id)
            .collect::<Vec<_>>();
        doomed
            .into_iter()
            .filter(|id| self.remove_class(*id).is_some())
            .count()
    }

    /// Strips every annotation of `annotation_type` from classes, members and parameters.
    pub fn remove_annotations(&mut self, annotation_type: &TypeKey) -> usize {
        let Some(annotation_type) = self.find_type(annotation_type) else {
            return 0;
        };
        let mut removed = 0;
        let mut retain = |annotations: &mut Vec<Annotation>| {
            let before = annotations.len();
            annotations.retain(|a| a.annotation_type != annotation_type);
            removed += before - annotations.len();
        };
        for id in self.class_ids() {
            let Some(class) = self.classes.get_mut(id) else {
                continue;
            };
            retain(&mut class.annotations);
            for field in class
                .static_fields
                .iter_mut()
                .chain(class.instance_fields.iter_mut())
            {
                retain(&mut field.annotations);
            }
            for method in class.methods_mut() {
                retain(&mut method.annotations);
                method.parameter_annotations.iter_mut().for_each(&mut retain);
            }
        }
        removed
    }

    /// Removes class definitions, member definitions or annotations by key.
    /// Pooled ids cannot be removed directly; `shrink` drops unused ones.
    pub fn remove_entry(&mut self, kind: SectionKind, key: &Key) -> Result<bool> {
        match (kind, key) {
            (SectionKind::ClassDef, Key::Type(t)) => Ok(self.remove_class_by_key(t)),
            (SectionKind::AnnotationItem, Key::Type(t)) => Ok(self.remove_annotations(t) > 0),
            (SectionKind::MethodId, Key::Method(m)) => {
                let (Some(class), Some(method)) =
                    (self.find_class(&m.declaring), self.find_method(m))
                else {
                    return Ok(false);
                };
                Ok(self
                    .class_mut(class)
                    .and_then(|c| c.remove_method(method))
                    .is_some())
            }
            (SectionKind::FieldId, Key::Field(f)) => {
                let (Some(class), Some(field)) =
                    (self.find_class(&f.declaring), self.find_field(f))
                else {
                    return Ok(false);
                };
                Ok(self
                    .class_mut(class)
                    .and_then(|c| c.remove_field(field))
                    .is_some())
            }
            _ => Err(DexFileError::UnsupportedRemoval(kind)),
        }
    }

    pub fn method_def(&self, method: MethodRef) -> Option<&MethodDef> {
        self.class(method.class)?.method(method.method)
    }

    pub fn method_def_mut(&mut self, method: MethodRef) -> Option<&mut MethodDef> {
        self.class_mut(method.class)?.method_mut(method.method)
    }

    pub fn field_def(&self, field: FieldRef) -> Option<&FieldDef> {
        self.class(field.class)?.field(field.field)
    }

    pub fn field_def_mut(&mut self, field: FieldRef) -> Option<&mut FieldDef> {
        self.class_mut(field.class)?.field_mut(field.field)
    }

    pub fn find_method_def(&self, key: &MethodKey) -> Option<MethodRef> {
        let class = self.find_class(&key.declaring)?;
        let method = self.find_method(key)?;
        self.class(class)?.method(method)?;
        Some(MethodRef { class, method })
    }

    pub fn find_field_def(&self, key: &FieldKey) -> Option<FieldRef> {
        let class = self.find_class(&key.declaring)?;
        let field = self.find_field(key)?;
        self.class(class)?.field(field)?;
        Some(FieldRef { class, field })
    }

    /// Defines `key` on its declaring class, which must live in this container.
    pub fn get_or_create_method(
        &mut self,
        key: &MethodKey,
        access_flags: AccessFlags,
    ) -> Result<MethodRef> {
        let class = self.find_class(&key.declaring).ok_or(DexFileError::Detached)?;
        let method = self.intern_method(key);
        let def = self.class_mut(class).ok_or(DexFileError::Detached)?;
        if def.method(method).is_none() {
            let mut method_def = MethodDef::new(method, access_flags);
            if !access_flags.intersects(AccessFlags::ABSTRACT | AccessFlags::NATIVE) {
                let ins = key
                    .parameters()
                    .iter()
                    .map(|p| if matches!(p.descriptor(), "J" | "D") { 2 } else { 1 })
                    .sum::<u16>()
                    + u16::from(!access_flags.contains(AccessFlags::STATIC));
                method_def.code = Some(CodeItem::new(ins, ins, vec![]));
            }
            def.add_method(method_def);
        }
        Ok(MethodRef { class, method })
    }

    pub fn get_or_create_field(
        &mut self,
        key: &FieldKey,
        access_flags: AccessFlags,
    ) -> Result<FieldRef> {
        let class = self.find_class(&key.declaring).ok_or(DexFileError::Detached)?;
        let field = self.intern_field(key);
        let def = self.class_mut(class).ok_or(DexFileError::Detached)?;
        if def.field(field).is_none() {
            def.add_field(FieldDef::new(field, access_flags));
        }
        Ok(FieldRef { class, field })
    }

    /// Rewrites a string in place; every id built on it follows. Returns
    /// whether the new value duplicates another string.
    pub fn set_string(&mut self, idx: StringIdx, value: &str) -> bool {
        self.strings
            .set(idx, value.to_owned())
            .map_or(false, |(_, collides)| collides)
    }

    pub fn set_method_name(&mut self, idx: MethodIdx, name: &str) -> bool {
        let mut method = self.methods[idx];
        method.name = self.intern_string(name);
        self.methods
            .set(idx, method)
            .map_or(false, |(_, collides)| collides)
    }

    pub fn set_field_name(&mut self, idx: FieldIdx, name: &str) -> bool {
        let mut field = self.fields[idx];
        field.name = self.intern_string(name);
        self.fields
            .set(idx, field)
            .map_or(false, |(_, collides)| collides)
    }

    pub fn used_ids(&self, id: ClassId) -> Option<UsedIds> {
        let class = self.class(id)?;
        let mut collector = UsageCollector {
            container: self,
            used: UsedIds::default(),
        };
        collector.class(class);
        Some(collector.used)
    }

    /// Keys of the types, fields and methods a class refers to, itself included.
    pub fn used_keys(&self, id: ClassId) -> Option<Vec<Key>> {
        let used = self.used_ids(id)?;
        let types = used.types.iter().map(|t| Key::Type(self.type_key(*t)));
        let fields = used.fields.iter().map(|f| Key::Field(self.field_key(*f)));
        let methods = used.methods.iter().map(|m| Key::Method(self.method_key(*m)));
        Some(types.chain(fields).chain(methods).collect())
    }

    /// First kind that would overflow if `id` were copied over from `from`.
    pub fn overflow(&self, from: &SectionContainer, id: ClassId) -> Option<SectionKind> {
        let used = from.used_ids(id)?;
        SectionKind::LIMITED.into_iter().find(|kind| {
            let additional = match kind {
                SectionKind::StringId => used
                    .strings
                    .iter()
                    .filter(|s| self.find_string(from.string(**s)).is_none())
                    .count(),
                SectionKind::TypeId => used
                    .types
                    .iter()
                    .filter(|t| self.find_type(&from.type_key(**t)).is_none())
                    .count(),
                SectionKind::ProtoId => used
                    .protos
                    .iter()
                    .filter(|p| self.find_proto(&from.proto_key(**p)).is_none())
                    .count(),
                SectionKind::FieldId => used
                    .fields
                    .iter()
                    .filter(|f| self.find_field(&from.field_key(**f)).is_none())
                    .count(),
                SectionKind::MethodId => used
                    .methods
                    .iter()
                    .filter(|m| self.find_method(&from.method_key(**m)).is_none())
                    .count(),
                _ => 0,
            };
            !self.limits.fits(*kind, self.count(*kind), additional)
        })
    }

    pub fn can_add_class(&self, from: &SectionContainer, id: ClassId) -> bool {
        from.is_attached(id) && self.overflow(from, id).is_none()
    }

    /// Copies a class and every entry it references from `from`.
    pub fn merge_class(&mut self, from: &SectionContainer, id: ClassId) -> Result<ClassMerge> {
        let class = from.class(id).ok_or(DexFileError::Detached)?;
        if self.contains_class(&from.type_key(class.class_type)) {
            return Ok(ClassMerge::Duplicate);
        }
        if let Some(kind) = self.overflow(from, id) {
            return Ok(ClassMerge::Full(kind));
        }
        let copy = Translator::new(from, self).class(class);
        Ok(ClassMerge::Merged(self.add_class(copy)))
    }

    /// Rebuilds every pool from the live classes, dropping unused and
    /// duplicate entries. All handles into this container are detached.
    pub fn shrink(&mut self) {
        let mut compact = SectionContainer {
            classes: Arena::default(),
            limits: self.limits.clone(),
            ..Default::default()
        };
        let copies = {
            let mut translator = Translator::new(self, &mut compact);
            self.classes
                .iter()
                .map(|(_, c)| translator.class(c))
                .collect::<Vec<_>>()
        };
        for copy in copies {
            compact.add_class(copy);
        }
        *self = compact;
    }
}

fn annotations_of(class: &ClassDef) -> impl Iterator<Item = &Annotation> + '_ {
    let members = class
        .fields()
        .flat_map(|f| f.annotations.iter())
        .chain(class.methods().flat_map(|m| {
            m.annotations
                .iter()
                .chain(m.parameter_annotations.iter().flatten())
        }));
    class.annotations.iter().chain(members)
}

struct UsageCollector<'a> {
    container: &'a SectionContainer,
    used: UsedIds,
}

impl UsageCollector<'_> {
    fn string(&mut self, idx: StringIdx) {
        self.used.strings.insert(idx);
    }

    fn type_idx(&mut self, idx: TypeIdx) {
        if self.used.types.insert(idx) {
            self.string(self.container.types[idx]);
        }
    }

    fn type_list(&mut self, idx: TypeListIdx) {
        if self.used.type_lists.insert(idx) {
            let container = self.container;
            container.type_lists[idx]
                .iter()
                .for_each(|t| self.type_idx(*t));
        }
    }

    fn proto(&mut self, idx: ProtoIdx) {
        if self.used.protos.insert(idx) {
            let proto = self.container.protos[idx];
            self.type_idx(proto.return_type);
            self.type_list(proto.parameters);
        }
    }

    fn field(&mut self, idx: FieldIdx) {
        if self.used.fields.insert(idx) {
            let field = self.container.fields[idx];
            self.type_idx(field.class);
            self.type_idx(field.field_type);
            self.string(field.name);
        }
    }

    fn method(&mut self, idx: MethodIdx) {
        if self.used.methods.insert(idx) {
            let method = self.container.methods[idx];
            self.type_idx(method.class);
            self.proto(method.proto);
            self.string(method.name);
        }
    }

    fn value(&mut self, value: &EncodedValue) {
        match value {
            EncodedValue::String(s) => self.string(*s),
            EncodedValue::Type(t) => self.type_idx(*t),
            EncodedValue::Field(f) | EncodedValue::Enum(f) => self.field(*f),
            EncodedValue::Method(m) => self.method(*m),
            EncodedValue::Array(values) => values.iter().for_each(|v| self.value(v)),
            EncodedValue::Null | EncodedValue::Boolean(_) | EncodedValue::Int(_) => {}
        }
    }

    fn annotation(&mut self, annotation: &Annotation) {
        self.type_idx(annotation.annotation_type);
        for element in &annotation.elements {
            self.string(element.name);
            self.value(&element.value);
        }
    }

    fn code(&mut self, code: &CodeItem) {
        for instruction in code.instructions.iter() {
            match instruction.operand {
                Operand::String(s) => self.string(s),
                Operand::Type(t) => self.type_idx(t),
                Operand::Field(f) => self.field(f),
                Operand::Method(m) => self.method(m),
                Operand::None | Operand::Literal(_) | Operand::Branch(_) => {}
            }
        }
        for handler in code.tries.iter().flat_map(|t| t.handlers.iter()) {
            self.type_idx(handler.exception_type);
        }
    }

    fn class(&mut self, class: &ClassDef) {
        self.type_idx(class.class_type);
        if let Some(super_class) = class.super_class {
            self.type_idx(super_class);
        }
        self.type_list(class.interfaces);
        if let Some(source_file) = class.source_file {
            self.string(source_file);
        }
        class.annotations.iter().for_each(|a| self.annotation(a));
        for field in class.fields() {
            self.field(field.field);
            if let Some(value) = &field.initial_value {
                self.value(value);
            }
            field.annotations.iter().for_each(|a| self.annotation(a));
        }
        for method in class.methods() {
            self.method(method.method);
            method.annotations.iter().for_each(|a| self.annotation(a));
            method
                .parameter_annotations
                .iter()
                .flatten()
                .for_each(|a| self.annotation(a));
            method
                .parameter_names
                .iter()
                .flatten()
                .for_each(|s| self.string(*s));
            if let Some(code) = &method.code {
                self.code(code);
            }
        }
    }
}

#[cfg(test)]
mod section_container_tests {
    use super::*;
    use crate::{Instruction, Opcode};

    fn method(s: &str) -> MethodKey {
        s.parse().unwrap()
    }

    fn container_with_caller() -> (SectionContainer, ClassId) {
        let mut container = SectionContainer::default();
        let caller = container.get_or_create_class(&TypeKey::new("La/Caller;"));
        let run = container
            .get_or_create_method(&method("La/Caller;->run()V"), AccessFlags::PUBLIC)
            .unwrap();
        let callee = container.intern_method(&method("Lb/Callee;->call(I)V"));
        let code = container.method_def_mut(run).unwrap().code.as_mut().unwrap();
        code.instructions.push(Instruction::new(
            Opcode::InvokeStatic,
            vec![0],
            Operand::Method(callee),
        ));
        code.instructions.push(Instruction::simple(Opcode::ReturnVoid));
        (container, caller)
    }

    #[test]
    fn it_should_create_classes_extending_object() {
        let mut container = SectionContainer::default();
        let id = container.get_or_create_class(&TypeKey::new("La/A;"));

        let class = container.class(id).unwrap();
        assert_eq!(
            Some(TypeKey::object()),
            class.super_class.map(|s| container.type_key(s))
        );
        assert_eq!(id, container.get_or_create_class(&TypeKey::new("La/A;")));
        assert_eq!(1, container.class_count());
    }

    #[test]
    fn it_should_collect_transitively_used_entries() {
        let (container, caller) = container_with_caller();

        let keys = container.used_keys(caller).unwrap();

        assert!(keys.contains(&Key::Type(TypeKey::new("Lb/Callee;"))));
        assert!(keys.contains(&Key::Type(TypeKey::new("Ljava/lang/Object;"))));
        assert!(keys.contains(&Key::Method(method("Lb/Callee;->call(I)V"))));
        assert!(keys.contains(&Key::Method(method("La/Caller;->run()V"))));
    }

    #[test]
    fn it_should_copy_a_class_with_its_references() {
        let (from, caller) = container_with_caller();
        let mut to = SectionContainer::default();

        let ClassMerge::Merged(copy) = to.merge_class(&from, caller).unwrap() else {
            panic!("expected the class to be merged");
        };

        assert_eq!(Some(TypeKey::new("La/Caller;")), to.class_key(copy));
        assert!(to.contains(&Key::Method(method("Lb/Callee;->call(I)V"))));
        assert_eq!(ClassMerge::Duplicate, to.merge_class(&from, caller).unwrap());
    }

    #[test]
    fn it_should_refuse_classes_that_do_not_fit() {
        let (from, caller) = container_with_caller();
        let mut to = SectionContainer::new(
            SectionLimits::default()
                .with_reserve(0)
                .with_limit(SectionKind::MethodId, 1),
        );

        assert_eq!(
            ClassMerge::Full(SectionKind::MethodId),
            to.merge_class(&from, caller).unwrap()
        );
        assert!(to.is_empty());
    }

    #[test]
    fn it_should_count_entries_already_present_as_free() {
        let (from, caller) = container_with_caller();
        let mut to = SectionContainer::new(
            SectionLimits::default()
                .with_reserve(0)
                .with_limit(SectionKind::MethodId, 2),
        );
        to.intern_method(&method("Lb/Callee;->call(I)V"));
        to.intern_method(&method("La/Caller;->run()V"));

        assert_eq!(None, to.overflow(&from, caller));
    }

    #[test]
    fn it_should_detach_handles_when_shrinking() {
        let (mut container, caller) = container_with_caller();
        container.intern_string("unused");

        container.shrink();

        assert!(!container.is_attached(caller));
        assert_eq!(None, container.find_string("unused"));
        assert!(container.contains_class(&TypeKey::new("La/Caller;")));
    }

    #[test]
    fn it_should_merge_duplicate_types_when_shrinking_after_a_colliding_rename() {
        let mut container = SectionContainer::default();
        let a = container.get_or_create_class(&TypeKey::new("La/A;"));
        let b = container.intern_type(&TypeKey::new("La/B;"));
        container.class_mut(a).unwrap().super_class = Some(b);

        let a_descriptor = container.find_string("La/A;").unwrap();
        assert!(!container.set_string(a_descriptor, "La/C;"));
        assert!(container.contains_class(&TypeKey::new("La/C;")));

        let b_descriptor = container.find_string("La/B;").unwrap();
        assert!(container.set_string(b_descriptor, "La/C;"));
        container.shrink();

        assert_eq!(1, container.count(SectionKind::TypeId));
        assert!(container.contains_class(&TypeKey::new("La/C;")));
    }

    #[test]
    fn it_should_remove_entries_by_kind() {
        let (mut container, _) = container_with_caller();

        assert!(container
            .remove_entry(SectionKind::MethodId, &Key::Method(method("La/Caller;->run()V")))
            .unwrap());
        assert!(container
            .remove_entry(SectionKind::ClassDef, &Key::Type(TypeKey::new("La/Caller;")))
            .unwrap());
        assert!(!container
            .remove_entry(SectionKind::ClassDef, &Key::Type(TypeKey::new("La/Caller;")))
            .unwrap());
        assert!(matches!(
            container.remove_entry(SectionKind::StringId, &Key::String(StringKey::new("x"))),
            Err(DexFileError::UnsupportedRemoval(SectionKind::StringId))
        ));
    }

    #[test]
    fn it_should_remove_classes_by_predicate() {
        let mut container = SectionContainer::default();
        for name in ["La/A;", "La/B;", "Lb/C;"] {
            container.get_or_create_class(&TypeKey::new(name));
        }

        let removed = container.remove_classes(|key| key.is_in_package("La/", false));

        assert_eq!(2, removed);
        assert_eq!(1, container.class_count());
    }

    #[test]
    fn it_should_rename_method_ids_in_place() {
        let (mut container, _) = container_with_caller();
        let idx = container.find_method(&method("Lb/Callee;->call(I)V")).unwrap();

        container.set_method_name(idx, "invoke");

        assert_eq!(method("Lb/Callee;->invoke(I)V"), container.method_key(idx));
        assert_eq!(None, container.find_method(&method("Lb/Callee;->call(I)V")));
    }
}
