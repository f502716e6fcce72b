use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SectionKind {
    StringId,
    TypeId,
    TypeList,
    ProtoId,
    FieldId,
    MethodId,
    ClassDef,
    AnnotationItem,
}

impl SectionKind {
    /// Kinds that carry a capacity ceiling.
    pub const LIMITED: [SectionKind; 5] = [
        SectionKind::StringId,
        SectionKind::TypeId,
        SectionKind::ProtoId,
        SectionKind::FieldId,
        SectionKind::MethodId,
    ];
}

impl fmt::Display for SectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SectionKind::StringId => "string_id",
            SectionKind::TypeId => "type_id",
            SectionKind::TypeList => "type_list",
            SectionKind::ProtoId => "proto_id",
            SectionKind::FieldId => "field_id",
            SectionKind::MethodId => "method_id",
            SectionKind::ClassDef => "class_def",
            SectionKind::AnnotationItem => "annotation_item",
        };
        f.write_str(name)
    }
}

/// Per-kind ceilings of a single container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionLimits {
    strings: u32,
    types: u32,
    protos: u32,
    fields: u32,
    methods: u32,
    reserve: u32,
}

impl Default for SectionLimits {
    fn default() -> Self {
        Self {
            strings: u32::MAX,
            types: 0xFFFF,
            protos: 0xFFFF,
            fields: 0x1_0000,
            methods: 0x1_0000,
            reserve: 200,
        }
    }
}

impl SectionLimits {
    pub fn with_limit(mut self, kind: SectionKind, limit: u32) -> Self {
        match kind {
            SectionKind::StringId => self.strings = limit,
            SectionKind::TypeId => self.types = limit,
            SectionKind::ProtoId => self.protos = limit,
            SectionKind::FieldId => self.fields = limit,
            SectionKind::MethodId => self.methods = limit,
            _ => {}
        }
        self
    }

    /// Head-room kept free below every ceiling when checking whether a class fits.
    pub fn with_reserve(mut self, reserve: u32) -> Self {
        self.reserve = reserve;
        self
    }

    pub fn limit(&self, kind: SectionKind) -> Option<u32> {
        match kind {
            SectionKind::StringId => Some(self.strings),
            SectionKind::TypeId => Some(self.types),
            SectionKind::ProtoId => Some(self.protos),
            SectionKind::FieldId => Some(self.fields),
            SectionKind::MethodId => Some(self.methods),
            _ => None,
        }
    }

    pub fn reserve(&self) -> u32 {
        self.reserve
    }

    /// Whether `additional` new entries fit next to `used` existing ones.
    pub fn fits(&self, kind: SectionKind, used: usize, additional: usize) -> bool {
        match self.limit(kind) {
            Some(limit) => {
                let usable = (limit as u64).saturating_sub(self.reserve as u64);
                (used + additional) as u64 <= usable
            }
            None => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Usage {
    pub kind: SectionKind,
    pub count: usize,
    pub limit: Option<u32>,
}

impl fmt::Display for Usage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.limit {
            Some(limit) => write!(f, "{}: {}/{}", self.kind, self.count, limit),
            None => write!(f, "{}: {}", self.kind, self.count),
        }
    }
}
