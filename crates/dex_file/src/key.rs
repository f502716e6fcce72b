use std::{fmt, str::FromStr};

use crate::{DexFileError, SectionKind};

type Result<T, E = DexFileError> = std::result::Result<T, E>;

const PRIMITIVES: &str = "VZBSCIJFD";

/// A type descriptor such as `La/b/C;`, `I` or `[Ljava/lang/String;`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeKey(String);

impl TypeKey {
    pub const OBJECT: &'static str = "Ljava/lang/Object;";
    pub const DALVIK_INNER_CLASS: &'static str = "Ldalvik/annotation/InnerClass;";
    pub const DALVIK_ENCLOSING_CLASS: &'static str = "Ldalvik/annotation/EnclosingClass;";

    pub fn new(descriptor: impl Into<String>) -> Self {
        TypeKey(descriptor.into())
    }

    pub fn object() -> Self {
        TypeKey::new(Self::OBJECT)
    }

    /// `a.b.C` to `La/b/C;`, `int[]` to `[I`.
    pub fn from_source_name(name: &str) -> Self {
        let mut dimension = 0;
        let mut base = name;
        while let Some(stripped) = base.strip_suffix("[]") {
            dimension += 1;
            base = stripped;
        }
        let element = match base {
            "void" => "V".to_owned(),
            "boolean" => "Z".to_owned(),
            "byte" => "B".to_owned(),
            "short" => "S".to_owned(),
            "char" => "C".to_owned(),
            "int" => "I".to_owned(),
            "long" => "J".to_owned(),
            "float" => "F".to_owned(),
            "double" => "D".to_owned(),
            _ => format!("L{};", base.replace('.', "/")),
        };
        TypeKey(format!("{}{}", "[".repeat(dimension), element))
    }

    pub fn descriptor(&self) -> &str {
        &self.0
    }

    pub fn array_dimension(&self) -> usize {
        self.0.bytes().take_while(|b| *b == b'[').count()
    }

    pub fn is_array(&self) -> bool {
        self.0.starts_with('[')
    }

    pub fn element_type(&self) -> TypeKey {
        TypeKey(self.element().to_owned())
    }

    pub fn array_type(&self, dimension: usize) -> TypeKey {
        TypeKey(format!("{}{}", "[".repeat(dimension), self.0))
    }

    pub fn is_primitive(&self) -> bool {
        self.0.len() == 1 && PRIMITIVES.contains(self.0.as_str())
    }

    pub fn is_object(&self) -> bool {
        self.0.starts_with('L') && self.0.ends_with(';')
    }

    pub fn source_name(&self) -> String {
        let base = match self.element() {
            "V" => "void".to_owned(),
            "Z" => "boolean".to_owned(),
            "B" => "byte".to_owned(),
            "S" => "short".to_owned(),
            "C" => "char".to_owned(),
            "I" => "int".to_owned(),
            "J" => "long".to_owned(),
            "F" => "float".to_owned(),
            "D" => "double".to_owned(),
            element => element
                .trim_start_matches('L')
                .trim_end_matches(';')
                .replace('/', "."),
        };
        format!("{}{}", base, "[]".repeat(self.array_dimension()))
    }

    /// `La/b/C;` to `La/b/C$`, the prefix shared by every inner class.
    pub fn inner_prefix(&self) -> String {
        self.replace_terminator('$')
    }

    /// `La/b/C;` to `La/b/C<`, the prefix of a generic signature.
    pub fn signature_prefix(&self) -> String {
        self.replace_terminator('<')
    }

    /// `La/b/C;` to `La/b/`; the default package is `L`.
    pub fn package_name(&self) -> &str {
        let element = self.element();
        match element.rfind('/') {
            Some(i) => &element[..=i],
            None if element.starts_with('L') => "L",
            None => "",
        }
    }

    /// `La/b/C$D;` to `C$D`.
    pub fn simple_name(&self) -> &str {
        let element = self.element();
        let start = match element.rfind('/') {
            Some(i) => i + 1,
            None if element.starts_with('L') => 1,
            None => 0,
        };
        let end = if element.ends_with(';') {
            element.len() - 1
        } else {
            element.len()
        };
        &element[start.min(end)..end]
    }

    /// `La/b/C$D;` to `D`. Anonymous classes (`C$1`) have no inner name.
    pub fn simple_inner_name(&self) -> Option<&str> {
        let simple = self.simple_name();
        let inner = &simple[simple.rfind('$')? + 1..];
        if inner.is_empty() || inner.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        Some(inner)
    }

    pub fn is_inner(&self) -> bool {
        self.simple_name().contains('$')
    }

    pub fn enclosing_type(&self) -> Option<TypeKey> {
        let package = self.package_name().len();
        let descriptor = self.element();
        let i = descriptor.rfind('$')?;
        if i < package {
            return None;
        }
        Some(TypeKey(format!("{};", &descriptor[..i])))
    }

    pub fn inner_type(&self, simple: &str) -> TypeKey {
        TypeKey(format!("{}{};", self.inner_prefix(), simple))
    }

    /// Moves the type into `package`, given in `La/b/` form.
    pub fn with_package(&self, package: &str) -> TypeKey {
        let dimension = self.array_dimension();
        TypeKey(format!(
            "{}{}{};",
            "[".repeat(dimension),
            package,
            self.simple_name()
        ))
    }

    pub fn is_in_package(&self, package: &str, include_sub_packages: bool) -> bool {
        let own = self.package_name();
        if include_sub_packages {
            own.starts_with(package)
        } else {
            own == package
        }
    }

    fn element(&self) -> &str {
        &self.0[self.array_dimension()..]
    }

    fn replace_terminator(&self, terminator: char) -> String {
        match self.0.strip_suffix(';') {
            Some(stripped) => format!("{}{}", stripped, terminator),
            None => self.0.clone(),
        }
    }
}

impl fmt::Display for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for TypeKey {
    type Err = DexFileError;

    fn from_str(s: &str) -> Result<Self> {
        match parse_descriptors(s)?.as_slice() {
            [single] => Ok(single.clone()),
            _ => Err(DexFileError::InvalidDescriptor(s.to_owned())),
        }
    }
}

/// Splits concatenated descriptors, as found between the parentheses of a prototype.
pub fn parse_descriptors(s: &str) -> Result<Vec<TypeKey>> {
    let bytes = s.as_bytes();
    let mut types = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        let start = i;
        while i < bytes.len() && bytes[i] == b'[' {
            i += 1;
        }
        match bytes.get(i) {
            Some(b'L') => match s[i..].find(';') {
                Some(end) => i += end + 1,
                None => return Err(DexFileError::InvalidDescriptor(s.to_owned())),
            },
            Some(c) if PRIMITIVES.as_bytes().contains(c) => i += 1,
            _ => return Err(DexFileError::InvalidDescriptor(s.to_owned())),
        }
        types.push(TypeKey(s[start..i].to_owned()));
    }
    Ok(types)
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StringKey(pub String);

impl StringKey {
    pub fn new(value: impl Into<String>) -> Self {
        StringKey(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StringKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeListKey(pub Vec<TypeKey>);

impl TypeListKey {
    pub fn new(types: Vec<TypeKey>) -> Self {
        TypeListKey(types)
    }

    pub fn types(&self) -> &[TypeKey] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for TypeListKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.iter().try_for_each(|t| write!(f, "{}", t))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProtoKey {
    pub return_type: TypeKey,
    pub parameters: TypeListKey,
}

impl ProtoKey {
    pub fn new(parameters: Vec<TypeKey>, return_type: TypeKey) -> Self {
        Self {
            return_type,
            parameters: TypeListKey(parameters),
        }
    }
}

impl fmt::Display for ProtoKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}){}", self.parameters, self.return_type)
    }
}

impl FromStr for ProtoKey {
    type Err = DexFileError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || DexFileError::InvalidDescriptor(s.to_owned());
        let rest = s.strip_prefix('(').ok_or_else(invalid)?;
        let (parameters, return_type) = rest.split_once(')').ok_or_else(invalid)?;
        Ok(ProtoKey {
            return_type: return_type.parse()?,
            parameters: TypeListKey(parse_descriptors(parameters)?),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldKey {
    pub declaring: TypeKey,
    pub name: String,
    pub field_type: TypeKey,
}

impl FieldKey {
    pub fn new(declaring: TypeKey, name: impl Into<String>, field_type: TypeKey) -> Self {
        Self {
            declaring,
            name: name.into(),
            field_type,
        }
    }

    pub fn with_declaring(&self, declaring: &TypeKey) -> Self {
        Self {
            declaring: declaring.clone(),
            ..self.clone()
        }
    }

    pub fn with_name(&self, name: &str) -> Self {
        Self {
            name: name.to_owned(),
            ..self.clone()
        }
    }

    pub fn equals_ignoring_declaring(&self, other: &FieldKey) -> bool {
        self.name == other.name && self.field_type == other.field_type
    }
}

impl fmt::Display for FieldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}:{}", self.declaring, self.name, self.field_type)
    }
}

impl FromStr for FieldKey {
    type Err = DexFileError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || DexFileError::InvalidDescriptor(s.to_owned());
        let (declaring, rest) = s.split_once("->").ok_or_else(invalid)?;
        let (name, field_type) = rest.split_once(':').ok_or_else(invalid)?;
        Ok(FieldKey::new(declaring.parse()?, name, field_type.parse()?))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodKey {
    pub declaring: TypeKey,
    pub name: String,
    pub proto: ProtoKey,
}

impl MethodKey {
    pub const CONSTRUCTOR: &'static str = "<init>";
    pub const STATIC_INITIALIZER: &'static str = "<clinit>";

    pub fn new(
        declaring: TypeKey,
        name: impl Into<String>,
        parameters: Vec<TypeKey>,
        return_type: TypeKey,
    ) -> Self {
        Self {
            declaring,
            name: name.into(),
            proto: ProtoKey::new(parameters, return_type),
        }
    }

    pub fn parameters(&self) -> &[TypeKey] {
        self.proto.parameters.types()
    }

    pub fn return_type(&self) -> &TypeKey {
        &self.proto.return_type
    }

    pub fn is_constructor(&self) -> bool {
        self.name == Self::CONSTRUCTOR
    }

    pub fn is_static_initializer(&self) -> bool {
        self.name == Self::STATIC_INITIALIZER
    }

    pub fn with_declaring(&self, declaring: &TypeKey) -> Self {
        Self {
            declaring: declaring.clone(),
            ..self.clone()
        }
    }

    pub fn with_name(&self, name: &str) -> Self {
        Self {
            name: name.to_owned(),
            ..self.clone()
        }
    }

    pub fn equals_ignoring_declaring(&self, other: &MethodKey) -> bool {
        self.name == other.name && self.proto == other.proto
    }

    pub fn equals_ignoring_return(&self, other: &MethodKey) -> bool {
        self.declaring == other.declaring
            && self.name == other.name
            && self.proto.parameters == other.proto.parameters
    }
}

impl fmt::Display for MethodKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}{}", self.declaring, self.name, self.proto)
    }
}

impl FromStr for MethodKey {
    type Err = DexFileError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || DexFileError::InvalidDescriptor(s.to_owned());
        let (declaring, rest) = s.split_once("->").ok_or_else(invalid)?;
        let open = rest.find('(').ok_or_else(invalid)?;
        Ok(MethodKey {
            declaring: declaring.parse()?,
            name: rest[..open].to_owned(),
            proto: rest[open..].parse()?,
        })
    }
}

/// Value identity of any pooled entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Key {
    String(StringKey),
    Type(TypeKey),
    TypeList(TypeListKey),
    Proto(ProtoKey),
    Field(FieldKey),
    Method(MethodKey),
}

impl Key {
    pub fn kind(&self) -> SectionKind {
        match self {
            Key::String(_) => SectionKind::StringId,
            Key::Type(_) => SectionKind::TypeId,
            Key::TypeList(_) => SectionKind::TypeList,
            Key::Proto(_) => SectionKind::ProtoId,
            Key::Field(_) => SectionKind::FieldId,
            Key::Method(_) => SectionKind::MethodId,
        }
    }

    pub fn declaring(&self) -> Option<&TypeKey> {
        match self {
            Key::Type(t) => Some(t),
            Key::Field(f) => Some(&f.declaring),
            Key::Method(m) => Some(&m.declaring),
            _ => None,
        }
    }

    pub fn mentioned_types(&self) -> Vec<&TypeKey> {
        match self {
            Key::String(_) => vec![],
            Key::Type(t) => vec![t],
            Key::TypeList(l) => l.types().iter().collect(),
            Key::Proto(p) => proto_types(p),
            Key::Field(f) => vec![&f.declaring, &f.field_type],
            Key::Method(m) => {
                let mut types = vec![&m.declaring];
                types.extend(proto_types(&m.proto));
                types
            }
        }
    }

    /// Whether this key is `other` or refers to it. Array types count as
    /// references to their element type.
    pub fn uses(&self, other: &Key) -> bool {
        if self == other {
            return true;
        }
        match other {
            Key::Type(t) => self
                .mentioned_types()
                .into_iter()
                .any(|m| m == t || m.element_type() == *t),
            _ => false,
        }
    }
}

fn proto_types(proto: &ProtoKey) -> Vec<&TypeKey> {
    let mut types = vec![&proto.return_type];
    types.extend(proto.parameters.types());
    types
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::String(k) => write!(f, "{}", k),
            Key::Type(k) => write!(f, "{}", k),
            Key::TypeList(k) => write!(f, "{}", k),
            Key::Proto(k) => write!(f, "{}", k),
            Key::Field(k) => write!(f, "{}", k),
            Key::Method(k) => write!(f, "{}", k),
        }
    }
}

macro_rules! key_conversions {
    ($($variant:ident($ty:ty)),*) => {$(
        impl From<$ty> for Key {
            fn from(key: $ty) -> Self {
                Key::$variant(key)
            }
        }
    )*};
}

key_conversions!(
    String(StringKey),
    Type(TypeKey),
    TypeList(TypeListKey),
    Proto(ProtoKey),
    Field(FieldKey),
    Method(MethodKey)
);

#[cfg(test)]
mod type_key_tests {
    use super::*;

    #[test]
    fn it_should_convert_between_source_names_and_descriptors() {
        assert_eq!("La/b/C;", TypeKey::from_source_name("a.b.C").descriptor());
        assert_eq!("[[I", TypeKey::from_source_name("int[][]").descriptor());
        assert_eq!("a.b.C$D[]", TypeKey::new("[La/b/C$D;").source_name());
        assert_eq!("long", TypeKey::new("J").source_name());
    }

    #[test]
    fn it_should_split_package_and_simple_names() {
        let key = TypeKey::new("[La/b/C$Inner;");
        assert_eq!("La/b/", key.package_name());
        assert_eq!("C$Inner", key.simple_name());
        assert_eq!(Some("Inner"), key.simple_inner_name());
        assert_eq!("L", TypeKey::new("LTop;").package_name());
    }

    #[test]
    fn it_should_not_name_anonymous_classes() {
        assert_eq!(None, TypeKey::new("La/C$1;").simple_inner_name());
        assert_eq!(None, TypeKey::new("La/C;").simple_inner_name());
    }

    #[test]
    fn it_should_build_rename_prefixes() {
        let key = TypeKey::new("La/b/C;");
        assert_eq!("La/b/C$", key.inner_prefix());
        assert_eq!("La/b/C<", key.signature_prefix());
        assert_eq!("[[La/b/C;", key.array_type(2).descriptor());
        assert_eq!(2, key.array_type(2).array_dimension());
    }

    #[test]
    fn it_should_find_the_enclosing_type() {
        assert_eq!(
            Some(TypeKey::new("La/b/C;")),
            TypeKey::new("La/b/C$D;").enclosing_type()
        );
        assert_eq!(None, TypeKey::new("La/b$c/D;").enclosing_type());
    }

    #[test]
    fn it_should_move_types_between_packages() {
        let key = TypeKey::new("La/b/C;");
        assert_eq!(TypeKey::new("Lx/C;"), key.with_package("Lx/"));
        assert!(key.is_in_package("La/", true));
        assert!(!key.is_in_package("La/", false));
    }
}

#[cfg(test)]
mod member_key_tests {
    use super::*;

    #[test]
    fn it_should_parse_method_keys() {
        let key: MethodKey = "La/B;->run(I[Ljava/lang/String;)V".parse().unwrap();

        assert_eq!(TypeKey::new("La/B;"), key.declaring);
        assert_eq!("run", key.name);
        assert_eq!(2, key.parameters().len());
        assert_eq!("V", key.return_type().descriptor());
        assert_eq!("La/B;->run(I[Ljava/lang/String;)V", key.to_string());
    }

    #[test]
    fn it_should_parse_field_keys() {
        let key: FieldKey = "La/B;->count:J".parse().unwrap();
        assert_eq!(FieldKey::new(TypeKey::new("La/B;"), "count", TypeKey::new("J")), key);
    }

    #[test]
    fn it_should_reject_broken_descriptors() {
        assert!("La/B".parse::<TypeKey>().is_err());
        assert!("La/B;->m(Q)V".parse::<MethodKey>().is_err());
        assert!("IJ".parse::<TypeKey>().is_err());
    }

    #[test]
    fn it_should_know_which_types_a_key_uses() {
        let key: Key = "La/B;->m([La/C;)V".parse::<MethodKey>().unwrap().into();

        assert!(key.uses(&Key::Type(TypeKey::new("La/C;"))));
        assert!(key.uses(&Key::Type(TypeKey::new("La/B;"))));
        assert!(!key.uses(&Key::Type(TypeKey::new("La/D;"))));
    }
}
