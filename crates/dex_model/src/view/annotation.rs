use std::fmt;

use dexmerge_dex_file::{
    Annotation, EncodedValue, Key, SectionContainer, StringKey, TypeKey, Visibility,
};

#[derive(Debug, Clone, Copy)]
pub struct DexAnnotation<'a> {
    container: &'a SectionContainer,
    def: &'a Annotation,
}

impl<'a> DexAnnotation<'a> {
    pub(crate) fn new(container: &'a SectionContainer, def: &'a Annotation) -> Self {
        Self { container, def }
    }

    pub fn def(&self) -> &'a Annotation {
        self.def
    }

    pub fn annotation_type(&self) -> TypeKey {
        self.container.type_key(self.def.annotation_type)
    }

    pub fn visibility(&self) -> Visibility {
        self.def.visibility
    }

    pub fn element(&self, name: &str) -> Option<DexValue<'a>> {
        let container = self.container;
        let value = self.def.element(container.find_string(name)?)?;
        Some(DexValue::new(container, value))
    }

    pub fn elements(&self) -> Vec<(&'a str, DexValue<'a>)> {
        let container = self.container;
        self.def
            .elements
            .iter()
            .map(|e| (container.string(e.name), DexValue::new(container, &e.value)))
            .collect()
    }

    pub fn string(&self, name: &str) -> Option<&'a str> {
        self.element(name)?.as_string()
    }
}

/// An encoded value resolved against its container.
#[derive(Debug, Clone, Copy)]
pub struct DexValue<'a> {
    container: &'a SectionContainer,
    value: &'a EncodedValue,
}

impl<'a> DexValue<'a> {
    pub(crate) fn new(container: &'a SectionContainer, value: &'a EncodedValue) -> Self {
        Self { container, value }
    }

    pub fn value(&self) -> &'a EncodedValue {
        self.value
    }

    pub fn is_null(&self) -> bool {
        matches!(self.value, EncodedValue::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self.value {
            EncodedValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self.value {
            EncodedValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_string(&self) -> Option<&'a str> {
        let container = self.container;
        match self.value {
            EncodedValue::String(s) => Some(container.string(*s)),
            _ => None,
        }
    }

    pub fn as_type(&self) -> Option<TypeKey> {
        match self.value {
            EncodedValue::Type(t) => Some(self.container.type_key(*t)),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<Vec<DexValue<'a>>> {
        let container = self.container;
        match self.value {
            EncodedValue::Array(values) => {
                Some(values.iter().map(|v| DexValue::new(container, v)).collect())
            }
            _ => None,
        }
    }

    /// Pooled entry the value points at; arrays and scalars have none.
    pub fn key(&self) -> Option<Key> {
        let container = self.container;
        match self.value {
            EncodedValue::String(s) => Some(Key::String(StringKey::new(container.string(*s)))),
            EncodedValue::Type(t) => Some(Key::Type(container.type_key(*t))),
            EncodedValue::Field(f) | EncodedValue::Enum(f) => {
                Some(Key::Field(container.field_key(*f)))
            }
            EncodedValue::Method(m) => Some(Key::Method(container.method_key(*m))),
            _ => None,
        }
    }
}

impl fmt::Display for DexValue<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.value {
            EncodedValue::Null => f.write_str("null"),
            EncodedValue::Boolean(b) => write!(f, "{}", b),
            EncodedValue::Int(i) => write!(f, "{}", i),
            EncodedValue::String(s) => write!(f, "{:?}", self.container.string(*s)),
            EncodedValue::Array(_) => {
                let values = self.as_array().unwrap_or_default();
                f.write_str("{")?;
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", value)?;
                }
                f.write_str("}")
            }
            _ => match self.key() {
                Some(key) => write!(f, "{}", key),
                None => Ok(()),
            },
        }
    }
}

#[cfg(test)]
mod dex_annotation_tests {
    use super::*;
    use dexmerge_dex_file::{AnnotationElement, SectionLimits};

    #[test]
    fn it_should_read_elements_by_name() {
        let mut container = SectionContainer::new(SectionLimits::default());
        let annotation_type = container.intern_type(&TypeKey::new("La/Marker;"));
        let name = container.intern_string("name");
        let value = container.intern_string("hello");
        let tags = container.intern_string("tags");
        let annotation = Annotation {
            visibility: Visibility::Runtime,
            annotation_type,
            elements: vec![
                AnnotationElement {
                    name,
                    value: EncodedValue::String(value),
                },
                AnnotationElement {
                    name: tags,
                    value: EncodedValue::Array(vec![EncodedValue::Int(1), EncodedValue::Null]),
                },
            ],
        };

        let view = DexAnnotation::new(&container, &annotation);

        assert_eq!(TypeKey::new("La/Marker;"), view.annotation_type());
        assert_eq!(Some("hello"), view.string("name"));
        assert_eq!(2, view.elements().len());
        assert_eq!("{1, null}", view.element("tags").unwrap().to_string());
        assert!(view.element("missing").is_none());
    }
}
