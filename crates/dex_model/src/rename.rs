use std::collections::BTreeSet;

use dexmerge_dex_file::{FieldKey, Key, MethodKey, StringKey, TypeKey};
use log::{debug, info};

use crate::{ClassRepository, DexFile, DexModelError, Result};

const MAX_ARRAY_DIMENSION: usize = 3;

/// Renames types by rewriting every string that spells them.
///
/// A string is matched against the pairs in insertion order and the first
/// matching pair wins. Besides the exact descriptor, a pair rewrites the
/// generic signature prefix, arrays of up to three dimensions and, when
/// enabled, inner classes and source names.
#[derive(Debug, Clone)]
pub struct TypeRename {
    pairs: Vec<(TypeKey, TypeKey)>,
    inner_types: bool,
    source_names: bool,
}

impl TypeRename {
    pub fn new() -> Self {
        Self {
            pairs: vec![],
            inner_types: true,
            source_names: false,
        }
    }

    pub fn rename(mut self, from: TypeKey, to: TypeKey) -> Self {
        self.pairs.push((from, to));
        self
    }

    /// Whether `La/C$Inner;` follows a rename of `La/C;`.
    pub fn with_inner_types(mut self, inner_types: bool) -> Self {
        self.inner_types = inner_types;
        self
    }

    /// Whether `a.C` is rewritten along with `La/C;`.
    pub fn with_source_names(mut self, source_names: bool) -> Self {
        self.source_names = source_names;
        self
    }

    pub fn pairs(&self) -> &[(TypeKey, TypeKey)] {
        &self.pairs
    }

    /// The new value of `value`, if any pair applies to it.
    pub fn rewrite(&self, value: &str) -> Option<String> {
        self.pairs
            .iter()
            .find_map(|(from, to)| self.rewrite_with(value, from, to))
    }

    fn rewrite_with(&self, value: &str, from: &TypeKey, to: &TypeKey) -> Option<String> {
        if value == from.descriptor() {
            return Some(to.descriptor().to_owned());
        }
        if self.inner_types {
            if let Some(rest) = value.strip_prefix(from.inner_prefix().as_str()) {
                return Some(format!("{}{}", to.inner_prefix(), rest));
            }
        }
        if value == from.signature_prefix() {
            return Some(to.signature_prefix());
        }
        for dimension in 1..=MAX_ARRAY_DIMENSION {
            let (from, to) = (from.array_type(dimension), to.array_type(dimension));
            if value == from.descriptor() {
                return Some(to.descriptor().to_owned());
            }
            if self.inner_types {
                if let Some(rest) = value.strip_prefix(from.inner_prefix().as_str()) {
                    return Some(format!("{}{}", to.inner_prefix(), rest));
                }
            }
        }
        if self.source_names {
            let (from, to) = (from.source_name(), to.source_name());
            if value == from {
                return Some(to);
            }
            if self.inner_types {
                for separator in ['$', '.'] {
                    let prefix = format!("{}{}", from, separator);
                    if let Some(rest) = value.strip_prefix(prefix.as_str()) {
                        return Some(format!("{}{}{}", to, separator, rest));
                    }
                }
            }
        }
        None
    }

    fn validate(&self) -> Result<()> {
        for (from, to) in &self.pairs {
            if !from.is_object() || !to.is_object() {
                return Err(DexModelError::InvalidArgument(format!(
                    "{} -> {}",
                    from, to
                )));
            }
        }
        Ok(())
    }

    /// Rewrites every container of `repository`. Returns the new values of the
    /// rewritten strings.
    pub fn apply(&self, repository: &mut dyn ClassRepository) -> Result<BTreeSet<StringKey>> {
        self.validate()?;
        let mut renamed = BTreeSet::new();
        for file in repository.dex_files_mut() {
            renamed.extend(self.apply_to(file));
        }
        info!(
            "Renamed {} types, {} strings rewritten",
            self.pairs.len(),
            renamed.len()
        );
        Ok(renamed)
    }

    fn apply_to(&self, file: &mut DexFile) -> Vec<StringKey> {
        let updates = file
            .container()
            .strings()
            .iter()
            .filter_map(|(idx, value)| Some((idx, self.rewrite(value)?)))
            .collect::<Vec<_>>();
        if updates.is_empty() {
            return vec![];
        }
        let mut collides = false;
        for (idx, value) in &updates {
            collides |= file.container_mut().set_string(*idx, value);
        }
        if collides {
            debug!("Merging colliding strings in {}", file.name());
            file.shrink();
        }
        for (_, value) in &updates {
            let key = TypeKey::new(value.as_str());
            if file.container().contains_class(&key) {
                file.fix_dalvik_inner_class_name(&key);
            }
        }
        updates
            .into_iter()
            .map(|(_, value)| StringKey::new(value))
            .collect()
    }
}

impl Default for TypeRename {
    fn default() -> Self {
        Self::new()
    }
}

fn check_member_name(name: &str) -> Result<()> {
    if name.is_empty() || name == MethodKey::CONSTRUCTOR || name == MethodKey::STATIC_INITIALIZER {
        return Err(DexModelError::InvalidArgument(name.to_owned()));
    }
    Ok(())
}

fn apply_method_name(
    repository: &mut dyn ClassRepository,
    keys: &BTreeSet<MethodKey>,
    name: &str,
) -> usize {
    let mut renamed = 0;
    for file in repository.dex_files_mut() {
        let mut collides = false;
        for key in keys {
            if let Some(idx) = file.container().find_method(key) {
                collides |= file.container_mut().set_method_name(idx, name);
                renamed += 1;
            }
        }
        if collides {
            file.shrink();
        }
    }
    renamed
}

fn apply_field_name(
    repository: &mut dyn ClassRepository,
    keys: &BTreeSet<FieldKey>,
    name: &str,
) -> usize {
    let mut renamed = 0;
    for file in repository.dex_files_mut() {
        let mut collides = false;
        for key in keys {
            if let Some(idx) = file.container().find_field(key) {
                collides |= file.container_mut().set_field_name(idx, name);
                renamed += 1;
            }
        }
        if collides {
            file.shrink();
        }
    }
    renamed
}

/// Renames `key` together with every method it overrides or is overridden
/// by, and every reference to them.
///
/// Fails without touching anything if a method with the new name and proto
/// is already declared in the hierarchy, or referenced under any of the
/// affected classes. Returns the new keys.
pub fn rename_method(
    repository: &mut dyn ClassRepository,
    key: &MethodKey,
    name: &str,
) -> Result<BTreeSet<MethodKey>> {
    check_member_name(name)?;
    if key.is_constructor() || key.is_static_initializer() {
        return Err(DexModelError::InvalidArgument(key.to_string()));
    }
    if key.name == name {
        return Ok(BTreeSet::new());
    }
    let renamed = key.with_name(name);
    if repository.contains_deep_search_method(&renamed) {
        return Err(DexModelError::Conflict(renamed.to_string()));
    }
    let keys = repository.find_equivalent_methods(key);
    if let Some(existing) = keys
        .iter()
        .map(|k| k.with_name(name))
        .find(|k| repository.contains(&Key::Method(k.clone())))
    {
        return Err(DexModelError::Conflict(existing.to_string()));
    }
    apply_method_name(repository, &keys, name);
    debug!("Renamed {} to {}, {} keys", key, name, keys.len());
    Ok(keys.iter().map(|k| k.with_name(name)).collect())
}

/// Like [`rename_method`], but a method with no declaration in the
/// repository still has its references renamed.
pub fn replace_method(
    repository: &mut dyn ClassRepository,
    key: &MethodKey,
    name: &str,
) -> Result<BTreeSet<MethodKey>> {
    let renamed = rename_method(repository, key, name)?;
    if !renamed.is_empty() || key.name == name {
        return Ok(renamed);
    }
    if repository.contains(&Key::Method(key.with_name(name))) {
        return Err(DexModelError::Conflict(key.with_name(name).to_string()));
    }
    let keys = BTreeSet::from([key.clone()]);
    match apply_method_name(repository, &keys, name) {
        0 => Ok(BTreeSet::new()),
        _ => Ok(BTreeSet::from([key.with_name(name)])),
    }
}

/// Renames the field `key` resolves to and every reference to it through the
/// classes inheriting it. Returns the new keys.
pub fn rename_field(
    repository: &mut dyn ClassRepository,
    key: &FieldKey,
    name: &str,
) -> Result<BTreeSet<FieldKey>> {
    check_member_name(name)?;
    if key.name == name {
        return Ok(BTreeSet::new());
    }
    let renamed = key.with_name(name);
    if repository.contains_deep_search_field(&renamed) {
        return Err(DexModelError::Conflict(renamed.to_string()));
    }
    let keys = repository.find_equivalent_fields(key);
    if let Some(existing) = keys
        .iter()
        .map(|k| k.with_name(name))
        .find(|k| repository.contains(&Key::Field(k.clone())))
    {
        return Err(DexModelError::Conflict(existing.to_string()));
    }
    apply_field_name(repository, &keys, name);
    debug!("Renamed {} to {}, {} keys", key, name, keys.len());
    Ok(keys.iter().map(|k| k.with_name(name)).collect())
}

/// Like [`rename_field`], but a field with no declaration in the repository
/// still has its references renamed.
pub fn replace_field(
    repository: &mut dyn ClassRepository,
    key: &FieldKey,
    name: &str,
) -> Result<BTreeSet<FieldKey>> {
    let renamed = rename_field(repository, key, name)?;
    if !renamed.is_empty() || key.name == name {
        return Ok(renamed);
    }
    if repository.contains(&Key::Field(key.with_name(name))) {
        return Err(DexModelError::Conflict(key.with_name(name).to_string()));
    }
    let keys = BTreeSet::from([key.clone()]);
    match apply_field_name(repository, &keys, name) {
        0 => Ok(BTreeSet::new()),
        _ => Ok(BTreeSet::from([key.with_name(name)])),
    }
}
