use std::collections::BTreeSet;

use dexmerge_dex_file::{AccessFlags, Key};

use crate::{Declaration, DexClass};

fn needs_widening<'a>(class: &DexClass<'_>, declaration: &impl Declaration<'a>) -> bool {
    if declaration.is_private()
        || declaration.has_access_flags(AccessFlags::CONSTRUCTOR | AccessFlags::STATIC)
    {
        return false;
    }
    !declaration.is_accessible_to_class(class)
}

/// Declarations `class` refers to or overrides but can not access. Each entry
/// pairs the key as `class` uses it with the key of the declaration to widen.
pub(crate) fn inaccessible_declarations(class: &DexClass<'_>) -> Vec<(Key, Key)> {
    let repository = class.repository();
    let mut seen = BTreeSet::new();
    let mut result = vec![];
    for key in class.used_keys() {
        if seen.contains(&key) {
            continue;
        }
        let Some(declaration) = repository.declaration(&key) else {
            continue;
        };
        if needs_widening(class, &declaration) {
            seen.insert(key.clone());
            result.push((key, declaration.key()));
        }
    }
    for method in class.declared_methods() {
        if method.is_private() {
            continue;
        }
        let key = method.key();
        let related = class
            .methods(&key, true)
            .into_iter()
            .chain(class.extending_methods(&key));
        for other in related {
            let other_key = Key::Method(other.key());
            if !seen.contains(&other_key) && needs_widening(class, &other) {
                seen.insert(other_key.clone());
                result.push((other_key.clone(), other_key));
            }
        }
    }
    result
}
