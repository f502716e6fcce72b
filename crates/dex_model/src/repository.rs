use std::collections::{BTreeSet, VecDeque};

use dexmerge_dex_file::{AccessFlags, FieldKey, Key, MethodKey, SectionKind, TypeKey};
use log::debug;

use crate::{
    access::inaccessible_declarations, Declaration, DexClass, DexDeclaration, DexField, DexFile,
    DexMethod, Result,
};

/// A class space spread over one or more containers.
///
/// Lookups take the first container holding a key. Implementors only provide
/// access to their files; everything else is derived from it.
pub trait ClassRepository {
    fn as_repository(&self) -> &dyn ClassRepository;

    fn dex_files(&self) -> Box<dyn Iterator<Item = &DexFile> + '_>;

    fn dex_files_mut(&mut self) -> Box<dyn Iterator<Item = &mut DexFile> + '_>;

    fn class_count(&self) -> usize {
        self.dex_files().map(|f| f.container().class_count()).sum()
    }

    fn get_class(&self, key: &TypeKey) -> Option<DexClass<'_>> {
        let repository = self.as_repository();
        self.dex_files().find_map(|file| {
            let id = file.container().find_class(key)?;
            DexClass::new(repository, file, id)
        })
    }

    fn contains_class(&self, key: &TypeKey) -> bool {
        self.dex_files().any(|f| f.container().contains_class(key))
    }

    fn classes(&self) -> Vec<DexClass<'_>> {
        let repository = self.as_repository();
        self.dex_files()
            .flat_map(|file| {
                file.container()
                    .class_ids()
                    .into_iter()
                    .filter_map(move |id| DexClass::new(repository, file, id))
            })
            .collect()
    }

    fn classes_where(&self, filter: &dyn Fn(&DexClass<'_>) -> bool) -> Vec<DexClass<'_>> {
        self.classes().into_iter().filter(|c| filter(c)).collect()
    }

    /// Snapshot of the class keys matching `filter`; stays usable while the
    /// repository is edited.
    fn class_keys(&self, filter: &dyn Fn(&TypeKey) -> bool) -> Vec<TypeKey> {
        self.dex_files()
            .flat_map(|f| {
                let container = f.container();
                container
                    .classes()
                    .map(|(_, c)| container.type_key(c.class_type))
                    .collect::<Vec<_>>()
            })
            .filter(|k| filter(k))
            .collect()
    }

    /// Pooled entries of `kind` across every container, without repeats.
    fn items(&self, kind: SectionKind) -> BTreeSet<Key> {
        self.dex_files()
            .flat_map(|f| f.container().items(kind))
            .collect()
    }

    fn contains(&self, key: &Key) -> bool {
        self.dex_files().any(|f| f.container().contains(key))
    }

    /// Direct subclasses of `key`.
    fn search_extending(&self, key: &TypeKey) -> Vec<DexClass<'_>> {
        self.classes_where(&|c| c.super_class_key().as_ref() == Some(key))
    }

    /// Direct implementers of the interface `key`.
    fn search_implementations(&self, key: &TypeKey) -> Vec<DexClass<'_>> {
        self.classes_where(&|c| c.contains_interface(key))
    }

    /// Every class extending or implementing `key`, directly or not.
    fn sub_types(&self, key: &TypeKey) -> Vec<DexClass<'_>> {
        let mut seen = BTreeSet::from([key.clone()]);
        let mut result = vec![];
        let mut pending = VecDeque::from([key.clone()]);
        while let Some(current) = pending.pop_front() {
            let direct = self
                .search_extending(&current)
                .into_iter()
                .chain(self.search_implementations(&current));
            for class in direct {
                if seen.insert(class.key()) {
                    pending.push_back(class.key());
                    result.push(class);
                }
            }
        }
        result
    }

    /// The class, method or field `key` resolves to. Members are looked up
    /// through the super types of their declaring class.
    fn declaration(&self, key: &Key) -> Option<DexDeclaration<'_>> {
        match key {
            Key::Type(t) => self.get_class(t).map(DexDeclaration::Class),
            Key::Method(m) => self
                .get_class(&m.declaring)?
                .method(m)
                .map(DexDeclaration::Method),
            Key::Field(f) => self
                .get_class(&f.declaring)?
                .field(f)
                .map(DexDeclaration::Field),
            _ => None,
        }
    }

    fn declared_method(&self, key: &MethodKey, ignore_return: bool) -> Option<DexMethod<'_>> {
        self.get_class(&key.declaring)?
            .declared_method(key, ignore_return)
    }

    fn declared_field(&self, key: &FieldKey) -> Option<DexField<'_>> {
        self.get_class(&key.declaring)?.declared_field(key)
    }

    /// Keys that must be renamed together with `key`: the topmost
    /// declaration of every method `key` binds to, rebased onto each
    /// overriding class, bridges included.
    fn find_equivalent_methods(&self, key: &MethodKey) -> BTreeSet<MethodKey> {
        let Some(defining) = self.get_class(&key.declaring) else {
            return BTreeSet::new();
        };
        defining
            .methods(key, false)
            .into_iter()
            .flat_map(|m| m.declared().overriding_keys())
            .collect()
    }

    /// `key` as seen from every class resolving it to the same field.
    fn find_equivalent_fields(&self, key: &FieldKey) -> BTreeSet<FieldKey> {
        let Some(field) = self.get_class(&key.declaring).and_then(|c| c.field(key)) else {
            return BTreeSet::new();
        };
        let mut result = BTreeSet::from([field.key()]);
        for class in self.sub_types(&field.dex_class().key()) {
            let rebased = key.with_declaring(&class.key());
            if class.field(&rebased) == Some(field) {
                result.insert(rebased);
            }
        }
        result
    }

    /// Whether a method with the name and proto of `key` is declared anywhere
    /// above or below its declaring class.
    fn contains_deep_search_method(&self, key: &MethodKey) -> bool {
        let Some(start) = self.get_class(&key.declaring) else {
            return false;
        };
        start.contains_declared_method(key)
            || start
                .overriding_and_super_types()
                .iter()
                .any(|c| c.contains_declared_method(key))
    }

    fn contains_deep_search_field(&self, key: &FieldKey) -> bool {
        let Some(start) = self.get_class(&key.declaring) else {
            return false;
        };
        start.declared_field(key).is_some()
            || start
                .overriding_and_super_types()
                .iter()
                .any(|c| c.declared_field(key).is_some())
    }

    /// Classes referring to `key`, excluding the class `key` names.
    fn find_user_classes(&self, key: &Key) -> Vec<DexClass<'_>> {
        self.classes_where(&|c| c.uses(key))
    }

    fn package_classes(&self, package: &str, include_sub_packages: bool) -> Vec<DexClass<'_>> {
        self.classes_where(&|c| c.key().is_in_package(package, include_sub_packages))
    }

    /// Removes the first definition of `key`.
    fn remove_class(&mut self, key: &TypeKey) -> bool {
        self.dex_files_mut()
            .any(|f| f.container_mut().remove_class_by_key(key))
    }

    fn remove_classes(&mut self, filter: &dyn Fn(&TypeKey) -> bool) -> usize {
        self.dex_files_mut()
            .map(|f| f.container_mut().remove_classes(filter))
            .sum()
    }

    /// Removes `key` from every container; see
    /// [`dexmerge_dex_file::SectionContainer::remove_entry`].
    fn remove_entry(&mut self, kind: SectionKind, key: &Key) -> Result<bool> {
        let mut removed = false;
        for file in self.dex_files_mut() {
            removed |= file.container_mut().remove_entry(kind, key)?;
        }
        Ok(removed)
    }

    fn remove_annotations(&mut self, annotation_type: &TypeKey) -> usize {
        self.dex_files_mut()
            .map(|f| f.container_mut().remove_annotations(annotation_type))
            .sum()
    }

    /// Makes public every declaration the class `key` uses or overrides but
    /// can no longer access. Returns the keys as the class refers to them.
    fn fix_accessibility(&mut self, key: &TypeKey) -> BTreeSet<Key> {
        let widened = match self.get_class(key) {
            Some(class) => inaccessible_declarations(&class),
            None => return BTreeSet::new(),
        };
        for (_, declaration) in &widened {
            for file in self.dex_files_mut() {
                file.add_access_flags(declaration, AccessFlags::PUBLIC);
            }
            debug!("Widened {} for {}", declaration, key);
        }
        widened.into_iter().map(|(used, _)| used).collect()
    }
}

#[cfg(test)]
mod class_repository_tests {
    use super::*;
    use dexmerge_dex_file::SectionLimits;

    fn method(s: &str) -> MethodKey {
        s.parse().unwrap()
    }

    fn field(s: &str) -> FieldKey {
        s.parse().unwrap()
    }

    fn hierarchy() -> DexFile {
        let mut file = DexFile::new("classes.dex", SectionLimits::default());
        for class in ["La/Base;", "La/Mid;", "La/Leaf;", "Lb/Other;"] {
            file.get_or_create_class(&TypeKey::new(class));
        }
        file.class_mut(&TypeKey::new("La/Mid;"))
            .unwrap()
            .set_super_class(Some(&TypeKey::new("La/Base;")))
            .unwrap();
        file.class_mut(&TypeKey::new("La/Leaf;"))
            .unwrap()
            .set_super_class(Some(&TypeKey::new("La/Mid;")))
            .unwrap();
        file.get_or_create_method(&method("La/Base;->run()V"), AccessFlags::PUBLIC)
            .unwrap();
        file.get_or_create_method(&method("La/Leaf;->run()V"), AccessFlags::PUBLIC)
            .unwrap();
        file.get_or_create_field(&field("La/Base;->count:I"), AccessFlags::PROTECTED)
            .unwrap();
        file
    }

    #[test]
    fn it_should_find_sub_types() {
        let file = hierarchy();

        let keys = file
            .sub_types(&TypeKey::new("La/Base;"))
            .iter()
            .map(|c| c.key())
            .collect::<Vec<_>>();

        assert_eq!(vec![TypeKey::new("La/Mid;"), TypeKey::new("La/Leaf;")], keys);
    }

    #[test]
    fn it_should_find_equivalent_methods_from_a_subclass() {
        let file = hierarchy();

        let keys = file.find_equivalent_methods(&method("La/Leaf;->run()V"));

        assert!(keys.contains(&method("La/Base;->run()V")));
        assert!(keys.contains(&method("La/Mid;->run()V")));
        assert!(keys.contains(&method("La/Leaf;->run()V")));
    }

    #[test]
    fn it_should_find_equivalent_fields() {
        let file = hierarchy();

        let keys = file.find_equivalent_fields(&field("La/Mid;->count:I"));

        assert_eq!(
            BTreeSet::from([
                field("La/Base;->count:I"),
                field("La/Mid;->count:I"),
                field("La/Leaf;->count:I"),
            ]),
            keys
        );
    }

    #[test]
    fn it_should_deep_search_the_hierarchy() {
        let file = hierarchy();

        assert!(file.contains_deep_search_method(&method("La/Mid;->run()V")));
        assert!(!file.contains_deep_search_method(&method("La/Mid;->stop()V")));
        assert!(file.contains_deep_search_field(&field("La/Leaf;->count:I")));
    }

    #[test]
    fn it_should_resolve_inherited_declarations() {
        let file = hierarchy();

        let declaration = file
            .declaration(&Key::Field(field("La/Leaf;->count:I")))
            .unwrap();

        assert_eq!(Key::Field(field("La/Base;->count:I")), declaration.key());
        assert!(file.declaration(&Key::Type(TypeKey::new("La/Missing;"))).is_none());
    }

    #[test]
    fn it_should_remove_classes_by_filter() {
        let mut file = hierarchy();

        let removed = file.remove_classes(&|k| k.is_in_package("Lb/", true));

        assert_eq!(1, removed);
        assert_eq!(3, file.class_count());
        assert!(!file.contains_class(&TypeKey::new("Lb/Other;")));
    }
}
