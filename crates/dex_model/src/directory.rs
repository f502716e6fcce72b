use std::{collections::BTreeSet, path::Path};

use dexmerge_dex_file::{ClassMerge, FieldKey, MethodKey, SectionLimits, StringKey, TypeKey};
use log::{debug, info};

use crate::{
    rename, ClassRepository, DexFile, DexModelError, DexSourceSet, EntryMap, MergePolicy,
    OverflowAction, Result, TypeRename,
};

/// The ordered containers of one application, `classes.dex`,
/// `classes2.dex` and so on, seen as a single class space.
///
/// Every container is parsed when the directory is built from storage, so a
/// source that does not parse fails the constructor instead of vanishing
/// from lookups.
#[derive(Debug)]
pub struct DexDirectory {
    sources: DexSourceSet,
}

impl DexDirectory {
    pub fn new() -> Self {
        Self::with_limits(SectionLimits::default())
    }

    pub fn with_limits(limits: SectionLimits) -> Self {
        Self {
            sources: DexSourceSet::new(limits),
        }
    }

    /// Every canonically named container file directly inside `dir`.
    pub fn open(dir: &Path) -> Result<Self> {
        Self::open_with_limits(dir, SectionLimits::default())
    }

    pub fn open_with_limits(dir: &Path, limits: SectionLimits) -> Result<Self> {
        let mut directory = Self::with_limits(limits);
        let count = directory.sources.add_dir(dir)?;
        directory.sources.load_all()?;
        debug!("Opened {} with {} containers", dir.display(), count);
        Ok(directory)
    }

    /// Every canonically named entry of `map` under `prefix`.
    pub fn from_entries(map: &EntryMap, prefix: &str) -> Result<Self> {
        let mut directory = Self::new();
        directory.sources.add_entries(map, prefix)?;
        directory.sources.load_all()?;
        Ok(directory)
    }

    /// An in-memory directory holding `files` in order.
    pub fn from_files(files: impl IntoIterator<Item = DexFile>) -> Result<Self> {
        let mut directory = Self::new();
        for file in files {
            directory.sources.push_file(file)?;
        }
        Ok(directory)
    }

    pub fn sources(&self) -> &DexSourceSet {
        &self.sources
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn get(&self, index: usize) -> Result<Option<&DexFile>> {
        self.sources.file(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Result<Option<&mut DexFile>> {
        self.sources.file_mut(index)
    }

    pub fn first(&self) -> Result<Option<&DexFile>> {
        self.get(0)
    }

    pub fn last(&self) -> Result<Option<&DexFile>> {
        match self.len() {
            0 => Ok(None),
            len => self.get(len - 1),
        }
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.sources.index_of(name)
    }

    /// Index of the first container defining `key`.
    pub fn locate(&self, key: &TypeKey) -> Option<usize> {
        (0..self.len()).find(|index| {
            matches!(self.get(*index), Ok(Some(file)) if file.container().contains_class(key))
        })
    }

    /// Appends an empty container at the next free ordinal.
    pub fn create_default(&mut self) -> Result<usize> {
        self.sources.create_next()
    }

    pub fn load_all(&mut self) -> Result<()> {
        self.sources.load_all()
    }

    pub fn shrink(&mut self) {
        self.sources.shrink();
    }

    /// Last container at or after `floor` that still holds classes `policy`
    /// has not handled.
    fn last_pending(&self, policy: &MergePolicy, floor: usize) -> Option<usize> {
        (floor..self.len()).rev().find(|index| match self.get(*index) {
            Ok(Some(file)) => !file.is_empty() && !policy.is_exhausted(file),
            _ => false,
        })
    }

    fn check_disjoint(&self, other: &DexDirectory) -> Result<()> {
        let locations = self
            .sources
            .sources()
            .map(|s| s.location())
            .collect::<BTreeSet<_>>();
        if other
            .sources
            .sources()
            .any(|s| locations.contains(&s.location()))
        {
            return Err(DexModelError::CyclicMerge);
        }
        Ok(())
    }

    fn oversized(policy: &MergePolicy) -> DexModelError {
        let key = policy
            .overflows()
            .last()
            .map(|(_, key, kind)| format!("{} ({})", key, kind))
            .unwrap_or_default();
        DexModelError::Oversized(key)
    }

    /// Merges `other` into this directory.
    ///
    /// Classes of `other` are taken from its last container first and poured
    /// into this directory from `policy.merge_start()` on. When a destination
    /// is full the cursor advances, appending containers if the policy says
    /// so. Classes already defined anywhere in this directory are recorded as
    /// duplicates. Whatever `other` still holds afterwards is compacted and
    /// appended behind the last container.
    ///
    /// `other` is consumed whatever the policy: handled classes are dropped
    /// from it and its sources move into this directory, leaving it empty.
    pub fn merge(&mut self, policy: &mut MergePolicy, other: &mut DexDirectory) -> Result<()> {
        self.check_disjoint(other)?;
        self.load_all()?;
        other.load_all()?;
        for key in other.class_keys(&|_| true) {
            if !policy.is_handled(&key) && self.contains_class(&key) {
                policy.on_duplicate(&key);
            }
        }
        if self.is_empty() {
            self.create_default()?;
        }

        let mut index = policy.merge_start().min(self.len() - 1);
        while let Some(from_index) = other.last_pending(policy, 0) {
            let to = self
                .sources
                .file_mut(index)?
                .ok_or(DexModelError::Detached)?;
            let from = other
                .sources
                .file_mut(from_index)?
                .ok_or(DexModelError::Detached)?;
            if to.merge_file(policy, from)? {
                continue;
            }
            if to.is_empty() {
                return Err(Self::oversized(policy));
            }
            if index + 1 == self.len() {
                if policy.overflow() == OverflowAction::Stop {
                    break;
                }
                self.create_default()?;
            }
            index += 1;
        }
        policy.set_merge_start(index);
        self.shrink();

        other.remove_classes(&|key| policy.is_handled(key));
        other.merge_self(&mut MergePolicy::relocating().with_overflow(OverflowAction::Stop))?;
        let absorbed = self.sources.absorb(&mut other.sources)?;
        info!(
            "Merged {} classes, {} duplicates, {} containers appended",
            policy.merged().len(),
            policy.duplicates().len(),
            absorbed
        );
        Ok(())
    }

    /// Merges every directory of `others` in order with the same policy.
    pub fn merge_all(&mut self, policy: &mut MergePolicy, others: &mut [DexDirectory]) -> Result<()> {
        for other in others {
            self.merge(policy, other)?;
        }
        Ok(())
    }

    /// Compacts this directory by moving classes of later containers into
    /// earlier ones. Emptied containers are dropped on the next save.
    pub fn merge_self(&mut self, policy: &mut MergePolicy) -> Result<()> {
        if !policy.relocates() {
            return Err(DexModelError::InvalidArgument(
                "a directory can only be merged into itself by relocating".to_owned(),
            ));
        }
        self.load_all()?;
        let mut index = 0;
        while index < self.len() {
            let Some(from_index) = self.last_pending(policy, index + 1) else {
                break;
            };
            let (to, from) = self.sources.pair_mut(index, from_index)?;
            if !to.merge_file(policy, from)? {
                index += 1;
            }
        }
        self.shrink();
        Ok(())
    }

    /// Copies the class `key` of `from` into the first container with room,
    /// starting at `policy.merge_start()`. Returns whether it was copied.
    pub fn merge_class(
        &mut self,
        policy: &mut MergePolicy,
        from: &mut DexFile,
        key: &TypeKey,
    ) -> Result<bool> {
        let Some(id) = from.container().find_class(key) else {
            return Ok(false);
        };
        self.load_all()?;
        if !policy.is_handled(key) && self.contains_class(key) {
            policy.on_duplicate(key);
            if policy.relocates() {
                from.container_mut().remove_class(id);
            }
            return Ok(false);
        }
        if self.is_empty() {
            self.create_default()?;
        }

        let mut index = policy.merge_start().min(self.len() - 1);
        loop {
            let to = self
                .sources
                .file_mut(index)?
                .ok_or(DexModelError::Detached)?;
            if to.merge_class(policy, from, id)? {
                policy.set_merge_start(index);
                return Ok(true);
            }
            if policy.is_handled(key) {
                return Ok(false);
            }
            if to.is_empty() {
                return Err(Self::oversized(policy));
            }
            if index + 1 == self.len() {
                if policy.overflow() == OverflowAction::Stop {
                    return Ok(false);
                }
                self.create_default()?;
            }
            index += 1;
        }
    }

    /// Evens out the class counts so no container holds more than `max`
    /// classes, appending containers as needed. Classes move from the end of
    /// a crowded container; a class that does not fit its destination stops
    /// that pair. Returns the number of classes moved.
    pub fn distribute_classes(&mut self, max: usize) -> Result<usize> {
        if max == 0 {
            return Err(DexModelError::InvalidArgument(
                "at least one class per container".to_owned(),
            ));
        }
        self.load_all()?;
        if self.is_empty() {
            return Ok(0);
        }
        let total = self.class_count();
        while total / self.len() > max {
            self.create_default()?;
        }
        let per_container = total / self.len();

        let mut moved = 0;
        for i in 0..self.len() {
            for j in 0..self.len() {
                if i != j {
                    moved += self.move_classes(i, j, per_container)?;
                }
            }
        }
        self.shrink();
        info!(
            "Distributed {} classes over {} containers, {} moved",
            total,
            self.len(),
            moved
        );
        Ok(moved)
    }

    fn move_classes(&mut self, from: usize, to: usize, per_container: usize) -> Result<usize> {
        let mut moved = 0;
        let mut last_offered = None;
        loop {
            let (source, target) = self.sources.pair_mut(from, to)?;
            if source.container().class_count() <= per_container
                || target.container().class_count() >= per_container
            {
                break;
            }
            let Some(id) = source.container().last_class() else {
                break;
            };
            let key = source.container().class_key(id);
            if key == last_offered {
                break;
            }
            let outcome = target
                .container_mut()
                .merge_class(source.container(), id)?;
            if let ClassMerge::Merged(_) = outcome {
                source.container_mut().remove_class(id);
                moved += 1;
            }
            last_offered = key;
        }
        Ok(moved)
    }

    /// Renames the type `from` to `to` in every container, inner classes and
    /// source names (`a.b.C`) included. Returns the number of strings
    /// rewritten.
    pub fn rename(&mut self, from: &TypeKey, to: &TypeKey) -> Result<usize> {
        self.load_all()?;
        if self.contains_class(to) {
            return Err(DexModelError::Duplicate(to.to_string()));
        }
        let renamed = TypeRename::new()
            .rename(from.clone(), to.clone())
            .with_source_names(true)
            .apply(self)?;
        Ok(renamed.len())
    }

    pub fn rename_types(&mut self, renames: &TypeRename) -> Result<BTreeSet<StringKey>> {
        self.load_all()?;
        renames.apply(self)
    }

    pub fn rename_method(&mut self, key: &MethodKey, name: &str) -> Result<BTreeSet<MethodKey>> {
        self.load_all()?;
        rename::rename_method(self, key, name)
    }

    pub fn replace_method(&mut self, key: &MethodKey, name: &str) -> Result<BTreeSet<MethodKey>> {
        self.load_all()?;
        rename::replace_method(self, key, name)
    }

    pub fn rename_field(&mut self, key: &FieldKey, name: &str) -> Result<BTreeSet<FieldKey>> {
        self.load_all()?;
        rename::rename_field(self, key, name)
    }

    pub fn replace_field(&mut self, key: &FieldKey, name: &str) -> Result<BTreeSet<FieldKey>> {
        self.load_all()?;
        rename::replace_field(self, key, name)
    }

    /// Writes every loaded container back; emptied containers are deleted.
    pub fn save(&mut self) -> Result<()> {
        self.sources.save()?;
        info!("Saved {} containers", self.len());
        Ok(())
    }

    pub fn save_to(&self, dir: &Path) -> Result<()> {
        self.sources.save_to(dir)
    }

    pub fn close(&mut self) {
        self.sources.close();
    }
}

impl Default for DexDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl ClassRepository for DexDirectory {
    fn as_repository(&self) -> &dyn ClassRepository {
        self
    }

    fn dex_files(&self) -> Box<dyn Iterator<Item = &DexFile> + '_> {
        Box::new(self.sources.loaded_files())
    }

    fn dex_files_mut(&mut self) -> Box<dyn Iterator<Item = &mut DexFile> + '_> {
        Box::new(self.sources.loaded_files_mut())
    }
}

#[cfg(test)]
mod dex_directory_tests {
    use super::*;
    use dexmerge_dex_file::{AccessFlags, SectionKind};

    fn add_class(file: &mut DexFile, key: &str) {
        let key = TypeKey::new(key);
        file.get_or_create_class(&key);
        file.get_or_create_method(
            &MethodKey::new(key, "run", vec![], TypeKey::new("V")),
            AccessFlags::PUBLIC,
        )
        .unwrap();
    }

    fn directory(limits: SectionLimits, containers: &[&[&str]]) -> DexDirectory {
        let mut directory = DexDirectory::with_limits(limits);
        for classes in containers {
            let index = directory.create_default().unwrap();
            let file = directory.get_mut(index).unwrap().unwrap();
            for class in *classes {
                add_class(file, class);
            }
        }
        directory
    }

    fn one_method_per_container() -> SectionLimits {
        SectionLimits::default()
            .with_reserve(0)
            .with_limit(SectionKind::MethodId, 1)
    }

    fn counts(directory: &DexDirectory) -> Vec<usize> {
        (0..directory.len())
            .map(|i| directory.get(i).unwrap().unwrap().container().class_count())
            .collect()
    }

    #[test]
    fn it_should_name_created_containers_in_order() {
        let directory = directory(SectionLimits::default(), &[&[], &[], &[]]);

        let names = (0..3)
            .map(|i| directory.get(i).unwrap().unwrap().name().to_owned())
            .collect::<Vec<_>>();

        assert_eq!(vec!["classes.dex", "classes2.dex", "classes3.dex"], names);
        assert_eq!(Some(1), directory.index_of("classes2.dex"));
    }

    #[test]
    fn it_should_merge_disjoint_directories() {
        let mut to = directory(SectionLimits::default(), &[&["La/A;", "La/B;"]]);
        let mut from = directory(SectionLimits::default(), &[&["Lb/C;"]]);
        let mut policy = MergePolicy::new();

        to.merge(&mut policy, &mut from).unwrap();

        assert_eq!(3, to.class_count());
        assert_eq!(1, to.len());
        assert_eq!(vec![TypeKey::new("Lb/C;")], policy.merged());
    }

    #[test]
    fn it_should_keep_the_first_definition_of_a_duplicate() {
        let mut to = directory(SectionLimits::default(), &[&["La/A;"], &["La/B;"]]);
        let mut from = directory(SectionLimits::default(), &[&["La/B;", "Lb/C;"]]);
        let mut policy = MergePolicy::new();

        to.merge(&mut policy, &mut from).unwrap();

        assert_eq!(vec![TypeKey::new("La/B;")], policy.duplicates());
        assert_eq!(3, to.class_count());
        assert_eq!(Some(1), to.locate(&TypeKey::new("La/B;")));
    }

    #[test]
    fn it_should_create_containers_on_overflow() {
        let mut to = directory(one_method_per_container(), &[&["La/A;"]]);
        let mut from = directory(SectionLimits::default(), &[&["Lb/B;", "Lb/C;"]]);
        let mut policy = MergePolicy::new();

        to.merge(&mut policy, &mut from).unwrap();

        assert_eq!(vec![1, 1, 1], counts(&to));
        assert_eq!(2, policy.merge_start());
        for key in ["La/A;", "Lb/B;", "Lb/C;"] {
            assert!(to.get_class(&TypeKey::new(key)).is_some());
        }
    }

    #[test]
    fn it_should_append_the_rest_when_stopping() {
        let mut to = directory(one_method_per_container(), &[&["La/A;"]]);
        let mut from = directory(SectionLimits::default(), &[&["Lb/B;"]]);
        let mut policy = MergePolicy::new().with_overflow(OverflowAction::Stop);

        to.merge(&mut policy, &mut from).unwrap();

        assert!(policy.merged().is_empty());
        assert_eq!(2, to.len());
        assert!(to.contains_class(&TypeKey::new("Lb/B;")));
        assert!(from.is_empty());
    }

    #[test]
    fn it_should_consume_the_merged_directory_when_copying() {
        let mut to = directory(SectionLimits::default(), &[&["La/A;"]]);
        let mut from = directory(SectionLimits::default(), &[&["La/A;", "Lb/B;"], &["Lb/C;"]]);
        let mut policy = MergePolicy::new();

        to.merge(&mut policy, &mut from).unwrap();

        assert!(from.is_empty());
        assert_eq!(0, from.class_count());
        assert_eq!(1, to.len());
        assert_eq!(3, to.class_count());
    }

    #[test]
    fn it_should_refuse_a_class_larger_than_a_container() {
        let mut to = directory(one_method_per_container(), &[&[]]);
        let mut file = DexFile::new("classes.dex", SectionLimits::default());
        add_class(&mut file, "La/Big;");
        file.get_or_create_method(&"La/Big;->stop()V".parse().unwrap(), AccessFlags::PUBLIC)
            .unwrap();
        let mut from = DexDirectory::from_files([file]).unwrap();

        let result = to.merge(&mut MergePolicy::new(), &mut from);

        assert!(matches!(result, Err(DexModelError::Oversized(_))));
    }

    #[test]
    fn it_should_refuse_merging_shared_storage() {
        let map = EntryMap::new();
        map.insert("classes.dex", DexFile::new("", SectionLimits::default()).to_bytes().unwrap());
        let mut to = DexDirectory::from_entries(&map, "").unwrap();
        let mut from = DexDirectory::from_entries(&map, "").unwrap();

        let result = to.merge(&mut MergePolicy::new(), &mut from);

        assert!(matches!(result, Err(DexModelError::CyclicMerge)));
    }

    #[test]
    fn it_should_compact_itself() {
        let mut directory = directory(
            SectionLimits::default(),
            &[&["La/A;"], &["La/B;"], &["La/C;"]],
        );

        directory
            .merge_self(&mut MergePolicy::relocating())
            .unwrap();

        assert_eq!(vec![3, 0, 0], counts(&directory));
        assert!(directory.merge_self(&mut MergePolicy::new()).is_err());
    }

    #[test]
    fn it_should_merge_a_single_class() {
        let mut to = directory(one_method_per_container(), &[&["La/A;"]]);
        let mut from = DexFile::new("classes.dex", SectionLimits::default());
        add_class(&mut from, "Lb/B;");
        let mut policy = MergePolicy::relocating();

        assert!(to
            .merge_class(&mut policy, &mut from, &TypeKey::new("Lb/B;"))
            .unwrap());

        assert_eq!(Some(1), to.locate(&TypeKey::new("Lb/B;")));
        assert!(from.is_empty());
        assert!(!to
            .merge_class(&mut policy, &mut from, &TypeKey::new("Lb/B;"))
            .unwrap());
    }

    #[test]
    fn it_should_distribute_classes_evenly() {
        let mut directory = directory(
            SectionLimits::default(),
            &[&["La/A;", "La/B;", "La/C;", "La/D;"], &[]],
        );

        let moved = directory.distribute_classes(2).unwrap();

        assert_eq!(2, moved);
        assert_eq!(vec![2, 2], counts(&directory));
    }

    #[test]
    fn it_should_create_containers_to_respect_the_maximum() {
        let mut directory = directory(
            SectionLimits::default(),
            &[&["La/A;", "La/B;", "La/C;", "La/D;"]],
        );

        directory.distribute_classes(2).unwrap();

        assert_eq!(2, directory.len());
        assert_eq!(vec![2, 2], counts(&directory));
        assert!(directory.distribute_classes(0).is_err());
    }

    #[test]
    fn it_should_stop_on_a_class_that_does_not_fit() {
        let mut directory = directory(
            one_method_per_container(),
            &[&["La/A;"], &[]],
        );
        let crowded = directory.get_mut(0).unwrap().unwrap();
        crowded.container_mut().set_limits(SectionLimits::default());
        add_class(crowded, "La/B;");
        add_class(crowded, "La/C;");
        add_class(crowded, "La/D;");
        crowded
            .get_or_create_method(&"La/D;->stop()V".parse().unwrap(), AccessFlags::PUBLIC)
            .unwrap();

        let moved = directory.distribute_classes(4).unwrap();

        assert_eq!(0, moved);
        assert_eq!(vec![4, 0], counts(&directory));
    }

    #[test]
    fn it_should_refuse_renaming_onto_an_existing_class() {
        let mut directory = directory(SectionLimits::default(), &[&["La/A;"], &["La/B;"]]);

        let result = directory.rename(&TypeKey::new("La/A;"), &TypeKey::new("La/B;"));

        assert!(matches!(result, Err(DexModelError::Duplicate(_))));
        assert!(directory.rename(&TypeKey::new("La/A;"), &TypeKey::new("La/Z;")).unwrap() > 0);
        assert_eq!(Some(0), directory.locate(&TypeKey::new("La/Z;")));
    }
}
