use std::{
    cell::OnceCell,
    fs,
    path::{Path, PathBuf},
};

use dexmerge_dex_file::SectionLimits;
use log::{debug, info};

use crate::{
    dex_name, dex_ordinal,
    source::entry_path,
    DexFile, DexModelError, DexSource, EntryMap, EntrySource, FileSource, Result,
};

#[derive(Debug)]
struct Slot {
    source: Box<dyn DexSource>,
    file: OnceCell<DexFile>,
}

impl Slot {
    fn new(source: Box<dyn DexSource>) -> Self {
        Self {
            source,
            file: OnceCell::new(),
        }
    }
}

/// Where sources created for an empty set live.
#[derive(Debug)]
enum Storage {
    Directory(PathBuf),
    Entries { map: EntryMap, prefix: String },
}

/// Sources ordered by ordinal, each with its container parsed on first access.
#[derive(Debug)]
pub struct DexSourceSet {
    slots: Vec<Slot>,
    storage: Option<Storage>,
    limits: SectionLimits,
}

impl DexSourceSet {
    pub fn new(limits: SectionLimits) -> Self {
        Self {
            slots: vec![],
            storage: None,
            limits,
        }
    }

    pub fn limits(&self) -> &SectionLimits {
        &self.limits
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Inserts `source` at its ordinal position.
    pub fn add(&mut self, source: Box<dyn DexSource>) -> Result<usize> {
        let ordinal = source
            .ordinal()
            .ok_or_else(|| DexModelError::InvalidArgument(source.name().to_owned()))?;
        if self.slots.iter().any(|s| s.source.ordinal() == Some(ordinal)) {
            return Err(DexModelError::DuplicateSource(source.name().to_owned()));
        }
        let index = self
            .slots
            .partition_point(|s| s.source.ordinal() < Some(ordinal));
        self.slots.insert(index, Slot::new(source));
        Ok(index)
    }

    pub fn add_file(&mut self, path: impl Into<PathBuf>) -> Result<usize> {
        self.add(Box::new(FileSource::new(path)))
    }

    /// Adds every `classesN.dex` file of `dir`. Returns how many were added.
    pub fn add_dir(&mut self, dir: &Path) -> Result<usize> {
        let mut added = 0;
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let is_dex = entry
                .file_name()
                .to_str()
                .and_then(dex_ordinal)
                .is_some();
            if is_dex && entry.file_type()?.is_file() {
                self.add_file(entry.path())?;
                added += 1;
            }
        }
        if self.storage.is_none() {
            self.storage = Some(Storage::Directory(dir.to_path_buf()));
        }
        debug!("Found {} dex files in {}", added, dir.display());
        Ok(added)
    }

    /// Adds every `classesN.dex` entry directly under `prefix`.
    pub fn add_entries(&mut self, map: &EntryMap, prefix: &str) -> Result<usize> {
        let mut added = 0;
        for name in map.names() {
            let simple = name.rsplit('/').next().unwrap_or(&name);
            if entry_path(prefix, simple) != name || dex_ordinal(simple).is_none() {
                continue;
            }
            self.add(Box::new(EntrySource::new(map.clone(), name)))?;
            added += 1;
        }
        if self.storage.is_none() {
            self.storage = Some(Storage::Entries {
                map: map.clone(),
                prefix: prefix.to_owned(),
            });
        }
        Ok(added)
    }

    /// Adds a source already holding `file`; the file takes the source's name.
    pub fn insert_file(&mut self, source: Box<dyn DexSource>, mut file: DexFile) -> Result<usize> {
        file.set_name(source.simple_name());
        let index = self.add(source)?;
        self.slots[index].file = OnceCell::from(file);
        Ok(index)
    }

    pub fn source(&self, index: usize) -> Option<&dyn DexSource> {
        self.slots.get(index).map(|s| s.source.as_ref())
    }

    pub fn sources(&self) -> impl Iterator<Item = &dyn DexSource> + '_ {
        self.slots.iter().map(|s| s.source.as_ref())
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| s.source.name() == name || s.source.simple_name() == name)
    }

    pub fn is_loaded(&self, index: usize) -> bool {
        self.slots
            .get(index)
            .map_or(false, |s| s.file.get().is_some())
    }

    /// The container of source `index`, parsed on first access. A source with
    /// no bytes yet yields an empty container.
    pub fn file(&self, index: usize) -> Result<Option<&DexFile>> {
        let Some(slot) = self.slots.get(index) else {
            return Ok(None);
        };
        if let Some(file) = slot.file.get() {
            return Ok(Some(file));
        }
        let file = if slot.source.exists() {
            DexFile::read(slot.source.as_ref(), self.limits.clone())?
        } else {
            DexFile::new(slot.source.simple_name(), self.limits.clone())
        };
        Ok(Some(slot.file.get_or_init(|| file)))
    }

    pub fn file_mut(&mut self, index: usize) -> Result<Option<&mut DexFile>> {
        self.file(index)?;
        Ok(self.slots.get_mut(index).and_then(|s| s.file.get_mut()))
    }

    pub fn load_all(&mut self) -> Result<()> {
        for index in 0..self.slots.len() {
            self.file(index)?;
        }
        Ok(())
    }

    /// Containers parsed so far, in source order. Sources not yet loaded are
    /// not visited; call [`DexSourceSet::load_all`] first to see every one.
    pub fn loaded_files(&self) -> impl Iterator<Item = &DexFile> + '_ {
        self.slots.iter().filter_map(|s| s.file.get())
    }

    pub fn loaded_files_mut(&mut self) -> impl Iterator<Item = &mut DexFile> + '_ {
        self.slots.iter_mut().filter_map(|s| s.file.get_mut())
    }

    /// Two distinct containers borrowed at once.
    pub fn pair_mut(&mut self, i: usize, j: usize) -> Result<(&mut DexFile, &mut DexFile)> {
        if i == j || i >= self.slots.len() || j >= self.slots.len() {
            return Err(DexModelError::InvalidArgument(format!("pair {}, {}", i, j)));
        }
        self.file(i)?;
        self.file(j)?;
        let (first, second) = if i < j {
            let (left, right) = self.slots.split_at_mut(j);
            (&mut left[i], &mut right[0])
        } else {
            let (left, right) = self.slots.split_at_mut(i);
            (&mut right[0], &mut left[j])
        };
        match (first.file.get_mut(), second.file.get_mut()) {
            (Some(first), Some(second)) => Ok((first, second)),
            _ => Err(DexModelError::Detached),
        }
    }

    fn default_source(&self) -> Box<dyn DexSource> {
        match &self.storage {
            Some(Storage::Directory(dir)) => Box::new(FileSource::new(dir.join(dex_name(0)))),
            Some(Storage::Entries { map, prefix }) => Box::new(EntrySource::new(
                map.clone(),
                entry_path(prefix, &dex_name(0)),
            )),
            None => Box::new(EntrySource::new(EntryMap::new(), dex_name(0))),
        }
    }

    /// Appends a source at the first free ordinal after the last one, holding
    /// an empty container. Returns its index.
    pub fn create_next(&mut self) -> Result<usize> {
        let file = DexFile::new("", self.limits.clone());
        self.push_file(file)
    }

    /// Appends `file` under a new source at the first free ordinal.
    pub fn push_file(&mut self, file: DexFile) -> Result<usize> {
        let source = match self.slots.last() {
            Some(last) => last.source.create_next()?,
            None => self.default_source(),
        };
        info!("Created {}", source.name());
        self.insert_file(source, file)
    }

    /// Moves the non-empty containers of `other` behind the last source of
    /// this set and writes them out. `other` is left without sources.
    pub fn absorb(&mut self, other: &mut DexSourceSet) -> Result<usize> {
        other.load_all()?;
        let mut absorbed = 0;
        for mut slot in other.slots.drain(..) {
            slot.source.close();
            let Some(file) = slot.file.take() else {
                continue;
            };
            if file.is_empty() {
                continue;
            }
            let index = self.push_file(file)?;
            self.save_at(index)?;
            absorbed += 1;
        }
        Ok(absorbed)
    }

    fn save_at(&mut self, index: usize) -> Result<()> {
        let Some(slot) = self.slots.get_mut(index) else {
            return Ok(());
        };
        if let Some(file) = slot.file.get() {
            slot.source.write(&file.to_bytes()?)?;
            debug!("Wrote {}", slot.source.name());
        }
        Ok(())
    }

    /// Writes every loaded container back to its source. Sources whose
    /// container became empty are deleted and dropped from the set.
    pub fn save(&mut self) -> Result<()> {
        for index in (0..self.slots.len()).rev() {
            let empty = match self.slots[index].file.get() {
                Some(file) => file.is_empty(),
                None => continue,
            };
            if empty {
                let mut slot = self.slots.remove(index);
                if slot.source.delete()? {
                    info!("Deleted {}", slot.source.name());
                }
                slot.source.close();
            } else {
                self.save_at(index)?;
            }
        }
        Ok(())
    }

    /// Writes every non-empty container into `dir` under its simple name.
    pub fn save_to(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)?;
        for index in 0..self.slots.len() {
            let Some(file) = self.file(index)? else {
                continue;
            };
            if file.is_empty() {
                continue;
            }
            let path = dir.join(self.slots[index].source.simple_name());
            fs::write(&path, file.to_bytes()?)?;
            debug!("Wrote {}", path.display());
        }
        Ok(())
    }

    pub fn shrink(&mut self) {
        for slot in &mut self.slots {
            if let Some(file) = slot.file.get_mut() {
                file.shrink();
            }
        }
    }

    /// Closes every source once and drops all containers.
    pub fn close(&mut self) {
        for mut slot in self.slots.drain(..) {
            if !slot.source.is_closed() {
                slot.source.close();
            }
        }
    }
}

#[cfg(test)]
mod dex_source_set_tests {
    use super::*;
    use dexmerge_dex_file::TypeKey;

    fn container_bytes(classes: &[&str]) -> Vec<u8> {
        let mut file = DexFile::new("classes.dex", SectionLimits::default());
        for class in classes {
            file.get_or_create_class(&TypeKey::new(*class));
        }
        file.to_bytes().unwrap()
    }

    #[test]
    fn it_should_order_sources_by_ordinal() {
        let map = EntryMap::new();
        map.insert("classes3.dex", container_bytes(&["La/C;"]));
        map.insert("classes.dex", container_bytes(&["La/A;"]));
        map.insert("classes2.dex", container_bytes(&["La/B;"]));
        map.insert("classes1.dex", vec![]);
        map.insert("lib/classes.dex", vec![]);
        let mut set = DexSourceSet::new(SectionLimits::default());

        assert_eq!(3, set.add_entries(&map, "").unwrap());

        let names = set.sources().map(|s| s.name().to_owned()).collect::<Vec<_>>();
        assert_eq!(vec!["classes.dex", "classes2.dex", "classes3.dex"], names);
        assert!(!set.is_loaded(1));
        assert!(set
            .file(1)
            .unwrap()
            .unwrap()
            .container()
            .contains_class(&TypeKey::new("La/B;")));
        assert!(set.is_loaded(1));
    }

    #[test]
    fn it_should_reject_duplicate_ordinals() {
        let map = EntryMap::new();
        let mut set = DexSourceSet::new(SectionLimits::default());
        set.add(Box::new(EntrySource::new(map.clone(), "classes.dex")))
            .unwrap();

        let result = set.add(Box::new(EntrySource::new(map, "other/classes.dex")));

        assert!(matches!(result, Err(DexModelError::DuplicateSource(_))));
    }

    #[test]
    fn it_should_create_the_next_source_under_the_prefix() {
        let map = EntryMap::new();
        map.insert("assets/classes.dex", container_bytes(&["La/A;"]));
        let mut set = DexSourceSet::new(SectionLimits::default());
        set.add_entries(&map, "assets").unwrap();

        let index = set.create_next().unwrap();

        assert_eq!(1, index);
        assert_eq!("assets/classes2.dex", set.source(index).unwrap().name());
        assert_eq!("classes2.dex", set.file(index).unwrap().unwrap().name());
    }

    #[test]
    fn it_should_delete_emptied_sources_on_save() {
        let map = EntryMap::new();
        map.insert("classes.dex", container_bytes(&["La/A;"]));
        map.insert("classes2.dex", container_bytes(&["La/B;"]));
        let mut set = DexSourceSet::new(SectionLimits::default());
        set.add_entries(&map, "").unwrap();
        set.file_mut(1).unwrap().unwrap().clear();

        set.save().unwrap();

        assert_eq!(1, set.len());
        assert!(!map.contains("classes2.dex"));
        assert!(map.contains("classes.dex"));
    }

    #[test]
    fn it_should_absorb_non_empty_containers() {
        let map = EntryMap::new();
        map.insert("classes.dex", container_bytes(&["La/A;"]));
        let mut set = DexSourceSet::new(SectionLimits::default());
        set.add_entries(&map, "").unwrap();
        let other_map = EntryMap::new();
        other_map.insert("classes.dex", container_bytes(&["Lb/B;"]));
        other_map.insert("classes2.dex", container_bytes(&[]));
        let mut other = DexSourceSet::new(SectionLimits::default());
        other.add_entries(&other_map, "").unwrap();

        assert_eq!(1, set.absorb(&mut other).unwrap());

        assert!(other.is_empty());
        assert_eq!(2, set.len());
        assert!(map.contains("classes2.dex"));
        assert!(set
            .file(1)
            .unwrap()
            .unwrap()
            .container()
            .contains_class(&TypeKey::new("Lb/B;")));
    }
}
