use std::{cell::RefCell, collections::BTreeMap, rc::Rc};

use crate::{dex_name, DexModelError, DexSource, Result, SourceBytes};

/// In-memory archive: entry paths mapped to their bytes. Clones share storage.
#[derive(Debug, Clone, Default)]
pub struct EntryMap(Rc<RefCell<BTreeMap<String, Vec<u8>>>>);

impl EntryMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, name: impl Into<String>, bytes: Vec<u8>) {
        self.0.borrow_mut().insert(name.into(), bytes);
    }

    pub fn get(&self, name: &str) -> Option<Vec<u8>> {
        self.0.borrow().get(name).cloned()
    }

    pub fn remove(&self, name: &str) -> Option<Vec<u8>> {
        self.0.borrow_mut().remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.borrow().contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.0.borrow().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }

    fn address(&self) -> *const () {
        Rc::as_ptr(&self.0).cast()
    }
}

/// Joins an optional directory prefix and an entry name with `/`.
pub(crate) fn entry_path(prefix: &str, name: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        name.to_owned()
    } else {
        format!("{}/{}", prefix, name)
    }
}

/// One entry of an [`EntryMap`].
#[derive(Debug)]
pub struct EntrySource {
    map: EntryMap,
    name: String,
    closed: bool,
}

impl EntrySource {
    pub fn new(map: EntryMap, name: impl Into<String>) -> Self {
        Self {
            map,
            name: name.into(),
            closed: false,
        }
    }

    fn check_open(&self) -> Result<()> {
        if self.closed {
            return Err(DexModelError::SourceClosed(self.name.clone()));
        }
        Ok(())
    }

    fn prefix(&self) -> &str {
        match self.name.rfind('/') {
            Some(i) => &self.name[..i],
            None => "",
        }
    }
}

impl DexSource for EntrySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn location(&self) -> String {
        format!("{:p}:{}", self.map.address(), self.name)
    }

    fn exists(&self) -> bool {
        self.map.contains(&self.name)
    }

    fn open(&self) -> Result<SourceBytes> {
        self.check_open()?;
        self.map
            .get(&self.name)
            .map(SourceBytes::Owned)
            .ok_or_else(|| DexModelError::SourceNotFound(self.name.clone()))
    }

    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.check_open()?;
        self.map.insert(self.name.clone(), bytes.to_vec());
        Ok(())
    }

    fn delete(&mut self) -> Result<bool> {
        self.check_open()?;
        Ok(self.map.remove(&self.name).is_some())
    }

    fn close(&mut self) {
        self.closed = true;
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    fn create_next(&self) -> Result<Box<dyn DexSource>> {
        self.check_open()?;
        let mut ordinal = self.ordinal().map_or(0, |o| o + 1);
        while self.map.contains(&entry_path(self.prefix(), &dex_name(ordinal))) {
            ordinal += 1;
        }
        let name = entry_path(self.prefix(), &dex_name(ordinal));
        Ok(Box::new(EntrySource::new(self.map.clone(), name)))
    }
}

#[cfg(test)]
mod entry_source_tests {
    use super::*;

    #[test]
    fn it_should_share_storage_between_clones() {
        let map = EntryMap::new();
        let mut source = EntrySource::new(map.clone(), "classes.dex");

        source.write(&[1, 2, 3]).unwrap();

        assert_eq!(Some(vec![1, 2, 3]), map.get("classes.dex"));
        assert!(source.delete().unwrap());
        assert!(map.is_empty());
    }

    #[test]
    fn it_should_create_siblings_under_the_same_prefix() {
        let map = EntryMap::new();
        map.insert("assets/classes2.dex", vec![]);
        let source = EntrySource::new(map, "assets/classes.dex");

        let next = source.create_next().unwrap();

        assert_eq!("assets/classes3.dex", next.name());
        assert_eq!("classes3.dex", next.simple_name());
    }

    #[test]
    fn it_should_report_missing_entries() {
        let source = EntrySource::new(EntryMap::new(), "classes.dex");

        assert!(matches!(
            source.open(),
            Err(DexModelError::SourceNotFound(_))
        ));
    }
}
