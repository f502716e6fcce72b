use std::{fmt, ops::Deref};

use memmap::Mmap;

use crate::Result;

mod entry;
mod file;

pub(crate) use entry::entry_path;
pub use entry::{EntryMap, EntrySource};
pub use file::FileSource;

const DEX_BASE_NAME: &str = "classes";
const DEX_EXTENSION: &str = ".dex";

/// `classes` for ordinal 0, `classes{n + 1}` after that; there is no `classes1`.
pub fn dex_base_name(ordinal: usize) -> String {
    match ordinal {
        0 => DEX_BASE_NAME.to_owned(),
        n => format!("{}{}", DEX_BASE_NAME, n + 1),
    }
}

pub fn dex_name(ordinal: usize) -> String {
    format!("{}{}", dex_base_name(ordinal), DEX_EXTENSION)
}

/// Inverse of [`dex_name`]. Accepts a bare or `.dex` name, with or without a
/// leading path; anything that `dex_name` would never produce is rejected.
pub fn dex_ordinal(name: &str) -> Option<usize> {
    let name = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let name = name.strip_suffix(DEX_EXTENSION).unwrap_or(name);
    let suffix = name.strip_prefix(DEX_BASE_NAME)?;
    if suffix.is_empty() {
        return Some(0);
    }
    if suffix.starts_with('0') || !suffix.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    match suffix.parse::<usize>().ok()? {
        0 | 1 => None,
        n => Some(n - 1),
    }
}

/// Bytes of one serialized container, either mapped from disk or held in memory.
pub enum SourceBytes {
    Mapped(Mmap),
    Owned(Vec<u8>),
}

impl Deref for SourceBytes {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            SourceBytes::Mapped(mmap) => mmap,
            SourceBytes::Owned(bytes) => bytes,
        }
    }
}

impl fmt::Debug for SourceBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceBytes::Mapped(mmap) => write!(f, "Mapped({} bytes)", mmap.len()),
            SourceBytes::Owned(bytes) => write!(f, "Owned({} bytes)", bytes.len()),
        }
    }
}

/// A named slot holding the serialized bytes of exactly one container.
pub trait DexSource: fmt::Debug {
    /// Full name inside its storage, e.g. `assets/classes2.dex`.
    fn name(&self) -> &str;

    fn simple_name(&self) -> &str {
        let name = self.name();
        name.rsplit(['/', '\\']).next().unwrap_or(name)
    }

    fn ordinal(&self) -> Option<usize> {
        dex_ordinal(self.simple_name())
    }

    /// Identity of the backing storage slot; two sources with the same
    /// location read and write the same bytes.
    fn location(&self) -> String;

    fn exists(&self) -> bool;

    fn open(&self) -> Result<SourceBytes>;

    fn write(&mut self, bytes: &[u8]) -> Result<()>;

    /// Removes the bytes from storage. Returns whether anything was there.
    fn delete(&mut self) -> Result<bool>;

    fn close(&mut self);

    fn is_closed(&self) -> bool;

    /// A sibling in the same storage at the first free ordinal after this one.
    fn create_next(&self) -> Result<Box<dyn DexSource>>;
}

#[cfg(test)]
mod dex_name_tests {
    use super::*;

    #[test]
    fn it_should_round_trip_ordinals() {
        for ordinal in 0..64 {
            assert_eq!(Some(ordinal), dex_ordinal(&dex_name(ordinal)));
            assert_eq!(Some(ordinal), dex_ordinal(&dex_base_name(ordinal)));
        }
    }

    #[test]
    fn it_should_skip_the_bare_one_suffix() {
        assert_eq!("classes.dex", dex_name(0));
        assert_eq!("classes2.dex", dex_name(1));
        assert_eq!("classes3.dex", dex_name(2));
        assert_eq!("classes4", dex_base_name(3));
        assert!((0..1000).all(|o| dex_name(o) != "classes1.dex"));
    }

    #[test]
    fn it_should_reject_non_canonical_names() {
        assert_eq!(None, dex_ordinal("classes1.dex"));
        assert_eq!(None, dex_ordinal("classes0.dex"));
        assert_eq!(None, dex_ordinal("classes02.dex"));
        assert_eq!(None, dex_ordinal("classesX.dex"));
        assert_eq!(None, dex_ordinal("resources.arsc"));
    }

    #[test]
    fn it_should_ignore_leading_paths() {
        assert_eq!(Some(0), dex_ordinal("assets/classes.dex"));
        assert_eq!(Some(4), dex_ordinal("/tmp/out/classes5.dex"));
    }
}
