use std::{
    fs::{self, File},
    path::{Path, PathBuf},
};

use memmap::Mmap;

use crate::{dex_name, DexModelError, DexSource, Result, SourceBytes};

/// A dex file on disk, memory mapped when opened.
#[derive(Debug)]
pub struct FileSource {
    path: PathBuf,
    name: String,
    closed: bool,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path.to_string_lossy().into_owned();
        Self {
            path,
            name,
            closed: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn check_open(&self) -> Result<()> {
        if self.closed {
            return Err(DexModelError::SourceClosed(self.name.clone()));
        }
        Ok(())
    }

    fn sibling(&self, ordinal: usize) -> PathBuf {
        match self.path.parent() {
            Some(dir) => dir.join(dex_name(ordinal)),
            None => PathBuf::from(dex_name(ordinal)),
        }
    }
}

impl DexSource for FileSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn location(&self) -> String {
        fs::canonicalize(&self.path)
            .unwrap_or_else(|_| self.path.clone())
            .to_string_lossy()
            .into_owned()
    }

    fn exists(&self) -> bool {
        self.path.is_file()
    }

    fn open(&self) -> Result<SourceBytes> {
        self.check_open()?;
        let file = File::open(&self.path)?;
        if file.metadata()?.len() == 0 {
            // Zero-length files cannot be mapped.
            return Ok(SourceBytes::Owned(vec![]));
        }
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(SourceBytes::Mapped(mmap))
    }

    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.check_open()?;
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        fs::write(&self.path, bytes)?;
        Ok(())
    }

    fn delete(&mut self) -> Result<bool> {
        self.check_open()?;
        if !self.path.is_file() {
            return Ok(false);
        }
        fs::remove_file(&self.path)?;
        Ok(true)
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
        while self.sibling(ordinal).is_file() {
            ordinal += 1;
        }
        Ok(Box::new(FileSource::new(self.sibling(ordinal))))
    }
}
