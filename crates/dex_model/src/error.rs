use dexmerge_dex_file::DexFileError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DexModelError {
    #[error(transparent)]
    DexFile(#[from] DexFileError),
    #[error(transparent)]
    IOError(#[from] std::io::Error),
    #[error("Conflicting declaration: {0}")]
    Conflict(String),
    #[error("Duplicate: {0}")]
    Duplicate(String),
    #[error("Cyclic merge")]
    CyclicMerge,
    #[error("Entry is no longer attached to its container")]
    Detached,
    #[error("Class does not fit into an empty container: {0}")]
    Oversized(String),
    #[error("Source is closed: {0}")]
    SourceClosed(String),
    #[error("Source not found: {0}")]
    SourceNotFound(String),
    #[error("Duplicate source: {0}")]
    DuplicateSource(String),
    #[error("Method has no code: {0}")]
    MissingCode(String),
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}
