// https://source.android.com/docs/core/runtime/multidex

mod access;
mod declaration;
mod dex_file;
mod directory;
mod error;
mod merge;
mod rename;
mod repository;
mod source;
mod source_set;
mod view;

pub use declaration::{Declaration, DexDeclaration};
pub use dex_file::DexFile;
pub use directory::DexDirectory;
pub use error::DexModelError;
pub use merge::{MergePolicy, OverflowAction};
pub use rename::{rename_field, rename_method, replace_field, replace_method, TypeRename};
pub use repository::ClassRepository;
pub use source::{
    dex_base_name, dex_name, dex_ordinal, DexSource, EntryMap, EntrySource, FileSource,
    SourceBytes,
};
pub use source_set::DexSourceSet;
pub use view::{
    DexAnnotation, DexCatch, DexClass, DexClassMut, DexField, DexInstruction, DexMethod,
    DexMethodMut, DexMethodParameter, DexTry, DexValue, InstructionRef,
};

pub type Result<T, E = DexModelError> = std::result::Result<T, E>;
