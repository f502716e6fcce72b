// https://source.android.com/docs/core/runtime/dex-format

mod access_flags;
pub mod annotation;
mod arena;
pub mod class_def;
pub mod code;
mod error;
pub mod instruction;
pub mod key;
mod limits;
mod parser;
mod pool;
mod section;
mod translate;
mod writer;

pub use access_flags::AccessFlags;
pub use annotation::{Annotation, AnnotationElement, EncodedValue, Visibility};
pub use arena::{ClassId, FieldRef, MethodRef};
pub use class_def::{ClassDef, FieldDef, MethodDef};
pub use code::{CatchHandler, CodeItem, InsId, InstructionList, TryBlock};
pub use error::DexFileError;
pub use instruction::{Instruction, Opcode, Operand, OperandKind};
pub use key::{FieldKey, Key, MethodKey, ProtoKey, StringKey, TypeKey, TypeListKey};
pub use limits::{SectionKind, SectionLimits, Usage};
pub use parser::Parser;
pub use pool::{FieldId, FieldIdx, MethodId, MethodIdx, Pool, PoolIndex, ProtoId, ProtoIdx, StringIdx, TypeIdx, TypeListIdx};
pub use section::{ClassMerge, SectionContainer, UsedIds};
pub use writer::Writer;

pub type Result<T, E = DexFileError> = std::result::Result<T, E>;

/// `dex\n035\0`
pub const DEX_MAGIC: [u8; 8] = *b"dex\n035\0";

/// Marker written in place of an absent index.
pub const NO_INDEX: u32 = 0xFFFF_FFFF;
