use thiserror::Error;

use crate::SectionKind;

#[derive(Error, Debug)]
pub enum DexFileError {
    #[error(transparent)]
    IOError(#[from] std::io::Error),
    #[error("Invalid magic identifier: 0x{0:X}")]
    InvalidMagicIdentifier(u64),
    #[error("Invalid {kind} index: {index}")]
    InvalidIndex { kind: SectionKind, index: u32 },
    #[error("Invalid opcode: 0x{0:02X}")]
    InvalidOpcode(u8),
    #[error("Invalid encoded value tag: {0}")]
    InvalidValueTag(u8),
    #[error("Invalid operand tag: {0}")]
    InvalidOperandTag(u8),
    #[error("Invalid annotation visibility: {0}")]
    InvalidVisibility(u8),
    #[error(transparent)]
    InvalidUtf8(#[from] std::string::FromUtf8Error),
    #[error("Length {length} runs past the end of the input, {remaining} bytes left")]
    Truncated { length: u32, remaining: usize },
    #[error("Invalid descriptor: {0:?}")]
    InvalidDescriptor(String),
    #[error("Entry is no longer attached to its container")]
    Detached,
    #[error("Entries of kind {0} cannot be removed")]
    UnsupportedRemoval(SectionKind),
}
