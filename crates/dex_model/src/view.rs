//! Read-through projections over container entries.
//!
//! Views borrow their container and are cheap to copy; none of them caches
//! anything that can change. Writes go through [`DexClassMut`],
//! [`DexMethodMut`] and [`InstructionRef`], which hold a handle instead of a
//! borrow and fail with `Detached` once their entry is gone.

mod annotation;
mod class;
mod field;
mod instruction;
mod method;
mod try_block;

pub use annotation::{DexAnnotation, DexValue};
pub use class::{DexClass, DexClassMut};
pub use field::DexField;
pub use instruction::{DexInstruction, InstructionRef};
pub use method::{DexMethod, DexMethodMut, DexMethodParameter};
pub use try_block::{DexCatch, DexTry};
