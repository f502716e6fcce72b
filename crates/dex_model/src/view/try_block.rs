use dexmerge_dex_file::{CatchHandler, TryBlock, TypeKey};

use crate::{Declaration, DexInstruction, DexMethod};

/// A guarded range of a method body and its handlers.
#[derive(Debug, Clone, Copy)]
pub struct DexTry<'a> {
    method: DexMethod<'a>,
    block: &'a TryBlock,
}

impl<'a> DexTry<'a> {
    pub(crate) fn new(method: DexMethod<'a>, block: &'a TryBlock) -> Self {
        Self { method, block }
    }

    pub fn block(&self) -> &'a TryBlock {
        self.block
    }

    pub fn start_address(&self) -> u32 {
        self.block.start_address
    }

    /// First address past the guarded range.
    pub fn end_address(&self) -> u32 {
        self.block.end_address()
    }

    pub fn start(&self) -> Option<DexInstruction<'a>> {
        self.method.instruction_at(self.block.start_address)
    }

    pub fn covers(&self, instruction: &DexInstruction<'_>) -> bool {
        self.block.covers(instruction.address())
    }

    pub fn handlers(&self) -> Vec<DexCatch<'a>> {
        self.block
            .handlers
            .iter()
            .map(|handler| DexCatch {
                method: self.method,
                handler,
            })
            .collect()
    }

    pub fn catch_all(&self) -> Option<DexInstruction<'a>> {
        self.method.instruction_at(self.block.catch_all?)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DexCatch<'a> {
    method: DexMethod<'a>,
    handler: &'a CatchHandler,
}

impl<'a> DexCatch<'a> {
    pub fn exception_type(&self) -> TypeKey {
        self.method
            .dex_class()
            .container()
            .type_key(self.handler.exception_type)
    }

    pub fn address(&self) -> u32 {
        self.handler.address
    }

    pub fn target(&self) -> Option<DexInstruction<'a>> {
        self.method.instruction_at(self.handler.address)
    }
}
