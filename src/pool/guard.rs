//! Scoped block acquisition

use std::ops::Deref;

use super::block::PooledBlock;
use super::manager::PoolManager;
use crate::error::PoolResult;

/// A pooled block that goes back to its manager when dropped
///
/// Release also runs during unwinding, so a panicking caller does not leak an
/// in-use block.
#[derive(Debug)]
pub struct BlockGuard<'a> {
    manager: &'a PoolManager,
    block: Option<PooledBlock>,
}

impl<'a> BlockGuard<'a> {
    pub(crate) fn new(manager: &'a PoolManager, block: PooledBlock) -> Self {
        BlockGuard {
            manager,
            block: Some(block),
        }
    }

    pub fn block(&self) -> &PooledBlock {
        self
    }

    /// Release now and report whether the manager took the block back
    pub fn release(mut self) -> PoolResult<bool> {
        match self.block.take() {
            Some(block) => self.manager.release(block.handle()),
            None => Ok(false),
        }
    }
}

impl Deref for BlockGuard<'_> {
    type Target = PooledBlock;

    fn deref(&self) -> &PooledBlock {
        // Only `release` and `drop` empty the slot, and both consume the guard
        match &self.block {
            Some(block) => block,
            None => unreachable!("BlockGuard used after release"),
        }
    }
}

impl Drop for BlockGuard<'_> {
    fn drop(&mut self) {
        if let Some(block) = self.block.take() {
            if let Err(e) = self.manager.release(block.handle()) {
                tracing::warn!("Failed to release {} on scope exit: {}", block.handle(), e);
            }
        }
    }
}
