//! This module contains a byte patcher for memory that is already writable

use std::ptr;

use crate::addr::ForeignAddr;

use super::{check_len, PatchError, Patcher};

/// Patcher for patching writable memory locations with byte arrays.
/// This patcher only fails on oversized patches.
#[derive(Default, Clone, Copy, Debug)]
pub struct BytePatcher;
impl BytePatcher {
    /// Creates a new [`BytePatcher`]
    pub fn new() -> Self {
        Self
    }
}
unsafe impl Patcher for BytePatcher {
    unsafe fn patch(&self, destination: ForeignAddr, source: &[u8]) -> Result<(), PatchError> {
        check_len(source.len())?;

        log::trace!("writing {} bytes at {destination}", source.len());
        // Safety: caller must ensure that `destination` is writable for the full length of the patch
        ptr::copy(source.as_ptr(), destination.as_ptr() as *mut u8, source.len());
        Ok(())
    }
}
