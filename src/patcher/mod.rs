//! # Patch
//!
//! This module covers patchers, which are used to overwrite locations in memory the caller does not own

use std::io;
use std::ptr;

use thiserror::Error;

use crate::addr::ForeignAddr;

pub mod byte;
pub mod remap;

/// Largest patch a single call may write: one page
pub const MAX_PATCH_LEN: usize = 0x1000;

/// Errors that can occur when patching
#[derive(Debug, Error)]
pub enum PatchError {
    /// The patch is larger than [`MAX_PATCH_LEN`]. Nothing was written.
    #[error("patch of {len} bytes exceeds the one page limit")]
    SizeExceeded {
        /// Requested patch length
        len: usize,
    },
    /// A writable alias of the destination could not be mapped. Nothing was written.
    #[error("failed to map a writable alias of {destination}")]
    RemapFailure {
        /// Destination of the patch
        destination: ForeignAddr,
        /// Underlying mapping error
        #[source]
        source: io::Error,
    },
}

/// Checks a patch length against [`MAX_PATCH_LEN`]
pub(crate) fn check_len(len: usize) -> Result<(), PatchError> {
    if len > MAX_PATCH_LEN {
        return Err(PatchError::SizeExceeded { len });
    }
    Ok(())
}

/// Patchers write to, and read from, memory the caller does not own.
///
/// A successful patch must be complete; a failed patch must not have written anything.
///
/// # Safety
///
/// Patchers are inherently unsafe. The implementor must ensure that the implementation of `patch` works correctly and is properly documented for avoiding undefined behavior
pub unsafe trait Patcher {
    /// Copies `source` over the memory at `destination`.
    ///
    /// # Safety
    ///
    /// `destination` must be valid for `source.len()` bytes for this patcher, and nothing may be executing
    /// the bytes being replaced unless the caller accepts the torn read.
    unsafe fn patch(&self, destination: ForeignAddr, source: &[u8]) -> Result<(), PatchError>;

    /// Fills `buf` with the bytes currently at `source`.
    ///
    /// # Safety
    ///
    /// `source` must be readable for `buf.len()` bytes
    unsafe fn read(&self, source: ForeignAddr, buf: &mut [u8]) -> Result<(), PatchError> {
        // Safety: caller guarantees `source` is readable for the full buffer
        ptr::copy_nonoverlapping(source.as_ptr(), buf.as_mut_ptr(), buf.len());
        Ok(())
    }
}

unsafe impl<P: Patcher + ?Sized> Patcher for &P {
    unsafe fn patch(&self, destination: ForeignAddr, source: &[u8]) -> Result<(), PatchError> {
        (**self).patch(destination, source)
    }

    unsafe fn read(&self, source: ForeignAddr, buf: &mut [u8]) -> Result<(), PatchError> {
        (**self).read(source, buf)
    }
}

unsafe impl<P: Patcher + ?Sized> Patcher for std::sync::Arc<P> {
    unsafe fn patch(&self, destination: ForeignAddr, source: &[u8]) -> Result<(), PatchError> {
        (**self).patch(destination, source)
    }

    unsafe fn read(&self, source: ForeignAddr, buf: &mut [u8]) -> Result<(), PatchError> {
        (**self).read(source, buf)
    }
}
