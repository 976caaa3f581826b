//! This module contains a patcher which writes protected memory through a writable alias mapping.
//!
//! Rather than changing the protection of the target mapping, the physical page behind the destination is
//! mapped a second time with write access, written, and unmapped again. The original mapping is never touched,
//! so its permissions stay read+execute for every other observer.

use std::io;
use std::ptr;

use crate::addr::ForeignAddr;

use super::{check_len, PatchError, Patcher};

/// A transient writable mapping. Dropping the guard unmaps it.
pub trait AliasGuard {
    /// Start of the writable alias
    fn as_mut_ptr(&mut self) -> *mut u8;
    /// Length of the alias in bytes
    fn len(&self) -> usize;
    /// Returns true if the alias maps nothing
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Memory backends able to translate a virtual page to its physical backing and map that backing again
/// with write permission.
///
/// This is a privileged capability: inside a kernel it is an ioremap-style primitive, in user space it needs
/// memory whose backing object the process controls (see [`SharedArena`](crate::arena::SharedArena)).
///
/// # Safety
///
/// An alias must map exactly the physical memory behind the requested virtual page, starting at its first byte.
pub unsafe trait AliasMapper {
    /// Guard for a live alias mapping
    type Alias<'a>: AliasGuard + 'a
    where
        Self: 'a;

    /// Page size of the backing memory
    fn page_size(&self) -> usize;

    /// Maps the physical memory behind the page-aligned virtual address `page` again, writable, for `len` bytes.
    ///
    /// The returned alias may be shorter than `len` if the backing memory ends first.
    ///
    /// # Safety
    ///
    /// `page` must be page aligned and backed by memory this mapper understands.
    unsafe fn map_alias(&self, page: ForeignAddr, len: usize) -> io::Result<Self::Alias<'_>>;
}

/// Patcher writing through transient alias mappings provided by an [`AliasMapper`].
///
/// Each patch maps the destination page plus the following page, so patches straddling a page boundary land
/// correctly, then unmaps before returning.
#[derive(Clone, Debug)]
pub struct RemapPatcher<M> {
    /// Backend creating alias mappings
    mapper: M,
}
impl<M: AliasMapper> RemapPatcher<M> {
    /// Creates a new patcher over `mapper`
    pub fn new(mapper: M) -> Self {
        Self { mapper }
    }

    /// The underlying mapper
    pub fn mapper(&self) -> &M {
        &self.mapper
    }
}

unsafe impl<M: AliasMapper> Patcher for RemapPatcher<M> {
    unsafe fn patch(&self, destination: ForeignAddr, source: &[u8]) -> Result<(), PatchError> {
        check_len(source.len())?;

        let page_size = self.mapper.page_size();
        let page = destination.page_floor(page_size);
        let offset = destination.page_offset(page_size);

        let remap_failure = |source| PatchError::RemapFailure {
            destination,
            source,
        };
        let mut alias = self
            .mapper
            .map_alias(page, page_size * 2)
            .map_err(remap_failure)?;
        if offset + source.len() > alias.len() {
            return Err(remap_failure(io::Error::new(
                io::ErrorKind::InvalidInput,
                "alias mapping ends before the patch does",
            )));
        }

        log::trace!(
            "writing {} bytes at {destination} through alias of page {page}",
            source.len()
        );
        // Safety: the alias covers `offset + source.len()` bytes of the destination's physical memory
        ptr::copy_nonoverlapping(source.as_ptr(), alias.as_mut_ptr().add(offset), source.len());
        drop(alias);

        Ok(())
    }
}
