//! # Shared arena
//!
//! Executable memory whose physical backing is a memfd owned by this process.
//!
//! The arena is mapped read+execute only; it is never writable through its own mapping. The memfd plays the part
//! of physical memory, so the arena implements [`AliasMapper`] by mapping the same file offset a second time with
//! write access, which is what a kernel does with an ioremap of the page frame.

use std::fs::File;
use std::io;
use std::os::fd::FromRawFd;
use std::sync::{Arc, Mutex, PoisonError};

use memmap2::{Mmap, MmapMut, MmapOptions};
use thiserror::Error;

use crate::addr::ForeignAddr;
use crate::code::x64::jmp_abs;
use crate::hook::HOOK_WINDOW;
use crate::patcher::remap::{AliasGuard, AliasMapper, RemapPatcher};
use crate::patcher::{PatchError, Patcher, MAX_PATCH_LEN};

/// Name the memfd shows up with in `/proc/<pid>/maps`
const MEMFD_NAME: &[u8] = b"livehook-arena\0";

/// Filler for unused code bytes (`int3`)
const INT3: u8 = 0xcc;

/// Alignment of every allocation in the arena
const SLOT_ALIGN: usize = 16;

/// Errors when using the arena
#[derive(Debug, Error)]
pub enum ArenaError {
    /// Error creating or mapping the backing memfd
    #[error("failed to set up arena memory")]
    Io(#[from] io::Error),
    /// Not enough room left in the arena
    #[error("arena exhausted: {requested} bytes requested, {available} available")]
    Exhausted {
        /// Bytes the allocation needed
        requested: usize,
        /// Bytes left in the arena
        available: usize,
    },
    /// Error writing code into the arena
    #[error(transparent)]
    Patch(#[from] PatchError),
}

/// Shared state of an arena
#[derive(Debug)]
struct ArenaInner {
    /// Backing memfd, the arena's "physical memory"
    file: File,
    /// Read+execute view the arena hands out addresses in
    view: Mmap,
    /// Page size of the view
    page_size: usize,
    /// Length of the backing file, one page longer than the view
    backing_len: usize,
    /// Bump allocation offset into the view
    cursor: Mutex<usize>,
}

/// Read+execute memory that can only be modified through alias mappings.
///
/// Cloning is cheap and yields a handle to the same arena.
#[derive(Clone, Debug)]
pub struct SharedArena {
    /// Shared arena state
    inner: Arc<ArenaInner>,
}

impl SharedArena {
    /// Creates an arena of `pages` pages
    pub fn new(pages: usize) -> Result<Self, ArenaError> {
        let page_size = region::page::size();
        // one spare page so an alias of the last page plus the next stays inside the file
        let (len, backing_len) = pages
            .checked_mul(page_size)
            .and_then(|len| Some((len, len.checked_add(page_size)?)))
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("an arena of {pages} pages does not fit the address space"),
                )
            })?;

        // Safety: the name is nul terminated and the flags are valid
        let fd = unsafe { libc::memfd_create(MEMFD_NAME.as_ptr().cast(), libc::MFD_CLOEXEC) };
        if fd < 0 {
            return Err(io::Error::last_os_error().into());
        }
        // Safety: `fd` is a freshly created descriptor nothing else owns
        let file = unsafe { File::from_raw_fd(fd) };
        file.set_len(backing_len as u64)?;

        // Safety: the memfd is private to this arena and only ever modified through alias mappings
        let view = unsafe { MmapOptions::new().len(len).map_exec(&file)? };

        log::debug!(
            "created arena of {pages} pages at {}",
            ForeignAddr::of(view.as_ptr())
        );
        Ok(Self {
            inner: Arc::new(ArenaInner {
                file,
                view,
                page_size,
                backing_len,
                cursor: Mutex::new(0),
            }),
        })
    }

    /// Start of the read+execute view
    pub fn base(&self) -> ForeignAddr {
        ForeignAddr::of(self.inner.view.as_ptr())
    }

    /// Length of the read+execute view
    pub fn len(&self) -> usize {
        self.inner.view.len()
    }

    /// Returns true if the arena has no pages
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Offset of `addr` in the backing file, i.e. its "physical" address
    fn backing_offset(&self, addr: ForeignAddr) -> Option<usize> {
        let offset = addr.get().checked_sub(self.base().get())?;
        (offset < self.len()).then_some(offset)
    }

    /// Copies `code` into the arena and returns its address.
    ///
    /// At least [`HOOK_WINDOW`] bytes are reserved and the slack is filled with `int3`, so the code can be hooked.
    pub fn load(&self, code: &[u8]) -> Result<ForeignAddr, ArenaError> {
        let reserved = code.len().max(HOOK_WINDOW).next_multiple_of(SLOT_ALIGN);
        let addr = {
            let mut cursor = self
                .inner
                .cursor
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let available = self.len() - *cursor;
            if reserved > available {
                return Err(ArenaError::Exhausted {
                    requested: reserved,
                    available,
                });
            }
            let addr = ForeignAddr::new(self.base().get() + *cursor);
            *cursor += reserved;
            addr
        };

        let mut padded = vec![INT3; reserved];
        padded[..code.len()].copy_from_slice(code);

        let patcher = RemapPatcher::new(self.clone());
        for (index, chunk) in padded.chunks(MAX_PATCH_LEN).enumerate() {
            let destination = ForeignAddr::new(addr.get() + index * MAX_PATCH_LEN);
            // Safety: the range was just reserved in this arena and nothing executes it yet
            unsafe { patcher.patch(destination, chunk)? };
        }

        log::debug!("loaded {} bytes of code at {addr}", code.len());
        Ok(addr)
    }

    /// Places an absolute jump to `destination` in the arena and returns its address.
    ///
    /// Hooks on arena code can target the relay with a rel32 jump even when `destination` is further than 2 GiB
    /// away.
    pub fn relay(&self, destination: ForeignAddr) -> Result<ForeignAddr, ArenaError> {
        self.load(&jmp_abs(destination))
    }
}

/// Writable alias of arena pages
pub struct ArenaAlias(MmapMut);

impl AliasGuard for ArenaAlias {
    fn as_mut_ptr(&mut self) -> *mut u8 {
        self.0.as_mut_ptr()
    }

    fn len(&self) -> usize {
        self.0.len()
    }
}

unsafe impl AliasMapper for SharedArena {
    type Alias<'a> = ArenaAlias
    where
        Self: 'a;

    fn page_size(&self) -> usize {
        self.inner.page_size
    }

    unsafe fn map_alias(&self, page: ForeignAddr, len: usize) -> io::Result<ArenaAlias> {
        let offset = self.backing_offset(page).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{page} is not backed by this arena"),
            )
        })?;
        let len = len.min(self.inner.backing_len - offset);

        MmapOptions::new()
            .offset(offset as u64)
            .len(len)
            .map_mut(&self.inner.file)
            .map(ArenaAlias)
    }
}
