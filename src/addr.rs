//! # Foreign addresses
//!
//! Addresses of memory owned by the host rather than by this crate.

use std::fmt;

/// An address inside memory owned by the host environment.
///
/// This is deliberately not a pointer: it cannot be dereferenced, and all access to the memory behind it
/// goes through a [`Patcher`](crate::patcher::Patcher).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct ForeignAddr(usize);

impl ForeignAddr {
    /// Wraps a raw address
    pub const fn new(addr: usize) -> Self {
        Self(addr)
    }

    /// Wraps the address of a pointer, such as a function pointer cast to `*const u8`
    pub fn of<T>(ptr: *const T) -> Self {
        Self(ptr as usize)
    }

    /// Raw numeric value of the address
    pub const fn get(self) -> usize {
        self.0
    }

    /// Start of the page containing this address
    pub const fn page_floor(self, page_size: usize) -> Self {
        Self(self.0 & !(page_size - 1))
    }

    /// Offset of this address within its page
    pub const fn page_offset(self, page_size: usize) -> usize {
        self.0 & (page_size - 1)
    }

    /// Address `bytes` past this one, or `None` on overflow
    pub fn checked_add(self, bytes: usize) -> Option<Self> {
        self.0.checked_add(bytes).map(Self)
    }

    /// Signed distance from `self` to `other`, wide enough to never overflow
    pub fn distance_to(self, other: Self) -> i128 {
        other.0 as i128 - self.0 as i128
    }

    /// Converts to a raw pointer.
    ///
    /// Obtaining the pointer is safe; using it is not. Only patcher implementations should need this.
    pub fn as_ptr(self) -> *const u8 {
        self.0 as _
    }
}

impl fmt::Debug for ForeignAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ForeignAddr({:#x})", self.0)
    }
}

impl fmt::Display for ForeignAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl fmt::LowerHex for ForeignAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}
