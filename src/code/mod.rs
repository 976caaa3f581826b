//! # Code
//!
//! Machine code encodings used to redirect execution.
//!
//! The executor and patchers never look inside these bytes; only the installer needs an encoder, so porting to
//! another architecture means providing another [`JumpEncoder`].

use thiserror::Error;

use crate::addr::ForeignAddr;

pub mod x64;

/// Jump target is out of reach of the encoding
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("jump from {origin} to {destination} is out of range for a {len}-byte jump")]
pub struct DisplacementOverflow {
    /// Address the jump would be written to
    pub origin: ForeignAddr,
    /// Address the jump should land on
    pub destination: ForeignAddr,
    /// Length of the jump encoding
    pub len: usize,
}

/// An unconditional jump encoding written over a hooked function's entry
pub trait JumpEncoder {
    /// Number of bytes the jump occupies
    const LEN: usize;

    /// Writes a jump located at `source` that lands on `destination` into the first [`Self::LEN`] bytes of `out`.
    ///
    /// Nothing is written when the destination is out of range.
    ///
    /// # Panics
    ///
    /// Panics if `out` is shorter than [`Self::LEN`].
    fn encode(
        source: ForeignAddr,
        destination: ForeignAddr,
        out: &mut [u8],
    ) -> Result<(), DisplacementOverflow>;

    /// Decodes a jump located at `source`, returning where it lands, or `None` if `bytes` is not this encoding
    fn decode(source: ForeignAddr, bytes: &[u8]) -> Option<ForeignAddr>;
}
