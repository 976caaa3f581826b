//! x86-64 jump encodings

use crate::addr::ForeignAddr;

use super::{DisplacementOverflow, JumpEncoder};

/// Opcode of `jmp rel32`
const JMP_REL32: u8 = 0xe9;

/// `jmp rel32`: five bytes, displacement relative to the byte after the jump
pub struct Rel32Jump;

impl JumpEncoder for Rel32Jump {
    const LEN: usize = 5;

    fn encode(
        source: ForeignAddr,
        destination: ForeignAddr,
        out: &mut [u8],
    ) -> Result<(), DisplacementOverflow> {
        let displacement = source.distance_to(destination) - Self::LEN as i128;
        let displacement = i32::try_from(displacement).map_err(|_| DisplacementOverflow {
            origin: source,
            destination,
            len: Self::LEN,
        })?;

        out[0] = JMP_REL32;
        out[1..Self::LEN].copy_from_slice(&displacement.to_le_bytes());
        Ok(())
    }

    fn decode(source: ForeignAddr, bytes: &[u8]) -> Option<ForeignAddr> {
        match bytes {
            [JMP_REL32, a, b, c, d, ..] => {
                let displacement = i32::from_le_bytes([*a, *b, *c, *d]) as isize;
                let next = source.get().wrapping_add(Self::LEN);
                Some(ForeignAddr::new(next.wrapping_add_signed(displacement)))
            }
            _ => None,
        }
    }
}

/// Length of an absolute jump
pub const JMP_ABS_LEN: usize = 14;

/// Generates an absolute jump to a specified address and returns bytecode.
///
/// The encoding is `jmp [rip + 0]` followed by the 8-byte target, so it reaches anywhere in the address space.
/// Used for relays placed next to a hooked function when the real destination is too far for [`Rel32Jump`].
pub fn jmp_abs(target: ForeignAddr) -> [u8; JMP_ABS_LEN] {
    let mut code = [0u8; JMP_ABS_LEN];
    code[..6].copy_from_slice(&[0xff, 0x25, 0x00, 0x00, 0x00, 0x00]);
    code[6..].copy_from_slice(&(target.get() as u64).to_le_bytes());
    code
}
