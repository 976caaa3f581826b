//! Fixtures shared by the unit tests

use std::io;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::addr::ForeignAddr;
use crate::hook::HOOK_WINDOW;
use crate::patcher::byte::BytePatcher;
use crate::patcher::{PatchError, Patcher};

/// Length of a heap target
const TARGET_LEN: usize = 64;

/// A writable heap buffer of `nop`s standing in for a function that is never executed
pub struct Target {
    /// Start of the buffer
    addr: usize,
}

impl Target {
    /// Allocates a fresh target
    pub fn new() -> Self {
        let bytes = vec![0x90u8; TARGET_LEN].into_boxed_slice();
        Self {
            addr: Box::into_raw(bytes) as *mut u8 as usize,
        }
    }

    /// Address of the target
    pub fn addr(&self) -> ForeignAddr {
        ForeignAddr::new(self.addr)
    }

    /// An address `offset` bytes past the target, used as a hook destination that is never jumped to
    pub fn near(&self, offset: usize) -> ForeignAddr {
        ForeignAddr::new(self.addr + offset)
    }

    /// Current hook window at the target
    pub fn bytes(&self) -> [u8; HOOK_WINDOW] {
        unsafe { ptr::read(self.addr as *const [u8; HOOK_WINDOW]) }
    }
}

impl Drop for Target {
    fn drop(&mut self) {
        let slice = ptr::slice_from_raw_parts_mut(self.addr as *mut u8, TARGET_LEN);
        drop(unsafe { Box::from_raw(slice) });
    }
}

/// Returns true for trampoline writes
fn is_jump(bytes: &[u8]) -> bool {
    bytes.first() == Some(&0xe9)
}

/// Byte patcher whose restore or reinstall writes can be made to fail
#[derive(Default)]
pub struct FlakyPatcher {
    /// Fail writes of original bytes
    pub fail_original: AtomicBool,
    /// Fail writes of trampolines
    pub fail_trampoline: AtomicBool,
    /// Successful writes
    pub writes: AtomicUsize,
}

unsafe impl Patcher for FlakyPatcher {
    unsafe fn patch(&self, destination: ForeignAddr, source: &[u8]) -> Result<(), PatchError> {
        let failing = if is_jump(source) {
            &self.fail_trampoline
        } else {
            &self.fail_original
        };
        if failing.load(Ordering::SeqCst) {
            return Err(PatchError::RemapFailure {
                destination,
                source: io::ErrorKind::OutOfMemory.into(),
            });
        }

        self.writes.fetch_add(1, Ordering::SeqCst);
        BytePatcher::new().patch(destination, source)
    }
}

/// Byte patcher counting callers between the restore and reinstall of a hook
#[derive(Default)]
pub struct WindowCounter {
    /// Callers currently inside the window
    pub inside: AtomicUsize,
    /// Most callers ever seen inside the window at once
    pub max: AtomicUsize,
    /// Windows opened
    pub windows: AtomicUsize,
}

unsafe impl Patcher for WindowCounter {
    unsafe fn patch(&self, destination: ForeignAddr, source: &[u8]) -> Result<(), PatchError> {
        if is_jump(source) {
            let result = BytePatcher::new().patch(destination, source);
            // the installing write closes no window
            let _ = self
                .inside
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
            result
        } else {
            let now = self.inside.fetch_add(1, Ordering::SeqCst) + 1;
            self.max.fetch_max(now, Ordering::SeqCst);
            self.windows.fetch_add(1, Ordering::SeqCst);
            BytePatcher::new().patch(destination, source)
        }
    }
}

#[cfg(all(target_os = "linux", target_arch = "x86_64"))]
pub use self::native::*;

/// Fixtures that execute code
#[cfg(all(target_os = "linux", target_arch = "x86_64"))]
mod native {
    use lazy_static::lazy_static;

    use crate::addr::ForeignAddr;
    use crate::arena::SharedArena;

    lazy_static! {
        /// Arena shared by every test that executes hooked code
        pub static ref ARENA: SharedArena = SharedArena::new(16).unwrap();
        /// Relay to [`parked`], for hooks whose trampoline is never taken
        static ref PARKED: ForeignAddr = ARENA.relay(ForeignAddr::new(parked as usize)).unwrap();
    }

    /// Destination for hooks only driven through `execute`
    extern "C" fn parked(_: usize, _: usize, _: usize, _: usize, _: usize, _: usize) -> usize {
        usize::MAX
    }

    /// An in-range destination that is never expected to run
    pub fn parked_destination() -> ForeignAddr {
        *PARKED
    }

    /// Hand-assembled x86-64 test functions
    pub mod code {
        use std::sync::atomic::AtomicU64;

        use crate::addr::ForeignAddr;

        /// `mov eax, 7; ret`
        pub const RETURN_7: [u8; 6] = [0xb8, 0x07, 0x00, 0x00, 0x00, 0xc3];

        /// `mov eax, 42; ret`
        pub const RETURN_42: [u8; 6] = [0xb8, 0x2a, 0x00, 0x00, 0x00, 0xc3];

        /// Folds the six arguments as hex digits: `((((a0 << 4 | a1) << 4 | a2) ...) << 4 | a5)`
        #[rustfmt::skip]
        pub const HORNER: [u8; 39] = [
            0x48, 0x89, 0xf8,       // mov rax, rdi
            0x48, 0xc1, 0xe0, 0x04, // shl rax, 4
            0x48, 0x01, 0xf0,       // add rax, rsi
            0x48, 0xc1, 0xe0, 0x04, // shl rax, 4
            0x48, 0x01, 0xd0,       // add rax, rdx
            0x48, 0xc1, 0xe0, 0x04, // shl rax, 4
            0x48, 0x01, 0xc8,       // add rax, rcx
            0x48, 0xc1, 0xe0, 0x04, // shl rax, 4
            0x4c, 0x01, 0xc0,       // add rax, r8
            0x48, 0xc1, 0xe0, 0x04, // shl rax, 4
            0x4c, 0x01, 0xc8,       // add rax, r9
            0xc3,                   // ret
        ];

        /// Jumps to `destination`, leaving the argument registers untouched
        pub fn tail_call(destination: ForeignAddr) -> Vec<u8> {
            let mut code = vec![0x48, 0xb8]; // mov rax, imm64
            code.extend_from_slice(&(destination.get() as u64).to_le_bytes());
            code.extend_from_slice(&[0xff, 0xe0]); // jmp rax
            code
        }

        /// Increments `counter` and returns 0
        pub fn count_entries(counter: &'static AtomicU64) -> Vec<u8> {
            let mut code = vec![0x48, 0xb8]; // mov rax, imm64
            code.extend_from_slice(&(counter as *const AtomicU64 as u64).to_le_bytes());
            code.extend_from_slice(&[0xf0, 0x48, 0xff, 0x00]); // lock inc qword ptr [rax]
            code.extend_from_slice(&[0x31, 0xc0]); // xor eax, eax
            code.push(0xc3); // ret
            code
        }
    }
}
