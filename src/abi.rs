//! # ABI
//!
//! The fixed interception contract: six word-sized arguments in, one word out.
//!
//! Hooked functions are treated as if they had this signature whatever their real one is. Functions taking fewer
//! arguments simply ignore the extra registers, so adapting a real signature is left to the entry shim and the
//! callbacks.

use std::mem;

use crate::addr::ForeignAddr;

/// Number of argument words passed through a hook
pub const ARG_COUNT: usize = 6;

/// Argument vector seen by callbacks and the original function
pub type HookArgs = [usize; ARG_COUNT];

/// Signature every hooked function is called with
pub type RawHookFn = unsafe extern "C" fn(usize, usize, usize, usize, usize, usize) -> usize;

/// Calls the code at `target` with the six words in `args`.
///
/// # Safety
///
/// `target` must be executable code following the C calling convention that tolerates being called with six
/// word arguments.
pub unsafe fn call_raw(target: ForeignAddr, args: &HookArgs) -> usize {
    // Safety: caller guarantees `target` is code with a compatible signature
    let function = mem::transmute::<usize, RawHookFn>(target.get());
    function(args[0], args[1], args[2], args[3], args[4], args[5])
}

/// Generates an `extern "C"` entry shim that forwards to [`HookRegistry::dispatch`](crate::registry::HookRegistry::dispatch).
///
/// The shim is the destination a hook is installed with; its address is what the trampoline jumps to.
///
/// ```ignore
/// lazy_static! {
///     static ref HOOKS: HookRegistry<RemapPatcher<SharedArena>> = HookRegistry::new(patcher);
/// }
///
/// hook_entry!(fn open_entry => HOOKS, "open");
/// ```
#[macro_export]
macro_rules! hook_entry {
    ($(#[$meta:meta])* $vis:vis fn $name:ident => $registry:expr, $id:expr) => {
        $(#[$meta])*
        $vis extern "C" fn $name(
            a0: usize,
            a1: usize,
            a2: usize,
            a3: usize,
            a4: usize,
            a5: usize,
        ) -> usize {
            $registry.dispatch($id, [a0, a1, a2, a3, a4, a5])
        }
    };
}
