//! # Hook
//!
//! This module covers hooks, which redirect execution from a target function to an interception routine.
//!
//! A hook overwrites the target's entry with a jump. Every time the interception routine runs, the
//! [`HookDescriptor`] puts the original bytes back, calls the original function, and reinstalls the jump, all
//! under the descriptor's lock. No instruction at the target is ever decoded or relocated.

use std::fmt;

use thiserror::Error;

use crate::abi::HookArgs;
use crate::addr::ForeignAddr;
use crate::code::x64::Rel32Jump;
use crate::code::{DisplacementOverflow, JumpEncoder};
use crate::patcher::{PatchError, Patcher};

mod descriptor;
mod executor;

pub use descriptor::HookDescriptor;

/// Number of bytes saved from, and written over, a hooked function's entry
pub const HOOK_WINDOW: usize = 0x30;

/// Callback run before the original function; may rewrite the arguments
pub type BeforeHook = Box<dyn Fn(&mut HookArgs) + Send + Sync>;

/// Callback run after the original function; receives the pending return value and returns the final one
pub type AfterHook = Box<dyn Fn(usize, &HookArgs) -> usize + Send + Sync>;

/// Errors that can occur while installing or running a hook
#[derive(Debug, Error)]
pub enum HookError {
    /// The destination cannot be reached from the target with the jump encoding
    #[error(transparent)]
    DisplacementOverflow(#[from] DisplacementOverflow),
    /// Writing the target failed outside of a call
    #[error("failed to patch the hook target")]
    Patch(#[from] PatchError),
    /// The original bytes could not be put back, so the original function was not called
    #[error("failed to restore the original bytes at {target}")]
    RestoreFailed {
        /// Hooked function
        target: ForeignAddr,
        /// Underlying patch error
        #[source]
        source: PatchError,
    },
    /// The call completed but the trampoline could not be reinstalled; the hook is now unarmed
    #[error("failed to reinstall the trampoline at {target}")]
    ReinstallFailed {
        /// Hooked function
        target: ForeignAddr,
        /// Return value the call produced
        value: usize,
        /// Underlying patch error
        #[source]
        source: PatchError,
    },
    /// A previous reinstall failed; [`HookDescriptor::rearm`] must succeed before the hook runs again
    #[error("hook at {0} is unarmed")]
    Unarmed(ForeignAddr),
    /// The hook was uninstalled
    #[error("hook at {0} has been uninstalled")]
    Uninstalled(ForeignAddr),
}

/// Which bytes a hook believes are live at its target.
///
/// Guarded by the descriptor's lock. Outside of a call the state is never `OriginalInstalled` unless a callback
/// panicked inside the patch window; the next call repairs that.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookState {
    /// The jump is in place; calls to the target are intercepted
    TrampolineInstalled,
    /// The original bytes are in place for the duration of a call
    OriginalInstalled,
    /// The original bytes are in place because reinstalling the jump failed
    Unarmed,
    /// The original bytes were restored for good
    Uninstalled,
}

/// Classification of the bytes read back from a hook's target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiveBytes {
    /// The saved original bytes
    Original,
    /// The trampoline bytes
    Trampoline,
    /// Neither; something else wrote to the target
    Foreign,
}

/// Configures a hook before it is installed
pub struct HookBuilder {
    /// Function to hook
    target: ForeignAddr,
    /// Callback run before the original
    before: Option<BeforeHook>,
    /// Callback run after the original
    after: Option<AfterHook>,
    /// Whether the original function is called at all
    invoke_original: bool,
}

impl HookBuilder {
    /// Starts configuring a hook on `target`. The original function is called by default.
    pub fn new(target: ForeignAddr) -> Self {
        Self {
            target,
            before: None,
            after: None,
            invoke_original: true,
        }
    }

    /// Runs `hook` before the original function. It may rewrite the arguments the original and the after hook see.
    pub fn before<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut HookArgs) + Send + Sync + 'static,
    {
        self.before = Some(Box::new(hook));
        self
    }

    /// Runs `hook` after the original function. Its result replaces the original's return value.
    pub fn after<F>(mut self, hook: F) -> Self
    where
        F: Fn(usize, &HookArgs) -> usize + Send + Sync + 'static,
    {
        self.after = Some(Box::new(hook));
        self
    }

    /// Sets whether the original function is called. When it is not, the pending return value is 0.
    pub fn invoke_original(mut self, invoke: bool) -> Self {
        self.invoke_original = invoke;
        self
    }

    /// Function this hook targets
    pub fn target(&self) -> ForeignAddr {
        self.target
    }

    /// Installs the hook with a [`Rel32Jump`] to `destination`.
    ///
    /// # Safety
    ///
    /// - The target must have [`HOOK_WINDOW`] bytes of code that `patcher` can read and write
    /// - No other thread may call the target until this returns
    /// - `destination` must be code that eventually calls [`HookDescriptor::execute`] on the returned descriptor
    ///   with the six argument registers, and the target must tolerate the six-word [`RawHookFn`](crate::abi::RawHookFn) signature
    pub unsafe fn install<P: Patcher>(
        self,
        patcher: P,
        destination: ForeignAddr,
    ) -> Result<HookDescriptor<P>, HookError> {
        self.install_with::<P, Rel32Jump>(patcher, destination)
    }

    /// Installs the hook with the jump encoding `J`.
    ///
    /// # Safety
    ///
    /// See [`HookBuilder::install`].
    pub unsafe fn install_with<P: Patcher, J: JumpEncoder>(
        self,
        patcher: P,
        destination: ForeignAddr,
    ) -> Result<HookDescriptor<P>, HookError> {
        HookDescriptor::install::<J>(self, patcher, destination)
    }
}

impl fmt::Debug for HookBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookBuilder")
            .field("target", &self.target)
            .field("before", &self.before.is_some())
            .field("after", &self.after.is_some())
            .field("invoke_original", &self.invoke_original)
            .finish()
    }
}
