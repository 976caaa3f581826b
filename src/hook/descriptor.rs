//! Per-hook state and installation

use std::fmt;
use std::sync::{Mutex, PoisonError};

use crate::addr::ForeignAddr;
use crate::code::JumpEncoder;
use crate::patcher::Patcher;

use super::{AfterHook, BeforeHook, HookBuilder, HookError, HookState, HOOK_WINDOW};

/// An installed hook.
///
/// Owns the bytes saved from the target, the trampoline written over it, the callbacks, and the lock that
/// serializes every write to the target after installation. Dropping an armed descriptor puts the original
/// bytes back.
pub struct HookDescriptor<P: Patcher> {
    /// Hooked function
    pub(super) target: ForeignAddr,
    /// Bytes found at `target` when the hook was installed
    pub(super) original: [u8; HOOK_WINDOW],
    /// Jump to the interception routine, followed by the original tail
    pub(super) trampoline: [u8; HOOK_WINDOW],
    /// Callback run before the original
    pub(super) before: Option<BeforeHook>,
    /// Callback run after the original
    pub(super) after: Option<AfterHook>,
    /// Whether the original is called
    pub(super) invoke_original: bool,
    /// Backend for every read and write of `target`
    pub(super) patcher: P,
    /// Exclusion lock, guarding which bytes are live
    pub(super) state: Mutex<HookState>,
}

impl<P: Patcher> HookDescriptor<P> {
    /// Snapshots the target, builds the trampoline and writes it.
    ///
    /// Nothing is written unless the jump can be encoded, and on error no descriptor (and so no lock) exists.
    pub(super) unsafe fn install<J: JumpEncoder>(
        builder: HookBuilder,
        patcher: P,
        destination: ForeignAddr,
    ) -> Result<Self, HookError> {
        let HookBuilder {
            target,
            before,
            after,
            invoke_original,
        } = builder;

        let mut original = [0u8; HOOK_WINDOW];
        patcher.read(target, &mut original)?;

        let mut trampoline = original;
        J::encode(target, destination, &mut trampoline)?;

        patcher.patch(target, &trampoline)?;
        log::debug!("installed hook at {target} jumping to {destination}");

        Ok(Self {
            target,
            original,
            trampoline,
            before,
            after,
            invoke_original,
            patcher,
            state: Mutex::new(HookState::TrampolineInstalled),
        })
    }

    /// Hooked function
    pub fn target(&self) -> ForeignAddr {
        self.target
    }

    /// Bytes found at the target at installation
    pub fn original_bytes(&self) -> &[u8; HOOK_WINDOW] {
        &self.original
    }

    /// Bytes written over the target while the hook is armed
    pub fn trampoline_bytes(&self) -> &[u8; HOOK_WINDOW] {
        &self.trampoline
    }

    /// Whether the original function is called
    pub fn invokes_original(&self) -> bool {
        self.invoke_original
    }

    /// The patcher this hook writes with
    pub fn patcher(&self) -> &P {
        &self.patcher
    }
}

impl<P: Patcher> Drop for HookDescriptor<P> {
    fn drop(&mut self) {
        let state = *self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if state != HookState::TrampolineInstalled {
            return;
        }

        // Safety: installation established that the target is patchable for the window
        match unsafe { self.patcher.patch(self.target, &self.original) } {
            Ok(()) => log::debug!("restored {} on drop", self.target),
            Err(e) => log::error!("failed to restore {} on drop: {e}", self.target),
        }
    }
}

impl<P: Patcher> fmt::Debug for HookDescriptor<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookDescriptor")
            .field("target", &self.target)
            .field("before", &self.before.is_some())
            .field("after", &self.after.is_some())
            .field("invoke_original", &self.invoke_original)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}
