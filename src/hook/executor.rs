//! Runtime side of a hook: every intercepted call goes through [`HookDescriptor::execute`]

use std::sync::MutexGuard;

use crate::abi::{call_raw, HookArgs};
use crate::patcher::{PatchError, Patcher};

use super::{HookDescriptor, HookError, HookState, LiveBytes, HOOK_WINDOW};

impl<P: Patcher> HookDescriptor<P> {
    /// Acquires the exclusion lock, recovering it if a callback panicked while holding it
    fn lock_state(&self) -> MutexGuard<'_, HookState> {
        self.state.lock().unwrap_or_else(|poisoned| {
            log::warn!("hook at {} recovered after a panicking callback", self.target);
            self.state.clear_poison();
            poisoned.into_inner()
        })
    }

    /// Writes `bytes` over the target
    fn write(&self, bytes: &[u8; HOOK_WINDOW]) -> Result<(), PatchError> {
        // Safety: installation established that the target is patchable for the window, and the caller holds
        // the lock so no other writer races us
        unsafe { self.patcher.patch(self.target, bytes) }
    }

    /// Runs one intercepted call.
    ///
    /// Holds the lock for the whole call: runs the before hook, puts the original bytes back, calls the original
    /// (unless disabled, in which case the pending value is 0), runs the after hook, and reinstalls the
    /// trampoline. Concurrent callers of the same hook are serialized for the duration, including the original
    /// function itself.
    ///
    /// If the original bytes cannot be restored the call is abandoned and the trampoline is rewritten. If the
    /// trampoline cannot be reinstalled the hook becomes [`HookState::Unarmed`] and the call's value is returned
    /// inside [`HookError::ReinstallFailed`].
    pub fn execute(&self, args: &mut HookArgs) -> Result<usize, HookError> {
        let mut state = self.lock_state();
        match *state {
            HookState::TrampolineInstalled => {}
            HookState::OriginalInstalled => {
                // a callback panicked inside the last call's patch window
                if let Err(e) = self.write(&self.trampoline) {
                    *state = HookState::Unarmed;
                    return Err(e.into());
                }
                *state = HookState::TrampolineInstalled;
            }
            HookState::Unarmed => return Err(HookError::Unarmed(self.target)),
            HookState::Uninstalled => return Err(HookError::Uninstalled(self.target)),
        }

        if let Some(before) = &self.before {
            before(args);
        }

        if let Err(source) = self.write(&self.original) {
            log::error!("failed to restore {}: {source}", self.target);
            if let Err(e) = self.write(&self.trampoline) {
                log::error!("failed to rewrite trampoline at {}: {e}", self.target);
                *state = HookState::Unarmed;
            }
            return Err(HookError::RestoreFailed {
                target: self.target,
                source,
            });
        }
        *state = HookState::OriginalInstalled;

        let pending = if self.invoke_original {
            // Safety: the original bytes are live, and installation's contract makes the target callable
            unsafe { call_raw(self.target, args) }
        } else {
            0
        };
        let value = match &self.after {
            Some(after) => after(pending, args),
            None => pending,
        };

        if let Err(source) = self.write(&self.trampoline) {
            log::error!("failed to reinstall trampoline at {}: {source}", self.target);
            *state = HookState::Unarmed;
            return Err(HookError::ReinstallFailed {
                target: self.target,
                value,
                source,
            });
        }
        *state = HookState::TrampolineInstalled;

        Ok(value)
    }

    /// Reinstalls the trampoline of an unarmed hook. Does nothing if the hook is armed.
    pub fn rearm(&self) -> Result<(), HookError> {
        let mut state = self.lock_state();
        match *state {
            HookState::TrampolineInstalled => Ok(()),
            HookState::Uninstalled => Err(HookError::Uninstalled(self.target)),
            HookState::OriginalInstalled | HookState::Unarmed => {
                self.write(&self.trampoline)?;
                *state = HookState::TrampolineInstalled;
                log::debug!("rearmed hook at {}", self.target);
                Ok(())
            }
        }
    }

    /// Puts the original bytes back for good. Waits for an in-flight call to finish first.
    pub fn uninstall(&self) -> Result<(), HookError> {
        let mut state = self.lock_state();
        if *state == HookState::Uninstalled {
            return Ok(());
        }

        self.write(&self.original)?;
        *state = HookState::Uninstalled;
        log::debug!("uninstalled hook at {}", self.target);
        Ok(())
    }

    /// Current state. Blocks while a call is in flight.
    pub fn state(&self) -> HookState {
        *self.lock_state()
    }

    /// Reads the target back and classifies it. Blocks while a call is in flight.
    pub fn live_bytes(&self) -> Result<LiveBytes, PatchError> {
        let _state = self.lock_state();

        let mut live = [0u8; HOOK_WINDOW];
        // Safety: installation established that the target is readable for the window
        unsafe { self.patcher.read(self.target, &mut live)? };

        Ok(if live == self.trampoline {
            LiveBytes::Trampoline
        } else if live == self.original {
            LiveBytes::Original
        } else {
            LiveBytes::Foreign
        })
    }
}
