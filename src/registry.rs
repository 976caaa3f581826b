//! # Registry
//!
//! Owns every hook a host installs, keyed by name.
//!
//! Entry shims are plain `extern "C"` functions, so they need a static to find their hook. The host keeps one
//! registry in such a static instead of one static per hook, and tears all hooks down through it.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use thiserror::Error;

use crate::abi::HookArgs;
use crate::addr::ForeignAddr;
use crate::hook::{HookBuilder, HookDescriptor, HookError, HOOK_WINDOW};
use crate::patcher::Patcher;

/// Errors from registry operations
#[derive(Debug, Error)]
pub enum RegistryError {
    /// A hook with this name already exists
    #[error("a hook named {0:?} is already registered")]
    DuplicateId(String),
    /// The target's patch window overlaps the window of a registered hook
    #[error("{target} is already hooked by {existing:?}")]
    TargetAlreadyHooked {
        /// Requested target
        target: ForeignAddr,
        /// Name of the hook already on it
        existing: String,
    },
    /// No hook with this name exists
    #[error("no hook named {0:?}")]
    UnknownHook(String),
    /// The hook itself failed
    #[error(transparent)]
    Hook(#[from] HookError),
}

/// Named collection of installed hooks sharing one patcher
pub struct HookRegistry<P: Patcher> {
    /// Patcher every hook is installed with
    patcher: P,
    /// Installed hooks by name
    hooks: RwLock<HashMap<String, Arc<HookDescriptor<P>>>>,
}

impl<P: Patcher + Clone> HookRegistry<P> {
    /// Creates an empty registry whose hooks write through `patcher`
    pub fn new(patcher: P) -> Self {
        Self {
            patcher,
            hooks: RwLock::new(HashMap::new()),
        }
    }

    /// Read access to the hook map
    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<HookDescriptor<P>>>> {
        self.hooks.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Write access to the hook map
    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<HookDescriptor<P>>>> {
        self.hooks.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Installs `builder` under `id`, jumping to `destination`.
    ///
    /// Fails without touching memory if the name is taken or the target's [`HOOK_WINDOW`] overlaps a registered
    /// hook's.
    ///
    /// # Safety
    ///
    /// See [`HookBuilder::install`]. `destination` is normally an entry shim generated by
    /// [`hook_entry!`](crate::hook_entry) for this registry and `id`.
    pub unsafe fn install(
        &self,
        id: impl Into<String>,
        builder: HookBuilder,
        destination: ForeignAddr,
    ) -> Result<Arc<HookDescriptor<P>>, RegistryError> {
        let id = id.into();
        let mut hooks = self.write();

        if hooks.contains_key(&id) {
            return Err(RegistryError::DuplicateId(id));
        }
        let target = builder.target();
        let overlaps = |hook: &HookDescriptor<P>| {
            hook.target().get().abs_diff(target.get()) < HOOK_WINDOW
        };
        if let Some((existing, _)) = hooks.iter().find(|(_, hook)| overlaps(hook)) {
            return Err(RegistryError::TargetAlreadyHooked {
                target,
                existing: existing.clone(),
            });
        }

        let hook = Arc::new(builder.install(self.patcher.clone(), destination)?);
        log::info!("registered hook {id:?} on {target}");
        hooks.insert(id, hook.clone());
        Ok(hook)
    }

    /// Looks up a hook by name
    pub fn get(&self, id: &str) -> Option<Arc<HookDescriptor<P>>> {
        self.read().get(id).cloned()
    }

    /// Runs one intercepted call of the hook named `id`
    pub fn execute(&self, id: &str, args: &mut HookArgs) -> Result<usize, RegistryError> {
        let hook = self
            .get(id)
            .ok_or_else(|| RegistryError::UnknownHook(id.to_owned()))?;
        Ok(hook.execute(args)?)
    }

    /// Runs one intercepted call, for entry shims that cannot return errors.
    ///
    /// Failures are logged. A call whose trampoline could not be reinstalled still returns its value; any other
    /// failure returns 0.
    pub fn dispatch(&self, id: &str, mut args: HookArgs) -> usize {
        match self.execute(id, &mut args) {
            Ok(value) => value,
            Err(err @ RegistryError::Hook(HookError::ReinstallFailed { value, .. })) => {
                log::error!("hook {id:?}: {err}");
                value
            }
            Err(err) => {
                log::error!("hook {id:?}: {err}");
                0
            }
        }
    }

    /// Uninstalls the hook named `id` and forgets it.
    ///
    /// Waits for an in-flight call of the hook without holding the registry lock, since that call may dispatch
    /// to other hooks. The hook stays registered if its original bytes cannot be restored.
    pub fn uninstall(&self, id: &str) -> Result<(), RegistryError> {
        let hook = self
            .get(id)
            .ok_or_else(|| RegistryError::UnknownHook(id.to_owned()))?;
        hook.uninstall()?;

        let mut hooks = self.write();
        if hooks.get(id).is_some_and(|current| Arc::ptr_eq(current, &hook)) {
            hooks.remove(id);
        }
        log::info!("unregistered hook {id:?}");
        Ok(())
    }

    /// Names of all registered hooks
    pub fn ids(&self) -> Vec<String> {
        self.read().keys().cloned().collect()
    }

    /// Number of registered hooks
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Returns true if no hooks are registered
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Uninstalls and forgets every hook, returning the first failure.
    ///
    /// Every hook is attempted even after a failure.
    pub fn shutdown(&self) -> Result<(), RegistryError> {
        let hooks: Vec<_> = self.write().drain().collect();

        let mut first_error = None;
        for (id, hook) in hooks {
            if let Err(e) = hook.uninstall() {
                log::error!("failed to uninstall hook {id:?}: {e}");
                first_error.get_or_insert(RegistryError::Hook(e));
            }
        }
        log::info!("hook registry shut down");

        first_error.map_or(Ok(()), Err)
    }
}

impl<P: Patcher> Drop for HookRegistry<P> {
    fn drop(&mut self) {
        let hooks = self.hooks.get_mut().unwrap_or_else(PoisonError::into_inner);
        for (id, hook) in hooks.drain() {
            if let Err(e) = hook.uninstall() {
                log::error!("failed to uninstall hook {id:?} on drop: {e}");
            }
        }
    }
}
