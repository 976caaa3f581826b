#![warn(clippy::missing_docs_in_private_items)]
#![warn(rustdoc::missing_crate_level_docs)]
#![doc = include_str!("../README.md")]

pub mod abi;
pub mod addr;
#[cfg(target_os = "linux")]
pub mod arena;
pub mod code;
pub mod hook;
pub mod patcher;
pub mod registry;

#[cfg(test)]
mod testing;

pub use addr::ForeignAddr;
pub use hook::{HookBuilder, HookDescriptor, HookError, HookState};
pub use registry::{HookRegistry, RegistryError};
