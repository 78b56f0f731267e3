//! Tool catalog — typed tool descriptors and in-process built-in tools.
//!
//! The runtime only ever sees a [`ToolCatalog`]: an external plugin loader (or
//! the CLI) registers [`ToolDescriptor`]s at startup and the reasoning tiers
//! invoke them through their [`ToolCapability`] handle.

pub mod builtin;
pub mod errors;
pub mod registry;

pub use builtin::register_builtin_tools;
pub use errors::ToolError;
pub use registry::{ToolCapability, ToolCatalog, ToolDescriptor};
