//! The plugin application protocol: calls, pending tables, plugin facade.

pub mod call;
pub mod core;
pub mod error;
pub mod function;
pub mod plugin;
pub mod remote_plugin;
pub mod result;
pub mod subscription;
