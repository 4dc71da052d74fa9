//! CLI command modules.

pub mod chat;
pub mod http;
pub mod registry;
