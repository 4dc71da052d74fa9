//! meshchat-core — shared types, wire format, and configuration.
//! All other meshchat crates depend on this one.

pub mod config;
pub mod message;
pub mod wire;

pub use message::{now_secs, ChatMessage};
pub use wire::{Frame, FrameBuffer, ProtocolError};
