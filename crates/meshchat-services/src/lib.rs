//! meshchat-services — the stateful pieces shared by the daemon and the API:
//! channel logs, the rendezvous registry, the connection table, and the
//! peer node that ties links to the local mirror.

pub mod channel_log;
pub mod link;
pub mod node;
pub mod registry;

pub use channel_log::{ChannelLog, ChannelStore};
pub use link::{ConnectionTable, Direction, LinkHandle, LinkId, LinkSummary};
pub use node::{initiates, FrameEffect, MirroredMessage, PeerNode, SendReport};
pub use registry::{JoinView, PeerEndpoint, PeerRecord, Registry, RegistryError};
