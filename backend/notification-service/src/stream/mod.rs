/// Live notification stream (server-sent events)
///
/// Architecture:
/// 1. BroadcastBus: one shared fan-out channel
/// 2. ConnectionRegistry: client ids, targeted/broadcast delivery, lifecycle
/// 3. ClientSession: per-connection stream with keepalive pings
pub mod bus;
pub mod messages;
pub mod registry;

pub use bus::BroadcastBus;
pub use messages::{ClientId, IngestedPostView, StreamFrame, StreamMessage};
pub use registry::{ClientSession, ConnectionRegistry, RegistryStats, SessionState};
