//! Out-of-process plugin bridge.
//!
//! [`BridgeHost`] runs inside the host: it spawns the bridge binary, relays
//! parameter changes queued by the audio thread through an [`RtPort`] and feeds
//! notes played on the bridge side back into a real-time mailbox.
//! [`BridgeServer`] is the other end, living in the bridge process.

pub mod ipc;
pub mod relay;
pub mod server;

pub use ipc::*;
pub use relay::*;
pub use server::*;
