//! Line-oriented duplex pipe transport between a host and a helper process.
//!
//! The server side spawns the helper and talks to it over its standard streams;
//! the helper uses [`PipeClient`] on the other end. Every message is a single
//! newline terminated line of space separated tokens.

mod channel;
mod client;
mod config;
mod error;
mod handshake;
pub mod line;
mod server;

pub use channel::{PipeChannel, PipeHandler, PipeState, PipeWriter};
pub use client::PipeClient;
pub use config::PipeConfig;
pub use error::PipeError;
pub use line::{Fields, LineError, LineSplitter};
pub use server::PipeServer;
