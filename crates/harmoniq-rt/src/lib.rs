#![cfg_attr(not(test), warn(clippy::pedantic))]
//! Real-time safe queues used to move data out of (and into) the audio callback.
//!
//! Every channel here has exactly one producer and one consumer. Handles that are
//! meant for the audio thread (`RingProducer`, `AtomRtWriter`, `PoolProducer`,
//! `MailboxRtReader`) only expose operations that never block and never allocate;
//! the blocking counterparts live on the non-real-time handles.

pub mod atom;
pub mod diag;
pub mod mailbox;
pub mod pool;
pub mod ring;

pub use atom::*;
pub use diag::*;
pub use mailbox::*;
pub use pool::*;
pub use ring::*;
