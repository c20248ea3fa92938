//! Session-manager link for a running application.
//!
//! The application announces itself over its pipe and then serves the
//! manager's lifecycle requests (open, save, GUI visibility) through a
//! [`SessionHandler`].

mod error;
mod link;
pub mod protocol;

pub use error::{ErrorCode, OpFailure, SessionError};
pub use link::{SessionHandler, SessionLink};
pub use protocol::{ClientInfo, ManagerFeatures, ManagerReply, SessionRequest};
