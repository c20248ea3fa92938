//! Out-of-process plugin discovery.
//!
//! Candidate binaries are collected per plugin type and handed one by one to a
//! probe process that describes the plugins inside on a line pipe. A probe
//! that hangs or crashes costs one candidate, never the scan.

mod discovery;
mod info;
mod probe;
mod scan;
mod wine;

pub use discovery::*;
pub use info::*;
pub use probe::*;
pub use scan::*;
pub use wine::*;
