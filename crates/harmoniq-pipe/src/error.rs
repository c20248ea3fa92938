use std::io;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipeError {
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("`{program}` did not report ready within {timeout:?}")]
    StartupTimeout { program: String, timeout: Duration },
    #[error("no line received within {0:?}")]
    ReadTimeout(Duration),
    #[error("handshake `{action}` got no reply within {timeout:?}")]
    HandshakeTimeout { action: String, timeout: Duration },
    #[error("pipe is closed")]
    Closed,
    #[error("expected {expected}, got `{line}`")]
    Parse { expected: &'static str, line: String },
    #[error(transparent)]
    Io(#[from] io::Error),
}
