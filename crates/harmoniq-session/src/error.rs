use std::fmt;

use harmoniq_pipe::PipeError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure codes carried by `error <opcode> <code> <message>` lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    General,
    IncompatibleApi,
    Blacklisted,
    LaunchFailed,
    NoSuchFile,
    NoSessionOpen,
    UnsavedChanges,
    NotNow,
    BadProject,
    CreateFailed,
}

impl ErrorCode {
    pub fn code(self) -> i32 {
        match self {
            ErrorCode::General => -1,
            ErrorCode::IncompatibleApi => -2,
            ErrorCode::Blacklisted => -3,
            ErrorCode::LaunchFailed => -4,
            ErrorCode::NoSuchFile => -5,
            ErrorCode::NoSessionOpen => -6,
            ErrorCode::UnsavedChanges => -7,
            ErrorCode::NotNow => -8,
            ErrorCode::BadProject => -9,
            ErrorCode::CreateFailed => -10,
        }
    }

    /// Unknown codes collapse to `General`.
    pub fn from_code(code: i32) -> Self {
        match code {
            -2 => ErrorCode::IncompatibleApi,
            -3 => ErrorCode::Blacklisted,
            -4 => ErrorCode::LaunchFailed,
            -5 => ErrorCode::NoSuchFile,
            -6 => ErrorCode::NoSessionOpen,
            -7 => ErrorCode::UnsavedChanges,
            -8 => ErrorCode::NotNow,
            -9 => ErrorCode::BadProject,
            -10 => ErrorCode::CreateFailed,
            _ => ErrorCode::General,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// A lifecycle operation the application could not complete.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} ({code})")]
pub struct OpFailure {
    pub code: ErrorCode,
    pub message: String,
}

impl OpFailure {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Pipe(#[from] PipeError),
    #[error("session manager rejected `{opcode}`: {failure}")]
    Rejected { opcode: String, failure: OpFailure },
}
