//! Line framing and token helpers shared by both ends of a pipe.

use std::borrow::Cow;
use std::mem;
use std::str::FromStr;

use thiserror::Error;

use crate::error::PipeError;

/// Closes the receiving side.
pub const QUIT: &str = "quit";
/// Sent by a client that is about to exit on its own.
pub const EXITING: &str = "exiting";
pub const SHOW: &str = "show";
pub const HIDE: &str = "hide";
pub const FOCUS: &str = "focus";
pub const IDLE: &str = "idle";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LineError {
    #[error("line exceeds {limit} bytes")]
    TooLong { limit: usize },
    #[error("line is not valid UTF-8")]
    InvalidUtf8,
}

/// Reassembles newline terminated lines from arbitrary read chunks.
#[derive(Debug)]
pub struct LineSplitter {
    pending: Vec<u8>,
    max_len: usize,
    overflowed: bool,
}

impl LineSplitter {
    pub fn new(max_len: usize) -> Self {
        Self {
            pending: Vec::new(),
            max_len,
            overflowed: false,
        }
    }

    /// Feeds one chunk, handing every completed line to `sink`.
    ///
    /// Carriage returns inside a line are turned back into newlines, undoing
    /// [`sanitize`] on the sending side.
    pub fn push<F>(&mut self, chunk: &[u8], mut sink: F)
    where
        F: FnMut(Result<String, LineError>),
    {
        let mut rest = chunk;
        while let Some(pos) = rest.iter().position(|&byte| byte == b'\n') {
            self.extend(&rest[..pos]);
            sink(self.take_line());
            rest = &rest[pos + 1..];
        }
        self.extend(rest);
    }

    /// Drops a trailing unterminated line, returning its length if there was one.
    pub fn finish(&mut self) -> Option<usize> {
        let leftover = self.pending.len();
        let had_data = leftover > 0 || self.overflowed;
        self.pending.clear();
        self.overflowed = false;
        had_data.then_some(leftover)
    }

    fn extend(&mut self, bytes: &[u8]) {
        if self.overflowed || bytes.is_empty() {
            return;
        }
        if self.pending.len() + bytes.len() > self.max_len {
            self.overflowed = true;
            self.pending = Vec::new();
        } else {
            self.pending.extend_from_slice(bytes);
        }
    }

    fn take_line(&mut self) -> Result<String, LineError> {
        if mem::take(&mut self.overflowed) {
            return Err(LineError::TooLong {
                limit: self.max_len,
            });
        }
        let bytes = mem::take(&mut self.pending);
        let line = String::from_utf8(bytes).map_err(|_| LineError::InvalidUtf8)?;
        Ok(if line.contains('\r') {
            line.replace('\r', "\n")
        } else {
            line
        })
    }
}

/// Makes arbitrary text safe to send as a single line.
pub fn sanitize(text: &str) -> Cow<'_, str> {
    if text.contains('\n') {
        Cow::Owned(text.replace('\n', "\r"))
    } else {
        Cow::Borrowed(text)
    }
}

/// Splits a line into its command word and the remainder.
pub fn split_command(line: &str) -> (&str, &str) {
    match line.split_once(' ') {
        Some((command, rest)) => (command, rest),
        None => (line, ""),
    }
}

pub fn parse_bool(token: &str) -> Option<bool> {
    match token {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}

/// Cursor over the space separated arguments of a message.
#[derive(Debug, Clone)]
pub struct Fields<'a> {
    line: &'a str,
    rest: &'a str,
}

impl<'a> Fields<'a> {
    pub fn new(line: &'a str) -> Self {
        Self { line, rest: line }
    }

    pub fn next_str(&mut self) -> Result<&'a str, PipeError> {
        let trimmed = self.rest.trim_start_matches(' ');
        if trimmed.is_empty() {
            return Err(self.error("another argument"));
        }
        let (token, rest) = split_command(trimmed);
        self.rest = rest;
        Ok(token)
    }

    pub fn next<T: FromStr>(&mut self, expected: &'static str) -> Result<T, PipeError> {
        let token = self.next_str()?;
        token.parse().map_err(|_| self.error(expected))
    }

    pub fn next_bool(&mut self) -> Result<bool, PipeError> {
        let token = self.next_str()?;
        parse_bool(token).ok_or_else(|| self.error("true or false"))
    }

    /// Everything after the arguments consumed so far, spaces included.
    pub fn rest(&self) -> &'a str {
        self.rest
    }

    fn error(&self, expected: &'static str) -> PipeError {
        PipeError::Parse {
            expected,
            line: self.line.to_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn collect(splitter: &mut LineSplitter, chunk: &[u8]) -> Vec<Result<String, LineError>> {
        let mut out = Vec::new();
        splitter.push(chunk, |line| out.push(line));
        out
    }

    #[test]
    fn lines_are_reassembled_across_chunks() {
        let mut splitter = LineSplitter::new(64);
        assert!(collect(&mut splitter, b"cont").is_empty());
        assert_eq!(
            collect(&mut splitter, b"rol 1 0.5\nshow\nhi"),
            vec![Ok("control 1 0.5".to_owned()), Ok("show".to_owned())]
        );
        assert_eq!(collect(&mut splitter, b"de\n"), vec![Ok("hide".to_owned())]);
        assert_eq!(splitter.finish(), None);
    }

    #[test]
    fn over_long_line_is_reported_once_and_skipped() {
        let mut splitter = LineSplitter::new(4);
        assert!(collect(&mut splitter, b"abc").is_empty());
        assert!(collect(&mut splitter, b"defgh").is_empty());
        assert_eq!(
            collect(&mut splitter, b"ij\nok\n"),
            vec![Err(LineError::TooLong { limit: 4 }), Ok("ok".to_owned())]
        );
    }

    #[test]
    fn invalid_utf8_is_rejected() {
        let mut splitter = LineSplitter::new(16);
        assert_eq!(
            collect(&mut splitter, b"\xff\xfe\nnext\n"),
            vec![Err(LineError::InvalidUtf8), Ok("next".to_owned())]
        );
    }

    #[test]
    fn sanitized_text_round_trips() {
        let fixed = sanitize("error two\nlines");
        assert_eq!(fixed, "error two\rlines");
        let mut splitter = LineSplitter::new(64);
        let line = format!("{fixed}\n");
        assert_eq!(
            collect(&mut splitter, line.as_bytes()),
            vec![Ok("error two\nlines".to_owned())]
        );
    }

    #[test]
    fn unterminated_tail_is_reported() {
        let mut splitter = LineSplitter::new(16);
        collect(&mut splitter, b"partial");
        assert_eq!(splitter.finish(), Some(7));
    }

    #[test]
    fn fields_parse_typed_arguments() {
        let mut fields = Fields::new("3 0.25 true label with spaces");
        assert_eq!(fields.next::<u32>("an index").unwrap(), 3);
        assert_eq!(fields.next::<f32>("a value").unwrap(), 0.25);
        assert!(fields.next_bool().unwrap());
        assert_eq!(fields.rest(), "label with spaces");
    }

    #[test]
    fn fields_report_bad_arguments() {
        let mut fields = Fields::new("x");
        let err = fields.next::<i32>("an integer").unwrap_err();
        assert!(matches!(err, PipeError::Parse { expected: "an integer", .. }));
        assert!(fields.next_str().is_err());
    }
}
