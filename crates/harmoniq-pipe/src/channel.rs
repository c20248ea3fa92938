use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::{Mutex, MutexGuard};

use crate::config::PipeConfig;
use crate::error::PipeError;
use crate::handshake::HandshakeRegistry;
use crate::line::{self, LineSplitter, EXITING, QUIT};

const READ_CHUNK: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PipeState {
    NotStarted = 0,
    Running = 1,
    Closing = 2,
    Closed = 3,
    Crashed = 4,
}

impl PipeState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => PipeState::NotStarted,
            1 => PipeState::Running,
            2 => PipeState::Closing,
            3 => PipeState::Closed,
            _ => PipeState::Crashed,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, PipeState::Closed | PipeState::Crashed)
    }
}

/// Receives messages from a pipe, one method per event.
pub trait PipeHandler {
    /// Called for every incoming line. Return `false` for lines the handler
    /// does not understand; they are logged and dropped.
    fn message_received(&mut self, line: &str) -> bool;

    /// Called exactly once when the session ends, cleanly or not.
    fn pipe_closed(&mut self, _state: PipeState) {}
}

pub(crate) enum Incoming {
    Line(String),
    Eof,
}

struct Shared {
    state: AtomicU8,
    closed_notified: AtomicBool,
    peer_exiting: AtomicBool,
    handshakes: HandshakeRegistry,
}

struct WriterState {
    sink: Option<Box<dyn Write + Send>>,
    batch: Vec<u8>,
    last_failed: bool,
}

/// One duplex line session: a background reader plus a lock-protected writer.
///
/// Incoming lines are either dispatched to a [`PipeHandler`] by [`idle`](Self::idle)
/// or pulled one at a time with [`read_line`](Self::read_line).
pub struct PipeChannel {
    shared: Arc<Shared>,
    writer: Mutex<WriterState>,
    incoming: Receiver<Incoming>,
    reader: Option<JoinHandle<()>>,
    config: PipeConfig,
    label: String,
}

impl PipeChannel {
    pub fn new<R, W>(
        source: R,
        sink: W,
        config: PipeConfig,
        label: impl Into<String>,
    ) -> Result<Self, PipeError>
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        let label = label.into();
        let shared = Arc::new(Shared {
            state: AtomicU8::new(PipeState::NotStarted as u8),
            closed_notified: AtomicBool::new(false),
            peer_exiting: AtomicBool::new(false),
            handshakes: HandshakeRegistry::default(),
        });
        let (tx, rx) = crossbeam_channel::unbounded();
        let reader = {
            let shared = Arc::clone(&shared);
            let label = label.clone();
            let max_len = config.max_line_len;
            thread::Builder::new()
                .name(format!("pipe-reader {label}"))
                .spawn(move || reader_loop(source, &tx, &shared, max_len, &label))?
        };
        Ok(Self {
            shared,
            writer: Mutex::new(WriterState {
                sink: Some(Box::new(sink)),
                batch: Vec::new(),
                last_failed: false,
            }),
            incoming: rx,
            reader: Some(reader),
            config,
            label,
        })
    }

    pub fn config(&self) -> &PipeConfig {
        &self.config
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn state(&self) -> PipeState {
        PipeState::from_u8(self.shared.state.load(Ordering::Acquire))
    }

    pub fn is_closed(&self) -> bool {
        self.state().is_terminal()
    }

    /// Whether the remote side announced it is exiting on its own.
    pub fn peer_exiting(&self) -> bool {
        self.shared.peer_exiting.load(Ordering::Acquire)
    }

    /// Moves to `to` unless the session already ended.
    pub(crate) fn transition(&self, to: PipeState) {
        let mut current = self.shared.state.load(Ordering::Acquire);
        loop {
            if PipeState::from_u8(current).is_terminal() {
                return;
            }
            match self.shared.state.compare_exchange(
                current,
                to as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
        if to.is_terminal() {
            self.shared.handshakes.close();
            tracing::debug!(pipe = %self.label, state = ?to, "pipe session ended");
        }
    }

    /// End of the read stream. Expected while closing or after `exiting`.
    fn reader_finished(&self) {
        let state = if self.state() == PipeState::Closing || self.peer_exiting() {
            PipeState::Closed
        } else {
            tracing::warn!(pipe = %self.label, "pipe closed unexpectedly");
            PipeState::Crashed
        };
        self.transition(state);
    }

    /// Dispatches every line received so far. Returns how many reached `handler`.
    pub fn idle<H: PipeHandler + ?Sized>(&self, handler: &mut H) -> usize {
        let mut dispatched = 0;
        while let Ok(incoming) = self.incoming.try_recv() {
            if !self.dispatch(incoming, handler, &mut dispatched) {
                break;
            }
        }
        self.notify_if_closed(handler);
        dispatched
    }

    /// Like [`idle`](Self::idle) but waits up to `timeout` for the first line.
    pub fn idle_timeout<H: PipeHandler + ?Sized>(&self, handler: &mut H, timeout: Duration) -> usize {
        let mut dispatched = 0;
        if let Ok(incoming) = self.incoming.recv_timeout(timeout) {
            if self.dispatch(incoming, handler, &mut dispatched) {
                dispatched += self.idle(handler);
                return dispatched;
            }
        }
        self.notify_if_closed(handler);
        dispatched
    }

    fn dispatch<H: PipeHandler + ?Sized>(
        &self,
        incoming: Incoming,
        handler: &mut H,
        dispatched: &mut usize,
    ) -> bool {
        let line = match incoming {
            Incoming::Eof => {
                self.reader_finished();
                return false;
            }
            Incoming::Line(line) => line,
        };
        if line.is_empty() || self.is_closed() {
            return true;
        }
        if line == QUIT {
            tracing::debug!(pipe = %self.label, "peer asked to quit");
            self.transition(PipeState::Closed);
            return false;
        }
        if line == EXITING {
            self.shared.peer_exiting.store(true, Ordering::Release);
        }
        *dispatched += 1;
        if !handler.message_received(&line) {
            tracing::debug!(pipe = %self.label, %line, "unhandled pipe message");
        }
        true
    }

    /// Fires [`PipeHandler::pipe_closed`] the first time the session is seen ended.
    pub fn notify_if_closed<H: PipeHandler + ?Sized>(&self, handler: &mut H) {
        let state = self.state();
        if state.is_terminal() && !self.shared.closed_notified.swap(true, Ordering::AcqRel) {
            handler.pipe_closed(state);
        }
    }

    fn next_line(&self, timeout: Duration, skip_empty: bool) -> Result<String, PipeError> {
        loop {
            match self.incoming.recv_timeout(timeout) {
                Ok(Incoming::Line(line)) if line.is_empty() && skip_empty => continue,
                Ok(Incoming::Line(line)) if line == QUIT => {
                    self.transition(PipeState::Closed);
                    return Err(PipeError::Closed);
                }
                Ok(Incoming::Line(line)) => return Ok(line),
                Ok(Incoming::Eof) | Err(RecvTimeoutError::Disconnected) => {
                    self.reader_finished();
                    return Err(PipeError::Closed);
                }
                Err(RecvTimeoutError::Timeout) => return Err(PipeError::ReadTimeout(timeout)),
            }
        }
    }

    pub(crate) fn first_line(&self, timeout: Duration) -> Result<String, PipeError> {
        self.next_line(timeout, false)
    }

    /// Blocks for the next non-empty line.
    pub fn read_line(&self, timeout: Duration) -> Result<String, PipeError> {
        self.next_line(timeout, true)
    }

    pub fn read_line_as_bool(&self, timeout: Duration) -> Result<bool, PipeError> {
        let line = self.read_line(timeout)?;
        line::parse_bool(&line).ok_or(PipeError::Parse {
            expected: "true or false",
            line,
        })
    }

    pub fn read_line_as_byte(&self, timeout: Duration) -> Result<u8, PipeError> {
        self.read_parsed(timeout, "a byte")
    }

    pub fn read_line_as_int(&self, timeout: Duration) -> Result<i32, PipeError> {
        self.read_parsed(timeout, "an integer")
    }

    pub fn read_line_as_uint(&self, timeout: Duration) -> Result<u32, PipeError> {
        self.read_parsed(timeout, "an unsigned integer")
    }

    pub fn read_line_as_long(&self, timeout: Duration) -> Result<i64, PipeError> {
        self.read_parsed(timeout, "a long integer")
    }

    pub fn read_line_as_ulong(&self, timeout: Duration) -> Result<u64, PipeError> {
        self.read_parsed(timeout, "an unsigned long integer")
    }

    pub fn read_line_as_float(&self, timeout: Duration) -> Result<f32, PipeError> {
        self.read_parsed(timeout, "a float")
    }

    pub fn read_line_as_double(&self, timeout: Duration) -> Result<f64, PipeError> {
        self.read_parsed(timeout, "a double")
    }

    fn read_parsed<T: std::str::FromStr>(
        &self,
        timeout: Duration,
        expected: &'static str,
    ) -> Result<T, PipeError> {
        let line = self.read_line(timeout)?;
        line.trim()
            .parse()
            .map_err(|_| PipeError::Parse { expected, line })
    }

    /// Waits for the remote `quit` (or end of stream) while discarding other lines.
    pub(crate) fn wait_for_quit(&self, attempts: usize, interval: Duration) -> bool {
        for _ in 0..attempts {
            match self.incoming.recv_timeout(interval) {
                Ok(Incoming::Line(line)) if line == QUIT => {
                    self.transition(PipeState::Closed);
                    return true;
                }
                Ok(Incoming::Line(_)) | Err(RecvTimeoutError::Timeout) => {}
                Ok(Incoming::Eof) | Err(RecvTimeoutError::Disconnected) => {
                    self.transition(PipeState::Closed);
                    return true;
                }
            }
        }
        false
    }

    /// Takes the write lock. Messages written through the guard reach the peer
    /// as one contiguous batch on [`PipeWriter::sync`].
    pub fn lock(&self) -> PipeWriter<'_> {
        PipeWriter {
            state: self.writer.lock(),
            label: &self.label,
        }
    }

    /// Writes a single line and flushes it.
    pub fn write_message(&self, message: &str) -> bool {
        let mut writer = self.lock();
        writer.write_message(message) && writer.sync_and_unlock()
    }

    /// Writes `text` with embedded newlines folded, then flushes it.
    pub fn write_and_fix_message(&self, text: &str) -> bool {
        let mut writer = self.lock();
        writer.write_and_fix_message(text);
        writer.sync_and_unlock()
    }

    pub fn write_error(&self, text: &str) -> bool {
        self.write_and_fix_message(&format!("error {text}"))
    }

    pub fn write_control(&self, index: u32, value: f32) -> bool {
        self.write_message(&format!("control {index} {value}"))
    }

    pub fn write_configure(&self, key: &str, value: &str) -> bool {
        if key.is_empty() || key.contains(char::is_whitespace) {
            tracing::warn!(pipe = %self.label, key, "configure key must be a single token");
            return false;
        }
        self.write_and_fix_message(&format!("configure {key} {value}"))
    }

    pub fn write_program(&self, index: u32) -> bool {
        self.write_message(&format!("program {index}"))
    }

    pub fn write_bank_program(&self, channel: u8, bank: u32, program: u32) -> bool {
        self.write_message(&format!("bankprogram {channel} {bank} {program}"))
    }

    pub fn write_midi_program(&self, bank: u32, program: u32) -> bool {
        self.write_message(&format!("midiprogram {bank} {program}"))
    }

    pub fn write_reload_programs(&self, index: i32) -> bool {
        self.write_message(&format!("reloadprograms {index}"))
    }

    pub fn write_midi_note(&self, on: bool, channel: u8, note: u8, velocity: u8) -> bool {
        self.write_message(&format!("note {on} {channel} {note} {velocity}"))
    }

    /// Sends `message` and waits for a line starting with one of `replies`.
    ///
    /// On timeout the action is abandoned and reported; the session keeps running.
    pub fn request(
        &self,
        action: &str,
        message: &str,
        replies: &[&str],
        timeout: Duration,
    ) -> Result<String, PipeError> {
        let id = self.shared.handshakes.open(action, replies)?;
        if !self.write_message(message) {
            self.shared.handshakes.cancel(id);
            return Err(PipeError::Closed);
        }
        self.shared.handshakes.wait(id, timeout)
    }

    /// [`request`](Self::request) bounded by the configured handshake timeout.
    pub fn request_default(
        &self,
        action: &str,
        message: &str,
        replies: &[&str],
    ) -> Result<String, PipeError> {
        self.request(action, message, replies, self.config.handshake_timeout)
    }

    pub fn pending_handshakes(&self) -> usize {
        self.shared.handshakes.pending_count()
    }

    /// Drops the write end so the peer sees end of stream.
    pub fn close_writer(&self) {
        let mut state = self.writer.lock();
        state.batch.clear();
        state.sink = None;
    }
}

impl Drop for PipeChannel {
    fn drop(&mut self) {
        self.close_writer();
        if let Some(reader) = self.reader.take() {
            // A peer that keeps its end open would block a join forever.
            if reader.is_finished() {
                let _ = reader.join();
            }
        }
    }
}

/// Write lock on a [`PipeChannel`]. Unsent messages are flushed on drop.
pub struct PipeWriter<'a> {
    state: MutexGuard<'a, WriterState>,
    label: &'a str,
}

impl PipeWriter<'_> {
    /// Queues one line. `message` must not contain line breaks.
    pub fn write_message(&mut self, message: &str) -> bool {
        if message.contains(['\n', '\r']) {
            tracing::warn!(pipe = %self.label, %message, "refusing to send multi-line message");
            return false;
        }
        self.push(message);
        true
    }

    /// Queues `text`, folding embedded newlines so it stays one line.
    pub fn write_and_fix_message(&mut self, text: &str) {
        let fixed = line::sanitize(text);
        self.push(&fixed);
    }

    fn push(&mut self, message: &str) {
        self.state.batch.extend_from_slice(message.as_bytes());
        self.state.batch.push(b'\n');
    }

    /// Writes the queued batch and flushes the OS pipe.
    pub fn sync(&mut self) -> bool {
        let state = &mut *self.state;
        if state.batch.is_empty() {
            return true;
        }
        let result = match state.sink.as_mut() {
            Some(sink) => sink.write_all(&state.batch).and_then(|()| sink.flush()),
            None => Err(io::Error::new(io::ErrorKind::BrokenPipe, "writer closed")),
        };
        state.batch.clear();
        match result {
            Ok(()) => {
                state.last_failed = false;
                true
            }
            Err(err) => {
                if !state.last_failed {
                    tracing::warn!(pipe = %self.label, %err, "pipe write failed");
                }
                state.last_failed = true;
                false
            }
        }
    }

    pub fn sync_and_unlock(mut self) -> bool {
        self.sync()
    }
}

impl Drop for PipeWriter<'_> {
    fn drop(&mut self) {
        if !self.state.batch.is_empty() {
            self.sync();
        }
    }
}

fn reader_loop<R: Read>(
    mut source: R,
    tx: &Sender<Incoming>,
    shared: &Shared,
    max_len: usize,
    label: &str,
) {
    let mut splitter = LineSplitter::new(max_len);
    let mut chunk = [0u8; READ_CHUNK];
    loop {
        match source.read(&mut chunk) {
            Ok(0) => break,
            Ok(read) => splitter.push(&chunk[..read], |line| match line {
                Ok(line) => {
                    if !shared.handshakes.offer(&line) {
                        let _ = tx.send(Incoming::Line(line));
                    }
                }
                Err(err) => tracing::warn!(pipe = %label, %err, "discarding malformed line"),
            }),
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => {
                tracing::debug!(pipe = %label, %err, "pipe read failed");
                break;
            }
        }
    }
    if let Some(bytes) = splitter.finish() {
        tracing::warn!(pipe = %label, bytes, "discarding unterminated trailing data");
    }
    shared.handshakes.close();
    let _ = tx.send(Incoming::Eof);
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use pretty_assertions::assert_eq;

    use super::*;

    #[derive(Default)]
    struct Recorder {
        lines: Vec<String>,
        closed: Vec<PipeState>,
    }

    impl PipeHandler for Recorder {
        fn message_received(&mut self, line: &str) -> bool {
            self.lines.push(line.to_owned());
            true
        }

        fn pipe_closed(&mut self, state: PipeState) {
            self.closed.push(state);
        }
    }

    fn channel_over(input: &'static [u8]) -> PipeChannel {
        PipeChannel::new(Cursor::new(input), io::sink(), PipeConfig::default(), "test").unwrap()
    }

    #[test]
    fn unexpected_eof_is_a_crash_reported_once() {
        let channel = channel_over(b"\nshow\ncontrol 1 0.5\n");
        channel.transition(PipeState::Running);
        let mut recorder = Recorder::default();
        let mut total = 0;
        for _ in 0..100 {
            total += channel.idle_timeout(&mut recorder, Duration::from_millis(20));
            if channel.is_closed() {
                break;
            }
        }
        channel.idle(&mut recorder);
        assert_eq!(total, 2);
        assert_eq!(recorder.lines, vec!["show", "control 1 0.5"]);
        assert_eq!(recorder.closed, vec![PipeState::Crashed]);
    }

    #[test]
    fn quit_closes_cleanly_and_stops_dispatch() {
        let channel = channel_over(b"show\nquit\nhide\n");
        channel.transition(PipeState::Running);
        let mut recorder = Recorder::default();
        for _ in 0..100 {
            channel.idle_timeout(&mut recorder, Duration::from_millis(20));
            if channel.is_closed() {
                break;
            }
        }
        channel.idle(&mut recorder);
        assert_eq!(recorder.lines, vec!["show"]);
        assert_eq!(recorder.closed, vec![PipeState::Closed]);
    }

    #[test]
    fn typed_reads_parse_lines() {
        let channel = channel_over(b"true\n200\n-5\n1.25\nnope\n");
        let timeout = Duration::from_secs(1);
        assert!(channel.read_line_as_bool(timeout).unwrap());
        assert_eq!(channel.read_line_as_byte(timeout).unwrap(), 200);
        assert_eq!(channel.read_line_as_long(timeout).unwrap(), -5);
        assert_eq!(channel.read_line_as_double(timeout).unwrap(), 1.25);
        assert!(matches!(
            channel.read_line_as_uint(timeout),
            Err(PipeError::Parse { .. })
        ));
        assert!(matches!(channel.read_line(timeout), Err(PipeError::Closed)));
    }

    #[test]
    fn multi_line_messages_are_refused() {
        let channel = channel_over(b"");
        assert!(!channel.write_message("two\nlines"));
        assert!(channel.write_and_fix_message("two\nlines"));
    }
}
