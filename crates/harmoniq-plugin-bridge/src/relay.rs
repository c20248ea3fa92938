use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::process::Command;
use std::sync::Arc;

use anyhow::{Context, Result};
use harmoniq_pipe::{PipeConfig, PipeError, PipeHandler, PipeServer, PipeState};
use harmoniq_rt::{
    AtomReadError, AtomRtWriter, MailboxRtReader, OverflowReporter, SharedAtomRing, SharedMailbox,
    DEFAULT_MAILBOX_SLOTS, MEDIUM_RING_SIZE,
};
use serde::{Deserialize, Serialize};

use crate::ipc::{BridgeCommand, BridgeEvent, NoteEvent, GUI_IS_HIDDEN, GUI_IS_SHOWN};

/// Structured-ring message type for a parameter change; payload is an `f32`.
pub const ATOM_TYPE_CONTROL: u32 = 1;

const PAYLOAD_SCRATCH: usize = 64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub sample_rate: u32,
    pub title: String,
    /// Storage size of the outgoing structured ring in bytes.
    pub ring_size: usize,
    pub pipe: PipeConfig,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            title: "Harmoniq Bridge".into(),
            ring_size: MEDIUM_RING_SIZE,
            pipe: PipeConfig::default(),
        }
    }
}

/// Handles given to the audio callback. Every method is non-blocking.
#[derive(Debug)]
pub struct RtPort {
    params: AtomRtWriter,
    notes: MailboxRtReader<DEFAULT_MAILBOX_SLOTS>,
}

impl RtPort {
    /// Queues a parameter change for the bridge process.
    pub fn set_parameter(&mut self, index: u32, value: f32) -> bool {
        let Ok(index) = i32::try_from(index) else {
            return false;
        };
        self.params
            .try_put(ATOM_TYPE_CONTROL, index, &value.to_ne_bytes())
    }

    /// Next note played on the bridge side, if any arrived.
    pub fn next_note(&mut self) -> Option<NoteEvent> {
        while let Some(entry) = self.notes.pop() {
            if let Some(note) = NoteEvent::from_mailbox(entry) {
                return Some(note);
            }
        }
        None
    }
}

impl Drop for RtPort {
    fn drop(&mut self) {
        // Notes nobody is going to play are discarded.
        while self.notes.pop().is_some() {}
    }
}

/// Non-RT owner of a bridge process. Relays queued parameter changes from the
/// audio thread to the process and notes from the process back to the audio
/// thread.
pub struct BridgeHost {
    server: PipeServer,
    outgoing: Arc<SharedAtomRing>,
    scratch: SharedAtomRing,
    notes: Arc<SharedMailbox<DEFAULT_MAILBOX_SLOTS>>,
    parameters: BTreeMap<u32, f32>,
    ui_visible: bool,
    reporter: OverflowReporter,
}

impl BridgeHost {
    /// Spawns `program` as `program <sample_rate> <title>`.
    pub fn launch(program: impl AsRef<OsStr>, config: &RelayConfig) -> Result<(Self, RtPort)> {
        Self::launch_command(Command::new(program), config)
    }

    /// Like [`launch`](Self::launch) for a prepared command (extra env, wrapper).
    pub fn launch_command(mut command: Command, config: &RelayConfig) -> Result<(Self, RtPort)> {
        command
            .arg(config.sample_rate.to_string())
            .arg(&config.title);
        let server = PipeServer::spawn(command, config.pipe.clone())
            .context("failed to start bridge process")?;

        let outgoing = Arc::new(SharedAtomRing::new(config.ring_size));
        let notes = Arc::new(SharedMailbox::new());
        let port = RtPort {
            params: AtomRtWriter::new(Arc::clone(&outgoing)),
            notes: MailboxRtReader::new(Arc::clone(&notes)),
        };
        let host = Self {
            server,
            scratch: SharedAtomRing::new(config.ring_size),
            outgoing,
            notes,
            parameters: BTreeMap::new(),
            ui_visible: false,
            reporter: OverflowReporter::new(),
        };
        Ok((host, port))
    }

    /// One relay cycle. Returns `false` once the bridge process is gone.
    pub fn idle(&mut self) -> bool {
        self.flush_parameters();

        let mut dispatch = RelayDispatch {
            notes: &self.notes,
            parameters: &mut self.parameters,
            ui_visible: &mut self.ui_visible,
        };
        self.server.idle(&mut dispatch);

        self.reporter
            .observe("bridge.parameters", self.outgoing.dropped());
        self.reporter.observe("bridge.notes", self.notes.rejected());
        !self.server.state().is_terminal()
    }

    fn flush_parameters(&mut self) {
        if !self.outgoing.drain_swap(&self.scratch) {
            return;
        }
        let mut ring = self.scratch.lock();
        let mut payload = [0u8; PAYLOAD_SCRATCH];
        let mut writer = self.server.channel().lock();
        loop {
            match ring.try_read(&mut payload) {
                Ok(Some(header)) if header.atom_type == ATOM_TYPE_CONTROL && header.size == 4 => {
                    let value = f32::from_ne_bytes([payload[0], payload[1], payload[2], payload[3]]);
                    let command = BridgeCommand::Control {
                        index: header.index.unsigned_abs(),
                        value,
                    };
                    writer.write_message(&command.to_line());
                }
                Ok(Some(header)) => {
                    tracing::warn!(atom_type = header.atom_type, size = header.size, "unexpected queued message");
                }
                Ok(None) => break,
                Err(err @ AtomReadError::Truncated) => {
                    tracing::warn!(%err, "dropping corrupted parameter queue");
                    break;
                }
                Err(err) => tracing::warn!(%err, "dropping queued message"),
            }
        }
        writer.sync_and_unlock();
    }

    /// Shows the bridge UI and waits for the confirmation.
    pub fn show_ui(&mut self) -> Result<bool, PipeError> {
        self.request_visibility(BridgeCommand::Show)
    }

    pub fn hide_ui(&mut self) -> Result<bool, PipeError> {
        self.request_visibility(BridgeCommand::Hide)
    }

    fn request_visibility(&mut self, command: BridgeCommand) -> Result<bool, PipeError> {
        let reply = self.server.channel().request_default(
            "ui visibility",
            &command.to_line(),
            &[GUI_IS_SHOWN, GUI_IS_HIDDEN],
        )?;
        self.ui_visible = reply == GUI_IS_SHOWN;
        Ok(self.ui_visible)
    }

    /// Round trip through the bridge process, bounded by the handshake timeout.
    pub fn ping(&self, token: &str) -> Result<(), PipeError> {
        let command = BridgeCommand::Ping {
            token: token.to_owned(),
        };
        let expected = format!("pong {token}");
        self.server
            .channel()
            .request_default("ping", &command.to_line(), &[expected.as_str()])
            .map(|_| ())
    }

    pub fn send_program(&self, index: u32) -> bool {
        self.server.channel().write_program(index)
    }

    pub fn send_note(&self, note: NoteEvent) -> bool {
        self.server
            .channel()
            .write_message(&BridgeCommand::Note(note).to_line())
    }

    /// Last value the bridge reported for `index`.
    pub fn parameter(&self, index: u32) -> Option<f32> {
        self.parameters.get(&index).copied()
    }

    pub fn is_ui_visible(&self) -> bool {
        self.ui_visible
    }

    pub fn is_running(&mut self) -> bool {
        self.server.is_running()
    }

    pub fn state(&self) -> PipeState {
        self.server.state()
    }

    pub fn stop(&mut self) {
        self.server.stop();
    }
}

impl Drop for BridgeHost {
    /// Parameter changes still queued by the audio thread are sent before the
    /// session ends. Notes the port never picked up are discarded.
    fn drop(&mut self) {
        self.flush_parameters();
        if !self.notes.is_empty() {
            tracing::debug!("discarding unread bridge notes");
            self.notes.clear();
        }
    }
}

struct RelayDispatch<'a> {
    notes: &'a SharedMailbox<DEFAULT_MAILBOX_SLOTS>,
    parameters: &'a mut BTreeMap<u32, f32>,
    ui_visible: &'a mut bool,
}

impl PipeHandler for RelayDispatch<'_> {
    fn message_received(&mut self, line: &str) -> bool {
        let event = match BridgeEvent::parse(line) {
            Ok(event) => event,
            Err(err) => {
                tracing::warn!(%err, "ignoring bridge message");
                return false;
            }
        };
        match event {
            BridgeEvent::Control { index, value } => {
                self.parameters.insert(index, value);
            }
            BridgeEvent::Note(note) => {
                self.notes.put(note.status(), note.note, note.velocity);
            }
            BridgeEvent::GuiShown => *self.ui_visible = true,
            BridgeEvent::GuiHidden => *self.ui_visible = false,
            BridgeEvent::Pong { token } => {
                tracing::debug!(%token, "late pong from bridge");
            }
            BridgeEvent::Exiting => {
                tracing::info!("bridge process is exiting");
            }
        }
        true
    }

    fn pipe_closed(&mut self, state: PipeState) {
        if state == PipeState::Crashed {
            tracing::error!("bridge process crashed");
        } else {
            tracing::info!(?state, "bridge session closed");
        }
    }
}
