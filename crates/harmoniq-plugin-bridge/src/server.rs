use std::collections::BTreeMap;
use std::time::Duration;

use harmoniq_pipe::{PipeClient, PipeHandler, PipeState};

use crate::ipc::{BridgeCommand, BridgeEvent};

/// Environment variable selecting a [`BridgeBehavior`].
pub const BEHAVIOR_ENV: &str = "HARMONIQ_BRIDGE_BEHAVIOR";

const IDLE_INTERVAL: Duration = Duration::from_millis(20);

/// How the bridge process reacts to its host. Everything but `Normal` exists
/// to exercise the host's failure handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BridgeBehavior {
    #[default]
    Normal,
    /// Never answers pings.
    Silent,
    /// Announces its exit right after start-up.
    Exit,
    /// Aborts on the first command it receives.
    Crash,
}

impl BridgeBehavior {
    pub fn from_env() -> Self {
        match std::env::var(BEHAVIOR_ENV).as_deref() {
            Ok("silent") => Self::Silent,
            Ok("exit") => Self::Exit,
            Ok("crash") => Self::Crash,
            Ok("normal") | Err(_) => Self::Normal,
            Ok(other) => {
                tracing::warn!(behavior = other, "unknown bridge behavior, using normal");
                Self::Normal
            }
        }
    }
}

/// Bridge-process state: the plugin's parameters, program and UI visibility.
#[derive(Debug, Default)]
pub struct BridgeServer {
    behavior: BridgeBehavior,
    parameters: BTreeMap<u32, f32>,
    program: Option<u32>,
    ui_visible: bool,
    outbox: Vec<BridgeEvent>,
}

impl BridgeServer {
    pub fn new(behavior: BridgeBehavior) -> Self {
        Self {
            behavior,
            ..Self::default()
        }
    }

    pub fn parameter(&self, index: u32) -> Option<f32> {
        self.parameters.get(&index).copied()
    }

    pub fn program(&self) -> Option<u32> {
        self.program
    }

    pub fn is_ui_visible(&self) -> bool {
        self.ui_visible
    }

    /// Applies one host command and returns the replies it produces.
    pub fn handle(&mut self, command: BridgeCommand) -> Vec<BridgeEvent> {
        match command {
            BridgeCommand::Show => {
                self.ui_visible = true;
                vec![BridgeEvent::GuiShown]
            }
            BridgeCommand::Hide => {
                self.ui_visible = false;
                vec![BridgeEvent::GuiHidden]
            }
            BridgeCommand::Focus | BridgeCommand::Idle => Vec::new(),
            BridgeCommand::Control { index, value } => {
                self.parameters.insert(index, value);
                vec![BridgeEvent::Control { index, value }]
            }
            BridgeCommand::Program { index } => {
                self.program = Some(index);
                Vec::new()
            }
            BridgeCommand::Note(note) => vec![BridgeEvent::Note(note)],
            BridgeCommand::Ping { token } => {
                if self.behavior == BridgeBehavior::Silent {
                    Vec::new()
                } else {
                    vec![BridgeEvent::Pong { token }]
                }
            }
        }
    }

    /// Serves the host until it sends `quit` or goes away.
    pub fn run(mut self, mut client: PipeClient) {
        if self.behavior == BridgeBehavior::Exit {
            client.write_exiting_message_and_wait();
            return;
        }
        while client.is_running() {
            client.idle_timeout(&mut self, IDLE_INTERVAL);
            if self.outbox.is_empty() {
                continue;
            }
            let mut writer = client.channel().lock();
            for event in self.outbox.drain(..) {
                writer.write_message(&event.to_line());
            }
            writer.sync_and_unlock();
        }
        tracing::info!(state = ?client.channel().state(), "bridge session ended");
    }
}

impl PipeHandler for BridgeServer {
    fn message_received(&mut self, line: &str) -> bool {
        if self.behavior == BridgeBehavior::Crash {
            tracing::error!(%line, "crashing on request");
            std::process::abort();
        }
        match BridgeCommand::parse(line) {
            Ok(command) => {
                let replies = self.handle(command);
                self.outbox.extend(replies);
                true
            }
            Err(err) => {
                tracing::warn!(%err, "ignoring host message");
                false
            }
        }
    }

    fn pipe_closed(&mut self, state: PipeState) {
        tracing::debug!(?state, "host pipe closed");
    }
}
