use std::path::{Path, PathBuf};
use std::time::Duration;

use harmoniq_pipe::{PipeClient, PipeConfig, PipeHandler, PipeState};

use crate::error::{OpFailure, SessionError};
use crate::protocol::{
    self, ClientInfo, ManagerReply, SessionRequest, ANNOUNCE, ERROR, GUI_IS_HIDDEN, GUI_IS_SHOWN,
    REPLY,
};

/// Application callbacks for the manager's lifecycle requests.
pub trait SessionHandler {
    /// Load (or create) the project at `project_path`.
    fn open(&mut self, project_path: &Path, client_id: &str) -> Result<(), OpFailure>;

    fn save(&mut self) -> Result<(), OpFailure>;

    /// Every client of the session has finished opening.
    fn session_is_loaded(&mut self) {}

    /// Returns whether the GUI is visible afterwards.
    fn show_optional_gui(&mut self) -> bool {
        true
    }

    /// Returns whether the GUI is still visible afterwards.
    fn hide_optional_gui(&mut self) -> bool {
        false
    }
}

/// Application end of a session-manager connection.
pub struct SessionLink {
    client: PipeClient,
    manager: Option<ManagerReply>,
    gui_visible: bool,
    project: Option<(String, PathBuf)>,
}

impl SessionLink {
    pub fn new(client: PipeClient) -> Self {
        Self {
            client,
            manager: None,
            gui_visible: false,
            project: None,
        }
    }

    /// Link over the process's standard streams.
    pub fn from_stdio(config: PipeConfig) -> Result<Self, SessionError> {
        Ok(Self::new(PipeClient::from_stdio(config)?))
    }

    /// Introduces the application and waits up to `timeout` for the manager.
    pub fn announce(&mut self, info: &ClientInfo, timeout: Duration) -> Result<&ManagerReply, SessionError> {
        let reply_prefix = format!("{REPLY} {ANNOUNCE}");
        let error_prefix = format!("{ERROR} {ANNOUNCE}");
        let line = self.client.channel().request(
            ANNOUNCE,
            &info.announce_line(),
            &[reply_prefix.as_str(), error_prefix.as_str()],
            timeout,
        )?;
        let reply = protocol::parse_reply(ANNOUNCE, &line)?.map_err(|failure| SessionError::Rejected {
            opcode: ANNOUNCE.to_owned(),
            failure,
        })?;
        tracing::info!(manager = %reply.manager_name, features = ?reply.features, "announced to session manager");

        let manager = self.manager.insert(reply);
        if manager.features.optional_gui {
            let state = if self.gui_visible { GUI_IS_SHOWN } else { GUI_IS_HIDDEN };
            self.client.channel().write_message(state);
        }
        Ok(manager)
    }

    /// Serves pending manager requests. Returns how many lines were handled.
    pub fn idle<H: SessionHandler + ?Sized>(&mut self, handler: &mut H) -> usize {
        let mut dispatch = self.dispatch(handler);
        let handled = self.client.idle(&mut dispatch);
        let outgoing = dispatch.finish();
        self.send(outgoing);
        handled
    }

    /// Like [`idle`](Self::idle) but waits up to `timeout` for a request.
    pub fn idle_timeout<H: SessionHandler + ?Sized>(&mut self, handler: &mut H, timeout: Duration) -> usize {
        let mut dispatch = self.dispatch(handler);
        let handled = self.client.idle_timeout(&mut dispatch, timeout);
        let outgoing = dispatch.finish();
        self.send(outgoing);
        handled
    }

    fn dispatch<'a, H: SessionHandler + ?Sized>(&self, handler: &'a mut H) -> LinkDispatch<'a, H> {
        LinkDispatch {
            handler,
            outgoing: Vec::new(),
            gui_visible: self.gui_visible,
            opened: None,
        }
    }

    fn send(&mut self, outgoing: Outgoing) {
        self.gui_visible = outgoing.gui_visible;
        if let Some(project) = outgoing.opened {
            self.project = Some(project);
        }
        if outgoing.lines.is_empty() {
            return;
        }
        let mut writer = self.client.channel().lock();
        for line in &outgoing.lines {
            writer.write_and_fix_message(line);
        }
        writer.sync_and_unlock();
    }

    /// Tells the manager the application's GUI changed on its own.
    pub fn set_gui_visible(&mut self, visible: bool) {
        self.gui_visible = visible;
        if self.manager.as_ref().is_some_and(|manager| manager.features.optional_gui) {
            self.client
                .channel()
                .write_message(if visible { GUI_IS_SHOWN } else { GUI_IS_HIDDEN });
        }
    }

    pub fn manager(&self) -> Option<&ManagerReply> {
        self.manager.as_ref()
    }

    /// Client id and path of the last project opened successfully.
    pub fn project(&self) -> Option<(&str, &Path)> {
        self.project
            .as_ref()
            .map(|(client_id, path)| (client_id.as_str(), path.as_path()))
    }

    pub fn is_gui_visible(&self) -> bool {
        self.gui_visible
    }

    pub fn is_running(&self) -> bool {
        self.client.is_running()
    }

    pub fn state(&self) -> PipeState {
        self.client.channel().state()
    }

    /// Announces the application's exit and waits for the manager to let go.
    pub fn exit(&mut self) {
        self.client.write_exiting_message_and_wait();
    }
}

struct Outgoing {
    lines: Vec<String>,
    gui_visible: bool,
    opened: Option<(String, PathBuf)>,
}

struct LinkDispatch<'a, H: ?Sized> {
    handler: &'a mut H,
    outgoing: Vec<String>,
    gui_visible: bool,
    opened: Option<(String, PathBuf)>,
}

impl<H: SessionHandler + ?Sized> LinkDispatch<'_, H> {
    fn finish(self) -> Outgoing {
        Outgoing {
            lines: self.outgoing,
            gui_visible: self.gui_visible,
            opened: self.opened,
        }
    }

    fn reply(&mut self, opcode: &str, result: Result<(), OpFailure>) {
        let line = match result {
            Ok(()) => protocol::ok_line(opcode),
            Err(failure) => {
                tracing::warn!(opcode, %failure, "session request failed");
                protocol::error_line(opcode, &failure)
            }
        };
        self.outgoing.push(line);
    }

    fn gui_state(&mut self, visible: bool) {
        self.gui_visible = visible;
        self.outgoing
            .push(if visible { GUI_IS_SHOWN } else { GUI_IS_HIDDEN }.to_owned());
    }

    fn handle(&mut self, request: SessionRequest) {
        let opcode = request.opcode();
        match request {
            SessionRequest::Open {
                client_id,
                project_path,
            } => {
                let result = self.handler.open(&project_path, &client_id);
                if result.is_ok() {
                    self.opened = Some((client_id, project_path));
                }
                self.reply(opcode, result);
            }
            SessionRequest::Save => {
                let result = self.handler.save();
                self.reply(opcode, result);
            }
            SessionRequest::SessionIsLoaded => self.handler.session_is_loaded(),
            SessionRequest::ShowOptionalGui => {
                let visible = self.handler.show_optional_gui();
                self.gui_state(visible);
            }
            SessionRequest::HideOptionalGui => {
                let visible = self.handler.hide_optional_gui();
                self.gui_state(visible);
            }
        }
    }
}

impl<H: SessionHandler + ?Sized> PipeHandler for LinkDispatch<'_, H> {
    fn message_received(&mut self, line: &str) -> bool {
        match SessionRequest::parse(line) {
            Ok(Some(request)) => {
                self.handle(request);
                true
            }
            Ok(None) if line.starts_with(REPLY) || line.starts_with(ERROR) => {
                tracing::info!(%line, "ignoring unexpected manager reply");
                true
            }
            Ok(None) => false,
            Err(err) => {
                tracing::warn!(%err, "malformed session request");
                false
            }
        }
    }

    fn pipe_closed(&mut self, state: PipeState) {
        tracing::info!(?state, "session manager link closed");
    }
}
