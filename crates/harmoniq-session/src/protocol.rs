use std::path::PathBuf;

use harmoniq_pipe::line::split_command;
use harmoniq_pipe::{Fields, PipeError};
use serde::{Deserialize, Serialize};

use crate::error::{ErrorCode, OpFailure};

pub const ANNOUNCE: &str = "announce";
pub const REPLY: &str = "reply";
pub const ERROR: &str = "error";
pub const OPEN: &str = "open";
pub const SAVE: &str = "save";
pub const SESSION_IS_LOADED: &str = "session_is_loaded";
pub const SHOW_OPTIONAL_GUI: &str = "show_optional_gui";
pub const HIDE_OPTIONAL_GUI: &str = "hide_optional_gui";
pub const GUI_IS_SHOWN: &str = "gui_is_shown";
pub const GUI_IS_HIDDEN: &str = "gui_is_hidden";
pub const OK: &str = "OK";

pub const API_MAJOR: u32 = 1;
pub const API_MINOR: u32 = 2;

/// What the application tells the manager about itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub app_name: String,
    /// Capability words such as `switch` or `optional-gui`.
    pub capabilities: Vec<String>,
    pub executable: String,
    pub api_major: u32,
    pub api_minor: u32,
    pub pid: u32,
}

impl ClientInfo {
    /// Info for the current process.
    pub fn current(app_name: impl Into<String>, capabilities: &[&str]) -> Self {
        let executable = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.file_name().map(|name| name.to_string_lossy().into_owned()))
            .unwrap_or_default();
        Self {
            app_name: app_name.into(),
            capabilities: capabilities.iter().map(|cap| (*cap).to_owned()).collect(),
            executable,
            api_major: API_MAJOR,
            api_minor: API_MINOR,
            pid: std::process::id(),
        }
    }

    pub fn supports(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|cap| cap == capability)
    }

    /// `announce <app> <capabilities> <executable> <api_major> <api_minor> <pid>`.
    /// Spaces inside names are replaced so each field stays one token.
    pub fn announce_line(&self) -> String {
        format!(
            "{ANNOUNCE} {} {} {} {} {} {}",
            token(&self.app_name),
            join_features(&self.capabilities),
            token(&self.executable),
            self.api_major,
            self.api_minor,
            self.pid
        )
    }
}

fn token(text: &str) -> String {
    if text.is_empty() {
        "-".to_owned()
    } else {
        text.replace(' ', "_")
    }
}

/// Feature lists travel as `:a:b:`; an empty list is `::`.
pub fn join_features(features: &[String]) -> String {
    let mut joined = String::from(":");
    for feature in features {
        joined.push_str(feature);
        joined.push(':');
    }
    if features.is_empty() {
        joined.push(':');
    }
    joined
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagerFeatures {
    pub broadcast: bool,
    pub optional_gui: bool,
    pub server_control: bool,
}

impl ManagerFeatures {
    pub fn parse(token: &str) -> Self {
        let mut features = Self::default();
        for feature in token.split(':').filter(|word| !word.is_empty()) {
            match feature {
                "broadcast" => features.broadcast = true,
                "optional-gui" => features.optional_gui = true,
                "server-control" => features.server_control = true,
                other => tracing::debug!(feature = other, "unknown manager feature"),
            }
        }
        features
    }
}

/// Accepted announce: `reply announce <features> <manager name…>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagerReply {
    pub features: ManagerFeatures,
    pub manager_name: String,
}

/// Outcome of an announce or other request, as sent by the manager.
pub fn parse_reply(opcode: &str, line: &str) -> Result<Result<ManagerReply, OpFailure>, PipeError> {
    let parse_error = || PipeError::Parse {
        expected: "a manager reply",
        line: line.to_owned(),
    };
    let (kind, rest) = split_command(line);
    let (reply_to, rest) = split_command(rest);
    if reply_to != opcode {
        return Err(parse_error());
    }
    match kind {
        REPLY => {
            let (features, manager_name) = split_command(rest);
            Ok(Ok(ManagerReply {
                features: ManagerFeatures::parse(features),
                manager_name: manager_name.to_owned(),
            }))
        }
        ERROR => {
            let mut fields = Fields::new(rest);
            let code: i32 = fields.next("an error code")?;
            Ok(Err(OpFailure::new(ErrorCode::from_code(code), fields.rest())))
        }
        _ => Err(parse_error()),
    }
}

/// Lifecycle requests from the manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionRequest {
    Open { client_id: String, project_path: PathBuf },
    Save,
    SessionIsLoaded,
    ShowOptionalGui,
    HideOptionalGui,
}

impl SessionRequest {
    /// `Ok(None)` for lines that are not lifecycle requests.
    pub fn parse(line: &str) -> Result<Option<Self>, PipeError> {
        let (opcode, rest) = split_command(line);
        Ok(Some(match opcode {
            OPEN => {
                let (client_id, project_path) = split_command(rest);
                if client_id.is_empty() || project_path.is_empty() {
                    return Err(PipeError::Parse {
                        expected: "open <client_id> <project path>",
                        line: line.to_owned(),
                    });
                }
                SessionRequest::Open {
                    client_id: client_id.to_owned(),
                    project_path: PathBuf::from(project_path),
                }
            }
            SAVE => SessionRequest::Save,
            SESSION_IS_LOADED => SessionRequest::SessionIsLoaded,
            SHOW_OPTIONAL_GUI => SessionRequest::ShowOptionalGui,
            HIDE_OPTIONAL_GUI => SessionRequest::HideOptionalGui,
            _ => return Ok(None),
        }))
    }

    pub fn opcode(&self) -> &'static str {
        match self {
            SessionRequest::Open { .. } => OPEN,
            SessionRequest::Save => SAVE,
            SessionRequest::SessionIsLoaded => SESSION_IS_LOADED,
            SessionRequest::ShowOptionalGui => SHOW_OPTIONAL_GUI,
            SessionRequest::HideOptionalGui => HIDE_OPTIONAL_GUI,
        }
    }
}

pub fn ok_line(opcode: &str) -> String {
    format!("{REPLY} {opcode} {OK}")
}

pub fn error_line(opcode: &str, failure: &OpFailure) -> String {
    format!("{ERROR} {opcode} {} {}", failure.code.code(), failure.message)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn announce_line_keeps_one_token_per_field() {
        let info = ClientInfo {
            app_name: "Harmoniq Studio".into(),
            capabilities: vec!["switch".into(), "optional-gui".into()],
            executable: "harmoniq".into(),
            api_major: 1,
            api_minor: 2,
            pid: 4242,
        };
        assert_eq!(
            info.announce_line(),
            "announce Harmoniq_Studio :switch:optional-gui: harmoniq 1 2 4242"
        );
        assert!(info.supports("optional-gui"));
        assert_eq!(join_features(&[]), "::");
    }

    #[test]
    fn manager_reply_carries_features_and_name() {
        let reply = parse_reply(ANNOUNCE, "reply announce :broadcast:optional-gui: Session Manager 2")
            .unwrap()
            .unwrap();
        assert_eq!(
            reply.features,
            ManagerFeatures {
                broadcast: true,
                optional_gui: true,
                server_control: false
            }
        );
        assert_eq!(reply.manager_name, "Session Manager 2");
    }

    #[test]
    fn manager_errors_are_decoded() {
        let failure = parse_reply(ANNOUNCE, "error announce -2 API version mismatch")
            .unwrap()
            .unwrap_err();
        assert_eq!(failure, OpFailure::new(ErrorCode::IncompatibleApi, "API version mismatch"));
        assert!(parse_reply(ANNOUNCE, "reply save OK").is_err());
        assert!(parse_reply(ANNOUNCE, "error announce x").is_err());
    }

    #[test]
    fn requests_parse_with_paths_containing_spaces() {
        assert_eq!(
            SessionRequest::parse("open harmoniq.nXYZ /home/user/My Sessions/demo").unwrap(),
            Some(SessionRequest::Open {
                client_id: "harmoniq.nXYZ".into(),
                project_path: PathBuf::from("/home/user/My Sessions/demo"),
            })
        );
        assert_eq!(SessionRequest::parse("save").unwrap(), Some(SessionRequest::Save));
        assert_eq!(SessionRequest::parse("control 1 0.5").unwrap(), None);
        assert!(SessionRequest::parse("open only-id").is_err());
    }

    #[test]
    fn reply_lines() {
        assert_eq!(ok_line(SAVE), "reply save OK");
        assert_eq!(
            error_line(OPEN, &OpFailure::new(ErrorCode::NoSuchFile, "missing project")),
            "error open -5 missing project"
        );
    }
}
