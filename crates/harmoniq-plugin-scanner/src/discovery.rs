use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{Duration, Instant};

use harmoniq_pipe::{PipeConfig, PipeHandler, PipeServer, PipeState};
use serde::{Deserialize, Serialize};

use crate::info::{BinaryType, DiscoveryInfo, PluginType};
use crate::probe::{ProbeLine, ProbeParser};
use crate::scan::{candidate_mode, content_hash, find_candidates, CandidateMode};
use crate::wine::WineOptions;

/// Search path handed to probes running in `:all` mode.
pub const DISCOVERY_PATH_ENV: &str = "HARMONIQ_DISCOVERY_PATH";
/// Probe target asking it to enumerate everything it knows about.
pub const ALL_TARGET: &str = ":all";

#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("discovery tool path is empty")]
    MissingTool,
    #[error("{plugin_type} plugins cannot be {binary_type} binaries")]
    Unsupported {
        plugin_type: PluginType,
        binary_type: BinaryType,
    },
    #[error("no {plugin_type} candidates found")]
    NoCandidates { plugin_type: PluginType },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryOptions {
    /// A probe silent for this long is skipped.
    pub probe_timeout: Duration,
    /// Grace period when a probe is skipped.
    pub skip_timeout: Duration,
    pub pipe: PipeConfig,
    pub wine: WineOptions,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            probe_timeout: Duration::from_secs(30),
            skip_timeout: Duration::from_secs(1),
            pipe: PipeConfig::default(),
            wine: WineOptions::default(),
        }
    }
}

/// Receives discovery results.
pub trait DiscoveryRequester {
    /// A plugin was found, or (with `info == None`) a binary turned out to
    /// hold no plugins. `hash` is set whenever the result belongs to a binary,
    /// so callers can cache it.
    fn plugin_found(&mut self, info: Option<&DiscoveryInfo>, hash: Option<&str>);

    /// Returns `true` when `filename` with this `hash` is already known; the
    /// binary is then not probed.
    fn check_cache(&mut self, _filename: &Path, _hash: &str) -> bool {
        false
    }
}

/// Runs the discovery tool once per candidate binary, one at a time, driven
/// by [`idle`](Self::idle).
pub struct PluginDiscovery<R> {
    tool: PathBuf,
    binary_type: BinaryType,
    plugin_type: PluginType,
    search_paths: Vec<PathBuf>,
    binaries: Vec<PathBuf>,
    index: usize,
    count: usize,
    requester: R,
    options: DiscoveryOptions,
    server: Option<PipeServer>,
    parser: ProbeParser,
    found: Vec<DiscoveryInfo>,
    found_in_binary: bool,
    next_hash: Option<String>,
    last_message: Instant,
}

impl<R: DiscoveryRequester> PluginDiscovery<R> {
    /// Collects candidates under `search_paths` and starts probing the first.
    pub fn start(
        tool: impl Into<PathBuf>,
        binary_type: BinaryType,
        plugin_type: PluginType,
        search_paths: &[PathBuf],
        requester: R,
        options: DiscoveryOptions,
    ) -> Result<Self, DiscoveryError> {
        let tool = tool.into();
        if tool.as_os_str().is_empty() {
            return Err(DiscoveryError::MissingTool);
        }
        let mode = candidate_mode(plugin_type, binary_type).ok_or(DiscoveryError::Unsupported {
            plugin_type,
            binary_type,
        })?;
        let binaries = match mode {
            CandidateMode::All => Vec::new(),
            mode => {
                let found = find_candidates(mode, binary_type, search_paths);
                if found.is_empty() {
                    return Err(DiscoveryError::NoCandidates { plugin_type });
                }
                found
            }
        };
        tracing::info!(%plugin_type, %binary_type, candidates = binaries.len(), "plugin discovery started");

        let mut discovery = Self {
            tool,
            binary_type,
            plugin_type,
            search_paths: search_paths.to_vec(),
            count: binaries.len().max(1),
            binaries,
            index: 0,
            requester,
            options,
            server: None,
            parser: ProbeParser::new(plugin_type),
            found: Vec::new(),
            found_in_binary: false,
            next_hash: None,
            last_message: Instant::now(),
        };
        discovery.start_current();
        Ok(discovery)
    }

    /// Advances the discovery. Returns `false` once every candidate is done.
    pub fn idle(&mut self) -> bool {
        let running = match self.server.as_mut() {
            Some(server) => {
                let mut dispatch = ProbeDispatch {
                    parser: &mut self.parser,
                    found: &mut self.found,
                    last_message: &mut self.last_message,
                };
                server.idle(&mut dispatch);
                server.is_running()
            }
            None => false,
        };
        self.report_found();

        if running {
            if self.last_message.elapsed() < self.options.probe_timeout {
                return true;
            }
            tracing::warn!(binary = ?self.current_binary(), "plugin took too long to respond, skipping");
            self.skip();
        }
        self.server = None;
        self.report_empty_binary();

        self.index += 1;
        if self.index >= self.count {
            tracing::info!(plugin_type = %self.plugin_type, "plugin discovery finished");
            return false;
        }
        self.start_current();
        true
    }

    /// Abandons the binary being probed; the next [`idle`](Self::idle) moves on.
    pub fn skip(&mut self) {
        if let Some(server) = self.server.as_mut() {
            server.stop_with_timeout(self.options.skip_timeout);
        }
    }

    /// Stops any running probe and hands the requester back.
    pub fn stop(mut self) -> R {
        if let Some(mut server) = self.server.take() {
            server.stop();
        }
        self.requester
    }

    /// `(done, total)` candidates.
    pub fn progress(&self) -> (usize, usize) {
        (self.index, self.count)
    }

    pub fn current_binary(&self) -> Option<&Path> {
        self.binaries.get(self.index).map(PathBuf::as_path)
    }

    pub fn requester(&self) -> &R {
        &self.requester
    }

    pub fn requester_mut(&mut self) -> &mut R {
        &mut self.requester
    }

    fn start_current(&mut self) {
        self.last_message = Instant::now();
        self.found_in_binary = false;
        self.next_hash = None;
        self.parser = ProbeParser::new(self.plugin_type);

        let binary = self.binaries.get(self.index).cloned();
        if let Some(binary) = &binary {
            match content_hash(binary) {
                Ok(hash) => {
                    if self.requester.check_cache(binary, &hash) {
                        tracing::debug!(binary = %binary.display(), "skipping, using cache");
                        self.found_in_binary = true;
                        return;
                    }
                    self.next_hash = Some(hash);
                }
                Err(err) => tracing::warn!(binary = %binary.display(), %err, "cannot hash plugin binary"),
            }
            tracing::info!(binary = %binary.display(), "scanning");
        }

        let command = self.probe_command(binary.as_deref());
        match PipeServer::spawn(command, self.options.pipe.clone()) {
            Ok(server) => self.server = Some(server),
            Err(err) => tracing::warn!(tool = %self.tool.display(), %err, "discovery tool failed to start"),
        }
    }

    fn probe_command(&self, binary: Option<&Path>) -> Command {
        let mut command = match self.options.wine.helper_tool(self.binary_type) {
            Some(helper) => {
                let mut command = Command::new(helper);
                command
                    .arg(&self.tool)
                    .env("WINEDEBUG", "-all")
                    .env("WINEPREFIX", self.options.wine.resolve_prefix(binary));
                command
            }
            None => Command::new(&self.tool),
        };
        let target = binary.map_or(OsStr::new(ALL_TARGET), Path::as_os_str);
        command.arg(self.plugin_type.as_str()).arg(target);
        if binary.is_none() && self.plugin_type != PluginType::Internal {
            match std::env::join_paths(&self.search_paths) {
                Ok(joined) => {
                    command.env(DISCOVERY_PATH_ENV, joined);
                }
                Err(err) => tracing::warn!(%err, "search path cannot be passed to the probe"),
            }
        }
        command
    }

    fn report_found(&mut self) {
        for mut info in self.found.drain(..) {
            match self.binaries.get(self.index) {
                Some(binary) => {
                    info.filename = binary.clone();
                    self.found_in_binary = true;
                    tracing::info!(name = %info.metadata.name, binary = %binary.display(), "found plugin");
                    self.requester.plugin_found(Some(&info), self.next_hash.as_deref());
                }
                None => {
                    if self.plugin_type == PluginType::Lv2 {
                        if let Some((bundle, label)) = info.label.split_once('/') {
                            info.filename = PathBuf::from(bundle);
                            info.label = label.to_owned();
                        }
                    }
                    self.requester.plugin_found(Some(&info), None);
                }
            }
        }
    }

    /// A binary that yielded nothing is still reported, so it can be cached.
    fn report_empty_binary(&mut self) {
        if self.found_in_binary {
            return;
        }
        let Some(binary) = self.binaries.get(self.index) else {
            return;
        };
        let Some(hash) = self.next_hash.clone() else {
            return;
        };
        if !self.requester.check_cache(binary, &hash) {
            self.requester.plugin_found(None, Some(&hash));
        }
    }
}

struct ProbeDispatch<'a> {
    parser: &'a mut ProbeParser,
    found: &'a mut Vec<DiscoveryInfo>,
    last_message: &'a mut Instant,
}

impl PipeHandler for ProbeDispatch<'_> {
    fn message_received(&mut self, line: &str) -> bool {
        *self.last_message = Instant::now();
        match self.parser.feed(line) {
            Ok(ProbeLine::Found(info)) => {
                self.found.push(info);
                true
            }
            Ok(ProbeLine::Exiting | ProbeLine::Handled) => true,
            Ok(ProbeLine::Unknown) => false,
            Err(err) => {
                tracing::warn!(%err, "malformed probe output");
                false
            }
        }
    }

    fn pipe_closed(&mut self, state: PipeState) {
        if state == PipeState::Crashed {
            tracing::warn!("discovery tool crashed");
        }
    }
}
