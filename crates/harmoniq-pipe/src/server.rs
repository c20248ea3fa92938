use std::ffi::OsStr;
use std::io;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use crate::channel::{PipeChannel, PipeHandler, PipeState};
use crate::config::PipeConfig;
use crate::error::PipeError;
use crate::line::{FOCUS, HIDE, QUIT, SHOW};

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Owner side of a pipe session: spawns the helper process and talks to it
/// over its stdin/stdout.
pub struct PipeServer {
    child: Option<Child>,
    pid: u32,
    program: String,
    channel: PipeChannel,
}

impl PipeServer {
    /// Spawns `program` with `args` and waits for its ready line.
    pub fn start<I, S>(program: impl AsRef<OsStr>, args: I, config: PipeConfig) -> Result<Self, PipeError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut command = Command::new(program);
        command.args(args);
        Self::spawn(command, config)
    }

    /// Spawns a prepared command. Its stdin and stdout are replaced by pipes;
    /// stderr is inherited so the helper's logs end up next to ours.
    pub fn spawn(mut command: Command, config: PipeConfig) -> Result<Self, PipeError> {
        let program = command.get_program().to_string_lossy().into_owned();
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());

        let mut child = command.spawn().map_err(|source| PipeError::Spawn {
            program: program.clone(),
            source,
        })?;
        let pid = child.id();

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            kill_and_reap(&mut child);
            return Err(PipeError::Io(io::Error::new(
                io::ErrorKind::Other,
                "child stdio was not captured",
            )));
        };
        let startup_timeout = config.startup_timeout;
        let channel = match PipeChannel::new(stdout, stdin, config, format!("{program}[{pid}]")) {
            Ok(channel) => channel,
            Err(err) => {
                kill_and_reap(&mut child);
                return Err(err);
            }
        };

        if let Err(err) = channel.first_line(startup_timeout) {
            tracing::warn!(%program, pid, %err, "pipe client failed to start");
            kill_and_reap(&mut child);
            channel.transition(PipeState::Closed);
            return Err(match err {
                PipeError::ReadTimeout(timeout) => PipeError::StartupTimeout { program, timeout },
                other => other,
            });
        }

        channel.transition(PipeState::Running);
        tracing::info!(%program, pid, "pipe server started");
        Ok(Self {
            child: Some(child),
            pid,
            program,
            channel,
        })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn channel(&self) -> &PipeChannel {
        &self.channel
    }

    pub fn state(&self) -> PipeState {
        self.channel.state()
    }

    /// Non-blocking liveness check. An exited child ends the session as
    /// `Closed` when the exit was expected and `Crashed` otherwise.
    pub fn is_running(&mut self) -> bool {
        if self.channel.is_closed() {
            return false;
        }
        let Some(child) = self.child.as_mut() else {
            return false;
        };
        match child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                let expected = status.success()
                    || self.channel.state() == PipeState::Closing
                    || self.channel.peer_exiting();
                if expected {
                    tracing::info!(pid = self.pid, %status, "pipe client exited");
                    self.channel.transition(PipeState::Closed);
                } else {
                    tracing::warn!(pid = self.pid, %status, "pipe client crashed");
                    self.channel.transition(PipeState::Crashed);
                }
                self.child = None;
                false
            }
            Err(err) => {
                // The pid may already be reaped and reused, so the handle is
                // dropped instead of killed later.
                tracing::warn!(pid = self.pid, %err, "lost track of pipe client");
                self.channel.transition(PipeState::Crashed);
                self.child = None;
                false
            }
        }
    }

    /// Dispatches pending messages, checks liveness and reports the end of the
    /// session to `handler` once. A client announcing `exiting` is stopped.
    pub fn idle<H: PipeHandler + ?Sized>(&mut self, handler: &mut H) -> usize {
        let dispatched = self.channel.idle(handler);
        if self.channel.peer_exiting() && self.child.is_some() {
            self.stop();
        }
        self.is_running();
        self.channel.notify_if_closed(handler);
        dispatched
    }

    pub fn write_show(&self) -> bool {
        self.channel.write_message(SHOW)
    }

    pub fn write_focus(&self) -> bool {
        self.channel.write_message(FOCUS)
    }

    pub fn write_hide(&self) -> bool {
        self.channel.write_message(HIDE)
    }

    /// Graceful stop bounded by the configured stop timeout.
    pub fn stop(&mut self) {
        let timeout = self.channel.config().stop_timeout;
        self.stop_with_timeout(timeout);
    }

    /// Sends `quit`, then one terminate signal, then polls until the child is
    /// gone. A child still alive after `timeout` is killed.
    pub fn stop_with_timeout(&mut self, timeout: Duration) {
        let Some(mut child) = self.child.take() else {
            return;
        };
        self.channel.transition(PipeState::Closing);
        {
            let mut writer = self.channel.lock();
            if writer.write_message(QUIT) {
                writer.sync();
            }
        }
        self.channel.close_writer();

        if !wait_for_exit(&mut child, timeout, true) {
            tracing::warn!(pid = self.pid, ?timeout, "pipe client ignored terminate, killing it");
            let _ = child.kill();
            if !wait_for_exit(&mut child, timeout, false) {
                tracing::error!(pid = self.pid, "pipe client survived kill");
            }
        }
        self.channel.transition(PipeState::Closed);
    }
}

impl Drop for PipeServer {
    fn drop(&mut self) {
        if !thread::panicking() {
            debug_assert_eq!(
                self.channel.pending_handshakes(),
                0,
                "pipe server dropped with pending handshakes"
            );
        }
        self.stop();
    }
}

fn wait_for_exit(child: &mut Child, timeout: Duration, mut send_terminate: bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        match child.try_wait() {
            Ok(Some(_)) => return true,
            Ok(None) => {}
            Err(err) if is_no_child(&err) => return true,
            Err(err) => {
                tracing::warn!(%err, "waiting for pipe client failed");
                return false;
            }
        }
        if send_terminate {
            send_terminate = false;
            terminate(child);
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(EXIT_POLL_INTERVAL);
    }
}

#[cfg(unix)]
fn is_no_child(err: &io::Error) -> bool {
    err.raw_os_error() == Some(libc::ECHILD)
}

#[cfg(not(unix))]
fn is_no_child(_err: &io::Error) -> bool {
    false
}

#[cfg(unix)]
fn terminate(child: &mut Child) {
    let Ok(pid) = libc::pid_t::try_from(child.id()) else {
        return;
    };
    // SAFETY: plain syscall on a pid we spawned and have not reaped yet.
    if unsafe { libc::kill(pid, libc::SIGTERM) } != 0 {
        tracing::debug!(pid, err = %io::Error::last_os_error(), "SIGTERM failed");
    }
}

#[cfg(not(unix))]
fn terminate(child: &mut Child) {
    let _ = child.kill();
}

fn kill_and_reap(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}
