use std::io::{self, Read, Write};
use std::time::Duration;

use crate::channel::{PipeChannel, PipeHandler, PipeState};
use crate::config::PipeConfig;
use crate::error::PipeError;
use crate::line::EXITING;

const EXIT_WAIT_ATTEMPTS: usize = 100;
const EXIT_WAIT_INTERVAL: Duration = Duration::from_millis(50);

/// Helper-process side of a pipe session.
///
/// The spawning server owns our stdin/stdout; any contextual arguments (sample
/// rate, window title, ...) arrive through the regular argument vector.
pub struct PipeClient {
    channel: PipeChannel,
    exiting: bool,
}

impl PipeClient {
    /// Attaches to the process's standard streams and reports ready.
    pub fn from_stdio(config: PipeConfig) -> Result<Self, PipeError> {
        set_parent_death_signal();
        Self::from_streams(io::stdin(), io::stdout(), config)
    }

    /// Attaches to arbitrary streams and reports ready with an empty line.
    pub fn from_streams<R, W>(source: R, sink: W, config: PipeConfig) -> Result<Self, PipeError>
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        let channel = PipeChannel::new(source, sink, config, "client")?;
        if !channel.write_message("") {
            return Err(PipeError::Closed);
        }
        channel.transition(PipeState::Running);
        Ok(Self {
            channel,
            exiting: false,
        })
    }

    pub fn channel(&self) -> &PipeChannel {
        &self.channel
    }

    pub fn is_running(&self) -> bool {
        !self.channel.is_closed()
    }

    /// Dispatches pending messages. Nothing is dispatched after
    /// [`write_exiting_message_and_wait`](Self::write_exiting_message_and_wait).
    pub fn idle<H: PipeHandler + ?Sized>(&mut self, handler: &mut H) -> usize {
        if self.exiting {
            return 0;
        }
        self.channel.idle(handler)
    }

    /// Waits up to `timeout` for work, then dispatches everything pending.
    pub fn idle_timeout<H: PipeHandler + ?Sized>(&mut self, handler: &mut H, timeout: Duration) -> usize {
        if self.exiting {
            return 0;
        }
        self.channel.idle_timeout(handler, timeout)
    }

    /// Tells the server we are leaving and waits (about five seconds at most)
    /// for it to acknowledge with `quit`.
    pub fn write_exiting_message_and_wait(&mut self) {
        self.exiting = true;
        if self.channel.write_message(EXITING)
            && !self.channel.wait_for_quit(EXIT_WAIT_ATTEMPTS, EXIT_WAIT_INTERVAL)
        {
            tracing::warn!("server did not acknowledge exit");
        }
        self.close();
    }

    pub fn close(&mut self) {
        self.channel.close_writer();
        self.channel.transition(PipeState::Closed);
    }
}

#[cfg(target_os = "linux")]
fn set_parent_death_signal() {
    // SAFETY: prctl with PR_SET_PDEATHSIG only reads the integer argument.
    let rc = unsafe { libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGKILL as libc::c_ulong) };
    if rc != 0 {
        tracing::debug!(err = %io::Error::last_os_error(), "PR_SET_PDEATHSIG failed");
    }
}

#[cfg(not(target_os = "linux"))]
fn set_parent_death_signal() {}
