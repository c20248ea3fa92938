//! Minimal pipe client used by the integration tests.
//!
//! `HARMONIQ_PIPE_PEER` selects the behaviour: `echo` (default), `silent`
//! (never answers `ping`), `mute` (never reports ready) or `exit` (announces
//! its own exit right after starting).

use std::io::Read;
use std::time::Duration;

use anyhow::Result;
use harmoniq_pipe::line::{split_command, IDLE};
use harmoniq_pipe::{PipeClient, PipeConfig, PipeHandler};
use tracing_subscriber::EnvFilter;

struct Peer<'a> {
    client: &'a PipeClient,
    answer_pings: bool,
}

impl PipeHandler for Peer<'_> {
    fn message_received(&mut self, line: &str) -> bool {
        let channel = self.client.channel();
        match split_command(line) {
            ("ping", token) => {
                if self.answer_pings {
                    channel.write_message(&format!("pong {token}"));
                }
                true
            }
            (IDLE, _) => true,
            _ => channel.write_message(&format!("echo {line}")),
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let behaviour = std::env::var("HARMONIQ_PIPE_PEER").unwrap_or_else(|_| "echo".into());
    if behaviour == "mute" {
        let mut sink = Vec::new();
        std::io::stdin().read_to_end(&mut sink)?;
        return Ok(());
    }

    let mut client = PipeClient::from_stdio(PipeConfig::default())?;
    if behaviour == "exit" {
        client.write_exiting_message_and_wait();
        return Ok(());
    }

    let answer_pings = behaviour != "silent";
    while client.is_running() {
        let mut peer = Peer {
            client: &client,
            answer_pings,
        };
        client
            .channel()
            .idle_timeout(&mut peer, Duration::from_millis(100));
    }
    Ok(())
}
