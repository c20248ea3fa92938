use std::path::PathBuf;
use std::process::Command;
use std::time::{Duration, Instant};

use harmoniq_pipe::{PipeConfig, PipeError, PipeHandler, PipeServer, PipeState};
use pretty_assertions::assert_eq;

fn peer_executable() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_harmoniq-pipe-peer"))
}

fn start_peer(behaviour: &str, config: PipeConfig) -> Result<PipeServer, PipeError> {
    let mut command = Command::new(peer_executable());
    command.env("HARMONIQ_PIPE_PEER", behaviour);
    PipeServer::spawn(command, config)
}

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

fn idle_until<F>(server: &mut PipeServer, recorder: &mut Recorder, mut done: F) -> bool
where
    F: FnMut(&Recorder) -> bool,
{
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        server.idle(recorder);
        if done(recorder) {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    false
}

#[test]
fn echo_peer_round_trip_and_graceful_stop() {
    let mut server = start_peer("echo", PipeConfig::default()).expect("peer starts");
    assert_eq!(server.state(), PipeState::Running);
    assert!(server.is_running());

    {
        let mut writer = server.channel().lock();
        assert!(writer.write_message("one"));
        assert!(writer.write_message("two"));
        assert!(writer.sync_and_unlock());
    }
    let mut recorder = Recorder::default();
    assert!(idle_until(&mut server, &mut recorder, |r| r.lines.len() >= 2));
    assert_eq!(recorder.lines, vec!["echo one", "echo two"]);

    let reply = server
        .channel()
        .request("ping", "ping 7", &["pong"], Duration::from_secs(5))
        .unwrap();
    assert_eq!(reply, "pong 7");

    server.stop();
    assert_eq!(server.state(), PipeState::Closed);
    assert!(!server.is_running());
}

#[cfg(unix)]
#[test]
fn killed_peer_is_reported_as_crashed_exactly_once() {
    let mut server = start_peer("echo", PipeConfig::default()).expect("peer starts");
    let pid = libc::pid_t::try_from(server.pid()).unwrap();
    assert_eq!(unsafe { libc::kill(pid, libc::SIGKILL) }, 0);

    let deadline = Instant::now() + Duration::from_secs(5);
    while server.is_running() {
        assert!(Instant::now() < deadline, "kill was never observed");
        std::thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(server.state(), PipeState::Crashed);

    let mut recorder = Recorder::default();
    server.idle(&mut recorder);
    server.idle(&mut recorder);
    assert_eq!(recorder.closed, vec![PipeState::Crashed]);
}

#[cfg(unix)]
#[test]
fn client_reaped_elsewhere_ends_the_session_as_crashed() {
    let mut server = start_peer("echo", PipeConfig::default()).expect("peer starts");
    let pid = libc::pid_t::try_from(server.pid()).unwrap();
    let mut status = 0;
    unsafe {
        assert_eq!(libc::kill(pid, libc::SIGKILL), 0);
        assert_eq!(libc::waitpid(pid, &mut status, 0), pid);
    }

    assert!(!server.is_running());
    assert_eq!(server.state(), PipeState::Crashed);
    assert!(!server.is_running());

    let mut recorder = Recorder::default();
    server.idle(&mut recorder);
    assert_eq!(recorder.closed, vec![PipeState::Crashed]);
}

#[test]
fn silent_startup_times_out() {
    let config = PipeConfig {
        startup_timeout: Duration::from_millis(300),
        ..PipeConfig::default()
    };
    match start_peer("mute", config) {
        Err(PipeError::StartupTimeout { timeout, .. }) => {
            assert_eq!(timeout, Duration::from_millis(300));
        }
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("mute peer must not start"),
    }
}

#[test]
fn missing_program_fails_to_spawn() {
    let result = PipeServer::start(
        "/nonexistent/harmoniq-pipe-peer",
        std::iter::empty::<&str>(),
        PipeConfig::default(),
    );
    assert!(matches!(result, Err(PipeError::Spawn { .. })));
}

#[test]
fn announced_exit_closes_the_session_cleanly() {
    let mut server = start_peer("exit", PipeConfig::default()).expect("peer starts");
    let mut recorder = Recorder::default();
    assert!(idle_until(&mut server, &mut recorder, |r| !r.closed.is_empty()));
    assert_eq!(recorder.lines, vec!["exiting"]);
    assert_eq!(recorder.closed, vec![PipeState::Closed]);
}

#[test]
fn unanswered_ping_does_not_stall_the_session() {
    let mut server = start_peer("silent", PipeConfig::default()).expect("peer starts");
    let err = server
        .channel()
        .request("ping", "ping 1", &["pong"], Duration::from_millis(200))
        .unwrap_err();
    assert!(matches!(err, PipeError::HandshakeTimeout { .. }));

    assert!(server.channel().write_message("still-there"));
    let mut recorder = Recorder::default();
    assert!(idle_until(&mut server, &mut recorder, |r| r
        .lines
        .iter()
        .any(|l| l == "echo still-there")));
}
