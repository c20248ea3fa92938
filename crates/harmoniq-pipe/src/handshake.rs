use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::PipeError;

struct Pending {
    id: u64,
    action: String,
    replies: Vec<String>,
    reply: Option<String>,
}

impl Pending {
    fn matches(&self, line: &str) -> bool {
        self.reply.is_none()
            && self.replies.iter().any(|prefix| {
                line.strip_prefix(prefix.as_str())
                    .is_some_and(|rest| rest.is_empty() || rest.starts_with(' '))
            })
    }
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    pending: Vec<Pending>,
    closed: bool,
}

/// Outstanding request/reply exchanges of one pipe.
///
/// The reader thread offers every incoming line here first; a line matching a
/// pending reply prefix wakes the waiting requester instead of being dispatched.
#[derive(Default)]
pub(crate) struct HandshakeRegistry {
    registry: Mutex<Registry>,
    replied: Condvar,
}

impl HandshakeRegistry {
    pub(crate) fn open(&self, action: &str, replies: &[&str]) -> Result<u64, PipeError> {
        let mut registry = self.registry.lock();
        if registry.closed {
            return Err(PipeError::Closed);
        }
        registry.next_id += 1;
        let id = registry.next_id;
        registry.pending.push(Pending {
            id,
            action: action.to_owned(),
            replies: replies.iter().map(|reply| (*reply).to_owned()).collect(),
            reply: None,
        });
        Ok(id)
    }

    /// Hands `line` to the oldest matching handshake. Returns `false` if nobody
    /// was waiting for it.
    pub(crate) fn offer(&self, line: &str) -> bool {
        let mut registry = self.registry.lock();
        let Some(pending) = registry.pending.iter_mut().find(|p| p.matches(line)) else {
            return false;
        };
        pending.reply = Some(line.to_owned());
        self.replied.notify_all();
        true
    }

    /// Blocks until handshake `id` is answered, the pipe closes or `timeout`
    /// passes. On timeout the handshake is dropped and a late reply will be
    /// dispatched like any other message.
    pub(crate) fn wait(&self, id: u64, timeout: Duration) -> Result<String, PipeError> {
        let deadline = Instant::now() + timeout;
        let mut registry = self.registry.lock();
        loop {
            let Some(pos) = registry.pending.iter().position(|p| p.id == id) else {
                return Err(PipeError::Closed);
            };
            if let Some(reply) = registry.pending[pos].reply.take() {
                registry.pending.remove(pos);
                return Ok(reply);
            }
            if registry.closed {
                registry.pending.remove(pos);
                return Err(PipeError::Closed);
            }
            if self.replied.wait_until(&mut registry, deadline).timed_out() {
                let Some(pos) = registry.pending.iter().position(|p| p.id == id) else {
                    return Err(PipeError::Closed);
                };
                let pending = registry.pending.remove(pos);
                if let Some(reply) = pending.reply {
                    return Ok(reply);
                }
                tracing::warn!(action = %pending.action, ?timeout, "abandoning handshake");
                return Err(PipeError::HandshakeTimeout {
                    action: pending.action,
                    timeout,
                });
            }
        }
    }

    /// Withdraws a handshake whose request never made it out.
    pub(crate) fn cancel(&self, id: u64) {
        self.registry.lock().pending.retain(|p| p.id != id);
    }

    /// Fails every current and future handshake.
    pub(crate) fn close(&self) {
        let mut registry = self.registry.lock();
        registry.closed = true;
        self.replied.notify_all();
    }

    pub(crate) fn pending_count(&self) -> usize {
        self.registry.lock().pending.len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn reply_wakes_the_waiter() {
        let registry = Arc::new(HandshakeRegistry::default());
        let id = registry.open("ping", &["pong"]).unwrap();
        let replier = {
            let registry = Arc::clone(&registry);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                assert!(!registry.offer("pongo"));
                assert!(registry.offer("pong 7"));
            })
        };
        let reply = registry.wait(id, Duration::from_secs(5)).unwrap();
        replier.join().unwrap();
        assert_eq!(reply, "pong 7");
        assert_eq!(registry.pending_count(), 0);
    }

    #[test]
    fn timeout_abandons_only_that_handshake() {
        let registry = HandshakeRegistry::default();
        let id = registry.open("ping", &["pong"]).unwrap();
        let err = registry.wait(id, Duration::from_millis(30)).unwrap_err();
        assert!(matches!(err, PipeError::HandshakeTimeout { ref action, .. } if action == "ping"));
        assert_eq!(registry.pending_count(), 0);
        assert!(!registry.offer("pong"), "late replies are not swallowed");
    }

    #[test]
    fn close_fails_pending_and_future_handshakes() {
        let registry = Arc::new(HandshakeRegistry::default());
        let id = registry.open("save", &["reply save"]).unwrap();
        let closer = {
            let registry = Arc::clone(&registry);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                registry.close();
            })
        };
        assert!(matches!(
            registry.wait(id, Duration::from_secs(5)),
            Err(PipeError::Closed)
        ));
        closer.join().unwrap();
        assert!(matches!(registry.open("x", &["y"]), Err(PipeError::Closed)));
    }
}
