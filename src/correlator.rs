//! Request/response correlation.
//!
//! Every outgoing request gets a fresh UUID embedded in its `id` field and a
//! pending entry holding a oneshot completion slot. The read loop resolves
//! entries when a frame echoes a known id; disconnect and shutdown fail all
//! entries at once. The table lock is only held for insert/resolve/fail,
//! never across an await.

use std::collections::HashMap;
use std::sync::Mutex;

use serde_json::Value;
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::error::BridgeError;

/// Completion slot for one pending request.
type Slot = oneshot::Sender<Result<Value, BridgeError>>;

/// Why all pending requests are being failed at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailReason {
    /// The transport dropped; the connection manager will reconnect.
    ConnectionLost,
    /// Explicit shutdown; nothing will reconnect.
    Shutdown,
}

impl FailReason {
    fn to_error(self) -> BridgeError {
        match self {
            FailReason::ConnectionLost => BridgeError::ConnectionLost,
            FailReason::Shutdown => BridgeError::Shutdown,
        }
    }
}

/// Pending-request table keyed by correlation id.
#[derive(Debug, Default)]
pub struct Correlator {
    pending: Mutex<HashMap<String, Slot>>,
}

impl Correlator {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new pending request.
    ///
    /// Returns the fresh correlation id and the receiver that completes when
    /// the daemon responds or the connection fails. Ids are UUID v4; the
    /// table refuses to reuse an id that is still pending.
    pub fn register(&self) -> (String, oneshot::Receiver<Result<Value, BridgeError>>) {
        let (tx, rx) = oneshot::channel();
        let mut pending = self.pending.lock().expect("pending lock poisoned");
        loop {
            let id = Uuid::new_v4().to_string();
            if pending.contains_key(&id) {
                continue;
            }
            pending.insert(id.clone(), tx);
            return (id, rx);
        }
    }

    /// Resolve the pending request matching `id`, if any.
    ///
    /// Returns `true` if a pending entry consumed the frame. A frame carrying
    /// an `error_type` or `error` field resolves the request with
    /// [`BridgeError::DaemonError`]; anything else resolves it with the frame
    /// itself. At most one resolution per entry: the slot is removed before
    /// completion, so a duplicate or late frame finds nothing.
    pub fn resolve(&self, id: &str, frame: &Value) -> bool {
        let slot = {
            let mut pending = self.pending.lock().expect("pending lock poisoned");
            pending.remove(id)
        };
        let Some(slot) = slot else {
            return false;
        };

        let result = match daemon_error(frame) {
            Some(error) => Err(error),
            None => Ok(frame.clone()),
        };
        // The waiter may have given up (deadline raced the response).
        let _ = slot.send(result);
        true
    }

    /// Drop the pending entry for `id` without resolving it.
    ///
    /// Called when a deadline elapses; a response arriving afterwards finds
    /// no entry and is ignored.
    pub fn abandon(&self, id: &str) {
        let mut pending = self.pending.lock().expect("pending lock poisoned");
        pending.remove(id);
    }

    /// Fail every pending request with the given reason.
    pub fn fail_all(&self, reason: FailReason) {
        let drained: Vec<Slot> = {
            let mut pending = self.pending.lock().expect("pending lock poisoned");
            pending.drain().map(|(_, slot)| slot).collect()
        };
        if !drained.is_empty() {
            log::warn!(
                "[Correlator] failing {} pending request(s): {:?}",
                drained.len(),
                reason
            );
        }
        for slot in drained {
            let _ = slot.send(Err(reason.to_error()));
        }
    }

    /// Number of requests currently awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().expect("pending lock poisoned").len()
    }
}

/// Extract a daemon rejection from a response frame, if present.
fn daemon_error(frame: &Value) -> Option<BridgeError> {
    let error_type = frame.get("error_type");
    let error = frame.get("error");
    if error_type.is_none() && error.is_none() {
        return None;
    }

    let error_type = error_type
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string();
    // The error field is an object with a message in v1, but older daemons
    // send a bare string.
    let message = match error {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Object(map)) => map
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        _ => String::new(),
    };
    Some(BridgeError::DaemonError {
        error_type,
        message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_resolve_matches_registered_id() {
        let correlator = Correlator::new();
        let (id, rx) = correlator.register();

        let frame = json!({ "id": id, "data": { "ok": true } });
        assert!(correlator.resolve(&id, &frame));

        let result = rx.await.unwrap().unwrap();
        assert_eq!(result["data"]["ok"], true);
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_interleaved_responses_reach_their_own_waiters() {
        let correlator = Correlator::new();
        let (id_a, rx_a) = correlator.register();
        let (id_b, rx_b) = correlator.register();
        assert_ne!(id_a, id_b);

        // Resolve in reverse order of registration.
        assert!(correlator.resolve(&id_b, &json!({ "id": id_b, "data": "b" })));
        assert!(correlator.resolve(&id_a, &json!({ "id": id_a, "data": "a" })));

        assert_eq!(rx_a.await.unwrap().unwrap()["data"], "a");
        assert_eq!(rx_b.await.unwrap().unwrap()["data"], "b");
    }

    #[test]
    fn test_unknown_id_is_not_consumed() {
        let correlator = Correlator::new();
        let (_id, _rx) = correlator.register();
        assert!(!correlator.resolve("no-such-id", &json!({ "id": "no-such-id" })));
        assert_eq!(correlator.pending_count(), 1);
    }

    #[tokio::test]
    async fn test_daemon_error_frame_resolves_as_error() {
        let correlator = Correlator::new();
        let (id, rx) = correlator.register();

        let frame = json!({
            "id": id,
            "error_type": "InvalidRecipientError",
            "error": { "message": "no such account" }
        });
        assert!(correlator.resolve(&id, &frame));

        match rx.await.unwrap() {
            Err(BridgeError::DaemonError {
                error_type,
                message,
            }) => {
                assert_eq!(error_type, "InvalidRecipientError");
                assert_eq!(message, "no such account");
            }
            other => panic!("expected DaemonError, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_fail_all_wakes_every_waiter() {
        let correlator = Correlator::new();
        let (_a, rx_a) = correlator.register();
        let (_b, rx_b) = correlator.register();
        let (_c, rx_c) = correlator.register();

        correlator.fail_all(FailReason::ConnectionLost);
        assert_eq!(correlator.pending_count(), 0);

        for rx in [rx_a, rx_b, rx_c] {
            assert!(matches!(
                rx.await.unwrap(),
                Err(BridgeError::ConnectionLost)
            ));
        }
    }

    #[tokio::test]
    async fn test_abandoned_request_ignores_late_response() {
        let correlator = Correlator::new();
        let (id, rx) = correlator.register();

        correlator.abandon(&id);
        drop(rx);

        // Late response finds nothing; at-most-once holds.
        assert!(!correlator.resolve(&id, &json!({ "id": id, "data": "late" })));
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_at_most_one_resolution() {
        let correlator = Correlator::new();
        let (id, rx) = correlator.register();

        assert!(correlator.resolve(&id, &json!({ "id": id, "data": 1 })));
        assert!(!correlator.resolve(&id, &json!({ "id": id, "data": 2 })));

        assert_eq!(rx.await.unwrap().unwrap()["data"], 1);
    }

    #[test]
    fn test_bare_string_error_field() {
        let error = daemon_error(&json!({ "error": "boom" })).unwrap();
        match error {
            BridgeError::DaemonError {
                error_type,
                message,
            } => {
                assert_eq!(error_type, "unknown");
                assert_eq!(message, "boom");
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
