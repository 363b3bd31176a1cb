//! Unsolicited event classification and routing.
//!
//! Frames that the correlator does not claim are unsolicited daemon events.
//! Each is classified by its `type` field into an [`EventKind`] and handed to
//! the handlers registered for that kind (plus any catch-all handlers).
//! Handler invocation is fire-and-forget: an error is logged and dispatch
//! continues with the next frame.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde_json::Value;

/// Classification of an unsolicited daemon frame.
///
/// Unknown or future daemon types map to `Unrecognized` instead of failing,
/// so protocol additions do not break the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A pushed message envelope (text, attachments, reactions, typing).
    IncomingMessage,
    /// Delivery receipt for a previously sent message.
    DeliveryReceipt,
    /// Standalone typing notification.
    TypingIndicator,
    /// Subscription or upstream-link state change.
    SubscriptionState,
    /// Daemon-reported error not tied to a pending request.
    Error,
    /// Anything the bridge does not know about.
    Unrecognized,
}

impl EventKind {
    /// Map a daemon `type` string to an event kind.
    pub fn classify(type_name: &str) -> Self {
        match type_name {
            "IncomingMessage" => EventKind::IncomingMessage,
            "receipt" => EventKind::DeliveryReceipt,
            "typing" => EventKind::TypingIndicator,
            "ListenerState" | "WebSocketConnectionState" => EventKind::SubscriptionState,
            "ExceptionWrapper" | "unexpected_error" => EventKind::Error,
            _ => EventKind::Unrecognized,
        }
    }
}

/// One unsolicited event, constructed from a parsed frame and consumed
/// immediately by the handlers. Never persisted.
#[derive(Debug, Clone)]
pub struct InboundEvent {
    pub kind: EventKind,
    /// The daemon's literal `type` string (empty when absent).
    pub type_name: String,
    /// The event payload: the frame's `data` field when present, otherwise
    /// the whole frame.
    pub payload: Value,
}

impl InboundEvent {
    /// Build an event from an unsolicited frame.
    pub fn from_frame(frame: &Value) -> Self {
        let type_name = frame
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let payload = frame
            .get("data")
            .cloned()
            .unwrap_or_else(|| frame.clone());
        Self {
            kind: EventKind::classify(&type_name),
            type_name,
            payload,
        }
    }
}

/// Handler invoked for a dispatched event. Errors are caught and logged.
pub type EventHandler = Arc<dyn Fn(&InboundEvent) -> anyhow::Result<()> + Send + Sync>;

/// Handler registry keyed by event kind, with optional catch-all handlers.
#[derive(Default)]
pub struct EventDispatcher {
    by_kind: RwLock<HashMap<EventKind, Vec<EventHandler>>>,
    catch_all: RwLock<Vec<EventHandler>>,
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher").finish_non_exhaustive()
    }
}

impl EventDispatcher {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for one event kind.
    pub fn register<F>(&self, kind: EventKind, handler: F)
    where
        F: Fn(&InboundEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let mut by_kind = self.by_kind.write().expect("handler lock poisoned");
        by_kind.entry(kind).or_default().push(Arc::new(handler));
    }

    /// Register a handler invoked for every event kind.
    pub fn register_all<F>(&self, handler: F)
    where
        F: Fn(&InboundEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let mut catch_all = self.catch_all.write().expect("handler lock poisoned");
        catch_all.push(Arc::new(handler));
    }

    /// Classify an unsolicited frame and invoke its handlers.
    ///
    /// Handler errors are logged and swallowed; a failing handler never stops
    /// dispatch of subsequent frames or of the remaining handlers for this
    /// one.
    pub fn dispatch(&self, frame: &Value) {
        let event = InboundEvent::from_frame(frame);
        if event.kind == EventKind::Unrecognized {
            log::debug!(
                "[Dispatch] unrecognized event type {:?}",
                event.type_name
            );
        }

        // Clone handlers out so no lock is held while they run.
        let mut handlers: Vec<EventHandler> = {
            let by_kind = self.by_kind.read().expect("handler lock poisoned");
            by_kind.get(&event.kind).cloned().unwrap_or_default()
        };
        {
            let catch_all = self.catch_all.read().expect("handler lock poisoned");
            handlers.extend(catch_all.iter().cloned());
        }

        for handler in handlers {
            if let Err(e) = handler(&event) {
                log::error!(
                    "[Dispatch] handler failed for {:?} event: {e:#}",
                    event.kind
                );
            }
        }
    }
}
