//! Socket lifecycle and reconnect policy.
//!
//! One [`ConnectionManager`] owns the Unix-socket connection to the daemon:
//! it establishes the initial connection, runs the read loop that routes
//! inbound frames to the correlator or the event dispatcher, and reconnects
//! with capped exponential backoff when the transport drops. Link state is
//! published through a `watch` channel so the facade can re-subscribe after
//! every reconnect.
//!
//! Writes never queue: while disconnected, `send_frame` fails immediately
//! with `NotConnected` and the caller decides what to do.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::sync::{oneshot, watch, Mutex};

use crate::codec::LineCodec;
use crate::correlator::{Correlator, FailReason};
use crate::dispatch::EventDispatcher;
use crate::error::{BridgeError, Result};

/// Reconnection backoff configuration.
const INITIAL_BACKOFF_SECS: u64 = 1;
const MAX_BACKOFF_SECS: u64 = 30;

/// Read buffer size for the socket read loop.
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Published state of the daemon link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkState {
    /// No socket; nothing is trying to connect.
    Disconnected,
    /// A connect attempt is in flight.
    Connecting,
    /// Connected and routing frames.
    Connected,
    /// The transport dropped; waiting out the backoff before retrying.
    Reconnecting { attempt: u32 },
    /// Explicit shutdown in progress; no reconnect will follow.
    Closing,
}

/// State shared between the manager handle and its supervise task.
struct Shared {
    candidates: Vec<PathBuf>,
    correlator: Arc<Correlator>,
    dispatcher: Arc<EventDispatcher>,
    writer: Mutex<Option<OwnedWriteHalf>>,
    state_tx: watch::Sender<LinkState>,
    closing: AtomicBool,
}

impl Shared {
    fn set_state(&self, state: LinkState) {
        let _ = self.state_tx.send_replace(state);
    }

    /// Drop the write half and fail everything in flight.
    async fn teardown(&self, reason: FailReason) {
        let writer = self.writer.lock().await.take();
        drop(writer);
        self.correlator.fail_all(reason);
    }
}

/// Owns the socket connection to the daemon.
pub struct ConnectionManager {
    shared: Arc<Shared>,
    shutdown_tx: std::sync::Mutex<Option<oneshot::Sender<()>>>,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("candidates", &self.shared.candidates)
            .field("state", &*self.shared.state_tx.borrow())
            .finish_non_exhaustive()
    }
}

impl ConnectionManager {
    pub fn new(
        candidates: Vec<PathBuf>,
        correlator: Arc<Correlator>,
        dispatcher: Arc<EventDispatcher>,
    ) -> Self {
        let (state_tx, _) = watch::channel(LinkState::Disconnected);
        Self {
            shared: Arc::new(Shared {
                candidates,
                correlator,
                dispatcher,
                writer: Mutex::new(None),
                state_tx,
                closing: AtomicBool::new(false),
            }),
            shutdown_tx: std::sync::Mutex::new(None),
        }
    }

    /// Subscribe to link state changes.
    pub fn state(&self) -> watch::Receiver<LinkState> {
        self.shared.state_tx.subscribe()
    }

    /// Establish the initial connection and start the supervise task.
    ///
    /// The first attempt surfaces its error to the caller so a bad socket
    /// path fails loudly at startup; only drops of an established connection
    /// are retried silently.
    pub async fn connect(&self) -> Result<()> {
        if self.shared.closing.load(Ordering::SeqCst) {
            return Err(BridgeError::Closed);
        }
        {
            let writer = self.shared.writer.lock().await;
            if writer.is_some() {
                return Ok(());
            }
        }

        self.shared.set_state(LinkState::Connecting);
        let stream = match connect_socket(&self.shared.candidates).await {
            Ok(stream) => stream,
            Err(e) => {
                self.shared.set_state(LinkState::Disconnected);
                return Err(e);
            }
        };
        let (read_half, write_half) = stream.into_split();
        *self.shared.writer.lock().await = Some(write_half);
        self.shared.set_state(LinkState::Connected);
        log::info!("[Connection] connected to daemon socket");

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        *self.shutdown_tx.lock().expect("shutdown lock poisoned") = Some(shutdown_tx);
        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            supervise(shared, read_half, shutdown_rx).await;
        });
        Ok(())
    }

    /// Write one encoded frame to the daemon.
    ///
    /// # Errors
    ///
    /// `Closed` after shutdown, `NotConnected` while the link is down, and
    /// `ConnectionLost` when the write itself fails (the supervise task then
    /// reconnects).
    pub async fn send_frame(&self, bytes: &[u8]) -> Result<()> {
        if self.shared.closing.load(Ordering::SeqCst) {
            return Err(BridgeError::Closed);
        }
        let mut writer = self.shared.writer.lock().await;
        let Some(write_half) = writer.as_mut() else {
            return Err(BridgeError::NotConnected);
        };
        if let Err(e) = write_half.write_all(bytes).await {
            log::warn!("[Connection] write failed: {e}");
            // The read loop notices the drop and handles teardown; just
            // discard our half so later writes fail fast.
            *writer = None;
            return Err(BridgeError::ConnectionLost);
        }
        Ok(())
    }

    /// Shut the connection down permanently.
    ///
    /// Pending requests fail with `Shutdown` and no reconnect follows. Safe
    /// to call more than once.
    pub async fn close(&self) {
        if self.shared.closing.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shared.set_state(LinkState::Closing);
        let shutdown_tx = self
            .shutdown_tx
            .lock()
            .expect("shutdown lock poisoned")
            .take();
        if let Some(tx) = shutdown_tx {
            let _ = tx.send(());
        }
        self.shared.teardown(FailReason::Shutdown).await;
        self.shared.set_state(LinkState::Disconnected);
        log::info!("[Connection] closed");
    }
}

/// Try each candidate path once; first success wins.
async fn connect_socket(candidates: &[PathBuf]) -> Result<UnixStream> {
    let mut last_err: Option<std::io::Error> = None;
    for path in candidates {
        match UnixStream::connect(path).await {
            Ok(stream) => {
                log::debug!("[Connection] socket {path:?} accepted");
                return Ok(stream);
            }
            Err(e) => {
                log::debug!("[Connection] socket {path:?} unavailable: {e}");
                last_err = Some(e);
            }
        }
    }
    Err(match last_err {
        Some(e) => BridgeError::Io(e),
        None => BridgeError::NotConnected,
    })
}

/// Read loop plus reconnect loop. Runs until shutdown.
async fn supervise(
    shared: Arc<Shared>,
    first_read_half: OwnedReadHalf,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    let mut read_half = Some(first_read_half);
    let mut backoff_secs = INITIAL_BACKOFF_SECS;
    let mut attempt: u32 = 0;

    loop {
        if let Some(half) = read_half.take() {
            let shutdown_requested = read_loop(&shared, half, &mut shutdown_rx).await;
            if shutdown_requested {
                // close() handles teardown and state.
                return;
            }
            if shared.closing.load(Ordering::SeqCst) {
                return;
            }

            log::warn!("[Connection] daemon connection lost");
            shared.teardown(FailReason::ConnectionLost).await;
            shared.set_state(LinkState::Disconnected);
            backoff_secs = INITIAL_BACKOFF_SECS;
            attempt = 0;
        }

        // Exponential backoff with jitter
        let jitter_ms = rand::random::<u64>() % 1000;
        let wait_ms = backoff_secs * 1000 + jitter_ms;
        attempt += 1;
        shared.set_state(LinkState::Reconnecting { attempt });
        log::info!(
            "[Connection] reconnecting in {:.1}s (attempt {attempt})",
            wait_ms as f32 / 1000.0
        );

        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(wait_ms)) => {}
            _ = &mut shutdown_rx => {
                log::info!("[Connection] shutdown during reconnect backoff");
                return;
            }
        }
        backoff_secs = (backoff_secs * 2).min(MAX_BACKOFF_SECS);

        match connect_socket(&shared.candidates).await {
            Ok(stream) => {
                // close() may have raced the connect attempt.
                if shared.closing.load(Ordering::SeqCst) {
                    return;
                }
                let (new_read, new_write) = stream.into_split();
                *shared.writer.lock().await = Some(new_write);
                read_half = Some(new_read);
                backoff_secs = INITIAL_BACKOFF_SECS;
                attempt = 0;
                shared.set_state(LinkState::Connected);
                log::info!("[Connection] reconnected to daemon socket");
            }
            Err(e) => {
                log::warn!("[Connection] reconnect attempt failed: {e}");
            }
        }
    }
}

/// Read frames until the connection drops. Returns `true` on shutdown.
async fn read_loop(
    shared: &Shared,
    mut read_half: OwnedReadHalf,
    shutdown_rx: &mut oneshot::Receiver<()>,
) -> bool {
    // Fresh codec per connection: a partial line never crosses a reconnect.
    let mut codec = LineCodec::new();
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    loop {
        tokio::select! {
            result = read_half.read(&mut buf) => {
                match result {
                    Ok(0) => {
                        log::info!("[Connection] daemon closed the socket");
                        return false;
                    }
                    Ok(n) => {
                        for frame in codec.feed(&buf[..n]) {
                            match frame {
                                Ok(frame) => route_frame(shared, &frame),
                                Err(e) => {
                                    log::warn!("[Connection] dropping bad frame: {e}");
                                }
                            }
                        }
                    }
                    Err(e) => {
                        log::warn!("[Connection] read failed: {e}");
                        return false;
                    }
                }
            }
            _ = &mut *shutdown_rx => {
                log::info!("[Connection] shutdown signal received");
                return true;
            }
        }
    }
}

/// Hand one parsed frame to the correlator, or the dispatcher if no pending
/// request claims it.
fn route_frame(shared: &Shared, frame: &serde_json::Value) {
    if let Some(id) = frame.get("id").and_then(serde_json::Value::as_str) {
        if shared.correlator.resolve(id, frame) {
            return;
        }
        // Stale response: the waiter already timed out or abandoned.
        log::debug!("[Connection] response for unknown id {id:?}, ignoring");
    }
    shared.dispatcher.dispatch(frame);
}
