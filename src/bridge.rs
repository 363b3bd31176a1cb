//! Host-facing facade.
//!
//! [`Bridge`] wires the connection manager, correlator, dispatcher, stager
//! and translator together behind a small async API: connect once, then
//! `send_message` / `send_typing` / `send_reaction` outbound and a bounded
//! channel of translated [`ChatEvent`]s inbound.
//!
//! Subscription is re-established automatically after every reconnect, and
//! incoming messages are acknowledged as read when configured.

use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::attachments::{AttachmentStager, StagedAttachment};
use crate::codec::LineCodec;
use crate::config::BridgeConfig;
use crate::connection::{ConnectionManager, LinkState};
use crate::correlator::Correlator;
use crate::dispatch::{EventDispatcher, EventKind};
use crate::error::{BridgeError, Result};
use crate::protocol::{self, Envelope, OutboundAttachment};
use crate::translate::{ChatEvent, RoomTable, Translator};

/// One outbound media item handed to [`Bridge::send_message`].
#[derive(Debug, Clone)]
pub struct OutboundMedia {
    /// Raw file contents.
    pub bytes: Vec<u8>,
    /// Declared content type, e.g. `image/png`.
    pub content_type: Option<String>,
    /// Filename shown to the receiving user.
    pub name: Option<String>,
}

type ChatHandler = Box<dyn Fn(&ChatEvent) + Send + Sync>;

struct Inner {
    config: BridgeConfig,
    connection: ConnectionManager,
    correlator: Arc<Correlator>,
    dispatcher: Arc<EventDispatcher>,
    stager: AttachmentStager,
    translator: Translator,
    chat_handlers: std::sync::RwLock<Vec<ChatHandler>>,
    event_tx: mpsc::Sender<ChatEvent>,
    event_rx: std::sync::Mutex<Option<mpsc::Receiver<ChatEvent>>>,
}

/// The daemon bridge. Cheap to clone; all clones share one connection.
#[derive(Clone)]
pub struct Bridge {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("bot_number", &self.inner.config.bot_number)
            .finish_non_exhaustive()
    }
}

impl Bridge {
    /// Build a bridge from configuration. Nothing connects until
    /// [`Bridge::connect`].
    pub fn new(config: BridgeConfig) -> Self {
        let correlator = Arc::new(Correlator::new());
        let dispatcher = Arc::new(EventDispatcher::new());
        let connection = ConnectionManager::new(
            config.socket_candidates(),
            Arc::clone(&correlator),
            Arc::clone(&dispatcher),
        );
        let stager = AttachmentStager::new(config.staging_dir.clone());
        let translator = Translator::new(RoomTable::new(
            config.rooms.clone(),
            &config.whitelisted_numbers,
        ));
        let (event_tx, event_rx) = mpsc::channel(config.event_queue_depth);

        let inner = Arc::new(Inner {
            config,
            connection,
            correlator,
            dispatcher,
            stager,
            translator,
            chat_handlers: std::sync::RwLock::new(Vec::new()),
            event_tx,
            event_rx: std::sync::Mutex::new(Some(event_rx)),
        });

        // Weak so the handler never keeps the bridge alive on its own.
        let weak = Arc::downgrade(&inner);
        inner
            .dispatcher
            .register(EventKind::IncomingMessage, move |event| {
                if let Some(inner) = weak.upgrade() {
                    Inner::handle_incoming(&inner, &event.payload);
                }
                Ok(())
            });

        Self { inner }
    }

    /// Connect to the daemon, probe its version and subscribe the bot
    /// account.
    ///
    /// Spawns the background tasks that re-subscribe after reconnects and
    /// sweep stale staged attachments. Errors here are startup errors; once
    /// connected, transport drops are handled internally.
    pub async fn connect(&self) -> Result<()> {
        self.inner.connection.connect().await?;

        match self.inner.request(protocol::version()).await {
            Ok(frame) => {
                let version = frame["data"]["version"].as_str().unwrap_or("unknown");
                log::info!("[Bridge] daemon version {version}");
            }
            Err(e) => log::warn!("[Bridge] version probe failed: {e}"),
        }
        self.inner
            .request(protocol::subscribe(&self.inner.config.bot_number))
            .await?;
        log::info!(
            "[Bridge] subscribed as {}",
            self.inner.config.bot_number
        );

        self.spawn_resubscribe_task();
        self.spawn_sweep_task();
        Ok(())
    }

    /// Send a text message and/or media to a room alias, raw address or
    /// group identifier.
    ///
    /// Media is staged on disk for the daemon and released again once the
    /// request resolves, whether it succeeded or not.
    pub async fn send_message(
        &self,
        target: &str,
        text: Option<&str>,
        media: &[OutboundMedia],
    ) -> Result<()> {
        let recipient = self.inner.translator.table().resolve_target(target)?;

        let mut staged: Vec<StagedAttachment> = Vec::with_capacity(media.len());
        let mut outbound: Vec<OutboundAttachment> = Vec::with_capacity(media.len());
        for item in media {
            match self
                .inner
                .stager
                .stage(&item.bytes, item.content_type.as_deref())
                .await
            {
                Ok(attachment) => {
                    outbound.push(OutboundAttachment {
                        filename: attachment.path.display().to_string(),
                        custom_filename: item.name.clone(),
                        content_type: item.content_type.clone(),
                    });
                    staged.push(attachment);
                }
                Err(e) => {
                    self.inner.release_all(&staged).await;
                    return Err(e);
                }
            }
        }

        let request = protocol::send(
            &self.inner.config.bot_number,
            &recipient,
            text,
            &outbound,
        );
        let result = self.inner.request(request).await;
        self.inner.release_all(&staged).await;
        result.map(|_| ())
    }

    /// Set or clear the typing indicator towards a target.
    pub async fn send_typing(&self, target: &str, started: bool) -> Result<()> {
        let recipient = self.inner.translator.table().resolve_target(target)?;
        self.inner
            .request(protocol::typing(
                &self.inner.config.bot_number,
                &recipient,
                started,
            ))
            .await
            .map(|_| ())
    }

    /// Send an emoji reaction to a message; an empty emoji removes a
    /// previous reaction.
    pub async fn send_reaction(
        &self,
        target: &str,
        emoji: &str,
        target_author: &str,
        target_timestamp: u64,
    ) -> Result<()> {
        let recipient = self.inner.translator.table().resolve_target(target)?;
        self.inner
            .request(protocol::react(
                &self.inner.config.bot_number,
                &recipient,
                emoji,
                target_author,
                target_timestamp,
            ))
            .await
            .map(|_| ())
    }

    /// Acknowledge message timestamps to their sender.
    pub async fn mark_read(&self, sender: &str, timestamps: &[u64]) -> Result<()> {
        self.inner
            .request(protocol::mark_read(
                &self.inner.config.bot_number,
                sender,
                timestamps,
            ))
            .await
            .map(|_| ())
    }

    /// Register a callback invoked for every translated chat event.
    ///
    /// Callbacks run on the read-loop task; anything slow belongs on the
    /// channel consumer side instead.
    pub fn on_event<F>(&self, handler: F)
    where
        F: Fn(&ChatEvent) + Send + Sync + 'static,
    {
        self.inner
            .chat_handlers
            .write()
            .expect("chat handler lock poisoned")
            .push(Box::new(handler));
    }

    /// Take the receiving end of the translated-event channel.
    ///
    /// Returns `None` after the first call; there is exactly one consumer.
    pub fn take_event_receiver(&self) -> Option<mpsc::Receiver<ChatEvent>> {
        self.inner
            .event_rx
            .lock()
            .expect("event receiver lock poisoned")
            .take()
    }

    /// The raw event dispatcher, for handlers on untranslated daemon events.
    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.inner.dispatcher
    }

    /// Subscribe to daemon link state changes.
    pub fn state(&self) -> tokio::sync::watch::Receiver<LinkState> {
        self.inner.connection.state()
    }

    /// Shut the bridge down. Pending requests fail with `Shutdown`; no
    /// reconnect follows.
    pub async fn close(&self) {
        self.inner.connection.close().await;
    }

    fn spawn_resubscribe_task(&self) {
        let mut state_rx = self.inner.connection.state();
        // Consume the current state so only future transitions fire.
        let _ = state_rx.borrow_and_update();
        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            while state_rx.changed().await.is_ok() {
                let state = state_rx.borrow_and_update().clone();
                match state {
                    LinkState::Connected => {
                        let Some(inner) = weak.upgrade() else { return };
                        log::info!("[Bridge] reconnected, re-subscribing");
                        if let Err(e) = inner
                            .request(protocol::subscribe(&inner.config.bot_number))
                            .await
                        {
                            log::warn!("[Bridge] re-subscribe failed: {e}");
                        }
                    }
                    LinkState::Closing => return,
                    _ => {}
                }
            }
        });
    }

    fn spawn_sweep_task(&self) {
        let grace = self.inner.config.release_grace();
        if grace.is_zero() {
            return;
        }
        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(grace);
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(inner) = weak.upgrade() else { return };
                let swept = inner.stager.sweep_stale(grace).await;
                if swept > 0 {
                    log::warn!("[Bridge] swept {swept} stale staged attachment(s)");
                }
            }
        });
    }
}

impl Inner {
    /// Issue one correlated request and await its response.
    async fn request(&self, mut payload: Value) -> Result<Value> {
        let (id, rx) = self.correlator.register();
        payload["id"] = json!(id);

        let bytes = match LineCodec::encode(&payload) {
            Ok(bytes) => bytes,
            Err(e) => {
                self.correlator.abandon(&id);
                return Err(e);
            }
        };
        if let Err(e) = self.connection.send_frame(&bytes).await {
            self.correlator.abandon(&id);
            return Err(e);
        }

        match timeout(self.config.request_timeout(), rx).await {
            Ok(Ok(result)) => result,
            // The completion slot vanished without a response.
            Ok(Err(_)) => Err(BridgeError::Shutdown),
            Err(_) => {
                // A response arriving after this finds no entry and is
                // ignored.
                self.correlator.abandon(&id);
                Err(BridgeError::Timeout)
            }
        }
    }

    /// Translate one pushed envelope and hand the results to the host.
    fn handle_incoming(self: &Arc<Self>, payload: &Value) {
        let envelope: Envelope = match serde_json::from_value(payload.clone()) {
            Ok(envelope) => envelope,
            Err(e) => {
                log::warn!("[Bridge] unparseable envelope: {e}");
                return;
            }
        };

        let mut acknowledged = false;
        for event in self.translator.translate(&envelope) {
            if self.config.auto_mark_read && !acknowledged && event.should_mark_read() {
                if let Some(ts) = event.timestamp() {
                    acknowledged = true;
                    let inner = Arc::clone(self);
                    let sender = event.sender().to_string();
                    tokio::spawn(async move {
                        let request =
                            protocol::mark_read(&inner.config.bot_number, &sender, &[ts]);
                        if let Err(e) = inner.request(request).await {
                            log::warn!("[Bridge] mark_read failed: {e}");
                        }
                    });
                }
            }

            {
                let handlers = self
                    .chat_handlers
                    .read()
                    .expect("chat handler lock poisoned");
                for handler in handlers.iter() {
                    handler(&event);
                }
            }
            if let Err(e) = self.event_tx.try_send(event) {
                log::warn!("[Bridge] event queue full, dropping event: {e}");
            }
        }
    }

    async fn release_all(&self, staged: &[StagedAttachment]) {
        for attachment in staged {
            if let Err(e) = self.stager.release(&attachment.path).await {
                log::warn!("[Bridge] failed to release staged attachment: {e}");
            }
        }
    }
}
