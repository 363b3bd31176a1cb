//! Bridge between a chat-bot host process and the signald message-relay
//! daemon, speaking newline-delimited JSON over a Unix domain socket.
//!
//! # Architecture
//!
//! ```text
//! Host bot framework                       signald daemon
//! ┌──────────────────┐                    ┌──────────────────┐
//! │ Bridge           │                    │                  │
//! │  send_message()  │──request frames───►│  UnixListener    │
//! │  on_event()      │◄──event frames─────│                  │
//! └────────┬─────────┘                    └──────────────────┘
//!          │
//!          ├── ConnectionManager  socket lifecycle, read loop, reconnect
//!          ├── Correlator         request id ↔ pending response table
//!          ├── EventDispatcher    unsolicited event routing
//!          ├── AttachmentStager   outbound media files on disk
//!          └── Translator         daemon payloads ↔ host chat events
//! ```
//!
//! The wire protocol is one JSON document per line in both directions.
//! Requests carry a `type`, a `version` and a unique `id`; the daemon echoes
//! the `id` in its response. Frames without a matching pending id are
//! unsolicited events and go through the [`dispatch::EventDispatcher`].
//!
//! # Modules
//!
//! - [`bridge`] - Host-facing facade
//! - [`connection`] - Socket lifecycle and reconnect policy
//! - [`correlator`] - Request/response correlation
//! - [`dispatch`] - Unsolicited event classification and handlers
//! - [`codec`] - Newline-delimited JSON framing
//! - [`attachments`] - Outbound attachment staging
//! - [`translate`] - Alias/whitelist policy and event translation
//! - [`protocol`] - signald v1 request builders and envelope types
//! - [`config`] - Immutable configuration snapshot

pub mod attachments;
pub mod bridge;
pub mod codec;
pub mod config;
pub mod connection;
pub mod correlator;
pub mod dispatch;
pub mod error;
pub mod protocol;
pub mod translate;

pub use attachments::{AttachmentStager, StagedAttachment};
pub use bridge::{Bridge, OutboundMedia};
pub use config::BridgeConfig;
pub use connection::LinkState;
pub use dispatch::{EventKind, InboundEvent};
pub use error::BridgeError;
pub use protocol::Recipient;
pub use translate::ChatEvent;
