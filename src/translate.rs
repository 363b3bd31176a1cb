//! Alias/whitelist policy and envelope translation.
//!
//! The host talks in room names; the daemon talks in phone-number addresses
//! and group ids. [`RoomTable`] is the immutable snapshot mapping between
//! them (built once from configuration), and [`Translator`] fans an incoming
//! envelope out into the host's [`ChatEvent`]s, applying the whitelist and
//! alias policy on the way.
//!
//! Group identifiers travel as `group.<base64>` in room tables and targets
//! (the daemon itself wants the raw base64 id on the wire).

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use crate::error::{BridgeError, Result};
use crate::protocol::{Envelope, Recipient};

/// Prefix marking a group identifier in room tables and targets.
const GROUP_PREFIX: &str = "group.";

/// Immutable alias and whitelist snapshot.
#[derive(Debug, Clone, Default)]
pub struct RoomTable {
    /// Alias name → address or `group.<base64>` id.
    rooms: HashMap<String, String>,
    /// Reverse of `rooms`, for display.
    aliases: HashMap<String, String>,
    /// Permitted sender addresses. Empty set = everyone permitted.
    whitelist: HashSet<String>,
}

impl RoomTable {
    /// Build the snapshot from configuration.
    ///
    /// Whitelist entries may be alias names; they are resolved through the
    /// room table once, here, so the hot path is a set lookup.
    pub fn new(rooms: HashMap<String, String>, whitelisted: &[String]) -> Self {
        let whitelist = whitelisted
            .iter()
            .map(|entry| rooms.get(entry).cloned().unwrap_or_else(|| entry.clone()))
            .collect();
        let aliases = rooms
            .iter()
            .map(|(alias, address)| (address.clone(), alias.clone()))
            .collect();
        Self {
            rooms,
            aliases,
            whitelist,
        }
    }

    /// Alias for an address when one is configured, otherwise the raw value.
    pub fn display_name<'a>(&'a self, address: &'a str) -> &'a str {
        self.aliases.get(address).map_or(address, String::as_str)
    }

    /// Whether a sender passes the whitelist. An empty whitelist permits
    /// everyone.
    pub fn is_permitted(&self, sender: &str) -> bool {
        self.whitelist.is_empty() || self.whitelist.contains(sender)
    }

    /// Resolve an outbound target to a daemon recipient.
    ///
    /// The target may be an alias, a raw address (`+` and digits) or a
    /// `group.<base64>` identifier.
    ///
    /// # Errors
    ///
    /// Returns `UnknownRoom` for a bare name that matches no alias and is
    /// not itself a valid address or group identifier.
    pub fn resolve_target(&self, target: &str) -> Result<Recipient> {
        let resolved = self
            .rooms
            .get(target)
            .map_or(target, String::as_str);

        if let Some(encoded) = resolved.strip_prefix(GROUP_PREFIX) {
            let raw = BASE64
                .decode(encoded)
                .map_err(|_| BridgeError::UnknownRoom(target.to_string()))?;
            let group_id = String::from_utf8(raw)
                .map_err(|_| BridgeError::UnknownRoom(target.to_string()))?;
            return Ok(Recipient::Group(group_id));
        }
        if is_address(resolved) {
            return Ok(Recipient::Address(resolved.to_string()));
        }
        Err(BridgeError::UnknownRoom(target.to_string()))
    }
}

/// Syntactic check for a phone-number address.
fn is_address(candidate: &str) -> bool {
    let Some(digits) = candidate.strip_prefix('+') else {
        return false;
    };
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

/// Encode a raw daemon group id into the `group.<base64>` table form.
pub fn group_target(group_id: &str) -> String {
    format!("{GROUP_PREFIX}{}", BASE64.encode(group_id.as_bytes()))
}

/// A chat event in the host's generic shape.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    /// A text message.
    Message {
        /// Raw sender address.
        sender: String,
        /// Reply target: sender alias or group alias, raw value otherwise.
        target: String,
        text: String,
        /// Daemon timestamp; doubles as the message id for `mark_read`.
        timestamp: u64,
    },
    /// A received attachment, already stored on disk by the daemon.
    Attachment {
        sender: String,
        target: String,
        /// Path of the daemon's stored copy.
        path: PathBuf,
        /// Name declared by the sending client.
        name: Option<String>,
        content_type: Option<String>,
        timestamp: u64,
    },
    /// An emoji reaction; an empty emoji means the reaction was removed.
    Reaction {
        sender: String,
        target: String,
        emoji: String,
        /// Author of the message being reacted to.
        target_author: String,
        /// Timestamp of the message being reacted to.
        target_timestamp: u64,
    },
    /// Typing indicator state change.
    Typing {
        sender: String,
        target: String,
        started: bool,
    },
}

impl ChatEvent {
    /// Whether receiving this event should acknowledge the envelope as read.
    pub fn should_mark_read(&self) -> bool {
        matches!(
            self,
            ChatEvent::Message { .. } | ChatEvent::Attachment { .. }
        )
    }

    /// Raw sender address of the event.
    pub fn sender(&self) -> &str {
        match self {
            ChatEvent::Message { sender, .. }
            | ChatEvent::Attachment { sender, .. }
            | ChatEvent::Reaction { sender, .. }
            | ChatEvent::Typing { sender, .. } => sender,
        }
    }

    /// Envelope timestamp for events that carry one.
    pub fn timestamp(&self) -> Option<u64> {
        match self {
            ChatEvent::Message { timestamp, .. }
            | ChatEvent::Attachment { timestamp, .. } => Some(*timestamp),
            _ => None,
        }
    }
}

/// Fans incoming envelopes out into host chat events.
#[derive(Debug, Clone, Default)]
pub struct Translator {
    table: RoomTable,
}

impl Translator {
    pub fn new(table: RoomTable) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &RoomTable {
        &self.table
    }

    /// Translate one envelope into zero or more chat events.
    ///
    /// Envelopes without a source address, and envelopes from senders outside
    /// a non-empty whitelist, are dropped here; the host never sees them.
    pub fn translate(&self, envelope: &Envelope) -> Vec<ChatEvent> {
        let Some(sender) = envelope
            .source
            .as_ref()
            .and_then(|source| source.number.clone())
        else {
            log::warn!("[Translate] envelope with no sender address, dropping");
            return Vec::new();
        };

        if !self.table.is_permitted(&sender) {
            log::warn!("[Translate] sender {sender} not whitelisted, dropping");
            return Vec::new();
        }

        let timestamp = envelope.timestamp.unwrap_or_default();
        // Default reply target is the sender; a group id overrides it below.
        let mut target = self.table.display_name(&sender).to_string();
        let mut events = Vec::new();

        if let Some(data) = &envelope.data_message {
            if let Some(group) = &data.group {
                target = self
                    .table
                    .display_name(&group_target(&group.group_id))
                    .to_string();
            } else if let Some(group) = &data.group_v2 {
                target = self
                    .table
                    .display_name(&group_target(&group.id))
                    .to_string();
            }

            if let Some(reaction) = &data.reaction {
                events.push(ChatEvent::Reaction {
                    sender: sender.clone(),
                    target: target.clone(),
                    emoji: if reaction.remove {
                        String::new()
                    } else {
                        reaction.emoji.clone()
                    },
                    target_author: reaction
                        .target_author
                        .number
                        .clone()
                        .unwrap_or_default(),
                    target_timestamp: reaction.target_sent_timestamp,
                });
            } else if let Some(body) = &data.body {
                events.push(ChatEvent::Message {
                    sender: sender.clone(),
                    target: target.clone(),
                    text: body.clone(),
                    timestamp,
                });
            }

            for attachment in &data.attachments {
                let Some(stored) = &attachment.stored_filename else {
                    log::warn!("[Translate] attachment without stored path, skipping");
                    continue;
                };
                events.push(ChatEvent::Attachment {
                    sender: sender.clone(),
                    target: target.clone(),
                    path: PathBuf::from(stored),
                    name: attachment.custom_filename.clone(),
                    content_type: attachment.content_type.clone(),
                    timestamp,
                });
            }
        }

        if let Some(typing) = &envelope.typing_message {
            if let Some(group_id) = &typing.group_id {
                target = self
                    .table
                    .display_name(&group_target(group_id))
                    .to_string();
            }
            events.push(ChatEvent::Typing {
                sender: sender.clone(),
                target,
                started: typing.action.as_deref() == Some("STARTED"),
            });
        }

        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn table_with(rooms: &[(&str, &str)], whitelist: &[&str]) -> RoomTable {
        let rooms = rooms
            .iter()
            .map(|(a, b)| (a.to_string(), b.to_string()))
            .collect();
        let whitelist: Vec<String> = whitelist.iter().map(|s| s.to_string()).collect();
        RoomTable::new(rooms, &whitelist)
    }

    fn envelope(value: serde_json::Value) -> Envelope {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_alias_resolves_to_address() {
        let table = table_with(&[("john", "+2134567890")], &[]);
        assert_eq!(
            table.resolve_target("john").unwrap(),
            Recipient::Address("+2134567890".to_string())
        );
    }

    #[test]
    fn test_raw_address_passes_through() {
        let table = table_with(&[], &[]);
        assert_eq!(
            table.resolve_target("+15550001111").unwrap(),
            Recipient::Address("+15550001111".to_string())
        );
    }

    #[test]
    fn test_group_alias_decodes_to_raw_id() {
        let encoded = group_target("the-group-id");
        let table = table_with(&[("ops", &encoded)], &[]);
        assert_eq!(
            table.resolve_target("ops").unwrap(),
            Recipient::Group("the-group-id".to_string())
        );
        // The group form also works as a bare target.
        assert_eq!(
            table.resolve_target(&encoded).unwrap(),
            Recipient::Group("the-group-id".to_string())
        );
    }

    #[test]
    fn test_unknown_bare_name_fails() {
        let table = table_with(&[("john", "+2134567890")], &[]);
        assert!(matches!(
            table.resolve_target("ringo"),
            Err(BridgeError::UnknownRoom(_))
        ));
        // Not a valid address: letters after the plus.
        assert!(matches!(
            table.resolve_target("+123abc"),
            Err(BridgeError::UnknownRoom(_))
        ));
        // Bad base64 after the group prefix.
        assert!(matches!(
            table.resolve_target("group.!!!"),
            Err(BridgeError::UnknownRoom(_))
        ));
    }

    #[test]
    fn test_whitelist_entries_resolve_through_aliases() {
        let table = table_with(&[("john", "+2134567890")], &["john", "+1111111111"]);
        assert!(table.is_permitted("+2134567890"));
        assert!(table.is_permitted("+1111111111"));
        assert!(!table.is_permitted("+2222222222"));
    }

    #[test]
    fn test_empty_whitelist_permits_everyone() {
        let table = table_with(&[], &[]);
        assert!(table.is_permitted("+9999999999"));
    }

    #[test]
    fn test_text_message_translation_with_alias_display() {
        let translator = Translator::new(table_with(&[("john", "+2134567890")], &[]));
        let events = translator.translate(&envelope(json!({
            "source": { "number": "+2134567890" },
            "timestamp": 1700000000000u64,
            "data_message": { "body": "hi" }
        })));
        assert_eq!(
            events,
            vec![ChatEvent::Message {
                sender: "+2134567890".to_string(),
                target: "john".to_string(),
                text: "hi".to_string(),
                timestamp: 1700000000000,
            }]
        );
        assert!(events[0].should_mark_read());
    }

    #[test]
    fn test_whitelisted_out_sender_is_dropped() {
        let translator = Translator::new(table_with(&[], &["+1111111111"]));
        let events = translator.translate(&envelope(json!({
            "source": { "number": "+2222222222" },
            "timestamp": 1u64,
            "data_message": { "body": "ignored" }
        })));
        assert!(events.is_empty());
    }

    #[test]
    fn test_envelope_without_sender_is_dropped() {
        let translator = Translator::new(table_with(&[], &[]));
        let events = translator.translate(&envelope(json!({
            "timestamp": 1u64,
            "data_message": { "body": "ghost" }
        })));
        assert!(events.is_empty());
    }

    #[test]
    fn test_group_message_switches_target() {
        let encoded = group_target("gid-123");
        let translator =
            Translator::new(table_with(&[("ops", &encoded)], &[]));
        let events = translator.translate(&envelope(json!({
            "source": { "number": "+1000000000" },
            "timestamp": 5u64,
            "data_message": {
                "body": "to the group",
                "groupV2": { "id": "gid-123" }
            }
        })));
        match &events[0] {
            ChatEvent::Message { target, .. } => assert_eq!(target, "ops"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_reaction_and_removal() {
        let translator = Translator::new(table_with(&[], &[]));
        let events = translator.translate(&envelope(json!({
            "source": { "number": "+1000000000" },
            "timestamp": 5u64,
            "data_message": {
                "reaction": {
                    "emoji": "👍",
                    "remove": false,
                    "targetAuthor": { "number": "+2000000000" },
                    "targetSentTimestamp": 42u64
                }
            }
        })));
        assert_eq!(
            events,
            vec![ChatEvent::Reaction {
                sender: "+1000000000".to_string(),
                target: "+1000000000".to_string(),
                emoji: "👍".to_string(),
                target_author: "+2000000000".to_string(),
                target_timestamp: 42,
            }]
        );
        assert!(!events[0].should_mark_read());

        let events = translator.translate(&envelope(json!({
            "source": { "number": "+1000000000" },
            "data_message": {
                "reaction": {
                    "emoji": "👍",
                    "remove": true,
                    "targetAuthor": { "number": "+2000000000" },
                    "targetSentTimestamp": 42u64
                }
            }
        })));
        match &events[0] {
            ChatEvent::Reaction { emoji, .. } => assert!(emoji.is_empty()),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_attachments_fan_out() {
        let translator = Translator::new(table_with(&[], &[]));
        let events = translator.translate(&envelope(json!({
            "source": { "number": "+1000000000" },
            "timestamp": 9u64,
            "data_message": {
                "body": "two files",
                "attachments": [
                    {
                        "storedFilename": "/var/lib/daemon/a1",
                        "customFilename": "photo.jpg",
                        "contentType": "image/jpeg"
                    },
                    { "storedFilename": "/var/lib/daemon/a2" }
                ]
            }
        })));
        assert_eq!(events.len(), 3);
        assert!(matches!(events[0], ChatEvent::Message { .. }));
        match &events[1] {
            ChatEvent::Attachment {
                path,
                name,
                content_type,
                ..
            } => {
                assert_eq!(path, &PathBuf::from("/var/lib/daemon/a1"));
                assert_eq!(name.as_deref(), Some("photo.jpg"));
                assert_eq!(content_type.as_deref(), Some("image/jpeg"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(events[2], ChatEvent::Attachment { .. }));
    }

    #[test]
    fn test_typing_indicator() {
        let translator = Translator::new(table_with(&[], &[]));
        let events = translator.translate(&envelope(json!({
            "source": { "number": "+1000000000" },
            "typing_message": { "action": "STARTED" }
        })));
        assert_eq!(
            events,
            vec![ChatEvent::Typing {
                sender: "+1000000000".to_string(),
                target: "+1000000000".to_string(),
                started: true,
            }]
        );

        let events = translator.translate(&envelope(json!({
            "source": { "number": "+1000000000" },
            "typing_message": { "action": "STOPPED" }
        })));
        match &events[0] {
            ChatEvent::Typing { started, .. } => assert!(!started),
            other => panic!("unexpected {other:?}"),
        }
    }
}
