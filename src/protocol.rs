//! signald v1 wire vocabulary.
//!
//! Request builders for the daemon command subset the bridge uses
//! (`subscribe`, `send`, `mark_read`, `typing`, `react`, `version`) and
//! typed views of the inbound `IncomingMessage` envelope. Every request
//! carries `type` and `version`; the correlation `id` is added by the
//! facade just before the frame is written.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Protocol version tag sent with every request.
pub const PROTOCOL_VERSION: &str = "v1";

/// Resolved recipient of an outbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recipient {
    /// Direct message to a phone-number address.
    Address(String),
    /// Group message, identified by the daemon's raw group id.
    Group(String),
}

/// Outbound attachment reference embedded in a `send` request.
///
/// `filename` is the staged path on disk; `custom_filename` is the name
/// shown to the receiving user.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundAttachment {
    pub filename: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

fn base_request(kind: &str) -> Value {
    json!({ "type": kind, "version": PROTOCOL_VERSION })
}

fn with_recipient(mut request: Value, recipient: &Recipient) -> Value {
    match recipient {
        Recipient::Address(number) => {
            request["recipientAddress"] = json!({ "number": number });
        }
        Recipient::Group(group_id) => {
            request["recipientGroupId"] = json!(group_id);
        }
    }
    request
}

/// `subscribe` -start receiving events for the bot account.
pub fn subscribe(account: &str) -> Value {
    let mut request = base_request("subscribe");
    request["account"] = json!(account);
    request
}

/// `version` -probe the daemon version.
pub fn version() -> Value {
    base_request("version")
}

/// `send` -text and/or attachments to an address or group.
pub fn send(
    account: &str,
    recipient: &Recipient,
    body: Option<&str>,
    attachments: &[OutboundAttachment],
) -> Value {
    let mut request = with_recipient(base_request("send"), recipient);
    request["username"] = json!(account);
    if let Some(body) = body {
        request["messageBody"] = json!(body);
    }
    if !attachments.is_empty() {
        request["attachments"] = json!(attachments);
    }
    request
}

/// `mark_read` -acknowledge message timestamps to their sender.
pub fn mark_read(account: &str, to: &str, timestamps: &[u64]) -> Value {
    let mut request = base_request("mark_read");
    request["account"] = json!(account);
    request["to"] = json!({ "number": to });
    request["timestamps"] = json!(timestamps);
    request
}

/// `typing` -set or clear the typing indicator.
pub fn typing(account: &str, recipient: &Recipient, started: bool) -> Value {
    let mut request = base_request("typing");
    request["account"] = json!(account);
    request["typing"] = json!(started);
    match recipient {
        Recipient::Address(number) => {
            request["address"] = json!({ "number": number });
        }
        Recipient::Group(group_id) => {
            request["group"] = json!(group_id);
        }
    }
    request
}

/// `react` -send (or remove, with an empty emoji) a reaction.
pub fn react(
    account: &str,
    recipient: &Recipient,
    emoji: &str,
    target_author: &str,
    target_timestamp: u64,
) -> Value {
    let mut request = with_recipient(base_request("react"), recipient);
    request["username"] = json!(account);
    request["reaction"] = json!({
        "emoji": emoji,
        "remove": emoji.is_empty(),
        "targetAuthor": { "number": target_author },
        "targetSentTimestamp": target_timestamp,
    });
    request
}

/// Address as the daemon reports it on inbound payloads.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct InboundAddress {
    #[serde(default)]
    pub number: Option<String>,
    #[serde(default)]
    pub uuid: Option<String>,
}

/// Legacy group reference inside a data message.
#[derive(Debug, Clone, Deserialize)]
pub struct GroupInfo {
    #[serde(rename = "groupId")]
    pub group_id: String,
}

/// v2 group reference inside a data message.
#[derive(Debug, Clone, Deserialize)]
pub struct GroupV2Info {
    pub id: String,
}

/// Reaction payload inside a data message.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundReaction {
    #[serde(default)]
    pub emoji: String,
    #[serde(default)]
    pub remove: bool,
    #[serde(rename = "targetAuthor")]
    pub target_author: InboundAddress,
    #[serde(rename = "targetSentTimestamp")]
    pub target_sent_timestamp: u64,
}

/// Attachment already stored on disk by the daemon.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundAttachment {
    #[serde(rename = "storedFilename", default)]
    pub stored_filename: Option<String>,
    #[serde(rename = "customFilename", default)]
    pub custom_filename: Option<String>,
    #[serde(rename = "contentType", default)]
    pub content_type: Option<String>,
}

/// The data portion of an incoming message envelope.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DataMessage {
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub group: Option<GroupInfo>,
    #[serde(rename = "groupV2", default)]
    pub group_v2: Option<GroupV2Info>,
    #[serde(default)]
    pub reaction: Option<InboundReaction>,
    #[serde(default)]
    pub attachments: Vec<InboundAttachment>,
}

/// Typing sub-message of an incoming envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct TypingMessage {
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub group_id: Option<String>,
}

/// An `IncomingMessage` envelope as pushed by the daemon.
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub source: Option<InboundAddress>,
    #[serde(default)]
    pub timestamp: Option<u64>,
    #[serde(default)]
    pub data_message: Option<DataMessage>,
    #[serde(default)]
    pub typing_message: Option<TypingMessage>,
}
