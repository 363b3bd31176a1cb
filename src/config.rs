//! Immutable configuration snapshot.
//!
//! Loaded once at startup (usually from the host's JSON or TOML config
//! section via serde) and shared read-only; runtime reconfiguration is not
//! supported.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

fn default_staging_dir() -> PathBuf {
    std::env::temp_dir().join("signald-bridge")
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_release_grace_secs() -> u64 {
    300
}

fn default_event_queue_depth() -> usize {
    256
}

fn default_auto_mark_read() -> bool {
    true
}

/// Bridge configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct BridgeConfig {
    /// Path of the daemon's Unix socket. When unset, the conventional
    /// locations are probed: `$XDG_RUNTIME_DIR/signald/signald.sock`, then
    /// `/var/run/signald/signald.sock`.
    #[serde(default)]
    pub socket_path: Option<PathBuf>,

    /// Phone-number address of the bot's own account.
    pub bot_number: String,

    /// Directory outbound attachments are staged in. Must be readable by the
    /// daemon process.
    #[serde(default = "default_staging_dir")]
    pub staging_dir: PathBuf,

    /// Alias name → address or `group.<base64>` identifier.
    #[serde(default)]
    pub rooms: HashMap<String, String>,

    /// Senders whose messages are forwarded to the host. Entries may be
    /// aliases from `rooms` or raw addresses. Empty means everyone.
    #[serde(default)]
    pub whitelisted_numbers: Vec<String>,

    /// Per-request response deadline in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Age after which an unreleased staged attachment is swept.
    #[serde(default = "default_release_grace_secs")]
    pub release_grace_secs: u64,

    /// Capacity of the translated-event channel handed to the host.
    #[serde(default = "default_event_queue_depth")]
    pub event_queue_depth: usize,

    /// Acknowledge incoming messages and attachments as read automatically.
    #[serde(default = "default_auto_mark_read")]
    pub auto_mark_read: bool,
}

impl BridgeConfig {
    /// Minimal config for the given bot account, defaults everywhere else.
    pub fn new(bot_number: impl Into<String>) -> Self {
        Self {
            socket_path: None,
            bot_number: bot_number.into(),
            staging_dir: default_staging_dir(),
            rooms: HashMap::new(),
            whitelisted_numbers: Vec::new(),
            request_timeout_secs: default_request_timeout_secs(),
            release_grace_secs: default_release_grace_secs(),
            event_queue_depth: default_event_queue_depth(),
            auto_mark_read: default_auto_mark_read(),
        }
    }

    /// Per-request response deadline.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Grace period before an unreleased staged attachment is swept.
    pub fn release_grace(&self) -> Duration {
        Duration::from_secs(self.release_grace_secs)
    }

    /// Candidate socket paths, most specific first.
    pub fn socket_candidates(&self) -> Vec<PathBuf> {
        if let Some(path) = &self.socket_path {
            return vec![path.clone()];
        }
        let mut candidates = Vec::new();
        if let Some(runtime_dir) = dirs::runtime_dir() {
            candidates.push(runtime_dir.join("signald/signald.sock"));
        }
        candidates.push(PathBuf::from("/var/run/signald/signald.sock"));
        candidates
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_json_gets_defaults() {
        let config: BridgeConfig =
            serde_json::from_str(r#"{ "bot_number": "+1000000000" }"#).unwrap();
        assert_eq!(config.bot_number, "+1000000000");
        assert!(config.socket_path.is_none());
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
        assert_eq!(config.release_grace(), Duration::from_secs(300));
        assert_eq!(config.event_queue_depth, 256);
        assert!(config.auto_mark_read);
        assert!(config.rooms.is_empty());
        assert!(config.whitelisted_numbers.is_empty());
    }

    #[test]
    fn test_full_json_round_trip() {
        let config: BridgeConfig = serde_json::from_str(
            r#"{
                "socket_path": "/run/custom/signald.sock",
                "bot_number": "+1000000000",
                "staging_dir": "/tmp/bridge-staging",
                "rooms": { "john": "+2134567890" },
                "whitelisted_numbers": ["john"],
                "request_timeout_secs": 5,
                "auto_mark_read": false
            }"#,
        )
        .unwrap();
        assert_eq!(
            config.socket_candidates(),
            vec![PathBuf::from("/run/custom/signald.sock")]
        );
        assert_eq!(config.rooms["john"], "+2134567890");
        assert_eq!(config.request_timeout(), Duration::from_secs(5));
        assert!(!config.auto_mark_read);
    }

    #[test]
    fn test_explicit_socket_path_is_sole_candidate() {
        let mut config = BridgeConfig::new("+1");
        config.socket_path = Some(PathBuf::from("/x/y.sock"));
        assert_eq!(config.socket_candidates(), vec![PathBuf::from("/x/y.sock")]);
    }

    #[test]
    fn test_default_candidates_end_with_system_path() {
        let config = BridgeConfig::new("+1");
        let candidates = config.socket_candidates();
        assert_eq!(
            candidates.last().unwrap(),
            &PathBuf::from("/var/run/signald/signald.sock")
        );
    }
}
