//! `config.json` loading.
//!
//! The config file lives in the data directory next to `tokens.dat` and
//! is replaced over the wire through the file transfer commands, so a
//! missing or malformed file must never take the controller down. Time
//! values are integer milliseconds on disk.

use std::path::Path;
use std::time::Duration;

use latchkey_core::constants::{
    DEFAULT_CARD_UNLOCK_MS, DEFAULT_EXIT_UNLOCK_MS, DEFAULT_LONG_PRESS_MS,
    DEFAULT_NETWORK_WATCHDOG_MS, DEFAULT_REMOTE_UNLOCK_MS, DEFAULT_SERVER_PORT,
    DEFAULT_SNIB_UNLOCK_MS, DEFAULT_TOKEN_QUERY_TIMEOUT_MS,
};
use latchkey_door::DoorConfig;
use latchkey_net::{FingerprintPin, SessionConfig};
use latchkey_nfc::{NfcConfig, RateLimits};
use serde::Deserialize;
use tracing::{info, warn};

pub const CONFIG_FILENAME: &str = "config.json";
pub const TOKEN_DB_FILENAME: &str = "tokens.dat";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server_host: String,
    pub server_port: u16,
    pub server_password: String,
    /// Hex SHA-256 of the server certificate, empty to disable pinning.
    pub server_fingerprint1: String,
    /// Alternate pin accepted during certificate rollover.
    pub server_fingerprint2: String,

    pub allow_snib_on_battery: bool,
    pub card_unlock_time: u64,
    pub exit_anti_bounce: bool,
    pub exit_interactive_time: u64,
    pub exit_unlock_time: u64,
    pub hold_exit_for_snib: bool,
    pub long_press_time: u64,
    pub network_watchdog_time: u64,
    pub remote_unlock_time: u64,
    pub snib_unlock_time: u64,
    pub token_query_timeout: u64,

    pub nfc_read_counter: bool,
    pub nfc_read_data: u8,
    pub nfc_read_sig: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server_host: String::new(),
            server_port: DEFAULT_SERVER_PORT,
            server_password: String::new(),
            server_fingerprint1: String::new(),
            server_fingerprint2: String::new(),
            allow_snib_on_battery: false,
            card_unlock_time: DEFAULT_CARD_UNLOCK_MS,
            exit_anti_bounce: false,
            exit_interactive_time: 0,
            exit_unlock_time: DEFAULT_EXIT_UNLOCK_MS,
            hold_exit_for_snib: false,
            long_press_time: DEFAULT_LONG_PRESS_MS,
            network_watchdog_time: DEFAULT_NETWORK_WATCHDOG_MS,
            remote_unlock_time: DEFAULT_REMOTE_UNLOCK_MS,
            snib_unlock_time: DEFAULT_SNIB_UNLOCK_MS,
            token_query_timeout: DEFAULT_TOKEN_QUERY_TIMEOUT_MS,
            nfc_read_counter: false,
            nfc_read_data: 0,
            nfc_read_sig: false,
        }
    }
}

impl AppConfig {
    /// Read and parse the config file. Falls back to defaults when the
    /// file is missing or unreadable so the controller keeps operating
    /// on local policy.
    pub fn load(path: &Path) -> Self {
        match std::fs::read(path) {
            Ok(bytes) => match serde_json::from_slice::<AppConfig>(&bytes) {
                Ok(config) => {
                    info!(path = %path.display(), "config loaded");
                    config
                }
                Err(err) => {
                    warn!(path = %path.display(), %err, "config parse failed, using defaults");
                    AppConfig::default()
                }
            },
            Err(err) => {
                warn!(path = %path.display(), %err, "config not readable, using defaults");
                AppConfig::default()
            }
        }
    }

    pub fn door_config(&self) -> DoorConfig {
        DoorConfig {
            card_unlock: Duration::from_millis(self.card_unlock_time),
            exit_unlock: Duration::from_millis(self.exit_unlock_time),
            snib_unlock: Duration::from_millis(self.snib_unlock_time),
            remote_unlock: Duration::from_millis(self.remote_unlock_time),
            token_query_timeout: Duration::from_millis(self.token_query_timeout),
            exit_interactive: Duration::from_millis(self.exit_interactive_time),
            hold_exit_for_snib: self.hold_exit_for_snib,
            allow_snib_on_battery: self.allow_snib_on_battery,
            anti_bounce: self.exit_anti_bounce,
        }
    }

    pub fn nfc_config(&self) -> NfcConfig {
        NfcConfig {
            read_counter: self.nfc_read_counter,
            read_sig: self.nfc_read_sig,
            read_data: self.nfc_read_data,
            limits: RateLimits::default(),
        }
    }

    /// Server session settings. Bad fingerprint hex disables the bad
    /// pin rather than connecting unpinned with a typo in place.
    pub fn session_config(&self, clientid: &str) -> SessionConfig {
        let mut session = SessionConfig::new(self.server_host.clone(), self.server_port);
        session.clientid = clientid.to_string();
        session.password = self.server_password.clone();
        if !self.server_fingerprint1.is_empty() {
            match FingerprintPin::from_hex(&self.server_fingerprint1, &self.server_fingerprint2) {
                Ok(pin) => session.pin = Some(pin),
                Err(err) => warn!(%err, "invalid server fingerprint, pinning disabled"),
            }
        }
        session
    }

    pub fn network_watchdog(&self) -> Option<Duration> {
        if self.network_watchdog_time == 0 {
            None
        } else {
            Some(Duration::from_millis(self.network_watchdog_time))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults_when_file_missing() {
        let config = AppConfig::load(Path::new("/nonexistent/config.json"));
        assert_eq!(config.server_port, DEFAULT_SERVER_PORT);
        assert_eq!(config.card_unlock_time, 5_000);
        assert_eq!(config.network_watchdog_time, 3_600_000);
    }

    #[test]
    fn test_partial_file_keeps_defaults_for_missing_keys() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"server_host":"doord.example.org","snib_unlock_time":60000}}"#
        )
        .unwrap();
        let config = AppConfig::load(file.path());
        assert_eq!(config.server_host, "doord.example.org");
        assert_eq!(config.snib_unlock_time, 60_000);
        assert_eq!(config.server_port, DEFAULT_SERVER_PORT);
    }

    #[test]
    fn test_malformed_file_falls_back_to_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{{not json").unwrap();
        let config = AppConfig::load(file.path());
        assert_eq!(config.server_port, DEFAULT_SERVER_PORT);
    }

    #[test]
    fn test_session_config_with_fingerprint() {
        let config = AppConfig {
            server_host: "doord.example.org".into(),
            server_fingerprint1: "ab".repeat(32),
            ..Default::default()
        };
        let session = config.session_config("doorman-000001");
        assert!(session.pin.is_some());
        assert_eq!(session.clientid, "doorman-000001");
    }

    #[test]
    fn test_bad_fingerprint_disables_pinning() {
        let config = AppConfig {
            server_fingerprint1: "zz".into(),
            ..Default::default()
        };
        assert!(config.session_config("x").pin.is_none());
    }

    #[test]
    fn test_watchdog_zero_disables() {
        let config = AppConfig {
            network_watchdog_time: 0,
            ..Default::default()
        };
        assert!(config.network_watchdog().is_none());
    }
}
