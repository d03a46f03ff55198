//! Outbound control-channel messages.
//!
//! Everything this firmware sends to the server, from the handshake
//! greeting through command replies and unsolicited status reports.
//! Serialized as a JSON object with a `cmd` tag, mirroring the inbound
//! direction.

use serde::Serialize;
use serde_json::Value;

/// Door status snapshot carried by `state_info`.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StateInfo {
    pub card_enable: bool,
    pub card_active: bool,
    pub exit_enable: bool,
    pub exit_active: bool,
    pub snib_enable: bool,
    pub snib_active: bool,
    pub remote_active: bool,
    pub unlock: bool,
    pub voltage: f32,
    pub user: String,
    pub uid: String,
    /// "open" or "closed".
    pub door: String,
    /// "mains" or "battery".
    pub power: String,
}

/// Telemetry counters carried by `metrics_info`.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct Metrics {
    pub millis: u64,
    pub net_rx_buf_max: usize,
    pub net_tx_buf_max: usize,
    pub net_tcp_reconns: u64,
    pub net_tcp_fingerprint_errors: u64,
    pub net_tcp_async_errors: u64,
    pub net_tcp_sync_errors: u64,
    pub net_tx_delay_count: u64,
    pub nfc_reset_count: u64,
    pub nfc_rate_limit_trips: u64,
}

/// One outbound message.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum Reply {
    /// Handshake greeting, sent first on every new connection.
    Hello {
        clientid: String,
        password: String,
    },
    /// Asks the server to authenticate a presented token.
    TokenAuth {
        uid: String,
        atqa: u16,
        sak: u8,
        #[serde(skip_serializing_if = "Option::is_none")]
        ats: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        version: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        ntag_counter: Option<u32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        ntag_signature: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        read_time: Option<u64>,
    },
    StateInfo(StateInfo),
    /// Stored-file report. `size` and `digest` are null when the file
    /// does not exist.
    FileInfo {
        filename: String,
        size: Option<u64>,
        digest: Option<String>,
    },
    FileDirInfo {
        filenames: Vec<String>,
    },
    FileContinue {
        filename: String,
        position: u64,
    },
    FileWriteOk {
        filename: String,
    },
    FileWriteError {
        #[serde(skip_serializing_if = "Option::is_none")]
        filename: Option<String>,
        error: String,
    },
    FileDeleteOk {
        filename: String,
    },
    FileDeleteError {
        filename: String,
        error: String,
    },
    FileRenameOk {
        old_filename: String,
        new_filename: String,
    },
    FileRenameError {
        old_filename: String,
        new_filename: String,
        error: String,
    },
    FirmwareContinue {
        #[serde(skip_serializing_if = "Option::is_none")]
        digest: Option<String>,
        position: u64,
    },
    FirmwareWriteOk,
    FirmwareWriteError {
        #[serde(skip_serializing_if = "Option::is_none")]
        digest: Option<String>,
        error: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        updater_error: Option<String>,
    },
    MetricsInfo(Metrics),
    Pong {
        #[serde(skip_serializing_if = "Option::is_none")]
        seq: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        timestamp: Option<Value>,
    },
    SystemInfo {
        clientid: String,
        version: String,
        millis: u64,
    },
    /// Structured rejection of an unimplemented command.
    Error {
        requested_cmd: String,
        error: String,
    },
}

impl Reply {
    /// The standard rejection for a command name we do not implement.
    pub fn not_implemented(requested_cmd: impl Into<String>) -> Self {
        Reply::Error {
            requested_cmd: requested_cmd.into(),
            error: "not implemented".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn to_value(reply: &Reply) -> Value {
        serde_json::to_value(reply).unwrap()
    }

    #[test]
    fn test_hello_wire_shape() {
        let v = to_value(&Reply::Hello {
            clientid: "doorman-abc123".to_string(),
            password: "secret".to_string(),
        });
        assert_eq!(v["cmd"], "hello");
        assert_eq!(v["clientid"], "doorman-abc123");
        assert_eq!(v["password"], "secret");
    }

    #[test]
    fn test_token_auth_omits_absent_fields() {
        let v = to_value(&Reply::TokenAuth {
            uid: "04a1b2c3".to_string(),
            atqa: 0x0044,
            sak: 0x00,
            ats: None,
            version: Some("0004040201001103".to_string()),
            ntag_counter: None,
            ntag_signature: None,
            data: None,
            read_time: Some(42),
        });
        assert_eq!(v["cmd"], "token_auth");
        assert_eq!(v["uid"], "04a1b2c3");
        assert!(v.get("ats").is_none());
        assert!(v.get("ntag_counter").is_none());
        assert_eq!(v["version"], "0004040201001103");
        assert_eq!(v["read_time"], 42);
    }

    #[test]
    fn test_state_info_flattens_into_payload() {
        let v = to_value(&Reply::StateInfo(StateInfo {
            card_enable: true,
            card_active: false,
            exit_enable: true,
            exit_active: false,
            snib_enable: true,
            snib_active: true,
            remote_active: false,
            unlock: true,
            voltage: 13.2,
            user: String::new(),
            uid: String::new(),
            door: "closed".to_string(),
            power: "mains".to_string(),
        }));
        assert_eq!(v["cmd"], "state_info");
        assert_eq!(v["snib_active"], true);
        assert_eq!(v["unlock"], true);
        assert_eq!(v["door"], "closed");
        assert_eq!(v["power"], "mains");
    }

    #[test]
    fn test_file_info_keeps_nulls_for_missing_file() {
        let v = to_value(&Reply::FileInfo {
            filename: "tokens.dat".to_string(),
            size: None,
            digest: None,
        });
        assert_eq!(v["size"], Value::Null);
        assert_eq!(v["digest"], Value::Null);
    }

    #[test]
    fn test_not_implemented() {
        let v = to_value(&Reply::not_implemented("flux_capacitor"));
        assert_eq!(v["cmd"], "error");
        assert_eq!(v["requested_cmd"], "flux_capacitor");
        assert_eq!(v["error"], "not implemented");
    }
}
