//! Inbound control-channel commands.
//!
//! Every frame from the server is a JSON object whose `cmd` field
//! selects the command. The set is open: commands this firmware does
//! not know are carried as [`Command::Unknown`] so the dispatcher can
//! reply with a structured error instead of dropping the frame.

use serde::Deserialize;
use serde_json::Value;

use crate::chunk::ChunkData;
use latchkey_core::{Error, Result};

/// Command names this firmware understands.
///
/// `Command::from_json` consults this list before handing the value to
/// serde, so an unlisted `cmd` becomes `Unknown` rather than a parse
/// error.
const KNOWN_COMMANDS: &[&str] = &[
    "buzzer_beep",
    "buzzer_chirp",
    "buzzer_click",
    "buzzer_tune",
    "file_data",
    "file_delete",
    "file_dir_query",
    "file_query",
    "file_rename",
    "file_write",
    "firmware_data",
    "firmware_write",
    "keepalive",
    "metrics_query",
    "ping",
    "pong",
    "ready",
    "reset",
    "restart",
    "state_query",
    "state_set",
    "system_query",
    "token_info",
];

/// A parsed inbound command.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum Command {
    BuzzerBeep {
        ms: u64,
        hz: Option<u32>,
    },
    BuzzerChirp,
    BuzzerClick,
    BuzzerTune {
        data: ChunkData,
    },
    FileData {
        filename: String,
        data: ChunkData,
        position: u64,
        #[serde(default)]
        eof: bool,
    },
    FileDelete {
        filename: String,
    },
    FileDirQuery,
    FileQuery {
        filename: String,
    },
    FileRename {
        old_filename: String,
        new_filename: String,
    },
    FileWrite {
        filename: String,
        digest: String,
        size: u64,
    },
    FirmwareData {
        data: ChunkData,
        position: u64,
        #[serde(default)]
        eof: bool,
    },
    FirmwareWrite {
        digest: String,
        size: u64,
    },
    Keepalive,
    MetricsQuery,
    Ping {
        seq: Option<Value>,
        timestamp: Option<Value>,
    },
    Pong,
    Ready,
    Reset {
        #[serde(default)]
        force: bool,
    },
    Restart {
        #[serde(default)]
        force: bool,
    },
    StateQuery,
    StateSet {
        card_enable: Option<bool>,
        exit_enable: Option<bool>,
        snib_enable: Option<bool>,
        card_active: Option<bool>,
        exit_active: Option<bool>,
        snib_active: Option<bool>,
        remote_active: Option<bool>,
        user: Option<String>,
        uid: Option<String>,
        snib_renew: Option<bool>,
    },
    SystemQuery,
    TokenInfo {
        uid: String,
        #[serde(default)]
        found: bool,
        #[serde(default)]
        name: String,
        #[serde(default)]
        access: u8,
    },
    /// A `cmd` value this firmware does not implement.
    #[serde(skip)]
    Unknown(String),
}

impl Command {
    /// Parse one JSON frame payload.
    ///
    /// Returns `Error::MissingField` if the object has no `cmd` string
    /// and `Error::Json` if a known command has malformed fields.
    pub fn from_json(payload: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(payload)?;
        let cmd = value
            .get("cmd")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::MissingField("cmd".to_string()))?;
        if !KNOWN_COMMANDS.contains(&cmd) {
            return Ok(Command::Unknown(cmd.to_string()));
        }
        serde_json::from_value(value).map_err(Into::into)
    }

    /// Wire name of this command.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Command::BuzzerBeep { .. } => "buzzer_beep",
            Command::BuzzerChirp => "buzzer_chirp",
            Command::BuzzerClick => "buzzer_click",
            Command::BuzzerTune { .. } => "buzzer_tune",
            Command::FileData { .. } => "file_data",
            Command::FileDelete { .. } => "file_delete",
            Command::FileDirQuery => "file_dir_query",
            Command::FileQuery { .. } => "file_query",
            Command::FileRename { .. } => "file_rename",
            Command::FileWrite { .. } => "file_write",
            Command::FirmwareData { .. } => "firmware_data",
            Command::FirmwareWrite { .. } => "firmware_write",
            Command::Keepalive => "keepalive",
            Command::MetricsQuery => "metrics_query",
            Command::Ping { .. } => "ping",
            Command::Pong => "pong",
            Command::Ready => "ready",
            Command::Reset { .. } => "reset",
            Command::Restart { .. } => "restart",
            Command::StateQuery => "state_query",
            Command::StateSet { .. } => "state_set",
            Command::SystemQuery => "system_query",
            Command::TokenInfo { .. } => "token_info",
            Command::Unknown(name) => name,
        }
    }
}
