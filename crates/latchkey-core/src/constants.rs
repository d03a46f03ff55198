//! Shared constants for the door controller core.
//!
//! Timing values are expressed in milliseconds unless a `Duration` is more
//! natural at the call site. Defaults mirror the values the configuration
//! file falls back to when a key is absent.

use std::time::Duration;

// ============================================================================
// Token limits
// ============================================================================

/// Maximum UID length reported during anti-collision (single/double/triple
/// size UIDs all fit in 7 bytes on this reader).
pub const MAX_UID_LENGTH: usize = 7;

/// Maximum ATS (Answer-To-Select) length retained per token.
pub const MAX_ATS_LENGTH: usize = 32;

/// Maximum raw data block retained per token.
pub const MAX_TOKEN_DATA: usize = 1024;

/// NTAG signature length (ECC originality signature).
pub const NTAG_SIGNATURE_LENGTH: usize = 32;

// ============================================================================
// Reader health
// ============================================================================

/// How long a cached token survives without being re-seen before a
/// removal event is emitted. Independent of the poll rate.
pub const TOKEN_PRESENT_TIMEOUT: Duration = Duration::from_millis(350);

/// Initial (and minimum) reader health-check / reset backoff interval.
pub const READER_CHECK_INTERVAL_MIN: Duration = Duration::from_millis(250);

/// Ceiling for the reader reset backoff after repeated probe failures.
pub const READER_CHECK_INTERVAL_MAX: Duration = Duration::from_secs(10);

/// Per-poll transceive timeout. A single poll cycle never blocks longer.
pub const READER_POLL_TIMEOUT: Duration = Duration::from_millis(50);

/// Default new-token read limit per 5-second window.
pub const READER_LIMIT_PER_5S: u32 = 30;

/// Default new-token read limit per 1-minute window.
pub const READER_LIMIT_PER_1M: u32 = 120;

// ============================================================================
// Session / framing
// ============================================================================

/// Fixed delay between transport connect attempts.
pub const RECONNECT_BACKOFF: Duration = Duration::from_secs(2);

// ============================================================================
// Transfers
// ============================================================================

/// A transfer with no chunk activity for this long is aborted.
pub const TRANSFER_TIMEOUT: Duration = Duration::from_secs(60);

// ============================================================================
// Door timing defaults
// ============================================================================

/// Cadence of the unlock-expiry sweep.
pub const TIMEOUT_SWEEP_INTERVAL: Duration = Duration::from_millis(200);

pub const DEFAULT_CARD_UNLOCK_MS: u64 = 5_000;
pub const DEFAULT_EXIT_UNLOCK_MS: u64 = 5_000;
pub const DEFAULT_SNIB_UNLOCK_MS: u64 = 1_800_000;
pub const DEFAULT_REMOTE_UNLOCK_MS: u64 = 86_400_000;
pub const DEFAULT_TOKEN_QUERY_TIMEOUT_MS: u64 = 1_000;
pub const DEFAULT_LONG_PRESS_MS: u64 = 1_000;
pub const DEFAULT_NETWORK_WATCHDOG_MS: u64 = 3_600_000;

/// Default server port.
pub const DEFAULT_SERVER_PORT: u16 = 14260;
