use std::time::Duration;

use latchkey_core::constants::{
    DEFAULT_CARD_UNLOCK_MS, DEFAULT_EXIT_UNLOCK_MS, DEFAULT_REMOTE_UNLOCK_MS,
    DEFAULT_SNIB_UNLOCK_MS, DEFAULT_TOKEN_QUERY_TIMEOUT_MS,
};

/// Door behaviour tunables.
#[derive(Debug, Clone)]
pub struct DoorConfig {
    pub card_unlock: Duration,
    pub exit_unlock: Duration,
    pub snib_unlock: Duration,
    pub remote_unlock: Duration,
    /// How long to wait for the server to answer a `token_auth` before
    /// falling back to the local database.
    pub token_query_timeout: Duration,
    /// When nonzero, releasing the exit button shortens the remaining
    /// unlock to this, so the door relocks promptly behind the person.
    pub exit_interactive: Duration,
    /// Long-pressing the exit button toggles the snib.
    pub hold_exit_for_snib: bool,
    /// Permit engaging the snib while on battery. Off by default: a
    /// door held unlocked drains a failing battery even faster.
    pub allow_snib_on_battery: bool,
    /// Cancel momentary unlocks as soon as the door opens.
    pub anti_bounce: bool,
}

impl Default for DoorConfig {
    fn default() -> Self {
        Self {
            card_unlock: Duration::from_millis(DEFAULT_CARD_UNLOCK_MS),
            exit_unlock: Duration::from_millis(DEFAULT_EXIT_UNLOCK_MS),
            snib_unlock: Duration::from_millis(DEFAULT_SNIB_UNLOCK_MS),
            remote_unlock: Duration::from_millis(DEFAULT_REMOTE_UNLOCK_MS),
            token_query_timeout: Duration::from_millis(DEFAULT_TOKEN_QUERY_TIMEOUT_MS),
            exit_interactive: Duration::ZERO,
            hold_exit_for_snib: false,
            allow_snib_on_battery: false,
            anti_bounce: false,
        }
    }
}
