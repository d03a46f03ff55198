//! The door state machine.

use std::time::Instant;

use latchkey_core::{AccessDecision, TokenUid};
use latchkey_hardware::{InputEvent, LedMode};
use latchkey_nfc::Token;
use latchkey_protocol::StateInfo;
use latchkey_tokendb::TokenDb;
use tracing::{debug, info, warn};

use crate::config::DoorConfig;

const PRESENT_BEEP: (u64, u32) = (100, 500);
const GRANT_BEEP: (u64, u32) = (100, 1000);
const DENY_BEEP: (u64, u32) = (500, 256);

/// Side effects for the caller to apply, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum DoorEffect {
    /// Relay edge: exactly one per transition.
    Unlocked,
    Locked,
    /// Something observable changed; send a fresh `state_info`.
    StatusChanged,
    /// Ask the server to authenticate this token.
    AuthRequest(Token),
    Beep { ms: u64, hz: u32 },
    Led(LedMode),
}

/// Fields of a `state_set` command. Absent fields leave the
/// corresponding state untouched.
#[derive(Debug, Clone, Default)]
pub struct StateOverride {
    pub card_enable: Option<bool>,
    pub exit_enable: Option<bool>,
    pub snib_enable: Option<bool>,
    pub card_active: Option<bool>,
    pub exit_active: Option<bool>,
    pub snib_active: Option<bool>,
    pub remote_active: Option<bool>,
    pub user: Option<String>,
    pub uid: Option<String>,
    pub snib_renew: bool,
}

#[derive(Debug)]
struct PendingAuth {
    uid: TokenUid,
    deadline: Instant,
}

/// One unlock source: active as long as `until` is in the future.
#[derive(Debug, Default)]
struct Source {
    active: bool,
    until: Option<Instant>,
}

impl Source {
    fn engage(&mut self, until: Instant) {
        self.active = true;
        self.until = Some(until);
    }

    fn clear(&mut self) {
        self.active = false;
        self.until = None;
    }

    fn expired(&self, now: Instant) -> bool {
        self.active && self.until.is_some_and(|t| now >= t)
    }
}

#[derive(Debug)]
pub struct DoorCoordinator {
    config: DoorConfig,
    db: TokenDb,

    card_enable: bool,
    exit_enable: bool,
    snib_enable: bool,

    card: Source,
    exit: Source,
    snib: Source,
    remote: Source,

    unlock_active: bool,
    door_open: bool,
    on_battery: bool,
    network_up: bool,
    voltage: f32,
    user: String,
    uid: String,

    pending: Option<PendingAuth>,
    changed: bool,
    led: Option<LedMode>,
}

impl DoorCoordinator {
    pub fn new(config: DoorConfig, db: TokenDb) -> Self {
        Self {
            config,
            db,
            card_enable: true,
            exit_enable: true,
            snib_enable: true,
            card: Source::default(),
            exit: Source::default(),
            snib: Source::default(),
            remote: Source::default(),
            unlock_active: false,
            door_open: false,
            on_battery: false,
            network_up: false,
            voltage: 0.0,
            user: String::new(),
            uid: String::new(),
            pending: None,
            changed: false,
            led: None,
        }
    }

    /// A token landed on the reader: announce it, ask the server, and
    /// start the fallback clock.
    pub fn token_present(&mut self, token: &Token, now: Instant) -> Vec<DoorEffect> {
        let mut effects = Vec::new();
        info!(uid = %token.uid_hex(), "token present");
        effects.push(DoorEffect::Beep {
            ms: PRESENT_BEEP.0,
            hz: PRESENT_BEEP.1,
        });

        if let Some(uid) = token.uid.clone() {
            self.pending = Some(PendingAuth {
                uid,
                deadline: now + self.config.token_query_timeout,
            });
            effects.push(DoorEffect::AuthRequest(token.clone()));
        }

        self.reconcile(&mut effects);
        effects
    }

    pub fn token_removed(&mut self, token: &Token) {
        debug!(uid = %token.uid_hex(), "token removed");
    }

    /// Swap in new tunables. Deadlines already armed keep their old
    /// expiry; the new durations apply from the next arming.
    pub fn set_config(&mut self, config: DoorConfig) {
        self.config = config;
    }

    /// Server verdict for an earlier `token_auth`. Ignored unless it
    /// matches the presentation still waiting for a decision, so every
    /// presentation gets at most one decision.
    pub fn token_info(
        &mut self,
        uid: &str,
        found: bool,
        name: &str,
        access: u8,
        now: Instant,
    ) -> Vec<DoorEffect> {
        let mut effects = Vec::new();
        let pending = self
            .pending
            .as_ref()
            .is_some_and(|p| p.uid.to_hex() == uid);
        if pending {
            self.pending = None;
            if found {
                let decision = AccessDecision {
                    access_level: access,
                    user: name.to_string(),
                };
                self.decide(uid, decision, now, &mut effects);
            } else {
                self.decide_from_db(uid, now, &mut effects);
            }
        } else {
            debug!(uid, "stale token_info ignored");
        }
        self.reconcile(&mut effects);
        effects
    }

    /// Deadline sweep. Call every couple hundred milliseconds.
    pub fn tick(&mut self, now: Instant) -> Vec<DoorEffect> {
        let mut effects = Vec::new();

        if self.pending.as_ref().is_some_and(|p| now >= p.deadline)
            && let Some(pending) = self.pending.take()
        {
            let uid = pending.uid.to_hex();
            warn!(uid = %uid, "token query timed out, using local database");
            self.decide_from_db(&uid, now, &mut effects);
        }

        if self.card.expired(now) {
            info!("card unlock expired");
            self.card.clear();
            self.user.clear();
            self.uid.clear();
            self.changed = true;
        }
        if self.exit.expired(now) {
            info!("exit unlock expired");
            self.exit.clear();
            self.changed = true;
        }
        if self.snib.expired(now) {
            info!("snib unlock expired");
            self.snib.clear();
            self.changed = true;
        }
        if self.remote.expired(now) {
            info!("remote unlock expired");
            self.remote.clear();
            self.changed = true;
        }

        self.reconcile(&mut effects);
        effects
    }

    pub fn input(&mut self, event: InputEvent, now: Instant) -> Vec<DoorEffect> {
        let mut effects = Vec::new();
        match event {
            InputEvent::DoorOpened => {
                if self.config.anti_bounce {
                    if self.exit.active {
                        self.exit.clear();
                    }
                    if self.card.active {
                        self.card.clear();
                        self.user.clear();
                        self.uid.clear();
                    }
                }
                self.door_open = true;
                self.changed = true;
            }
            InputEvent::DoorClosed => {
                self.door_open = false;
                self.changed = true;
            }
            InputEvent::ExitPress => {
                if self.exit_enable {
                    self.exit.engage(now + self.config.exit_unlock);
                    self.changed = true;
                }
            }
            InputEvent::ExitLongPress => {
                if self.config.hold_exit_for_snib {
                    self.toggle_snib_via_exit(now, &mut effects);
                }
            }
            InputEvent::ExitRelease => {
                if self.exit.active && self.config.exit_interactive > std::time::Duration::ZERO {
                    self.exit.engage(now + self.config.exit_interactive);
                    self.changed = true;
                }
            }
            InputEvent::SnibPress => {
                if self.snib.active {
                    self.snib.clear();
                    self.changed = true;
                } else if self.snib_allowed() {
                    self.snib.engage(now + self.config.snib_unlock);
                    self.changed = true;
                }
            }
            InputEvent::SnibLongPress | InputEvent::SnibRelease => {}
        }
        self.reconcile(&mut effects);
        effects
    }

    /// Apply a `state_set` command from the server.
    pub fn state_set(&mut self, set: StateOverride, now: Instant) -> Vec<DoorEffect> {
        let mut effects = Vec::new();

        if let Some(v) = set.card_enable {
            self.card_enable = v;
        }
        if let Some(v) = set.exit_enable {
            self.exit_enable = v;
        }
        if let Some(v) = set.snib_enable {
            self.snib_enable = v;
        }

        if let Some(v) = set.card_active {
            if v {
                self.card.engage(now + self.config.card_unlock);
                effects.push(DoorEffect::Beep {
                    ms: GRANT_BEEP.0,
                    hz: GRANT_BEEP.1,
                });
            } else {
                self.card.clear();
            }
        }
        if let Some(v) = set.exit_active {
            if v {
                self.exit.engage(now + self.config.exit_unlock);
            } else {
                self.exit.clear();
            }
        }
        if let Some(v) = set.snib_active {
            if v {
                self.snib.engage(now + self.config.snib_unlock);
            } else {
                self.snib.clear();
            }
        }
        if let Some(v) = set.remote_active {
            if v {
                self.remote.engage(now + self.config.remote_unlock);
            } else {
                self.remote.clear();
            }
        }
        if let Some(user) = set.user {
            self.user = user;
        }
        if let Some(uid) = set.uid {
            self.uid = uid;
        }
        if set.snib_renew && self.snib.active {
            self.snib.engage(now + self.config.snib_unlock);
        }

        self.changed = true;
        self.reconcile(&mut effects);
        effects
    }

    pub fn set_network_up(&mut self, up: bool) -> Vec<DoorEffect> {
        let mut effects = Vec::new();
        if self.network_up != up {
            self.network_up = up;
            self.changed = true;
        }
        self.reconcile(&mut effects);
        effects
    }

    pub fn set_power(&mut self, on_battery: bool, voltage: f32) -> Vec<DoorEffect> {
        let mut effects = Vec::new();
        self.voltage = voltage;
        if self.on_battery != on_battery {
            self.on_battery = on_battery;
            self.changed = true;
        }
        self.reconcile(&mut effects);
        effects
    }

    /// Current status for `state_info`.
    #[must_use]
    pub fn state_info(&self) -> StateInfo {
        StateInfo {
            card_enable: self.card_enable,
            card_active: self.card.active,
            exit_enable: self.exit_enable,
            exit_active: self.exit.active,
            snib_enable: self.snib_enable,
            snib_active: self.snib.active,
            remote_active: self.remote.active,
            unlock: self.unlock_active,
            voltage: self.voltage,
            user: self.user.clone(),
            uid: self.uid.clone(),
            door: if self.door_open { "open" } else { "closed" }.to_string(),
            power: if self.on_battery { "battery" } else { "mains" }.to_string(),
        }
    }

    #[must_use]
    pub fn unlock_active(&self) -> bool {
        self.unlock_active
    }

    fn snib_allowed(&self) -> bool {
        self.snib_enable && (!self.on_battery || self.config.allow_snib_on_battery)
    }

    fn toggle_snib_via_exit(&mut self, now: Instant, effects: &mut Vec<DoorEffect>) {
        if self.snib.active {
            effects.push(DoorEffect::Beep {
                ms: PRESENT_BEEP.0,
                hz: PRESENT_BEEP.1,
            });
            self.snib.clear();
            self.exit.clear();
            self.changed = true;
        } else if self.snib_allowed() {
            effects.push(DoorEffect::Beep {
                ms: GRANT_BEEP.0,
                hz: GRANT_BEEP.1,
            });
            self.snib.engage(now + self.config.snib_unlock);
            self.exit.clear();
            self.changed = true;
        }
    }

    fn decide(
        &mut self,
        uid: &str,
        decision: AccessDecision,
        now: Instant,
        effects: &mut Vec<DoorEffect>,
    ) {
        if !self.card_enable {
            effects.push(DoorEffect::Beep {
                ms: DENY_BEEP.0,
                hz: DENY_BEEP.1,
            });
            return;
        }
        if decision.granted() {
            info!(uid, user = %decision.user, "access granted");
            self.card.engage(now + self.config.card_unlock);
            self.user = decision.user;
            self.uid = uid.to_string();
            self.changed = true;
            effects.push(DoorEffect::Beep {
                ms: GRANT_BEEP.0,
                hz: GRANT_BEEP.1,
            });
        } else {
            info!(uid, "access denied");
            effects.push(DoorEffect::Beep {
                ms: DENY_BEEP.0,
                hz: DENY_BEEP.1,
            });
        }
    }

    fn decide_from_db(&mut self, uid: &str, now: Instant, effects: &mut Vec<DoorEffect>) {
        let decision = hex::decode(uid)
            .ok()
            .and_then(|bytes| self.db.lookup(&bytes))
            .map(AccessDecision::from)
            .unwrap_or_else(AccessDecision::deny);
        self.decide(uid, decision, now, effects);
    }

    /// Recompute the relay OR and the LED policy, emitting edges.
    fn reconcile(&mut self, effects: &mut Vec<DoorEffect>) {
        let any_active =
            self.card.active || self.exit.active || self.snib.active || self.remote.active;
        if any_active != self.unlock_active {
            self.unlock_active = any_active;
            self.changed = true;
            effects.push(if any_active {
                DoorEffect::Unlocked
            } else {
                DoorEffect::Locked
            });
        }

        let led = if self.card.active || self.exit.active {
            LedMode::FlashFast
        } else if self.snib.active || self.remote.active {
            LedMode::FlashMedium
        } else if self.on_battery {
            LedMode::Dim
        } else if !self.network_up {
            LedMode::Blink
        } else {
            LedMode::On
        };
        if self.led != Some(led) {
            self.led = Some(led);
            effects.push(DoorEffect::Led(led));
        }

        if self.changed {
            self.changed = false;
            effects.push(DoorEffect::StatusChanged);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sha2::{Digest, Sha256};
    use std::io::Write;
    use std::time::Duration;
    use tempfile::NamedTempFile;

    const UID: [u8; 4] = [0x04, 0xA1, 0xB2, 0xC3];

    fn token() -> Token {
        let mut t = Token::new();
        t.set_uid(&UID);
        t.atqa = 0x0044;
        t.sak = 0x00;
        t
    }

    fn coordinator(config: DoorConfig) -> DoorCoordinator {
        DoorCoordinator::new(config, TokenDb::new("/nonexistent/tokens.dat"))
    }

    fn unlocks(effects: &[DoorEffect]) -> usize {
        effects.iter().filter(|e| **e == DoorEffect::Unlocked).count()
    }

    fn locks(effects: &[DoorEffect]) -> usize {
        effects.iter().filter(|e| **e == DoorEffect::Locked).count()
    }

    #[test]
    fn test_server_grant_unlocks_and_expires() {
        let mut door = coordinator(DoorConfig::default());
        let t0 = Instant::now();

        let effects = door.token_present(&token(), t0);
        assert!(effects.iter().any(|e| matches!(e, DoorEffect::AuthRequest(_))));
        assert_eq!(unlocks(&effects), 0);

        let effects = door.token_info("04a1b2c3", true, "alice", 1, t0);
        assert_eq!(unlocks(&effects), 1);
        assert!(door.unlock_active());
        assert_eq!(door.state_info().user, "alice");

        // still unlocked before the deadline
        let effects = door.tick(t0 + Duration::from_secs(4));
        assert_eq!(locks(&effects), 0);

        // exactly one locked edge at expiry
        let effects = door.tick(t0 + Duration::from_secs(6));
        assert_eq!(locks(&effects), 1);
        assert!(!door.unlock_active());
        assert_eq!(door.state_info().user, "");
    }

    #[test]
    fn test_server_deny_stays_locked() {
        let mut door = coordinator(DoorConfig::default());
        let t0 = Instant::now();
        door.token_present(&token(), t0);
        let effects = door.token_info("04a1b2c3", true, "mallory", 0, t0);
        assert_eq!(unlocks(&effects), 0);
        assert!(effects
            .iter()
            .any(|e| matches!(e, DoorEffect::Beep { hz: 256, .. })));
        assert!(!door.unlock_active());
    }

    #[test]
    fn test_timeout_falls_back_to_database() {
        // local database grants this UID
        let mut dbfile = NamedTempFile::new().unwrap();
        let salt = b"s";
        let hash = Sha256::digest([salt.as_slice(), &UID].concat());
        let mut bytes = vec![2u8, 4, 1];
        bytes.extend_from_slice(salt);
        bytes.extend_from_slice(&hash[..4]);
        bytes.push(1);
        bytes.push(3);
        bytes.extend_from_slice(b"bob");
        dbfile.write_all(&bytes).unwrap();
        dbfile.flush().unwrap();

        let mut door =
            DoorCoordinator::new(DoorConfig::default(), TokenDb::new(dbfile.path()));
        let t0 = Instant::now();
        door.token_present(&token(), t0);

        // no decision yet
        assert!(!door.unlock_active());

        let effects = door.tick(t0 + Duration::from_millis(1100));
        assert_eq!(unlocks(&effects), 1);
        assert_eq!(door.state_info().user, "bob");
    }

    #[test]
    fn test_at_most_one_decision_per_presentation() {
        let mut door = coordinator(DoorConfig::default());
        let t0 = Instant::now();
        door.token_present(&token(), t0);

        // timeout resolves the presentation as deny (no database)
        let effects = door.tick(t0 + Duration::from_millis(1100));
        assert_eq!(unlocks(&effects), 0);

        // a late server grant must not unlock anything
        let effects = door.token_info("04a1b2c3", true, "alice", 1, t0 + Duration::from_millis(1200));
        assert_eq!(unlocks(&effects), 0);
        assert!(!door.unlock_active());
    }

    #[test]
    fn test_mismatched_token_info_ignored() {
        let mut door = coordinator(DoorConfig::default());
        let t0 = Instant::now();
        door.token_present(&token(), t0);
        let effects = door.token_info("deadbeef", true, "eve", 1, t0);
        assert_eq!(unlocks(&effects), 0);
    }

    #[test]
    fn test_card_disabled_denies_grant() {
        let mut door = coordinator(DoorConfig::default());
        let t0 = Instant::now();
        door.state_set(
            StateOverride {
                card_enable: Some(false),
                ..Default::default()
            },
            t0,
        );
        door.token_present(&token(), t0);
        let effects = door.token_info("04a1b2c3", true, "alice", 1, t0);
        assert_eq!(unlocks(&effects), 0);
    }

    #[test]
    fn test_relay_is_or_of_sources() {
        let mut door = coordinator(DoorConfig::default());
        let t0 = Instant::now();

        // exit press then remote: one unlocked edge total
        let effects = door.input(InputEvent::ExitPress, t0);
        assert_eq!(unlocks(&effects), 1);
        let effects = door.state_set(
            StateOverride {
                remote_active: Some(true),
                ..Default::default()
            },
            t0,
        );
        assert_eq!(unlocks(&effects), 0);

        // exit expires but remote still holds the door
        let effects = door.tick(t0 + Duration::from_secs(6));
        assert_eq!(locks(&effects), 0);
        assert!(door.unlock_active());

        // dropping the last source emits exactly one locked edge
        let effects = door.state_set(
            StateOverride {
                remote_active: Some(false),
                ..Default::default()
            },
            t0 + Duration::from_secs(7),
        );
        assert_eq!(locks(&effects), 1);
    }

    #[test]
    fn test_anti_bounce_relocks_on_door_open() {
        let config = DoorConfig {
            anti_bounce: true,
            ..Default::default()
        };
        let mut door = coordinator(config);
        let t0 = Instant::now();

        door.token_present(&token(), t0);
        door.token_info("04a1b2c3", true, "alice", 1, t0);
        assert!(door.unlock_active());

        let effects = door.input(InputEvent::DoorOpened, t0 + Duration::from_secs(1));
        assert_eq!(locks(&effects), 1);
        assert_eq!(door.state_info().door, "open");
        assert_eq!(door.state_info().user, "");
    }

    #[test]
    fn test_snib_toggle_and_renew() {
        let mut door = coordinator(DoorConfig::default());
        let t0 = Instant::now();

        let effects = door.input(InputEvent::SnibPress, t0);
        assert_eq!(unlocks(&effects), 1);

        // renew extends past the original deadline
        door.state_set(
            StateOverride {
                snib_renew: true,
                ..Default::default()
            },
            t0 + Duration::from_secs(1500),
        );
        let effects = door.tick(t0 + Duration::from_secs(1900));
        assert_eq!(locks(&effects), 0);

        // second press disengages
        let effects = door.input(InputEvent::SnibPress, t0 + Duration::from_secs(1901));
        assert_eq!(locks(&effects), 1);
    }

    #[test]
    fn test_snib_blocked_on_battery() {
        let mut door = coordinator(DoorConfig::default());
        let t0 = Instant::now();
        door.set_power(true, 11.9);

        let effects = door.input(InputEvent::SnibPress, t0);
        assert_eq!(unlocks(&effects), 0);

        let config = DoorConfig {
            allow_snib_on_battery: true,
            ..Default::default()
        };
        let mut door = coordinator(config);
        door.set_power(true, 11.9);
        let effects = door.input(InputEvent::SnibPress, t0);
        assert_eq!(unlocks(&effects), 1);
    }

    #[test]
    fn test_hold_exit_for_snib() {
        let config = DoorConfig {
            hold_exit_for_snib: true,
            ..Default::default()
        };
        let mut door = coordinator(config);
        let t0 = Instant::now();

        door.input(InputEvent::ExitPress, t0);
        let effects = door.input(InputEvent::ExitLongPress, t0 + Duration::from_secs(1));
        // exit source cancelled, snib engaged: no relay edge
        assert_eq!(unlocks(&effects) + locks(&effects), 0);
        assert!(door.state_info().snib_active);
        assert!(!door.state_info().exit_active);

        // long press again clears the snib
        let effects = door.input(InputEvent::ExitLongPress, t0 + Duration::from_secs(2));
        assert_eq!(locks(&effects), 1);
    }

    #[test]
    fn test_exit_interactive_release_shortens_unlock() {
        let config = DoorConfig {
            exit_interactive: Duration::from_secs(1),
            ..Default::default()
        };
        let mut door = coordinator(config);
        let t0 = Instant::now();

        door.input(InputEvent::ExitPress, t0);
        door.input(InputEvent::ExitRelease, t0 + Duration::from_millis(200));

        // relocks at release + 1s, well before the 5s default
        let effects = door.tick(t0 + Duration::from_millis(1300));
        assert_eq!(locks(&effects), 1);
    }

    #[test]
    fn test_led_policy() {
        let mut door = coordinator(DoorConfig::default());
        let t0 = Instant::now();

        // starts offline
        let effects = door.tick(t0);
        assert!(effects.contains(&DoorEffect::Led(LedMode::Blink)));

        let effects = door.set_network_up(true);
        assert!(effects.contains(&DoorEffect::Led(LedMode::On)));

        let effects = door.input(InputEvent::ExitPress, t0);
        assert!(effects.contains(&DoorEffect::Led(LedMode::FlashFast)));

        let effects = door.tick(t0 + Duration::from_secs(6));
        assert!(effects.contains(&DoorEffect::Led(LedMode::On)));

        let effects = door.set_power(true, 11.9);
        assert!(effects.contains(&DoorEffect::Led(LedMode::Dim)));
    }

    #[test]
    fn test_status_changed_prompts_report() {
        let mut door = coordinator(DoorConfig::default());
        let t0 = Instant::now();
        let effects = door.input(InputEvent::DoorOpened, t0);
        assert!(effects.contains(&DoorEffect::StatusChanged));

        // idle ticks stay quiet
        let effects = door.tick(t0 + Duration::from_millis(200));
        assert!(effects.is_empty());
    }
}
