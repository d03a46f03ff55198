//! Token acquisition engine.
//!
//! Drives one reader chip through a [`ReaderPort`]: health probing and
//! reset backoff while unhealthy, single-target passive detection while
//! healthy, chip-level attribute reads for new tokens, and a two-slot
//! presence cache that debounces present/removed events.

use crate::error::{NfcError, Result};
use crate::health::{RateLimits, ReaderHealth};
use crate::token::Token;
use latchkey_core::constants::TOKEN_PRESENT_TIMEOUT;
use std::time::Instant;
use tracing::{debug, info, warn};

/// NTAG GET_VERSION command byte.
const CMD_GET_VERSION: u8 = 0x60;
/// NTAG READ_SIG command byte.
const CMD_READ_SIG: u8 = 0x3C;
/// NTAG FAST_READ command byte.
const CMD_FAST_READ: u8 = 0x3A;
/// NTAG READ_CNT command byte.
const CMD_READ_CNT: u8 = 0x39;
/// Blocks covered per FAST_READ round trip.
const FAST_READ_SPAN: u8 = 12;
/// Bytes per tag block.
const BLOCK_SIZE: usize = 4;

/// Raw anti-collision result from one passive-detect cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawTarget {
    pub atqa: u16,
    pub sak: u8,
    pub uid: Vec<u8>,
    pub ats: Vec<u8>,
}

/// Transport seam to the reader chip.
///
/// Every method is a short bounded-timeout primitive; implementations
/// must not block past [`READER_POLL_TIMEOUT`](latchkey_core::constants::READER_POLL_TIMEOUT)
/// per call. `transceive` carries a raw tag command and returns the tag
/// response data with the status byte already stripped; a missing
/// response is `NfcError::Timeout`, a negative status is
/// `NfcError::Transport`.
pub trait ReaderPort {
    async fn reset_pulse(&mut self) -> Result<()>;
    async fn firmware_version(&mut self) -> Result<u32>;
    async fn configure(&mut self) -> Result<()>;
    async fn detect_target(&mut self) -> Result<Option<RawTarget>>;
    async fn transceive(&mut self, command: &[u8]) -> Result<Vec<u8>>;
}

/// Events surfaced by the acquisition engine.
#[derive(Debug, Clone, PartialEq)]
pub enum NfcEvent {
    /// A new token entered the field (full attribute payload).
    TokenPresent(Token),
    /// A cached token has not been seen for the presence timeout.
    TokenRemoved(Token),
}

/// Chip-level read configuration, mirrored from the config file.
#[derive(Debug, Clone, Copy, Default)]
pub struct NfcConfig {
    /// Read the NTAG one-way counter for new tokens.
    pub read_counter: bool,
    /// Read the ECC originality signature for new tokens.
    pub read_sig: bool,
    /// Block budget for tag memory reads (0 = don't read data).
    pub read_data: u8,
    pub limits: RateLimits,
}

#[derive(Debug)]
struct Slot {
    token: Token,
    last_seen: Instant,
}

/// The acquisition engine. One instance per reader chip.
pub struct NfcEngine<P> {
    port: P,
    config: NfcConfig,
    health: ReaderHealth,
    slots: [Option<Slot>; 2],
}

impl<P: ReaderPort> NfcEngine<P> {
    pub fn new(port: P, config: NfcConfig) -> Self {
        NfcEngine {
            port,
            health: ReaderHealth::new(config.limits),
            config,
            slots: [None, None],
        }
    }

    #[must_use]
    pub fn ready(&self) -> bool {
        self.health.ready()
    }

    #[must_use]
    pub fn reset_count(&self) -> u32 {
        self.health.reset_count
    }

    #[must_use]
    pub fn rate_limit_trips(&self) -> u32 {
        self.health.rate_limit_trips
    }

    pub fn set_config(&mut self, config: NfcConfig) {
        self.config = config;
    }

    /// Access the underlying port (tests and diagnostics).
    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    /// One cooperative poll cycle. Never blocks past the port's bounded
    /// timeouts; all faults are non-fatal and self-heal through the
    /// reset/backoff path.
    pub async fn poll(&mut self, now: Instant) -> Vec<NfcEvent> {
        let mut events = Vec::new();

        if self.health.probe_due(now) {
            match self.port.firmware_version().await {
                Ok(_) => self.health.note_probe_ok(now),
                Err(e) => {
                    warn!(error = %e, reason = "probe", "reader is not responding");
                    self.health.note_probe_failed();
                }
            }
        }

        if !self.health.ready() {
            self.try_reset(now).await;
        }

        if self.health.ready() {
            match self.port.detect_target().await {
                Ok(Some(target)) => {
                    if let Some(event) = self.handle_target(target, now).await {
                        events.push(event);
                    }
                }
                Ok(None) => {}
                Err(NfcError::Timeout) => {}
                Err(e) => {
                    warn!(error = %e, "reader transport fault");
                    self.health.note_fault();
                }
            }
        }

        // removal sweep runs regardless of reader health so a dead chip
        // cannot pin a token present forever
        for slot in &mut self.slots {
            if let Some(s) = slot
                && now.duration_since(s.last_seen) > TOKEN_PRESENT_TIMEOUT
            {
                debug!(uid = %s.token.uid_hex(), "token removed");
                let removed = slot.take().map(|s| s.token);
                if let Some(token) = removed {
                    events.push(NfcEvent::TokenRemoved(token));
                }
            }
        }

        events
    }

    /// Reset pulse + capability probe, rate-limited by the backoff
    /// interval. Idempotent while already idle.
    async fn try_reset(&mut self, now: Instant) {
        if !self.health.reset_due(now) {
            return;
        }
        info!("resetting reader");
        if let Err(e) = self.port.reset_pulse().await {
            warn!(error = %e, "reader reset pulse failed");
        }
        self.health.note_reset_pulse(now);
        match self.port.firmware_version().await {
            Ok(version) => {
                info!(version = format!("{version:08x}"), "reader is back");
                if let Err(e) = self.port.configure().await {
                    warn!(error = %e, "reader configuration failed");
                    self.health.note_probe_failed();
                    return;
                }
                self.health.note_probe_ok(now);
            }
            Err(_) => {
                self.health.note_probe_failed();
            }
        }
    }

    async fn handle_target(&mut self, target: RawTarget, now: Instant) -> Option<NfcEvent> {
        // known token: refresh its slot, no re-read
        for slot in self.slots.iter_mut().flatten() {
            if slot.token.matches_uid(&target.uid) {
                slot.last_seen = now;
                return None;
            }
        }

        let read_start = Instant::now();
        let mut token = Token::new();
        token.atqa = target.atqa;
        token.sak = target.sak;
        token.set_uid(&target.uid);
        token.set_ats(&target.ats);
        token.uid.as_ref()?;

        if let Err(e) = self.read_attributes(&mut token).await {
            warn!(error = %e, uid = %token.uid_hex(), "attribute read fault");
            self.health.note_fault();
            return None;
        }
        token.read_time = read_start.elapsed();

        debug!(
            uid = %token.uid_hex(),
            atqa = token.atqa,
            sak = token.sak,
            read_time_ms = token.read_time.as_millis() as u64,
            "token present"
        );

        self.health.record_read(now);

        // cache in the first free slot; with both slots busy the token
        // is still reported but not tracked for removal
        if let Some(slot) = self.slots.iter_mut().find(|s| s.is_none()) {
            *slot = Some(Slot {
                token: token.clone(),
                last_seen: now,
            });
        }

        Some(NfcEvent::TokenPresent(token))
    }

    /// Chip-level follow-up reads for a new token. A timeout on any
    /// optional read skips that attribute; a transport error aborts.
    async fn read_attributes(&mut self, token: &mut Token) -> Result<()> {
        if token.is_iso14443_4() || token.is_ntag21x() {
            match self.port.transceive(&[CMD_GET_VERSION]).await {
                Ok(resp) => token.set_version(&resp),
                Err(NfcError::Timeout) => {}
                Err(e) => return Err(e),
            }
        }

        if !token.is_ntag21x() {
            return Ok(());
        }

        if self.config.read_sig {
            match self.port.transceive(&[CMD_READ_SIG, 0x00]).await {
                Ok(resp) => token.set_signature(&resp),
                Err(NfcError::Timeout) => {}
                Err(e) => return Err(e),
            }
        }

        if self.config.read_data > 0 && token.max_block > 0 {
            let max_block = token.max_block.min(self.config.read_data);
            let mut block = 0u8;
            while block < max_block {
                let end = block.saturating_add(FAST_READ_SPAN).min(max_block);
                match self.port.transceive(&[CMD_FAST_READ, block, end]).await {
                    Ok(resp) => token.set_data(block as usize * BLOCK_SIZE, &resp),
                    Err(NfcError::Timeout) => {}
                    Err(e) => return Err(e),
                }
                block = end;
            }
        }

        if self.config.read_counter {
            match self.port.transceive(&[CMD_READ_CNT, 0x02]).await {
                Ok(resp) if resp.len() == 3 => {
                    token.counter =
                        Some(u32::from(resp[0]) | u32::from(resp[1]) << 8 | u32::from(resp[2]) << 16);
                }
                Ok(_) => {}
                Err(NfcError::Timeout) => {}
                Err(e) => return Err(e),
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockPort;
    use std::time::Duration;

    const NTAG_UID: [u8; 7] = [0x04, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66];
    const VERSION_NTAG213: [u8; 8] = [0x00, 0x04, 0x04, 0x02, 0x01, 0x00, 0x0F, 0x03];

    async fn ready_engine(config: NfcConfig) -> NfcEngine<MockPort> {
        let mut engine = NfcEngine::new(MockPort::new(), config);
        // first poll performs the reset + probe and reaches Ready
        let events = engine.poll(Instant::now()).await;
        assert!(events.is_empty());
        assert!(engine.ready());
        engine
    }

    #[tokio::test]
    async fn test_reset_path_reaches_ready() {
        let engine = ready_engine(NfcConfig::default()).await;
        assert_eq!(engine.reset_count(), 1);
    }

    #[tokio::test]
    async fn test_unresponsive_reader_backs_off() {
        let mut port = MockPort::new();
        port.responding = false;
        let mut engine = NfcEngine::new(port, NfcConfig::default());
        let now = Instant::now();
        engine.poll(now).await;
        assert!(!engine.ready());
        assert_eq!(engine.port_mut().reset_pulses, 1);
        // still inside the backoff window: no second pulse
        engine.poll(now + Duration::from_millis(100)).await;
        assert_eq!(engine.port_mut().reset_pulses, 1);
        // after the (doubled) window a new pulse goes out
        engine.poll(now + Duration::from_millis(600)).await;
        assert_eq!(engine.port_mut().reset_pulses, 2);
    }

    #[tokio::test]
    async fn test_new_token_emits_present_once() {
        let mut engine = ready_engine(NfcConfig::default()).await;
        let now = Instant::now();
        engine.port_mut().present_classic(&[0x04, 0xA1, 0xB2, 0xC3]);

        let events = engine.poll(now).await;
        assert_eq!(events.len(), 1);
        match &events[0] {
            NfcEvent::TokenPresent(t) => assert_eq!(t.uid_hex(), "04a1b2c3"),
            other => panic!("unexpected event {other:?}"),
        }

        // same token again: slot refresh only, no event
        let events = engine.poll(now + Duration::from_millis(100)).await;
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn test_token_removed_after_presence_timeout() {
        let mut engine = ready_engine(NfcConfig::default()).await;
        let now = Instant::now();
        engine.port_mut().present_classic(&[0x04, 0xA1, 0xB2, 0xC3]);
        engine.poll(now).await;
        engine.port_mut().remove_target();

        // inside the presence window: still considered present
        let events = engine.poll(now + Duration::from_millis(200)).await;
        assert!(events.is_empty());

        let events = engine.poll(now + Duration::from_millis(500)).await;
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], NfcEvent::TokenRemoved(t) if t.uid_hex() == "04a1b2c3"));
    }

    #[tokio::test]
    async fn test_two_tokens_tracked_independently() {
        let mut engine = ready_engine(NfcConfig::default()).await;
        let now = Instant::now();

        engine.port_mut().present_classic(&[0x04, 0x01, 0x01, 0x01]);
        assert_eq!(engine.poll(now).await.len(), 1);

        engine.port_mut().present_classic(&[0x04, 0x02, 0x02, 0x02]);
        let t1 = now + Duration::from_millis(100);
        assert_eq!(engine.poll(t1).await.len(), 1);

        // first token ages out while the second keeps being seen
        let t2 = now + Duration::from_millis(500);
        let events = engine.poll(t2).await;
        let removed: Vec<_> = events
            .iter()
            .filter(|e| matches!(e, NfcEvent::TokenRemoved(_)))
            .collect();
        assert_eq!(removed.len(), 1);
    }

    #[tokio::test]
    async fn test_ntag_attribute_reads() {
        let config = NfcConfig {
            read_counter: true,
            read_sig: true,
            read_data: 12,
            limits: RateLimits::default(),
        };
        let mut engine = ready_engine(config).await;
        engine.port_mut().present_ntag(&NTAG_UID);
        engine.port_mut().respond(&[CMD_GET_VERSION], &VERSION_NTAG213);
        engine.port_mut().respond(&[CMD_READ_SIG, 0x00], &[0xAB; 32]);
        engine
            .port_mut()
            .respond(&[CMD_FAST_READ, 0, 12], &[0x5A; 48]);
        engine
            .port_mut()
            .respond(&[CMD_READ_CNT, 0x02], &[0x01, 0x02, 0x00]);

        let events = engine.poll(Instant::now()).await;
        assert_eq!(events.len(), 1);
        let NfcEvent::TokenPresent(token) = &events[0] else {
            panic!("expected TokenPresent");
        };
        assert_eq!(token.max_block, 0x2C);
        assert_eq!(token.signature, Some([0xAB; 32]));
        assert_eq!(token.data.len(), 48);
        assert_eq!(token.counter, Some(0x0201));
    }

    #[tokio::test]
    async fn test_transport_fault_drops_ready() {
        let mut engine = ready_engine(NfcConfig::default()).await;
        engine.port_mut().detect_broken = true;
        engine.poll(Instant::now()).await;
        assert!(!engine.ready());
    }

    #[tokio::test]
    async fn test_rate_limit_storm_forces_reset() {
        let config = NfcConfig {
            limits: RateLimits {
                per_5s: 30,
                per_1m: 1000,
            },
            ..Default::default()
        };
        let mut engine = ready_engine(config).await;
        let now = Instant::now();

        for i in 0u32..31 {
            // a fresh UID each time so every read is a new token
            let uid = [0x04, (i >> 8) as u8, i as u8, 0x01];
            engine.port_mut().present_classic(&uid);
            // advance past the presence timeout so slots free up, but
            // stay inside the 5s window
            let t = now + Duration::from_millis(u64::from(i) * 10);
            engine.poll(t).await;
        }

        assert!(!engine.ready());
        assert_eq!(engine.rate_limit_trips(), 1);
    }
}
