//! Peripheral trait definitions.

use std::time::Duration;

use crate::error::Result;

/// The lock relay. `active` means unlocked; electrical inversion for
/// fail-secure versus fail-safe strikes is the implementation's
/// concern, not the caller's.
pub trait Relay: Send {
    async fn set_active(&mut self, active: bool) -> Result<()>;
    fn is_active(&self) -> bool;
}

/// One note of a tune: frequency in hertz (0 is a rest) and duration
/// in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Note {
    pub hz: u16,
    pub ms: u16,
}

impl Note {
    /// Decode a `buzzer_tune` payload: little-endian `(hz, ms)` u16
    /// pairs, terminated by a zero note or the end of the buffer. A
    /// trailing odd half-pair is ignored.
    #[must_use]
    pub fn parse_tune(bytes: &[u8]) -> Vec<Note> {
        let mut notes = Vec::new();
        for pair in bytes.chunks_exact(4) {
            let note = Note {
                hz: u16::from_le_bytes([pair[0], pair[1]]),
                ms: u16::from_le_bytes([pair[2], pair[3]]),
            };
            if note.hz == 0 && note.ms == 0 {
                break;
            }
            notes.push(note);
        }
        notes
    }
}

/// Audible feedback.
pub trait Buzzer: Send {
    async fn beep(&mut self, ms: u64, hz: Option<u32>) -> Result<()>;
    /// Short rising confirmation sound.
    async fn chirp(&mut self) -> Result<()>;
    /// Minimal keypress tick.
    async fn click(&mut self) -> Result<()>;
    async fn play(&mut self, tune: &[Note]) -> Result<()>;
}

/// Display mode of the status LED.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedMode {
    Off,
    On,
    Dim,
    /// Slow blink: no network.
    Blink,
    /// Medium flash: snib or remote unlock held.
    FlashMedium,
    /// Fast flash: momentary unlock in progress.
    FlashFast,
}

pub trait Led: Send {
    async fn set_mode(&mut self, mode: LedMode) -> Result<()>;
    fn mode(&self) -> LedMode;
}

/// Debounced, edge-detected input events. Long-press detection is the
/// implementation's job; consumers only see the classified event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputEvent {
    DoorOpened,
    DoorClosed,
    ExitPress,
    ExitLongPress,
    ExitRelease,
    SnibPress,
    SnibLongPress,
    SnibRelease,
}

pub trait Inputs: Send {
    /// Wait for the next input edge. `Err(Disconnected)` means the
    /// input source is gone and the caller should stop polling.
    async fn next_event(&mut self) -> Result<InputEvent>;

    /// Hold duration beyond which a press classifies as a long press.
    /// Implementations that debounce in fixed hardware may ignore it.
    fn set_long_press(&mut self, _threshold: Duration) {}
}

/// Supply voltage monitoring with hysteresis: the implementation
/// reports `OnBattery`/`OnMains` transitions only after the voltage
/// crosses its falling/rising thresholds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PowerEvent {
    OnBattery,
    OnMains,
    Voltage(f32),
}

pub trait PowerMonitor: Send {
    async fn next_event(&mut self) -> Result<PowerEvent>;
    fn voltage(&self) -> f32;
    fn on_battery(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tune_pairs() {
        let bytes = [
            0xE8, 0x03, 0xFA, 0x00, // 1000 Hz, 250 ms
            0xDC, 0x05, 0xFA, 0x00, // 1500 Hz, 250 ms
        ];
        let tune = Note::parse_tune(&bytes);
        assert_eq!(
            tune,
            vec![Note { hz: 1000, ms: 250 }, Note { hz: 1500, ms: 250 }]
        );
    }

    #[test]
    fn test_parse_tune_zero_terminated() {
        let bytes = [
            0xE8, 0x03, 0xFA, 0x00, //
            0x00, 0x00, 0x00, 0x00, // terminator
            0xDC, 0x05, 0xFA, 0x00, // ignored
        ];
        assert_eq!(Note::parse_tune(&bytes).len(), 1);
    }

    #[test]
    fn test_parse_tune_ignores_trailing_bytes() {
        let bytes = [0xE8, 0x03, 0xFA, 0x00, 0x01, 0x02];
        assert_eq!(Note::parse_tune(&bytes).len(), 1);
        assert!(Note::parse_tune(&[]).is_empty());
    }
}
