//! Mock peripherals.
//!
//! Each mock comes with a handle for the test (or the emulated
//! hardware profile) to inject events and inspect what the firmware
//! did, mirroring how the real peripherals sit on the other side of a
//! GPIO or an input ISR.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{HardwareError, Result};
use crate::traits::{
    Buzzer, InputEvent, Inputs, Led, LedMode, Note, PowerEvent, PowerMonitor, Relay,
};

/// Mock lock relay.
#[derive(Debug)]
pub struct MockRelay {
    state: Arc<AtomicBool>,
    changes: Arc<AtomicU64>,
}

/// Observer side of [`MockRelay`].
#[derive(Debug, Clone)]
pub struct RelayProbe {
    state: Arc<AtomicBool>,
    changes: Arc<AtomicU64>,
}

impl MockRelay {
    pub fn new() -> (Self, RelayProbe) {
        let state = Arc::new(AtomicBool::new(false));
        let changes = Arc::new(AtomicU64::new(0));
        (
            Self {
                state: Arc::clone(&state),
                changes: Arc::clone(&changes),
            },
            RelayProbe { state, changes },
        )
    }
}

impl Relay for MockRelay {
    async fn set_active(&mut self, active: bool) -> Result<()> {
        if self.state.swap(active, Ordering::SeqCst) != active {
            self.changes.fetch_add(1, Ordering::SeqCst);
            debug!(active, "relay");
        }
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.state.load(Ordering::SeqCst)
    }
}

impl RelayProbe {
    pub fn is_active(&self) -> bool {
        self.state.load(Ordering::SeqCst)
    }

    /// Number of observed edges, both directions.
    pub fn changes(&self) -> u64 {
        self.changes.load(Ordering::SeqCst)
    }
}

/// What the firmware asked the buzzer to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuzzerAction {
    Beep { ms: u64, hz: Option<u32> },
    Chirp,
    Click,
    Play(Vec<Note>),
}

/// Mock buzzer that records every request.
#[derive(Debug)]
pub struct MockBuzzer {
    actions: Arc<Mutex<Vec<BuzzerAction>>>,
}

#[derive(Debug, Clone)]
pub struct BuzzerProbe {
    actions: Arc<Mutex<Vec<BuzzerAction>>>,
}

impl MockBuzzer {
    pub fn new() -> (Self, BuzzerProbe) {
        let actions = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                actions: Arc::clone(&actions),
            },
            BuzzerProbe { actions },
        )
    }
}

impl Buzzer for MockBuzzer {
    async fn beep(&mut self, ms: u64, hz: Option<u32>) -> Result<()> {
        self.actions
            .lock()
            .unwrap()
            .push(BuzzerAction::Beep { ms, hz });
        Ok(())
    }

    async fn chirp(&mut self) -> Result<()> {
        self.actions.lock().unwrap().push(BuzzerAction::Chirp);
        Ok(())
    }

    async fn click(&mut self) -> Result<()> {
        self.actions.lock().unwrap().push(BuzzerAction::Click);
        Ok(())
    }

    async fn play(&mut self, tune: &[Note]) -> Result<()> {
        self.actions
            .lock()
            .unwrap()
            .push(BuzzerAction::Play(tune.to_vec()));
        Ok(())
    }
}

impl BuzzerProbe {
    pub fn actions(&self) -> Vec<BuzzerAction> {
        self.actions.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.actions.lock().unwrap().clear();
    }
}

/// Mock status LED.
#[derive(Debug)]
pub struct MockLed {
    mode: Arc<Mutex<LedMode>>,
}

#[derive(Debug, Clone)]
pub struct LedProbe {
    mode: Arc<Mutex<LedMode>>,
}

impl MockLed {
    pub fn new() -> (Self, LedProbe) {
        let mode = Arc::new(Mutex::new(LedMode::Off));
        (
            Self {
                mode: Arc::clone(&mode),
            },
            LedProbe { mode },
        )
    }
}

impl Led for MockLed {
    async fn set_mode(&mut self, mode: LedMode) -> Result<()> {
        *self.mode.lock().unwrap() = mode;
        Ok(())
    }

    fn mode(&self) -> LedMode {
        *self.mode.lock().unwrap()
    }
}

impl LedProbe {
    pub fn mode(&self) -> LedMode {
        *self.mode.lock().unwrap()
    }
}

/// Mock input bank fed from a channel.
#[derive(Debug)]
pub struct MockInputs {
    events: mpsc::UnboundedReceiver<InputEvent>,
    long_press: Arc<Mutex<Duration>>,
}

#[derive(Debug, Clone)]
pub struct InputsHandle {
    events: mpsc::UnboundedSender<InputEvent>,
    long_press: Arc<Mutex<Duration>>,
}

impl MockInputs {
    pub fn new() -> (Self, InputsHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let long_press = Arc::new(Mutex::new(Duration::ZERO));
        (
            Self {
                events: rx,
                long_press: long_press.clone(),
            },
            InputsHandle {
                events: tx,
                long_press,
            },
        )
    }
}

impl Inputs for MockInputs {
    async fn next_event(&mut self) -> Result<InputEvent> {
        self.events.recv().await.ok_or(HardwareError::Disconnected)
    }

    fn set_long_press(&mut self, threshold: Duration) {
        *self.long_press.lock().unwrap() = threshold;
    }
}

impl InputsHandle {
    pub fn push(&self, event: InputEvent) {
        self.events.send(event).ok();
    }

    /// Threshold last configured on the paired `MockInputs`.
    pub fn long_press(&self) -> Duration {
        *self.long_press.lock().unwrap()
    }
}

#[derive(Debug)]
struct PowerState {
    voltage: f32,
    on_battery: bool,
}

/// Mock supply monitor.
#[derive(Debug)]
pub struct MockPower {
    state: Arc<Mutex<PowerState>>,
    events: mpsc::UnboundedReceiver<PowerEvent>,
}

#[derive(Debug, Clone)]
pub struct PowerHandle {
    state: Arc<Mutex<PowerState>>,
    events: mpsc::UnboundedSender<PowerEvent>,
}

impl MockPower {
    pub fn new(voltage: f32) -> (Self, PowerHandle) {
        let state = Arc::new(Mutex::new(PowerState {
            voltage,
            on_battery: false,
        }));
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                state: Arc::clone(&state),
                events: rx,
            },
            PowerHandle { state, events: tx },
        )
    }
}

impl PowerMonitor for MockPower {
    async fn next_event(&mut self) -> Result<PowerEvent> {
        self.events.recv().await.ok_or(HardwareError::Disconnected)
    }

    fn voltage(&self) -> f32 {
        self.state.lock().unwrap().voltage
    }

    fn on_battery(&self) -> bool {
        self.state.lock().unwrap().on_battery
    }
}

impl PowerHandle {
    /// Drive a supply change: updates the observable state and emits
    /// the corresponding event.
    pub fn set_supply(&self, voltage: f32, on_battery: bool) {
        let event = {
            let mut state = self.state.lock().unwrap();
            state.voltage = voltage;
            let flipped = state.on_battery != on_battery;
            state.on_battery = on_battery;
            if flipped {
                Some(if on_battery {
                    PowerEvent::OnBattery
                } else {
                    PowerEvent::OnMains
                })
            } else {
                None
            }
        };
        if let Some(event) = event {
            self.events.send(event).ok();
        }
        self.events.send(PowerEvent::Voltage(voltage)).ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_relay_counts_edges() {
        let (mut relay, probe) = MockRelay::new();
        relay.set_active(true).await.unwrap();
        relay.set_active(true).await.unwrap(); // no edge
        relay.set_active(false).await.unwrap();
        assert!(!probe.is_active());
        assert_eq!(probe.changes(), 2);
    }

    #[tokio::test]
    async fn test_buzzer_records_actions() {
        let (mut buzzer, probe) = MockBuzzer::new();
        buzzer.beep(100, Some(1000)).await.unwrap();
        buzzer.chirp().await.unwrap();
        assert_eq!(
            probe.actions(),
            vec![
                BuzzerAction::Beep {
                    ms: 100,
                    hz: Some(1000)
                },
                BuzzerAction::Chirp
            ]
        );
    }

    #[tokio::test]
    async fn test_inputs_deliver_in_order() {
        let (mut inputs, handle) = MockInputs::new();
        handle.push(InputEvent::ExitPress);
        handle.push(InputEvent::ExitRelease);
        assert_eq!(inputs.next_event().await.unwrap(), InputEvent::ExitPress);
        assert_eq!(inputs.next_event().await.unwrap(), InputEvent::ExitRelease);
    }

    #[test]
    fn test_inputs_long_press_visible_on_handle() {
        let (mut inputs, handle) = MockInputs::new();
        assert_eq!(handle.long_press(), Duration::ZERO);
        inputs.set_long_press(Duration::from_millis(750));
        assert_eq!(handle.long_press(), Duration::from_millis(750));
    }

    #[tokio::test]
    async fn test_inputs_disconnect() {
        let (mut inputs, handle) = MockInputs::new();
        drop(handle);
        assert!(matches!(
            inputs.next_event().await,
            Err(HardwareError::Disconnected)
        ));
    }

    #[tokio::test]
    async fn test_power_transition_events() {
        let (mut power, handle) = MockPower::new(13.8);
        assert!(!power.on_battery());

        handle.set_supply(11.9, true);
        assert_eq!(power.next_event().await.unwrap(), PowerEvent::OnBattery);
        assert_eq!(power.next_event().await.unwrap(), PowerEvent::Voltage(11.9));
        assert!(power.on_battery());

        // same supply state only reports voltage
        handle.set_supply(11.8, true);
        assert_eq!(power.next_event().await.unwrap(), PowerEvent::Voltage(11.8));
    }
}
