//! Peripheral abstractions.
//!
//! Trait interfaces for the door controller's peripherals and mock
//! implementations for running without hardware. All traits use
//! native `async fn` methods (Rust 1.90 + Edition 2024 RPITIT); they
//! are not object-safe, use generics at the call sites.

#![allow(async_fn_in_trait)]

pub mod error;
pub mod mock;
pub mod traits;

pub use error::{HardwareError, Result};
pub use mock::{
    BuzzerAction, BuzzerProbe, InputsHandle, LedProbe, MockBuzzer, MockInputs, MockLed, MockPower,
    MockRelay, PowerHandle, RelayProbe,
};
pub use traits::{
    Buzzer, InputEvent, Inputs, Led, LedMode, Note, PowerEvent, PowerMonitor, Relay,
};
