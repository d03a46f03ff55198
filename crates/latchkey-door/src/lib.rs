//! Access coordinator.
//!
//! Fuses the four unlock sources (card, exit button, snib, remote)
//! into a single relay state, runs the card authentication flow, and
//! derives the LED policy. The coordinator is a synchronous state
//! machine: callers feed it events plus a timestamp and apply the
//! effects it returns. All timers are deadlines checked in `tick`, so
//! the whole thing is deterministic under test.

pub mod config;
pub mod coordinator;

pub use config::DoorConfig;
pub use coordinator::{DoorCoordinator, DoorEffect, StateOverride};
