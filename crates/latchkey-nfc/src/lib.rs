//! NFC token acquisition for the door controller.
//!
//! This crate owns the reader health/reset state machine, the per-cycle
//! polling protocol, and the two-slot presence cache that debounces
//! token present/removed events. Hardware access goes through the
//! [`ReaderPort`] trait so the engine can be driven against a mock port
//! in tests and against a real reader chip in the field.

#![allow(async_fn_in_trait)]

pub mod error;
pub mod health;
pub mod mock;
pub mod reader;
pub mod token;

pub use error::{NfcError, Result};
pub use health::{RateLimits, ReaderHealth};
pub use reader::{NfcConfig, NfcEngine, NfcEvent, RawTarget, ReaderPort};
pub use token::Token;
