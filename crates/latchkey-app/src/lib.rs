//! Firmware assembly: configuration, command dispatch, and the main
//! event loop tying the reader, door logic, hardware, and the server
//! session together.

#![allow(async_fn_in_trait)]

pub mod app;
pub mod config;

pub use app::{App, AppHardware, ExitReason};
pub use config::AppConfig;
