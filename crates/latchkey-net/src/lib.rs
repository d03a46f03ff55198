#![allow(async_fn_in_trait)]

pub mod connector;
pub mod counters;
pub mod error;
pub mod fingerprint;
pub mod session;

pub use connector::{Connector, TcpConnector};
pub use counters::{Counters, CountersSnapshot};
pub use error::{NetError, Result};
pub use fingerprint::FingerprintPin;
pub use session::{Session, SessionConfig, SessionEvent, SessionHandle};
