//! Control-channel session engine.
//!
//! Owns the connection to the control server for the life of the
//! process: connect, pin check, `hello` handshake, then a frame loop
//! until the transport drops, and a fixed backoff before the next
//! attempt. Session-level chatter (`ready`, `keepalive`, `pong`) is
//! consumed here; everything else is forwarded to the dispatcher as a
//! [`SessionEvent::Command`].

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::codec::Framed;
use tracing::{debug, info, trace, warn};

use latchkey_core::constants::RECONNECT_BACKOFF;
use latchkey_protocol::{Command, DoorCodec, Reply};

use crate::connector::Connector;
use crate::counters::{Counters, CountersSnapshot};
use crate::error::{NetError, Result};
use crate::fingerprint::FingerprintPin;

const OUTBOUND_QUEUE_DEPTH: usize = 32;
const EVENT_QUEUE_DEPTH: usize = 32;

/// Connection parameters, fixed for the life of the session task.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub host: String,
    pub port: u16,
    pub clientid: String,
    pub password: String,
    /// Required peer certificate digests. `None` disables pinning,
    /// for plain TCP or TLS without verification.
    pub pin: Option<FingerprintPin>,
    pub reconnect_backoff: Duration,
}

impl SessionConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            clientid: String::new(),
            password: String::new(),
            pin: None,
            reconnect_backoff: RECONNECT_BACKOFF,
        }
    }
}

/// What the session reports to the rest of the firmware.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Handshake complete, server said `ready`.
    Online,
    /// Transport lost after having been online.
    Offline,
    /// An inbound command for the dispatcher.
    Command(Command),
}

/// Cloneable sender half used by command handlers to queue replies.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    outbound: mpsc::Sender<Reply>,
    counters: Arc<Counters>,
}

impl SessionHandle {
    /// Build a handle around an existing queue. [`Session::new`] does
    /// this internally; harnesses that dispatch commands without a live
    /// transport build their own.
    #[must_use]
    pub fn new(outbound: mpsc::Sender<Reply>, counters: Arc<Counters>) -> Self {
        Self { outbound, counters }
    }

    /// Queue one outbound message. Counts a tx delay when the queue
    /// is full and we have to wait for the session to drain it.
    pub async fn send(&self, reply: Reply) -> Result<()> {
        match self.outbound.try_send(reply) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(reply)) => {
                Counters::incr(&self.counters.tx_delay_count);
                self.outbound
                    .send(reply)
                    .await
                    .map_err(|_| NetError::ChannelClosed)
            }
            Err(TrySendError::Closed(_)) => Err(NetError::ChannelClosed),
        }
    }

    #[must_use]
    pub fn counters(&self) -> CountersSnapshot {
        self.counters.snapshot()
    }
}

/// The session task. Created with [`Session::new`], consumed by
/// [`Session::run`].
pub struct Session<C: Connector> {
    config: SessionConfig,
    connector: C,
    counters: Arc<Counters>,
    outbound: mpsc::Receiver<Reply>,
    events: mpsc::Sender<SessionEvent>,
    ready: bool,
}

impl<C: Connector> Session<C> {
    pub fn new(
        config: SessionConfig,
        connector: C,
    ) -> (Self, SessionHandle, mpsc::Receiver<SessionEvent>) {
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE_DEPTH);
        let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        let counters = Arc::new(Counters::default());
        let session = Session {
            config,
            connector,
            counters: Arc::clone(&counters),
            outbound: outbound_rx,
            events: event_tx,
            ready: false,
        };
        let handle = SessionHandle {
            outbound: outbound_tx,
            counters,
        };
        (session, handle, event_rx)
    }

    /// Run until the application drops the handle and event receiver.
    /// Every connection failure is followed by a fixed backoff, no
    /// exponential growth: on a flaky link the server wants to hear
    /// from the door again quickly.
    pub async fn run(mut self) {
        loop {
            match self.connect_and_serve().await {
                Ok(()) => {
                    info!("session shut down");
                    return;
                }
                Err(NetError::ChannelClosed) => return,
                Err(e) => {
                    warn!(error = %e, "session lost");
                }
            }

            if self.ready {
                self.ready = false;
                if self.events.send(SessionEvent::Offline).await.is_err() {
                    return;
                }
            }

            if self.events.is_closed() {
                return;
            }
            tokio::time::sleep(self.config.reconnect_backoff).await;
        }
    }

    async fn connect_and_serve(&mut self) -> Result<()> {
        let (stream, peer_digest) = self
            .connector
            .connect(&self.config.host, self.config.port)
            .await?;

        if let Some(pin) = &self.config.pin {
            let accepted = peer_digest.is_some_and(|d| pin.matches(&d));
            if !accepted {
                Counters::incr(&self.counters.fingerprint_errors);
                warn!("peer fingerprint rejected");
                return Err(NetError::FingerprintMismatch);
            }
        }

        Counters::incr(&self.counters.tcp_connects);
        let mut framed = Framed::new(stream, DoorCodec::new());

        framed
            .send(Reply::Hello {
                clientid: self.config.clientid.clone(),
                password: self.config.password.clone(),
            })
            .await?;
        debug!(clientid = %self.config.clientid, "hello sent");

        loop {
            tokio::select! {
                queued = self.outbound.recv() => match queued {
                    Some(reply) => {
                        Counters::watermark(
                            &self.counters.tx_high_watermark,
                            self.outbound.len() + 1,
                        );
                        framed.send(reply).await?;
                    }
                    // application dropped the handle: clean shutdown
                    None => {
                        framed.flush().await.ok();
                        return Ok(());
                    }
                },
                frame = framed.next() => match frame {
                    Some(Ok(command)) => {
                        Counters::watermark(
                            &self.counters.rx_high_watermark,
                            framed.read_buffer().len(),
                        );
                        self.handle_command(command).await?;
                    }
                    Some(Err(e)) => {
                        Counters::incr(&self.counters.sync_errors);
                        return Err(e.into());
                    }
                    None => return Err(NetError::ConnectionClosed),
                },
            }
        }
    }

    async fn handle_command(&mut self, command: Command) -> Result<()> {
        match command {
            Command::Ready => {
                if !self.ready {
                    self.ready = true;
                    info!("session ready");
                    self.events
                        .send(SessionEvent::Online)
                        .await
                        .map_err(|_| NetError::ChannelClosed)?;
                }
                Ok(())
            }
            Command::Keepalive | Command::Pong => {
                trace!(cmd = command.name(), "session chatter");
                Ok(())
            }
            other => self
                .events
                .send(SessionEvent::Command(other))
                .await
                .map_err(|_| NetError::ChannelClosed),
        }
    }
}
