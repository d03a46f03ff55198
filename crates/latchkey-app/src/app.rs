//! The main event loop and server command dispatch.
//!
//! Everything observable happens here: NFC poll cycles and input edges
//! feed the door coordinator, coordinator effects drive the relay, LED,
//! buzzer, and status reports, and inbound server commands are handled
//! one at a time in arrival order.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use latchkey_core::constants::{TIMEOUT_SWEEP_INTERVAL, TRANSFER_TIMEOUT};
use latchkey_door::{DoorCoordinator, DoorEffect, StateOverride};
use latchkey_hardware::{Buzzer, Inputs, Led, LedMode, Note, PowerEvent, PowerMonitor, Relay};
use latchkey_net::{NetError, SessionEvent, SessionHandle};
use latchkey_nfc::{NfcEngine, NfcEvent, ReaderPort, Token};
use latchkey_protocol::{Command, Metrics, Reply};
use latchkey_transfer::{FileWriter, FirmwareWriter, FlashBackend, TransferError, digest_file};
use tokio::sync::mpsc;
use tokio::time;
use tracing::{debug, info, warn};

use crate::config::{AppConfig, CONFIG_FILENAME};

/// How often the reader gets a poll cycle.
const NFC_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Grace period for the session to flush queued replies before the
/// process goes down.
const SHUTDOWN_DRAIN: Duration = Duration::from_secs(1);

/// Why the main loop stopped. The process exits and the supervisor
/// brings it back up; a hard reset and a soft restart are the same
/// operation here but the server distinguishes them, so we keep both.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    Reset,
    Restart,
    /// A firmware image was committed and wants activating.
    FirmwareInstall,
}

/// The physical device set. Bundled so [`App::new`] stays readable.
pub struct AppHardware<R, B, L, I, M> {
    pub relay: R,
    pub buzzer: B,
    pub led: L,
    pub inputs: I,
    pub power: M,
}

pub struct App<P, R, B, L, I, M, F> {
    config: AppConfig,
    data_dir: PathBuf,
    clientid: String,
    started: Instant,
    nfc: NfcEngine<P>,
    hw: AppHardware<R, B, L, I, M>,
    door: DoorCoordinator,
    files: FileWriter,
    firmware: FirmwareWriter<F>,
    net: SessionHandle,
    events: mpsc::Receiver<SessionEvent>,
    file_deadline: Option<Instant>,
    firmware_deadline: Option<Instant>,
    last_activity: Instant,
    reset_pending: bool,
    restart_pending: bool,
    firmware_restart_pending: bool,
    forced: bool,
}

impl<P, R, B, L, I, M, F> App<P, R, B, L, I, M, F>
where
    P: ReaderPort,
    R: Relay,
    B: Buzzer,
    L: Led,
    I: Inputs,
    M: PowerMonitor,
    F: FlashBackend,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: AppConfig,
        data_dir: PathBuf,
        clientid: String,
        nfc: NfcEngine<P>,
        mut hw: AppHardware<R, B, L, I, M>,
        door: DoorCoordinator,
        flash: F,
        net: SessionHandle,
        events: mpsc::Receiver<SessionEvent>,
    ) -> Self {
        let files = FileWriter::new(&data_dir);
        hw.inputs
            .set_long_press(Duration::from_millis(config.long_press_time));
        Self {
            config,
            data_dir,
            clientid,
            started: Instant::now(),
            nfc,
            hw,
            door,
            files,
            firmware: FirmwareWriter::new(flash),
            net,
            events,
            file_deadline: None,
            firmware_deadline: None,
            last_activity: Instant::now(),
            reset_pending: false,
            restart_pending: false,
            firmware_restart_pending: false,
            forced: false,
        }
    }

    pub async fn run(mut self) -> ExitReason {
        let mut poll = time::interval(NFC_POLL_INTERVAL);
        let mut sweep = time::interval(TIMEOUT_SWEEP_INTERVAL);

        loop {
            tokio::select! {
                event = self.events.recv() => match event {
                    Some(event) => {
                        self.last_activity = Instant::now();
                        if let Err(err) = self.handle_session_event(event).await {
                            warn!(%err, "session send failed");
                        }
                    }
                    None => {
                        warn!("session task ended");
                        return self.shutdown(ExitReason::Restart).await;
                    }
                },
                result = self.hw.inputs.next_event() => match result {
                    Ok(event) => {
                        let effects = self.door.input(event, Instant::now());
                        if let Err(err) = self.apply(effects).await {
                            warn!(%err, "session send failed");
                        }
                    }
                    Err(err) => {
                        warn!(%err, "input device lost");
                        self.restart_pending = true;
                    }
                },
                result = self.hw.power.next_event() => match result {
                    Ok(event) => {
                        let effects = match event {
                            PowerEvent::OnBattery => self.door.set_power(true, self.hw.power.voltage()),
                            PowerEvent::OnMains => self.door.set_power(false, self.hw.power.voltage()),
                            PowerEvent::Voltage(v) => self.door.set_power(self.hw.power.on_battery(), v),
                        };
                        if let Err(err) = self.apply(effects).await {
                            warn!(%err, "session send failed");
                        }
                    }
                    Err(err) => {
                        warn!(%err, "power monitor lost");
                        self.restart_pending = true;
                    }
                },
                _ = poll.tick() => {
                    let now = Instant::now();
                    for event in self.nfc.poll(now).await {
                        let effects = match event {
                            NfcEvent::TokenPresent(token) => self.door.token_present(&token, now),
                            NfcEvent::TokenRemoved(token) => {
                                self.door.token_removed(&token);
                                Vec::new()
                            }
                        };
                        if let Err(err) = self.apply(effects).await {
                            warn!(%err, "session send failed");
                        }
                    }
                },
                _ = sweep.tick() => {
                    if let Err(err) = self.sweep(Instant::now()).await {
                        warn!(%err, "session send failed");
                    }
                },
            }

            if self.firmware_restart_pending {
                info!("restarting to activate new firmware");
                return self.shutdown(ExitReason::FirmwareInstall).await;
            }
            if self.reset_pending {
                info!("resetting at server request");
                return self.shutdown(ExitReason::Reset).await;
            }
            if self.restart_pending {
                info!("restarting");
                return self.shutdown(ExitReason::Restart).await;
            }
        }
    }

    /// Let the session flush queued replies, then quiet the LED and
    /// hand the reason up. A forced reset/restart skips the grace.
    async fn shutdown(&mut self, reason: ExitReason) -> ExitReason {
        if !self.forced {
            time::sleep(SHUTDOWN_DRAIN).await;
        }
        if let Err(err) = self.hw.led.set_mode(LedMode::Off).await {
            warn!(%err, "led");
        }
        reason
    }

    async fn handle_session_event(&mut self, event: SessionEvent) -> Result<(), NetError> {
        match event {
            SessionEvent::Online => {
                info!("server session online");
                let effects = self.door.set_network_up(true);
                self.apply(effects).await
            }
            SessionEvent::Offline => {
                warn!("server session offline");
                let effects = self.door.set_network_up(false);
                self.apply(effects).await
            }
            SessionEvent::Command(command) => self.handle_command(command).await,
        }
    }

    async fn handle_command(&mut self, command: Command) -> Result<(), NetError> {
        debug!(cmd = command.name(), "command");
        match command {
            Command::BuzzerBeep { ms, hz } => {
                if let Err(err) = self.hw.buzzer.beep(ms, hz).await {
                    warn!(%err, "buzzer");
                }
            }
            Command::BuzzerChirp => {
                if let Err(err) = self.hw.buzzer.chirp().await {
                    warn!(%err, "buzzer");
                }
            }
            Command::BuzzerClick => {
                if let Err(err) = self.hw.buzzer.click().await {
                    warn!(%err, "buzzer");
                }
            }
            Command::BuzzerTune { data } => {
                let tune = Note::parse_tune(data.as_bytes());
                if let Err(err) = self.hw.buzzer.play(&tune).await {
                    warn!(%err, "buzzer");
                }
            }

            Command::FileWrite {
                filename,
                digest,
                size,
            } => {
                self.file_deadline = None;
                let reply = match self.files.begin(&filename, &digest, size) {
                    Ok(()) => {
                        if self.files.up_to_date() {
                            self.files.abort();
                            Reply::FileWriteError {
                                filename: Some(filename),
                                error: "already up to date".into(),
                            }
                        } else {
                            match self.files.open() {
                                Ok(()) => Reply::FileContinue {
                                    filename,
                                    position: 0,
                                },
                                Err(err) => {
                                    self.files.abort();
                                    Reply::FileWriteError {
                                        filename: Some(filename),
                                        error: err.to_string(),
                                    }
                                }
                            }
                        }
                    }
                    Err(err) => Reply::FileWriteError {
                        filename: Some(filename),
                        error: err.to_string(),
                    },
                };
                self.net.send(reply).await?;
                self.arm_file_timeout();
            }
            Command::FileData {
                filename,
                data,
                position,
                eof,
            } => {
                self.file_deadline = None;
                match self.files.add(data.as_bytes(), position) {
                    Ok(()) => {
                        if eof {
                            match self.files.commit() {
                                Ok(()) => {
                                    self.net
                                        .send(Reply::FileWriteOk {
                                            filename: filename.clone(),
                                        })
                                        .await?;
                                    let info = self.file_info(&filename);
                                    self.net.send(info).await?;
                                    if filename == CONFIG_FILENAME {
                                        self.reload_config();
                                    }
                                }
                                Err(err) => {
                                    self.net
                                        .send(Reply::FileWriteError {
                                            filename: Some(filename),
                                            error: err.to_string(),
                                        })
                                        .await?;
                                }
                            }
                        } else {
                            self.net
                                .send(Reply::FileContinue {
                                    filename,
                                    position: position + data.len() as u64,
                                })
                                .await?;
                        }
                    }
                    Err(err) => {
                        self.net
                            .send(Reply::FileWriteError {
                                filename: Some(filename),
                                error: err.to_string(),
                            })
                            .await?;
                    }
                }
                self.arm_file_timeout();
            }
            Command::FileQuery { filename } => {
                let info = self.file_info(&filename);
                self.net.send(info).await?;
            }
            Command::FileDirQuery => {
                let reply = Reply::FileDirInfo {
                    filenames: self.list_files(),
                };
                self.net.send(reply).await?;
            }
            Command::FileDelete { filename } => {
                let result = self
                    .data_file(&filename)
                    .ok_or_else(|| "bad filename".to_string())
                    .and_then(|path| {
                        std::fs::remove_file(path).map_err(|_| "failed to delete file".to_string())
                    });
                let reply = match result {
                    Ok(()) => Reply::FileDeleteOk { filename },
                    Err(error) => Reply::FileDeleteError { filename, error },
                };
                self.net.send(reply).await?;
            }
            Command::FileRename {
                old_filename,
                new_filename,
            } => {
                let result = match (self.data_file(&old_filename), self.data_file(&new_filename)) {
                    (Some(from), Some(to)) => {
                        std::fs::rename(from, to).map_err(|_| "failed to rename file".to_string())
                    }
                    _ => Err("bad filename".to_string()),
                };
                let reply = match result {
                    Ok(()) => Reply::FileRenameOk {
                        old_filename,
                        new_filename,
                    },
                    Err(error) => Reply::FileRenameError {
                        old_filename,
                        new_filename,
                        error,
                    },
                };
                self.net.send(reply).await?;
            }

            Command::FirmwareWrite { digest, size } => {
                self.firmware_deadline = None;
                let reply = match self.firmware.begin(&digest, size) {
                    Ok(()) => match self.firmware.open() {
                        Ok(()) => Reply::FirmwareContinue {
                            digest: Some(digest),
                            position: 0,
                        },
                        Err(TransferError::UpToDate) => {
                            self.firmware.abort();
                            Reply::FirmwareWriteError {
                                digest: Some(digest),
                                error: "already up to date".into(),
                                updater_error: self.firmware.updater_error(),
                            }
                        }
                        Err(err) => {
                            self.firmware.abort();
                            Reply::FirmwareWriteError {
                                digest: Some(digest),
                                error: err.to_string(),
                                updater_error: self.firmware.updater_error(),
                            }
                        }
                    },
                    Err(err) => Reply::FirmwareWriteError {
                        digest: Some(digest),
                        error: err.to_string(),
                        updater_error: self.firmware.updater_error(),
                    },
                };
                self.net.send(reply).await?;
                self.arm_firmware_timeout();
            }
            Command::FirmwareData {
                data,
                position,
                eof,
            } => {
                self.firmware_deadline = None;
                match self.firmware.add(data.as_bytes(), position) {
                    Ok(()) => {
                        if eof {
                            match self.firmware.commit() {
                                Ok(()) => {
                                    self.net.send(Reply::FirmwareWriteOk).await?;
                                    self.firmware_restart_pending = true;
                                }
                                Err(err) => {
                                    self.net
                                        .send(Reply::FirmwareWriteError {
                                            digest: None,
                                            error: err.to_string(),
                                            updater_error: self.firmware.updater_error(),
                                        })
                                        .await?;
                                }
                            }
                        } else {
                            self.net
                                .send(Reply::FirmwareContinue {
                                    digest: None,
                                    position: position + data.len() as u64,
                                })
                                .await?;
                        }
                    }
                    Err(err) => {
                        self.net
                            .send(Reply::FirmwareWriteError {
                                digest: None,
                                error: err.to_string(),
                                updater_error: self.firmware.updater_error(),
                            })
                            .await?;
                    }
                }
                self.arm_firmware_timeout();
            }

            Command::MetricsQuery => {
                let net = self.net.counters();
                let reply = Reply::MetricsInfo(Metrics {
                    millis: self.millis(),
                    net_rx_buf_max: net.rx_high_watermark,
                    net_tx_buf_max: net.tx_high_watermark,
                    net_tcp_reconns: net.tcp_connects,
                    net_tcp_fingerprint_errors: net.fingerprint_errors,
                    net_tcp_async_errors: net.async_errors,
                    net_tcp_sync_errors: net.sync_errors,
                    net_tx_delay_count: net.tx_delay_count,
                    nfc_reset_count: u64::from(self.nfc.reset_count()),
                    nfc_rate_limit_trips: u64::from(self.nfc.rate_limit_trips()),
                });
                self.net.send(reply).await?;
            }
            Command::Ping { seq, timestamp } => {
                self.net.send(Reply::Pong { seq, timestamp }).await?;
            }
            Command::StateQuery => {
                let reply = Reply::StateInfo(self.door.state_info());
                self.net.send(reply).await?;
            }
            Command::StateSet {
                card_enable,
                exit_enable,
                snib_enable,
                card_active,
                exit_active,
                snib_active,
                remote_active,
                user,
                uid,
                snib_renew,
            } => {
                let set = StateOverride {
                    card_enable,
                    exit_enable,
                    snib_enable,
                    card_active,
                    exit_active,
                    snib_active,
                    remote_active,
                    user,
                    uid,
                    snib_renew: snib_renew.unwrap_or(false),
                };
                let effects = self.door.state_set(set, Instant::now());
                self.apply(effects).await?;
            }
            Command::SystemQuery => {
                let reply = Reply::SystemInfo {
                    clientid: self.clientid.clone(),
                    version: env!("CARGO_PKG_VERSION").to_string(),
                    millis: self.millis(),
                };
                self.net.send(reply).await?;
            }
            Command::TokenInfo {
                uid,
                found,
                name,
                access,
            } => {
                let effects = self.door.token_info(&uid, found, &name, access, Instant::now());
                self.apply(effects).await?;
            }

            Command::Reset { force } => {
                self.reset_pending = true;
                self.forced = force;
            }
            Command::Restart { force } => {
                self.restart_pending = true;
                self.forced = force;
            }

            // Consumed inside the session, but harmless if they arrive.
            Command::Keepalive | Command::Pong | Command::Ready => {}

            Command::Unknown(name) => {
                warn!(cmd = %name, "unimplemented command");
                self.net.send(Reply::not_implemented(&name)).await?;
            }
        }
        Ok(())
    }

    /// Run the door coordinator's effects against the hardware and the
    /// wire. Hardware faults are logged and skipped; losing the buzzer
    /// must not take the door offline.
    async fn apply(&mut self, effects: Vec<DoorEffect>) -> Result<(), NetError> {
        for effect in effects {
            match effect {
                DoorEffect::Unlocked => {
                    info!("unlocked");
                    if let Err(err) = self.hw.relay.set_active(true).await {
                        warn!(%err, "relay");
                    }
                }
                DoorEffect::Locked => {
                    info!("locked");
                    if let Err(err) = self.hw.relay.set_active(false).await {
                        warn!(%err, "relay");
                    }
                }
                DoorEffect::StatusChanged => {
                    let reply = Reply::StateInfo(self.door.state_info());
                    self.net.send(reply).await?;
                }
                DoorEffect::AuthRequest(token) => {
                    self.net.send(token_auth(&token)).await?;
                }
                DoorEffect::Beep { ms, hz } => {
                    if let Err(err) = self.hw.buzzer.beep(ms, Some(hz)).await {
                        warn!(%err, "buzzer");
                    }
                }
                DoorEffect::Led(mode) => {
                    if let Err(err) = self.hw.led.set_mode(mode).await {
                        warn!(%err, "led");
                    }
                }
            }
        }
        Ok(())
    }

    async fn sweep(&mut self, now: Instant) -> Result<(), NetError> {
        let effects = self.door.tick(now);
        self.apply(effects).await?;

        if self.file_deadline.is_some_and(|d| now >= d) {
            self.file_deadline = None;
            self.files.abort();
            warn!("file write timed out");
            self.net
                .send(Reply::FileWriteError {
                    filename: None,
                    error: "file write timed-out".into(),
                })
                .await?;
        }
        if self.firmware_deadline.is_some_and(|d| now >= d) {
            self.firmware_deadline = None;
            self.firmware.abort();
            warn!("firmware write timed out");
            self.net
                .send(Reply::FirmwareWriteError {
                    digest: None,
                    error: "firmware write timed-out".into(),
                    updater_error: None,
                })
                .await?;
        }

        if let Some(watchdog) = self.config.network_watchdog()
            && now.duration_since(self.last_activity) > watchdog
            && !self.restart_pending
        {
            warn!("network watchdog triggered, restarting");
            self.restart_pending = true;
        }

        Ok(())
    }

    fn arm_file_timeout(&mut self) {
        self.file_deadline = self
            .files
            .running()
            .then(|| Instant::now() + TRANSFER_TIMEOUT);
    }

    fn arm_firmware_timeout(&mut self) {
        self.firmware_deadline = self
            .firmware
            .running()
            .then(|| Instant::now() + TRANSFER_TIMEOUT);
    }

    /// Reload `config.json` after it was replaced over the wire. Door
    /// and reader settings apply immediately; server address and
    /// fingerprint changes take effect on the next restart.
    fn reload_config(&mut self) {
        let config = AppConfig::load(&self.data_dir.join(CONFIG_FILENAME));
        self.door.set_config(config.door_config());
        self.nfc.set_config(config.nfc_config());
        self.hw
            .inputs
            .set_long_press(Duration::from_millis(config.long_press_time));
        self.config = config;
        info!("configuration reloaded");
    }

    fn millis(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    /// Resolve a wire filename inside the data directory. Separators
    /// are rejected; the store is flat.
    fn data_file(&self, filename: &str) -> Option<PathBuf> {
        if filename.is_empty() || filename.contains(['/', '\\']) {
            return None;
        }
        Some(self.data_dir.join(filename))
    }

    fn file_info(&self, filename: &str) -> Reply {
        let digest = self
            .data_file(filename)
            .and_then(|path| digest_file(&path).ok());
        match digest {
            Some((size, digest)) => Reply::FileInfo {
                filename: filename.to_string(),
                size: Some(size),
                digest: Some(digest),
            },
            None => Reply::FileInfo {
                filename: filename.to_string(),
                size: None,
                digest: None,
            },
        }
    }

    fn list_files(&self) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(&self.data_dir)
            .map(|entries| {
                entries
                    .filter_map(|entry| entry.ok())
                    .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
                    .filter_map(|entry| entry.file_name().into_string().ok())
                    .collect()
            })
            .unwrap_or_default();
        names.sort();
        names
    }
}

/// Build the `token_auth` request for a presented token. Optional
/// attributes are only present when the reader captured them.
fn token_auth(token: &Token) -> Reply {
    let read_time = token.read_time.as_millis() as u64;
    Reply::TokenAuth {
        uid: token.uid_hex(),
        atqa: token.atqa,
        sak: token.sak,
        ats: (!token.ats.is_empty()).then(|| hex::encode(&token.ats)),
        version: (!token.version.is_empty()).then(|| hex::encode(&token.version)),
        ntag_counter: token.counter,
        ntag_signature: token.signature.map(hex::encode),
        data: (!token.data.is_empty()).then(|| hex::encode(&token.data)),
        read_time: (read_time > 0).then_some(read_time),
    }
}
