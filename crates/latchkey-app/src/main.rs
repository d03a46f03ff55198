//! Controller entry point.
//!
//! Loads `config.json` from the data directory, starts the server
//! session, and runs the main loop until a restart is requested. The
//! process exits and expects its supervisor to start it again; a
//! committed firmware image is activated by that restart.

use std::path::PathBuf;

use anyhow::Context;
use latchkey_app::{App, AppConfig, AppHardware, ExitReason};
use latchkey_door::DoorCoordinator;
use latchkey_hardware::{MockBuzzer, MockInputs, MockLed, MockPower, MockRelay};
use latchkey_net::{Session, TcpConnector};
use latchkey_nfc::NfcEngine;
use latchkey_nfc::mock::MockPort;
use latchkey_tokendb::TokenDb;
use latchkey_transfer::MockFlash;
use tracing::info;
use tracing_subscriber::EnvFilter;

const FLASH_CAPACITY: u64 = 4_194_304;
const FLASH_FREE_SPACE: u64 = 2_097_152;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let data_dir = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("data"));
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("creating data directory {}", data_dir.display()))?;

    let clientid = std::env::var("LATCHKEY_CLIENTID")
        .unwrap_or_else(|_| format!("latchkey-{:06x}", std::process::id()));
    info!(clientid, data_dir = %data_dir.display(), "starting");

    let config = AppConfig::load(&data_dir.join(latchkey_app::config::CONFIG_FILENAME));

    let (session, net, events) = Session::new(config.session_config(&clientid), TcpConnector);
    tokio::spawn(session.run());

    // TODO: replace the mock device set with a board port once the
    // GPIO/I2C hardware crate backend exists.
    let (relay, _relay_probe) = MockRelay::new();
    let (buzzer, _buzzer_probe) = MockBuzzer::new();
    let (led, _led_probe) = MockLed::new();
    let (inputs, _inputs_handle) = MockInputs::new();
    let (power, _power_handle) = MockPower::new(13.8);

    let door = DoorCoordinator::new(
        config.door_config(),
        TokenDb::new(data_dir.join(latchkey_app::config::TOKEN_DB_FILENAME)),
    );
    let nfc = NfcEngine::new(MockPort::new(), config.nfc_config());

    let app = App::new(
        config,
        data_dir,
        clientid,
        nfc,
        AppHardware {
            relay,
            buzzer,
            led,
            inputs,
            power,
        },
        door,
        MockFlash::new(FLASH_CAPACITY, FLASH_FREE_SPACE),
        net,
        events,
    );

    let reason = app.run().await;
    match reason {
        ExitReason::Reset => info!("exiting for reset"),
        ExitReason::Restart => info!("exiting for restart"),
        ExitReason::FirmwareInstall => info!("exiting to activate new firmware"),
    }
    Ok(())
}
