pub mod bridge;
pub mod config;
pub mod mqtt;
pub mod sensehat;

use color_eyre::{eyre::eyre, Result};
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use crate::bridge::{BridgeHandle, BridgeSettings};
use crate::config::{Config, MqttSection};
use crate::mqtt::{ClientIdentity, MqttPublisher, MqttSubscriber, PeripheralKind};
use crate::sensehat::{SenseHatJoystick, SenseHatLed, SenseHatSensor, SensorSettings};

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    let config = Config::load().map_err(|e| eyre!("Failed to load configuration: {e}"))?;

    // shared shutdown context; signals flip it, every worker observes it
    let shutdown = CancellationToken::new();
    spawn_signal_listener(shutdown.clone());

    info!("Initializing Sense HAT peripherals");
    let sensor_settings = SensorSettings {
        rounding: config.sensehat.rounding,
        acceleration_multiplier: config.sensehat.acceleration_multiplier,
        gyroscope_multiplier: config.sensehat.gyroscope_multiplier,
    };
    let sensor = SenseHatSensor::create(Some(sensor_settings))
        .and_then(|board| board.initialize())
        .map_err(|e| eyre!("Failed to initialize the sensor board: {e}"))?;
    let led = SenseHatLed::new(config.sensehat.low_light)
        .map_err(|e| eyre!("Failed to open the LED matrix: {e}"))?;
    let joystick = SenseHatJoystick::open(&shutdown)
        .map_err(|e| eyre!("Failed to open the joystick: {e}"))?;

    info!("Initializing MQTT clients");
    let sensor_publisher =
        MqttPublisher::new(client_identity(&config.mqtt, PeripheralKind::Sensor)?, &shutdown);
    let led_subscriber =
        MqttSubscriber::new(client_identity(&config.mqtt, PeripheralKind::Led)?, &shutdown);
    let joystick_publisher =
        MqttPublisher::new(client_identity(&config.mqtt, PeripheralKind::Joystick)?, &shutdown);

    let settings = BridgeSettings {
        resolution_secs: config.bridge.resolution_secs,
        command_poll_ms: config.bridge.command_poll_ms,
        welcome_flash: config.sensehat.welcome_flash,
    };
    let bridge = BridgeHandle::spawn(
        settings,
        sensor,
        led,
        joystick,
        sensor_publisher,
        led_subscriber,
        joystick_publisher,
        shutdown.clone(),
    );

    info!("sensebridge is running, waiting for a stop signal");
    bridge.join().await;
    info!("sensebridge stopped");
    Ok(())
}

/// Builds one client identity from the shared MQTT config section
fn client_identity(mqtt: &MqttSection, kind: PeripheralKind) -> Result<ClientIdentity> {
    let client_id = format!("{}_{}", mqtt.client_name, kind);
    ClientIdentity::new(
        &mqtt.broker_address,
        mqtt.zone.as_deref(),
        mqtt.room.as_deref(),
        &mqtt.client_name,
        kind,
        &client_id,
        mqtt.user.as_deref(),
        mqtt.password.as_deref(),
    )
    .map_err(|e| eyre!("Failed to build the {kind} client: {e}"))
}

/// Cancels the shutdown token on SIGINT, SIGTERM, or SIGHUP
fn spawn_signal_listener(shutdown: CancellationToken) {
    tokio::spawn(async move {
        let mut terminate = match signal(SignalKind::terminate()) {
            Ok(stream) => stream,
            Err(e) => {
                error!("Failed to install SIGTERM handler: {e}");
                return;
            }
        };
        let mut hangup = match signal(SignalKind::hangup()) {
            Ok(stream) => stream,
            Err(e) => {
                error!("Failed to install SIGHUP handler: {e}");
                return;
            }
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("Received SIGINT"),
            _ = terminate.recv() => info!("Received SIGTERM"),
            _ = hangup.recv() => info!("Received SIGHUP"),
        }
        info!("Received a signal to stop");
        shutdown.cancel();
    });
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    setup_logging_env();
    Ok(())
}

fn setup_logging_env() {
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
}
