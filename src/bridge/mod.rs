//! Bridge subsystem wiring peripherals to their broker clients
//!
//! Spawns one streaming loop per peripheral-client pair:
//!
//! ```text
//! SenseHatSensor   ──► sensor loop   ──► MqttPublisher  (sensor/status)
//! MqttSubscriber   ──► led loop      ──► SenseHatLed    (led/cmd)
//! SenseHatJoystick ──► joystick loop ──► MqttPublisher  (joystick/status)
//! ```
//!
//! The loops are fully independent and stop cooperatively on the shared
//! cancellation token; each one disables its own client on the way out, so
//! no network worker or socket outlives the bridge.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::mqtt::{MqttPublisher, MqttSubscriber};
use crate::sensehat::sensor::Measuring;
use crate::sensehat::{SenseHatJoystick, SenseHatLed, SenseHatSensor};

/// Timing knobs for the streaming loops
#[derive(Clone, Debug)]
pub struct BridgeSettings {
    /// Seconds between sensor readings
    pub resolution_secs: u64,

    /// Milliseconds between command-queue polls of the LED loop
    pub command_poll_ms: u64,

    /// Fill the matrix briefly on startup
    pub welcome_flash: bool,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            resolution_secs: 60,
            command_poll_ms: 250,
            welcome_flash: true,
        }
    }
}

/// Handle over the three streaming tasks
pub struct BridgeHandle {
    tasks: Vec<JoinHandle<()>>,
}

impl BridgeHandle {
    /// Spawns the sensor, LED, and joystick loops
    pub fn spawn(
        settings: BridgeSettings,
        sensor: SenseHatSensor<Measuring>,
        led: SenseHatLed,
        joystick: SenseHatJoystick,
        sensor_publisher: MqttPublisher,
        led_subscriber: MqttSubscriber,
        joystick_publisher: MqttPublisher,
        shutdown: CancellationToken,
    ) -> Self {
        info!("Starting bridge streaming loops");
        let tasks = vec![
            tokio::spawn(run_sensor_stream(
                sensor,
                sensor_publisher,
                settings.resolution_secs,
                shutdown.clone(),
            )),
            tokio::spawn(run_led_stream(
                led,
                led_subscriber,
                settings.command_poll_ms,
                settings.welcome_flash,
                shutdown.clone(),
            )),
            tokio::spawn(run_joystick_stream(
                joystick,
                joystick_publisher,
                shutdown,
            )),
        ];
        Self { tasks }
    }

    /// Waits for every loop to finish its teardown
    pub async fn join(self) {
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!("A bridge task ended abnormally: {e}");
            }
        }
        info!("All bridge streaming loops stopped");
    }
}

/// Reads the sensor board on a fixed interval and publishes each reading
async fn run_sensor_stream(
    mut sensor: SenseHatSensor<Measuring>,
    publisher: MqttPublisher,
    resolution_secs: u64,
    cancel: CancellationToken,
) {
    info!("Starting main sensor publishing loop");
    let mut ticker = interval(Duration::from_secs(resolution_secs.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut published: u64 = 0;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                debug!("Updating and publishing sensor data");
                match sensor.read() {
                    Ok(reading) => {
                        publisher.publish(&reading).await;
                        published += 1;
                    }
                    Err(e) => warn!("Failed to read the sensor board: {e}"),
                }
            }
        }
    }

    publisher.disable();
    info!("Sensor loop stopped after {published} published readings");
}

/// Polls the command queue and drives the LED matrix
async fn run_led_stream(
    mut led: SenseHatLed,
    mut subscriber: MqttSubscriber,
    command_poll_ms: u64,
    welcome_flash: bool,
    cancel: CancellationToken,
) {
    if welcome_flash {
        if let Err(e) = led.fill([0, 48, 0]) {
            warn!("Welcome flash failed: {e}");
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
        if let Err(e) = led.clear() {
            warn!("Failed to clear the LED matrix: {e}");
        }
    }

    info!("Starting LED command loop");
    let mut ticker = interval(Duration::from_millis(command_poll_ms.max(10)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => drain_led_commands(&mut led, &mut subscriber),
        }
    }

    subscriber.disable();
    // leave the matrix dark on exit
    if let Err(e) = led.clear() {
        warn!("Failed to clear the LED matrix: {e}");
    }
    info!("LED command loop stopped");
}

/// Empties the inbound queue, isolating each bad message
fn drain_led_commands(led: &mut SenseHatLed, subscriber: &mut MqttSubscriber) {
    loop {
        match subscriber.decoded_message() {
            // empty map means the queue is drained
            Ok(command) if command.is_empty() => break,
            Ok(command) => {
                if let Err(e) = led.apply(&command) {
                    warn!("Ignoring LED command: {e}");
                }
            }
            Err(e) => warn!("Dropping undecodable LED command: {e}"),
        }
    }
}

/// Forwards each joystick event as a published reading
async fn run_joystick_stream(
    mut joystick: SenseHatJoystick,
    publisher: MqttPublisher,
    cancel: CancellationToken,
) {
    info!("Waiting for joystick directions");
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            event = joystick.next_event() => match event {
                Some(event) => {
                    info!(
                        "A joystick direction was detected: {} {}",
                        event.direction.as_str(),
                        event.action.as_str()
                    );
                    publisher.publish(&event.to_reading()).await;
                }
                None => {
                    warn!("Joystick reader stopped, ending joystick loop");
                    break;
                }
            }
        }
    }

    publisher.disable();
    info!("Joystick loop stopped");
}
