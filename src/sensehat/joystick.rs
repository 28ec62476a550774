//! Sense HAT five-way joystick
//!
//! The joystick registers as a Linux input device emitting key events for
//! the four directions plus the center press. A blocking reader task
//! decodes the raw `input_event` records and feeds them into a channel the
//! bridge loop consumes asynchronously.

use std::fs::{self, File};
use std::io::Read;
use std::path::PathBuf;

use chrono::{DateTime, Local, TimeZone};
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::mqtt::Reading;

use super::SenseHatError;

/// Input device name the Sense HAT driver registers under
const DEVICE_NAME: &str = "Raspberry Pi Sense HAT Joystick";

/// 64-bit `struct input_event` layout: two i64 timeval fields, type, code,
/// value
const EVENT_SIZE: usize = 24;

const EV_KEY: u16 = 0x01;

const KEY_UP: u16 = 103;
const KEY_LEFT: u16 = 105;
const KEY_RIGHT: u16 = 106;
const KEY_DOWN: u16 = 108;
const KEY_ENTER: u16 = 28;

/// Buffered events between the blocking reader and the bridge loop
const EVENT_BUFFER: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoystickDirection {
    Up,
    Down,
    Left,
    Right,
    Middle,
}

impl JoystickDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            JoystickDirection::Up => "up",
            JoystickDirection::Down => "down",
            JoystickDirection::Left => "left",
            JoystickDirection::Right => "right",
            JoystickDirection::Middle => "middle",
        }
    }

    fn from_code(code: u16) -> Option<Self> {
        match code {
            KEY_UP => Some(JoystickDirection::Up),
            KEY_DOWN => Some(JoystickDirection::Down),
            KEY_LEFT => Some(JoystickDirection::Left),
            KEY_RIGHT => Some(JoystickDirection::Right),
            KEY_ENTER => Some(JoystickDirection::Middle),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoystickAction {
    Pressed,
    Released,
    /// Key autorepeat while the stick is held down
    Held,
}

impl JoystickAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            JoystickAction::Pressed => "pressed",
            JoystickAction::Released => "released",
            JoystickAction::Held => "held",
        }
    }

    fn from_value(value: i32) -> Option<Self> {
        match value {
            0 => Some(JoystickAction::Released),
            1 => Some(JoystickAction::Pressed),
            2 => Some(JoystickAction::Held),
            _ => None,
        }
    }
}

/// One decoded joystick event
#[derive(Debug, Clone)]
pub struct JoystickEvent {
    pub direction: JoystickDirection,
    pub action: JoystickAction,
    pub timestamp: DateTime<Local>,
}

impl JoystickEvent {
    /// Decodes one raw `input_event` record; non-key and unknown events
    /// yield `None`
    fn decode(raw: &[u8; EVENT_SIZE]) -> Option<Self> {
        let event_type = u16::from_le_bytes([raw[16], raw[17]]);
        if event_type != EV_KEY {
            return None;
        }
        let code = u16::from_le_bytes([raw[18], raw[19]]);
        let value = i32::from_le_bytes([raw[20], raw[21], raw[22], raw[23]]);

        let direction = JoystickDirection::from_code(code)?;
        let action = JoystickAction::from_value(value)?;

        let seconds = i64::from_le_bytes(raw[0..8].try_into().ok()?);
        let micros = i64::from_le_bytes(raw[8..16].try_into().ok()?);
        let timestamp = Local
            .timestamp_opt(seconds, (micros * 1000) as u32)
            .single()
            .unwrap_or_else(Local::now);

        Some(Self {
            direction,
            action,
            timestamp,
        })
    }

    /// Publishable representation of this event
    pub fn to_reading(&self) -> Reading {
        let mut reading = Reading::new();
        reading.insert("direction".into(), json!(self.direction.as_str()));
        reading.insert("action".into(), json!(self.action.as_str()));
        reading.insert("timestamp".into(), json!(self.timestamp.to_rfc3339()));
        reading
    }
}

/// Consumer handle for joystick events
pub struct SenseHatJoystick {
    events: mpsc::Receiver<JoystickEvent>,
}

impl SenseHatJoystick {
    /// Discovers the joystick input device and starts the blocking reader
    pub fn open(shutdown: &CancellationToken) -> Result<Self, SenseHatError> {
        let path = discover_device()?;
        info!("Using Sense HAT joystick at {}", path.display());
        let device = File::open(&path)?;
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let cancel = shutdown.clone();
        tokio::task::spawn_blocking(move || reader_loop(device, tx, cancel));
        Ok(Self { events: rx })
    }

    /// Next decoded event; `None` once the reader has stopped
    pub async fn next_event(&mut self) -> Option<JoystickEvent> {
        self.events.recv().await
    }
}

/// Blocking read loop; exits on read error, cancellation, or a dropped
/// receiver (the read blocks until the next event, so cancellation takes
/// effect at the following one)
fn reader_loop(mut device: File, tx: mpsc::Sender<JoystickEvent>, cancel: CancellationToken) {
    let mut raw = [0u8; EVENT_SIZE];
    while !cancel.is_cancelled() {
        match device.read_exact(&mut raw) {
            Ok(()) => {
                if let Some(event) = JoystickEvent::decode(&raw) {
                    debug!(
                        "Joystick event: {} {}",
                        event.direction.as_str(),
                        event.action.as_str()
                    );
                    if tx.blocking_send(event).is_err() {
                        break;
                    }
                }
            }
            Err(e) => {
                warn!("Joystick device read failed: {e}");
                break;
            }
        }
    }
    debug!("Joystick reader loop stopped");
}

/// Scans `/sys/class/input` for the joystick event device
fn discover_device() -> Result<PathBuf, SenseHatError> {
    for entry in fs::read_dir("/sys/class/input")? {
        let entry = entry?;
        let file_name = entry.file_name();
        let Some(event_name) = file_name.to_str().filter(|n| n.starts_with("event")) else {
            continue;
        };
        let name_path = entry.path().join("device/name");
        let Ok(name) = fs::read_to_string(&name_path) else {
            continue;
        };
        if name.trim() == DEVICE_NAME {
            return Ok(PathBuf::from("/dev/input").join(event_name));
        }
    }
    Err(SenseHatError::DeviceNotFoundError(format!(
        "no input device named '{DEVICE_NAME}' under /sys/class/input"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_event(event_type: u16, code: u16, value: i32) -> [u8; EVENT_SIZE] {
        let mut raw = [0u8; EVENT_SIZE];
        raw[0..8].copy_from_slice(&1_700_000_000i64.to_le_bytes());
        raw[8..16].copy_from_slice(&250_000i64.to_le_bytes());
        raw[16..18].copy_from_slice(&event_type.to_le_bytes());
        raw[18..20].copy_from_slice(&code.to_le_bytes());
        raw[20..24].copy_from_slice(&value.to_le_bytes());
        raw
    }

    #[test]
    fn key_events_decode_to_direction_and_action() {
        let event = JoystickEvent::decode(&raw_event(EV_KEY, KEY_UP, 1)).unwrap();
        assert_eq!(event.direction, JoystickDirection::Up);
        assert_eq!(event.action, JoystickAction::Pressed);

        let event = JoystickEvent::decode(&raw_event(EV_KEY, KEY_ENTER, 0)).unwrap();
        assert_eq!(event.direction, JoystickDirection::Middle);
        assert_eq!(event.action, JoystickAction::Released);

        let event = JoystickEvent::decode(&raw_event(EV_KEY, KEY_LEFT, 2)).unwrap();
        assert_eq!(event.action, JoystickAction::Held);
    }

    #[test]
    fn non_key_and_unknown_events_are_ignored() {
        // EV_SYN separator
        assert!(JoystickEvent::decode(&raw_event(0x00, 0, 0)).is_none());
        // key outside the joystick set
        assert!(JoystickEvent::decode(&raw_event(EV_KEY, 30, 1)).is_none());
        // out-of-range action value
        assert!(JoystickEvent::decode(&raw_event(EV_KEY, KEY_UP, 3)).is_none());
    }

    #[test]
    fn events_serialize_to_readings() {
        let event = JoystickEvent::decode(&raw_event(EV_KEY, KEY_DOWN, 1)).unwrap();
        let reading = event.to_reading();
        assert_eq!(reading["direction"], "down");
        assert_eq!(reading["action"], "pressed");
        assert!(reading["timestamp"].is_string());
    }
}
