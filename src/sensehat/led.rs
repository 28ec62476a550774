//! Sense HAT 8x8 LED matrix
//!
//! The matrix is exposed by the kernel as a plain framebuffer device in
//! RGB565 format. A shadow frame is kept in memory and flushed whole on
//! every change, so partial writes never leave the display torn.
//!
//! Command payloads arriving on the `cmd` topic are decoded into
//! [`LedCommand`]s:
//!
//! ```json
//! {"action": "clear"}
//! {"action": "fill", "color": [0, 255, 0]}
//! {"action": "pixel", "x": 3, "y": 4, "color": [255, 0, 0]}
//! {"action": "frame", "pixels": [[r, g, b], ... 64 entries ...]}
//! {"action": "low_light", "value": true}
//! ```

use std::fs::{self, File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::PathBuf;

use serde_json::Value;
use tracing::{debug, info};

use crate::mqtt::Reading;

use super::SenseHatError;

/// Framebuffer name the Sense HAT driver registers under
const FRAMEBUFFER_NAME: &str = "RPi-Sense FB";

const WIDTH: usize = 8;
const HEIGHT: usize = 8;
const PIXELS: usize = WIDTH * HEIGHT;

pub type Rgb = [u8; 3];

/// One decoded LED command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedCommand {
    Clear,
    Fill(Rgb),
    Pixel { x: usize, y: usize, color: Rgb },
    Frame(Box<[Rgb; PIXELS]>),
    LowLight(bool),
}

impl LedCommand {
    /// Decodes a command payload, rejecting unknown actions and malformed
    /// fields
    pub fn parse(command: &Reading) -> Result<Self, SenseHatError> {
        let action = command
            .get("action")
            .and_then(Value::as_str)
            .ok_or_else(|| SenseHatError::CommandError("missing 'action' field".into()))?;

        match action {
            "clear" => Ok(LedCommand::Clear),
            "fill" => Ok(LedCommand::Fill(parse_color(command.get("color"))?)),
            "pixel" => {
                let x = parse_coordinate(command.get("x"), "x")?;
                let y = parse_coordinate(command.get("y"), "y")?;
                let color = parse_color(command.get("color"))?;
                Ok(LedCommand::Pixel { x, y, color })
            }
            "frame" => {
                let pixels = command
                    .get("pixels")
                    .and_then(Value::as_array)
                    .ok_or_else(|| SenseHatError::CommandError("missing 'pixels' array".into()))?;
                if pixels.len() != PIXELS {
                    return Err(SenseHatError::CommandError(format!(
                        "'pixels' must hold exactly {PIXELS} entries, got {}",
                        pixels.len()
                    )));
                }
                let mut frame = Box::new([[0u8; 3]; PIXELS]);
                for (slot, value) in frame.iter_mut().zip(pixels) {
                    *slot = parse_color(Some(value))?;
                }
                Ok(LedCommand::Frame(frame))
            }
            "low_light" => {
                let value = command
                    .get("value")
                    .and_then(Value::as_bool)
                    .ok_or_else(|| SenseHatError::CommandError("missing boolean 'value'".into()))?;
                Ok(LedCommand::LowLight(value))
            }
            other => Err(SenseHatError::CommandError(format!(
                "unknown action '{other}'"
            ))),
        }
    }
}

fn parse_color(value: Option<&Value>) -> Result<Rgb, SenseHatError> {
    let channels = value
        .and_then(Value::as_array)
        .ok_or_else(|| SenseHatError::CommandError("missing '[r, g, b]' color".into()))?;
    if channels.len() != 3 {
        return Err(SenseHatError::CommandError(format!(
            "color must hold 3 channels, got {}",
            channels.len()
        )));
    }
    let mut color = [0u8; 3];
    for (slot, channel) in color.iter_mut().zip(channels) {
        let channel = channel
            .as_u64()
            .filter(|&c| c <= 255)
            .ok_or_else(|| SenseHatError::CommandError("color channels must be 0-255".into()))?;
        *slot = channel as u8;
    }
    Ok(color)
}

fn parse_coordinate(value: Option<&Value>, name: &str) -> Result<usize, SenseHatError> {
    let coordinate = value
        .and_then(Value::as_u64)
        .ok_or_else(|| SenseHatError::CommandError(format!("missing coordinate '{name}'")))?;
    if coordinate as usize >= WIDTH {
        return Err(SenseHatError::CommandError(format!(
            "coordinate '{name}' out of range: {coordinate}"
        )));
    }
    Ok(coordinate as usize)
}

/// Owns the LED matrix framebuffer
pub struct SenseHatLed {
    framebuffer: File,
    frame: [Rgb; PIXELS],
    low_light: bool,
}

impl SenseHatLed {
    /// Discovers the Sense HAT framebuffer by name and opens it
    pub fn new(low_light: bool) -> Result<Self, SenseHatError> {
        let path = discover_framebuffer()?;
        info!("Using Sense HAT framebuffer at {}", path.display());
        let framebuffer = OpenOptions::new().write(true).open(&path)?;
        let mut led = Self {
            framebuffer,
            frame: [[0u8; 3]; PIXELS],
            low_light,
        };
        led.flush()?;
        Ok(led)
    }

    /// Decodes and executes one command payload
    pub fn apply(&mut self, command: &Reading) -> Result<(), SenseHatError> {
        let command = LedCommand::parse(command)?;
        debug!("Applying LED command: {:?}", command);
        match command {
            LedCommand::Clear => self.clear(),
            LedCommand::Fill(color) => self.fill(color),
            LedCommand::Pixel { x, y, color } => {
                self.frame[y * WIDTH + x] = color;
                self.flush()
            }
            LedCommand::Frame(pixels) => {
                self.frame = *pixels;
                self.flush()
            }
            LedCommand::LowLight(value) => {
                self.low_light = value;
                self.flush()
            }
        }
    }

    pub fn clear(&mut self) -> Result<(), SenseHatError> {
        self.fill([0, 0, 0])
    }

    pub fn fill(&mut self, color: Rgb) -> Result<(), SenseHatError> {
        self.frame = [color; PIXELS];
        self.flush()
    }

    /// Writes the shadow frame to the device in one pass
    fn flush(&mut self) -> Result<(), SenseHatError> {
        let mut raw = [0u8; PIXELS * 2];
        for (index, pixel) in self.frame.iter().enumerate() {
            let scaled = scale_brightness(*pixel, self.low_light);
            let encoded = rgb565(scaled);
            raw[index * 2..index * 2 + 2].copy_from_slice(&encoded.to_le_bytes());
        }
        self.framebuffer.seek(SeekFrom::Start(0))?;
        self.framebuffer.write_all(&raw)?;
        Ok(())
    }
}

/// Quarters channel intensity when low-light mode is on
fn scale_brightness(color: Rgb, low_light: bool) -> Rgb {
    if low_light {
        [color[0] >> 2, color[1] >> 2, color[2] >> 2]
    } else {
        color
    }
}

fn rgb565(color: Rgb) -> u16 {
    let r = (color[0] >> 3) as u16;
    let g = (color[1] >> 2) as u16;
    let b = (color[2] >> 3) as u16;
    (r << 11) | (g << 5) | b
}

/// Scans `/sys/class/graphics` for the Sense HAT framebuffer entry
fn discover_framebuffer() -> Result<PathBuf, SenseHatError> {
    for entry in fs::read_dir("/sys/class/graphics")? {
        let entry = entry?;
        let name_path = entry.path().join("name");
        let Ok(name) = fs::read_to_string(&name_path) else {
            continue;
        };
        if name.trim() == FRAMEBUFFER_NAME {
            return Ok(PathBuf::from("/dev").join(entry.file_name()));
        }
    }
    Err(SenseHatError::DeviceNotFoundError(format!(
        "no framebuffer named '{FRAMEBUFFER_NAME}' under /sys/class/graphics"
    )))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn reading(value: serde_json::Value) -> Reading {
        match value {
            Value::Object(map) => map,
            _ => panic!("test payload must be an object"),
        }
    }

    #[test]
    fn rgb565_encodes_channel_extremes() {
        assert_eq!(rgb565([0, 0, 0]), 0x0000);
        assert_eq!(rgb565([255, 255, 255]), 0xffff);
        assert_eq!(rgb565([255, 0, 0]), 0xf800);
        assert_eq!(rgb565([0, 255, 0]), 0x07e0);
        assert_eq!(rgb565([0, 0, 255]), 0x001f);
    }

    #[test]
    fn low_light_quarters_intensity() {
        assert_eq!(scale_brightness([255, 128, 4], true), [63, 32, 1]);
        assert_eq!(scale_brightness([255, 128, 4], false), [255, 128, 4]);
    }

    #[test]
    fn commands_parse_from_payloads() {
        let cmd = LedCommand::parse(&reading(json!({"action": "clear"}))).unwrap();
        assert_eq!(cmd, LedCommand::Clear);

        let cmd =
            LedCommand::parse(&reading(json!({"action": "fill", "color": [0, 255, 0]}))).unwrap();
        assert_eq!(cmd, LedCommand::Fill([0, 255, 0]));

        let cmd = LedCommand::parse(&reading(
            json!({"action": "pixel", "x": 7, "y": 0, "color": [1, 2, 3]}),
        ))
        .unwrap();
        assert_eq!(cmd, LedCommand::Pixel { x: 7, y: 0, color: [1, 2, 3] });

        let cmd =
            LedCommand::parse(&reading(json!({"action": "low_light", "value": true}))).unwrap();
        assert_eq!(cmd, LedCommand::LowLight(true));
    }

    #[test]
    fn malformed_commands_are_rejected() {
        for payload in [
            json!({}),
            json!({"action": "blink"}),
            json!({"action": "fill"}),
            json!({"action": "fill", "color": [0, 255]}),
            json!({"action": "fill", "color": [0, 255, 300]}),
            json!({"action": "pixel", "x": 8, "y": 0, "color": [1, 2, 3]}),
            json!({"action": "low_light"}),
        ] {
            assert!(matches!(
                LedCommand::parse(&reading(payload)),
                Err(SenseHatError::CommandError(_))
            ));
        }
    }

    #[test]
    fn frame_command_requires_all_pixels() {
        let short = json!({"action": "frame", "pixels": [[0, 0, 0]]});
        assert!(LedCommand::parse(&reading(short)).is_err());

        let pixels: Vec<_> = (0..64).map(|_| json!([1, 2, 3])).collect();
        let full = json!({"action": "frame", "pixels": pixels});
        let cmd = LedCommand::parse(&reading(full)).unwrap();
        match cmd {
            LedCommand::Frame(frame) => assert!(frame.iter().all(|p| *p == [1, 2, 3])),
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
