//! # Sense HAT Peripheral Module
//!
//! Hardware wrappers for the three Sense HAT peripherals bridged to the
//! broker:
//!
//! ```text
//! sensehat/
//! ├── sensor.rs    - Environmental/IMU board (HTS221, LPS25H, LSM9DS1 over I2C)
//! ├── led.rs       - 8x8 RGB565 LED matrix framebuffer
//! ├── joystick.rs  - Five-way joystick input device
//! ├── hts221.rs    - Humidity/temperature chip driver
//! ├── lps25h.rs    - Pressure chip driver
//! └── lsm9ds1.rs   - Accelerometer/gyroscope chip driver
//! ```
//!
//! Each wrapper produces or consumes a [`Reading`](crate::mqtt::Reading);
//! the MQTT layer never interprets peripheral data beyond serializing it.

pub mod joystick;
pub mod led;
pub mod sensor;

mod hts221;
mod lps25h;
mod lsm9ds1;

pub use joystick::{JoystickAction, JoystickDirection, JoystickEvent, SenseHatJoystick};
pub use led::SenseHatLed;
pub use sensor::{SensorSettings, SenseHatSensor};

use thiserror::Error;

/// Errors from Sense HAT hardware access
#[derive(Debug, Error)]
pub enum SenseHatError {
    #[error("I2C bus error: {0}")]
    I2cError(#[from] rppal::i2c::Error),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// The expected device node was not found on this system
    #[error("Device not found: {0}")]
    DeviceNotFoundError(String),

    /// A chip answered with the wrong WHO_AM_I value
    #[error("Unexpected chip identity at 0x{address:02x}: got 0x{found:02x}, expected 0x{expected:02x}")]
    ChipIdentityError { address: u16, found: u8, expected: u8 },

    /// A decoded LED command payload was malformed
    #[error("Invalid LED command: {0}")]
    CommandError(String),
}
