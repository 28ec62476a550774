//! LSM9DS1 accelerometer/gyroscope driver
//!
//! Only the accel/gyro die is used; the magnetometer sits on a separate
//! address and is not part of the published readings.

use rppal::i2c::I2c;

use super::SenseHatError;

pub const ADDRESS: u16 = 0x6a;

const WHO_AM_I: u8 = 0x0f;
const CHIP_ID: u8 = 0x68;

const CTRL_REG1_G: u8 = 0x10;
// ODR 119Hz, 245 dps full scale
const CTRL_GYRO_119HZ: u8 = 0x60;

const CTRL_REG6_XL: u8 = 0x20;
// ODR 119Hz, ±2g full scale
const CTRL_ACCEL_119HZ: u8 = 0x60;

const OUT_X_L_G: u8 = 0x18;
const OUT_X_L_XL: u8 = 0x28;

/// g per LSB at ±2g full scale
const ACCEL_SCALE: f64 = 0.000_061;
/// dps per LSB at 245 dps full scale
const GYRO_SCALE: f64 = 0.008_75;

/// Three-axis sample in engineering units
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Triplet {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

#[derive(Debug)]
pub struct Lsm9ds1;

impl Lsm9ds1 {
    /// Probes the accel/gyro die and enables both outputs
    pub fn init(bus: &mut I2c) -> Result<Self, SenseHatError> {
        bus.set_slave_address(ADDRESS)?;
        let id = bus.smbus_read_byte(WHO_AM_I)?;
        if id != CHIP_ID {
            return Err(SenseHatError::ChipIdentityError {
                address: ADDRESS,
                found: id,
                expected: CHIP_ID,
            });
        }
        bus.smbus_write_byte(CTRL_REG1_G, CTRL_GYRO_119HZ)?;
        bus.smbus_write_byte(CTRL_REG6_XL, CTRL_ACCEL_119HZ)?;
        Ok(Self)
    }

    /// Reads acceleration (g) and angular rate (dps)
    ///
    /// Register auto-increment (IF_ADD_INC) is on by default, so the six
    /// output bytes per sensor come back in one sequential read.
    pub fn read(&self, bus: &mut I2c) -> Result<(Triplet, Triplet), SenseHatError> {
        bus.set_slave_address(ADDRESS)?;
        let mut raw = [0u8; 6];
        bus.write_read(&[OUT_X_L_XL], &mut raw)?;
        let acceleration = convert_axes(raw, ACCEL_SCALE);
        bus.write_read(&[OUT_X_L_G], &mut raw)?;
        let gyroscope = convert_axes(raw, GYRO_SCALE);
        Ok((acceleration, gyroscope))
    }
}

fn convert_axes(raw: [u8; 6], scale: f64) -> Triplet {
    Triplet {
        x: i16::from_le_bytes([raw[0], raw[1]]) as f64 * scale,
        y: i16::from_le_bytes([raw[2], raw[3]]) as f64 * scale,
        z: i16::from_le_bytes([raw[4], raw[5]]) as f64 * scale,
    }
}
