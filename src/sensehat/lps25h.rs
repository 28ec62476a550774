//! LPS25H pressure chip driver

use rppal::i2c::I2c;

use super::SenseHatError;

pub const ADDRESS: u16 = 0x5c;

const WHO_AM_I: u8 = 0x0f;
const CHIP_ID: u8 = 0xbd;

const CTRL_REG1: u8 = 0x20;
// PD=1, ODR=1Hz
const CTRL_ACTIVE_1HZ: u8 = 0x90;

const AUTO_INCREMENT: u8 = 0x80;
const PRESS_OUT_XL: u8 = 0x28;
const TEMP_OUT_L: u8 = 0x2b;

/// Raw pressure counts per hPa
const PRESSURE_SCALE: f64 = 4096.0;
/// Temperature offset and counts per °C per the datasheet
const TEMP_OFFSET: f64 = 42.5;
const TEMP_SCALE: f64 = 480.0;

#[derive(Debug)]
pub struct Lps25h;

impl Lps25h {
    /// Probes the chip and powers it up
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
        bus.smbus_write_byte(CTRL_REG1, CTRL_ACTIVE_1HZ)?;
        Ok(Self)
    }

    /// Reads pressure (hPa) and the chip's own temperature (°C)
    pub fn read(&self, bus: &mut I2c) -> Result<(f64, f64), SenseHatError> {
        bus.set_slave_address(ADDRESS)?;
        let mut raw = [0u8; 3];
        bus.write_read(&[PRESS_OUT_XL | AUTO_INCREMENT], &mut raw)?;
        let mut temp = [0u8; 2];
        bus.write_read(&[TEMP_OUT_L | AUTO_INCREMENT], &mut temp)?;
        Ok((
            convert_pressure(raw),
            convert_temperature(i16::from_le_bytes(temp)),
        ))
    }
}

fn convert_pressure(raw: [u8; 3]) -> f64 {
    // 24-bit two's complement, XL first
    let counts = i32::from_le_bytes([raw[0], raw[1], raw[2], 0]) << 8 >> 8;
    counts as f64 / PRESSURE_SCALE
}

fn convert_temperature(counts: i16) -> f64 {
    TEMP_OFFSET + counts as f64 / TEMP_SCALE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_pressure_converts_to_hpa() {
        // 1013.25 hPa * 4096 counts
        let counts = (1013.25 * PRESSURE_SCALE) as i32;
        let raw = counts.to_le_bytes();
        let pressure = convert_pressure([raw[0], raw[1], raw[2]]);
        assert!((pressure - 1013.25).abs() < 0.001);
    }

    #[test]
    fn negative_pressure_counts_are_sign_extended() {
        let raw = (-4096i32).to_le_bytes();
        let pressure = convert_pressure([raw[0], raw[1], raw[2]]);
        assert!((pressure - (-1.0)).abs() < 1e-9);
    }

    #[test]
    fn temperature_offset_applies() {
        assert_eq!(convert_temperature(0), 42.5);
        assert_eq!(convert_temperature(480), 43.5);
        assert_eq!(convert_temperature(-480), 41.5);
    }
}
