//! HTS221 humidity/temperature chip driver
//!
//! The chip reports raw counts that map linearly onto two factory
//! calibration points, so the calibration block is read once at init and
//! every measurement is interpolated against it.

use rppal::i2c::I2c;
use tracing::debug;

use super::SenseHatError;

pub const ADDRESS: u16 = 0x5f;

const WHO_AM_I: u8 = 0x0f;
const CHIP_ID: u8 = 0xbc;

const CTRL_REG1: u8 = 0x20;
// PD=1, BDU=1, ODR=1Hz
const CTRL_ACTIVE_1HZ: u8 = 0x85;

// set the sub-address MSB for auto-incremented multi-byte reads
const AUTO_INCREMENT: u8 = 0x80;

const CALIB_START: u8 = 0x30;
const HUMIDITY_OUT_L: u8 = 0x28;
const TEMP_OUT_L: u8 = 0x2a;

/// Factory calibration points for linear interpolation
#[derive(Debug, Clone)]
pub struct Hts221 {
    h0_rh: f64,
    h1_rh: f64,
    t0_deg_c: f64,
    t1_deg_c: f64,
    h0_t0_out: i16,
    h1_t0_out: i16,
    t0_out: i16,
    t1_out: i16,
}

impl Hts221 {
    /// Probes the chip, powers it up, and reads the calibration block
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

        let mut calib = [0u8; 16];
        bus.write_read(&[CALIB_START | AUTO_INCREMENT], &mut calib)?;

        let t0_msb = (calib[5] & 0x03) as u16;
        let t1_msb = ((calib[5] >> 2) & 0x03) as u16;
        let chip = Self {
            h0_rh: calib[0] as f64 / 2.0,
            h1_rh: calib[1] as f64 / 2.0,
            t0_deg_c: ((t0_msb << 8) | calib[2] as u16) as f64 / 8.0,
            t1_deg_c: ((t1_msb << 8) | calib[3] as u16) as f64 / 8.0,
            h0_t0_out: i16::from_le_bytes([calib[6], calib[7]]),
            h1_t0_out: i16::from_le_bytes([calib[10], calib[11]]),
            t0_out: i16::from_le_bytes([calib[12], calib[13]]),
            t1_out: i16::from_le_bytes([calib[14], calib[15]]),
        };
        debug!("HTS221 calibration loaded: {chip:?}");
        Ok(chip)
    }

    /// Reads relative humidity (%rH) and temperature (°C)
    pub fn read(&self, bus: &mut I2c) -> Result<(f64, f64), SenseHatError> {
        bus.set_slave_address(ADDRESS)?;
        let mut raw = [0u8; 2];
        bus.write_read(&[HUMIDITY_OUT_L | AUTO_INCREMENT], &mut raw)?;
        let h_out = i16::from_le_bytes(raw);
        bus.write_read(&[TEMP_OUT_L | AUTO_INCREMENT], &mut raw)?;
        let t_out = i16::from_le_bytes(raw);
        Ok(self.convert(h_out, t_out))
    }

    /// Interpolates raw counts against the calibration points
    fn convert(&self, h_out: i16, t_out: i16) -> (f64, f64) {
        let h_span = (self.h1_t0_out - self.h0_t0_out) as f64;
        let humidity = self.h0_rh
            + (self.h1_rh - self.h0_rh) * (h_out - self.h0_t0_out) as f64 / h_span;

        let t_span = (self.t1_out - self.t0_out) as f64;
        let temperature = self.t0_deg_c
            + (self.t1_deg_c - self.t0_deg_c) * (t_out - self.t0_out) as f64 / t_span;

        (humidity.clamp(0.0, 100.0), temperature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn synthetic() -> Hts221 {
        Hts221 {
            h0_rh: 30.0,
            h1_rh: 70.0,
            t0_deg_c: 10.0,
            t1_deg_c: 50.0,
            h0_t0_out: 0,
            h1_t0_out: 8000,
            t0_out: 0,
            t1_out: 1000,
        }
    }

    #[test]
    fn conversion_hits_the_calibration_points() {
        let chip = synthetic();
        let (humidity, temperature) = chip.convert(0, 0);
        assert_eq!(humidity, 30.0);
        assert_eq!(temperature, 10.0);

        let (humidity, temperature) = chip.convert(8000, 1000);
        assert_eq!(humidity, 70.0);
        assert_eq!(temperature, 50.0);
    }

    #[test]
    fn conversion_interpolates_between_points() {
        let chip = synthetic();
        let (humidity, temperature) = chip.convert(4000, 500);
        assert!((humidity - 50.0).abs() < 1e-9);
        assert!((temperature - 30.0).abs() < 1e-9);
    }

    #[test]
    fn humidity_is_clamped_to_percent_range() {
        let chip = synthetic();
        let (humidity, _) = chip.convert(-8000, 0);
        assert_eq!(humidity, 0.0);
        let (humidity, _) = chip.convert(16000, 0);
        assert_eq!(humidity, 100.0);
    }
}
