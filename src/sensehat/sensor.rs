//! Sense HAT environmental/IMU board
//!
//! Composes the three I2C chips into one reading source. The board moves
//! through a two-stage lifecycle: the bus is opened in `Initializing`, the
//! chips are probed and configured on the transition to `Measuring`, and
//! only a `Measuring` board can produce readings.

use chrono::Local;
use rppal::i2c::I2c;
use serde_json::json;
use statum::{machine, state};
use tracing::{debug, info};

use crate::mqtt::Reading;

use super::hts221::Hts221;
use super::lps25h::Lps25h;
use super::lsm9ds1::{Lsm9ds1, Triplet};
use super::SenseHatError;

/// Settings shaping the published sensor readings
#[derive(Clone, Debug)]
pub struct SensorSettings {
    /// Decimal places kept on every published value
    pub rounding: u32,

    /// Factor applied to raw acceleration (g) before publishing
    pub acceleration_multiplier: f64,

    /// Factor applied to raw angular rate (dps) before publishing
    pub gyroscope_multiplier: f64,
}

impl Default for SensorSettings {
    fn default() -> Self {
        Self {
            rounding: 2,
            acceleration_multiplier: 1.0,
            gyroscope_multiplier: 1.0,
        }
    }
}

#[state]
#[derive(Debug, Clone)]
pub enum SensorState {
    Initializing,
    Measuring,
}

#[machine]
#[derive(Debug)]
pub struct SenseHatSensor<S: SensorState> {
    bus: I2c,
    settings: SensorSettings,
    humidity_chip: Option<Hts221>,
    pressure_chip: Option<Lps25h>,
    imu_chip: Option<Lsm9ds1>,
}

impl<S: SensorState> SenseHatSensor<S> {
    pub fn settings(&self) -> &SensorSettings {
        &self.settings
    }
}

impl SenseHatSensor<Initializing> {
    /// Opens the default I2C bus
    pub fn create(settings: Option<SensorSettings>) -> Result<Self, SenseHatError> {
        let settings = settings.unwrap_or_default();
        debug!("Creating Sense HAT sensor board with settings: {:?}", settings);
        let bus = I2c::new()?;
        Ok(Self::new(bus, settings, None, None, None))
    }

    /// Probes and configures all three chips, then transitions to Measuring
    pub fn initialize(mut self) -> Result<SenseHatSensor<Measuring>, SenseHatError> {
        info!("Probing Sense HAT sensor chips");
        self.humidity_chip = Some(Hts221::init(&mut self.bus)?);
        self.pressure_chip = Some(Lps25h::init(&mut self.bus)?);
        self.imu_chip = Some(Lsm9ds1::init(&mut self.bus)?);
        info!("Sense HAT sensor board initialized, transitioning to Measuring state");
        Ok(self.transition())
    }
}

impl SenseHatSensor<Measuring> {
    /// Reads all chips and assembles one reading
    pub fn read(&mut self) -> Result<Reading, SenseHatError> {
        let humidity_chip = self
            .humidity_chip
            .as_ref()
            .ok_or_else(|| SenseHatError::DeviceNotFoundError("HTS221 not initialized".into()))?;
        let pressure_chip = self
            .pressure_chip
            .as_ref()
            .ok_or_else(|| SenseHatError::DeviceNotFoundError("LPS25H not initialized".into()))?;
        let imu_chip = self
            .imu_chip
            .as_ref()
            .ok_or_else(|| SenseHatError::DeviceNotFoundError("LSM9DS1 not initialized".into()))?;

        let (humidity, temperature) = humidity_chip.read(&mut self.bus)?;
        let (pressure, temperature_from_pressure) = pressure_chip.read(&mut self.bus)?;
        let (acceleration, gyroscope) = imu_chip.read(&mut self.bus)?;

        let settings = &self.settings;
        let acceleration = scale_triplet(acceleration, settings.acceleration_multiplier);
        let gyroscope = scale_triplet(gyroscope, settings.gyroscope_multiplier);

        let digits = settings.rounding;
        let mut reading = Reading::new();
        reading.insert("temperature".into(), json!(round_to(temperature, digits)));
        reading.insert(
            "temperature_from_pressure".into(),
            json!(round_to(temperature_from_pressure, digits)),
        );
        reading.insert("humidity".into(), json!(round_to(humidity, digits)));
        reading.insert("pressure".into(), json!(round_to(pressure, digits)));
        reading.insert("acceleration".into(), triplet_json(acceleration, digits));
        reading.insert("gyroscope".into(), triplet_json(gyroscope, digits));
        reading.insert("timestamp".into(), json!(Local::now().to_rfc3339()));
        Ok(reading)
    }
}

fn scale_triplet(sample: Triplet, multiplier: f64) -> Triplet {
    Triplet {
        x: sample.x * multiplier,
        y: sample.y * multiplier,
        z: sample.z * multiplier,
    }
}

fn triplet_json(sample: Triplet, digits: u32) -> serde_json::Value {
    json!({
        "x": round_to(sample.x, digits),
        "y": round_to(sample.y, digits),
        "z": round_to(sample.z, digits),
    })
}

fn round_to(value: f64, digits: u32) -> f64 {
    let factor = 10f64.powi(digits as i32);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounding_keeps_the_requested_digits() {
        assert_eq!(round_to(21.5349, 2), 21.53);
        assert_eq!(round_to(21.536, 2), 21.54);
        assert_eq!(round_to(-0.004, 2), -0.0);
        assert_eq!(round_to(1013.25, 0), 1013.0);
    }

    #[test]
    fn multipliers_scale_every_axis() {
        let sample = Triplet { x: 1.0, y: -2.0, z: 0.5 };
        let scaled = scale_triplet(sample, 9.81);
        assert_eq!(scaled.x, 9.81);
        assert_eq!(scaled.y, -19.62);
        assert_eq!(scaled.z, 4.905);
    }

    #[test]
    fn triplet_serializes_with_axis_keys() {
        let value = triplet_json(Triplet { x: 0.123456, y: 0.0, z: -1.0 }, 3);
        assert_eq!(value["x"], 0.123);
        assert_eq!(value["y"], 0.0);
        assert_eq!(value["z"], -1.0);
    }
}
