//! Combined facade for boards carrying both sensors.
//!
//! Owns one [`Bmp280`] and one [`Aht20`] and sequences init, trigger, wait,
//! read and decode across the two. Each driver needs its own bus handle; on
//! the usual single-bus board, split the bus with something like
//! `embedded-hal-bus` before constructing the station. The two handles must
//! share an error type.
//!
//! Like the individual drivers this type does no locking; serialize access
//! externally if the bus is shared with other users.

use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::I2c;

use crate::aht20::{self, Aht20};
use crate::altitude::{estimate_altitude, SEA_LEVEL_HPA};
use crate::bmp280::{self, Bmp280};
use crate::Error;

/// Everything both sensors can say about the environment, from one
/// [`WeatherStation::measure`] pass.
///
/// Both parts measure temperature; both values are reported rather than
/// picking a winner, since they disagree by sensor tolerance and board
/// self-heating. `altitude` is derived from `pressure` against the standard
/// sea-level reference and is NaN when the pressure compensation reported
/// its invalid-calibration sentinel (0 hPa).
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "use-defmt", derive(defmt::Format))]
pub struct StationReading {
    /// BMP280 temperature in degrees Celsius.
    pub temperature_bmp: f32,
    /// Pressure in hPa.
    pub pressure: f32,
    /// Estimated altitude in meters.
    pub altitude: f32,
    /// AHT20 temperature in degrees Celsius.
    pub temperature_aht: f32,
    /// Relative humidity in percent.
    pub humidity: f32,
}

/// A BMP280 + AHT20 pair presented as one device.
pub struct WeatherStation<B, A>
where
    B: I2c,
    A: I2c,
{
    bmp280: Bmp280<B>,
    aht20: Aht20<A>,
}

impl<E, B, A> WeatherStation<B, A>
where
    B: I2c<Error = E>,
    A: I2c<Error = E>,
{
    /// Create a station with the default addresses (BMP280 0x77, AHT20
    /// 0x38).
    pub fn new(bmp_i2c: B, aht_i2c: A) -> Self {
        Self::with_addresses(
            bmp_i2c,
            bmp280::SENSOR_ADDRESS,
            aht_i2c,
            aht20::SENSOR_ADDRESS,
        )
    }

    /// Create a station with explicit device addresses, for boards wired
    /// differently (e.g. BMP280 with SDO low at 0x76).
    pub fn with_addresses(bmp_i2c: B, bmp_address: u8, aht_i2c: A, aht_address: u8) -> Self {
        WeatherStation {
            bmp280: Bmp280::new(bmp_i2c, bmp_address),
            aht20: Aht20::new(aht_i2c, aht_address),
        }
    }

    /// Bring both sensors up: BMP280 power-on and calibration read, then
    /// the AHT20 reset/calibrate sequence. Idempotent on the AHT20 side;
    /// the BMP280 re-reads its calibration on every call.
    pub fn init(&mut self, delay: &mut impl DelayNs) -> Result<(), Error<E>> {
        self.bmp280.power_on()?;
        self.aht20.initialize(delay)
    }

    /// One combined measurement pass over both sensors.
    pub fn measure(&mut self, delay: &mut impl DelayNs) -> Result<StationReading, Error<E>> {
        let barometric = self.bmp280.measure()?;
        let environmental = self.aht20.measure(delay)?;

        let altitude = if barometric.pressure > 0.0 {
            estimate_altitude(barometric.pressure, SEA_LEVEL_HPA)
        } else {
            f32::NAN
        };

        Ok(StationReading {
            temperature_bmp: barometric.temperature,
            pressure: barometric.pressure,
            altitude,
            temperature_aht: environmental.temperature,
            humidity: environmental.humidity,
        })
    }

    /// Direct access to the pressure/temperature driver.
    pub fn bmp280(&mut self) -> &mut Bmp280<B> {
        &mut self.bmp280
    }

    /// Direct access to the humidity/temperature driver.
    pub fn aht20(&mut self) -> &mut Aht20<A> {
        &mut self.aht20
    }

    /// Destroys the station and releases both bus handles.
    pub fn release(self) -> (B, A) {
        (self.bmp280.release(), self.aht20.release())
    }
}
