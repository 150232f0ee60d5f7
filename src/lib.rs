#![cfg_attr(not(test), no_std)]
//! Driver for BMP280 + AHT20 environmental sensor boards.
//!
//! Combination breakout boards carrying a Bosch BMP280 (pressure and
//! temperature) next to an Aosong AHT20 (humidity and temperature) are common
//! and cheap. This crate drives both parts over I2C through `embedded-hal`
//! 1.0 traits, and adds a barometric altitude estimate derived from the
//! calibrated pressure.
//!
//! Each sensor has its own driver type, usable on its own:
//!
//! * [`bmp280::Bmp280`] - reads the factory calibration coefficients on
//!   power-on and applies the datasheet compensation arithmetic to the raw
//!   ADC counts.
//! * [`aht20::Aht20`] - runs the reset/calibrate state machine, then
//!   triggers measurements and decodes the 20-bit raw values.
//!
//! [`station::WeatherStation`] composes the two into one facade when you want
//! all quantities together. Both sensors usually sit on one physical bus; use
//! something like `embedded-hal-bus` to hand each driver its own bus handle.
//!
//! Example, measuring humidity and temperature with an AHT20:
//!
//!     # use embedded_hal_mock::eh1::delay::NoopDelay;
//!     # use embedded_hal_mock::eh1::i2c::{Mock as I2cMock, Transaction};
//!     # use bmp280_aht20_driver::aht20::{Aht20, SENSOR_ADDRESS};
//!     # let expectations = vec![
//!     #     // initialize: soft reset, calibrate, status poll reports
//!     #     // ready + calibrated.
//!     #     Transaction::write(SENSOR_ADDRESS, vec![0xBA]),
//!     #     Transaction::write(SENSOR_ADDRESS, vec![0xE1, 0x08, 0x00]),
//!     #     Transaction::write(SENSOR_ADDRESS, vec![0x71]),
//!     #     Transaction::read(SENSOR_ADDRESS, vec![0x08]),
//!     #     // measure: trigger, status poll, 7-byte frame (data + CRC).
//!     #     Transaction::write(SENSOR_ADDRESS, vec![0xAC, 0x33, 0x00]),
//!     #     Transaction::write(SENSOR_ADDRESS, vec![0x71]),
//!     #     Transaction::read(SENSOR_ADDRESS, vec![0x08]),
//!     #     Transaction::read(
//!     #         SENSOR_ADDRESS,
//!     #         vec![0x1C, 0x65, 0xB4, 0x25, 0xCD, 0x26, 0xC6],
//!     #     ),
//!     # ];
//!     # let mock_i2c = I2cMock::new(&expectations);
//!     # let mut delay = NoopDelay::new();
//!     let mut aht20 = Aht20::new(mock_i2c, SENSOR_ADDRESS);
//!     let reading = aht20.measure(&mut delay).unwrap();
//!
//!     println!("temperature: {:.2}C", reading.temperature);
//!     println!("humidity: {:.2}%", reading.humidity);
//!     # aht20.release().done();
//!
//! The drivers are synchronous and blocking. Waits for device settle and
//! conversion windows are bounded sleeps on the caller's thread, never yield
//! points, and every poll loop has a configurable upper bound - a wedged
//! device surfaces as [`Error::Timeout`] rather than a hang. No locking is
//! done internally: if several contexts share a driver or a bus, serialize
//! access externally.

pub mod aht20;
pub mod altitude;
pub mod bmp280;
pub mod station;

pub use aht20::{Aht20, DeviceState, Polling, SensorReading};
pub use altitude::{estimate_altitude, SEA_LEVEL_HPA};
pub use bmp280::{Bmp280, Calibration, Measurement};
pub use station::{StationReading, WeatherStation};

/// Driver errors.
#[derive(Debug, PartialEq)]
#[cfg_attr(feature = "use-defmt", derive(defmt::Format))]
pub enum Error<E> {
    /// I2C bus error.
    I2c(E),
    /// A BMP280 measurement was requested before `power_on` populated the
    /// calibration coefficients. Compensation without them would produce
    /// physically meaningless numbers, so this is refused outright.
    NotCalibrated,
    /// The AHT20 finished its init sequence but never reported the
    /// calibrated status bit. Recoverable: call `initialize` again.
    CalibrationFailed,
    /// The device stayed busy past the bounded poll window.
    Timeout,
    /// Fewer bytes than a full frame were available to decode.
    IncompleteFrame,
    /// CRC validation of an AHT20 frame failed. Safe to retry the
    /// measurement.
    InvalidCrc,
}
