//! AHT20 humidity and temperature driver.
//!
//! Unlike the BMP280 the AHT20 is command-driven, not register-mapped: it
//! must be soft-reset and calibrated after power-up, and every measurement is
//! a trigger command followed by a busy wait and a fixed-size frame read.
//! The datasheet (section 5.4) describes the flow:
//!
//! ```text
//!           Start (Power on)
//!                  |
//!                  v
//!    Command::SoftReset (0xBA), wait 20 ms
//!                  |
//!                  v
//!    Command::Calibrate (0xE1 0x08 0x00)
//!                  |
//!                  v
//!    poll Command::CheckStatus (0x71)  --- busy bit (0x80) still set:
//!                  |                       wait and retry, bounded
//!                  v
//!    calibrated bit (0x08) set?  -- no --> Faulted
//!                  |
//!                 yes
//!                  |
//!                  v
//!    Command::TriggerMeasurement (0xAC 0x33 0x00)
//!                  |
//!                  v
//!    wait 80 ms, poll status until not busy (bounded)
//!                  |
//!                  v
//!    read 7 bytes: status, 5 data, CRC
//! ```
//!
//! Every poll loop is bounded by [`Polling`]; a device that never leaves the
//! busy state surfaces [`Error::Timeout`] instead of hanging.
//!
//! AHT20 datasheets disagree between revisions on the init command (0xBE vs
//! 0xE1) and on which status bits prove calibration (0x08 vs 0x18). This
//! driver uses the 0xE1 calibrate command and checks bit 0x08, per datasheet
//! v1.1 section 5.3 Table 9 and Table 10.

use crc_any::CRCu8;
use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::I2c;

use crate::Error;

/// AHT20 sensor's I2C address.
pub const SENSOR_ADDRESS: u8 = 0x38;

/// Length of a measurement frame: status byte plus 20 bits humidity plus 20
/// bits temperature.
pub const FRAME_LEN: usize = 6;

/// Commands understood by the sensor, datasheet section 5.3, Table 9.
///
/// `Calibrate` and `TriggerMeasurement` each take two parameter bytes the
/// datasheet gives no meaning for; treat command plus parameters as one
/// opaque three-byte command.
pub enum Command {
    /// Get a byte of status word.
    CheckStatus = 0x71,
    /// Calibrate the sensor. Parameters 0x08, 0x00.
    Calibrate = 0xE1,
    /// Start a measurement. Parameters 0x33, 0x00. The conversion takes
    /// about 80 ms.
    TriggerMeasurement = 0xAC,
    /// Soft reset, completes within 20 ms.
    SoftReset = 0xBA,
}

/// Status byte bits, datasheet section 5.3, Table 10.
pub enum Status {
    /// 1 while a measurement or calibration is in progress.
    Busy = 0x80,
    /// 1 once the sensor is calibrated. If this stays 0 after the calibrate
    /// command, the init failed.
    Calibrated = 0x08,
}

/// A decoded status byte from the sensor.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "use-defmt", derive(defmt::Format))]
pub struct SensorStatus(pub u8);

impl SensorStatus {
    pub fn new(status: u8) -> Self {
        SensorStatus(status)
    }

    /// The sensor is idle and its data registers may be read.
    pub fn is_ready(self) -> bool {
        (self.0 & Status::Busy as u8) == 0
    }

    /// The calibration performed during init completed.
    pub fn is_calibrated(self) -> bool {
        (self.0 & Status::Calibrated as u8) != 0
    }
}

/// Driver-tracked device state.
///
/// Owned by the driver instance and advanced by status-register polling; the
/// interesting transitions are `Uninitialized -> Resetting -> Calibrating ->
/// Ready` during [`Aht20::initialize`] and `Ready -> Busy -> Ready` around a
/// measurement. `Faulted` is entered when a poll window expires or the
/// calibrated bit never appears; a new `initialize` call starts over from
/// scratch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "use-defmt", derive(defmt::Format))]
pub enum DeviceState {
    Uninitialized,
    Resetting,
    Calibrating,
    Ready,
    Busy,
    Faulted,
}

/// Bounded busy-wait policy: at most `max_attempts` status polls,
/// `interval_ms` apart.
///
/// The default window (10 ms x 30, roughly 300 ms) covers both the
/// calibration wait and the 80 ms measurement conversion with plenty of
/// margin. The bound is deliberately configurable rather than baked in.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "use-defmt", derive(defmt::Format))]
pub struct Polling {
    pub interval_ms: u16,
    pub max_attempts: u16,
}

impl Default for Polling {
    fn default() -> Self {
        Polling {
            interval_ms: 10,
            max_attempts: 30,
        }
    }
}

/// One reading from the sensor.
///
/// * humidity in % relative humidity
/// * temperature in degrees Celsius
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "use-defmt", derive(defmt::Format))]
pub struct SensorReading {
    pub humidity: f32,
    pub temperature: f32,
}

/// Decode the 20-bit temperature from a measurement frame.
///
/// Layout (datasheet section 5.4.5): the low nibble of byte 3, then bytes 4
/// and 5. Scaled per section 6.2: `raw / 2^20 * 200 - 50` degrees Celsius.
///
/// Fails with [`Error::IncompleteFrame`] when the slice is shorter than
/// [`FRAME_LEN`].
pub fn decode_temperature<E>(frame: &[u8]) -> Result<f32, Error<E>> {
    if frame.len() < FRAME_LEN {
        return Err(Error::IncompleteFrame);
    }
    let raw: u32 =
        (((frame[3] & 0x0F) as u32) << 16) | ((frame[4] as u32) << 8) | (frame[5] as u32);
    Ok((raw as f32) / ((1 << 20) as f32) * 200.0 - 50.0)
}

/// Decode the 20-bit relative humidity from a measurement frame.
///
/// Layout: bytes 1 and 2, then the high nibble of the split byte 3. Scaled
/// per datasheet section 6.1: `raw / 2^20 * 100` percent.
pub fn decode_humidity<E>(frame: &[u8]) -> Result<f32, Error<E>> {
    if frame.len() < FRAME_LEN {
        return Err(Error::IncompleteFrame);
    }
    let raw: u32 =
        ((frame[1] as u32) << 12) | ((frame[2] as u32) << 4) | ((frame[3] as u32) >> 4);
    Ok((raw as f32) / ((1 << 20) as f32) * 100.0)
}

/// An AHT20 sensor on the I2C bus `I`.
///
/// The address will be [`SENSOR_ADDRESS`] unless address-translating
/// hardware sits in between.
pub struct Aht20<I>
where
    I: I2c,
{
    i2c: I,
    address: u8,
    state: DeviceState,
    polling: Polling,
}

impl<I> Aht20<I>
where
    I: I2c,
{
    /// Create the driver with the default [`Polling`] bounds. Consumes the
    /// I2C bus `I`; no bus traffic happens until the first operation.
    pub fn new(i2c: I, address: u8) -> Self {
        Aht20 {
            i2c,
            address,
            state: DeviceState::Uninitialized,
            polling: Polling::default(),
        }
    }

    /// Replace the poll bounds.
    pub fn with_polling(mut self, polling: Polling) -> Self {
        self.polling = polling;
        self
    }

    /// Current state-machine position.
    pub fn state(&self) -> DeviceState {
        self.state
    }

    /// Run the reset and calibration sequence.
    ///
    /// Idempotent: if the sensor is already `Ready` this returns immediately
    /// without touching the bus. Otherwise it soft-resets (20 ms), sends the
    /// calibrate command and polls until the busy bit clears. If the bound
    /// expires the state becomes `Faulted` and [`Error::Timeout`] is
    /// returned; if the sensor goes idle without setting the calibrated bit,
    /// the state becomes `Faulted` and [`Error::CalibrationFailed`] is
    /// returned. Either failure may be retried by calling this again.
    pub fn initialize(&mut self, delay: &mut impl DelayNs) -> Result<(), Error<I::Error>> {
        if self.state == DeviceState::Ready {
            return Ok(());
        }

        self.soft_reset(delay)?;
        self.send_calibrate()?;
        let status = self.wait_ready(delay)?;
        if !status.is_calibrated() {
            self.state = DeviceState::Faulted;
            return Err(Error::CalibrationFailed);
        }

        self.state = DeviceState::Ready;
        Ok(())
    }

    /// Soft-reset the sensor and wait out the 20 ms the datasheet
    /// guarantees the reset completes within (section 5.5).
    pub fn soft_reset(&mut self, delay: &mut impl DelayNs) -> Result<(), Error<I::Error>> {
        let command = [Command::SoftReset as u8];
        self.i2c.write(self.address, &command).map_err(Error::I2c)?;
        self.state = DeviceState::Resetting;
        delay.delay_ms(20);
        Ok(())
    }

    /// Measure humidity and temperature.
    ///
    /// Ensures the sensor is initialized, then performs one trigger, one
    /// bounded busy wait and one frame read for both quantities. When both
    /// are wanted this is the call to use - two separate
    /// [`read_temperature`](Self::read_temperature) /
    /// [`read_humidity`](Self::read_humidity) calls cost a full
    /// trigger-wait-read cycle each.
    ///
    /// Takes at least 80 ms (the conversion time of the sensor).
    pub fn measure(&mut self, delay: &mut impl DelayNs) -> Result<SensorReading, Error<I::Error>> {
        self.initialize(delay)?;
        self.trigger_measurement()?;
        delay.delay_ms(80);
        self.wait_ready(delay)?;

        let frame = self.read_raw()?;
        self.state = DeviceState::Ready;
        Ok(SensorReading {
            humidity: decode_humidity(&frame)?,
            temperature: decode_temperature(&frame)?,
        })
    }

    /// Measure and return only the temperature. Costs a full measurement
    /// cycle; prefer [`measure`](Self::measure) when humidity is wanted too.
    pub fn read_temperature(&mut self, delay: &mut impl DelayNs) -> Result<f32, Error<I::Error>> {
        Ok(self.measure(delay)?.temperature)
    }

    /// Measure and return only the relative humidity.
    pub fn read_humidity(&mut self, delay: &mut impl DelayNs) -> Result<f32, Error<I::Error>> {
        Ok(self.measure(delay)?.humidity)
    }

    /// Destroys this driver and releases the I2C bus `I`.
    pub fn release(self) -> I {
        self.i2c
    }

    /// Ask the sensor for its status byte.
    fn check_status(&mut self) -> Result<SensorStatus, Error<I::Error>> {
        let command = [Command::CheckStatus as u8];
        let mut buffer = [0u8; 1];

        self.i2c.write(self.address, &command).map_err(Error::I2c)?;
        self.i2c
            .read(self.address, &mut buffer)
            .map_err(Error::I2c)?;

        Ok(SensorStatus::new(buffer[0]))
    }

    /// Send the calibrate command. Completion is observed through the
    /// status byte, see `initialize`.
    fn send_calibrate(&mut self) -> Result<(), Error<I::Error>> {
        let command = [Command::Calibrate as u8, 0x08, 0x00];
        self.i2c.write(self.address, &command).map_err(Error::I2c)?;
        self.state = DeviceState::Calibrating;
        Ok(())
    }

    /// Start a conversion. The result is readable once the busy bit clears,
    /// about 80 ms later.
    fn trigger_measurement(&mut self) -> Result<(), Error<I::Error>> {
        let command = [Command::TriggerMeasurement as u8, 0x33, 0x00];
        self.i2c.write(self.address, &command).map_err(Error::I2c)?;
        self.state = DeviceState::Busy;
        Ok(())
    }

    /// Poll the status byte until the busy bit clears, at most
    /// `polling.max_attempts` times. On expiry the device is considered
    /// wedged: state goes to `Faulted` and `Timeout` is returned.
    fn wait_ready(&mut self, delay: &mut impl DelayNs) -> Result<SensorStatus, Error<I::Error>> {
        for attempt in 0..self.polling.max_attempts {
            let status = self.check_status()?;
            if status.is_ready() {
                return Ok(status);
            }
            if attempt + 1 < self.polling.max_attempts {
                delay.delay_ms(self.polling.interval_ms as u32);
            }
        }
        self.state = DeviceState::Faulted;
        Err(Error::Timeout)
    }

    /// Read one measurement frame: 6 frame bytes plus a trailing CRC byte,
    /// in a single burst. The CRC (checked here) covers the whole frame
    /// including its leading status byte.
    fn read_raw(&mut self) -> Result<[u8; FRAME_LEN], Error<I::Error>> {
        let mut buffer = [0u8; FRAME_LEN + 1];
        self.i2c
            .read(self.address, &mut buffer)
            .map_err(Error::I2c)?;

        let frame: [u8; FRAME_LEN] = [
            buffer[0], buffer[1], buffer[2], buffer[3], buffer[4], buffer[5],
        ];
        if compute_crc(&frame) != buffer[FRAME_LEN] {
            return Err(Error::InvalidCrc);
        }
        Ok(frame)
    }
}

/// CRC-8 as specified in datasheet section 5.4.4: polynomial
/// `1 + x^4 + x^5 + x^8` (0x31), initial value 0xFF - the
/// "CRC-8-Dallas/Maxim" parameter set.
fn compute_crc(bytes: &[u8]) -> u8 {
    // Poly (0x31), bits (8), initial (0xff), final_xor (0x00), reflect (false).
    let mut crc = CRCu8::create_crc(0x31, 8, 0xff, 0x00, false);
    crc.digest(bytes);
    crc.get_crc()
}

#[cfg(test)]
mod tests {
    use core::convert::Infallible;

    use embedded_hal_mock::eh1::delay::NoopDelay;
    use embedded_hal_mock::eh1::i2c::{Mock as I2cMock, Transaction};

    use super::{
        decode_humidity, decode_temperature, Aht20, DeviceState, Polling, SensorStatus,
        SENSOR_ADDRESS,
    };
    use crate::Error;

    /// A frame captured from a real sensor run: ready + calibrated status,
    /// about 39.7 %RH and 22.5 C. CRC byte is 0xC6.
    const CAPTURED_FRAME: [u8; 6] = [0x1C, 0x65, 0xB4, 0x25, 0xCD, 0x26];
    const CAPTURED_CRC: u8 = 0xC6;

    /// Synthetic frame built for round numbers: humidity raw 419430
    /// (40.0 %RH), temperature raw 393216 (25.0 C). CRC is 0x5E.
    const SYNTHETIC_FRAME: [u8; 6] = [0x1C, 0x66, 0x66, 0x66, 0x00, 0x00];
    const SYNTHETIC_CRC: u8 = 0x5E;

    fn frame_with_crc(frame: [u8; 6], crc: u8) -> Vec<u8> {
        let mut bytes = frame.to_vec();
        bytes.push(crc);
        bytes
    }

    /// The transactions initialize() performs when the sensor calibrates on
    /// the first status poll.
    fn initialize_expectations() -> Vec<Transaction> {
        vec![
            Transaction::write(SENSOR_ADDRESS, vec![0xBA]),
            Transaction::write(SENSOR_ADDRESS, vec![0xE1, 0x08, 0x00]),
            Transaction::write(SENSOR_ADDRESS, vec![0x71]),
            Transaction::read(SENSOR_ADDRESS, vec![0x08]),
        ]
    }

    #[test]
    fn sensorstatus_bits() {
        assert!(SensorStatus::new(0x00).is_ready());
        assert!(!SensorStatus::new(0x80).is_ready());
        assert!(SensorStatus::new(0x08).is_calibrated());
        assert!(!SensorStatus::new(0x00).is_calibrated());
    }

    #[test]
    fn decode_captured_frame() {
        let humidity = decode_humidity::<Infallible>(&CAPTURED_FRAME).unwrap();
        let temperature = decode_temperature::<Infallible>(&CAPTURED_FRAME).unwrap();
        assert!((humidity - 39.728).abs() < 0.001);
        assert!((temperature - 22.517).abs() < 0.001);
    }

    #[test]
    fn decode_synthetic_frame() {
        let humidity = decode_humidity::<Infallible>(&SYNTHETIC_FRAME).unwrap();
        let temperature = decode_temperature::<Infallible>(&SYNTHETIC_FRAME).unwrap();
        assert!((humidity - 40.0).abs() < 0.001);
        assert!((temperature - 25.0).abs() < 0.001);
    }

    /// Anything shorter than a full frame is refused by the decoders.
    #[test]
    fn decode_incomplete_frame() {
        let short = [0x1C, 0x66, 0x66];
        assert_eq!(
            decode_temperature::<Infallible>(&short),
            Err(Error::IncompleteFrame)
        );
        assert_eq!(
            decode_humidity::<Infallible>(&short),
            Err(Error::IncompleteFrame)
        );
    }

    #[test]
    fn initialize_when_sensor_calibrates() {
        let mock_i2c = I2cMock::new(&initialize_expectations());
        let mut delay = NoopDelay::new();

        let mut aht20 = Aht20::new(mock_i2c, SENSOR_ADDRESS);
        aht20.initialize(&mut delay).unwrap();
        assert_eq!(aht20.state(), DeviceState::Ready);

        aht20.release().done();
    }

    /// A second initialize in Ready state performs no bus transactions: the
    /// expectation list only covers the first call.
    #[test]
    fn initialize_is_idempotent() {
        let mock_i2c = I2cMock::new(&initialize_expectations());
        let mut delay = NoopDelay::new();

        let mut aht20 = Aht20::new(mock_i2c, SENSOR_ADDRESS);
        aht20.initialize(&mut delay).unwrap();
        aht20.initialize(&mut delay).unwrap();

        aht20.release().done();
    }

    /// Busy clears but the calibrated bit never appears: init reports
    /// failure and the device is Faulted.
    #[test]
    fn initialize_without_calibrated_bit_faults() {
        let expectations = vec![
            Transaction::write(SENSOR_ADDRESS, vec![0xBA]),
            Transaction::write(SENSOR_ADDRESS, vec![0xE1, 0x08, 0x00]),
            Transaction::write(SENSOR_ADDRESS, vec![0x71]),
            Transaction::read(SENSOR_ADDRESS, vec![0x00]),
        ];
        let mock_i2c = I2cMock::new(&expectations);
        let mut delay = NoopDelay::new();

        let mut aht20 = Aht20::new(mock_i2c, SENSOR_ADDRESS);
        assert_eq!(aht20.initialize(&mut delay), Err(Error::CalibrationFailed));
        assert_eq!(aht20.state(), DeviceState::Faulted);

        aht20.release().done();
    }

    /// The sensor stays busy for the whole poll window: bounded failure,
    /// not a hang.
    #[test]
    fn initialize_wedged_device_times_out() {
        let polling = Polling {
            interval_ms: 10,
            max_attempts: 3,
        };
        let mut expectations = vec![
            Transaction::write(SENSOR_ADDRESS, vec![0xBA]),
            Transaction::write(SENSOR_ADDRESS, vec![0xE1, 0x08, 0x00]),
        ];
        for _ in 0..3 {
            expectations.push(Transaction::write(SENSOR_ADDRESS, vec![0x71]));
            expectations.push(Transaction::read(SENSOR_ADDRESS, vec![0x80]));
        }
        let mock_i2c = I2cMock::new(&expectations);
        let mut delay = NoopDelay::new();

        let mut aht20 = Aht20::new(mock_i2c, SENSOR_ADDRESS).with_polling(polling);
        assert_eq!(aht20.initialize(&mut delay), Err(Error::Timeout));
        assert_eq!(aht20.state(), DeviceState::Faulted);

        aht20.release().done();
    }

    /// One full measurement: exactly one trigger and one frame read serve
    /// both decoded quantities.
    #[test]
    fn measure_amortizes_one_cycle() {
        let mut expectations = initialize_expectations();
        expectations.extend([
            Transaction::write(SENSOR_ADDRESS, vec![0xAC, 0x33, 0x00]),
            Transaction::write(SENSOR_ADDRESS, vec![0x71]),
            Transaction::read(SENSOR_ADDRESS, vec![0x08]),
            Transaction::read(
                SENSOR_ADDRESS,
                frame_with_crc(CAPTURED_FRAME, CAPTURED_CRC),
            ),
        ]);
        let mock_i2c = I2cMock::new(&expectations);
        let mut delay = NoopDelay::new();

        let mut aht20 = Aht20::new(mock_i2c, SENSOR_ADDRESS);
        let reading = aht20.measure(&mut delay).unwrap();
        assert!((reading.humidity - 39.728).abs() < 0.001);
        assert!((reading.temperature - 22.517).abs() < 0.001);
        assert_eq!(aht20.state(), DeviceState::Ready);

        aht20.release().done();
    }

    /// The sensor reports busy once before the frame becomes readable.
    #[test]
    fn measure_waits_for_busy_to_clear() {
        let mut expectations = initialize_expectations();
        expectations.extend([
            Transaction::write(SENSOR_ADDRESS, vec![0xAC, 0x33, 0x00]),
            Transaction::write(SENSOR_ADDRESS, vec![0x71]),
            Transaction::read(SENSOR_ADDRESS, vec![0x88]), // busy + calibrated
            Transaction::write(SENSOR_ADDRESS, vec![0x71]),
            Transaction::read(SENSOR_ADDRESS, vec![0x08]),
            Transaction::read(
                SENSOR_ADDRESS,
                frame_with_crc(SYNTHETIC_FRAME, SYNTHETIC_CRC),
            ),
        ]);
        let mock_i2c = I2cMock::new(&expectations);
        let mut delay = NoopDelay::new();

        let mut aht20 = Aht20::new(mock_i2c, SENSOR_ADDRESS);
        let reading = aht20.measure(&mut delay).unwrap();
        assert!((reading.humidity - 40.0).abs() < 0.001);
        assert!((reading.temperature - 25.0).abs() < 0.001);

        aht20.release().done();
    }

    /// A corrupted frame fails CRC validation.
    #[test]
    fn measure_bad_crc() {
        let mut corrupted = CAPTURED_FRAME;
        corrupted[4] ^= 0x01;

        let mut expectations = initialize_expectations();
        expectations.extend([
            Transaction::write(SENSOR_ADDRESS, vec![0xAC, 0x33, 0x00]),
            Transaction::write(SENSOR_ADDRESS, vec![0x71]),
            Transaction::read(SENSOR_ADDRESS, vec![0x08]),
            Transaction::read(SENSOR_ADDRESS, frame_with_crc(corrupted, CAPTURED_CRC)),
        ]);
        let mock_i2c = I2cMock::new(&expectations);
        let mut delay = NoopDelay::new();

        let mut aht20 = Aht20::new(mock_i2c, SENSOR_ADDRESS);
        assert_eq!(aht20.measure(&mut delay), Err(Error::InvalidCrc));

        aht20.release().done();
    }

    /// read_temperature and read_humidity each run a complete cycle.
    #[test]
    fn single_quantity_reads() {
        let mut expectations = initialize_expectations();
        for _ in 0..2 {
            expectations.extend([
                Transaction::write(SENSOR_ADDRESS, vec![0xAC, 0x33, 0x00]),
                Transaction::write(SENSOR_ADDRESS, vec![0x71]),
                Transaction::read(SENSOR_ADDRESS, vec![0x08]),
                Transaction::read(
                    SENSOR_ADDRESS,
                    frame_with_crc(SYNTHETIC_FRAME, SYNTHETIC_CRC),
                ),
            ]);
        }
        let mock_i2c = I2cMock::new(&expectations);
        let mut delay = NoopDelay::new();

        let mut aht20 = Aht20::new(mock_i2c, SENSOR_ADDRESS);
        let temperature = aht20.read_temperature(&mut delay).unwrap();
        let humidity = aht20.read_humidity(&mut delay).unwrap();
        assert!((temperature - 25.0).abs() < 0.001);
        assert!((humidity - 40.0).abs() < 0.001);

        aht20.release().done();
    }

    /// Value from the interface specification document.
    #[test]
    fn crc_reference_value() {
        assert_eq!(super::compute_crc(&[0xBE, 0xEF]), 0x92);
    }

    #[test]
    fn crc_of_test_frames() {
        assert_eq!(super::compute_crc(&CAPTURED_FRAME), CAPTURED_CRC);
        assert_eq!(super::compute_crc(&SYNTHETIC_FRAME), SYNTHETIC_CRC);
    }
}
