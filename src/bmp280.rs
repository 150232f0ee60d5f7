//! BMP280 pressure and temperature driver.
//!
//! The BMP280 is a register-mapped device: configuration goes into ctrl_meas
//! (0xF4) and config (0xF5), raw 20-bit ADC counts come out of burst reads at
//! 0xF7 (pressure) and 0xFA (temperature), and a block of factory calibration
//! coefficients lives at 0x88..0x9E. Raw counts are meaningless until run
//! through the compensation arithmetic from the datasheet (section 3.11.3)
//! together with those coefficients.
//!
//! [`power_on`](Bmp280::power_on) puts the device in normal mode and reads
//! the calibration block once; measurements fail with
//! [`Error::NotCalibrated`] until it has been called. All register reads use
//! the I2C combined format (register pointer write, repeated start, read) via
//! `write_read`.
//!
//! [BMP280 Datasheet](https://www.bosch-sensortec.com/media/boschsensortec/downloads/datasheets/bst-bmp280-ds001.pdf)

use embedded_hal::i2c::I2c;

use crate::Error;

/// BMP280 I2C address with the SDO pin pulled high (the usual breakout board
/// wiring).
pub const SENSOR_ADDRESS: u8 = 0x77;

/// BMP280 I2C address with SDO to GND.
pub const SENSOR_ADDRESS_ALT: u8 = 0x76;

/// Register map, datasheet section 4.2.
mod reg {
    pub const CTRL_MEAS: u8 = 0xF4;
    pub const CONFIG: u8 = 0xF5;
    pub const PRESS_MSB: u8 = 0xF7; // ..0xF9, 20-bit burst
    pub const TEMP_MSB: u8 = 0xFA; // ..0xFC, 20-bit burst
    pub const CALIB_T1: u8 = 0x88;
    pub const CALIB_T2: u8 = 0x8A;
    pub const CALIB_T3: u8 = 0x8C;
    pub const CALIB_P1: u8 = 0x8E;
    pub const CALIB_P2: u8 = 0x90;
    pub const CALIB_P3: u8 = 0x92;
    pub const CALIB_P4: u8 = 0x94;
    pub const CALIB_P5: u8 = 0x96;
    pub const CALIB_P6: u8 = 0x98;
    pub const CALIB_P7: u8 = 0x9A;
    pub const CALIB_P8: u8 = 0x9C;
    pub const CALIB_P9: u8 = 0x9E;
}

/// ctrl_meas value for normal mode: osrs_t x1, osrs_p x4.
/// 0b001_011_11 - temperature oversampling, pressure oversampling, mode.
pub const CTRL_MEAS_NORMAL: u8 = 0x2F;

/// ctrl_meas value for sleep mode. Oversampling fields cleared too; they are
/// rewritten on the next power-on.
pub const CTRL_MEAS_SLEEP: u8 = 0x00;

/// config value with filter off and minimum standby time.
pub const CONFIG_DEFAULT: u8 = 0x00;

/// Factory calibration coefficients, datasheet section 3.11.2, Table 17.
///
/// Read once from 0x88..0x9E on power-on and immutable afterwards. All
/// values are stored little-endian on the device; `t1` and `p1` are the only
/// unsigned ones.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "use-defmt", derive(defmt::Format))]
pub struct Calibration {
    pub t1: u16,
    pub t2: i16,
    pub t3: i16,
    pub p1: u16,
    pub p2: i16,
    pub p3: i16,
    pub p4: i16,
    pub p5: i16,
    pub p6: i16,
    pub p7: i16,
    pub p8: i16,
    pub p9: i16,
}

/// One compensated BMP280 measurement.
///
/// * temperature in degrees Celsius
/// * pressure in hPa, rounded to two decimals
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "use-defmt", derive(defmt::Format))]
pub struct Measurement {
    pub temperature: f32,
    pub pressure: f32,
}

/// A BMP280 sensor on the I2C bus `I`.
pub struct Bmp280<I>
where
    I: I2c,
{
    i2c: I,
    address: u8,
    calibration: Option<Calibration>,
}

impl<I> Bmp280<I>
where
    I: I2c,
{
    /// Create the driver. The address is almost always [`SENSOR_ADDRESS`];
    /// boards with SDO strapped low use [`SENSOR_ADDRESS_ALT`].
    ///
    /// No bus traffic happens here; call [`power_on`](Self::power_on) before
    /// measuring.
    pub fn new(i2c: I, address: u8) -> Self {
        Bmp280 {
            i2c,
            address,
            calibration: None,
        }
    }

    /// Wake the sensor into normal mode with the default oversampling
    /// ([`CTRL_MEAS_NORMAL`]) and read the calibration coefficients.
    pub fn power_on(&mut self) -> Result<(), Error<I::Error>> {
        self.write_reg(reg::CTRL_MEAS, CTRL_MEAS_NORMAL)?;
        self.calibration = Some(self.read_calibration()?);
        Ok(())
    }

    /// Like [`power_on`](Self::power_on), but with explicit ctrl_meas and
    /// config register values for non-default oversampling, standby time or
    /// IIR filter settings.
    pub fn power_on_with(&mut self, ctrl_meas: u8, config: u8) -> Result<(), Error<I::Error>> {
        self.write_reg(reg::CTRL_MEAS, ctrl_meas)?;
        self.write_reg(reg::CONFIG, config)?;
        self.calibration = Some(self.read_calibration()?);
        Ok(())
    }

    /// Put the sensor to sleep. The calibration is dropped as well, so the
    /// next use requires another [`power_on`](Self::power_on) - same as after
    /// an actual power loss.
    pub fn power_off(&mut self) -> Result<(), Error<I::Error>> {
        self.write_reg(reg::CTRL_MEAS, CTRL_MEAS_SLEEP)?;
        self.calibration = None;
        Ok(())
    }

    /// The calibration read at power-on, if any.
    pub fn calibration(&self) -> Option<&Calibration> {
        self.calibration.as_ref()
    }

    /// Temperature in degrees Celsius.
    pub fn temperature(&mut self) -> Result<f32, Error<I::Error>> {
        let t_fine = self.read_t_fine()?;
        Ok(temperature_from_t_fine(t_fine))
    }

    /// Pressure in hPa, rounded to two decimals.
    ///
    /// Pressure compensation needs the current `t_fine`, so this issues the
    /// temperature burst read as well. Returns exactly `0.0` if the
    /// compensation hits the divide-by-zero guard - that only happens with a
    /// corrupt calibration and is a defined sentinel, not an error.
    pub fn pressure(&mut self) -> Result<f32, Error<I::Error>> {
        let cal = self.calibration.ok_or(Error::NotCalibrated)?;
        let t_fine = self.read_t_fine()?;
        let adc_p = self.read_adc20(reg::PRESS_MSB)?;
        Ok(compensate_pressure(&cal, t_fine, adc_p))
    }

    /// Temperature and pressure in one pass, sharing a single `t_fine`
    /// computation (one temperature burst and one pressure burst total).
    pub fn measure(&mut self) -> Result<Measurement, Error<I::Error>> {
        let cal = self.calibration.ok_or(Error::NotCalibrated)?;
        let t_fine = self.read_t_fine()?;
        let adc_p = self.read_adc20(reg::PRESS_MSB)?;
        Ok(Measurement {
            temperature: temperature_from_t_fine(t_fine),
            pressure: compensate_pressure(&cal, t_fine, adc_p),
        })
    }

    /// Destroys this driver and releases the I2C bus `I`.
    pub fn release(self) -> I {
        self.i2c
    }

    fn write_reg(&mut self, register: u8, value: u8) -> Result<(), Error<I::Error>> {
        self.i2c
            .write(self.address, &[register, value])
            .map_err(Error::I2c)
    }

    /// One two-byte little-endian register-pair read.
    fn read_u16_le(&mut self, register: u8) -> Result<u16, Error<I::Error>> {
        let mut buffer = [0u8; 2];
        self.i2c
            .write_read(self.address, &[register], &mut buffer)
            .map_err(Error::I2c)?;
        Ok(u16::from_le_bytes(buffer))
    }

    /// Read the 12-coefficient calibration block, one register pair per
    /// round trip.
    fn read_calibration(&mut self) -> Result<Calibration, Error<I::Error>> {
        Ok(Calibration {
            t1: self.read_u16_le(reg::CALIB_T1)?,
            t2: self.read_u16_le(reg::CALIB_T2)? as i16,
            t3: self.read_u16_le(reg::CALIB_T3)? as i16,
            p1: self.read_u16_le(reg::CALIB_P1)?,
            p2: self.read_u16_le(reg::CALIB_P2)? as i16,
            p3: self.read_u16_le(reg::CALIB_P3)? as i16,
            p4: self.read_u16_le(reg::CALIB_P4)? as i16,
            p5: self.read_u16_le(reg::CALIB_P5)? as i16,
            p6: self.read_u16_le(reg::CALIB_P6)? as i16,
            p7: self.read_u16_le(reg::CALIB_P7)? as i16,
            p8: self.read_u16_le(reg::CALIB_P8)? as i16,
            p9: self.read_u16_le(reg::CALIB_P9)? as i16,
        })
    }

    /// Burst-read one 20-bit ADC value: msb, lsb, then the top nibble of
    /// xlsb.
    fn read_adc20(&mut self, register: u8) -> Result<u32, Error<I::Error>> {
        let mut buffer = [0u8; 3];
        self.i2c
            .write_read(self.address, &[register], &mut buffer)
            .map_err(Error::I2c)?;
        Ok(((buffer[0] as u32) << 12) | ((buffer[1] as u32) << 4) | ((buffer[2] as u32) >> 4))
    }

    /// Read the temperature ADC and compute `t_fine`, the fine-resolution
    /// temperature value both compensation formulas are based on.
    fn read_t_fine(&mut self) -> Result<i32, Error<I::Error>> {
        let cal = self.calibration.ok_or(Error::NotCalibrated)?;
        let adc_t = self.read_adc20(reg::TEMP_MSB)? as i32;
        Ok(t_fine(&cal, adc_t))
    }
}

/// Datasheet integer temperature compensation (section 3.11.3,
/// `bmp280_compensate_T_int32`), up to the `t_fine` intermediate.
fn t_fine(cal: &Calibration, adc_t: i32) -> i32 {
    let t1 = cal.t1 as i32;
    let var1 = (((adc_t >> 3) - (t1 << 1)) * (cal.t2 as i32)) >> 11;
    let var2 = (((((adc_t >> 4) - t1) * ((adc_t >> 4) - t1)) >> 12) * (cal.t3 as i32)) >> 14;
    var1 + var2
}

fn temperature_from_t_fine(t_fine: i32) -> f32 {
    (((t_fine * 5 + 128) >> 8) as f32) / 100.0
}

/// Pressure compensation (datasheet section 3.11.3), in float with the same
/// term structure and the same `var1 == 0` guard as the integer reference.
/// Result is hPa rounded to two decimals.
fn compensate_pressure(cal: &Calibration, t_fine: i32, adc_p: u32) -> f32 {
    let (p1, p2, p3) = (cal.p1 as f32, cal.p2 as f32, cal.p3 as f32);
    let (p4, p5, p6) = (cal.p4 as f32, cal.p5 as f32, cal.p6 as f32);
    let (p7, p8, p9) = (cal.p7 as f32, cal.p8 as f32, cal.p9 as f32);

    let mut var1 = (t_fine as f32) / 2.0 - 64000.0;
    let mut var2 = ((var1 / 4.0) * (var1 / 4.0) / 2048.0) * p6;
    var2 += var1 * p5 * 2.0;
    var2 = var2 / 4.0 + p4 * 65536.0;
    var1 = ((p3 * ((var1 / 4.0) * (var1 / 4.0) / 8192.0)) / 8.0 + (p2 * var1) / 2.0) / 262144.0;
    var1 = ((32768.0 + var1) * p1) / 32768.0;

    if var1 == 0.0 {
        // A sane calibration can never produce this; report the defined
        // invalid-calibration sentinel instead of dividing.
        return 0.0;
    }

    let mut p = 1048576.0 - adc_p as f32;
    p = (p - var2 / 4096.0) * 3125.0;
    p = p / var1 * 2.0;
    var1 = (p9 * ((p / 8.0) * (p / 8.0) / 8192.0)) / 4096.0;
    var2 = (p / 4.0) * p8 / 8192.0;
    p += (var1 + var2 + p7) / 16.0;

    // Pa rounded to a whole number, then hPa - two decimal places.
    libm::roundf(p) / 100.0
}
