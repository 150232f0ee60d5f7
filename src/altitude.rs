//! Barometric altitude estimation.

/// Standard sea-level pressure in hPa.
pub const SEA_LEVEL_HPA: f32 = 1013.25;

/// Estimate altitude in meters from a calibrated pressure, using the
/// international barometric formula:
///
/// `44330 * (1 - (p / p0)^0.1903)`
///
/// `sea_level_hpa` is the reference pressure at sea level, usually
/// [`SEA_LEVEL_HPA`] unless a local QNH is available. Pure function, no I/O.
///
/// Both arguments must be positive for the power law to be meaningful; a
/// negative pressure produces NaN (never a panic). Validation belongs to the
/// caller, who knows whether the pressure came from a healthy sensor - in
/// particular, the BMP280 driver's divide-by-zero sentinel of 0 hPa must not
/// be fed in here.
pub fn estimate_altitude(pressure_hpa: f32, sea_level_hpa: f32) -> f32 {
    44330.0 * (1.0 - libm::powf(pressure_hpa / sea_level_hpa, 0.1903))
}
