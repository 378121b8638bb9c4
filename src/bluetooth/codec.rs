/// Decoding of the Xiaomi thermometer notification payload
use log::warn;

use crate::error::CodecError;
use crate::models::{RawReading, Reading};
use crate::utils::round_to;

const PAYLOAD_LEN: usize = 5; // Minimum notification length
const BATTERY_EMPTY_VOLTS: f64 = 2.1; // Voltage reported as 0% battery

/// Split a notification payload into its raw little-endian fields
///
/// Payload layout:
/// - Bytes 0-1: Temperature (signed 16-bit, 0.01°C resolution)
/// - Byte 2: Relative humidity (unsigned 8-bit, 1% resolution)
/// - Bytes 3-4: Battery voltage (unsigned 16-bit, millivolts)
///
/// Any trailing bytes are ignored.
pub fn decode_raw(data: &[u8]) -> Result<RawReading, CodecError> {
    if data.len() < PAYLOAD_LEN {
        warn!("Short notification payload: len={}", data.len());
        return Err(CodecError::MalformedPayload { len: data.len() });
    }

    Ok(RawReading {
        temperature_centi_degrees: i16::from_le_bytes([data[0], data[1]]),
        humidity_percent: data[2],
        battery_millivolts: u16::from_le_bytes([data[3], data[4]]),
    })
}

/// Convert raw fields into a [`Reading`]
///
/// Temperature is rounded to one decimal. Battery percentage is derived from
/// the voltage above 2.1 V and clamped to 0..=100. Halves round to even.
/// Humidity is passed through unclamped; see [`is_plausible`] for the
/// validation applied by the poller.
pub fn to_reading(raw: &RawReading) -> Reading {
    let temperature = (raw.temperature_centi_degrees as f64 / 10.0).round_ties_even() / 10.0;

    let voltage = raw.battery_millivolts as f64 / 1000.0;
    let battery = round_to((voltage - BATTERY_EMPTY_VOLTS) * 100.0, 0).clamp(0.0, 100.0) as u8;

    Reading::new(temperature, raw.humidity_percent, battery)
}

/// Decode a notification payload into a [`Reading`]
pub fn decode(data: &[u8]) -> Result<Reading, CodecError> {
    Ok(to_reading(&decode_raw(data)?))
}

/// Whether a notification looks like a real measurement
///
/// Humidity above 100% or a raw temperature of exactly zero indicate a
/// corrupted notification. Small temperatures that round to 0.0 are fine.
pub fn is_plausible(raw: &RawReading) -> bool {
    raw.humidity_percent <= 100 && raw.temperature_centi_degrees != 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_little_endian_fields() {
        // 23.20°C, 45%, 3000 mV
        let reading = decode(&[0x10, 0x09, 0x2D, 0xB8, 0x0B]).unwrap();
        assert_eq!(reading.temperature, 23.2);
        assert_eq!(reading.humidity, 45);
        assert_eq!(reading.battery, 90);
        assert_eq!(reading.average, None);
    }

    #[test]
    fn small_positive_temperature() {
        let reading = decode(&[0x10, 0x00, 0x20, 0x7D, 0x0A]).unwrap();
        assert_eq!(reading.temperature, 0.2);
        assert_eq!(reading.humidity, 32);
        // 2685 mV lands exactly on 58.5%, which rounds to even
        assert_eq!(reading.battery, 58);
    }

    #[test]
    fn negative_temperature() {
        // -5.12°C
        let reading = decode(&[0x00, 0xFE, 0x30, 0xB8, 0x0B]).unwrap();
        assert_eq!(reading.temperature, -5.1);
        assert!(reading.temperature < 0.0);
    }

    #[test]
    fn battery_is_clamped() {
        // 3300 mV would be 120%
        let full = decode(&[0x10, 0x09, 0x2D, 0xE4, 0x0C]).unwrap();
        assert_eq!(full.battery, 100);

        // 2000 mV would be -10%
        let empty = decode(&[0x10, 0x09, 0x2D, 0xD0, 0x07]).unwrap();
        assert_eq!(empty.battery, 0);
    }

    #[test]
    fn trailing_bytes_are_ignored() {
        let short = decode(&[0x10, 0x09, 0x2D, 0xB8, 0x0B]).unwrap();
        let long = decode(&[0x10, 0x09, 0x2D, 0xB8, 0x0B, 0xFF, 0xFF]).unwrap();
        assert_eq!(short, long);
    }

    #[test]
    fn short_payload_is_malformed() {
        assert_eq!(
            decode(&[0x10, 0x09, 0x2D, 0xB8]),
            Err(CodecError::MalformedPayload { len: 4 })
        );
        assert_eq!(decode(&[]), Err(CodecError::MalformedPayload { len: 0 }));
    }

    #[test]
    fn raw_fields() {
        let raw = decode_raw(&[0x00, 0xFE, 0x65, 0x7D, 0x0A]).unwrap();
        assert_eq!(raw.temperature_centi_degrees, -512);
        assert_eq!(raw.humidity_percent, 101);
        assert_eq!(raw.battery_millivolts, 2685);
    }

    #[test]
    fn implausible_readings_are_flagged() {
        let wet = decode_raw(&[0x10, 0x09, 0x65, 0xB8, 0x0B]).unwrap();
        assert_eq!(wet.humidity_percent, 101);
        assert!(!is_plausible(&wet));

        let zero = decode_raw(&[0x00, 0x00, 0x2D, 0xB8, 0x0B]).unwrap();
        assert!(!is_plausible(&zero));

        let fine = decode_raw(&[0x10, 0x09, 0x2D, 0xB8, 0x0B]).unwrap();
        assert!(is_plausible(&fine));
    }

    #[test]
    fn near_zero_temperature_is_plausible() {
        // 0.03°C rounds to 0.0 but is a real reading
        let raw = decode_raw(&[0x03, 0x00, 0x2D, 0xB8, 0x0B]).unwrap();
        assert_eq!(raw.temperature_centi_degrees, 3);
        assert!(is_plausible(&raw));
        assert_eq!(to_reading(&raw).temperature, 0.0);

        let frosty = decode_raw(&[0xFC, 0xFF, 0x2D, 0xB8, 0x0B]).unwrap();
        assert_eq!(frosty.temperature_centi_degrees, -4);
        assert!(is_plausible(&frosty));
    }

    #[test]
    fn temperature_halves_round_to_even() {
        // 23.25°C and 23.35°C
        assert_eq!(decode(&[0x15, 0x09, 0x2D, 0xB8, 0x0B]).unwrap().temperature, 23.2);
        assert_eq!(decode(&[0x1F, 0x09, 0x2D, 0xB8, 0x0B]).unwrap().temperature, 23.4);
    }

    #[test]
    fn decoding_is_deterministic() {
        let payload = [0x4D, 0x08, 0x37, 0x9C, 0x0B];
        let first = decode(&payload).unwrap();
        let second = decode(&payload).unwrap();
        assert_eq!(first.temperature.to_bits(), second.temperature.to_bits());
        assert_eq!(first, second);
    }
}
