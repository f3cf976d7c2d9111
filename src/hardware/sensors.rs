//! Conversions between raw peripheral data and the values the node publishes.

use std::fs;
use std::path::Path;
use std::time::Duration;

use super::{ClimateReading, HardwareError};

const IIO_TEMPERATURE: &str = "in_temp_input";
const IIO_HUMIDITY: &str = "in_humidityrelative_input";

/// Speed of sound in centimeters per microsecond.
const SOUND_CM_PER_US: f64 = 0.034;

/// Reads one sample from the `dht11` IIO driver.
///
/// Both attributes are reported in milli-units. The driver returns an I/O error
/// (usually `EIO` or `ETIMEDOUT`) when the sensor did not answer, which happens
/// regularly on a busy system.
pub fn read_iio_climate(device_dir: &Path) -> Result<ClimateReading, HardwareError> {
    let temperature = read_milli_attribute(&device_dir.join(IIO_TEMPERATURE))?;
    let humidity = read_milli_attribute(&device_dir.join(IIO_HUMIDITY))?;
    Ok(ClimateReading {
        temperature,
        humidity,
    })
}

fn read_milli_attribute(path: &Path) -> Result<f32, HardwareError> {
    let raw = fs::read_to_string(path)?;
    parse_milli_value(&raw)
}

pub fn parse_milli_value(raw: &str) -> Result<f32, HardwareError> {
    raw.trim()
        .parse::<i64>()
        .map(|milli| milli as f32 / 1000.0)
        .map_err(|e| HardwareError::InvalidValue(format!("{:?}: {}", raw.trim(), e)))
}

/// Single-ended conversion request for one MCP3008 channel.
pub fn mcp3008_request(channel: u8) -> [u8; 3] {
    [0x01, 0x80 | ((channel & 0x07) << 4), 0x00]
}

/// Extracts the 10-bit result from the MCP3008 response frame.
pub fn mcp3008_decode(response: &[u8; 3]) -> u16 {
    (((response[1] & 0x03) as u16) << 8) | response[2] as u16
}

/// Round-trip echo time to distance, truncated to whole centimeters.
pub fn echo_to_centimeters(echo: Duration) -> i64 {
    (echo.as_micros() as f64 * SOUND_CM_PER_US / 2.0) as i64
}

/// Linear map of 0..=180 degrees onto the servo's pulse range.
pub fn servo_pulse_width(angle: u8, min_us: u64, max_us: u64) -> Duration {
    let angle = angle.min(180) as u64;
    let span = max_us.saturating_sub(min_us);
    Duration::from_micros(min_us + span * angle / 180)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn milli_values_are_scaled() {
        assert_eq!(parse_milli_value("23000\n").unwrap(), 23.0);
        assert_eq!(parse_milli_value("-1500").unwrap(), -1.5);
        assert!(parse_milli_value("").is_err());
        assert!(parse_milli_value("warm").is_err());
    }

    #[test]
    fn iio_directory_is_read() {
        let dir = std::env::temp_dir().join(format!("sensornode-iio-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(IIO_TEMPERATURE), "21500\n").unwrap();
        fs::write(dir.join(IIO_HUMIDITY), "40000\n").unwrap();

        let reading = read_iio_climate(&dir).unwrap();
        assert_eq!(reading.temperature, 21.5);
        assert_eq!(reading.humidity, 40.0);

        fs::remove_file(dir.join(IIO_HUMIDITY)).unwrap();
        assert!(matches!(
            read_iio_climate(&dir),
            Err(HardwareError::Io(_))
        ));
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn mcp3008_frames() {
        assert_eq!(mcp3008_request(0), [0x01, 0x80, 0x00]);
        assert_eq!(mcp3008_request(5), [0x01, 0xd0, 0x00]);
        assert_eq!(mcp3008_decode(&[0xff, 0x03, 0xff]), 1023);
        assert_eq!(mcp3008_decode(&[0x00, 0xfe, 0x10]), 0x210);
    }

    #[test]
    fn echo_time_converts_to_centimeters() {
        assert_eq!(echo_to_centimeters(Duration::ZERO), 0);
        assert_eq!(echo_to_centimeters(Duration::from_micros(588)), 9);
        assert_eq!(echo_to_centimeters(Duration::from_micros(5882)), 99);
    }

    #[test]
    fn servo_pulse_spans_configured_range() {
        assert_eq!(servo_pulse_width(0, 544, 2400), Duration::from_micros(544));
        assert_eq!(servo_pulse_width(90, 544, 2400), Duration::from_micros(1472));
        assert_eq!(servo_pulse_width(180, 544, 2400), Duration::from_micros(2400));
        assert_eq!(servo_pulse_width(255, 544, 2400), Duration::from_micros(2400));
    }
}
