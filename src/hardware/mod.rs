//! Hardware collaborators of the node.
//!
//! The control loop only sees the [`Sensors`] and [`Actuators`] traits. On a
//! Raspberry Pi both are implemented by [`board::Board`], which claims the pins
//! through rppal:
//!
//! ```text
//! DHT11 ──► Linux IIO (sysfs) ─┐
//! LDR ────► MCP3008 (SPI) ─────┼──► Board<Attached> ──► Sensors
//! HC-SR04 ► trigger/echo GPIO ─┘
//!
//! Actuators ──► Board<Attached> ──► LED GPIO
//!                                └► servo GPIO (software PWM)
//! ```

pub mod board;
pub mod sensors;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// One temperature/humidity sample. A failed read is reported as NaN.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClimateReading {
    /// Degrees Celsius
    pub temperature: f32,
    /// Relative humidity in percent
    pub humidity: f32,
}

impl ClimateReading {
    pub const INVALID: ClimateReading = ClimateReading {
        temperature: f32::NAN,
        humidity: f32::NAN,
    };

    pub fn is_valid(&self) -> bool {
        !self.temperature.is_nan() && !self.humidity.is_nan()
    }

    /// Telemetry payload, `"<temp>,<humidity>"` with two decimals each.
    pub fn payload(&self) -> String {
        format!("{:.2},{:.2}", self.temperature, self.humidity)
    }
}

pub trait Sensors {
    fn read_climate(&mut self) -> ClimateReading;

    /// Raw ADC value of the light-dependent resistor.
    fn read_light_level(&mut self) -> i32;

    /// Distance to the nearest obstacle in centimeters, 0 when no echo came back.
    fn read_distance(&mut self) -> i64;
}

pub trait Actuators {
    fn set_led(&mut self, on: bool) -> Result<(), HardwareError>;

    /// `angle` is already clamped to 0..=180 by the caller.
    fn set_servo_angle(&mut self, angle: u8) -> Result<(), HardwareError>;
}

/// Everything the node drives.
pub trait Hardware: Sensors + Actuators {}

impl<T: Sensors + Actuators> Hardware for T {}

#[derive(Debug, thiserror::Error)]
pub enum HardwareError {
    #[error("GPIO error: {0}")]
    Gpio(#[from] rppal::gpio::Error),

    #[error("SPI error: {0}")]
    Spi(#[from] rppal::spi::Error),

    #[error("Sensor I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid sensor value: {0}")]
    InvalidValue(String),

    #[error("Peripheral not attached: {0}")]
    NotAttached(&'static str),
}

/// Pin assignment and driver settings for the Raspberry Pi board.
///
/// GPIO numbers are BCM numbers.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct HardwareConfig {
    pub led_pin: u8,
    pub servo_pin: u8,
    pub trigger_pin: u8,
    pub echo_pin: u8,
    /// SPI bus (0 or 1) the MCP3008 is wired to
    pub spi_bus: u8,
    /// Chip select line on that bus
    pub spi_chip_select: u8,
    pub spi_clock_hz: u32,
    /// MCP3008 input channel of the light sensor (0..=7)
    pub ldr_channel: u8,
    /// IIO device directory of the `dht11` kernel driver
    pub dht_iio_path: PathBuf,
    pub servo_min_pulse_us: u64,
    pub servo_max_pulse_us: u64,
    pub servo_period_ms: u64,
    /// Longest echo wait before the distance read gives up with 0
    pub echo_timeout_ms: u64,
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            led_pin: 26,
            servo_pin: 18,
            trigger_pin: 5,
            echo_pin: 6,
            spi_bus: 0,
            spi_chip_select: 0,
            spi_clock_hz: 1_000_000,
            ldr_channel: 0,
            dht_iio_path: PathBuf::from("/sys/bus/iio/devices/iio:device0"),
            servo_min_pulse_us: 544,
            servo_max_pulse_us: 2400,
            servo_period_ms: 20,
            echo_timeout_ms: 38,
        }
    }
}

impl HardwareConfig {
    pub fn echo_timeout(&self) -> Duration {
        Duration::from_millis(self.echo_timeout_ms)
    }

    pub fn servo_period(&self) -> Duration {
        Duration::from_millis(self.servo_period_ms)
    }
}
