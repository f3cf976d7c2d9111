//! Raspberry Pi wiring of the node's sensors and actuators.
//!
//! The board is a two-state machine. `Board<Detached>` only knows its pin
//! assignment; `attach` claims every peripheral and returns `Board<Attached>`,
//! the only state that can read sensors or drive actuators.

use rppal::gpio::{Gpio, InputPin, OutputPin};
use rppal::spi::{Bus, Mode, SlaveSelect, Spi};
use statum::{machine, state};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::sensors::{
    echo_to_centimeters, mcp3008_decode, mcp3008_request, read_iio_climate, servo_pulse_width,
};
use super::{Actuators, ClimateReading, HardwareConfig, HardwareError, Sensors};

#[state]
#[derive(Debug, Clone)]
pub enum BoardState {
    Detached, // Pin numbers known, nothing claimed
    Attached, // GPIO and SPI handles owned
}

#[machine]
pub struct Board<S: BoardState> {
    config: HardwareConfig,
    led: Option<OutputPin>,
    servo: Option<OutputPin>,
    trigger: Option<OutputPin>,
    echo: Option<InputPin>,
    adc: Option<Spi>,
}

impl Board<Detached> {
    pub fn create(config: HardwareConfig) -> Self {
        debug!("Creating board with pin assignment: {:?}", config);
        Self::new(config, None, None, None, None, None)
    }

    /// Claims all peripherals, drives the outputs to their rest position and
    /// transitions to `Attached`.
    pub fn attach(mut self) -> Result<Board<Attached>, HardwareError> {
        info!(
            "Attaching board: LED=GPIO{}, servo=GPIO{}, trigger=GPIO{}, echo=GPIO{}",
            self.config.led_pin, self.config.servo_pin, self.config.trigger_pin, self.config.echo_pin
        );

        let gpio = Gpio::new()?;
        self.led = Some(gpio.get(self.config.led_pin)?.into_output_low());
        self.trigger = Some(gpio.get(self.config.trigger_pin)?.into_output_low());
        self.echo = Some(gpio.get(self.config.echo_pin)?.into_input());
        self.servo = Some(gpio.get(self.config.servo_pin)?.into_output_low());

        let bus = spi_bus(self.config.spi_bus)?;
        let chip_select = spi_chip_select(self.config.spi_chip_select)?;
        self.adc = Some(Spi::new(
            bus,
            chip_select,
            self.config.spi_clock_hz,
            Mode::Mode0,
        )?);
        debug!(
            "MCP3008 on {:?}/{:?} at {} Hz",
            bus, chip_select, self.config.spi_clock_hz
        );

        let mut attached: Board<Attached> = self.transition();
        attached.set_servo_angle(0)?;
        info!("Board attached, LED off and servo at 0°");
        Ok(attached)
    }
}

impl Board<Attached> {
    fn sample_adc(&mut self) -> Result<u16, HardwareError> {
        let channel = self.config.ldr_channel;
        let adc = self.adc.as_mut().ok_or(HardwareError::NotAttached("adc"))?;
        let request = mcp3008_request(channel);
        let mut response = [0u8; 3];
        adc.transfer(&mut response, &request)?;
        Ok(mcp3008_decode(&response))
    }

    /// Returns the echo pulse length, or `None` when the sensor never answered.
    fn measure_echo(&mut self) -> Result<Option<Duration>, HardwareError> {
        let timeout = self.config.echo_timeout();
        let trigger = self
            .trigger
            .as_mut()
            .ok_or(HardwareError::NotAttached("trigger"))?;
        let echo = self.echo.as_ref().ok_or(HardwareError::NotAttached("echo"))?;

        trigger.set_low();
        thread::sleep(Duration::from_micros(2));
        trigger.set_high();
        thread::sleep(Duration::from_micros(10));
        trigger.set_low();

        let waiting = Instant::now();
        while echo.is_low() {
            if waiting.elapsed() > timeout {
                return Ok(None);
            }
        }

        let rise = Instant::now();
        while echo.is_high() {
            if rise.elapsed() > timeout {
                return Ok(None);
            }
        }
        Ok(Some(rise.elapsed()))
    }
}

impl Sensors for Board<Attached> {
    fn read_climate(&mut self) -> ClimateReading {
        match read_iio_climate(&self.config.dht_iio_path) {
            Ok(reading) => reading,
            Err(e) => {
                debug!("DHT11 read failed: {}", e);
                ClimateReading::INVALID
            }
        }
    }

    fn read_light_level(&mut self) -> i32 {
        match self.sample_adc() {
            Ok(value) => value as i32,
            Err(e) => {
                warn!("Light sensor read failed: {}", e);
                0
            }
        }
    }

    fn read_distance(&mut self) -> i64 {
        match self.measure_echo() {
            Ok(Some(echo)) => echo_to_centimeters(echo),
            Ok(None) => {
                debug!("No echo within {} ms", self.config.echo_timeout_ms);
                0
            }
            Err(e) => {
                warn!("Distance measurement failed: {}", e);
                0
            }
        }
    }
}

impl Actuators for Board<Attached> {
    fn set_led(&mut self, on: bool) -> Result<(), HardwareError> {
        let led = self.led.as_mut().ok_or(HardwareError::NotAttached("led"))?;
        if on {
            led.set_high();
        } else {
            led.set_low();
        }
        Ok(())
    }

    fn set_servo_angle(&mut self, angle: u8) -> Result<(), HardwareError> {
        let pulse = servo_pulse_width(
            angle,
            self.config.servo_min_pulse_us,
            self.config.servo_max_pulse_us,
        );
        let period = self.config.servo_period();
        let servo = self
            .servo
            .as_mut()
            .ok_or(HardwareError::NotAttached("servo"))?;
        servo.set_pwm(period, pulse)?;
        Ok(())
    }
}

fn spi_bus(bus: u8) -> Result<Bus, HardwareError> {
    match bus {
        0 => Ok(Bus::Spi0),
        1 => Ok(Bus::Spi1),
        other => Err(HardwareError::InvalidValue(format!("unsupported SPI bus {other}"))),
    }
}

fn spi_chip_select(line: u8) -> Result<SlaveSelect, HardwareError> {
    match line {
        0 => Ok(SlaveSelect::Ss0),
        1 => Ok(SlaveSelect::Ss1),
        2 => Ok(SlaveSelect::Ss2),
        other => Err(HardwareError::InvalidValue(format!(
            "unsupported chip select {other}"
        ))),
    }
}
