//! Maps inbound command messages onto actuator calls.

use tracing::{debug, info, warn};

use crate::hardware::Actuators;
use crate::mqtt::config::TopicConfig;

pub const SERVO_MIN_ANGLE: i64 = 0;
pub const SERVO_MAX_ANGLE: i64 = 180;

/// Last value sent to each actuator.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ActuatorState {
    pub led: bool,
    pub servo_angle: u8,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    Led(bool),
    Servo(u8),
}

/// How servo payloads that are not a number are treated.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ServoParsing {
    /// Leading integer or 0, then clamped. `"abc"` moves the servo to 0°.
    #[default]
    Lenient,
    /// Payloads without a leading integer are dropped with a warning.
    Strict,
}

pub struct CommandDispatcher {
    led_topic: String,
    servo_topic: String,
    servo_parsing: ServoParsing,
    state: ActuatorState,
}

impl CommandDispatcher {
    pub fn new(topics: &TopicConfig, servo_parsing: ServoParsing) -> Self {
        Self {
            led_topic: topics.led.clone(),
            servo_topic: topics.servo.clone(),
            servo_parsing,
            state: ActuatorState::default(),
        }
    }

    pub fn state(&self) -> ActuatorState {
        self.state
    }

    /// Interprets one message. Unknown topics and rejected payloads yield `None`.
    pub fn parse(&self, topic: &str, payload: &[u8]) -> Option<Command> {
        let text = String::from_utf8_lossy(payload).trim().to_lowercase();

        if topic == self.led_topic {
            let on = matches!(text.as_str(), "on" | "true" | "1");
            return Some(Command::Led(on));
        }

        if topic == self.servo_topic {
            let degrees = match (leading_integer(&text), self.servo_parsing) {
                (Some(value), _) => value,
                (None, ServoParsing::Lenient) => 0,
                (None, ServoParsing::Strict) => {
                    warn!("Rejected servo payload {:?}: not a number", text);
                    return None;
                }
            };
            let angle = degrees.clamp(SERVO_MIN_ANGLE, SERVO_MAX_ANGLE) as u8;
            return Some(Command::Servo(angle));
        }

        None
    }

    /// Handles one inbound message to completion before returning.
    pub fn on_message<A: Actuators + ?Sized>(
        &mut self,
        topic: &str,
        payload: &[u8],
        actuators: &mut A,
    ) -> Option<Command> {
        debug!(
            "Message on {}: {:?}",
            topic,
            String::from_utf8_lossy(payload)
        );

        let Some(command) = self.parse(topic, payload) else {
            if topic != self.led_topic && topic != self.servo_topic {
                debug!("Ignoring message on unknown topic {}", topic);
            }
            return None;
        };

        match command {
            Command::Led(on) => {
                self.state.led = on;
                match actuators.set_led(on) {
                    Ok(()) => info!("LED → {}", if on { "ON" } else { "OFF" }),
                    Err(e) => warn!("Failed to switch LED: {}", e),
                }
            }
            Command::Servo(angle) => {
                self.state.servo_angle = angle;
                match actuators.set_servo_angle(angle) {
                    Ok(()) => info!("Servo moved to {}°", angle),
                    Err(e) => warn!("Failed to move servo: {}", e),
                }
            }
        }
        Some(command)
    }

    /// Drives both actuators to their rest position (LED off, servo at 0°).
    pub fn reset<A: Actuators + ?Sized>(&mut self, actuators: &mut A) {
        self.state = ActuatorState::default();
        if let Err(e) = actuators.set_led(false) {
            warn!("Failed to switch LED off: {}", e);
        }
        if let Err(e) = actuators.set_servo_angle(0) {
            warn!("Failed to move servo to rest: {}", e);
        }
    }
}

/// Leading decimal integer of `text`, the way a permissive `toInt` reads it.
///
/// Leading whitespace and one sign are accepted, parsing stops at the first
/// non-digit, and values beyond `i64` saturate. `None` when no digit follows.
pub fn leading_integer(text: &str) -> Option<i64> {
    let rest = text.trim_start();
    let (negative, digits) = match rest.as_bytes().first() {
        Some(b'-') => (true, &rest[1..]),
        Some(b'+') => (false, &rest[1..]),
        _ => (false, rest),
    };

    let mut value: i64 = 0;
    let mut seen_digit = false;
    for byte in digits.bytes() {
        if !byte.is_ascii_digit() {
            break;
        }
        seen_digit = true;
        let digit = (byte - b'0') as i64;
        value = if negative {
            value.saturating_mul(10).saturating_sub(digit)
        } else {
            value.saturating_mul(10).saturating_add(digit)
        };
    }

    seen_digit.then_some(value)
}
