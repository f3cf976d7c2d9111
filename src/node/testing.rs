//! In-memory transport and hardware that record every call.

use std::collections::VecDeque;

use crate::hardware::{Actuators, ClimateReading, HardwareError, Sensors};
use crate::mqtt::message_manager::InboundMessage;
use crate::mqtt::mqtt_handler::{ConnectionState, Transport, TransportError};

#[derive(Default)]
pub struct MockTransport {
    pub state: ConnectionState,
    pub connect_attempts: Vec<String>,
    pub subscriptions: Vec<String>,
    pub published: Vec<(String, String)>,
    pub inbound: VecDeque<InboundMessage>,
    pub connect_failures: VecDeque<TransportError>,
    pub failing_publish_topics: Vec<String>,
}

impl MockTransport {
    pub fn connected() -> Self {
        Self {
            state: ConnectionState::Connected,
            ..Self::default()
        }
    }

    pub fn fail_next_connects(&mut self, count: usize, error: TransportError) {
        for _ in 0..count {
            self.connect_failures.push_back(error.clone());
        }
    }

    pub fn drop_link(&mut self) {
        self.state = ConnectionState::Disconnected;
    }

    pub fn push_inbound(&mut self, topic: &str, payload: &str) {
        self.inbound
            .push_back(InboundMessage::from_topic(topic, payload));
    }

    pub fn published_on(&self, topic: &str) -> Vec<String> {
        self.published
            .iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, payload)| payload.clone())
            .collect()
    }
}

impl Transport for MockTransport {
    fn state(&self) -> ConnectionState {
        self.state
    }

    async fn connect(&mut self, client_id: &str) -> Result<(), TransportError> {
        self.connect_attempts.push(client_id.to_string());
        match self.connect_failures.pop_front() {
            Some(error) => {
                self.state = ConnectionState::Disconnected;
                Err(error)
            }
            None => {
                self.state = ConnectionState::Connected;
                Ok(())
            }
        }
    }

    fn subscribe(&mut self, topic: &str) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        self.subscriptions.push(topic.to_string());
        Ok(())
    }

    fn publish(&mut self, topic: &str, payload: &str) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        if self.failing_publish_topics.iter().any(|t| t == topic) {
            return Err(TransportError::Request("queue full".to_string()));
        }
        self.published.push((topic.to_string(), payload.to_string()));
        Ok(())
    }

    fn pump_incoming(&mut self) -> Vec<InboundMessage> {
        self.inbound.drain(..).collect()
    }

    fn disconnect(&mut self) {
        self.state = ConnectionState::Disconnected;
    }
}

pub struct MockHardware {
    pub climate: ClimateReading,
    pub light: i32,
    pub distance: i64,
    pub led: Option<bool>,
    pub servo_angle: Option<u8>,
    pub fail_actuators: bool,
    pub reads: Vec<&'static str>,
}

impl Default for MockHardware {
    fn default() -> Self {
        Self {
            climate: ClimateReading {
                temperature: 22.5,
                humidity: 48.0,
            },
            light: 1234,
            distance: 57,
            led: None,
            servo_angle: None,
            fail_actuators: false,
            reads: Vec::new(),
        }
    }
}

impl Sensors for MockHardware {
    fn read_climate(&mut self) -> ClimateReading {
        self.reads.push("climate");
        self.climate
    }

    fn read_light_level(&mut self) -> i32 {
        self.reads.push("light");
        self.light
    }

    fn read_distance(&mut self) -> i64 {
        self.reads.push("distance");
        self.distance
    }
}

impl Actuators for MockHardware {
    fn set_led(&mut self, on: bool) -> Result<(), HardwareError> {
        if self.fail_actuators {
            return Err(HardwareError::NotAttached("led"));
        }
        self.led = Some(on);
        Ok(())
    }

    fn set_servo_angle(&mut self, angle: u8) -> Result<(), HardwareError> {
        if self.fail_actuators {
            return Err(HardwareError::NotAttached("servo"));
        }
        self.servo_angle = Some(angle);
        Ok(())
    }
}
