use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Broker endpoint and session settings.
///
/// The defaults point at the public HiveMQ broker on the plain MQTT port with
/// an anonymous session, which is what the node was originally deployed against.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    /// Every connection attempt appends a random hex suffix to this prefix.
    pub client_id_prefix: String,
    pub keep_alive_secs: u64,
    /// Upper bound for a single connect attempt, including the CONNACK wait.
    pub connect_timeout_ms: u64,
    /// Capacity of the rumqttc request queue.
    pub request_capacity: usize,
    /// Capacity of the inbound message channel between the session task and the control loop.
    pub inbound_capacity: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "broker.hivemq.com".to_string(),
            port: 1883,
            client_id_prefix: "sensornode-".to_string(),
            keep_alive_secs: 15,
            connect_timeout_ms: 5000,
            request_capacity: 10,
            inbound_capacity: 64,
        }
    }
}

impl BrokerConfig {
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Topic names, exact and case-sensitive.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct TopicConfig {
    /// Publish: `"<temp>,<humidity>"`
    pub dht: String,
    /// Publish: raw light level
    pub ldr: String,
    /// Publish: distance in centimeters
    pub distance: String,
    /// Subscribe: LED command
    pub led: String,
    /// Subscribe: servo angle command
    pub servo: String,
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            dht: "tp/dht11".to_string(),
            ldr: "tp/ldr".to_string(),
            distance: "tp/distance".to_string(),
            led: "tp/led".to_string(),
            servo: "tp/servo".to_string(),
        }
    }
}

impl TopicConfig {
    /// Topics the node subscribes to after every successful connect.
    pub fn command_topics(&self) -> Vec<String> {
        vec![self.led.clone(), self.servo.clone()]
    }

    /// All configured topics with their section key, used for validation.
    pub fn named(&self) -> [(&'static str, &str); 5] {
        [
            ("dht", &self.dht),
            ("ldr", &self.ldr),
            ("distance", &self.distance),
            ("led", &self.led),
            ("servo", &self.servo),
        ]
    }
}
