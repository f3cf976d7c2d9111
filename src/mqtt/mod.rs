//! # MQTT Integration Module
//!
//! Connects the node to its publish/subscribe broker. Telemetry leaves through
//! [`mqtt_handler::Transport::publish`], commands arrive through
//! [`mqtt_handler::Transport::pump_incoming`].
//!
//! ## Module Architecture
//!
//! ```text
//! mqtt/
//! ├── config.rs           - Broker endpoint and topic names
//! ├── message_manager.rs  - Inbound/outbound message representation
//! └── mqtt_handler.rs     - Transport trait and the rumqttc session
//! ```
//!
//! ## Session Model
//!
//! - **One session per connect attempt**: a fresh client id and event loop every time,
//!   so a half-dead session never leaks into the next attempt
//! - **No hidden reconnects**: the session task exits when the link drops and the
//!   node's reconnection manager owns the retry policy
//! - **Ordered inbound delivery**: inbound publishes cross a single-consumer channel
//!   and are drained by the control loop in arrival order
//! - **QoS 0 everywhere**: telemetry is best effort, a lost reading is replaced two
//!   seconds later

pub mod config;
pub mod message_manager;
pub mod mqtt_handler;
