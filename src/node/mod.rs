//! The node's control loop.
//!
//! One iteration, executed every `poll_interval_ms`:
//!
//! ```text
//! pump inbound ──► dispatch commands ──► maintain connection ──► sample gate
//!                                                                   │ fires
//!                                                                   ▼
//!                                            climate ──► light ──► distance
//!                                            (publish each reading on its topic)
//! ```
//!
//! Everything runs on one task. A sensor or publish failure is logged and the
//! loop carries on; the only blocking step is a bounded connect attempt.

pub mod dispatcher;
pub mod reconnect;
pub mod scheduler;

#[cfg(test)]
pub(crate) mod testing;

use chrono::{DateTime, Local};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::NodeConfig;
use crate::hardware::Hardware;
use crate::mqtt::config::TopicConfig;
use crate::mqtt::message_manager::OutboundMessage;
use crate::mqtt::mqtt_handler::{Transport, TransportError};
use dispatcher::CommandDispatcher;
use reconnect::{Backoff, MaintainOutcome, ReconnectManager};
use scheduler::{Millis, MonotonicClock, SampleClock};

/// Counters for the periodic statistics line.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NodeStats {
    pub samples: u64,
    pub published: u64,
    pub publish_failures: u64,
    pub climate_errors: u64,
    pub commands: u64,
    pub connects: u64,
    pub connect_failures: u64,
}

pub struct Node<T: Transport, H: Hardware> {
    transport: T,
    hardware: H,
    topics: TopicConfig,
    sampler: SampleClock,
    stats_gate: SampleClock,
    reconnect: ReconnectManager,
    dispatcher: CommandDispatcher,
    stats: NodeStats,
    poll_interval: Duration,
    sensor_warmup: Duration,
    started_at: DateTime<Local>,
}

impl<T: Transport, H: Hardware> Node<T, H> {
    pub fn new(config: &NodeConfig, transport: T, hardware: H) -> Self {
        debug!("Creating node with config: {:?}", config);
        let reconnect = ReconnectManager::new(
            config.broker.client_id_prefix.clone(),
            config.topics.command_topics(),
            Backoff::new(
                config.reconnect.initial_backoff_ms,
                config.reconnect.max_backoff_ms,
            ),
        );

        Self {
            transport,
            hardware,
            topics: config.topics.clone(),
            sampler: SampleClock::new(config.sampling.interval_ms),
            stats_gate: SampleClock::new(config.sampling.stats_interval_ms),
            reconnect,
            dispatcher: CommandDispatcher::new(&config.topics, config.commands.servo_parsing()),
            stats: NodeStats::default(),
            poll_interval: config.sampling.poll_interval(),
            sensor_warmup: config.sampling.sensor_warmup(),
            started_at: Local::now(),
        }
    }

    /// Rests the actuators, lets the climate sensor settle and runs its self-test.
    pub async fn boot(&mut self) {
        info!("Booting node");
        self.dispatcher.reset(&mut self.hardware);
        if !self.sensor_warmup.is_zero() {
            debug!("Waiting {:?} for the climate sensor", self.sensor_warmup);
            tokio::time::sleep(self.sensor_warmup).await;
        }
        self.self_test();
    }

    /// One-shot climate read. Returns whether the sensor answered.
    pub fn self_test(&mut self) -> bool {
        let reading = self.hardware.read_climate();
        if reading.is_valid() {
            info!(
                "Climate sensor OK: {:.2}°C, {:.2}%",
                reading.temperature, reading.humidity
            );
            true
        } else {
            warn!("Climate sensor did not answer, check wiring and the pull-up resistor");
            false
        }
    }

    /// One pass of the control loop at time `now`.
    pub async fn step(&mut self, now: Millis) {
        for message in self.transport.pump_incoming() {
            debug!("Inbound: {}", message);
            if self
                .dispatcher
                .on_message(&message.topic, &message.payload, &mut self.hardware)
                .is_some()
            {
                self.stats.commands += 1;
            }
        }

        match self.reconnect.maintain(&mut self.transport, now).await {
            MaintainOutcome::Connected { client_id } => {
                self.stats.connects += 1;
                debug!("Link up as {}, resuming publishes", client_id);
            }
            MaintainOutcome::Failed(e) => {
                self.stats.connect_failures += 1;
                debug!(
                    "Link still down (code {}, {} failed attempts)",
                    e.code(),
                    self.reconnect.failures()
                );
            }
            MaintainOutcome::AlreadyConnected | MaintainOutcome::Waiting => {}
        }

        if self.sampler.tick(now) {
            self.sample_and_publish();
        }

        if self.stats_gate.tick(now) {
            self.log_stats();
        }
    }

    /// Reads all three sensors and publishes every reading on its own topic.
    pub fn sample_and_publish(&mut self) {
        self.stats.samples += 1;

        let climate = self.hardware.read_climate();
        if climate.is_valid() {
            info!(
                "DHT → {:.2}°C, {:.2}%",
                climate.temperature, climate.humidity
            );
            self.publish(OutboundMessage::new(&self.topics.dht, climate.payload()));
        } else {
            self.stats.climate_errors += 1;
            warn!("Climate sensor read failed, skipping {}", self.topics.dht);
        }

        let light = self.hardware.read_light_level();
        info!("LDR → {}", light);
        self.publish(OutboundMessage::new(&self.topics.ldr, light.to_string()));

        let distance = self.hardware.read_distance();
        info!("Distance → {} cm", distance);
        self.publish(OutboundMessage::new(
            &self.topics.distance,
            distance.to_string(),
        ));
    }

    fn publish(&mut self, message: OutboundMessage) {
        match self.transport.publish(&message.topic, &message.payload) {
            Ok(()) => {
                self.stats.published += 1;
                debug!("Published {:?} to {}", message.payload, message.topic);
            }
            Err(TransportError::NotConnected) => {
                self.stats.publish_failures += 1;
                debug!("Not connected, dropped reading for {}", message.topic);
            }
            Err(e) => {
                self.stats.publish_failures += 1;
                warn!("Publish to {} failed: {}", message.topic, e);
            }
        }
    }

    fn log_stats(&self) {
        let s = &self.stats;
        info!(
            "Node stats since {}: {} samples, {} published, {} publish failures, {} climate errors, {} commands, {} connects, {} connect failures ({} attempts), link {:?}",
            self.started_at.format("%Y-%m-%d %H:%M:%S"),
            s.samples,
            s.published,
            s.publish_failures,
            s.climate_errors,
            s.commands,
            s.connects,
            s.connect_failures,
            self.reconnect.attempts(),
            self.transport.state()
        );
        let actuators = self.dispatcher.state();
        debug!(
            "Actuators: LED {}, servo {}°",
            if actuators.led { "ON" } else { "OFF" },
            actuators.servo_angle
        );
        if let Some(failure) = self.reconnect.last_failure() {
            debug!("Last connect failure (code {}): {}", failure.code(), failure);
        }
    }

    /// Runs the control loop until `shutdown` is cancelled, then rests the
    /// actuators and closes the session.
    pub async fn run(&mut self, clock: MonotonicClock, shutdown: CancellationToken) {
        info!(
            "Starting control loop: sampling every {} ms, polling every {:?}",
            self.sampler.interval(),
            self.poll_interval
        );

        while !shutdown.is_cancelled() {
            self.step(clock.now_millis()).await;
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        info!("Control loop stopped");
        self.shutdown();
    }

    pub fn shutdown(&mut self) {
        self.dispatcher.reset(&mut self.hardware);
        self.transport.disconnect();
        self.log_stats();
    }
}

#[cfg(test)]
impl<T: Transport, H: Hardware> Node<T, H> {
    pub fn actuator_state(&self) -> dispatcher::ActuatorState {
        self.dispatcher.state()
    }

    pub fn stats(&self) -> &NodeStats {
        &self.stats
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn hardware(&self) -> &H {
        &self.hardware
    }

    pub fn hardware_mut(&mut self) -> &mut H {
        &mut self.hardware
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::ClimateReading;
    use crate::mqtt::mqtt_handler::ConnectionState;
    use super::testing::{MockHardware, MockTransport};

    fn node(transport: MockTransport, hardware: MockHardware) -> Node<MockTransport, MockHardware> {
        let mut config = NodeConfig::default();
        config.sampling.sensor_warmup_ms = 0;
        Node::new(&config, transport, hardware)
    }

    #[tokio::test]
    async fn first_sample_is_published_one_interval_after_boot() {
        let mut node = node(MockTransport::default(), MockHardware::default());

        node.step(0).await;
        assert_eq!(node.transport().state(), ConnectionState::Connected);
        assert_eq!(node.transport().subscriptions, vec!["tp/led", "tp/servo"]);
        assert!(node.transport().published.is_empty());

        node.step(1999).await;
        assert!(node.transport().published.is_empty());

        node.step(2000).await;
        assert_eq!(
            node.transport().published,
            vec![
                ("tp/dht11".to_string(), "22.50,48.00".to_string()),
                ("tp/ldr".to_string(), "1234".to_string()),
                ("tp/distance".to_string(), "57".to_string()),
            ]
        );
        assert_eq!(node.hardware().reads, vec!["climate", "light", "distance"]);
    }

    #[tokio::test]
    async fn led_command_lands_before_the_next_sampling_pass() {
        let mut node = node(MockTransport::default(), MockHardware::default());
        node.step(0).await;
        node.step(2000).await;

        node.transport_mut().push_inbound("tp/led", "1");
        node.step(4000).await;

        assert_eq!(node.hardware().led, Some(true));
        assert!(node.actuator_state().led);
        assert_eq!(node.transport().published_on("tp/ldr").len(), 2);
        assert_eq!(node.stats().commands, 1);
    }

    #[tokio::test]
    async fn commands_are_handled_in_arrival_order() {
        let mut node = node(MockTransport::connected(), MockHardware::default());
        node.transport_mut().push_inbound("tp/servo", "30");
        node.transport_mut().push_inbound("tp/led", "on");
        node.transport_mut().push_inbound("tp/servo", "150");
        node.transport_mut().push_inbound("tp/unknown", "x");

        node.step(10).await;

        assert_eq!(node.actuator_state().servo_angle, 150);
        assert!(node.actuator_state().led);
        assert_eq!(node.stats().commands, 3);
    }

    #[tokio::test]
    async fn invalid_climate_reading_skips_only_its_topic() {
        let hardware = MockHardware {
            climate: ClimateReading::INVALID,
            ..MockHardware::default()
        };
        let mut node = node(MockTransport::connected(), hardware);

        node.step(2000).await;

        assert!(node.transport().published_on("tp/dht11").is_empty());
        assert_eq!(node.transport().published_on("tp/ldr"), vec!["1234"]);
        assert_eq!(node.transport().published_on("tp/distance"), vec!["57"]);
        assert_eq!(node.stats().climate_errors, 1);
    }

    #[tokio::test]
    async fn publish_failure_does_not_block_other_readings() {
        let mut transport = MockTransport::connected();
        transport.failing_publish_topics.push("tp/ldr".to_string());
        let mut node = node(transport, MockHardware::default());

        node.step(2000).await;

        assert_eq!(node.transport().published_on("tp/dht11").len(), 1);
        assert_eq!(node.transport().published_on("tp/distance").len(), 1);
        assert_eq!(node.stats().published, 2);
        assert_eq!(node.stats().publish_failures, 1);
    }

    #[tokio::test]
    async fn sampling_continues_while_the_broker_is_unreachable() {
        let mut transport = MockTransport::default();
        transport.fail_next_connects(10, TransportError::Timeout);
        let mut node = node(transport, MockHardware::default());

        node.step(0).await;
        node.step(2000).await;

        assert_eq!(node.transport().state(), ConnectionState::Disconnected);
        assert_eq!(node.stats().samples, 1);
        assert_eq!(node.stats().publish_failures, 3);
        assert_eq!(node.stats().connect_failures, 2);
        assert_eq!(node.hardware().reads.len(), 3);
    }

    #[tokio::test]
    async fn dropped_link_is_restored_on_the_next_iteration() {
        let mut node = node(MockTransport::default(), MockHardware::default());
        node.step(0).await;

        node.transport_mut().drop_link();
        node.step(50).await;

        assert_eq!(node.transport().state(), ConnectionState::Connected);
        assert_eq!(node.transport().connect_attempts.len(), 2);
        assert_eq!(node.stats().connects, 2);
    }

    #[tokio::test]
    async fn boot_rests_actuators_and_reports_self_test() {
        let mut node = node(MockTransport::default(), MockHardware::default());
        node.boot().await;
        assert_eq!(node.hardware().led, Some(false));
        assert_eq!(node.hardware().servo_angle, Some(0));

        node.hardware_mut().climate = ClimateReading::INVALID;
        assert!(!node.self_test());
    }

    #[tokio::test]
    async fn run_stops_on_cancellation_and_closes_the_session() {
        let mut node = node(MockTransport::default(), MockHardware::default());
        node.transport_mut().push_inbound("tp/led", "on");
        let shutdown = CancellationToken::new();

        let stopper = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            stopper.cancel();
        });
        node.run(MonotonicClock::new(), shutdown).await;

        assert_eq!(node.transport().state(), ConnectionState::Disconnected);
        assert_eq!(node.hardware().led, Some(false));
        assert_eq!(node.stats().commands, 1);
    }
}
