//! Reconnection manager: keeps the broker session alive from inside the control loop.

use tracing::{debug, info, warn};

use super::scheduler::Millis;
use crate::mqtt::mqtt_handler::{Transport, TransportError};

/// Capped exponential delay between failed connection attempts.
///
/// The first attempt after a disconnect is never delayed. Each consecutive
/// failure doubles the wait, starting from `initial` and saturating at `max`.
/// An `initial` of zero retries on every loop iteration.
#[derive(Clone, Debug)]
pub struct Backoff {
    initial: Millis,
    max: Millis,
    current: Millis,
    armed_at: Option<Millis>,
}

impl Backoff {
    pub fn new(initial: Millis, max: Millis) -> Self {
        Self {
            initial,
            max: max.max(initial),
            current: 0,
            armed_at: None,
        }
    }

    pub fn ready(&self, now: Millis) -> bool {
        match self.armed_at {
            None => true,
            Some(armed_at) => now.wrapping_sub(armed_at) >= self.current,
        }
    }

    pub fn record_failure(&mut self, now: Millis) {
        self.current = if self.armed_at.is_none() {
            self.initial
        } else {
            self.current.saturating_mul(2).clamp(self.initial, self.max)
        };
        self.armed_at = Some(now);
    }

    pub fn reset(&mut self) {
        self.current = 0;
        self.armed_at = None;
    }

    /// Delay that has to pass before the next attempt, 0 when not armed.
    pub fn current_delay(&self) -> Millis {
        self.current
    }
}

/// What a single `maintain` call did.
#[derive(Clone, Debug, PartialEq)]
pub enum MaintainOutcome {
    AlreadyConnected,
    /// Disconnected, but the backoff delay has not passed yet.
    Waiting,
    Connected { client_id: String },
    Failed(TransportError),
}

#[derive(Clone, Debug)]
pub struct ReconnectManager {
    client_id_prefix: String,
    command_topics: Vec<String>,
    backoff: Backoff,
    attempts: u64,
    failures: u64,
    last_failure: Option<TransportError>,
}

impl ReconnectManager {
    pub fn new(client_id_prefix: String, command_topics: Vec<String>, backoff: Backoff) -> Self {
        Self {
            client_id_prefix,
            command_topics,
            backoff,
            attempts: 0,
            failures: 0,
            last_failure: None,
        }
    }

    /// Makes at most one connection attempt when the transport is down.
    ///
    /// After a successful connect every command topic is subscribed once. A
    /// failure is logged and remembered, never returned as an error.
    pub async fn maintain<T: Transport>(&mut self, transport: &mut T, now: Millis) -> MaintainOutcome {
        if transport.is_connected() {
            return MaintainOutcome::AlreadyConnected;
        }
        if !self.backoff.ready(now) {
            return MaintainOutcome::Waiting;
        }

        let client_id = self.next_client_id();
        self.attempts += 1;
        info!("Connecting to MQTT broker as {}", client_id);

        match transport.connect(&client_id).await {
            Ok(()) => {
                self.backoff.reset();
                info!("MQTT connected");
                for topic in &self.command_topics {
                    match transport.subscribe(topic) {
                        Ok(()) => debug!("Subscribed to {}", topic),
                        Err(e) => warn!("Subscribe to {} failed: {}", topic, e),
                    }
                }
                info!("Subscribed to {} command topics", self.command_topics.len());
                MaintainOutcome::Connected { client_id }
            }
            Err(e) => {
                self.failures += 1;
                self.backoff.record_failure(now);
                warn!(
                    "MQTT connect failed, code {}: {} (next attempt in {} ms)",
                    e.code(),
                    e,
                    self.backoff.current_delay()
                );
                self.last_failure = Some(e.clone());
                MaintainOutcome::Failed(e)
            }
        }
    }

    /// `<prefix><hex>`, with a fresh random suffix per attempt.
    pub fn next_client_id(&self) -> String {
        let suffix = rand::random::<u16>() % 0xffff;
        format!("{}{:x}", self.client_id_prefix, suffix)
    }

    pub fn attempts(&self) -> u64 {
        self.attempts
    }

    pub fn failures(&self) -> u64 {
        self.failures
    }

    pub fn last_failure(&self) -> Option<&TransportError> {
        self.last_failure.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mqtt::mqtt_handler::ConnectionState;
    use crate::node::testing::MockTransport;

    fn manager(backoff: Backoff) -> ReconnectManager {
        ReconnectManager::new(
            "sensornode-".to_string(),
            vec!["tp/led".to_string(), "tp/servo".to_string()],
            backoff,
        )
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let mut backoff = Backoff::new(500, 3000);
        assert!(backoff.ready(0));

        backoff.record_failure(0);
        assert_eq!(backoff.current_delay(), 500);
        assert!(!backoff.ready(499));
        assert!(backoff.ready(500));

        backoff.record_failure(500);
        assert_eq!(backoff.current_delay(), 1000);
        backoff.record_failure(1500);
        assert_eq!(backoff.current_delay(), 2000);
        backoff.record_failure(3500);
        assert_eq!(backoff.current_delay(), 3000);
        backoff.record_failure(6500);
        assert_eq!(backoff.current_delay(), 3000);

        backoff.reset();
        assert!(backoff.ready(6501));
        assert_eq!(backoff.current_delay(), 0);
    }

    #[test]
    fn zero_backoff_retries_every_iteration() {
        let mut backoff = Backoff::new(0, 0);
        backoff.record_failure(10);
        assert!(backoff.ready(10));
        backoff.record_failure(10);
        assert!(backoff.ready(10));
    }

    #[test]
    fn backoff_handles_clock_wraparound() {
        let mut backoff = Backoff::new(1000, 1000);
        backoff.record_failure(u32::MAX - 100);
        assert!(!backoff.ready(u32::MAX));
        assert!(!backoff.ready(800));
        assert!(backoff.ready(899));
    }

    #[test]
    fn client_ids_carry_prefix_and_hex_suffix() {
        let manager = manager(Backoff::new(0, 0));
        let id = manager.next_client_id();
        let suffix = id.strip_prefix("sensornode-").unwrap();
        assert!(!suffix.is_empty() && suffix.len() <= 4);
        assert!(u16::from_str_radix(suffix, 16).is_ok());
    }

    #[tokio::test]
    async fn connected_transport_is_left_alone() {
        let mut transport = MockTransport::connected();
        let mut manager = manager(Backoff::new(0, 0));

        let outcome = manager.maintain(&mut transport, 0).await;

        assert_eq!(outcome, MaintainOutcome::AlreadyConnected);
        assert!(transport.connect_attempts.is_empty());
        assert!(transport.subscriptions.is_empty());
    }

    #[tokio::test]
    async fn failing_connect_stays_disconnected() {
        let mut transport = MockTransport::default();
        transport.fail_next_connects(1, TransportError::Timeout);
        let mut manager = manager(Backoff::new(0, 0));

        let outcome = manager.maintain(&mut transport, 0).await;

        assert_eq!(outcome, MaintainOutcome::Failed(TransportError::Timeout));
        assert_eq!(transport.state(), ConnectionState::Disconnected);
        assert!(transport.subscriptions.is_empty());
        assert_eq!(manager.failures(), 1);
        assert_eq!(manager.last_failure(), Some(&TransportError::Timeout));
    }

    #[tokio::test]
    async fn successful_connect_subscribes_each_command_topic_once() {
        let mut transport = MockTransport::default();
        let mut manager = manager(Backoff::new(0, 0));

        let outcome = manager.maintain(&mut transport, 0).await;

        assert!(matches!(outcome, MaintainOutcome::Connected { .. }));
        assert_eq!(transport.state(), ConnectionState::Connected);
        assert_eq!(transport.subscriptions, vec!["tp/led", "tp/servo"]);

        // Nothing more happens while the session stays up.
        manager.maintain(&mut transport, 10).await;
        assert_eq!(transport.subscriptions.len(), 2);
    }

    #[tokio::test]
    async fn reconnect_resubscribes_with_a_new_client_id() {
        let mut transport = MockTransport::default();
        let mut manager = manager(Backoff::new(0, 0));
        manager.maintain(&mut transport, 0).await;

        transport.drop_link();
        manager.maintain(&mut transport, 100).await;

        assert_eq!(transport.connect_attempts.len(), 2);
        assert_eq!(
            transport.subscriptions,
            vec!["tp/led", "tp/servo", "tp/led", "tp/servo"]
        );
    }

    #[tokio::test]
    async fn backoff_gates_attempts_after_failures() {
        let mut transport = MockTransport::default();
        transport.fail_next_connects(2, TransportError::ConnectFailed("refused".into()));
        let mut manager = manager(Backoff::new(1000, 8000));

        assert!(matches!(
            manager.maintain(&mut transport, 0).await,
            MaintainOutcome::Failed(_)
        ));
        assert_eq!(
            manager.maintain(&mut transport, 500).await,
            MaintainOutcome::Waiting
        );
        assert!(matches!(
            manager.maintain(&mut transport, 1000).await,
            MaintainOutcome::Failed(_)
        ));
        assert_eq!(
            manager.maintain(&mut transport, 2999).await,
            MaintainOutcome::Waiting
        );
        assert!(matches!(
            manager.maintain(&mut transport, 3000).await,
            MaintainOutcome::Connected { .. }
        ));
        assert_eq!(transport.connect_attempts.len(), 3);
        assert_eq!(manager.attempts(), 3);
    }
}
