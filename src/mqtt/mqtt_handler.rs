//! Transport session on top of rumqttc.
//!
//! Every connect attempt builds a fresh `AsyncClient`/`EventLoop` pair with the
//! client id chosen by the caller. The event loop is driven by its own tokio task
//! which reports the link status over a `watch` channel and forwards inbound
//! publishes into a single-consumer `mpsc` channel. The control loop drains that
//! channel with [`Transport::pump_incoming`], so commands are handled one at a
//! time and in arrival order.
//!
//! The session task never reconnects on its own. When the link drops it records
//! why and exits; the reconnection manager decides when to try again.

use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions, Outgoing,
    Packet, QoS,
};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::config::BrokerConfig;
use super::message_manager::InboundMessage;

#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransportError {
    #[error("Broker refused the connection: {0:?}")]
    Refused(ConnectReturnCode),

    #[error("Timed out waiting for the broker")]
    Timeout,

    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    #[error("Connect failed: {0}")]
    ConnectFailed(String),

    #[error("Not connected")]
    NotConnected,

    #[error("Request rejected by client: {0}")]
    Request(String),
}

impl TransportError {
    /// Numeric diagnostic code in the classic MQTT client state numbering.
    pub fn code(&self) -> i32 {
        match self {
            TransportError::Timeout => -4,
            TransportError::ConnectionLost(_) => -3,
            TransportError::ConnectFailed(_) | TransportError::Request(_) => -2,
            TransportError::NotConnected => -1,
            TransportError::Refused(code) => match code {
                ConnectReturnCode::Success => 0,
                ConnectReturnCode::RefusedProtocolVersion => 1,
                ConnectReturnCode::BadClientId => 2,
                ConnectReturnCode::ServiceUnavailable => 3,
                ConnectReturnCode::BadUserNamePassword => 4,
                ConnectReturnCode::NotAuthorized => 5,
            },
        }
    }

    fn from_connection_error(err: &ConnectionError, was_connected: bool) -> Self {
        match err {
            ConnectionError::ConnectionRefused(code) => TransportError::Refused(*code),
            ConnectionError::NetworkTimeout => TransportError::Timeout,
            other if was_connected => TransportError::ConnectionLost(other.to_string()),
            other => TransportError::ConnectFailed(other.to_string()),
        }
    }
}

/// The publish/subscribe session used by the node.
///
/// `connect` may block for a bounded time; every other method returns immediately.
#[allow(async_fn_in_trait)]
pub trait Transport {
    fn state(&self) -> ConnectionState;

    fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Opens a new session, replacing any previous one.
    async fn connect(&mut self, client_id: &str) -> Result<(), TransportError>;

    fn subscribe(&mut self, topic: &str) -> Result<(), TransportError>;

    fn publish(&mut self, topic: &str, payload: &str) -> Result<(), TransportError>;

    /// Drains every inbound message queued since the last call, oldest first.
    fn pump_incoming(&mut self) -> Vec<InboundMessage>;

    fn disconnect(&mut self);
}

#[derive(Clone, Debug)]
enum LinkStatus {
    Connecting,
    Connected,
    Closed(TransportError),
}

struct Session {
    client: AsyncClient,
    status: watch::Receiver<LinkStatus>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl Session {
    fn shutdown(self) {
        if let Err(e) = self.client.try_disconnect() {
            debug!("Disconnect request not queued: {}", e);
        }
        self.cancel.cancel();
        debug!("Session task stopping (finished: {})", self.task.is_finished());
    }
}

pub struct MqttTransport {
    config: BrokerConfig,
    session: Option<Session>,
    inbound_tx: mpsc::Sender<InboundMessage>,
    inbound_rx: mpsc::Receiver<InboundMessage>,
}

impl MqttTransport {
    pub fn new(config: BrokerConfig) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(config.inbound_capacity.max(1));
        info!(
            "MQTT transport targeting {}:{} (connect timeout {} ms)",
            config.host, config.port, config.connect_timeout_ms
        );
        Self {
            config,
            session: None,
            inbound_tx,
            inbound_rx,
        }
    }

    fn close_session(&mut self) {
        if let Some(session) = self.session.take() {
            debug!("Closing previous MQTT session");
            session.shutdown();
        }
    }

    fn connected_client(&self) -> Result<&AsyncClient, TransportError> {
        match &self.session {
            Some(session) if matches!(*session.status.borrow(), LinkStatus::Connected) => {
                Ok(&session.client)
            }
            _ => Err(TransportError::NotConnected),
        }
    }
}

impl Transport for MqttTransport {
    fn state(&self) -> ConnectionState {
        match &self.session {
            None => ConnectionState::Disconnected,
            Some(session) => match *session.status.borrow() {
                LinkStatus::Connecting => ConnectionState::Connecting,
                LinkStatus::Connected => ConnectionState::Connected,
                LinkStatus::Closed(_) => ConnectionState::Disconnected,
            },
        }
    }

    async fn connect(&mut self, client_id: &str) -> Result<(), TransportError> {
        self.close_session();

        let mut options = MqttOptions::new(client_id, self.config.host.clone(), self.config.port);
        options
            .set_keep_alive(self.config.keep_alive())
            .set_clean_session(true);

        let (client, eventloop) = AsyncClient::new(options, self.config.request_capacity.max(1));
        let (status_tx, mut status_rx) = watch::channel(LinkStatus::Connecting);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(drive_session(
            eventloop,
            status_tx,
            self.inbound_tx.clone(),
            cancel.clone(),
        ));

        let timeout = self.config.connect_timeout();
        let result = {
            let outcome = tokio::time::timeout(
                timeout,
                status_rx.wait_for(|status| !matches!(status, LinkStatus::Connecting)),
            )
            .await;
            match outcome {
                Ok(Ok(status)) => match &*status {
                    LinkStatus::Connected => Ok(()),
                    LinkStatus::Closed(e) => Err(e.clone()),
                    LinkStatus::Connecting => Err(TransportError::ConnectFailed(
                        "session still connecting".to_string(),
                    )),
                },
                Ok(Err(_)) => Err(TransportError::ConnectFailed(
                    "session task ended before CONNACK".to_string(),
                )),
                Err(_) => Err(TransportError::Timeout),
            }
        };

        let session = Session {
            client,
            status: status_rx,
            cancel,
            task,
        };

        match result {
            Ok(()) => {
                self.session = Some(session);
                Ok(())
            }
            Err(e) => {
                session.shutdown();
                Err(e)
            }
        }
    }

    fn subscribe(&mut self, topic: &str) -> Result<(), TransportError> {
        let client = self.connected_client()?;
        client
            .try_subscribe(topic, QoS::AtMostOnce)
            .map_err(|e| TransportError::Request(e.to_string()))
    }

    fn publish(&mut self, topic: &str, payload: &str) -> Result<(), TransportError> {
        let client = self.connected_client()?;
        client
            .try_publish(topic, QoS::AtMostOnce, false, payload.as_bytes().to_vec())
            .map_err(|e| TransportError::Request(e.to_string()))
    }

    fn pump_incoming(&mut self) -> Vec<InboundMessage> {
        let mut messages = Vec::new();
        while let Ok(message) = self.inbound_rx.try_recv() {
            messages.push(message);
        }
        messages
    }

    fn disconnect(&mut self) {
        self.close_session();
    }
}

async fn drive_session(
    mut eventloop: EventLoop,
    status: watch::Sender<LinkStatus>,
    inbound: mpsc::Sender<InboundMessage>,
    cancel: CancellationToken,
) {
    loop {
        // Polling the event loop first lets a queued DISCONNECT reach the broker.
        let event = tokio::select! {
            biased;
            event = eventloop.poll() => event,
            _ = cancel.cancelled() => {
                debug!("Session task cancelled");
                break;
            }
        };

        match event {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                if ack.code == ConnectReturnCode::Success {
                    debug!("CONNACK received (session present: {})", ack.session_present);
                    status.send_replace(LinkStatus::Connected);
                } else {
                    status.send_replace(LinkStatus::Closed(TransportError::Refused(ack.code)));
                    break;
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let message =
                    InboundMessage::from_topic(publish.topic.clone(), publish.payload.to_vec());
                debug!("Queued inbound message on {}", message.topic);
                if inbound.send(message).await.is_err() {
                    error!("Inbound channel closed, ending session");
                    status.send_replace(LinkStatus::Closed(TransportError::ConnectionLost(
                        "inbound channel closed".to_string(),
                    )));
                    break;
                }
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                warn!("Broker closed the session");
                status.send_replace(LinkStatus::Closed(TransportError::ConnectionLost(
                    "broker sent DISCONNECT".to_string(),
                )));
                break;
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                status.send_replace(LinkStatus::Closed(TransportError::ConnectionLost(
                    "client disconnected".to_string(),
                )));
                break;
            }
            Ok(_) => {}
            Err(e) => {
                let was_connected = matches!(*status.borrow(), LinkStatus::Connected);
                if was_connected {
                    warn!("MQTT connection dropped: {}", e);
                } else {
                    debug!("MQTT connect error: {}", e);
                }
                status.send_replace(LinkStatus::Closed(TransportError::from_connection_error(
                    &e,
                    was_connected,
                )));
                break;
            }
        }
    }
}
