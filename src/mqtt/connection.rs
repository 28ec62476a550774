//! Connection lifecycle management for one broker client
//!
//! Each client owns a single logical connection, driven by a dedicated
//! network worker task that polls the rumqttc event loop. The worker is the
//! only place socket I/O happens; it communicates with consumer code
//! exclusively through the unbounded inbound queue and a watch channel
//! carrying the connection state. Consumer logic is never re-entered from
//! the network task.
//!
//! ```text
//! consumer task                     network worker task
//! publish()/decoded_message() ──►  AsyncClient request channel
//! inbound queue (mpsc)        ◄──  EventLoop::poll() events
//! state (watch)               ◄──  CONNACK / disconnect transitions
//! ```
//!
//! Reconnection policy: on any transport error the worker waits with
//! exponential backoff (1s doubling up to 60s, reset on a successful
//! CONNACK) and polls again. Retries are unbounded; recovery is signalled
//! to consumers purely through the state channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Packet, QoS, Transport,
};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::identity::{BrokerScheme, ClientIdentity};
use super::{ClientRole, KEEP_ALIVE};

/// Request channel capacity between consumer calls and the event loop
const REQUEST_CAPACITY: usize = 100;

/// Observable state of one broker connection
///
/// `Disabled` is terminal: once `disable()` ran, no transition leaves it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Disabled,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "Disconnected",
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Connected => "Connected",
            ConnectionState::Disabled => "Disabled",
        }
    }
}

/// Exponential backoff between reconnect attempts
#[derive(Debug)]
struct ReconnectBackoff {
    current: Duration,
}

impl ReconnectBackoff {
    const INITIAL: Duration = Duration::from_secs(1);
    const MAX: Duration = Duration::from_secs(60);

    fn new() -> Self {
        Self {
            current: Self::INITIAL,
        }
    }

    /// Returns the delay to wait before the next attempt and advances
    fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(Self::MAX);
        delay
    }

    /// Back to the initial delay, called on a successful CONNACK
    fn reset(&mut self) {
        self.current = Self::INITIAL;
    }
}

/// One logical broker connection shared by a publisher or subscriber facade
///
/// Owns the rumqttc [`AsyncClient`] handle and the lifecycle flags. The
/// event loop itself lives on the spawned worker task.
pub(crate) struct Connection {
    identity: ClientIdentity,
    full_topic: String,
    client: AsyncClient,
    state: watch::Receiver<ConnectionState>,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    cancel: CancellationToken,
    enabled: AtomicBool,
}

impl Connection {
    /// Builds the client options, spawns the network worker, and starts the
    /// asynchronous connection attempt
    ///
    /// Never blocks on network conditions: the returned connection may still
    /// be `Connecting` or `Disconnected` for an arbitrary time. The returned
    /// receiver is the consumer end of the inbound message queue.
    pub(crate) fn open(
        identity: ClientIdentity,
        role: ClientRole,
        shutdown: &CancellationToken,
    ) -> (Self, mpsc::UnboundedReceiver<Vec<u8>>) {
        let broker = identity.broker();
        let mut options = match broker.scheme {
            BrokerScheme::Tcp => {
                MqttOptions::new(identity.client_id(), broker.host.clone(), broker.port)
            }
            BrokerScheme::Ws => {
                // rumqttc wants the full URL for websocket transport; the
                // path matches the common broker default
                let url = format!("ws://{}:{}/mqtt", broker.host, broker.port);
                let mut options = MqttOptions::new(identity.client_id(), url, broker.port);
                options.set_transport(Transport::Ws);
                options
            }
        };
        options.set_keep_alive(KEEP_ALIVE);
        if let Some((user, password)) = identity.credentials() {
            options.set_credentials(user, password);
        }

        let (client, event_loop) = AsyncClient::new(options, REQUEST_CAPACITY);
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::default());
        let state_tx = Arc::new(state_tx);
        let cancel = shutdown.child_token();
        let full_topic = identity.full_topic(role);

        let worker = ConnectionWorker {
            client: client.clone(),
            role,
            full_topic: full_topic.clone(),
            label: identity.label(),
            broker_host: broker.host.clone(),
            state: state_tx.clone(),
            inbound: inbound_tx,
            cancel: cancel.clone(),
        };
        tokio::spawn(worker.run(event_loop));

        info!(
            "The client/type '{}' for the broker '{}' was initialized",
            identity.label(),
            broker.host
        );

        let connection = Self {
            identity,
            full_topic,
            client,
            state: state_rx,
            state_tx,
            cancel,
            enabled: AtomicBool::new(true),
        };
        (connection, inbound_rx)
    }

    pub(crate) fn identity(&self) -> &ClientIdentity {
        &self.identity
    }

    pub(crate) fn full_topic(&self) -> &str {
        &self.full_topic
    }

    pub(crate) fn client(&self) -> &AsyncClient {
        &self.client
    }

    pub(crate) fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub(crate) fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Tears the connection down: clean disconnect request, worker stop,
    /// terminal `Disabled` state
    ///
    /// Idempotent; a second call is a no-op. The disconnect request carries
    /// reason code 0 on the wire, so the worker never treats it as a
    /// non-clean drop.
    pub(crate) fn disable(&self) {
        if !self.enabled.swap(false, Ordering::SeqCst) {
            debug!("The client/type '{}' is already disabled", self.identity.label());
            return;
        }
        info!(
            "Received a call to disable the client/type '{}'",
            self.identity.label()
        );
        if let Err(e) = self.client.try_disconnect() {
            debug!("Disconnect request was not delivered: {e}");
        }
        self.cancel.cancel();
        self.state_tx.send_modify(|state| *state = ConnectionState::Disabled);
    }
}

/// Network worker owning the event loop of one connection
struct ConnectionWorker {
    client: AsyncClient,
    role: ClientRole,
    full_topic: String,
    label: String,
    broker_host: String,
    state: Arc<watch::Sender<ConnectionState>>,
    inbound: mpsc::UnboundedSender<Vec<u8>>,
    cancel: CancellationToken,
}

impl ConnectionWorker {
    async fn run(mut self, mut event_loop: EventLoop) {
        self.set_state(ConnectionState::Connecting);
        let mut backoff = ReconnectBackoff::new();

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                event = event_loop.poll() => match event {
                    Ok(event) => self.handle_event(event, &mut backoff).await,
                    Err(e) => {
                        self.on_connection_drop(&e.to_string());
                        let delay = backoff.next_delay();
                        debug!(
                            "The client/type '{}' retries connecting to '{}' in {:?}",
                            self.label, self.broker_host, delay
                        );
                        tokio::select! {
                            _ = self.cancel.cancelled() => break,
                            _ = tokio::time::sleep(delay) => {}
                        }
                        self.set_state(ConnectionState::Connecting);
                    }
                }
            }
        }

        debug!("The network loop of client/type '{}' stopped", self.label);
    }

    async fn handle_event(&mut self, event: Event, backoff: &mut ReconnectBackoff) {
        match event {
            Event::Incoming(Packet::ConnAck(ack)) => {
                if ack.code == ConnectReturnCode::Success {
                    backoff.reset();
                    self.set_state(ConnectionState::Connected);
                    info!(
                        "The client/type '{}' connected successfully to '{}'",
                        self.label, self.broker_host
                    );
                    if self.role == ClientRole::Subscriber {
                        // (re)subscribe on every successful (re)connection
                        match self.client.subscribe(&self.full_topic, QoS::AtMostOnce).await {
                            Ok(()) => debug!(
                                "Subscribed to topic '{}' from broker '{}'",
                                self.full_topic, self.broker_host
                            ),
                            Err(e) => warn!(
                                "Failed to subscribe to topic '{}': {e}",
                                self.full_topic
                            ),
                        }
                    }
                } else {
                    self.set_state(ConnectionState::Disconnected);
                    warn!(
                        "The client/type '{}' got an error ({:?}) trying to connect to '{}'",
                        self.label, ack.code, self.broker_host
                    );
                }
            }
            Event::Incoming(Packet::Publish(publish)) => {
                // every delivered message is enqueued verbatim; the broker's
                // subscription filter is the only filter
                if self.inbound.send(publish.payload.to_vec()).is_ok() {
                    debug!("The client/type '{}' enqueued an encoded message", self.label);
                } else {
                    warn!(
                        "The client/type '{}' dropped a message, consumer is gone",
                        self.label
                    );
                }
            }
            Event::Incoming(Packet::PubAck(ack)) => {
                debug!(
                    "The broker '{}' has ACK publish request pkid '{}' by '{}'",
                    self.broker_host, ack.pkid, self.label
                );
            }
            Event::Incoming(Packet::SubAck(ack)) => {
                debug!(
                    "The broker '{}' has ACK subscribe request pkid '{}' by '{}'",
                    self.broker_host, ack.pkid, self.label
                );
            }
            Event::Incoming(Packet::UnsubAck(ack)) => {
                debug!(
                    "The broker '{}' has ACK unsubscribe request pkid '{}' by '{}'",
                    self.broker_host, ack.pkid, self.label
                );
            }
            Event::Incoming(Packet::Disconnect) => {
                self.on_connection_drop("server sent disconnect");
            }
            Event::Incoming(packet) => {
                debug!("[rumqttc] {:?}", packet);
            }
            Event::Outgoing(_) => {}
        }
    }

    /// Non-clean disconnect handling; clean shutdown cancels the worker
    /// before any further event is observed and never reaches this path
    fn on_connection_drop(&self, reason: &str) {
        self.set_state(ConnectionState::Disconnected);
        info!(
            "The client/type '{}' was disconnected from '{}': {reason}",
            self.label, self.broker_host
        );
        if self.role == ClientRole::Subscriber {
            // best effort, the transport may already be down
            if let Err(e) = self.client.try_unsubscribe(&self.full_topic) {
                debug!("Unsubscribe request was not delivered: {e}");
            } else {
                debug!(
                    "Unsubscribed from topic '{}' from broker '{}'",
                    self.full_topic, self.broker_host
                );
            }
        }
    }

    /// All worker-side transitions funnel through here; `Disabled` wins
    /// against any concurrent transition and is never overwritten
    fn set_state(&self, next: ConnectionState) {
        self.state.send_modify(|state| {
            if *state != ConnectionState::Disabled {
                *state = next;
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let mut backoff = ReconnectBackoff::new();
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
        assert_eq!(backoff.next_delay(), Duration::from_secs(2));
        assert_eq!(backoff.next_delay(), Duration::from_secs(4));
        for _ in 0..10 {
            backoff.next_delay();
        }
        assert_eq!(backoff.next_delay(), Duration::from_secs(60));
    }

    #[test]
    fn backoff_resets_to_initial() {
        let mut backoff = ReconnectBackoff::new();
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
    }

    #[test]
    fn disabled_state_is_terminal() {
        let (tx, rx) = watch::channel(ConnectionState::Connected);
        let tx = Arc::new(tx);
        tx.send_modify(|state| *state = ConnectionState::Disabled);

        // a late worker-side transition must not leave Disabled
        tx.send_modify(|state| {
            if *state != ConnectionState::Disabled {
                *state = ConnectionState::Disconnected;
            }
        });
        assert_eq!(*rx.borrow(), ConnectionState::Disabled);
    }
}
