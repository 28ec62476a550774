//! # MQTT Client Module
//!
//! Provides the broker-facing half of sensebridge: lifecycle management,
//! topic naming, and the publish/subscribe contracts shared by every
//! peripheral-to-broker binding.
//!
//! ## Module Architecture
//!
//! ```text
//! mqtt/
//! ├── identity.rs    - Broker address parsing, peripheral kinds, topic building
//! ├── connection.rs  - Connection worker, state machine, reconnect policy
//! ├── client.rs      - Publisher and subscriber facades
//! └── error.rs       - Error definitions
//! ```
//!
//! ## Topic layout
//!
//! `{zone}/{room}/{client_name}/{kind}/{status|cmd}` with empty segments
//! omitted. Publishers always target the `status` leaf, subscribers the
//! `cmd` leaf. Delivery is QoS 0 with retain set on every publish, so the
//! broker hands the last known reading to late subscribers.
//!
//! ## Concurrency
//!
//! Every client instance is independent: one network worker task, one
//! inbound queue, one state channel. Consumer code polls
//! [`MqttPublisher::publish`] / [`MqttSubscriber::decoded_message`] from its
//! own loop and shuts down cooperatively through the cancellation token it
//! passed at construction, followed by `disable()`.

pub mod client;
pub mod connection;
pub mod error;
pub mod identity;

pub use client::{MqttPublisher, MqttSubscriber};
pub use connection::ConnectionState;
pub use error::MqttError;
pub use identity::{BrokerAddress, BrokerScheme, ClientIdentity, PeripheralKind};

use std::time::Duration;

/// Keepalive interval of every broker connection
pub const KEEP_ALIVE: Duration = Duration::from_secs(30);

/// Structured payload exchanged with the broker
///
/// Opaque to this layer: arbitrary JSON objects are accepted for decode and
/// arbitrary mappings for publish. Schema validity is the peripheral
/// layer's concern.
pub type Reading = serde_json::Map<String, serde_json::Value>;

/// Role of a client, fixed for its lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientRole {
    /// Publishes readings to the `status` leaf
    Publisher,
    /// Consumes commands from the `cmd` leaf
    Subscriber,
}

impl ClientRole {
    /// Last topic segment for this role
    pub fn suffix(self) -> &'static str {
        match self {
            ClientRole::Publisher => "status",
            ClientRole::Subscriber => "cmd",
        }
    }
}
