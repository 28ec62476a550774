//! Publisher and subscriber facades over a [`Connection`]
//!
//! A publisher serializes readings to JSON and fires them at its
//! status-suffixed topic, retained, QoS 0. A subscriber drains its inbound
//! queue one decoded JSON object per call. Both share the connection
//! lifecycle (`state()`, `disable()`) and are fully independent instances:
//! own connection, own queue, own state.

use rumqttc::QoS;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::connection::{Connection, ConnectionState};
use super::error::MqttError;
use super::identity::ClientIdentity;
use super::{ClientRole, Reading};

/// MQTT client publishing readings to the `status` leaf of its topic
pub struct MqttPublisher {
    conn: Connection,
}

impl MqttPublisher {
    /// Spawns the connection worker and starts connecting in the background
    pub fn new(identity: ClientIdentity, shutdown: &CancellationToken) -> Self {
        // publishers never subscribe, so the inbound queue stays unused
        let (conn, _inbound) = Connection::open(identity, ClientRole::Publisher, shutdown);
        Self { conn }
    }

    /// Serializes `reading` to JSON and publishes it retained at QoS 0
    ///
    /// Exactly one publish attempt per call; nothing is surfaced to the
    /// caller. The broker's ACK is logged by the network worker and never
    /// awaited.
    pub async fn publish(&self, reading: &Reading) {
        let payload = match serde_json::to_string(reading) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Failed to serialize reading, nothing published: {e}");
                return;
            }
        };
        if let Err(e) = self
            .conn
            .client()
            .publish(self.conn.full_topic(), QoS::AtMostOnce, true, payload)
            .await
        {
            warn!(
                "A publish request to topic '{}' was dropped: {e}",
                self.conn.full_topic()
            );
            return;
        }
        debug!(
            "A publish request to topic '{}' was made",
            self.conn.full_topic()
        );
    }

    pub fn full_topic(&self) -> &str {
        self.conn.full_topic()
    }

    pub fn identity(&self) -> &ClientIdentity {
        self.conn.identity()
    }

    pub fn state(&self) -> ConnectionState {
        self.conn.state()
    }

    pub fn is_enabled(&self) -> bool {
        self.conn.is_enabled()
    }

    /// Disconnects and stops the network worker; safe to call twice
    pub fn disable(&self) {
        self.conn.disable();
    }
}

/// MQTT client consuming command messages from the `cmd` leaf of its topic
pub struct MqttSubscriber {
    conn: Connection,
    inbound: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl MqttSubscriber {
    /// Spawns the connection worker; the subscription itself is issued by
    /// the worker on every successful (re)connection
    pub fn new(identity: ClientIdentity, shutdown: &CancellationToken) -> Self {
        let (conn, inbound) = Connection::open(identity, ClientRole::Subscriber, shutdown);
        Self { conn, inbound }
    }

    /// Dequeues and decodes the oldest queued message
    ///
    /// An empty queue is a normal outcome under polling and yields an empty
    /// map. A payload that is not a UTF-8 JSON object fails with
    /// [`MqttError::DecodingError`]; the message is consumed either way and
    /// the next call proceeds with the following queue entry.
    pub fn decoded_message(&mut self) -> Result<Reading, MqttError> {
        next_decoded(&mut self.inbound)
    }

    pub fn full_topic(&self) -> &str {
        self.conn.full_topic()
    }

    pub fn identity(&self) -> &ClientIdentity {
        self.conn.identity()
    }

    pub fn state(&self) -> ConnectionState {
        self.conn.state()
    }

    pub fn is_enabled(&self) -> bool {
        self.conn.is_enabled()
    }

    /// Disconnects and stops the network worker; safe to call twice
    pub fn disable(&self) {
        self.conn.disable();
    }
}

/// Dequeue-and-decode step shared by `decoded_message()` and tests
fn next_decoded(inbound: &mut mpsc::UnboundedReceiver<Vec<u8>>) -> Result<Reading, MqttError> {
    match inbound.try_recv() {
        Ok(payload) => decode_payload(payload),
        // a closed sender means the worker is gone after disable(); both
        // cases read as "nothing queued"
        Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => Ok(Reading::new()),
    }
}

/// Decodes a raw payload as a UTF-8 JSON object
fn decode_payload(payload: Vec<u8>) -> Result<Reading, MqttError> {
    let text = match String::from_utf8(payload) {
        Ok(text) => text,
        Err(e) => {
            let reason = format!("payload is not valid UTF-8: {e}");
            return Err(MqttError::DecodingError {
                payload: e.into_bytes(),
                reason,
            });
        }
    };
    match serde_json::from_str::<serde_json::Value>(&text) {
        Ok(serde_json::Value::Object(map)) => Ok(map),
        Ok(other) => Err(MqttError::DecodingError {
            reason: format!("expected a JSON object, got {}", json_kind(&other)),
            payload: text.into_bytes(),
        }),
        Err(e) => Err(MqttError::DecodingError {
            reason: format!("payload is not valid JSON: {e}"),
            payload: text.into_bytes(),
        }),
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::mqtt::identity::PeripheralKind;

    fn queue() -> (
        mpsc::UnboundedSender<Vec<u8>>,
        mpsc::UnboundedReceiver<Vec<u8>>,
    ) {
        mpsc::unbounded_channel()
    }

    #[test]
    fn messages_are_decoded_in_fifo_order() {
        let (tx, mut rx) = queue();
        tx.send(br#"{"n": 1}"#.to_vec()).unwrap();
        tx.send(br#"{"n": 2}"#.to_vec()).unwrap();
        tx.send(br#"{"n": 3}"#.to_vec()).unwrap();

        for expected in 1..=3 {
            let message = next_decoded(&mut rx).unwrap();
            assert_eq!(message["n"], json!(expected));
        }
    }

    #[test]
    fn empty_queue_yields_empty_map_without_side_effects() {
        let (_tx, mut rx) = queue();
        for _ in 0..5 {
            assert!(next_decoded(&mut rx).unwrap().is_empty());
        }
    }

    #[test]
    fn bad_payload_fails_without_corrupting_the_queue() {
        let (tx, mut rx) = queue();
        tx.send(b"not json at all".to_vec()).unwrap();
        tx.send(br#"{"temperature": 21.5}"#.to_vec()).unwrap();

        let err = next_decoded(&mut rx).unwrap_err();
        match err {
            MqttError::DecodingError { payload, .. } => {
                assert_eq!(payload, b"not json at all".to_vec());
            }
            other => panic!("unexpected error: {other}"),
        }

        // the following valid message still decodes
        let message = next_decoded(&mut rx).unwrap();
        assert_eq!(message["temperature"], json!(21.5));
    }

    #[test]
    fn non_utf8_payload_is_carried_in_the_error() {
        let (tx, mut rx) = queue();
        let raw = vec![0xff, 0xfe, 0xfd];
        tx.send(raw.clone()).unwrap();

        match next_decoded(&mut rx).unwrap_err() {
            MqttError::DecodingError { payload, .. } => assert_eq!(payload, raw),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn non_object_json_is_rejected() {
        let (tx, mut rx) = queue();
        tx.send(b"[1, 2, 3]".to_vec()).unwrap();
        assert!(matches!(
            next_decoded(&mut rx),
            Err(MqttError::DecodingError { .. })
        ));
    }

    #[test]
    fn published_payload_round_trips_through_decode() {
        let mut reading = Reading::new();
        reading.insert("temperature".to_string(), json!(21.5));

        // what publish() puts on the wire is what a subscriber dequeues
        let payload = serde_json::to_string(&reading).unwrap().into_bytes();
        let (tx, mut rx) = queue();
        tx.send(payload).unwrap();

        assert_eq!(next_decoded(&mut rx).unwrap(), reading);
    }

    fn test_identity(kind: PeripheralKind) -> ClientIdentity {
        // port 1 is never a live broker; the worker just retries in the
        // background until the token is cancelled
        ClientIdentity::new(
            "mqtt://127.0.0.1:1",
            Some("home"),
            Some("lab"),
            "rpi",
            kind,
            "rpi_test",
            None,
            None,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn publisher_and_subscriber_topics_carry_their_role_suffix() {
        let shutdown = CancellationToken::new();
        let publisher = MqttPublisher::new(test_identity(PeripheralKind::Sensor), &shutdown);
        let mut subscriber = MqttSubscriber::new(test_identity(PeripheralKind::Led), &shutdown);

        assert_eq!(publisher.full_topic(), "home/lab/rpi/sensor/status");
        assert_eq!(subscriber.full_topic(), "home/lab/rpi/led/cmd");
        assert!(subscriber.decoded_message().unwrap().is_empty());

        publisher.disable();
        subscriber.disable();
    }

    #[tokio::test]
    async fn disable_twice_is_safe_and_state_stays_disabled() {
        let shutdown = CancellationToken::new();
        let publisher = MqttPublisher::new(test_identity(PeripheralKind::Sensor), &shutdown);
        assert!(publisher.is_enabled());

        publisher.disable();
        assert!(!publisher.is_enabled());
        assert_eq!(publisher.state(), ConnectionState::Disabled);

        // second call is a no-op
        publisher.disable();
        assert!(!publisher.is_enabled());
        assert_eq!(publisher.state(), ConnectionState::Disabled);
    }
}
