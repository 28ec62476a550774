//! Client identity: broker address parsing, peripheral kinds, and topic building
//!
//! A [`ClientIdentity`] is assembled once at startup from configuration and is
//! immutable afterwards. The topic is derived at construction from the
//! non-empty zone/room/name/kind segments; two clients configured with the
//! same segments address the same logical endpoint on the broker.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::MqttError;
use super::ClientRole;

/// Peripheral kind served by a client, last topic segment before the role suffix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeripheralKind {
    Sensor,
    Led,
    Joystick,
}

impl PeripheralKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PeripheralKind::Sensor => "sensor",
            PeripheralKind::Led => "led",
            PeripheralKind::Joystick => "joystick",
        }
    }
}

impl fmt::Display for PeripheralKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PeripheralKind {
    type Err = MqttError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sensor" => Ok(PeripheralKind::Sensor),
            "led" => Ok(PeripheralKind::Led),
            "joystick" => Ok(PeripheralKind::Joystick),
            other => Err(MqttError::UnknownKindError(other.to_string())),
        }
    }
}

/// Transport scheme of the broker address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerScheme {
    /// Plain TCP (`mqtt://` or `tcp://`, default when no scheme is given)
    Tcp,
    /// Websocket transport (`ws://`)
    Ws,
}

impl BrokerScheme {
    fn default_port(&self) -> u16 {
        match self {
            BrokerScheme::Tcp => 1883,
            BrokerScheme::Ws => 80,
        }
    }
}

/// Parsed and validated broker address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerAddress {
    pub scheme: BrokerScheme,
    pub host: String,
    pub port: u16,
}

impl BrokerAddress {
    /// Parses `[scheme://]host[:port]`, validating scheme and host
    ///
    /// Accepted schemes are `mqtt`, `tcp` (both plain TCP) and `ws`
    /// (websocket). A missing scheme means plain TCP; a missing port falls
    /// back to the scheme default.
    pub fn parse(address: &str) -> Result<Self, MqttError> {
        let invalid = |reason: String| MqttError::InvalidBrokerAddress {
            address: address.to_string(),
            reason,
        };

        let (scheme, rest) = match address.split_once("://") {
            Some(("mqtt" | "tcp", rest)) => (BrokerScheme::Tcp, rest),
            Some(("ws", rest)) => (BrokerScheme::Ws, rest),
            Some((other, _)) => {
                return Err(invalid(format!("unsupported scheme '{other}'")));
            }
            None => (BrokerScheme::Tcp, address),
        };

        let rest = rest.trim_end_matches('/');
        let (host, port) = match rest.split_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse::<u16>()
                    .map_err(|_| invalid(format!("invalid port '{port}'")))?;
                (host, port)
            }
            None => (rest, scheme.default_port()),
        };

        if host.is_empty() {
            return Err(invalid("missing host".to_string()));
        }

        Ok(Self {
            scheme,
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for BrokerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Joins the non-empty segments with `/`, preserving the given order
///
/// Pure and total: an all-empty input yields an empty string. Callers are
/// expected to always supply at least the kind segment.
pub fn build_topic(segments: &[Option<&str>]) -> String {
    segments
        .iter()
        .filter_map(|segment| *segment)
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// Immutable identity of one broker client
///
/// Holds everything a connection needs: the validated broker address, the
/// topic path built from zone/room/name/kind, the client id presented to the
/// broker, and optional credentials.
#[derive(Debug, Clone)]
pub struct ClientIdentity {
    broker: BrokerAddress,
    client_name: String,
    kind: PeripheralKind,
    client_id: String,
    user: Option<String>,
    password: Option<String>,
    topic: String,
}

impl ClientIdentity {
    /// Builds an identity, failing on a malformed broker address
    ///
    /// The topic is built here, once; it never changes afterwards.
    pub fn new(
        broker_address: &str,
        zone: Option<&str>,
        room: Option<&str>,
        client_name: &str,
        kind: PeripheralKind,
        client_id: &str,
        user: Option<&str>,
        password: Option<&str>,
    ) -> Result<Self, MqttError> {
        let broker = BrokerAddress::parse(broker_address)?;
        let topic = build_topic(&[zone, room, Some(client_name), Some(kind.as_str())]);

        Ok(Self {
            broker,
            client_name: client_name.to_string(),
            kind,
            client_id: client_id.to_string(),
            user: user.map(str::to_string),
            password: password.map(str::to_string),
            topic,
        })
    }

    pub fn broker(&self) -> &BrokerAddress {
        &self.broker
    }

    pub fn client_name(&self) -> &str {
        &self.client_name
    }

    pub fn kind(&self) -> PeripheralKind {
        self.kind
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn credentials(&self) -> Option<(&str, &str)> {
        self.user
            .as_deref()
            .map(|user| (user, self.password.as_deref().unwrap_or("")))
    }

    /// Topic path without the role suffix
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Topic path with the role suffix appended
    pub fn full_topic(&self, role: ClientRole) -> String {
        format!("{}/{}", self.topic, role.suffix())
    }

    /// `name/kind` label used in log lines
    pub fn label(&self) -> String {
        format!("{}/{}", self.client_name, self.kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_omits_empty_segments_and_preserves_order() {
        let topic = build_topic(&[
            Some("home"),
            Some("livingroom"),
            Some("rpi"),
            Some("sensor"),
        ]);
        assert_eq!(topic, "home/livingroom/rpi/sensor");

        let topic = build_topic(&[None, Some(""), Some("rpi"), Some("led")]);
        assert_eq!(topic, "rpi/led");

        let topic = build_topic(&[None, None, None, Some("joystick")]);
        assert_eq!(topic, "joystick");
    }

    #[test]
    fn topic_is_deterministic() {
        let segments = [Some("zone"), Some("room"), Some("name"), Some("sensor")];
        assert_eq!(build_topic(&segments), build_topic(&segments));
    }

    #[test]
    fn all_empty_segments_yield_empty_topic() {
        assert_eq!(build_topic(&[None, Some(""), None, None]), "");
    }

    #[test]
    fn role_suffix_is_fixed_per_role() {
        let identity = ClientIdentity::new(
            "mqtt://broker.local:1883",
            Some("home"),
            None,
            "rpi",
            PeripheralKind::Sensor,
            "rpi_sensor",
            None,
            None,
        )
        .unwrap();

        assert!(identity.full_topic(ClientRole::Publisher).ends_with("/status"));
        assert!(identity.full_topic(ClientRole::Subscriber).ends_with("/cmd"));
        assert_eq!(identity.full_topic(ClientRole::Publisher), "home/rpi/sensor/status");
    }

    #[test]
    fn broker_address_parses_schemes_and_ports() {
        let tcp = BrokerAddress::parse("mqtt://broker.local:1883").unwrap();
        assert_eq!(tcp.scheme, BrokerScheme::Tcp);
        assert_eq!(tcp.host, "broker.local");
        assert_eq!(tcp.port, 1883);

        let ws = BrokerAddress::parse("ws://broker.local:9001").unwrap();
        assert_eq!(ws.scheme, BrokerScheme::Ws);
        assert_eq!(ws.port, 9001);

        let bare = BrokerAddress::parse("broker.local").unwrap();
        assert_eq!(bare.scheme, BrokerScheme::Tcp);
        assert_eq!(bare.port, 1883);
    }

    #[test]
    fn broker_address_rejects_malformed_input() {
        assert!(matches!(
            BrokerAddress::parse("http://broker.local"),
            Err(MqttError::InvalidBrokerAddress { .. })
        ));
        assert!(matches!(
            BrokerAddress::parse("mqtt://"),
            Err(MqttError::InvalidBrokerAddress { .. })
        ));
        assert!(matches!(
            BrokerAddress::parse("mqtt://broker.local:notaport"),
            Err(MqttError::InvalidBrokerAddress { .. })
        ));
    }

    #[test]
    fn peripheral_kind_round_trips_and_rejects_unknown() {
        assert_eq!("sensor".parse::<PeripheralKind>().unwrap(), PeripheralKind::Sensor);
        assert_eq!("led".parse::<PeripheralKind>().unwrap(), PeripheralKind::Led);
        assert_eq!(
            "joystick".parse::<PeripheralKind>().unwrap(),
            PeripheralKind::Joystick
        );
        assert!(matches!(
            "thermostat".parse::<PeripheralKind>(),
            Err(MqttError::UnknownKindError(_))
        ));
    }
}
