//! Error definitions for the MQTT module

use thiserror::Error;

/// Errors surfaced by the MQTT client layer
///
/// Construction-time faults (`InvalidBrokerAddress`, `UnknownKindError`)
/// abort startup of the affected client. Runtime faults are per-call:
/// a `DecodingError` consumes the offending message but never tears down
/// the connection.
#[derive(Debug, Error)]
pub enum MqttError {
    /// The configured broker address could not be parsed or validated
    #[error("Invalid broker address '{address}': {reason}")]
    InvalidBrokerAddress { address: String, reason: String },

    /// An unknown peripheral kind was given (must be sensor, led, or joystick)
    #[error("Unknown peripheral kind '{0}'")]
    UnknownKindError(String),

    /// An inbound payload was not decodable as a UTF-8 JSON object
    ///
    /// Carries the offending payload verbatim so callers can log or
    /// inspect it. The message has already been dequeued and is not
    /// requeued.
    #[error("Failed to decode inbound payload: {reason}")]
    DecodingError { payload: Vec<u8>, reason: String },

    /// The request channel to the network worker is closed
    #[error("Client channel error: {0}")]
    ChannelError(String),
}
