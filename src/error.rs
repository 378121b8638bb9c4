/// Error types shared by the polling, publishing and configuration layers
use thiserror::Error;

/// Notification payload could not be decoded
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("malformed payload: expected at least 5 bytes, got {len}")]
    MalformedPayload { len: usize },
}

/// Failure of the BLE backend while talking to one device
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid device address {0}")]
    InvalidAddress(String),
    #[error("failed to connect to {mac}: {reason}")]
    Connect { mac: String, reason: String },
    #[error("write to handle {handle:#06x} failed: {reason}")]
    Write { handle: u16, reason: String },
    #[error("notification on handle {handle:#06x} failed: {reason}")]
    Notification { handle: u16, reason: String },
    #[error("no notification on handle {handle:#06x} within {secs}s")]
    Timeout { handle: u16, secs: u64 },
    #[error("no GATT attribute with handle {handle:#06x}")]
    HandleNotFound { handle: u16 },
}

/// Why a single device produced no reading this cycle
#[derive(Debug, Error)]
pub enum PollFailure {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("could not read data from sensor {mac}")]
    SensorUnavailable { mac: String },
    #[error(transparent)]
    Malformed(#[from] CodecError),
}

/// Result of polling one device
pub type PollResult<T> = Result<T, PollFailure>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DiscoveryError {
    #[error("no unit of measurement known for device class '{class}'")]
    UnknownMeasurementUnit { class: String },
    #[error("failed to encode payload: {0}")]
    Encode(String),
}

impl From<serde_json::Error> for DiscoveryError {
    fn from(e: serde_json::Error) -> Self {
        DiscoveryError::Encode(e.to_string())
    }
}

/// Anything that keeps one device out of this run's batch
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error(transparent)]
    Poll(#[from] PollFailure),
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("MQTT client error: {0}")]
    Client(#[from] rumqttc::ClientError),
    #[error("MQTT connection error: {0}")]
    Connection(#[from] rumqttc::ConnectionError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid section [{section}]: {reason}")]
    Invalid { section: String, reason: String },
    #[error("invalid broker URL: {0}")]
    Url(#[from] url::ParseError),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("average store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("average store is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}
