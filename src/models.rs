use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Supported Xiaomi thermometer models
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelKind {
    Lywsd03mmc,
    MjHtV1,
}

impl ModelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelKind::Lywsd03mmc => "LYWSD03MMC",
            ModelKind::MjHtV1 => "MJ_HT_V1",
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "LYWSD03MMC" => Ok(ModelKind::Lywsd03mmc),
            "MJ_HT_V1" => Ok(ModelKind::MjHtV1),
            other => Err(format!("unsupported device model '{}'", other)),
        }
    }
}

/// One configured sensor, immutable for the whole run
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceConfig {
    pub id: String,
    pub mac_address: String,
    pub model: ModelKind,
    pub ble_timeout_secs: u64,
    /// Rolling average window, 0 disables averaging
    pub average_window: usize,
    pub mqtt_topic: String,
    pub retain: bool,
    pub measurement_classes: Vec<String>,
    pub availability_topic: String,
}

impl DeviceConfig {
    pub fn state_topic(&self) -> String {
        format!("{}/state", self.mqtt_topic)
    }
}

/// Raw values straight out of a notification payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawReading {
    pub temperature_centi_degrees: i16,
    pub humidity_percent: u8,
    pub battery_millivolts: u16,
}

/// Decoded sensor values as published in the state payload
///
/// `average` is only present on readings produced by the rolling averager
/// and holds the number of samples the values were computed from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub temperature: f64,
    pub humidity: u8,
    pub battery: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub average: Option<usize>,
}

impl Reading {
    pub fn new(temperature: f64, humidity: u8, battery: u8) -> Self {
        Reading {
            temperature,
            humidity,
            battery,
            average: None,
        }
    }
}

/// A message queued for the broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub topic: String,
    pub payload: String,
    pub retain: bool,
}

/// Connection settings for the MQTT broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Per-device outcome of one run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceStatus {
    Online,
    Offline,
}

impl DeviceStatus {
    pub fn as_payload(&self) -> &'static str {
        match self {
            DeviceStatus::Online => "online",
            DeviceStatus::Offline => "offline",
        }
    }
}
