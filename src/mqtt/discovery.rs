/// Home Assistant discovery and state payloads
use serde::Serialize;

use crate::error::DiscoveryError;
use crate::models::{DeviceConfig, DeviceStatus, OutgoingMessage, Reading};

const DISCOVERY_PREFIX: &str = "homeassistant";
const MANUFACTURER: &str = "Xiaomi";
const SW_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Serialize)]
struct DiscoveryPayload<'a> {
    device_class: &'a str,
    name: String,
    state_topic: String,
    value_template: String,
    unique_id: String,
    unit_of_measurement: &'static str,
    device: DeviceDescriptor<'a>,
}

#[derive(Debug, Serialize)]
struct DeviceDescriptor<'a> {
    identifiers: [&'a str; 1],
    name: &'a str,
    model: &'static str,
    manufacturer: &'static str,
    sw_version: &'static str,
}

/// Unit reported for a measurement class
pub fn unit_for(class: &str) -> Result<&'static str, DiscoveryError> {
    match class {
        "temperature" => Ok("°C"),
        "humidity" | "battery" => Ok("%"),
        other => Err(DiscoveryError::UnknownMeasurementUnit {
            class: other.to_string(),
        }),
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

/// One discovery message per configured measurement class, in order
pub fn discovery_messages(device: &DeviceConfig) -> Result<Vec<OutgoingMessage>, DiscoveryError> {
    let state_topic = device.state_topic();

    device
        .measurement_classes
        .iter()
        .enumerate()
        .map(|(i, class)| -> Result<OutgoingMessage, DiscoveryError> {
            let payload = DiscoveryPayload {
                device_class: class,
                name: capitalize(class),
                state_topic: state_topic.clone(),
                value_template: format!("{{{{value_json.{}}}}}", class),
                unique_id: format!("{}_{}", device.mac_address, i),
                unit_of_measurement: unit_for(class)?,
                device: DeviceDescriptor {
                    identifiers: [device.mac_address.as_str()],
                    name: &device.id,
                    model: device.model.as_str(),
                    manufacturer: MANUFACTURER,
                    sw_version: SW_VERSION,
                },
            };

            Ok(OutgoingMessage {
                topic: format!("{}/{}_{}/config", DISCOVERY_PREFIX, device.mqtt_topic, i),
                payload: serde_json::to_string(&payload)?,
                retain: false,
            })
        })
        .collect()
}

/// The state message carrying the (possibly averaged) reading
pub fn state_message(
    device: &DeviceConfig,
    reading: &Reading,
) -> Result<OutgoingMessage, DiscoveryError> {
    Ok(OutgoingMessage {
        topic: device.state_topic(),
        payload: serde_json::to_string(reading)?,
        retain: device.retain,
    })
}

/// Discovery messages followed by the state message for one device
pub fn device_messages(
    device: &DeviceConfig,
    reading: &Reading,
) -> Result<Vec<OutgoingMessage>, DiscoveryError> {
    let mut messages = discovery_messages(device)?;
    messages.push(state_message(device, reading)?);
    Ok(messages)
}

pub fn availability_message(device: &DeviceConfig, status: DeviceStatus) -> OutgoingMessage {
    OutgoingMessage {
        topic: device.availability_topic.clone(),
        payload: status.as_payload().to_string(),
        retain: device.retain,
    }
}
