pub mod client;
pub mod discovery;

pub use client::{MessageBus, MqttBus};
