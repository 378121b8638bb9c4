/// One polling run over every configured device
use log::{error, info, warn};
use time::OffsetDateTime;

use crate::averages::AverageStore;
use crate::bluetooth::{DevicePoller, Parameter, Transport};
use crate::config::AppConfig;
use crate::error::DeviceError;
use crate::models::{DeviceConfig, DeviceStatus, OutgoingMessage, Reading};
use crate::mqtt::discovery::{availability_message, discovery_messages, state_message};
use crate::mqtt::MessageBus;
use crate::utils::format_datetime;

/// Outcome of a run, mostly for logging and tests
#[derive(Debug, Default)]
pub struct RunSummary {
    pub statuses: Vec<(String, DeviceStatus)>,
    pub messages: Vec<OutgoingMessage>,
    pub published: bool,
}

impl RunSummary {
    pub fn online(&self) -> usize {
        self.statuses
            .iter()
            .filter(|(_, status)| *status == DeviceStatus::Online)
            .count()
    }
}

/// Polls devices one after another and publishes a single batch
pub struct PollOrchestrator<'a> {
    config: &'a AppConfig,
    transport: &'a dyn Transport,
    bus: &'a dyn MessageBus,
}

impl<'a> PollOrchestrator<'a> {
    pub fn new(config: &'a AppConfig, transport: &'a dyn Transport, bus: &'a dyn MessageBus) -> Self {
        PollOrchestrator {
            config,
            transport,
            bus,
        }
    }

    /// Poll every device, publish the batch and persist the averages
    ///
    /// A failing device is logged and skipped. Publish and store failures
    /// are logged too, so a run always completes.
    pub async fn run(&self, store: &mut AverageStore) -> RunSummary {
        let mut summary = RunSummary::default();

        for device in &self.config.devices {
            let status = match self.poll_device(device, store).await {
                Ok(messages) => {
                    summary.messages.extend(messages);
                    DeviceStatus::Online
                }
                Err(e) => {
                    error!(
                        "Error polling device {} ({}): {}",
                        device.id, device.mac_address, e
                    );
                    DeviceStatus::Offline
                }
            };

            if self.config.availability {
                summary.messages.push(availability_message(device, status));
            }
            summary.statuses.push((device.id.clone(), status));
        }

        if summary.messages.is_empty() {
            warn!("No device produced data this run");
        }
        match self.bus.publish_batch(&summary.messages, &self.config.broker).await {
            Ok(()) => summary.published = true,
            Err(e) => error!("Error publishing to MQTT: {}", e),
        }

        // Persist regardless of device or publish failures
        if let Err(e) = store.save() {
            error!(
                "Failed to write average store {}: {}",
                store.path().display(),
                e
            );
        }

        info!(
            "Run complete: {}/{} devices online, {} messages",
            summary.online(),
            summary.statuses.len(),
            summary.messages.len()
        );
        summary
    }

    /// Poll one device and build its discovery and state messages
    async fn poll_device(
        &self,
        device: &DeviceConfig,
        store: &mut AverageStore,
    ) -> Result<Vec<OutgoingMessage>, DeviceError> {
        let mut poller = DevicePoller::for_device(device, self.transport);

        let temperature = poller.parameter_value(Parameter::Temperature).await?;
        let humidity = poller.parameter_value(Parameter::Humidity).await?;
        let battery = poller.parameter_value(Parameter::Battery).await?;
        let reading = Reading::new(temperature, humidity as u8, battery as u8);

        // Validate the classes before touching the average history
        let mut messages = discovery_messages(device)?;

        let reading = store.smooth(&device.mac_address, device.average_window, reading);
        let state = state_message(device, &reading)?;

        info!(
            "{} {} : {}",
            format_datetime(&OffsetDateTime::now_utc()),
            device.id,
            state.payload
        );

        messages.push(state);
        Ok(messages)
    }
}
