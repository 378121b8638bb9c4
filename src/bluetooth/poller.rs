/// Cached polling of a single Xiaomi thermometer
use log::{debug, warn};
use time::{Duration, OffsetDateTime};

use crate::bluetooth::codec;
use crate::bluetooth::transport::{NotificationConfig, Transport};
use crate::error::{PollFailure, PollResult};
use crate::models::{DeviceConfig, ModelKind, Reading};

pub const DEFAULT_CACHE_TIMEOUT_SECS: i64 = 600;
const RETRY_AFTER_INVALID_SECS: i64 = 300; // Retry a misbehaving sensor after 5 minutes

/// A single measured quantity of a reading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parameter {
    Temperature,
    Humidity,
    Battery,
}

/// Owns one device's cache and connection lifecycle
///
/// Exclusive access (`&mut self`) guarantees that only one cache fill is in
/// flight per device. Both supported models share the same notification
/// handshake, the model kind is kept for reporting only.
pub struct DevicePoller<'a> {
    mac: String,
    model: ModelKind,
    transport: &'a dyn Transport,
    notification: NotificationConfig,
    ble_timeout_secs: u64,
    cache_timeout: Duration,
    cache: Option<Reading>,
    last_read: Option<OffsetDateTime>,
}

impl<'a> DevicePoller<'a> {
    pub fn new(
        mac: impl Into<String>,
        model: ModelKind,
        transport: &'a dyn Transport,
        ble_timeout_secs: u64,
    ) -> Self {
        DevicePoller {
            mac: mac.into(),
            model,
            transport,
            notification: NotificationConfig::xiaomi_thermometer(),
            ble_timeout_secs,
            cache_timeout: Duration::seconds(DEFAULT_CACHE_TIMEOUT_SECS),
            cache: None,
            last_read: None,
        }
    }

    /// Build a poller for a configured device
    pub fn for_device(device: &DeviceConfig, transport: &'a dyn Transport) -> Self {
        Self::new(
            device.mac_address.clone(),
            device.model,
            transport,
            device.ble_timeout_secs,
        )
    }

    pub fn cache_available(&self) -> bool {
        self.cache.is_some()
    }

    pub fn clear_cache(&mut self) {
        self.cache = None;
        self.last_read = None;
    }

    /// Return the current reading, refreshing the cache over BLE if needed
    ///
    /// The cache is used when `read_cached` is set and the last read is
    /// younger than the cache timeout.
    ///
    /// # Returns
    /// The cached reading, or `SensorUnavailable` if no valid reading exists
    /// after a fill attempt. Transport failures are passed through.
    pub async fn get_value(&mut self, read_cached: bool) -> PollResult<Reading> {
        self.get_value_at(read_cached, OffsetDateTime::now_utc()).await
    }

    /// [`get_value`](Self::get_value) evaluated at an explicit point in time
    pub async fn get_value_at(
        &mut self,
        read_cached: bool,
        now: OffsetDateTime,
    ) -> PollResult<Reading> {
        let fresh = match self.last_read {
            Some(last_read) => now - last_read < self.cache_timeout,
            None => false,
        };

        if !read_cached || !fresh {
            self.fill_cache(now).await?;
        } else {
            debug!(
                "Using cache for {} ({}s < {}s)",
                self.mac,
                (now - self.last_read.unwrap_or(now)).whole_seconds(),
                self.cache_timeout.whole_seconds()
            );
        }

        self.cache.ok_or_else(|| PollFailure::SensorUnavailable {
            mac: self.mac.clone(),
        })
    }

    /// Read a single parameter, sharing the cache with the other parameters
    pub async fn parameter_value(&mut self, parameter: Parameter) -> PollResult<f64> {
        let reading = self.get_value(true).await?;
        Ok(match parameter {
            Parameter::Temperature => reading.temperature,
            Parameter::Humidity => reading.humidity as f64,
            Parameter::Battery => reading.battery as f64,
        })
    }

    /// Fill the cache with new data from the sensor
    async fn fill_cache(&mut self, now: OffsetDateTime) -> PollResult<()> {
        debug!("Filling cache for {} ({})", self.mac, self.model);

        let mut connection = self.transport.connect(&self.mac).await?;

        // Run the exchange, then always release the connection
        let exchange = async {
            connection
                .write_characteristic(
                    self.notification.write_handle,
                    &self.notification.enable_command,
                )
                .await?;
            connection
                .write_characteristic(
                    self.notification.notify_handle,
                    &self.notification.listen_command,
                )
                .await?;
            connection
                .wait_for_notification(self.notification.notify_handle, self.ble_timeout_secs)
                .await
        }
        .await;

        if let Err(e) = connection.disconnect().await {
            warn!("Disconnect from {} failed: {}", self.mac, e);
        }

        let payload = exchange?;
        self.handle_notification(&payload, now)
    }

    fn handle_notification(&mut self, payload: &[u8], now: OffsetDateTime) -> PollResult<()> {
        let raw = match codec::decode_raw(payload) {
            Ok(raw) => raw,
            Err(e) => {
                self.clear_cache();
                return Err(e.into());
            }
        };
        let reading = codec::to_reading(&raw);

        debug!(
            "Received new data from {}: temp={:.1}°C, humidity={}%, battery={}%",
            self.mac, reading.temperature, reading.humidity, reading.battery
        );

        if codec::is_plausible(&raw) {
            self.cache = Some(reading);
            self.last_read = Some(now);
        } else {
            warn!(
                "Discarding implausible reading from {}: raw temp={}, humidity={}%",
                self.mac, raw.temperature_centi_degrees, raw.humidity_percent
            );
            self.cache = None;
            // If a sensor doesn't work, wait 5 minutes before retrying
            self.last_read =
                Some(now - self.cache_timeout + Duration::seconds(RETRY_AFTER_INVALID_SECS));
        }

        Ok(())
    }
}
