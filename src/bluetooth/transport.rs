/// BLE transport seam and its BlueZ implementation
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use log::{debug, warn};
use tokio::time::{timeout, Duration};
use uuid::Uuid;

use bluer::gatt::remote::Characteristic;
use bluer::Address;

use crate::error::TransportError;

// Client Characteristic Configuration descriptor (0x2902)
const CCCD_UUID: Uuid = Uuid::from_u128(0x0000_2902_0000_1000_8000_0080_5f9b_34fb);
const CONNECT_TIMEOUT_SECS: u64 = 20;

/// Protocol constants for the enable-notifications handshake
///
/// `enable_command` goes to `write_handle` and turns notifications on,
/// `listen_command` goes to `notify_handle` to put the device into listen
/// mode before waiting for the first notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationConfig {
    pub enable_command: Vec<u8>,
    pub write_handle: u16,
    pub listen_command: Vec<u8>,
    pub notify_handle: u16,
}

impl NotificationConfig {
    /// Handshake used by the Xiaomi LCD thermometers: enable notifications
    /// of temperature, humidity and battery voltage, then wait for one.
    pub fn xiaomi_thermometer() -> Self {
        NotificationConfig {
            enable_command: vec![0x01, 0x00],
            write_handle: 0x0038,
            listen_command: vec![0xF4, 0x01, 0x00],
            notify_handle: 0x0046,
        }
    }
}

/// Parse a configured MAC address, accepting either letter case
pub fn parse_address(mac: &str) -> Result<Address, TransportError> {
    mac.trim()
        .to_uppercase()
        .parse()
        .map_err(|_| TransportError::InvalidAddress(mac.to_string()))
}

/// Opens connections to BLE peripherals
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self, mac: &str) -> Result<Box<dyn Connection>, TransportError>;
}

/// An open session with one peripheral
///
/// Callers must call [`Connection::disconnect`] on every exit path.
#[async_trait]
pub trait Connection: Send {
    async fn write_characteristic(&mut self, handle: u16, data: &[u8])
        -> Result<(), TransportError>;

    async fn wait_for_notification(
        &mut self,
        handle: u16,
        timeout_secs: u64,
    ) -> Result<Vec<u8>, TransportError>;

    async fn disconnect(&mut self) -> Result<(), TransportError>;
}

/// Transport backed by the BlueZ daemon
pub struct BluerTransport {
    adapter: bluer::Adapter,
}

impl BluerTransport {
    /// Open a Bluetooth session on the default adapter and power it on
    pub async fn new() -> Result<Self, bluer::Error> {
        let session = bluer::Session::new().await?;
        let adapter = session.default_adapter().await?;
        adapter.set_powered(true).await?;
        debug!("Using Bluetooth adapter {}", adapter.name());
        Ok(BluerTransport { adapter })
    }
}

#[async_trait]
impl Transport for BluerTransport {
    async fn connect(&self, mac: &str) -> Result<Box<dyn Connection>, TransportError> {
        let address = parse_address(mac)?;

        let connect_error = |reason: String| TransportError::Connect {
            mac: mac.to_string(),
            reason,
        };

        let device = self
            .adapter
            .device(address)
            .map_err(|e| connect_error(e.to_string()))?;

        match timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS), device.connect()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(connect_error(e.to_string())),
            Err(_) => return Err(connect_error("connection attempt timed out".into())),
        }

        debug!("Connected to {}", mac);
        Ok(Box::new(BluerConnection {
            device,
            streams: Vec::new(),
        }))
    }
}

/// A connected BlueZ device plus the notification streams opened on it
struct BluerConnection {
    device: bluer::Device,
    streams: Vec<(u16, BoxStream<'static, Vec<u8>>)>,
}

/// BlueZ names GATT objects after their declaration handle; the value
/// handle immediately follows it.
fn characteristic_matches(characteristic: &Characteristic, handle: u16) -> bool {
    let id = characteristic.id();
    id == handle || id.wrapping_add(1) == handle
}

async fn all_characteristics(device: &bluer::Device) -> Result<Vec<Characteristic>, bluer::Error> {
    let mut all = Vec::new();
    for service in device.services().await? {
        all.extend(service.characteristics().await?);
    }
    Ok(all)
}

impl BluerConnection {
    async fn start_notify(&mut self, characteristic: &Characteristic) -> Result<(), bluer::Error> {
        let stream = characteristic.notify().await?;
        self.streams.push((characteristic.id(), stream.boxed()));
        Ok(())
    }
}

#[async_trait]
impl Connection for BluerConnection {
    async fn write_characteristic(
        &mut self,
        handle: u16,
        data: &[u8],
    ) -> Result<(), TransportError> {
        let write_error = |e: bluer::Error| TransportError::Write {
            handle,
            reason: e.to_string(),
        };

        let characteristics = all_characteristics(&self.device)
            .await
            .map_err(write_error)?;
        for characteristic in &characteristics {
            for descriptor in characteristic.descriptors().await.map_err(write_error)? {
                if descriptor.id() != handle {
                    continue;
                }
                // BlueZ refuses raw CCCD writes, subscribe instead
                if descriptor.uuid().await.map_err(write_error)? == CCCD_UUID {
                    if data.first().map_or(false, |b| b & 0x01 != 0) {
                        self.start_notify(characteristic).await.map_err(write_error)?;
                    }
                    return Ok(());
                }
                return descriptor.write(data).await.map_err(write_error);
            }

            if characteristic_matches(characteristic, handle) {
                return characteristic.write(data).await.map_err(write_error);
            }
        }

        Err(TransportError::HandleNotFound { handle })
    }

    async fn wait_for_notification(
        &mut self,
        handle: u16,
        timeout_secs: u64,
    ) -> Result<Vec<u8>, TransportError> {
        let notify_error = |e: bluer::Error| TransportError::Notification {
            handle,
            reason: e.to_string(),
        };

        // Like the enable command, the listen command only arms the device,
        // the data arrives on the subscription opened for the CCCD
        let mut index = self.streams.len().checked_sub(1);

        if index.is_none() {
            let characteristics = all_characteristics(&self.device)
                .await
                .map_err(notify_error)?;
            if let Some(characteristic) = characteristics
                .iter()
                .find(|c| characteristic_matches(c, handle))
            {
                self.start_notify(characteristic).await.map_err(notify_error)?;
                index = Some(self.streams.len() - 1);
            }
        }

        let index = index.ok_or(TransportError::HandleNotFound { handle })?;
        let stream = &mut self.streams[index].1;

        match timeout(Duration::from_secs(timeout_secs), stream.next()).await {
            Ok(Some(value)) => Ok(value),
            Ok(None) => Err(TransportError::Notification {
                handle,
                reason: "notification stream closed".into(),
            }),
            Err(_) => Err(TransportError::Timeout {
                handle,
                secs: timeout_secs,
            }),
        }
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        // Dropping the streams ends the notify sessions
        self.streams.clear();
        if let Err(e) = self.device.disconnect().await {
            warn!("Failed to disconnect {}: {}", self.device.address(), e);
            return Err(TransportError::Connect {
                mac: self.device.address().to_string(),
                reason: e.to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xiaomi_handshake_constants() {
        let config = NotificationConfig::xiaomi_thermometer();
        assert_eq!(config.enable_command, vec![0x01, 0x00]);
        assert_eq!(config.write_handle, 0x0038);
        assert_eq!(config.listen_command, vec![0xF4, 0x01, 0x00]);
        assert_eq!(config.notify_handle, 0x0046);
    }

    #[test]
    fn addresses_parse_in_any_case() {
        let expected = Address::new([0xA4, 0xC1, 0x38, 0x0A, 0xBC, 0xDE]);
        assert_eq!(parse_address("a4:c1:38:0a:bc:de").unwrap(), expected);
        assert_eq!(parse_address(" A4:C1:38:0A:BC:DE ").unwrap(), expected);
        assert!(matches!(
            parse_address("not-a-mac"),
            Err(TransportError::InvalidAddress(_))
        ));
    }

    #[test]
    fn bluez_connection_can_be_boxed() {
        // Connection futures are awaited from spawned tasks
        fn assert_send<T: Send>() {}
        assert_send::<BluerConnection>();
        assert_send::<Box<dyn Connection>>();
    }

    #[test]
    fn cccd_uuid_is_standard() {
        assert_eq!(
            CCCD_UUID.to_string(),
            "00002902-0000-1000-8000-00805f9b34fb"
        );
    }
}
