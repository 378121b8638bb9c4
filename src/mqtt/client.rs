/// Batched publishing to the MQTT broker
use async_trait::async_trait;
use log::{debug, info};
use rumqttc::{AsyncClient, Event, MqttOptions, Outgoing, QoS};
use tokio::time::Duration;

use crate::error::PublishError;
use crate::models::{BrokerConfig, OutgoingMessage};

const KEEP_ALIVE_SECS: u64 = 5;

/// Hands a batch of messages to a broker
#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn publish_batch(
        &self,
        messages: &[OutgoingMessage],
        broker: &BrokerConfig,
    ) -> Result<(), PublishError>;
}

/// Connects once per batch, publishes everything at QoS 0 and disconnects
#[derive(Debug, Default)]
pub struct MqttBus;

pub fn mqtt_options(broker: &BrokerConfig) -> MqttOptions {
    let mut options = MqttOptions::new(&broker.client_id, &broker.host, broker.port);
    options.set_keep_alive(Duration::from_secs(KEEP_ALIVE_SECS));
    if let Some(username) = &broker.username {
        options.set_credentials(username, broker.password.clone().unwrap_or_default());
    }
    options
}

#[async_trait]
impl MessageBus for MqttBus {
    async fn publish_batch(
        &self,
        messages: &[OutgoingMessage],
        broker: &BrokerConfig,
    ) -> Result<(), PublishError> {
        // Room for every publish plus the disconnect, so queueing never waits
        // on the event loop we have not started polling yet
        let (client, mut eventloop) = AsyncClient::new(mqtt_options(broker), messages.len() + 1);

        for message in messages {
            client
                .publish(
                    message.topic.as_str(),
                    QoS::AtMostOnce,
                    message.retain,
                    message.payload.as_bytes(),
                )
                .await?;
        }
        client.disconnect().await?;

        loop {
            match eventloop.poll().await? {
                Event::Outgoing(Outgoing::Disconnect) => break,
                event => debug!("MQTT event: {:?}", event),
            }
        }

        info!(
            "Published {} messages to {}:{}",
            messages.len(),
            broker.host,
            broker.port
        );
        Ok(())
    }
}
