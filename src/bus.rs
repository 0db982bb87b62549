//! The single MQTT connection shared by the whole bridge.
//!
//! The core depends on this module only through [`MqttBus::publish`] and the
//! inbound message channel handed out by [`MqttBus::connect`]. Startup
//! failure is process-fatal; after that the rumqttc event loop reconnects on
//! its own and the subscription plus availability flag are re-established on
//! every connection acknowledgment.

use std::time::Duration;

use rumqttc::{AsyncClient, Event, EventLoop, LastWill, MqttOptions, Packet, QoS};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::MqttSettings;
use crate::mapper::{availability_topic, command_filter, BusMessage};

#[derive(Debug, Error)]
pub enum BusError {
    #[error("mqtt connection failed: {0}")]
    Connection(#[from] rumqttc::ConnectionError),

    #[error("mqtt client error: {0}")]
    Client(#[from] rumqttc::ClientError),
}

/// One message received from a subscribed topic.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: String,
}

/// Cheap-to-clone handle to the broker connection.
#[derive(Clone)]
pub struct MqttBus {
    client: AsyncClient,
}

impl MqttBus {
    /// Connect, subscribe to every pump's command topics and mark the bridge
    /// online. Returns the handle plus the inbound command stream.
    pub async fn connect(
        mqtt: &MqttSettings,
        root_topic: &str,
    ) -> Result<(Self, mpsc::Receiver<InboundMessage>), BusError> {
        let mut options = MqttOptions::new(mqtt.client_id.clone(), mqtt.host.clone(), mqtt.port);
        options.set_keep_alive(Duration::from_secs(5));
        if let (Some(username), Some(password)) = (&mqtt.username, &mqtt.password) {
            options.set_credentials(username.clone(), password.clone());
        }
        let availability = availability_topic(root_topic);
        options.set_last_will(LastWill::new(
            availability.clone(),
            "offline",
            QoS::AtLeastOnce,
            true,
        ));

        let (client, mut eventloop) = AsyncClient::new(options, 100);

        // Wait for the first ConnAck so a dead broker fails startup loudly
        // instead of retrying in the background forever.
        loop {
            match eventloop.poll().await? {
                Event::Incoming(Packet::ConnAck(_)) => break,
                other => debug!("MQTT startup event: {:?}", other),
            }
        }
        info!("Connected to MQTT broker at {}:{}", mqtt.host, mqtt.port);

        let filter = command_filter(root_topic);
        client.subscribe(filter.clone(), QoS::AtLeastOnce).await?;
        client
            .publish(availability.clone(), QoS::AtLeastOnce, true, "online")
            .await?;

        let (inbound_tx, inbound_rx) = mpsc::channel(256);
        let task_client = client.clone();
        tokio::spawn(async move {
            drive_event_loop(eventloop, task_client, filter, availability, inbound_tx).await;
        });

        Ok((Self { client }, inbound_rx))
    }

    pub async fn publish(&self, message: BusMessage) -> Result<(), BusError> {
        self.client
            .publish(
                message.topic,
                QoS::AtLeastOnce,
                message.retained,
                message.payload,
            )
            .await?;
        Ok(())
    }

    /// Retained offline marker for a clean shutdown; the Last Will covers
    /// the unclean ones.
    pub async fn announce_offline(&self, root_topic: &str) {
        let topic = availability_topic(root_topic);
        if let Err(error) = self
            .client
            .publish(topic, QoS::AtLeastOnce, true, "offline")
            .await
        {
            warn!("Failed to publish offline status: {}", error);
        }
    }
}

async fn drive_event_loop(
    mut eventloop: EventLoop,
    client: AsyncClient,
    filter: String,
    availability: String,
    inbound_tx: mpsc::Sender<InboundMessage>,
) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                match String::from_utf8(publish.payload.to_vec()) {
                    Ok(payload) => {
                        let message = InboundMessage {
                            topic: publish.topic,
                            payload,
                        };
                        if inbound_tx.send(message).await.is_err() {
                            // Dispatcher is gone; the bridge is shutting down.
                            return;
                        }
                    }
                    Err(_) => warn!("Dropping non-UTF-8 payload on {}", publish.topic),
                }
            }
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                // Broker restarts lose session state; re-establish it.
                info!("MQTT session (re-)established");
                if let Err(error) = client.subscribe(filter.clone(), QoS::AtLeastOnce).await {
                    warn!("Re-subscribe failed: {}", error);
                }
                if let Err(error) = client
                    .publish(availability.clone(), QoS::AtLeastOnce, true, "online")
                    .await
                {
                    warn!("Availability publish failed: {}", error);
                }
            }
            Ok(_) => {}
            Err(error) => {
                warn!("MQTT connection error: {}", error);
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}
