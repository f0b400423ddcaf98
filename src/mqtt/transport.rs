//! Publish/subscribe seam between the tank logic and the broker client.
//!
//! The tank, the change publisher and the dispatcher never talk to `rumqttc`
//! directly. They get a `&mut impl Transport` for the duration of a call, which
//! keeps them synchronous and lets tests swap in a recorder.

use rumqttc::{AsyncClient, ClientError, QoS};
use tracing::{debug, error};

use super::message_manager::MqttMessage;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Failed to publish '{topic}': {source}")]
    Publish {
        topic: String,
        #[source]
        source: ClientError,
    },

    #[error("Failed to subscribe '{topic}': {source}")]
    Subscribe {
        topic: String,
        #[source]
        source: ClientError,
    },

    #[cfg(test)]
    #[error("Transport rejected request: {0}")]
    Rejected(String),
}

pub trait Transport {
    fn publish_message(&mut self, message: MqttMessage) -> Result<(), TransportError>;

    fn subscribe_topic(&mut self, topic: &str, qos: QoS) -> Result<(), TransportError>;
}

/// Queues requests on the client's request channel without awaiting.
///
/// `try_*` only fails when the channel is full or the event loop is gone;
/// delivery itself is reported later through the event loop.
impl Transport for AsyncClient {
    fn publish_message(&mut self, message: MqttMessage) -> Result<(), TransportError> {
        debug!("Publishing {}", message);
        self.try_publish(
            message.topic.clone(),
            message.qos,
            message.retain,
            message.content.into_bytes(),
        )
        .map_err(|source| {
            error!("Error publishing '{}': {}", message.topic, source);
            TransportError::Publish {
                topic: message.topic,
                source,
            }
        })
    }

    fn subscribe_topic(&mut self, topic: &str, qos: QoS) -> Result<(), TransportError> {
        self.try_subscribe(topic, qos)
            .map_err(|source| TransportError::Subscribe {
                topic: topic.to_string(),
                source,
            })
    }
}
