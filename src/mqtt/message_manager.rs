use chrono::NaiveDateTime;
use rumqttc::QoS;
use std::fmt;

/// Outbound publication, stamped when it is handed to the transport.
///
/// Every tank publication is QoS 1 and retained, so those are the defaults
/// for [`MqttMessage::retained`]. Availability and state topics rely on the
/// broker replaying the last value to late subscribers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MqttMessage {
    pub topic: String,
    pub content: String,
    pub qos: QoS,
    pub retain: bool,
    pub timestamp: NaiveDateTime,
}

impl fmt::Display for MqttMessage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} - {}={}", self.timestamp, self.topic, self.content)
    }
}

impl MqttMessage {
    pub fn retained(topic: impl Into<String>, content: impl Into<String>) -> Self {
        MqttMessage {
            topic: topic.into(),
            content: content.into(),
            qos: QoS::AtLeastOnce,
            retain: true,
            timestamp: chrono::Local::now().naive_local(),
        }
    }
}
