//! Turns incoming publications into tank commands.
//!
//! Delivery happens in two calls: a notification naming the topic, then one
//! or more payload fragments. The transport delivers a single message at a
//! time, so one pending topic is enough to pair them up.

use rumqttc::QoS;
use tracing::{debug, error, info, warn};

use super::transport::Transport;
use super::TopicSet;

/// Bytes of the final payload fragment that are inspected.
///
/// Command payloads are `ON`/`OFF`; anything past this window is dropped.
pub const PAYLOAD_WINDOW: usize = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PendingTopic {
    #[default]
    None,
    FillRequest,
    Alarm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    FillRequest(bool),
    Alarm(bool),
}

#[derive(Debug, Clone)]
pub struct TopicDispatcher {
    topics: TopicSet,
    pending: PendingTopic,
}

impl TopicDispatcher {
    pub fn new(topics: TopicSet) -> Self {
        Self {
            topics,
            pending: PendingTopic::None,
        }
    }

    #[cfg(test)]
    pub fn pending(&self) -> PendingTopic {
        self.pending
    }

    /// Requests both command subscriptions; returns how many were queued.
    ///
    /// A failed subscription is logged and not retried; the topic simply
    /// never delivers commands in this session.
    pub fn subscribe_all<T: Transport>(&self, transport: &mut T) -> usize {
        let mut queued = 0;
        for topic in self.topics.command_topics() {
            match transport.subscribe_topic(topic, QoS::AtLeastOnce) {
                Ok(()) => {
                    info!("Subscribing to '{}'", topic);
                    queued += 1;
                }
                Err(e) => error!("Subscribe failed '{}': {}", topic, e),
            }
        }
        queued
    }

    pub fn on_notification(&mut self, topic: &str) -> PendingTopic {
        debug!("Incoming publish for '{}'", topic);
        self.pending = if topic == self.topics.oxygen_request {
            PendingTopic::FillRequest
        } else if topic == self.topics.alarm {
            PendingTopic::Alarm
        } else {
            warn!("Ignoring publish on unknown topic '{}'", topic);
            PendingTopic::None
        };
        self.pending
    }

    /// Consumes the pending topic once the final fragment arrives.
    pub fn on_payload(&mut self, data: &[u8], is_final: bool) -> Option<Command> {
        if !is_final {
            debug!("Dropping non-final fragment of {} bytes", data.len());
            return None;
        }

        let captured = &data[..data.len().min(PAYLOAD_WINDOW)];
        let value = parse_switch(captured);
        let command = match self.pending {
            PendingTopic::FillRequest => Some(Command::FillRequest(value)),
            PendingTopic::Alarm => Some(Command::Alarm(value)),
            PendingTopic::None => None,
        };
        info!(
            "Received {:?} payload '{}' -> {:?}",
            self.pending,
            String::from_utf8_lossy(captured),
            command
        );

        self.pending = PendingTopic::None;
        command
    }

    /// Notification and complete payload in one go, as `rumqttc` delivers them.
    pub fn dispatch(&mut self, topic: &str, payload: &[u8]) -> Option<Command> {
        self.on_notification(topic);
        self.on_payload(payload, true)
    }
}

/// `ON` prefix means true; anything else, including short payloads, is false.
fn parse_switch(payload: &[u8]) -> bool {
    payload.starts_with(b"ON")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mqtt::transport::testing::RecordingTransport;

    fn dispatcher() -> TopicDispatcher {
        TopicDispatcher::new(TopicSet::default())
    }

    #[test]
    fn classifies_command_topics() {
        let mut d = dispatcher();
        assert_eq!(d.on_notification("tank/oxygen_request"), PendingTopic::FillRequest);
        assert_eq!(d.on_notification("tank/alarm"), PendingTopic::Alarm);
        assert_eq!(d.on_notification("tank/oxygen_level"), PendingTopic::None);
    }

    #[test]
    fn decodes_on_prefix_as_true() {
        let mut d = dispatcher();
        assert_eq!(d.dispatch("tank/oxygen_request", b"ON"), Some(Command::FillRequest(true)));
        assert_eq!(d.dispatch("tank/oxygen_request", b"ONWARD"), Some(Command::FillRequest(true)));
        assert_eq!(d.dispatch("tank/alarm", b"OFF"), Some(Command::Alarm(false)));
        assert_eq!(d.dispatch("tank/alarm", b"on"), Some(Command::Alarm(false)));
        assert_eq!(d.dispatch("tank/alarm", b"O"), Some(Command::Alarm(false)));
        assert_eq!(d.dispatch("tank/alarm", b""), Some(Command::Alarm(false)));
    }

    #[test]
    fn only_the_final_fragment_is_acted_upon() {
        let mut d = dispatcher();
        d.on_notification("tank/alarm");

        assert_eq!(d.on_payload(b"ON", false), None);
        assert_eq!(d.pending(), PendingTopic::Alarm);
        assert_eq!(d.on_payload(b"OFF", true), Some(Command::Alarm(false)));
        assert_eq!(d.pending(), PendingTopic::None);
    }

    #[test]
    fn pending_topic_is_consumed_by_one_payload() {
        let mut d = dispatcher();
        d.on_notification("tank/oxygen_request");
        assert_eq!(d.on_payload(b"ON", true), Some(Command::FillRequest(true)));
        assert_eq!(d.on_payload(b"ON", true), None);
    }

    #[test]
    fn unknown_topics_yield_no_command() {
        let mut d = dispatcher();
        assert_eq!(d.dispatch("tank/other", b"ON"), None);
    }

    #[test]
    fn long_payloads_are_truncated_to_the_window() {
        let mut d = dispatcher();
        let long = [b'O', b'N', b'!'].repeat(40);
        assert_eq!(d.dispatch("tank/alarm", &long), Some(Command::Alarm(true)));
    }

    #[test]
    fn subscribes_to_both_command_topics() {
        let mut tx = RecordingTransport::default();
        assert_eq!(dispatcher().subscribe_all(&mut tx), 2);
        assert_eq!(
            tx.subscribed,
            vec![
                ("tank/oxygen_request".to_string(), QoS::AtLeastOnce),
                ("tank/alarm".to_string(), QoS::AtLeastOnce),
            ]
        );
    }

    #[test]
    fn subscribe_failure_is_not_fatal() {
        let mut tx = RecordingTransport {
            fail_subscribe: true,
            ..Default::default()
        };
        assert_eq!(dispatcher().subscribe_all(&mut tx), 0);
    }
}
