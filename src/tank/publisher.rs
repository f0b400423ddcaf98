//! Change-only publication of the tank state.
//!
//! Level and fill state are retained on the broker, so republishing an
//! unchanged value is pure noise. The publisher remembers what it last
//! evaluated and only emits the parts that moved.

use tracing::{debug, error, info};

use super::{FillDirection, OxygenLevel};
use crate::mqtt::message_manager::MqttMessage;
use crate::mqtt::transport::Transport;

/// Which topics a single evaluation actually published.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub level: bool,
    pub direction: bool,
}

#[derive(Debug, Clone)]
pub struct ChangePublisher {
    level_topic: String,
    fill_state_topic: String,
    /// `None` until the first evaluation.
    last_level: Option<OxygenLevel>,
    /// `None` until a direction has been published.
    last_direction: Option<FillDirection>,
}

impl ChangePublisher {
    pub fn new(level_topic: impl Into<String>, fill_state_topic: impl Into<String>) -> Self {
        Self {
            level_topic: level_topic.into(),
            fill_state_topic: fill_state_topic.into(),
            last_level: None,
            last_direction: None,
        }
    }

    /// Publishes level and direction where they differ from the last snapshot.
    ///
    /// The snapshot is updated whether or not anything was sent, so the next
    /// direction is always computed from the most recent level delta.
    pub fn publish_change<T: Transport>(
        &mut self,
        level: OxygenLevel,
        transport: &mut T,
    ) -> PublishReport {
        let mut report = PublishReport::default();

        if self.last_level != Some(level) {
            info!("{}={}%", self.level_topic, level);
            report.level = self.send(transport, &self.level_topic, level.to_string());
        }

        let direction = match self.last_level {
            Some(previous) => FillDirection::between(previous, level),
            None => FillDirection::Stable,
        };
        if self.last_direction != Some(direction) {
            info!("{}={}", self.fill_state_topic, direction);
            report.direction =
                self.send(transport, &self.fill_state_topic, direction.as_str().to_string());
            self.last_direction = Some(direction);
        }

        self.last_level = Some(level);
        report
    }

    /// Publishes `direction` unconditionally and records it as last published.
    pub fn force_direction<T: Transport>(
        &mut self,
        direction: FillDirection,
        transport: &mut T,
    ) -> bool {
        info!("{}={} (forced)", self.fill_state_topic, direction);
        self.last_direction = Some(direction);
        self.send(transport, &self.fill_state_topic, direction.as_str().to_string())
    }

    /// Publishes `level` and the last direction regardless of the snapshot.
    ///
    /// Updates dropped while the session was down leave stale retained values
    /// on the broker; each accepted session resends both.
    pub fn republish<T: Transport>(
        &mut self,
        level: OxygenLevel,
        transport: &mut T,
    ) -> PublishReport {
        let direction = match (self.last_direction, self.last_level) {
            (Some(direction), _) => direction,
            (None, Some(previous)) => FillDirection::between(previous, level),
            (None, None) => FillDirection::Stable,
        };
        info!(
            "{}={}% {}={} (baseline)",
            self.level_topic, level, self.fill_state_topic, direction
        );

        let report = PublishReport {
            level: self.send(transport, &self.level_topic, level.to_string()),
            direction: self.send(
                transport,
                &self.fill_state_topic,
                direction.as_str().to_string(),
            ),
        };
        self.last_level = Some(level);
        self.last_direction = Some(direction);
        report
    }

    #[cfg(test)]
    pub fn last_level(&self) -> Option<OxygenLevel> {
        self.last_level
    }

    #[cfg(test)]
    pub fn last_direction(&self) -> Option<FillDirection> {
        self.last_direction
    }

    fn send<T: Transport>(&self, transport: &mut T, topic: &str, content: String) -> bool {
        match transport.publish_message(MqttMessage::retained(topic, content)) {
            Ok(()) => {
                debug!("Queued '{}'", topic);
                true
            }
            Err(e) => {
                error!("Publish dropped: {}", e);
                false
            }
        }
    }
}
