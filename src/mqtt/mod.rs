//! # MQTT Integration Module
//!
//! Connects the simulated tank to a broker: owns the session lifecycle, turns
//! incoming publications into tank commands and carries the tank's outbound
//! state publications.
//!
//! ## Module Architecture
//!
//! ```text
//! mqtt/
//! ├── config.rs           - Broker, topic and reconnect settings
//! ├── dispatcher.rs       - Topic notification + payload → Command
//! ├── message_manager.rs  - Outbound message representation
//! ├── mqtt_handler.rs     - Session state machine and event loop
//! └── transport.rs        - Publish/subscribe seam used by the tank
//! ```
//!
//! ## Topics
//!
//! All topic names hang off a configurable root (default `tank`):
//!
//! | Leaf            | Direction | Payload                          |
//! |-----------------|-----------|----------------------------------|
//! | availability    | publish   | `ONLINE`, Last-Will `OFFLINE`    |
//! | oxygen_level    | publish   | decimal level                    |
//! | fill_state      | publish   | `INCREASE`/`DECREASE`/`STABLE`   |
//! | oxygen_request  | subscribe | `ON` → drain, anything else stop |
//! | alarm           | subscribe | `ON` → freeze, anything else off |

pub mod config;
pub mod dispatcher;
pub mod message_manager;
pub mod mqtt_handler;
pub mod transport;

pub const ONLINE: &str = "ONLINE";
pub const OFFLINE: &str = "OFFLINE";

/// Fully qualified topic names for one tank.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TopicSet {
    pub availability: String,
    pub oxygen_level: String,
    pub fill_state: String,
    pub oxygen_request: String,
    pub alarm: String,
}

impl TopicSet {
    pub fn new(root: &str) -> Self {
        let root = root.trim_end_matches('/');
        let topic = |leaf: &str| format!("{}/{}", root, leaf);
        TopicSet {
            availability: topic("availability"),
            oxygen_level: topic("oxygen_level"),
            fill_state: topic("fill_state"),
            oxygen_request: topic("oxygen_request"),
            alarm: topic("alarm"),
        }
    }

    /// Topics the tank listens on, in subscription order.
    pub fn command_topics(&self) -> [&str; 2] {
        [&self.oxygen_request, &self.alarm]
    }
}

impl Default for TopicSet {
    fn default() -> Self {
        TopicSet::new("tank")
    }
}
