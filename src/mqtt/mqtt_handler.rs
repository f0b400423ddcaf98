//! Broker session lifecycle for the tank.
//!
//! # Setup State Machine
//!
//! ```text
//! Unresolved ──resolve()──► Resolved(addr) ──open_session()──► Online ──run()
//! ```
//!
//! `Online` owns the client, the tank and the dispatcher and drives them from
//! one `select!` loop: forwarded broker events, the tank's next step deadline,
//! the reconnect deadline and the shutdown token. Nothing else touches that
//! state, so there are no locks.
//!
//! # Reconnection
//!
//! The `rumqttc` event loop runs in its own task and forwards every poll
//! result over a channel. A connect in progress lives inside one `poll()`
//! call, so that call must never be dropped by a tank tick winning the
//! `select!`. After an error the event task waits for the instant the session
//! loop hands back before polling again, which makes `rumqttc` reconnect:
//! short after an accepted session drops, long after a refused or timed out
//! attempt. Attempts are unbounded.

use std::io::ErrorKind;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use chrono::{DateTime, Local};
use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, LastWill, MqttOptions,
    Outgoing, Packet, QoS, SubscribeReasonCode,
};
use statum::{machine, state};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::config::ReconnectConfig;
use super::dispatcher::TopicDispatcher;
use super::message_manager::MqttMessage;
use super::transport::Transport;
use super::{TopicSet, OFFLINE, ONLINE};
use crate::config::Config;
use crate::identity::ClientIdentity;
use crate::tank::Tank;

const MAX_ERROR_MESSAGES: usize = 10;
const DISCONNECT_FLUSH_TIMEOUT: Duration = Duration::from_secs(2);
const EVENT_QUEUE: usize = 64;

type PollResult = Result<Event, ConnectionError>;

#[derive(Clone, Default, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Failed,
    Reconnecting,
}

#[derive(Clone, Debug, Default)]
pub struct MqttStatus {
    pub connection_state: ConnectionState,
    pub error_messages: Vec<String>,
    pub attempts: u64,
    pub messages_received: usize,
    pub messages_sent: usize,
    pub last_activity: Option<DateTime<Local>>,
}

impl MqttStatus {
    fn transition(&mut self, next: ConnectionState) {
        if self.connection_state != next {
            info!("MQTT {:?} -> {:?}", self.connection_state, next);
            self.connection_state = next;
        }
    }

    fn record_error(&mut self, message: String) {
        if self.error_messages.len() == MAX_ERROR_MESSAGES {
            self.error_messages.remove(0);
        }
        self.error_messages.push(message);
    }

    fn touch(&mut self) {
        self.last_activity = Some(Local::now());
    }
}

/// How a connection attempt or an established session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionOutcome {
    /// An accepted session went away.
    Disconnected,
    Refused(String),
    Timeout,
    Failed(String),
}

impl ConnectionOutcome {
    pub fn classify(was_connected: bool, error: &ConnectionError) -> Self {
        match error {
            ConnectionError::ConnectionRefused(code) => {
                ConnectionOutcome::Refused(format!("{:?}", code))
            }
            ConnectionError::NetworkTimeout => ConnectionOutcome::Timeout,
            ConnectionError::Io(e) if e.kind() == ErrorKind::TimedOut => ConnectionOutcome::Timeout,
            _ if was_connected => ConnectionOutcome::Disconnected,
            other => ConnectionOutcome::Failed(other.to_string()),
        }
    }

    pub fn retry_delay(&self, reconnect: &ReconnectConfig) -> Duration {
        match self {
            ConnectionOutcome::Disconnected => reconnect.short_delay(),
            ConnectionOutcome::Refused(_)
            | ConnectionOutcome::Timeout
            | ConnectionOutcome::Failed(_) => reconnect.long_delay(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Failed to resolve broker host '{host}': {source}")]
    Resolve {
        host: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Broker host '{0}' resolved to no address")]
    NoAddress(String),

    #[error("Failed to allocate MQTT session: {0}")]
    Allocation(String),

    #[error("MQTT event loop stopped unexpectedly")]
    EventLoopClosed,

    #[error("Shutdown requested")]
    Shutdown,
}

/// Resolves `host` as a literal IPv4 address first, then via name lookup.
pub async fn resolve_broker(host: &str, port: u16) -> Result<SocketAddr, SessionError> {
    if let Ok(ip) = host.parse::<Ipv4Addr>() {
        return Ok(SocketAddr::from((ip, port)));
    }

    let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, port))
        .await
        .map_err(|source| SessionError::Resolve {
            host: host.to_string(),
            source,
        })?
        .collect();
    debug!("'{}' resolved to {:?}", host, addrs);

    addrs
        .iter()
        .find(|addr| addr.is_ipv4())
        .or_else(|| addrs.first())
        .copied()
        .ok_or_else(|| SessionError::NoAddress(host.to_string()))
}

/// Client half and event loop half of one broker session.
pub struct Session {
    pub client: AsyncClient,
    // Moved into the event task when the session loop starts.
    eventloop: Option<EventLoop>,
    broker: SocketAddr,
}

/// Polls the event loop forever, one `poll()` at a time, forwarding results.
///
/// After an error it waits for the resume instant from `resume` before the
/// next poll starts the reconnect. Stops after forwarding the outgoing
/// DISCONNECT or when either channel closes.
async fn pump_events(
    mut eventloop: EventLoop,
    events: mpsc::Sender<PollResult>,
    mut resume: mpsc::Receiver<Instant>,
) {
    loop {
        let event = eventloop.poll().await;
        let failed = event.is_err();
        let closing = matches!(event, Ok(Event::Outgoing(Outgoing::Disconnect)));
        if events.send(event).await.is_err() || closing {
            break;
        }
        if failed {
            match resume.recv().await {
                Some(at) => tokio::time::sleep_until(at).await,
                None => break,
            }
        }
    }
    debug!("MQTT event task stopped");
}

#[state]
#[derive(Debug, Clone)]
pub enum SessionPhase {
    Unresolved,
    Resolved(SocketAddr),
    Online,
}

#[machine]
pub struct SessionManager<S: SessionPhase> {
    config: Config,
    identity: ClientIdentity,
    topics: TopicSet,
    tank: Tank,
    dispatcher: TopicDispatcher,
    session: Option<Session>,
    status: MqttStatus,
    // Set while waiting out a reconnect backoff; polling pauses until then.
    reconnect_at: Option<Instant>,
    shutdown: CancellationToken,
}

#[cfg(test)]
impl<S: SessionPhase> SessionManager<S> {
    pub fn status(&self) -> &MqttStatus {
        &self.status
    }

    pub fn tank(&self) -> &Tank {
        &self.tank
    }

    pub fn identity(&self) -> &ClientIdentity {
        &self.identity
    }
}

impl SessionManager<Unresolved> {
    pub fn create(config: Config, identity: ClientIdentity, shutdown: CancellationToken) -> Self {
        let topics = TopicSet::new(&config.topics.root);
        let tank = Tank::new(config.tank.clone(), &topics);
        let dispatcher = TopicDispatcher::new(topics.clone());
        info!("Session manager created for '{}'", identity);

        Self::new(
            config,
            identity,
            topics,
            tank,
            dispatcher,
            None,                 // session
            MqttStatus::default(), // status
            None,                 // reconnect_at
            shutdown,
        )
    }

    /// Resolves the broker once, retrying after `resolve_retry_ms` on failure.
    pub async fn resolve(self) -> Result<SessionManager<Resolved>, SessionError> {
        let host = self.config.broker.host.clone();
        let port = self.config.broker.port;

        loop {
            match resolve_broker(&host, port).await {
                Ok(addr) => {
                    info!("Broker '{}' resolved to {}", host, addr);
                    return Ok(self.transition_with(addr));
                }
                Err(e) => {
                    let retry = self.config.reconnect.resolve_retry();
                    error!("Resolve error: {}, retrying in {:?}", e, retry);
                    tokio::select! {
                        _ = self.shutdown.cancelled() => return Err(SessionError::Shutdown),
                        _ = tokio::time::sleep(retry) => {}
                    }
                }
            }
        }
    }
}

impl SessionManager<Resolved> {
    /// Allocates the client with its Last-Will; the first `poll()` connects.
    pub fn open_session(mut self) -> Result<SessionManager<Online>, SessionError> {
        let broker = self
            .get_state_data()
            .copied()
            .ok_or_else(|| SessionError::Allocation("broker address missing".to_string()))?;

        let client_id = self.identity.as_str();
        if client_id.is_empty() || client_id.starts_with(' ') {
            return Err(SessionError::Allocation(format!(
                "invalid client id '{}'",
                client_id
            )));
        }

        let mut options = MqttOptions::new(client_id, broker.ip().to_string(), broker.port());
        options
            .set_keep_alive(Duration::from_secs(self.config.broker.keep_alive_secs))
            .set_last_will(LastWill::new(
                self.topics.availability.clone(),
                OFFLINE.as_bytes().to_vec(),
                QoS::AtLeastOnce,
                true,
            ));

        let (client, eventloop) = AsyncClient::new(options, self.config.broker.request_capacity);
        self.session = Some(Session {
            client,
            eventloop: Some(eventloop),
            broker,
        });

        self.status.attempts += 1;
        self.status.transition(ConnectionState::Connecting);
        info!("Connecting to {}...", broker);
        Ok(self.transition())
    }
}

impl SessionManager<Online> {
    /// Runs until the shutdown token is cancelled, then goes offline cleanly.
    pub async fn run(mut self) -> Result<(), SessionError> {
        let shutdown = self.shutdown.clone();
        let eventloop = self
            .session
            .as_mut()
            .and_then(|session| session.eventloop.take())
            .ok_or_else(|| SessionError::Allocation("event loop missing".to_string()))?;

        let (event_tx, mut events) = mpsc::channel(EVENT_QUEUE);
        let (resume_tx, resume_rx) = mpsc::channel(1);
        let pump: JoinHandle<()> = tokio::spawn(pump_events(eventloop, event_tx, resume_rx));
        info!("Entering session loop");

        loop {
            let tank_deadline = self.tank.next_deadline();
            let reconnect_at = self.reconnect_at;

            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Shutdown requested");
                    break;
                }
                event = events.recv() => {
                    let Some(event) = event else {
                        error!("MQTT event task ended");
                        return Err(SessionError::EventLoopClosed);
                    };
                    let failed = event.is_err();
                    let now = Instant::now();
                    self.handle_event(event, now);
                    if failed {
                        let resume_at = self.reconnect_at.unwrap_or(now);
                        if let Err(e) = resume_tx.try_send(resume_at) {
                            warn!("Unable to schedule reconnect: {}", e);
                        }
                    }
                }
                _ = sleep_until_or_now(reconnect_at), if reconnect_at.is_some() => {
                    self.begin_reconnect();
                }
                _ = sleep_until_or_now(tank_deadline), if tank_deadline.is_some() => {
                    self.advance_tank(Instant::now());
                }
            }
        }

        self.go_offline(&mut events).await;
        pump.abort();
        Ok(())
    }

    pub fn handle_event(&mut self, event: Result<Event, ConnectionError>, now: Instant) {
        match event {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                if ack.code == ConnectReturnCode::Success {
                    self.on_accepted();
                } else {
                    self.on_outcome(ConnectionOutcome::Refused(format!("{:?}", ack.code)), now);
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                self.status.messages_received += 1;
                self.status.touch();
                if let Some(command) = self.dispatcher.dispatch(&publish.topic, &publish.payload) {
                    if let Some(session) = self.session.as_mut() {
                        self.tank.apply(command, now, &mut session.client);
                    }
                }
            }
            Ok(Event::Incoming(Packet::SubAck(ack))) => {
                for code in &ack.return_codes {
                    match code {
                        SubscribeReasonCode::Success(qos) => {
                            info!("Subscribed (pkid {}) at {:?}", ack.pkid, qos)
                        }
                        SubscribeReasonCode::Failure => {
                            error!("Subscribe failed (pkid {})", ack.pkid);
                            self.status
                                .record_error(format!("subscribe pkid {} refused", ack.pkid));
                        }
                    }
                }
            }
            Ok(Event::Incoming(Packet::PubAck(ack))) => {
                debug!("Published pkid {}", ack.pkid);
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                info!("Broker sent disconnect");
            }
            Ok(Event::Incoming(packet)) => {
                debug!("Incoming {:?}", packet);
            }
            Ok(Event::Outgoing(Outgoing::Publish(pkid))) => {
                self.status.messages_sent += 1;
                self.status.touch();
                debug!("Outgoing publish pkid {}", pkid);
            }
            Ok(Event::Outgoing(_)) => {}
            Err(e) => {
                let was_connected = self.status.connection_state == ConnectionState::Connected;
                let outcome = ConnectionOutcome::classify(was_connected, &e);
                warn!("MQTT connection error: {} ({:?})", e, outcome);
                self.status.record_error(e.to_string());
                self.on_outcome(outcome, now);
            }
        }
    }

    pub fn advance_tank(&mut self, now: Instant) -> usize {
        match self.session.as_mut() {
            Some(session) => self.tank.advance_to(now, &mut session.client),
            None => 0,
        }
    }

    /// Delay until the pending reconnect, if one is scheduled.
    #[cfg(test)]
    pub fn reconnect_in(&self, now: Instant) -> Option<Duration> {
        self.reconnect_at.map(|at| at.saturating_duration_since(now))
    }

    fn on_accepted(&mut self) {
        self.reconnect_at = None;
        self.status.transition(ConnectionState::Connected);
        self.status.touch();
        info!("MQTT '{}' connected", self.identity);

        let Some(session) = self.session.as_mut() else {
            return;
        };
        self.dispatcher.subscribe_all(&mut session.client);

        info!("{}={}", self.topics.availability, ONLINE);
        if let Err(e) = session
            .client
            .publish_message(MqttMessage::retained(&self.topics.availability, ONLINE))
        {
            error!("Availability publish failed: {}", e);
        }
        let report = self.tank.publish_state(&mut session.client);
        info!(
            "Tank at {}% ({:?}), fill request {}, alarm {}",
            self.tank.level().value(),
            self.tank.state(),
            self.tank.fill_request(),
            self.tank.alarm_active()
        );
        debug!(
            "Baseline queued: level {}, direction {}",
            report.level, report.direction
        );
    }

    fn on_outcome(&mut self, outcome: ConnectionOutcome, now: Instant) {
        let delay = outcome.retry_delay(&self.config.reconnect);
        let next = match outcome {
            ConnectionOutcome::Disconnected => {
                info!("MQTT disconnected");
                ConnectionState::Reconnecting
            }
            _ => ConnectionState::Failed,
        };
        self.status.transition(next);
        info!("Next connection attempt in {:?}", delay);
        self.reconnect_at = Some(now + delay);
    }

    fn begin_reconnect(&mut self) {
        self.reconnect_at = None;
        self.status.attempts += 1;
        self.status.transition(ConnectionState::Connecting);
        if let Some(session) = &self.session {
            info!(
                "Connecting to {}... (attempt {})",
                session.broker, self.status.attempts
            );
        }
    }

    async fn go_offline(&mut self, events: &mut mpsc::Receiver<PollResult>) {
        let connected = self.status.connection_state == ConnectionState::Connected;
        let Some(session) = self.session.as_mut() else {
            return;
        };

        if connected {
            info!("{}={}", self.topics.availability, OFFLINE);
            if let Err(e) = session
                .client
                .publish_message(MqttMessage::retained(&self.topics.availability, OFFLINE))
            {
                error!("Offline publish failed: {}", e);
            }
            if let Err(e) = session.client.try_disconnect() {
                warn!("Failed to request disconnect: {}", e);
            }

            let flush = async {
                loop {
                    match events.recv().await {
                        Some(Ok(Event::Outgoing(Outgoing::Disconnect))) | Some(Err(_)) | None => {
                            break
                        }
                        Some(Ok(_)) => {}
                    }
                }
            };
            if tokio::time::timeout(DISCONNECT_FLUSH_TIMEOUT, flush)
                .await
                .is_err()
            {
                warn!("Timed out flushing disconnect");
            }
        }

        self.status.transition(ConnectionState::Disconnected);
        info!(
            "Session closed after {} attempt(s): {} sent, {} received, {} error(s), last activity {:?}",
            self.status.attempts,
            self.status.messages_sent,
            self.status.messages_received,
            self.status.error_messages.len(),
            self.status.last_activity
        );
    }
}

async fn sleep_until_or_now(deadline: Option<Instant>) {
    tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mqtt::dispatcher::Command;
    use crate::tank::TankState;
    use rumqttc::{ConnAck, Publish};
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    const CONNACK: [u8; 4] = [0x20, 0x02, 0x00, 0x00];

    fn reconnect() -> ReconnectConfig {
        ReconnectConfig::default()
    }

    fn online_at(port: u16, shutdown: CancellationToken) -> SessionManager<Online> {
        let mut config = Config::default();
        config.broker.host = "127.0.0.1".to_string();
        config.broker.port = port;
        let identity = ClientIdentity::from_hardware_id("nxp_", &[0x12, 0x34]).unwrap();
        let manager = SessionManager::<Unresolved>::create(config, identity, shutdown);
        let broker: SocketAddr = ([127, 0, 0, 1], port).into();
        let resolved: SessionManager<Resolved> = manager.transition_with(broker);
        resolved.open_session().unwrap()
    }

    fn online() -> SessionManager<Online> {
        online_at(1883, CancellationToken::new())
    }

    fn position(haystack: &[u8], needle: &[u8]) -> Option<usize> {
        haystack.windows(needle.len()).position(|w| w == needle)
    }

    /// Accepts connections, answers CONNECT with CONNACK after `connack_delay`
    /// and records every byte the client sends afterwards.
    async fn slow_broker(
        connack_delay: Duration,
    ) -> (u16, Arc<AtomicUsize>, Arc<Mutex<Vec<u8>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let accepted = Arc::new(AtomicUsize::new(0));
        let wire = Arc::new(Mutex::new(Vec::new()));

        let (count, capture) = (accepted.clone(), wire.clone());
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                count.fetch_add(1, Ordering::SeqCst);
                let capture = capture.clone();
                tokio::spawn(async move {
                    let mut buf = [0u8; 2048];
                    if socket.read(&mut buf).await.unwrap_or(0) == 0 {
                        return;
                    }
                    tokio::time::sleep(connack_delay).await;
                    if socket.write_all(&CONNACK).await.is_err() {
                        return;
                    }
                    while let Ok(n) = socket.read(&mut buf).await {
                        if n == 0 {
                            break;
                        }
                        capture.lock().unwrap().extend_from_slice(&buf[..n]);
                    }
                });
            }
        });

        (port, accepted, wire)
    }

    async fn run_for(manager: SessionManager<Online>, shutdown: CancellationToken, period: Duration) {
        let stop = async {
            tokio::time::sleep(period).await;
            shutdown.cancel();
        };
        let (result, ()) = tokio::time::timeout(Duration::from_secs(5), async {
            tokio::join!(manager.run(), stop)
        })
        .await
        .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn slow_connack_is_not_restarted_by_tank_ticks() {
        let (port, accepted, wire) = slow_broker(Duration::from_millis(40)).await;
        let shutdown = CancellationToken::new();
        let mut manager = online_at(port, shutdown.clone());
        let session = manager.session.as_mut().unwrap();
        manager
            .tank
            .apply(Command::FillRequest(true), Instant::now(), &mut session.client);
        assert_eq!(manager.tank.state(), TankState::Draining);

        run_for(manager, shutdown, Duration::from_millis(400)).await;

        assert_eq!(accepted.load(Ordering::SeqCst), 1);
        let wire = wire.lock().unwrap().clone();
        let subscribe = position(&wire, b"tank/oxygen_request").unwrap();
        let online = position(&wire, ONLINE.as_bytes()).unwrap();
        assert!(subscribe < online, "ONLINE sent before SUBSCRIBE");
        assert!(position(&wire, b"tank/oxygen_level").is_some());
    }

    #[tokio::test]
    async fn idle_tank_connects_once_and_announces_availability() {
        let (port, accepted, wire) = slow_broker(Duration::from_millis(40)).await;
        let shutdown = CancellationToken::new();
        let manager = online_at(port, shutdown.clone());

        run_for(manager, shutdown, Duration::from_millis(200)).await;
        // Let the broker task read what the client flushed before closing.
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(accepted.load(Ordering::SeqCst), 1);
        let wire = wire.lock().unwrap().clone();
        assert!(position(&wire, b"tank/alarm").is_some());
        assert!(position(&wire, ONLINE.as_bytes()).is_some());
        assert!(position(&wire, OFFLINE.as_bytes()).is_some());
    }

    fn accepted() -> Result<Event, ConnectionError> {
        Ok(Event::Incoming(Packet::ConnAck(ConnAck::new(
            ConnectReturnCode::Success,
            false,
        ))))
    }

    fn reset() -> ConnectionError {
        ConnectionError::Io(io::Error::from(ErrorKind::ConnectionReset))
    }

    #[test]
    fn dropped_session_uses_short_backoff() {
        let outcome = ConnectionOutcome::classify(true, &reset());
        assert_eq!(outcome, ConnectionOutcome::Disconnected);
        assert_eq!(outcome.retry_delay(&reconnect()), Duration::from_secs(1));
    }

    #[test]
    fn failed_attempts_use_long_backoff() {
        let refused = ConnectionError::ConnectionRefused(ConnectReturnCode::NotAuthorized);
        for (was_connected, error) in [
            (false, refused),
            (false, ConnectionError::NetworkTimeout),
            (true, ConnectionError::NetworkTimeout),
            (false, reset()),
        ] {
            let outcome = ConnectionOutcome::classify(was_connected, &error);
            assert_ne!(outcome, ConnectionOutcome::Disconnected);
            assert_eq!(outcome.retry_delay(&reconnect()), Duration::from_secs(10));
        }
    }

    #[tokio::test]
    async fn literal_ipv4_skips_name_lookup() {
        let addr = resolve_broker("192.168.4.2", 1884).await.unwrap();
        assert_eq!(addr, SocketAddr::from(([192, 168, 4, 2], 1884)));
    }

    #[tokio::test]
    async fn localhost_resolves_through_lookup() {
        let addr = resolve_broker("localhost", 1883).await.unwrap();
        assert!(addr.ip().is_loopback());
        assert_eq!(addr.port(), 1883);
    }

    #[tokio::test]
    async fn resolve_moves_to_resolved_state() {
        let mut config = Config::default();
        config.broker.host = "10.1.2.3".to_string();
        let identity = ClientIdentity::from_hardware_id("nxp_", &[1]).unwrap();
        let manager = SessionManager::<Unresolved>::create(config, identity, CancellationToken::new());

        let resolved = manager.resolve().await.unwrap();

        assert_eq!(
            resolved.get_state_data().copied(),
            Some(SocketAddr::from(([10, 1, 2, 3], 1883)))
        );
    }

    #[tokio::test]
    async fn opening_a_session_starts_connecting() {
        let manager = online();
        assert_eq!(manager.status().connection_state, ConnectionState::Connecting);
        assert_eq!(manager.status().attempts, 1);
        assert_eq!(manager.identity().as_str(), "nxp_3412");
    }

    #[tokio::test]
    async fn disconnect_after_acceptance_schedules_short_retry() {
        let mut manager = online();
        let now = Instant::now();
        manager.handle_event(accepted(), now);
        assert_eq!(manager.status().connection_state, ConnectionState::Connected);
        assert_eq!(manager.reconnect_in(now), None);

        manager.handle_event(Err(reset()), now);

        assert_eq!(manager.status().connection_state, ConnectionState::Reconnecting);
        assert_eq!(manager.reconnect_in(now), Some(Duration::from_secs(1)));

        manager.begin_reconnect();
        assert_eq!(manager.status().connection_state, ConnectionState::Connecting);
        assert_eq!(manager.status().attempts, 2);
    }

    #[tokio::test]
    async fn failure_before_acceptance_schedules_long_retry() {
        let mut manager = online();
        let now = Instant::now();

        manager.handle_event(Err(ConnectionError::NetworkTimeout), now);

        assert_eq!(manager.status().connection_state, ConnectionState::Failed);
        assert_eq!(manager.reconnect_in(now), Some(Duration::from_secs(10)));
        assert_eq!(manager.status().error_messages.len(), 1);
    }

    #[tokio::test]
    async fn incoming_commands_drive_the_tank() {
        let mut manager = online();
        let now = Instant::now();
        manager.handle_event(accepted(), now);

        let request = Publish::new("tank/oxygen_request", QoS::AtLeastOnce, "ON");
        manager.handle_event(Ok(Event::Incoming(Packet::Publish(request))), now);

        assert_eq!(manager.status().messages_received, 1);
        assert_eq!(manager.tank().state(), TankState::Draining);
        assert_eq!(manager.tank().level().value(), 99);

        assert_eq!(manager.advance_tank(now + Duration::from_millis(20)), 2);
        assert_eq!(manager.tank().level().value(), 97);

        let alarm = Publish::new("tank/alarm", QoS::AtLeastOnce, "ON");
        manager.handle_event(Ok(Event::Incoming(Packet::Publish(alarm))), now);
        assert_eq!(manager.tank().state(), TankState::Idle);
        assert!(manager.tank().alarm_active());
    }

    #[tokio::test]
    async fn tank_state_survives_reconnection() {
        let mut manager = online();
        let now = Instant::now();
        manager.handle_event(accepted(), now);
        let request = Publish::new("tank/oxygen_request", QoS::AtLeastOnce, "ON");
        manager.handle_event(Ok(Event::Incoming(Packet::Publish(request))), now);

        manager.handle_event(Err(reset()), now);
        manager.begin_reconnect();
        manager.handle_event(accepted(), now + Duration::from_secs(1));

        assert!(manager.tank().fill_request());
        assert_eq!(manager.tank().level().value(), 99);
    }
}
