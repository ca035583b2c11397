//! ConnectionManager: owns the duplex link and its lifecycle.
//!
//! The manager never runs on its own task. The event loop awaits
//! [`ConnectionManager::wait`] inside its `select!` and hands the returned
//! [`Trigger`] back to [`ConnectionManager::on_trigger`]; everything the
//! loop has to react to is queued as a [`ConnectionEvent`].
//!
//! ```text
//! Disconnected ──connect──▶ Connecting ──ok──▶ Connected
//!                               ▲                  │ lost / heartbeat timeout
//!                               │ backoff          ▼
//!                               └────────────  Reconnecting
//! ```

use std::{collections::VecDeque, sync::Arc, time::Duration};

use tokio::{
    sync::mpsc,
    task::JoinHandle,
    time::{Instant, sleep_until},
};

use super::backoff::Backoff;
use crate::{
    config::EngineConfig,
    domain::{AuthToken, ConnectionStatus, Connector, Link, OutboundFrame, Timestamp, TransportError},
    infrastructure::dto::frame::encode_frame,
};

type AttemptResult = (u64, Result<Box<dyn Link>, TransportError>);

/// Something the event loop has to react to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    StatusChanged(ConnectionStatus),
    /// A fresh server session is up (first connect or reconnect)
    Resumed,
    /// One inbound text frame, not yet decoded
    Frame(String),
    /// The link went away; a reconnect is already scheduled
    Lost(TransportError),
    /// The server kept rejecting the token; retries stopped
    AuthExpired,
}

/// What woke [`ConnectionManager::wait`] up
pub enum Trigger {
    Attempt {
        generation: u64,
        result: Result<Box<dyn Link>, TransportError>,
    },
    Inbound(Option<Result<String, TransportError>>),
    PingDue,
    /// Nothing received for two heartbeat intervals
    SilenceDue,
    ReconnectDue,
}

pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
    endpoint: String,
    token: Option<AuthToken>,
    status: ConnectionStatus,
    link: Option<Box<dyn Link>>,
    backoff: Backoff,
    auth_failures: u32,
    max_auth_failures: u32,
    heartbeat_interval: Duration,
    connect_timeout: Duration,
    last_inbound: Instant,
    next_ping: Instant,
    reconnect_at: Option<Instant>,
    /// Bumped on every attempt and on disconnect; stale results are dropped
    generation: u64,
    attempt: Option<JoinHandle<()>>,
    attempts_tx: mpsc::UnboundedSender<AttemptResult>,
    attempts_rx: mpsc::UnboundedReceiver<AttemptResult>,
    events: VecDeque<ConnectionEvent>,
}

impl ConnectionManager {
    pub fn new(connector: Arc<dyn Connector>, config: &EngineConfig) -> Self {
        let (attempts_tx, attempts_rx) = mpsc::unbounded_channel();
        let now = Instant::now();
        Self {
            connector,
            endpoint: String::new(),
            token: None,
            status: ConnectionStatus::Disconnected,
            link: None,
            backoff: Backoff::new(config.backoff_base, config.backoff_max),
            auth_failures: 0,
            max_auth_failures: config.max_auth_failures,
            heartbeat_interval: config.heartbeat_interval,
            connect_timeout: config.connect_timeout,
            last_inbound: now,
            next_ping: now,
            reconnect_at: None,
            generation: 0,
            attempt: None,
            attempts_tx,
            attempts_rx,
            events: VecDeque::new(),
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }

    /// Start connecting with `token`.
    ///
    /// While a connect/reconnect cycle is already running, only the endpoint
    /// and the token used by the next attempt are replaced.
    pub fn connect(&mut self, endpoint: String, token: AuthToken) {
        self.endpoint = endpoint;
        self.token = Some(token);
        self.auth_failures = 0;

        if self.status == ConnectionStatus::Disconnected {
            tracing::info!("Connecting to '{}'", self.endpoint);
            self.backoff.reset();
            self.set_status(ConnectionStatus::Connecting);
            self.start_attempt();
        }
    }

    /// Tear the connection down and stop retrying.
    pub async fn disconnect(&mut self) {
        self.cancel_attempt();
        self.reconnect_at = None;
        self.auth_failures = 0;
        if let Some(mut link) = self.link.take() {
            link.close().await;
        }
        if self.status != ConnectionStatus::Disconnected {
            tracing::info!("Disconnected from '{}'", self.endpoint);
        }
        self.set_status(ConnectionStatus::Disconnected);
    }

    /// Drop the current link and go through a reconnect cycle.
    pub async fn force_reconnect(&mut self, reason: TransportError) {
        if self.link.is_some() {
            self.lose_link(reason).await;
        }
    }

    /// Write one encoded frame; a failed write drops the link.
    pub async fn send(&mut self, text: String) -> Result<(), TransportError> {
        let Some(link) = self.link.as_mut() else {
            return Err(TransportError::NotConnected);
        };
        let result = link.send(text).await;
        match result {
            Ok(()) => Ok(()),
            Err(e) => {
                self.lose_link(e.clone()).await;
                Err(e)
            }
        }
    }

    /// Wait for the next connection trigger. Cancel-safe.
    pub async fn wait(&mut self) -> Trigger {
        let ping_at = self.link.as_ref().map(|_| self.next_ping);
        let silence_at = self.link.as_ref().map(|_| self.silence_deadline());
        let reconnect_at = self.reconnect_at;

        tokio::select! {
            Some((generation, result)) = self.attempts_rx.recv() => {
                Trigger::Attempt { generation, result }
            }
            inbound = recv_link(&mut self.link) => Trigger::Inbound(inbound),
            _ = sleep_until_opt(ping_at) => Trigger::PingDue,
            _ = sleep_until_opt(silence_at) => Trigger::SilenceDue,
            _ = sleep_until_opt(reconnect_at) => Trigger::ReconnectDue,
        }
    }

    /// Apply a trigger returned by [`ConnectionManager::wait`].
    pub async fn on_trigger(&mut self, trigger: Trigger) {
        match trigger {
            Trigger::Attempt { generation, result } => self.on_attempt(generation, result).await,
            Trigger::Inbound(Some(Ok(text))) => {
                self.last_inbound = Instant::now();
                self.events.push_back(ConnectionEvent::Frame(text));
            }
            Trigger::Inbound(Some(Err(e))) => self.lose_link(e).await,
            Trigger::Inbound(None) => self.lose_link(TransportError::Closed).await,
            Trigger::PingDue => self.on_ping_due().await,
            Trigger::SilenceDue => {
                self.drop_if_silent(Instant::now()).await;
            }
            Trigger::ReconnectDue => {
                self.reconnect_at = None;
                if self.status == ConnectionStatus::Reconnecting {
                    self.set_status(ConnectionStatus::Connecting);
                    self.start_attempt();
                }
            }
        }
    }

    pub fn pop_event(&mut self) -> Option<ConnectionEvent> {
        self.events.pop_front()
    }

    async fn on_attempt(
        &mut self,
        generation: u64,
        result: Result<Box<dyn Link>, TransportError>,
    ) {
        if generation != self.generation || self.status != ConnectionStatus::Connecting {
            tracing::debug!("Discarding result of cancelled connect attempt #{}", generation);
            if let Ok(mut link) = result {
                link.close().await;
            }
            return;
        }
        self.attempt = None;

        match result {
            Ok(link) => {
                let now = Instant::now();
                self.link = Some(link);
                self.backoff.reset();
                self.auth_failures = 0;
                self.last_inbound = now;
                self.next_ping = now + self.heartbeat_interval;
                tracing::info!("Connected to '{}'", self.endpoint);
                self.set_status(ConnectionStatus::Connected);
                self.events.push_back(ConnectionEvent::Resumed);
            }
            Err(TransportError::AuthRejected) => {
                self.auth_failures += 1;
                if self.auth_failures >= self.max_auth_failures {
                    tracing::error!(
                        "Token rejected {} times in a row; giving up",
                        self.auth_failures
                    );
                    self.reconnect_at = None;
                    self.events.push_back(ConnectionEvent::AuthExpired);
                    self.set_status(ConnectionStatus::Disconnected);
                } else {
                    tracing::warn!(
                        "Token rejected ({}/{})",
                        self.auth_failures,
                        self.max_auth_failures
                    );
                    self.schedule_reconnect();
                }
            }
            Err(e) => {
                tracing::warn!("Connect attempt to '{}' failed: {}", self.endpoint, e);
                self.schedule_reconnect();
            }
        }
    }

    fn silence_deadline(&self) -> Instant {
        self.last_inbound + self.heartbeat_interval * 2
    }

    /// Drop the link once nothing arrived for two heartbeat intervals.
    async fn drop_if_silent(&mut self, now: Instant) -> bool {
        if self.link.is_none() || now < self.silence_deadline() {
            return false;
        }
        let dead_after = self.heartbeat_interval * 2;
        tracing::warn!("No inbound frame for {:?}; dropping the link", dead_after);
        self.lose_link(TransportError::HeartbeatTimeout(dead_after))
            .await;
        true
    }

    async fn on_ping_due(&mut self) {
        let now = Instant::now();
        // Both deadlines can fall on the same instant.
        if self.drop_if_silent(now).await {
            return;
        }

        self.next_ping = now + self.heartbeat_interval;
        match encode_frame(&OutboundFrame::Ping, Timestamp::now()) {
            Ok(ping) => {
                // A failed write already drops the link.
                let _ = self.send(ping).await;
            }
            Err(e) => tracing::error!("Failed to encode ping: {}", e),
        }
    }

    fn start_attempt(&mut self) {
        let Some(token) = self.token.clone() else {
            tracing::warn!("No token to connect with");
            self.set_status(ConnectionStatus::Disconnected);
            return;
        };
        self.cancel_attempt();

        let generation = self.generation;
        let connector = Arc::clone(&self.connector);
        let endpoint = self.endpoint.clone();
        let timeout = self.connect_timeout;
        let tx = self.attempts_tx.clone();

        tracing::debug!(
            "Connect attempt #{} to '{}' (backoff attempt {})",
            generation,
            endpoint,
            self.backoff.attempt()
        );
        self.attempt = Some(tokio::spawn(async move {
            let result = match tokio::time::timeout(timeout, connector.connect(&endpoint, &token))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(TransportError::Timeout),
            };
            // The receiver lives as long as the manager.
            let _ = tx.send((generation, result));
        }));
    }

    fn cancel_attempt(&mut self) {
        self.generation += 1;
        if let Some(attempt) = self.attempt.take() {
            attempt.abort();
        }
    }

    fn schedule_reconnect(&mut self) {
        let delay = self.backoff.next_delay();
        tracing::info!("Reconnecting to '{}' in {:?}", self.endpoint, delay);
        self.reconnect_at = Some(Instant::now() + delay);
        self.set_status(ConnectionStatus::Reconnecting);
    }

    async fn lose_link(&mut self, reason: TransportError) {
        if let Some(mut link) = self.link.take() {
            link.close().await;
        }
        if self.status != ConnectionStatus::Connected {
            return;
        }
        tracing::warn!("Connection to '{}' lost: {}", self.endpoint, reason);
        self.events.push_back(ConnectionEvent::Lost(reason));
        self.schedule_reconnect();
    }

    fn set_status(&mut self, status: ConnectionStatus) {
        if self.status != status {
            self.status = status;
            self.events.push_back(ConnectionEvent::StatusChanged(status));
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(attempt) = self.attempt.take() {
            attempt.abort();
        }
    }
}

async fn recv_link(link: &mut Option<Box<dyn Link>>) -> Option<Result<String, TransportError>> {
    match link {
        Some(link) => link.recv().await,
        None => std::future::pending().await,
    }
}

pub(crate) async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
