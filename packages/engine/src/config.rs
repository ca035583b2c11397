//! Engine configuration.

use std::time::Duration;

use crate::usecase::TypingTimings;

pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_millis(500);
pub const DEFAULT_BACKOFF_MAX: Duration = Duration::from_secs(30);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_MAX_AUTH_FAILURES: u32 = 3;
pub const DEFAULT_MAX_MALFORMED_FRAMES: usize = 20;
pub const DEFAULT_TYPING_DEBOUNCE: Duration = Duration::from_secs(3);
pub const DEFAULT_TYPING_IDLE: Duration = Duration::from_secs(5);
pub const DEFAULT_TYPING_TIMEOUT: Duration = Duration::from_secs(6);
pub const DEFAULT_PRESENCE_STALE_AFTER: Duration = Duration::from_secs(60);
pub const DEFAULT_PRESENCE_INTERVAL: Duration = Duration::from_secs(20);

/// Tunables of one engine instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Ping period while connected; silence for twice this long drops the link
    pub heartbeat_interval: Duration,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    /// Bound on a single connect attempt
    pub connect_timeout: Duration,
    /// Consecutive handshake rejections before giving up with `AuthExpired`
    pub max_auth_failures: u32,
    /// Consecutive undecodable frames before the link is recycled
    pub max_malformed_frames: usize,
    pub typing_debounce: Duration,
    pub typing_idle: Duration,
    pub typing_timeout: Duration,
    pub presence_stale_after: Duration,
    /// Period of our own presence heartbeat
    pub presence_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            backoff_base: DEFAULT_BACKOFF_BASE,
            backoff_max: DEFAULT_BACKOFF_MAX,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            max_auth_failures: DEFAULT_MAX_AUTH_FAILURES,
            max_malformed_frames: DEFAULT_MAX_MALFORMED_FRAMES,
            typing_debounce: DEFAULT_TYPING_DEBOUNCE,
            typing_idle: DEFAULT_TYPING_IDLE,
            typing_timeout: DEFAULT_TYPING_TIMEOUT,
            presence_stale_after: DEFAULT_PRESENCE_STALE_AFTER,
            presence_interval: DEFAULT_PRESENCE_INTERVAL,
        }
    }
}

impl EngineConfig {
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.backoff_base = base;
        self.backoff_max = max;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_max_auth_failures(mut self, max: u32) -> Self {
        self.max_auth_failures = max.max(1);
        self
    }

    pub fn with_max_malformed_frames(mut self, max: usize) -> Self {
        self.max_malformed_frames = max.max(1);
        self
    }

    pub fn with_typing(mut self, debounce: Duration, idle: Duration, timeout: Duration) -> Self {
        self.typing_debounce = debounce;
        self.typing_idle = idle;
        self.typing_timeout = timeout;
        self
    }

    pub fn with_presence(mut self, stale_after: Duration, interval: Duration) -> Self {
        self.presence_stale_after = stale_after;
        self.presence_interval = interval;
        self
    }

    pub fn typing_timings(&self) -> TypingTimings {
        TypingTimings {
            debounce: self.typing_debounce,
            idle: self.typing_idle,
            timeout: self.typing_timeout,
        }
    }
}
