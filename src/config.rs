//! Session configuration and handshake credentials.

use std::time::Duration;

use serde_json::Value;

/// Interval between liveness echoes while connected.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(180);
/// Largest number of requests folded into one multi-get.
pub const DEFAULT_MAX_MULTI_GET: usize = 100;
/// Pushes buffered per subscription handle before new ones are dropped.
pub const DEFAULT_PUSH_BUFFER: usize = 64;

/// Tunable session behaviour.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use hermes_session::config::SessionConfig;
///
/// let config = SessionConfig::default()
///     .heartbeat_interval(Duration::from_secs(30))
///     .max_multi_get(20)
///     .push_buffer(8);
/// assert_eq!(config.heartbeat(), Duration::from_secs(30));
/// assert_eq!(config.multi_get_limit(), 20);
/// assert_eq!(config.push_capacity(), 8);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionConfig {
    heartbeat_interval: Duration,
    max_multi_get: usize,
    push_buffer: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            max_multi_get: DEFAULT_MAX_MULTI_GET,
            push_buffer: DEFAULT_PUSH_BUFFER,
        }
    }
}

impl SessionConfig {
    /// Set the heartbeat interval. A zero interval disables the heartbeat.
    #[must_use]
    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Set the multi-get size limit. Values below 2 disable batching.
    #[must_use]
    pub fn max_multi_get(mut self, limit: usize) -> Self {
        self.max_multi_get = limit;
        self
    }

    /// Set how many undelivered pushes each subscription handle buffers.
    /// Pushes arriving at a full handle are dropped with a warning.
    #[must_use]
    pub fn push_buffer(mut self, capacity: usize) -> Self {
        self.push_buffer = capacity;
        self
    }

    /// Configured heartbeat interval.
    #[must_use]
    pub fn heartbeat(&self) -> Duration { self.heartbeat_interval }

    /// Configured multi-get size limit.
    #[must_use]
    pub fn multi_get_limit(&self) -> usize { self.max_multi_get }

    /// Configured per-handle push buffer, never below one.
    #[must_use]
    pub fn push_capacity(&self) -> usize { self.push_buffer.max(1) }
}

/// Handshake credentials obtained from the login service.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    user: String,
    auth_token: String,
    remainder: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .finish_non_exhaustive()
    }
}

impl Credentials {
    /// Build credentials from their parts.
    pub fn new(
        user: impl Into<String>,
        auth_token: impl Into<String>,
        remainder: impl Into<String>,
    ) -> Self {
        Self {
            user: user.into(),
            auth_token: auth_token.into(),
            remainder: remainder.into(),
        }
    }

    /// Split a `user:token:rest` string. Everything after the second colon is
    /// kept intact; missing parts are empty.
    ///
    /// # Examples
    ///
    /// ```
    /// use hermes_session::config::Credentials;
    ///
    /// let credentials = Credentials::parse("alice:t0k3n:a:b");
    /// assert_eq!(credentials.user(), "alice");
    /// assert_eq!(credentials.remainder(), "a:b");
    /// ```
    #[must_use]
    pub fn parse(credentials: &str) -> Self {
        let mut parts = credentials.splitn(3, ':');
        Self::new(
            parts.next().unwrap_or_default(),
            parts.next().unwrap_or_default(),
            parts.next().unwrap_or_default(),
        )
    }

    /// User name.
    #[must_use]
    pub fn user(&self) -> &str { &self.user }

    /// Everything after the auth token.
    #[must_use]
    pub fn remainder(&self) -> &str { &self.remainder }

    /// Arguments of the `connect` command.
    pub(crate) fn handshake_args(&self) -> Vec<Value> {
        vec![
            Value::String(self.user.clone()),
            Value::String(self.auth_token.clone()),
            Value::String(self.remainder.clone()),
        ]
    }
}
