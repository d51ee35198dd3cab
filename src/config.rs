use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt::{Debug, Formatter};
use std::time::Duration;

const DEFAULT_MIN_CONNECTIONS: u64 = 5;
const DEFAULT_BATCH_SIZE: u64 = 5;

/// Sizing and timing of a [`Pool`](crate::Pool).
///
/// Durations are (de)serialized as fractional seconds, e.g.
/// `{"min_connections": 2, "max_connections": 8, "cleanup_interval_seconds": 0.5}`.
/// Missing keys fall back to [`PoolConfig::default`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Idle connections kept open after a trim; also opened at construction
    min_connections: u64,
    /// Hard cap on live connections (idle + borrowed + connecting)
    max_connections: u64,
    /// Connections opened per allocation when idle runs dry
    batch_size: u64,
    #[serde(rename = "cleanup_interval_seconds", with = "secs")]
    cleanup_interval: Duration,
    #[serde(rename = "acquire_timeout_seconds", with = "opt_secs")]
    acquire_timeout: Option<Duration>,
    #[serde(rename = "check_timeout_seconds", with = "opt_secs")]
    check_timeout: Option<Duration>,
    #[serde(rename = "max_lifetime_seconds", with = "opt_secs")]
    max_lifetime: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        let max = (num_cpus::get() as u64).max(DEFAULT_MIN_CONNECTIONS) * 2;
        Self {
            min_connections: DEFAULT_MIN_CONNECTIONS,
            max_connections: max,
            batch_size: DEFAULT_BATCH_SIZE,
            cleanup_interval: Duration::from_secs(60),
            acquire_timeout: None,
            check_timeout: Some(Duration::from_secs(10)),
            max_lifetime: None,
        }
    }
}

impl PoolConfig {
    pub fn new(min_connections: u64, max_connections: u64) -> Self {
        Self {
            min_connections,
            max_connections,
            ..Self::default()
        }
    }

    pub fn with_batch_size(mut self, n: u64) -> Self {
        self.batch_size = n;
        self
    }

    pub fn with_cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    /// Deadline applied by [`Pool::get`](crate::Pool::get); `None` waits forever
    pub fn with_acquire_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Upper bound for [`Manager::check`](crate::Manager::check) on reused connections
    pub fn with_check_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.check_timeout = timeout;
        self
    }

    /// Connections older than this are closed instead of being handed out
    pub fn with_max_lifetime(mut self, lifetime: Option<Duration>) -> Self {
        self.max_lifetime = lifetime;
        self
    }

    pub fn min_connections(&self) -> u64 {
        self.min_connections
    }

    pub fn max_connections(&self) -> u64 {
        self.max_connections
    }

    pub fn batch_size(&self) -> u64 {
        self.batch_size
    }

    pub fn cleanup_interval(&self) -> Duration {
        self.cleanup_interval
    }

    pub fn acquire_timeout(&self) -> Option<Duration> {
        self.acquire_timeout
    }

    pub fn check_timeout(&self) -> Option<Duration> {
        self.check_timeout
    }

    pub fn max_lifetime(&self) -> Option<Duration> {
        self.max_lifetime
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_connections == 0 {
            return Err(ConfigError::ZeroMaxConnections);
        }
        if self.min_connections > self.max_connections {
            return Err(ConfigError::MinExceedsMax {
                min: self.min_connections,
                max: self.max_connections,
            });
        }
        if self.batch_size == 0 {
            return Err(ConfigError::ZeroBatchSize);
        }
        Ok(())
    }
}

/// Backend location and credentials, handed to a [`Manager`](crate::Manager) as-is.
///
/// The pool never reads these fields.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Target {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
}

impl Default for Target {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5432,
            database: "cs_db".to_string(),
            user: "postgres".to_string(),
            password: String::new(),
        }
    }
}

impl Target {
    /// libpq style `key=value` connection string
    pub fn connection_string(&self) -> String {
        let mut s = format!(
            "host={} port={} dbname={} user={}",
            self.host, self.port, self.database, self.user
        );
        if !self.password.is_empty() {
            s.push_str(" password=");
            s.push_str(&self.password);
        }
        s
    }
}

impl Debug for Target {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Target")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

mod secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let v = f64::deserialize(d)?;
        Duration::try_from_secs_f64(v).map_err(serde::de::Error::custom)
    }
}

mod opt_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_some(&d.as_secs_f64()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        match Option::<f64>::deserialize(d)? {
            Some(v) => Duration::try_from_secs_f64(v)
                .map(Some)
                .map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}
