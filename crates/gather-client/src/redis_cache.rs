use std::fmt;
use std::future::Future;
use std::time::Duration;

use gather_core::error::AppError;
use gather_core::traits::CacheStore;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, RedisResult};
use url::Url;

const DEFAULT_REDIS_HOST: &str = "redis";
const DEFAULT_REDIS_PORT: u16 = 6379;
const DEFAULT_REDIS_TIMEOUT: Duration = Duration::from_millis(2000);

/// Connection settings for [`RedisCache`].
#[derive(Clone, PartialEq, Eq)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
    /// Upper bound for connecting and for every single command.
    pub timeout: Duration,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_REDIS_HOST.to_string(),
            port: DEFAULT_REDIS_PORT,
            password: None,
            timeout: DEFAULT_REDIS_TIMEOUT,
        }
    }
}

// Keep the password out of logs.
impl fmt::Debug for RedisConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl RedisConfig {
    /// Read settings from `REDIS_HOST`, `REDIS_PORT`, `REDIS_PASSWORD` and
    /// `REDIS_TIMEOUT_MS`.
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let non_empty = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let defaults = Self::default();

        let host = non_empty("REDIS_HOST").unwrap_or(defaults.host);
        let port = match non_empty("REDIS_PORT") {
            Some(raw) => raw.parse::<u16>().map_err(|_| {
                AppError::ConfigError(format!("Invalid REDIS_PORT '{raw}': must be a port number"))
            })?,
            None => defaults.port,
        };
        let timeout = match non_empty("REDIS_TIMEOUT_MS") {
            Some(raw) => match raw.parse::<u64>() {
                Ok(ms) if ms > 0 => Duration::from_millis(ms),
                _ => {
                    return Err(AppError::ConfigError(format!(
                        "Invalid REDIS_TIMEOUT_MS '{raw}': must be a positive integer"
                    )));
                }
            },
            None => defaults.timeout,
        };

        Ok(Self {
            host,
            port,
            password: non_empty("REDIS_PASSWORD"),
            timeout,
        })
    }

    /// Connection URL with the password percent-encoded.
    pub fn url(&self) -> Result<Url, AppError> {
        let mut url = Url::parse(&format!("redis://{}:{}", self.host, self.port))
            .map_err(|e| AppError::ConfigError(format!("Invalid Redis address: {e}")))?;
        if let Some(password) = &self.password {
            url.set_password(Some(password))
                .map_err(|()| AppError::ConfigError("Redis URL cannot carry a password".into()))?;
        }
        Ok(url)
    }
}

/// Shared [`CacheStore`] on Redis: `GET` and `SET key value EX ttl`.
///
/// The underlying [`ConnectionManager`] reconnects on its own; every call is
/// bounded by the configured timeout and reports
/// [`AppError::CacheUnavailable`] instead of stalling.
#[derive(Clone)]
pub struct RedisCache {
    manager: ConnectionManager,
    timeout: Duration,
}

impl RedisCache {
    pub async fn connect(config: &RedisConfig) -> Result<Self, AppError> {
        let client = redis::Client::open(config.url()?.as_str())
            .map_err(|e| AppError::CacheUnavailable(format!("Invalid Redis config: {e}")))?;

        let manager = tokio::time::timeout(config.timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| {
                AppError::CacheUnavailable(format!(
                    "Connecting to {}:{} timed out after {}ms",
                    config.host,
                    config.port,
                    config.timeout.as_millis()
                ))
            })?
            .map_err(|e| {
                AppError::CacheUnavailable(format!(
                    "Connecting to {}:{} failed: {e}",
                    config.host, config.port
                ))
            })?;

        tracing::info!(host = %config.host, port = config.port, "Connected to Redis");
        Ok(Self {
            manager,
            timeout: config.timeout,
        })
    }

    async fn bounded<T>(
        &self,
        command: &str,
        op: impl Future<Output = RedisResult<T>>,
    ) -> Result<T, AppError> {
        match tokio::time::timeout(self.timeout, op).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(AppError::CacheUnavailable(format!("Redis {command}: {e}"))),
            Err(_) => Err(AppError::CacheUnavailable(format!(
                "Redis {command} timed out after {}ms",
                self.timeout.as_millis()
            ))),
        }
    }
}

impl CacheStore for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>, AppError> {
        let mut conn = self.manager.clone();
        self.bounded("GET", conn.get::<_, Option<String>>(key))
            .await
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), AppError> {
        // EX takes whole seconds and rejects 0.
        let seconds = ttl.as_secs().max(1);
        let mut conn = self.manager.clone();
        self.bounded("SET", conn.set_ex::<_, _, ()>(key, value, seconds))
            .await
    }
}
