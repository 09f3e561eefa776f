//! Artifact cache backed by Redis
//!
//! Keys are raw topic strings, values are artifact texts.

use async_trait::async_trait;
use tracing::debug;
use url::Url;

use crate::core::config::RedisConfig;
use crate::errors::EnrichError;

#[async_trait]
pub trait ArtifactCache: Send + Sync {
    /// `Ok(None)` on a miss. Connection problems are errors, never misses.
    async fn get(&self, key: &str) -> Result<Option<String>, EnrichError>;

    /// Overwrites any existing value.
    async fn put(&self, key: &str, value: &str) -> Result<(), EnrichError>;

    async fn ping(&self) -> Result<(), EnrichError>;
}

#[derive(Clone)]
pub struct RedisCache {
    connection_manager: redis::aio::ConnectionManager,
    ttl_seconds: Option<u64>,
}

impl std::fmt::Debug for RedisCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCache")
            .field("connection_manager", &"ConnectionManager")
            .field("ttl_seconds", &self.ttl_seconds)
            .finish()
    }
}

impl RedisCache {
    /// Connect and verify the server answers PING within the configured connect timeout.
    pub async fn connect(config: &RedisConfig) -> Result<Self, EnrichError> {
        let url = connection_url(config)?;
        let client = redis::Client::open(url.as_str()).map_err(|e| {
            EnrichError::ConnectError(format!("Failed to create Redis client: {e}"))
        })?;

        let connection_manager =
            tokio::time::timeout(config.connect_timeout, redis::aio::ConnectionManager::new(client))
                .await
                .map_err(|_| {
                    EnrichError::ConnectError(format!(
                        "Timed out connecting to Redis at {}",
                        redact_url(url.as_str())
                    ))
                })?
                .map_err(|e| EnrichError::ConnectError(format!("Failed to connect to Redis: {e}")))?;

        let cache = Self {
            connection_manager,
            ttl_seconds: config.ttl.map(|ttl| ttl.as_secs().max(1)),
        };

        tokio::time::timeout(config.connect_timeout, cache.ping())
            .await
            .map_err(|_| EnrichError::ConnectError("Redis PING timed out".to_string()))?
            .map_err(|e| EnrichError::ConnectError(e.to_string()))?;

        debug!(url = %redact_url(url.as_str()), "Redis cache connected");
        Ok(cache)
    }
}

#[async_trait]
impl ArtifactCache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>, EnrichError> {
        let mut conn = self.connection_manager.clone();
        let result: Option<String> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await?;

        if result.is_some() {
            debug!(key = key, "Cache HIT");
        } else {
            debug!(key = key, "Cache MISS");
        }
        Ok(result)
    }

    async fn put(&self, key: &str, value: &str) -> Result<(), EnrichError> {
        let mut conn = self.connection_manager.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = self.ttl_seconds {
            cmd.arg("EX").arg(ttl);
        }

        let _: () = cmd
            .query_async(&mut conn)
            .await?;

        debug!(key = key, ttl_seconds = ?self.ttl_seconds, "Cache SET");
        Ok(())
    }

    async fn ping(&self) -> Result<(), EnrichError> {
        let mut conn = self.connection_manager.clone();
        let pong: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await?;

        if pong == "PONG" {
            Ok(())
        } else {
            Err(EnrichError::CacheError(format!(
                "unexpected PING reply: {pong}"
            )))
        }
    }
}

/// `redis://[:<auth>@]<host>:<port>`, with the secret percent-encoded.
pub fn connection_url(config: &RedisConfig) -> Result<Url, EnrichError> {
    let mut url = Url::parse(&format!("redis://{}:{}", config.host, config.port))
        .map_err(|e| EnrichError::ConfigError(format!("REDIS_HOST: {e}")))?;

    if let Some(secret) = config.auth_string.as_deref() {
        url.set_password(Some(secret))
            .map_err(|()| EnrichError::ConfigError("REDIS_AUTH_STRING: cannot be used in a URL".to_string()))?;
    }
    Ok(url)
}

/// Redact credentials from a Redis URL for logging
pub fn redact_url(url: &str) -> String {
    if let Some(at_pos) = url.find('@')
        && let Some(colon_pos) = url[..at_pos].rfind(':')
    {
        let prefix = &url[..=colon_pos];
        let suffix = &url[at_pos..];
        return format!("{prefix}***{suffix}");
    }
    url.to_string()
}
