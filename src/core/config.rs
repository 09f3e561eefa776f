use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::errors::EnrichError;

/// How non-decode failures are turned into ack decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    #[default]
    /// Always Ack after decoding. Generation failures deliver (and cache) the sentinel.
    BestEffort,
    /// Nack generation and delivery failures until the delivery attempt reaches
    /// `max_attempts`, then deliver the sentinel uncached and Ack.
    Retry { max_attempts: u32 },
}

#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
    pub auth_string: Option<String>,
    pub ttl: Option<Duration>,
    pub connect_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct PubSubConfig {
    pub project_id: String,
    pub subscription_id: String,
    /// `https://pubsub.googleapis.com`, or `http://<PUBSUB_EMULATOR_HOST>` for the emulator.
    pub endpoint: String,
    pub emulator: bool,
    pub access_token: Option<String>,
}

impl PubSubConfig {
    #[must_use]
    pub fn subscription_path(&self) -> String {
        format!(
            "projects/{}/subscriptions/{}",
            self.project_id, self.subscription_id
        )
    }
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: Option<String>,
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub concurrency: usize,
    pub pull_batch_size: usize,
    pub poll_interval: Duration,
    pub shutdown_grace: Duration,
    pub cache_timeout: Duration,
    pub generation_timeout: Duration,
    pub sink_timeout: Duration,
    pub failure_policy: FailurePolicy,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            pull_batch_size: 10,
            poll_interval: Duration::from_millis(500),
            shutdown_grace: Duration::from_secs(30),
            cache_timeout: Duration::from_secs(5),
            generation_timeout: Duration::from_secs(120),
            sink_timeout: Duration::from_secs(10),
            failure_policy: FailurePolicy::BestEffort,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub redis: RedisConfig,
    pub pubsub: PubSubConfig,
    pub llm: LlmConfig,
    pub discord_url: Option<String>,
    pub worker: WorkerConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, EnrichError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, EnrichError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let require = |key: &str| {
            get(key).ok_or_else(|| EnrichError::ConfigError(format!("{key} must be set")))
        };

        let project_id = require("GCP_PROJECT_ID")?;
        let subscription_id = require("PUBSUB_SUBSCRIPTION_ID")?;
        let redis_host = require("REDIS_HOST")?;

        let emulator_host = get("PUBSUB_EMULATOR_HOST");
        let endpoint = match &emulator_host {
            Some(host) => format!("http://{host}"),
            None => get("PUBSUB_ENDPOINT")
                .unwrap_or_else(|| "https://pubsub.googleapis.com".to_string()),
        };

        let defaults = WorkerConfig::default();
        let failure_policy = match get("FAILURE_POLICY").as_deref() {
            None | Some("best-effort") => FailurePolicy::BestEffort,
            Some("retry") => FailurePolicy::Retry {
                max_attempts: parse_or(&get, "MAX_DELIVERY_ATTEMPTS", 5)?,
            },
            Some(other) => {
                return Err(EnrichError::ConfigError(format!(
                    "FAILURE_POLICY: unknown policy `{other}` (expected `best-effort` or `retry`)"
                )));
            }
        };

        let concurrency: usize = parse_or(&get, "WORKER_CONCURRENCY", defaults.concurrency)?;
        if concurrency == 0 {
            return Err(EnrichError::ConfigError(
                "WORKER_CONCURRENCY must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            redis: RedisConfig {
                host: redis_host,
                port: parse_or(&get, "REDIS_PORT", 6379)?,
                auth_string: get("REDIS_AUTH_STRING"),
                ttl: get("CACHE_TTL_SECS")
                    .map(|v| parse_value::<u64>("CACHE_TTL_SECS", &v))
                    .transpose()?
                    .map(Duration::from_secs),
                connect_timeout: Duration::from_secs(parse_or(&get, "REDIS_CONNECT_TIMEOUT_SECS", 5)?),
            },
            pubsub: PubSubConfig {
                project_id,
                subscription_id,
                endpoint,
                emulator: emulator_host.is_some(),
                access_token: get("PUBSUB_ACCESS_TOKEN"),
            },
            llm: LlmConfig {
                base_url: get("LLM_BASE_URL").unwrap_or_else(|| "http://localhost:8080".to_string()),
                api_key: get("LLM_API_KEY"),
                model: get("LLM_MODEL"),
            },
            discord_url: get("DISCORD_URL"),
            worker: WorkerConfig {
                concurrency,
                pull_batch_size: parse_or(&get, "PULL_BATCH_SIZE", defaults.pull_batch_size)?.max(1),
                poll_interval: Duration::from_millis(parse_or(&get, "POLL_INTERVAL_MS", 500)?),
                shutdown_grace: Duration::from_secs(parse_or(&get, "SHUTDOWN_GRACE_SECS", 30)?),
                cache_timeout: Duration::from_millis(parse_or(&get, "CACHE_TIMEOUT_MS", 5000)?),
                generation_timeout: Duration::from_secs(parse_or(&get, "GENERATION_TIMEOUT_SECS", 120)?),
                sink_timeout: Duration::from_secs(parse_or(&get, "SINK_TIMEOUT_SECS", 10)?),
                failure_policy,
            },
        })
    }
}

fn parse_value<T: FromStr>(key: &str, raw: &str) -> Result<T, EnrichError>
where
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| EnrichError::ConfigError(format!("{key}: {e}")))
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T, EnrichError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    get(key).map_or(Ok(default), |raw| parse_value(key, &raw))
}
