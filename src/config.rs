use std::env;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Result;

/// Follower count above which an actor is served by pull instead of push.
pub const DEFAULT_BIG_V_THRESHOLD: i64 = 10_000;
/// Consumer group name used by the dispatcher workers.
pub const DEFAULT_CONSUMER_GROUP: &str = "feed_consumer_group";

/// Settings for the write path (Fan-out Dispatcher).
#[derive(Debug, Clone)]
pub struct FanoutSettings {
    pub big_v_threshold: i64,
    /// Followers fetched per page while pushing.
    pub batch_size: usize,
    /// Concurrent inbox writes within one batch.
    pub concurrency: usize,
    pub io_timeout: Duration,
}

impl Default for FanoutSettings {
    fn default() -> Self {
        Self {
            big_v_threshold: DEFAULT_BIG_V_THRESHOLD,
            batch_size: 1000,
            concurrency: 16,
            io_timeout: Duration::from_secs(3),
        }
    }
}

/// Settings for the read path (Feed Assembly Service).
#[derive(Debug, Clone)]
pub struct FeedSettings {
    pub big_v_threshold: i64,
    pub inbox_max_len: usize,
    /// Outbox items pulled from each big-V followee per read.
    pub pull_per_source: usize,
    /// Followees scanned for pull sources per read.
    pub max_followees: usize,
    pub concurrency: usize,
    pub io_timeout: Duration,
    pub trim_timeout: Duration,
    pub trim_workers: usize,
    pub trim_queue: usize,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            big_v_threshold: DEFAULT_BIG_V_THRESHOLD,
            inbox_max_len: 1000,
            pull_per_source: 10,
            max_followees: 100,
            concurrency: 16,
            io_timeout: Duration::from_secs(3),
            trim_timeout: Duration::from_secs(5),
            trim_workers: 2,
            trim_queue: 256,
        }
    }
}

/// Settings for the event bus and its consume loop.
#[derive(Debug, Clone)]
pub struct BusSettings {
    pub partitions: u32,
    pub group: String,
    /// Messages fetched per poll.
    pub fetch_batch: usize,
    /// Backoff after a bus-level failure before the loop retries.
    pub retry_delay: Duration,
    /// Sleep between polls when a partition is drained.
    pub poll_interval: Duration,
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            partitions: 4,
            group: DEFAULT_CONSUMER_GROUP.to_string(),
            fetch_batch: 64,
            retry_delay: Duration::from_secs(5),
            poll_interval: Duration::from_millis(500),
        }
    }
}

/// Settings for the Rebuild Procedure.
#[derive(Debug, Clone)]
pub struct RebuildSettings {
    pub big_v_threshold: i64,
    pub max_followees: usize,
    pub pull_per_source: usize,
    /// Events read from the log per page while replaying.
    pub page_size: usize,
    pub concurrency: usize,
    pub io_timeout: Duration,
    /// Deadline for a whole background rebuild.
    pub timeout: Duration,
}

impl Default for RebuildSettings {
    fn default() -> Self {
        Self {
            big_v_threshold: DEFAULT_BIG_V_THRESHOLD,
            max_followees: 1000,
            pull_per_source: 10,
            page_size: 100,
            concurrency: 16,
            io_timeout: Duration::from_secs(3),
            timeout: Duration::from_secs(300),
        }
    }
}

/// Central configuration loaded from environment variables.
///
/// The .env file is loaded automatically at startup via dotenvy. Every
/// knob has a default; a value that is set but doesn't parse is an error
/// rather than being silently replaced.
#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: String,
    pub fanout: FanoutSettings,
    pub feed: FeedSettings,
    pub bus: BusSettings,
    pub rebuild: RebuildSettings,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self> {
        let threshold = env_or("FANOUT_BIG_V_THRESHOLD", DEFAULT_BIG_V_THRESHOLD)?;
        let io_timeout = Duration::from_millis(env_or("FANOUT_IO_TIMEOUT_MS", 3000u64)?);
        let concurrency = env_or("FANOUT_CONCURRENCY", 16usize)?;
        let pull_per_source = env_or("FANOUT_PULL_PER_SOURCE", 10usize)?;

        let config = Self {
            db_path: env::var("FANOUT_DB_PATH").unwrap_or_else(|_| "./fanout.db".to_string()),
            fanout: FanoutSettings {
                big_v_threshold: threshold,
                batch_size: env_or("FANOUT_BATCH_SIZE", 1000usize)?,
                concurrency,
                io_timeout,
            },
            feed: FeedSettings {
                big_v_threshold: threshold,
                inbox_max_len: env_or("FANOUT_INBOX_MAX_LEN", 1000usize)?,
                pull_per_source,
                max_followees: env_or("FANOUT_MAX_FOLLOWEES_READ", 100usize)?,
                concurrency,
                io_timeout,
                trim_timeout: Duration::from_millis(env_or("FANOUT_TRIM_TIMEOUT_MS", 5000u64)?),
                trim_workers: env_or("FANOUT_TRIM_WORKERS", 2usize)?,
                trim_queue: env_or("FANOUT_TRIM_QUEUE", 256usize)?,
            },
            bus: BusSettings {
                partitions: env_or("FANOUT_PARTITIONS", 4u32)?,
                group: env::var("FANOUT_CONSUMER_GROUP")
                    .unwrap_or_else(|_| DEFAULT_CONSUMER_GROUP.to_string()),
                fetch_batch: 64,
                retry_delay: Duration::from_millis(env_or("FANOUT_RETRY_DELAY_MS", 5000u64)?),
                poll_interval: Duration::from_millis(env_or("FANOUT_POLL_INTERVAL_MS", 500u64)?),
            },
            rebuild: RebuildSettings {
                big_v_threshold: threshold,
                max_followees: env_or("FANOUT_MAX_FOLLOWEES_REBUILD", 1000usize)?,
                pull_per_source,
                page_size: 100,
                concurrency,
                io_timeout,
                timeout: Duration::from_secs(env_or("FANOUT_REBUILD_TIMEOUT_SECS", 300u64)?),
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would make the pipeline loop forever or do nothing.
    pub fn validate(&self) -> Result<()> {
        if self.fanout.batch_size == 0 {
            anyhow::bail!("FANOUT_BATCH_SIZE must be at least 1");
        }
        if self.bus.partitions == 0 {
            anyhow::bail!("FANOUT_PARTITIONS must be at least 1");
        }
        if self.feed.inbox_max_len == 0 {
            anyhow::bail!("FANOUT_INBOX_MAX_LEN must be at least 1");
        }
        if self.fanout.big_v_threshold < 0 {
            anyhow::bail!("FANOUT_BIG_V_THRESHOLD must not be negative");
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: "./fanout.db".to_string(),
            fanout: FanoutSettings::default(),
            feed: FeedSettings::default(),
            bus: BusSettings::default(),
            rebuild: RebuildSettings::default(),
        }
    }
}

/// Read and parse an environment variable, falling back to `default` when unset.
fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match env::var(key) {
        Ok(raw) => parse_setting(key, &raw),
        Err(_) => Ok(default),
    }
}

fn parse_setting<T>(key: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|e| anyhow::anyhow!("{key}={raw:?} is not a valid value: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_setting_accepts_padded_numbers() {
        let value: usize = parse_setting("FANOUT_BATCH_SIZE", " 250 ").unwrap();
        assert_eq!(value, 250);
    }

    #[test]
    fn test_parse_setting_names_the_bad_key() {
        let err = parse_setting::<u32>("FANOUT_PARTITIONS", "many").unwrap_err();
        assert!(err.to_string().contains("FANOUT_PARTITIONS"));
    }

    #[test]
    fn test_default_config_is_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_zero_batch() {
        let mut config = Config::default();
        config.fanout.batch_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_partitions() {
        let mut config = Config::default();
        config.bus.partitions = 0;
        assert!(config.validate().is_err());
    }
}
