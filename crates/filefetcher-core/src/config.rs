//! The typed configuration document.
//!
//! The on-disk format is YAML: a top-level collection of queues, each with an
//! ordered list of dataloggers, plus the global run limits. All optional
//! behavior is expressed as explicit `Option` fields and the whole document
//! is validated once at load time, never lazily at first use.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Deserializer};

use crate::error::ConfigError;
use crate::template;

/// Read access to process environment variables.
///
/// The production implementation is [`OsEnvironment`]; tests substitute an
/// in-memory map so validation can run hermetically.
pub trait Environment {
    fn var(&self, name: &str) -> Option<String>;
}

pub struct OsEnvironment;

impl Environment for OsEnvironment {
    fn var(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

/// One remote data source, polled once per day.
#[derive(Debug, Clone, Deserialize)]
pub struct Datalogger {
    pub name: String,
    /// URL template: strftime day-format codes plus `$field` substitutions
    /// drawn from this datalogger's own fields.
    pub url: String,
    pub out_dir: PathBuf,
    /// Output path template relative to `out_dir`. When absent the path is
    /// derived from the URL's path component under a `name` subdirectory.
    #[serde(default)]
    pub out_path: Option<String>,
    /// Walk backward through days until this date (inclusive) is reached.
    #[serde(default, deserialize_with = "de_backfill")]
    pub backfill: Option<NaiveDate>,
    /// Hard floor on how far back this datalogger is ever pursued,
    /// independent of transfer success.
    #[serde(default, rename = "minimumLookback")]
    pub minimum_lookback: Option<u32>,
    /// Receive-speed cap in bytes per second.
    #[serde(default, rename = "recvSpeed")]
    pub recv_speed: Option<u64>,
    /// Abort the transfer when throughput stays below `low_speed_limit`
    /// bytes/sec for `low_speed_time` seconds.
    #[serde(default)]
    pub low_speed_limit: Option<u64>,
    #[serde(default)]
    pub low_speed_time: Option<u64>,
    /// Name of an environment variable holding `user:pass`. The credential
    /// itself never appears in the document or in logs.
    #[serde(default)]
    pub userpwd: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub partial_downloads: bool,
    #[serde(default)]
    pub disabled: bool,
}

/// An independent group of dataloggers, processed by one isolated worker.
#[derive(Debug, Clone, Deserialize)]
pub struct Queue {
    pub name: String,
    #[serde(default)]
    pub disabled: bool,
    pub dataloggers: Vec<Datalogger>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub queues: Vec<Queue>,
    /// Maximum run time in minutes from process start.
    #[serde(default, rename = "maxRunTime")]
    pub max_run_time: Option<u64>,
    /// Daily shutdown wall-clock time, `HH:MM` in the process time zone.
    #[serde(default, rename = "shutdownTime", deserialize_with = "de_shutdown")]
    pub shutdown_time: Option<NaiveTime>,
}

/// Queue-independent stop conditions, shared by every sweep.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunLimits {
    pub max_run_time: Option<Duration>,
    pub shutdown_time: Option<NaiveTime>,
}

impl Config {
    /// Load and validate a configuration document.
    pub fn load(path: &Path, env: &impl Environment) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Unreadable {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config = serde_yaml::from_str(&text)?;
        config.validate(env)?;
        Ok(config)
    }

    /// Check every invariant that would otherwise surface mid-sweep.
    ///
    /// Rejects: credentials whose environment binding is missing, a
    /// half-configured low-speed abort, templates that do not resolve, and
    /// dataloggers whose sweep has no termination bound at all.
    pub fn validate(&self, env: &impl Environment) -> Result<(), ConfigError> {
        let bounded_globally = self.max_run_time.is_some() || self.shutdown_time.is_some();
        // Any day works to exercise the templates.
        let probe_day = Utc::now().date_naive();

        for queue in self.queues.iter().filter(|q| !q.disabled) {
            for logger in queue.dataloggers.iter().filter(|d| !d.disabled) {
                if let Some(var) = &logger.userpwd {
                    if env.var(var).is_none() {
                        return Err(ConfigError::MissingEnv(var.clone()));
                    }
                }
                if logger.low_speed_limit.is_some() != logger.low_speed_time.is_some() {
                    return Err(ConfigError::LowSpeedPair {
                        logger: logger.name.clone(),
                    });
                }
                if !bounded_globally
                    && logger.backfill.is_none()
                    && logger.minimum_lookback.is_none()
                {
                    return Err(ConfigError::UnboundedSweep {
                        queue: queue.name.clone(),
                        logger: logger.name.clone(),
                    });
                }
                let url = template::resolve_url(logger, probe_day).map_err(|source| {
                    ConfigError::Template {
                        logger: logger.name.clone(),
                        source,
                    }
                })?;
                template::resolve_out_path(logger, probe_day, &url).map_err(|source| {
                    ConfigError::Template {
                        logger: logger.name.clone(),
                        source,
                    }
                })?;
            }
        }
        Ok(())
    }

    pub fn limits(&self) -> RunLimits {
        RunLimits {
            max_run_time: self.max_run_time.map(|minutes| Duration::from_secs(minutes * 60)),
            shutdown_time: self.shutdown_time,
        }
    }
}

fn de_backfill<'de, D>(deserializer: D) -> Result<Option<NaiveDate>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    raw.map(|s| {
        NaiveDate::parse_from_str(&s, "%m/%d/%Y").map_err(|e| {
            serde::de::Error::custom(format!("backfill date {s:?} is not MM/DD/YYYY: {e}"))
        })
    })
    .transpose()
}

fn de_shutdown<'de, D>(deserializer: D) -> Result<Option<NaiveTime>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    raw.map(|s| {
        NaiveTime::parse_from_str(&s, "%H:%M").map_err(|e| {
            serde::de::Error::custom(format!("shutdownTime {s:?} is not HH:MM: {e}"))
        })
    })
    .transpose()
}
