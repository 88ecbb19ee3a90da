//! Process configuration read from the environment
//!
//! Every setting has a default; a variable that is set but does not parse is
//! an error rather than silently falling back.

use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::controller::{BackoffConfig, DEFAULT_CACHE_SYNC_TIMEOUT};

pub const ENV_SYNC_INTERVAL_SECS: &str = "SYNC_INTERVAL_SECS";
pub const ENV_WORKERS: &str = "CONTROLLER_WORKERS";
pub const ENV_HEALTH_PORT: &str = "HEALTH_PORT";
pub const ENV_CACHE_SYNC_TIMEOUT_SECS: &str = "CACHE_SYNC_TIMEOUT_SECS";
pub const ENV_BACKOFF_INITIAL_MS: &str = "BACKOFF_INITIAL_MS";
pub const ENV_BACKOFF_MAX_SECS: &str = "BACKOFF_MAX_SECS";
pub const ENV_WATCH_NAMESPACE: &str = "WATCH_NAMESPACE";

pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(15);
pub const DEFAULT_WORKERS: usize = 2;
pub const DEFAULT_HEALTH_PORT: u16 = 8080;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}")]
    Invalid { key: &'static str, value: String },
}

fn parse<T, F>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty()) {
        Some(value) => value
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value }),
        None => Ok(default),
    }
}

fn parse_backoff<F>(lookup: &F) -> Result<BackoffConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let defaults = BackoffConfig::default();
    let initial_ms = parse(
        lookup,
        ENV_BACKOFF_INITIAL_MS,
        u64::try_from(defaults.initial_delay.as_millis()).unwrap_or(u64::MAX),
    )?;
    let max_secs = parse(lookup, ENV_BACKOFF_MAX_SECS, defaults.max_delay.as_secs())?;

    Ok(BackoffConfig {
        initial_delay: Duration::from_millis(initial_ms),
        max_delay: Duration::from_secs(max_secs),
        ..defaults
    })
}

/// Settings shared by both binaries
#[derive(Clone, Debug)]
pub struct ControllerConfig {
    pub workers: usize,
    pub health_port: u16,
    pub cache_sync_timeout: Duration,
    pub backoff: BackoffConfig,
}

impl ControllerConfig {
    fn from_lookup<F>(lookup: &F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            workers: parse(lookup, ENV_WORKERS, DEFAULT_WORKERS)?,
            health_port: parse(lookup, ENV_HEALTH_PORT, DEFAULT_HEALTH_PORT)?,
            cache_sync_timeout: Duration::from_secs(parse(
                lookup,
                ENV_CACHE_SYNC_TIMEOUT_SECS,
                DEFAULT_CACHE_SYNC_TIMEOUT.as_secs(),
            )?),
            backoff: parse_backoff(lookup)?,
        })
    }
}

/// Configuration of the `mysql-operator` binary
#[derive(Clone, Debug)]
pub struct OperatorConfig {
    pub controller: ControllerConfig,
    /// Watch a single namespace instead of the whole cluster
    pub namespace: Option<String>,
}

impl OperatorConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            controller: ControllerConfig::from_lookup(&lookup)?,
            namespace: lookup(ENV_WATCH_NAMESPACE).filter(|ns| !ns.is_empty()),
        })
    }
}

/// Configuration of the `mysql-agent` binary
#[derive(Clone, Debug)]
pub struct AgentConfig {
    pub controller: ControllerConfig,
    /// Period of the cluster manager loop
    pub sync_interval: Duration,
}

impl AgentConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            controller: ControllerConfig::from_lookup(&lookup)?,
            sync_interval: Duration::from_secs(parse(
                &lookup,
                ENV_SYNC_INTERVAL_SECS,
                DEFAULT_SYNC_INTERVAL.as_secs(),
            )?),
        })
    }
}
