//! Sync options
//!
//! Options are a fully-specified record with defaults applied once at
//! construction. Dynamic (JSON) options go through [`SyncOptions::from_value`],
//! which validates every key before anything else happens.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::{ChannelId, ConfigError, RegistrationInfo};

/// Relay strategy
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Strategy {
    /// Every replica gets snapshots and mutations
    #[default]
    Broadcast,
    /// Only the elected candidate (and non-candidates) take part
    Master,
}

impl Strategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Strategy::Broadcast => "broadcast",
            Strategy::Master => "master",
        }
    }
}

impl FromStr for Strategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "broadcast" => Ok(Strategy::Broadcast),
            "master" => Ok(Strategy::Master),
            other => Err(ConfigError::InvalidStrategy(other.to_string())),
        }
    }
}

/// Log verbosity
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl FromStr for LogLevel {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(ConfigError::InvalidLogLevel(other.to_string())),
        }
    }
}

/// Custom election function: full registration table in, chosen channel out
pub type ElectionFn = Arc<dyn Fn(&[RegistrationInfo]) -> Option<ChannelId> + Send + Sync>;

/// Master election policy
#[derive(Clone, Default)]
pub enum Election {
    /// Earliest connected candidate wins
    #[default]
    EarliestConnected,
    /// Most recently connected candidate wins
    LatestConnected,
    Custom(ElectionFn),
}

impl Election {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "earliest" => Some(Election::EarliestConnected),
            "latest" => Some(Election::LatestConnected),
            _ => None,
        }
    }
}

impl fmt::Debug for Election {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Election::EarliestConnected => f.write_str("EarliestConnected"),
            Election::LatestConnected => f.write_str("LatestConnected"),
            Election::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Options shared by the hub and every replica
#[derive(Clone, Debug)]
pub struct SyncOptions {
    /// Canonical fields written to durable storage
    pub persist: Vec<String>,
    /// Mutation types never relayed, queued or persisted
    pub ignore: Vec<String>,
    pub strategy: Strategy,
    pub election: Election,
    pub log_level: LogLevel,
    /// Pause between failed connect attempts while reconnecting
    pub reconnect_delay: Duration,
}

impl Default for SyncOptions {
    fn default() -> Self {
        SyncOptions {
            persist: Vec::new(),
            ignore: Vec::new(),
            strategy: Strategy::Broadcast,
            election: Election::EarliestConnected,
            log_level: LogLevel::Info,
            reconnect_delay: Duration::from_millis(100),
        }
    }
}

impl SyncOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_persist<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.persist = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_ignore<I, S>(mut self, kinds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ignore = kinds.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_election_policy(mut self, election: Election) -> Self {
        self.election = election;
        self
    }

    /// Use a custom election function
    pub fn with_election<F>(mut self, elect: F) -> Self
    where
        F: Fn(&[RegistrationInfo]) -> Option<ChannelId> + Send + Sync + 'static,
    {
        self.election = Election::Custom(Arc::new(elect));
        self
    }

    pub fn with_log_level(mut self, level: LogLevel) -> Self {
        self.log_level = level;
        self
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    #[inline]
    pub fn is_ignored(&self, kind: &str) -> bool {
        self.ignore.iter().any(|i| i == kind)
    }

    #[inline]
    pub fn persists(&self) -> bool {
        !self.persist.is_empty()
    }

    #[inline]
    pub fn is_master(&self) -> bool {
        self.strategy == Strategy::Master
    }

    /// Parse and validate options from a JSON string
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let value: Value =
            serde_json::from_str(raw).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Self::from_value(&value)
    }

    /// Validate a dynamic options object
    ///
    /// Recognized keys: `persist`, `ignore`, `strategy`, `electionFunc`,
    /// `debug`, `logLevel`, `reconnectDelayMs`. Absent or `null` keys keep
    /// their defaults; unknown keys are ignored.
    pub fn from_value(value: &Value) -> Result<Self, ConfigError> {
        let obj = value.as_object().ok_or(ConfigError::NotAnObject)?;
        let mut options = SyncOptions::default();

        if let Some(persist) = present(obj.get("persist")) {
            options.persist = string_array(persist).ok_or(ConfigError::PersistNotStringArray)?;
        }
        if let Some(ignore) = present(obj.get("ignore")) {
            options.ignore = string_array(ignore).ok_or(ConfigError::IgnoreNotStringArray)?;
        }
        if let Some(strategy) = present(obj.get("strategy")) {
            options.strategy = match strategy {
                Value::String(s) => s.parse()?,
                other => return Err(ConfigError::InvalidStrategy(other.to_string())),
            };
        }
        if let Some(election) = present(obj.get("electionFunc")) {
            options.election = election
                .as_str()
                .and_then(Election::from_name)
                .ok_or(ConfigError::ElectionNotFunction)?;
        }
        if let Some(debug) = present(obj.get("debug")) {
            match debug {
                Value::Bool(true) => options.log_level = LogLevel::Debug,
                Value::Bool(false) => {}
                other => return Err(ConfigError::InvalidLogLevel(other.to_string())),
            }
        }
        if let Some(level) = present(obj.get("logLevel")) {
            options.log_level = match level {
                Value::String(s) => s.parse()?,
                other => return Err(ConfigError::InvalidLogLevel(other.to_string())),
            };
        }
        if let Some(delay) = present(obj.get("reconnectDelayMs")) {
            let ms = delay.as_u64().ok_or(ConfigError::InvalidReconnectDelay)?;
            options.reconnect_delay = Duration::from_millis(ms);
        }

        Ok(options)
    }
}

fn present(value: Option<&Value>) -> Option<&Value> {
    value.filter(|v| !v.is_null())
}

fn string_array(value: &Value) -> Option<Vec<String>> {
    value
        .as_array()?
        .iter()
        .map(|item| item.as_str().map(str::to_string))
        .collect()
}
