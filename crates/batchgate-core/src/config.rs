//! Aggregator configuration.
//!
//! Values come from a config file (via serde) or from the environment:
//!
//! | Variable                   | Field                 | Default |
//! |----------------------------|-----------------------|---------|
//! | `BATCH_SIZE`               | `max_batch_size`      | 1       |
//! | `BATCH_TIMEOUT_MS`         | `flush_timeout`       | 10 ms   |
//! | `QUEUE_CAPACITY`           | `queue_capacity`      | 128     |
//! | `ADMISSION_WAIT_MS`        | `admission_wait`      | 5000 ms |
//! | `RESULT_WAIT_TIMEOUT_SECS` | `result_wait_timeout` | 30 s    |
//! | `REQUEST_DEADLINE_SECS`    | `request_deadline`    | 60 s    |
//!
//! A `max_batch_size` of 1 disables aggregation entirely.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const ENV_BATCH_SIZE: &str = "BATCH_SIZE";
pub const ENV_BATCH_TIMEOUT_MS: &str = "BATCH_TIMEOUT_MS";
pub const ENV_QUEUE_CAPACITY: &str = "QUEUE_CAPACITY";
pub const ENV_ADMISSION_WAIT_MS: &str = "ADMISSION_WAIT_MS";
pub const ENV_RESULT_WAIT_TIMEOUT_SECS: &str = "RESULT_WAIT_TIMEOUT_SECS";
pub const ENV_REQUEST_DEADLINE_SECS: &str = "REQUEST_DEADLINE_SECS";

/// Immutable batching configuration, fixed for the lifetime of a gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregatorConfig {
    /// Largest batch handed to the adapter. `1` disables aggregation.
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
    /// Longest a batch stays open after its first item arrives.
    #[serde(rename = "flush_timeout_ms", default = "default_flush_timeout", with = "millis")]
    pub flush_timeout: Duration,
    /// Bounded intake queue size. `0` rejects every offer.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// How long a caller waits for room in a full queue before falling back.
    #[serde(rename = "admission_wait_ms", default = "default_admission_wait", with = "millis")]
    pub admission_wait: Duration,
    /// How long a queued caller waits for its batched result.
    #[serde(
        rename = "result_wait_timeout_ms",
        default = "default_result_wait_timeout",
        with = "millis"
    )]
    pub result_wait_timeout: Duration,
    /// Overall deadline used by [`InferenceService`](crate::InferenceService) calls.
    #[serde(
        rename = "request_deadline_ms",
        default = "default_request_deadline",
        with = "millis"
    )]
    pub request_deadline: Duration,
}

fn default_max_batch_size() -> usize {
    1
}

fn default_flush_timeout() -> Duration {
    Duration::from_millis(10)
}

fn default_queue_capacity() -> usize {
    128
}

fn default_admission_wait() -> Duration {
    Duration::from_secs(5)
}

fn default_result_wait_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_request_deadline() -> Duration {
    Duration::from_secs(60)
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            max_batch_size: default_max_batch_size(),
            flush_timeout: default_flush_timeout(),
            queue_capacity: default_queue_capacity(),
            admission_wait: default_admission_wait(),
            result_wait_timeout: default_result_wait_timeout(),
            request_deadline: default_request_deadline(),
        }
    }
}

impl AggregatorConfig {
    /// Read the configuration from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build a configuration from an arbitrary variable lookup.
    ///
    /// Unset variables keep their defaults; set but unparsable ones are errors.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(n) = parse_var::<usize, _>(&lookup, ENV_BATCH_SIZE)? {
            config.max_batch_size = n;
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, ENV_BATCH_TIMEOUT_MS)? {
            config.flush_timeout = Duration::from_millis(ms);
        }
        if let Some(n) = parse_var::<usize, _>(&lookup, ENV_QUEUE_CAPACITY)? {
            config.queue_capacity = n;
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, ENV_ADMISSION_WAIT_MS)? {
            config.admission_wait = Duration::from_millis(ms);
        }
        if let Some(secs) = parse_var::<u64, _>(&lookup, ENV_RESULT_WAIT_TIMEOUT_SECS)? {
            config.result_wait_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var::<u64, _>(&lookup, ENV_REQUEST_DEADLINE_SECS)? {
            config.request_deadline = Duration::from_secs(secs);
        }
        config.validate()?;
        Ok(config)
    }

    /// Check the invariants the gate relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_batch_size == 0 {
            return Err(ConfigError::Invalid {
                field: "max_batch_size",
                reason: "must be at least 1".into(),
            });
        }
        if self.result_wait_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                field: "result_wait_timeout",
                reason: "must be non-zero".into(),
            });
        }
        if self.request_deadline.is_zero() {
            return Err(ConfigError::Invalid {
                field: "request_deadline",
                reason: "must be non-zero".into(),
            });
        }
        Ok(())
    }

    /// Returns `true` if requests go through the background aggregator.
    pub fn batching_enabled(&self) -> bool {
        self.max_batch_size > 1 && self.queue_capacity > 0
    }
}

fn parse_var<T, F>(lookup: &F, var: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::Parse { var, value: raw }),
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k: &str| map.get(k).cloned()
    }

    #[test]
    fn defaults_disable_batching() {
        let config = AggregatorConfig::default();
        assert_eq!(config.max_batch_size, 1);
        assert_eq!(config.flush_timeout, Duration::from_millis(10));
        assert_eq!(config.queue_capacity, 128);
        assert!(!config.batching_enabled());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn reads_variables() {
        let config = AggregatorConfig::from_lookup(lookup(&[
            (ENV_BATCH_SIZE, "8"),
            (ENV_BATCH_TIMEOUT_MS, " 25 "),
            (ENV_QUEUE_CAPACITY, "200"),
            (ENV_RESULT_WAIT_TIMEOUT_SECS, "3"),
        ]))
        .unwrap();
        assert_eq!(config.max_batch_size, 8);
        assert_eq!(config.flush_timeout, Duration::from_millis(25));
        assert_eq!(config.queue_capacity, 200);
        assert_eq!(config.result_wait_timeout, Duration::from_secs(3));
        assert_eq!(config.admission_wait, Duration::from_secs(5));
        assert!(config.batching_enabled());
    }

    #[test]
    fn rejects_garbage() {
        let err = AggregatorConfig::from_lookup(lookup(&[(ENV_BATCH_SIZE, "four")])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::Parse {
                var: ENV_BATCH_SIZE,
                value: "four".into()
            }
        );
    }

    #[test]
    fn rejects_zero_batch_size() {
        let err = AggregatorConfig::from_lookup(lookup(&[(ENV_BATCH_SIZE, "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "max_batch_size", .. }));
    }

    #[test]
    fn zero_capacity_disables_batching() {
        let config = AggregatorConfig {
            max_batch_size: 4,
            queue_capacity: 0,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
        assert!(!config.batching_enabled());
    }

    #[test]
    fn deserializes_with_defaults() {
        let config: AggregatorConfig =
            serde_json::from_str(r#"{"max_batch_size": 4, "flush_timeout_ms": 50}"#).unwrap();
        assert_eq!(config.max_batch_size, 4);
        assert_eq!(config.flush_timeout, Duration::from_millis(50));
        assert_eq!(config.result_wait_timeout, Duration::from_secs(30));

        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["flush_timeout_ms"], 50);
    }
}
