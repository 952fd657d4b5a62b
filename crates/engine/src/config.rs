use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use hubqueue_core::classify::ErrorClassifier;
use hubqueue_core::error::CoreError;
use hubqueue_core::kind::KindRegistry;
use hubqueue_core::retry::RetryPolicy;
use hubqueue_remote::client::RemoteTimeouts;
use hubqueue_remote::retry::CallRetry;

use crate::error::ConfigError;

/// Default base URL of the hosted remote service.
pub const DEFAULT_REMOTE_BASE_URL: &str = "https://www.runninghub.cn";

/// Poll-loop tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollSettings {
    pub interval: Duration,
    /// Status checks before the attempt fails with a processing timeout.
    pub max_polls: u32,
    /// Consecutive inconclusive checks that trigger an extra pause.
    pub inconclusive_threshold: u32,
    /// The extra pause, as a multiple of `interval`.
    pub inconclusive_backoff: u32,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(4),
            max_polls: 240,
            inconclusive_threshold: 3,
            inconclusive_backoff: 2,
        }
    }
}

/// Engine configuration.
///
/// `Default` matches the values [`EngineConfig::from_env`] falls back to.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Concurrency ceiling: the number of workers, and so the most jobs
    /// that can be processing at once.
    pub max_concurrent: usize,
    pub retry: RetryPolicy,
    pub poll: PollSettings,
    pub timeouts: RemoteTimeouts,
    pub call_retry: CallRetry,
    pub classifier: ErrorClassifier,
    pub remote_base_url: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 5,
            retry: RetryPolicy::default(),
            poll: PollSettings::default(),
            timeouts: RemoteTimeouts::default(),
            call_retry: CallRetry::default(),
            classifier: ErrorClassifier::default(),
            remote_base_url: DEFAULT_REMOTE_BASE_URL.to_string(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                  | Default                     |
    /// |--------------------------|-----------------------------|
    /// | `MAX_CONCURRENT`         | `5`                         |
    /// | `MAX_RETRIES`            | `3`                         |
    /// | `POLL_INTERVAL_SECS`     | `4`                         |
    /// | `MAX_POLL_COUNT`         | `240`                       |
    /// | `INCONCLUSIVE_THRESHOLD` | `3`                         |
    /// | `UPLOAD_TIMEOUT_SECS`    | `120`                       |
    /// | `SUBMIT_TIMEOUT_SECS`    | `60`                        |
    /// | `STATUS_TIMEOUT_SECS`    | `25`                        |
    /// | `OUTPUT_TIMEOUT_SECS`    | `90`                        |
    /// | `DOWNLOAD_TIMEOUT_SECS`  | `120`                       |
    /// | `REMOTE_CALL_ATTEMPTS`   | `3`                         |
    /// | `REMOTE_BASE_URL`        | `https://www.runninghub.cn` |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a custom variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        config.max_concurrent = parse_or(&lookup, "MAX_CONCURRENT", config.max_concurrent)?;
        if config.max_concurrent == 0 {
            return Err(ConfigError::InvalidValue {
                name: "MAX_CONCURRENT",
                expected: "at least 1",
                value: "0".into(),
            });
        }
        config.retry.max_retries = parse_or(&lookup, "MAX_RETRIES", config.retry.max_retries)?;

        config.poll.interval = secs_or(&lookup, "POLL_INTERVAL_SECS", config.poll.interval)?;
        if config.poll.interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                name: "POLL_INTERVAL_SECS",
                expected: "at least 1",
                value: "0".into(),
            });
        }
        config.poll.max_polls = parse_or(&lookup, "MAX_POLL_COUNT", config.poll.max_polls)?;
        config.poll.inconclusive_threshold = parse_or(
            &lookup,
            "INCONCLUSIVE_THRESHOLD",
            config.poll.inconclusive_threshold,
        )?;

        let t = &mut config.timeouts;
        t.upload = secs_or(&lookup, "UPLOAD_TIMEOUT_SECS", t.upload)?;
        t.submit = secs_or(&lookup, "SUBMIT_TIMEOUT_SECS", t.submit)?;
        t.status = secs_or(&lookup, "STATUS_TIMEOUT_SECS", t.status)?;
        t.outputs = secs_or(&lookup, "OUTPUT_TIMEOUT_SECS", t.outputs)?;
        t.download = secs_or(&lookup, "DOWNLOAD_TIMEOUT_SECS", t.download)?;

        config.call_retry.attempts =
            parse_or(&lookup, "REMOTE_CALL_ATTEMPTS", config.call_retry.attempts)?;

        if let Some(url) = lookup("REMOTE_BASE_URL").filter(|u| !u.trim().is_empty()) {
            config.remote_base_url = url.trim().to_string();
        }

        Ok(config)
    }
}

/// Read and validate a JSON kind table.
pub fn load_registry(path: impl AsRef<Path>) -> Result<KindRegistry, ConfigError> {
    let path = path.as_ref();
    let display = path.display().to_string();
    let json = std::fs::read_to_string(path).map_err(|source| ConfigError::KindsIo {
        path: display.clone(),
        source,
    })?;
    let registry = KindRegistry::from_json(&json).map_err(|source| ConfigError::KindsInvalid {
        path: display.clone(),
        source,
    })?;
    if registry.is_empty() {
        return Err(ConfigError::KindsInvalid {
            path: display,
            source: CoreError::Validation("the kind table defines no kinds".into()),
        });
    }
    Ok(registry)
}

// ---- private helpers ----

fn parse_or<F, T>(lookup: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(name) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
            name,
            expected: "a non-negative integer",
            value: raw,
        }),
    }
}

fn secs_or<F>(lookup: &F, name: &'static str, default: Duration) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    parse_or(lookup, name, default.as_secs()).map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use assert_matches::assert_matches;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn empty_environment_gives_defaults() {
        let config = EngineConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.max_concurrent, 5);
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.poll, PollSettings::default());
        assert_eq!(config.timeouts, RemoteTimeouts::default());
        assert_eq!(config.call_retry.attempts, 3);
        assert_eq!(config.remote_base_url, DEFAULT_REMOTE_BASE_URL);
    }

    #[test]
    fn overrides_are_applied() {
        let config = EngineConfig::from_lookup(lookup(&[
            ("MAX_CONCURRENT", "2"),
            ("MAX_RETRIES", "5"),
            ("POLL_INTERVAL_SECS", "1"),
            ("STATUS_TIMEOUT_SECS", " 10 "),
            ("REMOTE_BASE_URL", "http://localhost:9000"),
        ]))
        .unwrap();

        assert_eq!(config.max_concurrent, 2);
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.poll.interval, Duration::from_secs(1));
        assert_eq!(config.timeouts.status, Duration::from_secs(10));
        assert_eq!(config.timeouts.upload, Duration::from_secs(120));
        assert_eq!(config.remote_base_url, "http://localhost:9000");
    }

    #[test]
    fn garbage_is_rejected() {
        let err = EngineConfig::from_lookup(lookup(&[("MAX_POLL_COUNT", "lots")])).unwrap_err();
        assert_matches!(err, ConfigError::InvalidValue { name: "MAX_POLL_COUNT", .. });
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let err = EngineConfig::from_lookup(lookup(&[("MAX_CONCURRENT", "0")])).unwrap_err();
        assert_matches!(err, ConfigError::InvalidValue { name: "MAX_CONCURRENT", .. });
    }

    #[test]
    fn zero_poll_interval_is_rejected() {
        let err = EngineConfig::from_lookup(lookup(&[("POLL_INTERVAL_SECS", "0")])).unwrap_err();
        assert_matches!(err, ConfigError::InvalidValue { name: "POLL_INTERVAL_SECS", .. });
    }

    #[test]
    fn empty_kind_table_is_rejected() {
        let path = std::env::temp_dir()
            .join(format!("hubqueue-empty-kinds-{}.json", std::process::id()));
        std::fs::write(&path, "{}").unwrap();
        let err = load_registry(&path).unwrap_err();
        std::fs::remove_file(&path).unwrap();
        assert_matches!(err, ConfigError::KindsInvalid { source: CoreError::Validation(_), .. });
    }

    #[test]
    fn missing_kind_table_is_an_io_error() {
        let err = load_registry("/nonexistent/kinds.json").unwrap_err();
        assert_matches!(err, ConfigError::KindsIo { .. });
    }
}
