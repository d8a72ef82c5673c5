// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::error::{Error, Result};
use crate::monk::MonkClientConfig;
use crate::router::{Backend, BackendPreference};
use crate::scribe::ScribeClientConfig;
use crate::size_guard::LargeRecordPolicy;
use crate::tailer::TailEndpoint;
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

const ENV_PREFIX: &str = "LOGSHIP_";
const STREAM_BACKEND_PREFIX: &str = "stream_backend.";

/// Process-wide settings for the writers and the tailer.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Scribe server host, required unless scribe is disabled
    pub scribe_host: Option<String>,
    /// Scribe server port, required unless scribe is disabled
    pub scribe_port: Option<u16>,
    /// Minimum time between two reconnect attempts
    pub scribe_retry_interval: Duration,
    /// Socket timeout for scribe; `None` means blocking
    pub scribe_logging_timeout: Option<Duration>,
    pub scribe_disable: bool,
    /// Send status reports to syslog instead of stderr
    pub scribe_errors_to_syslog: bool,
    pub monk_disable: bool,
    pub monk_client_id: String,
    pub monk_stream_prefix: String,
    /// Producer request timeout
    pub monk_timeout: Duration,
    /// How long sends are suppressed after a monk timeout
    pub monk_timeout_backoff: Duration,
    pub monk_buffer_max_bytes: usize,
    pub monk_close_timeout: Duration,
    pub default_backend: Backend,
    /// Backend overrides keyed by stream name
    pub stream_backend: HashMap<String, Backend>,
    /// Register unknown monk streams with the schema registry
    pub use_schematizer: bool,
    /// Measure one out of this many sends; 0 disables
    pub metrics_sample_rate: u64,
    pub large_record_policy: LargeRecordPolicy,
    pub enable_file_logging: bool,
    pub enable_stdout_logging: bool,
    /// Directory for file logging
    pub log_dir: PathBuf,
    /// Wrap backend sends in tracing spans
    pub use_tracing_spans: bool,
    /// Tail endpoints to pick from when none is given explicitly
    pub scribe_tail_services: Vec<TailEndpoint>,
    pub default_scribe_tail_port: u16,
    /// JSON document used to resolve tail hosts
    pub tail_settings_file: Option<PathBuf>,
    /// Log level (e.g., trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            scribe_host: None,
            scribe_port: None,
            scribe_retry_interval: Duration::from_secs(10),
            scribe_logging_timeout: Some(Duration::from_millis(1000)),
            scribe_disable: true,
            scribe_errors_to_syslog: false,
            monk_disable: true,
            monk_client_id: "clog".to_string(),
            monk_stream_prefix: String::new(),
            monk_timeout: Duration::from_millis(100),
            monk_timeout_backoff: Duration::from_millis(2000),
            monk_buffer_max_bytes: 16 * 1024 * 1024,
            monk_close_timeout: Duration::from_millis(1000),
            default_backend: Backend::Primary,
            stream_backend: HashMap::new(),
            use_schematizer: false,
            metrics_sample_rate: 0,
            large_record_policy: LargeRecordPolicy::Always,
            enable_file_logging: false,
            enable_stdout_logging: false,
            log_dir: env::temp_dir(),
            use_tracing_spans: false,
            scribe_tail_services: Vec::new(),
            default_scribe_tail_port: 3535,
            tail_settings_file: None,
            log_level: "info".to_string(),
        }
    }
}

/// Lowercases the setting name of an environment key. A `.<stream>` suffix
/// keeps its case since stream names are matched exactly.
fn setting_key(key: &str) -> String {
    match key.split_once('.') {
        Some((setting, stream)) => format!("{}.{stream}", setting.to_lowercase()),
        None => key.to_lowercase(),
    }
}

impl Config {
    /// Create configuration from `LOGSHIP_*` environment variables
    pub fn from_env() -> Result<Self> {
        let values: HashMap<String, String> = env::vars()
            .filter_map(|(key, value)| {
                key.strip_prefix(ENV_PREFIX)
                    .map(|key| (setting_key(key), value))
            })
            .collect();
        Self::from_map(&values)
    }

    /// Create configuration from a flat key/value map, starting from the
    /// defaults. Unknown keys are ignored.
    pub fn from_map(values: &HashMap<String, String>) -> Result<Self> {
        let mut config = Self::default();
        for (key, value) in values {
            config.apply(key, value)?;
        }
        config.validate()?;
        Ok(config)
    }

    fn apply(&mut self, key: &str, value: &str) -> Result<()> {
        let value = value.trim();
        if let Some(stream) = key.strip_prefix(STREAM_BACKEND_PREFIX) {
            self.stream_backend
                .insert(stream.to_string(), value.parse()?);
            return Ok(());
        }

        match key {
            "scribe_host" => self.scribe_host = Some(value.to_string()),
            "scribe_port" => self.scribe_port = Some(parse(key, value)?),
            "scribe_retry_interval" => {
                self.scribe_retry_interval = Duration::from_secs(parse(key, value)?);
            }
            "scribe_logging_timeout" => {
                let millis: u64 = parse(key, value)?;
                self.scribe_logging_timeout =
                    (millis > 0).then(|| Duration::from_millis(millis));
            }
            "scribe_disable" => self.scribe_disable = parse_bool(key, value)?,
            "scribe_errors_to_syslog" => self.scribe_errors_to_syslog = parse_bool(key, value)?,
            "monk_disable" => self.monk_disable = parse_bool(key, value)?,
            "monk_client_id" => self.monk_client_id = value.to_string(),
            "monk_stream_prefix" => self.monk_stream_prefix = value.to_string(),
            "monk_timeout_ms" => self.monk_timeout = Duration::from_millis(parse(key, value)?),
            "monk_timeout_backoff_ms" => {
                self.monk_timeout_backoff = Duration::from_millis(parse(key, value)?);
            }
            "monk_buffer_max_bytes" => self.monk_buffer_max_bytes = parse(key, value)?,
            "monk_close_timeout_ms" => {
                self.monk_close_timeout = Duration::from_millis(parse(key, value)?);
            }
            "default_backend" | "preferred_backend" => self.default_backend = value.parse()?,
            "stream_backend" => {
                for pair in value.split(',').filter(|pair| !pair.trim().is_empty()) {
                    let (stream, backend) = pair.split_once(':').ok_or_else(|| {
                        Error::Config(format!(
                            "stream_backend entries must look like stream:backend, got {pair:?}"
                        ))
                    })?;
                    self.stream_backend
                        .insert(stream.trim().to_string(), backend.parse()?);
                }
            }
            "use_schematizer" => self.use_schematizer = parse_bool(key, value)?,
            "metrics_sample_rate" => self.metrics_sample_rate = parse(key, value)?,
            "large_record_policy" => self.large_record_policy = value.parse()?,
            "clog_enable_file_logging" => self.enable_file_logging = parse_bool(key, value)?,
            "clog_enable_stdout_logging" => self.enable_stdout_logging = parse_bool(key, value)?,
            "log_dir" => self.log_dir = PathBuf::from(value),
            "use_tracing_spans" => self.use_tracing_spans = parse_bool(key, value)?,
            "scribe_tail_services" => {
                self.scribe_tail_services = value
                    .split(',')
                    .filter(|service| !service.trim().is_empty())
                    .map(TailEndpoint::from_str)
                    .collect::<Result<_>>()?;
            }
            "default_scribe_tail_port" => self.default_scribe_tail_port = parse(key, value)?,
            "tail_settings_file" => self.tail_settings_file = Some(PathBuf::from(value)),
            "log_level" => self.log_level = value.to_lowercase(),
            _ => debug!("Ignoring unknown configuration key {}", key),
        }
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if !self.scribe_disable {
            match &self.scribe_host {
                Some(host) if !host.trim().is_empty() => {}
                _ => {
                    return Err(Error::Config(
                        "scribe_host is required when scribe is enabled".to_string(),
                    ))
                }
            }
            if matches!(self.scribe_port, None | Some(0)) {
                return Err(Error::Config(
                    "scribe_port must be greater than 0 when scribe is enabled".to_string(),
                ));
            }
        }

        if self.default_scribe_tail_port == 0 {
            return Err(Error::Config(
                "default_scribe_tail_port must be greater than 0".to_string(),
            ));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.log_level.as_str()) {
            return Err(Error::Config(format!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                self.log_level
            )));
        }

        Ok(())
    }

    pub fn scribe_client_config(&self) -> Option<ScribeClientConfig> {
        if self.scribe_disable {
            return None;
        }
        Some(ScribeClientConfig {
            host: self.scribe_host.clone()?,
            port: self.scribe_port?,
            retry_interval: self.scribe_retry_interval,
            logging_timeout: self.scribe_logging_timeout,
            metrics_sample_rate: self.metrics_sample_rate,
            large_record_policy: self.large_record_policy,
        })
    }

    pub fn monk_client_config(&self) -> Option<MonkClientConfig> {
        if self.monk_disable {
            return None;
        }
        Some(MonkClientConfig {
            stream_prefix: self.monk_stream_prefix.clone(),
            timeout_backoff: self.monk_timeout_backoff,
            max_buffer_bytes: self.monk_buffer_max_bytes,
            close_timeout: self.monk_close_timeout,
            metrics_sample_rate: self.metrics_sample_rate,
        })
    }

    pub fn backend_preference(&self) -> BackendPreference {
        BackendPreference::new(self.default_backend, self.stream_backend.clone())
    }
}

fn parse<T: FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| Error::Config(format!("invalid value {value:?} for {key}: {e}")))
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(Error::Config(format!(
            "invalid boolean {value:?} for {key}"
        ))),
    }
}
