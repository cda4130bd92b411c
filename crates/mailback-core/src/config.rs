use serde::Deserialize;
use std::{env, path::Path, path::PathBuf, time::Duration};
use thiserror::Error;

use crate::processor::{DEFAULT_CONCURRENCY, ProcessorConfig};
use crate::reply::DEFAULT_REPLY_BODY;
use crate::scheduler::{DEFAULT_MAX_DELAY_SECS, DEFAULT_MIN_DELAY_SECS, SchedulerConfig};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    pub app: AppConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    pub gmail: GmailConfig,
    #[serde(default)]
    pub reply: ReplyConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AppConfig {
    pub service_name: String,
    pub env: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TelemetryConfig {
    pub otlp_endpoint: Option<String>,
    #[serde(default)]
    pub export_traces: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct GmailConfig {
    #[serde(default = "default_user_id")]
    pub user_id: String,
    pub client_id: String,
    pub client_secret: String,
    #[serde(default = "default_token_path")]
    pub token_path: PathBuf,
    pub api_base: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ReplyConfig {
    /// Falls back to the Gmail profile address when unset.
    pub operator_address: Option<String>,
    /// Falls back to the operator address when unset.
    pub from_address: Option<String>,
    #[serde(default = "default_label_name")]
    pub label_name: String,
    /// Skips the label lookup when set.
    pub label_id: Option<String>,
    #[serde(default = "default_reply_body")]
    pub body: String,
}

impl Default for ReplyConfig {
    fn default() -> Self {
        Self {
            operator_address: None,
            from_address: None,
            label_name: default_label_name(),
            label_id: None,
            body: default_reply_body(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ScheduleConfig {
    #[serde(default = "default_min_delay")]
    pub min_delay_secs: u64,
    #[serde(default = "default_max_delay")]
    pub max_delay_secs: u64,
    #[serde(default = "default_lookback_minutes")]
    pub lookback_minutes: i64,
    #[serde(default = "default_call_timeout")]
    pub call_timeout_secs: u64,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            min_delay_secs: default_min_delay(),
            max_delay_secs: default_max_delay(),
            lookback_minutes: default_lookback_minutes(),
            call_timeout_secs: default_call_timeout(),
            concurrency: default_concurrency(),
        }
    }
}

impl ScheduleConfig {
    pub fn scheduler(&self) -> SchedulerConfig {
        SchedulerConfig {
            min_delay_secs: self.min_delay_secs,
            max_delay_secs: self.max_delay_secs,
        }
    }

    /// Applies the cycle tuning knobs to a processor config.
    pub fn tune(&self, processor: ProcessorConfig) -> ProcessorConfig {
        processor
            .with_lookback(chrono::Duration::minutes(self.lookback_minutes))
            .with_call_timeout(Duration::from_secs(self.call_timeout_secs))
            .with_concurrency(self.concurrency)
    }
}

fn default_user_id() -> String {
    "me".to_string()
}

fn default_token_path() -> PathBuf {
    PathBuf::from("token.json")
}

fn default_label_name() -> String {
    "replied".to_string()
}

fn default_reply_body() -> String {
    DEFAULT_REPLY_BODY.to_string()
}

fn default_min_delay() -> u64 {
    DEFAULT_MIN_DELAY_SECS
}

fn default_max_delay() -> u64 {
    DEFAULT_MAX_DELAY_SECS
}

fn default_lookback_minutes() -> i64 {
    60
}

fn default_call_timeout() -> u64 {
    30
}

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read configuration file: {0}")]
    ConfigBuild(config::ConfigError),
    #[error("failed to parse configuration: {0}")]
    Deserialize(config::ConfigError),
    #[error("missing required environment variable {0}")]
    MissingEnvVar(String),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl Config {
    /// Load configuration from the provided path, apply environment overrides,
    /// resolve any `env:` indirections, and validate.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .build()
            .map_err(ConfigError::ConfigBuild)?;

        let mut cfg: Config = raw.try_deserialize().map_err(ConfigError::Deserialize)?;
        cfg.apply_env_overrides();
        cfg.resolve_env_markers()?;
        cfg.expand_paths();
        cfg.validate()?;
        Ok(cfg)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(otlp) = env::var("OTLP_ENDPOINT") {
            self.telemetry.otlp_endpoint = Some(otlp);
        }
        if let Ok(client_id) = env::var("GMAIL_CLIENT_ID") {
            self.gmail.client_id = client_id;
        }
        if let Ok(secret) = env::var("GMAIL_CLIENT_SECRET") {
            self.gmail.client_secret = secret;
        }
        if let Ok(path) = env::var("GMAIL_TOKEN_PATH") {
            self.gmail.token_path = PathBuf::from(path);
        }
        if let Ok(address) = env::var("REPLY_OPERATOR_ADDRESS") {
            self.reply.operator_address = Some(address);
        }
    }

    fn resolve_env_markers(&mut self) -> Result<(), ConfigError> {
        apply_env_marker(&mut self.app.service_name)?;
        apply_env_marker(&mut self.app.env)?;
        apply_env_marker(&mut self.gmail.user_id)?;
        apply_env_marker(&mut self.gmail.client_id)?;
        apply_env_marker(&mut self.gmail.client_secret)?;
        apply_env_marker_path(&mut self.gmail.token_path)?;
        apply_env_marker(&mut self.reply.label_name)?;
        for value in [
            &mut self.telemetry.otlp_endpoint,
            &mut self.gmail.api_base,
            &mut self.reply.operator_address,
            &mut self.reply.from_address,
            &mut self.reply.label_id,
        ]
        .into_iter()
        .flatten()
        {
            apply_env_marker(value)?;
        }
        Ok(())
    }

    fn expand_paths(&mut self) {
        let token_path = self.gmail.token_path.to_string_lossy().to_string();
        let expanded = shellexpand::tilde(&token_path);
        self.gmail.token_path = PathBuf::from(expanded.as_ref());
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let schedule = &self.schedule;
        if schedule.min_delay_secs > schedule.max_delay_secs {
            return Err(ConfigError::Invalid(format!(
                "schedule.min_delay_secs ({}) exceeds schedule.max_delay_secs ({})",
                schedule.min_delay_secs, schedule.max_delay_secs
            )));
        }
        if schedule.concurrency == 0 {
            return Err(ConfigError::Invalid(
                "schedule.concurrency must be at least 1".to_string(),
            ));
        }
        if schedule.lookback_minutes <= 0 {
            return Err(ConfigError::Invalid(
                "schedule.lookback_minutes must be positive".to_string(),
            ));
        }
        if schedule.call_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "schedule.call_timeout_secs must be positive".to_string(),
            ));
        }
        if matches!(&self.reply.operator_address, Some(address) if address.trim().is_empty()) {
            return Err(ConfigError::Invalid(
                "reply.operator_address must not be blank".to_string(),
            ));
        }
        Ok(())
    }
}

fn apply_env_marker(value: &mut String) -> Result<(), ConfigError> {
    if let Some(rest) = value.strip_prefix("env:") {
        let resolved = env::var(rest).map_err(|_| ConfigError::MissingEnvVar(rest.to_string()))?;
        *value = resolved;
    }
    Ok(())
}

fn apply_env_marker_path(path: &mut PathBuf) -> Result<(), ConfigError> {
    let mut value = path.to_string_lossy().to_string();
    apply_env_marker(&mut value)?;
    *path = PathBuf::from(value);
    Ok(())
}
