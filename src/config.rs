mod admin;
mod lossless;
mod reporter;

use config::{Config, Environment, File as ConfigFile};
use serde::de::Error as _;
use serde::Deserialize;
use serde_yaml::Value as YamlValue;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

pub use admin::AdminConfig;
pub use lossless::{
    DelayRegisterConfig, DelayStrategyKind, HealthCheckConfig, HealthCheckProtocol,
    LosslessConfig, OverloadProtectionConfig, ProbeEndpointConfig, WarmupConfig,
    DEFAULT_CURVATURE, DEFAULT_HEALTH_CHECK_PATH, DEFAULT_MAX_RETRY, DEFAULT_OFFLINE_PATH,
    DEFAULT_READINESS_PATH,
};
pub use reporter::{DiscoveryTarget, EventReporterConfig};

/// Everything the lossless controller reads from local configuration.
#[derive(Debug, Clone, Default)]
pub struct SdkConfig {
    pub lossless: LosslessConfig,
    pub admin: AdminConfig,
    pub event_reporter: EventReporterConfig,
    pub weight_adjust: WeightAdjustConfig,
    pub client: ClientConfig,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeightAdjustConfig {
    pub enable: bool,
}

impl Default for WeightAdjustConfig {
    fn default() -> Self {
        Self { enable: true }
    }
}

/// Identity stamped on every reported event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientConfig {
    pub id: String,
    pub ip: String,
}

impl SdkConfig {
    pub fn from_reader(mut reader: impl Read) -> Result<Self, SdkConfigError> {
        let mut contents = String::new();
        reader.read_to_string(&mut contents)?;
        Self::from_yaml_str(&contents)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, SdkConfigError> {
        let file = File::open(path)?;
        Self::from_reader(file)
    }

    /// Layers `config/lossless.{yaml,yml}` (optional) under `LOSSLESS__*` environment
    /// overrides, then runs the same validation as [`SdkConfig::from_reader`].
    pub fn load() -> Result<Self, SdkConfigError> {
        let raw: RawSdkFile = Config::builder()
            .add_source(ConfigFile::with_name("config/lossless").required(false))
            .add_source(Environment::with_prefix("LOSSLESS").separator("__"))
            .build()?
            .try_deserialize()?;
        Self::from_raw(raw).map_err(SdkConfigError::Invalid)
    }

    fn from_yaml_str(contents: &str) -> Result<Self, SdkConfigError> {
        let mut documents = serde_yaml::Deserializer::from_str(contents);
        let mut parsed = None;

        for (index, document) in documents.by_ref().enumerate() {
            if index == 0 {
                parsed = Some(RawSdkFile::deserialize(document)?);
            } else {
                let _: YamlValue = YamlValue::deserialize(document)?;
                return Err(SdkConfigError::Parse(serde_yaml::Error::custom(
                    "multiple YAML documents are not supported",
                )));
            }
        }

        // An empty file is a valid "all defaults" configuration.
        let raw = parsed.unwrap_or_default();
        Self::from_raw(raw).map_err(SdkConfigError::Invalid)
    }

    fn from_raw(raw: RawSdkFile) -> Result<Self, SdkValidationError> {
        let mut errors = Vec::new();

        let lossless = lossless::resolve_lossless(raw.lossless.unwrap_or_default(), &mut errors);
        let admin = admin::resolve_admin(raw.admin.unwrap_or_default(), &mut errors);
        let event_reporter =
            reporter::resolve_reporter(raw.event_reporter.unwrap_or_default(), &mut errors);
        let weight_adjust = WeightAdjustConfig {
            enable: raw
                .weight_adjust
                .and_then(|section| section.enable)
                .unwrap_or(true),
        };
        let client = raw
            .client
            .map(|section| ClientConfig {
                id: section.id.unwrap_or_default(),
                ip: section.ip.unwrap_or_default(),
            })
            .unwrap_or_default();

        if lossless.offline.enable && lossless.readiness.enable
            && lossless.offline.path == lossless.readiness.path
        {
            errors.push(format!(
                "lossless.offline.path and lossless.readiness.path must differ (both `{}`)",
                lossless.offline.path
            ));
        }
        if let Some(metrics_path) = &admin.metrics_path {
            for (label, probe) in [
                ("readiness", &lossless.readiness),
                ("offline", &lossless.offline),
            ] {
                if probe.enable && &probe.path == metrics_path {
                    errors.push(format!(
                        "admin.metrics_path collides with lossless.{label}.path (`{metrics_path}`)"
                    ));
                }
            }
        }

        if errors.is_empty() {
            Ok(Self {
                lossless,
                admin,
                event_reporter,
                weight_adjust,
                client,
            })
        } else {
            Err(SdkValidationError::new(errors))
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawSdkFile {
    #[serde(default)]
    lossless: Option<lossless::RawLosslessSection>,
    #[serde(default)]
    admin: Option<admin::RawAdminSection>,
    #[serde(default)]
    event_reporter: Option<reporter::RawReporterSection>,
    #[serde(default)]
    weight_adjust: Option<RawWeightAdjustSection>,
    #[serde(default)]
    client: Option<RawClientSection>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawWeightAdjustSection {
    #[serde(default)]
    enable: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawClientSection {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    ip: Option<String>,
}

#[derive(Debug, Error)]
pub enum SdkConfigError {
    #[error("failed to read lossless config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse lossless config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("failed to load layered lossless config: {0}")]
    Layered(#[from] config::ConfigError),
    #[error(transparent)]
    Invalid(SdkValidationError),
}

#[derive(Debug, Error)]
#[error("lossless config validation failed:\n{rendered}")]
pub struct SdkValidationError {
    messages: Vec<String>,
    rendered: String,
}

impl SdkValidationError {
    pub fn new(messages: Vec<String>) -> Self {
        let rendered = messages
            .iter()
            .map(|msg| format!("- {msg}"))
            .collect::<Vec<_>>()
            .join("\n");
        Self { messages, rendered }
    }

    pub fn messages(&self) -> &[String] {
        &self.messages
    }
}

pub(crate) fn parse_duration_value(
    field_label: &str,
    raw: Option<String>,
    errors: &mut Vec<String>,
) -> Option<Duration> {
    let raw_value = raw?;

    let trimmed = raw_value.trim();
    if trimmed.is_empty() {
        errors.push(format!("{field_label} must be a non-empty duration string"));
        return None;
    }

    match humantime::parse_duration(trimmed) {
        Ok(duration) => Some(duration),
        Err(_) => {
            errors.push(format!(
                "{field_label} must be a valid duration (got `{trimmed}`)"
            ));
            None
        }
    }
}

pub(crate) fn normalise_path(
    field_label: &str,
    path: Option<String>,
    default: &str,
    errors: &mut Vec<String>,
) -> String {
    let resolved = path
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| default.to_string());

    if !resolved.starts_with('/') {
        errors.push(format!("{field_label} must start with `/` (got `{resolved}`)"));
    }
    resolved
}
