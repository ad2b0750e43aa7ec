use super::{normalise_path, parse_duration_value};
use serde::Deserialize;
use std::fmt;
use std::time::Duration;

pub const DEFAULT_READINESS_PATH: &str = "/readiness";
pub const DEFAULT_OFFLINE_PATH: &str = "/offline";
pub const DEFAULT_HEALTH_CHECK_PATH: &str = "/health";
pub const DEFAULT_MAX_RETRY: u32 = 10;
pub const DEFAULT_DELAY_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_WARMUP_INTERVAL: Duration = Duration::from_secs(120);
pub const DEFAULT_CURVATURE: u32 = 2;
pub const DEFAULT_OVERLOAD_THRESHOLD: u32 = 50;

/// Local lossless settings; the fallback for every sub-section a remote rule omits.
#[derive(Debug, Clone, PartialEq)]
pub struct LosslessConfig {
    pub enable: bool,
    pub delay_register: DelayRegisterConfig,
    pub health_check: HealthCheckConfig,
    pub readiness: ProbeEndpointConfig,
    pub offline: ProbeEndpointConfig,
    pub warmup: WarmupConfig,
}

impl Default for LosslessConfig {
    fn default() -> Self {
        Self {
            enable: false,
            delay_register: DelayRegisterConfig::default(),
            health_check: HealthCheckConfig::default(),
            readiness: ProbeEndpointConfig::disabled(DEFAULT_READINESS_PATH),
            offline: ProbeEndpointConfig::disabled(DEFAULT_OFFLINE_PATH),
            warmup: WarmupConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelayRegisterConfig {
    pub enable: bool,
    pub strategy: DelayStrategyKind,
    pub interval: Duration,
}

impl Default for DelayRegisterConfig {
    fn default() -> Self {
        Self {
            enable: false,
            strategy: DelayStrategyKind::ByTime,
            interval: DEFAULT_DELAY_INTERVAL,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelayStrategyKind {
    ByTime,
    ByHealthCheck,
}

impl DelayStrategyKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DelayStrategyKind::ByTime => "DELAY_BY_TIME",
            DelayStrategyKind::ByHealthCheck => "DELAY_BY_HEALTH_CHECK",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "DELAY_BY_TIME" => Some(DelayStrategyKind::ByTime),
            "DELAY_BY_HEALTH_CHECK" => Some(DelayStrategyKind::ByHealthCheck),
            _ => None,
        }
    }
}

impl fmt::Display for DelayStrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Probe target and retry budget for the health-check strategy. Never carried by remote rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthCheckConfig {
    pub interval: Duration,
    pub protocol: HealthCheckProtocol,
    pub method: http::Method,
    pub path: String,
    pub max_retry: u32,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_HEALTH_CHECK_INTERVAL,
            protocol: HealthCheckProtocol::Http,
            method: http::Method::GET,
            path: DEFAULT_HEALTH_CHECK_PATH.to_string(),
            max_retry: DEFAULT_MAX_RETRY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthCheckProtocol {
    Http,
    Https,
}

impl HealthCheckProtocol {
    pub fn scheme(self) -> &'static str {
        match self {
            HealthCheckProtocol::Http => "http",
            HealthCheckProtocol::Https => "https",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            HealthCheckProtocol::Http => "HTTP",
            HealthCheckProtocol::Https => "HTTPS",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeEndpointConfig {
    pub enable: bool,
    pub path: String,
}

impl ProbeEndpointConfig {
    fn disabled(path: &str) -> Self {
        Self {
            enable: false,
            path: path.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WarmupConfig {
    pub enable: bool,
    pub interval: Duration,
    pub curvature: u32,
    pub overload_protection: OverloadProtectionConfig,
}

impl Default for WarmupConfig {
    fn default() -> Self {
        Self {
            enable: false,
            interval: DEFAULT_WARMUP_INTERVAL,
            curvature: DEFAULT_CURVATURE,
            overload_protection: OverloadProtectionConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverloadProtectionConfig {
    pub enable: bool,
    pub threshold_percent: u32,
}

impl Default for OverloadProtectionConfig {
    fn default() -> Self {
        Self {
            enable: true,
            threshold_percent: DEFAULT_OVERLOAD_THRESHOLD,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct RawLosslessSection {
    #[serde(default)]
    enable: Option<bool>,
    #[serde(default)]
    delay_register: Option<RawDelayRegister>,
    #[serde(default)]
    health_check: Option<RawHealthCheck>,
    #[serde(default)]
    readiness: Option<RawProbeEndpoint>,
    #[serde(default)]
    offline: Option<RawProbeEndpoint>,
    #[serde(default)]
    warmup: Option<RawWarmup>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawDelayRegister {
    #[serde(default)]
    enable: Option<bool>,
    #[serde(default)]
    strategy: Option<String>,
    #[serde(default)]
    interval: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawHealthCheck {
    #[serde(default)]
    interval: Option<String>,
    #[serde(default)]
    protocol: Option<String>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    max_retry: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawProbeEndpoint {
    #[serde(default)]
    enable: Option<bool>,
    #[serde(default)]
    path: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawWarmup {
    #[serde(default)]
    enable: Option<bool>,
    #[serde(default)]
    interval: Option<String>,
    #[serde(default)]
    curvature: Option<u32>,
    #[serde(default)]
    overload_protection: Option<RawOverloadProtection>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawOverloadProtection {
    #[serde(default)]
    enable: Option<bool>,
    #[serde(default)]
    threshold: Option<u32>,
}

pub(crate) fn resolve_lossless(
    raw: RawLosslessSection,
    errors: &mut Vec<String>,
) -> LosslessConfig {
    let delay_register = resolve_delay_register(raw.delay_register.unwrap_or_default(), errors);
    let health_check = resolve_health_check(
        raw.health_check.unwrap_or_default(),
        delay_register.enable && delay_register.strategy == DelayStrategyKind::ByHealthCheck,
        errors,
    );
    let readiness = resolve_probe(
        "lossless.readiness",
        raw.readiness,
        DEFAULT_READINESS_PATH,
        errors,
    );
    let offline = resolve_probe("lossless.offline", raw.offline, DEFAULT_OFFLINE_PATH, errors);
    let warmup = resolve_warmup(raw.warmup.unwrap_or_default(), errors);

    LosslessConfig {
        enable: raw.enable.unwrap_or(false),
        delay_register,
        health_check,
        readiness,
        offline,
        warmup,
    }
}

fn resolve_delay_register(raw: RawDelayRegister, errors: &mut Vec<String>) -> DelayRegisterConfig {
    let enable = raw.enable.unwrap_or(false);
    let strategy = match raw.strategy {
        None => DelayStrategyKind::ByTime,
        Some(value) => match DelayStrategyKind::parse(&value) {
            Some(strategy) => strategy,
            None => {
                errors.push(format!(
                    "lossless.delay_register.strategy `{}` is not supported (expected DELAY_BY_TIME or DELAY_BY_HEALTH_CHECK)",
                    value.trim()
                ));
                DelayStrategyKind::ByTime
            }
        },
    };
    let interval = parse_duration_value("lossless.delay_register.interval", raw.interval, errors)
        .unwrap_or(DEFAULT_DELAY_INTERVAL);

    if enable && strategy == DelayStrategyKind::ByTime && interval.is_zero() {
        errors.push("lossless.delay_register.interval must be greater than zero".to_string());
    }

    DelayRegisterConfig {
        enable,
        strategy,
        interval,
    }
}

fn resolve_health_check(
    raw: RawHealthCheck,
    required: bool,
    errors: &mut Vec<String>,
) -> HealthCheckConfig {
    let interval = parse_duration_value("lossless.health_check.interval", raw.interval, errors)
        .unwrap_or(DEFAULT_HEALTH_CHECK_INTERVAL);

    let protocol = match raw.protocol.as_deref().map(str::trim) {
        None | Some("") => HealthCheckProtocol::Http,
        Some(value) if value.eq_ignore_ascii_case("http") => HealthCheckProtocol::Http,
        Some(value) if value.eq_ignore_ascii_case("https") => HealthCheckProtocol::Https,
        Some(other) => {
            errors.push(format!(
                "lossless.health_check.protocol `{other}` is not supported (expected HTTP or HTTPS)"
            ));
            HealthCheckProtocol::Http
        }
    };

    let method = match raw.method.as_deref().map(str::trim) {
        None | Some("") => http::Method::GET,
        Some(value) => match http::Method::from_bytes(value.to_ascii_uppercase().as_bytes()) {
            Ok(method) => method,
            Err(_) => {
                errors.push(format!(
                    "lossless.health_check.method `{value}` is not a valid HTTP method"
                ));
                http::Method::GET
            }
        },
    };

    let path = normalise_path(
        "lossless.health_check.path",
        raw.path,
        DEFAULT_HEALTH_CHECK_PATH,
        errors,
    );

    let max_retry = raw.max_retry.unwrap_or(DEFAULT_MAX_RETRY);
    if required {
        if max_retry == 0 {
            errors.push("lossless.health_check.max_retry must be at least 1".to_string());
        }
        if interval.is_zero() {
            errors.push("lossless.health_check.interval must be greater than zero".to_string());
        }
    }

    HealthCheckConfig {
        interval,
        protocol,
        method,
        path,
        max_retry,
    }
}

fn resolve_probe(
    label: &str,
    raw: Option<RawProbeEndpoint>,
    default_path: &str,
    errors: &mut Vec<String>,
) -> ProbeEndpointConfig {
    let raw = raw.unwrap_or_default();
    ProbeEndpointConfig {
        enable: raw.enable.unwrap_or(false),
        path: normalise_path(&format!("{label}.path"), raw.path, default_path, errors),
    }
}

fn resolve_warmup(raw: RawWarmup, errors: &mut Vec<String>) -> WarmupConfig {
    let enable = raw.enable.unwrap_or(false);
    let interval = parse_duration_value("lossless.warmup.interval", raw.interval, errors)
        .unwrap_or(DEFAULT_WARMUP_INTERVAL);
    if enable && interval.is_zero() {
        errors.push("lossless.warmup.interval must be greater than zero".to_string());
    }

    let curvature = match raw.curvature {
        None | Some(0) => DEFAULT_CURVATURE,
        Some(value) => value,
    };

    let overload = raw.overload_protection.unwrap_or_default();
    let threshold_percent = overload.threshold.unwrap_or(DEFAULT_OVERLOAD_THRESHOLD);
    if threshold_percent > 100 {
        errors.push(format!(
            "lossless.warmup.overload_protection.threshold must be within 0..=100 (got {threshold_percent})"
        ));
    }

    WarmupConfig {
        enable,
        interval,
        curvature,
        overload_protection: OverloadProtectionConfig {
            enable: overload.enable.unwrap_or(true),
            threshold_percent,
        },
    }
}
