//! Effective lossless policy for one service and the resolver that produces it.

mod resolver;
mod rule;

pub use resolver::RuleResolver;
pub use rule::{LosslessRule, RemoteDelayRegister, RemoteLosslessOnline, RemoteToggle, RemoteWarmup};

use crate::config::{DelayStrategyKind, HealthCheckProtocol};
use serde::Serialize;
use std::time::Duration;

/// Per-service configuration after merging the remote rule over local settings. Built fresh
/// for every registration attempt.
#[derive(Clone, Debug, PartialEq)]
pub struct LosslessPolicy {
    pub enabled: bool,
    pub delay_register: DelayRegisterPolicy,
    pub readiness: ProbePolicy,
    pub offline: ProbePolicy,
    pub warmup: WarmupPolicy,
}

impl LosslessPolicy {
    pub fn probes_enabled(&self) -> bool {
        self.readiness.enabled || self.offline.enabled
    }

    pub fn summary(&self) -> PolicySummary {
        let (strategy, delay_interval_seconds, health_check_interval_seconds) =
            match &self.delay_register.strategy {
                DelayStrategy::ByTime(interval) => {
                    (DelayStrategyKind::ByTime.as_str().to_string(), Some(interval.as_secs()), None)
                }
                DelayStrategy::ByHealthCheck(check) => (
                    DelayStrategyKind::ByHealthCheck.as_str().to_string(),
                    None,
                    Some(check.interval.as_secs()),
                ),
                DelayStrategy::Unsupported(name) => (name.clone(), None, None),
            };

        PolicySummary {
            delay_register_enabled: self.delay_register.enabled,
            strategy,
            delay_interval_seconds,
            health_check_interval_seconds,
            readiness_enabled: self.readiness.enabled,
            readiness_path: self.readiness.path.clone(),
            offline_enabled: self.offline.enabled,
            offline_path: self.offline.path.clone(),
            warmup_enabled: self.warmup.enabled,
            warmup_interval_seconds: self.warmup.interval.as_secs(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct DelayRegisterPolicy {
    pub enabled: bool,
    pub strategy: DelayStrategy,
}

impl DelayRegisterPolicy {
    pub fn disabled(strategy: DelayStrategy) -> Self {
        Self {
            enabled: false,
            strategy,
        }
    }
}

/// How the gate waits before registration. `Unsupported` keeps the rejected strategy name so
/// the gate can fail closed instead of guessing.
#[derive(Clone, Debug, PartialEq)]
pub enum DelayStrategy {
    ByTime(Duration),
    ByHealthCheck(HealthCheckPolicy),
    Unsupported(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HealthCheckPolicy {
    pub interval: Duration,
    pub path: String,
    pub protocol: HealthCheckProtocol,
    pub method: http::Method,
    pub max_retry: u32,
}

impl HealthCheckPolicy {
    pub fn target_url(&self, port: u16) -> String {
        format!(
            "{}://localhost:{}{}",
            self.protocol.scheme(),
            port,
            self.path
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProbePolicy {
    pub enabled: bool,
    pub path: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct WarmupPolicy {
    pub enabled: bool,
    pub interval: Duration,
    pub curvature: u32,
    pub overload_protection: OverloadProtection,
}

impl WarmupPolicy {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            interval: Duration::ZERO,
            curvature: crate::config::DEFAULT_CURVATURE,
            overload_protection: OverloadProtection {
                enabled: false,
                threshold_percent: 0,
            },
        }
    }

    pub fn is_active(&self) -> bool {
        self.enabled && !self.interval.is_zero()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OverloadProtection {
    pub enabled: bool,
    pub threshold_percent: u32,
}

/// Compact policy description attached to lifecycle events as `losslessInfo`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicySummary {
    pub delay_register_enabled: bool,
    pub strategy: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delay_interval_seconds: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health_check_interval_seconds: Option<u64>,
    pub readiness_enabled: bool,
    pub readiness_path: String,
    pub offline_enabled: bool,
    pub offline_path: String,
    pub warmup_enabled: bool,
    pub warmup_interval_seconds: u64,
}
