use super::rule::{LosslessRule, RemoteDelayRegister, RemoteLosslessOnline, RemoteWarmup};
use super::{
    DelayRegisterPolicy, DelayStrategy, HealthCheckPolicy, LosslessPolicy, OverloadProtection,
    ProbePolicy, WarmupPolicy,
};
use crate::config::{DelayStrategyKind, LosslessConfig, DEFAULT_CURVATURE};
use crate::domain::ServiceKey;
use crate::provider::{RuleKind, ServiceRule};
use std::time::Duration;

/// Merges a remote lossless rule over local configuration, one sub-section at a time.
///
/// Probe paths and health-check protocol, method, path and retry budget are operational
/// settings that never travel over the wire; they always come from local configuration.
#[derive(Clone, Debug)]
pub struct RuleResolver {
    local: LosslessConfig,
}

impl RuleResolver {
    pub fn new(local: LosslessConfig) -> Self {
        Self { local }
    }

    pub fn local_config(&self) -> &LosslessConfig {
        &self.local
    }

    pub fn local_policy(&self) -> LosslessPolicy {
        if !self.local.enable {
            return LosslessPolicy {
                enabled: false,
                delay_register: DelayRegisterPolicy::disabled(self.local_strategy()),
                readiness: self.probe(&self.local.readiness.path, false),
                offline: self.probe(&self.local.offline.path, false),
                warmup: WarmupPolicy::disabled(),
            };
        }

        LosslessPolicy {
            enabled: true,
            delay_register: self.local_delay_register(),
            readiness: self.probe(&self.local.readiness.path, self.local.readiness.enable),
            offline: self.probe(&self.local.offline.path, self.local.offline.enable),
            warmup: self.local_warmup(),
        }
    }

    /// Produces the effective policy. Never fails: anything unusable in `remote` falls back
    /// to local configuration.
    pub fn resolve(&self, service: &ServiceKey, remote: Option<&ServiceRule>) -> LosslessPolicy {
        let local = self.local_policy();
        if !local.enabled {
            return local;
        }

        let Some(rule) = self.parse_remote(service, remote) else {
            return local;
        };

        let online = rule.lossless_online.unwrap_or_default();
        let RemoteLosslessOnline {
            delay_register,
            readiness,
            warmup,
        } = online;

        let delay_register = match delay_register {
            None => {
                tracing::debug!(%service, "remote delay-register absent, using local config");
                local.delay_register
            }
            Some(remote) => self.remote_delay_register(service, remote),
        };

        let readiness = match readiness {
            None => local.readiness,
            Some(toggle) => self.probe(&self.local.readiness.path, toggle.enable),
        };

        let offline = match rule.lossless_offline {
            None => local.offline,
            Some(toggle) => self.probe(&self.local.offline.path, toggle.enable),
        };

        let warmup = match warmup {
            None => local.warmup,
            Some(remote) => remote_warmup(remote),
        };

        LosslessPolicy {
            enabled: true,
            delay_register,
            readiness,
            offline,
            warmup,
        }
    }

    fn parse_remote(
        &self,
        service: &ServiceKey,
        remote: Option<&ServiceRule>,
    ) -> Option<LosslessRule> {
        let Some(remote) = remote else {
            tracing::info!(%service, "no remote lossless rule, falling back to local config");
            return None;
        };

        if remote.kind != RuleKind::Lossless {
            tracing::info!(
                %service,
                rule_kind = %remote.kind,
                "remote rule is not a lossless rule, falling back to local config"
            );
            return None;
        }

        match LosslessRule::from_document(&remote.document) {
            Ok(rule) => Some(rule),
            Err(err) => {
                tracing::info!(
                    %service,
                    error = %err,
                    "remote lossless rule is malformed, falling back to local config"
                );
                None
            }
        }
    }

    fn remote_delay_register(
        &self,
        service: &ServiceKey,
        remote: RemoteDelayRegister,
    ) -> DelayRegisterPolicy {
        let strategy_name = remote.strategy.unwrap_or_default();
        if !remote.enable {
            tracing::info!(%service, "remote rule disables delay register");
            return DelayRegisterPolicy::disabled(self.local_strategy());
        }

        match DelayStrategyKind::parse(&strategy_name) {
            Some(DelayStrategyKind::ByTime) => DelayRegisterPolicy {
                enabled: true,
                strategy: DelayStrategy::ByTime(Duration::from_secs(
                    remote.interval_second.unwrap_or(0),
                )),
            },
            Some(DelayStrategyKind::ByHealthCheck) => {
                let raw_interval = remote.health_check_interval_second.unwrap_or_default();
                match raw_interval.trim().parse::<u64>() {
                    Ok(seconds) if seconds > 0 => DelayRegisterPolicy {
                        enabled: true,
                        strategy: DelayStrategy::ByHealthCheck(
                            self.health_check(Duration::from_secs(seconds)),
                        ),
                    },
                    _ => {
                        tracing::error!(
                            %service,
                            health_check_interval = %raw_interval,
                            "remote health-check interval is not a positive integer, delay register disabled"
                        );
                        DelayRegisterPolicy::disabled(DelayStrategy::Unsupported(
                            DelayStrategyKind::ByHealthCheck.as_str().to_string(),
                        ))
                    }
                }
            }
            None => {
                tracing::error!(
                    %service,
                    strategy = %strategy_name,
                    "remote delay-register strategy is not supported, delay register disabled"
                );
                DelayRegisterPolicy::disabled(DelayStrategy::Unsupported(strategy_name))
            }
        }
    }

    fn local_delay_register(&self) -> DelayRegisterPolicy {
        DelayRegisterPolicy {
            enabled: self.local.delay_register.enable,
            strategy: self.local_strategy(),
        }
    }

    fn local_strategy(&self) -> DelayStrategy {
        match self.local.delay_register.strategy {
            DelayStrategyKind::ByTime => DelayStrategy::ByTime(self.local.delay_register.interval),
            DelayStrategyKind::ByHealthCheck => {
                DelayStrategy::ByHealthCheck(self.health_check(self.local.health_check.interval))
            }
        }
    }

    fn health_check(&self, interval: Duration) -> HealthCheckPolicy {
        let local = &self.local.health_check;
        HealthCheckPolicy {
            interval,
            path: local.path.clone(),
            protocol: local.protocol,
            method: local.method.clone(),
            max_retry: local.max_retry,
        }
    }

    fn local_warmup(&self) -> WarmupPolicy {
        let local = &self.local.warmup;
        WarmupPolicy {
            enabled: local.enable,
            interval: local.interval,
            curvature: local.curvature,
            overload_protection: OverloadProtection {
                enabled: local.overload_protection.enable,
                threshold_percent: local.overload_protection.threshold_percent,
            },
        }
    }

    fn probe(&self, path: &str, enabled: bool) -> ProbePolicy {
        ProbePolicy {
            enabled,
            path: path.to_string(),
        }
    }
}

fn remote_warmup(remote: RemoteWarmup) -> WarmupPolicy {
    if !remote.enable {
        return WarmupPolicy::disabled();
    }
    let curvature = match remote.curvature {
        None | Some(0) => DEFAULT_CURVATURE,
        Some(value) => u32::try_from(value).unwrap_or(u32::MAX),
    };
    WarmupPolicy {
        enabled: true,
        interval: Duration::from_secs(remote.interval_second.unwrap_or(0)),
        curvature,
        overload_protection: OverloadProtection {
            enabled: remote.enable_overload_protection,
            threshold_percent: remote
                .overload_protection_threshold
                .map(|value| value.min(100) as u32)
                .unwrap_or(0),
        },
    }
}
