use crate::config::{SdkConfig, DEFAULT_CURVATURE};
use crate::domain::{InstanceRecord, InstanceWeight, ServiceInstances, ServiceKey};
use crate::metrics::metrics;
use crate::policy::{RuleResolver, WarmupPolicy};
use crate::provider::{RuleKind, RuleSource};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Computes warm-up weights on every load-balancer refresh tick.
///
/// The resolved warm-up policy is cached per service and only fetched when missing. Fetches
/// for one service are serialised by a per-service mutex created on first use; different
/// services never contend.
///
/// The mutex is held across the rule lookup so concurrent ticks for the same service share a
/// single fetch. A slow rule source therefore delays only callers for that service, which
/// would otherwise issue the identical request.
pub struct WarmupWeightAdjuster {
    enabled: bool,
    resolver: RuleResolver,
    rules: Arc<dyn RuleSource>,
    cache: DashMap<ServiceKey, WarmupPolicy>,
    locks: DashMap<ServiceKey, Arc<Mutex<()>>>,
}

impl WarmupWeightAdjuster {
    pub fn new(config: &SdkConfig, rules: Arc<dyn RuleSource>) -> Self {
        Self {
            enabled: config.weight_adjust.enable,
            resolver: RuleResolver::new(config.lossless.clone()),
            rules,
            cache: DashMap::new(),
            locks: DashMap::new(),
        }
    }

    /// Weights for `snapshot` at `now`. Instances without an entry keep their static weight.
    pub async fn adjust(
        &self,
        snapshot: &ServiceInstances,
        now: DateTime<Utc>,
    ) -> Vec<InstanceWeight> {
        if !self.enabled || snapshot.instances.is_empty() {
            return Vec::new();
        }

        let policy = self.warmup_policy(&snapshot.service).await;
        let weights = compute_weights(&policy, &snapshot.instances, now);
        if !weights.is_empty() {
            metrics().add_weights_adjusted(weights.len());
            tracing::debug!(
                service = %snapshot.service,
                adjusted = weights.len(),
                total = snapshot.instances.len(),
                "warm-up weights computed"
            );
        }
        weights
    }

    /// Drops the cached policy so the next tick fetches the rule again.
    pub fn invalidate(&self, service: &ServiceKey) {
        if self.cache.remove(service).is_some() {
            tracing::debug!(%service, "warm-up policy cache invalidated");
        }
    }

    pub fn cached_policy(&self, service: &ServiceKey) -> Option<WarmupPolicy> {
        self.cache.get(service).map(|entry| entry.value().clone())
    }

    async fn warmup_policy(&self, service: &ServiceKey) -> WarmupPolicy {
        if let Some(policy) = self.cached_policy(service) {
            return policy;
        }

        let lock = Arc::clone(
            self.locks
                .entry(service.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        );
        let _guard = lock.lock().await;

        if let Some(policy) = self.cached_policy(service) {
            return policy;
        }

        match self.rules.get_service_rule(RuleKind::Lossless, service).await {
            Ok(rule) => {
                let policy = self.resolver.resolve(service, rule.as_ref()).warmup;
                self.cache.insert(service.clone(), policy.clone());
                policy
            }
            Err(err) => {
                tracing::warn!(
                    %service,
                    error = %err,
                    "lossless rule fetch failed, using local warm-up policy for this tick"
                );
                self.resolver.resolve(service, None).warmup
            }
        }
    }
}

/// Pure weight computation for one tick.
///
/// `uptime = |now - created_at|`; instances at or past the warm-up interval, and instances
/// without a creation time, get no entry. When overload protection is on and the share of
/// warming instances reaches the threshold, nothing is adjusted.
pub fn compute_weights(
    policy: &WarmupPolicy,
    instances: &[InstanceRecord],
    now: DateTime<Utc>,
) -> Vec<InstanceWeight> {
    if !policy.is_active() || instances.is_empty() {
        return Vec::new();
    }

    let interval_ms = policy.interval.as_millis() as f64;
    let warming: Vec<(&InstanceRecord, f64)> = instances
        .iter()
        .filter_map(|instance| {
            let created_at = instance.created_at?;
            let uptime_ms = (now - created_at).num_milliseconds().unsigned_abs() as f64;
            (uptime_ms < interval_ms).then_some((instance, uptime_ms))
        })
        .collect();

    if warming.is_empty() {
        return Vec::new();
    }

    let protection = policy.overload_protection;
    if protection.enabled {
        let percent = warming.len() * 100 / instances.len();
        if percent >= protection.threshold_percent as usize {
            metrics().inc_overload_skip();
            tracing::info!(
                warming = warming.len(),
                total = instances.len(),
                threshold = protection.threshold_percent,
                "overload protection active, warm-up weights skipped"
            );
            return Vec::new();
        }
    }

    let curvature = match policy.curvature {
        0 => DEFAULT_CURVATURE,
        value => value,
    };
    let exponent = i32::try_from(curvature).unwrap_or(i32::MAX);

    warming
        .into_iter()
        .map(|(instance, uptime_ms)| {
            let ratio = uptime_ms / interval_ms;
            let base = f64::from(instance.weight);
            let scaled = (ratio.powi(exponent) * base).abs().ceil();
            let dynamic_weight = scaled.min(base).max(1.0) as u32;
            InstanceWeight {
                instance_id: instance.id.clone(),
                dynamic_weight,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::OverloadProtection;
    use std::time::Duration;

    fn policy(interval_secs: u64, curvature: u32, overload: Option<u32>) -> WarmupPolicy {
        WarmupPolicy {
            enabled: true,
            interval: Duration::from_secs(interval_secs),
            curvature,
            overload_protection: OverloadProtection {
                enabled: overload.is_some(),
                threshold_percent: overload.unwrap_or(0),
            },
        }
    }

    fn record(id: &str, weight: u32, created_at: Option<DateTime<Utc>>) -> InstanceRecord {
        InstanceRecord {
            id: id.to_string(),
            host: "10.0.0.1".to_string(),
            port: 8080,
            weight,
            created_at,
        }
    }

    #[test]
    fn fresh_instance_gets_the_floor_weight() {
        let now = Utc::now();
        for curvature in [1, 2, 5] {
            let weights =
                compute_weights(&policy(120, curvature, None), &[record("a", 100, Some(now))], now);
            assert_eq!(
                weights,
                vec![InstanceWeight {
                    instance_id: "a".to_string(),
                    dynamic_weight: 1
                }]
            );
        }
    }

    #[test]
    fn half_way_with_quadratic_curve_is_a_quarter() {
        let now = Utc::now();
        let created = now - chrono::Duration::seconds(60);
        let weights = compute_weights(&policy(120, 2, None), &[record("a", 100, Some(created))], now);
        assert_eq!(weights[0].dynamic_weight, 25);
    }

    #[test]
    fn warmed_up_and_undated_instances_are_excluded() {
        let now = Utc::now();
        let instances = [
            record("done", 100, Some(now - chrono::Duration::seconds(120))),
            record("undated", 100, None),
            record("warming", 100, Some(now - chrono::Duration::seconds(30))),
        ];
        let weights = compute_weights(&policy(120, 2, None), &instances, now);
        assert_eq!(weights.len(), 1);
        assert_eq!(weights[0].instance_id, "warming");
        assert_eq!(weights[0].dynamic_weight, 7, "ceil(0.0625 * 100)");
    }

    #[test]
    fn zero_base_weight_still_gets_the_floor() {
        let now = Utc::now();
        let created = now - chrono::Duration::seconds(60);
        let weights = compute_weights(&policy(120, 2, None), &[record("a", 0, Some(created))], now);
        assert_eq!(weights[0].dynamic_weight, 1);
    }

    #[test]
    fn clock_skew_uses_uptime_magnitude() {
        let now = Utc::now();
        let future = now + chrono::Duration::seconds(60);
        let weights = compute_weights(&policy(120, 2, None), &[record("a", 100, Some(future))], now);
        assert_eq!(weights[0].dynamic_weight, 25);
    }

    #[test]
    fn overload_protection_skips_the_whole_tick() {
        let now = Utc::now();
        let mut instances = Vec::new();
        for index in 0..10 {
            let age = if index < 6 { 10 } else { 600 };
            instances.push(record(
                &format!("ins-{index}"),
                100,
                Some(now - chrono::Duration::seconds(age)),
            ));
        }

        assert!(compute_weights(&policy(120, 2, Some(50)), &instances, now).is_empty());
        assert_eq!(
            compute_weights(&policy(120, 2, Some(70)), &instances, now).len(),
            6,
            "60% warming stays under a 70% threshold"
        );
    }

    #[test]
    fn disabled_or_zero_interval_policy_produces_nothing() {
        let now = Utc::now();
        let instances = [record("a", 100, Some(now))];
        assert!(compute_weights(&WarmupPolicy::disabled(), &instances, now).is_empty());
        assert!(compute_weights(&policy(0, 2, None), &instances, now).is_empty());
    }
}
