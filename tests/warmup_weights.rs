mod support;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use lossless::domain::{InstanceRecord, ServiceInstances, ServiceKey};
use lossless::provider::{RuleKind, RuleSource, ServiceRule};
use lossless::WarmupWeightAdjuster;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use support::{config_from_yaml, StaticRules};
use tokio::sync::Notify;

const WARMUP: &str = r#"
lossless:
  enable: true
  warmup:
    enable: true
    interval: 100s
    curvature: 1
    overload_protection:
      enable: false
"#;

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).single().expect("valid timestamp")
}

fn record(id: &str, age_secs: i64) -> InstanceRecord {
    InstanceRecord {
        id: id.to_string(),
        host: "10.0.0.1".to_string(),
        port: 8080,
        weight: 100,
        created_at: Some(now() - ChronoDuration::seconds(age_secs)),
    }
}

fn snapshot(service: &str, instances: Vec<InstanceRecord>) -> ServiceInstances {
    ServiceInstances {
        service: ServiceKey::new("default", service),
        instances,
    }
}

#[tokio::test]
async fn weights_follow_local_warmup_policy() {
    let adjuster = WarmupWeightAdjuster::new(&config_from_yaml(WARMUP), StaticRules::returning(None));
    let weights = adjuster
        .adjust(
            &snapshot("echo", vec![record("young", 25), record("old", 500)]),
            now(),
        )
        .await;

    assert_eq!(weights.len(), 1);
    assert_eq!(weights[0].instance_id, "young");
    assert_eq!(weights[0].dynamic_weight, 25);
}

#[tokio::test]
async fn policy_is_fetched_once_until_invalidated() {
    let rules = StaticRules::returning(None);
    let adjuster = WarmupWeightAdjuster::new(&config_from_yaml(WARMUP), rules.clone());
    let echo = snapshot("echo", vec![record("a", 10)]);

    adjuster.adjust(&echo, now()).await;
    adjuster.adjust(&echo, now()).await;
    assert_eq!(rules.lookups(), 1);
    assert!(adjuster.cached_policy(&echo.service).is_some());

    adjuster.invalidate(&echo.service);
    assert!(adjuster.cached_policy(&echo.service).is_none());
    adjuster.adjust(&echo, now()).await;
    assert_eq!(rules.lookups(), 2);
}

#[tokio::test]
async fn failed_fetch_is_not_cached() {
    let rules = StaticRules::failing("rule server down");
    let adjuster = WarmupWeightAdjuster::new(&config_from_yaml(WARMUP), rules.clone());
    let echo = snapshot("echo", vec![record("a", 50)]);

    let weights = adjuster.adjust(&echo, now()).await;
    assert_eq!(weights[0].dynamic_weight, 50);

    adjuster.adjust(&echo, now()).await;
    assert_eq!(rules.lookups(), 2);
    assert!(adjuster.cached_policy(&echo.service).is_none());
}

#[tokio::test]
async fn remote_warmup_rule_overrides_local() {
    let rules = StaticRules::lossless(json!({
        "losslessOnline": {
            "warmup": {
                "enable": true,
                "intervalSecond": "50",
                "curvature": 2,
                "enableOverloadProtection": false
            }
        }
    }));
    let adjuster = WarmupWeightAdjuster::new(&config_from_yaml(WARMUP), rules);

    let weights = adjuster
        .adjust(&snapshot("echo", vec![record("a", 25), record("b", 60)]), now())
        .await;

    assert_eq!(weights.len(), 1);
    assert_eq!(weights[0].instance_id, "a");
    assert_eq!(weights[0].dynamic_weight, 25);
}

#[tokio::test]
async fn disabled_adjustment_returns_no_weights() {
    let yaml = format!("{WARMUP}weight_adjust:\n  enable: false\n");
    let rules = StaticRules::returning(None);
    let adjuster = WarmupWeightAdjuster::new(&config_from_yaml(&yaml), rules.clone());

    let weights = adjuster
        .adjust(&snapshot("echo", vec![record("a", 10)]), now())
        .await;
    assert!(weights.is_empty());
    assert_eq!(rules.lookups(), 0);
}

/// Holds the lookup for one service until released.
struct SlowService {
    slow: ServiceKey,
    release: Notify,
}

#[async_trait]
impl RuleSource for SlowService {
    async fn get_service_rule(
        &self,
        _kind: RuleKind,
        service: &ServiceKey,
    ) -> lossless::Result<Option<ServiceRule>> {
        if *service == self.slow {
            self.release.notified().await;
        }
        Ok(None)
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn slow_fetch_does_not_block_other_services() {
    let rules = Arc::new(SlowService {
        slow: ServiceKey::new("default", "slow"),
        release: Notify::new(),
    });
    let adjuster = Arc::new(WarmupWeightAdjuster::new(
        &config_from_yaml(WARMUP),
        rules.clone(),
    ));

    let slow_adjuster = Arc::clone(&adjuster);
    let slow = tokio::spawn(async move {
        slow_adjuster
            .adjust(&snapshot("slow", vec![record("s", 10)]), now())
            .await
    });

    let fast = tokio::time::timeout(
        Duration::from_secs(2),
        adjuster.adjust(&snapshot("fast", vec![record("f", 10)]), now()),
    )
    .await
    .expect("fast service is not blocked by the slow lookup");
    assert_eq!(fast.len(), 1);

    rules.release.notify_one();
    let slow = slow.await.expect("slow adjustment task joins");
    assert_eq!(slow.len(), 1);
}

/// Counts lookups and parks each one until released.
#[derive(Default)]
struct GatedRules {
    lookups: AtomicUsize,
    release: Notify,
}

#[async_trait]
impl RuleSource for GatedRules {
    async fn get_service_rule(
        &self,
        _kind: RuleKind,
        _service: &ServiceKey,
    ) -> lossless::Result<Option<ServiceRule>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.release.notified().await;
        Ok(None)
    }
}

#[tokio::test]
async fn concurrent_ticks_for_one_service_share_a_fetch() {
    let rules = Arc::new(GatedRules::default());
    let adjuster = WarmupWeightAdjuster::new(&config_from_yaml(WARMUP), rules.clone());
    let echo = snapshot("echo", vec![record("a", 10)]);

    let (first, second, ()) = tokio::time::timeout(
        Duration::from_secs(2),
        async {
            tokio::join!(
                adjuster.adjust(&echo, now()),
                adjuster.adjust(&echo, now()),
                async { rules.release.notify_one() },
            )
        },
    )
    .await
    .expect("waiting tick reuses the cached policy");

    assert_eq!(first, second);
    assert_eq!(rules.lookups.load(Ordering::SeqCst), 1);
}
