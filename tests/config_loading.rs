use anyhow::Result;
use lossless::config::{DelayStrategyKind, HealthCheckProtocol, SdkConfig, SdkConfigError};
use std::io::Write;
use std::time::Duration;

const FULL: &str = r#"
lossless:
  enable: true
  delay_register:
    enable: true
    strategy: DELAY_BY_HEALTH_CHECK
    interval: 45s
  health_check:
    interval: 2s
    protocol: HTTPS
    method: HEAD
    path: /healthz
    max_retry: 4
  readiness:
    enable: true
    path: /ready
  offline:
    enable: true
    path: /drain
  warmup:
    enable: true
    interval: 3m
    curvature: 0
    overload_protection:
      enable: true
      threshold: 70
admin:
  host: 127.0.0.1
  port: 28081
  metrics_path: /metrics
event_reporter:
  queue_size: 64
  report_path: /lossless/events
  discovery:
    service: polaris.pushgateway
  retry_backoff: 500ms
weight_adjust:
  enable: false
client:
  id: client-7
  ip: 10.0.0.7
"#;

#[test]
fn full_file_resolves_every_section() -> Result<()> {
    let mut file = tempfile::NamedTempFile::new()?;
    file.write_all(FULL.as_bytes())?;

    let config = SdkConfig::from_path(file.path())?;
    let lossless = &config.lossless;
    assert!(lossless.enable);
    assert!(lossless.delay_register.enable);
    assert_eq!(lossless.delay_register.strategy, DelayStrategyKind::ByHealthCheck);
    assert_eq!(lossless.delay_register.interval, Duration::from_secs(45));
    assert_eq!(lossless.health_check.interval, Duration::from_secs(2));
    assert_eq!(lossless.health_check.protocol, HealthCheckProtocol::Https);
    assert_eq!(lossless.health_check.method, http::Method::HEAD);
    assert_eq!(lossless.health_check.path, "/healthz");
    assert_eq!(lossless.health_check.max_retry, 4);
    assert_eq!(lossless.readiness.path, "/ready");
    assert_eq!(lossless.offline.path, "/drain");
    assert_eq!(lossless.warmup.interval, Duration::from_secs(180));
    assert_eq!(lossless.warmup.curvature, 2);
    assert_eq!(lossless.warmup.overload_protection.threshold_percent, 70);

    assert_eq!(config.admin.listen_address(), "127.0.0.1:28081");
    assert_eq!(config.admin.metrics_path.as_deref(), Some("/metrics"));

    let reporter = &config.event_reporter;
    assert_eq!(reporter.queue_size, 64);
    assert_eq!(reporter.report_path, "lossless/events");
    assert_eq!(reporter.retry_backoff, Duration::from_millis(500));
    let discovery = reporter.discovery.as_ref().expect("discovery target");
    assert_eq!(discovery.namespace, "Polaris");
    assert_eq!(discovery.service, "polaris.pushgateway");

    assert!(!config.weight_adjust.enable);
    assert_eq!(config.client.id, "client-7");
    assert_eq!(config.client.ip, "10.0.0.7");
    Ok(())
}

#[test]
fn missing_file_is_an_io_error() {
    let dir = tempfile::tempdir().expect("temp dir");
    let err = SdkConfig::from_path(dir.path().join("absent.yaml")).expect_err("file is missing");
    assert!(matches!(err, SdkConfigError::Io(_)));
}

#[test]
fn multiple_documents_are_rejected() {
    let yaml = "lossless:\n  enable: true\n---\nlossless:\n  enable: false\n";
    let err = SdkConfig::from_reader(yaml.as_bytes()).expect_err("two documents");
    assert!(matches!(err, SdkConfigError::Parse(_)));
}

#[test]
fn invalid_durations_are_reported_with_their_key() {
    let yaml = r#"
lossless:
  warmup:
    interval: soon
  delay_register:
    enable: true
    interval: 0s
"#;
    let err = SdkConfig::from_reader(yaml.as_bytes()).expect_err("durations are invalid");
    let SdkConfigError::Invalid(validation) = err else {
        panic!("expected validation error, got {err}");
    };
    let messages = validation.messages();
    assert!(messages
        .iter()
        .any(|message| message.contains("lossless.warmup.interval")));
    assert!(messages
        .iter()
        .any(|message| message.contains("lossless.delay_register.interval")));
}
