use super::parse_duration_value;
use crate::domain::ServiceKey;
use serde::Deserialize;
use std::time::Duration;

pub const DEFAULT_QUEUE_SIZE: usize = 128;
pub const DEFAULT_REPORT_PATH: &str = "lossless/events";
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventReporterConfig {
    pub queue_size: usize,
    /// Static collector address (`host:port`). Takes precedence over discovery.
    pub address: Option<String>,
    pub report_path: String,
    pub discovery: Option<DiscoveryTarget>,
    pub retry_backoff: Duration,
}

impl Default for EventReporterConfig {
    fn default() -> Self {
        Self {
            queue_size: DEFAULT_QUEUE_SIZE,
            address: None,
            report_path: DEFAULT_REPORT_PATH.to_string(),
            discovery: None,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
        }
    }
}

/// Reporting service looked up through discovery when no static address is set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryTarget {
    pub namespace: String,
    pub service: String,
}

impl DiscoveryTarget {
    pub fn service_key(&self) -> ServiceKey {
        ServiceKey::new(self.namespace.clone(), self.service.clone())
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct RawReporterSection {
    #[serde(default)]
    queue_size: Option<usize>,
    #[serde(default)]
    address: Option<String>,
    #[serde(default)]
    report_path: Option<String>,
    #[serde(default)]
    discovery: Option<RawDiscoveryTarget>,
    #[serde(default)]
    retry_backoff: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawDiscoveryTarget {
    #[serde(default)]
    namespace: Option<String>,
    service: String,
}

pub(crate) fn resolve_reporter(
    section: RawReporterSection,
    errors: &mut Vec<String>,
) -> EventReporterConfig {
    let queue_size = section.queue_size.unwrap_or(DEFAULT_QUEUE_SIZE);
    if queue_size == 0 {
        errors.push("event_reporter.queue_size must be greater than zero".to_string());
    }

    let address = section
        .address
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty());
    if let Some(address) = &address {
        if address.contains("://") {
            errors.push(format!(
                "event_reporter.address must be `host:port` without a scheme (got `{address}`)"
            ));
        }
    }

    let report_path = section
        .report_path
        .map(|value| value.trim().trim_start_matches('/').to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| DEFAULT_REPORT_PATH.to_string());

    let discovery = section.discovery.and_then(|target| {
        let service = target.service.trim().to_string();
        if service.is_empty() {
            errors.push("event_reporter.discovery.service must be non-empty".to_string());
            return None;
        }
        Some(DiscoveryTarget {
            namespace: target
                .namespace
                .filter(|value| !value.trim().is_empty())
                .unwrap_or_else(|| "Polaris".to_string()),
            service,
        })
    });

    let retry_backoff =
        parse_duration_value("event_reporter.retry_backoff", section.retry_backoff, errors)
            .unwrap_or(DEFAULT_RETRY_BACKOFF);

    EventReporterConfig {
        queue_size,
        address,
        report_path,
        discovery,
        retry_backoff,
    }
}
