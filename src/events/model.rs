use crate::config::ClientConfig;
use crate::domain::InstanceDescriptor;
use crate::policy::PolicySummary;
use serde::Serialize;
use std::fmt;

const EVENT_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const EVENT_TYPE: &str = "Lossless";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum LifecycleEventKind {
    #[serde(rename = "LosslessOnlineStart")]
    OnlineStart,
    #[serde(rename = "LosslessOnlineEnd")]
    OnlineEnd,
    #[serde(rename = "LosslessWarmupStart")]
    WarmupStart,
    #[serde(rename = "LosslessWarmupEnd")]
    WarmupEnd,
    #[serde(rename = "LosslessOfflineStart")]
    OfflineStart,
    #[serde(rename = "InstanceThreadEnd")]
    ThreadEnd,
}

impl LifecycleEventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleEventKind::OnlineStart => "LosslessOnlineStart",
            LifecycleEventKind::OnlineEnd => "LosslessOnlineEnd",
            LifecycleEventKind::WarmupStart => "LosslessWarmupStart",
            LifecycleEventKind::WarmupEnd => "LosslessWarmupEnd",
            LifecycleEventKind::OfflineStart => "LosslessOfflineStart",
            LifecycleEventKind::ThreadEnd => "InstanceThreadEnd",
        }
    }
}

impl fmt::Display for LifecycleEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One lifecycle transition as reported to the event collector. Client identity is left
/// empty at construction and stamped by the reporter right before a batch is sent.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleEvent {
    pub event_type: &'static str,
    pub event_name: LifecycleEventKind,
    pub event_time: String,
    pub client_id: String,
    pub client_ip: String,
    pub namespace: String,
    pub service: String,
    pub host: String,
    pub port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lossless_info: Option<PolicySummary>,
}

impl LifecycleEvent {
    pub fn new(
        kind: LifecycleEventKind,
        instance: &InstanceDescriptor,
        lossless_info: Option<PolicySummary>,
    ) -> Self {
        Self {
            event_type: EVENT_TYPE,
            event_name: kind,
            event_time: chrono::Local::now().format(EVENT_TIME_FORMAT).to_string(),
            client_id: String::new(),
            client_ip: String::new(),
            namespace: instance.namespace.clone(),
            service: instance.service.clone(),
            host: instance.host.clone(),
            port: instance.port,
            lossless_info,
        }
    }

    pub fn kind(&self) -> LifecycleEventKind {
        self.event_name
    }

    pub fn stamp_client(&mut self, client: &ClientConfig) {
        self.client_id.clone_from(&client.id);
        self.client_ip.clone_from(&client.ip);
    }
}

/// Request body posted to the collector.
#[derive(Debug, Serialize)]
pub struct BatchEvents<'a> {
    #[serde(rename = "Batch")]
    pub batch: &'a [LifecycleEvent],
}
