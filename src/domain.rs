#![forbid(unsafe_code)]

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Namespace + service pair that rules, caches and locks are keyed by.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ServiceKey {
    pub namespace: String,
    pub service: String,
}

impl ServiceKey {
    pub fn new(namespace: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            service: service.into(),
        }
    }
}

impl fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.service)
    }
}

/// Identity of one registered endpoint; registration state is keyed by this.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceKey {
    pub namespace: String,
    pub service: String,
    pub host: String,
    pub port: u16,
}

impl fmt::Display for InstanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}:{}",
            self.namespace, self.service, self.host, self.port
        )
    }
}

/// Registration request for a single service instance. Immutable once built.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InstanceDescriptor {
    pub namespace: String,
    pub service: String,
    pub host: String,
    pub port: u16,
    pub instance_id: Option<String>,
    pub service_token: Option<String>,
    pub timeout: Option<Duration>,
    pub retry_count: Option<u32>,
}

impl InstanceDescriptor {
    pub fn new(
        namespace: impl Into<String>,
        service: impl Into<String>,
        host: impl Into<String>,
        port: u16,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            service: service.into(),
            host: host.into(),
            port,
            instance_id: None,
            service_token: None,
            timeout: None,
            retry_count: None,
        }
    }

    pub fn with_instance_id(mut self, instance_id: impl Into<String>) -> Self {
        self.instance_id = Some(instance_id.into());
        self
    }

    pub fn with_service_token(mut self, token: impl Into<String>) -> Self {
        self.service_token = Some(token.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = Some(retry_count);
        self
    }

    pub fn key(&self) -> InstanceKey {
        InstanceKey {
            namespace: self.namespace.clone(),
            service: self.service.clone(),
            host: self.host.clone(),
            port: self.port,
        }
    }

    pub fn service_key(&self) -> ServiceKey {
        ServiceKey::new(self.namespace.clone(), self.service.clone())
    }

    pub fn to_deregister_request(&self) -> DeregisterRequest {
        DeregisterRequest {
            namespace: self.namespace.clone(),
            service: self.service.clone(),
            host: self.host.clone(),
            port: self.port,
            instance_id: self.instance_id.clone(),
            service_token: self.service_token.clone(),
            timeout: self.timeout,
            retry_count: self.retry_count,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeregisterRequest {
    pub namespace: String,
    pub service: String,
    pub host: String,
    pub port: u16,
    pub instance_id: Option<String>,
    pub service_token: Option<String>,
    pub timeout: Option<Duration>,
    pub retry_count: Option<u32>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegisterResponse {
    pub instance_id: String,
    pub existed: bool,
}

/// One instance as seen by the load balancer at a weight-refresh tick.
#[derive(Clone, Debug, PartialEq)]
pub struct InstanceRecord {
    pub id: String,
    pub host: String,
    pub port: u16,
    pub weight: u32,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ServiceInstances {
    pub service: ServiceKey,
    pub instances: Vec<InstanceRecord>,
}

/// Dynamic weight for one instance, valid for a single refresh tick only.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InstanceWeight {
    pub instance_id: String,
    pub dynamic_weight: u32,
}
