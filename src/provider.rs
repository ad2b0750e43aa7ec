//! Collaborators the controller drives but does not own: the registration transport, the
//! rule client and service discovery.

use crate::domain::{DeregisterRequest, InstanceDescriptor, RegisterResponse, ServiceKey};
use crate::error::Result;
use async_trait::async_trait;
use std::fmt;

/// Publishes and retracts instances with the control plane.
#[async_trait]
pub trait Registrar: Send + Sync {
    async fn register(&self, instance: &InstanceDescriptor) -> Result<RegisterResponse>;

    async fn deregister(&self, request: &DeregisterRequest) -> Result<()>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RuleKind {
    Lossless,
    Routing,
    RateLimiting,
    CircuitBreaking,
}

impl RuleKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RuleKind::Lossless => "LOSSLESS",
            RuleKind::Routing => "ROUTING",
            RuleKind::RateLimiting => "RATE_LIMITING",
            RuleKind::CircuitBreaking => "CIRCUIT_BREAKING",
        }
    }
}

impl fmt::Display for RuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rule document as returned by the rule client. `document` is the raw JSON body; it is only
/// interpreted when `kind` matches what the caller asked for.
#[derive(Clone, Debug, PartialEq)]
pub struct ServiceRule {
    pub kind: RuleKind,
    pub document: serde_json::Value,
}

#[async_trait]
pub trait RuleSource: Send + Sync {
    /// `Ok(None)` means the control plane has no rule of this kind for the service.
    async fn get_service_rule(
        &self,
        kind: RuleKind,
        service: &ServiceKey,
    ) -> Result<Option<ServiceRule>>;
}

/// Endpoint of a discovered instance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocatedInstance {
    pub host: String,
    pub port: u16,
}

#[async_trait]
pub trait InstanceLocator: Send + Sync {
    async fn get_one_instance(&self, service: &ServiceKey) -> Result<Option<LocatedInstance>>;
}

/// Rule source for deployments without a control plane; every lookup falls back to local
/// configuration.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoRemoteRules;

#[async_trait]
impl RuleSource for NoRemoteRules {
    async fn get_service_rule(
        &self,
        _kind: RuleKind,
        _service: &ServiceKey,
    ) -> Result<Option<ServiceRule>> {
        Ok(None)
    }
}
