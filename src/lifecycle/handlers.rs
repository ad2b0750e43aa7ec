use super::orchestrator::{DeregisterOutcome, LifecycleContext};
use super::state::{RegistrationState, RegistrationStates};
use crate::domain::{InstanceDescriptor, InstanceKey};
use crate::probe::{ProbeHandler, ProbeResponse};
use async_trait::async_trait;
use http::{Method, StatusCode};
use std::sync::Arc;

pub const REGISTERED_BODY: &str = "REGISTERED";
pub const UNREGISTERED_BODY: &str = "UNREGISTERED";
pub const DEREGISTER_SUCCESS_BODY: &str = "DEREGISTERED SUCCESS";
pub const DEREGISTER_FAILED_BODY: &str = "DEREGISTERED FAILED";

/// 200 once the instance is registered, 503 otherwise. Reads the state cell by value.
pub struct ReadinessProbe {
    states: Arc<RegistrationStates>,
    key: InstanceKey,
}

impl ReadinessProbe {
    pub fn new(states: Arc<RegistrationStates>, key: InstanceKey) -> Self {
        Self { states, key }
    }
}

#[async_trait]
impl ProbeHandler for ReadinessProbe {
    async fn serve(&self, method: &Method) -> ProbeResponse {
        if *method != Method::GET && *method != Method::HEAD {
            return ProbeResponse::text(StatusCode::METHOD_NOT_ALLOWED, "METHOD NOT ALLOWED");
        }
        match self.states.get(&self.key) {
            Some(RegistrationState::Registered) => {
                ProbeResponse::text(StatusCode::OK, REGISTERED_BODY)
            }
            _ => ProbeResponse::text(StatusCode::SERVICE_UNAVAILABLE, UNREGISTERED_BODY),
        }
    }
}

/// Deregisters the instance on any request. Safe to call repeatedly.
pub struct OfflineProbe {
    context: Arc<LifecycleContext>,
    instance: InstanceDescriptor,
}

impl OfflineProbe {
    pub fn new(context: Arc<LifecycleContext>, instance: InstanceDescriptor) -> Self {
        Self { context, instance }
    }
}

#[async_trait]
impl ProbeHandler for OfflineProbe {
    async fn serve(&self, _method: &Method) -> ProbeResponse {
        match self.context.deregister(&self.instance).await {
            Ok(DeregisterOutcome::Deregistered) | Ok(DeregisterOutcome::AlreadyDeregistered) => {
                ProbeResponse::text(StatusCode::OK, DEREGISTER_SUCCESS_BODY)
            }
            Err(err) => {
                crate::lossless_event!(
                    error,
                    "offline_probe_failed",
                    instance = self.instance,
                    reason = err
                );
                ProbeResponse::text(StatusCode::INTERNAL_SERVER_ERROR, DEREGISTER_FAILED_BODY)
            }
        }
    }
}
