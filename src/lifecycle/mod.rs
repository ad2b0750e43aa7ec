//! Per-instance lifecycle: policy resolution, probe installation, gating, registration,
//! warm-up scheduling and deregistration.

mod handlers;
mod orchestrator;
mod state;

pub use handlers::{OfflineProbe, ReadinessProbe};
pub use orchestrator::{
    DeregisterOutcome, LifecycleContext, LifecycleOrchestrator, LifecycleOrchestratorBuilder,
};
pub use state::{RegistrationState, RegistrationStates, StateCell, TransitionError};

use crate::gate::GateError;
use crate::probe::ProbeError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("delay register gate stopped {instance}: {source}")]
    Gate {
        instance: String,
        #[source]
        source: GateError,
    },
    #[error("registration of {instance} failed: {source}")]
    Registration {
        instance: String,
        #[source]
        source: Box<crate::error::Error>,
    },
    #[error("deregistration of {instance} failed: {source}")]
    Deregistration {
        instance: String,
        #[source]
        source: Box<crate::error::Error>,
    },
    #[error("instance {instance} is not managed by this controller")]
    UnknownInstance { instance: String },
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error("probe server unavailable: {0}")]
    Probe(#[from] ProbeError),
}
