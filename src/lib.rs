//! Lossless instance-lifecycle controller.
//!
//! Decides *when* a service instance is registered or deregistered and *what* weight it
//! reports while warming up: a delay-register gate in front of registration, readiness and
//! offline probes on a loopback HTTP surface, decayed warm-up weights for the load balancer,
//! and a batched lifecycle event pipeline.

#![allow(clippy::result_large_err)]

pub mod config;
pub mod domain;
pub mod error;
pub mod events;
pub mod gate;
pub mod lifecycle;
pub mod logging;
pub mod metrics;
pub mod policy;
pub mod probe;
pub mod provider;
pub mod retry;
pub mod runtime;
pub mod telemetry;
pub mod weight;

pub use crate::config::SdkConfig;
pub use crate::domain::{InstanceDescriptor, InstanceWeight, ServiceInstances, ServiceKey};
pub use crate::error::{Error, LosslessError, Result};
pub use crate::lifecycle::{LifecycleOrchestrator, RegistrationState};
pub use crate::policy::{LosslessPolicy, RuleResolver};
pub use crate::weight::WarmupWeightAdjuster;
