//! Lifecycle telemetry: event model, batching reporter and the fan-out chain.

mod chain;
mod model;
mod reporter;

pub use chain::EventChain;
pub use model::{BatchEvents, LifecycleEvent, LifecycleEventKind};
pub use reporter::{BatchTransport, BatchingReporter, CollectorTarget, ReqwestTransport};

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EventReportError {
    #[error("event queue of reporter `{reporter}` is full ({capacity} pending), dropped {event}")]
    QueueFull {
        reporter: String,
        capacity: usize,
        event: LifecycleEventKind,
    },
    #[error("reporter `{reporter}` is shut down, dropped {event}")]
    Closed {
        reporter: String,
        event: LifecycleEventKind,
    },
    #[error("event batch delivery failed after {attempts} attempt(s): {reason}")]
    Delivery { attempts: u32, reason: String },
}

/// A sink for lifecycle events. Reporting never blocks; `shutdown` waits until everything
/// accepted so far has been handed to the collector.
#[async_trait]
pub trait EventReporter: Send + Sync {
    fn name(&self) -> &str;

    fn report_event(&self, event: LifecycleEvent) -> Result<(), EventReportError>;

    async fn shutdown(&self);
}
