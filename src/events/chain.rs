use super::{EventReporter, LifecycleEvent};
use std::sync::Arc;

/// Fans every event out to each configured reporter. Failures are logged and swallowed.
#[derive(Clone, Default)]
pub struct EventChain {
    reporters: Vec<Arc<dyn EventReporter>>,
}

impl EventChain {
    pub fn new(reporters: Vec<Arc<dyn EventReporter>>) -> Self {
        Self { reporters }
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn EventReporter>) -> Self {
        self.reporters.push(reporter);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.reporters.is_empty()
    }

    pub fn len(&self) -> usize {
        self.reporters.len()
    }

    pub fn report(&self, event: LifecycleEvent) {
        for reporter in &self.reporters {
            if let Err(err) = reporter.report_event(event.clone()) {
                tracing::warn!(
                    reporter = reporter.name(),
                    event = %event.kind(),
                    error = %err,
                    "lifecycle event not reported"
                );
            }
        }
    }

    /// Drains every reporter in order.
    pub async fn shutdown(&self) {
        for reporter in &self.reporters {
            reporter.shutdown().await;
        }
    }
}
