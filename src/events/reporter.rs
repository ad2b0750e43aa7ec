use super::model::{BatchEvents, LifecycleEvent};
use super::{EventReportError, EventReporter};
use crate::config::{ClientConfig, EventReporterConfig};
use crate::domain::ServiceKey;
use crate::error::Result;
use crate::metrics::metrics;
use crate::provider::InstanceLocator;
use crate::retry::LinearBackoff;
use async_trait::async_trait;
use http::StatusCode;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

const FLUSH_INTERVAL: Duration = Duration::from_secs(1);
const DELIVERY_ATTEMPTS: u32 = 3;
const TRANSPORT_TIMEOUT: Duration = Duration::from_secs(3);

/// Posts a serialised batch and reports the collector's status code.
#[async_trait]
pub trait BatchTransport: Send + Sync {
    async fn post(&self, url: &str, body: Vec<u8>) -> Result<StatusCode>;
}

#[derive(Clone, Debug)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(TRANSPORT_TIMEOUT)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl BatchTransport for ReqwestTransport {
    async fn post(&self, url: &str, body: Vec<u8>) -> Result<StatusCode> {
        let response = self
            .client
            .post(url)
            .header(http::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;
        Ok(response.status())
    }
}

/// Where batches are delivered.
#[derive(Clone)]
pub enum CollectorTarget {
    Static(String),
    Discovered {
        service: ServiceKey,
        report_path: String,
        locator: Arc<dyn InstanceLocator>,
    },
}

impl CollectorTarget {
    /// Static address wins over discovery; `None` when neither is usable.
    pub fn from_config(
        config: &EventReporterConfig,
        locator: Option<Arc<dyn InstanceLocator>>,
    ) -> Option<Self> {
        if let Some(address) = &config.address {
            return Some(CollectorTarget::Static(format!(
                "http://{}/{}",
                address, config.report_path
            )));
        }
        match (&config.discovery, locator) {
            (Some(target), Some(locator)) => Some(CollectorTarget::Discovered {
                service: target.service_key(),
                report_path: config.report_path.clone(),
                locator,
            }),
            _ => None,
        }
    }

    async fn resolve(&self) -> Result<String> {
        match self {
            CollectorTarget::Static(url) => Ok(url.clone()),
            CollectorTarget::Discovered {
                service,
                report_path,
                locator,
            } => match locator.get_one_instance(service).await? {
                Some(instance) => Ok(format!(
                    "http://{}:{}/{}",
                    instance.host, instance.port, report_path
                )),
                None => Err(crate::err!("no instance of collector service {service} found")),
            },
        }
    }
}

/// Bounded, batching event sink with a single background consumer.
pub struct BatchingReporter {
    name: String,
    capacity: usize,
    sender: mpsc::Sender<LifecycleEvent>,
    shutdown: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

struct Consumer {
    name: String,
    batch_size: usize,
    client: ClientConfig,
    target: CollectorTarget,
    transport: Arc<dyn BatchTransport>,
    backoff: LinearBackoff,
}

impl BatchingReporter {
    /// Spawns the consumer task; must be called inside a Tokio runtime.
    pub fn spawn(
        name: impl Into<String>,
        config: &EventReporterConfig,
        client: ClientConfig,
        target: CollectorTarget,
        transport: Arc<dyn BatchTransport>,
    ) -> Self {
        let name = name.into();
        let capacity = config.queue_size.max(1);
        let (sender, receiver) = mpsc::channel(capacity);
        let shutdown = CancellationToken::new();

        let consumer = Consumer {
            name: name.clone(),
            batch_size: capacity,
            client,
            target,
            transport,
            backoff: LinearBackoff::new(DELIVERY_ATTEMPTS, config.retry_backoff),
        };
        let worker = tokio::spawn(consumer.run(receiver, shutdown.clone()));

        Self {
            name,
            capacity,
            sender,
            shutdown,
            worker: Mutex::new(Some(worker)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[async_trait]
impl EventReporter for BatchingReporter {
    fn name(&self) -> &str {
        &self.name
    }

    fn report_event(&self, event: LifecycleEvent) -> std::result::Result<(), EventReportError> {
        match self.sender.try_send(event) {
            Ok(()) => {
                metrics().inc_event_enqueued();
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(event)) => {
                metrics().inc_event_dropped();
                Err(EventReportError::QueueFull {
                    reporter: self.name.clone(),
                    capacity: self.capacity,
                    event: event.kind(),
                })
            }
            Err(mpsc::error::TrySendError::Closed(event)) => {
                metrics().inc_event_dropped();
                Err(EventReportError::Closed {
                    reporter: self.name.clone(),
                    event: event.kind(),
                })
            }
        }
    }

    async fn shutdown(&self) {
        self.shutdown.cancel();
        let worker = match self.worker.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(worker) = worker {
            if let Err(err) = worker.await {
                tracing::error!(reporter = %self.name, error = %err, "event consumer task failed");
            }
        }
    }
}

impl Consumer {
    async fn run(self, mut receiver: mpsc::Receiver<LifecycleEvent>, shutdown: CancellationToken) {
        let mut batch = Vec::with_capacity(self.batch_size);
        let mut ticker = interval_at(Instant::now() + FLUSH_INTERVAL, FLUSH_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                received = receiver.recv() => match received {
                    Some(event) => {
                        batch.push(event);
                        if batch.len() >= self.batch_size {
                            self.flush(&mut batch).await;
                        }
                    }
                    None => break,
                },
                _ = ticker.tick() => {
                    if !batch.is_empty() {
                        self.flush(&mut batch).await;
                    }
                }
            }
        }

        receiver.close();
        while let Ok(event) = receiver.try_recv() {
            batch.push(event);
        }
        if !batch.is_empty() {
            tracing::info!(
                reporter = %self.name,
                pending = batch.len(),
                "flushing queued events before shutdown"
            );
            self.flush(&mut batch).await;
        }
        tracing::debug!(reporter = %self.name, "event consumer stopped");
    }

    async fn flush(&self, batch: &mut Vec<LifecycleEvent>) {
        let mut events = std::mem::take(batch);
        for event in &mut events {
            event.stamp_client(&self.client);
        }

        match self.deliver(&events).await {
            Ok(attempts) => {
                metrics().record_batch(true);
                tracing::debug!(
                    reporter = %self.name,
                    events = events.len(),
                    attempts,
                    "event batch delivered"
                );
            }
            Err(err) => {
                metrics().record_batch(false);
                tracing::error!(
                    reporter = %self.name,
                    events = events.len(),
                    error = %err,
                    "event batch dropped"
                );
            }
        }
    }

    async fn deliver(&self, events: &[LifecycleEvent]) -> std::result::Result<u32, EventReportError> {
        let body = serde_json::to_vec(&BatchEvents { batch: events })
            .map_err(|err| EventReportError::Delivery {
                attempts: 0,
                reason: err.to_string(),
            })?;

        let max_attempts = self.backoff.max_attempts();
        let mut last_error = String::new();
        for attempt in 1..=max_attempts {
            match self.try_once(body.clone()).await {
                Ok(()) => return Ok(attempt),
                Err(reason) => {
                    tracing::warn!(
                        reporter = %self.name,
                        attempts = attempt,
                        reason = %reason,
                        "event batch delivery failed"
                    );
                    last_error = reason;
                }
            }
            if let Some(delay) = self.backoff.delay_after(attempt) {
                tokio::time::sleep(delay).await;
            }
        }

        Err(EventReportError::Delivery {
            attempts: max_attempts,
            reason: last_error,
        })
    }

    async fn try_once(&self, body: Vec<u8>) -> std::result::Result<(), String> {
        let url = self.target.resolve().await.map_err(|err| err.to_string())?;
        match self.transport.post(&url, body).await {
            Ok(status) if status.is_success() => Ok(()),
            Ok(status) => Err(format!("collector {url} answered {status}")),
            Err(err) => Err(format!("collector {url} unreachable: {err}")),
        }
    }
}
