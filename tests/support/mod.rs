#![allow(dead_code)]

use async_trait::async_trait;
use http::StatusCode;
use lossless::config::SdkConfig;
use lossless::domain::{DeregisterRequest, InstanceDescriptor, RegisterResponse, ServiceKey};
use lossless::events::{
    BatchTransport, EventReportError, EventReporter, LifecycleEvent, LifecycleEventKind,
};
use lossless::gate::{HealthProber, ProbeRequest};
use lossless::provider::{Registrar, RuleKind, RuleSource, ServiceRule};
use std::collections::VecDeque;
use std::net::TcpListener;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use tokio::time::Instant;

pub fn reserve_port() -> std::io::Result<u16> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let port = listener.local_addr()?.port();
    drop(listener);
    Ok(port)
}

pub fn instance() -> InstanceDescriptor {
    InstanceDescriptor::new("default", "echo", "127.0.0.1", 8080).with_instance_id("ins-echo-1")
}

pub fn config_from_yaml(yaml: &str) -> SdkConfig {
    SdkConfig::from_reader(yaml.as_bytes()).expect("inline lossless config should parse")
}

/// Registrar double recording every call; registration can be held until released.
#[derive(Default)]
pub struct MockRegistrar {
    registered_at: Mutex<Vec<Instant>>,
    deregistered: Mutex<Vec<DeregisterRequest>>,
    fail_register: Mutex<bool>,
    fail_deregister: Mutex<bool>,
    hold: Mutex<Option<Arc<Notify>>>,
}

impl MockRegistrar {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing_register() -> Arc<Self> {
        let registrar = Self::default();
        *registrar.fail_register.lock().expect("fail flag") = true;
        Arc::new(registrar)
    }

    pub fn set_fail_deregister(&self, fail: bool) {
        *self.fail_deregister.lock().expect("fail flag") = fail;
    }

    /// Makes the next `register` wait until the returned notify fires.
    pub fn hold_registration(&self) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        *self.hold.lock().expect("hold slot") = Some(Arc::clone(&notify));
        notify
    }

    pub fn register_calls(&self) -> Vec<Instant> {
        self.registered_at.lock().expect("register calls").clone()
    }

    pub fn deregister_calls(&self) -> Vec<DeregisterRequest> {
        self.deregistered.lock().expect("deregister calls").clone()
    }
}

#[async_trait]
impl Registrar for MockRegistrar {
    async fn register(&self, instance: &InstanceDescriptor) -> lossless::Result<RegisterResponse> {
        let hold = self.hold.lock().expect("hold slot").take();
        if let Some(notify) = hold {
            notify.notified().await;
        }
        self.registered_at
            .lock()
            .expect("register calls")
            .push(Instant::now());
        if *self.fail_register.lock().expect("fail flag") {
            return Err(lossless::err!("registry rejected {}", instance.service));
        }
        Ok(RegisterResponse {
            instance_id: instance
                .instance_id
                .clone()
                .unwrap_or_else(|| "generated".to_string()),
            existed: false,
        })
    }

    async fn deregister(&self, request: &DeregisterRequest) -> lossless::Result<()> {
        self.deregistered
            .lock()
            .expect("deregister calls")
            .push(request.clone());
        if *self.fail_deregister.lock().expect("fail flag") {
            return Err(lossless::err!("registry unavailable"));
        }
        Ok(())
    }
}

/// Rule source returning a fixed answer and counting lookups per service.
pub struct StaticRules {
    answer: Mutex<Result<Option<ServiceRule>, String>>,
    lookups: Mutex<Vec<ServiceKey>>,
}

impl StaticRules {
    pub fn returning(rule: Option<ServiceRule>) -> Arc<Self> {
        Arc::new(Self {
            answer: Mutex::new(Ok(rule)),
            lookups: Mutex::new(Vec::new()),
        })
    }

    pub fn lossless(document: serde_json::Value) -> Arc<Self> {
        Self::returning(Some(ServiceRule {
            kind: RuleKind::Lossless,
            document,
        }))
    }

    pub fn failing(message: &str) -> Arc<Self> {
        Arc::new(Self {
            answer: Mutex::new(Err(message.to_string())),
            lookups: Mutex::new(Vec::new()),
        })
    }

    pub fn lookups(&self) -> usize {
        self.lookups.lock().expect("lookups").len()
    }
}

#[async_trait]
impl RuleSource for StaticRules {
    async fn get_service_rule(
        &self,
        kind: RuleKind,
        service: &ServiceKey,
    ) -> lossless::Result<Option<ServiceRule>> {
        assert_eq!(kind, RuleKind::Lossless);
        self.lookups.lock().expect("lookups").push(service.clone());
        match &*self.answer.lock().expect("answer") {
            Ok(rule) => Ok(rule.clone()),
            Err(message) => Err(lossless::err!("{}", message)),
        }
    }
}

/// Health prober answering from a script; once the script runs out it keeps failing.
pub struct ScriptedProber {
    script: Mutex<VecDeque<StatusCode>>,
    calls: AtomicUsize,
}

impl ScriptedProber {
    pub fn new(script: Vec<StatusCode>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HealthProber for ScriptedProber {
    async fn probe(&self, _request: &ProbeRequest) -> lossless::Result<StatusCode> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .script
            .lock()
            .expect("probe script")
            .pop_front()
            .unwrap_or(StatusCode::SERVICE_UNAVAILABLE))
    }
}

/// Reporter double that keeps every event it is handed.
#[derive(Default)]
pub struct RecordingReporter {
    events: Mutex<Vec<LifecycleEvent>>,
    shutdowns: AtomicUsize,
}

impl RecordingReporter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn kinds(&self) -> Vec<LifecycleEventKind> {
        self.events
            .lock()
            .expect("recorded events")
            .iter()
            .map(LifecycleEvent::kind)
            .collect()
    }

    pub fn events(&self) -> Vec<LifecycleEvent> {
        self.events.lock().expect("recorded events").clone()
    }

    pub fn shutdowns(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventReporter for RecordingReporter {
    fn name(&self) -> &str {
        "recording"
    }

    fn report_event(&self, event: LifecycleEvent) -> Result<(), EventReportError> {
        self.events.lock().expect("recorded events").push(event);
        Ok(())
    }

    async fn shutdown(&self) {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
    }
}

/// Collector transport double recording posted batches.
#[derive(Default)]
pub struct RecordingTransport {
    batches: Mutex<Vec<serde_json::Value>>,
    attempts: AtomicUsize,
    always_fail: bool,
}

impl RecordingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            always_fail: true,
            ..Self::default()
        })
    }

    pub fn batches(&self) -> Vec<serde_json::Value> {
        self.batches.lock().expect("batches").clone()
    }

    pub fn delivered_event_names(&self) -> Vec<String> {
        self.batches()
            .iter()
            .flat_map(|batch| {
                batch["Batch"]
                    .as_array()
                    .cloned()
                    .unwrap_or_default()
                    .into_iter()
                    .map(|event| event["eventName"].as_str().unwrap_or_default().to_string())
            })
            .collect()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BatchTransport for RecordingTransport {
    async fn post(&self, _url: &str, body: Vec<u8>) -> lossless::Result<StatusCode> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.always_fail {
            return Ok(StatusCode::SERVICE_UNAVAILABLE);
        }
        let batch = serde_json::from_slice(&body)?;
        self.batches.lock().expect("batches").push(batch);
        Ok(StatusCode::OK)
    }
}
