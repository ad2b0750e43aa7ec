use super::handlers::{OfflineProbe, ReadinessProbe};
use super::state::{RegistrationState, RegistrationStates};
use super::LifecycleError;
use crate::config::{ClientConfig, SdkConfig};
use crate::domain::{InstanceDescriptor, InstanceKey, RegisterResponse};
use crate::error::{Context, Result};
use crate::events::{
    BatchingReporter, CollectorTarget, EventChain, LifecycleEvent, LifecycleEventKind,
    ReqwestTransport,
};
use crate::gate::{DelayRegisterGate, GatePass, HealthProber, ReqwestProber};
use crate::lossless_event;
use crate::metrics::metrics;
use crate::policy::{LosslessPolicy, PolicySummary, RuleResolver};
use crate::probe::{MetricsProbe, ProbeServer};
use crate::provider::{InstanceLocator, NoRemoteRules, Registrar, RuleKind, RuleSource};
use crate::runtime::sleep_with_shutdown;
use dashmap::DashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeregisterOutcome {
    Deregistered,
    AlreadyDeregistered,
}

/// State shared between the orchestrator and the offline probe: everything needed to
/// deregister an instance, and nothing that points back at the orchestrator.
pub struct LifecycleContext {
    registrar: Arc<dyn Registrar>,
    events: EventChain,
    states: Arc<RegistrationStates>,
    summaries: DashMap<InstanceKey, PolicySummary>,
}

impl LifecycleContext {
    pub fn states(&self) -> &Arc<RegistrationStates> {
        &self.states
    }

    fn emit(&self, kind: LifecycleEventKind, instance: &InstanceDescriptor) {
        let summary = match kind {
            LifecycleEventKind::ThreadEnd => None,
            _ => self
                .summaries
                .get(&instance.key())
                .map(|entry| entry.value().clone()),
        };
        self.events
            .report(LifecycleEvent::new(kind, instance, summary));
    }

    /// Retracts a registered instance. A second call after success is a no-op.
    pub async fn deregister(
        &self,
        instance: &InstanceDescriptor,
    ) -> std::result::Result<DeregisterOutcome, LifecycleError> {
        let key = instance.key();
        let Some(current) = self.states.get(&key) else {
            return Err(LifecycleError::UnknownInstance {
                instance: key.to_string(),
            });
        };
        if current == RegistrationState::Deregistered {
            lossless_event!(debug, "deregister_repeated", instance = instance);
            return Ok(DeregisterOutcome::AlreadyDeregistered);
        }

        self.states.transition(
            &key,
            RegistrationState::Registered,
            RegistrationState::Deregistering,
        )?;
        self.emit(LifecycleEventKind::OfflineStart, instance);

        match self
            .registrar
            .deregister(&instance.to_deregister_request())
            .await
        {
            Ok(()) => {
                self.states.transition(
                    &key,
                    RegistrationState::Deregistering,
                    RegistrationState::Deregistered,
                )?;
                metrics().record_deregistration(true);
                lossless_event!(info, "deregistered", instance = instance);
                self.emit(LifecycleEventKind::ThreadEnd, instance);
                Ok(DeregisterOutcome::Deregistered)
            }
            Err(err) => {
                self.states.transition(
                    &key,
                    RegistrationState::Deregistering,
                    RegistrationState::Registered,
                )?;
                metrics().record_deregistration(false);
                lossless_event!(warn, "deregister_failed", instance = instance, reason = err);
                Err(LifecycleError::Deregistration {
                    instance: key.to_string(),
                    source: Box::new(err),
                })
            }
        }
    }
}

/// Drives one registration flow per instance:
/// resolve policy, install probes, emit `OnlineStart`, gate, register, emit `OnlineEnd`,
/// then schedule warm-up completion.
pub struct LifecycleOrchestrator {
    context: Arc<LifecycleContext>,
    resolver: RuleResolver,
    rules: Arc<dyn RuleSource>,
    gate: DelayRegisterGate,
    probe_server: Arc<ProbeServer>,
    shutdown: CancellationToken,
    tasks: TaskTracker,
}

pub struct LifecycleOrchestratorBuilder {
    config: SdkConfig,
    registrar: Arc<dyn Registrar>,
    rules: Arc<dyn RuleSource>,
    prober: Arc<dyn HealthProber>,
    events: EventChain,
    probe_server: Option<Arc<ProbeServer>>,
}

impl LifecycleOrchestratorBuilder {
    pub fn rule_source(mut self, rules: Arc<dyn RuleSource>) -> Self {
        self.rules = rules;
        self
    }

    pub fn health_prober(mut self, prober: Arc<dyn HealthProber>) -> Self {
        self.prober = prober;
        self
    }

    pub fn event_chain(mut self, events: EventChain) -> Self {
        self.events = events;
        self
    }

    pub fn probe_server(mut self, server: Arc<ProbeServer>) -> Self {
        self.probe_server = Some(server);
        self
    }

    /// Adds the batching HTTP reporter when the configuration names a collector. Spawns the
    /// reporter's consumer, so this must run inside a Tokio runtime.
    pub fn with_collector(mut self, locator: Option<Arc<dyn InstanceLocator>>) -> Result<Self> {
        let Some(target) = CollectorTarget::from_config(&self.config.event_reporter, locator)
        else {
            tracing::info!("no event collector configured, lifecycle events are not reported");
            return Ok(self);
        };
        let reporter = BatchingReporter::spawn(
            "pushgateway",
            &self.config.event_reporter,
            self.config.client.clone(),
            target,
            Arc::new(ReqwestTransport::new().context("failed to build event collector client")?),
        );
        self.events = self.events.with_reporter(Arc::new(reporter));
        Ok(self)
    }

    pub fn build(self) -> Result<LifecycleOrchestrator> {
        let probe_server = self
            .probe_server
            .unwrap_or_else(|| Arc::new(ProbeServer::new(self.config.admin.listen_address())));
        if let Some(path) = &self.config.admin.metrics_path {
            probe_server.register_handler(path, Arc::new(MetricsProbe))?;
        }

        let context = Arc::new(LifecycleContext {
            registrar: self.registrar,
            events: self.events,
            states: Arc::new(RegistrationStates::new()),
            summaries: DashMap::new(),
        });

        Ok(LifecycleOrchestrator {
            context,
            resolver: RuleResolver::new(self.config.lossless),
            rules: self.rules,
            gate: DelayRegisterGate::new(self.prober),
            probe_server,
            shutdown: CancellationToken::new(),
            tasks: TaskTracker::new(),
        })
    }
}

impl LifecycleOrchestrator {
    pub fn builder(config: SdkConfig, registrar: Arc<dyn Registrar>) -> LifecycleOrchestratorBuilder {
        LifecycleOrchestratorBuilder {
            config,
            registrar,
            rules: Arc::new(NoRemoteRules),
            prober: Arc::new(ReqwestProber::new()),
            events: EventChain::default(),
            probe_server: None,
        }
    }

    pub fn context(&self) -> &Arc<LifecycleContext> {
        &self.context
    }

    pub fn probe_server(&self) -> &Arc<ProbeServer> {
        &self.probe_server
    }

    pub fn state(&self, instance: &InstanceDescriptor) -> Option<RegistrationState> {
        self.context.states.get(&instance.key())
    }

    pub async fn resolve_policy(&self, instance: &InstanceDescriptor) -> LosslessPolicy {
        let service = instance.service_key();
        match self
            .rules
            .get_service_rule(RuleKind::Lossless, &service)
            .await
        {
            Ok(rule) => self.resolver.resolve(&service, rule.as_ref()),
            Err(err) => {
                lossless_event!(
                    warn,
                    "rule_fetch_failed",
                    instance = instance,
                    reason = err
                );
                self.resolver.resolve(&service, None)
            }
        }
    }

    pub async fn register(
        &self,
        instance: &InstanceDescriptor,
    ) -> std::result::Result<RegisterResponse, LifecycleError> {
        let key = instance.key();
        let policy = self.resolve_policy(instance).await;
        let states = &self.context.states;
        states.begin_attempt(&key)?;

        if !policy.enabled {
            states.transition(
                &key,
                RegistrationState::Unregistered,
                RegistrationState::Registering,
            )?;
            return self.call_registrar(instance, &key, &policy).await;
        }

        self.context.summaries.insert(key.clone(), policy.summary());
        if policy.probes_enabled() {
            self.install_probes(instance, &policy)?;
            self.start_probes(instance).await;
        }

        self.context.emit(LifecycleEventKind::OnlineStart, instance);

        if policy.delay_register.enabled {
            states.transition(&key, RegistrationState::Unregistered, RegistrationState::Gating)?;
            let cancel = self.shutdown.child_token();
            match self.gate.wait(instance, &policy.delay_register, &cancel).await {
                Ok(pass) => {
                    log_gate_pass(instance, pass);
                    states.transition(
                        &key,
                        RegistrationState::Gating,
                        RegistrationState::Registering,
                    )?;
                }
                Err(source) => {
                    states.transition(
                        &key,
                        RegistrationState::Gating,
                        RegistrationState::Unregistered,
                    )?;
                    metrics().record_registration(false);
                    lossless_event!(warn, "gate_failed", instance = instance, reason = source);
                    return Err(LifecycleError::Gate {
                        instance: key.to_string(),
                        source,
                    });
                }
            }
        } else {
            states.transition(
                &key,
                RegistrationState::Unregistered,
                RegistrationState::Registering,
            )?;
        }

        self.call_registrar(instance, &key, &policy).await
    }

    pub async fn deregister(
        &self,
        instance: &InstanceDescriptor,
    ) -> std::result::Result<DeregisterOutcome, LifecycleError> {
        self.context.deregister(instance).await
    }

    /// Cancels pending gates and warm-up timers, stops the probe listener and drains every
    /// event reporter.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.tasks.close();
        self.tasks.wait().await;
        self.probe_server.shutdown().await;
        self.context.events.shutdown().await;
        tracing::info!("lossless orchestrator stopped");
    }

    async fn call_registrar(
        &self,
        instance: &InstanceDescriptor,
        key: &InstanceKey,
        policy: &LosslessPolicy,
    ) -> std::result::Result<RegisterResponse, LifecycleError> {
        let states = &self.context.states;
        match self.context.registrar.register(instance).await {
            Ok(response) => {
                if policy.enabled {
                    self.context.emit(LifecycleEventKind::OnlineEnd, instance);
                }
                states.transition(
                    key,
                    RegistrationState::Registering,
                    RegistrationState::Registered,
                )?;
                metrics().record_registration(true);
                lossless_event!(
                    info,
                    "registered",
                    instance = instance,
                    instance_id = response.instance_id
                );
                if policy.enabled && policy.warmup.is_active() {
                    self.schedule_warmup_end(instance, policy);
                }
                Ok(response)
            }
            Err(err) => {
                states.transition(
                    key,
                    RegistrationState::Registering,
                    RegistrationState::Unregistered,
                )?;
                metrics().record_registration(false);
                lossless_event!(warn, "register_failed", instance = instance, reason = err);
                Err(LifecycleError::Registration {
                    instance: key.to_string(),
                    source: Box::new(err),
                })
            }
        }
    }

    /// A listener that cannot start is reported but never holds registration back; the next
    /// registration attempt tries to bind again.
    async fn start_probes(&self, instance: &InstanceDescriptor) {
        match self.probe_server.run().await {
            Ok(addr) => {
                lossless_event!(debug, "probes_ready", instance = instance, probe_addr = addr);
            }
            Err(err) => {
                metrics().inc_probe_bind_failure();
                lossless_event!(error, "probes_unavailable", instance = instance, reason = err);
            }
        }
    }

    fn install_probes(
        &self,
        instance: &InstanceDescriptor,
        policy: &LosslessPolicy,
    ) -> std::result::Result<(), LifecycleError> {
        if policy.readiness.enabled {
            let handler = ReadinessProbe::new(Arc::clone(&self.context.states), instance.key());
            self.probe_server
                .register_handler(&policy.readiness.path, Arc::new(handler))?;
        }
        if policy.offline.enabled {
            let handler = OfflineProbe::new(Arc::clone(&self.context), instance.clone());
            self.probe_server
                .register_handler(&policy.offline.path, Arc::new(handler))?;
        }
        Ok(())
    }

    fn schedule_warmup_end(&self, instance: &InstanceDescriptor, policy: &LosslessPolicy) {
        self.context.emit(LifecycleEventKind::WarmupStart, instance);

        let context = Arc::clone(&self.context);
        let instance = instance.clone();
        let interval = policy.warmup.interval;
        let cancel = self.shutdown.child_token();
        self.tasks.spawn(async move {
            if sleep_with_shutdown(interval, &cancel).await {
                lossless_event!(debug, "warmup_timer_cancelled", instance = instance);
                return;
            }
            context.emit(LifecycleEventKind::WarmupEnd, &instance);
            lossless_event!(
                info,
                "warmup_finished",
                instance = instance,
                interval = humantime::format_duration(interval)
            );
        });
    }
}

impl Drop for LifecycleOrchestrator {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn log_gate_pass(instance: &InstanceDescriptor, pass: GatePass) {
    match pass {
        GatePass::Skipped => {}
        GatePass::Delayed(interval) => lossless_event!(
            info,
            "gate_passed",
            instance = instance,
            waited = humantime::format_duration(interval)
        ),
        GatePass::Healthy { attempts } => lossless_event!(
            info,
            "gate_passed",
            instance = instance,
            attempts = attempts
        ),
    }
}
