//! Delay-register gate: holds registration back until a fixed delay elapses or the local
//! instance answers its health check.

mod health;

pub use health::{HealthProber, ProbeRequest, ReqwestProber};

use crate::domain::InstanceDescriptor;
use crate::lossless_event;
use crate::metrics::metrics;
use crate::policy::{DelayRegisterPolicy, DelayStrategy, HealthCheckPolicy};
use crate::retry::probe_timeout;
use crate::runtime::sleep_with_shutdown;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GateError {
    #[error("health check did not pass after {attempts} attempt(s)")]
    Timeout { attempts: u32 },
    #[error("delay-register strategy `{strategy}` is not supported")]
    UnsupportedStrategy { strategy: String },
    #[error("delay-register gate cancelled")]
    Cancelled,
}

/// How the gate let the instance through.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GatePass {
    Skipped,
    Delayed(Duration),
    Healthy { attempts: u32 },
}

#[derive(Clone)]
pub struct DelayRegisterGate {
    prober: Arc<dyn HealthProber>,
}

impl DelayRegisterGate {
    pub fn new(prober: Arc<dyn HealthProber>) -> Self {
        Self { prober }
    }

    pub async fn wait(
        &self,
        instance: &InstanceDescriptor,
        policy: &DelayRegisterPolicy,
        cancel: &CancellationToken,
    ) -> Result<GatePass, GateError> {
        if !policy.enabled {
            return Ok(GatePass::Skipped);
        }

        match &policy.strategy {
            DelayStrategy::ByTime(interval) => {
                lossless_event!(
                    info,
                    "gate_delay_start",
                    instance = instance,
                    interval = humantime::format_duration(*interval)
                );
                if sleep_with_shutdown(*interval, cancel).await {
                    return Err(GateError::Cancelled);
                }
                Ok(GatePass::Delayed(*interval))
            }
            DelayStrategy::ByHealthCheck(check) => self.poll_health(instance, check, cancel).await,
            DelayStrategy::Unsupported(strategy) => {
                lossless_event!(
                    error,
                    "gate_unsupported_strategy",
                    instance = instance,
                    strategy = strategy
                );
                Err(GateError::UnsupportedStrategy {
                    strategy: strategy.clone(),
                })
            }
        }
    }

    async fn poll_health(
        &self,
        instance: &InstanceDescriptor,
        check: &HealthCheckPolicy,
        cancel: &CancellationToken,
    ) -> Result<GatePass, GateError> {
        let request = ProbeRequest {
            method: check.method.clone(),
            url: check.target_url(instance.port),
            timeout: probe_timeout(check.interval),
        };
        let max_attempts = check.max_retry.max(1);
        let started = Instant::now();

        for attempt in 1..=max_attempts {
            metrics().inc_gate_probe_attempt();
            let outcome = tokio::select! {
                _ = cancel.cancelled() => return Err(GateError::Cancelled),
                outcome = self.prober.probe(&request) => outcome,
            };

            match outcome {
                Ok(status) if status.is_success() => {
                    lossless_event!(
                        info,
                        "gate_health_check_passed",
                        instance = instance,
                        attempts = attempt,
                        elapsed_ms = started.elapsed().as_millis()
                    );
                    return Ok(GatePass::Healthy { attempts: attempt });
                }
                Ok(status) => {
                    lossless_event!(
                        debug,
                        "gate_health_check_failed",
                        instance = instance,
                        attempts = attempt,
                        url = request.url,
                        status = status.as_u16()
                    );
                }
                Err(err) => {
                    lossless_event!(
                        debug,
                        "gate_health_check_failed",
                        instance = instance,
                        attempts = attempt,
                        url = request.url,
                        reason = err
                    );
                }
            }

            if attempt < max_attempts && sleep_with_shutdown(check.interval, cancel).await {
                return Err(GateError::Cancelled);
            }
        }

        metrics().inc_gate_timeout();
        lossless_event!(
            warn,
            "gate_health_check_exhausted",
            instance = instance,
            attempts = max_attempts,
            url = request.url
        );
        Err(GateError::Timeout {
            attempts: max_attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HealthCheckProtocol;
    use async_trait::async_trait;
    use http::StatusCode;
    use std::sync::Mutex;

    struct ScriptedProber {
        responses: Mutex<Vec<StatusCode>>,
        calls: Mutex<Vec<(Instant, ProbeRequest)>>,
    }

    impl ScriptedProber {
        fn new(responses: Vec<StatusCode>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<(Instant, ProbeRequest)> {
            self.calls.lock().expect("calls lock").clone()
        }
    }

    #[async_trait]
    impl HealthProber for ScriptedProber {
        async fn probe(&self, request: &ProbeRequest) -> crate::error::Result<StatusCode> {
            self.calls
                .lock()
                .expect("calls lock")
                .push((Instant::now(), request.clone()));
            let mut responses = self.responses.lock().expect("responses lock");
            if responses.is_empty() {
                Ok(StatusCode::SERVICE_UNAVAILABLE)
            } else {
                Ok(responses.remove(0))
            }
        }
    }

    fn instance() -> InstanceDescriptor {
        InstanceDescriptor::new("default", "echo", "127.0.0.1", 8080)
    }

    fn health_policy(interval: Duration, max_retry: u32) -> DelayRegisterPolicy {
        DelayRegisterPolicy {
            enabled: true,
            strategy: DelayStrategy::ByHealthCheck(HealthCheckPolicy {
                interval,
                path: "/health".to_string(),
                protocol: HealthCheckProtocol::Http,
                method: http::Method::GET,
                max_retry,
            }),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_gate_returns_immediately() {
        let prober = ScriptedProber::new(Vec::new());
        let gate = DelayRegisterGate::new(prober.clone());
        let policy = DelayRegisterPolicy::disabled(DelayStrategy::ByTime(Duration::from_secs(30)));

        let started = Instant::now();
        let pass = gate
            .wait(&instance(), &policy, &CancellationToken::new())
            .await
            .expect("disabled gate passes");
        assert_eq!(pass, GatePass::Skipped);
        assert_eq!(started.elapsed(), Duration::ZERO);
        assert!(prober.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn time_strategy_waits_the_full_interval() {
        let gate = DelayRegisterGate::new(ScriptedProber::new(Vec::new()));
        let policy = DelayRegisterPolicy {
            enabled: true,
            strategy: DelayStrategy::ByTime(Duration::from_secs(30)),
        };

        let started = Instant::now();
        let pass = gate
            .wait(&instance(), &policy, &CancellationToken::new())
            .await
            .expect("time gate passes");
        assert_eq!(pass, GatePass::Delayed(Duration::from_secs(30)));
        assert!(started.elapsed() >= Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn health_check_passes_on_third_attempt() {
        let prober = ScriptedProber::new(vec![
            StatusCode::SERVICE_UNAVAILABLE,
            StatusCode::INTERNAL_SERVER_ERROR,
            StatusCode::NO_CONTENT,
        ]);
        let gate = DelayRegisterGate::new(prober.clone());

        let pass = gate
            .wait(
                &instance(),
                &health_policy(Duration::from_secs(4), 10),
                &CancellationToken::new(),
            )
            .await
            .expect("health check passes");
        assert_eq!(pass, GatePass::Healthy { attempts: 3 });

        let calls = prober.calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0].1.url, "http://localhost:8080/health");
        assert_eq!(calls[0].1.timeout, Duration::from_secs(2));
        for pair in calls.windows(2) {
            let spacing = pair[1].0 - pair[0].0;
            assert!(
                spacing >= Duration::from_secs(4) && spacing < Duration::from_millis(4_050),
                "probes spaced by {spacing:?}"
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn health_check_exhaustion_is_a_timeout() {
        let prober = ScriptedProber::new(Vec::new());
        let gate = DelayRegisterGate::new(prober.clone());

        let started = Instant::now();
        let err = gate
            .wait(
                &instance(),
                &health_policy(Duration::from_secs(1), 3),
                &CancellationToken::new(),
            )
            .await
            .expect_err("health check never passes");
        assert_eq!(err, GateError::Timeout { attempts: 3 });
        assert_eq!(prober.calls().len(), 3);
        let elapsed = started.elapsed();
        assert!(
            elapsed >= Duration::from_secs(2) && elapsed < Duration::from_secs(3),
            "no wait after the final attempt, elapsed {elapsed:?}"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn unsupported_strategy_fails_closed() {
        let gate = DelayRegisterGate::new(ScriptedProber::new(Vec::new()));
        let policy = DelayRegisterPolicy {
            enabled: true,
            strategy: DelayStrategy::Unsupported("DELAY_BY_MAGIC".to_string()),
        };
        let err = gate
            .wait(&instance(), &policy, &CancellationToken::new())
            .await
            .expect_err("unsupported strategy fails");
        assert!(matches!(err, GateError::UnsupportedStrategy { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_health_polling() {
        let prober = ScriptedProber::new(Vec::new());
        let gate = DelayRegisterGate::new(prober.clone());
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(12)).await;
            trigger.cancel();
        });

        let err = gate
            .wait(&instance(), &health_policy(Duration::from_secs(5), 100), &cancel)
            .await
            .expect_err("gate is cancelled");
        assert_eq!(err, GateError::Cancelled);
        assert_eq!(prober.calls().len(), 3);
    }
}
