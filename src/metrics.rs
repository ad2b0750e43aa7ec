use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

/// Process-wide counters for the lossless lifecycle.
#[derive(Default)]
pub struct LifecycleMetrics {
    registrations_succeeded: AtomicU64,
    registrations_failed: AtomicU64,
    gate_probe_attempts: AtomicU64,
    gate_timeouts: AtomicU64,
    deregistrations_succeeded: AtomicU64,
    deregistrations_failed: AtomicU64,
    events_enqueued: AtomicU64,
    events_dropped: AtomicU64,
    batches_delivered: AtomicU64,
    batches_failed: AtomicU64,
    weights_adjusted: AtomicU64,
    overload_skips: AtomicU64,
    probe_bind_failures: AtomicU64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LifecycleMetricsSnapshot {
    pub registrations_succeeded: u64,
    pub registrations_failed: u64,
    pub gate_probe_attempts: u64,
    pub gate_timeouts: u64,
    pub deregistrations_succeeded: u64,
    pub deregistrations_failed: u64,
    pub events_enqueued: u64,
    pub events_dropped: u64,
    pub batches_delivered: u64,
    pub batches_failed: u64,
    pub weights_adjusted: u64,
    pub overload_skips: u64,
    pub probe_bind_failures: u64,
}

struct MetricLine {
    name: &'static str,
    help: &'static str,
    kind: &'static str,
    value: u64,
}

impl LifecycleMetrics {
    pub fn global() -> &'static Self {
        static INSTANCE: OnceLock<LifecycleMetrics> = OnceLock::new();
        INSTANCE.get_or_init(Self::default)
    }

    pub fn record_registration(&self, success: bool) {
        let counter = if success {
            &self.registrations_succeeded
        } else {
            &self.registrations_failed
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_deregistration(&self, success: bool) {
        let counter = if success {
            &self.deregistrations_succeeded
        } else {
            &self.deregistrations_failed
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_gate_probe_attempt(&self) {
        self.gate_probe_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_gate_timeout(&self) {
        self.gate_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_event_enqueued(&self) {
        self.events_enqueued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_event_dropped(&self) {
        self.events_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_batch(&self, delivered: bool) {
        let counter = if delivered {
            &self.batches_delivered
        } else {
            &self.batches_failed
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_weights_adjusted(&self, count: usize) {
        self.weights_adjusted
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn inc_overload_skip(&self) {
        self.overload_skips.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_probe_bind_failure(&self) {
        self.probe_bind_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> LifecycleMetricsSnapshot {
        LifecycleMetricsSnapshot {
            registrations_succeeded: self.registrations_succeeded.load(Ordering::Relaxed),
            registrations_failed: self.registrations_failed.load(Ordering::Relaxed),
            gate_probe_attempts: self.gate_probe_attempts.load(Ordering::Relaxed),
            gate_timeouts: self.gate_timeouts.load(Ordering::Relaxed),
            deregistrations_succeeded: self.deregistrations_succeeded.load(Ordering::Relaxed),
            deregistrations_failed: self.deregistrations_failed.load(Ordering::Relaxed),
            events_enqueued: self.events_enqueued.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
            batches_delivered: self.batches_delivered.load(Ordering::Relaxed),
            batches_failed: self.batches_failed.load(Ordering::Relaxed),
            weights_adjusted: self.weights_adjusted.load(Ordering::Relaxed),
            overload_skips: self.overload_skips.load(Ordering::Relaxed),
            probe_bind_failures: self.probe_bind_failures.load(Ordering::Relaxed),
        }
    }
}

impl LifecycleMetricsSnapshot {
    /// Renders the snapshot in the Prometheus text exposition format.
    pub fn render_prometheus(&self) -> String {
        let lines = [
            MetricLine {
                name: "lossless_registrations_total",
                help: "Successful lossless registrations",
                kind: "counter",
                value: self.registrations_succeeded,
            },
            MetricLine {
                name: "lossless_registration_failures_total",
                help: "Registrations aborted by the gate or the registrar",
                kind: "counter",
                value: self.registrations_failed,
            },
            MetricLine {
                name: "lossless_gate_probe_attempts_total",
                help: "Health-check probes issued by the delay-register gate",
                kind: "counter",
                value: self.gate_probe_attempts,
            },
            MetricLine {
                name: "lossless_gate_timeouts_total",
                help: "Gates that exhausted their health-check retry budget",
                kind: "counter",
                value: self.gate_timeouts,
            },
            MetricLine {
                name: "lossless_deregistrations_total",
                help: "Successful deregistrations",
                kind: "counter",
                value: self.deregistrations_succeeded,
            },
            MetricLine {
                name: "lossless_deregistration_failures_total",
                help: "Deregistration calls rejected by the registrar",
                kind: "counter",
                value: self.deregistrations_failed,
            },
            MetricLine {
                name: "lossless_events_enqueued_total",
                help: "Lifecycle events accepted by reporters",
                kind: "counter",
                value: self.events_enqueued,
            },
            MetricLine {
                name: "lossless_events_dropped_total",
                help: "Lifecycle events dropped because a reporter queue was full",
                kind: "counter",
                value: self.events_dropped,
            },
            MetricLine {
                name: "lossless_event_batches_delivered_total",
                help: "Event batches accepted by the collector",
                kind: "counter",
                value: self.batches_delivered,
            },
            MetricLine {
                name: "lossless_event_batches_failed_total",
                help: "Event batches dropped after exhausting delivery retries",
                kind: "counter",
                value: self.batches_failed,
            },
            MetricLine {
                name: "lossless_weights_adjusted_total",
                help: "Dynamic warm-up weights produced",
                kind: "counter",
                value: self.weights_adjusted,
            },
            MetricLine {
                name: "lossless_overload_skips_total",
                help: "Weight refresh ticks skipped by overload protection",
                kind: "counter",
                value: self.overload_skips,
            },
            MetricLine {
                name: "lossless_probe_bind_failures_total",
                help: "Probe listener start attempts that failed to bind",
                kind: "counter",
                value: self.probe_bind_failures,
            },
        ];

        let mut output = String::new();
        for line in lines {
            let _ = writeln!(output, "# HELP {} {}", line.name, line.help);
            let _ = writeln!(output, "# TYPE {} {}", line.name, line.kind);
            let _ = writeln!(output, "{} {}", line.name, line.value);
        }
        output
    }
}

/// Returns the shared collector.
pub fn metrics() -> &'static LifecycleMetrics {
    LifecycleMetrics::global()
}
