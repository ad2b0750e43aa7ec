//! Helper macros enforcing consistent instance fields on lifecycle logs.
//!
//! Every log line emitted from the orchestrator, the gate and the probe handlers carries the
//! `namespace`, `service`, `host` and `port` of the instance it concerns, so log pipelines can
//! correlate a rollout without parsing message text.

/// Log a lifecycle event for an [`InstanceDescriptor`](crate::domain::InstanceDescriptor)
/// plus any extra fields.
#[macro_export]
macro_rules! lossless_event {
    ($level:ident, $event:expr, instance = $instance:expr $(, $field:ident = $value:expr )* $(,)?) => {
        tracing::$level!(
            event = $event,
            namespace = %$instance.namespace,
            service = %$instance.service,
            host = %$instance.host,
            port = $instance.port,
            $($field = %$value,)*
        )
    };
}
