//! Loopback HTTP surface for readiness/offline probes, started lazily and at most once.

mod server;

pub use server::ProbeServer;

use crate::metrics::metrics;
use async_trait::async_trait;
use http::{Method, StatusCode};
use std::net::SocketAddr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("probe path `{path}` must start with `/`")]
    InvalidPath { path: String },
    #[error("failed to bind probe listener on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("probe listener on {addr} exited abnormally: {source}")]
    Serve {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

/// Plain-text reply produced by a [`ProbeHandler`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProbeResponse {
    pub status: StatusCode,
    pub body: String,
    pub content_type: &'static str,
}

impl ProbeResponse {
    pub fn text(status: StatusCode, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
            content_type: "text/plain; charset=utf-8",
        }
    }
}

/// A route on the probe server. Handlers hold only explicit references to what they need and
/// are shared across concurrent requests.
#[async_trait]
pub trait ProbeHandler: Send + Sync {
    async fn serve(&self, method: &Method) -> ProbeResponse;
}

/// Serves the process-wide lifecycle counters in Prometheus text format.
#[derive(Clone, Copy, Debug, Default)]
pub struct MetricsProbe;

#[async_trait]
impl ProbeHandler for MetricsProbe {
    async fn serve(&self, _method: &Method) -> ProbeResponse {
        ProbeResponse {
            status: StatusCode::OK,
            body: metrics().snapshot().render_prometheus(),
            content_type: "text/plain; version=0.0.4",
        }
    }
}
