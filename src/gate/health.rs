use crate::error::Result;
use async_trait::async_trait;
use http::{Method, StatusCode};
use std::time::Duration;

/// One outbound health probe against the local instance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProbeRequest {
    pub method: Method,
    pub url: String,
    pub timeout: Duration,
}

/// "Perform an HTTP request, report the status" capability used by the health-check gate.
#[async_trait]
pub trait HealthProber: Send + Sync {
    async fn probe(&self, request: &ProbeRequest) -> Result<StatusCode>;
}

#[derive(Clone, Debug, Default)]
pub struct ReqwestProber {
    client: reqwest::Client,
}

impl ReqwestProber {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HealthProber for ReqwestProber {
    async fn probe(&self, request: &ProbeRequest) -> Result<StatusCode> {
        let response = self
            .client
            .request(request.method.clone(), request.url.as_str())
            .timeout(request.timeout)
            .send()
            .await?;
        Ok(response.status())
    }
}
