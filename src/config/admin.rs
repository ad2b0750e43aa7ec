use super::normalise_path;
use serde::Deserialize;

pub const DEFAULT_ADMIN_HOST: &str = "0.0.0.0";
pub const DEFAULT_ADMIN_PORT: u16 = 28080;

/// Listener settings for the probe server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminConfig {
    pub host: String,
    pub port: u16,
    pub metrics_path: Option<String>,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_ADMIN_HOST.to_string(),
            port: DEFAULT_ADMIN_PORT,
            metrics_path: None,
        }
    }
}

impl AdminConfig {
    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct RawAdminSection {
    #[serde(default)]
    host: Option<String>,
    #[serde(default)]
    port: Option<u16>,
    #[serde(default)]
    metrics_path: Option<String>,
}

pub(crate) fn resolve_admin(section: RawAdminSection, errors: &mut Vec<String>) -> AdminConfig {
    let host = section
        .host
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| DEFAULT_ADMIN_HOST.to_string());

    let metrics_path = section
        .metrics_path
        .filter(|value| !value.trim().is_empty())
        .map(|path| normalise_path("admin.metrics_path", Some(path), "/metrics", errors));

    AdminConfig {
        host,
        port: section.port.unwrap_or(DEFAULT_ADMIN_PORT),
        metrics_path,
    }
}
