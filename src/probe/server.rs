use super::{ProbeError, ProbeHandler, ProbeResponse};
use axum::body::Body;
use axum::http::{header::CONTENT_TYPE, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Router};
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

type RouteTable = Arc<DashMap<String, Arc<dyn ProbeHandler>>>;

/// Probe listener with a route table that can change while it is serving.
///
/// Every request goes through one fallback dispatcher that looks the path up in a concurrent
/// map, so handlers registered after [`ProbeServer::run`] are served as well.
pub struct ProbeServer {
    listen: String,
    routes: RouteTable,
    bound: OnceCell<SocketAddr>,
    shutdown: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ProbeServer {
    pub fn new(listen: impl Into<String>) -> Self {
        Self {
            listen: listen.into(),
            routes: Arc::new(DashMap::new()),
            bound: OnceCell::new(),
            shutdown: CancellationToken::new(),
            task: Mutex::new(None),
        }
    }

    /// Adds or replaces the handler for `path`. The last registration wins.
    pub fn register_handler(
        &self,
        path: &str,
        handler: Arc<dyn ProbeHandler>,
    ) -> Result<(), ProbeError> {
        if !path.starts_with('/') {
            return Err(ProbeError::InvalidPath {
                path: path.to_string(),
            });
        }

        if self.routes.insert(path.to_string(), handler).is_some() {
            tracing::warn!(path, "probe handler replaced by a later registration");
        } else {
            tracing::debug!(path, "probe handler registered");
        }
        Ok(())
    }

    pub fn has_handler(&self, path: &str) -> bool {
        self.routes.contains_key(path)
    }

    /// Starts the listener in the background. Only the first successful call binds; later
    /// calls return the same address. A failed bind leaves the server unstarted.
    pub async fn run(&self) -> Result<SocketAddr, ProbeError> {
        let addr = self.bound.get_or_try_init(|| self.start()).await?;
        Ok(*addr)
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.bound.get().copied()
    }

    pub fn is_running(&self) -> bool {
        self.bound.initialized() && !self.shutdown.is_cancelled()
    }

    /// Stops accepting connections and waits for in-flight probes to finish.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let task = match self.task.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(task) = task {
            if let Err(err) = task.await {
                tracing::warn!(error = %err, "probe listener task failed to join");
            }
        }
    }

    async fn start(&self) -> Result<SocketAddr, ProbeError> {
        let listener = tokio::net::TcpListener::bind(self.listen.as_str())
            .await
            .map_err(|source| ProbeError::Bind {
                addr: self.listen.clone(),
                source,
            })?;
        let addr = listener.local_addr().map_err(|source| ProbeError::Bind {
            addr: self.listen.clone(),
            source,
        })?;

        let router = Router::new()
            .fallback(dispatch)
            .layer(Extension(Arc::clone(&self.routes)));
        let shutdown = self.shutdown.clone();

        tracing::info!(%addr, "probe server listening");
        let task = tokio::spawn(async move {
            let result = axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    shutdown.cancelled().await;
                })
                .await;
            if let Err(source) = result {
                let err = ProbeError::Serve { addr, source };
                tracing::error!(error = %err, "probe server stopped");
            } else {
                tracing::info!(%addr, "probe server stopped");
            }
        });

        match self.task.lock() {
            Ok(mut guard) => *guard = Some(task),
            Err(poisoned) => *poisoned.into_inner() = Some(task),
        }
        Ok(addr)
    }
}

impl Drop for ProbeServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn dispatch(Extension(routes): Extension<RouteTable>, method: Method, uri: Uri) -> Response {
    let handler = routes.get(uri.path()).map(|entry| Arc::clone(entry.value()));
    let Some(handler) = handler else {
        return (StatusCode::NOT_FOUND, "NOT FOUND").into_response();
    };

    let ProbeResponse {
        status,
        body,
        content_type,
    } = handler.serve(&method).await;

    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, content_type)
        .body(Body::from(body))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}
