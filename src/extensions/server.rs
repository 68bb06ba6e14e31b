//! Extension file server implementation
//!
//! Owns the loopback listener and the shutdown channel for one extensions
//! root. Several servers can run side by side; nothing is process-global.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::{
    http::Method,
    middleware,
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::error::{ExtServerError, Result};
use super::normalize::{PathNormalizer, DEFAULT_MOUNT_PREFIX};
use super::routes::{security_headers, serve_extension_file};

/// Extension server configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtServerConfig {
    /// Directory whose contents are served
    pub root: PathBuf,
    /// Leading URL segment naming the served collection
    pub mount_prefix: String,
    /// Address to bind to (loopback only)
    pub bind_address: IpAddr,
    /// Port to bind to, 0 lets the OS pick one
    pub port: u16,
}

impl Default for ExtServerConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::new(),
            mount_prefix: DEFAULT_MOUNT_PREFIX.to_string(),
            bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 0,
        }
    }
}

impl ExtServerConfig {
    /// Create a configuration serving `root` on an ephemeral loopback port
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Default::default()
        }
    }

    /// Replace the mount prefix
    pub fn with_mount_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.mount_prefix = prefix.into();
        self
    }

    /// Replace the port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Check the configuration before anything is bound
    pub fn validate(&self) -> Result<()> {
        if self.root.as_os_str().is_empty() {
            return Err(ExtServerError::InvalidConfig {
                reason: "extensions root is empty".to_string(),
            });
        }

        if !self.bind_address.is_loopback() {
            return Err(ExtServerError::InvalidConfig {
                reason: format!("bind address {} is not a loopback address", self.bind_address),
            });
        }

        let prefix = self.mount_prefix.as_str();
        if prefix == "." || prefix == ".." || prefix.contains(['/', '\\', '\0']) {
            return Err(ExtServerError::InvalidConfig {
                reason: format!("mount prefix '{}' must be a single plain segment", prefix),
            });
        }

        Ok(())
    }
}

/// Shared state for the request handlers
#[derive(Clone)]
pub struct ExtServerState {
    normalizer: Arc<PathNormalizer>,
}

impl ExtServerState {
    /// Create handler state for an already canonicalized root
    pub fn new(root: PathBuf, mount_prefix: impl Into<String>) -> Self {
        Self {
            normalizer: Arc::new(PathNormalizer::new(root, mount_prefix)),
        }
    }

    pub fn normalizer(&self) -> &PathNormalizer {
        &self.normalizer
    }

    /// Canonical extensions root
    pub fn root(&self) -> &Path {
        self.normalizer.root()
    }
}

/// Build the router serving files for `state`
pub fn build_router(state: ExtServerState) -> Router {
    // The web view loads its pages from a custom scheme, so any origin may read.
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::HEAD])
        .allow_headers(Any)
        .allow_origin(Any);

    Router::new()
        .route("/", get(serve_extension_file))
        .route("/*path", get(serve_extension_file))
        .layer(middleware::from_fn(security_headers))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Sandboxed extension file server
///
/// Serves the files below one root directory over loopback HTTP:
/// - request paths are clamped to the root before touching the disk
/// - traversal attempts and unexpected I/O errors answer 500
/// - missing files answer 404
pub struct ExtensionFileServer {
    config: ExtServerConfig,
}

impl ExtensionFileServer {
    /// Create a server for `root` with the default configuration
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_config(ExtServerConfig::with_root(root))
    }

    /// Create a server with a custom configuration
    pub fn with_config(config: ExtServerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ExtServerConfig {
        &self.config
    }

    /// Bind the listener and start serving in a background task.
    ///
    /// `on_listening` runs exactly once, after the socket is bound. Only an
    /// invalid configuration, an unusable root or a bind failure is reported
    /// here; request-time errors never stop the server.
    pub async fn start<F>(&self, on_listening: F) -> Result<ServerHandle>
    where
        F: FnOnce(SocketAddr),
    {
        self.config.validate()?;

        let root = verify_root(&self.config.root).await?;
        let state = ExtServerState::new(root.clone(), self.config.mount_prefix.clone());
        let router = build_router(state);

        let addr = SocketAddr::new(self.config.bind_address, self.config.port);
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| ExtServerError::BindFailed { reason: e.to_string() })?;
        let local_addr = listener.local_addr()?;

        tracing::info!(
            addr = %local_addr,
            root = %root.display(),
            prefix = %self.config.mount_prefix,
            "Extension server listening"
        );

        on_listening(local_addr);

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    // A dropped sender counts as a shutdown request too.
                    let _ = shutdown_rx.await;
                })
                .await
                .map_err(|e| ExtServerError::Internal { reason: e.to_string() })
        });

        Ok(ServerHandle {
            local_addr,
            mount_prefix: self.config.mount_prefix.clone(),
            shutdown: Some(shutdown_tx),
            task: Some(task),
        })
    }
}

/// Canonicalize the root and make sure it is a directory
async fn verify_root(root: &Path) -> Result<PathBuf> {
    let invalid = |reason: String| ExtServerError::InvalidRoot {
        root: root.display().to_string(),
        reason,
    };

    let canonical = tokio::fs::canonicalize(root)
        .await
        .map_err(|e| invalid(e.to_string()))?;
    let metadata = tokio::fs::metadata(&canonical)
        .await
        .map_err(|e| invalid(e.to_string()))?;

    if !metadata.is_dir() {
        return Err(invalid("not a directory".to_string()));
    }

    Ok(canonical)
}

/// Handle to a running server
///
/// Dropping the handle requests shutdown without waiting for it; call
/// [`ServerHandle::stop`] to wait until the socket is released.
pub struct ServerHandle {
    local_addr: SocketAddr,
    mount_prefix: String,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<Result<()>>>,
}

impl ServerHandle {
    /// Address the listener is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// Base URL of the server, ending in `/`
    pub fn base_url(&self) -> String {
        format!("http://{}/", self.local_addr)
    }

    /// URL under which `relative` (a path inside the root) is served
    pub fn url_for(&self, relative: &str) -> String {
        let relative = relative.trim_start_matches('/');
        if self.mount_prefix.is_empty() {
            format!("{}{}", self.base_url(), relative)
        } else {
            format!("{}{}/{}", self.base_url(), self.mount_prefix, relative)
        }
    }

    /// Whether the serve task is still running
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Stop accepting connections and wait for in-flight requests to finish
    pub async fn stop(mut self) -> Result<()> {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }

        let result = match self.task.take() {
            Some(task) => task
                .await
                .map_err(|e| ExtServerError::Internal { reason: e.to_string() })?,
            None => Ok(()),
        };

        tracing::info!(addr = %self.local_addr, "Extension server stopped");
        result
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}
