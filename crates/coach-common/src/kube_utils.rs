//! Cluster connection resolution and shared kube-rs helpers
//!
//! The connection is resolved exactly once into a [`ClusterConnection`] value
//! and handed to whatever needs a client. Nothing here touches process-wide
//! client configuration.

use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use tracing::{debug, info, trace};

use crate::Error;

/// Default connection timeout for kube clients
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default read timeout for kube clients.
///
/// Following a pod log holds the response open for the life of the pod, so the
/// read timeout is left unset unless the caller asks for one.
pub const DEFAULT_READ_TIMEOUT: Option<Duration> = None;

/// Namespace used when neither the caller nor the active context names one
pub const FALLBACK_NAMESPACE: &str = "default";

/// Where the cluster credentials come from
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConfigSource {
    /// Service account token mounted into the pod
    InCluster,
    /// An explicit kubeconfig file (current context is used)
    Kubeconfig(PathBuf),
    /// kube's own inference chain (`KUBECONFIG`, `~/.kube/config`, in-cluster)
    Infer,
}

/// Inputs to [`ClusterConnection::resolve`]
#[derive(Clone, Debug)]
pub struct ConnectionOptions {
    /// Credential source
    pub source: ConfigSource,
    /// Target namespace; defaults to the active context's namespace
    pub namespace: Option<String>,
    /// HTTP proxy to route API traffic through (usually from `http_proxy`)
    pub proxy: Option<String>,
    /// Connection timeout
    pub connect_timeout: Duration,
    /// Read timeout
    pub read_timeout: Option<Duration>,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            source: ConfigSource::Infer,
            namespace: None,
            proxy: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }
}

/// A resolved cluster connection
///
/// Produced once by [`ClusterConnection::resolve`]; the namespace is immutable
/// afterward.
#[derive(Clone)]
pub struct ClusterConnection {
    config: Config,
    namespace: String,
}

impl std::fmt::Debug for ClusterConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterConnection")
            .field("cluster_url", &self.config.cluster_url)
            .field("proxy_url", &self.config.proxy_url)
            .field("namespace", &self.namespace)
            .finish()
    }
}

impl ClusterConnection {
    /// Load the kube config from `options.source` and settle the namespace
    pub async fn resolve(options: ConnectionOptions) -> Result<Self, Error> {
        let mut config = match &options.source {
            ConfigSource::InCluster => Config::incluster().map_err(|e| {
                Error::config("in-cluster", format!("failed to load in-cluster config: {}", e))
            })?,
            ConfigSource::Kubeconfig(path) => {
                let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                    Error::config(
                        "kubeconfig",
                        format!("failed to read kubeconfig {}: {}", path.display(), e),
                    )
                })?;
                Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                    .await
                    .map_err(|e| {
                        Error::config("kubeconfig", format!("failed to load kubeconfig: {}", e))
                    })?
            }
            ConfigSource::Infer => Config::infer().await.map_err(|e| {
                Error::config("infer", format!("failed to infer config: {}", e))
            })?,
        };

        config.connect_timeout = Some(options.connect_timeout);
        config.read_timeout = options.read_timeout;

        if let Some(proxy_url) = options.proxy.as_deref().filter(|p| !p.is_empty()) {
            let uri = proxy_url.parse::<http::Uri>().map_err(|e| {
                Error::config("proxy", format!("invalid proxy url {}: {}", proxy_url, e))
            })?;
            config.proxy_url = Some(uri);
            debug!(proxy = %proxy_url, "routing API traffic through proxy");
        }

        let namespace = resolve_namespace(options.namespace, &config.default_namespace);
        info!(
            cluster = %config.cluster_url,
            namespace = %namespace,
            "resolved cluster connection"
        );

        Ok(Self { config, namespace })
    }

    /// The namespace every job resource is created in
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Build a kube client for this connection
    pub fn client(&self) -> Result<Client, Error> {
        Client::try_from(self.config.clone()).map_err(|e| {
            Error::config("client", format!("failed to create client: {}", e))
        })
    }
}

/// Pick the explicit namespace, else the context's, else `default`
pub fn resolve_namespace(explicit: Option<String>, context_default: &str) -> String {
    explicit
        .filter(|ns| !ns.is_empty())
        .or_else(|| (!context_default.is_empty()).then(|| context_default.to_string()))
        .unwrap_or_else(|| FALLBACK_NAMESPACE.to_string())
}

/// Poll until a condition is met or timeout is reached
///
/// Calls `check_fn` every `poll_interval` until it returns `Ok(true)`.
/// Errors from the check are treated as "not yet" and polling continues.
pub async fn poll_until<F, Fut>(
    timeout: Duration,
    poll_interval: Duration,
    timeout_msg: impl Into<String>,
    mut check_fn: F,
) -> Result<(), Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, Error>>,
{
    let start = std::time::Instant::now();
    let timeout_msg = timeout_msg.into();

    loop {
        if start.elapsed() > timeout {
            return Err(Error::internal_with_context("poll_until", timeout_msg));
        }

        match check_fn().await {
            Ok(true) => return Ok(()),
            Ok(false) => trace!("Polling condition not yet met, retrying..."),
            Err(e) => trace!("Polling check returned error (retrying): {}", e),
        }

        tokio::time::sleep(poll_interval).await;
    }
}
