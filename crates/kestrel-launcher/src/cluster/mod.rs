//! Cluster access for submitting deployments and observing readiness.
//!
//! [`ClusterClient`] is the submission seam; [`ReadinessWatcher`] is what a
//! launch handle waits on. [`KubeClient`] talks to the Kubernetes REST API
//! and [`MemoryCluster`] stands in for it in tests.

mod kube;

pub use kube::KubeClient;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::{LaunchError, LaunchResult};
use crate::k8s::{Deployment, DeploymentStatus};

/// Submits deployments to a cluster.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Create a deployment in the namespace.
    async fn create_deployment(&self, namespace: &str, deployment: &Deployment)
        -> LaunchResult<()>;

    /// Fetch the observed status of a deployment, `None` if it does not exist.
    async fn deployment_status(
        &self,
        namespace: &str,
        name: &str,
    ) -> LaunchResult<Option<DeploymentStatus>>;
}

/// Waits for a submitted deployment to become ready.
///
/// Implementations wait indefinitely; callers bound the wait.
#[async_trait]
pub trait ReadinessWatcher: Send + Sync {
    /// Resolve once `replicas` pods of the deployment are ready.
    async fn wait_ready(&self, namespace: &str, name: &str, replicas: u32) -> LaunchResult<()>;
}

/// Readiness watcher that polls deployment status.
#[derive(Clone)]
pub struct PollingWatcher {
    client: Arc<dyn ClusterClient>,
    poll_interval: Duration,
}

impl std::fmt::Debug for PollingWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollingWatcher")
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}

impl PollingWatcher {
    #[must_use]
    pub fn new(client: Arc<dyn ClusterClient>, poll_interval: Duration) -> Self {
        Self {
            client,
            poll_interval,
        }
    }
}

#[async_trait]
impl ReadinessWatcher for PollingWatcher {
    async fn wait_ready(&self, namespace: &str, name: &str, replicas: u32) -> LaunchResult<()> {
        loop {
            match self.client.deployment_status(namespace, name).await? {
                Some(status) if status.ready_replicas.unwrap_or(0) >= replicas => {
                    info!(namespace, deployment = name, replicas, "deployment ready");
                    return Ok(());
                }
                status => {
                    debug!(
                        namespace,
                        deployment = name,
                        ready = ?status.and_then(|s| s.ready_replicas),
                        "deployment not ready yet"
                    );
                }
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

/// In-memory cluster for testing.
#[derive(Debug, Default)]
pub struct MemoryCluster {
    deployments: std::sync::RwLock<HashMap<(String, String), Deployment>>,
    reject_with: std::sync::RwLock<Option<u16>>,
}

impl MemoryCluster {
    /// Reject every following submission with the given HTTP status.
    pub fn reject_submissions(&self, status: u16) -> LaunchResult<()> {
        *self
            .reject_with
            .write()
            .map_err(|_| LaunchError::internal("lock poisoned"))? = Some(status);
        Ok(())
    }

    /// Set the ready replica count of a deployment.
    pub fn set_ready(&self, namespace: &str, name: &str, ready: u32) -> LaunchResult<()> {
        let mut deployments = self
            .deployments
            .write()
            .map_err(|_| LaunchError::internal("lock poisoned"))?;

        let deployment = deployments
            .get_mut(&(namespace.to_owned(), name.to_owned()))
            .ok_or_else(|| LaunchError::internal(format!("deployment not found: {name}")))?;
        let status = deployment.status.get_or_insert_with(DeploymentStatus::default);
        status.ready_replicas = Some(ready);
        Ok(())
    }

    /// A submitted deployment.
    pub fn deployment(&self, namespace: &str, name: &str) -> LaunchResult<Option<Deployment>> {
        let deployments = self
            .deployments
            .read()
            .map_err(|_| LaunchError::internal("lock poisoned"))?;
        Ok(deployments
            .get(&(namespace.to_owned(), name.to_owned()))
            .cloned())
    }

    /// Number of submitted deployments.
    pub fn len(&self) -> LaunchResult<usize> {
        let deployments = self
            .deployments
            .read()
            .map_err(|_| LaunchError::internal("lock poisoned"))?;
        Ok(deployments.len())
    }

    /// Whether nothing was submitted.
    pub fn is_empty(&self) -> LaunchResult<bool> {
        Ok(self.len()? == 0)
    }
}

#[async_trait]
impl ClusterClient for MemoryCluster {
    async fn create_deployment(
        &self,
        namespace: &str,
        deployment: &Deployment,
    ) -> LaunchResult<()> {
        let rejected = *self
            .reject_with
            .read()
            .map_err(|_| LaunchError::internal("lock poisoned"))?;
        if let Some(status) = rejected {
            return Err(LaunchError::Cluster {
                status,
                message: "submission rejected".to_owned(),
            });
        }

        let mut deployments = self
            .deployments
            .write()
            .map_err(|_| LaunchError::internal("lock poisoned"))?;

        let key = (namespace.to_owned(), deployment.name().to_owned());
        if deployments.contains_key(&key) {
            return Err(LaunchError::Cluster {
                status: 409,
                message: format!("deployment {} already exists", deployment.name()),
            });
        }
        deployments.insert(key, deployment.clone());
        Ok(())
    }

    async fn deployment_status(
        &self,
        namespace: &str,
        name: &str,
    ) -> LaunchResult<Option<DeploymentStatus>> {
        Ok(self
            .deployment(namespace, name)?
            .map(|d| d.status.unwrap_or_default()))
    }
}
