//! Kubernetes REST API client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::{debug, info};

use crate::config::ClusterConfig;
use crate::error::{LaunchError, LaunchResult};
use crate::k8s::{Deployment, DeploymentStatus};

use super::ClusterClient;

/// Client for the `apps/v1` deployments API.
#[derive(Debug, Clone)]
pub struct KubeClient {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl KubeClient {
    /// Create a client from configuration.
    ///
    /// The service account token and CA certificate are read when their
    /// files exist; out of cluster both are optional.
    pub fn new(config: &ClusterConfig) -> LaunchResult<Self> {
        let mut builder = Client::builder().timeout(Duration::from_secs(config.request_timeout_secs));

        if let Some(pem) = read_optional(&config.ca_path)? {
            builder = builder.add_root_certificate(reqwest::Certificate::from_pem(pem.as_bytes())?);
        }
        let token = read_optional(&config.token_path)?.map(|t| t.trim().to_owned());

        Ok(Self {
            client: builder.build()?,
            base_url: config.api_url.trim_end_matches('/').to_owned(),
            token,
        })
    }

    /// Create a client for a custom base URL.
    pub fn with_url(url: impl Into<String>, token: Option<String>) -> LaunchResult<Self> {
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;

        Ok(Self {
            client,
            base_url: url.into().trim_end_matches('/').to_owned(),
            token,
        })
    }

    fn deployments_url(&self, namespace: &str) -> String {
        format!(
            "{}/apis/apps/v1/namespaces/{namespace}/deployments",
            self.base_url
        )
    }

    fn authorise(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

fn read_optional(path: &std::path::Path) -> LaunchResult<Option<String>> {
    match std::fs::read_to_string(path) {
        Ok(contents) => Ok(Some(contents)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn rejection(response: reqwest::Response) -> LaunchError {
    let status = response.status().as_u16();
    let message = response
        .text()
        .await
        .unwrap_or_else(|e| format!("unreadable response body: {e}"));
    LaunchError::Cluster { status, message }
}

#[async_trait]
impl ClusterClient for KubeClient {
    async fn create_deployment(
        &self,
        namespace: &str,
        deployment: &Deployment,
    ) -> LaunchResult<()> {
        let url = self.deployments_url(namespace);
        debug!(%url, deployment = deployment.name(), "submitting deployment");

        let response = self
            .authorise(self.client.post(&url))
            .json(deployment)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(rejection(response).await);
        }

        info!(namespace, deployment = deployment.name(), "created deployment");
        Ok(())
    }

    async fn deployment_status(
        &self,
        namespace: &str,
        name: &str,
    ) -> LaunchResult<Option<DeploymentStatus>> {
        let url = format!("{}/{name}", self.deployments_url(namespace));
        let response = self.authorise(self.client.get(&url)).send().await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let deployment: Deployment = response.json().await?;
                Ok(Some(deployment.status.unwrap_or_default()))
            }
            _ => Err(rejection(response).await),
        }
    }
}
