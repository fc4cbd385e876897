//! GCP Client
//!
//! Main client for interacting with GCP APIs, combining authentication
//! and HTTP functionality.

use super::auth::GcpCredentials;
use super::http::{ApiError, GcpHttpClient};
use anyhow::{Context, Result};
use serde_json::Value;

/// Default endpoint of the Kubernetes Engine API
pub const DEFAULT_CONTAINER_ENDPOINT: &str = "https://container.googleapis.com";

/// Main GCP client
#[derive(Clone)]
pub struct GcpClient {
    pub credentials: GcpCredentials,
    pub http: GcpHttpClient,
    /// Scheme and host of the Container API, without a trailing slash
    pub endpoint: String,
}

impl GcpClient {
    /// Create a client that talks to the public Container API
    pub async fn new() -> Result<Self> {
        let credentials = GcpCredentials::new()
            .await
            .context("Failed to initialize GCP credentials")?;

        Self::with_endpoint(credentials, DEFAULT_CONTAINER_ENDPOINT)
    }

    /// Create a client against a specific endpoint (emulators, tests,
    /// private service connect)
    pub fn with_endpoint(credentials: GcpCredentials, endpoint: &str) -> Result<Self> {
        let parsed = url::Url::parse(endpoint)
            .with_context(|| format!("Invalid API endpoint: {}", endpoint))?;
        if parsed.cannot_be_a_base() {
            anyhow::bail!("Invalid API endpoint: {}", endpoint);
        }

        let http = GcpHttpClient::new()?;

        Ok(Self {
            credentials,
            http,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }

    async fn token(&self) -> Result<String, ApiError> {
        self.credentials
            .get_token()
            .await
            .map_err(|e| ApiError::new(401, format!("{e:#}")))
    }

    /// Make a GET request to a GCP API
    pub async fn get(&self, url: &str) -> Result<Value, ApiError> {
        let token = self.token().await?;
        self.http.get(url, &token).await
    }

    /// Make a POST request to a GCP API
    pub async fn post(&self, url: &str, body: Option<&Value>) -> Result<Value, ApiError> {
        let token = self.token().await?;
        self.http.post(url, &token, body).await
    }

    /// Make a PUT request to a GCP API
    pub async fn put(&self, url: &str, body: Option<&Value>) -> Result<Value, ApiError> {
        let token = self.token().await?;
        self.http.put(url, &token, body).await
    }

    /// Make a DELETE request to a GCP API
    pub async fn delete(&self, url: &str) -> Result<Value, ApiError> {
        let token = self.token().await?;
        self.http.delete(url, &token).await
    }

    // =========================================================================
    // GKE API helpers
    // =========================================================================

    /// Build a GKE v1 URL from a resource path such as
    /// `projects/p/locations/l/clusters/c`
    pub fn container_url(&self, path: &str) -> String {
        format!("{}/v1/{}", self.endpoint, path)
    }

    /// Build a GKE operation URL
    pub fn container_operation_url(&self, project: &str, location: &str, operation: &str) -> String {
        self.container_url(&format!(
            "projects/{}/locations/{}/operations/{}",
            project, location, operation
        ))
    }
}
