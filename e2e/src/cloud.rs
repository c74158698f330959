//! Cloud Resource Manager lookups used to find a leased project's default
//! compute service account.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, instrument};

use crate::error::{Error, Result};

pub const RESOURCE_MANAGER_URL: &str = "https://cloudresourcemanager.googleapis.com";
pub const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Default Compute Engine service account of a project:
/// `[PROJECT_NUMBER]-compute@developer.gserviceaccount.com`.
pub fn default_compute_service_account(project_number: i64) -> String {
    format!("{project_number}-compute@developer.gserviceaccount.com")
}

#[async_trait]
pub trait ProjectDirectory: Send + Sync + std::fmt::Debug {
    async fn project_number(&self, project_id: &str) -> Result<i64>;
}

#[async_trait]
pub trait TokenSource: Send + Sync + std::fmt::Debug {
    async fn access_token(&self) -> Result<String>;
}

/// A pre-minted OAuth access token, e.g. from `gcloud auth print-access-token`.
#[derive(Debug, Clone)]
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

#[async_trait]
impl TokenSource for StaticToken {
    async fn access_token(&self) -> Result<String> {
        Ok(self.0.clone())
    }
}

/// Fetches tokens for the VM's default service account from the GCE
/// metadata server.
#[derive(Debug, Clone)]
pub struct MetadataServerToken {
    client: Client,
    url: String,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

impl MetadataServerToken {
    pub fn new() -> Result<Self> {
        Self::with_url(METADATA_TOKEN_URL)
    }

    pub fn with_url(url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl TokenSource for MetadataServerToken {
    async fn access_token(&self) -> Result<String> {
        let resp = self
            .client
            .get(&self.url)
            .header("Metadata-Flavor", "Google")
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(Error::Cloud(format!(
                "metadata server returned {} for token request",
                resp.status()
            )));
        }
        let token: TokenResponse = resp.json().await?;
        Ok(token.access_token)
    }
}

/// Picks a static token when one is configured, the metadata server otherwise.
pub fn default_token_source(access_token: Option<&str>) -> Result<Box<dyn TokenSource>> {
    match access_token {
        Some(token) => Ok(Box::new(StaticToken::new(token))),
        None => Ok(Box::new(MetadataServerToken::new()?)),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Project {
    project_number: ProjectNumber,
}

/// The v1 API encodes int64 fields as JSON strings.
#[derive(Deserialize)]
#[serde(untagged)]
enum ProjectNumber {
    Text(String),
    Number(i64),
}

impl ProjectNumber {
    fn value(self) -> Result<i64> {
        match self {
            ProjectNumber::Number(n) => Ok(n),
            ProjectNumber::Text(s) => s.trim().parse().map_err(|_| Error::Parse { input: s }),
        }
    }
}

#[derive(Debug)]
pub struct ResourceManagerClient {
    client: Client,
    base_url: String,
    tokens: Box<dyn TokenSource>,
}

impl ResourceManagerClient {
    pub fn new(tokens: Box<dyn TokenSource>) -> Result<Self> {
        Self::with_base_url(RESOURCE_MANAGER_URL, tokens)
    }

    pub fn with_base_url(base_url: impl Into<String>, tokens: Box<dyn TokenSource>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| Error::Cloud(format!("failed to create cloudresourcemanager client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            tokens,
        })
    }
}

#[async_trait]
impl ProjectDirectory for ResourceManagerClient {
    #[instrument(skip(self))]
    async fn project_number(&self, project_id: &str) -> Result<i64> {
        let token = self.tokens.access_token().await?;
        let url = format!("{}/v1/projects/{}", self.base_url, project_id);

        let resp = self.client.get(&url).bearer_auth(token).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Cloud(format!(
                "failed to get project {project_id}: {status}: {body}"
            )));
        }

        let project: Project = resp.json().await?;
        let number = project.project_number.value()?;
        debug!("project {} has number {}", project_id, number);
        Ok(number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_account_format() {
        assert_eq!(
            default_compute_service_account(123_456_789),
            "123456789-compute@developer.gserviceaccount.com"
        );
    }

    #[test]
    fn test_project_number_as_string_or_number() {
        let p: Project = serde_json::from_str(r#"{"projectNumber":"42","projectId":"x"}"#).unwrap();
        assert_eq!(p.project_number.value().unwrap(), 42);

        let p: Project = serde_json::from_str(r#"{"projectNumber":7}"#).unwrap();
        assert_eq!(p.project_number.value().unwrap(), 7);

        let p: Project = serde_json::from_str(r#"{"projectNumber":"abc"}"#).unwrap();
        assert!(matches!(p.project_number.value(), Err(Error::Parse { .. })));
    }

    #[tokio::test]
    async fn test_static_token() {
        let source = default_token_source(Some("ya29.token")).unwrap();
        assert_eq!(source.access_token().await.unwrap(), "ya29.token");
    }
}
