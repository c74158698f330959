//! Client for the Boskos leasing service.
//!
//! Boskos arbitrates a pool of named resources (GCP projects here) between
//! concurrent CI jobs. A job acquires a resource by moving it from one state
//! to another, keeps it by periodically updating it, and hands it back by
//! releasing it to a destination state.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::{debug, instrument};

use crate::error::{Error, Result};
use crate::lease::{Lease, LeaseState, UserData};

const REQUEST_TIMEOUT_SECS: u64 = 60;

/// The calls the harness makes against a leasing service.
#[async_trait]
pub trait LeaseClient: Send + Sync + std::fmt::Debug {
    /// Tries to move one resource of `resource_type` from `state` to `dest`.
    /// `Ok(None)` means nothing of that type is in `state` right now.
    async fn acquire(
        &self,
        resource_type: &str,
        state: &LeaseState,
        dest: &LeaseState,
    ) -> Result<Option<Lease>>;

    /// Re-asserts ownership of `name`, refreshing its last-update time.
    async fn update_one(
        &self,
        name: &str,
        state: &LeaseState,
        user_data: Option<&UserData>,
    ) -> Result<()>;

    /// Hands `name` back to the pool in state `dest`.
    async fn release_one(&self, name: &str, dest: &LeaseState) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct BoskosClient {
    client: Client,
    url: String,
    owner: String,
}

impl BoskosClient {
    pub fn new(owner: impl Into<String>, url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            url: url.into().trim_end_matches('/').to_string(),
            owner: owner.into(),
        })
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.url, path)
    }

    async fn check(resp: reqwest::Response) -> Result<reqwest::Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(Error::Boskos {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl LeaseClient for BoskosClient {
    #[instrument(skip(self))]
    async fn acquire(
        &self,
        resource_type: &str,
        state: &LeaseState,
        dest: &LeaseState,
    ) -> Result<Option<Lease>> {
        let resp = self
            .client
            .post(self.endpoint("acquire"))
            .query(&[
                ("type", resource_type),
                ("state", state.as_str()),
                ("dest", dest.as_str()),
                ("owner", self.owner.as_str()),
            ])
            .send()
            .await?;

        if resp.status() == StatusCode::NOT_FOUND {
            debug!("no {} resource in state {}", resource_type, state);
            return Ok(None);
        }

        let lease: Lease = Self::check(resp).await?.json().await?;
        debug!("acquired {} ({})", lease.name, lease.resource_type);
        Ok(Some(lease))
    }

    #[instrument(skip(self, user_data))]
    async fn update_one(
        &self,
        name: &str,
        state: &LeaseState,
        user_data: Option<&UserData>,
    ) -> Result<()> {
        let mut req = self.client.post(self.endpoint("update")).query(&[
            ("name", name),
            ("owner", self.owner.as_str()),
            ("state", state.as_str()),
        ]);
        if let Some(data) = user_data {
            req = req.json(data);
        }

        Self::check(req.send().await?).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn release_one(&self, name: &str, dest: &LeaseState) -> Result<()> {
        let resp = self
            .client
            .post(self.endpoint("release"))
            .query(&[
                ("name", name),
                ("dest", dest.as_str()),
                ("owner", self.owner.as_str()),
            ])
            .send()
            .await?;

        Self::check(resp).await?;
        Ok(())
    }
}
