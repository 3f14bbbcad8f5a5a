use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::config::backend_base_url;

#[derive(Debug, Deserialize)]
struct CreateResponse {
    download_id: String,
}

/// Control surface of the backend, as consumed by the session manager.
/// A trait so tests can substitute a failing or scripted backend.
#[async_trait]
pub trait ControlApi: Send + Sync {
    /// Ask the backend to start downloading the magnet; returns the id the
    /// backend assigned to the new download.
    async fn create_download(&self, magnet: &str) -> Result<String>;
    async fn pause(&self, id: &str) -> Result<()>;
    async fn resume(&self, id: &str) -> Result<()>;
    async fn stop(&self, id: &str) -> Result<()>;
}

/// HTTP implementation against the local backend.
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
}

impl HttpBackend {
    pub fn new(port: u16) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: backend_base_url(port),
        }
    }

    /// For tests that point at a fake backend on an ephemeral port.
    pub fn with_base_url(base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
        }
    }

    async fn post_action(&self, action: &str, id: &str) -> Result<()> {
        let url = format!("{}/{}/{}", self.base_url, action, id);
        let resp = self.client.post(&url).send().await?;
        let status = resp.status();
        debug!("backend {} {} -> {}", action, id, status.as_u16());
        if !status.is_success() {
            return Err(anyhow!("{} failed: HTTP {}", action, status.as_u16()));
        }
        Ok(())
    }
}

#[async_trait]
impl ControlApi for HttpBackend {
    async fn create_download(&self, magnet: &str) -> Result<String> {
        let url = format!("{}/download", self.base_url);
        let resp = self
            .client
            .post(&url)
            .query(&[("magnet", magnet)])
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(anyhow!("download failed: HTTP {}", status.as_u16()));
        }
        let body: CreateResponse = resp.json().await?;
        debug!("backend created download {}", body.download_id);
        Ok(body.download_id)
    }

    async fn pause(&self, id: &str) -> Result<()> {
        self.post_action("pause", id).await
    }

    async fn resume(&self, id: &str) -> Result<()> {
        self.post_action("resume", id).await
    }

    async fn stop(&self, id: &str) -> Result<()> {
        self.post_action("stop", id).await
    }
}
