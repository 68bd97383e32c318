//! Static-site publisher (GitHub contents API).
//!
//! Photo pages are committed straight to the client's site repository:
//! one commit for the image asset, one for the markdown page. Clients
//! without a repository, or deployments without a site token, report
//! `NotConfigured` and the caller publishes text-only.

use async_trait::async_trait;
use base64::Engine;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Value, json};
use tracing::debug;

use crate::config::Config;
use crate::error::SiteError;
use crate::retry::{RetryPolicy, with_backoff};
use crate::store::model::Client;

/// Static-site operations used by the photo pipeline.
#[async_trait]
pub trait SitePublisher: Send + Sync {
    /// Commit one file to the client's site repository.
    ///
    /// Returns the content SHA of the committed blob.
    async fn commit_file(
        &self,
        client: &Client,
        path: &str,
        bytes: &[u8],
        message: &str,
    ) -> Result<String, SiteError>;
}

/// GitHub contents-API publisher.
pub struct GitHubSitePublisher {
    http: reqwest::Client,
    api_base: String,
    token: Option<SecretString>,
    retry: RetryPolicy,
}

impl GitHubSitePublisher {
    pub fn new(config: &Config) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: config.site_api_base.clone(),
            token: config.site_token.clone(),
            retry: RetryPolicy::default(),
        }
    }
}

#[async_trait]
impl SitePublisher for GitHubSitePublisher {
    async fn commit_file(
        &self,
        client: &Client,
        path: &str,
        bytes: &[u8],
        message: &str,
    ) -> Result<String, SiteError> {
        let repo = client.site_repo.as_deref().ok_or(SiteError::NotConfigured {
            client_id: client.id,
        })?;
        let token = self.token.as_ref().ok_or(SiteError::NotConfigured {
            client_id: client.id,
        })?;

        let url = format!("{}/repos/{}/contents/{}", self.api_base, repo, path);
        let body = json!({
            "message": message,
            "content": base64::engine::general_purpose::STANDARD.encode(bytes),
        });

        let created: Value = with_backoff(&self.retry, || {
            let body = body.clone();
            let url = url.clone();
            async move {
                let response = self
                    .http
                    .put(&url)
                    .bearer_auth(token.expose_secret())
                    .header("Accept", "application/vnd.github+json")
                    .header("User-Agent", "local-engine")
                    .json(&body)
                    .send()
                    .await
                    .map_err(|e| SiteError::Request(e.to_string()))?;

                let status = response.status();
                if !status.is_success() {
                    let detail = response.text().await.unwrap_or_default();
                    return Err(SiteError::Api {
                        status: status.as_u16(),
                        detail,
                    });
                }
                response
                    .json()
                    .await
                    .map_err(|e| SiteError::Request(e.to_string()))
            }
        })
        .await?;

        let sha = created
            .pointer("/content/sha")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        debug!(repo, path, sha, "Committed site file");
        Ok(sha)
    }
}
