use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use serde::Deserialize;
use serde_json::Value;
use tracing::trace;

use pacer_core::remote::{Document, RemoteStore, SyncError};

/// [`RemoteStore`] backed by a `pacer serve` instance.
pub struct HttpRemoteStore {
    client: Client,
    base: Url,
    api_key: Option<String>,
}

#[derive(Deserialize)]
struct DeletedResponse {
    deleted: usize,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: String,
}

impl HttpRemoteStore {
    pub fn new(base_url: &str, api_key: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(format!(
                "pacer-cli/{} (workout tracker)",
                env!("CARGO_PKG_VERSION")
            ))
            .timeout(Duration::from_secs(10))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .context("Failed to build HTTP client")?;
        let base = Url::parse(base_url)
            .with_context(|| format!("Invalid remote URL '{base_url}'"))?;
        if base.cannot_be_a_base() {
            bail!("Remote URL '{base_url}' cannot be used as a base");
        }
        Ok(Self {
            client,
            base,
            api_key: api_key.filter(|k| !k.trim().is_empty()),
        })
    }

    /// `{base}/api/{kind}/{path...}` with each segment escaped.
    fn url(&self, kind: &str, path: &str) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| anyhow!("Remote URL cannot be used as a base"))?
            .pop_if_empty()
            .extend(["api", kind])
            .extend(path.split('/'));
        Ok(url)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder, what: &str) -> Result<Response> {
        let response = self
            .authorized(request)
            .send()
            .await
            .with_context(|| format!("Failed to reach remote store ({what})"))?;
        trace!(status = response.status().as_u16(), what, "Remote response");
        Ok(response)
    }
}

/// Turn a non-2xx response into [`SyncError::Remote`].
async fn check(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorResponse>(&text)
        .map(|e| e.error)
        .unwrap_or(text);
    Err(SyncError::Remote {
        status: status.as_u16(),
        message,
    }
    .into())
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
    async fn get_document(&self, path: &str) -> Result<Option<Value>> {
        let url = self.url("docs", path)?;
        let response = self.send(self.client.get(url), path).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let value = check(response)
            .await?
            .json()
            .await
            .with_context(|| format!("Failed to parse remote document {path}"))?;
        Ok(Some(value))
    }

    async fn list_documents(&self, collection: &str) -> Result<Vec<Document>> {
        let url = self.url("collections", collection)?;
        let response = self.send(self.client.get(url), collection).await?;
        check(response)
            .await?
            .json()
            .await
            .with_context(|| format!("Failed to parse remote collection {collection}"))
    }

    async fn set_document(&self, path: &str, data: &Value) -> Result<()> {
        let url = self.url("docs", path)?;
        let response = self.send(self.client.put(url).json(data), path).await?;
        check(response).await?;
        Ok(())
    }

    async fn delete_document(&self, path: &str) -> Result<()> {
        let url = self.url("docs", path)?;
        let response = self.send(self.client.delete(url), path).await?;
        check(response).await?;
        Ok(())
    }

    async fn delete_collection(&self, collection: &str) -> Result<usize> {
        let url = self.url("collections", collection)?;
        let response = self.send(self.client.delete(url), collection).await?;
        let body: DeletedResponse = check(response)
            .await?
            .json()
            .await
            .context("Failed to parse remote delete response")?;
        Ok(body.deleted)
    }
}

/// Stand-in used when no remote is configured. Every call fails, so reads
/// fall back to local data and writes stay pending.
pub struct Disconnected;

#[async_trait]
impl RemoteStore for Disconnected {
    async fn get_document(&self, _path: &str) -> Result<Option<Value>> {
        Err(SyncError::NoUser.into())
    }

    async fn list_documents(&self, _collection: &str) -> Result<Vec<Document>> {
        Err(SyncError::NoUser.into())
    }

    async fn set_document(&self, _path: &str, _data: &Value) -> Result<()> {
        Err(SyncError::NoUser.into())
    }

    async fn delete_document(&self, _path: &str) -> Result<()> {
        Err(SyncError::NoUser.into())
    }

    async fn delete_collection(&self, _collection: &str) -> Result<usize> {
        Err(SyncError::NoUser.into())
    }
}
