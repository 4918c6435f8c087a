//! Object store uploader.
//!
//! Source media is uploaded to object storage before a compute submission so
//! the GPU workers can fetch it by URL.

use crate::error::{DirigentError, Result};
use async_trait::async_trait;
use std::path::Path;
use tracing::{debug, instrument};

/// Trait for media upload collaborators.
#[async_trait]
pub trait MediaUploader: Send + Sync {
    /// Upload a local file and return the URL the compute workers fetch.
    async fn upload(&self, path: &Path) -> Result<String>;
}

/// Uploader that PUTs files under a pre-authorized URL base.
pub struct HttpMediaUploader {
    http: reqwest::Client,
    base_url: String,
}

impl HttpMediaUploader {
    pub fn new(base_url: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl MediaUploader for HttpMediaUploader {
    #[instrument(skip(self), fields(path = %path.display()))]
    async fn upload(&self, path: &Path) -> Result<String> {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| DirigentError::InvalidInput(format!("Bad file name: {:?}", path)))?;

        let bytes = tokio::fs::read(path).await?;
        let url = format!("{}/{}", self.base_url, file_name);

        let response = self.http.put(&url).body(bytes).send().await?;

        if !response.status().is_success() {
            return Err(DirigentError::Upload(format!(
                "Object store returned {} for {}",
                response.status(),
                file_name
            )));
        }

        debug!("Uploaded {} to {}", file_name, url);
        Ok(url)
    }
}
