//! Application state management

use std::sync::Arc;

use crate::config::{Config, UploadConfig};
use crate::storage::{AccountCredentials, B2Api, HttpB2Api, SessionCache, TransportError, Uploader};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    bucket_id: String,
    upload: UploadConfig,
    uploader: Uploader,
}

impl AppState {
    /// Create state backed by the real B2 API
    pub fn new(config: &Config) -> Result<Self, TransportError> {
        let api = HttpB2Api::new(&config.api_config())?;
        Ok(Self::with_api(config, Arc::new(api)))
    }

    /// Create state over any [`B2Api`] implementation
    pub fn with_api(config: &Config, api: Arc<dyn B2Api>) -> Self {
        let credentials = AccountCredentials::new(&config.b2.key_id, &config.b2.key_token);
        let cache = Arc::new(SessionCache::new(
            api.clone(),
            credentials,
            config.b2.session_policy,
        ));
        let uploader = Uploader::new(api, cache, config.upload.retry);

        Self {
            inner: Arc::new(AppStateInner {
                bucket_id: config.b2.bucket_id.clone(),
                upload: config.upload.clone(),
                uploader,
            }),
        }
    }

    /// Get the target bucket id
    pub fn bucket_id(&self) -> &str {
        &self.inner.bucket_id
    }

    /// Get the upload settings
    pub fn upload_config(&self) -> &UploadConfig {
        &self.inner.upload
    }

    /// Get the uploader
    pub fn uploader(&self) -> &Uploader {
        &self.inner.uploader
    }
}
