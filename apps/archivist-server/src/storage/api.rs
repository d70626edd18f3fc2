//! B2 native API client
//!
//! Thin transport over the three calls of the upload protocol. Replies are
//! returned raw; status classification and JSON decoding happen in the
//! session cache and the uploader.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{header, Client};

use super::error::TransportError;
use super::types::{AccountCredentials, BackendReply, FileMetadata, SessionAuth, UploadTarget};

/// Well-known account authorization endpoint
pub const DEFAULT_AUTH_URL: &str = "https://api.backblazeb2.com/b2api/v2/b2_authorize_account";

const GET_UPLOAD_URL_PATH: &str = "/b2api/v2/b2_get_upload_url";

pub const FILE_NAME_HEADER: &str = "X-Bz-File-Name";
pub const CONTENT_SHA1_HEADER: &str = "X-Bz-Content-Sha1";

/// Backend operations used by the uploader
#[async_trait]
pub trait B2Api: Send + Sync {
    /// Exchange the account key for a session
    async fn authorize_account(
        &self,
        credentials: &AccountCredentials,
    ) -> Result<BackendReply, TransportError>;

    /// Exchange a session for a bucket upload target
    async fn get_upload_url(
        &self,
        session: &SessionAuth,
        bucket_id: &str,
    ) -> Result<BackendReply, TransportError>;

    /// Send one file to an upload target
    async fn upload_file(
        &self,
        target: &UploadTarget,
        metadata: &FileMetadata,
        body: Bytes,
    ) -> Result<BackendReply, TransportError>;
}

/// Client settings for [`HttpB2Api`]
#[derive(Debug, Clone)]
pub struct HttpB2ApiConfig {
    pub auth_url: String,
    /// Per-request timeout; `None` leaves requests bounded only by cancellation
    pub request_timeout: Option<Duration>,
}

impl Default for HttpB2ApiConfig {
    fn default() -> Self {
        Self {
            auth_url: DEFAULT_AUTH_URL.to_string(),
            request_timeout: None,
        }
    }
}

/// reqwest-backed [`B2Api`]
#[derive(Clone)]
pub struct HttpB2Api {
    client: Client,
    auth_url: String,
}

impl HttpB2Api {
    pub fn new(config: &HttpB2ApiConfig) -> Result<Self, TransportError> {
        let mut builder = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(100);

        if let Some(timeout) = config.request_timeout {
            builder = builder.timeout(timeout);
        }

        Ok(Self {
            client: builder.build()?,
            auth_url: config.auth_url.clone(),
        })
    }

    async fn into_reply(response: reqwest::Response) -> Result<BackendReply, TransportError> {
        let status = response.status().as_u16();
        let body = response.bytes().await?;
        Ok(BackendReply { status, body })
    }
}

#[async_trait]
impl B2Api for HttpB2Api {
    async fn authorize_account(
        &self,
        credentials: &AccountCredentials,
    ) -> Result<BackendReply, TransportError> {
        let response = self
            .client
            .get(&self.auth_url)
            .basic_auth(&credentials.key_id, Some(&credentials.key_token))
            .send()
            .await?;

        Self::into_reply(response).await
    }

    async fn get_upload_url(
        &self,
        session: &SessionAuth,
        bucket_id: &str,
    ) -> Result<BackendReply, TransportError> {
        let url = format!("{}{}", session.api_url, GET_UPLOAD_URL_PATH);

        let response = self
            .client
            .post(&url)
            .header(header::AUTHORIZATION, &session.authorization_token)
            .json(&serde_json::json!({ "bucketId": bucket_id }))
            .send()
            .await?;

        Self::into_reply(response).await
    }

    async fn upload_file(
        &self,
        target: &UploadTarget,
        metadata: &FileMetadata,
        body: Bytes,
    ) -> Result<BackendReply, TransportError> {
        let response = self
            .client
            .post(&target.upload_url)
            .header(header::AUTHORIZATION, &target.authorization_token)
            .header(FILE_NAME_HEADER, encode_file_name(&metadata.file_name))
            .header(header::CONTENT_TYPE, &metadata.media_type)
            .header(header::CONTENT_LENGTH, metadata.size)
            .header(CONTENT_SHA1_HEADER, &metadata.sha1)
            .body(body)
            .send()
            .await?;

        Self::into_reply(response).await
    }
}

/// Percent-encode a file name for `X-Bz-File-Name`, keeping `/` literal
pub fn encode_file_name(name: &str) -> String {
    urlencoding::encode(name).replace("%2F", "/")
}
