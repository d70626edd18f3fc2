//! B2 types: credentials, cached artifacts, upload requests and wire formats

use std::fmt;

use bytes::Bytes;
use serde::{de::DeserializeOwned, Deserialize};
use tokio_util::sync::CancellationToken;

use super::error::B2Error;

// ============================================================================
// Credentials
// ============================================================================

/// Long-lived account key, supplied at startup and never mutated
#[derive(Clone)]
pub struct AccountCredentials {
    pub key_id: String,
    pub key_token: String,
}

impl AccountCredentials {
    pub fn new(key_id: impl Into<String>, key_token: impl Into<String>) -> Self {
        Self {
            key_id: key_id.into(),
            key_token: key_token.into(),
        }
    }
}

impl fmt::Debug for AccountCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountCredentials")
            .field("key_id", &self.key_id)
            .field("key_token", &"<redacted>")
            .finish()
    }
}

/// Account-level session obtained by authorizing the account key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionAuth {
    pub api_url: String,
    pub authorization_token: String,
}

/// Bucket-scoped upload endpoint and its token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadTarget {
    pub bucket_id: String,
    pub upload_url: String,
    pub authorization_token: String,
}

// ============================================================================
// Upload Request
// ============================================================================

/// Metadata sent alongside the file bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMetadata {
    pub file_name: String,
    pub media_type: String,
    /// Hex SHA-1 of the body, computed by the caller
    pub sha1: String,
    pub size: u64,
}

/// Replayable request body.
///
/// The buffer is immutable once built; every attempt gets a fresh view that
/// starts at offset 0, so a partially consumed attempt never leaks into the
/// next one.
#[derive(Debug, Clone)]
pub struct ByteSource {
    data: Bytes,
}

impl ByteSource {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }

    /// A full-length view positioned at the start of the buffer
    pub fn rewind(&self) -> Bytes {
        self.data.clone()
    }

    /// Length in bytes
    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }
}

/// One file to upload
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub metadata: FileMetadata,
    pub body: ByteSource,
}

/// Reasons an [`UploadRequest`] cannot be built
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidUploadRequest {
    #[error("file name is required")]
    MissingFileName,

    #[error("media type is required")]
    MissingMediaType,
}

impl UploadRequest {
    pub fn new(
        file_name: impl Into<String>,
        media_type: impl Into<String>,
        sha1: impl Into<String>,
        body: ByteSource,
    ) -> Result<Self, InvalidUploadRequest> {
        let file_name = file_name.into();
        let media_type = media_type.into();

        if file_name.is_empty() {
            return Err(InvalidUploadRequest::MissingFileName);
        }
        if media_type.is_empty() {
            return Err(InvalidUploadRequest::MissingMediaType);
        }

        Ok(Self {
            metadata: FileMetadata {
                file_name,
                media_type,
                sha1: sha1.into(),
                size: body.size(),
            },
            body,
        })
    }
}

/// Per-call context: correlation id for logs and a cancellation signal
#[derive(Debug, Clone, Default)]
pub struct UploadContext {
    pub request_id: Option<String>,
    pub cancel: CancellationToken,
}

impl UploadContext {
    pub fn new(request_id: Option<String>, cancel: CancellationToken) -> Self {
        Self { request_id, cancel }
    }

    /// Correlation id for log fields; empty when none was supplied
    pub fn request_id(&self) -> &str {
        self.request_id.as_deref().unwrap_or("")
    }
}

// ============================================================================
// Wire Formats
// ============================================================================

/// Raw reply of one backend call
#[derive(Debug, Clone)]
pub struct BackendReply {
    pub status: u16,
    pub body: Bytes,
}

impl BackendReply {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body as text, for error detail
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizeAccountResponse {
    pub api_url: String,
    pub authorization_token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetUploadUrlResponse {
    pub upload_url: String,
    pub authorization_token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadFileResponse {
    pub file_id: String,
}

/// Decode a JSON reply body, naming the operation on failure
pub(crate) fn parse_reply<T: DeserializeOwned>(operation: &str, body: &[u8]) -> Result<T, String> {
    serde_json::from_slice(body).map_err(|e| format!("{} response: {}", operation, e))
}

/// Reject empty strings in fields the protocol requires
pub(crate) fn require_field(operation: &str, field: &str, value: &str) -> Result<(), String> {
    if value.is_empty() {
        return Err(format!("{} response: field `{}` is empty", operation, field));
    }
    Ok(())
}

impl AuthorizeAccountResponse {
    pub fn into_session(self) -> Result<SessionAuth, B2Error> {
        require_field("b2_authorize_account", "apiUrl", &self.api_url)
            .and_then(|_| {
                require_field(
                    "b2_authorize_account",
                    "authorizationToken",
                    &self.authorization_token,
                )
            })
            .map_err(B2Error::Credential)?;

        Ok(SessionAuth {
            api_url: self.api_url.trim_end_matches('/').to_string(),
            authorization_token: self.authorization_token,
        })
    }
}

impl GetUploadUrlResponse {
    pub fn into_target(self, bucket_id: &str) -> Result<UploadTarget, B2Error> {
        require_field("b2_get_upload_url", "uploadUrl", &self.upload_url)
            .and_then(|_| {
                require_field(
                    "b2_get_upload_url",
                    "authorizationToken",
                    &self.authorization_token,
                )
            })
            .map_err(B2Error::MalformedResponse)?;

        Ok(UploadTarget {
            bucket_id: bucket_id.to_string(),
            upload_url: self.upload_url,
            authorization_token: self.authorization_token,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
