//! Uploader
//!
//! Uploads one file with a bounded number of attempts. Each attempt obtains
//! an upload target from the [`SessionCache`], sends the whole body from
//! offset 0 and classifies the reply:
//!
//! | reply               | cache action        | then              |
//! |---------------------|---------------------|-------------------|
//! | 2xx                 | -                   | return file id    |
//! | 2xx, no file id     | -                   | fail, no retry    |
//! | 401                 | invalidate target   | retry             |
//! | 408 / 429           | -                   | back off, retry   |
//! | unreachable         | invalidate target   | retry             |
//! | other non-2xx       | -                   | retry             |
//!
//! Failing to obtain a target aborts immediately without spending attempts.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::api::B2Api;
use super::error::{B2Error, Result, TransportError};
use super::session::SessionCache;
use super::types::{parse_reply, BackendReply, UploadContext, UploadFileResponse, UploadRequest};

/// Attempt budget per file
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Pause after a 408 or 429
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: DEFAULT_BACKOFF,
        }
    }
}

// ============================================================================
// Attempts
// ============================================================================

/// Classified result of one upload call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success { file_id: String },
    Unauthorized,
    Timeout,
    RateLimited,
    Unreachable(String),
    Rejected { status: u16, body: String },
    /// 2xx without a usable file id
    Malformed(String),
}

impl AttemptOutcome {
    pub fn classify(result: std::result::Result<BackendReply, TransportError>) -> Self {
        let reply = match result {
            Ok(reply) => reply,
            Err(e) => return AttemptOutcome::Unreachable(e.0),
        };

        match reply.status {
            200..=299 => {
                match parse_reply::<UploadFileResponse>("b2_upload_file", &reply.body) {
                    Ok(parsed) if !parsed.file_id.is_empty() => AttemptOutcome::Success {
                        file_id: parsed.file_id,
                    },
                    Ok(_) => AttemptOutcome::Malformed(
                        "b2_upload_file response: field `fileId` is empty".to_string(),
                    ),
                    Err(e) => AttemptOutcome::Malformed(e),
                }
            }
            401 => AttemptOutcome::Unauthorized,
            408 => AttemptOutcome::Timeout,
            429 => AttemptOutcome::RateLimited,
            status => AttemptOutcome::Rejected {
                status,
                body: reply.text(),
            },
        }
    }

    /// The error this outcome records, `None` on success
    pub fn error(&self) -> Option<B2Error> {
        match self {
            AttemptOutcome::Success { .. } => None,
            AttemptOutcome::Unauthorized => Some(B2Error::Unauthorized),
            AttemptOutcome::Timeout => Some(B2Error::Timeout),
            AttemptOutcome::RateLimited => Some(B2Error::RateLimited),
            AttemptOutcome::Unreachable(msg) => Some(B2Error::Transport(msg.clone())),
            AttemptOutcome::Rejected { status, body } => Some(B2Error::Backend {
                status: *status,
                body: body.clone(),
            }),
            AttemptOutcome::Malformed(msg) => Some(B2Error::MalformedResponse(msg.clone())),
        }
    }

    fn invalidates_target(&self) -> bool {
        matches!(self, AttemptOutcome::Unauthorized | AttemptOutcome::Unreachable(_))
    }

    fn backs_off(&self) -> bool {
        matches!(self, AttemptOutcome::Timeout | AttemptOutcome::RateLimited)
    }
}

/// One finished attempt
#[derive(Debug, Clone)]
pub struct UploadAttempt {
    /// Zero-based
    pub ordinal: u32,
    pub outcome: AttemptOutcome,
}

// ============================================================================
// Uploader
// ============================================================================

/// Uploads files through a shared [`SessionCache`]
#[derive(Clone)]
pub struct Uploader {
    api: Arc<dyn B2Api>,
    cache: Arc<SessionCache>,
    policy: RetryPolicy,
}

impl Uploader {
    pub fn new(api: Arc<dyn B2Api>, cache: Arc<SessionCache>, policy: RetryPolicy) -> Self {
        Self {
            api,
            cache,
            policy: RetryPolicy {
                max_attempts: policy.max_attempts.max(1),
                ..policy
            },
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Upload `request` to `bucket_id`, returning the backend's file id
    pub async fn upload(
        &self,
        ctx: &UploadContext,
        bucket_id: &str,
        request: &UploadRequest,
    ) -> Result<String> {
        let request_id = ctx.request_id();
        let metadata = &request.metadata;
        let mut last_error = None;

        for ordinal in 0..self.policy.max_attempts {
            if ctx.cancel.is_cancelled() {
                return Err(B2Error::Cancelled);
            }

            let body = request.body.rewind();

            let target = match cancellable(&ctx.cancel, self.cache.ensure_upload_target(bucket_id))
                .await?
            {
                Ok(target) => target,
                Err(e) => {
                    tracing::error!(
                        request_id = %request_id,
                        bucket_id = %bucket_id,
                        error = %e,
                        "Could not get upload url"
                    );
                    return Err(e);
                }
            };

            let result =
                cancellable(&ctx.cancel, self.api.upload_file(&target, metadata, body)).await?;

            let attempt = UploadAttempt {
                ordinal,
                outcome: AttemptOutcome::classify(result),
            };

            match &attempt.outcome {
                AttemptOutcome::Success { file_id } => {
                    tracing::info!(
                        request_id = %request_id,
                        file_name = %metadata.file_name,
                        file_id = %file_id,
                        attempt = attempt.ordinal,
                        "Uploaded file to b2"
                    );
                    return Ok(file_id.clone());
                }
                AttemptOutcome::Malformed(msg) => tracing::error!(
                    request_id = %request_id,
                    file_name = %metadata.file_name,
                    error = %msg,
                    "Upload accepted but response unreadable"
                ),
                AttemptOutcome::Unauthorized => tracing::info!(
                    request_id = %request_id,
                    attempt = attempt.ordinal,
                    "Upload token rejected, fetching a new upload url"
                ),
                AttemptOutcome::Timeout => tracing::info!(
                    request_id = %request_id,
                    attempt = attempt.ordinal,
                    "Upload timed out, backing off"
                ),
                AttemptOutcome::RateLimited => tracing::info!(
                    request_id = %request_id,
                    attempt = attempt.ordinal,
                    "Rate limited by b2, backing off"
                ),
                AttemptOutcome::Unreachable(msg) => tracing::error!(
                    request_id = %request_id,
                    attempt = attempt.ordinal,
                    error = %msg,
                    "Upload request failed, fetching a new upload url next time"
                ),
                AttemptOutcome::Rejected { status, body } => tracing::error!(
                    request_id = %request_id,
                    attempt = attempt.ordinal,
                    b2_response_code = status,
                    b2_response_body = %body,
                    "Upload rejected by b2"
                ),
            }

            if attempt.outcome.invalidates_target() {
                self.cache.invalidate_target_if_current(&target).await;
            }

            if let Some(err) = attempt.outcome.error() {
                // The file may already be stored; only transient failures repeat
                if !err.is_retryable() {
                    return Err(err);
                }
                last_error = Some(err);
            }

            let is_last = ordinal + 1 == self.policy.max_attempts;
            if attempt.outcome.backs_off() && !is_last {
                cancellable(&ctx.cancel, tokio::time::sleep(self.policy.backoff)).await?;
            }
        }

        let err = last_error.unwrap_or(B2Error::Cancelled);
        tracing::error!(
            request_id = %request_id,
            file_name = %metadata.file_name,
            attempts = self.policy.max_attempts,
            error = %err,
            "Giving up on upload"
        );
        Err(err)
    }
}

/// Run `fut` unless `cancel` fires first
async fn cancellable<F: Future>(cancel: &CancellationToken, fut: F) -> Result<F::Output> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(B2Error::Cancelled),
        output = fut => Ok(output),
    }
}

// ============================================================================
// Tests
// ============================================================================
