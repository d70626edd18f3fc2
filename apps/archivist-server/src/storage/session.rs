//! Session Cache
//!
//! Holds the account session and the bucket upload target shared by every
//! in-flight upload:
//! - Reads go through an `RwLock` snapshot, so uploads holding a valid
//!   target never wait on each other
//! - Refreshes are serialized per artifact with double-checked locking, so a
//!   burst of callers that find the cache empty triggers one backend call
//! - Lock order is target refresh -> session refresh -> state

use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};

use super::api::B2Api;
use super::error::{B2Error, Result};
use super::types::{
    parse_reply, AccountCredentials, AuthorizeAccountResponse, GetUploadUrlResponse, SessionAuth,
    UploadTarget,
};

// ============================================================================
// Policy
// ============================================================================

/// When re-acquiring a target, whether to re-authorize the account first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionPolicy {
    /// Re-authorize every time a target is fetched
    #[default]
    Eager,
    /// Reuse the cached session until it is invalidated
    OnDemand,
}

// ============================================================================
// Session Cache
// ============================================================================

#[derive(Debug, Default)]
struct CachedArtifacts {
    session: Option<SessionAuth>,
    target: Option<UploadTarget>,
}

/// Shared cache of the session and upload target
pub struct SessionCache {
    api: Arc<dyn B2Api>,
    credentials: AccountCredentials,
    policy: SessionPolicy,

    state: RwLock<CachedArtifacts>,

    /// Held while a session refresh is in flight
    session_refresh: Mutex<()>,

    /// Held while a target refresh is in flight
    target_refresh: Mutex<()>,
}

impl SessionCache {
    pub fn new(api: Arc<dyn B2Api>, credentials: AccountCredentials, policy: SessionPolicy) -> Self {
        Self {
            api,
            credentials,
            policy,
            state: RwLock::new(CachedArtifacts::default()),
            session_refresh: Mutex::new(()),
            target_refresh: Mutex::new(()),
        }
    }

    /// Cached session, if any
    pub async fn current_session(&self) -> Option<SessionAuth> {
        self.state.read().await.session.clone()
    }

    /// Cached target for `bucket_id`, if any
    pub async fn current_target(&self, bucket_id: &str) -> Option<UploadTarget> {
        self.state
            .read()
            .await
            .target
            .as_ref()
            .filter(|t| t.bucket_id == bucket_id)
            .cloned()
    }

    // ========================================================================
    // Read-or-refresh
    // ========================================================================

    /// Return the cached upload target, fetching one if none is cached
    pub async fn ensure_upload_target(&self, bucket_id: &str) -> Result<UploadTarget> {
        if let Some(target) = self.current_target(bucket_id).await {
            return Ok(target);
        }

        let _refresh = self.target_refresh.lock().await;

        // Another caller may have refreshed while we waited
        if let Some(target) = self.current_target(bucket_id).await {
            return Ok(target);
        }

        if self.policy == SessionPolicy::Eager {
            self.state.write().await.session = None;
        }

        let session = self.ensure_session().await?;

        let reply = self
            .api
            .get_upload_url(&session, bucket_id)
            .await
            .map_err(|e| {
                tracing::warn!(bucket_id = %bucket_id, error = %e, "Failed to reach b2 for upload url");
                B2Error::Transport(e.to_string())
            })?;

        if !reply.is_success() {
            let body = reply.text();
            tracing::warn!(
                bucket_id = %bucket_id,
                status = reply.status,
                body = %body,
                "b2_get_upload_url rejected"
            );

            if reply.status == 401 {
                // The account token itself was refused
                self.invalidate_session_if_current(&session).await;
            }

            return Err(B2Error::Backend {
                status: reply.status,
                body,
            });
        }

        let target = parse_reply::<GetUploadUrlResponse>("b2_get_upload_url", &reply.body)
            .map_err(B2Error::MalformedResponse)?
            .into_target(bucket_id)?;

        self.state.write().await.target = Some(target.clone());

        tracing::info!(bucket_id = %bucket_id, "Acquired new upload url");

        Ok(target)
    }

    /// Return the cached session, authorizing the account if none is cached
    pub async fn ensure_session(&self) -> Result<SessionAuth> {
        if let Some(session) = self.current_session().await {
            return Ok(session);
        }

        let _refresh = self.session_refresh.lock().await;

        if let Some(session) = self.current_session().await {
            return Ok(session);
        }

        let reply = self
            .api
            .authorize_account(&self.credentials)
            .await
            .map_err(|e| {
                tracing::warn!(key_id = %self.credentials.key_id, error = %e, "Failed to reach b2 for authorization");
                B2Error::Credential(format!("failed to reach b2: {}", e))
            })?;

        if !reply.is_success() {
            let body = reply.text();
            tracing::warn!(
                key_id = %self.credentials.key_id,
                status = reply.status,
                body = %body,
                "b2_authorize_account rejected"
            );
            return Err(B2Error::Credential(format!("b2 returned {}: {}", reply.status, body)));
        }

        let session = parse_reply::<AuthorizeAccountResponse>("b2_authorize_account", &reply.body)
            .map_err(B2Error::Credential)?
            .into_session()?;

        self.state.write().await.session = Some(session.clone());

        tracing::info!(key_id = %self.credentials.key_id, "Authorized b2 account");

        Ok(session)
    }

    // ========================================================================
    // Invalidation
    // ========================================================================

    /// Drop the cached upload target, keeping the session
    pub async fn invalidate_target(&self) {
        self.state.write().await.target = None;
    }

    /// Drop the cached target only if it is still `observed`.
    ///
    /// Returns whether the target was cleared. A failure seen on a stale
    /// target must not discard a newer one installed by another task.
    pub async fn invalidate_target_if_current(&self, observed: &UploadTarget) -> bool {
        let mut state = self.state.write().await;
        if state.target.as_ref() == Some(observed) {
            state.target = None;
            true
        } else {
            false
        }
    }

    /// Drop both the session and the target
    pub async fn invalidate_session(&self) {
        let mut state = self.state.write().await;
        state.session = None;
        state.target = None;
    }

    async fn invalidate_session_if_current(&self, observed: &SessionAuth) {
        let mut state = self.state.write().await;
        if state.session.as_ref() == Some(observed) {
            state.session = None;
            state.target = None;
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::mock::{status, unreachable, MockB2Api};
    use std::time::Duration;

    fn cache(api: Arc<MockB2Api>, policy: SessionPolicy) -> SessionCache {
        SessionCache::new(api, AccountCredentials::new("k1", "t1"), policy)
    }

    #[tokio::test]
    async fn test_first_target_authorizes_then_fetches() {
        let api = Arc::new(MockB2Api::new());
        let cache = cache(api.clone(), SessionPolicy::Eager);

        let target = cache.ensure_upload_target("b1").await.unwrap();

        assert_eq!(target.bucket_id, "b1");
        assert_eq!(target.authorization_token, "up-1");
        assert_eq!(api.authorize_count(), 1);
        assert_eq!(api.upload_url_count(), 1);

        // Cached: no further calls
        let again = cache.ensure_upload_target("b1").await.unwrap();
        assert_eq!(again, target);
        assert_eq!(api.authorize_count(), 1);
        assert_eq!(api.upload_url_count(), 1);
    }

    #[tokio::test]
    async fn test_invalidate_target_keeps_session() {
        let api = Arc::new(MockB2Api::new());
        let cache = cache(api.clone(), SessionPolicy::OnDemand);

        cache.ensure_upload_target("b1").await.unwrap();
        cache.invalidate_target().await;

        assert!(cache.current_target("b1").await.is_none());
        assert!(cache.current_session().await.is_some());

        let target = cache.ensure_upload_target("b1").await.unwrap();
        assert_eq!(target.authorization_token, "up-2");
        assert_eq!(api.authorize_count(), 1);
        assert_eq!(api.upload_url_count(), 2);
    }

    #[tokio::test]
    async fn test_eager_policy_reauthorizes_on_target_refresh() {
        let api = Arc::new(MockB2Api::new());
        let cache = cache(api.clone(), SessionPolicy::Eager);

        cache.ensure_upload_target("b1").await.unwrap();
        cache.invalidate_target().await;
        cache.ensure_upload_target("b1").await.unwrap();

        assert_eq!(api.authorize_count(), 2);
        assert_eq!(
            *api.session_tokens_seen.lock().unwrap(),
            vec!["api-1".to_string(), "api-2".to_string()]
        );
    }

    #[tokio::test]
    async fn test_invalidate_session_clears_both() {
        let api = Arc::new(MockB2Api::new());
        let cache = cache(api.clone(), SessionPolicy::OnDemand);

        cache.ensure_upload_target("b1").await.unwrap();
        cache.invalidate_session().await;

        assert!(cache.current_session().await.is_none());
        assert!(cache.current_target("b1").await.is_none());

        cache.ensure_upload_target("b1").await.unwrap();
        assert_eq!(api.authorize_count(), 2);
    }

    #[tokio::test]
    async fn test_invalidate_target_if_current_ignores_stale() {
        let api = Arc::new(MockB2Api::new());
        let cache = cache(api.clone(), SessionPolicy::OnDemand);

        let stale = cache.ensure_upload_target("b1").await.unwrap();
        assert!(cache.invalidate_target_if_current(&stale).await);

        let fresh = cache.ensure_upload_target("b1").await.unwrap();
        assert!(!cache.invalidate_target_if_current(&stale).await);
        assert_eq!(cache.current_target("b1").await, Some(fresh));
    }

    #[tokio::test]
    async fn test_authorize_rejected_is_credential_error() {
        let api = Arc::new(MockB2Api::new());
        api.script_authorize(status(401, r#"{"code":"bad_auth_token"}"#));
        let cache = cache(api.clone(), SessionPolicy::Eager);

        let err = cache.ensure_upload_target("b1").await.unwrap_err();

        assert!(matches!(err, B2Error::Credential(ref msg) if msg.contains("bad_auth_token")));
        assert_eq!(api.upload_url_count(), 0);
        assert!(cache.current_session().await.is_none());
    }

    #[tokio::test]
    async fn test_authorize_malformed_body_is_credential_error() {
        let api = Arc::new(MockB2Api::new());
        api.script_authorize(status(200, r#"{"authorizationToken":"tok"}"#));
        let cache = cache(api.clone(), SessionPolicy::Eager);

        let err = cache.ensure_session().await.unwrap_err();
        assert!(matches!(err, B2Error::Credential(ref msg) if msg.contains("apiUrl")));
    }

    #[tokio::test]
    async fn test_authorize_unreachable_is_credential_error() {
        let api = Arc::new(MockB2Api::new());
        api.script_authorize(unreachable("connection refused"));
        let cache = cache(api.clone(), SessionPolicy::Eager);

        let err = cache.ensure_session().await.unwrap_err();
        assert!(matches!(err, B2Error::Credential(ref msg) if msg.contains("connection refused")));
    }

    #[tokio::test]
    async fn test_target_rejected_carries_backend_body() {
        let api = Arc::new(MockB2Api::new());
        api.script_upload_url(status(400, r#"{"code":"bad_bucket_id"}"#));
        let cache = cache(api.clone(), SessionPolicy::OnDemand);

        let err = cache.ensure_upload_target("b1").await.unwrap_err();

        assert_eq!(
            err,
            B2Error::Backend {
                status: 400,
                body: r#"{"code":"bad_bucket_id"}"#.to_string()
            }
        );
        // Session is still good
        assert!(cache.current_session().await.is_some());
        assert!(cache.current_target("b1").await.is_none());
    }

    #[tokio::test]
    async fn test_target_unreachable_is_transport_error() {
        let api = Arc::new(MockB2Api::new());
        api.script_upload_url(unreachable("connection reset"));
        let cache = cache(api.clone(), SessionPolicy::OnDemand);

        let err = cache.ensure_upload_target("b1").await.unwrap_err();

        assert!(matches!(err, B2Error::Transport(ref msg) if msg.contains("connection reset")));
        assert!(cache.current_target("b1").await.is_none());
        assert!(cache.current_session().await.is_some());

        // Nothing poisoned: the next call fetches a fresh target
        let target = cache.ensure_upload_target("b1").await.unwrap();
        assert_eq!(target.authorization_token, "up-2");
    }

    #[tokio::test]
    async fn test_target_unauthorized_invalidates_session() {
        let api = Arc::new(MockB2Api::new());
        api.script_upload_url(status(401, r#"{"code":"expired_auth_token"}"#));
        let cache = cache(api.clone(), SessionPolicy::OnDemand);

        let err = cache.ensure_upload_target("b1").await.unwrap_err();
        assert!(matches!(err, B2Error::Backend { status: 401, .. }));
        assert!(cache.current_session().await.is_none());

        cache.ensure_upload_target("b1").await.unwrap();
        assert_eq!(api.authorize_count(), 2);
    }

    #[tokio::test]
    async fn test_target_malformed_body() {
        let api = Arc::new(MockB2Api::new());
        api.script_upload_url(status(200, r#"{"uploadUrl":"","authorizationToken":"x"}"#));
        let cache = cache(api.clone(), SessionPolicy::OnDemand);

        let err = cache.ensure_upload_target("b1").await.unwrap_err();
        assert!(matches!(err, B2Error::MalformedResponse(ref msg) if msg.contains("uploadUrl")));
        assert!(cache.current_target("b1").await.is_none());
    }

    #[tokio::test]
    async fn test_target_for_other_bucket_is_refetched() {
        let api = Arc::new(MockB2Api::new());
        let cache = cache(api.clone(), SessionPolicy::OnDemand);

        cache.ensure_upload_target("b1").await.unwrap();
        let other = cache.ensure_upload_target("b2").await.unwrap();

        assert_eq!(other.bucket_id, "b2");
        assert_eq!(api.upload_url_count(), 2);
        assert!(cache.current_target("b1").await.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_callers_share_one_refresh() {
        let api = Arc::new(MockB2Api::with_latency(Duration::from_millis(50)));
        let cache = Arc::new(cache(api.clone(), SessionPolicy::Eager));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.ensure_upload_target("b1").await })
            })
            .collect();

        let mut tokens = Vec::new();
        for handle in handles {
            tokens.push(handle.await.unwrap().unwrap().authorization_token);
        }

        assert_eq!(api.authorize_count(), 1);
        assert_eq!(api.upload_url_count(), 1);
        assert!(tokens.iter().all(|t| t == "up-1"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_session_callers_share_one_authorization() {
        let api = Arc::new(MockB2Api::with_latency(Duration::from_millis(50)));
        let cache = Arc::new(cache(api.clone(), SessionPolicy::OnDemand));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.ensure_session().await })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap().authorization_token, "api-1");
        }
        assert_eq!(api.authorize_count(), 1);
    }
}
