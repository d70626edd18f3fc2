//! Scripted in-memory backend for unit tests

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use super::api::B2Api;
use super::error::TransportError;
use super::types::{AccountCredentials, BackendReply, FileMetadata, SessionAuth, UploadTarget};

type Scripted = Result<BackendReply, TransportError>;

/// Mock backend.
///
/// Each operation pops its next scripted reply; once the script runs dry the
/// operation succeeds with a fresh numbered token so tests can tell refreshes
/// apart.
#[derive(Default)]
pub struct MockB2Api {
    pub authorize_calls: AtomicUsize,
    pub get_upload_url_calls: AtomicUsize,
    pub upload_calls: AtomicUsize,

    authorize_script: Mutex<VecDeque<Scripted>>,
    upload_url_script: Mutex<VecDeque<Scripted>>,
    upload_script: Mutex<VecDeque<Scripted>>,

    /// (upload auth token, body) of every upload call
    pub uploads: Mutex<Vec<(String, Bytes)>>,
    /// Session token presented on every get_upload_url call
    pub session_tokens_seen: Mutex<Vec<String>>,

    latency: Option<Duration>,
    upload_latency: Option<Duration>,
}

impl MockB2Api {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every call, widening race windows
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Self::default()
        }
    }

    /// Delay only upload calls, so the target is ready before the stall
    pub fn with_upload_latency(latency: Duration) -> Self {
        Self {
            upload_latency: Some(latency),
            ..Self::default()
        }
    }

    pub fn script_authorize(&self, reply: Scripted) {
        self.authorize_script.lock().unwrap().push_back(reply);
    }

    pub fn script_upload_url(&self, reply: Scripted) {
        self.upload_url_script.lock().unwrap().push_back(reply);
    }

    pub fn script_upload(&self, reply: Scripted) {
        self.upload_script.lock().unwrap().push_back(reply);
    }

    pub fn authorize_count(&self) -> usize {
        self.authorize_calls.load(Ordering::SeqCst)
    }

    pub fn upload_url_count(&self) -> usize {
        self.get_upload_url_calls.load(Ordering::SeqCst)
    }

    pub fn upload_count(&self) -> usize {
        self.upload_calls.load(Ordering::SeqCst)
    }

    pub fn upload_tokens(&self) -> Vec<String> {
        self.uploads
            .lock()
            .unwrap()
            .iter()
            .map(|(token, _)| token.clone())
            .collect()
    }

    async fn pause(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

pub fn status(code: u16, body: &str) -> Scripted {
    Ok(BackendReply::new(code, body.to_string()))
}

pub fn unreachable(message: &str) -> Scripted {
    Err(TransportError(message.to_string()))
}

#[async_trait]
impl B2Api for MockB2Api {
    async fn authorize_account(
        &self,
        _credentials: &AccountCredentials,
    ) -> Result<BackendReply, TransportError> {
        let n = self.authorize_calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.pause().await;

        match self.authorize_script.lock().unwrap().pop_front() {
            Some(reply) => reply,
            None => status(
                200,
                &format!(
                    r#"{{"accountId":"acct","apiUrl":"https://api.example.com","authorizationToken":"api-{}"}}"#,
                    n
                ),
            ),
        }
    }

    async fn get_upload_url(
        &self,
        session: &SessionAuth,
        bucket_id: &str,
    ) -> Result<BackendReply, TransportError> {
        let n = self.get_upload_url_calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.session_tokens_seen
            .lock()
            .unwrap()
            .push(session.authorization_token.clone());
        self.pause().await;

        match self.upload_url_script.lock().unwrap().pop_front() {
            Some(reply) => reply,
            None => status(
                200,
                &format!(
                    r#"{{"bucketId":"{}","uploadUrl":"https://pod.example.com/upload/{}","authorizationToken":"up-{}"}}"#,
                    bucket_id, n, n
                ),
            ),
        }
    }

    async fn upload_file(
        &self,
        target: &UploadTarget,
        _metadata: &FileMetadata,
        body: Bytes,
    ) -> Result<BackendReply, TransportError> {
        let n = self.upload_calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.uploads
            .lock()
            .unwrap()
            .push((target.authorization_token.clone(), body));
        self.pause().await;
        if let Some(latency) = self.upload_latency {
            tokio::time::sleep(latency).await;
        }

        match self.upload_script.lock().unwrap().pop_front() {
            Some(reply) => reply,
            None => status(200, &format!(r#"{{"fileId":"file-{}"}}"#, n)),
        }
    }
}
