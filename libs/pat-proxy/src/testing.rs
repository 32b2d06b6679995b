//! In-memory stand-ins for the token table and KMS, and a local AWS endpoint for the
//! SDK-backed adapters.
#![cfg(test)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::Bytes;
use axum::http::header::CONTENT_TYPE;
use axum::http::HeaderMap;
use axum::Router;
use base64::prelude::*;
use serde_json::Value;

use crate::decrypt::TokenDecryptor;
use crate::error::{DecryptError, StoreError};
use crate::store::TokenStore;
use crate::token::{AccessTokenRecord, PresentedCredential};

const CIPHERTEXT_PREFIX: &[u8] = b"kms:";

/// Fake KMS ciphertext for `plaintext`.
pub fn encrypt(plaintext: &[u8]) -> Vec<u8> {
    [CIPHERTEXT_PREFIX, plaintext].concat()
}

/// A stored record whose token decrypts to `plaintext` under [`FakeKms`].
pub fn record(repo_id: &str, username: &str, plaintext: &[u8], expiration: i64) -> AccessTokenRecord {
    AccessTokenRecord {
        token: BASE64_STANDARD.encode(encrypt(plaintext)),
        repo_id: repo_id.to_string(),
        username: username.to_string(),
        expiration,
    }
}

/// The credential a user holding `plaintext` presents: the token is handed out base64 encoded.
pub fn credential_for(username: &str, plaintext: &[u8]) -> PresentedCredential {
    PresentedCredential::new(username, BASE64_STANDARD.encode(plaintext))
}

/// `Authorization` header value for [`credential_for`].
pub fn basic_header(username: &str, plaintext: &[u8]) -> String {
    let credential = credential_for(username, plaintext);
    format!(
        "Basic {}",
        BASE64_STANDARD.encode(format!("{}:{}", credential.username, credential.secret))
    )
}

enum Behaviour {
    Records(Vec<AccessTokenRecord>),
    FailQuery,
    FailParse,
}

pub struct MemoryTokenStore {
    behaviour: Behaviour,
    queries: AtomicUsize,
}

impl MemoryTokenStore {
    pub fn new(records: Vec<AccessTokenRecord>) -> Self {
        Self::with(Behaviour::Records(records))
    }

    pub fn failing() -> Self {
        Self::with(Behaviour::FailQuery)
    }

    pub fn unparseable() -> Self {
        Self::with(Behaviour::FailParse)
    }

    fn with(behaviour: Behaviour) -> Self {
        Self {
            behaviour,
            queries: AtomicUsize::new(0),
        }
    }

    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn records_for_repo(&self, repo_id: &str) -> Result<Vec<AccessTokenRecord>, StoreError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        match &self.behaviour {
            Behaviour::Records(records) => Ok(records
                .iter()
                .filter(|r| r.repo_id == repo_id)
                .cloned()
                .collect()),
            Behaviour::FailQuery => Err(StoreError::Query("connection refused".to_string())),
            Behaviour::FailParse => Err(StoreError::Parse("missing attribute token".to_string())),
        }
    }
}

#[derive(Clone, Default)]
pub struct FakeKms {
    calls: Arc<AtomicUsize>,
}

impl FakeKms {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenDecryptor for FakeKms {
    async fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, DecryptError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        ciphertext
            .strip_prefix(CIPHERTEXT_PREFIX)
            .map(<[u8]>::to_vec)
            .ok_or_else(|| DecryptError::Service("InvalidCiphertextException".to_string()))
    }
}

/// An AWS JSON protocol call received by [`spawn_aws_endpoint`].
#[derive(Clone, Debug)]
pub struct AwsCall {
    /// The `X-Amz-Target` operation, e.g. `DynamoDB_20120810.Query`.
    pub target: String,
    pub body: Value,
}

/// Serve AWS JSON protocol calls on an ephemeral port, answering each with `respond`.
/// Returns the endpoint URL and every call received so far.
pub async fn spawn_aws_endpoint<F>(respond: F) -> (String, Arc<Mutex<Vec<AwsCall>>>)
where
    F: Fn(&AwsCall) -> Value + Clone + Send + Sync + 'static,
{
    let calls = Arc::new(Mutex::new(Vec::new()));
    let seen = calls.clone();
    let app = Router::new().fallback(move |headers: HeaderMap, body: Bytes| {
        let respond = respond.clone();
        let seen = seen.clone();
        async move {
            let call = AwsCall {
                target: headers
                    .get("x-amz-target")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string(),
                body: serde_json::from_slice(&body).unwrap_or(Value::Null),
            };
            let content_type = if call.target.starts_with("TrentService.") {
                "application/x-amz-json-1.1"
            } else {
                "application/x-amz-json-1.0"
            };
            let reply = respond(&call);
            seen.lock().unwrap().push(call);
            ([(CONTENT_TYPE, content_type)], reply.to_string())
        }
    });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
    (format!("http://{addr}"), calls)
}
