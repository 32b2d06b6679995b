//! Request signing for the CodeCommit git endpoint.
//!
//! CodeCommit accepts a SigV4 derived password for git over HTTPS: the canonical
//! request uses the pseudo-method `GIT`, signs only the `host` header and carries no
//! payload hash. The resulting signature is sent back to CodeCommit as the password
//! of a Basic authentication header, with the access key id as the username.

use std::fmt;

use async_trait::async_trait;
use aws_credential_types::provider::{ProvideCredentials, SharedCredentialsProvider};
use base64::prelude::*;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

const ALGORITHM: &str = "AWS4-HMAC-SHA256";
const SERVICE: &str = "codecommit";
const TERMINATOR: &str = "aws4_request";
const METHOD: &str = "GIT";
const TIME_FORMAT: &str = "%Y%m%dT%H%M%S";
const DATE_FORMAT: &str = "%Y%m%d";

type HmacSha256 = Hmac<Sha256>;

/// Hostname of the CodeCommit git endpoint for `region`.
pub fn codecommit_host(region: &str) -> String {
    format!("git-codecommit.{region}.amazonaws.com")
}

/// The proxy's own AWS credential, used to sign upstream requests.
#[derive(Clone, PartialEq, Eq)]
pub struct SigningCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl SigningCredentials {
    pub fn new(access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token: None,
        }
    }

    pub fn with_session_token(mut self, token: impl Into<String>) -> Self {
        self.session_token = Some(token.into());
        self
    }

    /// Basic auth username CodeCommit expects: the key id, followed by `%<token>`
    /// for temporary credentials.
    pub fn username(&self) -> String {
        match self.session_token.as_deref() {
            Some(token) if !token.is_empty() => format!("{}%{}", self.access_key_id, token),
            _ => self.access_key_id.clone(),
        }
    }
}

impl fmt::Debug for SigningCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Where the signing credential comes from.
///
/// Implementations may refresh the credential on their own schedule; the proxy asks
/// for it once per signed request.
#[async_trait]
pub trait CredentialSource: Send + Sync + 'static {
    async fn signing_credentials(&self) -> Result<SigningCredentials, String>;
}

#[async_trait]
impl CredentialSource for SigningCredentials {
    async fn signing_credentials(&self) -> Result<SigningCredentials, String> {
        Ok(self.clone())
    }
}

#[async_trait]
impl CredentialSource for SharedCredentialsProvider {
    async fn signing_credentials(&self) -> Result<SigningCredentials, String> {
        let creds = self
            .provide_credentials()
            .await
            .map_err(|e| e.to_string())?;
        Ok(SigningCredentials {
            access_key_id: creds.access_key_id().to_string(),
            secret_access_key: creds.secret_access_key().to_string(),
            session_token: creds.session_token().map(str::to_string),
        })
    }
}

/// Everything needed to sign access to one repository at one instant.
pub struct SigningContext {
    region: String,
    path: String,
    hostname: String,
    timestamp: DateTime<Utc>,
    credentials: SigningCredentials,
}

impl SigningContext {
    pub fn new(
        region: &str,
        repo_id: &str,
        credentials: SigningCredentials,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            region: region.to_string(),
            path: format!("/v1/repos/{repo_id}"),
            hostname: codecommit_host(region),
            timestamp,
            credentials,
        }
    }

    pub fn canonical_request(&self) -> String {
        format!(
            "{METHOD}\n{}\n\nhost:{}\n\nhost\n",
            self.path, self.hostname
        )
    }

    pub fn scope(&self) -> String {
        [
            self.timestamp.format(DATE_FORMAT).to_string().as_str(),
            self.region.as_str(),
            SERVICE,
            TERMINATOR,
        ]
        .join("/")
    }

    pub fn string_to_sign(&self) -> String {
        let hashed_request = hex::encode(Sha256::digest(self.canonical_request().as_bytes()));
        [
            ALGORITHM.to_string(),
            self.timestamp.format(TIME_FORMAT).to_string(),
            self.scope(),
            hashed_request,
        ]
        .join("\n")
    }

    pub fn signing_key(&self) -> Vec<u8> {
        let secret = format!("AWS4{}", self.credentials.secret_access_key);
        let date = self.timestamp.format(DATE_FORMAT).to_string();
        let k_date = hmac_sha256(secret.as_bytes(), date.as_bytes());
        let k_region = hmac_sha256(&k_date, self.region.as_bytes());
        let k_service = hmac_sha256(&k_region, SERVICE.as_bytes());
        hmac_sha256(&k_service, TERMINATOR.as_bytes())
    }

    /// `<timestamp>Z<hex signature>`, the password half of the upstream credential.
    pub fn signature(&self) -> String {
        let signature = hmac_sha256(&self.signing_key(), self.string_to_sign().as_bytes());
        format!(
            "{}Z{}",
            self.timestamp.format(TIME_FORMAT),
            hex::encode(signature)
        )
    }

    /// Base64 of `username:signature`, ready to follow `Basic ` in an `Authorization` header.
    pub fn authorization_value(&self) -> String {
        BASE64_STANDARD.encode(format!(
            "{}:{}",
            self.credentials.username(),
            self.signature()
        ))
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts keys of any length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}
