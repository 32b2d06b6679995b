use std::collections::HashMap;
use std::fmt;

use aws_sdk_dynamodb::types::AttributeValue;
use base64::prelude::*;
use chrono::{DateTime, Utc};

use crate::error::AuthError;

/// A personal access token as stored in the token table.
///
/// Records are provisioned externally; the proxy only ever reads them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccessTokenRecord {
    /// Base64 encoded KMS ciphertext of the token secret.
    pub token: String,
    /// Repository the token grants access to.
    pub repo_id: String,
    /// Account the token belongs to.
    pub username: String,
    /// Seconds since the epoch after which the token is no longer accepted.
    pub expiration: i64,
}

impl AccessTokenRecord {
    /// A record is usable strictly before its expiration instant.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now.timestamp() < self.expiration
    }
}

impl TryFrom<&HashMap<String, AttributeValue>> for AccessTokenRecord {
    type Error = String;

    fn try_from(item: &HashMap<String, AttributeValue>) -> Result<Self, Self::Error> {
        let string_attr = |name: &str| -> Result<String, String> {
            match item.get(name) {
                Some(AttributeValue::S(value)) => Ok(value.clone()),
                Some(_) => Err(format!("attribute {name} is not a string")),
                None => Err(format!("missing attribute {name}")),
            }
        };

        let expiration = match item.get("expiration") {
            Some(AttributeValue::N(value)) => value
                .parse::<i64>()
                .map_err(|e| format!("attribute expiration is not an integer: {e}"))?,
            Some(_) => return Err("attribute expiration is not a number".to_string()),
            None => return Err("missing attribute expiration".to_string()),
        };

        Ok(Self {
            token: string_attr("token")?,
            repo_id: string_attr("repoID")?,
            username: string_attr("username")?,
            expiration,
        })
    }
}

/// The `(username, secret)` pair a caller presented via Basic authentication.
#[derive(Clone, PartialEq, Eq)]
pub struct PresentedCredential {
    pub username: String,
    pub secret: String,
}

impl PresentedCredential {
    pub fn new(username: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            secret: secret.into(),
        }
    }

    /// Parse the value of an `Authorization: Basic <base64>` header.
    pub fn from_authorization(value: &str) -> Result<Self, AuthError> {
        let (scheme, payload) = value
            .trim()
            .split_once(' ')
            .ok_or(AuthError::MalformedCredential)?;
        if !scheme.eq_ignore_ascii_case("basic") {
            return Err(AuthError::MalformedCredential);
        }

        let decoded = BASE64_STANDARD
            .decode(payload.trim())
            .map_err(|_| AuthError::MalformedCredential)?;
        let decoded = String::from_utf8(decoded).map_err(|_| AuthError::MalformedCredential)?;

        // A payload without a colon can never match a stored token, but it is not malformed.
        let (username, secret) = decoded.split_once(':').unwrap_or((decoded.as_str(), ""));
        Ok(Self::new(username, secret))
    }

    /// Whether this credential names `record`'s account with the given decrypted secret.
    pub fn matches(&self, record: &AccessTokenRecord, secret: &str) -> bool {
        self.username == record.username && self.secret == secret
    }
}

impl fmt::Debug for PresentedCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PresentedCredential")
            .field("username", &self.username)
            .field("secret", &"<redacted>")
            .finish()
    }
}
