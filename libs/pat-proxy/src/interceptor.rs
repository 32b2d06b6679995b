use std::sync::Arc;

use axum::http::header::{AUTHORIZATION, HOST};
use axum::http::request::Parts;
use axum::http::{HeaderValue, Uri};
use chrono::{DateTime, SubsecRound, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::ProxyConfig;
use crate::decrypt::TokenDecryptor;
use crate::error::AuthError;
use crate::signing::{CredentialSource, SigningContext};
use crate::store::TokenStore;
use crate::token::PresentedCredential;
use crate::validator::CredentialValidator;

static REPO_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/git/([a-zA-Z0-9]+)/?").expect("Failed to compile repository pattern"));

/// Repository id from the first `/git/<alnum>` segment of `path`.
pub fn repo_id_from_path(path: &str) -> Option<&str> {
    REPO_PATTERN
        .captures(path)
        .and_then(|captures| captures.get(1))
        .map(|m| m.as_str())
        .filter(|id| !id.is_empty())
}

/// `/v1/repos/git/<repo>/...` becomes `/v1/repos/<repo>/...`.
pub fn rewrite_path(path: &str) -> String {
    path.replacen("/v1/repos/git/", "/v1/repos/", 1)
}

/// Authenticates an inbound git request and re-signs it for CodeCommit.
pub struct RequestInterceptor<S, D> {
    validator: CredentialValidator<S, D>,
    credentials: Arc<dyn CredentialSource>,
    config: ProxyConfig,
}

impl<S: TokenStore, D: TokenDecryptor> RequestInterceptor<S, D> {
    pub fn new(
        validator: CredentialValidator<S, D>,
        credentials: Arc<dyn CredentialSource>,
        config: ProxyConfig,
    ) -> Self {
        Self {
            validator,
            credentials,
            config,
        }
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    pub async fn intercept(&self, parts: &mut Parts) -> Result<(), AuthError> {
        self.intercept_at(parts, Utc::now()).await
    }

    /// On success `parts` carries the upstream path, `Host` and `Authorization`.
    /// On failure `parts` is left untouched.
    pub async fn intercept_at(&self, parts: &mut Parts, now: DateTime<Utc>) -> Result<(), AuthError> {
        let now = now.trunc_subsecs(0);

        let Some(header) = parts.headers.get(AUTHORIZATION) else {
            log::info!("No Authorization header on {}", parts.uri.path());
            return Err(AuthError::MissingCredential);
        };
        let header = header.to_str().map_err(|_| AuthError::MalformedCredential)?;
        let credential = PresentedCredential::from_authorization(header)?;

        let repo_id = repo_id_from_path(parts.uri.path())
            .ok_or(AuthError::InvalidRepository)?
            .to_string();

        self.validator
            .validate_at(&repo_id, &credential, now)
            .await?;

        let signing_credentials = self.credentials.signing_credentials().await.map_err(|e| {
            log::error!("Could not obtain signing credentials: {}", e);
            AuthError::SigningCredentials
        })?;
        let ctx = SigningContext::new(&self.config.region, &repo_id, signing_credentials, now);

        let path = rewrite_path(&self.config.target_path(parts.uri.path()));
        let path_and_query = match parts.uri.query() {
            Some(query) => format!("{path}?{query}"),
            None => path,
        };
        let uri = path_and_query
            .parse::<Uri>()
            .map_err(|_| AuthError::InvalidRepository)?;
        let host = HeaderValue::from_str(ctx.hostname()).map_err(|_| AuthError::InvalidRepository)?;
        let authorization = HeaderValue::from_str(&format!("Basic {}", ctx.authorization_value()))
            .map_err(|_| AuthError::SigningCredentials)?;

        log::debug!(
            "Authenticated {} for repository {}, forwarding to {}",
            credential.username,
            repo_id,
            uri
        );
        parts.uri = uri;
        parts.headers.insert(HOST, host);
        parts.headers.remove(AUTHORIZATION);
        parts.headers.insert(AUTHORIZATION, authorization);
        Ok(())
    }
}

#[cfg(test)]
#[path = "interceptor_tests.rs"]
mod tests;
