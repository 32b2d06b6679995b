use std::sync::Arc;

use base64::prelude::*;
use chrono::{DateTime, Utc};

use crate::decrypt::TokenDecryptor;
use crate::error::AuthError;
use crate::store::TokenStore;
use crate::token::PresentedCredential;

/// Decides whether a presented credential is a live token for a repository.
pub struct CredentialValidator<S, D> {
    store: Arc<S>,
    decryptor: Arc<D>,
}

impl<S, D> Clone for CredentialValidator<S, D> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            decryptor: self.decryptor.clone(),
        }
    }
}

impl<S: TokenStore, D: TokenDecryptor> CredentialValidator<S, D> {
    pub fn new(store: Arc<S>, decryptor: Arc<D>) -> Self {
        Self { store, decryptor }
    }

    pub async fn validate(
        &self,
        repo_id: &str,
        credential: &PresentedCredential,
    ) -> Result<(), AuthError> {
        self.validate_at(repo_id, credential, Utc::now()).await
    }

    /// Every candidate record is decrypted and compared, even after a match, and all of
    /// them are checked against the same `now`.
    pub async fn validate_at(
        &self,
        repo_id: &str,
        credential: &PresentedCredential,
        now: DateTime<Utc>,
    ) -> Result<(), AuthError> {
        let records = self.store.records_for_repo(repo_id).await.map_err(|e| {
            log::error!("Token lookup for repository {} failed: {}", repo_id, e);
            AuthError::from(e)
        })?;

        let mut valid = false;
        let mut decrypt_failed = false;
        for record in &records {
            let ciphertext = match BASE64_STANDARD.decode(&record.token) {
                Ok(ciphertext) => ciphertext,
                Err(err) => {
                    log::warn!(
                        "Skipping corrupted token record for repository {} (user {}): {}",
                        repo_id,
                        record.username,
                        err
                    );
                    continue;
                }
            };

            let plaintext = match self.decryptor.decrypt(&ciphertext).await {
                Ok(plaintext) => plaintext,
                Err(err) => {
                    log::error!(
                        "Could not decrypt token for repository {} (user {}): {}",
                        repo_id,
                        record.username,
                        err
                    );
                    decrypt_failed = true;
                    continue;
                }
            };

            let secret = BASE64_STANDARD.encode(plaintext);
            if credential.matches(record, &secret) && record.is_valid_at(now) {
                log::debug!("Valid token found for repository {}", repo_id);
                valid = true;
            }
        }

        if valid {
            Ok(())
        } else if decrypt_failed {
            Err(AuthError::Decrypt)
        } else {
            Err(AuthError::InvalidCredential)
        }
    }
}
