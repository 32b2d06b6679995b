use async_trait::async_trait;
use aws_sdk_kms::primitives::Blob;
use aws_sdk_kms::Client;

use crate::error::DecryptError;

/// Turns a stored token ciphertext back into the secret handed to the user.
#[async_trait]
pub trait TokenDecryptor: Send + Sync + 'static {
    async fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, DecryptError>;
}

/// Decrypts tokens with AWS KMS. The key is identified by the ciphertext itself.
#[derive(Clone, Debug)]
pub struct KmsDecryptor {
    client: Client,
}

impl KmsDecryptor {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TokenDecryptor for KmsDecryptor {
    async fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, DecryptError> {
        let output = self
            .client
            .decrypt()
            .ciphertext_blob(Blob::new(ciphertext))
            .send()
            .await
            .map_err(|e| DecryptError::Service(format!("{e:?}")))?;

        output
            .plaintext
            .map(Blob::into_inner)
            .ok_or(DecryptError::EmptyPlaintext)
    }
}
