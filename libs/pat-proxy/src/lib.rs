//! An authenticating reverse proxy for AWS CodeCommit git over HTTPS.
//!
//! Git clients authenticate to the proxy with a personal access token using HTTP Basic
//! Authentication. The proxy checks the token against a DynamoDB table of KMS encrypted
//! tokens and, if it is valid for the repository in the request path, replaces it with a
//! short-lived CodeCommit signature derived from the proxy's own AWS credential.
//!
//! # How it Works
//!
//! 1. Requests under `/git/<repo>/...` enter the router built by [`router`].
//! 2. The [`RequestInterceptor`] decodes the Basic credential and extracts the repository id.
//! 3. The [`CredentialValidator`] loads every token record for the repository from the
//!    [`TokenStore`], decrypts each with the [`TokenDecryptor`] and compares it with the
//!    presented credential. Expired records never match.
//! 4. On success the request path is rewritten for CodeCommit, the `Host` header is set to
//!    the regional endpoint and the `Authorization` header is replaced with a fresh
//!    signature (see [`signing`]).
//! 5. The request is streamed upstream and the response relayed back unchanged.
//!    Any failure before that point is answered with an error response and the upstream
//!    server is never contacted.
//!
//! # References
//!
//! - [Git HTTP protocol documentation](https://git-scm.com/docs/http-protocol)
//! - [AWS Signature Version 4](https://docs.aws.amazon.com/IAM/latest/UserGuide/reference_sigv.html)

mod config;
mod decrypt;
mod error;
mod interceptor;
mod routes;
pub mod signing;
mod store;
mod testing;
mod token;
mod validator;

pub use config::ProxyConfig;
pub use decrypt::{KmsDecryptor, TokenDecryptor};
pub use error::{AuthError, DecryptError, StoreError};
pub use interceptor::{repo_id_from_path, rewrite_path, RequestInterceptor};
pub use routes::router;
pub use signing::{CredentialSource, SigningContext, SigningCredentials};
pub use store::{DynamoTokenStore, TokenStore, DEFAULT_REPO_INDEX};
pub use token::{AccessTokenRecord, PresentedCredential};
pub use validator::CredentialValidator;
