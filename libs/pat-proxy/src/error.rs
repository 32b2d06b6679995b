use axum::http::header::{CONTENT_TYPE, WWW_AUTHENTICATE};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Why a request was denied before reaching the upstream server.
///
/// The `Display` text is what the caller sees in the response body, so it must not
/// carry backend details. Those are logged where the error is created.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("missing credential")]
    MissingCredential,

    #[error("could not decode credential")]
    MalformedCredential,

    #[error("invalid repository name")]
    InvalidRepository,

    #[error("invalid credential")]
    InvalidCredential,

    #[error("query failed")]
    StoreQuery,

    #[error("could not parse records")]
    StoreParse,

    #[error("could not decrypt token")]
    Decrypt,

    #[error("could not obtain signing credentials")]
    SigningCredentials,
}

impl AuthError {
    pub fn status(&self) -> StatusCode {
        match self {
            AuthError::MissingCredential
            | AuthError::MalformedCredential
            | AuthError::InvalidCredential => StatusCode::UNAUTHORIZED,
            AuthError::InvalidRepository
            | AuthError::StoreQuery
            | AuthError::StoreParse
            | AuthError::Decrypt
            | AuthError::SigningCredentials => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Query(_) => AuthError::StoreQuery,
            StoreError::Parse(_) => AuthError::StoreParse,
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status();
        let mut response = (status, [(CONTENT_TYPE, "text/plain; charset=utf-8")], self.to_string())
            .into_response();
        if status == StatusCode::UNAUTHORIZED {
            response.headers_mut().insert(
                WWW_AUTHENTICATE,
                axum::http::HeaderValue::from_static("Basic realm=\"git\""),
            );
        }
        response
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("token store query failed: {0}")]
    Query(String),

    #[error("could not parse token record: {0}")]
    Parse(String),
}

#[derive(Error, Debug)]
pub enum DecryptError {
    #[error("decrypt call failed: {0}")]
    Service(String),

    #[error("decrypt response carried no plaintext")]
    EmptyPlaintext,
}
