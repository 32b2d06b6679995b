use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::header::{AUTHORIZATION, HOST};
use axum::http::{Request, StatusCode};
use axum::Router;
use base64::prelude::*;
use chrono::{NaiveDateTime, SubsecRound, Utc};
use reqwest::Client;
use tokio::sync::Mutex;
use tower::ServiceExt;
use url::Url;

use super::*;
use crate::config::ProxyConfig;
use crate::signing::SigningCredentials;
use crate::testing::{basic_header, record, FakeKms, MemoryTokenStore};
use crate::validator::CredentialValidator;

/// What the upstream server saw of a forwarded request.
#[derive(Clone, Debug)]
struct Seen {
    method: String,
    path_and_query: String,
    host: Option<String>,
    authorization: Option<String>,
    body: Vec<u8>,
}

type Recorder = Arc<Mutex<Vec<Seen>>>;

/// Start a stand-in for CodeCommit that answers every request with `status`.
async fn spawn_upstream(status: StatusCode) -> (Url, Recorder) {
    let seen: Recorder = Arc::new(Mutex::new(Vec::new()));
    let recorder = seen.clone();
    let app = Router::new().fallback(move |req: Request<Body>| {
        let recorder = recorder.clone();
        async move {
            let (parts, body) = req.into_parts();
            let header = |name| {
                parts
                    .headers
                    .get(name)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string)
            };
            let entry = Seen {
                method: parts.method.to_string(),
                path_and_query: parts
                    .uri
                    .path_and_query()
                    .map(|pq| pq.to_string())
                    .unwrap_or_default(),
                host: header(HOST),
                authorization: header(AUTHORIZATION),
                body: to_bytes(body, usize::MAX).await.unwrap().to_vec(),
            };
            recorder.lock().await.push(entry);
            (status, [("x-upstream", "codecommit")], "upstream body")
        }
    });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (Url::parse(&format!("http://{addr}/v1/repos/")).unwrap(), seen)
}

fn proxy_app(upstream: Url) -> (Router, Arc<MemoryTokenStore>) {
    let expiration = Utc::now().timestamp() + 3600;
    let store = Arc::new(MemoryTokenStore::new(vec![record(
        "r1",
        "alice",
        b"secret1",
        expiration,
    )]));
    let interceptor = RequestInterceptor::new(
        CredentialValidator::new(store.clone(), Arc::new(FakeKms::default())),
        Arc::new(SigningCredentials::new(
            "AKIDEXAMPLE",
            "wJalrXUtnFEMI/K7MDENG/bPxRfiCYEXAMPLEKEY",
        )),
        ProxyConfig::new("us-east-1", upstream),
    );
    (router(interceptor, Client::new()), store)
}

async fn body_string(response: Response) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn test_health_bypasses_authentication() {
    let (upstream, seen) = spawn_upstream(StatusCode::OK).await;
    let (app, store) = proxy_app(upstream);

    let response = app
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, r#"{"status":0}"#);
    assert_eq!(store.queries(), 0);
    assert!(seen.lock().await.is_empty());
}

#[tokio::test]
async fn test_valid_token_is_forwarded_with_signature() {
    let (upstream, seen) = spawn_upstream(StatusCode::OK).await;
    let (app, _) = proxy_app(upstream);

    let before = Utc::now().trunc_subsecs(0);
    let response = app
        .oneshot(
            Request::get("/git/r1/info/refs?service=git-upload-pack")
                .header(AUTHORIZATION, basic_header("alice", b"secret1"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let after = Utc::now();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get("x-upstream").unwrap(), "codecommit");
    assert_eq!(body_string(response).await, "upstream body");

    let seen = seen.lock().await;
    assert_eq!(seen.len(), 1);
    let forwarded = &seen[0];
    assert_eq!(forwarded.method, "GET");
    assert_eq!(
        forwarded.path_and_query,
        "/v1/repos/r1/info/refs?service=git-upload-pack"
    );
    assert_eq!(
        forwarded.host.as_deref(),
        Some("git-codecommit.us-east-1.amazonaws.com")
    );

    let authorization = forwarded.authorization.as_deref().unwrap();
    let encoded = authorization.strip_prefix("Basic ").unwrap();
    let decoded = String::from_utf8(BASE64_STANDARD.decode(encoded).unwrap()).unwrap();
    let (username, signature) = decoded.split_once(':').unwrap();
    assert_eq!(username, "AKIDEXAMPLE");
    let (timestamp, hex_signature) = signature.split_once('Z').unwrap();
    assert_eq!(hex_signature.len(), 64);
    let signed_at = NaiveDateTime::parse_from_str(timestamp, "%Y%m%dT%H%M%S")
        .unwrap()
        .and_utc();
    assert!(before <= signed_at && signed_at <= after);
}

#[tokio::test]
async fn test_push_body_is_forwarded() {
    let (upstream, seen) = spawn_upstream(StatusCode::OK).await;
    let (app, _) = proxy_app(upstream);

    let response = app
        .oneshot(
            Request::post("/git/r1/git-receive-pack")
                .header(AUTHORIZATION, basic_header("alice", b"secret1"))
                .header("content-type", "application/x-git-receive-pack-request")
                .body(Body::from("0000PACK"))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let seen = seen.lock().await;
    assert_eq!(seen[0].method, "POST");
    assert_eq!(seen[0].path_and_query, "/v1/repos/r1/git-receive-pack");
    assert_eq!(seen[0].body, b"0000PACK");
}

#[tokio::test]
async fn test_wrong_secret_never_reaches_upstream() {
    let (upstream, seen) = spawn_upstream(StatusCode::OK).await;
    let (app, _) = proxy_app(upstream);

    let response = app
        .oneshot(
            Request::get("/git/r1/info/refs")
                .header(AUTHORIZATION, basic_header("alice", b"wrongsecret"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_string(response).await, "invalid credential");
    assert!(seen.lock().await.is_empty());
}

#[tokio::test]
async fn test_missing_credential_never_reaches_upstream() {
    let (upstream, seen) = spawn_upstream(StatusCode::OK).await;
    let (app, _) = proxy_app(upstream);

    let response = app
        .oneshot(Request::get("/git/r1/info/refs").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(response.headers().contains_key("www-authenticate"));
    assert!(seen.lock().await.is_empty());
}

#[tokio::test]
async fn test_invalid_repository_name() {
    let (upstream, seen) = spawn_upstream(StatusCode::OK).await;
    let (app, _) = proxy_app(upstream);

    let response = app
        .oneshot(
            Request::get("/git//foo")
                .header(AUTHORIZATION, basic_header("alice", b"secret1"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(!response.headers().contains_key("www-authenticate"));
    assert_eq!(body_string(response).await, "invalid repository name");
    assert!(seen.lock().await.is_empty());
}

#[tokio::test]
async fn test_upstream_errors_are_relayed_verbatim() {
    let (upstream, _) = spawn_upstream(StatusCode::FORBIDDEN).await;
    let (app, _) = proxy_app(upstream);

    let response = app
        .oneshot(
            Request::get("/git/r1/info/refs")
                .header(AUTHORIZATION, basic_header("alice", b"secret1"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(body_string(response).await, "upstream body");
}

#[tokio::test]
async fn test_unreachable_upstream_is_bad_gateway() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let (app, _) = proxy_app(Url::parse(&format!("http://{addr}/v1/repos/")).unwrap());

    let response = app
        .oneshot(
            Request::get("/git/r1/info/refs")
                .header(AUTHORIZATION, basic_header("alice", b"secret1"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
}

#[test]
fn test_upstream_url_keeps_origin() {
    let upstream = Url::parse("https://git-codecommit.us-east-1.amazonaws.com/v1/repos/").unwrap();
    let uri: Uri = "/v1/repos/r1/info/refs?service=git-upload-pack".parse().unwrap();
    assert_eq!(
        upstream_url(&upstream, &uri).unwrap().as_str(),
        "https://git-codecommit.us-east-1.amazonaws.com/v1/repos/r1/info/refs?service=git-upload-pack"
    );
}
