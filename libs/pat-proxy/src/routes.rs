use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::header::{self, HeaderMap, HeaderName, CONTENT_TYPE};
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get};
use axum::Router;
use futures_util::StreamExt;
use reqwest::Client;
use tower_http::trace::TraceLayer;
use url::Url;

use crate::decrypt::TokenDecryptor;
use crate::interceptor::RequestInterceptor;
use crate::store::TokenStore;

/// Headers that describe a single connection and must not be forwarded.
const HOP_BY_HOP: [HeaderName; 7] = [
    header::CONNECTION,
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

struct ProxyState<S, D> {
    interceptor: RequestInterceptor<S, D>,
    client: Client,
}

/// Build the proxy router: `/health` plus everything under `/git/`.
///
/// Requests under `/git/` are authenticated and re-signed by `interceptor` and then
/// relayed to the configured upstream. A request that fails authentication is answered
/// directly and never reaches the upstream server.
pub fn router<S, D>(interceptor: RequestInterceptor<S, D>, client: Client) -> Router
where
    S: TokenStore,
    D: TokenDecryptor,
{
    let state = Arc::new(ProxyState {
        interceptor,
        client,
    });

    Router::new()
        .route("/health", get(health))
        .route("/git/", any(proxy::<S, D>))
        .route("/git/{*rest}", any(proxy::<S, D>))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn health() -> Response {
    (
        StatusCode::OK,
        [(CONTENT_TYPE, "application/json")],
        r#"{"status":0}"#,
    )
        .into_response()
}

async fn proxy<S, D>(State(state): State<Arc<ProxyState<S, D>>>, req: Request) -> Response
where
    S: TokenStore,
    D: TokenDecryptor,
{
    let (mut parts, body) = req.into_parts();

    if let Err(err) = state.interceptor.intercept(&mut parts).await {
        log::warn!(
            "Denied {} {}: {}",
            parts.method,
            parts.uri.path(),
            err
        );
        return err.into_response();
    }

    let url = match upstream_url(&state.interceptor.config().upstream, &parts.uri) {
        Ok(url) => url,
        Err(err) => {
            log::error!("Could not build upstream URL for {}: {}", parts.uri, err);
            return (StatusCode::BAD_GATEWAY, "upstream request failed").into_response();
        }
    };

    let request = state
        .client
        .request(parts.method, url.clone())
        .headers(without_hop_by_hop(parts.headers))
        .body(reqwest::Body::wrap_stream(body.into_data_stream()));

    let resp = match request.send().await {
        Ok(resp) => resp,
        Err(err) => {
            log::error!("Error forwarding to {}: {:?}", url, err);
            return (StatusCode::BAD_GATEWAY, "upstream request failed").into_response();
        }
    };

    let status = resp.status();
    if !status.is_success() {
        log::warn!("Upstream responded {} for {}", status, url.path());
    }

    let mut response = Response::builder().status(status);
    if let Some(headers) = response.headers_mut() {
        *headers = without_hop_by_hop(resp.headers().clone());
    }

    let byte_stream = resp.bytes_stream().map(|chunk| {
        chunk.map_err(|err| {
            log::error!("Error reading upstream body: {:?}", err);
            std::io::Error::other(err)
        })
    });

    response
        .body(Body::from_stream(byte_stream))
        .unwrap_or_else(|err| {
            log::error!("Could not relay upstream response: {:?}", err);
            StatusCode::BAD_GATEWAY.into_response()
        })
}

/// Scheme and authority of `upstream`, path and query of the rewritten request.
fn upstream_url(upstream: &Url, uri: &Uri) -> Result<Url, url::ParseError> {
    let path_and_query = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    upstream.join(path_and_query)
}

fn without_hop_by_hop(mut headers: HeaderMap) -> HeaderMap {
    for name in &HOP_BY_HOP {
        headers.remove(name);
    }
    headers.remove("keep-alive");
    headers.remove("proxy-connection");
    headers
}

#[cfg(test)]
#[path = "routes_tests.rs"]
mod tests;
