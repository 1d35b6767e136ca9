//! Forward HTTP proxy listener.
//!
//! Binds to `proxy.port` and accepts absolute-form requests
//! (`POST http://host/path HTTP/1.1`). Every request goes through
//! [`DlpAddon::request`] and is forwarded upstream only if the pipeline did
//! not answer it. `CONNECT` is refused, since a tunnelled TLS body cannot be
//! inspected.

use std::sync::Arc;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::extract::{Request, State};
use axum::http::header::{CONNECTION, CONTENT_LENGTH, HOST};
use axum::http::uri::Authority;
use axum::http::{HeaderMap, HeaderName, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::addon::{DlpAddon, InterceptedRequest, SyntheticResponse};
use crate::error::Result;

const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Shared state for the proxy handler.
pub struct ProxyState {
    pub addon: Arc<DlpAddon>,
    pub client: reqwest::Client,
}

impl ProxyState {
    /// The upstream client ignores `HTTP_PROXY` and friends so traffic never
    /// loops back through this listener.
    pub fn new(addon: Arc<DlpAddon>) -> Result<Self> {
        let client = reqwest::Client::builder().no_proxy().build()?;
        Ok(Self { addon, client })
    }
}

pub fn router(state: Arc<ProxyState>) -> Router {
    Router::new().fallback(forward).with_state(state)
}

/// Start the proxy listener on the given address.
pub async fn start(listen_addr: &str, state: Arc<ProxyState>) -> Result<()> {
    let listener = TcpListener::bind(listen_addr).await?;
    info!("DLP proxy listening on {}", listen_addr);
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn forward(State(state): State<Arc<ProxyState>>, request: Request) -> Response {
    if request.method() == Method::CONNECT {
        warn!("Refusing CONNECT to {}", request.uri());
        return (
            StatusCode::NOT_IMPLEMENTED,
            "CONNECT is not supported: tunnelled TLS cannot be inspected",
        )
            .into_response();
    }

    let (parts, body) = request.into_parts();
    let target = parts.uri.authority().cloned();
    let host = target
        .clone()
        .or_else(|| {
            parts
                .headers
                .get(HOST)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<Authority>().ok())
        })
        .map(|a| a.host().to_string())
        .unwrap_or_default();
    let path = parts
        .uri
        .path_and_query()
        .map(|p| p.as_str())
        .unwrap_or("/");

    let mut flow = InterceptedRequest::new(parts.method.clone(), host, path);
    flow.scheme = parts.uri.scheme_str().unwrap_or("http").to_string();
    flow.headers = parts.headers;

    let limit = state.addon.max_body_bytes();
    let declared = flow
        .headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());
    match declared {
        Some(len) if len > limit => {
            state.addon.reject_oversize(&mut flow, len);
        }
        _ => match to_bytes(body, limit).await {
            Ok(bytes) => {
                flow.body = bytes.to_vec();
                state.addon.request(&mut flow).await;
            }
            Err(e) => {
                // Undeclared bodies past the limit fail here as well.
                debug!("Body read for {} stopped: {}", flow.pretty_url(), e);
                state.addon.reject_oversize(&mut flow, limit.saturating_add(1));
            }
        },
    }

    if let Some(response) = flow.response.take() {
        return synthetic(response);
    }

    // Origin-form requests would be sent back to this listener.
    let Some(target) = target else {
        return (
            StatusCode::BAD_REQUEST,
            "Proxy requests need an absolute-form URI",
        )
            .into_response();
    };

    let url = format!("{}://{}{}", flow.scheme, target, flow.path);
    let mut headers = flow.headers;
    strip_hop_by_hop(&mut headers);
    headers.remove(HOST);
    headers.remove(CONTENT_LENGTH);

    debug!("Forwarding {} {}", flow.method, url);
    match state
        .client
        .request(flow.method, &url)
        .headers(headers)
        .body(flow.body)
        .send()
        .await
    {
        Ok(upstream) => relay(upstream),
        Err(e) => {
            warn!("Upstream request to {} failed: {}", url, e);
            (StatusCode::BAD_GATEWAY, format!("Upstream request failed: {}", e)).into_response()
        }
    }
}

/// Stream the upstream response back to the client.
fn relay(upstream: reqwest::Response) -> Response {
    let status = upstream.status();
    let mut headers = upstream.headers().clone();
    strip_hop_by_hop(&mut headers);
    headers.remove(CONTENT_LENGTH);

    let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

fn synthetic(answer: SyntheticResponse) -> Response {
    let mut response = Response::new(Body::from(answer.body));
    *response.status_mut() = answer.status;
    *response.headers_mut() = answer.headers;
    response
}

/// Remove hop-by-hop headers, including any listed in `Connection`.
fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();
    for name in listed {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(*name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn strips_hop_by_hop_and_connection_listed_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(CONNECTION, HeaderValue::from_static("keep-alive, x-session-hint"));
        headers.insert("keep-alive", HeaderValue::from_static("timeout=5"));
        headers.insert("x-session-hint", HeaderValue::from_static("abc"));
        headers.insert("proxy-authorization", HeaderValue::from_static("Basic Zm9v"));
        headers.insert("authorization", HeaderValue::from_static("Bearer sk-test"));

        strip_hop_by_hop(&mut headers);

        assert_eq!(headers.len(), 1);
        assert_eq!(headers["authorization"], "Bearer sk-test");
    }

    #[test]
    fn synthetic_response_keeps_status_and_headers() {
        let mut answer = SyntheticResponse::text(StatusCode::PAYLOAD_TOO_LARGE, "too big");
        answer
            .headers
            .insert("x-request-id", HeaderValue::from_static("req-1"));
        let response = synthetic(answer);
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(response.headers()["x-request-id"], "req-1");
    }
}
