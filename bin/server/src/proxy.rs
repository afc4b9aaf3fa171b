//! Forwarding of admitted requests to the upstream target.

use axum::body::Body;
use axum::extract::{ConnectInfo, Request};
use axum::http::header::{
    CONNECTION, HOST, PROXY_AUTHENTICATE, PROXY_AUTHORIZATION, TE, TRAILER, TRANSFER_ENCODING,
    UPGRADE,
};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use portcullis_core::Result;
use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::{debug, error};
use url::Url;

use crate::error::StartupError;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

const KEEP_ALIVE: HeaderName = HeaderName::from_static("keep-alive");
const PROXY_CONNECTION: HeaderName = HeaderName::from_static("proxy-connection");
const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");
const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");

/// Headers that describe one connection and must not cross the proxy.
const HOP_BY_HOP: [HeaderName; 9] = [
    CONNECTION,
    KEEP_ALIVE,
    PROXY_AUTHENTICATE,
    PROXY_AUTHORIZATION,
    PROXY_CONNECTION,
    TE,
    TRAILER,
    TRANSFER_ENCODING,
    UPGRADE,
];

/// The upstream could not be reached.
#[derive(Debug)]
pub struct ProxyError {
    details: String,
}

impl fmt::Display for ProxyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "upstream request failed: {}", self.details)
    }
}

impl std::error::Error for ProxyError {}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        error!(error = %self.details, "Upstream request failed");
        (StatusCode::BAD_GATEWAY, "Bad gateway").into_response()
    }
}

/// Streams requests to the upstream target and relays its responses.
pub struct Forwarder {
    client: reqwest::Client,
    target: Url,
}

impl Forwarder {
    /// Creates a forwarder for `target`.
    ///
    /// # Errors
    ///
    /// Fails if the HTTP client cannot be built.
    pub fn new(target: Url) -> Result<Self, StartupError> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| StartupError::Init {
                component: "upstream client".to_string(),
                details: e.to_string(),
            })?;
        Ok(Self { client, target })
    }

    /// Sends `request` upstream.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError`] if the upstream does not produce a response.
    pub async fn forward(&self, request: Request) -> std::result::Result<Response, ProxyError> {
        let (parts, body) = request.into_parts();
        let url = rewrite_target(&self.target, parts.uri.path(), parts.uri.query());
        debug!(method = %parts.method, upstream = %url, "Forwarding request");

        let client_addr = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());
        let original_host = parts.headers.get(HOST).cloned();

        let mut headers = parts.headers;
        strip_hop_by_hop(&mut headers);
        headers.remove(HOST);
        if let Some(host) = original_host {
            headers.insert(X_FORWARDED_HOST, host);
        }
        if !headers.contains_key(&X_FORWARDED_PROTO) {
            headers.insert(X_FORWARDED_PROTO, HeaderValue::from_static("http"));
        }
        if let Some(ip) = client_addr {
            let forwarded_for = match headers.get(&X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
                Some(prior) => format!("{prior}, {ip}"),
                None => ip.to_string(),
            };
            if let Ok(value) = HeaderValue::from_str(&forwarded_for) {
                headers.insert(X_FORWARDED_FOR, value);
            }
        }

        let upstream = self
            .client
            .request(parts.method, url)
            .headers(headers)
            .body(reqwest::Body::wrap_stream(body.into_data_stream()))
            .send()
            .await
            .map_err(|e| ProxyError {
                details: e.to_string(),
            })?;

        let status = upstream.status();
        let mut response_headers = upstream.headers().clone();
        strip_hop_by_hop(&mut response_headers);

        let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
        *response.status_mut() = status;
        *response.headers_mut() = response_headers;
        Ok(response)
    }
}

/// Removes hop-by-hop headers, including those named by `Connection`.
fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();
    for name in listed.iter().chain(HOP_BY_HOP.iter()) {
        headers.remove(name);
    }
}

/// Splices an inbound path and query onto the upstream target.
///
/// Paths are joined with exactly one `/` at the seam. The target's own query
/// comes first, followed by the request's.
#[must_use]
pub fn rewrite_target(target: &Url, path: &str, query: Option<&str>) -> Url {
    let mut url = target.clone();
    url.set_path(&join_paths(target.path(), path));

    let merged = match (target.query().filter(|q| !q.is_empty()), query.filter(|q| !q.is_empty())) {
        (Some(base), Some(extra)) => Some(format!("{base}&{extra}")),
        (Some(base), None) => Some(base.to_string()),
        (None, Some(extra)) => Some(extra.to_string()),
        (None, None) => None,
    };
    url.set_query(merged.as_deref());
    url
}

fn join_paths(base: &str, path: &str) -> String {
    match (base.ends_with('/'), path.starts_with('/')) {
        (true, true) => format!("{base}{}", &path[1..]),
        (false, false) => format!("{base}/{path}"),
        _ => format!("{base}{path}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Method;
    use wiremock::matchers::{header, header_exists, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn url(s: &str) -> Url {
        Url::parse(s).expect("url")
    }

    #[test]
    fn target_path_and_query_are_prefixed() {
        let rewritten = rewrite_target(
            &url("https://api.example.com/svc?env=prod"),
            "/users/7",
            Some("x=1"),
        );

        assert_eq!(rewritten.path(), "/svc/users/7");
        assert_eq!(rewritten.query(), Some("env=prod&x=1"));
        assert_eq!(rewritten.host_str(), Some("api.example.com"));
    }

    #[test]
    fn single_slash_at_the_seam() {
        assert_eq!(join_paths("/svc/", "/users"), "/svc/users");
        assert_eq!(join_paths("/svc", "/users"), "/svc/users");
        assert_eq!(join_paths("/svc/", "users"), "/svc/users");
        assert_eq!(join_paths("/svc", "users"), "/svc/users");
        assert_eq!(
            rewrite_target(&url("http://backend:8080"), "/a/b", None).as_str(),
            "http://backend:8080/a/b"
        );
    }

    #[test]
    fn queries_from_either_side_survive() {
        assert_eq!(
            rewrite_target(&url("http://backend/"), "/", Some("q=1")).query(),
            Some("q=1")
        );
        assert_eq!(
            rewrite_target(&url("http://backend/?k=v"), "/", None).query(),
            Some("k=v")
        );
        assert_eq!(rewrite_target(&url("http://backend/"), "/", None).query(), None);
    }

    #[test]
    fn hop_by_hop_headers_are_stripped() {
        let mut headers = HeaderMap::new();
        headers.insert(CONNECTION, HeaderValue::from_static("close, x-session-hint"));
        headers.insert("x-session-hint", HeaderValue::from_static("1"));
        headers.insert(TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        headers.insert("accept", HeaderValue::from_static("text/html"));

        strip_hop_by_hop(&mut headers);

        assert!(!headers.contains_key(CONNECTION));
        assert!(!headers.contains_key("x-session-hint"));
        assert!(!headers.contains_key(TRANSFER_ENCODING));
        assert!(headers.contains_key("accept"));
    }

    #[tokio::test]
    async fn forwards_to_rewritten_url_and_relays_response() {
        let upstream = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/svc/items"))
            .and(query_param("env", "prod"))
            .and(query_param("page", "2"))
            .and(header("x-forwarded-host", "gate.example.com"))
            .and(header_exists("x-forwarded-proto"))
            .respond_with(
                ResponseTemplate::new(201)
                    .insert_header("x-upstream", "yes")
                    .set_body_string("created"),
            )
            .mount(&upstream)
            .await;
        let forwarder =
            Forwarder::new(url(&format!("{}/svc?env=prod", upstream.uri()))).expect("forwarder");

        let request = Request::builder()
            .method(Method::POST)
            .uri("/items?page=2")
            .header(HOST, "gate.example.com")
            .body(Body::from("payload"))
            .expect("request");
        let response = forwarder.forward(request).await.expect("response");

        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.headers()["x-upstream"], "yes");
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        assert_eq!(&body[..], b"created");
    }

    #[tokio::test]
    async fn unreachable_upstream_is_bad_gateway() {
        let forwarder = Forwarder::new(url("http://127.0.0.1:9/")).expect("forwarder");
        let request = Request::builder()
            .uri("/")
            .body(Body::empty())
            .expect("request");

        let Err(err) = forwarder.forward(request).await else {
            panic!("expected upstream failure");
        };

        assert_eq!(err.into_response().status(), StatusCode::BAD_GATEWAY);
    }
}
