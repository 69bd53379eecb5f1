//! Upstream dispatch with connection pooling and a hard deadline

use crate::ForwardPolicy;
use async_trait::async_trait;
use http_body_util::{BodyExt, Full};
use hyper::header::HeaderName;
use hyper::{body::Bytes, header, HeaderMap, Request, Response};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::tokio::TokioExecutor;
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout as tokio_timeout;
use tracing::{debug, warn};

/// Failure to obtain a complete response from an upstream
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("upstream did not respond within {0:?}")]
    Timeout(Duration),

    #[error("error communicating with upstream: {0}")]
    Connect(String),

    #[error("error reading upstream response body: {0}")]
    Body(String),

    #[error("unsupported upstream scheme: {0}")]
    UnsupportedScheme(String),
}

/// Sends a fully-built request to an upstream and returns its complete response.
///
/// Dropping the returned future abandons the upstream request.
#[async_trait]
pub trait Upstream: Send + Sync {
    async fn dispatch(
        &self,
        request: Request<Full<Bytes>>,
    ) -> Result<Response<Bytes>, DispatchError>;
}

/// HTTP request forwarder backed by a pooled hyper client
pub struct RequestForwarder {
    client: Client<HttpConnector, Full<Bytes>>,
    timeout: Duration,
}

impl RequestForwarder {
    pub fn new(policy: &ForwardPolicy) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(policy.connect_timeout));
        connector.set_keepalive(Some(Duration::from_secs(30)));

        let client = Client::builder(TokioExecutor::new()).build::<_, Full<Bytes>>(connector);

        Self {
            client,
            timeout: policy.upstream_timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn round_trip(
        &self,
        request: Request<Full<Bytes>>,
    ) -> Result<Response<Bytes>, DispatchError> {
        let response = self
            .client
            .request(request)
            .await
            .map_err(|e| DispatchError::Connect(e.to_string()))?;

        debug!("Upstream responded with status: {}", response.status());

        let (mut parts, body) = response.into_parts();
        let body = body
            .collect()
            .await
            .map_err(|e| DispatchError::Body(e.to_string()))?
            .to_bytes();

        // The body is re-framed on the way back to the caller
        strip_hop_by_hop(&mut parts.headers);

        debug!("Upstream response body size: {} bytes", body.len());
        Ok(Response::from_parts(parts, body))
    }
}

impl Default for RequestForwarder {
    fn default() -> Self {
        Self::new(&ForwardPolicy::default())
    }
}

#[async_trait]
impl Upstream for RequestForwarder {
    async fn dispatch(
        &self,
        mut request: Request<Full<Bytes>>,
    ) -> Result<Response<Bytes>, DispatchError> {
        if let Some(scheme) = request.uri().scheme_str() {
            if scheme != "http" {
                warn!("Upstream scheme not supported without TLS: {}", request.uri());
                return Err(DispatchError::UnsupportedScheme(scheme.to_string()));
            }
        }

        let headers = request.headers_mut();
        strip_hop_by_hop(headers);
        // Let the client derive Host from the upstream uri
        headers.remove(header::HOST);

        debug!(
            "Dispatching {} {} with {:?} timeout",
            request.method(),
            request.uri(),
            self.timeout
        );

        match tokio_timeout(self.timeout, self.round_trip(request)).await {
            Ok(result) => result,
            Err(_) => {
                warn!("Upstream request timeout after {:?}", self.timeout);
                Err(DispatchError::Timeout(self.timeout))
            }
        }
    }
}

/// Remove hop-by-hop headers, which must not cross the proxy.
///
/// Headers named by the `Connection` header's tokens are hop-by-hop too.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let mut hop_by_hop: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|token| HeaderName::from_bytes(token.trim().as_bytes()).ok())
        .collect();
    hop_by_hop.extend(
        headers
            .keys()
            .filter(|k| is_hop_by_hop_header(k.as_str()))
            .cloned(),
    );
    for name in hop_by_hop {
        headers.remove(name);
    }
}

/// Check if header is hop-by-hop (should not be forwarded)
fn is_hop_by_hop_header(name: &str) -> bool {
    matches!(
        name.to_ascii_lowercase().as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailers"
            | "transfer-encoding"
            | "upgrade"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::header::HeaderValue;
    use std::net::TcpListener as StdTcpListener;

    #[test]
    fn test_forwarder_takes_policy_timeout() {
        let policy = ForwardPolicy::default().with_upstream_timeout(Duration::from_secs(3));
        let forwarder = RequestForwarder::new(&policy);
        assert_eq!(forwarder.timeout(), Duration::from_secs(3));
    }

    #[test]
    fn test_hop_by_hop_headers() {
        assert!(is_hop_by_hop_header("connection"));
        assert!(is_hop_by_hop_header("Keep-Alive"));
        assert!(is_hop_by_hop_header("transfer-encoding"));
        assert!(!is_hop_by_hop_header("content-type"));
        assert!(!is_hop_by_hop_header("authorization"));
        assert!(!is_hop_by_hop_header("x-service-id"));
    }

    #[test]
    fn test_strip_hop_by_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
        headers.insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert("x-request-id", HeaderValue::from_static("abc"));

        strip_hop_by_hop(&mut headers);

        assert_eq!(headers.len(), 2);
        assert!(headers.contains_key(header::CONTENT_TYPE));
        assert!(headers.contains_key("x-request-id"));
    }

    #[test]
    fn test_strip_headers_named_by_connection() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONNECTION,
            HeaderValue::from_static("close, X-Session-Hint ,x-trace-local"),
        );
        headers.insert("x-session-hint", HeaderValue::from_static("sticky"));
        headers.insert("x-trace-local", HeaderValue::from_static("1"));
        headers.insert("x-request-id", HeaderValue::from_static("abc"));

        strip_hop_by_hop(&mut headers);

        assert_eq!(headers.len(), 1);
        assert!(headers.contains_key("x-request-id"));
    }

    #[tokio::test]
    async fn test_https_upstream_is_rejected_without_connecting() {
        let forwarder = RequestForwarder::default();
        let request = Request::get("https://svc-b.internal/ping")
            .body(Full::new(Bytes::new()))
            .unwrap();
        assert_eq!(
            forwarder.dispatch(request).await.unwrap_err(),
            DispatchError::UnsupportedScheme("https".to_string())
        );
    }

    #[tokio::test]
    async fn test_refused_connection_is_connect_error() {
        // Reserve a port, then free it so nothing is listening there
        let port = StdTcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();

        let forwarder = RequestForwarder::default();
        let request = Request::get(format!("http://127.0.0.1:{}/ping", port))
            .body(Full::new(Bytes::new()))
            .unwrap();

        let err = forwarder.dispatch(request).await.unwrap_err();
        assert!(matches!(err, DispatchError::Connect(_)), "{:?}", err);
    }
}
