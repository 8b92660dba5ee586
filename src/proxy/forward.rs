//! Upstream forwarding with pool-driven failover
//!
//! Each attempt selects an endpoint, dials through it and reports the outcome
//! back to the pool. A failed attempt is retried on a fresh selection up to
//! the configured limit.

use std::sync::Arc;

use bytes::Bytes;
use http::header::{self, HeaderMap, HeaderValue};
use http::{Method, Request, Response, StatusCode};
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use tokio::time::timeout;
use tracing::{debug, error, info, instrument, warn};
use url::Url;

use crate::config::UpstreamConfig;
use crate::error::{AuroraError, Result};
use crate::proxy::pool::ProxyPool;
use crate::proxy::transport::{ProxyTransport, RequestForm, UpstreamConnection};

/// Opaque request to relay upstream
#[derive(Debug, Clone)]
pub struct ForwardRequest {
    pub method: Method,
    /// Path and query relative to the upstream base URL
    pub path: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Resolved upstream destination for one request
#[derive(Debug, Clone, PartialEq, Eq)]
struct Target {
    host: String,
    port: u16,
    host_header: String,
    path: String,
}

impl Target {
    fn resolve(upstream: &Url, path: &str) -> Result<Self> {
        let host = upstream
            .host_str()
            .ok_or(AuroraError::UpstreamNotConfigured)?
            .to_string();
        let port = upstream.port_or_known_default().unwrap_or(80);
        let host_header = match upstream.port() {
            Some(p) => format!("{}:{}", host, p),
            None => host.clone(),
        };

        let base = upstream.path().trim_end_matches('/');
        let path = if path.starts_with('/') {
            format!("{}{}", base, path)
        } else {
            format!("{}/{}", base, path)
        };

        Ok(Self {
            host,
            port,
            host_header,
            path,
        })
    }

    fn absolute_uri(&self) -> String {
        format!("http://{}{}", self.host_header, self.path)
    }
}

/// Relays requests to the upstream API through the proxy pool
pub struct Forwarder {
    pool: Arc<ProxyPool>,
    config: UpstreamConfig,
}

impl Forwarder {
    pub fn new(pool: Arc<ProxyPool>, config: UpstreamConfig) -> Self {
        Self { pool, config }
    }

    pub fn pool(&self) -> &Arc<ProxyPool> {
        &self.pool
    }

    /// Forward a request, failing over across pool endpoints
    #[instrument(skip(self, request), fields(method = %request.method, path = %request.path))]
    pub async fn forward(&self, request: ForwardRequest) -> Result<Response<Full<Bytes>>> {
        let upstream = self
            .config
            .url
            .as_ref()
            .ok_or(AuroraError::UpstreamNotConfigured)?;
        let target = Target::resolve(upstream, &request.path)?;

        let max_attempts = self.config.max_retries.saturating_add(1);
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            let endpoint = match self.pool.select() {
                Ok(endpoint) => endpoint,
                Err(AuroraError::PoolExhausted) if self.config.direct_fallback => {
                    warn!("Proxy pool exhausted, sending request directly");
                    return self.send_direct(&target, &request).await;
                }
                Err(e) => {
                    error!("No proxy available: {}", e);
                    return Err(e);
                }
            };

            // Dropping the guard (request cancelled) counts as a failure
            let guard = self.pool.track(&endpoint);

            debug!(
                "Forwarding through proxy {} (attempt {}/{})",
                endpoint.address, attempt, max_attempts
            );

            let connect = timeout(
                self.config.connect_timeout,
                ProxyTransport::connect(&endpoint.address, &target.host, target.port),
            )
            .await
            .map_err(|_| AuroraError::Timeout)
            .and_then(|r| r);

            let result = match connect {
                Ok(conn) => self.exchange(conn, &target, &request).await,
                Err(e) => Err(e),
            };

            match result {
                Ok(response) if response.status() == StatusCode::PROXY_AUTHENTICATION_REQUIRED => {
                    warn!(
                        "Proxy {} rejected credentials (attempt {}/{})",
                        endpoint.address, attempt, max_attempts
                    );
                    guard.failure();
                    last_error = Some(AuroraError::ProxyConnectionFailed(
                        "proxy authentication required".into(),
                    ));
                }
                Ok(response) => {
                    guard.success();
                    info!(
                        "{} {} via {} -> {}",
                        request.method,
                        target.path,
                        endpoint.address,
                        response.status()
                    );
                    return Ok(response);
                }
                Err(e @ AuroraError::ResponseTooLarge { .. }) => {
                    // the proxy delivered; another one would fetch the same body
                    guard.success();
                    warn!("Dropping upstream response via {}: {}", endpoint.address, e);
                    return Err(e);
                }
                Err(e) => {
                    warn!(
                        "Request through {} failed: {} (attempt {}/{})",
                        endpoint.address, e, attempt, max_attempts
                    );
                    guard.failure();
                    last_error = Some(e);
                }
            }
        }

        error!(
            "All upstream attempts failed after {} attempts: {}",
            max_attempts,
            last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown error".into())
        );
        Err(AuroraError::AttemptsExhausted {
            attempts: max_attempts,
        })
    }

    async fn send_direct(
        &self,
        target: &Target,
        request: &ForwardRequest,
    ) -> Result<Response<Full<Bytes>>> {
        let conn = timeout(
            self.config.connect_timeout,
            ProxyTransport::connect_direct(&target.host, target.port),
        )
        .await
        .map_err(|_| AuroraError::Timeout)??;

        self.exchange(conn, target, request).await
    }

    /// Send one HTTP/1.1 request over an established connection
    async fn exchange(
        &self,
        conn: UpstreamConnection,
        target: &Target,
        request: &ForwardRequest,
    ) -> Result<Response<Full<Bytes>>> {
        let uri = match &conn.form {
            RequestForm::Origin => target.path.clone(),
            RequestForm::Absolute { .. } => target.absolute_uri(),
        };

        let mut builder = Request::builder().method(request.method.clone()).uri(&uri);

        for (name, value) in &request.headers {
            if !is_hop_by_hop_header(name.as_str())
                && *name != header::HOST
                && *name != header::AUTHORIZATION
                && *name != header::CONTENT_LENGTH
            {
                builder = builder.header(name, value);
            }
        }

        builder = builder.header(header::HOST, &target.host_header);

        if let Some(key) = &self.config.api_key {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", key));
        }

        if let RequestForm::Absolute {
            proxy_authorization: Some(credentials),
        } = &conn.form
        {
            builder = builder.header(header::PROXY_AUTHORIZATION, credentials);
        }

        let outbound = builder
            .body(Full::new(request.body.clone()))
            .map_err(|e| AuroraError::InvalidRequest(format!("Failed to build request: {}", e)))?;

        let io = hyper_util::rt::TokioIo::new(conn.stream);
        let (mut sender, connection) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| AuroraError::ProxyConnectionFailed(format!("Handshake failed: {}", e)))?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                debug!("Upstream connection ended: {}", e);
            }
        });

        let exchange = async {
            let response = sender.send_request(outbound).await.map_err(|e| {
                AuroraError::ProxyConnectionFailed(format!("Request failed: {}", e))
            })?;

            let (mut parts, body) = response.into_parts();
            let limit = self.config.max_response_bytes;
            let body = Limited::new(body, limit)
                .collect()
                .await
                .map_err(|e| {
                    if e.is::<LengthLimitError>() {
                        AuroraError::ResponseTooLarge { limit }
                    } else {
                        AuroraError::ProxyConnectionFailed(format!(
                            "Failed to read response: {}",
                            e
                        ))
                    }
                })?
                .to_bytes();

            strip_hop_by_hop(&mut parts.headers);
            Ok::<_, AuroraError>(Response::from_parts(parts, Full::new(body)))
        };

        timeout(self.config.request_timeout, exchange)
            .await
            .map_err(|_| AuroraError::Timeout)?
    }
}

fn strip_hop_by_hop(headers: &mut HeaderMap<HeaderValue>) {
    let names: Vec<_> = headers
        .keys()
        .filter(|name| is_hop_by_hop_header(name.as_str()))
        .cloned()
        .collect();
    for name in names {
        headers.remove(&name);
    }
    headers.remove(header::CONTENT_LENGTH);
}

/// Check if a header is a hop-by-hop header that should not be forwarded
fn is_hop_by_hop_header(name: &str) -> bool {
    matches!(
        name.to_lowercase().as_str(),
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
    use std::net::SocketAddr;
    use std::time::Duration;

    use axum::routing::{get, post};
    use axum::Router;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    use crate::models::{EndpointStatus, ProxyAddress, ProxyEndpoint};

    async fn spawn_server(router: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        addr
    }

    /// Answers like an HTTP proxy would after relaying, echoing what it saw
    fn echo_router() -> Router {
        Router::new()
            .route(
                "/v1/chat/completions",
                post(|headers: HeaderMap, body: Bytes| async move {
                    let auth = headers
                        .get(header::AUTHORIZATION)
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("")
                        .to_string();
                    let proxy_auth = headers.contains_key(header::PROXY_AUTHORIZATION);
                    format!("{}|{}|{}", auth, proxy_auth, String::from_utf8_lossy(&body))
                }),
            )
            .route("/v1/models", get(|| async { "models" }))
    }

    /// Minimal no-auth SOCKS5 server that tunnels to whatever target is requested
    async fn spawn_socks5_server() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let (mut client, _) = listener.accept().await.unwrap();
                tokio::spawn(async move {
                    let mut greeting = [0u8; 2];
                    client.read_exact(&mut greeting).await.unwrap();
                    let mut methods = vec![0u8; greeting[1] as usize];
                    client.read_exact(&mut methods).await.unwrap();
                    client.write_all(&[5, 0]).await.unwrap();

                    let mut request = [0u8; 4];
                    client.read_exact(&mut request).await.unwrap();
                    let host = match request[3] {
                        1 => {
                            let mut ip = [0u8; 4];
                            client.read_exact(&mut ip).await.unwrap();
                            std::net::Ipv4Addr::from(ip).to_string()
                        }
                        3 => {
                            let mut len = [0u8; 1];
                            client.read_exact(&mut len).await.unwrap();
                            let mut name = vec![0u8; len[0] as usize];
                            client.read_exact(&mut name).await.unwrap();
                            String::from_utf8(name).unwrap()
                        }
                        4 => {
                            let mut ip = [0u8; 16];
                            client.read_exact(&mut ip).await.unwrap();
                            std::net::Ipv6Addr::from(ip).to_string()
                        }
                        other => panic!("unexpected address type {}", other),
                    };
                    let mut port = [0u8; 2];
                    client.read_exact(&mut port).await.unwrap();
                    let port = u16::from_be_bytes(port);

                    let mut target = TcpStream::connect((host.as_str(), port)).await.unwrap();
                    client
                        .write_all(&[5, 0, 0, 1, 0, 0, 0, 0, 0, 0])
                        .await
                        .unwrap();
                    let _ = tokio::io::copy_bidirectional(&mut client, &mut target).await;
                });
            }
        });
        addr
    }

    async fn refused_addr() -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        addr
    }

    fn upstream(url: &str) -> UpstreamConfig {
        UpstreamConfig {
            url: Some(Url::parse(url).unwrap()),
            api_key: Some("upstream-key".into()),
            connect_timeout: Duration::from_secs(2),
            request_timeout: Duration::from_secs(5),
            max_retries: 2,
            direct_fallback: false,
            max_response_bytes: 1024 * 1024,
        }
    }

    fn pool_of(addrs: &[String]) -> Arc<ProxyPool> {
        Arc::new(ProxyPool::with_endpoints(
            addrs
                .iter()
                .map(|a| {
                    ProxyEndpoint::new(ProxyAddress::parse(a).unwrap())
                        .with_status(EndpointStatus::Healthy)
                })
                .collect(),
            3,
        ))
    }

    fn chat_request(body: &'static str) -> ForwardRequest {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer gateway-token"));
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        ForwardRequest {
            method: Method::POST,
            path: "/v1/chat/completions".into(),
            headers,
            body: Bytes::from_static(body.as_bytes()),
        }
    }

    async fn body_string(response: Response<Full<Bytes>>) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn test_target_resolution() {
        let url = Url::parse("http://api.internal:8000/openai/").unwrap();
        let target = Target::resolve(&url, "/v1/models").unwrap();
        assert_eq!(target.host, "api.internal");
        assert_eq!(target.port, 8000);
        assert_eq!(target.host_header, "api.internal:8000");
        assert_eq!(target.path, "/openai/v1/models");
        assert_eq!(
            target.absolute_uri(),
            "http://api.internal:8000/openai/v1/models"
        );

        let url = Url::parse("http://api.internal").unwrap();
        let target = Target::resolve(&url, "v1/models").unwrap();
        assert_eq!(target.port, 80);
        assert_eq!(target.host_header, "api.internal");
        assert_eq!(target.path, "/v1/models");
    }

    #[test]
    fn test_hop_by_hop_headers() {
        assert!(is_hop_by_hop_header("Connection"));
        assert!(is_hop_by_hop_header("proxy-authorization"));
        assert!(!is_hop_by_hop_header("content-type"));
    }

    #[tokio::test]
    async fn test_forward_through_http_proxy() {
        let proxy = spawn_server(echo_router()).await;
        let pool = pool_of(&[format!("http://u:p@{}", proxy)]);
        let forwarder = Forwarder::new(pool.clone(), upstream("http://upstream.test"));

        let response = forwarder.forward(chat_request("{\"q\":1}")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_string(response).await,
            "Bearer upstream-key|true|{\"q\":1}"
        );
        assert_eq!(pool.snapshot()[0].consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_forward_fails_over_to_next_proxy() {
        let dead = refused_addr().await;
        let live = spawn_server(echo_router()).await;
        let pool = pool_of(&[format!("http://{}", dead), format!("http://{}", live)]);
        let forwarder = Forwarder::new(pool.clone(), upstream("http://upstream.test"));

        let response = forwarder.forward(chat_request("hi")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let snapshot = pool.snapshot();
        assert_eq!(snapshot[0].consecutive_failures, 1);
        assert_eq!(snapshot[0].status, EndpointStatus::Degraded);
        assert_eq!(snapshot[1].status, EndpointStatus::Healthy);
    }

    #[tokio::test]
    async fn test_forward_all_attempts_fail() {
        let dead = refused_addr().await;
        let pool = pool_of(&[format!("http://{}", dead)]);
        let forwarder = Forwarder::new(pool.clone(), upstream("http://upstream.test"));

        let err = forwarder.forward(chat_request("hi")).await.unwrap_err();
        assert!(matches!(err, AuroraError::AttemptsExhausted { attempts: 3 }));
        assert_eq!(pool.snapshot()[0].status, EndpointStatus::Evicted);

        // evicted now, so the next call cannot even select
        let err = forwarder.forward(chat_request("hi")).await.unwrap_err();
        assert!(matches!(err, AuroraError::PoolExhausted));
    }

    #[tokio::test]
    async fn test_empty_pool_without_fallback_is_exhausted() {
        let forwarder = Forwarder::new(Arc::new(ProxyPool::new(3)), upstream("http://upstream.test"));
        let err = forwarder.forward(chat_request("hi")).await.unwrap_err();
        assert!(matches!(err, AuroraError::PoolExhausted));
    }

    #[tokio::test]
    async fn test_empty_pool_with_direct_fallback() {
        let upstream_addr = spawn_server(echo_router()).await;
        let mut config = upstream(&format!("http://{}", upstream_addr));
        config.direct_fallback = true;
        let forwarder = Forwarder::new(Arc::new(ProxyPool::new(3)), config);

        let response = forwarder.forward(chat_request("direct")).await.unwrap();
        assert_eq!(body_string(response).await, "Bearer upstream-key|false|direct");
    }

    #[tokio::test]
    async fn test_upstream_not_configured() {
        let config = UpstreamConfig::default();
        let forwarder = Forwarder::new(Arc::new(ProxyPool::new(3)), config);
        let err = forwarder.forward(chat_request("hi")).await.unwrap_err();
        assert!(matches!(err, AuroraError::UpstreamNotConfigured));
    }

    #[tokio::test]
    async fn test_proxy_auth_required_counts_as_failure() {
        let rejecting = spawn_server(Router::new().route(
            "/v1/chat/completions",
            post(|| async { StatusCode::PROXY_AUTHENTICATION_REQUIRED }),
        ))
        .await;
        let live = spawn_server(echo_router()).await;
        let pool = pool_of(&[format!("http://{}", rejecting), format!("http://{}", live)]);
        let forwarder = Forwarder::new(pool.clone(), upstream("http://upstream.test"));

        let response = forwarder.forward(chat_request("hi")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, "Bearer upstream-key|false|hi");

        let snapshot = pool.snapshot();
        assert_eq!(snapshot[0].consecutive_failures, 1);
        assert_eq!(snapshot[0].status, EndpointStatus::Degraded);
        assert_eq!(snapshot[1].consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_max_retries_at_limit() {
        let live = spawn_server(echo_router()).await;
        let pool = pool_of(&[format!("http://{}", live)]);
        let mut config = upstream("http://upstream.test");
        config.max_retries = u32::MAX;
        let forwarder = Forwarder::new(pool, config);

        let response = forwarder.forward(chat_request("hi")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let forwarder = Forwarder::new(Arc::new(ProxyPool::new(3)), {
            let mut config = upstream("http://upstream.test");
            config.max_retries = u32::MAX;
            config
        });
        let err = forwarder.forward(chat_request("hi")).await.unwrap_err();
        assert!(matches!(err, AuroraError::PoolExhausted));
    }

    #[tokio::test]
    async fn test_forward_through_socks5_tunnel() {
        let upstream_addr = spawn_server(echo_router()).await;
        let socks = spawn_socks5_server().await;

        for scheme in ["socks5", "socks5h"] {
            let pool = pool_of(&[format!("{}://{}", scheme, socks)]);
            let forwarder =
                Forwarder::new(pool.clone(), upstream(&format!("http://{}", upstream_addr)));

            let response = forwarder.forward(chat_request("tunneled")).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(
                body_string(response).await,
                "Bearer upstream-key|false|tunneled"
            );
            assert_eq!(pool.snapshot()[0].status, EndpointStatus::Healthy);
        }
    }

    #[tokio::test]
    async fn test_oversized_response_is_rejected() {
        let proxy = spawn_server(Router::new().route(
            "/v1/models",
            get(|| async { "x".repeat(4096) }),
        ))
        .await;
        let pool = pool_of(&[format!("http://{}", proxy)]);
        let mut config = upstream("http://upstream.test");
        config.max_response_bytes = 1024;
        let forwarder = Forwarder::new(pool.clone(), config);

        let request = ForwardRequest {
            method: Method::GET,
            path: "/v1/models".into(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
        };
        let err = forwarder.forward(request).await.unwrap_err();
        assert!(matches!(err, AuroraError::ResponseTooLarge { limit: 1024 }));
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);

        let snapshot = pool.snapshot();
        assert_eq!(snapshot[0].status, EndpointStatus::Healthy);
        assert_eq!(snapshot[0].consecutive_failures, 0);
    }
}
