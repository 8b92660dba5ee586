//! Dialing the upstream API through a pooled proxy
//!
//! HTTP proxies receive absolute-form requests on a plain TCP connection;
//! SOCKS5 proxies open a tunnel to the target and carry origin-form requests.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use tokio::net::TcpStream;
use tokio_socks::tcp::Socks5Stream;
use tracing::{debug, instrument};

use crate::error::{AuroraError, Result};
use crate::models::{ProxyAddress, ProxyScheme};

/// How the request line must be written on a connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestForm {
    /// `GET /path HTTP/1.1`, straight to the target or through a tunnel
    Origin,
    /// `GET http://host/path HTTP/1.1`, to an HTTP proxy
    Absolute {
        proxy_authorization: Option<String>,
    },
}

/// A connected stream plus the request form it expects
#[derive(Debug)]
pub struct UpstreamConnection {
    pub stream: TcpStream,
    pub form: RequestForm,
}

/// Proxy transport handler
pub struct ProxyTransport;

impl ProxyTransport {
    /// Connect to a target through the given proxy
    #[instrument(skip(proxy), fields(proxy = %proxy, target = %target_host))]
    pub async fn connect(
        proxy: &ProxyAddress,
        target_host: &str,
        target_port: u16,
    ) -> Result<UpstreamConnection> {
        match proxy.scheme {
            ProxyScheme::Http | ProxyScheme::Https => Self::connect_http(proxy).await,
            ProxyScheme::Socks5 | ProxyScheme::Socks5h => {
                Self::connect_socks5(proxy, target_host, target_port).await
            }
        }
    }

    /// Connect to the target without any proxy
    pub async fn connect_direct(target_host: &str, target_port: u16) -> Result<UpstreamConnection> {
        let stream = TcpStream::connect(format_tcp_addr(target_host, target_port))
            .await
            .map_err(|e| AuroraError::ProxyConnectionFailed(format!("TCP connect failed: {}", e)))?;

        Ok(UpstreamConnection {
            stream,
            form: RequestForm::Origin,
        })
    }

    async fn connect_http(proxy: &ProxyAddress) -> Result<UpstreamConnection> {
        debug!("Connecting to HTTP proxy at {}", proxy.authority());

        let stream = TcpStream::connect(proxy.authority()).await.map_err(|e| {
            AuroraError::ProxyConnectionFailed(format!("TCP connect failed: {}", e))
        })?;

        Ok(UpstreamConnection {
            stream,
            form: RequestForm::Absolute {
                proxy_authorization: Self::basic_credentials(proxy),
            },
        })
    }

    async fn connect_socks5(
        proxy: &ProxyAddress,
        target_host: &str,
        target_port: u16,
    ) -> Result<UpstreamConnection> {
        debug!("Connecting to SOCKS5 proxy at {}", proxy.authority());

        let socket = TcpStream::connect(proxy.authority()).await.map_err(|e| {
            AuroraError::ProxyConnectionFailed(format!("TCP connect failed: {}", e))
        })?;

        // socks5h leaves name resolution to the proxy
        let target = if proxy.scheme == ProxyScheme::Socks5h {
            format_tcp_addr(target_host, target_port)
        } else {
            tokio::net::lookup_host((target_host, target_port))
                .await?
                .next()
                .ok_or_else(|| {
                    AuroraError::ProxyConnectionFailed(format!(
                        "could not resolve {}",
                        target_host
                    ))
                })?
                .to_string()
        };

        let stream = match (&proxy.username, &proxy.password) {
            (Some(username), Some(password)) => {
                Socks5Stream::connect_with_password_and_socket(
                    socket,
                    target.as_str(),
                    username,
                    password,
                )
                .await
            }
            _ => Socks5Stream::connect_with_socket(socket, target.as_str()).await,
        }
        .map_err(|e| AuroraError::ProxyConnectionFailed(format!("SOCKS5 connect failed: {}", e)))?;

        debug!("SOCKS5 connection established");
        Ok(UpstreamConnection {
            stream: stream.into_inner(),
            form: RequestForm::Origin,
        })
    }

    /// `Basic` credentials for an HTTP proxy, if the address carries a user
    pub fn basic_credentials(proxy: &ProxyAddress) -> Option<String> {
        let username = proxy.username.as_ref()?;
        let password = proxy.password.as_deref().unwrap_or("");
        let credentials = format!("{}:{}", username, password);
        Some(format!("Basic {}", BASE64.encode(credentials.as_bytes())))
    }
}

fn format_tcp_addr(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}
