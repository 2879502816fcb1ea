// SOCKS5 proxy support for network checks
// Checks configured after a `!proxy` line tunnel through this endpoint

use crate::error::RetrievalError;
use std::fmt;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_socks::tcp::Socks5Stream;

/// Default SOCKS5 port when none is given
const DEFAULT_SOCKS_PORT: u16 = 1080;

/// SOCKS5 proxy configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl ProxyConfig {
    /// Parse proxy string (host:port or user:pass@host:port)
    ///
    /// Returns `Ok(None)` for an empty string or `direct`, which switch
    /// proxying off for the following checks. Errors are bare messages; the
    /// check-file parser prefixes them with the line number and collects
    /// them into one `Error::Config`.
    pub fn parse(proxy_str: &str) -> Result<Option<Self>, String> {
        let proxy_str = proxy_str.trim();
        if proxy_str.is_empty() || proxy_str.eq_ignore_ascii_case("direct") {
            return Ok(None);
        }

        if let Some((auth, hostport)) = proxy_str.rsplit_once('@') {
            let (username, password) = match auth.split_once(':') {
                Some((u, p)) => (u.to_string(), Some(p.to_string())),
                None => (auth.to_string(), None),
            };
            if username.is_empty() {
                return Err("empty proxy username".to_string());
            }

            let (host, port) = Self::parse_hostport(hostport)?;
            Ok(Some(Self {
                host,
                port,
                username: Some(username),
                password,
            }))
        } else {
            let (host, port) = Self::parse_hostport(proxy_str)?;
            Ok(Some(Self {
                host,
                port,
                username: None,
                password: None,
            }))
        }
    }

    /// Parse host:port string
    fn parse_hostport(hostport: &str) -> Result<(String, u16), String> {
        let (host, port) = match hostport.rsplit_once(':') {
            Some((host, port_str)) => {
                let port = port_str
                    .parse::<u16>()
                    .map_err(|_| format!("invalid proxy port: {}", port_str))?;
                (host, port)
            }
            None => (hostport, DEFAULT_SOCKS_PORT),
        };

        if host.is_empty() {
            return Err("empty proxy host".to_string());
        }
        Ok((host.to_lowercase(), port))
    }

    /// Proxy endpoint as `host:port`
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for ProxyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "socks5://{}", self.endpoint())
    }
}

/// Open a TCP tunnel to `target_host:target_port` through the proxy
pub async fn connect_via_proxy(
    proxy: &ProxyConfig,
    target_host: &str,
    target_port: u16,
    connect_timeout: Duration,
) -> Result<TcpStream, RetrievalError> {
    let endpoint = proxy.endpoint();
    let target = (target_host, target_port);

    let connecting = async {
        match (&proxy.username, &proxy.password) {
            (Some(username), password) => {
                Socks5Stream::connect_with_password(
                    endpoint.as_str(),
                    target,
                    username,
                    password.as_deref().unwrap_or(""),
                )
                .await
            }
            (None, _) => Socks5Stream::connect(endpoint.as_str(), target).await,
        }
    };

    let stream = timeout(connect_timeout, connecting)
        .await
        .map_err(|_| RetrievalError::Timeout {
            duration: connect_timeout,
        })?
        .map_err(|e| RetrievalError::Proxy {
            proxy: endpoint.clone(),
            details: e.to_string(),
        })?;

    tracing::debug!(
        "Tunnel to {}:{} established via {}",
        target_host,
        target_port,
        proxy
    );

    Ok(stream.into_inner())
}
