// Network utilities - TCP dialing with deadline, optionally through SOCKS5

use crate::error::RetrievalError;
use crate::utils::proxy::{ProxyConfig, connect_via_proxy};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Parse a port parameter of a network check
pub fn parse_port(port_str: &str) -> Result<u16, RetrievalError> {
    port_str
        .trim()
        .parse::<u16>()
        .map_err(|_| RetrievalError::InvalidTarget {
            details: format!("invalid port number: {}", port_str),
        })
}

/// Format host and port, bracketing IPv6 literals
pub fn host_port(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

/// Connect to `host:port` directly or through `proxy`, bounded by `connect_timeout`
pub async fn dial(
    host: &str,
    port: u16,
    proxy: Option<&ProxyConfig>,
    connect_timeout: Duration,
) -> Result<TcpStream, RetrievalError> {
    if let Some(proxy) = proxy {
        return connect_via_proxy(proxy, host, port, connect_timeout).await;
    }

    let addr = host_port(host, port);
    let stream = timeout(connect_timeout, TcpStream::connect(addr.as_str()))
        .await
        .map_err(|_| RetrievalError::Timeout {
            duration: connect_timeout,
        })?
        .map_err(|e| RetrievalError::Connect {
            addr: addr.clone(),
            details: e.to_string(),
        })?;

    tracing::debug!("Connected to {}", addr);
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn test_parse_port() {
        assert_eq!(parse_port("443").unwrap(), 443);
        assert_eq!(parse_port(" 25 ").unwrap(), 25);
        assert!(matches!(
            parse_port("https"),
            Err(RetrievalError::InvalidTarget { .. })
        ));
        assert!(parse_port("70000").is_err());
    }

    #[test]
    fn test_host_port_formatting() {
        assert_eq!(host_port("example.com", 443), "example.com:443");
        assert_eq!(host_port("::1", 993), "[::1]:993");
        assert_eq!(host_port("[::1]", 993), "[::1]:993");
    }

    #[tokio::test]
    async fn test_dial_local_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let stream = dial("127.0.0.1", port, None, Duration::from_secs(2)).await;
        assert!(stream.is_ok());
    }

    #[tokio::test]
    async fn test_dial_refused_is_connect_error() {
        // Bind and drop to get a port that is very likely closed
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };

        let err = dial("127.0.0.1", port, None, Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(matches!(err, RetrievalError::Connect { .. }));
    }
}
