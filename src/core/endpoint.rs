//! Remote endpoint addressing.

use std::fmt;
use std::str::FromStr;

use url::Url;

use super::error::ConnectionError;

/// Host and port of the remote LDT server.
///
/// Cached by the supervisor so retries replay the last requested endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    /// Create an endpoint, rejecting an empty host or port zero.
    pub fn new(host: impl Into<String>, port: u16) -> Result<Self, ConnectionError> {
        let host = host.into();
        if host.trim().is_empty() {
            return Err(ConnectionError::InvalidEndpoint("empty host".into()));
        }
        if port == 0 {
            return Err(ConnectionError::InvalidEndpoint(format!("{host}: port 0")));
        }
        Ok(Self { host, port })
    }

    /// Build an endpoint from a URL, falling back to `default_port` when the
    /// URL carries none (e.g. `ldt://live.example.com`).
    pub fn from_url(url: &str, default_port: Option<u16>) -> Result<Self, ConnectionError> {
        let parsed =
            Url::parse(url).map_err(|e| ConnectionError::InvalidEndpoint(format!("{url}: {e}")))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| ConnectionError::InvalidEndpoint(format!("{url}: missing host")))?;
        let port = parsed
            .port()
            .or(default_port)
            .ok_or_else(|| ConnectionError::InvalidEndpoint(format!("{url}: missing port")))?;
        // Url keeps brackets around IPv6 literals.
        let host = host.trim_start_matches('[').trim_end_matches(']');
        Self::new(host, port)
    }

    /// Host name or address literal.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// TCP port.
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for Endpoint {
    type Err = ConnectionError;

    /// Parse `host:port` or `[v6]:port`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| ConnectionError::InvalidEndpoint(format!("{s}: expected host:port")))?;
        let port = port
            .parse::<u16>()
            .map_err(|_| ConnectionError::InvalidEndpoint(format!("{s}: invalid port")))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        Self::new(host, port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_new() {
        let ep = Endpoint::new("h", 1).unwrap();
        assert_eq!(ep.host(), "h");
        assert_eq!(ep.port(), 1);
        assert_eq!(ep.to_string(), "h:1");
    }

    #[test]
    fn test_endpoint_rejects_empty_host_and_zero_port() {
        assert!(matches!(
            Endpoint::new("", 80),
            Err(ConnectionError::InvalidEndpoint(_))
        ));
        assert!(matches!(
            Endpoint::new("example.com", 0),
            Err(ConnectionError::InvalidEndpoint(_))
        ));
    }

    #[test]
    fn test_endpoint_from_str() {
        let ep: Endpoint = "live.example.com:4443".parse().unwrap();
        assert_eq!(ep.host(), "live.example.com");
        assert_eq!(ep.port(), 4443);

        let v6: Endpoint = "[::1]:9000".parse().unwrap();
        assert_eq!(v6.host(), "::1");
        assert_eq!(v6.to_string(), "[::1]:9000");

        assert!("no-port".parse::<Endpoint>().is_err());
        assert!("host:notaport".parse::<Endpoint>().is_err());
    }

    #[test]
    fn test_endpoint_from_url() {
        let ep = Endpoint::from_url("ldt://live.example.com:7000", None).unwrap();
        assert_eq!(ep.port(), 7000);

        // Port from the URL wins over the fallback.
        let ep = Endpoint::from_url("ldt://live.example.com:7000", Some(1)).unwrap();
        assert_eq!(ep.port(), 7000);

        let ep = Endpoint::from_url("ldt://live.example.com", Some(4443)).unwrap();
        assert_eq!(ep.host(), "live.example.com");
        assert_eq!(ep.port(), 4443);

        assert!(Endpoint::from_url("ldt://live.example.com", None).is_err());
        assert!(Endpoint::from_url("not a url", Some(1)).is_err());
    }
}
