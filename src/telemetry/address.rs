//! Remote address resolution.
//!
//! # Responsibilities
//! - Split the transport-level peer address into host and port
//! - Apply the `x-forwarded-for` override set by reverse proxies
//! - Normalize the IPv6 loopback literal to `localhost`
//!
//! # Design Decisions
//! - Never fails: malformed input yields the `0.0.0.0:0` sentinel plus a diagnostic
//! - Forwarding headers are trusted unconditionally; proxy allow-lists are a deployment concern
//! - A non-blank forwarded value replaces the IP as a whole; only the port survives from the transport

use std::fmt;

/// Header carrying the original client address when behind a proxy.
pub const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// Sentinel IP returned when the transport address cannot be parsed.
pub const UNKNOWN_IP: &str = "0.0.0.0";

/// Sentinel port returned when the transport address cannot be parsed.
pub const UNKNOWN_PORT: &str = "0";

const IPV6_LOOPBACK: &str = "::1";
const LOCALHOST: &str = "localhost";

/// Why resolution fell back to the sentinel pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveDiagnostic {
    /// No transport address was available at all.
    MissingTransport,
    /// The transport address could not be split into host and port.
    MalformedTransport(String),
}

impl fmt::Display for ResolveDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolveDiagnostic::MissingTransport => write!(f, "no transport address"),
            ResolveDiagnostic::MalformedTransport(raw) => {
                write!(f, "malformed transport address {:?}", raw)
            }
        }
    }
}

/// Resolved remote endpoint of a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteAddress {
    pub ip: String,
    pub port: String,
    /// Set when the sentinel pair was substituted.
    pub diagnostic: Option<ResolveDiagnostic>,
}

impl RemoteAddress {
    fn sentinel(diagnostic: ResolveDiagnostic) -> Self {
        Self {
            ip: UNKNOWN_IP.to_string(),
            port: UNKNOWN_PORT.to_string(),
            diagnostic: Some(diagnostic),
        }
    }

    /// True when resolution fell back to the sentinel pair.
    pub fn is_degraded(&self) -> bool {
        self.diagnostic.is_some()
    }
}

impl fmt::Display for RemoteAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

/// Resolve the remote `(ip, port)` of a request.
///
/// `transport` is the peer address as reported by the connection
/// (`host:port`, `[v6]:port`). `forwarded_for` is the raw value of the
/// `x-forwarded-for` header, if any.
pub fn resolve_remote_address(transport: Option<&str>, forwarded_for: Option<&str>) -> RemoteAddress {
    let transport = match transport {
        Some(t) => t,
        None => return RemoteAddress::sentinel(ResolveDiagnostic::MissingTransport),
    };

    let (host, port) = match split_host_port(transport) {
        Some(parts) => parts,
        None => {
            return RemoteAddress::sentinel(ResolveDiagnostic::MalformedTransport(
                transport.to_string(),
            ))
        }
    };

    let ip = forwarded_client(forwarded_for).unwrap_or(host);

    RemoteAddress {
        ip: normalize_loopback(ip).to_string(),
        port: port.to_string(),
        diagnostic: None,
    }
}

/// Split `host:port` or `[host]:port`.
///
/// Returns `None` when there is no port separator, when brackets are
/// unbalanced, or when an unbracketed host contains further colons.
fn split_host_port(addr: &str) -> Option<(&str, &str)> {
    if let Some(rest) = addr.strip_prefix('[') {
        let (host, after) = rest.split_once(']')?;
        let port = after.strip_prefix(':')?;
        if host.contains('[') || port.contains(']') {
            return None;
        }
        return Some((host, port));
    }

    let (host, port) = addr.rsplit_once(':')?;
    if host.contains(':') || host.contains('[') || host.contains(']') || port.contains(']') {
        return None;
    }
    Some((host, port))
}

/// Whole `x-forwarded-for` value, trimmed; `None` when blank.
fn forwarded_client(header: Option<&str>) -> Option<&str> {
    header.map(str::trim).filter(|value| !value.is_empty())
}

fn normalize_loopback(ip: &str) -> &str {
    if ip == IPV6_LOOPBACK {
        LOCALHOST
    } else {
        ip
    }
}
