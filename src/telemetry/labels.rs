//! Process-wide static labels attached to every event.
//!
//! Resolved once at start-up and shared read-only by all requests.

use std::env;
use std::fs;
use std::net::UdpSocket;

/// Value used when an environment label is unset.
pub const WILDCARD: &str = "*";

/// Deployment and host identity of the running process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessLabels {
    pub realm: String,
    pub region: String,
    pub az: String,
    pub domain: String,
    pub local_ip: String,
    pub local_hostname: String,
}

impl ProcessLabels {
    /// Read `REALM`, `REGION`, `AZ`, `DOMAIN` and probe the host.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok(), local_ip(), local_hostname())
    }

    /// Build labels from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F, local_ip: String, local_hostname: String) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| WILDCARD.to_string())
        };

        Self {
            realm: get("REALM"),
            region: get("REGION"),
            az: get("AZ"),
            domain: get("DOMAIN"),
            local_ip,
            local_hostname,
        }
    }
}

impl Default for ProcessLabels {
    fn default() -> Self {
        Self::from_lookup(|_| None, "localhost".to_string(), "localhost".to_string())
    }
}

/// Outbound interface address. Connecting a UDP socket sends no packets.
fn local_ip() -> String {
    UdpSocket::bind("0.0.0.0:0")
        .and_then(|socket| {
            socket.connect("8.8.8.8:80")?;
            socket.local_addr()
        })
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|_| "localhost".to_string())
}

fn local_hostname() -> String {
    env::var("HOSTNAME")
        .ok()
        .or_else(|| fs::read_to_string("/etc/hostname").ok())
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}
