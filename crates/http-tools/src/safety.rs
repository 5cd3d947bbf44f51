//! Destination checks and redaction for outbound API calls.

use crate::error::{ExecutorError, Result};
pub use apigate_openapi_tools::redact::{redact_url, sanitize_reqwest_error};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use tokio::net::lookup_host;
use url::Url;

/// Where the executor may send requests and how much it will read back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundPolicy {
    /// Lowercased host allowlist. Empty means any host.
    #[serde(default)]
    pub allowed_hosts: BTreeSet<String>,
    /// Allow loopback, private, link-local and reserved destinations.
    #[serde(default = "default_true")]
    pub allow_private_networks: bool,
    /// Response bodies larger than this are rejected. `None` = unlimited.
    #[serde(default)]
    pub max_response_bytes: Option<usize>,
}

fn default_true() -> bool {
    true
}

impl Default for OutboundPolicy {
    fn default() -> Self {
        Self {
            allowed_hosts: BTreeSet::new(),
            allow_private_networks: true,
            max_response_bytes: None,
        }
    }
}

impl OutboundPolicy {
    /// Validate a request URL against the policy.
    ///
    /// Hostnames are resolved and every address is checked when private networks are disallowed.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutorError::Blocked`] for non-`http(s)` schemes, hosts outside the allowlist,
    /// or disallowed destination addresses.
    pub async fn check_url(&self, url: &Url) -> Result<()> {
        let scheme = url.scheme();
        if scheme != "http" && scheme != "https" {
            return Err(ExecutorError::Blocked(format!(
                "unsupported URL scheme '{scheme}'"
            )));
        }
        let Some(host) = url.host_str() else {
            return Err(ExecutorError::Blocked("missing URL host".to_string()));
        };

        if !self.allowed_hosts.is_empty() && !self.allowed_hosts.contains(&host.to_ascii_lowercase())
        {
            return Err(ExecutorError::Blocked(format!(
                "host '{host}' not in allowlist"
            )));
        }
        if self.allow_private_networks {
            return Ok(());
        }

        let bare = host.trim_start_matches('[').trim_end_matches(']');
        if let Ok(ip) = bare.parse::<IpAddr>() {
            return if is_denied_ip(ip) {
                Err(ExecutorError::Blocked(format!(
                    "destination IP '{ip}' is not allowed"
                )))
            } else {
                Ok(())
            };
        }

        let port = url.port_or_known_default().unwrap_or(443);
        let addrs: Vec<_> = lookup_host((host, port))
            .await
            .map_err(|e| ExecutorError::Blocked(format!("DNS lookup failed for '{host}': {e}")))?
            .collect();
        if addrs.is_empty() {
            return Err(ExecutorError::Blocked(format!(
                "DNS lookup returned no addresses for '{host}'"
            )));
        }
        if let Some(addr) = addrs.iter().find(|a| is_denied_ip(a.ip())) {
            return Err(ExecutorError::Blocked(format!(
                "host '{host}' resolved to disallowed IP '{}'",
                addr.ip()
            )));
        }
        Ok(())
    }
}

fn is_denied_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_denied_ipv4(v4),
        IpAddr::V6(v6) => v6
            .to_ipv4_mapped()
            .map_or_else(|| is_denied_ipv6(v6), is_denied_ipv4),
    }
}

fn is_denied_ipv4(ip: Ipv4Addr) -> bool {
    let [a, b, ..] = ip.octets();
    ip.is_loopback()
        || ip.is_private()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_broadcast()
        || ip.is_multicast()
        // CGNAT 100.64.0.0/10
        || (a == 100 && (64..=127).contains(&b))
        || a >= 240
}

fn is_denied_ipv6(ip: Ipv6Addr) -> bool {
    ip.is_loopback()
        || ip.is_unspecified()
        || ip.is_multicast()
        || ip.is_unique_local()
        || ip.is_unicast_link_local()
}
