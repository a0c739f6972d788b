//! Header manipulation for forwarded requests.
//!
//! # Responsibilities
//! - Strip hop-by-hop headers
//! - Apply per-route rewrite rules
//! - Pin Host, Connection, X-Request-Start and X-Forwarded-For
//!
//! # Design Decisions
//! - Host is always the upstream's canonical host, never the client's
//! - Upstream connections are single-use, so `Connection: close` is forced
//! - Existing X-Forwarded-For data is preserved byte-for-byte and appended to
//! - Rules run before the pinned headers, so they cannot override them

use std::net::IpAddr;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};
use thiserror::Error;

use crate::config::HeaderRule;

pub const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
pub const X_REQUEST_START: HeaderName = HeaderName::from_static("x-request-start");

/// Headers that describe a single transport hop and are never forwarded.
const HOP_BY_HOP: [HeaderName; 6] = [
    HeaderName::from_static("keep-alive"),
    HeaderName::from_static("proxy-connection"),
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// A header rule that failed to compile.
#[derive(Debug, Error)]
#[error("invalid header rule for '{name}': {reason}")]
pub struct InvalidHeaderRule {
    pub name: String,
    pub reason: String,
}

/// A compiled [`HeaderRule`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RewriteRule {
    Set(HeaderName, HeaderValue),
    Append(HeaderName, HeaderValue),
    Remove(HeaderName),
}

impl TryFrom<&HeaderRule> for RewriteRule {
    type Error = InvalidHeaderRule;

    fn try_from(rule: &HeaderRule) -> Result<Self, Self::Error> {
        let name_of = |name: &str| {
            HeaderName::from_bytes(name.as_bytes()).map_err(|e| InvalidHeaderRule {
                name: name.to_string(),
                reason: e.to_string(),
            })
        };
        let value_of = |name: &str, value: &str| {
            HeaderValue::from_str(value).map_err(|e| InvalidHeaderRule {
                name: name.to_string(),
                reason: e.to_string(),
            })
        };

        Ok(match rule {
            HeaderRule::Set { name, value } => {
                RewriteRule::Set(name_of(name)?, value_of(name, value)?)
            }
            HeaderRule::Append { name, value } => {
                RewriteRule::Append(name_of(name)?, value_of(name, value)?)
            }
            HeaderRule::Remove { name } => RewriteRule::Remove(name_of(name)?),
        })
    }
}

impl RewriteRule {
    fn apply(&self, headers: &mut HeaderMap) {
        match self {
            RewriteRule::Set(name, value) => {
                headers.insert(name.clone(), value.clone());
            }
            RewriteRule::Append(name, value) => {
                headers.append(name.clone(), value.clone());
            }
            RewriteRule::Remove(name) => {
                headers.remove(name);
            }
        }
    }
}

/// Facts about the inbound hop needed to build the outbound headers.
#[derive(Debug, Clone, Copy)]
pub struct ForwardingInfo {
    /// Immediate peer of this router.
    pub client_ip: IpAddr,
    /// When the request was received.
    pub received_at: SystemTime,
}

/// Turn inbound headers into the headers sent upstream.
pub fn rewrite_headers(
    headers: &mut HeaderMap,
    host: &HeaderValue,
    rules: &[RewriteRule],
    info: ForwardingInfo,
) {
    strip_hop_by_hop(headers);

    for rule in rules {
        rule.apply(headers);
    }

    headers.insert(header::HOST, host.clone());
    headers.insert(header::CONNECTION, HeaderValue::from_static("close"));
    headers.insert(X_REQUEST_START, request_start_value(info.received_at));
    append_forwarded_for(headers, info.client_ip);
}

pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let named: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|token| HeaderName::from_bytes(token.trim().as_bytes()).ok())
        .collect();

    for name in named.iter().chain(HOP_BY_HOP.iter()) {
        headers.remove(name);
    }
    headers.remove(header::CONNECTION);
}

/// `t=<milliseconds since the epoch>`.
pub fn request_start_value(received_at: SystemTime) -> HeaderValue {
    let millis = received_at
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    HeaderValue::from_str(&format!("t={}", millis))
        .unwrap_or_else(|_| HeaderValue::from_static("t=0"))
}

/// Append `client_ip` to the forwarded-for chain.
///
/// Every existing line is kept verbatim (blank, non-UTF-8 or malformed
/// entries included) and the lines are folded into one comma-joined value.
pub fn append_forwarded_for(headers: &mut HeaderMap, client_ip: IpAddr) {
    let client = client_ip.to_string();

    let mut lines: Vec<&[u8]> = headers
        .get_all(&X_FORWARDED_FOR)
        .iter()
        .map(HeaderValue::as_bytes)
        .collect();
    lines.push(client.as_bytes());
    let chain = lines.join(&b", "[..]);

    // Valid field values joined by ", " are themselves valid.
    if let Ok(value) = HeaderValue::from_bytes(&chain) {
        headers.insert(X_FORWARDED_FOR, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn info(ip: &str) -> ForwardingInfo {
        ForwardingInfo {
            client_ip: ip.parse().unwrap(),
            received_at: UNIX_EPOCH + Duration::from_millis(1_700_000_000_123),
        }
    }

    #[test]
    fn forwarded_for_appends_to_existing_chain() {
        let mut headers = HeaderMap::new();
        headers.insert(X_FORWARDED_FOR, HeaderValue::from_static("203.0.113.5"));
        append_forwarded_for(&mut headers, "198.51.100.9".parse().unwrap());
        assert_eq!(headers[X_FORWARDED_FOR], "203.0.113.5, 198.51.100.9");
    }

    #[test]
    fn forwarded_for_starts_chain() {
        let mut headers = HeaderMap::new();
        append_forwarded_for(&mut headers, "198.51.100.9".parse().unwrap());
        assert_eq!(headers[X_FORWARDED_FOR], "198.51.100.9");
    }

    #[test]
    fn forwarded_for_folds_repeated_lines_in_order() {
        let mut headers = HeaderMap::new();
        headers.append(X_FORWARDED_FOR, HeaderValue::from_static("203.0.113.5"));
        headers.append(X_FORWARDED_FOR, HeaderValue::from_static("192.0.2.1, 192.0.2.2"));
        append_forwarded_for(&mut headers, "::1".parse().unwrap());
        assert_eq!(headers.get_all(X_FORWARDED_FOR).iter().count(), 1);
        assert_eq!(headers[X_FORWARDED_FOR], "203.0.113.5, 192.0.2.1, 192.0.2.2, ::1");
    }

    #[test]
    fn forwarded_for_keeps_malformed_values() {
        let mut headers = HeaderMap::new();
        let garbage = HeaderValue::from_bytes(b"not-an-ip;\xe9t\xe9").unwrap();
        headers.insert(X_FORWARDED_FOR, garbage);
        append_forwarded_for(&mut headers, "198.51.100.9".parse().unwrap());
        let folded = headers[X_FORWARDED_FOR].as_bytes();
        assert_eq!(folded, b"not-an-ip;\xe9t\xe9, 198.51.100.9");
    }

    #[test]
    fn forwarded_for_keeps_blank_lines() {
        let mut headers = HeaderMap::new();
        headers.append(X_FORWARDED_FOR, HeaderValue::from_static("203.0.113.5"));
        headers.append(X_FORWARDED_FOR, HeaderValue::from_static("  "));
        append_forwarded_for(&mut headers, "198.51.100.9".parse().unwrap());
        assert_eq!(headers[X_FORWARDED_FOR], "203.0.113.5,   , 198.51.100.9");
    }

    #[test]
    fn rewrite_pins_host_connection_and_start() {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, HeaderValue::from_static("evil.example"));
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive, x-secret-hop"));
        headers.insert("keep-alive", HeaderValue::from_static("timeout=5"));
        headers.insert("x-secret-hop", HeaderValue::from_static("1"));
        headers.insert(header::ACCEPT, HeaderValue::from_static("text/html"));

        let host = HeaderValue::from_static("app.internal:8000");
        rewrite_headers(&mut headers, &host, &[], info("198.51.100.9"));

        assert_eq!(headers[header::HOST], "app.internal:8000");
        assert_eq!(headers[header::CONNECTION], "close");
        assert_eq!(headers[X_REQUEST_START], "t=1700000000123");
        assert_eq!(headers[X_FORWARDED_FOR], "198.51.100.9");
        assert_eq!(headers[header::ACCEPT], "text/html");
        assert!(headers.get("keep-alive").is_none());
        assert!(headers.get("x-secret-hop").is_none());
    }

    #[test]
    fn rules_apply_in_order_and_cannot_override_host() {
        let rules: Vec<RewriteRule> = [
            HeaderRule::Set { name: "x-tier".into(), value: "edge".into() },
            HeaderRule::Append { name: "x-tier".into(), value: "proxy".into() },
            HeaderRule::Remove { name: "cookie".into() },
            HeaderRule::Set { name: "host".into(), value: "attacker".into() },
        ]
        .iter()
        .map(|r| RewriteRule::try_from(r).unwrap())
        .collect();

        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("session=1"));
        rewrite_headers(&mut headers, &HeaderValue::from_static("site"), &rules, info("10.0.0.1"));

        let tiers: Vec<_> = headers.get_all("x-tier").iter().collect();
        assert_eq!(tiers, vec!["edge", "proxy"]);
        assert!(headers.get(header::COOKIE).is_none());
        assert_eq!(headers[header::HOST], "site");
    }

    #[test]
    fn invalid_rule_is_rejected() {
        let rule = HeaderRule::Set { name: "bad header".into(), value: "x".into() };
        assert!(RewriteRule::try_from(&rule).is_err());
        let rule = HeaderRule::Set { name: "x-ok".into(), value: "line\nbreak".into() };
        assert!(RewriteRule::try_from(&rule).is_err());
    }
}
