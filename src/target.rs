//! Target parsing and normalization.
//!
//! A [`Target`] is the normalized form of whatever string a caller passes to
//! `scan`: a bare host, a `host:port` pair, or a full URL. Everything
//! downstream (stages, storage keys, session scoping) works off the
//! normalized host, never the raw input.

use serde::{Deserialize, Serialize};

use crate::error::ReconError;

/// A normalized scan target.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    /// Lowercased hostname or IP literal, no scheme, no port, no path.
    pub host: String,
    /// `http` or `https`. Defaults to `https` when not derivable from input.
    pub protocol: String,
    /// Explicit port if the input named one; otherwise `None` (stages apply
    /// their own protocol-appropriate default).
    pub port: Option<u16>,
    /// Path component, always starting with `/`. Defaults to `/`.
    pub path: String,
    /// The exact string this target was normalized from, preserved so that
    /// `normalize(normalize(x).original) == normalize(x)` can be checked.
    pub original: String,
}

impl Target {
    /// Render back to a fully-qualified URL string, useful for stages that
    /// shell out to tools expecting a complete address.
    pub fn to_url(&self) -> String {
        match self.port {
            Some(port) => format!("{}://{}:{}{}", self.protocol, self.host, port, self.path),
            None => format!("{}://{}{}", self.protocol, self.host, self.path),
        }
    }
}

/// Pure function that turns caller input into a [`Target`].
pub struct TargetNormalizer;

impl TargetNormalizer {
    /// Accepts bare hosts (`example.com`), `host:port` pairs
    /// (`example.com:8443`), or full URLs (`https://example.com/status`).
    ///
    /// Fails with [`ReconError::InvalidInput`] if `input` is empty or
    /// cannot be interpreted as a host.
    pub fn normalize(input: &str) -> Result<Target, ReconError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(ReconError::invalid_input("target string is empty"));
        }

        if let Some(rest) = trimmed
            .strip_prefix("https://")
            .map(|r| (r, "https"))
            .or_else(|| trimmed.strip_prefix("http://").map(|r| (r, "http")))
            .map(|(r, scheme)| (r, scheme))
        {
            return Self::normalize_url_body(rest.0, rest.1, trimmed);
        }

        // No scheme: treat as host or host:port, with an optional trailing path.
        let (authority, path) = match trimmed.find('/') {
            Some(idx) => (&trimmed[..idx], &trimmed[idx..]),
            None => (trimmed, "/"),
        };

        let (host, port) = Self::split_authority(authority)?;
        Ok(Target {
            host,
            protocol: "https".to_string(),
            port,
            path: Self::normalize_path(path),
            original: trimmed.to_string(),
        })
    }

    fn normalize_url_body(rest: &str, scheme: &str, original: &str) -> Result<Target, ReconError> {
        let (authority, path) = match rest.find('/') {
            Some(idx) => (&rest[..idx], &rest[idx..]),
            None => (rest, "/"),
        };
        let (host, port) = Self::split_authority(authority)?;
        Ok(Target {
            host,
            protocol: scheme.to_string(),
            port,
            path: Self::normalize_path(path),
            original: original.to_string(),
        })
    }

    fn split_authority(authority: &str) -> Result<(String, Option<u16>), ReconError> {
        if authority.is_empty() {
            return Err(ReconError::invalid_input("target has no host"));
        }

        // IPv6 literal in brackets: "[::1]:8080" or "[::1]".
        if let Some(stripped) = authority.strip_prefix('[') {
            let close = stripped
                .find(']')
                .ok_or_else(|| ReconError::invalid_input("unterminated IPv6 literal"))?;
            let host = &stripped[..close];
            let remainder = &stripped[close + 1..];
            let port = match remainder.strip_prefix(':') {
                Some(p) => Some(Self::parse_port(p)?),
                None => None,
            };
            return Ok((host.to_lowercase(), port));
        }

        match authority.rsplit_once(':') {
            Some((host, port_str)) if !host.is_empty() && port_str.chars().all(|c| c.is_ascii_digit()) && !port_str.is_empty() => {
                Ok((host.to_lowercase(), Some(Self::parse_port(port_str)?)))
            }
            _ => Ok((authority.to_lowercase(), None)),
        }
    }

    fn parse_port(s: &str) -> Result<u16, ReconError> {
        s.parse::<u16>()
            .map_err(|_| ReconError::invalid_input(format!("invalid port: {s}")))
    }

    fn normalize_path(path: &str) -> String {
        if path.is_empty() {
            "/".to_string()
        } else {
            path.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn bare_host_defaults_to_https_root_path() {
        let target = TargetNormalizer::normalize("example.com").unwrap();
        assert_eq!(target.host, "example.com");
        assert_eq!(target.protocol, "https");
        assert_eq!(target.port, None);
        assert_eq!(target.path, "/");
    }

    #[test]
    fn host_with_port_is_parsed() {
        let target = TargetNormalizer::normalize("example.com:8443").unwrap();
        assert_eq!(target.host, "example.com");
        assert_eq!(target.port, Some(8443));
    }

    #[test]
    fn full_url_preserves_scheme_and_path() {
        let target = TargetNormalizer::normalize("http://Example.com/status").unwrap();
        assert_eq!(target.host, "example.com");
        assert_eq!(target.protocol, "http");
        assert_eq!(target.path, "/status");
    }

    #[test]
    fn ipv6_literal_with_port() {
        let target = TargetNormalizer::normalize("[::1]:9000").unwrap();
        assert_eq!(target.host, "::1");
        assert_eq!(target.port, Some(9000));
    }

    #[test]
    fn empty_input_is_rejected() {
        assert!(TargetNormalizer::normalize("").is_err());
        assert!(TargetNormalizer::normalize("   ").is_err());
    }

    proptest! {
        #[test]
        fn normalize_is_idempotent(host in "[a-z0-9]{1,10}\\.[a-z]{2,5}") {
            let first = TargetNormalizer::normalize(&host).unwrap();
            let second = TargetNormalizer::normalize(&first.original).unwrap();
            prop_assert_eq!(first, second);
        }
    }
}
