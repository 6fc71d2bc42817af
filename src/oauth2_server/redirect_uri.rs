// ABOUTME: Redirect URI security policy for ESPI client registration
// ABOUTME: Rejects script schemes, fragments, wildcards, and plain HTTP outside loopback when enforced
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Green Button Authorization Contributors

use std::net::IpAddr;
use url::{Host, Url};

/// Substrings rejected anywhere in a redirect URI, compared case-insensitively
const DANGEROUS_PATTERNS: [&str; 3] = ["<script", "javascript:", "vbscript:"];

/// Hosts allowed over plain HTTP when HTTPS is enforced
const LOOPBACK_HTTP_HOSTS: [&str; 2] = ["localhost", "127.0.0.1"];

/// Redirect URI validation policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RedirectUriPolicy {
    /// Require HTTPS except for loopback hosts, and reject non-loopback IP literals
    pub enforce_https: bool,
}

impl Default for RedirectUriPolicy {
    fn default() -> Self {
        Self {
            enforce_https: true,
        }
    }
}

impl RedirectUriPolicy {
    /// Create a policy
    #[must_use]
    pub const fn new(enforce_https: bool) -> Self {
        Self { enforce_https }
    }

    /// Validate one redirect URI, returning the rejection reason
    ///
    /// # Errors
    ///
    /// Returns a human-readable reason when the URI violates the policy
    pub fn validate(&self, uri: &str) -> Result<(), String> {
        if uri.trim().is_empty() {
            return Err("redirect_uri must not be empty".to_owned());
        }

        let lowered = uri.to_ascii_lowercase();
        if let Some(pattern) = DANGEROUS_PATTERNS.iter().find(|p| lowered.contains(*p)) {
            tracing::warn!(uri, pattern, "Rejected redirect_uri containing script content");
            return Err(format!("redirect_uri contains forbidden content '{pattern}': {uri}"));
        }

        let parsed =
            Url::parse(uri).map_err(|e| format!("redirect_uri is not an absolute URI ({e}): {uri}"))?;

        match parsed.scheme() {
            "http" | "https" => {}
            "javascript" | "data" => {
                return Err(format!("redirect_uri scheme '{}' is forbidden: {uri}", parsed.scheme()));
            }
            other => {
                return Err(format!(
                    "redirect_uri scheme '{other}' is not supported, use http or https: {uri}"
                ));
            }
        }

        // RFC 6749 Section 3.1.2: no fragment component
        if parsed.fragment().is_some() || uri.contains('#') {
            tracing::warn!(uri, "Rejected redirect_uri with fragment");
            return Err(format!("redirect_uri must not contain a fragment: {uri}"));
        }

        // Wildcards would allow subdomain bypass
        if uri.contains('*') {
            tracing::warn!(uri, "Rejected redirect_uri with wildcard");
            return Err(format!("redirect_uri must not contain wildcards: {uri}"));
        }

        let Some(host) = parsed.host() else {
            return Err(format!("redirect_uri must include a host: {uri}"));
        };

        if self.enforce_https {
            if parsed.scheme() == "http" && !is_loopback_http_host(&host) {
                tracing::warn!(uri, "Rejected non-HTTPS redirect_uri for non-localhost host");
                return Err(format!(
                    "redirect_uri must use https unless the host is localhost or 127.0.0.1: {uri}"
                ));
            }
            if let Some(ip) = ip_literal(&host) {
                if !ip.is_loopback() {
                    tracing::warn!(uri, "Rejected redirect_uri with IP literal host");
                    return Err(format!("redirect_uri must not use an IP address host: {uri}"));
                }
            }
        }

        Ok(())
    }
}

fn is_loopback_http_host(host: &Host<&str>) -> bool {
    match host {
        Host::Domain(domain) => LOOPBACK_HTTP_HOSTS.contains(domain),
        Host::Ipv4(addr) => LOOPBACK_HTTP_HOSTS.contains(&addr.to_string().as_str()),
        Host::Ipv6(_) => false,
    }
}

fn ip_literal(host: &Host<&str>) -> Option<IpAddr> {
    match host {
        Host::Domain(_) => None,
        Host::Ipv4(addr) => Some(IpAddr::V4(*addr)),
        Host::Ipv6(addr) => Some(IpAddr::V6(*addr)),
    }
}
