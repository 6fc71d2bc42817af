// ABOUTME: Green Button scope grammar parsing, classification, and consent rendering
// ABOUTME: Untrusted scope strings never fail; malformed fields are dropped from the descriptor
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Green Button Authorization Contributors

//! # Green Button Scope Grammar
//!
//! ESPI scopes encode the energy-usage data a Third Party may read:
//!
//! ```text
//! FB=4_5_15;IntervalDuration=3600;BlockDuration=monthly;HistoryLength=13
//! ```
//!
//! Fields are `key=value` pairs separated by `;` in any order. Unknown keys
//! are ignored. A string without a non-empty `FB` field is not a Green Button
//! scope and is classified as an administrative or other scope instead.

use greenbutton_core::constants::scopes::{
    BLOCK_DURATION_KEY, DATA_CUSTODIAN_ADMIN_ACCESS, ESPI_ROLE_MARKERS, FEATURE_KEY,
    FIELD_SEPARATOR, HISTORY_LENGTH_KEY, INTERVAL_DURATION_KEY, OPENID, PROFILE,
    THIRD_PARTY_ADMIN_ACCESS,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Billing block duration of a Green Button scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockDuration {
    /// One-day blocks
    Daily,
    /// Monthly billing periods
    Monthly,
    /// Yearly blocks
    Yearly,
    /// Custodian-defined blocks
    Custom,
}

impl BlockDuration {
    /// Parse a block duration value, case-insensitively
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "daily" => Some(Self::Daily),
            "monthly" => Some(Self::Monthly),
            "yearly" => Some(Self::Yearly),
            "custom" => Some(Self::Custom),
            _ => None,
        }
    }

    /// Grammar value
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Monthly => "monthly",
            Self::Yearly => "yearly",
            Self::Custom => "custom",
        }
    }
}

impl fmt::Display for BlockDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parsed Green Button scope
///
/// Always re-derived from the raw scope string, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeDescriptor {
    /// Function block list, e.g. `4_5_15`
    pub feature_id: String,
    /// Interval reading length in seconds
    pub interval_duration_seconds: Option<u64>,
    /// Billing block duration
    pub block_duration: Option<BlockDuration>,
    /// Months of history available
    pub history_length_months: Option<u32>,
}

/// Fixed administrative scopes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AdministrativeScope {
    /// Data Custodian bulk administration
    DataCustodianAdminAccess,
    /// Third Party administration
    ThirdPartyAdminAccess,
    /// OpenID Connect sign-in
    OpenId,
    /// Basic profile
    Profile,
}

impl AdministrativeScope {
    /// Every administrative scope
    pub const ALL: [Self; 4] = [
        Self::DataCustodianAdminAccess,
        Self::ThirdPartyAdminAccess,
        Self::OpenId,
        Self::Profile,
    ];

    /// Match an exact scope string
    #[must_use]
    pub fn from_scope(scope: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|admin| admin.as_str() == scope)
    }

    /// Scope string
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::DataCustodianAdminAccess => DATA_CUSTODIAN_ADMIN_ACCESS,
            Self::ThirdPartyAdminAccess => THIRD_PARTY_ADMIN_ACCESS,
            Self::OpenId => OPENID,
            Self::Profile => PROFILE,
        }
    }

    /// Canned consent description
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::DataCustodianAdminAccess => {
                "administrative access to Data Custodian resources and bulk data"
            }
            Self::ThirdPartyAdminAccess => {
                "administrative access to Third Party registration and authorization records"
            }
            Self::OpenId => "sign you in with your utility account",
            Self::Profile => "read your basic profile information",
        }
    }
}

/// Classification of a single scope token
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedScope {
    /// `FB=` energy data scope
    GreenButton(ScopeDescriptor),
    /// One of the fixed administrative scopes
    Administrative(AdministrativeScope),
    /// Anything else, accepted but not ESPI-defined
    Other(String),
}

/// Rendered scope for a consent screen
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeDescription {
    /// Raw scope string
    pub scope: String,
    /// Human-readable description
    pub description: String,
    /// Whether the scope is ESPI-specific
    pub espi_specific: bool,
}

/// Parse a Green Button scope
///
/// Returns `None` when the string has no non-empty `FB` field. Numeric fields
/// that do not parse, a zero interval, and unknown block durations are left
/// absent.
#[must_use]
pub fn parse(scope: &str) -> Option<ScopeDescriptor> {
    let mut feature_id = None;
    let mut interval_duration_seconds = None;
    let mut block_duration = None;
    let mut history_length_months = None;

    for field in scope.split(FIELD_SEPARATOR) {
        let Some((key, value)) = field.split_once('=') else {
            continue;
        };
        let value = value.trim();
        match key.trim() {
            FEATURE_KEY => feature_id = Some(value.to_owned()),
            INTERVAL_DURATION_KEY => {
                interval_duration_seconds = value.parse::<u64>().ok().filter(|secs| *secs > 0);
            }
            BLOCK_DURATION_KEY => block_duration = BlockDuration::parse(value),
            HISTORY_LENGTH_KEY => history_length_months = value.parse::<u32>().ok(),
            _ => {}
        }
    }

    let feature_id = feature_id.filter(|id| !id.is_empty())?;
    Some(ScopeDescriptor {
        feature_id,
        interval_duration_seconds,
        block_duration,
        history_length_months,
    })
}

/// Classify a single scope token
#[must_use]
pub fn classify(scope: &str) -> ParsedScope {
    if let Some(descriptor) = parse(scope) {
        return ParsedScope::GreenButton(descriptor);
    }
    AdministrativeScope::from_scope(scope).map_or_else(
        || ParsedScope::Other(scope.to_owned()),
        ParsedScope::Administrative,
    )
}

/// Render a parsed Green Button scope for a retail customer
#[must_use]
pub fn describe(descriptor: &ScopeDescriptor) -> String {
    let mut details = Vec::with_capacity(3);
    if let Some(seconds) = descriptor.interval_duration_seconds {
        details.push(format!("{} intervals", format_interval(seconds)));
    }
    if let Some(block) = descriptor.block_duration {
        details.push(format!("{block} billing periods"));
    }
    if let Some(months) = descriptor.history_length_months {
        let unit = if months == 1 { "month" } else { "months" };
        details.push(format!("up to {months} {unit} of history"));
    }

    let base = format!(
        "energy usage data (feature set {})",
        descriptor.feature_id
    );
    if details.is_empty() {
        base
    } else {
        format!("{base} with {}", details.join(", "))
    }
}

/// Render any scope token
#[must_use]
pub fn describe_scope(scope: &str) -> ScopeDescription {
    let (description, espi_specific) = match classify(scope) {
        ParsedScope::GreenButton(descriptor) => (describe(&descriptor), true),
        ParsedScope::Administrative(admin) => (
            admin.description().to_owned(),
            has_espi_role_marker(scope),
        ),
        ParsedScope::Other(other) => (format!("access to \"{other}\""), has_espi_role_marker(scope)),
    };
    ScopeDescription {
        scope: scope.to_owned(),
        description,
        espi_specific,
    }
}

/// `seconds >= 3600` renders as hours, `>= 60` as minutes, else seconds
#[must_use]
pub fn format_interval(seconds: u64) -> String {
    if seconds >= 3600 {
        format!("{}-hour", seconds / 3600)
    } else if seconds >= 60 {
        format!("{}-minute", seconds / 60)
    } else {
        format!("{seconds}-second")
    }
}

/// Split a space-delimited OAuth scope parameter into distinct tokens
#[must_use]
pub fn split_scope_string(scope: &str) -> BTreeSet<String> {
    scope.split_whitespace().map(str::to_owned).collect()
}

/// Whether a scope token is a Green Button scope or names an ESPI role
#[must_use]
pub fn is_espi_specific(scope: &str) -> bool {
    parse(scope).is_some() || has_espi_role_marker(scope)
}

/// Whether any scope in the set is ESPI-specific
pub fn any_espi_specific<'a>(scopes: impl IntoIterator<Item = &'a String>) -> bool {
    scopes.into_iter().any(|scope| is_espi_specific(scope))
}

fn has_espi_role_marker(scope: &str) -> bool {
    ESPI_ROLE_MARKERS.iter().any(|marker| scope.contains(marker))
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOURLY_MONTHLY: &str =
        "FB=4_5_15;IntervalDuration=3600;BlockDuration=monthly;HistoryLength=13";

    #[test]
    fn test_parse_full_scope() {
        let descriptor = parse(HOURLY_MONTHLY).unwrap();
        assert_eq!(descriptor.feature_id, "4_5_15");
        assert_eq!(descriptor.interval_duration_seconds, Some(3600));
        assert_eq!(descriptor.block_duration, Some(BlockDuration::Monthly));
        assert_eq!(descriptor.history_length_months, Some(13));
    }

    #[test]
    fn test_field_order_is_not_significant() {
        let reordered = "HistoryLength=13;BlockDuration=monthly;FB=4_5_15;IntervalDuration=3600";
        assert_eq!(parse(reordered), parse(HOURLY_MONTHLY));
    }

    #[test]
    fn test_unknown_keys_are_ignored() {
        let descriptor = parse("FB=1_3;Frobnicate=yes;IntervalDuration=900").unwrap();
        assert_eq!(descriptor.interval_duration_seconds, Some(900));
    }

    #[test]
    fn test_missing_or_empty_feature_is_not_espi() {
        assert!(parse("IntervalDuration=3600;BlockDuration=monthly").is_none());
        assert!(parse("FB=;IntervalDuration=3600").is_none());
        assert!(parse("openid").is_none());
        assert!(parse("").is_none());
    }

    #[test]
    fn test_malformed_numbers_degrade() {
        let descriptor =
            parse("FB=4_5;IntervalDuration=hourly;HistoryLength=-3;BlockDuration=fortnightly")
                .unwrap();
        assert_eq!(descriptor.interval_duration_seconds, None);
        assert_eq!(descriptor.history_length_months, None);
        assert_eq!(descriptor.block_duration, None);
        assert_eq!(describe(&descriptor), "energy usage data (feature set 4_5)");
    }

    #[test]
    fn test_describe_renders_every_field() {
        let text = describe(&parse(HOURLY_MONTHLY).unwrap());
        assert_eq!(
            text,
            "energy usage data (feature set 4_5_15) with 1-hour intervals, monthly billing periods, up to 13 months of history"
        );
    }

    #[test]
    fn test_describe_always_names_feature() {
        let samples = [
            "FB=1",
            "FB=4_16;IntervalDuration=x",
            "FB=4_5_15;IntervalDuration=59;HistoryLength=1",
            "FB=A;BlockDuration=YEARLY;;=;junk",
            "FB=9_9;IntervalDuration=18446744073709551616",
        ];
        for sample in samples {
            let descriptor = parse(sample).unwrap();
            assert!(describe(&descriptor).contains(&descriptor.feature_id), "{sample}");
        }
    }

    #[test]
    fn test_interval_formatting() {
        assert_eq!(format_interval(3600), "1-hour");
        assert_eq!(format_interval(7200), "2-hour");
        assert_eq!(format_interval(900), "15-minute");
        assert_eq!(format_interval(60), "1-minute");
        assert_eq!(format_interval(30), "30-second");
    }

    #[test]
    fn test_classification() {
        assert!(matches!(classify(HOURLY_MONTHLY), ParsedScope::GreenButton(_)));
        assert_eq!(
            classify("openid"),
            ParsedScope::Administrative(AdministrativeScope::OpenId)
        );
        assert_eq!(classify("email"), ParsedScope::Other("email".to_owned()));
    }

    #[test]
    fn test_espi_specific_detection() {
        assert!(is_espi_specific(HOURLY_MONTHLY));
        assert!(is_espi_specific("DataCustodian_Admin_Access"));
        assert!(is_espi_specific("ThirdParty_Admin_Access"));
        assert!(!is_espi_specific("openid"));
        assert!(!is_espi_specific("profile"));
    }

    #[test]
    fn test_split_scope_string_deduplicates() {
        let scopes = split_scope_string("openid  profile openid");
        assert_eq!(scopes.len(), 2);
    }
}
