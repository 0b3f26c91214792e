//! Failure classification
//!
//! Maps raw runner error text onto a [`FailureType`]. Keyword sets are
//! checked in a fixed priority order: selector, timeout, assertion,
//! navigation, network. The first set with a case-insensitive hit wins, so
//! "Timeout 30000ms exceeded waiting for selector" is a selector failure.

use selfheal_common::FailureType;

const SELECTOR_PATTERNS: &[&str] = &[
    "waiting for selector",
    "selector resolved to",
    "element not found",
    "locator resolved to",
    "no element matching",
    "getbyrole",
    "getbytext",
    "getbytestid",
];

const TIMEOUT_PATTERNS: &[&str] = &["timeout", "exceeded", "timed out"];

const ASSERTION_PATTERNS: &[&str] = &[
    "expect(",
    "tohavetext",
    "tobevisible",
    "tobe(",
    "assertion failed",
    "assertionerror",
];

const NAVIGATION_PATTERNS: &[&str] = &[
    "navigation",
    "net::err",
    "err_name",
    "err_connection",
    "page.goto",
];

const NETWORK_PATTERNS: &[&str] = &["econnrefused", "enotfound", "fetch failed", "network error"];

/// Priority order of the keyword sets
const RULES: &[(FailureType, &[&str])] = &[
    (FailureType::Selector, SELECTOR_PATTERNS),
    (FailureType::Timeout, TIMEOUT_PATTERNS),
    (FailureType::Assertion, ASSERTION_PATTERNS),
    (FailureType::Navigation, NAVIGATION_PATTERNS),
    (FailureType::Network, NETWORK_PATTERNS),
];

/// Classify an error message. Total and pure: unknown text yields
/// [`FailureType::Unknown`].
pub fn classify(error_message: &str) -> FailureType {
    let lower = error_message.to_lowercase();

    RULES
        .iter()
        .find(|(_, patterns)| patterns.iter().any(|p| lower.contains(p)))
        .map(|(failure_type, _)| *failure_type)
        .unwrap_or(FailureType::Unknown)
}
