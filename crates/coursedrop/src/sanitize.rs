//! Helpers for sanitizing data before it enters tracing span attributes.
//!
//! Worker logs are shipped to shared dashboards, so customer emails and
//! credential-bearing URLs are masked before they reach a span or event.

/// Masks the local part of an email address, keeping its first character.
///
/// - `alice@example.com` → `a****@example.com`
/// - `not-an-email` → `****`
pub fn redact_email(email: &str) -> String {
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => {
            let first = local.chars().next().unwrap_or('*');
            format!("{}****@{}", first, domain)
        }
        _ => "****".to_string(),
    }
}

/// Strips userinfo and query string from a URL.
///
/// - `https://user:pw@host/course/x?token=1` → `https://****@host/course/x`
/// - `https://host/course/x/` → `https://host/course/x/` (no change)
pub fn redact_url(url: &str) -> String {
    let without_query = url.split(['?', '#']).next().unwrap_or(url);

    if let Some(scheme_end) = without_query.find("://") {
        let after_scheme = &without_query[scheme_end + 3..];
        let authority_end = after_scheme.find('/').unwrap_or(after_scheme.len());
        if let Some(at_pos) = after_scheme[..authority_end].find('@') {
            let scheme = &without_query[..scheme_end + 3];
            return format!("{}****@{}", scheme, &after_scheme[at_pos + 1..]);
        }
    }

    without_query.to_string()
}
