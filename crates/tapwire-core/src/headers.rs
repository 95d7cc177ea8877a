//! Header copying with credential redaction.

use std::collections::BTreeMap;

use http::HeaderMap;

/// Marker that replaces credential-bearing header values.
pub const REDACTED: &str = "[REDACTED]";

/// Header names whose values are never captured.
const SENSITIVE_HEADERS: &[&str] = &["x-api-key", "authorization"];

/// Returns true if the header carries credentials.
pub fn is_sensitive(name: &str) -> bool {
    SENSITIVE_HEADERS
        .iter()
        .any(|sensitive| name.eq_ignore_ascii_case(sensitive))
}

/// Copies headers into a plain map, masking credential-bearing values.
///
/// Multi-valued headers are joined with `", "`.
pub fn redact_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    collect(headers, true)
}

/// Copies headers into a plain map without redaction.
pub fn copy_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    collect(headers, false)
}

fn collect(headers: &HeaderMap, redact: bool) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();

    for name in headers.keys() {
        let value = if redact && is_sensitive(name.as_str()) {
            REDACTED.to_string()
        } else {
            headers
                .get_all(name)
                .iter()
                .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
                .collect::<Vec<_>>()
                .join(", ")
        };
        map.insert(name.as_str().to_string(), value);
    }

    map
}
