//! Request header filtering.
//!
//! Two modes. When the bridge is configured with an explicit allow list,
//! only lower-case-equal matches survive. Otherwise a blocklist drops
//! credential, identity and hop-by-hop headers that agent code must not
//! control.

use once_cell::sync::Lazy;
use regex::RegexSet;
use serde_json::{Map, Value};

/// Headers agent code may never smuggle through in blocklist mode:
/// credentials, caller identity, and hop-by-hop/request-smuggling vectors.
static BLOCKED_HEADERS: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new([
        r"^authorization$",
        r"^cookie$",
        r"^host$",
        r"^origin$",
        r"^referer$",
        r"^x-forwarded-",
        r"^x-real-ip$",
        r"^x-client-ip$",
        r"^cf-connecting-ip$",
        r"^true-client-ip$",
        r"^proxy-",
        r"^transfer-encoding$",
        r"^connection$",
        r"^upgrade$",
        r"^te$",
    ])
    .expect("static header patterns compile")
});

/// Filter sandbox-supplied headers down to the set forwarded to the handler.
pub(crate) fn filter_headers(
    headers: &Map<String, Value>,
    allowed: Option<&[String]>,
) -> Vec<(String, String)> {
    headers
        .iter()
        .filter(|(name, _)| match allowed {
            Some(allow) => allow.iter().any(|a| a.eq_ignore_ascii_case(name)),
            None => !BLOCKED_HEADERS.is_match(&name.to_ascii_lowercase()),
        })
        .map(|(name, value)| (name.clone(), super::bridge::stringify(value)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn header_map(names: &[&str]) -> Map<String, Value> {
        names
            .iter()
            .map(|n| (n.to_string(), json!("v")))
            .collect()
    }

    #[test]
    fn blocklist_drops_credential_and_identity_headers() {
        let headers = header_map(&[
            "authorization",
            "cookie",
            "host",
            "x-forwarded-for",
            "proxy-authorization",
            "accept",
            "x-custom",
        ]);
        let mut kept: Vec<String> = filter_headers(&headers, None)
            .into_iter()
            .map(|(n, _)| n)
            .collect();
        kept.sort();
        assert_eq!(kept, ["accept", "x-custom"]);
    }

    #[test]
    fn blocklist_is_case_insensitive() {
        let headers = header_map(&["Authorization", "COOKIE", "X-Forwarded-Host", "Accept"]);
        let kept: Vec<String> = filter_headers(&headers, None)
            .into_iter()
            .map(|(n, _)| n)
            .collect();
        assert_eq!(kept, ["Accept"]);
    }

    #[test]
    fn whitelist_keeps_only_listed_headers() {
        let headers = header_map(&["accept", "content-type", "x-custom", "authorization"]);
        let allow = vec!["accept".to_string(), "content-type".to_string()];
        let mut kept: Vec<String> = filter_headers(&headers, Some(&allow))
            .into_iter()
            .map(|(n, _)| n)
            .collect();
        kept.sort();
        assert_eq!(kept, ["accept", "content-type"]);
    }

    #[test]
    fn whitelist_matches_case_insensitively() {
        let headers = header_map(&["Content-Type"]);
        let allow = vec!["content-type".to_string()];
        assert_eq!(filter_headers(&headers, Some(&allow)).len(), 1);
    }

    #[test]
    fn prefix_patterns_catch_whole_families() {
        let headers = header_map(&["x-forwarded-proto", "proxy-connection", "te"]);
        assert!(filter_headers(&headers, None).is_empty());
    }

    #[test]
    fn non_string_values_are_stringified() {
        let mut headers = Map::new();
        headers.insert("x-retries".to_string(), json!(3));
        let kept = filter_headers(&headers, None);
        assert_eq!(kept, [("x-retries".to_string(), "3".to_string())]);
    }
}
