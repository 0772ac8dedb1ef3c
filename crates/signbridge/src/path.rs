//! Resolution of caller request paths to canonical provider resource paths.
//!
//! Callers reach the provider in three historical shapes, all of which must
//! resolve to the same resource:
//!
//! 1. `/api/provider/clients` (path embedded after the proxy prefix)
//! 2. `/api/provider?path=clients` (path passed as a query parameter)
//! 3. `/api/provider/v3/clients` (path still carrying a version prefix)
//!
//! The canonical base URL carries the API version, so version prefixes sent
//! by callers are always stripped.

use std::collections::BTreeMap;
use std::fmt;
use url::Url;

use crate::constants::{PATH_QUERY_PARAM, PROXY_PREFIX};
use crate::error::PathError;

/// A provider resource path relative to the canonical base URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderPath {
    /// Decoded path, always starting with `/`.
    pub path: String,
    /// Forwarded query parameters, sorted by key.
    pub query: Vec<(String, String)>,
}

impl ProviderPath {
    /// Absolute provider URL for this resource under `base`.
    ///
    /// Fails if URL parsing resolved the path outside the base path.
    pub fn join(&self, base: &Url) -> Result<Url, PathError> {
        let mut url = base.clone();
        let base_path = base.path().trim_end_matches('/');
        url.set_path(&format!("{base_path}{}", self.path));
        url.set_query(None);
        url.set_fragment(None);
        if !url.path().starts_with(&format!("{base_path}/")) {
            return Err(PathError::Traversal);
        }
        if !self.query.is_empty() {
            url.query_pairs_mut().extend_pairs(self.query.iter());
        }
        Ok(url)
    }
}

impl fmt::Display for ProviderPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)?;
        if !self.query.is_empty() {
            let encoded = url::form_urlencoded::Serializer::new(String::new())
                .extend_pairs(self.query.iter())
                .finish();
            write!(f, "?{encoded}")?;
        }
        Ok(())
    }
}

/// Resolve `raw_path` and `query` to a canonical [`ProviderPath`].
///
/// A path embedded in `raw_path` wins over the `path` query parameter.
pub fn normalize(
    raw_path: &str,
    query: &BTreeMap<String, String>,
) -> Result<ProviderPath, PathError> {
    let embedded = match raw_path.strip_prefix(PROXY_PREFIX) {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => rest,
        _ => raw_path,
    };

    let candidate = if is_blank(embedded) {
        query
            .get(PATH_QUERY_PARAM)
            .map(String::as_str)
            .filter(|p| !is_blank(p))
            .ok_or(PathError::Missing)?
    } else {
        embedded
    };

    let decoded = urlencoding::decode(candidate).map_err(|_| PathError::InvalidEncoding)?;
    let relative = decoded.strip_prefix('/').unwrap_or(decoded.as_ref());
    validate(relative)?;

    let mut segments: Vec<&str> = relative
        .trim_end_matches('/')
        .split('/')
        .collect();
    strip_version_prefix(&mut segments);

    if segments.iter().all(|s| s.is_empty()) {
        return Err(PathError::Missing);
    }
    if segments.iter().any(|s| s.is_empty()) {
        return Err(PathError::ForbiddenSequence("empty path segment"));
    }
    if segments.iter().any(|s| *s == ".") {
        return Err(PathError::Traversal);
    }

    let query = query
        .iter()
        .filter(|(key, _)| key.as_str() != PATH_QUERY_PARAM)
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    Ok(ProviderPath {
        path: format!("/{}", segments.join("/")),
        query,
    })
}

fn is_blank(path: &str) -> bool {
    path.trim_matches('/').trim().is_empty()
}

fn validate(path: &str) -> Result<(), PathError> {
    if path.starts_with('/') {
        return Err(PathError::ForbiddenSequence("//"));
    }
    if path.contains("..") {
        return Err(PathError::Traversal);
    }
    // One decoding pass is all callers get. Anything still encoded would be
    // decoded again by URL parsing downstream.
    if path.to_ascii_lowercase().contains("%2e") {
        return Err(PathError::Traversal);
    }
    if path.contains('%') {
        return Err(PathError::InvalidEncoding);
    }
    for (needle, label) in [
        ("@", "@"),
        ("\\", "backslash"),
        ("\r", "newlines"),
        ("\n", "newlines"),
        ("\0", "null bytes"),
        ("#", "#"),
        ("?", "?"),
    ] {
        if path.contains(needle) {
            return Err(PathError::ForbiddenSequence(label));
        }
    }
    Ok(())
}

/// Drop a leading `v<N>` or `api/v<N>` from the segments.
fn strip_version_prefix(segments: &mut Vec<&str>) {
    let skip = match segments.as_slice() {
        ["api", v, ..] if is_version(v) => 2,
        [v, ..] if is_version(v) => 1,
        _ => 0,
    };
    segments.drain(..skip);
}

fn is_version(segment: &str) -> bool {
    segment
        .strip_prefix('v')
        .is_some_and(|n| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn q(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_three_shapes_resolve_identically() {
        let embedded = normalize("/api/provider/clients", &q(&[])).unwrap();
        let via_query = normalize("/api/provider", &q(&[("path", "clients")])).unwrap();
        let via_query_slash = normalize("/api/provider/", &q(&[("path", "/clients")])).unwrap();
        let versioned = normalize("/api/provider/v3/clients", &q(&[])).unwrap();
        let api_versioned = normalize("/api/provider", &q(&[("path", "/api/v2/clients")])).unwrap();

        assert_eq!(embedded.path, "/clients");
        for other in [via_query, via_query_slash, versioned, api_versioned] {
            assert_eq!(other, embedded);
        }
    }

    #[test]
    fn test_nested_resource_and_trailing_slash() {
        let path = normalize("/api/provider/documents/doc-1/signers/", &q(&[])).unwrap();
        assert_eq!(path.path, "/documents/doc-1/signers");
    }

    #[test]
    fn test_path_without_proxy_prefix() {
        let path = normalize("/v1/documents", &q(&[])).unwrap();
        assert_eq!(path.path, "/documents");
    }

    #[test]
    fn test_embedded_path_wins_over_query() {
        let path = normalize("/api/provider/clients", &q(&[("path", "documents")])).unwrap();
        assert_eq!(path.path, "/clients");
    }

    #[test]
    fn test_forwarded_query_excludes_path_and_is_sorted() {
        let via_query = normalize(
            "/api/provider",
            &q(&[("path", "clients"), ("page", "2"), ("limit", "50")]),
        )
        .unwrap();
        let embedded =
            normalize("/api/provider/clients", &q(&[("limit", "50"), ("page", "2")])).unwrap();

        assert_eq!(via_query, embedded);
        assert_eq!(
            embedded.query,
            vec![
                ("limit".to_string(), "50".to_string()),
                ("page".to_string(), "2".to_string())
            ]
        );
        assert_eq!(embedded.to_string(), "/clients?limit=50&page=2");
    }

    #[test]
    fn test_missing_path() {
        assert_eq!(normalize("/api/provider", &q(&[])), Err(PathError::Missing));
        assert_eq!(normalize("/api/provider/", &q(&[("path", "  ")])), Err(PathError::Missing));
        assert_eq!(normalize("/api/provider/v3", &q(&[])), Err(PathError::Missing));
    }

    #[test]
    fn test_rejects_traversal_and_injection() {
        assert_eq!(
            normalize("/api/provider/../admin", &q(&[])),
            Err(PathError::Traversal)
        );
        assert_eq!(
            normalize("/api/provider/%2e%2e/admin", &q(&[])),
            Err(PathError::Traversal)
        );
        assert!(normalize("/api/provider", &q(&[("path", "//evil.example/x")])).is_err());
        assert!(normalize("/api/provider/user@evil.example", &q(&[])).is_err());
        assert!(normalize("/api/provider/clients%0d%0aX-Injected:1", &q(&[])).is_err());
        assert!(normalize("/api/provider/clients%3Fadmin=1", &q(&[])).is_err());
        assert!(normalize("/api/provider/clients//x", &q(&[])).is_err());
        assert_eq!(
            normalize("/api/provider/./clients", &q(&[])),
            Err(PathError::Traversal)
        );
    }

    #[test]
    fn test_rejects_double_encoded_traversal() {
        assert_eq!(
            normalize("/api/provider/%252e%252e/v1/documents", &q(&[])),
            Err(PathError::Traversal)
        );
        assert_eq!(
            normalize("/api/provider/%252E%252E/v1/documents", &q(&[])),
            Err(PathError::Traversal)
        );
        // The query value arrives form-decoded once already.
        assert_eq!(
            normalize("/api/provider", &q(&[("path", "%252e%252e/v1/documents")])),
            Err(PathError::Traversal)
        );
        assert_eq!(
            normalize("/api/provider", &q(&[("path", "%2e%2e/v1/documents")])),
            Err(PathError::Traversal)
        );
        assert_eq!(
            normalize("/api/provider/clients%2541", &q(&[])),
            Err(PathError::InvalidEncoding)
        );
    }

    #[test]
    fn test_join_never_leaves_base_path() {
        let base = Url::parse("https://api.esignature-provider.com/v3").unwrap();
        let escaping = ProviderPath {
            path: "/%2e%2e/v1/documents".to_string(),
            query: vec![],
        };
        assert_eq!(escaping.join(&base), Err(PathError::Traversal));
    }

    #[test]
    fn test_version_like_resource_is_kept_after_first_segment() {
        let path = normalize("/api/provider/templates/v2", &q(&[])).unwrap();
        assert_eq!(path.path, "/templates/v2");
    }

    #[test]
    fn test_join_onto_base() {
        let base = Url::parse("https://api.esignature-provider.com/v3").unwrap();
        let path = normalize("/api/provider/clients", &q(&[("page", "2")])).unwrap();
        assert_eq!(
            path.join(&base).unwrap().as_str(),
            "https://api.esignature-provider.com/v3/clients?page=2"
        );

        let base = Url::parse("https://api.esignature-provider.com/v3/").unwrap();
        let path = normalize("/api/provider/clients", &q(&[])).unwrap();
        assert_eq!(
            path.join(&base).unwrap().as_str(),
            "https://api.esignature-provider.com/v3/clients"
        );
    }
}
