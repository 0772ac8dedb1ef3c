/// Canonical provider base URL, version segment included.
///
/// Every outbound call targets this single API version; older callers that
/// still send a version prefix have it stripped by [`crate::path::normalize`].
pub const DEFAULT_PROVIDER_BASE_URL: &str = "https://api.esignature-provider.com/v3";

/// Fixed prefix under which the gateway mounts the provider proxy.
pub const PROXY_PREFIX: &str = "/api/provider";

/// Query parameter older callers use to pass the provider path.
pub const PATH_QUERY_PARAM: &str = "path";

/// Header carrying the hex HMAC-SHA256 of a webhook body.
pub const WEBHOOK_SIGNATURE_HEADER: &str = "X-Signature";

/// How many times a lost compare-and-set is re-read and retried.
pub const MAX_CAS_ATTEMPTS: usize = 3;
