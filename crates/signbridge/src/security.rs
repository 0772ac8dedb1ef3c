use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Constant-time comparison that does not leak input lengths.
/// Both sides are hashed to fixed-length digests first.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    let ha = Sha256::digest(a);
    let hb = Sha256::digest(b);
    ha.ct_eq(&hb).into()
}

/// Replace every occurrence of `secret` in `text` with `[REDACTED]`.
///
/// Applied to provider error messages before they are logged or echoed,
/// in case the provider reflects the bearer token back.
pub fn redact(text: &str, secret: &str) -> String {
    if secret.is_empty() {
        return text.to_string();
    }
    text.replace(secret, "[REDACTED]")
}

/// [`redact`] applied to every string inside a JSON value.
pub fn redact_value(value: &mut serde_json::Value, secret: &str) {
    match value {
        serde_json::Value::String(s) if !secret.is_empty() && s.contains(secret) => {
            *s = redact(s, secret);
        }
        serde_json::Value::Array(items) => {
            for item in items {
                redact_value(item, secret);
            }
        }
        serde_json::Value::Object(map) => {
            for item in map.values_mut() {
                redact_value(item, secret);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redact_value_walks_nested_strings() {
        let mut value = serde_json::json!({
            "message": "bad token sk_1",
            "errors": [{"hint": "use sk_1 again"}, 42],
            "id": "doc-1"
        });
        redact_value(&mut value, "sk_1");
        assert_eq!(
            value,
            serde_json::json!({
                "message": "bad token [REDACTED]",
                "errors": [{"hint": "use [REDACTED] again"}, 42],
                "id": "doc-1"
            })
        );
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"token", b"token"));
        assert!(!constant_time_eq(b"token", b"token2"));
        assert!(!constant_time_eq(b"", b"x"));
    }

    #[test]
    fn test_redact() {
        assert_eq!(
            redact("bad token sk_live_123 supplied", "sk_live_123"),
            "bad token [REDACTED] supplied"
        );
        assert_eq!(redact("nothing here", ""), "nothing here");
    }
}
