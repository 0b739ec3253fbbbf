//! Dead-letter snapshot normalization and reason truncation.

use serde_json::{json, Value};

/// Byte cap on the persisted dead-letter reason.
pub const MAX_REASON_BYTES: usize = 500;

/// Normalize the raw message text into a JSON snapshot: if it parses as a
/// JSON object or array it is stored verbatim, otherwise it is wrapped so
/// the original bytes survive in a queryable column.
pub fn normalize_snapshot(raw: &str) -> Value {
    match serde_json::from_str::<Value>(raw) {
        Ok(value @ (Value::Object(_) | Value::Array(_))) => value,
        _ => json!({ "raw": raw }),
    }
}

/// Truncate the reason to at most `MAX_REASON_BYTES`, backing off to the
/// nearest char boundary so a multibyte codepoint is never split.
pub fn truncate_reason(reason: &str) -> &str {
    if reason.len() <= MAX_REASON_BYTES {
        return reason;
    }
    let mut end = MAX_REASON_BYTES;
    while !reason.is_char_boundary(end) {
        end -= 1;
    }
    &reason[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_keeps_json_object_verbatim() {
        let snapshot = normalize_snapshot(r#"{"eventId": "abc", "n": 1}"#);
        assert_eq!(snapshot, json!({"eventId": "abc", "n": 1}));
    }

    #[test]
    fn test_snapshot_keeps_json_array_verbatim() {
        let snapshot = normalize_snapshot("[1, 2, 3]");
        assert_eq!(snapshot, json!([1, 2, 3]));
    }

    #[test]
    fn test_snapshot_wraps_non_json_text() {
        let snapshot = normalize_snapshot("not json at all");
        assert_eq!(snapshot, json!({"raw": "not json at all"}));
    }

    #[test]
    fn test_snapshot_wraps_json_scalars() {
        // Scalars parse as JSON but are not object/array; wrap them too.
        assert_eq!(normalize_snapshot("42"), json!({"raw": "42"}));
        assert_eq!(normalize_snapshot("\"quoted\""), json!({"raw": "\"quoted\""}));
    }

    #[test]
    fn test_reason_shorter_than_cap_is_unchanged() {
        assert_eq!(truncate_reason("decode failure"), "decode failure");
    }

    #[test]
    fn test_reason_truncates_at_cap() {
        let long = "x".repeat(MAX_REASON_BYTES + 100);
        let truncated = truncate_reason(&long);
        assert_eq!(truncated.len(), MAX_REASON_BYTES);
    }

    #[test]
    fn test_reason_never_splits_a_codepoint() {
        // 'é' is two bytes in UTF-8. With a one-byte prefix every char
        // boundary in the run is odd, so the even byte cap falls mid-char
        // and truncation must back off by one.
        let long = format!("x{}", "é".repeat(MAX_REASON_BYTES));
        let truncated = truncate_reason(&long);
        assert_eq!(truncated.len(), MAX_REASON_BYTES - 1);
        assert!(truncated.is_char_boundary(truncated.len()));
        assert!(std::str::from_utf8(truncated.as_bytes()).is_ok());
    }
}
