//! Shared HTTP utilities for the job board workspace.
//!
//! Provides framework-agnostic error bodies and the lenient parsing used for
//! path and query parameters.

// ============================================================================
// JSON Response Helpers (framework-agnostic)
// ============================================================================

/// Create a structured error JSON with a default message based on the code.
///
/// Returns: `{"error": {"code": "<code>", "message": "<default message>"}}`
pub fn json_err(code: &str) -> serde_json::Value {
    let message = match code {
        "not_found" => "Resource not found",
        "bad_request" => "Bad request",
        "validation_failed" => "Validation failed",
        "forbidden" => "Access denied",
        "error" | "internal" => "Internal server error",
        _ => code, // Fallback to code as message for unknown codes
    };
    serde_json::json!({"error": {"code": code, "message": message}})
}

/// Create a structured error JSON with a custom message.
///
/// Returns: `{"error": {"code": "<code>", "message": "<message>"}}`
pub fn json_error_with_message(code: &str, message: &str) -> serde_json::Value {
    serde_json::json!({"error": {"code": code, "message": message}})
}

/// Validation error body. `message` joins every problem with a newline and
/// `details` lists them individually.
pub fn json_validation_error(messages: &[String]) -> serde_json::Value {
    serde_json::json!({
        "error": {
            "code": "validation_failed",
            "message": messages.join("\n"),
            "details": messages,
        }
    })
}

// ============================================================================
// Parameter Parsing
// ============================================================================

/// Parse an optional integer query parameter.
///
/// Missing, blank or unparsable values yield `None` so callers fall back to
/// their default instead of rejecting the request.
pub fn parse_int_param(raw: Option<&str>) -> Option<i64> {
    raw.map(str::trim)
        .filter(|s| !s.is_empty())
        .and_then(|s| s.parse().ok())
}

/// Parse a record id path segment. Only positive integers are ids.
pub fn parse_id(raw: &str) -> Option<i64> {
    raw.trim().parse::<i64>().ok().filter(|id| *id > 0)
}

/// Optional free-text parameter: blank counts as absent.
pub fn non_blank(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_err() {
        let err = json_err("not_found");
        assert_eq!(err, serde_json::json!({"error": {"code": "not_found", "message": "Resource not found"}}));

        // Unknown code falls back to code as message
        let err = json_err("custom_error");
        assert_eq!(err, serde_json::json!({"error": {"code": "custom_error", "message": "custom_error"}}));
    }

    #[test]
    fn test_json_error_with_message() {
        let err = json_error_with_message("forbidden", "not your application");
        assert_eq!(
            err,
            serde_json::json!({"error": {"code": "forbidden", "message": "not your application"}})
        );
    }

    #[test]
    fn test_json_validation_error() {
        let err = json_validation_error(&["Titre est obligatoire".into(), "Salaire doit être un nombre".into()]);
        assert_eq!(err["error"]["code"], "validation_failed");
        assert_eq!(err["error"]["message"], "Titre est obligatoire\nSalaire doit être un nombre");
        assert_eq!(err["error"]["details"].as_array().map(Vec::len), Some(2));
    }

    #[test]
    fn test_parse_int_param() {
        assert_eq!(parse_int_param(Some("3")), Some(3));
        assert_eq!(parse_int_param(Some(" -2 ")), Some(-2));
        assert_eq!(parse_int_param(Some("")), None);
        assert_eq!(parse_int_param(Some("ten")), None);
        assert_eq!(parse_int_param(None), None);
    }

    #[test]
    fn test_parse_id() {
        assert_eq!(parse_id("42"), Some(42));
        assert_eq!(parse_id("0"), None);
        assert_eq!(parse_id("-1"), None);
        assert_eq!(parse_id("abc"), None);
        assert_eq!(parse_id("1.5"), None);
    }

    #[test]
    fn test_non_blank() {
        assert_eq!(non_blank(Some(" tech ")), Some("tech".to_string()));
        assert_eq!(non_blank(Some("   ")), None);
        assert_eq!(non_blank(None), None);
    }
}
