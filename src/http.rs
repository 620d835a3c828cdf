//! Shared helpers for HTTP bodies that end up in logs and errors.

/// Maximum number of characters kept from an error response body.
pub const MAX_ERROR_BODY_CHARS: usize = 256;

const TRUNCATION_MARKER: &str = "...[truncated]";

/// Trim a response body to [`MAX_ERROR_BODY_CHARS`] characters.
///
/// Truncation is done on character boundaries, so multi-byte text never
/// produces an invalid string.
pub fn truncate_body(body: &str) -> String {
    let mut chars = body.chars();
    let head: String = chars.by_ref().take(MAX_ERROR_BODY_CHARS).collect();
    if chars.next().is_some() {
        format!("{head}{TRUNCATION_MARKER}")
    } else {
        head
    }
}
