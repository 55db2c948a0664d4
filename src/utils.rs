// Argument guards and log redaction helpers

use reqwest::header::{HeaderMap, AUTHORIZATION};

use crate::error::{BsnError, Result};

const REDACTED: &str = "[REDACTED]";

/// Reject empty or whitespace-only identifiers before any request is built
pub fn require_non_empty<'a>(value: &'a str, what: &str) -> Result<&'a str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(BsnError::Validation(format!("{} must not be empty", what)));
    }
    Ok(trimmed)
}

/// Reject zero or negative numeric identifiers
pub fn require_positive_id(id: i64, what: &str) -> Result<u64> {
    if id <= 0 {
        return Err(BsnError::Validation(format!(
            "{} must be a positive integer, got {}",
            what, id
        )));
    }
    Ok(id as u64)
}

/// Render headers for logging with the Authorization value masked
pub fn redact_headers(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| {
            let shown = if *name == AUTHORIZATION {
                match value.to_str().ok().and_then(|v| v.split_once(' ')) {
                    Some((scheme, _)) => format!("{} {}", scheme, REDACTED),
                    None => REDACTED.to_string(),
                }
            } else {
                value.to_str().unwrap_or("<binary>").to_string()
            };
            (name.as_str().to_string(), shown)
        })
        .collect()
}

/// Truncate a body for log output
pub fn truncate_for_log(body: &str, max: usize) -> String {
    if body.len() <= max {
        return body.to_string();
    }
    let mut end = max;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... ({} bytes total)", &body[..end], body.len())
}
