//! Rendering of source default literals as PostgreSQL DEFAULT clauses.
//!
//! A default is only emitted when it is known to be valid for the target
//! type's literal syntax. Anything doubtful produces no clause at all.

use crate::core::identifier::quote_literal;

const TRUE_TOKENS: &[&str] = &["true", "t", "1", "yes", "y"];
const FALSE_TOKENS: &[&str] = &["false", "f", "0", "no", "n"];
const TEMPORAL_KEYWORDS: &[&str] = &["CURRENT_TIMESTAMP", "CURRENT_DATE", "CURRENT_TIME"];

/// Whether a target type is boolean.
pub fn is_boolean_target(target_type: &str) -> bool {
    matches!(
        target_type.trim().to_ascii_uppercase().as_str(),
        "BOOLEAN" | "BOOL"
    )
}

/// Whether a target type takes a bare numeric literal.
pub fn is_numeric_target(target_type: &str) -> bool {
    let upper = target_type.trim().to_ascii_uppercase();
    let keyword = upper.split('(').next().unwrap_or_default().trim();
    matches!(
        keyword,
        "NUMERIC"
            | "DECIMAL"
            | "BIGINT"
            | "INTEGER"
            | "INT"
            | "INT2"
            | "INT4"
            | "INT8"
            | "SMALLINT"
            | "REAL"
            | "FLOAT"
            | "FLOAT4"
            | "FLOAT8"
            | "DOUBLE PRECISION"
            | "BIGSERIAL"
            | "SERIAL"
    )
}

fn is_temporal_target(target_type: &str) -> bool {
    let upper = target_type.trim().to_ascii_uppercase();
    upper.starts_with("TIMESTAMP") || upper.starts_with("DATE") || upper.starts_with("TIME")
}

/// Strip one layer of single quotes, undoubling embedded ones.
fn unwrap_quoted(raw: &str) -> (String, bool) {
    let trimmed = raw.trim();
    if trimmed.len() >= 2 && trimmed.starts_with('\'') && trimmed.ends_with('\'') {
        (trimmed[1..trimmed.len() - 1].replace("''", "'"), true)
    } else {
        (trimmed.to_string(), false)
    }
}

/// Render `raw` as a DEFAULT clause for a column of `target_type`.
///
/// Returns `None` when there is no default or it cannot be proven valid.
pub fn format_default(target_type: &str, raw: Option<&str>) -> Option<String> {
    let raw = raw?;
    if raw.trim().is_empty() {
        return None;
    }
    let (value, was_quoted) = unwrap_quoted(raw);
    if !was_quoted && value.eq_ignore_ascii_case("null") {
        return None;
    }

    if is_boolean_target(target_type) {
        let token = value.to_lowercase();
        return if TRUE_TOKENS.contains(&token.as_str()) {
            Some("DEFAULT TRUE".to_string())
        } else if FALSE_TOKENS.contains(&token.as_str()) {
            Some("DEFAULT FALSE".to_string())
        } else {
            None
        };
    }

    if is_numeric_target(target_type) {
        let number = value.trim();
        return match number.parse::<f64>() {
            Ok(n) if n.is_finite() => Some(format!("DEFAULT {}", number)),
            _ => None,
        };
    }

    if !was_quoted && is_temporal_target(target_type) {
        let upper = value.to_ascii_uppercase();
        if TEMPORAL_KEYWORDS.contains(&upper.as_str()) {
            return Some(format!("DEFAULT {}", upper));
        }
    }

    Some(format!("DEFAULT {}", quote_literal(&value)))
}
