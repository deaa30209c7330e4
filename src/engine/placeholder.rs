//! Best-effort substitution of leftover parameter placeholders (`$n`, `?`)
//! in a sanitized relational query with type-heuristic literal defaults.
//!
//! The LLM is instructed to emit literals, never placeholders (spec.md
//! §4.9), but nothing stops it from emitting one anyway; rather than fail
//! execution on a stray placeholder, substitute a plausible default and
//! record the substitution so the caller can see it happened (§9 open
//! question: retain the behavior, but make it visible).

use regex::Regex;

/// A substitution performed on the query text, to be appended to
/// `GeneratedQuery.explanation`.
#[derive(Debug, Clone, PartialEq)]
pub struct Substitution {
    pub placeholder: String,
    pub column_hint: Option<String>,
    pub literal: String,
}

pub struct SubstitutionResult {
    pub text: String,
    pub substitutions: Vec<Substitution>,
}

/// Column-name fragments that select a numeric default over a quoted string.
const NUMERIC_HINTS: &[&str] = &["amount", "price", "id", "qty", "quantity", "total", "count"];
/// Column-name fragments that select an ISO date literal.
const DATE_HINTS: &[&str] = &["date", "created", "updated", "timestamp"];

pub fn substitute_leftover_placeholders(query: &str) -> SubstitutionResult {
    let positional = Regex::new(r"\$\d+").unwrap();
    let mut substitutions = Vec::new();
    let mut text = query.to_string();

    // `$n` placeholders (Postgres-style).
    while let Some(m) = positional.find(&text) {
        let placeholder = m.as_str().to_string();
        let column_hint = nearest_column_hint(&text, m.start());
        let literal = default_literal_for(column_hint.as_deref());
        substitutions.push(Substitution { placeholder: placeholder.clone(), column_hint, literal: literal.clone() });
        text.replace_range(m.range(), &literal);
    }

    // Bare `?` placeholders (MySQL-style). Skip `?` inside already-substituted
    // literal text by re-scanning only for the raw token.
    let mut out = String::with_capacity(text.len());
    let mut chars = text.char_indices().peekable();
    let mut cursor = 0usize;
    while let Some((idx, ch)) = chars.next() {
        if ch == '?' {
            out.push_str(&text[cursor..idx]);
            let column_hint = nearest_column_hint(&text, idx);
            let literal = default_literal_for(column_hint.as_deref());
            substitutions.push(Substitution { placeholder: "?".to_string(), column_hint, literal: literal.clone() });
            out.push_str(&literal);
            cursor = idx + 1;
        }
    }
    out.push_str(&text[cursor..]);

    SubstitutionResult { text: out, substitutions }
}

/// Looks a short window backwards from a placeholder for `<ident> <op>` and
/// returns `<ident>` lowercased, e.g. `"amount > $1"` -> `Some("amount")`.
fn nearest_column_hint(text: &str, placeholder_start: usize) -> Option<String> {
    let window_start = placeholder_start.saturating_sub(40);
    let window = &text[window_start..placeholder_start];
    let ident_re = Regex::new(r"([A-Za-z_][A-Za-z0-9_\.]*)\s*(=|>|<|>=|<=|!=|LIKE|like)\s*$").unwrap();
    ident_re
        .captures(window)
        .map(|c| c[1].rsplit('.').next().unwrap_or(&c[1]).to_ascii_lowercase())
}

fn default_literal_for(column_hint: Option<&str>) -> String {
    match column_hint {
        Some(hint) if DATE_HINTS.iter().any(|h| hint.contains(h)) => "'1970-01-01'".to_string(),
        Some(hint) if NUMERIC_HINTS.iter().any(|h| hint.contains(h)) => "0".to_string(),
        _ => "''".to_string(),
    }
}

pub fn describe_substitution(s: &Substitution) -> String {
    match &s.column_hint {
        Some(hint) => format!(
            "substituted literal {} for {} (column '{}' -> default)",
            s.literal, s.placeholder, hint
        ),
        None => format!("substituted literal {} for {}", s.literal, s.placeholder),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_hint_substitutes_zero() {
        let result = substitute_leftover_placeholders("SELECT * FROM t WHERE amount > $1");
        assert_eq!(result.text, "SELECT * FROM t WHERE amount > 0");
        assert_eq!(result.substitutions.len(), 1);
    }

    #[test]
    fn date_hint_substitutes_iso_date() {
        let result = substitute_leftover_placeholders("SELECT * FROM t WHERE created_at > $1");
        assert_eq!(result.text, "SELECT * FROM t WHERE created_at > '1970-01-01'");
    }

    #[test]
    fn no_hint_substitutes_empty_string() {
        let result = substitute_leftover_placeholders("SELECT * FROM t WHERE name = $1");
        assert_eq!(result.text, "SELECT * FROM t WHERE name = ''");
    }

    #[test]
    fn query_without_placeholders_is_unchanged() {
        let result = substitute_leftover_placeholders("SELECT * FROM t");
        assert_eq!(result.text, "SELECT * FROM t");
        assert!(result.substitutions.is_empty());
    }

    #[test]
    fn mysql_style_placeholder_substitutes() {
        let result = substitute_leftover_placeholders("SELECT * FROM t WHERE id = ?");
        assert_eq!(result.text, "SELECT * FROM t WHERE id = 0");
    }
}
