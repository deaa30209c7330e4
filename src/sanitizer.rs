//! QuerySanitizer (C10) — the five-step validation pipeline of spec.md
//! §4.10. Grounded on the teacher's `interceptor/safety.rs` regex-pattern
//! checking style and `ai/safety.rs`'s dangerous-operator pattern lists,
//! generalized to the two-engine-family contract this core targets.

use regex::Regex;

use crate::engine::placeholder;
use crate::error::{AppError, AppResult};
use crate::types::{EngineKind, GeneratedQuery, Schema};

/// First-meaningful-token allowlist for relational engines (§4.10.3).
const ALLOWED_FIRST_TOKENS: &[&str] = &["SELECT", "SHOW", "DESCRIBE", "EXPLAIN", "WITH"];

/// The DANGEROUS set (§4.10.4) — any occurrence rejects the query outright.
const DANGEROUS_KEYWORDS: &[&str] = &[
    "UPDATE", "DELETE", "DROP", "ALTER", "CREATE", "INSERT", "TRUNCATE", "REPLACE", "GRANT",
    "REVOKE", "FLUSH", "RESET", "SHUTDOWN", "LOAD DATA", "INTO OUTFILE", "LOAD_FILE", "CALL",
    "EXECUTE", "EXEC",
];

const DANGEROUS_DOCUMENT_OPERATORS: &[&str] = &[
    "$where", "$eval", "insertOne", "insertMany", "updateOne", "updateMany", "deleteOne",
    "deleteMany", "replaceOne", "findAndModify", "drop",
];

#[derive(Debug, Clone)]
pub struct SanitizedQuery {
    pub engine: EngineKind,
    pub text: String,
    pub explanation: String,
}

#[tracing::instrument(skip(generated, schema))]
pub fn sanitize(generated: &GeneratedQuery, schema: &Schema) -> AppResult<SanitizedQuery> {
    let stripped = strip_fences_and_labels(&generated.text);

    reject_empty_multistatement_or_prose(&stripped)?;

    match generated.engine {
        EngineKind::Document => {
            reject_dangerous_document_operators(&stripped)?;
            require_single_document_operator(&stripped)?;
            Ok(SanitizedQuery { engine: generated.engine, text: stripped, explanation: generated.explanation.clone() })
        }
        EngineKind::RelationalA | EngineKind::RelationalB => {
            require_allowed_first_token(&stripped)?;
            reject_dangerous_sql(&stripped)?;
            let qualified = qualify_schema_prefixes(&stripped, schema);
            let substitution = placeholder::substitute_leftover_placeholders(&qualified);
            let mut explanation = generated.explanation.clone();
            for s in &substitution.substitutions {
                explanation.push_str("; ");
                explanation.push_str(&placeholder::describe_substitution(s));
            }
            Ok(SanitizedQuery { engine: generated.engine, text: substitution.text, explanation })
        }
    }
}

/// Step 1: strip code fences, bold markers, and leading `QUERY`/`EXPLANATION` labels.
fn strip_fences_and_labels(text: &str) -> String {
    let fence_re = Regex::new(r"(?s)```[a-zA-Z]*\n?(.*?)```").unwrap();
    let mut out = if let Some(caps) = fence_re.captures(text) {
        caps[1].to_string()
    } else {
        text.to_string()
    };

    out = out.replace("**", "");

    let label_re = Regex::new(r"(?i)^\s*(query|explanation)\s*:?\s*").unwrap();
    while let Some(m) = label_re.find(&out) {
        out.replace_range(m.range(), "");
    }

    out.trim().to_string()
}

/// Step 2: reject empty, multi-statement, or prose-shaped text.
fn reject_empty_multistatement_or_prose(text: &str) -> AppResult<()> {
    if text.is_empty() {
        return Err(AppError::blocked(text, "empty query"));
    }

    let semicolon_re = Regex::new(r";\s*\S").unwrap();
    if semicolon_re.is_match(text) {
        return Err(AppError::blocked(text, "multi-statement query"));
    }

    let prose_markers = ["I'm", "I need", "Could you", "I can", "Sure,"];
    if prose_markers.iter().any(|m| text.starts_with(m)) {
        return Err(AppError::blocked(text, "explanatory prose, not a query"));
    }

    let has_engine_keyword = ALLOWED_FIRST_TOKENS
        .iter()
        .chain(["FIND", "AGGREGATE", "COUNT", "DISTINCT"].iter())
        .any(|kw| text.to_ascii_uppercase().contains(kw));
    if text.len() > 200 && !has_engine_keyword {
        return Err(AppError::blocked(text, "long prose without an engine keyword"));
    }

    Ok(())
}

fn first_token(text: &str) -> String {
    text.split_whitespace().next().unwrap_or("").trim_matches(|c: char| !c.is_alphanumeric()).to_ascii_uppercase()
}

/// Step 3 (relational): the first meaningful token must be an allowed verb.
fn require_allowed_first_token(text: &str) -> AppResult<()> {
    let token = first_token(text);
    if ALLOWED_FIRST_TOKENS.contains(&token.as_str()) {
        Ok(())
    } else {
        Err(AppError::blocked(text, format!("unsupported statement type: {token}")))
    }
}

/// Step 3 (document): must parse as JSON with exactly one allowed operator.
fn require_single_document_operator(text: &str) -> AppResult<()> {
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|_| AppError::blocked(text, "not valid JSON"))?;
    let obj = value.as_object().ok_or_else(|| AppError::blocked(text, "not a JSON object"))?;
    let ops = ["find", "aggregate", "count", "distinct"];
    let present = ops.iter().filter(|op| obj.contains_key(**op)).count();
    if present == 1 {
        Ok(())
    } else {
        Err(AppError::blocked(text, "must contain exactly one of find, aggregate, count, distinct"))
    }
}

/// Step 4 (relational): reject any DANGEROUS-set token or SQL comment marker.
fn reject_dangerous_sql(text: &str) -> AppResult<()> {
    if text.contains("--") || text.contains("/*") {
        return Err(AppError::blocked(text, "SQL comment marker present"));
    }

    let upper = text.to_ascii_uppercase();
    for keyword in DANGEROUS_KEYWORDS {
        let pattern = format!(r"(?i)\b{}\b", regex::escape(keyword));
        if Regex::new(&pattern).unwrap().is_match(&upper) {
            return Err(AppError::blocked(text, format!("dangerous operation: {keyword}")));
        }
    }
    Ok(())
}

/// Step 4 (document): reject `$where`/`$eval` and any write operator.
fn reject_dangerous_document_operators(text: &str) -> AppResult<()> {
    for op in DANGEROUS_DOCUMENT_OPERATORS {
        if text.contains(op) {
            return Err(AppError::blocked(text, format!("dangerous operation: {op}")));
        }
    }
    Ok(())
}

/// Step 5: rewrite unqualified table references following
/// `FROM|JOIN|UPDATE|INTO` to their quoted `"{namespace}"."{name}"` form
/// (engine-appropriate quote style via `EngineKind::quote_ident`).
/// Ambiguous matches (the same bare name in more than one namespace) are
/// left unchanged — §8 boundary behavior defers to execution-time error.
fn qualify_schema_prefixes(text: &str, schema: &Schema) -> String {
    let clause_re = Regex::new(r#"(?i)\b(FROM|JOIN|UPDATE|INTO)\s+("?)([A-Za-z_][A-Za-z0-9_]*)("?)"#).unwrap();

    clause_re
        .replace_all(text, |caps: &regex::Captures| {
            let clause = &caps[1];
            let open_quote = &caps[2];
            let ident = &caps[3];
            let close_quote = &caps[4];

            if !open_quote.is_empty() {
                // Quoted identifiers are passed through per §4.10.5.
                return caps[0].to_string();
            }

            let matches: Vec<_> = schema.tables.iter().filter(|t| t.name.eq_ignore_ascii_case(ident)).collect();
            if matches.len() == 1 {
                let table = matches[0];
                let qualified = if table.namespace.is_empty() {
                    schema.engine.quote_ident(&table.name)
                } else {
                    format!(
                        "{}.{}",
                        schema.engine.quote_ident(&table.namespace),
                        schema.engine.quote_ident(&table.name)
                    )
                };
                format!("{} {}", clause, qualified)
            } else {
                format!("{} {}{}{}", clause, open_quote, ident, close_quote)
            }
        })
        .to_string()
}
