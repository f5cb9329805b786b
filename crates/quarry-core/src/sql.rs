//! SQL text helpers: cacheability classification, normalization, and log
//! truncation.
//!
//! None of these parse SQL. Classification is a syntactic look at the first
//! keyword of a statement.

/// Keywords that start a read-only statement.
const CACHEABLE_KEYWORDS: &[&str] = &["SELECT", "WITH"];

/// Returns `true` if the statement is read-only and its results may be cached.
///
/// Leading whitespace, `--` line comments and `/* */` block comments are
/// skipped; the first keyword must then be `SELECT` or `WITH`
/// (case-insensitive).
#[must_use]
pub fn is_cacheable(sql: &str) -> bool {
    let body = skip_leading_trivia(sql);
    let keyword: String = body
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect();
    CACHEABLE_KEYWORDS
        .iter()
        .any(|k| keyword.eq_ignore_ascii_case(k))
}

/// Strips whitespace and comments from the start of `sql`.
fn skip_leading_trivia(mut sql: &str) -> &str {
    loop {
        sql = sql.trim_start();
        if let Some(rest) = sql.strip_prefix("--") {
            sql = match rest.find('\n') {
                Some(end) => &rest[end + 1..],
                None => "",
            };
        } else if let Some(rest) = sql.strip_prefix("/*") {
            sql = match rest.find("*/") {
                Some(end) => &rest[end + 2..],
                // Unterminated comment: nothing left to classify.
                None => "",
            };
        } else {
            return sql;
        }
    }
}

/// Normalizes formatting so that equivalent statements share a cache key.
///
/// - Trailing whitespace is removed from every line.
/// - Common indentation is removed.
/// - Leading and trailing blank lines and whitespace are removed.
/// - Line endings are normalized to LF.
#[must_use]
pub fn normalize_sql(sql: &str) -> String {
    let lines: Vec<&str> = sql.lines().map(str::trim_end).collect();

    let margin = lines
        .iter()
        .filter(|line| !line.is_empty())
        .map(|line| &line[..line.len() - line.trim_start().len()])
        .reduce(common_prefix)
        .unwrap_or("");

    let dedented: Vec<&str> = lines
        .iter()
        .map(|line| line.strip_prefix(margin).unwrap_or(*line))
        .collect();

    dedented.join("\n").trim().to_string()
}

/// Longest common prefix of two strings, on character boundaries.
fn common_prefix<'a>(a: &'a str, b: &str) -> &'a str {
    let end = a
        .char_indices()
        .zip(b.chars())
        .find(|((_, ca), cb)| ca != cb)
        .map_or_else(|| a.len().min(b.len()), |((i, _), _)| i);
    &a[..end]
}

/// Shortens long SQL for log lines, keeping its head and tail.
#[must_use]
pub fn truncate_sql(sql: &str, max_length: usize) -> String {
    let count = sql.chars().count();
    if count <= max_length {
        return sql.to_string();
    }
    let head = max_length * 2 / 3;
    let tail = max_length.saturating_sub(head + 3);
    let head_part: String = sql.chars().take(head).collect();
    let tail_part: String = sql.chars().skip(count - tail).collect();
    format!("{head_part}...{tail_part}")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
