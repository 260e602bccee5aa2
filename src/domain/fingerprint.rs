//! Query fingerprinting: turning raw SQL text into a stable identity.
//!
//! The normalization pipeline strips literals, comments and incidental
//! whitespace so that two textually different statements that are "the same
//! query modulo parameters" hash identically.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{MonitorError, MonitorResult};

const SAMPLE_TEXT_MAX_LEN: usize = 4000;

const KEYWORDS: &[&str] = &[
    "SELECT", "FROM", "WHERE", "JOIN", "INNER", "LEFT", "RIGHT", "OUTER", "ON", "GROUP", "BY",
    "ORDER", "HAVING", "INSERT", "INTO", "VALUES", "UPDATE", "SET", "DELETE", "AND", "OR", "NOT",
    "NULL", "IS", "IN", "EXISTS", "BETWEEN", "LIKE", "AS", "DISTINCT", "UNION", "ALL", "TOP",
    "CASE", "WHEN", "THEN", "ELSE", "END", "WITH", "OVER", "PARTITION", "ASC", "DESC",
];

#[derive(Debug, Clone, PartialEq)]
pub struct Fingerprint {
    pub id: Uuid,
    pub hash: [u8; 8],
    pub sample_text: String,
    pub normalized_text: String,
    pub instance_name: String,
    pub database_name: String,
    pub first_seen_utc: DateTime<Utc>,
    pub last_seen_utc: DateTime<Utc>,
    pub is_from_server_hash: bool,
}

impl Fingerprint {
    pub fn touch(&mut self, at: DateTime<Utc>) {
        if at > self.last_seen_utc {
            self.last_seen_utc = at;
        }
    }
}

#[derive(Debug, Clone)]
pub struct FingerprintResult {
    pub hash: [u8; 8],
    pub sample_text: String,
    pub normalized_text: String,
    pub from_server_hash: bool,
}

#[derive(Default, Clone, Copy)]
pub struct Fingerprinter;

impl Fingerprinter {
    pub fn new() -> Self {
        Self
    }

    /// Normalize `sql` and hash the result with SHA-256, truncated to 8 bytes.
    pub fn fingerprint(&self, sql: &str) -> MonitorResult<FingerprintResult> {
        if sql.trim().is_empty() {
            return Err(MonitorError::EmptySql);
        }
        let normalized = normalize(sql);
        let hash = hash8(&normalized);
        Ok(FingerprintResult {
            hash,
            sample_text: truncate_sample(sql),
            normalized_text: normalized,
            from_server_hash: false,
        })
    }

    /// Trust a query hash handed to us directly by the server (sys.dm_exec_query_stats
    /// carries one already) instead of recomputing it from text.
    pub fn fingerprint_from_server_hash(
        &self,
        server_hash: &[u8],
        sql: &str,
    ) -> MonitorResult<FingerprintResult> {
        if server_hash.len() != 8 {
            return Err(MonitorError::InvalidServerHash(server_hash.len()));
        }
        if sql.trim().is_empty() {
            return Err(MonitorError::EmptySql);
        }
        let mut hash = [0u8; 8];
        hash.copy_from_slice(server_hash);
        Ok(FingerprintResult {
            hash,
            sample_text: truncate_sample(sql),
            normalized_text: normalize(sql),
            from_server_hash: true,
        })
    }
}

fn truncate_sample(sql: &str) -> String {
    let trimmed = sql.trim();
    if trimmed.chars().count() <= SAMPLE_TEXT_MAX_LEN {
        trimmed.to_string()
    } else {
        trimmed.chars().take(SAMPLE_TEXT_MAX_LEN).collect()
    }
}

fn hash8(normalized: &str) -> [u8; 8] {
    let digest = Sha256::digest(normalized.as_bytes());
    let mut out = [0u8; 8];
    out.copy_from_slice(&digest[..8]);
    out
}

/// Normalize SQL text: strip comments, fold literals, pad operators,
/// collapse whitespace, uppercase keywords. Idempotent:
/// normalize(normalize(s)) == normalize(s).
pub fn normalize(sql: &str) -> String {
    let no_comments = remove_comments(sql);
    let folded = fold_literals(&no_comments);
    let padded = pad_operators(&folded);
    let uppercased = uppercase_keywords(&padded);
    collapse_whitespace(&uppercased)
}

fn remove_comments(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let bytes: Vec<char> = sql.chars().collect();
    let mut i = 0;
    let mut in_single = false;
    let mut in_double = false;
    while i < bytes.len() {
        let c = bytes[i];
        if !in_single && !in_double && c == '-' && bytes.get(i + 1) == Some(&'-') {
            while i < bytes.len() && bytes[i] != '\n' {
                i += 1;
            }
            continue;
        }
        if !in_single && !in_double && c == '/' && bytes.get(i + 1) == Some(&'*') {
            i += 2;
            while i < bytes.len() && !(bytes[i] == '*' && bytes.get(i + 1) == Some(&'/')) {
                i += 1;
            }
            i += 2;
            continue;
        }
        if c == '\'' && !in_double {
            in_single = !in_single;
        } else if c == '"' && !in_single {
            in_double = !in_double;
        }
        out.push(c);
        i += 1;
    }
    out
}

fn fold_literals(sql: &str) -> String {
    let chars: Vec<char> = sql.chars().collect();
    let mut out = String::with_capacity(chars.len());
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        // N'...' unicode string literal
        if (c == 'N' || c == 'n')
            && chars.get(i + 1) == Some(&'\'')
            && (i == 0 || !is_ident_char(chars[i - 1]))
        {
            let (literal, next) = scan_quoted(&chars, i + 1, '\'');
            out.push_str("N'");
            out.push_str(literal_placeholder(&literal));
            out.push('\'');
            i = next;
            continue;
        }
        if c == '\'' {
            let (literal, next) = scan_quoted(&chars, i, '\'');
            out.push('\'');
            out.push_str(literal_placeholder(&literal));
            out.push('\'');
            i = next;
            continue;
        }
        if c.is_ascii_digit() && (i == 0 || !is_ident_char(chars[i - 1])) {
            let mut j = i;
            while j < chars.len() && (chars[j].is_ascii_digit() || chars[j] == '.') {
                j += 1;
            }
            if j >= chars.len() || !is_ident_char(chars[j]) {
                out.push('#');
                i = j;
                continue;
            }
        }
        out.push(c);
        i += 1;
    }
    out
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Classifies the contents of a quoted literal into its placeholder form.
/// Already-folded markers (`#`, `#DATE#`, `#GUID#`) pass through unchanged so
/// that folding a second time is a no-op.
fn literal_placeholder(content: &str) -> &'static str {
    match content {
        "#" => "#",
        "#DATE#" => "#DATE#",
        "#GUID#" => "#GUID#",
        _ if is_guid(content) => "#GUID#",
        _ if is_date(content) => "#DATE#",
        _ => "#",
    }
}

/// Returns the literal content (without quotes) and the index just past the closing quote.
fn scan_quoted(chars: &[char], start: usize, quote: char) -> (String, usize) {
    let mut i = start + 1;
    let mut content = String::new();
    while i < chars.len() {
        if chars[i] == quote {
            if chars.get(i + 1) == Some(&quote) {
                content.push(quote);
                i += 2;
                continue;
            }
            i += 1;
            break;
        }
        content.push(chars[i]);
        i += 1;
    }
    (content, i)
}

fn is_guid(s: &str) -> bool {
    let s = s.trim();
    let stripped: String = s.chars().filter(|c| *c != '-').collect();
    stripped.len() == 32 && stripped.chars().all(|c| c.is_ascii_hexdigit()) && s.contains('-')
}

fn is_date(s: &str) -> bool {
    let s = s.trim();
    let bytes = s.as_bytes();
    if bytes.len() < 10 {
        return false;
    }
    let digit = |b: u8| b.is_ascii_digit();
    digit(bytes[0])
        && digit(bytes[1])
        && digit(bytes[2])
        && digit(bytes[3])
        && bytes[4] == b'-'
        && digit(bytes[5])
        && digit(bytes[6])
        && bytes[7] == b'-'
        && digit(bytes[8])
        && digit(bytes[9])
}

fn uppercase_keywords(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut word = String::new();
    let flush = |word: &mut String, out: &mut String| {
        if !word.is_empty() {
            if KEYWORDS.contains(&word.to_uppercase().as_str()) {
                out.push_str(&word.to_uppercase());
            } else {
                out.push_str(word);
            }
            word.clear();
        }
    };
    for c in sql.chars() {
        if is_ident_char(c) {
            word.push(c);
        } else {
            flush(&mut word, &mut out);
            out.push(c);
        }
    }
    flush(&mut word, &mut out);
    out
}

/// Pads comparison operators with a single space on each side, regardless of
/// how they were spaced in the source, so `id=99` and `id = 42` converge to
/// the same token sequence before whitespace is collapsed. Runs after
/// literals are folded, so none of these characters can appear inside a
/// string literal anymore.
fn pad_operators(sql: &str) -> String {
    let chars: Vec<char> = sql.chars().collect();
    let mut out = String::with_capacity(chars.len() + 8);
    let mut i = 0;
    while i < chars.len() {
        let two = chars.get(i + 1).map(|&next| (chars[i], next));
        let op = match two {
            Some(('<', '>')) => Some("<>"),
            Some(('<', '=')) => Some("<="),
            Some(('>', '=')) => Some(">="),
            Some(('!', '=')) => Some("!="),
            _ => match chars[i] {
                '=' | '<' | '>' => Some(match chars[i] {
                    '=' => "=",
                    '<' => "<",
                    _ => ">",
                }),
                _ => None,
            },
        };
        if let Some(op) = op {
            while out.ends_with(' ') {
                out.pop();
            }
            out.push(' ');
            out.push_str(op);
            out.push(' ');
            i += op.chars().count();
            while i < chars.len() && chars[i].is_whitespace() {
                i += 1;
            }
            continue;
        }
        out.push(chars[i]);
        i += 1;
    }
    out
}

fn collapse_whitespace(sql: &str) -> String {
    sql.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_sql() {
        let fp = Fingerprinter::new();
        assert!(fp.fingerprint("   ").is_err());
    }

    #[test]
    fn normalize_is_idempotent() {
        let sql = "SELECT * FROM T WHERE id = 42 AND name = 'Bob' -- trailing";
        let once = normalize(sql);
        let twice = normalize(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn normalize_is_idempotent_for_date_and_guid_literals() {
        let sql = "SELECT * FROM T WHERE created = '2020-01-01' AND id = 'A1B2C3D4-E5F6-7890-ABCD-EF1234567890'";
        let once = normalize(sql);
        let twice = normalize(&once);
        assert_eq!(once, twice);
        assert!(once.contains("'#DATE#'"));
        assert!(once.contains("'#GUID#'"));
    }

    #[test]
    fn same_query_different_literals_hash_equal() {
        let fp = Fingerprinter::new();
        let a = fp
            .fingerprint("SELECT * FROM T WHERE id = 42 AND name = 'Bob' -- trailing")
            .unwrap();
        let b = fp
            .fingerprint("select * from T where id=99 and name='Alice'")
            .unwrap();
        assert_eq!(a.hash, b.hash);
    }

    #[test]
    fn preserves_identifiers_that_look_like_numbers() {
        let normalized = normalize("SELECT * FROM table1 WHERE col2 = 5");
        assert!(normalized.contains("table1"));
        assert!(normalized.contains("col2"));
    }

    #[test]
    fn server_hash_must_be_8_bytes() {
        let fp = Fingerprinter::new();
        assert!(fp.fingerprint_from_server_hash(&[1, 2, 3], "SELECT 1").is_err());
        assert!(fp
            .fingerprint_from_server_hash(&[0u8; 8], "SELECT 1")
            .is_ok());
    }
}
