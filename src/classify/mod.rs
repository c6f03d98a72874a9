//! Statement Classification
//!
//! Derives the operation label and the short display title of a statement.
//!
//! # Strategy
//! - Comments are stripped before looking at the leading keyword
//! - Only the leading verb is inspected (no parsing)
//! - Known verbs collapse into coarse categories (`DDL`, `TXN`); anything
//!   else is reported as its own upper-cased verb

use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

/// Maximum number of statement characters shown in a result title
pub const TITLE_SQL_CHARS: usize = 40;

/// Classified operation of a statement
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum SqlOp {
    Select,
    Insert,
    Update,
    Delete,
    Replace,
    /// CREATE, ALTER, DROP, TRUNCATE, RENAME
    Ddl,
    /// BEGIN, START TRANSACTION, COMMIT, ROLLBACK, SAVEPOINT, RELEASE
    Txn,
    /// Any other leading verb, upper-cased (e.g. `SHOW`, `PRAGMA`, `EXPLAIN`)
    Other(String),
}

impl SqlOp {
    /// Label used in titles and JSON output
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Select => "SELECT",
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
            Self::Replace => "REPLACE",
            Self::Ddl => "DDL",
            Self::Txn => "TXN",
            Self::Other(verb) => verb,
        }
    }
}

impl fmt::Display for SqlOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for SqlOp {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl From<String> for SqlOp {
    fn from(label: String) -> Self {
        from_verb(&label)
    }
}

/// Classify a statement by its leading verb
#[must_use]
pub fn classify_statement(sql: &str) -> SqlOp {
    let stripped = strip_comments(sql);
    let verb = stripped
        .trim_start_matches(|c: char| c.is_whitespace() || c == '(')
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .next()
        .unwrap_or_default();

    if verb.is_empty() {
        return SqlOp::Other("SQL".to_string());
    }
    from_verb(verb)
}

fn from_verb(verb: &str) -> SqlOp {
    let upper = verb.to_uppercase();
    match upper.as_str() {
        "SELECT" | "WITH" | "VALUES" | "TABLE" => SqlOp::Select,
        "INSERT" => SqlOp::Insert,
        "UPDATE" => SqlOp::Update,
        "DELETE" => SqlOp::Delete,
        "REPLACE" => SqlOp::Replace,
        "CREATE" | "ALTER" | "DROP" | "TRUNCATE" | "RENAME" | "DDL" => SqlOp::Ddl,
        "BEGIN" | "START" | "COMMIT" | "ROLLBACK" | "SAVEPOINT" | "RELEASE" | "TXN" => SqlOp::Txn,
        _ => SqlOp::Other(upper),
    }
}

/// Short label for a result set: `"<OP>: <first 40 chars>"`
///
/// Comments are dropped and runs of whitespace collapse to one space so that
/// multi-line statements still produce a one-line title.
#[must_use]
pub fn derive_title(op: &SqlOp, sql: &str) -> String {
    let stripped = strip_comments(sql);
    let collapsed = stripped.split_whitespace().collect::<Vec<_>>().join(" ");
    let head: String = collapsed.chars().take(TITLE_SQL_CHARS).collect();
    format!("{op}: {}", head.trim_end())
}

/// Strip SQL comments from a statement
///
/// Handles:
/// - Line comments: `-- comment` and `# comment`
/// - Block comments: `/* comment */`
///
/// Quoted text is copied verbatim so comment markers inside strings survive.
#[must_use]
pub fn strip_comments(sql: &str) -> String {
    let mut result = String::with_capacity(sql.len());
    let mut chars = sql.chars().peekable();
    let mut quote: Option<char> = None;

    while let Some(ch) = chars.next() {
        if let Some(open) = quote {
            result.push(ch);
            if ch == open {
                quote = None;
            }
            continue;
        }

        match ch {
            '\'' | '"' | '`' => {
                quote = Some(ch);
                result.push(ch);
            }
            '-' if chars.peek() == Some(&'-') => {
                chars.next();
                skip_line(&mut chars, &mut result);
            }
            '#' => skip_line(&mut chars, &mut result),
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = ' ';
                for ch in chars.by_ref() {
                    if prev == '*' && ch == '/' {
                        break;
                    }
                    prev = ch;
                }
                result.push(' ');
            }
            _ => result.push(ch),
        }
    }

    result
}

fn skip_line(chars: &mut std::iter::Peekable<std::str::Chars<'_>>, result: &mut String) {
    for ch in chars.by_ref() {
        if ch == '\n' {
            result.push('\n');
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_classify_dml() {
        assert_eq!(classify_statement("SELECT * FROM users"), SqlOp::Select);
        assert_eq!(classify_statement("insert into t values (1)"), SqlOp::Insert);
        assert_eq!(classify_statement("Update t SET a = 1"), SqlOp::Update);
        assert_eq!(classify_statement("DELETE FROM t"), SqlOp::Delete);
        assert_eq!(classify_statement("REPLACE INTO t VALUES (1)"), SqlOp::Replace);
    }

    #[test]
    fn test_classify_cte_as_select() {
        assert_eq!(classify_statement("WITH x AS (SELECT 1) SELECT * FROM x"), SqlOp::Select);
    }

    #[test]
    fn test_classify_ddl() {
        for sql in ["CREATE TABLE t (id INT)", "ALTER TABLE t ADD c INT", "DROP TABLE t", "TRUNCATE t"] {
            assert_eq!(classify_statement(sql), SqlOp::Ddl, "{sql}");
        }
    }

    #[test]
    fn test_classify_transaction_control() {
        for sql in ["BEGIN", "START TRANSACTION", "COMMIT", "ROLLBACK", "SAVEPOINT a", "RELEASE a"] {
            assert_eq!(classify_statement(sql), SqlOp::Txn, "{sql}");
        }
    }

    #[test]
    fn test_classify_other_verbs() {
        assert_eq!(classify_statement("show tables"), SqlOp::Other("SHOW".to_string()));
        assert_eq!(classify_statement("PRAGMA table_info(t)"), SqlOp::Other("PRAGMA".to_string()));
        assert_eq!(classify_statement("EXPLAIN SELECT 1"), SqlOp::Other("EXPLAIN".to_string()));
    }

    #[test]
    fn test_classify_skips_comments_and_parens() {
        assert_eq!(classify_statement("-- load\n/* x */ (SELECT 1)"), SqlOp::Select);
        assert_eq!(classify_statement("# mysql style\nDELETE FROM t"), SqlOp::Delete);
    }

    #[test]
    fn test_classify_without_verb() {
        assert_eq!(classify_statement("   "), SqlOp::Other("SQL".to_string()));
    }

    #[test]
    fn test_sql_op_serialization() {
        assert_eq!(serde_json::to_string(&SqlOp::Ddl).unwrap(), r#""DDL""#);
        assert_eq!(serde_json::to_string(&SqlOp::Other("SHOW".into())).unwrap(), r#""SHOW""#);
        let op: SqlOp = serde_json::from_str(r#""TXN""#).unwrap();
        assert_eq!(op, SqlOp::Txn);
    }

    #[test]
    fn test_title_truncates_to_forty_chars() {
        let sql = "SELECT id, name, email, created_at FROM users WHERE active = 1";
        let title = derive_title(&SqlOp::Select, sql);
        assert_eq!(title, "SELECT: SELECT id, name, email, created_at FROM");
    }

    #[test]
    fn test_title_collapses_whitespace() {
        let title = derive_title(&SqlOp::Ddl, "-- make table\nCREATE TABLE t (\n  id INT\n)");
        assert_eq!(title, "DDL: CREATE TABLE t ( id INT )");
    }

    #[test]
    fn test_strip_comments_keeps_quoted_markers() {
        let stripped = strip_comments("SELECT '-- not a comment' -- real comment\nFROM t");
        assert!(stripped.contains("'-- not a comment'"));
        assert!(!stripped.contains("real comment"));
        assert!(stripped.contains("FROM t"));
    }

    #[test]
    fn test_strip_block_comments() {
        let stripped = strip_comments("SELECT * /* block comment */ FROM users");
        assert!(stripped.contains("SELECT"));
        assert!(stripped.contains("FROM"));
        assert!(!stripped.contains("block comment"));
    }
}
