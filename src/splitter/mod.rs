//! Statement Splitting
//!
//! Lexical separation of a SQL submission into individual statements.
//!
//! # Strategy
//! - Single left-to-right scan with one lexical context at a time
//! - `;` only separates statements outside quotes and comments
//! - Recognized contexts: `'...'`, `"..."`, `` `...` ``, `-- ...`, `# ...`, `/* ... */`
//! - Statement text is preserved as written (comments and inner whitespace kept),
//!   only trimmed at the ends
//!
//! This is not a SQL parser. Dialect-specific quoting beyond the three quote
//! characters above (e.g. dollar-quoted bodies) is not recognized.

/// Lexical context of the scanner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Context {
    Code,
    SingleQuote,
    DoubleQuote,
    Backtick,
    LineComment,
    BlockComment,
}

/// Split a SQL submission into trimmed, non-empty statements in source order
///
/// Statements made only of whitespace and comments are dropped, so a submission
/// that contains nothing executable yields an empty vector.
#[must_use]
pub fn split_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut buffer = String::with_capacity(sql.len().min(4096));
    let mut has_code = false;
    let mut context = Context::Code;
    let mut chars = sql.chars().peekable();

    while let Some(ch) = chars.next() {
        match context {
            Context::Code => match ch {
                ';' => {
                    flush(&mut buffer, &mut has_code, &mut statements);
                    continue;
                }
                '\'' => context = Context::SingleQuote,
                '"' => context = Context::DoubleQuote,
                '`' => context = Context::Backtick,
                '#' => context = Context::LineComment,
                '-' if chars.peek() == Some(&'-') => {
                    chars.next();
                    buffer.push_str("--");
                    context = Context::LineComment;
                    continue;
                }
                '/' if chars.peek() == Some(&'*') => {
                    chars.next();
                    buffer.push_str("/*");
                    context = Context::BlockComment;
                    continue;
                }
                _ => {}
            },
            Context::SingleQuote if ch == '\'' => context = Context::Code,
            Context::DoubleQuote if ch == '"' => context = Context::Code,
            Context::Backtick if ch == '`' => context = Context::Code,
            Context::LineComment if ch == '\n' => context = Context::Code,
            Context::BlockComment if ch == '*' && chars.peek() == Some(&'/') => {
                chars.next();
                buffer.push_str("*/");
                context = Context::Code;
                continue;
            }
            _ => {}
        }

        // Quote characters count as code; comment text does not
        if matches!(context, Context::Code | Context::SingleQuote | Context::DoubleQuote | Context::Backtick)
            && !ch.is_whitespace()
        {
            has_code = true;
        }
        buffer.push(ch);
    }

    flush(&mut buffer, &mut has_code, &mut statements);
    statements
}

/// Emit the buffered statement if it holds anything executable, then reset
fn flush(buffer: &mut String, has_code: &mut bool, statements: &mut Vec<String>) {
    if *has_code {
        let trimmed = buffer.trim();
        if !trimmed.is_empty() {
            statements.push(trimmed.to_string());
        }
    }
    buffer.clear();
    *has_code = false;
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_semicolon_inside_single_quotes() {
        assert_eq!(split_statements("SELECT ';' ; SELECT 1"), vec!["SELECT ';'", "SELECT 1"]);
    }

    #[test]
    fn test_semicolon_inside_double_quotes_and_backticks() {
        let sql = r#"SELECT "a;b" FROM `weird;table`; SELECT 2"#;
        assert_eq!(split_statements(sql), vec![r#"SELECT "a;b" FROM `weird;table`"#, "SELECT 2"]);
    }

    #[test]
    fn test_semicolon_inside_line_comments() {
        let sql = "SELECT 1 -- not here;\n; SELECT 2 # nor here;\n";
        assert_eq!(
            split_statements(sql),
            vec!["SELECT 1 -- not here;", "SELECT 2 # nor here;"]
        );
    }

    #[test]
    fn test_semicolon_inside_block_comment() {
        let sql = "SELECT /* a; b */ 1; SELECT 2";
        assert_eq!(split_statements(sql), vec!["SELECT /* a; b */ 1", "SELECT 2"]);
    }

    #[test]
    fn test_block_comment_close_is_consumed_as_pair() {
        // "*/" closes the comment; the following ";" is a real separator
        let sql = "SELECT 1 /* x **/; SELECT 2";
        assert_eq!(split_statements(sql), vec!["SELECT 1 /* x **/", "SELECT 2"]);
    }

    #[test]
    fn test_no_trailing_semicolon() {
        assert_eq!(split_statements("SELECT 1"), vec!["SELECT 1"]);
    }

    #[test]
    fn test_empty_statements_are_skipped() {
        assert_eq!(split_statements(";;  ;\n SELECT 1;;"), vec!["SELECT 1"]);
    }

    #[test]
    fn test_whitespace_and_comment_only_input() {
        assert!(split_statements("").is_empty());
        assert!(split_statements("   \n\t ").is_empty());
        assert!(split_statements("-- nothing here\n/* or here; */ # nor; here").is_empty());
    }

    #[test]
    fn test_leading_comment_is_preserved() {
        let sql = "-- fetch users\nSELECT * FROM users;\n-- trailing note";
        assert_eq!(split_statements(sql), vec!["-- fetch users\nSELECT * FROM users"]);
    }

    #[test]
    fn test_quote_kinds_do_not_nest() {
        // A double quote inside a single-quoted string does not open a new context
        let sql = r#"SELECT 'say "hi;"'; SELECT "it's; fine""#;
        assert_eq!(split_statements(sql), vec![r#"SELECT 'say "hi;"'"#, r#"SELECT "it's; fine""#]);
    }

    #[test]
    fn test_doubled_quote_escape() {
        let sql = "INSERT INTO t VALUES ('it''s; ok'); SELECT 1";
        assert_eq!(split_statements(sql), vec!["INSERT INTO t VALUES ('it''s; ok')", "SELECT 1"]);
    }

    #[test]
    fn test_comment_markers_inside_strings() {
        let sql = "SELECT '-- x; /* y'; SELECT '#;'";
        assert_eq!(split_statements(sql), vec!["SELECT '-- x; /* y'", "SELECT '#;'"]);
    }

    #[test]
    fn test_single_dash_is_not_a_comment() {
        assert_eq!(split_statements("SELECT 3 - 1; SELECT 2"), vec!["SELECT 3 - 1", "SELECT 2"]);
    }

    #[test]
    fn test_rejoin_and_resplit_is_stable() {
        let sql = "CREATE TABLE t (id INT);\nINSERT INTO t VALUES (1), (2);\n\
                   SELECT ';' AS s, \"x;y\" FROM t /* c; */;\nSELECT 1";
        let first = split_statements(sql);
        let second = split_statements(&first.join(";"));
        assert_eq!(first, second);
        assert_eq!(first.len(), 4);
    }

    #[test]
    fn test_unicode_text() {
        let sql = "SELECT '日本語;テキスト'; SELECT 'émoji 🎉'";
        assert_eq!(split_statements(sql), vec!["SELECT '日本語;テキスト'", "SELECT 'émoji 🎉'"]);
    }

    #[test]
    fn test_unterminated_quote_swallows_rest() {
        assert_eq!(split_statements("SELECT 'open; SELECT 2"), vec!["SELECT 'open; SELECT 2"]);
    }
}
