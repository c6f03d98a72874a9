//! Row Limit Enforcement
//!
//! Textual safety net that caps the result size of a single read statement.
//!
//! # Policy (first match wins)
//! 1. Internal `;` (looks like several statements): unchanged
//! 2. Not a `SELECT`/`WITH` statement: unchanged
//! 3. Ends inside a line comment (an appended clause would be commented out): unchanged
//! 4. `LIMIT` present but not a simple trailing clause: trailing `;` stripped, nothing else
//! 5. No `LIMIT`: ` LIMIT <max>` appended
//! 6. Simple trailing `LIMIT` above the cap: count rewritten, form and offset preserved
//! 7. Simple trailing `LIMIT` within the cap: unchanged
//!
//! # Simple LIMIT grammar
//! Recognized only as the last tokens of the statement, outside parentheses:
//! - `LIMIT <count>`
//! - `LIMIT <count> OFFSET <offset>`
//! - `LIMIT <offset> , <count>`
//!
//! Strings, quoted identifiers and comments are skipped by the tokenizer, so a
//! `limit` inside a literal never counts as the keyword.

use std::ops::Range;

/// Cap the rows a single `SELECT`/`WITH` statement may return
#[must_use]
pub fn enforce_row_limit(sql: &str, max_rows: u64) -> String {
    let body = sql.trim().trim_end_matches(';').trim_end();

    if body.contains(';') {
        return sql.to_string();
    }

    let scan = tokenize(body);
    if scan.ends_in_line_comment || !is_read_statement(&scan.tokens, body) {
        return sql.to_string();
    }

    let has_limit_keyword = scan.tokens.iter().any(|t| t.is_keyword(body, "LIMIT"));
    if !has_limit_keyword {
        return format!("{body} LIMIT {max_rows}");
    }

    let Some(clause) = match_simple_limit(&scan.tokens, body) else {
        // LIMIT BY, WITH TIES, placeholders, subquery limits: refuse to edit
        return body.to_string();
    };

    match clause.count {
        Some(count) if count <= max_rows => sql.to_string(),
        _ => {
            let mut rewritten = String::with_capacity(body.len() + 8);
            rewritten.push_str(&body[..clause.count_span.start]);
            rewritten.push_str(&max_rows.to_string());
            rewritten.push_str(&body[clause.count_span.end..]);
            rewritten
        }
    }
}

/// Trailing `LIMIT` clause recognized by the simple grammar
#[derive(Debug, Clone, PartialEq, Eq)]
struct SimpleLimit {
    /// Parsed row count; `None` when the literal overflows `u64`
    count: Option<u64>,
    /// Byte span of the count literal within the statement body
    count_span: Range<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokenKind {
    Word,
    Number,
    Comma,
    OpenParen,
    CloseParen,
    Quoted,
    Other,
}

#[derive(Debug, Clone)]
struct Token {
    kind: TokenKind,
    span: Range<usize>,
    depth: usize,
}

impl Token {
    fn text<'a>(&self, body: &'a str) -> &'a str {
        &body[self.span.clone()]
    }

    fn is_keyword(&self, body: &str, keyword: &str) -> bool {
        self.kind == TokenKind::Word && self.text(body).eq_ignore_ascii_case(keyword)
    }
}

struct Scan {
    tokens: Vec<Token>,
    ends_in_line_comment: bool,
}

/// Tokenize a statement body, dropping whitespace and comments
fn tokenize(body: &str) -> Scan {
    let bytes = body.as_bytes();
    let mut tokens = Vec::new();
    let mut depth = 0usize;
    let mut i = 0;
    let mut ends_in_line_comment = false;

    while i < bytes.len() {
        let b = bytes[i];
        let start = i;

        if b.is_ascii_whitespace() {
            i += 1;
            continue;
        }

        // Line comments: `--` or `#` to end of line
        if b == b'#' || (b == b'-' && bytes.get(i + 1) == Some(&b'-')) {
            match body[i..].find('\n') {
                Some(offset) => i += offset + 1,
                None => {
                    ends_in_line_comment = true;
                    i = bytes.len();
                }
            }
            continue;
        }

        // Block comments
        if b == b'/' && bytes.get(i + 1) == Some(&b'*') {
            i = body[i + 2..].find("*/").map_or(bytes.len(), |offset| i + 2 + offset + 2);
            continue;
        }

        let kind = match b {
            b'\'' | b'"' | b'`' => {
                i = body[i + 1..].find(b as char).map_or(bytes.len(), |offset| i + 1 + offset + 1);
                TokenKind::Quoted
            }
            b'(' => {
                i += 1;
                depth += 1;
                TokenKind::OpenParen
            }
            b')' => {
                i += 1;
                depth = depth.saturating_sub(1);
                TokenKind::CloseParen
            }
            b',' => {
                i += 1;
                TokenKind::Comma
            }
            b'0'..=b'9' => {
                while i < bytes.len() && bytes[i].is_ascii_digit() {
                    i += 1;
                }
                // `10e3`, `1.5`, `0x1F` are not plain counts
                if i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'.' || bytes[i] == b'_') {
                    while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'.' || bytes[i] == b'_') {
                        i += 1;
                    }
                    TokenKind::Other
                } else {
                    TokenKind::Number
                }
            }
            _ if b.is_ascii_alphabetic() || b == b'_' || !b.is_ascii() => {
                while i < bytes.len()
                    && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_' || bytes[i] == b'$' || !bytes[i].is_ascii())
                {
                    i += 1;
                }
                TokenKind::Word
            }
            _ => {
                i += 1;
                TokenKind::Other
            }
        };

        // Parentheses report the depth outside themselves
        let token_depth = if kind == TokenKind::OpenParen { depth - 1 } else { depth };
        tokens.push(Token { kind, span: start..i, depth: token_depth });
    }

    Scan { tokens, ends_in_line_comment }
}

/// Whether the statement starts with `SELECT` or `WITH`
fn is_read_statement(tokens: &[Token], body: &str) -> bool {
    tokens
        .iter()
        .find(|t| t.kind != TokenKind::OpenParen)
        .is_some_and(|t| t.is_keyword(body, "SELECT") || t.is_keyword(body, "WITH"))
}

/// Match one of the three simple trailing LIMIT shapes
fn match_simple_limit(tokens: &[Token], body: &str) -> Option<SimpleLimit> {
    let top_level = |t: &Token| t.depth == 0;
    let number = |t: &Token| t.kind == TokenKind::Number && top_level(t);
    let limit = |t: &Token| t.is_keyword(body, "LIMIT") && top_level(t);

    let count_token = match tokens {
        // LIMIT <offset> , <count>
        [.., l, offset, comma, count]
            if limit(l) && number(offset) && comma.kind == TokenKind::Comma && number(count) =>
        {
            count
        }
        // LIMIT <count> OFFSET <offset>
        [.., l, count, kw, offset]
            if limit(l) && number(count) && kw.is_keyword(body, "OFFSET") && number(offset) =>
        {
            count
        }
        // LIMIT <count>
        [.., l, count] if limit(l) && number(count) => count,
        _ => return None,
    };

    Some(SimpleLimit {
        count: count_token.text(body).parse().ok(),
        count_span: count_token.span.clone(),
    })
}
