//! SQL text obfuscation and normalization.
//!
//! Captured statement text is tokenized, every literal is replaced with `?`,
//! comments are dropped and whitespace runs collapse to one space. The
//! redacted text is then hashed so that statements differing only in their
//! literal values group together:
//!
//! ```rust
//! use deadlock_graph::obfuscate::Obfuscator;
//!
//! let obfuscator = Obfuscator::default();
//! let a = obfuscator.normalize("UPDATE t SET b=b+10 WHERE a=1;");
//! let b = obfuscator.normalize("UPDATE t SET b=b+10 WHERE a=2;");
//!
//! assert_eq!(a.redacted_text, "UPDATE t SET b=b+? WHERE a=?;");
//! assert_eq!(a.normalized_hash, b.normalized_hash);
//! ```
//!
//! Text the lexer cannot close (an unterminated string, quoted identifier or
//! block comment) is not an error. It is reported as a single opaque `?`,
//! hashed over the raw text as-is.

mod lexer;
mod metadata;
mod options;

pub use options::ObfuscationOptions;

use std::borrow::Cow;

use deadlock_types::QuerySignature;
use sha2::{Digest, Sha256};
use tracing::debug;

use lexer::{tokenize, Token, TokenKind};

/// Number of digest bytes kept in a normalized hash.
const HASH_BYTES: usize = 8;

/// Hash text the way every signature is hashed: the first eight bytes of its
/// SHA-256 digest, as 16 lowercase hex characters.
pub fn hash_text(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    hex::encode(&digest[..HASH_BYTES])
}

/// The output of [`Obfuscator::normalize`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Normalized {
    pub redacted_text: String,
    pub normalized_hash: String,
    pub commands: Vec<String>,
    pub tables: Vec<String>,
    pub opaque: bool,
}

impl Normalized {
    /// The result for a session with no captured text.
    pub fn empty() -> Self {
        Self {
            redacted_text: String::new(),
            normalized_hash: hash_text(""),
            commands: Vec::new(),
            tables: Vec::new(),
            opaque: false,
        }
    }

    /// Attach a session id.
    pub fn into_signature(self, session_id: i32) -> QuerySignature {
        QuerySignature {
            session_id,
            normalized_hash: self.normalized_hash,
            redacted_text: self.redacted_text,
            commands: self.commands,
            tables: self.tables,
            opaque: self.opaque,
        }
    }
}

/// A token after redaction.
#[derive(Debug, Clone)]
pub(crate) struct Piece<'a> {
    kind: TokenKind,
    text: Cow<'a, str>,
    space_before: bool,
}

/// Redacts SQL text. Pure and cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct Obfuscator {
    options: ObfuscationOptions,
}

impl Obfuscator {
    pub fn new(options: ObfuscationOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &ObfuscationOptions {
        &self.options
    }

    /// Redact and hash a statement.
    pub fn normalize(&self, raw_sql: &str) -> Normalized {
        let raw_sql = raw_sql.trim();

        let tokens = match tokenize(raw_sql) {
            Ok(tokens) => tokens,
            Err(err) => {
                debug!(error = %err, len = raw_sql.len(), "SQL text not tokenizable, hashing as opaque");
                return Normalized {
                    redacted_text: "?".to_string(),
                    normalized_hash: hash_text(raw_sql),
                    commands: Vec::new(),
                    tables: Vec::new(),
                    opaque: true,
                };
            }
        };

        let mut pieces: Vec<Piece<'_>> = tokens.iter().map(|t| self.redact(t)).collect();
        if self.options.collapse_lists {
            pieces = collapse_in_lists(pieces);
        }

        let redacted_text = render(&pieces);
        let (commands, tables) = if self.options.extract_metadata {
            metadata::extract(&pieces)
        } else {
            (Vec::new(), Vec::new())
        };

        Normalized {
            normalized_hash: hash_text(&redacted_text),
            redacted_text,
            commands,
            tables,
            opaque: false,
        }
    }

    /// Shorthand for `normalize(raw_sql).into_signature(session_id)`.
    pub fn signature(&self, session_id: i32, raw_sql: &str) -> QuerySignature {
        self.normalize(raw_sql).into_signature(session_id)
    }

    fn redact<'a>(&self, token: &Token<'a>) -> Piece<'a> {
        let text = match token.kind {
            TokenKind::StringLit | TokenKind::NumberLit => Cow::Borrowed("?"),
            TokenKind::Word if self.is_literal_keyword(token.text) => Cow::Borrowed("?"),
            TokenKind::Word | TokenKind::QuotedIdent if self.options.replace_digits => {
                replace_digit_runs(token.text)
            }
            _ => Cow::Borrowed(token.text),
        };

        Piece {
            kind: token.kind,
            text,
            space_before: token.space_before,
        }
    }

    fn is_literal_keyword(&self, word: &str) -> bool {
        (!self.options.keep_null && word.eq_ignore_ascii_case("NULL"))
            || (!self.options.keep_boolean
                && (word.eq_ignore_ascii_case("TRUE") || word.eq_ignore_ascii_case("FALSE")))
    }
}

fn replace_digit_runs(text: &str) -> Cow<'_, str> {
    if !text.bytes().any(|b| b.is_ascii_digit()) {
        return Cow::Borrowed(text);
    }

    let mut out = String::with_capacity(text.len());
    let mut in_run = false;
    for c in text.chars() {
        if c.is_ascii_digit() {
            if !in_run {
                out.push('?');
            }
            in_run = true;
        } else {
            out.push(c);
            in_run = false;
        }
    }
    Cow::Owned(out)
}

/// `IN (?, ?, ?)` → `IN (?)`.
fn collapse_in_lists(pieces: Vec<Piece<'_>>) -> Vec<Piece<'_>> {
    let mut out = Vec::with_capacity(pieces.len());
    let mut i = 0;

    while i < pieces.len() {
        out.push(pieces[i].clone());

        let opens_list = pieces[i].kind == TokenKind::Word
            && pieces[i].text.eq_ignore_ascii_case("IN")
            && pieces.get(i + 1).is_some_and(|p| p.text == "(");

        if opens_list {
            if let Some(close) = placeholder_list_end(&pieces, i + 2) {
                out.push(pieces[i + 1].clone());
                out.push(pieces[i + 2].clone());
                i = close;
                continue;
            }
        }
        i += 1;
    }

    out
}

/// Index of the `)` closing a `?, ?, ...` run starting at `start`.
fn placeholder_list_end(pieces: &[Piece<'_>], start: usize) -> Option<usize> {
    let mut j = start;
    loop {
        if pieces.get(j)?.text != "?" {
            return None;
        }
        j += 1;
        match pieces.get(j)?.text.as_ref() {
            ")" => return Some(j),
            "," => j += 1,
            _ => return None,
        }
    }
}

fn render(pieces: &[Piece<'_>]) -> String {
    let mut out = String::with_capacity(pieces.iter().map(|p| p.text.len() + 1).sum());
    for piece in pieces {
        if piece.space_before && !out.is_empty() {
            out.push(' ');
        }
        out.push_str(&piece.text);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn redacted(sql: &str) -> String {
        Obfuscator::default().normalize(sql).redacted_text
    }

    #[test]
    fn test_literals_become_placeholders() {
        assert_eq!(
            redacted("SELECT * FROM t WHERE name = N'bob' AND id = 42 AND ratio > 1.5e3"),
            "SELECT * FROM t WHERE name = ? AND id = ? AND ratio > ?"
        );
    }

    #[test]
    fn test_whitespace_and_comments_collapse() {
        assert_eq!(
            redacted("  SELECT a,\n\t\tb -- pick two\nFROM /* the table */ t  "),
            "SELECT a, b FROM t"
        );
    }

    #[test]
    fn test_literal_values_share_hash() {
        let obfuscator = Obfuscator::default();
        let a = obfuscator.normalize("UPDATE t SET b=b+10 WHERE a=1;");
        let b = obfuscator.normalize("UPDATE t SET b=b+10 WHERE a=2;");

        assert_eq!(a.redacted_text, "UPDATE t SET b=b+? WHERE a=?;");
        assert_eq!(a.normalized_hash, b.normalized_hash);
        assert_eq!(a.normalized_hash.len(), 16);
    }

    #[test]
    fn test_different_shapes_differ() {
        let obfuscator = Obfuscator::default();
        let a = obfuscator.normalize("SELECT a FROM t WHERE id = 1");
        let b = obfuscator.normalize("SELECT b FROM t WHERE id = 1");
        assert_ne!(a.normalized_hash, b.normalized_hash);
    }

    #[test]
    fn test_variables_and_placeholders_survive() {
        assert_eq!(
            redacted("EXEC dbo.usp_move @from = @src, @amount = 100, @note = ?"),
            "EXEC dbo.usp_move @from = @src, @amount = ?, @note = ?"
        );
    }

    #[test]
    fn test_escaped_quotes_stay_inside_literal() {
        assert_eq!(redacted("SELECT 'it''s -- not a comment' AS x"), "SELECT ? AS x");
    }

    #[test]
    fn test_negative_numbers_keep_sign() {
        assert_eq!(redacted("SELECT -1, 0x1F"), "SELECT -?, ?");
    }

    #[test]
    fn test_money_literals_are_redacted() {
        let obfuscator = Obfuscator::default();
        let a = obfuscator.normalize("UPDATE accounts SET balance = $100 WHERE id = 7");
        let b = obfuscator.normalize("UPDATE accounts SET balance = $250 WHERE id = 7");

        assert_eq!(a.redacted_text, "UPDATE accounts SET balance = ? WHERE id = ?");
        assert!(!a.redacted_text.contains("100"));
        assert_eq!(a.normalized_hash, b.normalized_hash);

        assert_eq!(
            redacted("SELECT $100.50, -$5 FROM t"),
            "SELECT ?, -? FROM t"
        );
    }

    #[test]
    fn test_in_lists_collapse() {
        assert_eq!(
            redacted("DELETE FROM t WHERE id IN (1, 2, 3)"),
            "DELETE FROM t WHERE id IN (?)"
        );

        let keep = Obfuscator::new(ObfuscationOptions {
            collapse_lists: false,
            ..Default::default()
        });
        assert_eq!(
            keep.normalize("DELETE FROM t WHERE id IN (1, 2, 3)").redacted_text,
            "DELETE FROM t WHERE id IN (?, ?, ?)"
        );
    }

    #[test]
    fn test_null_and_booleans() {
        assert_eq!(redacted("SELECT NULL, TRUE"), "SELECT ?, ?");

        let keep = Obfuscator::new(ObfuscationOptions {
            keep_null: true,
            keep_boolean: true,
            ..Default::default()
        });
        assert_eq!(keep.normalize("SELECT NULL, TRUE").redacted_text, "SELECT NULL, TRUE");
    }

    #[test]
    fn test_replace_digits_in_identifiers() {
        let obfuscator = Obfuscator::new(ObfuscationOptions {
            replace_digits: true,
            ..Default::default()
        });
        let out = obfuscator.normalize("SELECT * FROM orders_2024 JOIN [shard12] s ON 1=1");
        assert_eq!(out.redacted_text, "SELECT * FROM orders_? JOIN [shard?] s ON ?=?");
    }

    #[test]
    fn test_unterminated_string_is_opaque() {
        let out = Obfuscator::default().normalize("SELECT * FROM t WHERE name = 'bob");
        assert!(out.opaque);
        assert_eq!(out.redacted_text, "?");
        assert_eq!(out.normalized_hash, hash_text("SELECT * FROM t WHERE name = 'bob"));
        assert!(out.commands.is_empty());
    }

    #[test]
    fn test_non_sql_text_is_hashed_as_is() {
        let out = Obfuscator::default().normalize("hello world");
        assert!(!out.opaque);
        assert_eq!(out.redacted_text, "hello world");
    }

    #[test]
    fn test_metadata_extraction() {
        let out = Obfuscator::default().normalize(
            "UPDATE dbo.accounts SET x = 1 FROM dbo.accounts a JOIN [dbo].[ledger] l ON a.id = l.id",
        );
        assert_eq!(out.commands, vec!["UPDATE"]);
        assert_eq!(out.tables, vec!["dbo.accounts", "[dbo].[ledger]"]);

        let out = Obfuscator::default().normalize("INSERT INTO t2 (a) SELECT a FROM t1");
        assert_eq!(out.commands, vec!["INSERT", "SELECT"]);
        assert_eq!(out.tables, vec!["t2", "t1"]);
    }

    #[test]
    fn test_metadata_can_be_disabled() {
        let obfuscator = Obfuscator::new(ObfuscationOptions {
            extract_metadata: false,
            ..Default::default()
        });
        let out = obfuscator.normalize("SELECT a FROM t");
        assert!(out.commands.is_empty());
        assert!(out.tables.is_empty());
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let obfuscator = Obfuscator::default();
        for sql in [
            "UPDATE t SET b=b+10 WHERE a=1;",
            "SELECT x FROM t WHERE id IN (1,2) AND s = N'q' -- c",
            "SELECT/**/1",
            "EXEC p @a=-5, @b=0xFF",
        ] {
            let once = obfuscator.normalize(sql);
            let twice = obfuscator.normalize(&once.redacted_text);
            assert_eq!(once.redacted_text, twice.redacted_text, "input: {sql}");
            assert_eq!(once.normalized_hash, twice.normalized_hash, "input: {sql}");
        }
    }

    #[test]
    fn test_empty_result_hash() {
        let empty = Normalized::empty();
        assert_eq!(empty.redacted_text, "");
        assert_eq!(empty.normalized_hash, hash_text(""));
        assert_eq!(Obfuscator::default().normalize("   ").normalized_hash, hash_text(""));
    }

    #[test]
    fn test_hash_is_sha256_prefix() {
        // SHA-256("") = e3b0c44298fc1c14...
        assert_eq!(hash_text(""), "e3b0c44298fc1c14");
    }
}
