//! A forgiving T-SQL tokenizer.
//!
//! The lexer only needs to tell literals apart from everything else, so it
//! keeps a small set of token kinds. It refuses input it cannot close
//! (strings, quoted identifiers, block comments) instead of guessing where
//! a literal ends; the caller treats that as opaque text.

use std::fmt;

/// What a token is, as far as obfuscation cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TokenKind {
    /// Keyword or bare identifier, including `#temp` names.
    Word,
    /// `[bracketed]`, `"double quoted"` or `` `backtick` `` identifier.
    QuotedIdent,
    /// `@local`, `@@global` or `:bind` variable.
    Variable,
    /// `'text'` or `N'text'`.
    StringLit,
    /// Integer, decimal, exponent, `$` money or `0x` binary literal.
    NumberLit,
    /// `?` parameter marker.
    Placeholder,
    /// Any other single character.
    Punct,
}

/// A token borrowed from the source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Token<'a> {
    pub kind: TokenKind,
    pub text: &'a str,
    /// Whitespace or a comment separated this token from the previous one.
    pub space_before: bool,
}

/// Why the input could not be tokenized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LexError {
    UnterminatedString { offset: usize },
    UnterminatedIdentifier { offset: usize },
    UnterminatedComment { offset: usize },
}

impl fmt::Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LexError::UnterminatedString { offset } => {
                write!(f, "unterminated string literal at byte {offset}")
            }
            LexError::UnterminatedIdentifier { offset } => {
                write!(f, "unterminated quoted identifier at byte {offset}")
            }
            LexError::UnterminatedComment { offset } => {
                write!(f, "unterminated block comment at byte {offset}")
            }
        }
    }
}

/// Split `src` into tokens, dropping whitespace and comments.
pub(crate) fn tokenize(src: &str) -> Result<Vec<Token<'_>>, LexError> {
    Lexer::new(src).run()
}

struct Lexer<'a> {
    src: &'a str,
    pos: usize,
    space_pending: bool,
    tokens: Vec<Token<'a>>,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            pos: 0,
            space_pending: false,
            tokens: Vec::new(),
        }
    }

    fn run(mut self) -> Result<Vec<Token<'a>>, LexError> {
        while let Some(c) = self.peek() {
            let start = self.pos;

            if c.is_whitespace() {
                self.bump();
                self.space_pending = true;
                continue;
            }

            match c {
                '-' if self.peek_nth(1) == Some('-') => {
                    self.skip_line_comment();
                    continue;
                }
                '/' if self.peek_nth(1) == Some('*') => {
                    self.skip_block_comment(start)?;
                    continue;
                }
                '\'' => {
                    self.scan_quoted('\'', '\'')
                        .ok_or(LexError::UnterminatedString { offset: start })?;
                    self.push(TokenKind::StringLit, start);
                }
                'N' | 'n' if self.peek_nth(1) == Some('\'') => {
                    self.bump();
                    self.scan_quoted('\'', '\'')
                        .ok_or(LexError::UnterminatedString { offset: start })?;
                    self.push(TokenKind::StringLit, start);
                }
                '[' => {
                    self.scan_quoted('[', ']')
                        .ok_or(LexError::UnterminatedIdentifier { offset: start })?;
                    self.push(TokenKind::QuotedIdent, start);
                }
                '"' | '`' => {
                    self.scan_quoted(c, c)
                        .ok_or(LexError::UnterminatedIdentifier { offset: start })?;
                    self.push(TokenKind::QuotedIdent, start);
                }
                '0' if matches!(self.peek_nth(1), Some('x' | 'X')) => {
                    self.bump();
                    self.bump();
                    self.bump_while(|c| c.is_ascii_hexdigit());
                    self.push(TokenKind::NumberLit, start);
                }
                c if c.is_ascii_digit() => {
                    self.scan_number();
                    self.push(TokenKind::NumberLit, start);
                }
                '.' if self.peek_nth(1).is_some_and(|c| c.is_ascii_digit()) => {
                    self.scan_number();
                    self.push(TokenKind::NumberLit, start);
                }
                '@' | ':' if self.peek_nth(1).is_some_and(is_ident_start) => {
                    self.bump();
                    self.bump_while(is_ident_continue);
                    self.push(TokenKind::Variable, start);
                }
                '@' if self.peek_nth(1) == Some('@') => {
                    self.bump();
                    self.bump();
                    self.bump_while(is_ident_continue);
                    self.push(TokenKind::Variable, start);
                }
                '?' => {
                    self.bump();
                    self.push(TokenKind::Placeholder, start);
                }
                // Money literal: $100, $100.50, $.5
                '$' if self.peek_nth(1).is_some_and(|c| c.is_ascii_digit())
                    || (self.peek_nth(1) == Some('.')
                        && self.peek_nth(2).is_some_and(|c| c.is_ascii_digit())) =>
                {
                    self.bump();
                    self.scan_number();
                    self.push(TokenKind::NumberLit, start);
                }
                c if is_ident_start(c) || c == '$' => {
                    self.bump();
                    self.bump_while(is_ident_continue);
                    self.push(TokenKind::Word, start);
                }
                _ => {
                    self.bump();
                    self.push(TokenKind::Punct, start);
                }
            }
        }

        Ok(self.tokens)
    }

    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn peek_nth(&self, n: usize) -> Option<char> {
        self.src[self.pos..].chars().nth(n)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn bump_while(&mut self, pred: impl Fn(char) -> bool) {
        while self.peek().is_some_and(&pred) {
            self.bump();
        }
    }

    fn push(&mut self, kind: TokenKind, start: usize) {
        self.tokens.push(Token {
            kind,
            text: &self.src[start..self.pos],
            space_before: self.space_pending,
        });
        self.space_pending = false;
    }

    /// Consume a delimited run whose closing delimiter is escaped by doubling
    /// (`''`, `]]`, `""`). Returns `None` if the input ends first.
    fn scan_quoted(&mut self, open: char, close: char) -> Option<()> {
        debug_assert_eq!(self.peek(), Some(open));
        self.bump();
        loop {
            match self.bump()? {
                c if c == close => {
                    if self.peek() == Some(close) {
                        self.bump();
                    } else {
                        return Some(());
                    }
                }
                _ => {}
            }
        }
    }

    fn scan_number(&mut self) {
        self.bump_while(|c| c.is_ascii_digit());
        if self.peek() == Some('.') {
            self.bump();
            self.bump_while(|c| c.is_ascii_digit());
        }
        if matches!(self.peek(), Some('e' | 'E')) {
            let signed = matches!(self.peek_nth(1), Some('+' | '-'));
            let digit_at = if signed { 2 } else { 1 };
            if self.peek_nth(digit_at).is_some_and(|c| c.is_ascii_digit()) {
                self.bump();
                if signed {
                    self.bump();
                }
                self.bump_while(|c| c.is_ascii_digit());
            }
        }
    }

    fn skip_line_comment(&mut self) {
        self.bump_while(|c| c != '\n');
        self.space_pending = true;
    }

    /// Block comments nest in T-SQL.
    fn skip_block_comment(&mut self, start: usize) -> Result<(), LexError> {
        let mut depth = 0usize;
        loop {
            match (self.peek(), self.peek_nth(1)) {
                (Some('/'), Some('*')) => {
                    self.bump();
                    self.bump();
                    depth += 1;
                }
                (Some('*'), Some('/')) => {
                    self.bump();
                    self.bump();
                    depth -= 1;
                    if depth == 0 {
                        self.space_pending = true;
                        return Ok(());
                    }
                }
                (Some(_), _) => {
                    self.bump();
                }
                (None, _) => return Err(LexError::UnterminatedComment { offset: start }),
            }
        }
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '#'
}

fn is_ident_continue(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '#' | '$' | '@')
}
