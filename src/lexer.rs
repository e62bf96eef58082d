//! Hand-written lexical analyzer.
//!
//! One character of lookahead, no backtracking. `next_token` can be called
//! forever once the source is exhausted: it keeps returning `End` tokens.
//! Scanning errors surface as an `Error`-kind token rather than a Rust error,
//! matching spec §4.1 — the parser is the one that decides what to do about
//! it (stop, in this crate's case, since the lexer is finite and
//! non-restartable).

use crate::token::{FileId, Token, TokenKind};

/// Scans a source buffer into a stream of [`Token`]s.
pub struct Lexer<'src> {
    source: &'src str,
    bytes: &'src [u8],
    start: usize,
    current: usize,
    line: u32,
    column: u32,
    start_column: u32,
    file: FileId,
}

impl<'src> Lexer<'src> {
    pub fn new(source: &'src str, file: FileId) -> Self {
        Self {
            source,
            bytes: source.as_bytes(),
            start: 0,
            current: 0,
            line: 1,
            column: 1,
            start_column: 1,
            file,
        }
    }

    fn is_at_end(&self) -> bool {
        self.current >= self.bytes.len()
    }

    fn peek(&self) -> u8 {
        if self.is_at_end() { 0 } else { self.bytes[self.current] }
    }

    fn peek_next(&self) -> u8 {
        if self.current + 1 >= self.bytes.len() { 0 } else { self.bytes[self.current + 1] }
    }

    fn advance(&mut self) -> u8 {
        let c = self.bytes[self.current];
        self.current += 1;
        if c == b'\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        c
    }

    fn matches(&mut self, expected: u8) -> bool {
        if self.is_at_end() || self.peek() != expected {
            return false;
        }
        self.advance();
        true
    }

    fn lexeme(&self) -> &'src str {
        &self.source[self.start..self.current]
    }

    fn make(&self, kind: TokenKind) -> Token<'src> {
        Token { kind, lexeme: self.lexeme(), line: self.line, column: self.start_column, file: self.file.clone() }
    }

    fn error(&self, message: &'static str) -> Token<'src> {
        let _ = message;
        Token {
            kind: TokenKind::Error,
            lexeme: self.lexeme(),
            line: self.line,
            column: self.start_column,
            file: self.file.clone(),
        }
    }

    fn skip_whitespace_and_comments(&mut self) {
        loop {
            match self.peek() {
                b' ' | b'\t' | b'\r' | b'\n' => {
                    self.advance();
                }
                b'/' if self.peek_next() == b'/' => {
                    while self.peek() != b'\n' && !self.is_at_end() {
                        self.advance();
                    }
                }
                _ => return,
            }
        }
    }

    fn is_digit(c: u8) -> bool {
        c.is_ascii_digit()
    }

    fn is_alpha(c: u8) -> bool {
        c.is_ascii_alphabetic() || c == b'_'
    }

    fn scan_number(&mut self) -> Token<'src> {
        while Self::is_digit(self.peek()) {
            self.advance();
        }
        if self.peek() == b'.' {
            self.advance();
            if !Self::is_digit(self.peek()) {
                return self.error("malformed float: expected digits after '.'");
            }
            while Self::is_digit(self.peek()) {
                self.advance();
            }
        }
        self.make(TokenKind::Number)
    }

    fn scan_string(&mut self, quote: u8) -> Token<'src> {
        self.advance(); // opening quote
        self.start = self.current;
        while self.peek() != quote && !self.is_at_end() {
            self.advance();
        }
        if self.is_at_end() {
            return self.error("unterminated string");
        }
        let token = self.make(TokenKind::String);
        self.advance(); // closing quote
        token
    }

    fn scan_identifier(&mut self) -> Token<'src> {
        while Self::is_alpha(self.peek()) || Self::is_digit(self.peek()) {
            self.advance();
        }
        let kind = TokenKind::keyword_lookup(self.lexeme()).unwrap_or(TokenKind::Identifier);
        self.make(kind)
    }

    /// Produces the next token. Idempotent at end of input: once `End` has
    /// been returned, every subsequent call returns `End` again.
    pub fn next_token(&mut self) -> Token<'src> {
        self.skip_whitespace_and_comments();
        self.start = self.current;
        self.start_column = self.column;

        if self.is_at_end() {
            return self.make(TokenKind::End);
        }

        let lookahead = self.peek();
        if lookahead == b'\'' || lookahead == b'"' {
            return self.scan_string(lookahead);
        }
        if Self::is_alpha(lookahead) {
            self.advance();
            return self.scan_identifier();
        }
        if Self::is_digit(lookahead) {
            self.advance();
            return self.scan_number();
        }

        let c = self.advance();
        match c {
            b'+' => self.make(TokenKind::Plus),
            b'-' => self.make(TokenKind::Minus),
            b'*' => self.make(TokenKind::Star),
            b'/' => self.make(TokenKind::Slash),
            b'%' => self.make(TokenKind::Percent),
            b'(' => self.make(TokenKind::LeftParen),
            b')' => self.make(TokenKind::RightParen),
            b'[' => self.make(TokenKind::LeftBracket),
            b']' => self.make(TokenKind::RightBracket),
            b'{' => self.make(TokenKind::LeftBrace),
            b'}' => self.make(TokenKind::RightBrace),
            b'.' => self.make(TokenKind::Dot),
            b',' => self.make(TokenKind::Comma),
            b';' => self.make(TokenKind::Semicolon),
            b':' => self.make(TokenKind::Colon),
            b'!' => {
                if self.matches(b'=') { self.make(TokenKind::BangEqual) } else { self.make(TokenKind::Bang) }
            }
            b'=' => {
                if self.matches(b'=') { self.make(TokenKind::EqualEqual) } else { self.make(TokenKind::Equal) }
            }
            b'<' => {
                if self.matches(b'=') { self.make(TokenKind::LowerEqual) } else { self.make(TokenKind::Lower) }
            }
            b'>' => {
                if self.matches(b'=') { self.make(TokenKind::GreaterEqual) } else { self.make(TokenKind::Greater) }
            }
            b'&' => {
                if self.matches(b'&') { self.make(TokenKind::AndAnd) } else { self.error("expected '&&'") }
            }
            b'|' => {
                if self.matches(b'|') { self.make(TokenKind::OrOr) } else { self.error("expected '||'") }
            }
            _ => self.error("unexpected character"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        let mut lexer = Lexer::new(src, FileId::new("test.qz"));
        let mut out = Vec::new();
        loop {
            let tok = lexer.next_token();
            let done = tok.is_end();
            out.push(tok.kind);
            if done {
                break;
            }
        }
        out
    }

    #[test]
    fn two_char_compounds() {
        assert_eq!(kinds("== != <= >= && ||"), vec![
            TokenKind::EqualEqual,
            TokenKind::BangEqual,
            TokenKind::LowerEqual,
            TokenKind::GreaterEqual,
            TokenKind::AndAnd,
            TokenKind::OrOr,
            TokenKind::End,
        ]);
    }

    #[test]
    fn keyword_vs_identifier() {
        assert_eq!(kinds("true false truefoo"), vec![
            TokenKind::True,
            TokenKind::False,
            TokenKind::Identifier,
            TokenKind::End,
        ]);
    }

    #[test]
    fn numbers_with_trailing_dot_error() {
        assert_eq!(kinds("1.5 2."), vec![TokenKind::Number, TokenKind::Error, TokenKind::End]);
    }

    #[test]
    fn string_quote_must_match_and_strips_quotes() {
        let mut lexer = Lexer::new("'hi'", FileId::new("t"));
        let tok = lexer.next_token();
        assert_eq!(tok.kind, TokenKind::String);
        assert_eq!(tok.lexeme, "hi");
    }

    #[test]
    fn unterminated_string_errors() {
        assert_eq!(kinds("\"abc"), vec![TokenKind::Error, TokenKind::End]);
    }

    #[test]
    fn line_and_column_tracking() {
        let mut lexer = Lexer::new("a\nbb c", FileId::new("t"));
        let a = lexer.next_token();
        assert_eq!((a.line, a.column), (1, 1));
        let bb = lexer.next_token();
        assert_eq!((bb.line, bb.column), (2, 1));
        let c = lexer.next_token();
        assert_eq!((c.line, c.column), (2, 4));
    }

    #[test]
    fn line_comment_skipped() {
        assert_eq!(kinds("1 // two\n2"), vec![TokenKind::Number, TokenKind::Number, TokenKind::End]);
    }
}
