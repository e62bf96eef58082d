//! Token kinds and the `Token` record produced by the lexer.

use std::fmt;
use std::rc::Rc;

/// Identifies a source file a token was scanned from.
///
/// Cheap to clone (a ref-counted path); carried on every token so the parser
/// can attribute diagnostics to the right file even after `import` has merged
/// more than one file's tokens into a single parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileId(Rc<str>);

impl FileId {
    pub fn new(path: impl Into<Rc<str>>) -> Self {
        Self(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The finite set of token kinds the lexer can produce.
///
/// Mirrors `qcc/token.h`'s `TokenKind` enum one-for-one, plus the built-in
/// type names used as keywords (`number`, `string`, `bool`, `void`, `nil`,
/// `any`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum TokenKind {
    // Special
    End,
    Error,

    // Single-char punctuators
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    LeftParen,
    RightParen,
    LeftBracket,
    RightBracket,
    LeftBrace,
    RightBrace,
    Dot,
    Bang,
    Equal,
    Lower,
    Greater,
    Semicolon,
    Colon,
    Comma,

    // Two-char compounds
    EqualEqual,
    BangEqual,
    LowerEqual,
    GreaterEqual,
    AndAnd,
    OrOr,

    // Literals
    Number,
    String,
    Identifier,

    // Keywords
    True,
    False,
    Nil,
    Var,
    Function,
    Return,
    If,
    Else,
    For,
    While,
    Break,
    Continue,
    New,
    Typedef,
    Import,
    Class,
    Public,
    SelfKw,
    Cast,

    // Built-in type names
    TypeAny,
    TypeNumber,
    TypeString,
    TypeBool,
    TypeVoid,
    TypeNil,
}

impl TokenKind {
    /// Looks up a scanned identifier against the keyword table.
    ///
    /// Unlike `qcc/lexer.c` (see spec §9), this is a single, unambiguous
    /// lookup: no fallthrough between keyword arms is possible.
    pub fn keyword_lookup(ident: &str) -> Option<TokenKind> {
        Some(match ident {
            "true" => TokenKind::True,
            "false" => TokenKind::False,
            "nil" => TokenKind::Nil,
            "var" => TokenKind::Var,
            "fn" => TokenKind::Function,
            "return" => TokenKind::Return,
            "if" => TokenKind::If,
            "else" => TokenKind::Else,
            "for" => TokenKind::For,
            "while" => TokenKind::While,
            "break" => TokenKind::Break,
            "continue" => TokenKind::Continue,
            "new" => TokenKind::New,
            "typedef" => TokenKind::Typedef,
            "import" => TokenKind::Import,
            "class" => TokenKind::Class,
            "pub" => TokenKind::Public,
            "self" => TokenKind::SelfKw,
            "cast" => TokenKind::Cast,
            "Any" => TokenKind::TypeAny,
            "Number" => TokenKind::TypeNumber,
            "String" => TokenKind::TypeString,
            "Bool" => TokenKind::TypeBool,
            "Void" => TokenKind::TypeVoid,
            "Nil" => TokenKind::TypeNil,
            _ => return None,
        })
    }
}

/// A single lexed token: kind, source slice, and position.
///
/// `lexeme` borrows from the source buffer the lexer was constructed over;
/// per spec §3, that buffer must outlive every token derived from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token<'src> {
    pub kind: TokenKind,
    pub lexeme: &'src str,
    pub line: u32,
    pub column: u32,
    pub file: FileId,
}

impl<'src> Token<'src> {
    pub fn is_end(&self) -> bool {
        self.kind == TokenKind::End
    }
}

impl fmt::Display for Token<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}('{}')", self.kind, self.lexeme)
    }
}
