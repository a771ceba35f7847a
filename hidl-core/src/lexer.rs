//! Lexer for `.hal` sources.
//!
//! [`Lexer`] is a single forward pass over the source that yields tokens
//! lazily; [`lex`] drains it into a vector for the parser. Invalid input
//! never stops the pass: it produces a [`TokenKind::Error`] token plus a
//! diagnostic, and the parser turns the first such token into a fatal
//! lex error.

use crate::diagnostic::Diagnostic;
use crate::span::{Location, Span};

/// Kind of a token produced by the lexer.
///
/// Scalar type names (`int32_t`, `string`, `vec`, ...) are ordinary
/// identifiers here; the parser looks them up in [`crate::builtins`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    // Special
    Eof,
    Error,

    // Identifiers, literals and documentation
    Ident,
    IntLiteral,
    FloatLiteral,
    StringLiteral,
    DocComment, // /** ... */

    // Punctuation
    LParen,      // (
    RParen,      // )
    LBrace,      // {
    RBrace,      // }
    LBracket,    // [
    RBracket,    // ]
    Less,        // <
    Greater,     // >
    Comma,       // ,
    Semi,        // ;
    Colon,       // :
    DoubleColon, // ::
    Dot,         // .
    At,          // @
    Equal,       // =
    Question,    // ?

    // Operators
    Plus,    // +
    Minus,   // -
    Star,    // *
    Slash,   // /
    Percent, // %
    Amp,     // &
    Pipe,    // |
    Caret,   // ^
    Tilde,   // ~
    Bang,    // !
    EqEq,    // ==
    NotEq,   // !=
    AndAnd,  // &&
    OrOr,    // ||

    // Keywords
    Package,
    Import,
    Interface,
    Extends,
    Struct,
    Union,
    SafeUnion,
    Enum,
    Typedef,
    Const,
    Oneway,
    Generates,
    True,
    False,
}

impl TokenKind {
    /// Human readable form used in syntax errors.
    pub fn describe(self) -> &'static str {
        match self {
            TokenKind::Eof => "end of file",
            TokenKind::Error => "invalid input",
            TokenKind::Ident => "identifier",
            TokenKind::IntLiteral => "integer literal",
            TokenKind::FloatLiteral => "floating point literal",
            TokenKind::StringLiteral => "string literal",
            TokenKind::DocComment => "doc comment",
            TokenKind::LParen => "'('",
            TokenKind::RParen => "')'",
            TokenKind::LBrace => "'{'",
            TokenKind::RBrace => "'}'",
            TokenKind::LBracket => "'['",
            TokenKind::RBracket => "']'",
            TokenKind::Less => "'<'",
            TokenKind::Greater => "'>'",
            TokenKind::Comma => "','",
            TokenKind::Semi => "';'",
            TokenKind::Colon => "':'",
            TokenKind::DoubleColon => "'::'",
            TokenKind::Dot => "'.'",
            TokenKind::At => "'@'",
            TokenKind::Equal => "'='",
            TokenKind::Question => "'?'",
            TokenKind::Plus => "'+'",
            TokenKind::Minus => "'-'",
            TokenKind::Star => "'*'",
            TokenKind::Slash => "'/'",
            TokenKind::Percent => "'%'",
            TokenKind::Amp => "'&'",
            TokenKind::Pipe => "'|'",
            TokenKind::Caret => "'^'",
            TokenKind::Tilde => "'~'",
            TokenKind::Bang => "'!'",
            TokenKind::EqEq => "'=='",
            TokenKind::NotEq => "'!='",
            TokenKind::AndAnd => "'&&'",
            TokenKind::OrOr => "'||'",
            TokenKind::Package => "'package'",
            TokenKind::Import => "'import'",
            TokenKind::Interface => "'interface'",
            TokenKind::Extends => "'extends'",
            TokenKind::Struct => "'struct'",
            TokenKind::Union => "'union'",
            TokenKind::SafeUnion => "'safe_union'",
            TokenKind::Enum => "'enum'",
            TokenKind::Typedef => "'typedef'",
            TokenKind::Const => "'const'",
            TokenKind::Oneway => "'oneway'",
            TokenKind::Generates => "'generates'",
            TokenKind::True => "'true'",
            TokenKind::False => "'false'",
        }
    }
}

/// A single token with its kind and span.
///
/// The span holds byte offsets into the original source, so that the
/// parser can slice the concrete text when it needs it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

impl Token {
    pub fn text<'src>(&self, source: &'src str) -> &'src str {
        &source[self.span.start as usize..self.span.end as usize]
    }

    pub fn location(&self) -> Location {
        self.span.location
    }
}

/// Result of lexing a whole source file.
#[derive(Debug)]
pub struct LexResult {
    pub tokens: Vec<Token>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Lex a source string into tokens, ending with a single `Eof`.
pub fn lex(source: &str) -> LexResult {
    let mut lexer = Lexer::new(source);
    let mut tokens = Vec::new();
    for token in lexer.by_ref() {
        tokens.push(token);
    }
    LexResult {
        tokens,
        diagnostics: lexer.take_diagnostics(),
    }
}

pub struct Lexer<'src> {
    source: &'src str,
    chars: &'src [u8],
    index: usize,
    line: u32,
    column: u32,
    finished: bool,
    diagnostics: Vec<Diagnostic>,
}

impl<'src> Lexer<'src> {
    pub fn new(source: &'src str) -> Self {
        Lexer {
            source,
            chars: source.as_bytes(),
            index: 0,
            line: 1,
            column: 1,
            finished: false,
            diagnostics: Vec::new(),
        }
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn take_diagnostics(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.diagnostics)
    }

    fn next_token(&mut self) -> Token {
        loop {
            let Some(ch) = self.peek_char() else {
                let location = self.location();
                let end = self.index as u32;
                return Token {
                    kind: TokenKind::Eof,
                    span: Span::new(end, end, location),
                };
            };

            if is_whitespace(ch) {
                self.consume_char();
                continue;
            }

            let start = self.index as u32;
            let location = self.location();

            if ch == b'/' && self.peek_next() == Some(b'/') {
                self.skip_line_comment();
                continue;
            }
            if ch == b'/' && self.peek_next() == Some(b'*') {
                match self.lex_block_comment(start, location) {
                    Some(token) => return token,
                    None => continue,
                }
            }

            return match ch {
                b'(' => self.single(TokenKind::LParen, start, location),
                b')' => self.single(TokenKind::RParen, start, location),
                b'{' => self.single(TokenKind::LBrace, start, location),
                b'}' => self.single(TokenKind::RBrace, start, location),
                b'[' => self.single(TokenKind::LBracket, start, location),
                b']' => self.single(TokenKind::RBracket, start, location),
                b'<' => self.single(TokenKind::Less, start, location),
                b'>' => self.single(TokenKind::Greater, start, location),
                b',' => self.single(TokenKind::Comma, start, location),
                b';' => self.single(TokenKind::Semi, start, location),
                b'.' => self.single(TokenKind::Dot, start, location),
                b'@' => self.single(TokenKind::At, start, location),
                b'?' => self.single(TokenKind::Question, start, location),
                b'+' => self.single(TokenKind::Plus, start, location),
                b'-' => self.single(TokenKind::Minus, start, location),
                b'*' => self.single(TokenKind::Star, start, location),
                b'/' => self.single(TokenKind::Slash, start, location),
                b'%' => self.single(TokenKind::Percent, start, location),
                b'^' => self.single(TokenKind::Caret, start, location),
                b'~' => self.single(TokenKind::Tilde, start, location),
                b':' => self.one_or_two(b':', TokenKind::Colon, TokenKind::DoubleColon, start, location),
                b'=' => self.one_or_two(b'=', TokenKind::Equal, TokenKind::EqEq, start, location),
                b'!' => self.one_or_two(b'=', TokenKind::Bang, TokenKind::NotEq, start, location),
                b'&' => self.one_or_two(b'&', TokenKind::Amp, TokenKind::AndAnd, start, location),
                b'|' => self.one_or_two(b'|', TokenKind::Pipe, TokenKind::OrOr, start, location),
                b'"' => self.lex_string(start, location),
                b'0'..=b'9' => self.lex_number(start, location),
                _ if is_ident_start(ch) => self.lex_ident_or_keyword(start, location),
                _ => {
                    self.consume_utf8_char();
                    self.unexpected_char(start, location)
                }
            };
        }
    }

    fn single(&mut self, kind: TokenKind, start: u32, location: Location) -> Token {
        self.consume_char();
        self.token(kind, start, location)
    }

    fn one_or_two(
        &mut self,
        second: u8,
        one: TokenKind,
        two: TokenKind,
        start: u32,
        location: Location,
    ) -> Token {
        self.consume_char();
        if self.peek_char() == Some(second) {
            self.consume_char();
            self.token(two, start, location)
        } else {
            self.token(one, start, location)
        }
    }

    fn token(&self, kind: TokenKind, start: u32, location: Location) -> Token {
        Token {
            kind,
            span: Span::new(start, self.index as u32, location),
        }
    }

    fn error_token(&mut self, message: &str, code: &'static str, start: u32, location: Location) -> Token {
        self.diagnostics
            .push(Diagnostic::error(message, location).with_code(code));
        self.token(TokenKind::Error, start, location)
    }

    fn unexpected_char(&mut self, start: u32, location: Location) -> Token {
        let text = &self.source[start as usize..self.index];
        let message = format!("unexpected character '{text}'");
        self.error_token(&message, "E0001", start, location)
    }

    fn skip_line_comment(&mut self) {
        while let Some(ch) = self.peek_char() {
            if ch == b'\n' {
                break;
            }
            self.consume_char();
        }
    }

    /// Skips a block comment, returning a token only for doc comments
    /// (`/** ... */`, but not the empty `/**/`) and unterminated comments.
    fn lex_block_comment(&mut self, start: u32, location: Location) -> Option<Token> {
        self.consume_char(); // '/'
        self.consume_char(); // '*'
        let is_doc = self.peek_char() == Some(b'*') && self.peek_next() != Some(b'/');

        while let Some(ch) = self.peek_char() {
            if ch == b'*' && self.peek_next() == Some(b'/') {
                self.consume_char();
                self.consume_char();
                return is_doc.then(|| self.token(TokenKind::DocComment, start, location));
            }
            self.consume_char();
        }

        Some(self.error_token("unterminated comment", "E0003", start, location))
    }

    fn lex_string(&mut self, start: u32, location: Location) -> Token {
        self.consume_char(); // opening quote

        while let Some(ch) = self.peek_char() {
            match ch {
                b'"' => {
                    self.consume_char();
                    return self.token(TokenKind::StringLiteral, start, location);
                }
                b'\n' => break,
                b'\\' => {
                    // backslash + next char
                    self.consume_char();
                    if self.peek_char().is_some() {
                        self.consume_char();
                    }
                }
                _ => self.consume_char(),
            }
        }

        self.error_token("unterminated string literal", "E0002", start, location)
    }

    fn lex_number(&mut self, start: u32, location: Location) -> Token {
        if self.peek_char() == Some(b'0') && matches!(self.peek_next(), Some(b'x' | b'X')) {
            self.consume_char();
            self.consume_char();
            let digits_start = self.index;
            while self.peek_char().is_some_and(|ch| ch.is_ascii_hexdigit()) {
                self.consume_char();
            }
            if self.index == digits_start {
                return self.error_token("hexadecimal literal has no digits", "E0004", start, location);
            }
            self.consume_int_suffix();
            return self.token(TokenKind::IntLiteral, start, location);
        }

        self.consume_digits();

        let mut is_float = false;
        // '.' followed by a digit makes a float; `1.0` in a version is
        // split back apart by the parser.
        if self.peek_char() == Some(b'.') && self.peek_next().is_some_and(|ch| ch.is_ascii_digit()) {
            is_float = true;
            self.consume_char();
            self.consume_digits();
        }
        if matches!(self.peek_char(), Some(b'e' | b'E')) {
            let sign = matches!(self.peek_next(), Some(b'+' | b'-'));
            let digit_at = if sign { self.index + 2 } else { self.index + 1 };
            if self.chars.get(digit_at).is_some_and(|ch| ch.is_ascii_digit()) {
                is_float = true;
                self.consume_char();
                if sign {
                    self.consume_char();
                }
                self.consume_digits();
            }
        }

        if is_float {
            if matches!(self.peek_char(), Some(b'f' | b'F' | b'd' | b'D')) {
                self.consume_char();
            }
            self.token(TokenKind::FloatLiteral, start, location)
        } else {
            self.consume_int_suffix();
            self.token(TokenKind::IntLiteral, start, location)
        }
    }

    fn consume_digits(&mut self) {
        while self.peek_char().is_some_and(|ch| ch.is_ascii_digit()) {
            self.consume_char();
        }
    }

    fn consume_int_suffix(&mut self) {
        while matches!(self.peek_char(), Some(b'u' | b'U' | b'l' | b'L')) {
            self.consume_char();
        }
    }

    fn lex_ident_or_keyword(&mut self, start: u32, location: Location) -> Token {
        while self.peek_char().is_some_and(is_ident_continue) {
            self.consume_char();
        }

        let text = &self.source[start as usize..self.index];
        let kind = match text {
            "package" => TokenKind::Package,
            "import" => TokenKind::Import,
            "interface" => TokenKind::Interface,
            "extends" => TokenKind::Extends,
            "struct" => TokenKind::Struct,
            "union" => TokenKind::Union,
            "safe_union" => TokenKind::SafeUnion,
            "enum" => TokenKind::Enum,
            "typedef" => TokenKind::Typedef,
            "const" => TokenKind::Const,
            "oneway" => TokenKind::Oneway,
            "generates" => TokenKind::Generates,
            "true" => TokenKind::True,
            "false" => TokenKind::False,
            _ => TokenKind::Ident,
        };
        self.token(kind, start, location)
    }

    fn location(&self) -> Location {
        Location::new(self.line, self.column)
    }

    fn peek_char(&self) -> Option<u8> {
        self.chars.get(self.index).copied()
    }

    fn peek_next(&self) -> Option<u8> {
        self.chars.get(self.index + 1).copied()
    }

    fn consume_char(&mut self) {
        if let Some(ch) = self.peek_char() {
            self.index += 1;
            if ch == b'\n' {
                self.line += 1;
                self.column = 1;
            } else if ch & 0xC0 != 0x80 {
                // continuation bytes do not start a new column
                self.column += 1;
            }
        }
    }

    fn consume_utf8_char(&mut self) {
        self.consume_char();
        while self.peek_char().is_some_and(|ch| ch & 0xC0 == 0x80) {
            self.consume_char();
        }
    }
}

impl Iterator for Lexer<'_> {
    type Item = Token;

    fn next(&mut self) -> Option<Token> {
        if self.finished {
            return None;
        }
        let token = self.next_token();
        if token.kind == TokenKind::Eof {
            self.finished = true;
        }
        Some(token)
    }
}

/// Strips the `/**`, `*/` markers and leading `*` decorations of a doc
/// comment, keeping one line per source line.
pub fn doc_comment_text(raw: &str) -> String {
    let inner = raw
        .strip_prefix("/**")
        .and_then(|rest| rest.strip_suffix("*/"))
        .unwrap_or(raw);
    inner
        .lines()
        .map(|line| {
            let line = line.trim();
            line.strip_prefix('*').map(str::trim_start).unwrap_or(line)
        })
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn is_whitespace(ch: u8) -> bool {
    matches!(ch, b' ' | b'\t' | b'\n' | b'\r')
}

fn is_ident_start(ch: u8) -> bool {
    ch.is_ascii_alphabetic() || ch == b'_'
}

fn is_ident_continue(ch: u8) -> bool {
    is_ident_start(ch) || ch.is_ascii_digit()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        lex(source).tokens.into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn lexes_package_header() {
        use TokenKind::*;
        assert_eq!(
            kinds("package android.hardware.foo@1.0;"),
            vec![Package, Ident, Dot, Ident, Dot, Ident, At, FloatLiteral, Semi, Eof]
        );
    }

    #[test]
    fn tracks_lines_and_columns() {
        let result = lex("enum\n  Color : int32_t");
        let color = &result.tokens[1];
        assert_eq!(color.location(), Location::new(2, 3));
        assert_eq!(color.text("enum\n  Color : int32_t"), "Color");
    }

    #[test]
    fn keeps_doc_comments_and_drops_plain_ones() {
        use TokenKind::*;
        let source = "// line\n/* block */ /** Docs. */ struct /**/ S";
        assert_eq!(kinds(source), vec![DocComment, Struct, Ident, Eof]);
        let tokens = lex(source).tokens;
        assert_eq!(doc_comment_text(tokens[0].text(source)), "Docs.");
    }

    #[test]
    fn lexes_compound_operators() {
        use TokenKind::*;
        assert_eq!(
            kinds("a :: b == c != d && e || !f"),
            vec![Ident, DoubleColon, Ident, EqEq, Ident, NotEq, Ident, AndAnd, Ident, OrOr, Bang, Ident, Eof]
        );
    }

    #[test]
    fn lexes_numeric_literals() {
        use TokenKind::*;
        assert_eq!(
            kinds("0x1Fu 42L 1.5 2e3 7"),
            vec![IntLiteral, IntLiteral, FloatLiteral, FloatLiteral, IntLiteral, Eof]
        );
    }

    #[test]
    fn reports_invalid_characters_and_continues() {
        let result = lex("struct $ S");
        let kinds: Vec<_> = result.tokens.iter().map(|t| t.kind).collect();
        assert_eq!(
            kinds,
            vec![TokenKind::Struct, TokenKind::Error, TokenKind::Ident, TokenKind::Eof]
        );
        assert_eq!(result.diagnostics.len(), 1);
        assert_eq!(result.diagnostics[0].code, Some("E0001"));
    }

    #[test]
    fn reports_unterminated_comment() {
        let result = lex("struct /** never closed");
        assert_eq!(result.tokens[1].kind, TokenKind::Error);
        assert!(result.diagnostics[0].message.contains("unterminated comment"));
    }

    #[test]
    fn lazy_lexer_stops_after_eof() {
        let mut lexer = Lexer::new("a");
        assert_eq!(lexer.next().map(|t| t.kind), Some(TokenKind::Ident));
        assert_eq!(lexer.next().map(|t| t.kind), Some(TokenKind::Eof));
        assert_eq!(lexer.next(), None);
    }
}
