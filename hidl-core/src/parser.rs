//! Recursive-descent parser producing [`ast::File`].
//!
//! The parser stops at the first problem: either the first lexer error
//! token it meets or the first unexpected token.

use std::path::{Path, PathBuf};

use crate::ast::{
    Annotation, AnnotationParam, AnnotationValue, BinaryOp, CompoundKind, Decl, DeclKind,
    EnumValue, Expr, ExprKind, Field, File, Import, Literal, Method, NameRef, TypeExpr,
    TypeExprKind, TypeName, UnaryOp,
};
use crate::builtins::{find_builtin, find_scalar};
use crate::diagnostic::Diagnostic;
use crate::error::CoreError;
use crate::fqname::FqName;
use crate::lexer::{LexResult, Token, TokenKind, doc_comment_text, lex};
use crate::span::Location;

pub fn parse(path: &Path, source: &str) -> Result<File, CoreError> {
    let mut parser = Parser::new(path, source);
    parser.parse_file()
}

/// Parses a standalone constant expression.
pub fn parse_expression(source: &str) -> Result<Expr, CoreError> {
    let mut parser = Parser::new(Path::new("<expression>"), source);
    let expr = parser.parse_expr()?;
    parser.expect(TokenKind::Eof)?;
    Ok(expr)
}

struct Parser<'src> {
    path: PathBuf,
    source: &'src str,
    tokens: Vec<Token>,
    lex_diagnostics: Vec<Diagnostic>,
    position: usize,
    /// Ternaries whose `:` has not been reached yet. While this is
    /// nonzero, `Name:VALUE` may be a ternary colon instead.
    pending_colons: usize,
}

impl<'src> Parser<'src> {
    fn new(path: &Path, source: &'src str) -> Self {
        let LexResult {
            tokens,
            diagnostics,
        } = lex(source);
        Parser {
            path: path.to_path_buf(),
            source,
            tokens,
            lex_diagnostics: diagnostics,
            position: 0,
            pending_colons: 0,
        }
    }

    // -----------------------------------------------------------------
    // Token plumbing
    // -----------------------------------------------------------------

    fn peek(&self) -> &Token {
        self.peek_at(0)
    }

    fn peek_at(&self, offset: usize) -> &Token {
        let last = self.tokens.len() - 1;
        &self.tokens[(self.position + offset).min(last)]
    }

    fn peek_kind(&self) -> TokenKind {
        self.peek().kind
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.peek_kind() == kind
    }

    fn advance(&mut self) -> Result<Token, CoreError> {
        let token = self.peek().clone();
        if token.kind == TokenKind::Error {
            return Err(self.lex_error(&token));
        }
        if token.kind != TokenKind::Eof {
            self.position += 1;
        }
        Ok(token)
    }

    fn eat(&mut self, kind: TokenKind) -> Result<bool, CoreError> {
        if self.check(kind) {
            self.advance()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn expect(&mut self, kind: TokenKind) -> Result<Token, CoreError> {
        if self.check(kind) {
            self.advance()
        } else {
            Err(self.unexpected(kind.describe()))
        }
    }

    fn expect_ident(&mut self) -> Result<(String, Location), CoreError> {
        let token = self.expect(TokenKind::Ident)?;
        Ok((token.text(self.source).to_string(), token.location()))
    }

    /// Error for the current token, or the lex error it carries.
    fn unexpected(&self, expected: &str) -> CoreError {
        let token = self.peek();
        if token.kind == TokenKind::Error {
            return self.lex_error(token);
        }
        let found = match token.kind {
            TokenKind::Ident
            | TokenKind::IntLiteral
            | TokenKind::FloatLiteral
            | TokenKind::StringLiteral => {
                format!("{} '{}'", token.kind.describe(), token.text(self.source))
            }
            kind => kind.describe().to_string(),
        };
        CoreError::SyntaxError {
            path: self.path.clone(),
            location: token.location(),
            expected: expected.to_string(),
            found,
        }
    }

    fn lex_error(&self, token: &Token) -> CoreError {
        let message = self
            .lex_diagnostics
            .iter()
            .find(|d| d.location == token.location())
            .map(|d| d.message.clone())
            .unwrap_or_else(|| format!("invalid input '{}'", token.text(self.source)));
        CoreError::LexError {
            path: self.path.clone(),
            location: token.location(),
            message,
        }
    }

    /// True when the token after the current one starts right where the
    /// current one ends, used to glue `<` `<` into a shift.
    fn adjacent(&self) -> bool {
        self.peek().span.end == self.peek_at(1).span.start
    }

    // -----------------------------------------------------------------
    // File structure
    // -----------------------------------------------------------------

    fn parse_file(&mut self) -> Result<File, CoreError> {
        self.take_doc()?;
        let package_token = self.expect(TokenKind::Package)?;
        let package = self.parse_package_name()?;
        self.expect(TokenKind::Semi)?;

        let mut imports = Vec::new();
        loop {
            self.take_doc()?;
            if !self.check(TokenKind::Import) {
                break;
            }
            let import = self.advance()?;
            let name = self.parse_fq_ref()?;
            self.expect(TokenKind::Semi)?;
            imports.push(Import {
                name,
                location: import.location(),
            });
        }

        let mut decls = Vec::new();
        while !self.check(TokenKind::Eof) {
            let doc = self.take_doc()?;
            if self.check(TokenKind::Eof) {
                break;
            }
            let annotations = self.parse_annotations()?;
            decls.push(self.parse_decl(doc, annotations)?);
        }

        Ok(File {
            package,
            package_location: package_token.location(),
            imports,
            decls,
        })
    }

    /// `a.b.c@1.0`
    fn parse_package_name(&mut self) -> Result<FqName, CoreError> {
        let components = self.parse_dotted()?;
        self.expect(TokenKind::At)?;
        let version = self.parse_version()?;
        Ok(FqName::new(components, Some(version), Vec::new()))
    }

    fn parse_dotted(&mut self) -> Result<Vec<String>, CoreError> {
        let mut components = vec![self.expect_ident()?.0];
        while self.check(TokenKind::Dot) && self.peek_at(1).kind == TokenKind::Ident {
            self.advance()?;
            components.push(self.expect_ident()?.0);
        }
        Ok(components)
    }

    /// `1.0` arrives as one float token; a bare `1` is not a version.
    fn parse_version(&mut self) -> Result<(u32, u32), CoreError> {
        if !self.check(TokenKind::FloatLiteral) {
            return Err(self.unexpected("version 'major.minor'"));
        }
        let text = self.peek().text(self.source);
        let parsed = text
            .split_once('.')
            .and_then(|(major, minor)| Some((major.parse().ok()?, minor.parse().ok()?)));
        match parsed {
            Some(version) => {
                self.advance()?;
                Ok(version)
            }
            None => Err(self.unexpected("version 'major.minor'")),
        }
    }

    /// Any of `pkg@1.0`, `pkg@1.0::A.B`, `@1.0::A.B`, `A.B`.
    fn parse_fq_ref(&mut self) -> Result<FqName, CoreError> {
        let mut package = Vec::new();
        let mut version = None;
        let mut names = Vec::new();

        if self.eat(TokenKind::At)? {
            version = Some(self.parse_version()?);
            self.expect(TokenKind::DoubleColon)?;
            names = self.parse_dotted()?;
        } else {
            let dotted = self.parse_dotted()?;
            if self.eat(TokenKind::At)? {
                package = dotted;
                version = Some(self.parse_version()?);
                if self.eat(TokenKind::DoubleColon)? {
                    names = self.parse_dotted()?;
                }
            } else {
                names = dotted;
            }
        }

        Ok(FqName::new(package, version, names))
    }

    fn take_doc(&mut self) -> Result<Option<String>, CoreError> {
        let mut doc = None;
        while self.check(TokenKind::DocComment) {
            let token = self.advance()?;
            doc = Some(doc_comment_text(token.text(self.source)));
        }
        Ok(doc)
    }

    // -----------------------------------------------------------------
    // Annotations
    // -----------------------------------------------------------------

    fn parse_annotations(&mut self) -> Result<Vec<Annotation>, CoreError> {
        let mut annotations = Vec::new();
        while self.check(TokenKind::At) && self.peek_at(1).kind == TokenKind::Ident {
            let at = self.advance()?;
            let (name, _) = self.expect_ident()?;
            let mut params = Vec::new();
            if self.eat(TokenKind::LParen)? {
                loop {
                    let (param, location) = self.expect_ident()?;
                    self.expect(TokenKind::Equal)?;
                    let values = if self.eat(TokenKind::LBrace)? {
                        let mut values = vec![self.parse_annotation_value()?];
                        while self.eat(TokenKind::Comma)? {
                            values.push(self.parse_annotation_value()?);
                        }
                        self.expect(TokenKind::RBrace)?;
                        values
                    } else {
                        vec![self.parse_annotation_value()?]
                    };
                    params.push(AnnotationParam {
                        name: param,
                        location,
                        values,
                    });
                    if !self.eat(TokenKind::Comma)? {
                        break;
                    }
                }
                self.expect(TokenKind::RParen)?;
            }
            annotations.push(Annotation {
                name,
                location: at.location(),
                params,
            });
            self.take_doc()?;
        }
        Ok(annotations)
    }

    fn parse_annotation_value(&mut self) -> Result<AnnotationValue, CoreError> {
        if self.check(TokenKind::StringLiteral) {
            let token = self.advance()?;
            Ok(AnnotationValue::String(unescape(token.text(self.source))))
        } else {
            Ok(AnnotationValue::Expr(self.parse_expr()?))
        }
    }

    // -----------------------------------------------------------------
    // Declarations
    // -----------------------------------------------------------------

    fn is_decl_start(&self) -> bool {
        matches!(
            self.peek_kind(),
            TokenKind::Interface
                | TokenKind::Struct
                | TokenKind::Union
                | TokenKind::SafeUnion
                | TokenKind::Enum
                | TokenKind::Typedef
                | TokenKind::Const
        )
    }

    fn parse_decl(
        &mut self,
        doc: Option<String>,
        annotations: Vec<Annotation>,
    ) -> Result<Decl, CoreError> {
        let keyword = self.peek_kind();
        let decl = match keyword {
            TokenKind::Interface => self.parse_interface(doc, annotations)?,
            TokenKind::Struct => self.parse_compound(CompoundKind::Struct, doc, annotations)?,
            TokenKind::Union => self.parse_compound(CompoundKind::Union, doc, annotations)?,
            TokenKind::SafeUnion => {
                self.parse_compound(CompoundKind::SafeUnion, doc, annotations)?
            }
            TokenKind::Enum => self.parse_enum(doc, annotations)?,
            TokenKind::Typedef => {
                self.advance()?;
                let target = self.parse_type()?;
                let (name, location) = self.expect_ident()?;
                Decl {
                    name,
                    location,
                    doc,
                    annotations,
                    kind: DeclKind::Typedef { target },
                }
            }
            TokenKind::Const => {
                self.advance()?;
                let ty = self.parse_type()?;
                let (name, location) = self.expect_ident()?;
                self.expect(TokenKind::Equal)?;
                let value = self.parse_expr()?;
                Decl {
                    name,
                    location,
                    doc,
                    annotations,
                    kind: DeclKind::Const { ty, value },
                }
            }
            _ => return Err(self.unexpected("declaration")),
        };
        self.expect(TokenKind::Semi)?;
        Ok(decl)
    }

    fn parse_interface(
        &mut self,
        doc: Option<String>,
        annotations: Vec<Annotation>,
    ) -> Result<Decl, CoreError> {
        self.expect(TokenKind::Interface)?;
        let (name, location) = self.expect_ident()?;
        let extends = if self.eat(TokenKind::Extends)? {
            let location = self.peek().location();
            Some(TypeName {
                name: self.parse_fq_ref()?,
                location,
            })
        } else {
            None
        };

        self.expect(TokenKind::LBrace)?;
        let mut members = Vec::new();
        let mut methods = Vec::new();
        while !self.check(TokenKind::RBrace) {
            let doc = self.take_doc()?;
            if self.check(TokenKind::RBrace) {
                break;
            }
            let annotations = self.parse_annotations()?;
            if self.is_decl_start() {
                members.push(self.parse_decl(doc, annotations)?);
            } else {
                methods.push(self.parse_method(doc, annotations)?);
            }
        }
        self.expect(TokenKind::RBrace)?;

        Ok(Decl {
            name,
            location,
            doc,
            annotations,
            kind: DeclKind::Interface {
                extends,
                members,
                methods,
            },
        })
    }

    fn parse_method(
        &mut self,
        doc: Option<String>,
        annotations: Vec<Annotation>,
    ) -> Result<Method, CoreError> {
        let oneway = self.eat(TokenKind::Oneway)?;
        if !self.check(TokenKind::Ident) {
            return Err(self.unexpected("method or declaration"));
        }
        let (name, location) = self.expect_ident()?;
        let args = self.parse_params()?;
        let results = if self.eat(TokenKind::Generates)? {
            Some(self.parse_params()?)
        } else {
            None
        };
        self.expect(TokenKind::Semi)?;
        Ok(Method {
            name,
            location,
            doc,
            annotations,
            oneway,
            args,
            results,
        })
    }

    fn parse_params(&mut self) -> Result<Vec<Field>, CoreError> {
        self.expect(TokenKind::LParen)?;
        let mut params = Vec::new();
        if !self.check(TokenKind::RParen) {
            loop {
                let annotations = self.parse_annotations()?;
                let ty = self.parse_type()?;
                let (name, location) = self.expect_ident()?;
                params.push(Field {
                    name,
                    location,
                    doc: None,
                    annotations,
                    ty,
                });
                if !self.eat(TokenKind::Comma)? {
                    break;
                }
            }
        }
        self.expect(TokenKind::RParen)?;
        Ok(params)
    }

    fn parse_compound(
        &mut self,
        kind: CompoundKind,
        doc: Option<String>,
        annotations: Vec<Annotation>,
    ) -> Result<Decl, CoreError> {
        self.advance()?;
        let (name, location) = self.expect_ident()?;
        self.expect(TokenKind::LBrace)?;

        let mut members = Vec::new();
        let mut fields = Vec::new();
        while !self.check(TokenKind::RBrace) {
            let doc = self.take_doc()?;
            if self.check(TokenKind::RBrace) {
                break;
            }
            let annotations = self.parse_annotations()?;
            if self.is_decl_start() {
                members.push(self.parse_decl(doc, annotations)?);
                continue;
            }
            let ty = self.parse_type()?;
            let (name, location) = self.expect_ident()?;
            self.expect(TokenKind::Semi)?;
            fields.push(Field {
                name,
                location,
                doc,
                annotations,
                ty,
            });
        }
        self.expect(TokenKind::RBrace)?;

        Ok(Decl {
            name,
            location,
            doc,
            annotations,
            kind: DeclKind::Compound {
                kind,
                members,
                fields,
            },
        })
    }

    fn parse_enum(
        &mut self,
        doc: Option<String>,
        annotations: Vec<Annotation>,
    ) -> Result<Decl, CoreError> {
        self.expect(TokenKind::Enum)?;
        let (name, location) = self.expect_ident()?;
        self.expect(TokenKind::Colon)?;
        let storage = self.parse_type()?;
        self.expect(TokenKind::LBrace)?;

        let mut values = Vec::new();
        loop {
            let doc = self.take_doc()?;
            if self.check(TokenKind::RBrace) {
                break;
            }
            let (value_name, value_location) = self.expect_ident()?;
            let value = if self.eat(TokenKind::Equal)? {
                Some(self.parse_expr()?)
            } else {
                None
            };
            values.push(EnumValue {
                name: value_name,
                location: value_location,
                doc,
                value,
            });
            if !self.eat(TokenKind::Comma)? {
                self.take_doc()?;
                break;
            }
        }
        self.expect(TokenKind::RBrace)?;

        Ok(Decl {
            name,
            location,
            doc,
            annotations,
            kind: DeclKind::Enum { storage, values },
        })
    }

    // -----------------------------------------------------------------
    // Types
    // -----------------------------------------------------------------

    fn parse_type(&mut self) -> Result<TypeExpr, CoreError> {
        let location = self.peek().location();
        let builtin = match self.peek_kind() {
            TokenKind::Ident => find_builtin(self.peek().text(self.source)),
            TokenKind::At => None,
            _ => return Err(self.unexpected("type")),
        };

        let base = match builtin {
            Some(builtin) if builtin.kind.is_generic() => {
                self.advance()?;
                self.expect(TokenKind::Less)?;
                let argument = self.parse_type()?;
                self.expect(TokenKind::Greater)?;
                TypeExprKind::Generic {
                    builtin: builtin.kind,
                    argument: Box::new(argument),
                }
            }
            Some(builtin) => {
                self.advance()?;
                TypeExprKind::Builtin(builtin.kind)
            }
            None => {
                let name = self.parse_fq_ref()?;
                if name.names().is_empty() {
                    return Err(CoreError::SyntaxError {
                        path: self.path.clone(),
                        location,
                        expected: "type name".to_string(),
                        found: format!("package reference '{name}'"),
                    });
                }
                TypeExprKind::Named(name)
            }
        };

        let mut dimensions = Vec::new();
        while self.eat(TokenKind::LBracket)? {
            dimensions.push(self.parse_expr()?);
            self.expect(TokenKind::RBracket)?;
        }

        // `T[2][3]` is two arrays of three: the innermost dimension is last.
        let mut ty = TypeExpr {
            kind: base,
            location,
        };
        for size in dimensions.into_iter().rev() {
            ty = TypeExpr {
                kind: TypeExprKind::Array {
                    element: Box::new(ty),
                    size,
                },
                location,
            };
        }
        Ok(ty)
    }

    // -----------------------------------------------------------------
    // Constant expressions
    // -----------------------------------------------------------------

    fn parse_expr(&mut self) -> Result<Expr, CoreError> {
        let condition = self.parse_binary(1)?;
        if !self.check(TokenKind::Question) {
            return Ok(condition);
        }
        self.advance()?;

        self.pending_colons += 1;
        let then = self.parse_expr();
        self.pending_colons -= 1;
        let then = then?;

        self.expect(TokenKind::Colon)?;
        let otherwise = self.parse_expr()?;
        let location = condition.location;
        Ok(Expr {
            kind: ExprKind::Ternary {
                condition: Box::new(condition),
                then: Box::new(then),
                otherwise: Box::new(otherwise),
            },
            location,
        })
    }

    /// Precedence climbing over the binary operators.
    fn parse_binary(&mut self, min_precedence: u8) -> Result<Expr, CoreError> {
        let mut lhs = self.parse_unary()?;
        while let Some((op, width)) = self.peek_binary_op() {
            if op.precedence() < min_precedence {
                break;
            }
            let location = self.peek().location();
            for _ in 0..width {
                self.advance()?;
            }
            let rhs = self.parse_binary(op.precedence() + 1)?;
            lhs = Expr {
                kind: ExprKind::Binary {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                location,
            };
        }
        Ok(lhs)
    }

    /// The operator at the current position and how many tokens it spans.
    fn peek_binary_op(&self) -> Option<(BinaryOp, usize)> {
        let next = self.peek_at(1).kind;
        let op = match self.peek_kind() {
            TokenKind::OrOr => (BinaryOp::Or, 1),
            TokenKind::AndAnd => (BinaryOp::And, 1),
            TokenKind::Pipe => (BinaryOp::BitOr, 1),
            TokenKind::Caret => (BinaryOp::BitXor, 1),
            TokenKind::Amp => (BinaryOp::BitAnd, 1),
            TokenKind::EqEq => (BinaryOp::Eq, 1),
            TokenKind::NotEq => (BinaryOp::Ne, 1),
            TokenKind::Less if self.adjacent() && next == TokenKind::Less => (BinaryOp::Shl, 2),
            TokenKind::Less if self.adjacent() && next == TokenKind::Equal => (BinaryOp::Le, 2),
            TokenKind::Less => (BinaryOp::Lt, 1),
            TokenKind::Greater if self.adjacent() && next == TokenKind::Greater => {
                (BinaryOp::Shr, 2)
            }
            TokenKind::Greater if self.adjacent() && next == TokenKind::Equal => (BinaryOp::Ge, 2),
            TokenKind::Greater => (BinaryOp::Gt, 1),
            TokenKind::Plus => (BinaryOp::Add, 1),
            TokenKind::Minus => (BinaryOp::Sub, 1),
            TokenKind::Star => (BinaryOp::Mul, 1),
            TokenKind::Slash => (BinaryOp::Div, 1),
            TokenKind::Percent => (BinaryOp::Rem, 1),
            _ => return None,
        };
        Some(op)
    }

    fn parse_unary(&mut self) -> Result<Expr, CoreError> {
        let location = self.peek().location();
        let op = match self.peek_kind() {
            TokenKind::Plus => Some(UnaryOp::Plus),
            TokenKind::Minus => Some(UnaryOp::Minus),
            TokenKind::Bang => Some(UnaryOp::Not),
            TokenKind::Tilde => Some(UnaryOp::BitNot),
            _ => None,
        };
        if let Some(op) = op {
            self.advance()?;
            let operand = self.parse_unary()?;
            return Ok(Expr {
                kind: ExprKind::Unary {
                    op,
                    operand: Box::new(operand),
                },
                location,
            });
        }

        if self.check(TokenKind::LParen) && self.peek_at(2).kind == TokenKind::RParen {
            let candidate = self.peek_at(1);
            let cast = match candidate.kind {
                TokenKind::Ident => find_scalar(candidate.text(self.source)),
                _ => None,
            };
            if let Some(to) = cast {
                for _ in 0..3 {
                    self.advance()?;
                }
                let operand = self.parse_unary()?;
                return Ok(Expr {
                    kind: ExprKind::Cast {
                        to,
                        operand: Box::new(operand),
                    },
                    location,
                });
            }
        }

        self.parse_primary()
    }

    /// Whether every pending ternary still finds its `:` after the token
    /// at `offset`, scanning to the end of the enclosing expression.
    fn colons_remain_after(&self, offset: usize) -> bool {
        if self.pending_colons == 0 {
            return true;
        }
        let start = (self.position + offset).min(self.tokens.len());
        let mut depth = 0usize;
        let mut spare = 0isize;
        for token in &self.tokens[start..] {
            match token.kind {
                TokenKind::LParen | TokenKind::LBracket | TokenKind::LBrace => depth += 1,
                TokenKind::RParen | TokenKind::RBracket | TokenKind::RBrace => {
                    if depth == 0 {
                        break;
                    }
                    depth -= 1;
                }
                TokenKind::Semi | TokenKind::Comma | TokenKind::Eof if depth == 0 => break,
                TokenKind::Question if depth == 0 => spare -= 1,
                TokenKind::Colon if depth == 0 => spare += 1,
                _ => {}
            }
        }
        spare >= self.pending_colons as isize
    }

    fn parse_primary(&mut self) -> Result<Expr, CoreError> {
        let location = self.peek().location();
        let kind = match self.peek_kind() {
            TokenKind::IntLiteral => {
                let token = self.advance()?;
                ExprKind::Literal(Literal::Int(token.text(self.source).to_string()))
            }
            TokenKind::FloatLiteral => {
                let token = self.advance()?;
                ExprKind::Literal(Literal::Float(token.text(self.source).to_string()))
            }
            TokenKind::True => {
                self.advance()?;
                ExprKind::Literal(Literal::Bool(true))
            }
            TokenKind::False => {
                self.advance()?;
                ExprKind::Literal(Literal::Bool(false))
            }
            TokenKind::LParen => {
                self.advance()?;
                let saved = std::mem::take(&mut self.pending_colons);
                let inner = self.parse_expr();
                self.pending_colons = saved;
                let inner = inner?;
                self.expect(TokenKind::RParen)?;
                return Ok(inner);
            }
            TokenKind::Ident | TokenKind::At => {
                let path = self.parse_fq_ref()?;
                let member = if self.check(TokenKind::Colon)
                    && self.peek_at(1).kind == TokenKind::Ident
                    && self.colons_remain_after(2)
                {
                    self.advance()?;
                    Some(self.expect_ident()?.0)
                } else {
                    None
                };
                ExprKind::Name(NameRef { path, member })
            }
            _ => return Err(self.unexpected("expression")),
        };
        Ok(Expr { kind, location })
    }
}

/// Strips the quotes of a string literal and resolves simple escapes.
fn unescape(raw: &str) -> String {
    let inner = raw
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
        .unwrap_or(raw);
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_str(source: &str) -> Result<File, CoreError> {
        parse(Path::new("test/1.0/types.hal"), source)
    }

    #[test]
    fn parses_package_imports_and_enum() {
        let file = parse_str(
            "package test@1.0;\n\
             import other@2.1::IBar;\n\
             import other@2.1;\n\
             enum Color : int32_t { RED, GREEN = 5, BLUE, };\n",
        )
        .expect("parse");
        assert_eq!(file.package.to_string(), "test@1.0");
        assert_eq!(file.imports.len(), 2);
        assert!(file.imports[0].name.is_fully_qualified());
        assert!(file.imports[1].name.is_package());
        match &file.decls[0].kind {
            DeclKind::Enum { values, .. } => {
                let names: Vec<_> = values.iter().map(|v| v.name.as_str()).collect();
                assert_eq!(names, vec!["RED", "GREEN", "BLUE"]);
                assert!(values[1].value.is_some());
            }
            other => panic!("unexpected decl {other:?}"),
        }
    }

    #[test]
    fn parses_interface_with_methods_and_nested_types() {
        let file = parse(
            Path::new("test/2.0/IFoo.hal"),
            "package test@2.0;\n\
             /** The foo. */\n\
             interface IFoo extends @1.0::IFoo {\n\
                 struct Point { int32_t x; int32_t y; };\n\
                 @entry\n\
                 get(vec<Point> points) generates (bool ok, string name);\n\
                 oneway ping();\n\
             };\n",
        )
        .expect("parse");
        let decl = &file.decls[0];
        assert_eq!(decl.doc.as_deref(), Some("The foo."));
        match &decl.kind {
            DeclKind::Interface {
                extends,
                members,
                methods,
            } => {
                let parent = extends.as_ref().expect("extends");
                assert_eq!(parent.name.to_string(), "@1.0::IFoo");
                assert_eq!(members.len(), 1);
                assert_eq!(methods.len(), 2);
                assert_eq!(methods[0].annotations[0].name, "entry");
                assert_eq!(methods[0].results.as_ref().map(Vec::len), Some(2));
                assert!(methods[1].oneway);
                assert!(methods[1].results.is_none());
            }
            other => panic!("unexpected decl {other:?}"),
        }
    }

    #[test]
    fn parses_nested_generics_and_arrays() {
        let file = parse_str(
            "package test@1.0;\n\
             struct S { vec<vec<uint8_t>> blobs; int32_t[2][3] grid; fmq_sync<int32_t> q; };\n",
        )
        .expect("parse");
        let DeclKind::Compound { fields, .. } = &file.decls[0].kind else {
            panic!("expected struct");
        };
        assert!(matches!(fields[0].ty.kind, TypeExprKind::Generic { .. }));
        match &fields[1].ty.kind {
            TypeExprKind::Array { element, size } => {
                assert_eq!(size.to_string(), "2");
                assert!(matches!(element.kind, TypeExprKind::Array { .. }));
            }
            other => panic!("unexpected type {other:?}"),
        }
    }

    #[test]
    fn parses_annotations_with_arguments() {
        let file = parse_str(
            "package test@1.0;\n\
             @export(name=\"foo_t\", value_prefix=\"FOO_\")\n\
             enum Foo : uint8_t { A = 1 << 2 };\n",
        )
        .expect("parse");
        let annotation = &file.decls[0].annotations[0];
        assert_eq!(annotation.name, "export");
        assert_eq!(annotation.params.len(), 2);
        assert_eq!(
            annotation.params[0].values,
            vec![AnnotationValue::String("foo_t".to_string())]
        );
    }

    #[test]
    fn distinguishes_enum_members_from_ternaries() {
        let expr = parse_expression("Color:RED | Color.GREEN").expect("parse");
        assert_eq!(expr.to_string(), "Color:RED | Color.GREEN");
        let ternary = parse_expression("A ? B : C").expect("parse");
        assert!(matches!(ternary.kind, ExprKind::Ternary { .. }));
        let nested = parse_expression("A ? (E:X) : C").expect("parse");
        assert_eq!(nested.to_string(), "A ? E:X : C");
        let bare = parse_expression("A ? E:X : C").expect("parse");
        assert_eq!(bare.to_string(), "A ? E:X : C");
    }

    #[test]
    fn enum_members_inside_nested_ternaries() {
        let expr = parse_expression("C ? D ? X : E:V : Y").expect("parse");
        let ExprKind::Ternary { then, otherwise, .. } = &expr.kind else {
            panic!("expected a ternary, got {expr:?}");
        };
        let ExprKind::Ternary { otherwise: inner, .. } = &then.kind else {
            panic!("expected a nested ternary, got {then:?}");
        };
        assert_eq!(inner.to_string(), "E:V");
        assert_eq!(otherwise.to_string(), "Y");

        let chained = parse_expression("C ? A : B ? X : Y").expect("parse");
        let ExprKind::Ternary { then, .. } = &chained.kind else {
            panic!("expected a ternary, got {chained:?}");
        };
        assert_eq!(then.to_string(), "A");
    }

    #[test]
    fn parses_casts_and_shifts() {
        let expr = parse_expression("(uint8_t)1 << 3 >= 8").expect("parse");
        assert_eq!(expr.to_string(), "((uint8_t)1 << 3) >= 8");
        let grouped = parse_expression("(X) + 1").expect("parse");
        assert_eq!(grouped.to_string(), "X + 1");
    }

    #[test]
    fn requires_package_header_first() {
        let err = parse_str("struct S {};").unwrap_err();
        match err {
            CoreError::SyntaxError { expected, found, location, .. } => {
                assert_eq!(expected, "'package'");
                assert!(found.contains("struct"));
                assert_eq!(location, Location::new(1, 1));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn rejects_second_package_header() {
        let err = parse_str("package a@1.0;\npackage b@1.0;").unwrap_err();
        assert!(matches!(err, CoreError::SyntaxError { .. }));
    }

    #[test]
    fn reports_expected_versus_found() {
        let err = parse_str("package a@1.0;\nstruct S { int32_t x }").unwrap_err();
        let message = err.to_string();
        assert!(message.contains("test/1.0/types.hal:2:"), "{message}");
        assert!(message.contains("expected ';'"), "{message}");
    }

    #[test]
    fn surfaces_lex_errors() {
        let err = parse_str("package a@1.0;\nstruct S { int32_t $x; };").unwrap_err();
        assert!(matches!(err, CoreError::LexError { .. }), "{err:?}");
    }

    #[test]
    fn rejects_package_reference_as_type() {
        let err = parse_str("package a@1.0;\ntypedef b@1.0 T;").unwrap_err();
        assert!(matches!(err, CoreError::SyntaxError { .. }));
    }
}
