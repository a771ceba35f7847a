//! Surface syntax produced by the parser.
//!
//! Names here are still unresolved: types are written as [`FqName`]s that
//! may be partial, and constant expressions are plain trees. Resolution
//! into the validated form happens in [`crate::name_resolve`].

use std::fmt;

use crate::builtins::BuiltinKind;
use crate::fqname::FqName;
use crate::span::Location;
use crate::types::ScalarKind;

#[derive(Debug, Clone, PartialEq)]
pub struct File {
    pub package: FqName,
    pub package_location: Location,
    pub imports: Vec<Import>,
    pub decls: Vec<Decl>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Import {
    /// Full type, package, or partial name relative to this package.
    pub name: FqName,
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Decl {
    pub name: String,
    pub location: Location,
    pub doc: Option<String>,
    pub annotations: Vec<Annotation>,
    pub kind: DeclKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompoundKind {
    Struct,
    Union,
    SafeUnion,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeclKind {
    Interface {
        extends: Option<TypeName>,
        members: Vec<Decl>,
        methods: Vec<Method>,
    },
    Compound {
        kind: CompoundKind,
        members: Vec<Decl>,
        fields: Vec<Field>,
    },
    Enum {
        storage: TypeExpr,
        values: Vec<EnumValue>,
    },
    Typedef {
        target: TypeExpr,
    },
    Const {
        ty: TypeExpr,
        value: Expr,
    },
}

impl DeclKind {
    /// Nested declarations, for the kinds that open a scope.
    pub fn members(&self) -> &[Decl] {
        match self {
            DeclKind::Interface { members, .. } | DeclKind::Compound { members, .. } => members,
            _ => &[],
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypeName {
    pub name: FqName,
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub location: Location,
    pub doc: Option<String>,
    pub annotations: Vec<Annotation>,
    pub ty: TypeExpr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Method {
    pub name: String,
    pub location: Location,
    pub doc: Option<String>,
    pub annotations: Vec<Annotation>,
    pub oneway: bool,
    pub args: Vec<Field>,
    /// `None` when there is no `generates` clause.
    pub results: Option<Vec<Field>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnumValue {
    pub name: String,
    pub location: Location,
    pub doc: Option<String>,
    pub value: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypeExpr {
    pub kind: TypeExprKind,
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TypeExprKind {
    Builtin(BuiltinKind),
    /// `vec<T>`, `fmq_sync<T>`, `fmq_unsync<T>`.
    Generic {
        builtin: BuiltinKind,
        argument: Box<TypeExpr>,
    },
    Named(FqName),
    Array {
        element: Box<TypeExpr>,
        size: Expr,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    pub name: String,
    pub location: Location,
    pub params: Vec<AnnotationParam>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnnotationParam {
    pub name: String,
    pub location: Location,
    /// A single value, or every element of a `{ ... }` list.
    pub values: Vec<AnnotationValue>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AnnotationValue {
    String(String),
    Expr(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Literal(Literal),
    Name(NameRef),
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Ternary {
        condition: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
    Cast {
        to: ScalarKind,
        operand: Box<Expr>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    /// Source text including any radix prefix and suffix.
    Int(String),
    Float(String),
    Bool(bool),
}

/// A reference to a constant or enum value.
///
/// `Color.GREEN` is kept as a dotted path and split during resolution;
/// `Color:GREEN` records the enum value separately.
#[derive(Debug, Clone, PartialEq)]
pub struct NameRef {
    pub path: FqName,
    pub member: Option<String>,
}

impl fmt::Display for NameRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path)?;
        if let Some(member) = &self.member {
            write!(f, ":{member}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Plus,
    Minus,
    Not,
    BitNot,
}

impl UnaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            UnaryOp::Plus => "+",
            UnaryOp::Minus => "-",
            UnaryOp::Not => "!",
            UnaryOp::BitNot => "~",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Shl,
    Shr,
    BitAnd,
    BitOr,
    BitXor,
    Lt,
    Gt,
    Le,
    Ge,
    Eq,
    Ne,
    And,
    Or,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::Shl => "<<",
            BinaryOp::Shr => ">>",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitOr => "|",
            BinaryOp::BitXor => "^",
            BinaryOp::Lt => "<",
            BinaryOp::Gt => ">",
            BinaryOp::Le => "<=",
            BinaryOp::Ge => ">=",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
        }
    }

    /// Binding power; higher binds tighter.
    pub fn precedence(self) -> u8 {
        match self {
            BinaryOp::Or => 1,
            BinaryOp::And => 2,
            BinaryOp::BitOr => 3,
            BinaryOp::BitXor => 4,
            BinaryOp::BitAnd => 5,
            BinaryOp::Eq | BinaryOp::Ne => 6,
            BinaryOp::Lt | BinaryOp::Gt | BinaryOp::Le | BinaryOp::Ge => 7,
            BinaryOp::Shl | BinaryOp::Shr => 8,
            BinaryOp::Add | BinaryOp::Sub => 9,
            BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => 10,
        }
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Lt | BinaryOp::Gt | BinaryOp::Le | BinaryOp::Ge | BinaryOp::Eq | BinaryOp::Ne
        )
    }

    pub fn is_logical(self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or)
    }
}

/// Canonical rendering, fully parenthesised for nested operators; used in
/// diagnostics and as the textual form of evaluated constants.
impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ExprKind::Literal(Literal::Int(text)) | ExprKind::Literal(Literal::Float(text)) => {
                f.write_str(text)
            }
            ExprKind::Literal(Literal::Bool(value)) => write!(f, "{value}"),
            ExprKind::Name(name) => write!(f, "{name}"),
            ExprKind::Unary { op, operand } => write!(f, "{}{}", op.symbol(), Nested(operand)),
            ExprKind::Binary { op, lhs, rhs } => {
                write!(f, "{} {} {}", Nested(lhs), op.symbol(), Nested(rhs))
            }
            ExprKind::Ternary {
                condition,
                then,
                otherwise,
            } => write!(
                f,
                "{} ? {} : {}",
                Nested(condition),
                Nested(then),
                Nested(otherwise)
            ),
            ExprKind::Cast { to, operand } => write!(f, "({}){}", to.name(), Nested(operand)),
        }
    }
}

struct Nested<'a>(&'a Expr);

impl fmt::Display for Nested<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.kind {
            ExprKind::Binary { .. } | ExprKind::Ternary { .. } => write!(f, "({})", self.0),
            _ => write!(f, "{}", self.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int(text: &str) -> Expr {
        Expr {
            kind: ExprKind::Literal(Literal::Int(text.to_string())),
            location: Location::START,
        }
    }

    #[test]
    fn renders_nested_expressions_with_parentheses() {
        let inner = Expr {
            kind: ExprKind::Binary {
                op: BinaryOp::Add,
                lhs: Box::new(int("1")),
                rhs: Box::new(int("2")),
            },
            location: Location::START,
        };
        let outer = Expr {
            kind: ExprKind::Binary {
                op: BinaryOp::Mul,
                lhs: Box::new(inner),
                rhs: Box::new(int("3")),
            },
            location: Location::START,
        };
        assert_eq!(outer.to_string(), "(1 + 2) * 3");
    }

    #[test]
    fn precedence_orders_like_c() {
        assert!(BinaryOp::Mul.precedence() > BinaryOp::Add.precedence());
        assert!(BinaryOp::Add.precedence() > BinaryOp::Shl.precedence());
        assert!(BinaryOp::BitAnd.precedence() > BinaryOp::BitOr.precedence());
        assert!(BinaryOp::And.precedence() > BinaryOp::Or.precedence());
    }
}
