//! Compile-time constant expressions.
//!
//! Integer arithmetic follows the C rules: operands are promoted to at
//! least `int32_t`, then converted to a common type (wider wins, unsigned
//! wins at equal width), and the result wraps around in that type. Wrapping
//! is never an error; it sets [`ConstantExpression::overflowed`] instead,
//! which callers turn into a warning.

use std::cmp::Ordering;
use std::fmt;
use std::path::Path;

use crate::ast::{BinaryOp, Expr, ExprKind, Literal, NameRef, UnaryOp};
use crate::error::CoreError;
use crate::span::Location;
use crate::types::ScalarKind;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConstValue {
    Bool(bool),
    Int(i64),
    Uint(u64),
    Float(f64),
}

impl fmt::Display for ConstValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConstValue::Bool(value) => write!(f, "{value}"),
            ConstValue::Int(value) => write!(f, "{value}"),
            ConstValue::Uint(value) => write!(f, "{value}"),
            ConstValue::Float(value) => write!(f, "{value:?}"),
        }
    }
}

/// An evaluated, typed constant. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstantExpression {
    kind: ScalarKind,
    value: ConstValue,
    description: String,
    overflowed: bool,
}

impl ConstantExpression {
    /// Builds an integral (or bool) constant, wrapping `value` into `kind`.
    pub fn integer(kind: ScalarKind, value: i128) -> Self {
        let (wrapped, overflowed) = wrap(value, kind);
        ConstantExpression {
            kind,
            value: int_value(kind, wrapped),
            description: wrapped.to_string(),
            overflowed,
        }
    }

    pub fn boolean(value: bool) -> Self {
        ConstantExpression {
            kind: ScalarKind::Bool,
            value: ConstValue::Bool(value),
            description: value.to_string(),
            overflowed: false,
        }
    }

    pub fn floating(kind: ScalarKind, value: f64) -> Self {
        let value = if kind == ScalarKind::Float {
            f64::from(value as f32)
        } else {
            value
        };
        ConstantExpression {
            kind,
            value: ConstValue::Float(value),
            description: format!("{value:?}"),
            overflowed: false,
        }
    }

    fn zero(kind: ScalarKind) -> Self {
        if kind.is_floating() {
            ConstantExpression::floating(kind, 0.0)
        } else {
            ConstantExpression::integer(kind, 0)
        }
    }

    pub fn kind(&self) -> ScalarKind {
        self.kind
    }

    pub fn value(&self) -> ConstValue {
        self.value
    }

    /// Source-level form of the expression this value came from.
    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn overflowed(&self) -> bool {
        self.overflowed
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    fn with_overflow(mut self, overflowed: bool) -> Self {
        self.overflowed |= overflowed;
        self
    }

    /// The value as a mathematical integer, for integral and bool kinds.
    pub fn as_i128(&self) -> Option<i128> {
        match self.value {
            ConstValue::Bool(value) => Some(i128::from(value)),
            ConstValue::Int(value) => Some(i128::from(value)),
            ConstValue::Uint(value) => Some(i128::from(value)),
            ConstValue::Float(_) => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        self.as_i128().and_then(|value| u64::try_from(value).ok())
    }

    pub fn as_f64(&self) -> f64 {
        match self.value {
            ConstValue::Bool(value) => f64::from(u8::from(value)),
            ConstValue::Int(value) => value as f64,
            ConstValue::Uint(value) => value as f64,
            ConstValue::Float(value) => value,
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self.value {
            ConstValue::Bool(value) => value,
            ConstValue::Int(value) => value != 0,
            ConstValue::Uint(value) => value != 0,
            ConstValue::Float(value) => value != 0.0,
        }
    }

    /// The value rendered as a literal of its own kind.
    pub fn value_string(&self) -> String {
        self.value.to_string()
    }

    /// Explicit conversion; truncation is intentional and not recorded as
    /// overflow.
    pub fn cast(&self, kind: ScalarKind) -> Self {
        let converted = self.convert(kind);
        ConstantExpression {
            overflowed: self.overflowed,
            ..converted
        }
    }

    /// Implicit conversion on assignment to storage of `kind`. Values that
    /// do not survive the conversion are kept truncated and flagged.
    pub fn assign_to(&self, kind: ScalarKind) -> Result<Self, String> {
        if kind == ScalarKind::Bool && self.kind != ScalarKind::Bool {
            return Err(format!("cannot assign {} value to bool", self.kind));
        }
        if kind.is_integral() && self.kind.is_floating() {
            return Err(format!("cannot assign {} value to {kind}", self.kind));
        }
        let converted = self.convert(kind);
        Ok(ConstantExpression {
            description: self.description.clone(),
            ..converted
        })
    }

    fn convert(&self, kind: ScalarKind) -> Self {
        let converted = if kind == ScalarKind::Bool {
            ConstantExpression::boolean(self.is_truthy())
        } else if kind.is_floating() {
            ConstantExpression::floating(kind, self.as_f64())
        } else {
            let value = match self.as_i128() {
                Some(value) => value,
                None => self.as_f64().trunc() as i128,
            };
            ConstantExpression::integer(kind, value)
        };
        ConstantExpression {
            description: self.description.clone(),
            overflowed: self.overflowed || converted.overflowed,
            ..converted
        }
    }
}

/// Name lookup used while evaluating; implemented by the resolver so that
/// evaluation can recurse into other constants and enum values.
pub trait ConstEnv {
    fn lookup(&mut self, name: &NameRef, location: Location) -> Result<ConstantExpression, CoreError>;

    /// File being evaluated, for diagnostics.
    fn path(&self) -> &Path;
}

/// Evaluates `expr`. The result carries the expression's source form as
/// its description.
pub fn evaluate(expr: &Expr, env: &mut dyn ConstEnv) -> Result<ConstantExpression, CoreError> {
    let value = eval(expr, env, false)?;
    Ok(value.with_description(expr.to_string()))
}

/// Why an operator produced no value.
enum Fault {
    /// Ill-formed wherever it appears.
    Invalid(String),
    /// Well-formed but undefined for these operands; tolerated in the
    /// branch a conditional does not take.
    Undefined(ScalarKind, String),
}

impl From<String> for Fault {
    fn from(message: String) -> Self {
        Fault::Invalid(message)
    }
}

/// `guarded` is set inside the untaken branch of a conditional.
fn eval(expr: &Expr, env: &mut dyn ConstEnv, guarded: bool) -> Result<ConstantExpression, CoreError> {
    let fail = |env: &dyn ConstEnv, message: String| CoreError::ConstantEvaluation {
        path: env.path().to_path_buf(),
        location: expr.location,
        expression: expr.to_string(),
        message,
    };

    match &expr.kind {
        ExprKind::Literal(Literal::Bool(value)) => Ok(ConstantExpression::boolean(*value)),
        ExprKind::Literal(Literal::Int(text)) => {
            let (kind, value) = parse_int_literal(text).map_err(|message| fail(env, message))?;
            Ok(ConstantExpression::integer(kind, value))
        }
        ExprKind::Literal(Literal::Float(text)) => {
            let (kind, value) = parse_float_literal(text).map_err(|message| fail(env, message))?;
            Ok(ConstantExpression::floating(kind, value))
        }
        ExprKind::Name(name) => env.lookup(name, expr.location),
        ExprKind::Unary { op, operand } => {
            let operand = eval(operand, env, guarded)?;
            unary(*op, &operand).map_err(|message| fail(env, message))
        }
        ExprKind::Binary { op, lhs, rhs } => {
            let lhs = eval(lhs, env, guarded)?;
            let rhs = eval(rhs, env, guarded)?;
            match binary(*op, &lhs, &rhs) {
                Ok(value) => Ok(value),
                Err(Fault::Undefined(kind, _)) if guarded => Ok(ConstantExpression::zero(kind)),
                Err(Fault::Invalid(message) | Fault::Undefined(_, message)) => Err(fail(env, message)),
            }
        }
        ExprKind::Ternary {
            condition,
            then,
            otherwise,
        } => {
            let condition = eval(condition, env, guarded)?;
            let (taken, other) = if condition.is_truthy() {
                (then, otherwise)
            } else {
                (otherwise, then)
            };
            let taken = eval(taken, env, guarded)?;
            // The untaken branch only contributes its type.
            let other = eval(other, env, true)?;
            let kind = common_kind(taken.kind, other.kind);
            Ok(taken.convert(kind).with_overflow(condition.overflowed))
        }
        ExprKind::Cast { to, operand } => Ok(eval(operand, env, guarded)?.cast(*to)),
    }
}

fn unary(op: UnaryOp, operand: &ConstantExpression) -> Result<ConstantExpression, String> {
    if op == UnaryOp::Not {
        return Ok(ConstantExpression::boolean(!operand.is_truthy()).with_overflow(operand.overflowed));
    }

    let kind = promote(operand.kind);
    let result = match (op, operand.as_i128()) {
        (UnaryOp::BitNot, None) => {
            return Err(format!("operator ~ requires an integral operand, found {}", operand.kind));
        }
        (UnaryOp::Plus, Some(value)) => ConstantExpression::integer(kind, value),
        (UnaryOp::Minus, Some(value)) => ConstantExpression::integer(kind, -value),
        (UnaryOp::BitNot, Some(value)) => ConstantExpression::integer(kind, !value),
        (UnaryOp::Plus, None) => ConstantExpression::floating(kind, operand.as_f64()),
        (UnaryOp::Minus, None) => ConstantExpression::floating(kind, -operand.as_f64()),
        (UnaryOp::Not, _) => unreachable!("handled above"),
    };
    Ok(result.with_overflow(operand.overflowed))
}

fn binary(op: BinaryOp, lhs: &ConstantExpression, rhs: &ConstantExpression) -> Result<ConstantExpression, Fault> {
    let carried = lhs.overflowed || rhs.overflowed;

    if op.is_logical() {
        let value = match op {
            BinaryOp::And => lhs.is_truthy() && rhs.is_truthy(),
            _ => lhs.is_truthy() || rhs.is_truthy(),
        };
        return Ok(ConstantExpression::boolean(value).with_overflow(carried));
    }

    if matches!(op, BinaryOp::Shl | BinaryOp::Shr) {
        let (Some(value), Some(amount)) = (lhs.as_i128(), rhs.as_i128()) else {
            return Err(format!("operator {} requires integral operands", op.symbol()).into());
        };
        let kind = promote(lhs.kind);
        if amount < 0 || amount >= i128::from(kind.bits()) {
            return Err(Fault::Undefined(
                kind,
                format!("shift amount {amount} is out of range for {kind}"),
            ));
        }
        let result = if op == BinaryOp::Shl {
            value << amount
        } else {
            value >> amount
        };
        return Ok(ConstantExpression::integer(kind, result).with_overflow(carried));
    }

    let kind = common_kind(lhs.kind, rhs.kind);

    if kind.is_floating() {
        let (a, b) = (lhs.as_f64(), rhs.as_f64());
        let value = match op {
            BinaryOp::Add => a + b,
            BinaryOp::Sub => a - b,
            BinaryOp::Mul => a * b,
            BinaryOp::Div => {
                if b == 0.0 {
                    return Err(Fault::Undefined(kind, "division by zero".to_string()));
                }
                a / b
            }
            _ if op.is_comparison() => {
                let ordering = a.partial_cmp(&b);
                return Ok(ConstantExpression::boolean(compare(op, ordering)).with_overflow(carried));
            }
            _ => {
                return Err(format!(
                    "operator {} requires integral operands, found {kind}",
                    op.symbol()
                )
                .into());
            }
        };
        return Ok(ConstantExpression::floating(kind, value).with_overflow(carried));
    }

    let a = lhs.convert(kind).as_i128().unwrap_or_default();
    let b = rhs.convert(kind).as_i128().unwrap_or_default();
    let (value, exact) = match op {
        BinaryOp::Add => (a + b, true),
        BinaryOp::Sub => (a - b, true),
        BinaryOp::Mul => match a.checked_mul(b) {
            Some(value) => (value, true),
            None => (a.wrapping_mul(b), false),
        },
        BinaryOp::Div | BinaryOp::Rem if b == 0 => {
            return Err(Fault::Undefined(kind, "division by zero".to_string()));
        }
        BinaryOp::Div => (a / b, true),
        BinaryOp::Rem => (a % b, true),
        BinaryOp::BitAnd => (a & b, true),
        BinaryOp::BitOr => (a | b, true),
        BinaryOp::BitXor => (a ^ b, true),
        _ => {
            let ordering = Some(a.cmp(&b));
            return Ok(ConstantExpression::boolean(compare(op, ordering)).with_overflow(carried));
        }
    };
    Ok(ConstantExpression::integer(kind, value).with_overflow(carried || !exact))
}

fn compare(op: BinaryOp, ordering: Option<Ordering>) -> bool {
    match (op, ordering) {
        (BinaryOp::Ne, None) => true,
        (_, None) => false,
        (BinaryOp::Lt, Some(o)) => o == Ordering::Less,
        (BinaryOp::Gt, Some(o)) => o == Ordering::Greater,
        (BinaryOp::Le, Some(o)) => o != Ordering::Greater,
        (BinaryOp::Ge, Some(o)) => o != Ordering::Less,
        (BinaryOp::Eq, Some(o)) => o == Ordering::Equal,
        (BinaryOp::Ne, Some(o)) => o != Ordering::Equal,
        _ => false,
    }
}

/// Integral promotion: everything narrower than `int32_t` becomes
/// `int32_t`.
pub fn promote(kind: ScalarKind) -> ScalarKind {
    match kind {
        ScalarKind::Bool
        | ScalarKind::Int8
        | ScalarKind::Uint8
        | ScalarKind::Int16
        | ScalarKind::Uint16 => ScalarKind::Int32,
        other => other,
    }
}

/// The usual arithmetic conversions.
pub fn common_kind(lhs: ScalarKind, rhs: ScalarKind) -> ScalarKind {
    if lhs == ScalarKind::Bool && rhs == ScalarKind::Bool {
        return ScalarKind::Bool;
    }
    if lhs == ScalarKind::Double || rhs == ScalarKind::Double {
        return ScalarKind::Double;
    }
    if lhs == ScalarKind::Float || rhs == ScalarKind::Float {
        return ScalarKind::Float;
    }

    let (lhs, rhs) = (promote(lhs), promote(rhs));
    if lhs == rhs {
        return lhs;
    }
    if lhs.is_signed() == rhs.is_signed() {
        return if lhs.bits() >= rhs.bits() { lhs } else { rhs };
    }
    let (signed, unsigned) = if lhs.is_signed() { (lhs, rhs) } else { (rhs, lhs) };
    if unsigned.bits() >= signed.bits() {
        unsigned
    } else {
        signed
    }
}

/// Reduces `value` modulo the width of `kind`, reporting whether the value
/// changed.
fn wrap(value: i128, kind: ScalarKind) -> (i128, bool) {
    if kind == ScalarKind::Bool {
        return (i128::from(value != 0), false);
    }
    let bits = kind.bits();
    let modulus = 1i128 << bits;
    let mut wrapped = value.rem_euclid(modulus);
    if kind.is_signed() && wrapped >= modulus / 2 {
        wrapped -= modulus;
    }
    (wrapped, wrapped != value)
}

fn int_value(kind: ScalarKind, value: i128) -> ConstValue {
    match kind {
        ScalarKind::Bool => ConstValue::Bool(value != 0),
        kind if kind.is_signed() => ConstValue::Int(value as i64),
        _ => ConstValue::Uint(value as u64),
    }
}

/// Parses an integer literal with optional radix prefix and `u`/`l`
/// suffixes, choosing the first kind that holds the value.
pub fn parse_int_literal(text: &str) -> Result<(ScalarKind, i128), String> {
    let digits_end = text
        .find(|c: char| matches!(c, 'u' | 'U' | 'l' | 'L'))
        .unwrap_or(text.len());
    let (digits, suffix) = text.split_at(digits_end);
    let unsigned = suffix.contains(['u', 'U']);
    let long = suffix.contains(['l', 'L']);

    let (radix, body, decimal) = if let Some(hex) = digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
    {
        (16, hex, false)
    } else if digits.len() > 1 && digits.starts_with('0') {
        (8, &digits[1..], false)
    } else {
        (10, digits, true)
    };

    let value = u128::from_str_radix(body, radix)
        .ok()
        .filter(|value| *value <= u128::from(u64::MAX))
        .ok_or_else(|| format!("integer literal {text} is out of range"))?;
    let value = value as i128;

    use ScalarKind::*;
    let candidates: &[ScalarKind] = match (unsigned, long, decimal) {
        (true, true, _) => &[Uint64],
        (true, false, _) => &[Uint32, Uint64],
        (false, true, _) => &[Int64, Uint64],
        (false, false, true) => &[Int32, Int64, Uint64],
        (false, false, false) => &[Int32, Uint32, Int64, Uint64],
    };
    candidates
        .iter()
        .copied()
        .find(|kind| {
            kind.integer_range()
                .is_some_and(|(min, max)| (min..=max).contains(&value))
        })
        .map(|kind| (kind, value))
        .ok_or_else(|| format!("integer literal {text} is out of range"))
}

pub fn parse_float_literal(text: &str) -> Result<(ScalarKind, f64), String> {
    let (body, kind) = match text.strip_suffix(['f', 'F']) {
        Some(body) => (body, ScalarKind::Float),
        None => (text.trim_end_matches(['d', 'D']), ScalarKind::Double),
    };
    body.parse::<f64>()
        .map(|value| (kind, value))
        .map_err(|_| format!("invalid floating point literal {text}"))
}
