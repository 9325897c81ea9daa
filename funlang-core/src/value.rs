//! Runtime values for the tree-walking interpreter.
//!
//! Values form a closed set of variants; operator behavior is
//! dispatched here as a method family, so the interpreter stays a
//! plain traversal. Operator methods return the unpositioned result
//! kind or an error details string; the interpreter attaches spans.

use core::fmt;
use std::rc::Rc;

use crate::ast::{BinOp, FunctionDef, UnaryOp};
use crate::builtins::Builtin;
use crate::env::Env;
use crate::span::Span;

/// A numeric magnitude. The int/float distinction is preserved, never
/// merged; print formatting and division depend on it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    pub fn as_f64(self) -> f64 {
        match self {
            Number::Int(n) => n as f64,
            Number::Float(f) => f,
        }
    }

    pub fn is_zero(self) -> bool {
        match self {
            Number::Int(n) => n == 0,
            Number::Float(f) => f == 0.0,
        }
    }
}

/// A user function together with its captured defining environment.
#[derive(Debug)]
pub struct FunctionValue {
    pub def: Rc<FunctionDef>,
    pub env: Env,
}

impl FunctionValue {
    /// Display name, `<anonymous>` when the literal had none.
    pub fn name(&self) -> &str {
        self.def.name.as_deref().unwrap_or("<anonymous>")
    }
}

#[derive(Debug, Clone)]
pub enum ValueKind {
    Number(Number),
    Str(String),
    List(Vec<Value>),
    Function(Rc<FunctionValue>),
    Builtin(Builtin),
}

/// A runtime value stamped with the span that produced it.
#[derive(Debug, Clone)]
pub struct Value {
    pub kind: ValueKind,
    pub span: Span,
}

impl Value {
    pub fn new(kind: ValueKind, span: Span) -> Value {
        Value { kind, span }
    }

    pub fn int(n: i64, span: Span) -> Value {
        Value::new(ValueKind::Number(Number::Int(n)), span)
    }

    pub fn float(f: f64, span: Span) -> Value {
        Value::new(ValueKind::Number(Number::Float(f)), span)
    }

    /// The `typeof` name of this value.
    pub fn type_name(&self) -> &'static str {
        match &self.kind {
            ValueKind::Number(Number::Int(_)) => "int",
            ValueKind::Number(Number::Float(_)) => "float",
            ValueKind::Str(_) => "string",
            ValueKind::List(_) => "list",
            ValueKind::Function(_) | ValueKind::Builtin(_) => "function",
        }
    }

    /// Truthiness: a Number is true iff non-zero; every other kind is
    /// false.
    pub fn is_truthy(&self) -> bool {
        match &self.kind {
            ValueKind::Number(n) => !n.is_zero(),
            _ => false,
        }
    }

    /// Apply a binary operator. Errors are details strings for a
    /// Runtime diagnostic.
    pub fn binary(&self, op: BinOp, rhs: &Value) -> Result<ValueKind, String> {
        use ValueKind::*;
        match (op, &self.kind, &rhs.kind) {
            (BinOp::Add, Number(a), Number(b)) => Ok(Number(add(*a, *b))),
            (BinOp::Add, Str(a), Str(b)) => Ok(Str(format!("{a}{b}"))),
            // List operators all build a fresh list.
            (BinOp::Add, List(items), _) => {
                let mut items = items.clone();
                items.push(rhs.clone());
                Ok(List(items))
            }
            (BinOp::Sub, Number(a), Number(b)) => Ok(Number(sub(*a, *b))),
            (BinOp::Sub, List(items), Number(idx)) => {
                let at = list_index(items.len(), *idx)?;
                let mut items = items.clone();
                items.remove(at);
                Ok(List(items))
            }
            (BinOp::Mul, Number(a), Number(b)) => Ok(Number(mul(*a, *b))),
            // string * int repeats; a negative count empties.
            (BinOp::Mul, Str(s), Number(self::Number::Int(n))) => {
                Ok(Str(s.repeat((*n).max(0) as usize)))
            }
            (BinOp::Mul, List(a), List(b)) => {
                let mut items = a.clone();
                items.extend(b.iter().cloned());
                Ok(List(items))
            }
            (BinOp::Div, Number(a), Number(b)) => div(*a, *b).map(Number),
            (BinOp::Div, List(items), Number(idx)) => {
                let at = list_index(items.len(), *idx)?;
                Ok(items[at].kind.clone())
            }
            (BinOp::Pow, Number(a), Number(b)) => Ok(Number(pow(*a, *b))),

            (BinOp::Eq, _, _) => Ok(flag(self.equals(rhs))),
            (BinOp::Ne, _, _) => Ok(flag(!self.equals(rhs))),
            (BinOp::Lt, Number(a), Number(b)) => Ok(flag(a.as_f64() < b.as_f64())),
            (BinOp::Gt, Number(a), Number(b)) => Ok(flag(a.as_f64() > b.as_f64())),
            (BinOp::Le, Number(a), Number(b)) => Ok(flag(a.as_f64() <= b.as_f64())),
            (BinOp::Ge, Number(a), Number(b)) => Ok(flag(a.as_f64() >= b.as_f64())),

            (BinOp::And, _, _) => Ok(flag(self.is_truthy() && rhs.is_truthy())),
            (BinOp::Or, _, _) => Ok(flag(self.is_truthy() || rhs.is_truthy())),

            _ => Err("Illegal operation".to_string()),
        }
    }

    /// Apply a unary operator.
    pub fn unary(&self, op: UnaryOp) -> Result<ValueKind, String> {
        match (op, &self.kind) {
            (UnaryOp::Pos, ValueKind::Number(n)) => Ok(ValueKind::Number(*n)),
            (UnaryOp::Neg, ValueKind::Number(Number::Int(n))) => {
                Ok(ValueKind::Number(Number::Int(-n)))
            }
            (UnaryOp::Neg, ValueKind::Number(Number::Float(f))) => {
                Ok(ValueKind::Number(Number::Float(-f)))
            }
            (UnaryOp::Not, _) => Ok(flag(!self.is_truthy())),
            _ => Err("Illegal operation".to_string()),
        }
    }

    /// Structural equality: numbers compare numerically across
    /// int/float, lists element-wise, functions by identity.
    pub fn equals(&self, other: &Value) -> bool {
        match (&self.kind, &other.kind) {
            (ValueKind::Number(a), ValueKind::Number(b)) => a.as_f64() == b.as_f64(),
            (ValueKind::Str(a), ValueKind::Str(b)) => a == b,
            (ValueKind::List(a), ValueKind::List(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.equals(y))
            }
            (ValueKind::Function(a), ValueKind::Function(b)) => Rc::ptr_eq(a, b),
            (ValueKind::Builtin(a), ValueKind::Builtin(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ValueKind::Number(Number::Int(n)) => write!(f, "{n}"),
            ValueKind::Number(Number::Float(x)) => {
                // Integral floats keep their trailing `.0`.
                if x.is_finite() && x.fract() == 0.0 {
                    write!(f, "{x:.1}")
                } else {
                    write!(f, "{x}")
                }
            }
            ValueKind::Str(s) => f.write_str(s),
            ValueKind::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            ValueKind::Function(fun) => write!(f, "<function {}>", fun.name()),
            ValueKind::Builtin(builtin) => write!(f, "<function {}>", builtin.name()),
        }
    }
}

fn flag(cond: bool) -> ValueKind {
    ValueKind::Number(Number::Int(if cond { 1 } else { 0 }))
}

fn add(a: Number, b: Number) -> Number {
    match (a, b) {
        (Number::Int(a), Number::Int(b)) => Number::Int(a.wrapping_add(b)),
        _ => Number::Float(a.as_f64() + b.as_f64()),
    }
}

fn sub(a: Number, b: Number) -> Number {
    match (a, b) {
        (Number::Int(a), Number::Int(b)) => Number::Int(a.wrapping_sub(b)),
        _ => Number::Float(a.as_f64() - b.as_f64()),
    }
}

fn mul(a: Number, b: Number) -> Number {
    match (a, b) {
        (Number::Int(a), Number::Int(b)) => Number::Int(a.wrapping_mul(b)),
        _ => Number::Float(a.as_f64() * b.as_f64()),
    }
}

/// `/` is exact division: two ints stay an int only when the division
/// has no remainder.
fn div(a: Number, b: Number) -> Result<Number, String> {
    if b.is_zero() {
        return Err("Division by zero".to_string());
    }
    match (a, b) {
        (Number::Int(a), Number::Int(b)) if a % b == 0 => Ok(Number::Int(a / b)),
        _ => Ok(Number::Float(a.as_f64() / b.as_f64())),
    }
}

/// `^` stays an int for int bases with non-negative int exponents,
/// falling back to float on overflow or a negative exponent.
fn pow(a: Number, b: Number) -> Number {
    if let (Number::Int(base), Number::Int(exp)) = (a, b) {
        if let Ok(exp) = u32::try_from(exp) {
            if let Some(result) = base.checked_pow(exp) {
                return Number::Int(result);
            }
        }
    }
    Number::Float(a.as_f64().powf(b.as_f64()))
}

/// Resolve a list index Number, counting negatives from the back.
fn list_index(len: usize, idx: Number) -> Result<usize, String> {
    let Number::Int(idx) = idx else {
        return Err("Out of bounds".to_string());
    };
    let resolved = if idx < 0 { idx + len as i64 } else { idx };
    if resolved >= 0 && (resolved as usize) < len {
        Ok(resolved as usize)
    } else {
        Err("Out of bounds".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int(n: i64) -> Value {
        Value::int(n, Span::default())
    }

    fn float(f: f64) -> Value {
        Value::float(f, Span::default())
    }

    fn list(items: Vec<Value>) -> Value {
        Value::new(ValueKind::List(items), Span::default())
    }

    fn apply(lhs: &Value, op: BinOp, rhs: &Value) -> Value {
        Value::new(lhs.binary(op, rhs).expect("binary op"), Span::default())
    }

    #[test]
    fn division_is_exact() {
        assert_eq!(apply(&int(21), BinOp::Div, &int(3)).to_string(), "7");
        assert_eq!(apply(&int(5), BinOp::Div, &int(2)).to_string(), "2.5");
        assert_eq!(apply(&float(1.0), BinOp::Div, &int(2)).to_string(), "0.5");
    }

    #[test]
    fn division_by_zero_fails_for_both_number_kinds() {
        assert_eq!(
            int(1).binary(BinOp::Div, &int(0)).unwrap_err(),
            "Division by zero"
        );
        assert_eq!(
            float(1.0).binary(BinOp::Div, &float(0.0)).unwrap_err(),
            "Division by zero"
        );
    }

    #[test]
    fn pow_keeps_ints_when_it_can() {
        assert_eq!(apply(&int(2), BinOp::Pow, &int(10)).to_string(), "1024");
        assert_eq!(apply(&int(2), BinOp::Pow, &int(-1)).to_string(), "0.5");
    }

    #[test]
    fn mixed_arithmetic_promotes_to_float() {
        assert_eq!(apply(&int(1), BinOp::Add, &float(2.0)).to_string(), "3.0");
    }

    #[test]
    fn list_operators_never_mutate_the_receiver() {
        let a = list(vec![int(1), int(2)]);
        let appended = apply(&a, BinOp::Add, &int(3));
        assert_eq!(appended.to_string(), "[1, 2, 3]");
        assert_eq!(a.to_string(), "[1, 2]");

        let shrunk = apply(&a, BinOp::Sub, &int(0));
        assert_eq!(shrunk.to_string(), "[2]");
        assert_eq!(a.to_string(), "[1, 2]");
    }

    #[test]
    fn list_access_supports_negative_indices() {
        let a = list(vec![int(1), int(2), int(3)]);
        assert_eq!(apply(&a, BinOp::Div, &int(-1)).to_string(), "3");
        assert_eq!(
            a.binary(BinOp::Div, &int(3)).unwrap_err(),
            "Out of bounds"
        );
        assert_eq!(
            a.binary(BinOp::Div, &float(0.5)).unwrap_err(),
            "Out of bounds"
        );
    }

    #[test]
    fn logic_operators_return_flags() {
        assert_eq!(apply(&int(2), BinOp::And, &int(3)).to_string(), "1");
        assert_eq!(apply(&int(0), BinOp::Or, &int(0)).to_string(), "0");
        let v = Value::new(
            int(1).unary(UnaryOp::Not).expect("not"),
            Span::default(),
        );
        assert_eq!(v.to_string(), "0");
    }

    #[test]
    fn equality_spans_number_kinds() {
        assert_eq!(apply(&int(1), BinOp::Eq, &float(1.0)).to_string(), "1");
        let s = Value::new(ValueKind::Str("hi".into()), Span::default());
        assert_eq!(apply(&s, BinOp::Eq, &int(1)).to_string(), "0");
    }

    #[test]
    fn strings_concatenate_and_repeat() {
        let a = Value::new(ValueKind::Str("ab".into()), Span::default());
        let b = Value::new(ValueKind::Str("cd".into()), Span::default());
        assert_eq!(apply(&a, BinOp::Add, &b).to_string(), "abcd");
        assert_eq!(apply(&a, BinOp::Mul, &int(3)).to_string(), "ababab");
        assert_eq!(apply(&a, BinOp::Mul, &int(-1)).to_string(), "");
        assert_eq!(
            a.binary(BinOp::Mul, &float(2.0)).unwrap_err(),
            "Illegal operation"
        );
    }

    #[test]
    fn float_display_keeps_a_trailing_zero() {
        assert_eq!(float(7.0).to_string(), "7.0");
        assert_eq!(float(2.5).to_string(), "2.5");
    }
}
