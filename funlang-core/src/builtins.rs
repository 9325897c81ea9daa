//! Builtin functions seeded into the global scope.
//!
//! Each builtin has a fixed internal identity; the surface spelling it
//! is reachable under comes from [`LangConfig`](crate::token::LangConfig).
//! The interpreter executes builtins directly; the compiler backend
//! lowers the subset it supports and rejects the rest.

use std::io::Write;

use crate::error::{Diagnostic, ErrorKind};
use crate::span::Span;
use crate::value::{Number, Value, ValueKind};

/// Internal identity of a builtin function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Builtin {
    Print,
    Clear,
    IsString,
    IsNumber,
    IsList,
    IsFun,
    Len,
    ToString,
    ToInt,
    ToFloat,
    ToList,
    Typeof,
}

impl Builtin {
    pub const ALL: &'static [Builtin] = &[
        Builtin::Print,
        Builtin::Clear,
        Builtin::IsString,
        Builtin::IsNumber,
        Builtin::IsList,
        Builtin::IsFun,
        Builtin::Len,
        Builtin::ToString,
        Builtin::ToInt,
        Builtin::ToFloat,
        Builtin::ToList,
        Builtin::Typeof,
    ];

    /// Canonical (default) spelling.
    pub fn name(self) -> &'static str {
        match self {
            Builtin::Print => "print",
            Builtin::Clear => "clear",
            Builtin::IsString => "is_string",
            Builtin::IsNumber => "is_number",
            Builtin::IsList => "is_list",
            Builtin::IsFun => "is_fun",
            Builtin::Len => "len",
            Builtin::ToString => "to_string",
            Builtin::ToInt => "to_int",
            Builtin::ToFloat => "to_float",
            Builtin::ToList => "to_list",
            Builtin::Typeof => "typeof",
        }
    }

    pub fn arity(self) -> usize {
        match self {
            Builtin::Clear => 0,
            _ => 1,
        }
    }
}

/// Execute `builtin` on already-evaluated arguments.
///
/// `out` receives anything the builtin prints. Arity has already been
/// checked by the caller.
pub fn call(
    builtin: Builtin,
    args: &[Value],
    span: Span,
    file: &str,
    out: &mut dyn Write,
) -> Result<Value, Diagnostic> {
    let runtime = |details: String| Diagnostic::new(ErrorKind::Runtime, details, span, file);
    let flag = |cond: bool| Value::int(if cond { 1 } else { 0 }, span);

    match builtin {
        Builtin::Print => {
            writeln!(out, "{}", args[0]).map_err(|e| runtime(e.to_string()))?;
            Ok(Value::int(0, span))
        }
        Builtin::Clear => {
            write!(out, "\x1b[2J\x1b[1;1H").map_err(|e| runtime(e.to_string()))?;
            Ok(Value::int(0, span))
        }
        Builtin::IsString => Ok(flag(matches!(args[0].kind, ValueKind::Str(_)))),
        Builtin::IsNumber => Ok(flag(matches!(args[0].kind, ValueKind::Number(_)))),
        Builtin::IsList => Ok(flag(matches!(args[0].kind, ValueKind::List(_)))),
        Builtin::IsFun => Ok(flag(matches!(
            args[0].kind,
            ValueKind::Function(_) | ValueKind::Builtin(_)
        ))),
        Builtin::Len => match &args[0].kind {
            ValueKind::List(items) => Ok(Value::int(items.len() as i64, span)),
            _ => Err(runtime("Argument must be list".to_string())),
        },
        Builtin::ToString => Ok(Value::new(ValueKind::Str(args[0].to_string()), span)),
        Builtin::ToInt => match &args[0].kind {
            ValueKind::Number(Number::Int(n)) => Ok(Value::int(*n, span)),
            ValueKind::Number(Number::Float(f)) => Ok(Value::int(*f as i64, span)),
            ValueKind::Str(s) => match s.trim().parse::<i64>() {
                Ok(n) => Ok(Value::int(n, span)),
                Err(_) => Err(runtime(format!("Cannot convert '{s}' to an integer"))),
            },
            _ => Err(runtime("Illegal operation".to_string())),
        },
        Builtin::ToFloat => match &args[0].kind {
            ValueKind::Number(Number::Int(n)) => Ok(Value::float(*n as f64, span)),
            ValueKind::Number(Number::Float(f)) => Ok(Value::float(*f, span)),
            ValueKind::Str(s) => match s.trim().parse::<f64>() {
                Ok(f) => Ok(Value::float(f, span)),
                Err(_) => Err(runtime(format!("Cannot convert '{s}' to a float"))),
            },
            _ => Err(runtime("Illegal operation".to_string())),
        },
        Builtin::ToList => match &args[0].kind {
            ValueKind::List(_) => Ok(args[0].clone()),
            ValueKind::Str(s) => {
                let items = s
                    .chars()
                    .map(|c| Value::new(ValueKind::Str(c.to_string()), span))
                    .collect();
                Ok(Value::new(ValueKind::List(items), span))
            }
            _ => Ok(Value::new(ValueKind::List(vec![args[0].clone()]), span)),
        },
        Builtin::Typeof => {
            let name = match &args[0].kind {
                ValueKind::Number(Number::Int(_)) => "int",
                ValueKind::Number(Number::Float(_)) => "float",
                ValueKind::Str(_) => "string",
                ValueKind::List(_) => "list",
                ValueKind::Function(_) | ValueKind::Builtin(_) => "function",
            };
            Ok(Value::new(ValueKind::Str(name.to_string()), span))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::span::Span;

    fn run(builtin: Builtin, arg: Value) -> Result<Value, Diagnostic> {
        let mut out = Vec::new();
        call(builtin, &[arg], Span::default(), "<test>", &mut out)
    }

    #[test]
    fn predicates_return_numeric_flags() {
        let s = Value::new(ValueKind::Str("hi".into()), Span::default());
        assert_eq!(run(Builtin::IsString, s.clone()).unwrap().to_string(), "1");
        assert_eq!(run(Builtin::IsNumber, s.clone()).unwrap().to_string(), "0");
        assert_eq!(run(Builtin::IsList, s).unwrap().to_string(), "0");
    }

    #[test]
    fn len_accepts_lists_only() {
        let list = Value::new(
            ValueKind::List(vec![Value::int(1, Span::default())]),
            Span::default(),
        );
        assert_eq!(run(Builtin::Len, list).unwrap().to_string(), "1");

        let s = Value::new(ValueKind::Str("abc".into()), Span::default());
        let err = run(Builtin::Len, s).unwrap_err();
        assert_eq!(err.details, "Argument must be list");

        let err = run(Builtin::Len, Value::int(7, Span::default())).unwrap_err();
        assert_eq!(err.details, "Argument must be list");
    }

    #[test]
    fn to_int_parses_and_truncates() {
        let s = Value::new(ValueKind::Str("12".into()), Span::default());
        assert_eq!(run(Builtin::ToInt, s).unwrap().to_string(), "12");

        let f = Value::float(3.9, Span::default());
        assert_eq!(run(Builtin::ToInt, f).unwrap().to_string(), "3");

        let bad = Value::new(ValueKind::Str("twelve".into()), Span::default());
        let err = run(Builtin::ToInt, bad).unwrap_err();
        assert_eq!(err.details, "Cannot convert 'twelve' to an integer");
    }

    #[test]
    fn to_list_explodes_strings_and_wraps_scalars() {
        let s = Value::new(ValueKind::Str("ab".into()), Span::default());
        assert_eq!(run(Builtin::ToList, s).unwrap().to_string(), "[a, b]");

        let n = Value::int(5, Span::default());
        assert_eq!(run(Builtin::ToList, n).unwrap().to_string(), "[5]");
    }

    #[test]
    fn typeof_names_every_kind() {
        assert_eq!(
            run(Builtin::Typeof, Value::int(1, Span::default()))
                .unwrap()
                .to_string(),
            "int"
        );
        assert_eq!(
            run(Builtin::Typeof, Value::float(1.0, Span::default()))
                .unwrap()
                .to_string(),
            "float"
        );
    }

    #[test]
    fn print_writes_value_and_newline() {
        let mut out = Vec::new();
        let v = Value::float(2.0, Span::default());
        call(Builtin::Print, &[v], Span::default(), "<test>", &mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "2.0\n");
    }
}
