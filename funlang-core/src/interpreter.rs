//! Tree-walking evaluator.
//!
//! Control flow (`return`, `break`, `continue`) travels as an explicit
//! [`Flow`] state next to the error channel, never as an exception.
//! Every statement-sequence evaluator checks the pending state after
//! each statement; loops intercept break/continue and re-propagate
//! everything else.

use std::io::Write;
use std::rc::Rc;

use crate::ast::{Expr, ExprKind, Program, Stmt, TypeName};
use crate::builtins;
use crate::env::Env;
use crate::error::{Diagnostic, ErrorKind, TraceFrame};
use crate::span::Span;
use crate::token::LangConfig;
use crate::value::{FunctionValue, Number, Value, ValueKind};

/// Result state of evaluating one node.
pub enum Flow {
    Value(Value),
    Return(Value),
    Break(Span),
    Continue(Span),
}

/// Unwrap a plain value out of a `Flow`, re-propagating signals.
macro_rules! value {
    ($flow:expr) => {
        match $flow? {
            Flow::Value(v) => v,
            other => return Ok(other),
        }
    };
}

/// The global scope: every builtin under its configured spelling, plus
/// `null`, `false` and `true`.
pub fn global_env(config: &LangConfig) -> Env {
    let env = Env::global();
    for (spelling, builtin) in config.builtins() {
        env.declare(
            spelling,
            Value::new(ValueKind::Builtin(builtin), Span::default()),
        );
    }
    env.declare("null", Value::int(0, Span::default()));
    env.declare("false", Value::int(0, Span::default()));
    env.declare("true", Value::int(1, Span::default()));
    env
}

struct Frame {
    name: String,
    /// Line of the call this frame currently has in flight; the
    /// innermost frame renders the error line instead.
    line: u32,
}

pub struct Interpreter<'a> {
    file: &'a str,
    config: &'a LangConfig,
    out: &'a mut dyn Write,
    frames: Vec<Frame>,
}

impl<'a> Interpreter<'a> {
    pub fn new(file: &'a str, config: &'a LangConfig, out: &'a mut dyn Write) -> Interpreter<'a> {
        Interpreter {
            file,
            config,
            out,
            frames: vec![Frame {
                name: "<program>".to_string(),
                line: 0,
            }],
        }
    }

    /// Evaluate a whole program. The result is the value of the last
    /// top-level statement, or null for an empty program; a top-level
    /// `return` yields its value.
    pub fn run(&mut self, program: &Program, env: &Env) -> Result<Value, Diagnostic> {
        match self.exec_block(&program.body, env)? {
            Flow::Value(v) | Flow::Return(v) => Ok(v),
            Flow::Break(span) | Flow::Continue(span) => Ok(Value::int(0, span)),
        }
    }

    fn exec_block(&mut self, body: &[Stmt], env: &Env) -> Result<Flow, Diagnostic> {
        let mut last = Value::int(0, Span::default());
        for stmt in body {
            match stmt {
                Stmt::Expr(expr) => last = value!(self.eval(expr, env)),
                Stmt::Return { value, span } => {
                    let result = match value {
                        Some(expr) => value!(self.eval(expr, env)),
                        None => Value::int(0, *span),
                    };
                    return Ok(Flow::Return(result));
                }
                Stmt::Break { span } => return Ok(Flow::Break(*span)),
                Stmt::Continue { span } => return Ok(Flow::Continue(*span)),
            }
        }
        Ok(Flow::Value(last))
    }

    fn eval(&mut self, expr: &Expr, env: &Env) -> Result<Flow, Diagnostic> {
        let span = expr.span;
        match &expr.kind {
            ExprKind::Int(n) => Ok(Flow::Value(Value::int(*n, span))),
            ExprKind::Float(f) => Ok(Flow::Value(Value::float(*f, span))),
            ExprKind::Str(s) => Ok(Flow::Value(Value::new(ValueKind::Str(s.clone()), span))),
            ExprKind::Ident(name) => match env.get(name) {
                Some(mut value) => {
                    value.span = span;
                    Ok(Flow::Value(value))
                }
                None => Err(self.runtime_error(format!("Variable '{name}' not defined"), span)),
            },
            ExprKind::List(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(value!(self.eval(item, env)));
                }
                Ok(Flow::Value(Value::new(ValueKind::List(values), span)))
            }
            ExprKind::VarDecl {
                declared,
                name,
                value,
            } => {
                let value = value!(self.eval(value, env));
                if let Some(expected) = declared {
                    // Declared var types check the initializer exactly.
                    if value.type_name() != expected.to_string() {
                        return Err(self.runtime_error(
                            format!(
                                "Type mismatch: expected {expected}, got {}",
                                value.type_name()
                            ),
                            span,
                        ));
                    }
                }
                env.declare(name.clone(), value.clone());
                Ok(Flow::Value(value))
            }
            ExprKind::Assign { name, value } => {
                let value = value!(self.eval(value, env));
                if !env.assign(name, value.clone()) {
                    return Err(
                        self.runtime_error(format!("Variable '{name}' not defined"), span)
                    );
                }
                Ok(Flow::Value(value))
            }
            ExprKind::Unary { op, operand } => {
                let operand = value!(self.eval(operand, env));
                let kind = operand
                    .unary(*op)
                    .map_err(|details| self.runtime_error(details, span))?;
                Ok(Flow::Value(Value::new(kind, span)))
            }
            ExprKind::Binary { op, lhs, rhs } => {
                let lhs = value!(self.eval(lhs, env));
                let rhs = value!(self.eval(rhs, env));
                let kind = lhs
                    .binary(*op, &rhs)
                    .map_err(|details| self.runtime_error(details, span))?;
                Ok(Flow::Value(Value::new(kind, span)))
            }
            ExprKind::Call { callee, args } => {
                let callee = value!(self.eval(callee, env));
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(value!(self.eval(arg, env)));
                }
                self.call(&callee, values, span).map(Flow::Value)
            }
            ExprKind::If { cases, else_body } => {
                for (cond, body) in cases {
                    if value!(self.eval(cond, env)).is_truthy() {
                        return self.exec_block(body, env);
                    }
                }
                match else_body {
                    Some(body) => self.exec_block(body, env),
                    None => Ok(Flow::Value(Value::int(0, span))),
                }
            }
            ExprKind::While { cond, body } => {
                loop {
                    if !value!(self.eval(cond, env)).is_truthy() {
                        break;
                    }
                    match self.exec_block(body, env)? {
                        Flow::Break(_) => break,
                        Flow::Continue(_) | Flow::Value(_) => {}
                        ret @ Flow::Return(_) => return Ok(ret),
                    }
                }
                Ok(Flow::Value(Value::int(0, span)))
            }
            ExprKind::For {
                var,
                start,
                end,
                step,
                body,
            } => {
                let start = value!(self.eval(start, env));
                let end = value!(self.eval(end, env));
                let step = match step {
                    Some(expr) => value!(self.eval(expr, env)),
                    None => Value::int(1, span),
                };
                let end = self.expect_number(&end)?;
                let step = self.expect_number(&step)?;
                let mut current = start.clone();
                self.expect_number(&start)?;

                loop {
                    let i = self.expect_number(&current)?;
                    let more = if step.as_f64() >= 0.0 {
                        i.as_f64() < end.as_f64()
                    } else {
                        i.as_f64() > end.as_f64()
                    };
                    if !more {
                        break;
                    }

                    env.declare(var.clone(), current.clone());
                    match self.exec_block(body, env)? {
                        Flow::Break(_) => break,
                        Flow::Continue(_) | Flow::Value(_) => {}
                        ret @ Flow::Return(_) => return Ok(ret),
                    }

                    let next = current
                        .binary(crate::ast::BinOp::Add, &Value::new(ValueKind::Number(step), span))
                        .map_err(|details| self.runtime_error(details, span))?;
                    current = Value::new(next, span);
                }
                Ok(Flow::Value(Value::int(0, span)))
            }
            ExprKind::Function(def) => {
                let value = Value::new(
                    ValueKind::Function(Rc::new(FunctionValue {
                        def: def.clone(),
                        env: env.clone(),
                    })),
                    span,
                );
                if let Some(name) = &def.name {
                    env.declare(name.clone(), value.clone());
                }
                Ok(Flow::Value(value))
            }
        }
    }

    /// Apply a callable to already-evaluated arguments.
    fn call(&mut self, callee: &Value, args: Vec<Value>, span: Span) -> Result<Value, Diagnostic> {
        match &callee.kind {
            ValueKind::Function(fun) => {
                self.check_arity(fun.name(), fun.def.params.len(), args.len(), span)?;

                // One fresh scope per call, parented at the captured
                // defining environment.
                let call_env = fun.env.child();
                for (param, arg) in fun.def.params.iter().zip(args) {
                    call_env.declare(param.name.clone(), arg);
                }

                self.push_frame(fun.name(), span);
                let flow = self.exec_block(&fun.def.body, &call_env);
                self.frames.pop();

                let result = match flow? {
                    Flow::Return(v) => v,
                    // A body that falls off the end yields null.
                    Flow::Value(_) | Flow::Break(_) | Flow::Continue(_) => Value::int(0, span),
                };
                self.check_return_type(fun, result, span)
            }
            ValueKind::Builtin(builtin) => {
                let spelling = self.config.builtin_spelling(*builtin).to_string();
                self.check_arity(&spelling, builtin.arity(), args.len(), span)?;

                self.push_frame(&spelling, span);
                let result = builtins::call(*builtin, &args, span, self.file, self.out);
                self.frames.pop();

                result.map_err(|err| {
                    if err.kind == ErrorKind::Runtime && err.trace.is_empty() {
                        self.attach_trace(err, span)
                    } else {
                        err
                    }
                })
            }
            _ => Err(self.runtime_error("Illegal operation", span)),
        }
    }

    fn check_arity(
        &self,
        name: &str,
        expected: usize,
        got: usize,
        span: Span,
    ) -> Result<(), Diagnostic> {
        if got > expected {
            return Err(self.runtime_error(
                format!("{} too many args passed into '{name}'", got - expected),
                span,
            ));
        }
        if got < expected {
            return Err(self.runtime_error(
                format!("{} too few args passed into '{name}'", expected - got),
                span,
            ));
        }
        Ok(())
    }

    /// Declared return types accept the identical type, with int/float
    /// converting to the declared kind.
    fn check_return_type(
        &self,
        fun: &FunctionValue,
        result: Value,
        span: Span,
    ) -> Result<Value, Diagnostic> {
        let Some(expected) = fun.def.return_type else {
            return Ok(result);
        };
        match (expected, &result.kind) {
            (TypeName::Int, ValueKind::Number(n)) => {
                let n = match n {
                    Number::Int(n) => *n,
                    Number::Float(f) => *f as i64,
                };
                Ok(Value::int(n, result.span))
            }
            (TypeName::Float, ValueKind::Number(n)) => Ok(Value::float(n.as_f64(), result.span)),
            (TypeName::String, ValueKind::Str(_)) | (TypeName::List, ValueKind::List(_)) => {
                Ok(result)
            }
            _ => Err(self.runtime_error(
                format!(
                    "Type mismatch: function declared to return '{expected}' but trying to return '{}'",
                    result.type_name()
                ),
                span,
            )),
        }
    }

    fn expect_number(&self, value: &Value) -> Result<Number, Diagnostic> {
        match &value.kind {
            ValueKind::Number(n) => Ok(*n),
            _ => Err(self.runtime_error("Illegal operation", value.span)),
        }
    }

    fn push_frame(&mut self, name: &str, call_span: Span) {
        if let Some(caller) = self.frames.last_mut() {
            caller.line = call_span.start.line;
        }
        self.frames.push(Frame {
            name: name.to_string(),
            line: call_span.start.line,
        });
    }

    fn runtime_error(&self, details: impl Into<String>, span: Span) -> Diagnostic {
        self.attach_trace(
            Diagnostic::new(ErrorKind::Runtime, details, span, self.file),
            span,
        )
    }

    fn attach_trace(&self, diag: Diagnostic, span: Span) -> Diagnostic {
        let last = self.frames.len() - 1;
        let trace = self
            .frames
            .iter()
            .enumerate()
            .map(|(i, frame)| TraceFrame {
                name: frame.name.clone(),
                line: if i == last { span.start.line } else { frame.line },
            })
            .collect();
        diag.with_trace(trace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;
    use crate::parser::parse;

    fn run_capture(source: &str) -> Result<(Value, String), Diagnostic> {
        let config = LangConfig::new();
        let tokens = tokenize("<test>", source, &config)?;
        let program = parse("<test>", &tokens)?;
        let env = global_env(&config);
        let mut out = Vec::new();
        let mut interp = Interpreter::new("<test>", &config, &mut out);
        let value = interp.run(&program, &env)?;
        Ok((value, String::from_utf8(out).unwrap_or_default()))
    }

    fn run(source: &str) -> String {
        let (value, _) = run_capture(source).expect("program should evaluate");
        value.to_string()
    }

    fn run_err(source: &str) -> Diagnostic {
        run_capture(source).expect_err("program should fail")
    }

    #[test]
    fn exact_division() {
        assert_eq!(run("21 / 3"), "7");
        assert_eq!(run("5 / 2"), "2.5");
    }

    #[test]
    fn division_by_zero_is_a_runtime_error() {
        assert_eq!(run_err("1 / 0").details, "Division by zero");
        assert_eq!(run_err("1.0 / 0.0").details, "Division by zero");
    }

    #[test]
    fn if_bodies_share_the_enclosing_scope() {
        assert_eq!(run("var x = 5; if true { var x = 10; }; x"), "10");
    }

    #[test]
    fn closures_capture_their_defining_environment() {
        let source = "
            fun make_adder(n) { return fun(x) { return x + n; }; }
            var f = make_adder(4)
            f(4)
        ";
        assert_eq!(run(source), "8");
    }

    #[test]
    fn while_break_stops_the_loop() {
        let source =
            "var j = 0; var i = 0; while i != 6 { if i == 3 { break; }; j = i; i = i + 1 }; j";
        assert_eq!(run(source), "2");
    }

    #[test]
    fn while_continue_skips_to_the_next_iteration() {
        let source = "var j = 0; var i = 0; \
                      while i != 6 { i = i + 1; if i == 3 { continue; }; j = i }; j";
        assert_eq!(run(source), "6");
    }

    #[test]
    fn list_reads_have_value_semantics() {
        let source = "var a = [1, 2]; var b = a + 3; a";
        assert_eq!(run(source), "[1, 2]");
        let source = "var a = [1, 2]; var b = a + 3; b";
        assert_eq!(run(source), "[1, 2, 3]");
    }

    #[test]
    fn list_access_and_remove() {
        assert_eq!(run("[10, 20, 30] / 1"), "20");
        assert_eq!(run("[10, 20, 30] - 0"), "[20, 30]");
        assert_eq!(run("[10, 20, 30] / -1"), "30");
        assert_eq!(run_err("[1] / 5").details, "Out of bounds");
    }

    #[test]
    fn for_loops_count_with_an_optional_step() {
        assert_eq!(run("var s = 0; for i = 0, 5 { s = s + i }; s"), "10");
        assert_eq!(run("var s = 0; for i = 0, 6, 2 { s = s + i }; s"), "6");
        assert_eq!(run("var s = 0; for i = 5, 0, -1 { s = s + i }; s"), "15");
    }

    #[test]
    fn undefined_variables_are_reported_by_name() {
        assert_eq!(run_err("missing + 1").details, "Variable 'missing' not defined");
        assert_eq!(run_err("missing = 3").details, "Variable 'missing' not defined");
    }

    #[test]
    fn arity_errors_count_the_difference() {
        let source = "fun f(a, b) { return a }; f(1, 2, 3, 4)";
        assert_eq!(run_err(source).details, "2 too many args passed into 'f'");
        let source = "fun f(a, b) { return a }; f(1)";
        assert_eq!(run_err(source).details, "1 too few args passed into 'f'");
    }

    #[test]
    fn declared_return_types_are_enforced() {
        let source = "fun int f() { return [1] }; f()";
        assert_eq!(
            run_err(source).details,
            "Type mismatch: function declared to return 'int' but trying to return 'list'"
        );
        // int and float convert to the declared kind.
        assert_eq!(run("fun int f() { return 2.9 }; f()"), "2");
        assert_eq!(run("fun float f() { return 2 }; f()"), "2.0");
    }

    #[test]
    fn declared_var_types_check_the_initializer_exactly() {
        assert_eq!(
            run_err("var int x = 1.5").details,
            "Type mismatch: expected int, got float"
        );
        assert_eq!(run("var float x = 1.5; x"), "1.5");
    }

    #[test]
    fn logic_and_not_produce_flags() {
        assert_eq!(run("1 and 2"), "1");
        assert_eq!(run("0 or 0"), "0");
        assert_eq!(run("not 0"), "1");
        assert_eq!(run("not [1]"), "1");
    }

    #[test]
    fn print_writes_to_the_injected_sink() {
        let (_, out) = run_capture("print(5 / 2); print(\"hi\"); print([1, 2])").unwrap();
        assert_eq!(out, "2.5\nhi\n[1, 2]\n");
    }

    #[test]
    fn program_result_is_the_last_statement() {
        assert_eq!(run("1; 2; 3"), "3");
        assert_eq!(run(""), "0");
        assert_eq!(run("return 9; 1"), "9");
    }

    #[test]
    fn runtime_errors_carry_a_traceback() {
        let source = "fun f() {\n  return 1 / 0\n}\nf()";
        let err = run_err(source);
        assert_eq!(err.details, "Division by zero");
        assert_eq!(err.trace.len(), 2);
        assert_eq!(err.trace[0].name, "<program>");
        assert_eq!(err.trace[0].line, 3);
        assert_eq!(err.trace[1].name, "f");
        assert_eq!(err.trace[1].line, 1);
    }

    #[test]
    fn recursion_works() {
        let source = "fun fact(n) { if n == 0 { return 1 }; return n * fact(n - 1) }; fact(5)";
        assert_eq!(run(source), "120");
    }

    #[test]
    fn builtins_resolve_as_globals() {
        assert_eq!(run("typeof(1)"), "int");
        assert_eq!(run("typeof(1.0)"), "float");
        assert_eq!(run("len([1, 2, 3])"), "3");
        assert_eq!(run("is_fun(print)"), "1");
        assert_eq!(run("to_int(\"12\") + 1"), "13");
    }

    #[test]
    fn anonymous_functions_are_first_class() {
        assert_eq!(run("var f = fun (x) { return x * 2 }; f(21)"), "42");
    }
}
