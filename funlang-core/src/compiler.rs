//! Pipeline entry points: source text in, value or IR text out.

use std::io::{self, Write};

use crate::ast::Program;
use crate::codegen_llvm;
use crate::env::Env;
use crate::error::Diagnostic;
use crate::interpreter::{self, Interpreter};
use crate::lexer::tokenize;
use crate::parser::parse;
use crate::token::LangConfig;
use crate::value::Value;

fn front_end(file: &str, source: &str, config: &LangConfig) -> Result<Program, Diagnostic> {
    let tokens = tokenize(file, source, config)?;
    parse(file, &tokens)
}

/// Interpret a program, printing to stdout. The result is the value of
/// the last top-level statement.
pub fn interpret(file: &str, source: &str, config: &LangConfig) -> Result<Value, Diagnostic> {
    let mut stdout = io::stdout();
    interpret_with_output(file, source, config, &mut stdout)
}

/// Interpret a program with `print` output captured by `out`.
pub fn interpret_with_output(
    file: &str,
    source: &str,
    config: &LangConfig,
    out: &mut dyn Write,
) -> Result<Value, Diagnostic> {
    let program = front_end(file, source, config)?;
    let env = interpreter::global_env(config);
    Interpreter::new(file, config, out).run(&program, &env)
}

/// Lower a program to textual LLVM IR.
pub fn emit_llvm_ir(file: &str, source: &str, config: &LangConfig) -> Result<String, Diagnostic> {
    let program = front_end(file, source, config)?;
    codegen_llvm::emit(file, &program, config)
}

/// An interactive session: one global environment shared across
/// evaluations, used by the REPL.
pub struct Session {
    config: LangConfig,
    env: Env,
}

impl Session {
    pub fn new(config: LangConfig) -> Session {
        let env = interpreter::global_env(&config);
        Session { config, env }
    }

    /// Evaluate one chunk of input against the persistent environment.
    pub fn eval(
        &mut self,
        file: &str,
        source: &str,
        out: &mut dyn Write,
    ) -> Result<Value, Diagnostic> {
        let program = front_end(file, source, &self.config)?;
        Interpreter::new(file, &self.config, out).run(&program, &self.env)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(source: &str) -> Result<(String, String), Diagnostic> {
        let config = LangConfig::new();
        let mut out = Vec::new();
        let value = interpret_with_output("<test>", source, &config, &mut out)?;
        Ok((value.to_string(), String::from_utf8(out).unwrap_or_default()))
    }

    #[test]
    fn interpret_runs_the_whole_pipeline() {
        let (value, out) = run("print(21 / 3); 5 / 2").unwrap();
        assert_eq!(out, "7\n");
        assert_eq!(value, "2.5");
    }

    #[test]
    fn front_end_errors_surface_unchanged() {
        let err = run("var x = $").unwrap_err();
        assert_eq!(err.to_string(), "Illegal Character: $\nFile <test>, line 1, column 9");
    }

    #[test]
    fn emit_llvm_ir_produces_a_module() {
        let config = LangConfig::new();
        let text = emit_llvm_ir("<test>", "print(1 + 2)", &config).unwrap();
        assert!(text.contains("define i64 @main()"));
    }

    #[test]
    fn both_backends_reject_division_by_zero() {
        let config = LangConfig::new();
        let interp = run("1 / 0").unwrap_err();
        assert_eq!(interp.details, "Division by zero");
        let lowered = emit_llvm_ir("<test>", "print(1 / 0)", &config).unwrap_err();
        assert_eq!(lowered.details, "Division by zero");
    }

    #[test]
    fn sessions_keep_state_between_evaluations() {
        let mut session = Session::new(LangConfig::new());
        let mut out = Vec::new();
        session.eval("<stdin>", "var x = 40", &mut out).unwrap();
        let value = session.eval("<stdin>", "x + 2", &mut out).unwrap();
        assert_eq!(value.to_string(), "42");
    }

    #[test]
    fn respelled_keywords_flow_through_the_pipeline() {
        let mut config = LangConfig::new();
        config.respell_keyword("fun", "defn");
        config.respell_builtin("print", "say");
        let mut out = Vec::new();
        let value = interpret_with_output(
            "<test>",
            "defn double(x) { return x * 2 }; say(double(3)); double(4)",
            &config,
            &mut out,
        )
        .unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "6\n");
        assert_eq!(value.to_string(), "8");
    }
}
