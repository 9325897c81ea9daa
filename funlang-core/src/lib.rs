//! Core of the FunLang language toolchain.
//!
//! This crate provides the whole language pipeline:
//!
//!   source .fl
//!     -> lexer       (tokens, configurable keyword spellings)
//!     -> parser      (AST)
//!     -> interpreter (tree-walking evaluation)
//!      | codegen_llvm (textual LLVM IR for ahead-of-time builds)
//!
//! Higher-level tools (the CLI, embedders) should depend on this crate
//! rather than reimplementing the pipeline.

// ---------------------------------------------------------------------
// Error handling and diagnostics
// ---------------------------------------------------------------------

pub mod error;
pub mod span;

// ---------------------------------------------------------------------
// Front-end: lexing and parsing
// ---------------------------------------------------------------------

pub mod ast;
pub mod lexer;
pub mod parser;
pub mod token;

// ---------------------------------------------------------------------
// Interpreter: values, environments, builtins
// ---------------------------------------------------------------------

pub mod builtins;
pub mod env;
pub mod interpreter;
pub mod value;

// ---------------------------------------------------------------------
// Back-end: code generation and compiler orchestration
// ---------------------------------------------------------------------

pub mod codegen_llvm;
pub mod compiler;

// ---------------------------------------------------------------------
// Public API re-exports
// ---------------------------------------------------------------------

pub use compiler::{Session, emit_llvm_ir, interpret, interpret_with_output};
pub use error::{CoreError, Diagnostic, ErrorKind};
pub use token::LangConfig;
pub use value::Value;
