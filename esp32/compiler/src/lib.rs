//! DSL front half for the toy ESP32: AST model, code generation and a
//! session facade that ties the compiler to an `esp32_core::Machine`.

use thiserror::Error;

pub mod ast;
pub mod codegen;
pub mod session;

pub use ast::{parse_program, Expr, Program, Stmt};
pub use codegen::{
    compile, compile_json, CodeGenerator, CompileOutput, CompileReport, Diagnostic, Var,
};
pub use session::Emulator;

pub type Result<T> = std::result::Result<T, CompileError>;

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("no AST to compile")]
    MissingAst,
    #[error("parse failure: {0}")]
    ParseFailure(String),
    #[error(transparent)]
    Core(#[from] esp32_core::CoreError),
}
