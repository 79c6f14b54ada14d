pub mod ast;
mod codegen;
mod error;
mod frame;
mod heap;
mod instruction;
mod lexer;
mod parser;
mod value;
mod var_table;
mod vm;

pub use self::{
    codegen::*, error::*, frame::*, heap::*, instruction::*, lexer::*, parser::*, value::*,
    var_table::*, vm::*,
};

use anyhow::{Context, Result};

/// Lexes, parses and lowers a MyPL source file into frame templates.
pub fn compile(source: &str) -> Result<Vec<FrameTemplate>> {
    let program = parse_source(source).context("Parser error")?;
    generate(&program).context("Code generation error")
}
