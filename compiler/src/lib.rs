pub mod lexer;
pub mod ast;
pub mod error;
pub mod parser;
pub mod typing;
pub mod codegen;
pub mod interpreter;

use ast::Program;
use error::Diagnostic;


/// Lexes, parses and type checks `source`. Both backends take the result.
pub fn frontend(source: &str, file_name: Option<&str>) -> Result<Program, Diagnostic> {
    let tokens = lexer::lex(source);
    let program = parser::parse(&tokens, file_name)?;
    typing::check(program)
}
