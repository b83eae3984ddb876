use crate::{
    ast::Block,
    error::{Error, ParseError},
    interpreter::{Interpreter, Val},
    parser::{Parser, parse},
};

pub mod ast;
pub mod config;
pub mod error;
pub mod interpreter;
pub mod lexer;
pub mod logging;
pub mod parser;
mod stack;

pub fn run(source: &str) -> Result<Val, Error> {
    let program = parse(source)?;
    let mut interpreter = Interpreter::new();
    Ok(interpreter.run(&program)?)
}

/// Reads statements one at a time until the input is exhausted, the way the
/// `parser` subcommand consumes a file.
pub fn read_statements(source: &[u8]) -> Result<Block, ParseError> {
    let mut parser = Parser::from_bytes(source)?;
    parser.consume("")?;

    let mut items = Vec::new();
    while let Some(item) = parser.read_statement()? {
        tracing::trace!("{} {}", item.typing(), item);
        items.push(item);
    }
    Ok(items)
}
