use std::io;

use thiserror::Error;

use crate::{ast::BinaryOp, ast::UnaryOp, lexer::Position};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LexError {
    #[error("{pos}: unexpected character {ch:?}")]
    UnexpectedChar { ch: char, pos: Position },

    #[error("{pos}: unterminated string literal")]
    UnterminatedString { pos: Position },

    #[error("{pos}: unknown escape sequence `\\{ch}`")]
    InvalidEscape { ch: char, pos: Position },

    #[error("{pos}: integer literal `{text}` does not fit in 64 bits")]
    IntegerOverflow { text: String, pos: Position },

    #[error("{pos}: float literal `{text}` is out of range")]
    FloatOverflow { text: String, pos: Position },

    #[error("source is not valid UTF-8 (byte {offset})")]
    InvalidUtf8 { offset: usize },

    #[error("{pos}: {message}")]
    Malformed { message: String, pos: Position },
}

/// A token that does not fit the grammar at this point.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{pos}: expected {expected}, found {found}")]
pub struct SyntaxError {
    pub expected: String,
    pub found: String,
    pub pos: Position,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error(transparent)]
    Lex(#[from] LexError),

    #[error(transparent)]
    Syntax(#[from] SyntaxError),

    #[error("{pos}: nesting deeper than {limit} levels")]
    TooDeep { limit: usize, pos: Position },

    #[error("parser stopped after an earlier error")]
    Halted,
}

#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("undefined variable: {name}")]
    UnboundName { name: String },

    #[error("cannot apply `{op}` to {left} and {right}")]
    TypeMismatch {
        op: BinaryOp,
        left: &'static str,
        right: &'static str,
    },

    #[error("cannot apply `{op}` to {operand}")]
    InvalidOperand { op: UnaryOp, operand: &'static str },

    #[error("condition must be a bool, got {found}")]
    NonBoolCondition { found: &'static str },

    #[error("function {name} expects {expected} arguments, got {found}")]
    Arity {
        name: String,
        expected: usize,
        found: usize,
    },

    #[error("'{name}' is not a function")]
    NotCallable { name: String },

    #[error("division by zero")]
    DivisionByZero,

    #[error("integer overflow in `{op}`")]
    Overflow { op: &'static str },

    #[error("stack overflow: call depth exceeded {depth}")]
    StackOverflow { depth: usize },

    #[error("failed to write output: {0}")]
    Output(#[from] io::Error),
}

impl RuntimeError {
    /// Resource exhaustion rather than a mistake in the script itself.
    pub fn is_fatal(&self) -> bool {
        matches!(self, RuntimeError::StackOverflow { .. })
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("runtime error: {0}")]
    Runtime(#[from] RuntimeError),
}
