use std::{cmp::Ordering, fmt, rc::Rc};

use crate::{
    ast::{BinaryOp, Block, UnaryOp},
    error::RuntimeError,
};

#[derive(Debug, Clone, PartialEq)]
pub enum Val {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    Function(Rc<Function>),
    Nil,
}

/// A user-defined function. It holds no reference to the scope it was
/// defined in: calls run on top of the caller's scopes.
#[derive(Debug, PartialEq)]
pub struct Function {
    pub name: String,
    pub params: Vec<String>,
    pub body: Block,
}

impl Val {
    pub fn type_name(&self) -> &'static str {
        match self {
            Val::Int(_) => "int",
            Val::Float(_) => "float",
            Val::Bool(_) => "bool",
            Val::Str(_) => "string",
            Val::Function(_) => "function",
            Val::Nil => "nil",
        }
    }

    fn as_float(&self) -> Option<f64> {
        match self {
            Val::Int(i) => Some(*i as f64),
            Val::Float(n) => Some(*n),
            _ => None,
        }
    }

    /// Script-level `==`: ints and floats compare numerically, functions by
    /// identity, anything else of different kinds is unequal.
    pub fn loose_eq(&self, other: &Val) -> bool {
        match (self, other) {
            (Val::Int(a), Val::Float(b)) | (Val::Float(b), Val::Int(a)) => *a as f64 == *b,
            (Val::Function(a), Val::Function(b)) => Rc::ptr_eq(a, b),
            _ => self == other,
        }
    }
}

impl fmt::Display for Val {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Val::Int(n) => write!(f, "{}", n),
            Val::Float(n) => write!(f, "{}", n),
            Val::Bool(b) => write!(f, "{}", b),
            Val::Str(s) => write!(f, "{}", s),
            Val::Function(func) => write!(f, "<function {}({})>", func.name, func.params.join(", ")),
            Val::Nil => write!(f, "nil"),
        }
    }
}

impl From<i64> for Val {
    fn from(n: i64) -> Self {
        Val::Int(n)
    }
}

impl From<f64> for Val {
    fn from(n: f64) -> Self {
        Val::Float(n)
    }
}

impl From<bool> for Val {
    fn from(b: bool) -> Self {
        Val::Bool(b)
    }
}

impl From<&str> for Val {
    fn from(s: &str) -> Self {
        Val::Str(s.to_string())
    }
}

impl From<String> for Val {
    fn from(s: String) -> Self {
        Val::Str(s)
    }
}

pub fn eval_unary(op: UnaryOp, val: Val) -> Result<Val, RuntimeError> {
    match (op, val) {
        (UnaryOp::Neg, Val::Int(i)) => i
            .checked_neg()
            .map(Val::Int)
            .ok_or(RuntimeError::Overflow { op: op.symbol() }),
        (UnaryOp::Neg, Val::Float(n)) => Ok(Val::Float(-n)),
        (UnaryOp::Not, Val::Bool(b)) => Ok(Val::Bool(!b)),
        (op, val) => Err(RuntimeError::InvalidOperand {
            op,
            operand: val.type_name(),
        }),
    }
}

pub fn eval_binary(op: BinaryOp, left: Val, right: Val) -> Result<Val, RuntimeError> {
    use BinaryOp::*;

    match (op, &left, &right) {
        (Eq, _, _) => Ok(Val::Bool(left.loose_eq(&right))),
        (Ne, _, _) => Ok(Val::Bool(!left.loose_eq(&right))),

        (Add | Sub | Mul | Div | Mod, Val::Int(a), Val::Int(b)) => int_arith(op, *a, *b),
        (Add | Sub | Mul | Div | Mod, _, _) => match (left.as_float(), right.as_float()) {
            (Some(a), Some(b)) => float_arith(op, a, b),
            _ => Err(mismatch(op, &left, &right)),
        },

        (Lt | Le | Gt | Ge, Val::Int(a), Val::Int(b)) => Ok(Val::Bool(ordered(op, a.cmp(b)))),
        (Lt | Le | Gt | Ge, Val::Str(a), Val::Str(b)) => Ok(Val::Bool(ordered(op, a.cmp(b)))),
        (Lt | Le | Gt | Ge, _, _) => match (left.as_float(), right.as_float()) {
            (Some(a), Some(b)) => match a.partial_cmp(&b) {
                Some(ord) => Ok(Val::Bool(ordered(op, ord))),
                None => Ok(Val::Bool(false)),
            },
            _ => Err(mismatch(op, &left, &right)),
        },

        (And, Val::Bool(a), Val::Bool(b)) => Ok(Val::Bool(*a && *b)),
        (Or, Val::Bool(a), Val::Bool(b)) => Ok(Val::Bool(*a || *b)),
        (And | Or, _, _) => Err(mismatch(op, &left, &right)),
    }
}

fn int_arith(op: BinaryOp, a: i64, b: i64) -> Result<Val, RuntimeError> {
    if matches!(op, BinaryOp::Div | BinaryOp::Mod) && b == 0 {
        return Err(RuntimeError::DivisionByZero);
    }

    let result = match op {
        BinaryOp::Add => a.checked_add(b),
        BinaryOp::Sub => a.checked_sub(b),
        BinaryOp::Mul => a.checked_mul(b),
        BinaryOp::Div => a.checked_div(b),
        _ => a.checked_rem(b),
    };
    result
        .map(Val::Int)
        .ok_or(RuntimeError::Overflow { op: op.symbol() })
}

fn float_arith(op: BinaryOp, a: f64, b: f64) -> Result<Val, RuntimeError> {
    if matches!(op, BinaryOp::Div | BinaryOp::Mod) && b == 0.0 {
        return Err(RuntimeError::DivisionByZero);
    }

    let result = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div => a / b,
        _ => a % b,
    };
    Ok(Val::Float(result))
}

fn ordered(op: BinaryOp, ord: Ordering) -> bool {
    match op {
        BinaryOp::Lt => ord.is_lt(),
        BinaryOp::Le => ord.is_le(),
        BinaryOp::Gt => ord.is_gt(),
        _ => ord.is_ge(),
    }
}

fn mismatch(op: BinaryOp, left: &Val, right: &Val) -> RuntimeError {
    RuntimeError::TypeMismatch {
        op,
        left: left.type_name(),
        right: right.type_name(),
    }
}
