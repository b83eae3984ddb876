use std::{
    collections::HashMap,
    io::{self, Write},
    rc::Rc,
};

use tracing::{debug, trace};

use crate::{
    ast::{BinaryOp, Block, Expr, Program, Stmt},
    config::InterpreterConfig,
    error::RuntimeError,
    stack::ensure_sufficient_stack,
};

mod builtins;
mod environment;
mod value;

pub use builtins::Builtin;
pub use environment::{Environment, Scope};
pub use value::{Function, Val};

/// Outcome of executing a statement. `Return` unwinds through enclosing
/// blocks until a function call (or the end of the program) unwraps it.
#[derive(Debug, PartialEq)]
enum Flow {
    Continue(Val),
    Return(Val),
}

pub struct Interpreter {
    env: Environment,
    builtins: HashMap<&'static str, Builtin>,
    out: Box<dyn Write>,
    config: InterpreterConfig,
    depth: usize,
}

/// Pops the scope it was created for when dropped, on every exit path.
struct ScopeGuard<'a> {
    interp: &'a mut Interpreter,
}

impl Drop for ScopeGuard<'_> {
    fn drop(&mut self) {
        self.interp.env.pop();
    }
}

impl Interpreter {
    pub fn new() -> Interpreter {
        Interpreter::with_scope(Scope::new())
    }

    /// Creates an interpreter whose global scope starts out as `globals`.
    pub fn with_scope(globals: Scope) -> Interpreter {
        Interpreter {
            env: Environment::new(globals),
            builtins: builtins::builtins(),
            out: Box::new(io::stdout()),
            config: InterpreterConfig::default(),
            depth: 0,
        }
    }

    pub fn with_config(mut self, config: InterpreterConfig) -> Interpreter {
        self.config = config;
        self
    }

    /// Redirects what `echo` and `echoln` print.
    pub fn with_output(mut self, out: impl Write + 'static) -> Interpreter {
        self.out = Box::new(out);
        self
    }

    /// Runs every statement of `program` against the current scopes.
    ///
    /// The result is the value of the first top-level `return`, or else the
    /// value of the last statement executed.
    pub fn run(&mut self, program: &Program) -> Result<Val, RuntimeError> {
        debug!(statements = program.statements.len(), "run");
        match self.exec_block(&program.statements)? {
            Flow::Continue(v) | Flow::Return(v) => Ok(v),
        }
    }

    pub fn assign(&mut self, name: &str, val: Val) {
        self.env.assign(name, val);
    }

    pub fn lookup(&self, name: &str) -> Result<Val, RuntimeError> {
        self.env
            .get(name)
            .cloned()
            .ok_or_else(|| RuntimeError::UnboundName {
                name: name.to_string(),
            })
    }

    pub fn lookup_default(&self, name: &str, fallback: Val) -> Val {
        self.env.get(name).cloned().unwrap_or(fallback)
    }

    pub fn push_scope(&mut self, scope: Scope) {
        self.env.push(scope);
    }

    /// Pops the innermost scope. The global scope stays, yielding `None`.
    pub fn pop_scope(&mut self) -> Option<Scope> {
        self.env.pop()
    }

    /// Runs `f` with `scope` pushed; the scope is popped again however `f`
    /// finishes.
    pub fn scoped<T>(&mut self, scope: Scope, f: impl FnOnce(&mut Interpreter) -> T) -> T {
        self.env.push(scope);
        let mut guard = ScopeGuard { interp: self };
        f(&mut *guard.interp)
    }

    pub fn env(&self) -> &Environment {
        &self.env
    }

    fn exec_block(&mut self, block: &[Stmt]) -> Result<Flow, RuntimeError> {
        let mut res = Val::Nil;
        for stmt in block {
            match self.exec_stmt(stmt)? {
                Flow::Continue(v) => res = v,
                Flow::Return(v) => return Ok(Flow::Return(v)),
            }
        }
        Ok(Flow::Continue(res))
    }

    fn exec_stmt(&mut self, stmt: &Stmt) -> Result<Flow, RuntimeError> {
        trace!(kind = stmt.typing(), "exec");
        ensure_sufficient_stack(|| match stmt {
            Stmt::Function { name, params, body } => {
                let func = Function {
                    name: name.clone(),
                    params: params.clone(),
                    body: body.clone(),
                };
                self.env.define(name, Val::Function(Rc::new(func)));
                Ok(Flow::Continue(Val::Nil))
            }

            Stmt::Return(expr) => {
                let retval = match expr {
                    Some(expr) => self.eval_expr(expr)?,
                    None => Val::Nil,
                };
                Ok(Flow::Return(retval))
            }

            Stmt::Assignment { name, value } => {
                let val = self.eval_expr(value)?;
                self.env.assign(name, val);
                Ok(Flow::Continue(Val::Nil))
            }

            Stmt::If { cond, then, else_ } => {
                let branch: Option<&Block> = match self.eval_expr(cond)? {
                    Val::Bool(true) => Some(then),
                    Val::Bool(false) => else_.as_ref(),
                    other => {
                        return Err(RuntimeError::NonBoolCondition {
                            found: other.type_name(),
                        });
                    }
                };

                match branch {
                    Some(block) => self.scoped(Scope::new(), |interp| interp.exec_block(block)),
                    None => Ok(Flow::Continue(Val::Nil)),
                }
            }

            Stmt::Expr(expr) => {
                let value = self.eval_expr(expr)?;
                Ok(Flow::Continue(value))
            }
        })
    }

    fn eval_expr(&mut self, expr: &Expr) -> Result<Val, RuntimeError> {
        ensure_sufficient_stack(|| match expr {
            Expr::Int(i) => Ok(Val::Int(*i)),
            Expr::Float(n) => Ok(Val::Float(*n)),
            Expr::Str(s) => Ok(Val::Str(s.clone())),
            Expr::Bool(b) => Ok(Val::Bool(*b)),
            Expr::Nil => Ok(Val::Nil),

            Expr::Var(name) => self.lookup(name),

            Expr::Unary { op, expr } => {
                let val = self.eval_expr(expr)?;
                value::eval_unary(*op, val)
            }

            Expr::Binary { op, lhs, rhs } => {
                let l = self.eval_expr(lhs)?;
                match (op, &l) {
                    (BinaryOp::And, Val::Bool(false)) => return Ok(Val::Bool(false)),
                    (BinaryOp::Or, Val::Bool(true)) => return Ok(Val::Bool(true)),
                    _ => {}
                }
                let r = self.eval_expr(rhs)?;

                value::eval_binary(*op, l, r)
            }

            Expr::Call { name, args } => self.eval_call(name, args),
        })
    }

    fn eval_call(&mut self, name: &str, args: &[Expr]) -> Result<Val, RuntimeError> {
        if let Some(builtin) = self.builtins.get(name).copied() {
            let arg_vals = self.eval_args(args)?;
            return builtin(&mut *self.out, &arg_vals);
        }

        let func = match self.lookup(name)? {
            Val::Function(func) => func,
            _ => {
                return Err(RuntimeError::NotCallable {
                    name: name.to_string(),
                });
            }
        };
        let arg_vals = self.eval_args(args)?;

        self.call_function(&func, arg_vals)
    }

    fn eval_args(&mut self, args: &[Expr]) -> Result<Vec<Val>, RuntimeError> {
        args.iter().map(|a| self.eval_expr(a)).collect()
    }

    /// Invokes `func` with already evaluated arguments. The parameters are
    /// bound in a fresh scope stacked on the current ones.
    #[tracing::instrument(level = "trace", skip_all, fields(function = %func.name))]
    pub fn call_function(&mut self, func: &Function, args: Vec<Val>) -> Result<Val, RuntimeError> {
        if func.params.len() != args.len() {
            return Err(RuntimeError::Arity {
                name: func.name.clone(),
                expected: func.params.len(),
                found: args.len(),
            });
        }

        if self.depth >= self.config.max_call_depth {
            return Err(RuntimeError::StackOverflow {
                depth: self.config.max_call_depth,
            });
        }

        let frame: Scope = func.params.iter().cloned().zip(args).collect();

        self.depth += 1;
        let flow = self.scoped(frame, |interp| interp.exec_block(&func.body));
        self.depth -= 1;

        match flow? {
            Flow::Return(v) => Ok(v),
            Flow::Continue(_) => Ok(Val::Nil),
        }
    }
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}
