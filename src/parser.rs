use std::collections::VecDeque;

use tracing::{debug, trace};

use crate::{
    ast::{BinaryOp, Block, Expr, Program, Stmt, UnaryOp},
    error::{LexError, ParseError, SyntaxError},
    lexer::{Lexer, Position, Token, TokenKind},
    stack::ensure_sufficient_stack,
};

/// Deepest block nesting and expression tree height the parser accepts.
pub const MAX_NESTING: usize = 512;

/// Parses a complete source text into a program.
pub fn parse(source: &str) -> Result<Program, ParseError> {
    let statements = Parser::new(source)?.parse()?;
    debug!(statements = statements.len(), "parsed program");
    Ok(Program::new(statements))
}

/// Recursive-descent parser pulling tokens from the lexer on demand.
///
/// Statements can be read one at a time with [`Parser::read_statement`] or
/// all at once with [`Parser::parse`]. Once any call fails the parser is
/// halted and every later call returns [`ParseError::Halted`].
pub struct Parser<'a> {
    lexer: Lexer<'a>,
    lookahead: VecDeque<Token>,
    eof: Position,
    halted: bool,
    blocks: usize,
}

impl<'a> Parser<'a> {
    pub fn new(source: &'a str) -> Result<Parser<'a>, ParseError> {
        Ok(Parser {
            lexer: Lexer::new(source)?,
            lookahead: VecDeque::new(),
            eof: Position::default(),
            halted: false,
            blocks: 0,
        })
    }

    /// Accepts raw bytes, rejecting anything that is not UTF-8.
    pub fn from_bytes(source: &'a [u8]) -> Result<Parser<'a>, ParseError> {
        let source = std::str::from_utf8(source).map_err(|e| LexError::InvalidUtf8 {
            offset: e.valid_up_to(),
        })?;
        Parser::new(source)
    }

    /// Skips the next token, which must be spelled `expected`. An empty
    /// `expected` only primes the token stream.
    pub fn consume(&mut self, expected: &str) -> Result<(), ParseError> {
        self.guarded(|p| {
            if expected.is_empty() {
                return p.peek().map(|_| ());
            }
            let tok = p.peek()?;
            if tok.text == expected {
                p.advance()?;
                Ok(())
            } else {
                Err(unexpected(tok, format!("`{}`", expected)))
            }
        })
    }

    /// Parses the next top-level statement, or `None` at end of input.
    pub fn read_statement(&mut self) -> Result<Option<Stmt>, ParseError> {
        self.guarded(|p| {
            p.skip_separators()?;
            if p.peek()?.kind == TokenKind::Eof {
                return Ok(None);
            }
            p.statement().map(Some)
        })
    }

    /// Parses everything that is left.
    pub fn parse(&mut self) -> Result<Block, ParseError> {
        let mut block = Vec::new();
        while let Some(stmt) = self.read_statement()? {
            block.push(stmt);
        }
        Ok(block)
    }

    fn guarded<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, ParseError>,
    ) -> Result<T, ParseError> {
        if self.halted {
            return Err(ParseError::Halted);
        }
        let result = f(self);
        if result.is_err() {
            self.halted = true;
        }
        result
    }

    fn statement(&mut self) -> Result<Stmt, ParseError> {
        ensure_sufficient_stack(|| {
            let assigns = matches!(self.peek()?.kind, TokenKind::Ident(_))
                && self.peek_nth(1)?.kind == TokenKind::Assign;

            let stmt = match self.peek()?.kind {
                _ if assigns => self.assignment()?,
                TokenKind::If => self.if_stmt()?,
                TokenKind::Return => self.return_stmt()?,
                _ => self.expr_or_function()?,
            };
            trace!(kind = stmt.typing(), "statement");
            self.eat(&TokenKind::Semi)?;
            Ok(stmt)
        })
    }

    fn assignment(&mut self) -> Result<Stmt, ParseError> {
        let name = self.ident("variable name")?;
        self.expect(&TokenKind::Assign)?;
        let value = self.expression()?;
        Ok(Stmt::Assignment { name, value })
    }

    fn if_stmt(&mut self) -> Result<Stmt, ParseError> {
        self.expect(&TokenKind::If)?;
        let cond = self.expression()?;
        let then = self.block()?;

        let else_ = if self.eat(&TokenKind::Else)? {
            if self.peek()?.kind == TokenKind::If {
                Some(vec![self.if_stmt()?])
            } else {
                Some(self.block()?)
            }
        } else {
            None
        };

        Ok(Stmt::If { cond, then, else_ })
    }

    fn return_stmt(&mut self) -> Result<Stmt, ParseError> {
        self.expect(&TokenKind::Return)?;
        match self.peek()?.kind {
            TokenKind::RBrace | TokenKind::Semi | TokenKind::Eof => Ok(Stmt::Return(None)),
            _ => Ok(Stmt::Return(Some(self.expression()?))),
        }
    }

    // `name(a, b)` is a call unless a block follows, in which case it
    // defines a function and every argument has to be a plain name.
    fn expr_or_function(&mut self) -> Result<Stmt, ParseError> {
        let expr = self.expression()?;

        let (name, args) = match expr {
            Expr::Call { name, args } if self.peek()?.kind == TokenKind::LBrace => (name, args),
            expr => return Ok(Stmt::Expr(expr)),
        };

        let pos = self.peek()?.pos;
        let params = args
            .into_iter()
            .map(|arg| match arg {
                Expr::Var(param) => Ok(param),
                other => Err(ParseError::Syntax(SyntaxError {
                    expected: "parameter name".to_string(),
                    found: other.to_string(),
                    pos,
                })),
            })
            .collect::<Result<Vec<String>, ParseError>>()?;
        let body = self.block()?;

        Ok(Stmt::Function { name, params, body })
    }

    fn block(&mut self) -> Result<Block, ParseError> {
        let open = self.expect(&TokenKind::LBrace)?;
        if self.blocks >= MAX_NESTING {
            return Err(ParseError::TooDeep {
                limit: MAX_NESTING,
                pos: open.pos,
            });
        }

        self.blocks += 1;
        let body = self.block_body();
        self.blocks -= 1;
        body
    }

    fn block_body(&mut self) -> Result<Block, ParseError> {
        let mut body = Vec::new();
        loop {
            self.skip_separators()?;
            let tok = self.peek()?;
            match tok.kind {
                TokenKind::RBrace => {
                    self.advance()?;
                    return Ok(body);
                }
                TokenKind::Eof => return Err(unexpected(tok, "`}`")),
                _ => body.push(self.statement()?),
            }
        }
    }

    fn expression(&mut self) -> Result<Expr, ParseError> {
        self.sized_expression().map(|(expr, _)| expr)
    }

    // The expression together with its tree height.
    fn sized_expression(&mut self) -> Result<(Expr, usize), ParseError> {
        ensure_sufficient_stack(|| self.binary(0))
    }

    // Precedence climbing: only operators binding tighter than `min_prec`
    // are folded into this operand, which keeps every level left-associative.
    fn binary(&mut self, min_prec: u8) -> Result<(Expr, usize), ParseError> {
        let (mut lhs, mut height) = self.unary()?;

        loop {
            let op = match binary_op(&self.peek()?.kind) {
                Some(op) if op.precedence() > min_prec => op,
                _ => break,
            };
            let pos = self.advance()?.pos;
            let (rhs, rhs_height) = self.binary(op.precedence())?;
            height = bounded(height.max(rhs_height) + 1, pos)?;

            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }

        Ok((lhs, height))
    }

    fn unary(&mut self) -> Result<(Expr, usize), ParseError> {
        let op = match self.peek()?.kind {
            TokenKind::Minus => UnaryOp::Neg,
            TokenKind::Bang => UnaryOp::Not,
            _ => return self.primary(),
        };
        let pos = self.advance()?.pos;
        let (expr, height) = ensure_sufficient_stack(|| self.unary())?;

        Ok((
            Expr::Unary {
                op,
                expr: Box::new(expr),
            },
            bounded(height + 1, pos)?,
        ))
    }

    fn primary(&mut self) -> Result<(Expr, usize), ParseError> {
        let tok = self.advance()?;

        let leaf = match tok.kind {
            TokenKind::Int(i) => Expr::Int(i),
            TokenKind::Float(n) => Expr::Float(n),
            TokenKind::Str(s) => Expr::Str(s),
            TokenKind::True => Expr::Bool(true),
            TokenKind::False => Expr::Bool(false),
            TokenKind::Nil => Expr::Nil,
            TokenKind::Ident(name) => {
                if self.peek()?.kind != TokenKind::LParen {
                    return Ok((Expr::Var(name), 1));
                }
                let (args, height) = self.call_args()?;
                return Ok((Expr::Call { name, args }, bounded(height + 1, tok.pos)?));
            }
            TokenKind::LParen => {
                let nested = self.sized_expression()?;
                self.expect(&TokenKind::RParen)?;
                return Ok(nested);
            }
            _ => return Err(unexpected(&tok, "expression")),
        };

        Ok((leaf, 1))
    }

    fn call_args(&mut self) -> Result<(Vec<Expr>, usize), ParseError> {
        self.expect(&TokenKind::LParen)?;
        let mut args = Vec::new();
        let mut height = 0;
        if self.eat(&TokenKind::RParen)? {
            return Ok((args, height));
        }

        loop {
            let (arg, arg_height) = self.sized_expression()?;
            height = height.max(arg_height);
            args.push(arg);
            if !self.eat(&TokenKind::Comma)? {
                break;
            }
        }
        self.expect(&TokenKind::RParen)?;

        Ok((args, height))
    }

    fn ident(&mut self, what: &str) -> Result<String, ParseError> {
        let tok = self.advance()?;
        match tok.kind {
            TokenKind::Ident(name) => Ok(name),
            _ => Err(unexpected(&tok, what)),
        }
    }

    fn skip_separators(&mut self) -> Result<(), ParseError> {
        while self.eat(&TokenKind::Semi)? {}
        Ok(())
    }

    fn expect(&mut self, kind: &TokenKind) -> Result<Token, ParseError> {
        let tok = self.peek()?;
        if tok.kind != *kind {
            return Err(unexpected(tok, kind.to_string()));
        }
        self.advance()
    }

    fn eat(&mut self, kind: &TokenKind) -> Result<bool, ParseError> {
        if self.peek()?.kind == *kind {
            self.advance()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn peek(&mut self) -> Result<&Token, ParseError> {
        self.peek_nth(0)
    }

    fn peek_nth(&mut self, n: usize) -> Result<&Token, ParseError> {
        while self.lookahead.len() <= n {
            let tok = match self.lexer.next() {
                Some(tok) => tok?,
                None => Token {
                    kind: TokenKind::Eof,
                    text: String::new(),
                    pos: self.eof,
                },
            };
            if tok.kind == TokenKind::Eof {
                self.eof = tok.pos;
            }
            self.lookahead.push_back(tok);
        }
        Ok(&self.lookahead[n])
    }

    fn advance(&mut self) -> Result<Token, ParseError> {
        self.peek()?;
        // peek guarantees at least one buffered token
        match self.lookahead.pop_front() {
            Some(tok) => Ok(tok),
            None => Err(ParseError::Halted),
        }
    }
}

fn binary_op(kind: &TokenKind) -> Option<BinaryOp> {
    let op = match kind {
        TokenKind::Plus => BinaryOp::Add,
        TokenKind::Minus => BinaryOp::Sub,
        TokenKind::Star => BinaryOp::Mul,
        TokenKind::Slash => BinaryOp::Div,
        TokenKind::Percent => BinaryOp::Mod,
        TokenKind::EqEq => BinaryOp::Eq,
        TokenKind::NotEq => BinaryOp::Ne,
        TokenKind::Lt => BinaryOp::Lt,
        TokenKind::Le => BinaryOp::Le,
        TokenKind::Gt => BinaryOp::Gt,
        TokenKind::Ge => BinaryOp::Ge,
        TokenKind::AndAnd => BinaryOp::And,
        TokenKind::OrOr => BinaryOp::Or,
        _ => return None,
    };
    Some(op)
}

fn bounded(height: usize, pos: Position) -> Result<usize, ParseError> {
    if height > MAX_NESTING {
        return Err(ParseError::TooDeep {
            limit: MAX_NESTING,
            pos,
        });
    }
    Ok(height)
}

fn unexpected(tok: &Token, expected: impl Into<String>) -> ParseError {
    ParseError::Syntax(SyntaxError {
        expected: expected.into(),
        found: tok.kind.to_string(),
        pos: tok.pos,
    })
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn stmts(source: &str) -> Vec<Stmt> {
        parse(source).unwrap().statements
    }

    fn var(name: &str) -> Box<Expr> {
        Box::new(Expr::Var(name.to_string()))
    }

    fn bin(op: BinaryOp, lhs: Box<Expr>, rhs: Box<Expr>) -> Expr {
        Expr::Binary { op, lhs, rhs }
    }

    #[test]
    fn test_parse_literal() {
        assert_eq!(stmts("42"), vec![Stmt::Expr(Expr::Int(42))]);
        assert_eq!(stmts("true"), vec![Stmt::Expr(Expr::Bool(true))]);
        assert_eq!(stmts("'hi'"), vec![Stmt::Expr(Expr::Str("hi".to_string()))]);
    }

    #[test]
    fn test_parse_binary() {
        assert_eq!(
            stmts("1 + 2"),
            vec![Stmt::Expr(bin(
                BinaryOp::Add,
                Box::new(Expr::Int(1)),
                Box::new(Expr::Int(2))
            ))]
        );
    }

    #[test]
    fn test_comparison_binds_looser_than_additive() {
        assert_eq!(
            stmts("n < a + 1"),
            vec![Stmt::Expr(bin(
                BinaryOp::Lt,
                var("n"),
                Box::new(bin(BinaryOp::Add, var("a"), Box::new(Expr::Int(1))))
            ))]
        );
    }

    #[test]
    fn test_left_associative() {
        assert_eq!(
            stmts("a - b - c"),
            vec![Stmt::Expr(bin(
                BinaryOp::Sub,
                Box::new(bin(BinaryOp::Sub, var("a"), var("b"))),
                var("c")
            ))]
        );
    }

    #[test]
    fn test_unary_and_grouping() {
        assert_eq!(
            stmts("-(a + 1) * !b"),
            vec![Stmt::Expr(bin(
                BinaryOp::Mul,
                Box::new(Expr::Unary {
                    op: UnaryOp::Neg,
                    expr: Box::new(bin(BinaryOp::Add, var("a"), Box::new(Expr::Int(1)))),
                }),
                Box::new(Expr::Unary {
                    op: UnaryOp::Not,
                    expr: var("b"),
                })
            ))]
        );
    }

    #[test]
    fn test_parse_assignment() {
        assert_eq!(
            stmts("  a = 1 + 1"),
            vec![Stmt::Assignment {
                name: "a".to_string(),
                value: bin(BinaryOp::Add, Box::new(Expr::Int(1)), Box::new(Expr::Int(1))),
            }]
        );
    }

    #[test]
    fn test_parse_function() {
        assert_eq!(
            stmts("p(a, b) { return a + b }"),
            vec![Stmt::Function {
                name: "p".to_string(),
                params: vec!["a".to_string(), "b".to_string()],
                body: vec![Stmt::Return(Some(bin(BinaryOp::Add, var("a"), var("b"))))],
            }]
        );
    }

    #[test]
    fn test_parse_call() {
        assert_eq!(
            stmts("add(1, 2)\nnoop()"),
            vec![
                Stmt::Expr(Expr::Call {
                    name: "add".to_string(),
                    args: vec![Expr::Int(1), Expr::Int(2)],
                }),
                Stmt::Expr(Expr::Call {
                    name: "noop".to_string(),
                    args: vec![],
                }),
            ]
        );
    }

    #[test]
    fn test_parse_conditional() {
        assert_eq!(
            stmts("if x < 10 { 1 } else { return }"),
            vec![Stmt::If {
                cond: bin(BinaryOp::Lt, var("x"), Box::new(Expr::Int(10))),
                then: vec![Stmt::Expr(Expr::Int(1))],
                else_: Some(vec![Stmt::Return(None)]),
            }]
        );
    }

    #[test]
    fn test_call_in_condition_is_not_a_definition() {
        assert_eq!(
            stmts("if ok(x) { }"),
            vec![Stmt::If {
                cond: Expr::Call {
                    name: "ok".to_string(),
                    args: vec![Expr::Var("x".to_string())],
                },
                then: vec![],
                else_: None,
            }]
        );
    }

    #[test]
    fn test_else_if_chain() {
        assert_eq!(
            stmts("if a { 1 } else if b { 2 }"),
            vec![Stmt::If {
                cond: Expr::Var("a".to_string()),
                then: vec![Stmt::Expr(Expr::Int(1))],
                else_: Some(vec![Stmt::If {
                    cond: Expr::Var("b".to_string()),
                    then: vec![Stmt::Expr(Expr::Int(2))],
                    else_: None,
                }]),
            }]
        );
    }

    #[test]
    fn test_semicolons_separate_statements() {
        assert_eq!(
            stmts("a=2; b=1;; a"),
            vec![
                Stmt::Assignment {
                    name: "a".to_string(),
                    value: Expr::Int(2),
                },
                Stmt::Assignment {
                    name: "b".to_string(),
                    value: Expr::Int(1),
                },
                Stmt::Expr(Expr::Var("a".to_string())),
            ]
        );
    }

    #[test]
    fn test_parse_fibonacci() {
        let source = r#"
        fib(n) {
            echoln('n: ', n)
            if n < 2 {
                return n
            } else {
                return fib(n - 2) + fib(n - 1)
            }
        }

        return fib(5)
    "#;

        let call = |arg: i64| {
            Box::new(Expr::Call {
                name: "fib".to_string(),
                args: vec![bin(BinaryOp::Sub, var("n"), Box::new(Expr::Int(arg)))],
            })
        };

        assert_eq!(
            stmts(source),
            vec![
                Stmt::Function {
                    name: "fib".to_string(),
                    params: vec!["n".to_string()],
                    body: vec![
                        Stmt::Expr(Expr::Call {
                            name: "echoln".to_string(),
                            args: vec![Expr::Str("n: ".to_string()), Expr::Var("n".to_string())],
                        }),
                        Stmt::If {
                            cond: bin(BinaryOp::Lt, var("n"), Box::new(Expr::Int(2))),
                            then: vec![Stmt::Return(Some(Expr::Var("n".to_string())))],
                            else_: Some(vec![Stmt::Return(Some(bin(
                                BinaryOp::Add,
                                call(2),
                                call(1)
                            )))]),
                        },
                    ],
                },
                Stmt::Return(Some(Expr::Call {
                    name: "fib".to_string(),
                    args: vec![Expr::Int(5)],
                })),
            ]
        );
    }

    #[test]
    fn test_read_statement_incrementally() {
        let mut parser = Parser::new("a = 1\necho(a)").unwrap();
        parser.consume("").unwrap();

        let first = parser.read_statement().unwrap().unwrap();
        assert_eq!(first.typing(), "Assignment");
        let second = parser.read_statement().unwrap().unwrap();
        assert_eq!(second.typing(), "Expr");
        assert_eq!(parser.read_statement().unwrap(), None);
        assert_eq!(parser.read_statement().unwrap(), None);
    }

    #[test]
    fn test_consume_prefix() {
        let mut parser = Parser::new("; a").unwrap();
        parser.consume(";").unwrap();
        assert_eq!(parser.parse().unwrap(), vec![Stmt::Expr(Expr::Var("a".to_string()))]);

        let mut parser = Parser::new("a").unwrap();
        assert!(matches!(parser.consume("if"), Err(ParseError::Syntax(_))));
    }

    #[test]
    fn test_missing_closing_brace() {
        let err = parse("f(a) { return a").unwrap_err();
        assert_eq!(
            err,
            ParseError::Syntax(SyntaxError {
                expected: "`}`".to_string(),
                found: "end of input".to_string(),
                pos: Position {
                    line: 1,
                    column: 16,
                    offset: 15,
                },
            })
        );
    }

    #[test]
    fn test_unexpected_token() {
        let err = parse("a = )").unwrap_err();
        match err {
            ParseError::Syntax(e) => {
                assert_eq!(e.expected, "expression");
                assert_eq!(e.found, "`)`");
                assert_eq!(e.pos.column, 5);
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_definition_needs_plain_params() {
        let err = parse("f(1) { }").unwrap_err();
        assert!(matches!(err, ParseError::Syntax(e) if e.expected == "parameter name"));
    }

    #[test]
    fn test_lex_error_surfaces() {
        let err = parse("a = 'open").unwrap_err();
        assert!(matches!(
            err,
            ParseError::Lex(LexError::UnterminatedString { .. })
        ));
    }

    #[test]
    fn test_invalid_utf8() {
        let err = Parser::from_bytes(&[b'a', 0xff]).err().unwrap();
        assert_eq!(err, ParseError::Lex(LexError::InvalidUtf8 { offset: 1 }));
    }

    #[test]
    fn test_nesting_limit_for_blocks() {
        let nested = |depth: usize| format!("{}{}", "if true { ".repeat(depth), "}".repeat(depth));

        assert!(parse(&nested(MAX_NESTING)).is_ok());
        let err = parse(&nested(MAX_NESTING + 1)).unwrap_err();
        assert!(matches!(err, ParseError::TooDeep { limit: MAX_NESTING, .. }));
    }

    #[test]
    fn test_nesting_limit_for_expressions() {
        let negated = |depth: usize| format!("x = {}1", "-".repeat(depth));

        assert!(parse(&negated(MAX_NESTING - 1)).is_ok());
        let err = parse(&negated(MAX_NESTING)).unwrap_err();
        assert!(matches!(err, ParseError::TooDeep { pos, .. } if pos.column == 5));

        // parentheses add no node
        let wrapped = format!("x = {}1{}", "(".repeat(2000), ")".repeat(2000));
        assert_eq!(parse(&wrapped).unwrap().statements.len(), 1);
    }

    #[test]
    fn test_left_folded_chain_counts_as_nesting() {
        let chain = |len: usize| format!("x = 1{}", " * 2".repeat(len));

        assert!(parse(&chain(MAX_NESTING - 1)).is_ok());
        assert!(matches!(
            parse(&chain(MAX_NESTING)),
            Err(ParseError::TooDeep { .. })
        ));
    }

    #[test]
    fn test_halted_after_error() {
        let mut parser = Parser::new("a = ) b = 2").unwrap();
        assert!(matches!(parser.read_statement(), Err(ParseError::Syntax(_))));
        assert_eq!(parser.read_statement(), Err(ParseError::Halted));
        assert_eq!(parser.parse(), Err(ParseError::Halted));
    }
}
