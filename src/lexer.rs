use std::fmt;

use pest::{
    Parser,
    error::{InputLocation, LineColLocation},
    iterators::{Pair, Pairs},
};
use tracing::trace;

use crate::error::LexError;

#[derive(pest_derive::Parser)]
#[grammar = "./grammar.pest"]
struct LangParser;

/// Location of a token in the source. Lines and columns start at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Position {
    pub line: usize,
    pub column: usize,
    pub offset: usize,
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Ident(String),
    Int(i64),
    Float(f64),
    Str(String),

    If,
    Else,
    Return,
    True,
    False,
    Nil,

    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    AndAnd,
    OrOr,
    Bang,
    Assign,

    LParen,
    RParen,
    LBrace,
    RBrace,
    Comma,
    Semi,

    Eof,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Ident(name) => write!(f, "identifier `{}`", name),
            TokenKind::Int(i) => write!(f, "integer `{}`", i),
            TokenKind::Float(n) => write!(f, "float `{:?}`", n),
            TokenKind::Str(s) => write!(f, "string {:?}", s),
            TokenKind::Eof => write!(f, "end of input"),
            other => match other.symbol() {
                Some(sym) => write!(f, "`{}`", sym),
                None => write!(f, "{:?}", other),
            },
        }
    }
}

impl TokenKind {
    /// Source spelling of keywords, operators and punctuation.
    pub fn symbol(&self) -> Option<&'static str> {
        let sym = match self {
            TokenKind::If => "if",
            TokenKind::Else => "else",
            TokenKind::Return => "return",
            TokenKind::True => "true",
            TokenKind::False => "false",
            TokenKind::Nil => "nil",
            TokenKind::Plus => "+",
            TokenKind::Minus => "-",
            TokenKind::Star => "*",
            TokenKind::Slash => "/",
            TokenKind::Percent => "%",
            TokenKind::EqEq => "==",
            TokenKind::NotEq => "!=",
            TokenKind::Lt => "<",
            TokenKind::Le => "<=",
            TokenKind::Gt => ">",
            TokenKind::Ge => ">=",
            TokenKind::AndAnd => "&&",
            TokenKind::OrOr => "||",
            TokenKind::Bang => "!",
            TokenKind::Assign => "=",
            TokenKind::LParen => "(",
            TokenKind::RParen => ")",
            TokenKind::LBrace => "{",
            TokenKind::RBrace => "}",
            TokenKind::Comma => ",",
            TokenKind::Semi => ";",
            _ => return None,
        };
        Some(sym)
    }

    fn from_symbol(text: &str) -> Option<TokenKind> {
        let kind = match text {
            "if" => TokenKind::If,
            "else" => TokenKind::Else,
            "return" => TokenKind::Return,
            "true" => TokenKind::True,
            "false" => TokenKind::False,
            "nil" => TokenKind::Nil,
            "+" => TokenKind::Plus,
            "-" => TokenKind::Minus,
            "*" => TokenKind::Star,
            "/" => TokenKind::Slash,
            "%" => TokenKind::Percent,
            "==" => TokenKind::EqEq,
            "!=" => TokenKind::NotEq,
            "<" => TokenKind::Lt,
            "<=" => TokenKind::Le,
            ">" => TokenKind::Gt,
            ">=" => TokenKind::Ge,
            "&&" => TokenKind::AndAnd,
            "||" => TokenKind::OrOr,
            "!" => TokenKind::Bang,
            "=" => TokenKind::Assign,
            "(" => TokenKind::LParen,
            ")" => TokenKind::RParen,
            "{" => TokenKind::LBrace,
            "}" => TokenKind::RBrace,
            "," => TokenKind::Comma,
            ";" => TokenKind::Semi,
            _ => return None,
        };
        Some(kind)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    /// The lexeme exactly as written, quotes and escapes included.
    pub text: String,
    pub pos: Position,
}

/// Streams tokens out of the pest token pairs, ending with a single
/// `TokenKind::Eof`. Iteration stops after the first error.
pub struct Lexer<'a> {
    pairs: Pairs<'a, Rule>,
    end: Position,
    done: bool,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Result<Lexer<'a>, LexError> {
        let mut tokens = LangParser::parse(Rule::Tokens, source).map_err(from_pest_error)?;
        let pairs = match tokens.next() {
            Some(pair) => pair.into_inner(),
            None => tokens,
        };

        Ok(Lexer {
            pairs,
            end: end_position(source),
            done: false,
        })
    }
}

impl Iterator for Lexer<'_> {
    type Item = Result<Token, LexError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let token = match self.pairs.next() {
            Some(pair) if pair.as_rule() != Rule::EOI => to_token(pair),
            _ => {
                self.done = true;
                Ok(Token {
                    kind: TokenKind::Eof,
                    text: String::new(),
                    pos: self.end,
                })
            }
        };

        match &token {
            Ok(tok) => trace!(kind = ?tok.kind, pos = %tok.pos, "token"),
            Err(_) => self.done = true,
        }
        Some(token)
    }
}

/// Lexes the whole input eagerly. The final token is always `Eof`.
pub fn tokenize(source: &str) -> Result<Vec<Token>, LexError> {
    Lexer::new(source)?.collect()
}

fn to_token(pair: Pair<'_, Rule>) -> Result<Token, LexError> {
    let (line, column) = pair.line_col();
    let pos = Position {
        line,
        column,
        offset: pair.as_span().start(),
    };
    let text = pair.as_str();

    let kind = match pair.as_rule() {
        Rule::Int => TokenKind::Int(text.parse().map_err(|_| LexError::IntegerOverflow {
            text: text.to_string(),
            pos,
        })?),
        Rule::Float => {
            let n: f64 = text.parse().map_err(|_| LexError::Malformed {
                message: format!("bad float literal `{}`", text),
                pos,
            })?;
            if !n.is_finite() {
                return Err(LexError::FloatOverflow {
                    text: text.to_string(),
                    pos,
                });
            }
            TokenKind::Float(n)
        }
        Rule::String => TokenKind::Str(unescape(text, pos)?),
        Rule::Unterminated => return Err(LexError::UnterminatedString { pos }),
        Rule::Ident => TokenKind::Ident(text.to_string()),
        Rule::Keyword | Rule::Operator | Rule::Punct => {
            TokenKind::from_symbol(text).ok_or_else(|| LexError::Malformed {
                message: format!("unknown symbol `{}`", text),
                pos,
            })?
        }
        _ => {
            return Err(LexError::UnexpectedChar {
                ch: text.chars().next().unwrap_or('\0'),
                pos,
            });
        }
    };

    Ok(Token {
        kind,
        text: text.to_string(),
        pos,
    })
}

fn unescape(lexeme: &str, pos: Position) -> Result<String, LexError> {
    // Both quote characters are one byte wide.
    let body = &lexeme[1..lexeme.len() - 1];
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars();

    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('0') => out.push('\0'),
            Some('\\') => out.push('\\'),
            Some('\'') => out.push('\''),
            Some('"') => out.push('"'),
            Some(other) => return Err(LexError::InvalidEscape { ch: other, pos }),
            None => return Err(LexError::UnterminatedString { pos }),
        }
    }

    Ok(out)
}

fn from_pest_error(err: pest::error::Error<Rule>) -> LexError {
    let (line, column) = match err.line_col {
        LineColLocation::Pos(lc) | LineColLocation::Span(lc, _) => lc,
    };
    let offset = match err.location {
        InputLocation::Pos(offset) | InputLocation::Span((offset, _)) => offset,
    };
    LexError::Malformed {
        message: err.variant.message().into_owned(),
        pos: Position {
            line,
            column,
            offset,
        },
    }
}

fn end_position(source: &str) -> Position {
    let line = source.matches('\n').count() + 1;
    let last_line = source.rsplit('\n').next().unwrap_or("");
    Position {
        line,
        column: last_line.chars().count() + 1,
        offset: source.len(),
    }
}
