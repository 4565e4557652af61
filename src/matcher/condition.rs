//! Expression parser and evaluator for matcher expressions.
//!
//! Supported syntax:
//! - Comparisons: `==`, `!=`, `>`, `<`, `>=`, `<=`
//! - Boolean operators: `&&`, `||`, `!`
//! - Arithmetic: `+`, `-`, `*`, `/`, `%` (`+` also concatenates strings)
//! - Membership: `x in ("a", "b")` or `x in ["a", "b"]`
//! - Tokens: `r.sub`, `p_obj`; attributes: `r.sub.Age` (lowered to `subAttr(r_sub, "Age")`)
//! - Calls: `keyMatch(r.obj, p.obj)`, `g(r.sub, p.sub, r.dom)`, `eval(p.rule)`
//! - Literals: integers, floats, `"strings"`, `'strings'`, `true`, `false`
//! - Parentheses for grouping

use std::collections::HashMap;
use std::fmt;

use crate::errors::AuthzError;
use crate::matcher::builtins::{FunctionMap, MatcherFn};
use crate::matcher::value::Value;

// ─── AST ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(LitValue),
    /// A bound token such as `r_sub` or `p_eft`.
    Var(String),
    Member {
        target: Box<Expr>,
        name: String,
    },
    Call {
        name: String,
        args: Vec<Expr>,
    },
    List(Vec<Expr>),
    BinOp {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    UnaryNot(Box<Expr>),
    Neg(Box<Expr>),
    In {
        element: Box<Expr>,
        collection: Box<Expr>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BinOp {
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
    And,
    Or,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LitValue {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
}

impl Expr {
    pub(crate) fn binop(op: BinOp, left: Expr, right: Expr) -> Expr {
        Expr::BinOp {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// Replace every `Var(name)` for which `lookup` returns an expression.
    /// Returns true when at least one replacement happened.
    pub(crate) fn substitute(&mut self, lookup: &dyn Fn(&str) -> Option<Expr>) -> bool {
        match self {
            Expr::Var(name) => match lookup(name) {
                Some(replacement) => {
                    *self = replacement;
                    true
                }
                None => false,
            },
            Expr::Literal(_) => false,
            Expr::Member { target, .. } => target.substitute(lookup),
            Expr::Call { args, .. } | Expr::List(args) => {
                let mut changed = false;
                for arg in args {
                    changed |= arg.substitute(lookup);
                }
                changed
            }
            Expr::BinOp { left, right, .. } => {
                let l = left.substitute(lookup);
                let r = right.substitute(lookup);
                l || r
            }
            Expr::UnaryNot(inner) | Expr::Neg(inner) => inner.substitute(lookup),
            Expr::In {
                element,
                collection,
            } => {
                let l = element.substitute(lookup);
                let r = collection.substitute(lookup);
                l || r
            }
        }
    }
}

impl fmt::Display for BinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Gt => ">",
            BinOp::Lt => "<",
            BinOp::Ge => ">=",
            BinOp::Le => "<=",
            BinOp::And => "&&",
            BinOp::Or => "||",
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Rem => "%",
        };
        f.write_str(s)
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal(LitValue::Int(n)) => write!(f, "{n}"),
            Expr::Literal(LitValue::Float(x)) => write!(f, "{x:?}"),
            Expr::Literal(LitValue::Bool(b)) => write!(f, "{b}"),
            Expr::Literal(LitValue::Str(s)) => {
                write!(f, "\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
            }
            Expr::Var(name) => f.write_str(name),
            Expr::Member { target, name } => write!(f, "{target}.{name}"),
            Expr::Call { name, args } => {
                write!(f, "{name}(")?;
                write_list(f, args)?;
                f.write_str(")")
            }
            Expr::List(items) => {
                f.write_str("[")?;
                write_list(f, items)?;
                f.write_str("]")
            }
            Expr::BinOp { op, left, right } => write!(f, "({left} {op} {right})"),
            Expr::UnaryNot(inner) => write!(f, "!{inner}"),
            Expr::Neg(inner) => write!(f, "-{inner}"),
            Expr::In {
                element,
                collection,
            } => write!(f, "({element} in {collection})"),
        }
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, items: &[Expr]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

// ─── Tokenizer ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    Ident(String),
    Int(i64),
    Float(f64),
    Str(String),
    True,
    False,
    Dot,
    Comma,
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Semicolon,
    Assign, // =
    Eq,     // ==
    Ne,     // !=
    Gt,     // >
    Lt,     // <
    Ge,     // >=
    Le,     // <=
    And,    // &&
    Or,     // ||
    Not,    // !
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    In,
    Let,
    If,
    Return,
}

pub(crate) fn tokenize(input: &str) -> Result<Vec<Token>, AuthzError> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let next = chars.get(i + 1).copied();
        match chars[i] {
            ' ' | '\t' | '\n' | '\r' => {
                i += 1;
            }
            '.' => {
                tokens.push(Token::Dot);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '[' => {
                tokens.push(Token::LBracket);
                i += 1;
            }
            ']' => {
                tokens.push(Token::RBracket);
                i += 1;
            }
            '{' => {
                tokens.push(Token::LBrace);
                i += 1;
            }
            '}' => {
                tokens.push(Token::RBrace);
                i += 1;
            }
            ';' => {
                tokens.push(Token::Semicolon);
                i += 1;
            }
            '=' if next == Some('=') => {
                tokens.push(Token::Eq);
                i += 2;
            }
            '=' => {
                tokens.push(Token::Assign);
                i += 1;
            }
            '!' if next == Some('=') => {
                tokens.push(Token::Ne);
                i += 2;
            }
            '!' => {
                tokens.push(Token::Not);
                i += 1;
            }
            '>' if next == Some('=') => {
                tokens.push(Token::Ge);
                i += 2;
            }
            '>' => {
                tokens.push(Token::Gt);
                i += 1;
            }
            '<' if next == Some('=') => {
                tokens.push(Token::Le);
                i += 2;
            }
            '<' => {
                tokens.push(Token::Lt);
                i += 1;
            }
            '&' if next == Some('&') => {
                tokens.push(Token::And);
                i += 2;
            }
            '|' if next == Some('|') => {
                tokens.push(Token::Or);
                i += 2;
            }
            '+' => {
                tokens.push(Token::Plus);
                i += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '*' => {
                tokens.push(Token::Star);
                i += 1;
            }
            '/' => {
                tokens.push(Token::Slash);
                i += 1;
            }
            '%' => {
                tokens.push(Token::Percent);
                i += 1;
            }
            quote @ ('"' | '\'') => {
                i += 1;
                let mut s = String::new();
                while i < chars.len() && chars[i] != quote {
                    if chars[i] == '\\' && i + 1 < chars.len() {
                        let escaped = chars[i + 1];
                        if escaped == quote || escaped == '\\' {
                            s.push(escaped);
                        } else {
                            s.push('\\');
                            s.push(escaped);
                        }
                        i += 2;
                        continue;
                    }
                    s.push(chars[i]);
                    i += 1;
                }
                if i >= chars.len() {
                    return Err(AuthzError::InvalidMatcher(
                        "unterminated string literal".into(),
                    ));
                }
                tokens.push(Token::Str(s));
                i += 1; // skip closing quote
            }
            c if c.is_ascii_digit() => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_ascii_digit()
                        || (chars[i] == '.'
                            && chars.get(i + 1).is_some_and(|c| c.is_ascii_digit())))
                {
                    i += 1;
                }
                let num_str: String = chars[start..i].iter().collect();
                if num_str.contains('.') {
                    let f: f64 = num_str.parse().map_err(|_| {
                        AuthzError::InvalidMatcher(format!("invalid float `{num_str}`"))
                    })?;
                    tokens.push(Token::Float(f));
                } else {
                    let n: i64 = num_str.parse().map_err(|_| {
                        AuthzError::InvalidMatcher(format!("invalid integer `{num_str}`"))
                    })?;
                    tokens.push(Token::Int(n));
                }
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                match word.as_str() {
                    "true" => tokens.push(Token::True),
                    "false" => tokens.push(Token::False),
                    "in" => tokens.push(Token::In),
                    "let" => tokens.push(Token::Let),
                    "if" => tokens.push(Token::If),
                    "return" => tokens.push(Token::Return),
                    _ => tokens.push(Token::Ident(word)),
                }
            }
            c => {
                return Err(AuthzError::InvalidMatcher(format!(
                    "unexpected character `{c}`"
                )));
            }
        }
    }
    Ok(tokens)
}

// ─── Parser ─────────────────────────────────────────────────────────────

struct Parser<'t> {
    tokens: &'t [Token],
    pos: usize,
}

impl<'t> Parser<'t> {
    fn new(tokens: &'t [Token]) -> Self {
        Self { tokens, pos: 0 }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        tok
    }

    fn expect(&mut self, expected: Token, what: &str) -> Result<(), AuthzError> {
        if self.advance() != Some(expected) {
            return Err(AuthzError::InvalidMatcher(format!("expected {what}")));
        }
        Ok(())
    }

    /// Entry: parse_or
    fn parse_expr(&mut self) -> Result<Expr, AuthzError> {
        self.parse_or()
    }

    /// or_expr = and_expr ("||" and_expr)*
    fn parse_or(&mut self) -> Result<Expr, AuthzError> {
        let mut left = self.parse_and()?;
        while self.peek() == Some(&Token::Or) {
            self.advance();
            let right = self.parse_and()?;
            left = Expr::binop(BinOp::Or, left, right);
        }
        Ok(left)
    }

    /// and_expr = comparison ("&&" comparison)*
    fn parse_and(&mut self) -> Result<Expr, AuthzError> {
        let mut left = self.parse_comparison()?;
        while self.peek() == Some(&Token::And) {
            self.advance();
            let right = self.parse_comparison()?;
            left = Expr::binop(BinOp::And, left, right);
        }
        Ok(left)
    }

    /// comparison = additive (("==" | "!=" | ">" | "<" | ">=" | "<=" | "in") additive)?
    fn parse_comparison(&mut self) -> Result<Expr, AuthzError> {
        let left = self.parse_additive()?;
        let op = match self.peek() {
            Some(Token::Eq) => BinOp::Eq,
            Some(Token::Ne) => BinOp::Ne,
            Some(Token::Gt) => BinOp::Gt,
            Some(Token::Lt) => BinOp::Lt,
            Some(Token::Ge) => BinOp::Ge,
            Some(Token::Le) => BinOp::Le,
            Some(Token::In) => {
                self.advance();
                let right = self.parse_additive()?;
                return Ok(Expr::In {
                    element: Box::new(left),
                    collection: Box::new(right),
                });
            }
            _ => return Ok(left),
        };
        self.advance();
        let right = self.parse_additive()?;
        Ok(Expr::binop(op, left, right))
    }

    /// additive = multiplicative (("+" | "-") multiplicative)*
    fn parse_additive(&mut self) -> Result<Expr, AuthzError> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinOp::Add,
                Some(Token::Minus) => BinOp::Sub,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_multiplicative()?;
            left = Expr::binop(op, left, right);
        }
    }

    /// multiplicative = unary (("*" | "/" | "%") unary)*
    fn parse_multiplicative(&mut self) -> Result<Expr, AuthzError> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinOp::Mul,
                Some(Token::Slash) => BinOp::Div,
                Some(Token::Percent) => BinOp::Rem,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_unary()?;
            left = Expr::binop(op, left, right);
        }
    }

    /// unary = ("!" | "-") unary | postfix
    fn parse_unary(&mut self) -> Result<Expr, AuthzError> {
        match self.peek() {
            Some(Token::Not) => {
                self.advance();
                let expr = self.parse_unary()?;
                Ok(Expr::UnaryNot(Box::new(expr)))
            }
            Some(Token::Minus) => {
                self.advance();
                let expr = self.parse_unary()?;
                Ok(Expr::Neg(Box::new(expr)))
            }
            _ => self.parse_postfix(),
        }
    }

    /// postfix = primary ("." ident)*
    fn parse_postfix(&mut self) -> Result<Expr, AuthzError> {
        let mut expr = self.parse_primary()?;
        while self.peek() == Some(&Token::Dot) {
            self.advance();
            let name = self.expect_ident()?;
            expr = Expr::Member {
                target: Box::new(expr),
                name,
            };
        }
        Ok(expr)
    }

    fn expect_ident(&mut self) -> Result<String, AuthzError> {
        match self.advance() {
            Some(Token::Ident(seg)) => Ok(seg),
            _ => Err(AuthzError::InvalidMatcher(
                "expected identifier after `.`".into(),
            )),
        }
    }

    /// primary = literal | call | path | "(" expr ("," expr)* ")" | "[" list "]"
    fn parse_primary(&mut self) -> Result<Expr, AuthzError> {
        match self.peek().cloned() {
            Some(Token::Int(n)) => {
                self.advance();
                Ok(Expr::Literal(LitValue::Int(n)))
            }
            Some(Token::Float(f)) => {
                self.advance();
                Ok(Expr::Literal(LitValue::Float(f)))
            }
            Some(Token::Str(s)) => {
                self.advance();
                Ok(Expr::Literal(LitValue::Str(s)))
            }
            Some(Token::True) => {
                self.advance();
                Ok(Expr::Literal(LitValue::Bool(true)))
            }
            Some(Token::False) => {
                self.advance();
                Ok(Expr::Literal(LitValue::Bool(false)))
            }
            Some(Token::Ident(name)) => {
                self.advance();
                if self.peek() == Some(&Token::LParen) {
                    self.advance();
                    let args = self.parse_list_until(Token::RParen)?;
                    return Ok(Expr::Call { name, args });
                }
                let mut path = vec![name];
                while self.peek() == Some(&Token::Dot) {
                    self.advance();
                    path.push(self.expect_ident()?);
                }
                Ok(lower_path(path))
            }
            Some(Token::LParen) => {
                self.advance();
                let mut items = self.parse_list_until(Token::RParen)?;
                match items.len() {
                    0 => Err(AuthzError::InvalidMatcher("empty parentheses".into())),
                    1 => Ok(items.remove(0)),
                    _ => Ok(Expr::List(items)),
                }
            }
            Some(Token::LBracket) => {
                self.advance();
                let items = self.parse_list_until(Token::RBracket)?;
                Ok(Expr::List(items))
            }
            other => Err(AuthzError::InvalidMatcher(format!(
                "unexpected token: {other:?}"
            ))),
        }
    }

    /// list = (expr ("," expr)*)? close
    fn parse_list_until(&mut self, close: Token) -> Result<Vec<Expr>, AuthzError> {
        let mut items = Vec::new();
        if self.peek() == Some(&close) {
            self.advance();
            return Ok(items);
        }
        loop {
            items.push(self.parse_expr()?);
            match self.advance() {
                Some(Token::Comma) => continue,
                Some(tok) if tok == close => return Ok(items),
                _ => {
                    return Err(AuthzError::InvalidMatcher(format!(
                        "expected `,` or {close:?} in argument list"
                    )))
                }
            }
        }
    }
}

/// `r.sub` becomes the token `r_sub`; a further segment becomes an attribute
/// call `subAttr(r_sub, "Age")`; anything deeper is plain member access.
fn lower_path(path: Vec<String>) -> Expr {
    let mut segments = path.into_iter();
    let Some(head) = segments.next() else {
        return Expr::Var(String::new());
    };
    let rest: Vec<String> = segments.collect();

    if is_definition_key(&head) && !rest.is_empty() {
        let field = &rest[0];
        let mut expr = Expr::Var(format!("{head}_{field}"));
        if let Some(attr) = rest.get(1) {
            expr = Expr::Call {
                name: format!("{field}Attr"),
                args: vec![expr, Expr::Literal(LitValue::Str(attr.clone()))],
            };
        }
        for name in rest.into_iter().skip(2) {
            expr = Expr::Member {
                target: Box::new(expr),
                name,
            };
        }
        return expr;
    }

    let mut expr = Expr::Var(head);
    for name in rest {
        expr = Expr::Member {
            target: Box::new(expr),
            name,
        };
    }
    expr
}

/// `r`, `p`, `r2`, `p10`, ...
fn is_definition_key(head: &str) -> bool {
    let mut chars = head.chars();
    matches!(chars.next(), Some('r' | 'p')) && chars.all(|c| c.is_ascii_digit())
}

pub(crate) fn parse_tokens(tokens: &[Token]) -> Result<Expr, AuthzError> {
    if tokens.is_empty() {
        return Err(AuthzError::InvalidMatcher("empty expression".into()));
    }
    let mut parser = Parser::new(tokens);
    let expr = parser.parse_expr()?;
    if parser.pos < parser.tokens.len() {
        return Err(AuthzError::InvalidMatcher(format!(
            "unexpected trailing token: {:?}",
            parser.tokens[parser.pos]
        )));
    }
    Ok(expr)
}

/// Parse a matcher expression string into an AST.
pub fn parse_condition(input: &str) -> Result<Expr, AuthzError> {
    let tokens = tokenize(input)?;
    parse_tokens(&tokens)
}

// ─── Evaluator ──────────────────────────────────────────────────────────

/// Source of token values (`r_sub`, `p_obj`, ...) during evaluation.
pub trait Bindings {
    fn lookup(&self, name: &str) -> Option<Value>;
}

impl Bindings for HashMap<String, Value> {
    fn lookup(&self, name: &str) -> Option<Value> {
        self.get(name).cloned()
    }
}

/// Everything an expression can see: token bindings plus callable functions.
/// `overlay` is consulted before `functions`; the enforcer puts the role
/// functions (`g`, `g2`, ...) there.
pub struct Context<'a> {
    pub bindings: &'a dyn Bindings,
    pub functions: &'a FunctionMap,
    pub overlay: Option<&'a FunctionMap>,
}

impl<'a> Context<'a> {
    pub fn new(bindings: &'a dyn Bindings, functions: &'a FunctionMap) -> Self {
        Self {
            bindings,
            functions,
            overlay: None,
        }
    }

    pub fn with_overlay(mut self, overlay: &'a FunctionMap) -> Self {
        self.overlay = Some(overlay);
        self
    }

    fn function(&self, name: &str) -> Option<&MatcherFn> {
        self.overlay
            .and_then(|o| o.get(name))
            .or_else(|| self.functions.get(name))
    }
}

/// Evaluate a parsed expression to a value.
pub fn evaluate(expr: &Expr, ctx: &Context<'_>) -> Result<Value, AuthzError> {
    match expr {
        Expr::Literal(lit) => Ok(match lit {
            LitValue::Int(n) => Value::Int(*n),
            LitValue::Float(f) => Value::Float(*f),
            LitValue::Str(s) => Value::Str(s.clone()),
            LitValue::Bool(b) => Value::Bool(*b),
        }),
        Expr::Var(name) => ctx
            .bindings
            .lookup(name)
            .ok_or_else(|| AuthzError::UnknownToken(name.clone())),
        Expr::Member { target, name } => {
            let value = evaluate(target, ctx)?;
            value.attribute(name).ok_or_else(|| {
                AuthzError::Evaluation(format!(
                    "attribute `{name}` not found on {} value",
                    value.type_name()
                ))
            })
        }
        Expr::List(items) => Ok(Value::List(
            items
                .iter()
                .map(|item| evaluate(item, ctx))
                .collect::<Result<_, _>>()?,
        )),
        Expr::Call { name, args } => eval_call(name, args, ctx),
        Expr::UnaryNot(inner) => match evaluate(inner, ctx)? {
            Value::Bool(b) => Ok(Value::Bool(!b)),
            other => Err(AuthzError::Evaluation(format!(
                "`!` operator requires a boolean operand, got {}",
                other.type_name()
            ))),
        },
        Expr::Neg(inner) => match evaluate(inner, ctx)? {
            Value::Int(n) => n
                .checked_neg()
                .map(Value::Int)
                .ok_or_else(|| AuthzError::Evaluation("integer overflow in `-`".into())),
            Value::Float(f) => Ok(Value::Float(-f)),
            other => Err(AuthzError::Evaluation(format!(
                "`-` operator requires a numeric operand, got {}",
                other.type_name()
            ))),
        },
        Expr::In {
            element,
            collection,
        } => {
            let elem = evaluate(element, ctx)?;
            match evaluate(collection, ctx)? {
                Value::List(items) => Ok(Value::Bool(items.contains(&elem))),
                other => Err(AuthzError::Evaluation(format!(
                    "`in` operator requires a list on the right side, got {}",
                    other.type_name()
                ))),
            }
        }
        Expr::BinOp { op, left, right } => match op {
            BinOp::And => {
                if !as_operand_bool(evaluate(left, ctx)?, "&&")? {
                    return Ok(Value::Bool(false));
                }
                Ok(Value::Bool(as_operand_bool(evaluate(right, ctx)?, "&&")?))
            }
            BinOp::Or => {
                if as_operand_bool(evaluate(left, ctx)?, "||")? {
                    return Ok(Value::Bool(true));
                }
                Ok(Value::Bool(as_operand_bool(evaluate(right, ctx)?, "||")?))
            }
            _ => {
                let l = evaluate(left, ctx)?;
                let r = evaluate(right, ctx)?;
                eval_binary(*op, l, r)
            }
        },
    }
}

fn as_operand_bool(value: Value, op: &str) -> Result<bool, AuthzError> {
    value.as_bool().ok_or_else(|| {
        AuthzError::Evaluation(format!(
            "`{op}` requires boolean operands, got {}",
            value.type_name()
        ))
    })
}

fn eval_call(name: &str, args: &[Expr], ctx: &Context<'_>) -> Result<Value, AuthzError> {
    if name == "eval" {
        let [arg] = args else {
            return Err(AuthzError::Evaluation(
                "eval expects exactly one argument".into(),
            ));
        };
        let source = evaluate(arg, ctx)?;
        let source = source.as_str().ok_or_else(|| {
            AuthzError::Evaluation("eval argument must be a string expression".into())
        })?;
        let expr = parse_condition(source)?;
        return evaluate(&expr, ctx);
    }

    let values = args
        .iter()
        .map(|arg| evaluate(arg, ctx))
        .collect::<Result<Vec<_>, _>>()?;

    if let Some(function) = ctx.function(name) {
        return function(&values);
    }

    // Unregistered `<field>Attr(value, "name")` falls back to the value's own attributes.
    if name.ends_with("Attr") {
        if let [target, Value::Str(attr)] = values.as_slice() {
            return target.attribute(attr).ok_or_else(|| {
                AuthzError::Evaluation(format!(
                    "attribute `{attr}` not found on {} value",
                    target.type_name()
                ))
            });
        }
    }

    Err(AuthzError::Evaluation(format!("unknown function `{name}`")))
}

fn eval_binary(op: BinOp, l: Value, r: Value) -> Result<Value, AuthzError> {
    match op {
        BinOp::Eq => Ok(Value::Bool(l == r)),
        BinOp::Ne => Ok(Value::Bool(l != r)),
        BinOp::Gt | BinOp::Lt | BinOp::Ge | BinOp::Le => {
            let ordering = match (&l, &r) {
                (Value::Str(a), Value::Str(b)) => a.partial_cmp(b),
                _ => match (l.as_f64(), r.as_f64()) {
                    (Some(a), Some(b)) => a.partial_cmp(&b),
                    _ => {
                        return Err(AuthzError::Evaluation(format!(
                            "comparison operator `{op}` requires numeric or string operands, got {} and {}",
                            l.type_name(),
                            r.type_name()
                        )))
                    }
                },
            };
            let Some(ordering) = ordering else {
                return Ok(Value::Bool(false));
            };
            let result = match op {
                BinOp::Gt => ordering.is_gt(),
                BinOp::Lt => ordering.is_lt(),
                BinOp::Ge => ordering.is_ge(),
                _ => ordering.is_le(),
            };
            Ok(Value::Bool(result))
        }
        BinOp::Add => match (&l, &r) {
            (Value::Int(a), Value::Int(b)) => a
                .checked_add(*b)
                .map(Value::Int)
                .ok_or_else(|| AuthzError::Evaluation("integer overflow in `+`".into())),
            (Value::Str(_), _) | (_, Value::Str(_)) => Ok(Value::Str(format!("{l}{r}"))),
            _ => numeric(op, &l, &r, |a, b| a + b),
        },
        BinOp::Sub => match (&l, &r) {
            (Value::Int(a), Value::Int(b)) => a
                .checked_sub(*b)
                .map(Value::Int)
                .ok_or_else(|| AuthzError::Evaluation("integer overflow in `-`".into())),
            _ => numeric(op, &l, &r, |a, b| a - b),
        },
        BinOp::Mul => match (&l, &r) {
            (Value::Int(a), Value::Int(b)) => a
                .checked_mul(*b)
                .map(Value::Int)
                .ok_or_else(|| AuthzError::Evaluation("integer overflow in `*`".into())),
            _ => numeric(op, &l, &r, |a, b| a * b),
        },
        BinOp::Div => {
            if r.as_f64() == Some(0.0) {
                return Err(AuthzError::Evaluation("division by zero".into()));
            }
            numeric(op, &l, &r, |a, b| a / b)
        }
        BinOp::Rem => match (&l, &r) {
            (Value::Int(a), Value::Int(b)) => a
                .checked_rem(*b)
                .map(Value::Int)
                .ok_or_else(|| AuthzError::Evaluation("division by zero".into())),
            _ => numeric(op, &l, &r, |a, b| a % b),
        },
        BinOp::And | BinOp::Or => unreachable!("logical operators short-circuit in evaluate"),
    }
}

fn numeric(op: BinOp, l: &Value, r: &Value, f: fn(f64, f64) -> f64) -> Result<Value, AuthzError> {
    match (l.as_f64(), r.as_f64()) {
        (Some(a), Some(b)) => Ok(Value::Float(f(a, b))),
        _ => Err(AuthzError::Evaluation(format!(
            "operator `{op}` requires numeric operands, got {} and {}",
            l.type_name(),
            r.type_name()
        ))),
    }
}
