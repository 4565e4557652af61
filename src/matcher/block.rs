//! Block-form matchers.
//!
//! ```text
//! m = {
//!     let role_match = g(r.sub, p.sub)
//!     if !role_match { return false }
//!     return r.obj == p.obj
//! }
//! ```
//!
//! The block is parsed into statements and lowered to one expression:
//! every `if c { return v }` becomes `(c && v) || (!c && rest)`, nested so the
//! first `if` wins, and `let` aliases are substituted into what follows.

use std::collections::HashMap;

use crate::errors::AuthzError;
use crate::matcher::condition::{parse_tokens, tokenize, BinOp, Expr, Token};

/// Upper bound on alias expansion rounds; a self-referential `let` stops here
/// and leaves its name unresolved.
const MAX_SUBSTITUTION_PASSES: usize = 10;

// ─── Statements ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Stmt {
    Let { name: String, value: Expr },
    If { cond: Expr, body: Vec<Stmt> },
    Return(Expr),
}

/// True when the matcher text uses the `{ ... }` statement form.
pub fn is_block(source: &str) -> bool {
    let trimmed = source.trim();
    trimmed.starts_with('{') && trimmed.ends_with('}')
}

/// Parse a block matcher and lower it to a single expression.
pub fn desugar_block(source: &str) -> Result<Expr, AuthzError> {
    let tokens = tokenize(source)?;
    let mut parser = BlockParser {
        tokens: &tokens,
        pos: 0,
    };
    let stmts = parser.parse_block()?;
    if parser.pos < tokens.len() {
        return Err(AuthzError::InvalidMatcher(format!(
            "unexpected token after block: {:?}",
            tokens[parser.pos]
        )));
    }
    lower(&stmts, HashMap::new())
}

// ─── Parser ─────────────────────────────────────────────────────────────

struct BlockParser<'t> {
    tokens: &'t [Token],
    pos: usize,
}

impl<'t> BlockParser<'t> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn expect(&mut self, expected: Token) -> Result<(), AuthzError> {
        match self.tokens.get(self.pos) {
            Some(tok) if *tok == expected => {
                self.pos += 1;
                Ok(())
            }
            other => Err(AuthzError::InvalidMatcher(format!(
                "expected {expected:?} in block matcher, found {other:?}"
            ))),
        }
    }

    /// block = "{" stmt* "}"
    fn parse_block(&mut self) -> Result<Vec<Stmt>, AuthzError> {
        self.expect(Token::LBrace)?;
        let mut stmts = Vec::new();
        loop {
            match self.peek() {
                Some(Token::RBrace) => {
                    self.pos += 1;
                    return Ok(stmts);
                }
                Some(Token::Semicolon) => self.pos += 1,
                Some(_) => stmts.push(self.parse_stmt()?),
                None => {
                    return Err(AuthzError::InvalidMatcher(
                        "unterminated block matcher, expected `}`".into(),
                    ))
                }
            }
        }
    }

    /// stmt = "let" ident "=" expr | "if" expr block | "return" expr
    fn parse_stmt(&mut self) -> Result<Stmt, AuthzError> {
        match self.peek().cloned() {
            Some(Token::Let) => {
                self.pos += 1;
                let name = match self.tokens.get(self.pos) {
                    Some(Token::Ident(name)) => name.clone(),
                    other => {
                        return Err(AuthzError::InvalidMatcher(format!(
                            "expected a name after `let`, found {other:?}"
                        )))
                    }
                };
                self.pos += 1;
                self.expect(Token::Assign)?;
                let value = self.take_expr(false)?;
                Ok(Stmt::Let { name, value })
            }
            Some(Token::If) => {
                self.pos += 1;
                let cond = self.take_expr(true)?;
                let body = self.parse_block()?;
                Ok(Stmt::If { cond, body })
            }
            Some(Token::Return) => {
                self.pos += 1;
                Ok(Stmt::Return(self.take_expr(false)?))
            }
            other => Err(AuthzError::InvalidMatcher(format!(
                "unexpected token in block matcher: {other:?}"
            ))),
        }
    }

    /// Consume tokens up to the next statement boundary at nesting depth 0
    /// and parse them as one expression.
    fn take_expr(&mut self, until_brace: bool) -> Result<Expr, AuthzError> {
        let start = self.pos;
        let mut depth = 0usize;
        while let Some(tok) = self.peek() {
            match tok {
                Token::LParen | Token::LBracket => depth += 1,
                Token::RParen | Token::RBracket => depth = depth.saturating_sub(1),
                Token::LBrace if depth == 0 && until_brace => break,
                Token::Semicolon | Token::Let | Token::If | Token::Return | Token::RBrace
                    if depth == 0 =>
                {
                    break
                }
                _ => {}
            }
            self.pos += 1;
        }
        parse_tokens(&self.tokens[start..self.pos])
    }
}

// ─── Lowering ───────────────────────────────────────────────────────────

fn lower(stmts: &[Stmt], mut aliases: HashMap<String, Expr>) -> Result<Expr, AuthzError> {
    for (i, stmt) in stmts.iter().enumerate() {
        match stmt {
            Stmt::Let { name, value } => {
                aliases.insert(name.clone(), value.clone());
            }
            Stmt::Return(value) => return Ok(resolve(value, &aliases)),
            Stmt::If { cond, body } => {
                let cond = resolve(cond, &aliases);
                let then = lower(body, aliases.clone())?;
                let rest = lower(&stmts[i + 1..], aliases)?;
                return Ok(Expr::binop(
                    BinOp::Or,
                    Expr::binop(BinOp::And, cond.clone(), then),
                    Expr::binop(BinOp::And, Expr::UnaryNot(Box::new(cond)), rest),
                ));
            }
        }
    }
    Err(AuthzError::InvalidMatcher(
        "block matcher has a path without `return`".into(),
    ))
}

fn resolve(expr: &Expr, aliases: &HashMap<String, Expr>) -> Expr {
    let mut expr = expr.clone();
    let lookup = |name: &str| aliases.get(name).cloned();
    for _ in 0..MAX_SUBSTITUTION_PASSES {
        if !expr.substitute(&lookup) {
            break;
        }
    }
    expr
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::condition::parse_condition;

    #[test]
    fn test_is_block() {
        assert!(is_block("  { return true }  "));
        assert!(!is_block("r.sub == p.sub"));
    }

    #[test]
    fn test_desugar_let_and_if() {
        let expr = desugar_block(
            "{ let role_match = g(r.sub, p.sub) if !role_match { return false } return r.obj == p.obj }",
        )
        .unwrap();
        let expected = parse_condition(
            "((!(g(r.sub, p.sub))) && (false)) || (!(!(g(r.sub, p.sub))) && (r.obj == p.obj))",
        )
        .unwrap();
        assert_eq!(expr, expected);
    }

    #[test]
    fn test_desugar_single_return() {
        let expr = desugar_block("{ return true }").unwrap();
        assert_eq!(expr, parse_condition("true").unwrap());
    }

    #[test]
    fn test_desugar_multiline_with_semicolons() {
        let source = "{\n    let a = r.sub == p.sub;\n    let b = a && r.act == p.act;\n    if b { return true }\n    return false;\n}";
        let expr = desugar_block(source).unwrap();
        let expected = parse_condition(
            "((r.sub == p.sub && r.act == p.act) && true) || (!(r.sub == p.sub && r.act == p.act) && false)",
        )
        .unwrap();
        assert_eq!(expr, expected);
    }

    #[test]
    fn test_first_if_takes_precedence() {
        let expr = desugar_block("{ if a { return 1 } if b { return 2 } return 3 }").unwrap();
        let expected =
            parse_condition("(a && 1) || (!a && ((b && 2) || (!b && 3)))").unwrap();
        assert_eq!(expr, expected);
    }

    #[test]
    fn test_alias_name_is_whole_word() {
        // `ab` must not be touched by the alias `a`
        let expr = desugar_block("{ let a = x return ab == a }").unwrap();
        assert_eq!(expr, parse_condition("ab == x").unwrap());
    }

    #[test]
    fn test_self_referential_alias_terminates() {
        let expr = desugar_block("{ let a = a || b return a }").unwrap();
        let rendered = expr.to_string();
        assert!(rendered.contains('a'));
        assert!(rendered.contains('b'));
    }

    #[test]
    fn test_missing_return_is_error() {
        let err = desugar_block("{ let a = b }").unwrap_err();
        assert!(matches!(err, AuthzError::InvalidMatcher(_)));
    }

    #[test]
    fn test_unterminated_block_is_error() {
        assert!(desugar_block("{ return true").is_err());
    }
}
