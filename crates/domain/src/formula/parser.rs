use super::ast::{BinOp, Expr};
use super::lexer::{lex, Token};
use crate::error::FormulaError;

/// Function names the evaluator knows how to execute. Parsing accepts
/// any identifier as a call target; the evaluator is what actually
/// enforces this allow-list, so `validate` catches unknown calls too
/// by running a dry evaluation over a zero environment.
pub const ALLOWED_FUNCTIONS: &[&str] = &[
    "abs", "round", "min", "max", "pow", "sum", "len", "sqrt", "log", "log10", "log2", "exp",
    "sin", "cos", "tan", "asin", "acos", "atan", "atan2", "degrees", "radians", "floor", "ceil",
    "fabs", "int", "float", "bool",
];

const FORBIDDEN_SUBSTRINGS: &[&str] = &["__"];

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn advance(&mut self) -> Token {
        let tok = self.tokens[self.pos].clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn expect(&mut self, expected: &Token) -> Result<(), FormulaError> {
        if self.peek() == expected {
            self.advance();
            Ok(())
        } else {
            Err(FormulaError::Invalid(format!(
                "expected {expected:?}, found {:?}",
                self.peek()
            )))
        }
    }

    // expr := term (('+'|'-') term)*
    fn parse_expr(&mut self) -> Result<Expr, FormulaError> {
        let mut lhs = self.parse_term()?;
        loop {
            let op = match self.peek() {
                Token::Plus => BinOp::Add,
                Token::Minus => BinOp::Sub,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_term()?;
            lhs = Expr::BinOp(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    // term := factor (('*'|'/'|'%') factor)*
    fn parse_term(&mut self) -> Result<Expr, FormulaError> {
        let mut lhs = self.parse_factor()?;
        loop {
            let op = match self.peek() {
                Token::Star => BinOp::Mul,
                Token::Slash => BinOp::Div,
                Token::Percent => BinOp::Rem,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_factor()?;
            lhs = Expr::BinOp(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    // factor := unary ('**' factor)?  (right-associative)
    fn parse_factor(&mut self) -> Result<Expr, FormulaError> {
        let base = self.parse_unary()?;
        if *self.peek() == Token::StarStar {
            self.advance();
            let exp = self.parse_factor()?;
            return Ok(Expr::BinOp(BinOp::Pow, Box::new(base), Box::new(exp)));
        }
        Ok(base)
    }

    // unary := ('-'|'+')? primary
    fn parse_unary(&mut self) -> Result<Expr, FormulaError> {
        match self.peek() {
            Token::Minus => {
                self.advance();
                Ok(Expr::Neg(Box::new(self.parse_unary()?)))
            }
            Token::Plus => {
                self.advance();
                self.parse_unary()
            }
            _ => self.parse_primary(),
        }
    }

    // primary := NUMBER | IDENT '(' args? ')' | IDENT | '(' expr ')'
    fn parse_primary(&mut self) -> Result<Expr, FormulaError> {
        match self.advance() {
            Token::Num(n) => Ok(Expr::Num(n)),
            Token::Ident(name) => {
                if FORBIDDEN_SUBSTRINGS.iter().any(|f| name.contains(f)) {
                    return Err(FormulaError::Invalid(format!(
                        "identifier '{name}' is not allowed"
                    )));
                }
                if *self.peek() == Token::LParen {
                    self.advance();
                    let mut args = Vec::new();
                    if *self.peek() != Token::RParen {
                        args.push(self.parse_expr()?);
                        while *self.peek() == Token::Comma {
                            self.advance();
                            args.push(self.parse_expr()?);
                        }
                    }
                    self.expect(&Token::RParen)?;
                    Ok(Expr::Call(name, args))
                } else {
                    Ok(Expr::Var(name))
                }
            }
            Token::LParen => {
                let inner = self.parse_expr()?;
                self.expect(&Token::RParen)?;
                Ok(inner)
            }
            other => Err(FormulaError::Invalid(format!(
                "unexpected token {other:?}"
            ))),
        }
    }
}

/// Parses a formula expression into an AST. Rejects the literal
/// substring `__` anywhere in an identifier as defense-in-depth, on
/// top of the grammar's structural inability to express attribute
/// access, indexing, or assignment.
pub fn parse(src: &str) -> Result<Expr, FormulaError> {
    if FORBIDDEN_SUBSTRINGS.iter().any(|f| src.contains(f)) {
        return Err(FormulaError::Invalid(
            "formula contains a forbidden substring".into(),
        ));
    }
    let tokens = lex(src)?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_expr()?;
    if parser.peek() != &Token::Eof {
        return Err(FormulaError::Invalid(format!(
            "unexpected trailing token {:?}",
            parser.peek()
        )));
    }
    Ok(expr)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_arithmetic_with_precedence() {
        let expr = parse("val * 2 + 1").unwrap();
        assert_eq!(
            expr,
            Expr::BinOp(
                BinOp::Add,
                Box::new(Expr::BinOp(
                    BinOp::Mul,
                    Box::new(Expr::Var("val".into())),
                    Box::new(Expr::Num(2.0))
                )),
                Box::new(Expr::Num(1.0))
            )
        );
    }

    #[test]
    fn pow_is_right_associative() {
        let expr = parse("2 ** 3 ** 2").unwrap();
        assert_eq!(
            expr,
            Expr::BinOp(
                BinOp::Pow,
                Box::new(Expr::Num(2.0)),
                Box::new(Expr::BinOp(
                    BinOp::Pow,
                    Box::new(Expr::Num(3.0)),
                    Box::new(Expr::Num(2.0))
                ))
            )
        );
    }

    #[test]
    fn parses_function_call_with_args() {
        let expr = parse("max(val, 0)").unwrap();
        assert_eq!(
            expr,
            Expr::Call("max".into(), vec![Expr::Var("val".into()), Expr::Num(0.0)])
        );
    }

    #[test]
    fn parses_parenthesized_expression() {
        let expr = parse("(val + 1) * 2").unwrap();
        assert_eq!(
            expr,
            Expr::BinOp(
                BinOp::Mul,
                Box::new(Expr::BinOp(
                    BinOp::Add,
                    Box::new(Expr::Var("val".into())),
                    Box::new(Expr::Num(1.0))
                )),
                Box::new(Expr::Num(2.0))
            )
        );
    }

    #[test]
    fn rejects_dunder_identifiers() {
        assert!(parse("__import__('os')").is_err());
    }

    #[test]
    fn rejects_unbalanced_parens() {
        assert!(parse("(val + 1").is_err());
    }

    #[test]
    fn rejects_trailing_garbage() {
        assert!(parse("val + 1)").is_err());
    }
}
