use thiserror::Error;

use crate::ast::{BinOp, CmpOp, Expr, ExprKind, Keyword, NameCtx, Operand, UnaryOp, Value};
use crate::lexer::{LexError, Lexer};
use crate::token::{Token, TokenKind};

#[derive(Debug, Error, Clone, PartialEq)]
#[error("{message} at line {line}")]
pub struct ParseError {
    pub message: String,
    pub line: usize,
}

impl ParseError {
    fn new(message: impl Into<String>, line: usize) -> Self {
        Self {
            message: message.into(),
            line,
        }
    }
}

impl From<LexError> for ParseError {
    fn from(error: LexError) -> Self {
        ParseError::new(error.to_string(), error.line())
    }
}

type PResult<T> = Result<T, ParseError>;

/// Recursive-descent parser for the expression grammar.
///
/// `parse_compare` deviates from a conventional comparison parser: chains
/// that mix relational operators with membership tests are restructured into
/// nested Compare nodes, because the target language translates the two kinds
/// with incompatible idioms (infix operator vs. array scan). Every Compare
/// node it produces holds operands of a single category.
pub struct Parser<'a> {
    lexer: Lexer<'a>,
    current: Token<'a>,
    peeked: Option<Token<'a>>,
}

impl<'a> Parser<'a> {
    pub fn new(input: &'a str) -> PResult<Self> {
        let mut lexer = Lexer::new(input);
        let current = lexer.next_token()?;
        Ok(Self {
            lexer,
            current,
            peeked: None,
        })
    }

    pub fn parse_expression(&mut self) -> PResult<Expr> {
        self.parse_condexpr()
    }

    fn parse_condexpr(&mut self) -> PResult<Expr> {
        let lineno = self.line();
        let mut expr1 = self.parse_or()?;
        while matches!(self.current.kind, TokenKind::If) {
            self.advance()?;
            let test = self.parse_or()?;
            let expr2 = if matches!(self.current.kind, TokenKind::Else) {
                self.advance()?;
                Some(Box::new(self.parse_condexpr()?))
            } else {
                None
            };
            expr1 = Expr::new(
                ExprKind::CondExpr {
                    test: Box::new(test),
                    expr1: Box::new(expr1),
                    expr2,
                },
                lineno,
            );
        }
        Ok(expr1)
    }

    fn parse_or(&mut self) -> PResult<Expr> {
        let lineno = self.line();
        let mut left = self.parse_and()?;
        while matches!(self.current.kind, TokenKind::Or) {
            self.advance()?;
            let right = self.parse_and()?;
            left = binop(BinOp::Or, left, right, lineno);
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> PResult<Expr> {
        let lineno = self.line();
        let mut left = self.parse_not()?;
        while matches!(self.current.kind, TokenKind::And) {
            self.advance()?;
            let right = self.parse_not()?;
            left = binop(BinOp::And, left, right, lineno);
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> PResult<Expr> {
        if matches!(self.current.kind, TokenKind::Not)
            && !matches!(self.peek()?.kind, TokenKind::In)
        {
            let lineno = self.line();
            self.advance()?;
            let operand = self.parse_not()?;
            return Ok(Expr::new(
                ExprKind::UnaryOp {
                    op: UnaryOp::Not,
                    operand: Box::new(operand),
                },
                lineno,
            ));
        }
        self.parse_compare()
    }

    /// The comparison grammar extension: membership tests and relational
    /// operators never share one Compare node. A mode switch closes the
    /// pending node and starts a new one whose left operand is the previous
    /// Compare, producing a left-deep tree for alternating chains.
    fn parse_compare(&mut self) -> PResult<Expr> {
        let mut lineno = self.line();
        let mut expr = self.parse_add()?;
        let mut ops: Vec<Operand> = Vec::new();
        let mut is_compare = relational_op(&self.current.kind).is_some();
        loop {
            if let Some(op) = relational_op(&self.current.kind) {
                self.advance()?;
                ops.push(Operand {
                    op,
                    expr: self.parse_add()?,
                });
                is_compare = true;
            } else if matches!(self.current.kind, TokenKind::In) {
                self.advance()?;
                expr = self.close_membership(expr, ops, is_compare, CmpOp::In, lineno)?;
                ops = Vec::new();
                is_compare = false;
            } else if matches!(self.current.kind, TokenKind::Not)
                && matches!(self.peek()?.kind, TokenKind::In)
            {
                self.advance()?;
                self.advance()?;
                expr = self.close_membership(expr, ops, is_compare, CmpOp::NotIn, lineno)?;
                ops = Vec::new();
                is_compare = false;
            } else {
                break;
            }
            lineno = self.line();
        }
        if ops.is_empty() {
            return Ok(expr);
        }
        Ok(Expr::new(
            ExprKind::Compare {
                expr: Box::new(expr),
                ops,
            },
            lineno,
        ))
    }

    /// Closes a pending relational Compare (if any) and wraps it in a fresh
    /// single-operand membership node.
    fn close_membership(
        &mut self,
        mut expr: Expr,
        ops: Vec<Operand>,
        is_compare: bool,
        op: CmpOp,
        lineno: usize,
    ) -> PResult<Expr> {
        if is_compare && !ops.is_empty() {
            expr = Expr::new(
                ExprKind::Compare {
                    expr: Box::new(expr),
                    ops,
                },
                lineno,
            );
        }
        let operand = Operand {
            op,
            expr: self.parse_add()?,
        };
        Ok(Expr::new(
            ExprKind::Compare {
                expr: Box::new(expr),
                ops: vec![operand],
            },
            lineno,
        ))
    }

    fn parse_add(&mut self) -> PResult<Expr> {
        let lineno = self.line();
        let mut left = self.parse_concat()?;
        loop {
            let op = match self.current.kind {
                TokenKind::Plus => BinOp::Add,
                TokenKind::Minus => BinOp::Sub,
                _ => break,
            };
            self.advance()?;
            let right = self.parse_concat()?;
            left = binop(op, left, right, lineno);
        }
        Ok(left)
    }

    fn parse_concat(&mut self) -> PResult<Expr> {
        let lineno = self.line();
        let first = self.parse_mul()?;
        if !matches!(self.current.kind, TokenKind::Tilde) {
            return Ok(first);
        }
        let mut nodes = vec![first];
        while matches!(self.current.kind, TokenKind::Tilde) {
            self.advance()?;
            nodes.push(self.parse_mul()?);
        }
        Ok(Expr::new(ExprKind::Concat(nodes), lineno))
    }

    fn parse_mul(&mut self) -> PResult<Expr> {
        let lineno = self.line();
        let mut left = self.parse_pow()?;
        loop {
            let op = match self.current.kind {
                TokenKind::Star => BinOp::Mul,
                TokenKind::Slash => BinOp::Div,
                TokenKind::FloorDiv => BinOp::FloorDiv,
                TokenKind::Percent => BinOp::Mod,
                _ => break,
            };
            self.advance()?;
            let right = self.parse_pow()?;
            left = binop(op, left, right, lineno);
        }
        Ok(left)
    }

    fn parse_pow(&mut self) -> PResult<Expr> {
        let lineno = self.line();
        let mut left = self.parse_unary()?;
        while matches!(self.current.kind, TokenKind::Pow) {
            self.advance()?;
            let right = self.parse_unary()?;
            left = binop(BinOp::Pow, left, right, lineno);
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> PResult<Expr> {
        let op = match self.current.kind {
            TokenKind::Minus => UnaryOp::Neg,
            TokenKind::Plus => UnaryOp::Pos,
            _ => return self.parse_postfix(),
        };
        let lineno = self.line();
        self.advance()?;
        let operand = self.parse_unary()?;
        Ok(Expr::new(
            ExprKind::UnaryOp {
                op,
                operand: Box::new(operand),
            },
            lineno,
        ))
    }

    fn parse_postfix(&mut self) -> PResult<Expr> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.current.kind {
                TokenKind::Dot => {
                    let lineno = self.line();
                    self.advance()?;
                    let attr = self.expect_identifier()?;
                    expr = Expr::new(
                        ExprKind::Getattr {
                            node: Box::new(expr),
                            attr,
                        },
                        lineno,
                    );
                }
                TokenKind::LBracket => {
                    expr = self.parse_subscript(expr)?;
                }
                TokenKind::LParen => {
                    expr = self.parse_call(expr)?;
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_subscript(&mut self, node: Expr) -> PResult<Expr> {
        let lineno = self.line();
        self.advance()?;

        let start = if matches!(self.current.kind, TokenKind::Colon) {
            None
        } else {
            Some(Box::new(self.parse_expression()?))
        };

        if !matches!(self.current.kind, TokenKind::Colon) {
            self.expect(TokenKind::RBracket, "]")?;
            let arg = match start {
                Some(arg) => arg,
                None => return Err(self.error("subscript expression")),
            };
            return Ok(Expr::new(
                ExprKind::Getitem {
                    node: Box::new(node),
                    arg,
                },
                lineno,
            ));
        }

        self.advance()?;
        let stop = if matches!(self.current.kind, TokenKind::Colon | TokenKind::RBracket) {
            None
        } else {
            Some(Box::new(self.parse_expression()?))
        };
        let step = if matches!(self.current.kind, TokenKind::Colon) {
            self.advance()?;
            if matches!(self.current.kind, TokenKind::RBracket) {
                None
            } else {
                Some(Box::new(self.parse_expression()?))
            }
        } else {
            None
        };
        self.expect(TokenKind::RBracket, "]")?;

        let slice = Expr::new(ExprKind::Slice { start, stop, step }, lineno);
        Ok(Expr::new(
            ExprKind::Getitem {
                node: Box::new(node),
                arg: Box::new(slice),
            },
            lineno,
        ))
    }

    fn parse_call(&mut self, node: Expr) -> PResult<Expr> {
        let lineno = self.line();
        self.advance()?;

        let mut args = Vec::new();
        let mut kwargs: Vec<Keyword> = Vec::new();
        let mut dyn_args = None;
        let mut dyn_kwargs = None;

        while !matches!(self.current.kind, TokenKind::RParen) {
            if !args.is_empty() || !kwargs.is_empty() || dyn_args.is_some() || dyn_kwargs.is_some()
            {
                self.expect(TokenKind::Comma, ",")?;
                if matches!(self.current.kind, TokenKind::RParen) {
                    break;
                }
            }
            if matches!(self.current.kind, TokenKind::Star) {
                self.advance()?;
                if dyn_args.is_some() {
                    return Err(self.invalid_call(lineno));
                }
                dyn_args = Some(Box::new(self.parse_expression()?));
            } else if matches!(self.current.kind, TokenKind::Pow) {
                self.advance()?;
                if dyn_kwargs.is_some() {
                    return Err(self.invalid_call(lineno));
                }
                dyn_kwargs = Some(Box::new(self.parse_expression()?));
            } else if matches!(self.current.kind, TokenKind::Identifier(_))
                && matches!(self.peek()?.kind, TokenKind::Assign)
            {
                let key_line = self.line();
                let key = self.expect_identifier()?;
                self.advance()?;
                let value = self.parse_expression()?;
                kwargs.push(Keyword {
                    key,
                    value,
                    lineno: key_line,
                });
            } else {
                if !kwargs.is_empty() || dyn_args.is_some() || dyn_kwargs.is_some() {
                    return Err(self.invalid_call(lineno));
                }
                args.push(self.parse_expression()?);
            }
        }
        self.expect(TokenKind::RParen, ")")?;

        Ok(Expr::new(
            ExprKind::Call {
                node: Box::new(node),
                args,
                kwargs,
                dyn_args,
                dyn_kwargs,
            },
            lineno,
        ))
    }

    fn parse_primary(&mut self) -> PResult<Expr> {
        let lineno = self.line();
        match self.current.kind {
            TokenKind::Identifier(name) => {
                let name = name.to_string();
                self.advance()?;
                Ok(Expr::new(
                    ExprKind::Name {
                        name,
                        ctx: NameCtx::Load,
                    },
                    lineno,
                ))
            }
            TokenKind::Integer(value) => {
                self.advance()?;
                Ok(Expr::new(ExprKind::Const(Value::Int(value)), lineno))
            }
            TokenKind::Float(value) => {
                self.advance()?;
                Ok(Expr::new(ExprKind::Const(Value::Float(value)), lineno))
            }
            TokenKind::String(raw) => {
                let text = unescape(raw);
                self.advance()?;
                Ok(Expr::new(ExprKind::Const(Value::Str(text)), lineno))
            }
            TokenKind::True => {
                self.advance()?;
                Ok(Expr::new(ExprKind::Const(Value::Bool(true)), lineno))
            }
            TokenKind::False => {
                self.advance()?;
                Ok(Expr::new(ExprKind::Const(Value::Bool(false)), lineno))
            }
            TokenKind::None => {
                self.advance()?;
                Ok(Expr::new(ExprKind::Const(Value::None), lineno))
            }
            TokenKind::LParen => {
                self.advance()?;
                let first = self.parse_expression()?;
                if !matches!(self.current.kind, TokenKind::Comma) {
                    self.expect(TokenKind::RParen, ")")?;
                    return Ok(first);
                }
                let mut items = vec![first];
                while matches!(self.current.kind, TokenKind::Comma) {
                    self.advance()?;
                    if matches!(self.current.kind, TokenKind::RParen) {
                        break;
                    }
                    items.push(self.parse_expression()?);
                }
                self.expect(TokenKind::RParen, ")")?;
                Ok(Expr::new(ExprKind::Tuple(items), lineno))
            }
            TokenKind::LBracket => {
                self.advance()?;
                let mut items = Vec::new();
                while !matches!(self.current.kind, TokenKind::RBracket) {
                    if !items.is_empty() {
                        self.expect(TokenKind::Comma, ",")?;
                        if matches!(self.current.kind, TokenKind::RBracket) {
                            break;
                        }
                    }
                    items.push(self.parse_expression()?);
                }
                self.expect(TokenKind::RBracket, "]")?;
                Ok(Expr::new(ExprKind::List(items), lineno))
            }
            _ => Err(self.error("expression")),
        }
    }

    fn expect_identifier(&mut self) -> PResult<String> {
        if let TokenKind::Identifier(name) = self.current.kind {
            let name = name.to_string();
            self.advance()?;
            Ok(name)
        } else {
            Err(self.error("identifier"))
        }
    }

    fn expect(&mut self, kind: TokenKind<'_>, display: &str) -> PResult<()> {
        if self.current.kind == kind {
            self.advance()?;
            Ok(())
        } else {
            Err(self.error(display))
        }
    }

    fn expect_eof(&mut self) -> PResult<()> {
        if matches!(self.current.kind, TokenKind::EOF) {
            Ok(())
        } else {
            Err(self.error("end of expression"))
        }
    }

    fn advance(&mut self) -> PResult<Token<'a>> {
        let next = match self.peeked.take() {
            Some(token) => token,
            None => self.lexer.next_token()?,
        };
        Ok(std::mem::replace(&mut self.current, next))
    }

    fn peek(&mut self) -> PResult<&Token<'a>> {
        if self.peeked.is_none() {
            self.peeked = Some(self.lexer.next_token()?);
        }
        Ok(self.peeked.as_ref().unwrap_or(&self.current))
    }

    fn line(&self) -> usize {
        self.current.span.line
    }

    fn error(&self, expected: &str) -> ParseError {
        ParseError::new(
            format!("Expected {expected}, got {:?}", self.current.kind),
            self.line(),
        )
    }

    fn invalid_call(&self, lineno: usize) -> ParseError {
        ParseError::new("Invalid syntax for function call expression", lineno)
    }
}

fn binop(op: BinOp, left: Expr, right: Expr, lineno: usize) -> Expr {
    Expr::new(
        ExprKind::BinOp {
            op,
            left: Box::new(left),
            right: Box::new(right),
        },
        lineno,
    )
}

fn relational_op(kind: &TokenKind<'_>) -> Option<CmpOp> {
    match kind {
        TokenKind::Eq => Some(CmpOp::Eq),
        TokenKind::Ne => Some(CmpOp::Ne),
        TokenKind::Lt => Some(CmpOp::Lt),
        TokenKind::LtEq => Some(CmpOp::LtEq),
        TokenKind::Gt => Some(CmpOp::Gt),
        TokenKind::GtEq => Some(CmpOp::GtEq),
        _ => None,
    }
}

fn unescape(raw: &str) -> String {
    let mut text = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(character) = chars.next() {
        if character != '\\' {
            text.push(character);
            continue;
        }
        match chars.next() {
            Some('n') => text.push('\n'),
            Some('r') => text.push('\r'),
            Some('t') => text.push('\t'),
            Some(escaped) => text.push(escaped),
            None => text.push('\\'),
        }
    }
    text
}

/// Parses a single expression, requiring the whole input to be consumed.
pub fn parse_expression(input: &str) -> Result<Expr, ParseError> {
    let mut parser = Parser::new(input)?;
    let expr = parser.parse_expression()?;
    parser.expect_eof()?;
    Ok(expr)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(text: &str) -> Expr {
        Expr::new(
            ExprKind::Name {
                name: text.to_string(),
                ctx: NameCtx::Load,
            },
            1,
        )
    }

    fn compare(expr: Expr, ops: Vec<Operand>) -> Expr {
        Expr::new(
            ExprKind::Compare {
                expr: Box::new(expr),
                ops,
            },
            1,
        )
    }

    fn operand(op: CmpOp, expr: Expr) -> Operand {
        Operand { op, expr }
    }

    #[test]
    fn bare_expression_is_not_wrapped() {
        let expr = parse_expression("a + b").expect("parse failed");
        assert!(matches!(
            expr.kind,
            ExprKind::BinOp {
                op: BinOp::Add,
                ..
            }
        ));
    }

    #[test]
    fn relational_chain_stays_flat() {
        let expr = parse_expression("a < b <= c").expect("parse failed");
        assert_eq!(
            expr,
            compare(
                name("a"),
                vec![
                    operand(CmpOp::Lt, name("b")),
                    operand(CmpOp::LtEq, name("c")),
                ],
            )
        );
    }

    #[test]
    fn membership_produces_single_operand_node() {
        let expr = parse_expression("x in xs").expect("parse failed");
        assert_eq!(expr, compare(name("x"), vec![operand(CmpOp::In, name("xs"))]));
    }

    #[test]
    fn not_in_produces_notin_operand() {
        let expr = parse_expression("x not in xs").expect("parse failed");
        assert_eq!(
            expr,
            compare(name("x"), vec![operand(CmpOp::NotIn, name("xs"))])
        );
    }

    #[test]
    fn relational_then_membership_nests() {
        let expr = parse_expression("a < b in c").expect("parse failed");
        assert_eq!(
            expr,
            compare(
                compare(name("a"), vec![operand(CmpOp::Lt, name("b"))]),
                vec![operand(CmpOp::In, name("c"))],
            )
        );
    }

    #[test]
    fn membership_then_relational_nests() {
        let expr = parse_expression("a in b < c").expect("parse failed");
        assert_eq!(
            expr,
            compare(
                compare(name("a"), vec![operand(CmpOp::In, name("b"))]),
                vec![operand(CmpOp::Lt, name("c"))],
            )
        );
    }

    #[test]
    fn chained_memberships_nest_left_deep() {
        let expr = parse_expression("a in b in c").expect("parse failed");
        assert_eq!(
            expr,
            compare(
                compare(name("a"), vec![operand(CmpOp::In, name("b"))]),
                vec![operand(CmpOp::In, name("c"))],
            )
        );
    }

    #[test]
    fn alternating_chain_keeps_every_node_homogeneous() {
        fn check_homogeneous(expr: &Expr) -> usize {
            match &expr.kind {
                ExprKind::Compare { expr: left, ops } => {
                    let memberships = ops.iter().filter(|o| o.op.is_membership()).count();
                    assert!(
                        memberships == 0 || memberships == ops.len(),
                        "Compare node mixes operand categories: {ops:?}"
                    );
                    let mut total = ops.len() + check_homogeneous(left);
                    for op in ops {
                        total += check_homogeneous(&op.expr);
                    }
                    total
                }
                _ => 0,
            }
        }

        let operators = ["<", "==", "in", "not in"];
        for length in 1..=4 {
            let mut indices = vec![0usize; length];
            loop {
                let mut source = "x0".to_string();
                for (position, &index) in indices.iter().enumerate() {
                    source.push_str(&format!(" {} x{}", operators[index], position + 1));
                }
                let expr = parse_expression(&source).expect("parse failed");
                assert_eq!(
                    check_homogeneous(&expr),
                    length,
                    "operand lost or duplicated for {source:?}"
                );

                let mut position = 0;
                loop {
                    if position == length {
                        break;
                    }
                    indices[position] += 1;
                    if indices[position] < operators.len() {
                        break;
                    }
                    indices[position] = 0;
                    position += 1;
                }
                if position == length {
                    break;
                }
            }
        }
    }

    #[test]
    fn not_binds_looser_than_comparison() {
        let expr = parse_expression("not a in xs").expect("parse failed");
        assert_eq!(
            expr,
            Expr::new(
                ExprKind::UnaryOp {
                    op: UnaryOp::Not,
                    operand: Box::new(compare(
                        name("a"),
                        vec![operand(CmpOp::In, name("xs"))]
                    )),
                },
                1,
            )
        );
    }

    #[test]
    fn parses_slice_forms() {
        let expr = parse_expression("xs[1:9:2]").expect("parse failed");
        let ExprKind::Getitem { arg, .. } = &expr.kind else {
            panic!("expected subscript, got {expr:?}");
        };
        let ExprKind::Slice { start, stop, step } = &arg.kind else {
            panic!("expected slice, got {arg:?}");
        };
        assert!(start.is_some() && stop.is_some() && step.is_some());

        let expr = parse_expression("xs[:5]").expect("parse failed");
        let ExprKind::Getitem { arg, .. } = &expr.kind else {
            panic!("expected subscript, got {expr:?}");
        };
        assert!(matches!(
            &arg.kind,
            ExprKind::Slice {
                start: None,
                stop: Some(_),
                step: None
            }
        ));
    }

    #[test]
    fn parses_call_argument_forms() {
        let expr = parse_expression("f(a, b, key=1, *rest, **extra)").expect("parse failed");
        let ExprKind::Call {
            args,
            kwargs,
            dyn_args,
            dyn_kwargs,
            ..
        } = &expr.kind
        else {
            panic!("expected call, got {expr:?}");
        };
        assert_eq!(args.len(), 2);
        assert_eq!(kwargs.len(), 1);
        assert_eq!(kwargs[0].key, "key");
        assert!(dyn_args.is_some() && dyn_kwargs.is_some());
    }

    #[test]
    fn rejects_positional_after_keyword() {
        let error = parse_expression("f(key=1, b)").expect_err("parse should fail");
        assert!(error.message.contains("function call"));
    }

    #[test]
    fn parses_conditional_expression() {
        let expr = parse_expression("a if ok else b").expect("parse failed");
        assert!(matches!(
            expr.kind,
            ExprKind::CondExpr { expr2: Some(_), .. }
        ));

        let expr = parse_expression("a if ok").expect("parse failed");
        assert!(matches!(expr.kind, ExprKind::CondExpr { expr2: None, .. }));
    }

    #[test]
    fn parses_concat_chain() {
        let expr = parse_expression("a ~ b ~ c").expect("parse failed");
        let ExprKind::Concat(nodes) = &expr.kind else {
            panic!("expected concat, got {expr:?}");
        };
        assert_eq!(nodes.len(), 3);
    }

    #[test]
    fn comparison_operands_are_additive_expressions() {
        let expr = parse_expression("a + 1 in xs").expect("parse failed");
        let ExprKind::Compare { expr: left, ops } = &expr.kind else {
            panic!("expected compare, got {expr:?}");
        };
        assert!(matches!(left.kind, ExprKind::BinOp { .. }));
        assert_eq!(ops.len(), 1);
    }
}
