//! Syntax tree consumed by the code generator.
//!
//! Expression nodes are built by the expression parser in this crate;
//! statement nodes come from an external template frontend and are owned
//! read-only for the duration of one compilation.

/// Whether a name reference reads a binding or establishes one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameCtx {
    Load,
    Store,
}

/// A compile-time constant value, the result of folding an expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    None,
    List(Vec<Value>),
}

impl Value {
    /// The literal text a rendered template would show for this value,
    /// following the target language's string conversion: numbers in decimal
    /// form, `null` for none, lists flattened with commas.
    pub fn output_text(&self) -> String {
        match self {
            Value::Str(text) => text.clone(),
            Value::Int(value) => value.to_string(),
            Value::Float(value) => format!("{value}"),
            Value::Bool(value) => if *value { "true" } else { "false" }.to_string(),
            Value::None => "null".to_string(),
            Value::List(items) => items
                .iter()
                .map(Value::output_text)
                .collect::<Vec<_>>()
                .join(","),
        }
    }

    /// Source-language truthiness, used when folding logical operators.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Str(text) => !text.is_empty(),
            Value::Int(value) => *value != 0,
            Value::Float(value) => *value != 0.0,
            Value::Bool(value) => *value,
            Value::None => false,
            Value::List(items) => !items.is_empty(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
    And,
    Or,
}

impl BinOp {
    /// Source-language operator symbol, used as the sandbox interception key.
    pub fn symbol(&self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::FloorDiv => "//",
            BinOp::Mod => "%",
            BinOp::Pow => "**",
            BinOp::And => "and",
            BinOp::Or => "or",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
    Pos,
}

impl UnaryOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            UnaryOp::Not => "not",
            UnaryOp::Neg => "-",
            UnaryOp::Pos => "+",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    LtEq,
    Gt,
    GtEq,
    In,
    NotIn,
}

impl CmpOp {
    pub fn is_membership(&self) -> bool {
        matches!(self, CmpOp::In | CmpOp::NotIn)
    }
}

/// One (operator, right-hand expression) pair inside a Compare node.
///
/// The parser guarantees that a single Compare node holds either only
/// membership operands or only relational operands, never both; the code
/// generator relies on that invariant.
#[derive(Debug, Clone, PartialEq)]
pub struct Operand {
    pub op: CmpOp,
    pub expr: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Keyword {
    pub key: String,
    pub value: Expr,
    pub lineno: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub lineno: usize,
}

impl Expr {
    pub fn new(kind: ExprKind, lineno: usize) -> Self {
        Self { kind, lineno }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Name {
        name: String,
        ctx: NameCtx,
    },
    Const(Value),
    List(Vec<Expr>),
    Tuple(Vec<Expr>),
    BinOp {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    UnaryOp {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    /// String concatenation of all operands (`~` in the source language).
    Concat(Vec<Expr>),
    Compare {
        expr: Box<Expr>,
        ops: Vec<Operand>,
    },
    Getattr {
        node: Box<Expr>,
        attr: String,
    },
    /// Subscript; `arg` is a `Slice` node for slice syntax.
    Getitem {
        node: Box<Expr>,
        arg: Box<Expr>,
    },
    Slice {
        start: Option<Box<Expr>>,
        stop: Option<Box<Expr>>,
        step: Option<Box<Expr>>,
    },
    CondExpr {
        test: Box<Expr>,
        expr1: Box<Expr>,
        expr2: Option<Box<Expr>>,
    },
    Call {
        node: Box<Expr>,
        args: Vec<Expr>,
        kwargs: Vec<Keyword>,
        dyn_args: Option<Box<Expr>>,
        dyn_kwargs: Option<Box<Expr>>,
    },
    /// Reference to a host-provided callable; calls through it go via the
    /// context rather than direct target-language call syntax.
    ExtensionAttribute {
        identifier: String,
        name: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub kind: StmtKind,
    pub lineno: usize,
}

impl Stmt {
    pub fn new(kind: StmtKind, lineno: usize) -> Self {
        Self { kind, lineno }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    For {
        target: Expr,
        iter: Expr,
        body: Vec<Stmt>,
        else_body: Vec<Stmt>,
        test: Option<Expr>,
        recursive: bool,
    },
    If {
        test: Expr,
        body: Vec<Stmt>,
        else_body: Vec<Stmt>,
    },
    Assign {
        target: Expr,
        value: Expr,
    },
    /// Mixed literal-text and dynamic-expression output fragments.
    Output(Vec<Expr>),
    Macro {
        name: String,
        args: Vec<String>,
        body: Vec<Stmt>,
    },
    CallBlock {
        call: Expr,
        args: Vec<String>,
        body: Vec<Stmt>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    pub body: Vec<Stmt>,
}

/// Signal that an expression has no compile-time constant value. Recovered
/// locally by the output engine; never surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Impossible;

impl Expr {
    /// Attempts compile-time evaluation. Anything that could differ at
    /// runtime, overflow, or divide by zero yields `Impossible`.
    pub fn as_const(&self) -> Result<Value, Impossible> {
        match &self.kind {
            ExprKind::Const(value) => Ok(value.clone()),
            ExprKind::List(items) | ExprKind::Tuple(items) => Ok(Value::List(
                items
                    .iter()
                    .map(Expr::as_const)
                    .collect::<Result<Vec<_>, _>>()?,
            )),
            ExprKind::Concat(nodes) => {
                let mut text = String::new();
                for node in nodes {
                    text.push_str(&node.as_const()?.output_text());
                }
                Ok(Value::Str(text))
            }
            ExprKind::UnaryOp { op, operand } => fold_unaryop(*op, &operand.as_const()?),
            ExprKind::BinOp { op, left, right } => {
                let left = left.as_const()?;
                if *op == BinOp::And {
                    let right = right.as_const()?;
                    return Ok(if left.is_truthy() { right } else { left });
                }
                if *op == BinOp::Or {
                    let right = right.as_const()?;
                    return Ok(if left.is_truthy() { left } else { right });
                }
                fold_binop(*op, &left, &right.as_const()?)
            }
            ExprKind::CondExpr { test, expr1, expr2 } => {
                if test.as_const()?.is_truthy() {
                    expr1.as_const()
                } else {
                    match expr2 {
                        Some(expr2) => expr2.as_const(),
                        None => Err(Impossible),
                    }
                }
            }
            _ => Err(Impossible),
        }
    }
}

fn fold_unaryop(op: UnaryOp, value: &Value) -> Result<Value, Impossible> {
    match (op, value) {
        (UnaryOp::Not, value) => Ok(Value::Bool(!value.is_truthy())),
        (UnaryOp::Neg, Value::Int(value)) => value.checked_neg().map(Value::Int).ok_or(Impossible),
        (UnaryOp::Neg, Value::Float(value)) => Ok(Value::Float(-value)),
        (UnaryOp::Pos, Value::Int(value)) => Ok(Value::Int(*value)),
        (UnaryOp::Pos, Value::Float(value)) => Ok(Value::Float(*value)),
        _ => Err(Impossible),
    }
}

fn fold_binop(op: BinOp, left: &Value, right: &Value) -> Result<Value, Impossible> {
    if let (Value::Str(left), BinOp::Add, Value::Str(right)) = (left, op, right) {
        return Ok(Value::Str(format!("{left}{right}")));
    }

    if let (Value::Int(left), Value::Int(right)) = (left, right) {
        let (left, right) = (*left, *right);
        return match op {
            BinOp::Add => left.checked_add(right).map(Value::Int).ok_or(Impossible),
            BinOp::Sub => left.checked_sub(right).map(Value::Int).ok_or(Impossible),
            BinOp::Mul => left.checked_mul(right).map(Value::Int).ok_or(Impossible),
            BinOp::Div => {
                if right == 0 {
                    Err(Impossible)
                } else {
                    Ok(Value::Float(left as f64 / right as f64))
                }
            }
            BinOp::FloorDiv => {
                if right == 0 {
                    Err(Impossible)
                } else {
                    Ok(Value::Int((left as f64 / right as f64).floor() as i64))
                }
            }
            BinOp::Mod => {
                if right == 0 {
                    Err(Impossible)
                } else {
                    Ok(Value::Int(((left % right) + right) % right))
                }
            }
            BinOp::Pow => {
                let exponent = u32::try_from(right).map_err(|_| Impossible)?;
                left.checked_pow(exponent).map(Value::Int).ok_or(Impossible)
            }
            BinOp::And | BinOp::Or => Err(Impossible),
        };
    }

    let (left, right) = match (as_float(left), as_float(right)) {
        (Some(left), Some(right)) => (left, right),
        _ => return Err(Impossible),
    };
    let value = match op {
        BinOp::Add => left + right,
        BinOp::Sub => left - right,
        BinOp::Mul => left * right,
        BinOp::Div | BinOp::FloorDiv if right == 0.0 => return Err(Impossible),
        BinOp::Div => left / right,
        BinOp::FloorDiv => (left / right).floor(),
        BinOp::Mod if right == 0.0 => return Err(Impossible),
        BinOp::Mod => left.rem_euclid(right),
        BinOp::Pow => left.powf(right),
        BinOp::And | BinOp::Or => return Err(Impossible),
    };
    if value.is_finite() {
        Ok(Value::Float(value))
    } else {
        Err(Impossible)
    }
}

fn as_float(value: &Value) -> Option<f64> {
    match value {
        Value::Int(value) => Some(*value as f64),
        Value::Float(value) => Some(*value),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn constant(value: Value) -> Expr {
        Expr::new(ExprKind::Const(value), 1)
    }

    #[test]
    fn folds_concat_of_constants() {
        let expr = Expr::new(
            ExprKind::Concat(vec![
                constant(Value::Str("a".to_string())),
                constant(Value::Int(7)),
            ]),
            1,
        );
        assert_eq!(expr.as_const(), Ok(Value::Str("a7".to_string())));
    }

    #[test]
    fn folds_arithmetic() {
        let expr = Expr::new(
            ExprKind::BinOp {
                op: BinOp::FloorDiv,
                left: Box::new(constant(Value::Int(-7))),
                right: Box::new(constant(Value::Int(2))),
            },
            1,
        );
        assert_eq!(expr.as_const(), Ok(Value::Int(-4)));
    }

    #[test]
    fn division_by_zero_is_impossible() {
        let expr = Expr::new(
            ExprKind::BinOp {
                op: BinOp::Div,
                left: Box::new(constant(Value::Int(1))),
                right: Box::new(constant(Value::Int(0))),
            },
            1,
        );
        assert_eq!(expr.as_const(), Err(Impossible));
    }

    #[test]
    fn names_are_not_constant() {
        let expr = Expr::new(
            ExprKind::Name {
                name: "x".to_string(),
                ctx: NameCtx::Load,
            },
            1,
        );
        assert_eq!(expr.as_const(), Err(Impossible));
    }

    #[test]
    fn conditional_without_else_on_false_test_is_impossible() {
        let expr = Expr::new(
            ExprKind::CondExpr {
                test: Box::new(constant(Value::Bool(false))),
                expr1: Box::new(constant(Value::Int(1))),
                expr2: None,
            },
            1,
        );
        assert_eq!(expr.as_const(), Err(Impossible));
    }

    #[test]
    fn float_output_text_is_decimal() {
        assert_eq!(Value::Float(1e21).output_text(), "1000000000000000000000");
        assert_eq!(Value::Float(2.5).output_text(), "2.5");
    }
}
