use std::collections::HashSet;

use crate::ast::{Expr, ExprKind, Keyword, NameCtx, Operand, Stmt, StmtKind};

/// The name templates use to reach the loop metadata object.
pub const LOOP_NAME: &str = "loop";
/// Internal alias the metadata references are rewritten to, so nested and
/// recursive loop invocations cannot collide with an outer loop's metadata.
pub const LOOP_ALIAS: &str = "l_loop";

/// Per-scope compiler state accompanying one nesting level of traversal.
#[derive(Debug, Clone, Default)]
pub struct Frame {
    /// Identifier of the active accumulation buffer, if any. `None` means
    /// output is emitted directly into the stream.
    pub buffer: Option<String>,
    /// Output in this scope must be wrapped in a runtime top-level-render
    /// check, because the template may be extended by another.
    pub require_output_check: bool,
    pub toplevel: bool,
    /// Names declared in this scope so far.
    pub declared: HashSet<String>,
}

impl Frame {
    pub fn new() -> Self {
        Frame {
            toplevel: true,
            ..Frame::default()
        }
    }

    /// Copy for a soft scope (branch or loop body): inherits everything but
    /// is no longer top level.
    pub fn soft(&self) -> Self {
        let mut frame = self.clone();
        frame.toplevel = false;
        frame
    }

    /// Fresh frame for a nested function scope (macro or call block body).
    pub fn inner(&self) -> Self {
        Frame {
            buffer: self.buffer.clone(),
            require_output_check: false,
            toplevel: false,
            declared: HashSet::new(),
        }
    }
}

/// Names bound by an assignment or loop target expression.
pub fn bound_names(target: &Expr) -> Vec<String> {
    match &target.kind {
        ExprKind::Name { name, .. } => vec![name.clone()],
        ExprKind::Tuple(items) | ExprKind::List(items) => {
            items.iter().flat_map(bound_names).collect()
        }
        _ => Vec::new(),
    }
}

fn child_exprs<'a>(expr: &'a Expr) -> Vec<&'a Expr> {
    match &expr.kind {
        ExprKind::Name { .. } | ExprKind::Const(_) | ExprKind::ExtensionAttribute { .. } => {
            Vec::new()
        }
        ExprKind::List(items) | ExprKind::Tuple(items) | ExprKind::Concat(items) => {
            items.iter().collect()
        }
        ExprKind::BinOp { left, right, .. } => vec![left, right],
        ExprKind::UnaryOp { operand, .. } => vec![operand],
        ExprKind::Compare { expr, ops } => {
            let mut children: Vec<&Expr> = vec![expr];
            children.extend(ops.iter().map(|operand| &operand.expr));
            children
        }
        ExprKind::Getattr { node, .. } => vec![node],
        ExprKind::Getitem { node, arg } => vec![node, arg],
        ExprKind::Slice { start, stop, step } => [start, stop, step]
            .into_iter()
            .flatten()
            .map(Box::as_ref)
            .collect(),
        ExprKind::CondExpr { test, expr1, expr2 } => {
            let mut children: Vec<&Expr> = vec![test, expr1];
            if let Some(expr2) = expr2 {
                children.push(expr2);
            }
            children
        }
        ExprKind::Call {
            node,
            args,
            kwargs,
            dyn_args,
            dyn_kwargs,
        } => {
            let mut children: Vec<&Expr> = vec![node];
            children.extend(args.iter());
            children.extend(kwargs.iter().map(|keyword| &keyword.value));
            children.extend(dyn_args.iter().map(Box::as_ref));
            children.extend(dyn_kwargs.iter().map(Box::as_ref));
            children
        }
    }
}

fn expr_find_store(expr: &Expr, name: &str) -> Option<usize> {
    if let ExprKind::Name {
        name: bound,
        ctx: NameCtx::Store,
    } = &expr.kind
        && bound == name
    {
        return Some(expr.lineno);
    }
    child_exprs(expr)
        .into_iter()
        .find_map(|child| expr_find_store(child, name))
}

/// Line of the first store-context reference to `name` anywhere in the
/// statement, or `None`.
pub fn find_store(stmt: &Stmt, name: &str) -> Option<usize> {
    let from_block =
        |body: &[Stmt]| -> Option<usize> { body.iter().find_map(|stmt| find_store(stmt, name)) };
    match &stmt.kind {
        StmtKind::For {
            target,
            iter,
            body,
            else_body,
            test,
            ..
        } => expr_find_store(target, name)
            .or_else(|| expr_find_store(iter, name))
            .or_else(|| test.as_ref().and_then(|test| expr_find_store(test, name)))
            .or_else(|| from_block(body))
            .or_else(|| from_block(else_body)),
        StmtKind::If {
            test,
            body,
            else_body,
        } => expr_find_store(test, name)
            .or_else(|| from_block(body))
            .or_else(|| from_block(else_body)),
        StmtKind::Assign { target, value } => {
            expr_find_store(target, name).or_else(|| expr_find_store(value, name))
        }
        StmtKind::Output(nodes) => nodes.iter().find_map(|node| expr_find_store(node, name)),
        StmtKind::Macro { body, .. } => from_block(body),
        StmtKind::CallBlock { call, body, .. } => {
            expr_find_store(call, name).or_else(|| from_block(body))
        }
    }
}

fn is_loop_load(expr: &Expr) -> bool {
    matches!(
        &expr.kind,
        ExprKind::Name {
            name,
            ctx: NameCtx::Load,
        } if name == LOOP_NAME
    )
}

/// Copy-rewrites load-context references to the loop-metadata name that are
/// reached through attribute access (`loop.index` and friends) to the
/// internal alias. Bare `loop(...)` calls are untouched so recursive loop
/// invocations keep their meaning. The input tree is never mutated.
pub fn alias_loop_expr(expr: &Expr) -> Expr {
    let kind = match &expr.kind {
        ExprKind::Getattr { node, attr } => {
            let node = if is_loop_load(node) {
                Expr::new(
                    ExprKind::Name {
                        name: LOOP_ALIAS.to_string(),
                        ctx: NameCtx::Load,
                    },
                    node.lineno,
                )
            } else {
                alias_loop_expr(node)
            };
            ExprKind::Getattr {
                node: Box::new(node),
                attr: attr.clone(),
            }
        }
        ExprKind::Name { name, ctx } => ExprKind::Name {
            name: name.clone(),
            ctx: *ctx,
        },
        ExprKind::Const(value) => ExprKind::Const(value.clone()),
        ExprKind::ExtensionAttribute { identifier, name } => ExprKind::ExtensionAttribute {
            identifier: identifier.clone(),
            name: name.clone(),
        },
        ExprKind::List(items) => ExprKind::List(items.iter().map(alias_loop_expr).collect()),
        ExprKind::Tuple(items) => ExprKind::Tuple(items.iter().map(alias_loop_expr).collect()),
        ExprKind::Concat(items) => ExprKind::Concat(items.iter().map(alias_loop_expr).collect()),
        ExprKind::BinOp { op, left, right } => ExprKind::BinOp {
            op: *op,
            left: Box::new(alias_loop_expr(left)),
            right: Box::new(alias_loop_expr(right)),
        },
        ExprKind::UnaryOp { op, operand } => ExprKind::UnaryOp {
            op: *op,
            operand: Box::new(alias_loop_expr(operand)),
        },
        ExprKind::Compare { expr, ops } => ExprKind::Compare {
            expr: Box::new(alias_loop_expr(expr)),
            ops: ops
                .iter()
                .map(|operand| Operand {
                    op: operand.op,
                    expr: alias_loop_expr(&operand.expr),
                })
                .collect(),
        },
        ExprKind::Getitem { node, arg } => ExprKind::Getitem {
            node: Box::new(alias_loop_expr(node)),
            arg: Box::new(alias_loop_expr(arg)),
        },
        ExprKind::Slice { start, stop, step } => {
            let map = |part: &Option<Box<Expr>>| {
                part.as_ref().map(|expr| Box::new(alias_loop_expr(expr)))
            };
            ExprKind::Slice {
                start: map(start),
                stop: map(stop),
                step: map(step),
            }
        }
        ExprKind::CondExpr { test, expr1, expr2 } => ExprKind::CondExpr {
            test: Box::new(alias_loop_expr(test)),
            expr1: Box::new(alias_loop_expr(expr1)),
            expr2: expr2.as_ref().map(|expr| Box::new(alias_loop_expr(expr))),
        },
        ExprKind::Call {
            node,
            args,
            kwargs,
            dyn_args,
            dyn_kwargs,
        } => ExprKind::Call {
            node: Box::new(alias_loop_expr(node)),
            args: args.iter().map(alias_loop_expr).collect(),
            kwargs: kwargs
                .iter()
                .map(|keyword| Keyword {
                    key: keyword.key.clone(),
                    value: alias_loop_expr(&keyword.value),
                    lineno: keyword.lineno,
                })
                .collect(),
            dyn_args: dyn_args.as_ref().map(|expr| Box::new(alias_loop_expr(expr))),
            dyn_kwargs: dyn_kwargs
                .as_ref()
                .map(|expr| Box::new(alias_loop_expr(expr))),
        },
    };
    Expr::new(kind, expr.lineno)
}

pub fn alias_loop_stmt(stmt: &Stmt) -> Stmt {
    let alias_block = |body: &[Stmt]| body.iter().map(alias_loop_stmt).collect::<Vec<_>>();
    let kind = match &stmt.kind {
        StmtKind::For {
            target,
            iter,
            body,
            else_body,
            test,
            recursive,
        } => StmtKind::For {
            target: alias_loop_expr(target),
            iter: alias_loop_expr(iter),
            body: alias_block(body),
            else_body: alias_block(else_body),
            test: test.as_ref().map(alias_loop_expr),
            recursive: *recursive,
        },
        StmtKind::If {
            test,
            body,
            else_body,
        } => StmtKind::If {
            test: alias_loop_expr(test),
            body: alias_block(body),
            else_body: alias_block(else_body),
        },
        StmtKind::Assign { target, value } => StmtKind::Assign {
            target: alias_loop_expr(target),
            value: alias_loop_expr(value),
        },
        StmtKind::Output(nodes) => StmtKind::Output(nodes.iter().map(alias_loop_expr).collect()),
        StmtKind::Macro { name, args, body } => StmtKind::Macro {
            name: name.clone(),
            args: args.clone(),
            body: alias_block(body),
        },
        StmtKind::CallBlock { call, args, body } => StmtKind::CallBlock {
            call: alias_loop_expr(call),
            args: args.clone(),
            body: alias_block(body),
        },
    };
    Stmt::new(kind, stmt.lineno)
}

fn expr_references(expr: &Expr, name: &str, declared: &HashSet<String>) -> bool {
    if let ExprKind::Name {
        name: referenced,
        ctx: NameCtx::Load,
    } = &expr.kind
    {
        return referenced == name && !declared.contains(referenced.as_str());
    }
    child_exprs(expr)
        .into_iter()
        .any(|child| expr_references(child, name, declared))
}

fn declare_target(target: &Expr, declared: &mut HashSet<String>) {
    for bound in bound_names(target) {
        declared.insert(bound);
    }
}

fn stmt_references(stmt: &Stmt, name: &str, declared: &mut HashSet<String>) -> bool {
    match &stmt.kind {
        StmtKind::Assign { target, value } => {
            if expr_references(value, name, declared) {
                return true;
            }
            declare_target(target, declared);
            false
        }
        StmtKind::For {
            target,
            iter,
            body,
            else_body,
            test,
            ..
        } => {
            if expr_references(iter, name, declared) {
                return true;
            }
            let mut inner = declared.clone();
            declare_target(target, &mut inner);
            if let Some(test) = test
                && expr_references(test, name, &inner)
            {
                return true;
            }
            block_references(body, name, &mut inner)
                || block_references(else_body, name, &mut declared.clone())
        }
        StmtKind::If {
            test,
            body,
            else_body,
        } => {
            expr_references(test, name, declared)
                || block_references(body, name, &mut declared.clone())
                || block_references(else_body, name, &mut declared.clone())
        }
        StmtKind::Output(nodes) => nodes
            .iter()
            .any(|node| expr_references(node, name, declared)),
        StmtKind::Macro {
            name: macro_name,
            args,
            body,
        } => {
            let mut inner = declared.clone();
            inner.extend(args.iter().cloned());
            let referenced = block_references(body, name, &mut inner);
            declared.insert(macro_name.clone());
            referenced
        }
        StmtKind::CallBlock { call, args, body } => {
            if expr_references(call, name, declared) {
                return true;
            }
            let mut inner = declared.clone();
            inner.extend(args.iter().cloned());
            block_references(body, name, &mut inner)
        }
    }
}

fn block_references(body: &[Stmt], name: &str, declared: &mut HashSet<String>) -> bool {
    body.iter().any(|stmt| stmt_references(stmt, name, declared))
}

/// Whether the statements reference `name` as a free (undeclared) name.
/// Drives special-mode detection for the loop metadata alias.
pub fn references_undeclared(body: &[Stmt], name: &str) -> bool {
    let mut declared = HashSet::new();
    block_references(body, name, &mut declared)
}
