//! Code generator lowering template syntax trees to embedded-tag template
//! text: statements inside `<% %>`, expression output inside `<%= %>`, with
//! iteration and collection helpers delegated to the `_` runtime object.
//!
//! Generation is a single depth-first pass. Statement tags accumulate
//! pending newlines (coalesced by maximum) and a four-space indentation
//! prefix; literal template text and expression tags flow into the stream
//! verbatim.

use std::io::Write;
use std::mem;

use crate::ast::{
    BinOp, CmpOp, Expr, ExprKind, Keyword, Operand, Stmt, StmtKind, Template, UnaryOp, Value,
};
use crate::environment::Environment;

pub mod error;
pub mod frame;

pub use error::{CompileError, CompileResult};
pub use frame::Frame;

use frame::{LOOP_ALIAS, LOOP_NAME, alias_loop_expr, alias_loop_stmt, bound_names, find_store,
    references_undeclared};

/// Lowers one template to target text.
pub fn generate(template: &Template, environment: &Environment) -> CompileResult<String> {
    let mut generator = CodeGenerator::new(environment);
    let mut frame = Frame::new();
    generator.emit_template(template, &mut frame)?;
    Ok(generator.finish())
}

/// Like [`generate`] but streams the result into a writer.
pub fn generate_into<W: Write>(
    template: &Template,
    environment: &Environment,
    writer: &mut W,
) -> CompileResult<()> {
    let output = generate(template, environment)?;
    writer.write_all(output.as_bytes())?;
    Ok(())
}

/// Lowers a single expression to its target-language text, without any
/// surrounding tag markers.
pub fn generate_expression(expr: &Expr, environment: &Environment) -> CompileResult<String> {
    let mut generator = CodeGenerator::new(environment);
    generator.emit_expression(expr)?;
    Ok(generator.finish())
}

pub struct CodeGenerator<'e> {
    environment: &'e Environment,
    stream: String,
    indentation: usize,
    pending_newlines: usize,
    temporary_counter: usize,
    /// Set when the template is statically known to extend another; output
    /// in checked sections is then dropped instead of guarded.
    pub has_known_extends: bool,
}

impl<'e> CodeGenerator<'e> {
    pub fn new(environment: &'e Environment) -> Self {
        CodeGenerator {
            environment,
            stream: String::new(),
            indentation: 0,
            pending_newlines: 0,
            temporary_counter: 0,
            has_known_extends: false,
        }
    }

    pub fn emit_template(&mut self, template: &Template, frame: &mut Frame) -> CompileResult<()> {
        self.emit_block(&template.body, frame)
    }

    pub fn finish(self) -> String {
        self.stream
    }

    // -- Stream helpers

    fn write(&mut self, text: &str) {
        self.stream.push_str(text);
    }

    /// Queue at least `1 + extra` newlines before the next flushed tag.
    fn newline(&mut self, extra: usize) {
        self.pending_newlines = self.pending_newlines.max(1 + extra);
    }

    fn flush_whitespace(&mut self) {
        for _ in 0..self.pending_newlines {
            self.stream.push('\n');
        }
        for _ in 0..self.indentation {
            self.stream.push_str("    ");
        }
        self.pending_newlines = 0;
    }

    /// Start a statement tag. With `whitespace` the queued newlines and
    /// indentation are flushed first; without it they stay queued.
    fn open_tag(&mut self, x: &str, whitespace: bool) {
        self.newline(0);
        if whitespace {
            self.flush_whitespace();
        }
        self.write("<% ");
        self.write(x);
    }

    fn close_tag(&mut self, x: &str) {
        self.write(x);
        self.write(" %>");
    }

    /// A complete single-fragment statement tag.
    fn tag(&mut self, x: &str, whitespace: bool) {
        self.open_tag(x, whitespace);
        self.close_tag("");
    }

    fn indent(&mut self) {
        self.indentation += 1;
    }

    fn outdent(&mut self) {
        self.indentation = self.indentation.saturating_sub(1);
    }

    fn temporary_identifier(&mut self) -> String {
        self.temporary_counter += 1;
        format!("t_{}", self.temporary_counter)
    }

    /// Run an emitter against an empty stream and hand back what it wrote.
    /// Only safe for expression emission, which never touches the newline or
    /// indentation state.
    fn capture(
        &mut self,
        emit: impl FnOnce(&mut Self) -> CompileResult<()>,
    ) -> CompileResult<String> {
        let saved = mem::take(&mut self.stream);
        let result = emit(self);
        let captured = mem::replace(&mut self.stream, saved);
        result.map(|()| captured)
    }

    // -- Statements

    fn emit_block(&mut self, body: &[Stmt], frame: &mut Frame) -> CompileResult<()> {
        for stmt in body {
            self.emit_statement(stmt, frame)?;
        }
        Ok(())
    }

    pub fn emit_statement(&mut self, stmt: &Stmt, frame: &mut Frame) -> CompileResult<()> {
        match &stmt.kind {
            StmtKind::For {
                target,
                iter,
                body,
                else_body,
                test,
                recursive,
            } => {
                if let Some(lineno) = find_store(stmt, LOOP_NAME) {
                    return Err(CompileError::ReservedBinding { lineno });
                }
                // Loop metadata access goes through a renamed alias so that
                // recursive loop() calls keep their meaning. The rewrite
                // copies; the input tree stays untouched.
                let target = alias_loop_expr(target);
                let iter = alias_loop_expr(iter);
                let body: Vec<Stmt> = body.iter().map(alias_loop_stmt).collect();
                let else_body: Vec<Stmt> = else_body.iter().map(alias_loop_stmt).collect();
                let test = test.as_ref().map(alias_loop_expr);
                self.emit_for(&target, &iter, &body, &else_body, test.as_ref(), *recursive, frame)
            }
            StmtKind::If {
                test,
                body,
                else_body,
            } => self.emit_if(test, body, else_body, frame),
            StmtKind::Assign { target, value } => {
                self.open_tag("var ", false);
                self.emit_expression(target)?;
                self.write(" = ");
                self.emit_expression(value)?;
                self.close_tag("");
                for name in bound_names(target) {
                    frame.declared.insert(name);
                }
                Ok(())
            }
            StmtKind::Output(nodes) => self.emit_output(nodes, frame),
            StmtKind::Macro { name, args, body } => self.emit_macro_body(name, args, body, frame),
            StmtKind::CallBlock { call, args, body } => {
                self.emit_call_block(call, args, body, frame)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn emit_for(
        &mut self,
        target: &Expr,
        iter: &Expr,
        body: &[Stmt],
        else_body: &[Stmt],
        test: Option<&Expr>,
        recursive: bool,
        frame: &mut Frame,
    ) -> CompileResult<()> {
        let special = references_undeclared(body, LOOP_ALIAS);
        let iteration_indicator =
            (!else_body.is_empty()).then(|| self.temporary_identifier());

        if recursive {
            self.tag("var loop = function(iter) {", true);
            self.indent();
        }
        if let Some(indicator) = &iteration_indicator {
            self.tag(&format!("var {indicator} = 1"), true);
        }

        // A filter test on a metadata-using loop must run up front, so the
        // index and length values describe the filtered collection.
        let filtered = match test {
            Some(_) if special => Some(self.temporary_identifier()),
            _ => None,
        };
        if let (Some(filtered), Some(test)) = (&filtered, test) {
            self.open_tag(&format!("var {filtered} = _.filter("), true);
            if recursive {
                self.write("iter");
            } else {
                self.emit_expression(iter)?;
            }
            self.write(", function(");
            self.emit_expression(target)?;
            self.write(") { return ");
            self.emit_expression(test)?;
            self.close_tag(" })");
        }

        self.open_tag("_.each(", true);
        if let Some(filtered) = &filtered {
            self.write(filtered);
        } else if recursive {
            self.write("iter");
        } else {
            self.emit_expression(iter)?;
        }
        self.write(", function(");
        self.emit_expression(target)?;
        self.close_tag(", index0, iter) {");
        self.indent();

        let mut body_frame = frame.soft();
        for name in bound_names(target) {
            body_frame.declared.insert(name);
        }

        if !special && let Some(test) = test {
            self.open_tag("if(!(", true);
            self.emit_expression(test)?;
            self.close_tag(")) { return; }");
        }
        if special {
            self.tag(
                "var l_loop = {index0: index0, index: index0 + 1, first: index0 == 0, length: iter.length}",
                true,
            );
            self.tag("l_loop.revindex = iter.length - l_loop.index0", true);
            self.tag("l_loop.revindex0 = l_loop.revindex - 1", true);
            self.tag("l_loop.last = l_loop.revindex0 == 0", true);
            self.tag(
                "l_loop.cycle = function() { return arguments.length ? arguments[index0 % arguments.length] : '' }",
                true,
            );
            body_frame.declared.insert(LOOP_ALIAS.to_string());
        }

        self.emit_block(body, &mut body_frame)?;
        if let Some(indicator) = &iteration_indicator {
            self.tag(&format!("{indicator} = 0"), true);
        }
        self.outdent();
        self.tag("})", true);

        if let Some(indicator) = &iteration_indicator {
            self.tag(&format!("if({indicator}) {{"), true);
            self.indent();
            self.emit_block(else_body, &mut frame.soft())?;
            self.outdent();
            self.tag("}", true);
        }
        if recursive {
            self.outdent();
            self.tag("}", true);
            self.open_tag("loop(", true);
            self.emit_expression(iter)?;
            self.close_tag(")");
        }
        Ok(())
    }

    fn emit_if(
        &mut self,
        test: &Expr,
        body: &[Stmt],
        else_body: &[Stmt],
        frame: &mut Frame,
    ) -> CompileResult<()> {
        let mut if_frame = frame.soft();
        self.open_tag("if(", false);
        self.emit_expression(test)?;
        self.close_tag(") {");
        self.indent();
        self.emit_block(body, &mut if_frame)?;
        self.outdent();
        self.open_tag("}", true);
        if !else_body.is_empty() {
            self.close_tag(" else {");
            self.indent();
            self.emit_block(else_body, &mut if_frame)?;
            self.outdent();
            self.open_tag("}", true);
        }
        self.close_tag("");
        Ok(())
    }

    fn emit_output(&mut self, nodes: &[Expr], frame: &Frame) -> CompileResult<()> {
        // A statically known extends drops checked output entirely.
        if self.has_known_extends && frame.require_output_check {
            return Ok(());
        }
        let outdent_later = frame.require_output_check;
        if outdent_later {
            self.tag("if(parent_template === null) {", true);
            self.indent();
        }

        // Fold as much as possible into literal text at compile time;
        // adjacent folded fragments merge into one run.
        let mut body: Vec<OutputItem<'_>> = Vec::new();
        for child in nodes {
            let folded = child
                .as_const()
                .ok()
                .and_then(|value| self.finalize_const(&value));
            match folded {
                Some(text) => {
                    if let Some(OutputItem::Text(run)) = body.last_mut() {
                        run.push_str(&text);
                    } else {
                        body.push(OutputItem::Text(text));
                    }
                }
                None => body.push(OutputItem::Node(child)),
            }
        }

        if body.len() < 3 || frame.buffer.is_some() {
            if let Some(buffer) = frame.buffer.clone() {
                if !body.is_empty() {
                    self.open_tag(&format!("{buffer}.push("), true);
                    for (idx, item) in body.iter().enumerate() {
                        if idx != 0 {
                            self.write(", ");
                        }
                        let fragment = match item {
                            OutputItem::Text(text) => text.clone(),
                            OutputItem::Node(node) => self.expression_tag(node)?,
                        };
                        let quoted = format!("\"{}\"", escape_js_string(&fragment));
                        self.write(&quoted);
                    }
                    self.close_tag(")");
                }
            } else {
                for item in &body {
                    match item {
                        OutputItem::Text(text) => self.write(text),
                        OutputItem::Node(node) => {
                            let tag_text = self.expression_tag(node)?;
                            self.write(&tag_text);
                        }
                    }
                }
            }
        } else {
            // Batch larger mixed output through one format string; the
            // substitution happens here, at generation time, so the emitted
            // text is identical to the direct path.
            let mut format = String::new();
            let mut arguments = Vec::new();
            for item in &body {
                match item {
                    OutputItem::Text(text) => format.push_str(&text.replace('%', "%%")),
                    OutputItem::Node(node) => {
                        format.push_str("%s");
                        arguments.push(*node);
                    }
                }
            }
            let rendered = arguments
                .iter()
                .map(|node| self.expression_tag(node))
                .collect::<CompileResult<Vec<_>>>()?;
            let substituted = substitute_format(&format, &rendered);
            self.write(&substituted);
        }

        if outdent_later {
            self.outdent();
            self.tag("}", true);
        }
        Ok(())
    }

    /// Literal text a folded constant contributes to the output, or `None`
    /// when the finalize hook rejects it and the fragment must stay dynamic.
    fn finalize_const(&self, value: &Value) -> Option<String> {
        let mut text = value.output_text();
        if self.environment.autoescape {
            text = escape_html(&text);
        }
        match &self.environment.finalize {
            Some(finalize) => finalize(&text),
            None => Some(text),
        }
    }

    /// The embedded tag for a dynamic output fragment: `<%= expr %>`, or a
    /// plain statement tag for calls, whose results are not output directly.
    fn expression_tag(&mut self, expr: &Expr) -> CompileResult<String> {
        let text = self.capture(|generator| generator.emit_expression(expr))?;
        let assign = if matches!(expr.kind, ExprKind::Call { .. }) {
            ""
        } else {
            "="
        };
        Ok(format!("<%{assign} {text} %>"))
    }

    /// Shared lowering for macros and the implicit `caller` of a call block:
    /// a function accumulating its output in a fresh buffer.
    fn emit_macro_body(
        &mut self,
        name: &str,
        args: &[String],
        body: &[Stmt],
        frame: &Frame,
    ) -> CompileResult<()> {
        let mut macro_frame = frame.inner();
        let buffer = self.temporary_identifier();
        macro_frame.buffer = Some(buffer.clone());
        macro_frame.declared.extend(args.iter().cloned());

        self.tag(&format!("var {name} = function({}) {{", args.join(", ")), true);
        self.indent();
        self.tag(&format!("var {buffer} = []"), true);
        self.emit_block(body, &mut macro_frame)?;
        self.tag(&format!("return {buffer}.join('')"), true);
        self.outdent();
        self.tag("}", true);
        Ok(())
    }

    fn emit_call_block(
        &mut self,
        call: &Expr,
        args: &[String],
        body: &[Stmt],
        frame: &Frame,
    ) -> CompileResult<()> {
        self.emit_macro_body("caller", args, body, frame)?;
        let text = self.capture(|generator| generator.emit_call(call, true))?;
        let tag_text = format!("<% {text} %>");
        if let Some(buffer) = frame.buffer.clone() {
            let quoted = format!("\"{}\"", escape_js_string(&tag_text));
            self.open_tag(&format!("{buffer}.push("), true);
            self.write(&quoted);
            self.close_tag(")");
        } else {
            self.newline(0);
            self.flush_whitespace();
            self.write(&tag_text);
        }
        Ok(())
    }

    fn emit_call(&mut self, expr: &Expr, forward_caller: bool) -> CompileResult<()> {
        let ExprKind::Call {
            node,
            args,
            kwargs,
            dyn_args,
            dyn_kwargs,
        } = &expr.kind
        else {
            return Err(CompileError::UnsupportedCallForm {
                reason: "Call block target is not a call expression".to_string(),
                lineno: expr.lineno,
            });
        };
        self.emit_call_inner(
            node,
            args,
            kwargs,
            dyn_args.as_deref(),
            dyn_kwargs.as_deref(),
            expr.lineno,
            forward_caller,
        )
    }

    // -- Expressions

    pub fn emit_expression(&mut self, expr: &Expr) -> CompileResult<()> {
        match &expr.kind {
            ExprKind::Name { name, .. } => {
                self.write(name);
                Ok(())
            }
            ExprKind::Const(value) => {
                let literal = js_literal(value);
                self.write(&literal);
                Ok(())
            }
            ExprKind::List(items) | ExprKind::Tuple(items) => {
                self.write("[");
                for (idx, item) in items.iter().enumerate() {
                    if idx != 0 {
                        self.write(", ");
                    }
                    self.emit_expression(item)?;
                }
                self.write("]");
                Ok(())
            }
            ExprKind::BinOp { op, left, right } => self.emit_binop(*op, left, right),
            ExprKind::UnaryOp { op, operand } => self.emit_unaryop(*op, operand),
            ExprKind::Concat(items) => {
                self.write("[");
                for (idx, item) in items.iter().enumerate() {
                    if idx != 0 {
                        self.write(", ");
                    }
                    self.emit_expression(item)?;
                }
                self.write("].join('')");
                Ok(())
            }
            ExprKind::Compare { expr: left, ops } => self.emit_compare(left, ops, expr.lineno),
            ExprKind::Getattr { node, attr } => {
                self.emit_expression(node)?;
                self.write(&format!("[\"{attr}\"]"));
                Ok(())
            }
            ExprKind::Getitem { node, arg } => self.emit_getitem(node, arg),
            ExprKind::Slice { start, stop, .. } => self.emit_slice(start.as_deref(), stop.as_deref()),
            ExprKind::CondExpr { test, expr1, expr2 } => {
                self.write("(");
                self.emit_expression(test)?;
                self.write(" ? ");
                self.emit_expression(expr1)?;
                self.write(" : ");
                match expr2 {
                    Some(expr2) => self.emit_expression(expr2)?,
                    None => self.write(&format!(
                        "throw \"the ternary expression on line {} evaluated to false and no else section was defined.\"",
                        expr.lineno
                    )),
                }
                self.write(")");
                Ok(())
            }
            ExprKind::Call {
                node,
                args,
                kwargs,
                dyn_args,
                dyn_kwargs,
            } => self.emit_call_inner(
                node,
                args,
                kwargs,
                dyn_args.as_deref(),
                dyn_kwargs.as_deref(),
                expr.lineno,
                false,
            ),
            ExprKind::ExtensionAttribute { identifier, name } => {
                self.write(&format!("environment.extensions[\"{identifier}\"].{name}"));
                Ok(())
            }
        }
    }

    fn emit_binop(&mut self, op: BinOp, left: &Expr, right: &Expr) -> CompileResult<()> {
        let symbol = op.symbol();
        if self.environment.intercepts_binop(symbol) {
            self.write(&format!("environment.call_binop(context, '{symbol}', "));
            self.emit_expression(left)?;
            self.write(", ");
            self.emit_expression(right)?;
        } else {
            match js_infix_symbol(op) {
                Some(infix) => {
                    self.write("(");
                    self.emit_expression(left)?;
                    self.write(&format!(" {infix} "));
                    self.emit_expression(right)?;
                }
                None if op == BinOp::FloorDiv => {
                    self.write("~~(");
                    self.emit_expression(left)?;
                    self.write(" / ");
                    self.emit_expression(right)?;
                }
                None => {
                    self.write("Math.pow(");
                    self.emit_expression(left)?;
                    self.write(", ");
                    self.emit_expression(right)?;
                }
            }
        }
        self.write(")");
        Ok(())
    }

    fn emit_unaryop(&mut self, op: UnaryOp, operand: &Expr) -> CompileResult<()> {
        let symbol = op.symbol();
        if self.environment.intercepts_unop(symbol) {
            self.write(&format!("environment.call_unop(context, '{symbol}', "));
            self.emit_expression(operand)?;
        } else {
            let prefix = match op {
                UnaryOp::Not => "!",
                UnaryOp::Neg => "-",
                UnaryOp::Pos => "+",
            };
            self.write("(");
            self.write(prefix);
            self.emit_expression(operand)?;
        }
        self.write(")");
        Ok(())
    }

    fn emit_compare(
        &mut self,
        left: &Expr,
        ops: &[Operand],
        lineno: usize,
    ) -> CompileResult<()> {
        let membership = ops.first().is_some_and(|operand| operand.op.is_membership());
        if ops
            .iter()
            .any(|operand| operand.op.is_membership() != membership)
        {
            return Err(CompileError::GrammarViolation { lineno });
        }
        if membership {
            // The runtime has no containment operator; membership lowers to
            // an indexOf probe with the collection first.
            for operand in ops {
                if operand.op == CmpOp::NotIn {
                    self.write("!");
                }
                self.write("(_.indexOf(");
                self.emit_expression(&operand.expr)?;
                self.write(", ");
                self.emit_expression(left)?;
                self.write(") != -1)");
            }
        } else {
            self.emit_expression(left)?;
            for operand in ops {
                let symbol = match operand.op {
                    CmpOp::Eq => "==",
                    CmpOp::Ne => "!=",
                    CmpOp::Lt => "<",
                    CmpOp::LtEq => "<=",
                    CmpOp::Gt => ">",
                    CmpOp::GtEq => ">=",
                    CmpOp::In | CmpOp::NotIn => {
                        return Err(CompileError::GrammarViolation { lineno });
                    }
                };
                self.write(&format!(" {symbol} "));
                self.emit_expression(&operand.expr)?;
            }
        }
        Ok(())
    }

    fn emit_getitem(&mut self, node: &Expr, arg: &Expr) -> CompileResult<()> {
        if let ExprKind::Slice { start, stop, step } = &arg.kind {
            if let Some(step) = step {
                // Stride slices wrap the sequential slice in a filter that
                // keeps positions divisible by the step.
                self.write("_.filter(");
                self.emit_expression(node)?;
                self.write(".slice(");
                self.emit_slice(start.as_deref(), stop.as_deref())?;
                self.write("), function(item, idx) { return !(idx % ");
                self.emit_expression(step)?;
                self.write(") })");
            } else {
                self.emit_expression(node)?;
                self.write(".slice(");
                self.emit_slice(start.as_deref(), stop.as_deref())?;
                self.write(")");
            }
        } else {
            self.emit_expression(node)?;
            self.write("[");
            self.emit_expression(arg)?;
            self.write("]");
        }
        Ok(())
    }

    fn emit_slice(&mut self, start: Option<&Expr>, stop: Option<&Expr>) -> CompileResult<()> {
        match start {
            Some(start) => self.emit_expression(start)?,
            None => self.write("0"),
        }
        if let Some(stop) = stop {
            self.write(", ");
            self.emit_expression(stop)?;
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn emit_call_inner(
        &mut self,
        callee: &Expr,
        args: &[Expr],
        kwargs: &[Keyword],
        dyn_args: Option<&Expr>,
        dyn_kwargs: Option<&Expr>,
        lineno: usize,
        forward_caller: bool,
    ) -> CompileResult<()> {
        let host_call = matches!(callee.kind, ExprKind::ExtensionAttribute { .. });
        if !host_call {
            if let Some(keyword) = kwargs.first() {
                return Err(CompileError::UnsupportedCallForm {
                    reason: "Keyword arguments are not supported in direct template calls"
                        .to_string(),
                    lineno: keyword.lineno,
                });
            }
            if dyn_args.is_some() || dyn_kwargs.is_some() {
                return Err(CompileError::UnsupportedCallForm {
                    reason: "Dynamic argument unpacking is not supported in direct template calls"
                        .to_string(),
                    lineno,
                });
            }
        }
        if host_call {
            if self.environment.sandboxed {
                self.write("environment.call(context, ");
            } else {
                self.write("context.call(");
            }
        }
        self.emit_expression(callee)?;
        if !host_call {
            self.write("(");
        }
        self.emit_signature(args, kwargs, dyn_args, dyn_kwargs, forward_caller, host_call)?;
        self.write(")");
        Ok(())
    }

    /// Argument list emission. Host calls carry keyword arguments through,
    /// falling back to dict unpacking when a keyword name collides with a
    /// target-language reserved word.
    fn emit_signature(
        &mut self,
        args: &[Expr],
        kwargs: &[Keyword],
        dyn_args: Option<&Expr>,
        dyn_kwargs: Option<&Expr>,
        forward_caller: bool,
        host_call: bool,
    ) -> CompileResult<()> {
        for (idx, arg) in args.iter().enumerate() {
            if idx != 0 || host_call {
                self.write(", ");
            }
            self.emit_expression(arg)?;
        }
        if !host_call {
            return Ok(());
        }

        let kwarg_workaround = kwargs
            .iter()
            .map(|keyword| keyword.key.as_str())
            .chain(forward_caller.then_some("caller"))
            .any(is_js_keyword);

        if !kwarg_workaround {
            for keyword in kwargs {
                self.write(&format!(", {}=", keyword.key));
                self.emit_expression(&keyword.value)?;
            }
            if forward_caller {
                self.write(", caller=caller");
            }
        }
        if let Some(dyn_args) = dyn_args {
            self.write(", *");
            self.emit_expression(dyn_args)?;
        }
        if kwarg_workaround {
            if dyn_kwargs.is_some() {
                self.write(", **dict({");
            } else {
                self.write(", **{");
            }
            for keyword in kwargs {
                self.write(&format!("'{}': ", keyword.key));
                self.emit_expression(&keyword.value)?;
                self.write(", ");
            }
            if forward_caller {
                self.write("'caller': caller, ");
            }
            if let Some(dyn_kwargs) = dyn_kwargs {
                self.write("}, **");
                self.emit_expression(dyn_kwargs)?;
                self.write(")");
            } else {
                self.write("}");
            }
        } else if let Some(dyn_kwargs) = dyn_kwargs {
            self.write(", **");
            self.emit_expression(dyn_kwargs)?;
        }
        Ok(())
    }
}

enum OutputItem<'a> {
    Text(String),
    Node(&'a Expr),
}

fn js_infix_symbol(op: BinOp) -> Option<&'static str> {
    match op {
        BinOp::Add => Some("+"),
        BinOp::Sub => Some("-"),
        BinOp::Mul => Some("*"),
        BinOp::Div => Some("/"),
        BinOp::Mod => Some("%"),
        BinOp::And => Some("&&"),
        BinOp::Or => Some("||"),
        BinOp::FloorDiv | BinOp::Pow => None,
    }
}

fn js_literal(value: &Value) -> String {
    match value {
        Value::Str(text) => format!("\"{}\"", escape_js_string(text)),
        Value::Int(value) => value.to_string(),
        Value::Float(value) => format!("{value}"),
        Value::Bool(true) => "true".to_string(),
        Value::Bool(false) => "false".to_string(),
        Value::None => "null".to_string(),
        Value::List(items) => {
            let items: Vec<String> = items.iter().map(js_literal).collect();
            format!("[{}]", items.join(", "))
        }
    }
}

pub(crate) fn escape_js_string(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            '\t' => escaped.push_str("\\t"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&#34;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

/// Substitute `%s` placeholders with the rendered arguments and collapse
/// `%%` escapes. Placeholder counts match by construction.
fn substitute_format(format: &str, arguments: &[String]) -> String {
    let mut output = String::with_capacity(format.len());
    let mut args = arguments.iter();
    let mut chars = format.chars();
    while let Some(ch) = chars.next() {
        if ch != '%' {
            output.push(ch);
            continue;
        }
        match chars.next() {
            Some('%') => output.push('%'),
            Some('s') => {
                if let Some(arg) = args.next() {
                    output.push_str(arg);
                }
            }
            Some(other) => {
                output.push('%');
                output.push(other);
            }
            None => output.push('%'),
        }
    }
    output
}

const JS_KEYWORDS: &[&str] = &[
    "await", "break", "case", "catch", "class", "const", "continue", "debugger", "default",
    "delete", "do", "else", "enum", "export", "extends", "false", "finally", "for", "function",
    "if", "implements", "import", "in", "instanceof", "interface", "let", "new", "null",
    "package", "private", "protected", "public", "return", "static", "super", "switch", "this",
    "throw", "true", "try", "typeof", "var", "void", "while", "with", "yield",
];

fn is_js_keyword(name: &str) -> bool {
    JS_KEYWORDS.contains(&name)
}
