use anyhow::Result;
use indoc::indoc;

use jinja2js::ast::{
    CmpOp, Expr, ExprKind, Keyword, NameCtx, Operand, Stmt, StmtKind, Template, Value,
};
use jinja2js::compiler::{self, CodeGenerator, CompileError, Frame};
use jinja2js::environment::Environment;
use jinja2js::parser::parse_expression;

fn load(name: &str) -> Expr {
    Expr::new(
        ExprKind::Name {
            name: name.to_string(),
            ctx: NameCtx::Load,
        },
        1,
    )
}

fn store(name: &str) -> Expr {
    Expr::new(
        ExprKind::Name {
            name: name.to_string(),
            ctx: NameCtx::Store,
        },
        1,
    )
}

fn text(value: &str) -> Expr {
    Expr::new(ExprKind::Const(Value::Str(value.to_string())), 1)
}

fn output(nodes: Vec<Expr>) -> Stmt {
    Stmt::new(StmtKind::Output(nodes), 1)
}

fn expr(input: &str) -> Result<Expr> {
    Ok(parse_expression(input)?)
}

fn generate(body: Vec<Stmt>) -> Result<String, CompileError> {
    compiler::generate(&Template { body }, &Environment::new())
}

fn generate_expr(input: &str) -> Result<String> {
    let parsed = parse_expression(input)?;
    Ok(compiler::generate_expression(&parsed, &Environment::new())?)
}

#[test]
fn for_loop_lowers_to_each() -> Result<()> {
    let body = vec![Stmt::new(
        StmtKind::For {
            target: store("x"),
            iter: expr("items")?,
            body: vec![output(vec![expr("x")?])],
            else_body: vec![],
            test: None,
            recursive: false,
        },
        1,
    )];
    assert_eq!(
        generate(body)?,
        "\n<% _.each(items, function(x, index0, iter) { %><%= x %>\n<% }) %>"
    );
    Ok(())
}

#[test]
fn for_else_tracks_iteration_indicator() -> Result<()> {
    let body = vec![Stmt::new(
        StmtKind::For {
            target: store("x"),
            iter: expr("items")?,
            body: vec![output(vec![expr("x")?])],
            else_body: vec![output(vec![text("empty")])],
            test: None,
            recursive: false,
        },
        1,
    )];
    let expected = concat!(
        "\n<% var t_1 = 1 %>",
        "\n<% _.each(items, function(x, index0, iter) { %>",
        "<%= x %>",
        "\n    <% t_1 = 0 %>",
        "\n<% }) %>",
        "\n<% if(t_1) { %>",
        "empty",
        "\n<% } %>",
    );
    assert_eq!(generate(body)?, expected);
    Ok(())
}

#[test]
fn plain_loop_filter_becomes_early_return() -> Result<()> {
    let body = vec![Stmt::new(
        StmtKind::For {
            target: store("x"),
            iter: expr("items")?,
            body: vec![output(vec![expr("x")?])],
            else_body: vec![],
            test: Some(expr("x > 1")?),
            recursive: false,
        },
        1,
    )];
    let expected = concat!(
        "\n<% _.each(items, function(x, index0, iter) { %>",
        "\n    <% if(!(x > 1)) { return; } %>",
        "<%= x %>",
        "\n<% }) %>",
    );
    assert_eq!(generate(body)?, expected);
    Ok(())
}

#[test]
fn metadata_loop_with_filter_prefilters_the_collection() -> Result<()> {
    let body = vec![Stmt::new(
        StmtKind::For {
            target: store("x"),
            iter: expr("items")?,
            body: vec![output(vec![expr("loop.index")?])],
            else_body: vec![],
            test: Some(expr("x > 1")?),
            recursive: false,
        },
        1,
    )];
    let expected = concat!(
        "\n<% var t_1 = _.filter(items, function(x) { return x > 1 }) %>",
        "\n<% _.each(t_1, function(x, index0, iter) { %>",
        "\n    <% var l_loop = {index0: index0, index: index0 + 1, first: index0 == 0, length: iter.length} %>",
        "\n    <% l_loop.revindex = iter.length - l_loop.index0 %>",
        "\n    <% l_loop.revindex0 = l_loop.revindex - 1 %>",
        "\n    <% l_loop.last = l_loop.revindex0 == 0 %>",
        "\n    <% l_loop.cycle = function() { return arguments.length ? arguments[index0 % arguments.length] : '' } %>",
        "<%= l_loop[\"index\"] %>",
        "\n<% }) %>",
    );
    assert_eq!(generate(body)?, expected);
    Ok(())
}

#[test]
fn prefilter_callback_binds_the_loop_target() -> Result<()> {
    let body = vec![Stmt::new(
        StmtKind::For {
            target: store("user"),
            iter: expr("users")?,
            body: vec![output(vec![expr("loop.length")?])],
            else_body: vec![],
            test: Some(expr("user.active")?),
            recursive: false,
        },
        1,
    )];
    let expected = concat!(
        "\n<% var t_1 = _.filter(users, function(user) { return user[\"active\"] }) %>",
        "\n<% _.each(t_1, function(user, index0, iter) { %>",
        "\n    <% var l_loop = {index0: index0, index: index0 + 1, first: index0 == 0, length: iter.length} %>",
        "\n    <% l_loop.revindex = iter.length - l_loop.index0 %>",
        "\n    <% l_loop.revindex0 = l_loop.revindex - 1 %>",
        "\n    <% l_loop.last = l_loop.revindex0 == 0 %>",
        "\n    <% l_loop.cycle = function() { return arguments.length ? arguments[index0 % arguments.length] : '' } %>",
        "<%= l_loop[\"length\"] %>",
        "\n<% }) %>",
    );
    assert_eq!(generate(body)?, expected);
    Ok(())
}

#[test]
fn recursive_loop_wraps_a_named_function() -> Result<()> {
    let body = vec![Stmt::new(
        StmtKind::For {
            target: store("item"),
            iter: expr("items")?,
            body: vec![output(vec![expr("item.name")?, expr("loop(item.children)")?])],
            else_body: vec![],
            test: None,
            recursive: true,
        },
        1,
    )];
    let expected = concat!(
        "\n<% var loop = function(iter) { %>",
        "\n    <% _.each(iter, function(item, index0, iter) { %>",
        "<%= item[\"name\"] %>",
        "<% loop(item[\"children\"]) %>",
        "\n    <% }) %>",
        "\n<% } %>",
        "\n<% loop(items) %>",
    );
    assert_eq!(generate(body)?, expected);
    Ok(())
}

#[test]
fn assigning_the_loop_name_is_rejected() -> Result<()> {
    let body = vec![Stmt::new(
        StmtKind::For {
            target: store("loop"),
            iter: expr("items")?,
            body: vec![output(vec![expr("x")?])],
            else_body: vec![],
            test: None,
            recursive: false,
        },
        3,
    )];
    let error = generate(body).unwrap_err();
    assert!(matches!(error, CompileError::ReservedBinding { lineno: 1 }));
    Ok(())
}

#[test]
fn if_else_brackets_both_branches() -> Result<()> {
    let body = vec![Stmt::new(
        StmtKind::If {
            test: expr("logged_in")?,
            body: vec![output(vec![text("yes")])],
            else_body: vec![output(vec![text("no")])],
        },
        1,
    )];
    assert_eq!(
        generate(body)?,
        "<% if(logged_in) { %>yes\n<% } else { %>no\n<% } %>"
    );
    Ok(())
}

#[test]
fn if_without_else_closes_once() -> Result<()> {
    let body = vec![Stmt::new(
        StmtKind::If {
            test: expr("x == 1")?,
            body: vec![output(vec![text("one")])],
            else_body: vec![],
        },
        1,
    )];
    assert_eq!(generate(body)?, "<% if(x == 1) { %>one\n<% } %>");
    Ok(())
}

#[test]
fn assignment_declares_a_var() -> Result<()> {
    let body = vec![Stmt::new(
        StmtKind::Assign {
            target: store("x"),
            value: expr("y + 1")?,
        },
        1,
    )];
    assert_eq!(generate(body)?, "<% var x = (y + 1) %>");
    Ok(())
}

#[test]
fn constant_output_folds_to_target_text() -> Result<()> {
    let body = vec![output(vec![
        expr("1 + 2")?,
        text(" "),
        expr("none")?,
        text(" "),
        expr("true")?,
    ])];
    assert_eq!(generate(body)?, "3 null true");
    Ok(())
}

#[test]
fn multiline_literal_text_passes_through_verbatim() -> Result<()> {
    let page = indoc! {r#"
        <ul>
          <li>static</li>
        </ul>
    "#};
    let body = vec![output(vec![text(page)])];
    assert_eq!(generate(body)?, page);
    Ok(())
}

#[test]
fn small_mixed_output_is_emitted_directly() -> Result<()> {
    let body = vec![output(vec![text("Hello "), expr("x")?])];
    assert_eq!(generate(body)?, "Hello <%= x %>");
    Ok(())
}

#[test]
fn large_mixed_output_batches_through_a_format_string() -> Result<()> {
    let body = vec![output(vec![
        text("Hello "),
        expr("x")?,
        text("! 100% sure, "),
        expr("y")?,
    ])];
    assert_eq!(generate(body)?, "Hello <%= x %>! 100% sure, <%= y %>");
    Ok(())
}

#[test]
fn call_in_output_uses_a_statement_tag() -> Result<()> {
    let body = vec![output(vec![expr("f(x)")?])];
    assert_eq!(generate(body)?, "<% f(x) %>");
    Ok(())
}

#[test]
fn autoescape_escapes_folded_constants() -> Result<()> {
    let mut environment = Environment::new();
    environment.autoescape = true;
    let template = Template {
        body: vec![output(vec![text("<b> & \"x\"")])],
    };
    assert_eq!(
        compiler::generate(&template, &environment)?,
        "&lt;b&gt; &amp; &#34;x&#34;"
    );
    Ok(())
}

#[test]
fn finalize_rewrites_folded_constants() -> Result<()> {
    let mut environment = Environment::new();
    environment.finalize = Some(Box::new(|text| Some(text.to_uppercase())));
    let template = Template {
        body: vec![output(vec![text("hi")])],
    };
    assert_eq!(compiler::generate(&template, &environment)?, "HI");
    Ok(())
}

#[test]
fn rejected_finalize_demotes_the_fold_to_runtime() -> Result<()> {
    let mut environment = Environment::new();
    environment.finalize = Some(Box::new(|_| None));
    let template = Template {
        body: vec![output(vec![text("hi")])],
    };
    assert_eq!(compiler::generate(&template, &environment)?, "<%= \"hi\" %>");
    Ok(())
}

#[test]
fn output_check_guards_top_level_output() -> Result<()> {
    let environment = Environment::new();
    let mut generator = CodeGenerator::new(&environment);
    let mut frame = Frame::new();
    frame.require_output_check = true;
    generator.emit_statement(&output(vec![text("hi")]), &mut frame)?;
    assert_eq!(
        generator.finish(),
        "\n<% if(parent_template === null) { %>hi\n<% } %>"
    );
    Ok(())
}

#[test]
fn known_extends_drops_checked_output() -> Result<()> {
    let environment = Environment::new();
    let mut generator = CodeGenerator::new(&environment);
    generator.has_known_extends = true;
    let mut frame = Frame::new();
    frame.require_output_check = true;
    generator.emit_statement(&output(vec![text("hi")]), &mut frame)?;
    assert_eq!(generator.finish(), "");
    Ok(())
}

#[test]
fn macro_accumulates_into_a_buffer() -> Result<()> {
    let body = vec![Stmt::new(
        StmtKind::Macro {
            name: "greet".to_string(),
            args: vec!["name".to_string()],
            body: vec![output(vec![text("Hello "), expr("name")?])],
        },
        1,
    )];
    let expected = concat!(
        "\n<% var greet = function(name) { %>",
        "\n    <% var t_1 = [] %>",
        "\n    <% t_1.push(\"Hello \", \"<%= name %>\") %>",
        "\n    <% return t_1.join('') %>",
        "\n<% } %>",
    );
    assert_eq!(generate(body)?, expected);
    Ok(())
}

#[test]
fn call_block_defines_caller_and_forwards_it() -> Result<()> {
    let callee = Expr::new(
        ExprKind::ExtensionAttribute {
            identifier: "ext".to_string(),
            name: "render".to_string(),
        },
        1,
    );
    let call = Expr::new(
        ExprKind::Call {
            node: Box::new(callee),
            args: vec![],
            kwargs: vec![],
            dyn_args: None,
            dyn_kwargs: None,
        },
        1,
    );
    let body = vec![Stmt::new(
        StmtKind::CallBlock {
            call,
            args: vec!["a".to_string()],
            body: vec![output(vec![text("body")])],
        },
        1,
    )];
    let expected = concat!(
        "\n<% var caller = function(a) { %>",
        "\n    <% var t_1 = [] %>",
        "\n    <% t_1.push(\"body\") %>",
        "\n    <% return t_1.join('') %>",
        "\n<% } %>",
        "\n<% context.call(environment.extensions[\"ext\"].render, caller=caller) %>",
    );
    assert_eq!(generate(body)?, expected);
    Ok(())
}

#[test]
fn host_call_keywords_pass_through() -> Result<()> {
    let callee = Expr::new(
        ExprKind::ExtensionAttribute {
            identifier: "i18n".to_string(),
            name: "trans".to_string(),
        },
        1,
    );
    let call = Expr::new(
        ExprKind::Call {
            node: Box::new(callee),
            args: vec![load("msg")],
            kwargs: vec![Keyword {
                key: "count".to_string(),
                value: load("n"),
                lineno: 1,
            }],
            dyn_args: None,
            dyn_kwargs: None,
        },
        1,
    );
    assert_eq!(
        compiler::generate_expression(&call, &Environment::new())?,
        "context.call(environment.extensions[\"i18n\"].trans, msg, count=n)"
    );
    Ok(())
}

#[test]
fn reserved_keyword_names_use_dict_unpacking() -> Result<()> {
    let callee = Expr::new(
        ExprKind::ExtensionAttribute {
            identifier: "i18n".to_string(),
            name: "trans".to_string(),
        },
        1,
    );
    let call = Expr::new(
        ExprKind::Call {
            node: Box::new(callee),
            args: vec![load("msg")],
            kwargs: vec![Keyword {
                key: "class".to_string(),
                value: load("v"),
                lineno: 1,
            }],
            dyn_args: None,
            dyn_kwargs: None,
        },
        1,
    );
    assert_eq!(
        compiler::generate_expression(&call, &Environment::new())?,
        "context.call(environment.extensions[\"i18n\"].trans, msg, **{'class': v, })"
    );
    Ok(())
}

#[test]
fn sandboxed_host_call_routes_through_the_environment() -> Result<()> {
    let callee = Expr::new(
        ExprKind::ExtensionAttribute {
            identifier: "ext".to_string(),
            name: "run".to_string(),
        },
        1,
    );
    let call = Expr::new(
        ExprKind::Call {
            node: Box::new(callee),
            args: vec![load("x")],
            kwargs: vec![],
            dyn_args: None,
            dyn_kwargs: None,
        },
        1,
    );
    let mut environment = Environment::new();
    environment.sandboxed = true;
    assert_eq!(
        compiler::generate_expression(&call, &environment)?,
        "environment.call(context, environment.extensions[\"ext\"].run, x)"
    );
    Ok(())
}

#[test]
fn direct_call_keywords_are_rejected() -> Result<()> {
    let parsed = parse_expression("f(x=1)")?;
    let error = compiler::generate_expression(&parsed, &Environment::new()).unwrap_err();
    assert!(matches!(
        error,
        CompileError::UnsupportedCallForm { lineno: 1, .. }
    ));
    Ok(())
}

#[test]
fn mixed_compare_node_is_a_grammar_violation() -> Result<()> {
    let mixed = Expr::new(
        ExprKind::Compare {
            expr: Box::new(load("a")),
            ops: vec![
                Operand {
                    op: CmpOp::Lt,
                    expr: load("b"),
                },
                Operand {
                    op: CmpOp::In,
                    expr: load("c"),
                },
            ],
        },
        4,
    );
    let error = compiler::generate_expression(&mixed, &Environment::new()).unwrap_err();
    assert!(matches!(error, CompileError::GrammarViolation { lineno: 4 }));
    Ok(())
}

#[test]
fn membership_lowers_to_index_of() -> Result<()> {
    assert_eq!(generate_expr("x in items")?, "(_.indexOf(items, x) != -1)");
    assert_eq!(
        generate_expr("x not in items")?,
        "!(_.indexOf(items, x) != -1)"
    );
    assert_eq!(
        generate_expr("a < b in c")?,
        "(_.indexOf(c, a < b) != -1)"
    );
    Ok(())
}

#[test]
fn operators_use_target_spellings() -> Result<()> {
    assert_eq!(generate_expr("a and b or not c")?, "((a && b) || (!c))");
    assert_eq!(generate_expr("a // b")?, "~~(a / b)");
    assert_eq!(generate_expr("a ** b")?, "Math.pow(a, b)");
    assert_eq!(generate_expr("a ~ b ~ c")?, "[a, b, c].join('')");
    assert_eq!(generate_expr("a <= b != c")?, "a <= b != c");
    Ok(())
}

#[test]
fn sandbox_intercepts_configured_operators() -> Result<()> {
    let mut environment = Environment::new();
    environment.sandboxed = true;
    environment.intercepted_binops.insert("+");
    environment.intercepted_unops.insert("not");
    let sum = parse_expression("a + b")?;
    assert_eq!(
        compiler::generate_expression(&sum, &environment)?,
        "environment.call_binop(context, '+', a, b)"
    );
    let negation = parse_expression("not a")?;
    assert_eq!(
        compiler::generate_expression(&negation, &environment)?,
        "environment.call_unop(context, 'not', a)"
    );
    let difference = parse_expression("a - b")?;
    assert_eq!(
        compiler::generate_expression(&difference, &environment)?,
        "(a - b)"
    );
    Ok(())
}

#[test]
fn literals_use_target_spellings() -> Result<()> {
    assert_eq!(generate_expr("\"hi\"")?, "\"hi\"");
    assert_eq!(generate_expr("2.5")?, "2.5");
    assert_eq!(generate_expr("[1, none, false]")?, "[1, null, false]");
    assert_eq!(generate_expr("(1, 2)")?, "[1, 2]");
    Ok(())
}

#[test]
fn slices_map_to_slice_calls() -> Result<()> {
    assert_eq!(generate_expr("items[2:]")?, "items.slice(2)");
    assert_eq!(generate_expr("items[:3]")?, "items.slice(0, 3)");
    assert_eq!(
        generate_expr("items[1:5:2]")?,
        "_.filter(items.slice(1, 5), function(item, idx) { return !(idx % 2) })"
    );
    assert_eq!(generate_expr("items[0]")?, "items[0]");
    Ok(())
}

#[test]
fn missing_ternary_else_throws_at_runtime() -> Result<()> {
    assert_eq!(
        generate_expr("a if b else c")?,
        "(b ? a : c)"
    );
    assert_eq!(
        generate_expr("a if b")?,
        "(b ? a : throw \"the ternary expression on line 1 evaluated to false and no else section was defined.\")"
    );
    Ok(())
}

#[test]
fn attribute_access_uses_subscript_form() -> Result<()> {
    assert_eq!(generate_expr("user.name")?, "user[\"name\"]");
    assert_eq!(generate_expr("a.b.c")?, "a[\"b\"][\"c\"]");
    Ok(())
}

#[test]
fn generate_into_streams_the_output() -> Result<()> {
    let template = Template {
        body: vec![output(vec![text("Hello "), expr("x")?])],
    };
    let mut sink = Vec::new();
    compiler::generate_into(&template, &Environment::new(), &mut sink)?;
    assert_eq!(String::from_utf8(sink)?, "Hello <%= x %>");
    Ok(())
}
