//! Parser tests — statements, expressions, precedence, errors

use fastcode_lang::ast::*;
use fastcode_lang::lexer::Lexer;
use fastcode_lang::parser::Parser;
use pretty_assertions::assert_eq;

fn parse(source: &str) -> Program {
    let tokens = Lexer::new(source, "test.fc").tokenize().unwrap();
    Parser::new(tokens, "test.fc").parse().unwrap()
}

fn parse_err(source: &str) -> String {
    let tokens = Lexer::new(source, "test.fc").tokenize().unwrap();
    Parser::new(tokens, "test.fc").parse().unwrap_err().to_string()
}

fn single(source: &str) -> Stmt {
    let mut program = parse(source);
    assert_eq!(program.statements.len(), 1, "expected exactly one statement");
    program.statements.remove(0)
}

fn expr_of(source: &str) -> Expr {
    match single(source) {
        Stmt::Expr { expr, .. } => expr,
        other => panic!("expected expression statement, got {:?}", other),
    }
}

fn number(expr: &Expr) -> f64 {
    match expr {
        Expr::Literal {
            value: Literal::Number(n),
            ..
        } => *n,
        other => panic!("expected number literal, got {:?}", other),
    }
}

// ── Declarations ────────────────────────────────────────────

#[test]
fn proc_declaration() {
    match single("proc add(a, b) { return a + b; }") {
        Stmt::FunctionDecl {
            name, params, body, ..
        } => {
            assert_eq!(name, "add");
            assert_eq!(params, vec!["a".to_string(), "b".to_string()]);
            assert_eq!(body.len(), 1);
            assert!(matches!(body[0], Stmt::Return { value: Some(_), .. }));
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn proc_without_params() {
    match single("proc main() { }") {
        Stmt::FunctionDecl { params, body, .. } => {
            assert!(params.is_empty());
            assert!(body.is_empty());
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn struct_declaration() {
    match single("struct Point { x, y };") {
        Stmt::StructDecl {
            name, properties, ..
        } => {
            assert_eq!(name, "Point");
            assert_eq!(properties, vec!["x".to_string(), "y".to_string()]);
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn struct_declaration_without_semicolon() {
    let program = parse("struct Point { x, y } p = new Point;");
    assert_eq!(program.statements.len(), 2);
    assert!(matches!(program.statements[1], Stmt::Assign { .. }));
}

// ── Assignment ──────────────────────────────────────────────

#[test]
fn plain_assignment() {
    match single("x = 5;") {
        Stmt::Assign {
            target,
            value,
            global,
            ..
        } => {
            assert_eq!(target.name, "x");
            assert!(target.is_plain());
            assert_eq!(number(&value), 5.0);
            assert!(!global);
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn global_assignment() {
    assert!(matches!(single("global g = 1;"), Stmt::Assign { global: true, .. }));
}

#[test]
fn accessor_chain_assignment() {
    match single("a.b[2].c = null;") {
        Stmt::Assign { target, .. } => {
            assert_eq!(target.name, "a");
            assert_eq!(target.accessors.len(), 3);
            assert!(matches!(&target.accessors[0], Accessor::Property { name, .. } if name == "b"));
            assert!(matches!(&target.accessors[1], Accessor::Index { index, .. } if number(index) == 2.0));
            assert!(matches!(&target.accessors[2], Accessor::Property { name, .. } if name == "c"));
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn invalid_assignment_target() {
    assert!(parse_err("f(1) = 2;").contains("Invalid assignment target"));
    assert!(parse_err("1 + 2 = 3;").contains("Invalid assignment target"));
}

#[test]
fn terminator_optional_at_end() {
    let program = parse("x = 1; y = 2");
    assert_eq!(program.statements.len(), 2);
}

#[test]
fn terminator_optional_before_brace() {
    match single("while (1) { break }") {
        Stmt::While { body, .. } => assert!(matches!(body[0], Stmt::Break { .. })),
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn missing_semicolon_between_statements() {
    assert!(parse_err("x = 1 y = 2").contains("Expected ';'"));
}

#[test]
fn empty_statements_are_skipped() {
    assert_eq!(parse(";;x = 1;;").statements.len(), 1);
}

// ── Control flow ────────────────────────────────────────────

#[test]
fn if_elif_else_chain() {
    match single("if (a) { x = 1; } elif (b) { x = 2; } elif (c) { } else { x = 4; }") {
        Stmt::If {
            branches,
            else_body,
            ..
        } => {
            assert_eq!(branches.len(), 3);
            assert_eq!(branches[0].body.len(), 1);
            assert!(branches[2].body.is_empty());
            assert_eq!(else_body.map(|b| b.len()), Some(1));
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn if_without_else() {
    assert!(matches!(single("if (x) { }"), Stmt::If { else_body: None, .. }));
}

#[test]
fn for_loop() {
    match single("for (i : array(0, 1, 2)) { print(i); }") {
        Stmt::For {
            var,
            iterable,
            body,
            ..
        } => {
            assert_eq!(var, "i");
            assert!(matches!(iterable, Expr::Call { ref name, ref args, .. } if name == "array" && args.len() == 3));
            assert_eq!(body.len(), 1);
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn return_without_value() {
    match single("proc f() { return; }") {
        Stmt::FunctionDecl { body, .. } => {
            assert!(matches!(body[0], Stmt::Return { value: None, .. }))
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn import_statement() {
    match single("import \"lib/util\";") {
        Stmt::Import { path, .. } => assert_eq!(path, "lib/util"),
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn unclosed_block() {
    assert!(parse_err("while (1) { x = 1;").contains("expected '}'"));
}

// ── Expressions ─────────────────────────────────────────────

#[test]
fn multiplication_binds_tighter_than_addition() {
    match expr_of("1 + 2 * 3;") {
        Expr::Binary {
            op: BinaryOp::Add,
            left,
            right,
            ..
        } => {
            assert_eq!(number(&left), 1.0);
            assert!(matches!(*right, Expr::Binary { op: BinaryOp::Multiply, .. }));
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn subtraction_is_left_associative() {
    match expr_of("10 - 4 - 3;") {
        Expr::Binary {
            op: BinaryOp::Subtract,
            left,
            right,
            ..
        } => {
            assert!(matches!(*left, Expr::Binary { op: BinaryOp::Subtract, .. }));
            assert_eq!(number(&right), 3.0);
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn power_is_right_associative() {
    match expr_of("2 ^ 3 ^ 2;") {
        Expr::Binary {
            op: BinaryOp::Power,
            left,
            right,
            ..
        } => {
            assert_eq!(number(&left), 2.0);
            assert!(matches!(*right, Expr::Binary { op: BinaryOp::Power, .. }));
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn logical_precedence() {
    // && binds tighter than ||, comparisons tighter than both
    match expr_of("a < b || c == d && e;") {
        Expr::Binary {
            op: BinaryOp::Or,
            left,
            right,
            ..
        } => {
            assert!(matches!(*left, Expr::Binary { op: BinaryOp::Less, .. }));
            assert!(matches!(*right, Expr::Binary { op: BinaryOp::And, .. }));
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn parentheses_override_precedence() {
    assert!(matches!(
        expr_of("(1 + 2) * 3;"),
        Expr::Binary { op: BinaryOp::Multiply, .. }
    ));
}

#[test]
fn unary_operators() {
    assert!(matches!(expr_of("-x;"), Expr::Unary { op: UnaryOp::Negate, postfix: false, .. }));
    assert!(matches!(expr_of("!x;"), Expr::Unary { op: UnaryOp::Not, .. }));
}

#[test]
fn prefix_and_postfix_increment() {
    assert!(matches!(
        expr_of("++i;"),
        Expr::Unary { op: UnaryOp::Increment, postfix: false, .. }
    ));
    assert!(matches!(
        expr_of("i--;"),
        Expr::Unary { op: UnaryOp::Decrement, postfix: true, .. }
    ));
}

#[test]
fn postfix_increment_needs_variable() {
    assert!(parse_err("f()++;").contains("needs a variable operand"));
}

#[test]
fn reference_of() {
    match expr_of("&a.b[0];") {
        Expr::ReferenceOf { target, .. } => {
            assert_eq!(target.name, "a");
            assert_eq!(target.accessors.len(), 2);
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn call_with_arguments() {
    match expr_of("f(1, g(2), [3]);") {
        Expr::Call { name, args, .. } => {
            assert_eq!(name, "f");
            assert_eq!(args.len(), 3);
            assert!(matches!(args[1], Expr::Call { .. }));
            assert!(matches!(args[2], Expr::NewArray { .. }));
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn array_literal() {
    match expr_of("[1, 'a', \"bc\", null];") {
        Expr::NewArray { elements, .. } => {
            assert_eq!(elements.len(), 4);
            assert!(matches!(&elements[1], Expr::Literal { value: Literal::Char('a'), .. }));
            assert!(matches!(&elements[2], Expr::Literal { value: Literal::Text(t), .. } if t == "bc"));
            assert!(matches!(&elements[3], Expr::Literal { value: Literal::Null, .. }));
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn empty_array_literal() {
    assert!(matches!(expr_of("[];"), Expr::NewArray { ref elements, .. } if elements.is_empty()));
}

#[test]
fn new_struct() {
    assert!(matches!(expr_of("new Point;"), Expr::NewStruct { ref name, .. } if name == "Point"));
}

#[test]
fn unexpected_token_in_expression() {
    assert!(parse_err("x = );").contains("Expected expression"));
}

#[test]
fn unexpected_end_of_input() {
    assert!(parse_err("x = ").contains("Unexpected end of input"));
}

#[test]
fn nesting_depth_is_capped() {
    let source = format!("x = {}1{};", "(".repeat(400), ")".repeat(400));
    let message = std::thread::Builder::new()
        .stack_size(64 * 1024 * 1024)
        .spawn(move || parse_err(&source))
        .unwrap()
        .join()
        .unwrap();
    assert!(message.contains("Maximum nesting depth"));
}

#[test]
fn locations_are_recorded() {
    let program = parse("\n  x = 1;");
    let loc = program.statements[0].loc();
    assert_eq!((loc.line, loc.column), (2, 3));
    assert_eq!(loc.to_string(), "test.fc:2:3");
}

#[test]
fn syntax_tree_serializes_to_json() {
    let program = parse("x = [1, 2];");
    let json = serde_json::to_value(&program).unwrap();
    assert!(json["statements"][0]["Assign"]["target"]["name"] == "x");
}
