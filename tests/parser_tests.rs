//! Parser tests

use initsafe::ast::*;
use initsafe::lexer::lex;
use initsafe::parser::parse;

fn parse_source(source: &str) -> Program {
    let tokens = lex(source).unwrap();
    parse(&tokens, source).unwrap()
}

fn parse_fails(source: &str) -> bool {
    let tokens = lex(source).unwrap();
    parse(&tokens, source).is_err()
}

#[test]
fn test_parse_empty_program() {
    let program = parse_source("");
    assert!(program.classes.is_empty());
}

#[test]
fn test_parse_class_with_params_and_parent() {
    let program = parse_source("final class B(x: Int, @partial a: A) extends Base(x, 1) { }");
    assert_eq!(program.classes.len(), 1);

    let class = &program.classes[0];
    assert_eq!(class.name, "B");
    assert!(class.modifiers.is_final);
    assert_eq!(class.params.len(), 2);
    assert!(!class.params[0].partial);
    assert!(class.params[1].partial);
    assert_eq!(class.params[1].ty.as_ref().unwrap().name, "A");

    let parent = class.parent.as_ref().unwrap();
    assert_eq!(parent.name, "Base");
    assert_eq!(parent.args.len(), 2);
}

#[test]
fn test_parse_members() {
    let program = parse_source(
        r#"
        class A {
            val x: Int = 1
            var y = 2
            lazy val z = x + y
            @partial val w = this
            private def f(n: Int): Int = n * 2
            final def g() { x }
            def h(): Int
        }
    "#,
    );
    let class = &program.classes[0];
    let fields: Vec<&FieldDef> = class.fields().collect();
    let methods: Vec<&MethodDef> = class.methods().collect();

    assert_eq!(fields.len(), 4);
    assert!(!fields[0].mutable);
    assert!(fields[1].mutable);
    assert!(fields[2].modifiers.is_lazy);
    assert!(fields[3].modifiers.partial);

    assert_eq!(methods.len(), 3);
    assert!(methods[0].modifiers.is_private);
    assert_eq!(methods[0].params.len(), 1);
    assert!(methods[1].modifiers.is_final);
    assert!(matches!(
        methods[1].body.as_ref().map(|b| &b.kind),
        Some(ExprKind::Block(_))
    ));
    assert!(methods[2].body.is_none());
}

#[test]
fn test_parse_nested_and_local_classes() {
    let program = parse_source(
        r#"
        class Outer {
            class Inner { val v = Outer.this }
            def make() = {
                class Local { }
                new Local()
            }
        }
    "#,
    );
    let outer = &program.classes[0];
    assert_eq!(outer.nested_classes().count(), 1);

    let inner = outer.nested_classes().next().unwrap();
    let field = inner.fields().next().unwrap();
    assert!(matches!(
        field.value.as_ref().map(|v| &v.kind),
        Some(ExprKind::OuterThis(name)) if name == "Outer"
    ));

    let make = outer.methods().next().unwrap();
    let Some(ExprKind::Block(block)) = make.body.as_ref().map(|b| &b.kind) else {
        panic!("Expected block body");
    };
    assert!(matches!(block.stmts[0], Stmt::Class(_)));
    assert!(matches!(
        block.tail().map(|e| &e.kind),
        Some(ExprKind::New { class, .. }) if class == "Local"
    ));
}

#[test]
fn test_parse_class_body_statement() {
    let program = parse_source("class A { var x = 0; x = 1; println(x) }");
    let class = &program.classes[0];
    assert_eq!(class.body.len(), 3);
    assert!(matches!(
        &class.body[1],
        ClassItem::Stmt(Stmt::Expr {
            expr: Expr {
                kind: ExprKind::Assign { .. },
                ..
            },
            ..
        })
    ));
}

#[test]
fn test_parse_precedence() {
    let program = parse_source("class A { val x = 1 + 2 * 3 }");
    let field = program.classes[0].fields().next().unwrap();
    let Some(ExprKind::Binary { op, right, .. }) = field.value.as_ref().map(|v| &v.kind) else {
        panic!("Expected binary expression");
    };
    assert_eq!(*op, BinaryOp::Add);
    assert!(matches!(
        right.kind,
        ExprKind::Binary {
            op: BinaryOp::Mul,
            ..
        }
    ));
}

#[test]
fn test_parse_calls_and_selects() {
    let program = parse_source("class A { val x = a.b.c(1, 2).d }");
    let field = program.classes[0].fields().next().unwrap();
    let Some(ExprKind::Select { receiver, name }) = field.value.as_ref().map(|v| &v.kind) else {
        panic!("Expected select");
    };
    assert_eq!(name, "d");
    let ExprKind::Call { callee, args } = &receiver.kind else {
        panic!("Expected call");
    };
    assert_eq!(args.len(), 2);
    assert!(matches!(&callee.kind, ExprKind::Select { name, .. } if name == "c"));
}

#[test]
fn test_parse_closures() {
    let program = parse_source("class A { val f = |x, y| x + y; val g = || this }");
    let fields: Vec<&FieldDef> = program.classes[0].fields().collect();
    assert!(matches!(
        fields[0].value.as_ref().map(|v| &v.kind),
        Some(ExprKind::Closure { params, .. }) if params.len() == 2
    ));
    assert!(matches!(
        fields[1].value.as_ref().map(|v| &v.kind),
        Some(ExprKind::Closure { params, .. }) if params.is_empty()
    ));
}

#[test]
fn test_parse_control_flow() {
    let program = parse_source(
        r#"
        class A {
            val x = if (true) 1 else 2
            def loop() = while (false) { x }
            val y = try { 1 } catch (e) { 2 } finally { 3 }
            def early() = { return x }
            val s = super.toString()
        }
    "#,
    );
    let class = &program.classes[0];
    let fields: Vec<&FieldDef> = class.fields().collect();
    assert!(matches!(
        fields[0].value.as_ref().map(|v| &v.kind),
        Some(ExprKind::If {
            else_branch: Some(_),
            ..
        })
    ));
    assert!(matches!(
        fields[1].value.as_ref().map(|v| &v.kind),
        Some(ExprKind::Try { handlers, finalizer: Some(_), .. }) if handlers.len() == 1
    ));
    let Some(ExprKind::Call { callee, .. }) = fields[2].value.as_ref().map(|v| &v.kind) else {
        panic!("Expected super call");
    };
    assert!(matches!(
        &callee.kind,
        ExprKind::Select { receiver, .. } if matches!(receiver.kind, ExprKind::Super)
    ));
}

#[test]
fn test_node_ids_are_unique() {
    let program = parse_source("class A { val x = 1; val y = x + 2 } class B extends A { }");
    let mut ids = vec![program.classes[0].id, program.classes[1].id];
    for field in program.classes[0].fields() {
        ids.push(field.id);
        ids.push(field.value.as_ref().unwrap().id);
    }
    let count = ids.len();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), count);
}

#[test]
fn test_parse_errors() {
    assert!(parse_fails("class { }"));
    assert!(parse_fails("class A { val = 1 }"));
    assert!(parse_fails("class A { final 42 }"));
    assert!(parse_fails("class A { val x = (1 + }"));
    assert!(parse_fails("class A {"));
}
