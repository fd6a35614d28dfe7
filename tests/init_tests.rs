//! Initialization safety checking tests

use initsafe::init::{ClassId, ClassTable, InitChecker, Value};
use initsafe::{CheckerConfig, Effect, ProgramReport};
use pretty_assertions::assert_eq;

fn check(src: &str) -> ProgramReport {
    initsafe::check(src).unwrap()
}

fn check_with(src: &str, config: CheckerConfig) -> ProgramReport {
    initsafe::check_with(src, &config).unwrap()
}

fn effects<'r>(report: &'r ProgramReport, class: &str) -> &'r [Effect] {
    &report
        .report(class)
        .unwrap_or_else(|| panic!("no report for `{}`", class))
        .effects
}

/// `code` and subject name of every leaf effect found in `class`
fn roots(report: &ProgramReport, class: &str) -> Vec<(&'static str, String)> {
    report
        .report(class)
        .unwrap_or_else(|| panic!("no report for `{}`", class))
        .root_causes()
        .into_iter()
        .map(|effect| (effect.code(), subject(effect)))
        .collect()
}

fn subject(effect: &Effect) -> String {
    match effect {
        Effect::UninitializedAccess { field, .. }
        | Effect::NotYetAssignedField { field, .. }
        | Effect::AccessCold { field, .. }
        | Effect::LeakedAssignment { field, .. } => field.clone(),
        Effect::CallCold { method, .. }
        | Effect::UnknownCallTarget { method, .. }
        | Effect::OverrideRisk { method, .. } => method.clone(),
        Effect::LeakedArgument { callee, .. } => callee.clone(),
        _ => String::new(),
    }
}

// ==================== SOUNDNESS ====================

const VIRTUAL_CALL: &str = r#"
    class Base {
        val size = compute()
        def compute(): Int = 1
    }

    class Derived extends Base {
        val factor = 2
        override def compute(): Int = factor * 2
    }
"#;

#[test]
fn test_overridable_call_from_base_constructor() {
    let report = check(VIRTUAL_CALL);

    assert_eq!(
        roots(&report, "Base"),
        vec![("init::override_risk", "compute".to_string())]
    );

    let derived = roots(&report, "Derived");
    assert!(derived.contains(&("init::override_risk", "compute".to_string())));
    assert!(derived.contains(&("init::uninitialized_access", "factor".to_string())));
}

#[test]
fn test_override_chain_is_kept() {
    let report = check(VIRTUAL_CALL);
    let call = effects(&report, "Derived")
        .iter()
        .find(|e| e.is_composite())
        .unwrap();
    match call {
        Effect::Call {
            method, effects, ..
        } => {
            assert_eq!(method, "compute");
            assert!(matches!(
                effects.as_slice(),
                [Effect::UninitializedAccess { field, .. }] if field == "factor"
            ));
        }
        other => panic!("expected call effect, got {:?}", other),
    }
}

#[test]
fn test_override_risk_can_be_disabled() {
    let config = CheckerConfig {
        report_override_risk: false,
        ..CheckerConfig::default()
    };
    let report = check_with(VIRTUAL_CALL, config);
    assert!(effects(&report, "Base").is_empty());
    assert_eq!(
        roots(&report, "Derived"),
        vec![("init::uninitialized_access", "factor".to_string())]
    );
}

#[test]
fn test_final_class_in_declaration_order_is_clean() {
    let report = check(
        r#"
        final class Account(owner: String, initial: Int) {
            val balance = initial
            var history = 0
            val summary = describe()
            def describe(): String = owner + balance
            lazy val doubled = balance * 2
            val twice = doubled
            history = history + 1
        }
    "#,
    );
    assert!(report.is_clean(), "{:?}", report.reports);
}

#[test]
fn test_non_overridable_calls_are_static() {
    let report = check(
        r#"
        class P {
            val a = helper()
            val b = setup()
            val c = fixed()
            private def helper(): Int = 1
            @init def setup(): Int = 2
            final def fixed(): Int = 3
        }

        class Q {
            def hook(): Int = 1
        }

        final class R extends Q {
            override def hook(): Int = 2
            val h = super.hook()
        }
    "#,
    );
    assert!(report.is_clean(), "{:?}", report.reports);
}

#[test]
fn test_forward_reads() {
    let report = check(
        r#"
        final class T {
            val v = try { early } catch (e) { 0 } finally { late }
            val w = this.late
            val early = 1
            val late = 2
        }
    "#,
    );
    assert_eq!(
        roots(&report, "T"),
        vec![
            ("init::uninitialized_access", "early".to_string()),
            ("init::uninitialized_access", "late".to_string()),
            ("init::not_yet_assigned", "late".to_string()),
        ]
    );
}

#[test]
fn test_inherited_fields_are_initialized_first() {
    let report = check(
        r#"
        class Base(n: Int) {
            val size = n
        }

        final class Sized extends Base(3) {
            val twice = size * 2
        }
    "#,
    );
    assert!(report.is_clean(), "{:?}", report.reports);
}

// ==================== LEAKS ====================

#[test]
fn test_partial_param_stored_in_field() {
    let report = check(
        r#"
        class A { }

        class B(@partial a: A) {
            val x = a
        }
    "#,
    );
    assert!(effects(&report, "A").is_empty());
    assert_eq!(
        roots(&report, "B"),
        vec![("init::leaked_assignment", "x".to_string())]
    );
}

#[test]
fn test_partial_field_accepts_this() {
    let report = check(
        r#"
        final class A(@partial p: A) {
            @partial val me = this
            @partial val peer = p
        }
    "#,
    );
    assert!(report.is_clean(), "{:?}", report.reports);
}

#[test]
fn test_this_passed_as_argument() {
    let report = check(
        r#"
        class Node(next: Node) { }

        final class Head {
            val node = new Node(this)
        }

        class Listener(target: Listener) { }

        final class Registered extends Listener(this) { }
    "#,
    );
    assert!(effects(&report, "Node").is_empty());
    assert_eq!(
        roots(&report, "Head"),
        vec![("init::leaked_argument", "new Node".to_string())]
    );
    assert_eq!(
        roots(&report, "Registered"),
        vec![("init::leaked_argument", "new Listener".to_string())]
    );
}

#[test]
fn test_partial_constructor_param_accepts_this() {
    let report = check(
        r#"
        final class Child(@partial parent: Parent) {
            val ready = 1
        }

        final class Parent {
            val child = new Child(this)
        }
    "#,
    );
    let parent = roots(&report, "Parent");
    // The child object holds a partial reference, so it is not fully
    // initialized itself
    assert_eq!(
        parent,
        vec![("init::leaked_assignment", "child".to_string())]
    );
}

#[test]
fn test_method_sees_field_refined_after_first_call() {
    let report = check(
        r#"
        final class A {
            @partial var p = 1
            def get() = p
            val r = get()
            p = this
            val s = get()
        }
    "#,
    );
    assert_eq!(
        roots(&report, "A"),
        vec![("init::leaked_assignment", "s".to_string())]
    );
}

#[test]
fn test_closure_sees_local_var_refined_after_first_call() {
    let report = check(
        r#"
        final class A {
            val s = {
                var held = 1
                val read = || held
                val first = read()
                held = this
                read()
            }
        }
    "#,
    );
    assert_eq!(
        roots(&report, "A"),
        vec![("init::leaked_assignment", "s".to_string())]
    );
}

#[test]
fn test_private_parent_field_is_not_shadowed() {
    let report = check(
        r#"
        class Base {
            private val x = 1
            val y = x
        }

        final class Derived(@partial x: Base) extends Base { }
    "#,
    );
    assert!(report.is_clean(), "{:?}", report.reports);
}

// ==================== CLOSURES ====================

#[test]
fn test_escaping_closure() {
    let report = check(
        r#"
        final class E {
            val callback = || total
            val total = 1
        }
    "#,
    );
    assert!(matches!(
        effects(&report, "E"),
        [Effect::EscapingClosure { .. }]
    ));
}

#[test]
fn test_closure_applied_during_construction() {
    let report = check(
        r#"
        final class Apply {
            val f = {
                val g = || later
                g()
            }
            val later = 1
        }
    "#,
    );
    let found = effects(&report, "Apply");
    assert!(matches!(found, [Effect::Closure { .. }]));
    assert_eq!(
        roots(&report, "Apply"),
        vec![("init::uninitialized_access", "later".to_string())]
    );
}

// ==================== COLD VALUES ====================

#[test]
fn test_cold_receiver() {
    let report = check(
        r#"
        class Peer(@partial other: Peer) {
            val n = other.size()
            val m = other.n
            final def size(): Int = 1
        }
    "#,
    );
    assert_eq!(
        roots(&report, "Peer"),
        vec![
            ("init::cold_call", "size".to_string()),
            ("init::cold_access", "n".to_string()),
        ]
    );
}

// ==================== BRANCHES ====================

#[test]
fn test_branch_join_distributes_over_objects() {
    let report = check(
        r#"
        final class Other(@partial owner: Host) {
            val y = 2
            final def size(): Int = y
        }

        final class Host(flag: Boolean) {
            @partial val p = if (flag) this else new Other(this)
            val q = p.y
            val r = p.size()
            final def size(): Int = y
            val y = 1
        }
    "#,
    );
    assert!(effects(&report, "Other").is_empty());
    // Only the `Host` alternative lacks `y`
    assert_eq!(
        roots(&report, "Host"),
        vec![
            ("init::not_yet_assigned", "y".to_string()),
            ("init::uninitialized_access", "y".to_string()),
        ]
    );
}

#[test]
fn test_branch_join_assignment_reaches_every_object() {
    let report = check(
        r#"
        final class Other {
            var link = 0
        }

        final class Host(flag: Boolean) {
            var link = 0
            @partial val p = if (flag) this else new Other()
            p.link = 1
            val seen = link
        }
    "#,
    );
    assert!(report.is_clean(), "{:?}", report.reports);
}

#[test]
fn test_loop_body_and_finalizer_are_checked() {
    let report = check(
        r#"
        final class Loop {
            var i = 0
            val total = {
                while (i < limit) { i = i + step };
                0
            }
            val after = try { 1 } finally { late }
            val limit = 10
            val step = 1
            val late = 2
        }
    "#,
    );
    assert_eq!(
        roots(&report, "Loop"),
        vec![
            ("init::uninitialized_access", "limit".to_string()),
            ("init::uninitialized_access", "step".to_string()),
            ("init::uninitialized_access", "late".to_string()),
        ]
    );
}

// ==================== OUTER OBJECTS ====================

#[test]
fn test_inner_reads_outer_field_too_early() {
    let report = check(
        r#"
        class Outer {
            val inner = new Inner()
            val ready = 1

            class Inner {
                val seen = ready
            }
        }
    "#,
    );
    assert_eq!(
        roots(&report, "Outer"),
        vec![
            ("init::uninitialized_access", "ready".to_string()),
            ("init::leaked_assignment", "inner".to_string()),
        ]
    );
    // On its own, the outer object is assumed complete
    assert!(effects(&report, "Inner").is_empty());
}

#[test]
fn test_explicit_outer_this() {
    let report = check(
        r#"
        class Outer {
            @partial val inner = new Inner()
            val ready = 1

            class Inner {
                val seen = Outer.this.ready
            }
        }
    "#,
    );
    assert_eq!(
        roots(&report, "Outer"),
        vec![("init::not_yet_assigned", "ready".to_string())]
    );
}

// ==================== UNKNOWN TARGETS ====================

#[test]
fn test_abstract_method_is_unknown_target() {
    let src = r#"
        abstract class Shape {
            val area = compute()
            def compute(): Int
        }
    "#;
    let report = check(src);
    assert_eq!(
        roots(&report, "Shape"),
        vec![("init::unknown_call_target", "compute".to_string())]
    );

    let config = CheckerConfig {
        report_unknown_calls: false,
        ..CheckerConfig::default()
    };
    assert!(check_with(src, config).is_clean());
}

#[test]
fn test_member_of_external_parent() {
    let report = check(
        r#"
        class Widget extends Component {
            val label = render()
        }
    "#,
    );
    assert_eq!(
        roots(&report, "Widget"),
        vec![("init::unknown_call_target", "render".to_string())]
    );
}

// ==================== LAZY MEMBERS ====================

#[test]
fn test_lazy_member_forced_once() {
    let report = check(
        r#"
        final class L {
            lazy val cached = y + 1
            val a = cached
            val b = cached
            val y = 1
        }
    "#,
    );
    let class = report.report("L").unwrap();
    assert_eq!(class.stats.lazy_evaluations, 1);
    // Both forces report the same memoized chain
    assert!(matches!(
        class.effects.as_slice(),
        [Effect::Force { member, .. }] if member == "cached"
    ));
    assert_eq!(
        roots(&report, "L"),
        vec![("init::uninitialized_access", "y".to_string())]
    );
}

// ==================== TERMINATION ====================

#[test]
fn test_mutual_recursion_terminates() {
    let report = check(
        r#"
        final class M {
            def even(n: Int): Boolean = if (n == 0) true else odd(n - 1)
            def odd(n: Int): Boolean = if (n == 0) false else even(n - 1)
            val r = even(10)
        }
    "#,
    );
    assert!(report.is_clean(), "{:?}", report.reports);
}

#[test]
fn test_self_referential_closure_terminates() {
    let report = check(
        r#"
        final class C {
            val n = run()
            def run(): Int = {
                val spin = |x| spin(x)
                spin(1)
            }
        }
    "#,
    );
    assert!(report.is_clean(), "{:?}", report.reports);
}

#[test]
fn test_self_constructing_local_class_terminates() {
    let report = check(
        r#"
        final class Host {
            val made = build()
            def build(): Int = {
                class Chain { val next = new Chain() }
                new Chain()
                1
            }
        }
    "#,
    );
    assert_eq!(
        roots(&report, "Host"),
        vec![("init::leaked_assignment", "next".to_string())]
    );
}

#[test]
fn test_nested_subclass_of_enclosing_class_terminates() {
    let report = check(
        r#"
        class A {
            class B extends A { }
            val x = new B()
        }
    "#,
    );
    assert!(report.faults.is_empty(), "{:?}", report.faults);
    assert!(report.report("A").is_some());
    assert!(report.report("B").is_some());
}

// ==================== HEAP ====================

#[test]
fn test_reconstruction_only_refines_the_record() {
    let src = r#"
        class A(@partial p: A) {
            @partial val me = this
            var count = 0
            count = count + 1
        }
    "#;
    let program = initsafe::parse(src).unwrap();
    let table = ClassTable::build(&program);
    let config = CheckerConfig::default();
    let mut checker = InitChecker::new(&table, &config);
    let class = table.by_name("A").unwrap();

    checker.check_class(class).unwrap();
    let addr = checker.root_address(class);
    let before: Vec<(ClassId, String, Value)> = checker
        .heap()
        .get(&addr)
        .unwrap()
        .fields()
        .map(|(owner, name, value)| (owner, name.to_string(), value.clone()))
        .collect();
    assert_eq!(before.len(), 3);

    checker.check_class(class).unwrap();
    let after = checker.heap().get(&addr).unwrap();
    for (owner, name, value) in &before {
        let now = after.field(*owner, name).unwrap();
        assert_eq!(&value.join(now), now);
    }
    assert!(after.fields().count() >= before.len());
}

// ==================== FAULTS ====================

#[test]
fn test_unresolved_name_aborts_only_that_class() {
    let report = check(
        r#"
        class Broken { val x = missing }
        final class Fine { val y = 1 }
    "#,
    );
    assert!(matches!(
        report.fault("Broken"),
        Some(initsafe::init::AnalysisFault::UnresolvedName { name, .. }) if name == "missing"
    ));
    assert!(effects(&report, "Fine").is_empty());
    assert!(!report.is_clean());
}

#[test]
fn test_class_selection() {
    let config = CheckerConfig {
        classes: vec!["Derived".to_string()],
        ..CheckerConfig::default()
    };
    let report = check_with(VIRTUAL_CALL, config);
    assert!(report.report("Base").is_none());
    assert!(report.report("Derived").is_some());
}

#[test]
fn test_json_report() {
    let report = check(VIRTUAL_CALL);
    let json = report.to_json();
    let reports = json["reports"].as_array().unwrap();
    assert_eq!(reports.len(), 2);
    assert_eq!(reports[0]["class"], "Base");
    assert_eq!(reports[0]["effects"][0]["kind"], "override_risk");
}
