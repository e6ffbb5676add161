//! Reference tests — alias chains, escape repair, scope cleanup

use fastcode_lang::config::Config;
use fastcode_lang::runtime::heap::{Escape, Heap};
use fastcode_lang::runtime::scope::Scopes;
use fastcode_lang::runtime::{CapturedOutput, EngineFault, Interpreter, Value};
use pretty_assertions::assert_eq;

fn interpreter() -> (Interpreter, CapturedOutput) {
    let output = CapturedOutput::new();
    let interp = Interpreter::new().with_output(output.clone());
    (interp, output)
}

fn run(source: &str) -> String {
    let (mut interp, output) = interpreter();
    interp.run_source(source, "test.fc").unwrap();
    output.contents()
}

// ── Heap: chains and handles ────────────────────────────────

#[test]
fn stale_handles_are_detected() {
    let mut heap = Heap::new();
    let id = heap.alloc_root(Value::Null);
    heap.discard(id).unwrap();
    assert!(!heap.is_live(id));
    assert!(matches!(heap.value(id), Err(EngineFault::DanglingReference { .. })));

    // The slot is reused under a new generation; the old handle stays dead.
    let reused = heap.alloc_root(Value::Number(2.0));
    assert_ne!(id, reused);
    assert!(!heap.is_live(id));
    assert_eq!(heap.value(reused).unwrap(), &Value::Number(2.0));
}

#[test]
fn aliases_resolve_to_their_root() {
    let mut heap = Heap::new();
    let root = heap.alloc_root(Value::Number(1.0));
    let first = heap.alloc_alias(root).unwrap();
    let second = heap.alloc_alias(first).unwrap();

    assert_eq!(heap.chain(second).unwrap(), vec![second, first, root]);
    assert_eq!(heap.resolve_root(second).unwrap(), root);
    assert_eq!(heap.incoming(root).unwrap(), 1);

    heap.set_value(second, Value::Char('z')).unwrap();
    assert_eq!(heap.value(root).unwrap(), &Value::Char('z'));
}

#[test]
fn point_at_refuses_cycles() {
    let mut heap = Heap::new();
    let root = heap.alloc_root(Value::Null);
    let alias = heap.alloc_alias(root).unwrap();
    assert_eq!(heap.point_at(root, alias), Err(EngineFault::AliasCycle));
}

#[test]
fn discard_frees_unanchored_payload() {
    let mut heap = Heap::new();
    let element = heap.alloc_root(Value::Number(1.0));
    let array = heap.alloc_root(Value::Array(vec![element]));
    assert_eq!(heap.live(), 2);
    heap.discard(array).unwrap();
    assert_eq!(heap.live(), 0);
}

#[test]
fn anchored_references_survive_discard() {
    let mut scopes = Scopes::new();
    let scope = scopes.create(None);
    let mut heap = Heap::new();
    let id = heap.alloc_root(Value::Null);
    heap.anchor(id, scope).unwrap();
    heap.discard(id).unwrap();
    assert!(heap.is_live(id));
    assert_eq!(heap.owner(id).unwrap(), Some(scope));
}

#[test]
fn release_if_unaliased_waits_for_aliases() {
    let mut scopes = Scopes::new();
    let scope = scopes.create(None);
    let mut heap = Heap::new();
    let root = heap.alloc_root(Value::Null);
    heap.anchor(root, scope).unwrap();
    let alias = heap.alloc_alias(root).unwrap();

    heap.release_if_unaliased(root, scope).unwrap();
    assert!(heap.is_live(root));

    heap.discard(alias).unwrap();
    heap.release_if_unaliased(root, scope).unwrap();
    assert!(!heap.is_live(root));
}

#[test]
fn set_value_releases_unaliased_payload() {
    let mut scopes = Scopes::new();
    let scope = scopes.create(None);
    let mut heap = Heap::new();
    let kept = heap.alloc_root(Value::Number(1.0));
    let dropped = heap.alloc_root(Value::Number(2.0));
    let array = heap.alloc_root(Value::Array(vec![kept, dropped]));
    heap.anchor(array, scope).unwrap();
    let outside = heap.alloc_alias(kept).unwrap();

    heap.set_value(array, Value::Null).unwrap();
    assert!(heap.is_live(kept));
    assert!(!heap.is_live(dropped));
    assert_eq!(heap.value(outside).unwrap(), &Value::Number(1.0));
}

#[test]
fn payload_aliasing_its_own_sibling_is_released() {
    let mut scopes = Scopes::new();
    let scope = scopes.create(None);
    let mut heap = Heap::new();
    let element = heap.alloc_root(Value::Number(1.0));
    let sibling = heap.alloc_alias(element).unwrap();
    let array = heap.alloc_root(Value::Array(vec![sibling, element]));
    heap.anchor(array, scope).unwrap();
    assert_eq!(heap.live(), 3);

    heap.set_value(array, Value::Number(0.0)).unwrap();
    assert_eq!(heap.live(), 1);
}

#[test]
fn rebind_releases_replaced_payload() {
    let mut scopes = Scopes::new();
    let scope = scopes.create(None);
    let mut heap = Heap::new();
    let element = heap.alloc_root(Value::Number(1.0));
    let array = heap.alloc_root(Value::Array(vec![element]));
    heap.anchor(array, scope).unwrap();
    let other = heap.alloc_root(Value::Null);
    heap.anchor(other, scope).unwrap();

    heap.rebind(array, other).unwrap();
    assert!(!heap.is_live(element));
    assert_eq!(heap.alias_target(array).unwrap(), Some(other));
}

#[test]
fn release_if_unaliased_frees_payload() {
    let mut scopes = Scopes::new();
    let scope = scopes.create(None);
    let mut heap = Heap::new();
    let first = heap.alloc_root(Value::Number(1.0));
    let second = heap.alloc_root(Value::Number(2.0));
    let array = heap.alloc_root(Value::Array(vec![first, second]));
    heap.anchor(array, scope).unwrap();
    let held = heap.alloc_alias(second).unwrap();

    heap.release_if_unaliased(array, scope).unwrap();
    assert!(!heap.is_live(array));
    assert!(!heap.is_live(first));
    assert!(heap.is_live(second));
    assert_eq!(heap.value(held).unwrap(), &Value::Number(2.0));
}

// ── Heap: escape repair ─────────────────────────────────────

#[test]
fn escaping_alias_takes_over_dying_root() {
    let mut scopes = Scopes::new();
    let outer = scopes.create(None);
    let inner = scopes.create(Some(outer));
    let mut heap = Heap::new();

    let local = heap.alloc_root(Value::Number(1.0));
    heap.anchor(local, inner).unwrap();
    let escaping = heap.alloc_alias(local).unwrap();
    heap.anchor(escaping, outer).unwrap();

    assert_eq!(heap.check_escape(escaping, inner, true).unwrap(), Escape::Safe);
    assert!(heap.is_root(escaping).unwrap());
    assert_eq!(heap.release_scope(inner), 1);
    assert!(!heap.is_live(local));
    assert_eq!(heap.value(escaping).unwrap(), &Value::Number(1.0));
}

#[test]
fn chain_entirely_in_dying_scope_is_doomed() {
    let mut scopes = Scopes::new();
    let scope = scopes.create(None);
    let mut heap = Heap::new();
    let local = heap.alloc_root(Value::Number(1.0));
    heap.anchor(local, scope).unwrap();
    assert_eq!(heap.check_escape(local, scope, true).unwrap(), Escape::Doomed);
}

#[test]
fn repair_can_be_refused() {
    let mut scopes = Scopes::new();
    let outer = scopes.create(None);
    let inner = scopes.create(Some(outer));
    let mut heap = Heap::new();

    let local = heap.alloc_root(Value::Null);
    heap.anchor(local, inner).unwrap();
    let escaping = heap.alloc_alias(local).unwrap();
    heap.anchor(escaping, outer).unwrap();

    assert_eq!(heap.check_escape(escaping, inner, false).unwrap(), Escape::Doomed);
    assert_eq!(heap.alias_target(escaping).unwrap(), Some(local));
}

#[test]
fn dying_intermediate_links_are_bypassed() {
    let mut scopes = Scopes::new();
    let outer = scopes.create(None);
    let inner = scopes.create(Some(outer));
    let mut heap = Heap::new();

    let target = heap.alloc_root(Value::Number(5.0));
    heap.anchor(target, outer).unwrap();
    let middle = heap.alloc_alias(target).unwrap();
    heap.anchor(middle, inner).unwrap();
    let head = heap.alloc_alias(middle).unwrap();
    heap.anchor(head, outer).unwrap();

    assert_eq!(heap.check_escape(head, inner, true).unwrap(), Escape::Safe);
    assert_eq!(heap.alias_target(head).unwrap(), Some(target));
    assert_eq!(heap.release_scope(inner), 1);
    assert_eq!(heap.value(head).unwrap(), &Value::Number(5.0));
}

#[test]
fn surviving_array_gets_copies_of_dying_elements() {
    let mut scopes = Scopes::new();
    let outer = scopes.create(None);
    let inner = scopes.create(Some(outer));
    let mut heap = Heap::new();

    let element = heap.alloc_root(Value::Number(3.0));
    heap.anchor(element, inner).unwrap();
    let array = heap.alloc_root(Value::Array(vec![element]));
    heap.anchor(array, outer).unwrap();

    assert_eq!(heap.check_escape(array, inner, true).unwrap(), Escape::Safe);
    heap.release_scope(inner);

    let Value::Array(items) = heap.value(array).unwrap().clone() else {
        panic!("array changed kind");
    };
    assert_ne!(items[0], element);
    assert_eq!(heap.value(items[0]).unwrap(), &Value::Number(3.0));
    assert_eq!(heap.owner(items[0]).unwrap(), Some(outer));
}

#[test]
fn repair_is_idempotent() {
    let mut scopes = Scopes::new();
    let outer = scopes.create(None);
    let inner = scopes.create(Some(outer));
    let mut heap = Heap::new();

    let local = heap.alloc_root(Value::Number(1.0));
    heap.anchor(local, inner).unwrap();
    let escaping = heap.alloc_alias(local).unwrap();
    heap.anchor(escaping, outer).unwrap();

    heap.check_escape(escaping, inner, true).unwrap();
    let live = heap.live();
    assert_eq!(heap.check_escape(escaping, inner, true).unwrap(), Escape::Safe);
    assert_eq!(heap.live(), live);
}

// ── Interpreter: values crossing call boundaries ────────────

#[test]
fn returned_local_array_survives() {
    let out = run(
        "proc make() { a = [1, 2, 3]; return a; }
         b = make(); b[0] = 10; c = make();
         print(b, c);",
    );
    assert_eq!(out, "[10,2,3] [1,2,3]");
}

#[test]
fn returned_nested_arrays_survive() {
    let out = run(
        "proc nest() { inner = [1, 2]; outer = [inner, [3]]; return outer; }
         n = nest();
         print(n, len(n[0]));",
    );
    assert_eq!(out, "[[1,2],[3]] 2");
}

#[test]
fn returned_struct_keeps_array_property() {
    let out = run(
        "struct Box { items }
         proc mk() { b = new Box; b.items = [1, 2]; return b; }
         x = mk(); x.items[1] = 5;
         print(x);",
    );
    assert_eq!(out, "Box { items: [1,5] }");
}

#[test]
fn returning_array_parameter_aliases_caller_storage() {
    let out = run(
        "proc id(a) { return a; }
         arr = [1]; b = id(arr); b[0] = 7;
         print(arr);",
    );
    assert_eq!(out, "[7]");
}

#[test]
fn reference_to_loop_variable_escapes() {
    let out = run(
        "proc first() { a = [4, 5, 6]; for (x : a) { return &x; } }
         print(first());",
    );
    assert_eq!(out, "4");
}

#[test]
fn global_rebound_to_local_array() {
    let out = run(
        "g = 0;
         proc f() { a = [1, 2]; global g = a; }
         f();
         print(g);",
    );
    assert_eq!(out, "[1,2]");
}

#[test]
fn global_property_pointing_at_local_struct() {
    let out = run(
        "struct Node { next }
         head = new Node;
         proc link() { n = new Node; n.next = [1]; head.next = &n; }
         link();
         print(head);",
    );
    assert_eq!(out, "Node { next: Node { next: [1] } }");
}

#[test]
fn self_referential_return() {
    let out = run(
        "proc selfref() { a = [0]; a[0] = &a; return a; }
         b = selfref();
         print(b, len(b[0]));",
    );
    assert_eq!(out, "[[...]] 1");
}

#[test]
fn shared_storage_is_copied_once() {
    let out = run(
        "proc pair() { a = [1]; p = [a, a]; return p; }
         q = pair(); q[0][0] = 9;
         print(q);",
    );
    assert_eq!(out, "[[9],[9]]");
}

// ── Interpreter: scope cleanup ──────────────────────────────

#[test]
fn calls_return_live_count_to_baseline() {
    let (mut interp, _output) = interpreter();
    interp
        .run_source(
            "struct P { x, items }
             proc make() { a = [1, 2, 3]; return a; }
             proc id(x) { return x; }
             proc build() { p = new P; p.items = [[1], 2]; return p; }",
            "test.fc",
        )
        .unwrap();

    let before = interp.live_references();
    interp
        .run_source("make(); id(5); id([1, 2]); build(); print(make());", "test.fc")
        .unwrap();
    assert_eq!(interp.live_references(), before);
}

#[test]
fn loops_return_live_count_to_baseline() {
    let (mut interp, _output) = interpreter();
    interp.run_source("i = 0; total = 0;", "test.fc").unwrap();
    let before = interp.live_references();
    interp
        .run_source("while (i < 50) { total = total + i * 2; i++; }", "test.fc")
        .unwrap();
    assert_eq!(interp.live_references(), before);
}

#[test]
fn reassigning_compound_returns_live_count_to_baseline() {
    let (mut interp, _output) = interpreter();
    interp.run_source("a = array(10); n = 0;", "test.fc").unwrap();
    let before = interp.live_references();

    interp
        .run_source("while (n < 100) { a = array(10); n++; }", "test.fc")
        .unwrap();
    interp
        .run_source("while (n < 200) { a = array(10); n++; }", "test.fc")
        .unwrap();
    assert_eq!(interp.live_references(), before);

    interp.run_source("a = [[1], [2, 3]]; n = 0;", "test.fc").unwrap();
    let nested = interp.live_references();
    interp
        .run_source("while (n < 100) { a = [[1], [2, 3]]; n++; }", "test.fc")
        .unwrap();
    assert_eq!(interp.live_references(), nested);
}

#[test]
fn rebinding_releases_old_storage() {
    let (mut interp, output) = interpreter();
    interp.run_source("a = [1, 2]; b = [3];", "test.fc").unwrap();
    let before = interp.live_references();
    interp.run_source("a = b; print(a);", "test.fc").unwrap();
    assert_eq!(output.contents(), "[3]");
    assert_eq!(interp.live_references(), before - 2);
}

#[test]
fn iterating_temporary_array_returns_live_count_to_baseline() {
    let (mut interp, output) = interpreter();
    interp.run_source("s = 0;", "test.fc").unwrap();
    let before = interp.live_references();
    interp
        .run_source("for (k : array(1, 2, 3, 4, 5)) { s = s + k; } print(s);", "test.fc")
        .unwrap();
    assert_eq!(output.contents(), "15");
    assert_eq!(interp.live_references(), before);
}

#[test]
fn aliased_element_survives_reassignment() {
    let out = run(
        "x = [7, 8]; e = &x[0];
         x = array(2);
         print(e, x);",
    );
    assert_eq!(out, "7 [null,null]");
}

#[test]
fn aliased_inner_array_survives_reassignment() {
    let out = run(
        "x = [[1, 2], 3]; inner = x[0];
         x = 0;
         inner[1] = 5;
         print(inner, x);",
    );
    assert_eq!(out, "[1,5] 0");
}

#[test]
fn concatenation_keeps_elements_alive() {
    let out = run(
        "a = [1]; c = a + [2];
         c[0] = 5; print(a);
         a = array(0);
         print(c);",
    );
    assert_eq!(out, "[5][5,2]");
}

#[test]
fn index_call_may_overwrite_the_container() {
    let out = run(
        "x = [[1, 2]];
         proc f() { global x = 0; return 1; }
         x[0][f()] = 9;
         print(x);",
    );
    assert_eq!(out, "0");
}

#[test]
fn failed_calls_destroy_their_scopes() {
    let config = Config {
        max_call_depth: 20,
        ..Config::default()
    };
    let mut interp = Interpreter::with_config(config).with_output(CapturedOutput::new());
    interp
        .run_source(
            "proc bad(a) { b = [a, a]; return nope; }
             proc deep(n) { c = [n]; return deep(n + 1); }",
            "test.fc",
        )
        .unwrap();
    let scopes = interp.live_scopes();
    let references = interp.live_references();

    assert!(interp.run_source("bad(1);", "test.fc").is_err());
    assert!(interp.run_source("deep(0);", "test.fc").is_err());
    assert_eq!(interp.live_scopes(), scopes);
    assert_eq!(interp.live_references(), references);
}

#[test]
fn failed_call_releases_its_scope() {
    let (mut interp, _output) = interpreter();
    interp
        .run_source("proc bad(a) { b = [a, a]; return nope; }", "test.fc")
        .unwrap();
    let before = interp.live_references();
    assert!(interp.run_source("bad(1);", "test.fc").is_err());
    assert_eq!(interp.live_references(), before);
}

#[test]
fn recursion_returns_live_count_to_baseline() {
    let (mut interp, output) = interpreter();
    interp
        .run_source(
            "proc range(n) { if (n == 0) { return []; } return range(n - 1) + [n]; }",
            "test.fc",
        )
        .unwrap();
    let before = interp.live_references();
    interp.run_source("print(range(5));", "test.fc").unwrap();
    assert_eq!(output.contents(), "[1,2,3,4,5]");
    assert_eq!(interp.live_references(), before);
}
