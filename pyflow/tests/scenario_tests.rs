//! End-to-end analysis of small modules
//!
//! Each test assembles a module with `CodeBuilder`, runs it through the
//! interpreter and checks the inferred types of module-level names and the
//! errors reported along the way.

mod common;

use std::sync::Arc;

use common::*;
use pretty_assertions::assert_eq;
use pyflow::ErrorKind;
use pyflow_bytecode::{flags, CodeBuilder, Constant, OpName};

// ============================================================================
// Joins and containers
// ============================================================================

#[test]
fn test_container_union_after_join() {
    // if __random__: x = [1]
    // else:          x = ["a"]
    let mut b = CodeBuilder::module("m.py");
    if_random(
        &mut b,
        |b| {
            b.load_const(Constant::Int(1))
                .op_arg(OpName::BuildList, 1)
                .name_op(OpName::StoreName, "x");
        },
        |b| {
            b.load_const(string("a"))
                .op_arg(OpName::BuildList, 1)
                .name_op(OpName::StoreName, "x");
        },
    );
    let analysis = analyze(finish(b));

    assert_eq!(analysis.type_of("x"), "list[int or str]");
    assert!(analysis.errors().is_empty(), "{:?}", analysis.messages());
}

#[test]
fn test_sequential_inserts_widen_parameters() {
    // l = []; l.append(1); l.append("a")
    // s = set(); s.add(1); s.add("a")
    // d = {}; d[1] = "a"; d["k"] = 2
    let mut b = CodeBuilder::module("m.py");
    b.op_arg(OpName::BuildList, 0).name_op(OpName::StoreName, "l");
    b.op_arg(OpName::BuildSet, 0).name_op(OpName::StoreName, "s");
    b.op_arg(OpName::BuildMap, 0).name_op(OpName::StoreName, "d");
    for (target, method) in [("l", "append"), ("s", "add")] {
        for value in [Constant::Int(1), string("a")] {
            b.name_op(OpName::LoadName, target)
                .name_op(OpName::LoadAttr, method)
                .load_const(value)
                .op_arg(OpName::CallFunction, 1)
                .op(OpName::PopTop);
        }
    }
    for (key, value) in [(Constant::Int(1), string("a")), (string("k"), Constant::Int(2))] {
        b.load_const(value)
            .name_op(OpName::LoadName, "d")
            .load_const(key)
            .op(OpName::StoreSubscr);
    }
    let analysis = analyze(finish(b));

    assert!(analysis.errors().is_empty(), "{:?}", analysis.messages());
    assert_eq!(analysis.type_of("l"), "list[int or str]");
    assert_eq!(analysis.type_of("s"), "set[int or str]");
    assert_eq!(analysis.type_of("d"), "dict[int or str, str or int]");
}

#[test]
fn test_dict_key_union_after_join() {
    // d = {}
    // if __random__: d["k"] = 1
    // else:          d["k"] = "s"
    // y = d["k"]
    let mut b = CodeBuilder::module("m.py");
    b.op_arg(OpName::BuildMap, 0).name_op(OpName::StoreName, "d");
    fn store_key(value: Constant) -> impl FnOnce(&mut CodeBuilder) {
        move |b| {
            b.load_const(value)
                .name_op(OpName::LoadName, "d")
                .load_const(string("k"))
                .op(OpName::StoreSubscr);
        }
    }
    if_random(&mut b, store_key(Constant::Int(1)), store_key(string("s")));
    b.name_op(OpName::LoadName, "d")
        .load_const(string("k"))
        .op(OpName::BinarySubscr)
        .name_op(OpName::StoreName, "y");
    let analysis = analyze(finish(b));

    assert_eq!(analysis.type_of("y"), "int or str");
    assert!(analysis.errors().is_empty(), "{:?}", analysis.messages());
}

#[test]
fn test_tuple_unpacking_keeps_element_types() {
    // a, b = 1, "s"
    let mut b = CodeBuilder::module("m.py");
    b.load_const(Constant::Int(1))
        .load_const(string("s"))
        .op_arg(OpName::BuildTuple, 2)
        .op_arg(OpName::UnpackSequence, 2)
        .name_op(OpName::StoreName, "a")
        .name_op(OpName::StoreName, "b");
    let analysis = analyze(finish(b));

    assert_eq!(analysis.type_of("a"), "int");
    assert_eq!(analysis.type_of("b"), "str");
}

// ============================================================================
// Calls
// ============================================================================

#[test]
fn test_direct_recursion_gives_up() {
    // def f(): return f()
    // x = f()
    let mut f = CodeBuilder::function("f", &[]);
    f.name_op(OpName::LoadGlobal, "f")
        .op_arg(OpName::CallFunction, 0)
        .op(OpName::ReturnValue);
    let mut b = CodeBuilder::module("m.py");
    def_function(&mut b, "f", f.build().unwrap());
    assign_call(&mut b, "x", "f", &[]);
    let analysis = analyze(finish(b));

    assert_eq!(analysis.type_of("x"), "?");
    assert!(analysis.errors().is_empty(), "{:?}", analysis.messages());
}

#[test]
fn test_missing_arguments_reported_once() {
    // def g(a, b): return a
    // x = g()
    let mut g = CodeBuilder::function("g", &["a", "b"]);
    g.fast_op(OpName::LoadFast, "a").op(OpName::ReturnValue);
    let mut b = CodeBuilder::module("m.py");
    def_function(&mut b, "g", g.build().unwrap());
    assign_call(&mut b, "x", "g", &[]);
    let analysis = analyze(finish(b));

    assert_eq!(analysis.count(ErrorKind::WrongArgCount), 1);
    assert_eq!(analysis.errors().len(), 1, "{:?}", analysis.messages());
    assert_eq!(analysis.type_of("x"), "?");
}

#[test]
fn test_function_return_type() {
    // def ident(a): return a
    // x = ident(1)
    let mut f = CodeBuilder::function("ident", &["a"]);
    f.fast_op(OpName::LoadFast, "a").op(OpName::ReturnValue);
    let mut b = CodeBuilder::module("m.py");
    def_function(&mut b, "ident", f.build().unwrap());
    assign_call(&mut b, "x", "ident", &[Constant::Int(1)]);
    assign_call(&mut b, "y", "ident", &[string("s")]);
    let analysis = analyze(finish(b));

    assert_eq!(analysis.type_of("x"), "int");
    assert_eq!(analysis.type_of("y"), "str");
    assert_eq!(analysis.type_of("ident"), "Callable");
}

#[test]
fn test_builtin_called_with_too_many_args() {
    // hex(1, 2, 3, 4)
    let mut b = CodeBuilder::module("m.py");
    call_name(
        &mut b,
        "hex",
        &[Constant::Int(1), Constant::Int(2), Constant::Int(3), Constant::Int(4)],
    );
    b.op(OpName::PopTop);
    let analysis = analyze(finish(b));

    assert_eq!(analysis.count(ErrorKind::WrongArgCount), 1);
    assert_eq!(
        analysis.errors().errors()[0].message,
        "Function hex was called with 4 args instead of expected 1"
    );
}

#[test]
fn test_builtin_return_type() {
    let mut b = CodeBuilder::module("m.py");
    assign_call(&mut b, "h", "hex", &[Constant::Int(255)]);
    let analysis = analyze(finish(b));

    assert_eq!(analysis.type_of("h"), "str");
    assert!(analysis.errors().is_empty(), "{:?}", analysis.messages());
}

#[test]
fn test_same_error_from_two_call_sites_reported_once() {
    // def f(): return hex(1, 2)
    // f()
    // f()
    let mut f = CodeBuilder::function("f", &[]);
    f.name_op(OpName::LoadGlobal, "hex")
        .load_const(Constant::Int(1))
        .load_const(Constant::Int(2))
        .op_arg(OpName::CallFunction, 2)
        .op(OpName::ReturnValue);
    let mut b = CodeBuilder::module("m.py");
    def_function(&mut b, "f", f.build().unwrap());
    b.line(5);
    call_name(&mut b, "f", &[]);
    b.op(OpName::PopTop);
    b.line(6);
    call_name(&mut b, "f", &[]);
    b.op(OpName::PopTop);
    let analysis = analyze(finish(b));

    assert_eq!(analysis.count(ErrorKind::WrongArgCount), 1, "{:?}", analysis.messages());
}

#[test]
fn test_generator_function_returns_generator() {
    // def gen(): yield 1
    // g = gen()
    let mut f = CodeBuilder::function("gen", &[]).flag(flags::GENERATOR);
    f.load_const(Constant::Int(1))
        .op(OpName::YieldValue)
        .op(OpName::PopTop)
        .load_const(Constant::None)
        .op(OpName::ReturnValue);
    let mut b = CodeBuilder::module("m.py");
    def_function(&mut b, "gen", f.build().unwrap());
    assign_call(&mut b, "g", "gen", &[]);
    let analysis = analyze(finish(b));

    assert_eq!(analysis.type_of("g"), "generator[int]");
}

// ============================================================================
// Attributes and operators
// ============================================================================

#[test]
fn test_attribute_on_none_or_int_is_attribute_error() {
    // if __random__: x = None
    // else:          x = 1
    // x.foo
    let mut b = CodeBuilder::module("m.py");
    if_random(
        &mut b,
        |b| {
            assign_const(b, "x", Constant::None);
        },
        |b| {
            assign_const(b, "x", Constant::Int(1));
        },
    );
    b.name_op(OpName::LoadName, "x")
        .name_op(OpName::LoadAttr, "foo")
        .op(OpName::PopTop);
    let analysis = analyze(finish(b));

    assert_eq!(analysis.count(ErrorKind::AttributeError), 1, "{:?}", analysis.messages());
    assert_eq!(analysis.count(ErrorKind::NoneAttr), 0);
    assert!(analysis.errors().errors()[0].message.contains("No attribute 'foo'"));
}

#[test]
fn test_unsupported_operands_reported() {
    // x = "a" ^ "b"
    // y = "a" + 1
    let mut b = CodeBuilder::module("m.py");
    b.load_const(string("a"))
        .load_const(string("b"))
        .op(OpName::BinaryXor)
        .name_op(OpName::StoreName, "x");
    b.load_const(string("a"))
        .load_const(Constant::Int(1))
        .op(OpName::BinaryAdd)
        .name_op(OpName::StoreName, "y");
    let analysis = analyze(finish(b));

    assert_eq!(analysis.count(ErrorKind::UnsupportedOperands), 2, "{:?}", analysis.messages());
    assert_eq!(
        analysis.errors().errors()[0].message,
        "Unsupported operands for __xor__: 'str' and 'str'"
    );
}

#[test]
fn test_numeric_addition() {
    // x = 1 + 2.0
    let mut b = CodeBuilder::module("m.py");
    b.load_const(Constant::Int(1))
        .load_const(Constant::Float(2.0))
        .op(OpName::BinaryAdd)
        .name_op(OpName::StoreName, "x");
    let analysis = analyze(finish(b));

    assert_eq!(analysis.type_of("x"), "float");
    assert!(analysis.errors().is_empty(), "{:?}", analysis.messages());
}

#[test]
fn test_undefined_name_reported_once_and_absorbed() {
    // x = missing.foo + 1
    let mut b = CodeBuilder::module("m.py");
    b.name_op(OpName::LoadName, "missing")
        .name_op(OpName::LoadAttr, "foo")
        .load_const(Constant::Int(1))
        .op(OpName::BinaryAdd)
        .name_op(OpName::StoreName, "x");
    let analysis = analyze(finish(b));

    assert_eq!(analysis.errors().len(), 1, "{:?}", analysis.messages());
    assert_eq!(analysis.count(ErrorKind::NameError), 1);
    assert_eq!(analysis.type_of("x"), "?");
}

#[test]
fn test_call_on_undefined_name_absorbed() {
    // x = missing.foo(1)()
    let mut b = CodeBuilder::module("m.py");
    b.name_op(OpName::LoadName, "missing")
        .name_op(OpName::LoadAttr, "foo")
        .load_const(Constant::Int(1))
        .op_arg(OpName::CallFunction, 1)
        .op_arg(OpName::CallFunction, 0)
        .name_op(OpName::StoreName, "x");
    let analysis = analyze(finish(b));

    assert_eq!(analysis.errors().len(), 1, "{:?}", analysis.messages());
    assert_eq!(analysis.count(ErrorKind::NameError), 1);
    assert_eq!(analysis.type_of("x"), "?");
}

// ============================================================================
// Imports
// ============================================================================

fn import_name(b: &mut CodeBuilder, module: &str, fromlist: Constant) {
    b.load_const(Constant::Int(-1))
        .load_const(fromlist)
        .name_op(OpName::ImportName, module);
}

#[test]
fn test_import_unknown_module() {
    let mut b = CodeBuilder::module("m.py");
    import_name(&mut b, "nonexistent", Constant::None);
    b.name_op(OpName::StoreName, "nonexistent");
    let analysis = analyze(finish(b));

    assert_eq!(analysis.count(ErrorKind::ImportError), 1);
    assert_eq!(
        analysis.errors().errors()[0].message,
        "Can't find module 'nonexistent'."
    );
}

#[test]
fn test_import_library_module_and_submodule() {
    // import os
    // from os import path
    let mut b = CodeBuilder::module("m.py");
    import_name(&mut b, "os", Constant::None);
    b.name_op(OpName::StoreName, "os");
    import_name(&mut b, "os", Constant::Tuple(vec![string("path")]));
    b.name_op(OpName::ImportFrom, "path")
        .name_op(OpName::StoreName, "path")
        .op(OpName::PopTop);
    let analysis = analyze(finish(b));

    assert!(analysis.errors().is_empty(), "{:?}", analysis.messages());
    assert_eq!(analysis.type_of("os"), "module 'os'");
    assert_eq!(analysis.type_of("path"), "module 'os.path'");
}

// ============================================================================
// Classes
// ============================================================================

#[test]
fn test_invalid_base_class() {
    // class Foo(3): pass
    let mut body = CodeBuilder::class_body("Foo");
    body.op(OpName::LoadLocals).op(OpName::ReturnValue);
    let mut b = CodeBuilder::module("m.py");
    b.load_const(string("Foo"))
        .load_const(Constant::Int(3))
        .op_arg(OpName::BuildTuple, 1)
        .load_const(Constant::Code(Arc::new(body.build().unwrap())))
        .op_arg(OpName::MakeFunction, 0)
        .op_arg(OpName::CallFunction, 0)
        .op(OpName::BuildClass)
        .name_op(OpName::StoreName, "Foo");
    let analysis = analyze(finish(b));

    assert_eq!(analysis.count(ErrorKind::BaseClassError), 1, "{:?}", analysis.messages());
    assert_eq!(analysis.errors().errors()[0].message, "Invalid base class: int");
    assert_eq!(analysis.type_of("Foo"), "Type[Foo]");
}

#[test]
fn test_python3_class_attribute() {
    // class Foo:
    //     attr = 1
    // y = Foo().attr
    let mut body = CodeBuilder::class_body("Foo");
    body.load_const(Constant::Int(1))
        .name_op(OpName::StoreName, "attr")
        .load_const(Constant::None)
        .op(OpName::ReturnValue);
    let mut b = CodeBuilder::module("m.py");
    b.op(OpName::LoadBuildClass)
        .load_const(Constant::Code(Arc::new(body.build().unwrap())))
        .load_const(string("Foo"))
        .op_arg(OpName::MakeFunction, 0)
        .load_const(string("Foo"))
        .op_arg(OpName::CallFunction, 2)
        .name_op(OpName::StoreName, "Foo");
    call_name(&mut b, "Foo", &[]);
    b.name_op(OpName::LoadAttr, "attr")
        .name_op(OpName::StoreName, "y");
    let analysis = analyze_with(finish(b), python3());

    assert!(analysis.errors().is_empty(), "{:?}", analysis.messages());
    assert_eq!(analysis.type_of("Foo"), "Type[Foo]");
    assert_eq!(analysis.type_of("y"), "int");
}

#[test]
fn test_attribute_delete_on_one_branch_keeps_other() {
    // class C: pass
    // o = C(); o.a = 1
    // if __random__: del o.a
    // else:          y = o.a
    let mut body = CodeBuilder::class_body("C");
    body.load_const(Constant::None).op(OpName::ReturnValue);
    let mut b = CodeBuilder::module("m.py");
    b.op(OpName::LoadBuildClass)
        .load_const(Constant::Code(Arc::new(body.build().unwrap())))
        .load_const(string("C"))
        .op_arg(OpName::MakeFunction, 0)
        .load_const(string("C"))
        .op_arg(OpName::CallFunction, 2)
        .name_op(OpName::StoreName, "C");
    assign_call(&mut b, "o", "C", &[]);
    b.load_const(Constant::Int(1))
        .name_op(OpName::LoadName, "o")
        .name_op(OpName::StoreAttr, "a");
    if_random(
        &mut b,
        |b| {
            b.name_op(OpName::LoadName, "o").name_op(OpName::DeleteAttr, "a");
        },
        |b| {
            b.name_op(OpName::LoadName, "o")
                .name_op(OpName::LoadAttr, "a")
                .name_op(OpName::StoreName, "y");
        },
    );
    let analysis = analyze_with(finish(b), python3());

    assert!(analysis.errors().is_empty(), "{:?}", analysis.messages());
    assert_eq!(analysis.type_of("y"), "int");
}

// ============================================================================
// Annotations (Python 3)
// ============================================================================

fn def_annotated(b: &mut CodeBuilder, name: &str, annotation: impl FnOnce(&mut CodeBuilder)) {
    let mut f = CodeBuilder::function(name, &["x"]);
    f.fast_op(OpName::LoadFast, "x").op(OpName::ReturnValue);
    annotation(b);
    b.load_const(Constant::Tuple(vec![string("x")]))
        .load_const(Constant::Code(Arc::new(f.build().unwrap())))
        .load_const(string(name))
        .op_arg(OpName::MakeFunction, 2 << 16)
        .name_op(OpName::StoreName, name);
}

#[test]
fn test_annotation_mismatch_reported() {
    // def f(x: int): return x
    // f("s")
    let mut b = CodeBuilder::module("m.py");
    def_annotated(&mut b, "f", |b| {
        b.name_op(OpName::LoadName, "int");
    });
    call_name(&mut b, "f", &[string("s")]);
    b.op(OpName::PopTop);
    assign_call(&mut b, "ok", "f", &[Constant::Int(1)]);
    let analysis = analyze_with(finish(b), python3());

    assert_eq!(analysis.count(ErrorKind::WrongArgTypes), 1, "{:?}", analysis.messages());
    assert_eq!(analysis.type_of("ok"), "int");
}

#[test]
fn test_invalid_annotation_reported() {
    // def f(x: 3): return x
    let mut b = CodeBuilder::module("m.py");
    def_annotated(&mut b, "f", |b| {
        b.load_const(Constant::Int(3));
    });
    let analysis = analyze_with(finish(b), python3());

    assert_eq!(analysis.count(ErrorKind::InvalidAnnotation), 1, "{:?}", analysis.messages());
    assert_eq!(
        analysis.errors().errors()[0].message,
        "Invalid type annotation for parameter 'x'"
    );
}
