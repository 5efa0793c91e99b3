//! Control flow: branches, loops, exception handlers and `with` blocks.

mod common;

use common::*;
use pretty_assertions::assert_eq;
use pyflow::ErrorKind;
use std::sync::Arc;

use pyflow_bytecode::{compare, CodeBuilder, CodeObject, Constant, OpName};

/// `x = None` or `x = 1`, depending on `__random__`.
fn none_or_int(b: &mut CodeBuilder) {
    if_random(
        b,
        |b| assign_const(b, "x", Constant::None),
        |b| assign_const(b, "x", Constant::Int(1)),
    );
}

#[test]
fn test_branch_join_unions_bindings() {
    let mut b = CodeBuilder::module("m.py");
    none_or_int(&mut b);
    let analysis = analyze(finish(b));

    assert_eq!(analysis.type_of("x"), "None or int");
}

#[test]
fn test_truth_test_hides_none_in_true_branch() {
    // if x: y = x
    let mut b = CodeBuilder::module("m.py");
    none_or_int(&mut b);
    let end = b.new_label();
    b.name_op(OpName::LoadName, "x")
        .jump(OpName::PopJumpIfFalse, end)
        .name_op(OpName::LoadName, "x")
        .name_op(OpName::StoreName, "y")
        .bind(end);
    let analysis = analyze(finish(b));

    assert_eq!(analysis.type_of("y"), "int");
    assert_eq!(analysis.type_of("x"), "None or int");
}

#[test]
fn test_attribute_access_guarded_by_truth_test() {
    // if x: n = x.real
    // No error: the true branch only sees the int.
    let mut b = CodeBuilder::module("m.py");
    none_or_int(&mut b);
    let end = b.new_label();
    b.name_op(OpName::LoadName, "x")
        .jump(OpName::PopJumpIfFalse, end)
        .name_op(OpName::LoadName, "x")
        .name_op(OpName::LoadAttr, "real")
        .name_op(OpName::StoreName, "n")
        .bind(end);
    let analysis = analyze(finish(b));

    assert!(analysis.errors().is_empty(), "{:?}", analysis.messages());
    assert_eq!(analysis.type_of("n"), "int");
}

#[test]
fn test_delete_on_one_branch_keeps_other() {
    // x = 1
    // if __random__: del x
    // else:          y = x
    let mut b = CodeBuilder::module("m.py");
    assign_const(&mut b, "x", Constant::Int(1));
    if_random(
        &mut b,
        |b| {
            b.name_op(OpName::DeleteName, "x");
        },
        |b| {
            b.name_op(OpName::LoadName, "x").name_op(OpName::StoreName, "y");
        },
    );
    let analysis = analyze(finish(b));

    assert!(analysis.errors().is_empty(), "{:?}", analysis.messages());
    assert_eq!(analysis.type_of("y"), "int");
}

#[test]
fn test_loop_assignment_visible_after_loop() {
    // x = None
    // for i in [1, 2]:
    //     x = i
    let mut b = CodeBuilder::module("m.py");
    assign_const(&mut b, "x", Constant::None);
    let top = b.new_label();
    let after = b.new_label();
    let end = b.new_label();
    b.jump(OpName::SetupLoop, end)
        .load_const(Constant::Int(1))
        .load_const(Constant::Int(2))
        .op_arg(OpName::BuildList, 2)
        .op(OpName::GetIter)
        .bind(top)
        .jump(OpName::ForIter, after)
        .name_op(OpName::StoreName, "i")
        .name_op(OpName::LoadName, "i")
        .name_op(OpName::StoreName, "x")
        .jump(OpName::JumpAbsolute, top)
        .bind(after)
        .op(OpName::PopBlock)
        .bind(end);
    let analysis = analyze(finish(b));

    assert!(analysis.errors().is_empty(), "{:?}", analysis.messages());
    assert_eq!(analysis.type_of("i"), "int");
    assert_eq!(analysis.type_of("x"), "None or int");
}

#[test]
fn test_raise_reaches_except_handler() {
    // try:
    //     raise ValueError
    // except ValueError:
    //     x = 1
    let mut b = CodeBuilder::module("m.py");
    let handler = b.new_label();
    let reraise = b.new_label();
    let end = b.new_label();
    b.jump(OpName::SetupExcept, handler)
        .name_op(OpName::LoadName, "ValueError")
        .op_arg(OpName::RaiseVarargs, 1)
        .op(OpName::PopBlock)
        .jump(OpName::JumpForward, end)
        .bind(handler)
        .op(OpName::DupTop)
        .name_op(OpName::LoadName, "ValueError")
        .op_arg(OpName::CompareOp, compare::EXC_MATCH)
        .jump(OpName::PopJumpIfFalse, reraise)
        .op(OpName::PopTop)
        .op(OpName::PopTop)
        .op(OpName::PopTop)
        .load_const(Constant::Int(1))
        .name_op(OpName::StoreName, "x")
        .jump(OpName::JumpForward, end)
        .bind(reraise)
        .op(OpName::EndFinally)
        .bind(end);
    let analysis = analyze(finish(b));

    assert!(analysis.errors().is_empty(), "{:?}", analysis.messages());
    assert_eq!(analysis.type_of("x"), "int");
}

#[test]
fn test_with_block_enters_context() {
    // with open("f") as fh:
    //     x = fh.read()
    let mut b = CodeBuilder::module("m.py");
    let cleanup = b.new_label();
    call_name(&mut b, "open", &[string("f")]);
    b.jump(OpName::SetupWith, cleanup)
        .name_op(OpName::StoreName, "fh")
        .name_op(OpName::LoadName, "fh")
        .name_op(OpName::LoadAttr, "read")
        .op_arg(OpName::CallFunction, 0)
        .name_op(OpName::StoreName, "x")
        .op(OpName::PopBlock)
        .load_const(Constant::None)
        .bind(cleanup)
        .op(OpName::WithCleanup)
        .op(OpName::EndFinally);
    let analysis = analyze(finish(b));

    assert!(analysis.errors().is_empty(), "{:?}", analysis.messages());
    assert_eq!(analysis.type_of("fh"), "file");
    assert_eq!(analysis.type_of("x"), "str");
}

#[test]
fn test_with_on_object_without_exit_reports() {
    // with 1: pass
    let mut b = CodeBuilder::module("m.py");
    let cleanup = b.new_label();
    b.load_const(Constant::Int(1))
        .jump(OpName::SetupWith, cleanup)
        .op(OpName::PopTop)
        .op(OpName::PopBlock)
        .load_const(Constant::None)
        .bind(cleanup)
        .op(OpName::WithCleanup)
        .op(OpName::EndFinally);
    let analysis = analyze(finish(b));

    assert!(analysis.count(ErrorKind::AttributeError) >= 1, "{:?}", analysis.messages());
}

/// `def name(params): <body>` inside a Python 3 class body.
fn def_method(b: &mut CodeBuilder, class: &str, code: CodeObject) {
    let name = code.name.clone();
    b.load_const(Constant::Code(Arc::new(code)))
        .load_const(string(&format!("{}.{}", class, name)))
        .op_arg(OpName::MakeFunction, 0)
        .name_op(OpName::StoreName, &name);
}

#[test]
fn test_with_exit_receives_raised_exception() {
    // class CM:
    //     def __enter__(self): return self
    //     def __exit__(self, t, v, tb):
    //         global seen
    //         seen = t
    // seen = None
    // with CM():
    //     raise ValueError
    let mut enter = CodeBuilder::function("__enter__", &["self"]);
    enter.fast_op(OpName::LoadFast, "self").op(OpName::ReturnValue);
    let mut exit = CodeBuilder::function("__exit__", &["self", "t", "v", "tb"]);
    exit.fast_op(OpName::LoadFast, "t")
        .name_op(OpName::StoreGlobal, "seen")
        .load_const(Constant::None)
        .op(OpName::ReturnValue);
    let mut body = CodeBuilder::class_body("CM");
    def_method(&mut body, "CM", enter.build().unwrap());
    def_method(&mut body, "CM", exit.build().unwrap());
    body.load_const(Constant::None).op(OpName::ReturnValue);

    let mut b = CodeBuilder::module("m.py");
    b.op(OpName::LoadBuildClass)
        .load_const(Constant::Code(Arc::new(body.build().unwrap())))
        .load_const(string("CM"))
        .op_arg(OpName::MakeFunction, 0)
        .load_const(string("CM"))
        .op_arg(OpName::CallFunction, 2)
        .name_op(OpName::StoreName, "CM");
    assign_const(&mut b, "seen", Constant::None);
    let cleanup = b.new_label();
    call_name(&mut b, "CM", &[]);
    b.jump(OpName::SetupWith, cleanup)
        .op(OpName::PopTop)
        .name_op(OpName::LoadName, "ValueError")
        .op_arg(OpName::RaiseVarargs, 1)
        .op(OpName::PopBlock)
        .load_const(Constant::None)
        .bind(cleanup)
        .op(OpName::WithCleanup)
        .op(OpName::EndFinally);
    let analysis = analyze_with(finish(b), python3());

    assert!(analysis.errors().is_empty(), "{:?}", analysis.messages());
    let seen = analysis.type_of("seen");
    assert!(seen.contains("Type[ValueError]"), "{}", seen);
    assert!(seen.contains("None"), "{}", seen);
}
