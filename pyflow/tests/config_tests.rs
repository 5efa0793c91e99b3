//! Options loaded from a TOML file drive the analysis.

mod common;

use std::io::Write;
use std::sync::Arc;

use common::*;
use pretty_assertions::assert_eq;
use pyflow::{analyze_code, analyze_json, AnalysisError, AnalysisOptions, ConfigError};
use pyflow_bytecode::{code_to_json, CodeBuilder, Constant, OpName};

fn options_file(text: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "{}", text).unwrap();
    file
}

/// `def f(): return 1` then `x = f()`.
fn module_with_call() -> pyflow_bytecode::CodeObject {
    let mut f = CodeBuilder::function("f", &[]);
    f.load_const(Constant::Int(1)).op(OpName::ReturnValue);
    let mut b = CodeBuilder::module("m.py");
    def_function(&mut b, "f", f.build().unwrap());
    assign_call(&mut b, "x", "f", &[]);
    finish(b)
}

#[test]
fn test_max_depth_from_file() {
    let file = options_file("max_depth = 0\n");
    let options = AnalysisOptions::from_file(file.path()).unwrap();

    let report = analyze_code(Arc::new(module_with_call()), options).unwrap();
    assert_eq!(report.names["x"], "?");

    let report = analyze_code(Arc::new(module_with_call()), AnalysisOptions::default()).unwrap();
    assert_eq!(report.names["x"], "int");
}

#[test]
fn test_complexity_limit_from_file() {
    let file = options_file("complexity_limit = 2\n");
    let options = AnalysisOptions::from_file(file.path()).unwrap();

    let err = analyze_code(Arc::new(module_with_call()), options).unwrap_err();
    assert!(matches!(err, AnalysisError::ComplexityLimit { limit: 2, .. }));
}

#[test]
fn test_unsupported_version_in_file() {
    let file = options_file("python_version = [1, 5]\n");
    let err = AnalysisOptions::from_file(file.path()).unwrap_err();
    assert_eq!(err, ConfigError::UnsupportedVersion(1, 5));
}

#[test]
fn test_json_code_object_with_python3_options() {
    let file = options_file("python_version = [3, 4]\n");
    let options = AnalysisOptions::from_file(file.path()).unwrap();
    assert!(options.is_python3());

    // Python 3 `MAKE_FUNCTION` also takes the qualified name.
    let mut f = CodeBuilder::function("f", &[]);
    f.load_const(Constant::Int(1)).op(OpName::ReturnValue);
    let mut b = CodeBuilder::module("m.py");
    b.load_const(Constant::Code(Arc::new(f.build().unwrap())))
        .load_const(string("f"))
        .op_arg(OpName::MakeFunction, 0)
        .name_op(OpName::StoreName, "f");
    assign_call(&mut b, "x", "f", &[]);
    let json = code_to_json(&finish(b)).unwrap();
    let report = analyze_json(&json, options).unwrap();
    assert_eq!(report.names["x"], "int");
    assert_eq!(report.names["f"], "Callable");
    assert!(report.errors.is_empty());
}
