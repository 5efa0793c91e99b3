//! Loading pre-decoded code objects from JSON.

use pretty_assertions::assert_eq;
use pyflow_bytecode::{code_to_json, load_code_json, BytecodeError, CodeBuilder, Constant, OpName};

const MODULE_JSON: &str = r#"{
  "name": "<module>",
  "filename": "m.py",
  "names": ["x"],
  "consts": [{"Int": 1}, "None"],
  "blocks": [
    {"id": 0, "ops": [
      {"index": 0, "name": "LOAD_CONST", "arg": 0, "line": 1},
      {"index": 1, "name": "STORE_NAME", "arg": 0, "line": 1},
      {"index": 2, "name": "LOAD_CONST", "arg": 1, "line": 2},
      {"index": 3, "name": "RETURN_VALUE", "line": 2}
    ]}
  ]
}"#;

#[test]
fn test_load_simple_module() {
    let code = load_code_json(MODULE_JSON).expect("valid module");
    assert_eq!(code.names, vec!["x".to_string()]);
    assert_eq!(code.consts, vec![Constant::Int(1), Constant::None]);
    assert_eq!(code.count_ops(OpName::LoadConst), 2);
}

#[test]
fn test_missing_argument_is_rejected() {
    let json = r#"{
      "name": "<module>",
      "blocks": [{"id": 0, "ops": [{"index": 0, "name": "LOAD_CONST"}]}]
    }"#;
    assert!(matches!(
        load_code_json(json),
        Err(BytecodeError::MissingArgument {
            op: OpName::LoadConst,
            ..
        })
    ));
}

#[test]
fn test_malformed_json_is_reported() {
    let err = load_code_json("{ not json").unwrap_err();
    assert!(matches!(err, BytecodeError::Json { .. }));
}

#[test]
fn test_nested_code_survives_json_round_trip() {
    let mut inner = CodeBuilder::function("f", &["a"]);
    inner.fast_op(OpName::LoadFast, "a").op(OpName::ReturnValue);
    let inner = inner.build().unwrap();

    let mut outer = CodeBuilder::module("m.py");
    outer
        .load_const(Constant::Code(std::sync::Arc::new(inner)))
        .op_arg(OpName::MakeFunction, 0)
        .name_op(OpName::StoreName, "f")
        .load_const(Constant::None)
        .op(OpName::ReturnValue);
    let outer = outer.build().unwrap();

    let json = code_to_json(&outer).unwrap();
    let back = load_code_json(&json).unwrap();
    assert_eq!(back, outer);
}
