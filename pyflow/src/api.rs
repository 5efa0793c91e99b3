//! Rust API for analysing serialized code objects.
//!
//! These functions wrap [`VirtualMachine`] for callers that only want the
//! inferred types of a module's names and the errors found on the way.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;

use pyflow_bytecode::{load_code_json, CodeObject};

use crate::config::AnalysisOptions;
use crate::error::AnalysisError;
use crate::errorlog::ErrorRecord;
use crate::vm::VirtualMachine;

/// Outcome of analysing one module.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisReport {
    /// Module-level names and the types they may hold at the module's end.
    pub names: BTreeMap<String, String>,
    pub errors: Vec<ErrorRecord>,
}

impl AnalysisReport {
    /// The report as pretty-printed JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Analyse a module given as a JSON code object.
pub fn analyze_json(json: &str, options: AnalysisOptions) -> Result<AnalysisReport, AnalysisError> {
    let code = load_code_json(json)?;
    analyze_code(Arc::new(code), options)
}

/// Analyse a module code object.
pub fn analyze_code(code: Arc<CodeObject>, options: AnalysisOptions) -> Result<AnalysisReport, AnalysisError> {
    let mut vm = VirtualMachine::new(options)?;
    let result = vm.run_program(code, None)?;
    let names = result
        .exported_names
        .iter()
        .filter(|(name, _)| !(name.starts_with("__") && name.ends_with("__")))
        .map(|(name, var)| (name.clone(), vm.display_type(*var, result.final_node)))
        .collect();
    Ok(AnalysisReport {
        names,
        errors: vm.errorlog().errors().to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pyflow_bytecode::{code_to_json, CodeBuilder, Constant, OpName};

    #[test]
    fn test_analyze_json_reports_names() {
        let mut b = CodeBuilder::module("m.py");
        b.load_const(Constant::Int(1));
        b.name_op(OpName::StoreName, "x");
        b.load_const(Constant::None);
        b.op(OpName::ReturnValue);
        let json = code_to_json(&b.build().unwrap()).unwrap();

        let report = analyze_json(&json, AnalysisOptions::default()).unwrap();
        assert_eq!(report.names.get("x").map(String::as_str), Some("int"));
        assert!(!report.names.contains_key("__name__"));
        assert!(report.errors.is_empty());
        assert!(report.to_json().unwrap().contains("\"x\": \"int\""));
    }

    #[test]
    fn test_analyze_json_rejects_garbage() {
        let err = analyze_json("{not json", AnalysisOptions::default()).unwrap_err();
        assert!(matches!(err, AnalysisError::Bytecode(_)));
    }
}
