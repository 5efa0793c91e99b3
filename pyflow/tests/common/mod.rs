//! Shared helpers for integration tests
// Each test target uses a different subset of these helpers.
#![allow(dead_code)]

use std::sync::Arc;

use pyflow::errorlog::{ErrorKind, ErrorLog};
use pyflow::{AnalysisOptions, ProgramResult, VirtualMachine};
use pyflow_bytecode::{CodeBuilder, CodeObject, Constant, OpName};

/// Result of analysing one module.
pub struct Analysis {
    pub vm: VirtualMachine,
    pub result: ProgramResult,
}

impl Analysis {
    /// Display type of module-level `name` at the end of the module.
    pub fn type_of(&self, name: &str) -> String {
        let var = self
            .result
            .exported_names
            .get(name)
            .unwrap_or_else(|| panic!("name {} was not exported", name));
        self.vm.display_type(*var, self.result.final_node)
    }

    pub fn errors(&self) -> &ErrorLog {
        self.vm.errorlog()
    }

    pub fn count(&self, kind: ErrorKind) -> usize {
        self.vm.errorlog().count(kind)
    }

    /// Messages of all reported errors, for failure output.
    pub fn messages(&self) -> Vec<String> {
        self.vm
            .errorlog()
            .errors()
            .iter()
            .map(|e| format!("{} [{}]", e.message, e.kind))
            .collect()
    }
}

/// Run `code` as the main module with default options.
pub fn analyze(code: CodeObject) -> Analysis {
    analyze_with(code, AnalysisOptions::default())
}

pub fn analyze_with(code: CodeObject, options: AnalysisOptions) -> Analysis {
    let mut vm = VirtualMachine::new(options).expect("vm construction failed");
    let result = vm
        .run_program(Arc::new(code), None)
        .expect("analysis aborted");
    Analysis { vm, result }
}

/// Python 3 options.
pub fn python3() -> AnalysisOptions {
    AnalysisOptions {
        python_version: (3, 4),
        ..AnalysisOptions::default()
    }
}

/// `return None` and build.
pub fn finish(mut b: CodeBuilder) -> CodeObject {
    b.load_const(Constant::None).op(OpName::ReturnValue);
    b.build().expect("bytecode failed to build")
}

/// `name = <function built from code>` (Python 2 `MAKE_FUNCTION`).
pub fn def_function(b: &mut CodeBuilder, name: &str, code: CodeObject) {
    b.load_const(Constant::Code(Arc::new(code)))
        .op_arg(OpName::MakeFunction, 0)
        .name_op(OpName::StoreName, name);
}

/// Push `name(args...)` where the arguments are constants.
pub fn call_name(b: &mut CodeBuilder, name: &str, args: &[Constant]) {
    b.name_op(OpName::LoadName, name);
    for arg in args {
        b.load_const(arg.clone());
    }
    b.op_arg(OpName::CallFunction, args.len() as u32);
}

/// `target = name(args...)`.
pub fn assign_call(b: &mut CodeBuilder, target: &str, name: &str, args: &[Constant]) {
    call_name(b, name, args);
    b.name_op(OpName::StoreName, target);
}

/// `target = value`.
pub fn assign_const(b: &mut CodeBuilder, target: &str, value: Constant) {
    b.load_const(value).name_op(OpName::StoreName, target);
}

pub fn string(s: &str) -> Constant {
    Constant::Str(s.to_string())
}

/// `if __random__: then() else: otherwise()`, with both branches reachable.
pub fn if_random(
    b: &mut CodeBuilder,
    then: impl FnOnce(&mut CodeBuilder),
    otherwise: impl FnOnce(&mut CodeBuilder),
) {
    let else_label = b.new_label();
    let end = b.new_label();
    b.name_op(OpName::LoadName, "__random__")
        .jump(OpName::PopJumpIfFalse, else_label);
    then(b);
    b.jump(OpName::JumpForward, end).bind(else_label);
    otherwise(b);
    b.bind(end);
}
