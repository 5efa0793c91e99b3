//! Calls.
//!
//! A call fans out over the visible bindings of the callee variable. Each
//! candidate either produces a result or a [`CallFailure`]; results are
//! merged, and only a call where every candidate failed is reported.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use crate::abstract_value::{AbstractValue, InterpreterFunction, PyValue, SpecialForm};
use crate::error::AnalysisError;
use crate::errorlog::{ErrorKind, ErrorRecord, ErrorReporter};
use crate::frame::FrameState;
use crate::typegraph::{BindingId, DataId, NodeId, VariableId};

use super::VirtualMachine;

/// Arguments of one call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FunctionArgs {
    pub posargs: Vec<VariableId>,
    pub namedargs: Vec<(String, VariableId)>,
    /// `*args` whose length is not known.
    pub starargs: Option<VariableId>,
    /// `**kwargs` whose keys are not known.
    pub starstarargs: Option<VariableId>,
}

impl FunctionArgs {
    pub fn positional(posargs: Vec<VariableId>) -> Self {
        Self {
            posargs,
            ..Self::default()
        }
    }

    /// The same arguments with `receiver` in front.
    pub fn with_receiver(&self, receiver: VariableId) -> Self {
        let mut posargs = Vec::with_capacity(self.posargs.len() + 1);
        posargs.push(receiver);
        posargs.extend(self.posargs.iter().copied());
        Self {
            posargs,
            namedargs: self.namedargs.clone(),
            starargs: self.starargs,
            starstarargs: self.starstarargs,
        }
    }

    /// Arguments that bind to parameters, positional and named.
    pub fn count(&self) -> usize {
        self.posargs.len() + self.namedargs.len()
    }
}

/// Why one candidate of a call did not go through.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum CallFailure {
    WrongArgCount {
        name: String,
        expected: String,
        actual: usize,
    },
    WrongArgTypes {
        name: String,
        expected: String,
        actual: String,
    },
    WrongKeywordArgs {
        name: String,
        names: Vec<String>,
    },
    DuplicateKeyword {
        name: String,
        keyword: String,
    },
    MissingParameter {
        name: String,
        parameter: String,
    },
    NotCallable {
        type_name: String,
    },
}

impl CallFailure {
    fn into_record(self) -> ErrorRecord {
        match self {
            CallFailure::WrongArgCount {
                name,
                expected,
                actual,
            } => ErrorRecord::new(
                ErrorKind::WrongArgCount,
                format!(
                    "Function {} was called with {} args instead of expected {}",
                    name, actual, expected
                ),
            ),
            CallFailure::WrongArgTypes {
                name,
                expected,
                actual,
            } => ErrorRecord::new(
                ErrorKind::WrongArgTypes,
                format!("Function {} was called with the wrong arguments", name),
            )
            .with_details(format!("Expected: {}\nActually passed: {}", expected, actual)),
            CallFailure::WrongKeywordArgs { name, names } => ErrorRecord::new(
                ErrorKind::WrongKeywordArgs,
                format!(
                    "Invalid keyword arguments ({}) to function {}",
                    names.join(", "),
                    name
                ),
            ),
            CallFailure::DuplicateKeyword { name, keyword } => ErrorRecord::new(
                ErrorKind::DuplicateKeywordArgument,
                format!(
                    "function {} got multiple values for keyword argument '{}'",
                    name, keyword
                ),
            ),
            CallFailure::MissingParameter { name, parameter } => ErrorRecord::new(
                ErrorKind::MissingParameter,
                format!("Missing parameter '{}' in call to function {}", parameter, name),
            ),
            CallFailure::NotCallable { type_name } => ErrorRecord::new(
                ErrorKind::NotCallable,
                format!("'{}' object is not callable", type_name),
            ),
        }
    }
}

pub(crate) type CallOutcome = Result<(NodeId, VariableId), CallFailure>;

/// Human-readable arity of a parameter list.
pub(crate) fn describe_arity(min: usize, max: Option<usize>) -> String {
    match max {
        Some(max) if max == min => min.to_string(),
        Some(max) => format!("{}-{}", min, max),
        None => format!("at least {}", min),
    }
}

impl<E: ErrorReporter> VirtualMachine<E> {
    /// Call every visible binding of `func`. With `report`, a call that fails
    /// for every candidate is reported and yields the give-up sentinel;
    /// without, it yields an empty variable.
    pub(crate) fn call_function(
        &mut self,
        node: NodeId,
        func: VariableId,
        args: &FunctionArgs,
        report: bool,
    ) -> Result<(NodeId, VariableId), AnalysisError> {
        match self.call_bindings(node, func, args)? {
            Ok(done) => Ok(done),
            Err(failure) => {
                if report {
                    let record = failure.into_record().with_variables(vec![func]);
                    self.report(record);
                    Ok((node, self.new_unsolvable(node)))
                } else {
                    Ok((node, self.program.new_variable("failed call")))
                }
            }
        }
    }

    /// [`Self::call_function`] without reporting: the first failure is handed
    /// back when no candidate succeeds.
    pub(crate) fn call_bindings(
        &mut self,
        node: NodeId,
        func: VariableId,
        args: &FunctionArgs,
    ) -> Result<CallOutcome, AnalysisError> {
        let result = self.program.new_variable("return");
        let mut nodes = Vec::new();
        let mut results: Vec<(NodeId, VariableId, BindingId)> = Vec::new();
        let mut error = None;
        for funcb in self.program.bindings(func, node) {
            let data = self.program.binding_data(funcb);
            match self.call_value(node, data, funcb, args)? {
                Ok((end, ret)) => {
                    nodes.push(end);
                    results.push((end, ret, funcb));
                }
                Err(failure) => {
                    if error.is_none() {
                        error = Some(failure);
                    }
                }
            }
        }
        if nodes.is_empty() {
            return Ok(match error {
                Some(failure) => Err(failure),
                // Nothing to call on this path.
                None => Ok((node, result)),
            });
        }
        let end = self.join_cfg_nodes(&nodes)?;
        for (ret_node, ret, funcb) in results {
            for rb in self.program.bindings(ret, ret_node) {
                let data = self.program.binding_data(rb);
                self.program.add_binding(result, data, [rb, funcb], end);
            }
        }
        Ok(Ok((end, result)))
    }

    /// Call one value. `binding` is the callee's binding, used as the
    /// receiver's source where one is created.
    pub(crate) fn call_value(
        &mut self,
        node: NodeId,
        data: DataId,
        binding: BindingId,
        args: &FunctionArgs,
    ) -> Result<CallOutcome, AnalysisError> {
        match self.values.get(data).clone() {
            AbstractValue::InterpreterFunction(f) => self.call_interpreter_function(node, &f, args),
            AbstractValue::NativeFunction(f) => self.call_native(node, &f, args),
            AbstractValue::BoundMethod(m) => {
                let args = args.with_receiver(m.receiver);
                self.call_value(node, m.function, binding, &args)
            }
            AbstractValue::Class(_) => self.instantiate_class(node, data, args),
            AbstractValue::Instance(_) => {
                match self.get_attribute(node, data, "__call__", Some(binding))? {
                    Some(method) => self.call_bindings(node, method, args),
                    None => Ok(Err(CallFailure::NotCallable {
                        type_name: self.values.type_name(data),
                    })),
                }
            }
            AbstractValue::Module(_) => Ok(Err(CallFailure::NotCallable {
                type_name: self.values.type_name(data),
            })),
            AbstractValue::Unknown { .. } => Ok(Ok((node, self.new_unknown(node)))),
            AbstractValue::Unsolvable => Ok(Ok((node, self.new_unsolvable(node)))),
            AbstractValue::Special(form) => self.call_special(node, form, args),
        }
    }

    fn call_interpreter_function(
        &mut self,
        node: NodeId,
        f: &InterpreterFunction,
        args: &FunctionArgs,
    ) -> Result<CallOutcome, AnalysisError> {
        let callargs = match self.map_arguments(node, f, args)? {
            Ok(callargs) => callargs,
            Err(failure) => return Ok(Err(failure)),
        };
        if let Some(failure) = self.check_annotations(node, f, &callargs) {
            return Ok(Err(failure));
        }
        if self.frames.iter().any(|frame| Arc::ptr_eq(&frame.code, &f.code)) {
            debug!(function = %f.name, "direct recursion, skipping call");
            return Ok(Ok((node, self.new_unsolvable(node))));
        }
        if self.is_at_maximum_depth() {
            debug!(function = %f.name, depth = self.frames.len(), "maximum depth reached");
            return Ok(Ok((node, self.new_unsolvable(node))));
        }
        let frame = self.make_frame(
            Arc::clone(&f.code),
            f.globals,
            None,
            &f.closure,
            &callargs,
            node,
        )?;
        let yield_var = frame.yield_var;
        let start = self.program.connect_new(node, &f.name, None)?;
        let (end, ret) = self.run_frame(frame, start)?;
        if f.code.is_generator() {
            let cls = self.library_class("generator")?;
            let generator = self.new_instance(cls, None)?;
            self.fill_type_param(generator, "T", &[yield_var], end);
            return Ok(Ok((end, self.variable_with(&f.name, generator, [], end))));
        }
        Ok(Ok((end, ret)))
    }

    /// Bind call arguments to the parameters of an interpreted function.
    fn map_arguments(
        &mut self,
        node: NodeId,
        f: &InterpreterFunction,
        args: &FunctionArgs,
    ) -> Result<Result<BTreeMap<String, VariableId>, CallFailure>, AnalysisError> {
        let code = Arc::clone(&f.code);
        let params = code.positional_params();
        let kwonly = code.kwonly_params();
        let varargs = code.varargs_name();
        let varkw = code.varkw_name();
        let mut callargs: BTreeMap<String, VariableId> = BTreeMap::new();

        let required = params.len() - f.defaults.len().min(params.len());
        let expected = describe_arity(required, varargs.map_or(Some(params.len()), |_| None));
        for (param, arg) in params.iter().zip(args.posargs.iter()) {
            callargs.insert(param.clone(), *arg);
        }
        let extra: Vec<VariableId> = args.posargs.iter().skip(params.len()).copied().collect();
        if !extra.is_empty() && varargs.is_none() {
            return Ok(Err(CallFailure::WrongArgCount {
                name: f.name.clone(),
                expected,
                actual: args.posargs.len(),
            }));
        }

        let mut unknown_keywords = Vec::new();
        let mut extra_keywords = Vec::new();
        for (name, value) in &args.namedargs {
            let is_param = params.contains(name) || kwonly.contains(name);
            if is_param {
                if callargs.contains_key(name) {
                    return Ok(Err(CallFailure::DuplicateKeyword {
                        name: f.name.clone(),
                        keyword: name.clone(),
                    }));
                }
                callargs.insert(name.clone(), *value);
            } else if varkw.is_some() {
                extra_keywords.push((name.clone(), *value));
            } else {
                unknown_keywords.push(name.clone());
            }
        }
        if !unknown_keywords.is_empty() {
            return Ok(Err(CallFailure::WrongKeywordArgs {
                name: f.name.clone(),
                names: unknown_keywords,
            }));
        }

        let opaque_rest = args.starargs.is_some() || args.starstarargs.is_some();
        let first_default = params.len() - f.defaults.len().min(params.len());
        for (i, param) in params.iter().enumerate() {
            if callargs.contains_key(param) {
                continue;
            }
            if i >= first_default {
                callargs.insert(param.clone(), f.defaults[i - first_default]);
            } else if opaque_rest {
                let unknown = self.new_unknown(node);
                callargs.insert(param.clone(), unknown);
            } else if args.namedargs.is_empty() {
                return Ok(Err(CallFailure::WrongArgCount {
                    name: f.name.clone(),
                    expected,
                    actual: args.posargs.len(),
                }));
            } else {
                return Ok(Err(CallFailure::MissingParameter {
                    name: f.name.clone(),
                    parameter: param.clone(),
                }));
            }
        }
        for param in kwonly {
            if callargs.contains_key(param) {
                continue;
            }
            if let Some(default) = f.kw_defaults.get(param) {
                callargs.insert(param.clone(), *default);
            } else if args.starstarargs.is_some() {
                let unknown = self.new_unknown(node);
                callargs.insert(param.clone(), unknown);
            } else {
                return Ok(Err(CallFailure::MissingParameter {
                    name: f.name.clone(),
                    parameter: param.clone(),
                }));
            }
        }

        if let Some(name) = varargs {
            let var = match args.starargs {
                Some(star) if extra.is_empty() => star,
                Some(_) => self.new_unsolvable(node),
                None => {
                    let tuple = self.build_tuple_value(&extra, node)?;
                    self.variable_with(name, tuple, [], node)
                }
            };
            callargs.insert(name.to_string(), var);
        }
        if let Some(name) = varkw {
            let var = match args.starstarargs {
                Some(starstar) if extra_keywords.is_empty() => starstar,
                Some(_) => self.new_unsolvable(node),
                None => self.build_kwargs_dict(node, &extra_keywords)?,
            };
            callargs.insert(name.to_string(), var);
        }
        Ok(Ok(callargs))
    }

    fn build_kwargs_dict(
        &mut self,
        node: NodeId,
        entries: &[(String, VariableId)],
    ) -> Result<VariableId, AnalysisError> {
        let cls = self.library_class("dict")?;
        let dict = self.new_instance(cls, None)?;
        for (key, value) in entries {
            let key_var = self.convert_constant(&pyflow_bytecode::Constant::Str(key.clone()))?;
            self.fill_type_param(dict, "K", &[key_var], node);
            self.fill_type_param(dict, "V", &[*value], node);
            self.set_member(node, dict, key, *value);
        }
        Ok(self.variable_with("kwargs", dict, [], node))
    }

    /// Parameters annotated with a class must receive an instance of it.
    fn check_annotations(
        &self,
        node: NodeId,
        f: &InterpreterFunction,
        callargs: &BTreeMap<String, VariableId>,
    ) -> Option<CallFailure> {
        for (param, cls) in &f.annotations {
            let Some(arg) = callargs.get(param) else {
                continue;
            };
            let data = self.program.data(*arg, node);
            if data.is_empty() {
                continue;
            }
            let matches = data.iter().any(|d| match self.values.get(*d) {
                AbstractValue::Instance(i) => self
                    .values
                    .class(i.cls)
                    .is_some_and(|c| c.mro.contains(cls)),
                other => other.is_opaque(),
            });
            if !matches {
                let class_name = self.values.class_name(*cls);
                let actual = data
                    .iter()
                    .map(|d| self.values.type_name(*d))
                    .collect::<Vec<_>>()
                    .join(" or ");
                return Some(CallFailure::WrongArgTypes {
                    name: f.name.clone(),
                    expected: format!("({}: {})", param, class_name),
                    actual: format!("({}: {})", param, actual),
                });
            }
        }
        None
    }

    /// Create an instance of `cls` and run its `__init__`.
    fn instantiate_class(
        &mut self,
        node: NodeId,
        cls: DataId,
        args: &FunctionArgs,
    ) -> Result<CallOutcome, AnalysisError> {
        let is_type = self.values.class_name(cls) == "type";
        if is_type && args.posargs.len() == 1 && args.namedargs.is_empty() {
            return self.type_of(node, args.posargs[0]).map(Ok);
        }
        let library = self
            .values
            .class(cls)
            .is_some_and(|c| c.origin == crate::abstract_value::ClassOrigin::Library);
        let instance = if library {
            self.shared_instance(cls)?
        } else {
            self.new_instance(cls, None)?
        };
        let name = self.values.class_name(cls).to_string();
        let var = self.variable_with(&name, instance, [], node);
        let receiver = self.program.all_bindings(var).first().copied();
        let Some(init) = self.get_attribute(node, instance, "__init__", receiver)? else {
            return Ok(Ok((node, var)));
        };
        match self.call_bindings(node, init, args)? {
            Ok((end, _)) => Ok(Ok((end, var))),
            Err(failure) => Ok(Err(failure)),
        }
    }

    /// `type(x)`: the class of each value of `x`.
    fn type_of(&mut self, node: NodeId, arg: VariableId) -> Result<(NodeId, VariableId), AnalysisError> {
        let result = self.program.new_variable("type");
        for b in self.program.bindings(arg, node) {
            let data = self.program.binding_data(b);
            let cls = match self.values.get(data) {
                AbstractValue::Instance(i) => i.cls,
                AbstractValue::Class(_) => self.library_class("type")?,
                AbstractValue::InterpreterFunction(_)
                | AbstractValue::NativeFunction(_)
                | AbstractValue::BoundMethod(_)
                | AbstractValue::Special(_) => self.library_class("function")?,
                AbstractValue::Module(_) => self.library_class("module")?,
                AbstractValue::Unknown { .. } | AbstractValue::Unsolvable => self.convert.unsolvable(),
            };
            self.program.add_binding(result, cls, [b], node);
        }
        Ok((node, result))
    }

    fn call_special(
        &mut self,
        node: NodeId,
        form: SpecialForm,
        args: &FunctionArgs,
    ) -> Result<CallOutcome, AnalysisError> {
        match form {
            SpecialForm::Super => Ok(Ok((node, self.new_unsolvable(node)))),
            SpecialForm::IsInstance => {
                if args.posargs.len() != 2 || !args.namedargs.is_empty() {
                    return Ok(Err(CallFailure::WrongArgCount {
                        name: form.name().to_string(),
                        expected: "2".to_string(),
                        actual: args.count(),
                    }));
                }
                self.isinstance(node, args.posargs[0], args.posargs[1]).map(Ok)
            }
            SpecialForm::BuildClass => self.build_class_py3(node, args),
        }
    }

    fn isinstance(
        &mut self,
        node: NodeId,
        obj: VariableId,
        spec: VariableId,
    ) -> Result<(NodeId, VariableId), AnalysisError> {
        let result = self.program.new_variable("isinstance");
        let objs = self.program.bindings(obj, node);
        let specs = self.program.bindings(spec, node);
        for ob in &objs {
            for sb in &specs {
                let od = self.program.binding_data(*ob);
                let sd = self.program.binding_data(*sb);
                let decided = match (self.values.get(od), self.values.get(sd)) {
                    (AbstractValue::Instance(i), AbstractValue::Class(_)) => self
                        .values
                        .class(i.cls)
                        .map(|c| c.mro.contains(&sd)),
                    _ => None,
                };
                let data = match decided {
                    Some(value) => self.bool_constant(value)?,
                    None => self.bool_instance()?,
                };
                self.program.add_binding(result, data, [*ob, *sb], node);
            }
        }
        Ok((node, result))
    }

    /// `__build_class__(func, name, *bases)`.
    fn build_class_py3(&mut self, node: NodeId, args: &FunctionArgs) -> Result<CallOutcome, AnalysisError> {
        if args.posargs.len() < 2 {
            return Ok(Err(CallFailure::WrongArgCount {
                name: SpecialForm::BuildClass.name().to_string(),
                expected: "at least 2".to_string(),
                actual: args.count(),
            }));
        }
        let body = self
            .program
            .data(args.posargs[0], node)
            .into_iter()
            .find_map(|d| match self.values.get(d) {
                AbstractValue::InterpreterFunction(f) => Some(f.clone()),
                _ => None,
            });
        let name = self.class_name_of(node, args.posargs[1]);
        let Some(body) = body else {
            return Ok(Ok((node, self.new_unsolvable(node))));
        };
        let frame = self.make_frame(
            Arc::clone(&body.code),
            body.globals,
            None,
            &body.closure,
            &BTreeMap::new(),
            node,
        )?;
        let locals = frame.locals;
        let start = self.program.connect_new(node, &name, None)?;
        let (end, _) = self.run_frame(frame, start)?;
        let members = self.values.namespace(locals).cloned().unwrap_or_default();
        let class = self.make_class(end, &name, &args.posargs[2..], members)?;
        Ok(Ok((end, class)))
    }

    /// The string a class-name variable holds, if it holds exactly one.
    pub(crate) fn class_name_of(&self, node: NodeId, var: VariableId) -> String {
        self.program
            .data(var, node)
            .into_iter()
            .find_map(|d| self.values.string_constant(d).map(str::to_string))
            .unwrap_or_else(|| "<class>".to_string())
    }

    /// Pop the arguments of a `CALL_FUNCTION` family opcode, call, and push
    /// the result.
    pub(crate) fn call_function_from_stack(
        &mut self,
        state: FrameState,
        arg: u32,
        starargs: Option<VariableId>,
        starstarargs: Option<VariableId>,
    ) -> Result<FrameState, AnalysisError> {
        let num_kw = ((arg >> 8) & 0xff) as usize;
        let num_pos = (arg & 0xff) as usize;
        let (state, pairs) = state.popn(num_kw * 2)?;
        let mut namedargs = Vec::with_capacity(num_kw);
        for pair in pairs.chunks(2) {
            if let [key, value] = pair {
                let name = self.class_name_of(state.node, *key);
                namedargs.push((name, *value));
            }
        }
        let (state, mut posargs) = state.popn(num_pos)?;
        let (state, func) = state.pop()?;

        let mut starargs = starargs;
        if let Some(star) = starargs {
            let data = self.program.data(star, state.node);
            if let [only] = data.as_slice() {
                if let Some(PyValue::Tuple(items)) = self.values.get(*only).pyval() {
                    posargs.extend(items.iter().copied());
                    starargs = None;
                }
            }
        }
        let args = FunctionArgs {
            posargs,
            namedargs,
            starargs,
            starstarargs,
        };
        let (node, ret) = self.call_function(state.node, func, &args, true)?;
        Ok(state.change_cfg_node(node).push(ret))
    }

    /// Call method `name` of `obj` with positional `args`, reporting failures.
    pub(crate) fn call_method(
        &mut self,
        node: NodeId,
        obj: VariableId,
        name: &str,
        args: Vec<VariableId>,
    ) -> Result<(NodeId, VariableId), AnalysisError> {
        let method = self.load_attr(node, obj, name)?;
        self.call_function(node, method, &FunctionArgs::positional(args), true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_arity() {
        assert_eq!(describe_arity(1, Some(1)), "1");
        assert_eq!(describe_arity(1, Some(3)), "1-3");
        assert_eq!(describe_arity(2, None), "at least 2");
    }

    #[test]
    fn test_with_receiver_prepends() {
        let args = FunctionArgs::positional(vec![VariableId(4)]);
        let bound = args.with_receiver(VariableId(1));
        assert_eq!(bound.posargs, vec![VariableId(1), VariableId(4)]);
        assert_eq!(bound.count(), 2);
        assert_eq!(args.count(), 1);
    }

    #[test]
    fn test_failure_messages() {
        let record = CallFailure::WrongArgCount {
            name: "hex".to_string(),
            expected: "1".to_string(),
            actual: 4,
        }
        .into_record();
        assert_eq!(record.kind, ErrorKind::WrongArgCount);
        assert_eq!(record.message, "Function hex was called with 4 args instead of expected 1");

        let record = CallFailure::WrongArgTypes {
            name: "hex".to_string(),
            expected: "(x: int)".to_string(),
            actual: "(x: complex)".to_string(),
        }
        .into_record();
        assert_eq!(
            record.details.as_deref(),
            Some("Expected: (x: int)\nActually passed: (x: complex)")
        );
    }
}
