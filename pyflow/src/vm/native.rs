//! Calls of library functions.
//!
//! A library function has one or more signatures. A call is evaluated once
//! per *view*: one visible binding chosen for every argument. The first
//! signature a view satisfies decides its result, and the result binding is
//! justified by the bindings of the view. Type variables bind to what the
//! matching arguments carry, and `mutates` pushes them back into the
//! receiver's type parameters.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

use std::collections::BTreeMap;

use tracing::debug;

use pyflow_bytecode::Constant;

use crate::abstract_value::{AbstractValue, NativeFunction};
use crate::error::AnalysisError;
use crate::errorlog::ErrorReporter;
use crate::stubs::{Signature, TypeExpr};
use crate::typegraph::{BindingId, DataId, NodeId, VariableId};

use super::call::{describe_arity, CallFailure, CallOutcome, FunctionArgs};
use super::VirtualMachine;

/// Where the value of a type variable comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TypeSource {
    /// One argument binding.
    Binding(BindingId),
    /// A type parameter of an argument.
    Variable(VariableId),
}

pub(crate) type Subst = BTreeMap<String, Vec<TypeSource>>;

/// Every combination of one binding per argument, at most `cap` of them.
pub(crate) fn cartesian_views(choices: &[Vec<BindingId>], cap: usize) -> Vec<Vec<BindingId>> {
    let mut views: Vec<Vec<BindingId>> = vec![Vec::new()];
    for options in choices {
        let mut next = Vec::with_capacity(views.len() * options.len());
        'outer: for view in &views {
            for b in options {
                if next.len() >= cap {
                    break 'outer;
                }
                let mut extended = view.clone();
                extended.push(*b);
                next.push(extended);
            }
        }
        views = next;
    }
    views
}

impl<E: ErrorReporter> VirtualMachine<E> {
    pub(crate) fn call_native(
        &mut self,
        node: NodeId,
        f: &NativeFunction,
        args: &FunctionArgs,
    ) -> Result<CallOutcome, AnalysisError> {
        if args.starargs.is_some() || args.starstarargs.is_some() {
            return Ok(Ok((node, self.new_unsolvable(node))));
        }
        if !f.signatures.iter().any(|sig| accepts(sig, args)) {
            let (min, max) = arity_range(&f.signatures);
            return Ok(Err(CallFailure::WrongArgCount {
                name: f.name.clone(),
                expected: describe_arity(min, max),
                actual: args.count(),
            }));
        }

        let vars: Vec<VariableId> = args
            .posargs
            .iter()
            .copied()
            .chain(args.namedargs.iter().map(|(_, v)| *v))
            .collect();
        let choices: Vec<Vec<BindingId>> =
            vars.iter().map(|v| self.program.bindings(*v, node)).collect();
        if choices.iter().any(Vec::is_empty) {
            return Ok(Ok((node, self.new_unsolvable(node))));
        }
        if let Some(done) = self.dict_constant_key(node, f, &vars)? {
            return Ok(Ok((node, done)));
        }
        let views = cartesian_views(&choices, self.options.max_native_views);
        let result = self.program.new_variable("return");
        let mut matched = false;
        for view in &views {
            let found = f
                .signatures
                .iter()
                .find_map(|sig| self.match_signature(sig, args, view).map(|s| (sig, s)));
            let Some((sig, subst)) = found else {
                continue;
            };
            matched = true;
            let receiver = self.receiver_data(sig, view);
            let ret = self.instantiate_type(&sig.ret, node, &subst, receiver)?;
            for rb in self.program.all_bindings(ret).to_vec() {
                let data = self.program.binding_data(rb);
                let sources = view.iter().copied().chain(std::iter::once(rb));
                self.program.add_binding(result, data, sources, node);
            }
            if let Some(receiver) = receiver {
                self.apply_mutations(node, f, receiver, &subst);
            }
        }
        if !matched {
            debug!(function = %f.name, views = views.len(), "no signature matched");
            let sig = f.signatures.first();
            return Ok(Err(CallFailure::WrongArgTypes {
                name: f.name.clone(),
                expected: sig.map(Signature::params_display).unwrap_or_else(|| "()".to_string()),
                actual: self.describe_actual(node, sig, args),
            }));
        }
        Ok(Ok((node, result)))
    }

    /// The receiver of a method signature, whose first parameter is `self`.
    fn receiver_data(&self, sig: &Signature, view: &[BindingId]) -> Option<DataId> {
        match (sig.params.first(), view.first()) {
            (Some(p), Some(b)) if p.name == "self" => Some(self.program.binding_data(*b)),
            _ => None,
        }
    }

    /// Dict items under constant string keys are tracked as members.
    fn dict_constant_key(
        &mut self,
        node: NodeId,
        f: &NativeFunction,
        vars: &[VariableId],
    ) -> Result<Option<VariableId>, AnalysisError> {
        let (dict, key) = match (f.name.as_str(), vars) {
            ("dict.__setitem__", [dict, key, _]) | ("dict.__getitem__", [dict, key]) => (*dict, *key),
            _ => return Ok(None),
        };
        let (Some(dict_data), Some(key_name)) = (
            single(&self.program.data(dict, node)),
            single(&self.program.data(key, node))
                .and_then(|k| self.values.string_constant(k).map(str::to_string)),
        ) else {
            return Ok(None);
        };
        if self.values.instance(dict_data).is_none() {
            return Ok(None);
        }
        if let [_, _, value] = vars {
            self.set_member(node, dict_data, &key_name, *value);
            return Ok(None);
        }
        let member = self
            .values
            .instance(dict_data)
            .and_then(|i| i.members.get(&key_name).copied());
        match member {
            Some(member) if !self.program.bindings(member, node).is_empty() => {
                Ok(Some(self.copy_visible(member, node)))
            }
            _ => Ok(None),
        }
    }

    fn match_signature(&self, sig: &Signature, args: &FunctionArgs, view: &[BindingId]) -> Option<Subst> {
        let mut subst = Subst::new();
        let mut assigned = vec![false; sig.params.len()];
        let positional = args.posargs.len();
        for (i, b) in view.iter().take(positional).enumerate() {
            match sig.params.get(i) {
                Some(param) => {
                    if let Some(ty) = &param.ty {
                        if !self.match_type(ty, *b, &mut subst) {
                            return None;
                        }
                    }
                    assigned[i] = true;
                }
                None if sig.varargs.is_some() => {}
                None => return None,
            }
        }
        for ((name, _), b) in args.namedargs.iter().zip(view.iter().skip(positional)) {
            match sig.params.iter().position(|p| p.name == *name) {
                Some(i) => {
                    if assigned[i] {
                        return None;
                    }
                    if let Some(ty) = &sig.params[i].ty {
                        if !self.match_type(ty, *b, &mut subst) {
                            return None;
                        }
                    }
                    assigned[i] = true;
                }
                None if sig.kwargs.is_some() => {}
                None => return None,
            }
        }
        let complete = sig
            .params
            .iter()
            .zip(&assigned)
            .all(|(p, done)| *done || p.has_default);
        complete.then_some(subst)
    }

    fn match_type(&self, ty: &TypeExpr, binding: BindingId, subst: &mut Subst) -> bool {
        let data = self.program.binding_data(binding);
        match ty {
            TypeExpr::Any => true,
            TypeExpr::TypeVar(name) => {
                subst
                    .entry(name.clone())
                    .or_default()
                    .push(TypeSource::Binding(binding));
                true
            }
            TypeExpr::Name(name) => self.data_matches_name(data, name),
            TypeExpr::Generic(name, params) => {
                if !self.data_matches_name(data, name) {
                    return false;
                }
                let Some(instance) = self.values.instance(data) else {
                    return true;
                };
                let template = self
                    .stubs
                    .class(name)
                    .map(|c| c.template.clone())
                    .unwrap_or_default();
                for (t, param) in template.iter().zip(params) {
                    let Some(var) = instance.type_params.get(t) else {
                        continue;
                    };
                    match param {
                        TypeExpr::TypeVar(v) => subst
                            .entry(v.clone())
                            .or_default()
                            .push(TypeSource::Variable(*var)),
                        TypeExpr::Any => {}
                        concrete => {
                            let fits = self
                                .program
                                .all_data(*var)
                                .iter()
                                .all(|d| self.data_matches_type(*d, concrete));
                            if !fits {
                                return false;
                            }
                        }
                    }
                }
                true
            }
            TypeExpr::Union(options) => {
                for option in options {
                    let mut trial = subst.clone();
                    if self.match_type(option, binding, &mut trial) {
                        *subst = trial;
                        return true;
                    }
                }
                false
            }
        }
    }

    /// Structural match without recording type variables.
    fn data_matches_type(&self, data: DataId, ty: &TypeExpr) -> bool {
        match ty {
            TypeExpr::Any | TypeExpr::TypeVar(_) => true,
            TypeExpr::Name(name) | TypeExpr::Generic(name, _) => self.data_matches_name(data, name),
            TypeExpr::Union(options) => options.iter().any(|o| self.data_matches_type(data, o)),
        }
    }

    /// Whether `data` is an instance of the library class `name`. Numbers
    /// promote: an int passes for a float and both pass for a complex.
    fn data_matches_name(&self, data: DataId, name: &str) -> bool {
        if name == "object" {
            return true;
        }
        match self.values.get(data) {
            AbstractValue::Instance(i) => {
                self.values.is_subclass(i.cls, name)
                    || (name == "float" && self.values.is_subclass(i.cls, "int"))
                    || (name == "complex"
                        && (self.values.is_subclass(i.cls, "int")
                            || self.values.is_subclass(i.cls, "float")))
            }
            AbstractValue::Class(_) => name == "type",
            AbstractValue::InterpreterFunction(_)
            | AbstractValue::NativeFunction(_)
            | AbstractValue::BoundMethod(_)
            | AbstractValue::Special(_) => name == "function",
            AbstractValue::Module(_) => name == "module",
            AbstractValue::Unknown { .. } | AbstractValue::Unsolvable => true,
        }
    }

    /// A variable holding values of type `ty`.
    pub(crate) fn instantiate_type(
        &mut self,
        ty: &TypeExpr,
        node: NodeId,
        subst: &Subst,
        receiver: Option<DataId>,
    ) -> Result<VariableId, AnalysisError> {
        let var = self.program.new_variable(&ty.to_string());
        match ty {
            TypeExpr::Any => {
                let data = self.convert.unsolvable();
                self.program.add_binding(var, data, [], node);
            }
            TypeExpr::Name(name) if name == "NoneType" => {
                let data = self.constant_data(&Constant::None)?;
                self.program.add_binding(var, data, [], node);
            }
            TypeExpr::Name(name) => {
                let data = self.plain_instance(name)?;
                self.program.add_binding(var, data, [], node);
            }
            TypeExpr::Generic(name, params) => {
                let cls = self.library_class(name)?;
                let data = self.new_instance(cls, None)?;
                let template = self.class_template(cls);
                for (t, param) in template.iter().zip(params) {
                    let items = self.instantiate_type(param, node, subst, receiver)?;
                    self.fill_type_param(data, t, &[items], node);
                }
                self.program.add_binding(var, data, [], node);
            }
            TypeExpr::TypeVar(name) => match subst.get(name) {
                Some(sources) => {
                    for source in sources {
                        match source {
                            TypeSource::Binding(b) => {
                                let data = self.program.binding_data(*b);
                                self.program.add_binding(var, data, [*b], node);
                            }
                            TypeSource::Variable(v) => self.program.paste_variable(var, *v, node),
                        }
                    }
                }
                None => {
                    let param = receiver
                        .and_then(|r| self.values.instance(r))
                        .and_then(|i| i.type_params.get(name).copied());
                    if let Some(param) = param {
                        self.program.paste_variable(var, param, node);
                    }
                }
            },
            TypeExpr::Union(options) => {
                for option in options {
                    let part = self.instantiate_type(option, node, subst, receiver)?;
                    self.program.paste_variable(var, part, node);
                }
            }
        }
        Ok(var)
    }

    fn apply_mutations(&mut self, node: NodeId, f: &NativeFunction, receiver: DataId, subst: &Subst) {
        for name in &f.mutates {
            let Some(sources) = subst.get(name) else {
                continue;
            };
            let param = self
                .values
                .instance(receiver)
                .and_then(|i| i.type_params.get(name).copied());
            let Some(param) = param else {
                continue;
            };
            for source in sources {
                match source {
                    TypeSource::Binding(b) => {
                        let data = self.program.binding_data(*b);
                        self.program.add_binding(param, data, [*b], node);
                    }
                    TypeSource::Variable(v) => self.program.paste_variable(param, *v, node),
                }
            }
        }
    }

    /// `(x: complex, y: str or int)` for the error details.
    fn describe_actual(&self, node: NodeId, sig: Option<&Signature>, args: &FunctionArgs) -> String {
        let mut parts = Vec::with_capacity(args.count());
        for (i, var) in args.posargs.iter().enumerate() {
            let name = sig
                .and_then(|s| s.params.get(i))
                .map_or_else(|| format!("_{}", i), |p| p.name.clone());
            parts.push(format!("{}: {}", name, self.type_names(*var, node)));
        }
        for (name, var) in &args.namedargs {
            parts.push(format!("{}: {}", name, self.type_names(*var, node)));
        }
        format!("({})", parts.join(", "))
    }

    pub(crate) fn type_names(&self, var: VariableId, node: NodeId) -> String {
        let mut names: Vec<String> = Vec::new();
        for d in self.program.data(var, node) {
            let n = self.values.type_name(d);
            if !names.contains(&n) {
                names.push(n);
            }
        }
        names.join(" or ")
    }
}

fn single(data: &[DataId]) -> Option<DataId> {
    match data {
        [only] => Some(*only),
        _ => None,
    }
}

/// Whether `sig` can take the number and names of `args`.
fn accepts(sig: &Signature, args: &FunctionArgs) -> bool {
    let positional = args.posargs.len();
    if sig.max_args().is_some_and(|max| positional > max) {
        return false;
    }
    let named = args
        .namedargs
        .iter()
        .filter(|(name, _)| sig.params.iter().any(|p| p.name == *name))
        .count();
    if named < args.namedargs.len() && sig.kwargs.is_none() {
        return false;
    }
    positional + named >= sig.min_args()
}

fn arity_range(signatures: &[Signature]) -> (usize, Option<usize>) {
    let min = signatures.iter().map(Signature::min_args).min().unwrap_or(0);
    let max = signatures
        .iter()
        .map(Signature::max_args)
        .try_fold(0usize, |acc, m| m.map(|m| acc.max(m)));
    (min, max)
}
