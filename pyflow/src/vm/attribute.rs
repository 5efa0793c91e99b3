//! Attribute lookup and assignment.
//!
//! Library classes and modules start out empty; their members are created
//! from the signature table on first access and then remembered, so repeated
//! lookups see the same variables.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

use std::sync::Arc;

use tracing::trace;

use crate::abstract_value::{AbstractValue, BoundMethod, ClassOrigin};
use crate::error::AnalysisError;
use crate::errorlog::{ErrorKind, ErrorRecord, ErrorReporter};
use crate::stubs::ModuleMember;
use crate::typegraph::{BindingId, DataId, NodeId, VariableId};

use super::native::Subst;
use super::VirtualMachine;

impl<E: ErrorReporter> VirtualMachine<E> {
    /// Attribute `name` of one value. Methods found on the class of an
    /// instance come back bound to the instance; `receiver` is the binding
    /// the instance was reached through.
    pub(crate) fn get_attribute(
        &mut self,
        node: NodeId,
        data: DataId,
        name: &str,
        receiver: Option<BindingId>,
    ) -> Result<Option<VariableId>, AnalysisError> {
        match self.values.get(data).clone() {
            AbstractValue::Instance(instance) => {
                if let Some(var) = instance.members.get(name) {
                    return Ok(Some(*var));
                }
                match self.class_member(instance.cls, name)? {
                    Some(attr) => Ok(Some(self.bind_methods(node, data, attr, receiver))),
                    None => Ok(None),
                }
            }
            AbstractValue::Class(_) => self.class_member(data, name),
            AbstractValue::InterpreterFunction(f) => match f.members.get(name) {
                Some(var) => Ok(Some(*var)),
                None => self.function_attribute(name),
            },
            AbstractValue::NativeFunction(_) | AbstractValue::Special(_) => {
                self.function_attribute(name)
            }
            AbstractValue::BoundMethod(m) => self.get_attribute(node, m.function, name, receiver),
            AbstractValue::Module(_) => self.module_member(data, name),
            AbstractValue::Unknown { members } => {
                if let Some(var) = members.get(name) {
                    return Ok(Some(*var));
                }
                let var = self.new_unknown(self.root);
                if let Some(AbstractValue::Unknown { members }) = self.values.get_mut(data) {
                    members.insert(name.to_string(), var);
                }
                Ok(Some(var))
            }
            AbstractValue::Unsolvable => Ok(Some(self.new_unsolvable(node))),
        }
    }

    /// Look `name` up along the MRO of `cls`.
    pub(crate) fn class_member(
        &mut self,
        cls: DataId,
        name: &str,
    ) -> Result<Option<VariableId>, AnalysisError> {
        let mro = match self.values.class(cls) {
            Some(class) => class.mro.clone(),
            None => return Ok(None),
        };
        for entry in mro {
            let Some(class) = self.values.class(entry) else {
                continue;
            };
            if let Some(var) = class.members.get(name) {
                return Ok(Some(*var));
            }
            if class.origin == ClassOrigin::Library {
                if let Some(var) = self.materialize_library_member(entry, name)? {
                    return Ok(Some(var));
                }
            }
        }
        Ok(None)
    }

    fn materialize_library_member(
        &mut self,
        cls: DataId,
        name: &str,
    ) -> Result<Option<VariableId>, AnalysisError> {
        let class_name = self.values.class_name(cls).to_string();
        let stubs = Arc::clone(&self.stubs);
        let Some(stub) = stubs.class(&class_name) else {
            return Ok(None);
        };
        let var = if let Some(method) = stub.methods.get(name) {
            let data = self.native_function(method);
            self.variable_with(name, data, [], self.root)
        } else if let Some(ty) = stub.attributes.get(name) {
            self.instantiate_type(ty, self.root, &Subst::new(), None)?
        } else {
            return Ok(None);
        };
        trace!(class = %class_name, member = name, "materialized library member");
        if let Some(AbstractValue::Class(class)) = self.values.get_mut(cls) {
            class.members.insert(name.to_string(), var);
        }
        Ok(Some(var))
    }

    fn function_attribute(&mut self, name: &str) -> Result<Option<VariableId>, AnalysisError> {
        let cls = self.library_class("function")?;
        self.class_member(cls, name)
    }

    fn module_member(&mut self, module: DataId, name: &str) -> Result<Option<VariableId>, AnalysisError> {
        let module_name = match self.values.get(module) {
            AbstractValue::Module(m) => {
                if let Some(var) = m.members.get(name) {
                    return Ok(Some(*var));
                }
                m.name.clone()
            }
            _ => return Ok(None),
        };
        let stubs = Arc::clone(&self.stubs);
        let member = stubs
            .module(&module_name)
            .and_then(|m| m.members.get(name).cloned());
        let var = match member {
            Some(ModuleMember::Function(qualified)) => match stubs.function(&qualified) {
                Some(function) => {
                    let data = self.native_function(function);
                    self.variable_with(name, data, [], self.root)
                }
                None => return Ok(None),
            },
            Some(ModuleMember::Class(qualified)) => self.library_class_var(&qualified)?,
            Some(ModuleMember::Attribute(ty)) => {
                self.instantiate_type(&ty, self.root, &Subst::new(), None)?
            }
            None => match self.library_module(&format!("{}.{}", module_name, name)) {
                Some(submodule) => self.variable_with(name, submodule, [], self.root),
                None => return Ok(None),
            },
        };
        if let Some(AbstractValue::Module(m)) = self.values.get_mut(module) {
            m.members.insert(name.to_string(), var);
        }
        Ok(Some(var))
    }

    /// Replace functions in `attr` with methods bound to `instance`.
    fn bind_methods(
        &mut self,
        node: NodeId,
        instance: DataId,
        attr: VariableId,
        receiver: Option<BindingId>,
    ) -> VariableId {
        let has_functions = self
            .program
            .all_data(attr)
            .iter()
            .any(|d| matches!(
                self.values.get(*d),
                AbstractValue::InterpreterFunction(_) | AbstractValue::NativeFunction(_)
            ));
        if !has_functions {
            return attr;
        }
        let this = self.variable_with("self", instance, receiver, node);
        let name = self.program.variable(attr).name.clone();
        let bound = self.program.new_variable(&name);
        for b in self.program.all_bindings(attr).to_vec() {
            let data = self.program.binding_data(b);
            let data = match self.values.get(data) {
                AbstractValue::InterpreterFunction(_) | AbstractValue::NativeFunction(_) => {
                    self.values.add(AbstractValue::BoundMethod(BoundMethod {
                        receiver: this,
                        function: data,
                    }))
                }
                _ => data,
            };
            self.program.add_binding(bound, data, [b], node);
        }
        bound
    }

    /// `obj.name` over every visible binding of `obj`. `None` when no binding
    /// has the attribute.
    pub(crate) fn load_attr_noerror(
        &mut self,
        node: NodeId,
        obj: VariableId,
        name: &str,
    ) -> Result<Option<VariableId>, AnalysisError> {
        let result = self.program.new_variable(name);
        let mut found = false;
        for b in self.program.bindings(obj, node) {
            let data = self.program.binding_data(b);
            let Some(attr) = self.get_attribute(node, data, name, Some(b))? else {
                continue;
            };
            for ab in self.program.bindings(attr, node) {
                let value = self.program.binding_data(ab);
                self.program.add_binding(result, value, [ab, b], node);
                found = true;
            }
        }
        Ok(found.then_some(result))
    }

    /// Like [`Self::load_attr_noerror`], reporting a missing attribute and
    /// giving up on it.
    pub(crate) fn load_attr(
        &mut self,
        node: NodeId,
        obj: VariableId,
        name: &str,
    ) -> Result<VariableId, AnalysisError> {
        if let Some(result) = self.load_attr_noerror(node, obj, name)? {
            return Ok(result);
        }
        let data = self.program.data(obj, node);
        if !data.is_empty() {
            let record = if data.iter().all(|d| self.values.is_none(*d)) {
                ErrorRecord::new(
                    ErrorKind::NoneAttr,
                    format!("Access of attribute '{}' on None", name),
                )
            } else if let [only] = data.as_slice() {
                ErrorRecord::new(
                    ErrorKind::AttributeError,
                    format!("No attribute '{}' on {}", name, self.values.type_name(*only)),
                )
            } else {
                ErrorRecord::new(ErrorKind::AttributeError, format!("No attribute '{}'", name))
            };
            self.report(record.with_variables(vec![obj]));
        }
        Ok(self.new_unsolvable(node))
    }

    /// Member variable `name` of a value that can carry members, created on
    /// first write.
    fn member_slot(&mut self, data: DataId, name: &str) -> Option<VariableId> {
        let existing = match self.values.get(data) {
            AbstractValue::Instance(i) => i.members.get(name),
            AbstractValue::Class(c) => c.members.get(name),
            AbstractValue::InterpreterFunction(f) => f.members.get(name),
            AbstractValue::Module(m) => m.members.get(name),
            AbstractValue::Unknown { members } => members.get(name),
            _ => return None,
        };
        if let Some(var) = existing {
            return Some(*var);
        }
        let var = self.program.new_variable(name);
        let members = match self.values.get_mut(data)? {
            AbstractValue::Instance(i) => &mut i.members,
            AbstractValue::Class(c) => &mut c.members,
            AbstractValue::InterpreterFunction(f) => &mut f.members,
            AbstractValue::Module(m) => &mut m.members,
            AbstractValue::Unknown { members } => members,
            _ => return None,
        };
        members.insert(name.to_string(), var);
        Some(var)
    }

    /// Add the values of `value` to member `name` of `data`, from `node`.
    pub(crate) fn set_member(&mut self, node: NodeId, data: DataId, name: &str, value: VariableId) {
        if let Some(slot) = self.member_slot(data, name) {
            self.program.paste_variable(slot, value, node);
        }
    }

    /// `obj.name = value` for every visible binding of `obj`.
    pub(crate) fn store_attr(&mut self, node: NodeId, obj: VariableId, name: &str, value: VariableId) {
        for data in self.program.data(obj, node) {
            self.set_member(node, data, name, value);
        }
    }

    /// `del obj.name`. Member maps are shared by every path; the member is
    /// kept.
    pub(crate) fn del_attr(&self, name: &str) {
        trace!(name, "ignoring delete of an attribute");
    }
}
