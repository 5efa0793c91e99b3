//! Conversion of constants and library objects into abstract values.
//!
//! Everything created here is bound at the root node and cached, so that
//! loading the same constant or builtin twice yields the same variable.

use std::collections::HashMap;
use std::sync::Arc;

use pyflow_bytecode::{CodeObject, Constant};

use crate::abstract_value::{
    AbstractValue, Class, ClassOrigin, Instance, Module, NativeFunction, PyValue, ValueStore,
};
use crate::error::AnalysisError;
use crate::errorlog::ErrorReporter;
use crate::stubs::StubFunction;
use crate::typegraph::{DataId, VariableId};
use crate::vm::class_builder::c3_linearize;
use crate::vm::VirtualMachine;

/// Hashable identity of a constant. Floats compare by bit pattern and code
/// objects by address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum ConstKey {
    None,
    Bool(bool),
    Int(i64),
    Float(u64),
    Complex(u64, u64),
    Str(String),
    Unicode(String),
    Bytes(Vec<u8>),
    Ellipsis,
    Tuple(Vec<ConstKey>),
    Code(usize),
}

impl ConstKey {
    fn of(constant: &Constant) -> Self {
        match constant {
            Constant::None => ConstKey::None,
            Constant::Bool(b) => ConstKey::Bool(*b),
            Constant::Int(i) => ConstKey::Int(*i),
            Constant::Float(f) => ConstKey::Float(f.to_bits()),
            Constant::Complex(re, im) => ConstKey::Complex(re.to_bits(), im.to_bits()),
            Constant::Str(s) => ConstKey::Str(s.clone()),
            Constant::Unicode(s) => ConstKey::Unicode(s.clone()),
            Constant::Bytes(b) => ConstKey::Bytes(b.clone()),
            Constant::Ellipsis => ConstKey::Ellipsis,
            Constant::Tuple(items) => ConstKey::Tuple(items.iter().map(ConstKey::of).collect()),
            Constant::Code(code) => ConstKey::Code(Arc::as_ptr(code) as usize),
        }
    }
}

/// Caches for root-bound values.
#[derive(Debug)]
pub struct Converter {
    unsolvable: DataId,
    classes: HashMap<String, DataId>,
    functions: HashMap<String, DataId>,
    modules: HashMap<String, DataId>,
    plain_instances: HashMap<DataId, DataId>,
    constants: HashMap<ConstKey, (DataId, VariableId)>,
}

impl Converter {
    pub fn new(values: &mut ValueStore) -> Self {
        Self {
            unsolvable: values.add(AbstractValue::Unsolvable),
            classes: HashMap::new(),
            functions: HashMap::new(),
            modules: HashMap::new(),
            plain_instances: HashMap::new(),
            constants: HashMap::new(),
        }
    }

    /// The shared give-up value.
    pub fn unsolvable(&self) -> DataId {
        self.unsolvable
    }

    pub fn cached_class(&self, name: &str) -> Option<DataId> {
        self.classes.get(name).copied()
    }
}

impl<E: ErrorReporter> VirtualMachine<E> {
    /// Root-bound variable holding `constant`.
    pub(crate) fn convert_constant(&mut self, constant: &Constant) -> Result<VariableId, AnalysisError> {
        let key = ConstKey::of(constant);
        if let Some((_, var)) = self.convert.constants.get(&key) {
            return Ok(*var);
        }
        let data = self.constant_value(constant)?;
        let var = self.program.new_variable("const");
        self.program.add_binding(var, data, [], self.root);
        self.convert.constants.insert(key, (data, var));
        Ok(var)
    }

    /// The value of `constant`, shared across loads.
    pub(crate) fn constant_data(&mut self, constant: &Constant) -> Result<DataId, AnalysisError> {
        let key = ConstKey::of(constant);
        if let Some((data, _)) = self.convert.constants.get(&key) {
            return Ok(*data);
        }
        self.convert_constant(constant)?;
        self.convert
            .constants
            .get(&key)
            .map(|(data, _)| *data)
            .ok_or_else(|| AnalysisError::Internal("constant cache miss".to_string()))
    }

    fn constant_value(&mut self, constant: &Constant) -> Result<DataId, AnalysisError> {
        let python3 = self.options.is_python3();
        let class_name = match constant {
            Constant::None => "NoneType",
            Constant::Bool(_) => "bool",
            Constant::Int(_) => "int",
            Constant::Float(_) => "float",
            Constant::Complex(..) => "complex",
            Constant::Str(_) => "str",
            Constant::Unicode(_) if python3 => "str",
            Constant::Unicode(_) => "unicode",
            Constant::Bytes(_) if python3 => "bytes",
            Constant::Bytes(_) => "str",
            Constant::Ellipsis => "object",
            Constant::Tuple(_) => "tuple",
            Constant::Code(_) => "code",
        };
        let cls = self.library_class(class_name)?;
        let pyval = match constant {
            Constant::Tuple(items) => {
                let mut vars = Vec::with_capacity(items.len());
                for item in items {
                    vars.push(self.convert_constant(item)?);
                }
                return self.build_tuple_value(&vars, self.root);
            }
            Constant::Code(code) => PyValue::Code(Arc::clone(code)),
            other => PyValue::Constant(other.clone()),
        };
        self.new_instance(cls, Some(pyval))
    }

    /// A fresh instance of `cls`, with one empty variable per type parameter.
    pub(crate) fn new_instance(
        &mut self,
        cls: DataId,
        pyval: Option<PyValue>,
    ) -> Result<DataId, AnalysisError> {
        let mut type_params = std::collections::BTreeMap::new();
        for name in self.class_template(cls) {
            let var = self.program.new_variable(&name);
            type_params.insert(name, var);
        }
        Ok(self.values.add(AbstractValue::Instance(Instance {
            cls,
            type_params,
            members: std::collections::BTreeMap::new(),
            pyval,
        })))
    }

    /// Template parameters of `cls` and its bases, without duplicates.
    pub(crate) fn class_template(&self, cls: DataId) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        if let Some(class) = self.values.class(cls) {
            for entry in &class.mro {
                if let Some(c) = self.values.class(*entry) {
                    for t in &c.template {
                        if !out.contains(t) {
                            out.push(t.clone());
                        }
                    }
                }
            }
        }
        out
    }

    /// A shared instance of the library class `name` with no payload. Classes
    /// with type parameters get a fresh instance each time.
    pub(crate) fn plain_instance(&mut self, name: &str) -> Result<DataId, AnalysisError> {
        let cls = self.library_class(name)?;
        self.shared_instance(cls)
    }

    /// Like [`Self::plain_instance`], for a class object.
    pub(crate) fn shared_instance(&mut self, cls: DataId) -> Result<DataId, AnalysisError> {
        if !self.class_template(cls).is_empty() {
            return self.new_instance(cls, None);
        }
        if let Some(data) = self.convert.plain_instances.get(&cls) {
            return Ok(*data);
        }
        let data = self.new_instance(cls, None)?;
        self.convert.plain_instances.insert(cls, data);
        Ok(data)
    }

    /// The class object for a library class, created on first use.
    pub(crate) fn library_class(&mut self, name: &str) -> Result<DataId, AnalysisError> {
        if let Some(id) = self.convert.cached_class(name) {
            return Ok(id);
        }
        let stub = self
            .stubs
            .class(name)
            .cloned()
            .ok_or_else(|| AnalysisError::Internal(format!("no library class named {}", name)))?;
        let id = self.values.add(AbstractValue::Class(Class {
            name: stub.name.clone(),
            bases: Vec::new(),
            members: std::collections::BTreeMap::new(),
            mro: Vec::new(),
            template: stub.template.clone(),
            origin: ClassOrigin::Library,
        }));
        self.convert.classes.insert(stub.name.clone(), id);

        let mut base_ids = Vec::with_capacity(stub.bases.len());
        let mut base_vars = Vec::with_capacity(stub.bases.len());
        for base in &stub.bases {
            let base_id = self.library_class(base)?;
            let var = self.program.new_variable(base);
            self.program.add_binding(var, base_id, [], self.root);
            base_ids.push(base_id);
            base_vars.push(var);
        }
        let base_mros: Vec<Vec<DataId>> = base_ids
            .iter()
            .map(|b| self.values.class(*b).map(|c| c.mro.clone()).unwrap_or_default())
            .collect();
        let mro = c3_linearize(id, &base_ids, base_mros).ok_or_else(|| {
            AnalysisError::Internal(format!("library class {} has no consistent MRO", name))
        })?;
        if let Some(AbstractValue::Class(class)) = self.values.get_mut(id) {
            class.bases = base_vars;
            class.mro = mro;
        }
        Ok(id)
    }

    /// Library class `name` as a root-bound variable.
    pub(crate) fn library_class_var(&mut self, name: &str) -> Result<VariableId, AnalysisError> {
        let cls = self.library_class(name)?;
        let var = self.program.new_variable(name);
        self.program.add_binding(var, cls, [], self.root);
        Ok(var)
    }

    /// The value of a library function, created on first use.
    pub(crate) fn native_function(&mut self, function: &StubFunction) -> DataId {
        if let Some(id) = self.convert.functions.get(&function.name) {
            return *id;
        }
        let id = self.values.add(AbstractValue::NativeFunction(NativeFunction {
            name: function.name.clone(),
            signatures: function.signatures.clone(),
            mutates: function.mutates.clone(),
        }));
        self.convert.functions.insert(function.name.clone(), id);
        id
    }

    /// A builtin reachable by bare name: a class or a function.
    pub(crate) fn library_builtin(&mut self, name: &str) -> Result<Option<DataId>, AnalysisError> {
        if self.stubs.class(name).is_some() && !name.contains('.') {
            return self.library_class(name).map(Some);
        }
        let stubs = Arc::clone(&self.stubs);
        Ok(stubs.function(name).map(|f| self.native_function(f)))
    }

    /// The module object for `name`, if the signature table declares it.
    pub(crate) fn library_module(&mut self, name: &str) -> Option<DataId> {
        if let Some(id) = self.convert.modules.get(name) {
            return Some(*id);
        }
        self.stubs.module(name)?;
        let id = self.values.add(AbstractValue::Module(Module {
            name: name.to_string(),
            members: std::collections::BTreeMap::new(),
        }));
        self.convert.modules.insert(name.to_string(), id);
        Some(id)
    }

    /// A tuple instance over `items`. The element variables are shared, not
    /// copied, so closure cells keep their identity.
    pub(crate) fn build_tuple_value(
        &mut self,
        items: &[VariableId],
        node: crate::typegraph::NodeId,
    ) -> Result<DataId, AnalysisError> {
        let cls = self.library_class("tuple")?;
        let data = self.new_instance(cls, Some(PyValue::Tuple(items.to_vec())))?;
        self.fill_type_param(data, "T", items, node);
        Ok(data)
    }

    /// Paste `items` into type parameter `param` of instance `data`.
    pub(crate) fn fill_type_param(
        &mut self,
        data: DataId,
        param: &str,
        items: &[VariableId],
        node: crate::typegraph::NodeId,
    ) {
        let target = self
            .values
            .instance(data)
            .and_then(|i| i.type_params.get(param).copied());
        if let Some(target) = target {
            for item in items {
                self.program.paste_variable(target, *item, node);
            }
        }
    }

    /// A code object constant, as seen by `MAKE_FUNCTION`.
    pub(crate) fn code_of(&self, data: DataId) -> Option<Arc<CodeObject>> {
        match self.values.get(data).pyval() {
            Some(PyValue::Code(code)) => Some(Arc::clone(code)),
            Some(PyValue::Constant(Constant::Code(code))) => Some(Arc::clone(code)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AnalysisOptions;

    fn vm() -> VirtualMachine {
        VirtualMachine::new(AnalysisOptions::default()).unwrap()
    }

    #[test]
    fn test_constants_are_cached() {
        let mut vm = vm();
        let a = vm.convert_constant(&Constant::Int(3)).unwrap();
        let b = vm.convert_constant(&Constant::Int(3)).unwrap();
        let c = vm.convert_constant(&Constant::Int(4)).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        let f1 = vm.convert_constant(&Constant::Float(0.5)).unwrap();
        let f2 = vm.convert_constant(&Constant::Float(0.5)).unwrap();
        assert_eq!(f1, f2);
    }

    #[test]
    fn test_constant_classes() {
        let mut vm = vm();
        let none = vm.constant_data(&Constant::None).unwrap();
        assert!(vm.values.is_none(none));
        assert_eq!(vm.values.type_name(none), "None");
        let s = vm.constant_data(&Constant::Str("a".into())).unwrap();
        assert_eq!(vm.values.type_name(s), "str");
        assert_eq!(vm.values.string_constant(s), Some("a"));
        let u = vm.constant_data(&Constant::Unicode("a".into())).unwrap();
        assert_eq!(vm.values.type_name(u), "unicode");
    }

    #[test]
    fn test_tuple_constant_elements() {
        let mut vm = vm();
        let t = vm
            .constant_data(&Constant::Tuple(vec![Constant::Int(1), Constant::Str("x".into())]))
            .unwrap();
        let inst = vm.values.instance(t).unwrap().clone();
        match inst.pyval {
            Some(PyValue::Tuple(items)) => assert_eq!(items.len(), 2),
            other => panic!("expected tuple payload, got {:?}", other),
        }
        let param = inst.type_params["T"];
        let names: Vec<String> = vm
            .program
            .all_data(param)
            .into_iter()
            .map(|d| vm.values.type_name(d))
            .collect();
        assert_eq!(names, vec!["int".to_string(), "str".to_string()]);
    }

    #[test]
    fn test_library_class_mro() {
        let mut vm = vm();
        let b = vm.library_class("bool").unwrap();
        assert!(vm.values.is_subclass(b, "int"));
        assert!(vm.values.is_subclass(b, "object"));
        let again = vm.library_class("bool").unwrap();
        assert_eq!(b, again);
        assert!(vm.library_class("nonexistent").is_err());
    }

    #[test]
    fn test_generator_inherits_template() {
        let mut vm = vm();
        let g = vm.library_class("generator").unwrap();
        assert_eq!(vm.class_template(g), vec!["T".to_string()]);
    }

    #[test]
    fn test_plain_instances() {
        let mut vm = vm();
        let a = vm.plain_instance("int").unwrap();
        let b = vm.plain_instance("int").unwrap();
        assert_eq!(a, b);
        let l1 = vm.plain_instance("list").unwrap();
        let l2 = vm.plain_instance("list").unwrap();
        assert_ne!(l1, l2);
    }

    #[test]
    fn test_modules() {
        let mut vm = vm();
        assert!(vm.library_module("sys").is_some());
        assert_eq!(vm.library_module("sys"), vm.library_module("sys"));
        assert!(vm.library_module("rumplestiltskin").is_none());
    }
}
