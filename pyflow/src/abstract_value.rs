//! Abstract values.
//!
//! Bindings in the typegraph refer to values by [`DataId`]; the values
//! themselves live in a [`ValueStore`] owned by the interpreter. The variant
//! set is closed, so every capability is an exhaustive `match` over
//! [`AbstractValue`].
//!
//! Namespaces (module globals, function locals, class bodies) are arena
//! entries too, so functions and frames can share one by id.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use pyflow_bytecode::{CodeObject, Constant};

use crate::typegraph::{DataId, Program, VariableId};

/// A namespace in the value store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NamespaceId(pub u32);

impl NamespaceId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NamespaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ns{}", self.0)
    }
}

/// Concrete payload mirrored by an instance.
#[derive(Debug, Clone, PartialEq)]
pub enum PyValue {
    /// A literal scalar (`None`, `True`, `3`, `"abc"`, ...).
    Constant(Constant),
    /// A tuple whose element variables are known.
    Tuple(Vec<VariableId>),
    /// A code object, as loaded by `LOAD_CONST` before `MAKE_FUNCTION`.
    Code(Arc<CodeObject>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassOrigin {
    /// Declared in the signature table.
    Library,
    /// Built by `BUILD_CLASS` / `__build_class__`.
    Interpreter,
}

/// Builtins that need interpreter support beyond a signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecialForm {
    IsInstance,
    Super,
    BuildClass,
}

impl SpecialForm {
    pub fn name(self) -> &'static str {
        match self {
            SpecialForm::IsInstance => "isinstance",
            SpecialForm::Super => "super",
            SpecialForm::BuildClass => "__build_class__",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Instance {
    pub cls: DataId,
    /// One variable per template parameter of the class and its bases.
    pub type_params: BTreeMap<String, VariableId>,
    pub members: BTreeMap<String, VariableId>,
    pub pyval: Option<PyValue>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Class {
    pub name: String,
    pub bases: Vec<VariableId>,
    pub members: BTreeMap<String, VariableId>,
    /// Linearisation, starting with the class itself.
    pub mro: Vec<DataId>,
    pub template: Vec<String>,
    pub origin: ClassOrigin,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InterpreterFunction {
    pub name: String,
    pub code: Arc<CodeObject>,
    pub globals: NamespaceId,
    pub defaults: Vec<VariableId>,
    pub kw_defaults: BTreeMap<String, VariableId>,
    /// Cell variables captured by `MAKE_CLOSURE`, in `co_freevars` order.
    pub closure: Vec<VariableId>,
    /// Parameter name to annotated class.
    pub annotations: BTreeMap<String, DataId>,
    pub members: BTreeMap<String, VariableId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NativeFunction {
    /// Qualified name: `len`, `list.append`, `os.path.join`.
    pub name: String,
    pub signatures: Vec<crate::stubs::Signature>,
    pub mutates: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BoundMethod {
    /// Holds the receiver binding the method was looked up on.
    pub receiver: VariableId,
    pub function: DataId,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Module {
    pub name: String,
    /// Members materialised so far.
    pub members: BTreeMap<String, VariableId>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AbstractValue {
    Instance(Instance),
    Class(Class),
    InterpreterFunction(InterpreterFunction),
    NativeFunction(NativeFunction),
    BoundMethod(BoundMethod),
    Module(Module),
    /// Placeholder for values the analysis does not track. Attribute reads
    /// create (and remember) further unknowns.
    Unknown { members: BTreeMap<String, VariableId> },
    /// Give-up sentinel. Every operation on it yields another one.
    Unsolvable,
    Special(SpecialForm),
}

static UNSOLVABLE: AbstractValue = AbstractValue::Unsolvable;

impl AbstractValue {
    pub fn unknown() -> Self {
        AbstractValue::Unknown {
            members: BTreeMap::new(),
        }
    }

    /// Unknown and unsolvable values match any type and absorb operations.
    pub fn is_opaque(&self) -> bool {
        matches!(self, AbstractValue::Unknown { .. } | AbstractValue::Unsolvable)
    }

    pub fn is_function(&self) -> bool {
        matches!(
            self,
            AbstractValue::InterpreterFunction(_)
                | AbstractValue::NativeFunction(_)
                | AbstractValue::BoundMethod(_)
                | AbstractValue::Special(_)
        )
    }

    pub fn as_class(&self) -> Option<&Class> {
        match self {
            AbstractValue::Class(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_instance(&self) -> Option<&Instance> {
        match self {
            AbstractValue::Instance(i) => Some(i),
            _ => None,
        }
    }

    pub fn pyval(&self) -> Option<&PyValue> {
        self.as_instance().and_then(|i| i.pyval.as_ref())
    }

    pub fn constant(&self) -> Option<&Constant> {
        match self.pyval() {
            Some(PyValue::Constant(c)) => Some(c),
            _ => None,
        }
    }
}

/// Arena of abstract values and namespaces.
#[derive(Debug, Clone, Default)]
pub struct ValueStore {
    values: Vec<AbstractValue>,
    namespaces: Vec<BTreeMap<String, VariableId>>,
}

impl ValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, value: AbstractValue) -> DataId {
        self.values.push(value);
        DataId(self.values.len() as u32 - 1)
    }

    /// The value behind `id`. Ids that do not name a value (the condition
    /// marker) read as the give-up sentinel.
    pub fn get(&self, id: DataId) -> &AbstractValue {
        self.values.get(id.index()).unwrap_or(&UNSOLVABLE)
    }

    pub fn get_mut(&mut self, id: DataId) -> Option<&mut AbstractValue> {
        self.values.get_mut(id.index())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn new_namespace(&mut self) -> NamespaceId {
        self.namespaces.push(BTreeMap::new());
        NamespaceId(self.namespaces.len() as u32 - 1)
    }

    pub fn namespace(&self, id: NamespaceId) -> Option<&BTreeMap<String, VariableId>> {
        self.namespaces.get(id.index())
    }

    pub fn namespace_mut(&mut self, id: NamespaceId) -> Option<&mut BTreeMap<String, VariableId>> {
        self.namespaces.get_mut(id.index())
    }

    pub fn lookup(&self, ns: NamespaceId, name: &str) -> Option<VariableId> {
        self.namespace(ns).and_then(|m| m.get(name).copied())
    }

    pub fn class(&self, id: DataId) -> Option<&Class> {
        self.get(id).as_class()
    }

    pub fn instance(&self, id: DataId) -> Option<&Instance> {
        self.get(id).as_instance()
    }

    pub fn class_name(&self, cls: DataId) -> &str {
        self.class(cls).map_or("?", |c| c.name.as_str())
    }

    /// Whether `cls` is `name` or inherits from it.
    pub fn is_subclass(&self, cls: DataId, name: &str) -> bool {
        match self.class(cls) {
            Some(c) => c.mro.iter().any(|m| self.class_name(*m) == name),
            None => false,
        }
    }

    /// Class of an instance value.
    pub fn instance_class(&self, data: DataId) -> Option<DataId> {
        self.instance(data).map(|i| i.cls)
    }

    pub fn is_none(&self, data: DataId) -> bool {
        matches!(self.get(data).constant(), Some(Constant::None))
    }

    pub fn string_constant(&self, data: DataId) -> Option<&str> {
        self.get(data).constant().and_then(Constant::as_str)
    }

    /// Short type name used in error messages.
    pub fn type_name(&self, data: DataId) -> String {
        match self.get(data) {
            AbstractValue::Instance(i) => {
                if matches!(i.pyval, Some(PyValue::Constant(Constant::None))) {
                    "None".to_string()
                } else {
                    self.class_name(i.cls).to_string()
                }
            }
            AbstractValue::Class(c) => format!("Type[{}]", c.name),
            AbstractValue::InterpreterFunction(_)
            | AbstractValue::NativeFunction(_)
            | AbstractValue::BoundMethod(_)
            | AbstractValue::Special(_) => "Callable".to_string(),
            AbstractValue::Module(m) => format!("module '{}'", m.name),
            AbstractValue::Unknown { .. } | AbstractValue::Unsolvable => "?".to_string(),
        }
    }

    /// Whether the value may be truthy (`value == true`) or falsy.
    pub fn compatible_with(&self, program: &Program, data: DataId, value: bool) -> bool {
        match self.get(data) {
            AbstractValue::Instance(i) => match &i.pyval {
                Some(PyValue::Constant(c)) => c.truthy() == value,
                Some(PyValue::Tuple(items)) => !items.is_empty() == value,
                Some(PyValue::Code(_)) => value,
                None => {
                    if i.type_params.is_empty() {
                        true
                    } else if i
                        .type_params
                        .values()
                        .all(|v| program.all_bindings(*v).is_empty())
                    {
                        // Never populated: always empty.
                        !value
                    } else {
                        true
                    }
                }
            },
            AbstractValue::Class(_)
            | AbstractValue::InterpreterFunction(_)
            | AbstractValue::NativeFunction(_)
            | AbstractValue::BoundMethod(_)
            | AbstractValue::Module(_)
            | AbstractValue::Special(_) => value,
            AbstractValue::Unknown { .. } | AbstractValue::Unsolvable => true,
        }
    }
}
