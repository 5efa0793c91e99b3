//! Signature table for library classes, functions and modules.
//!
//! The builtin table is a TOML document embedded at compile time and parsed
//! once on first use. Each function carries one or more overloads written in
//! the notation of [`signature`].

pub mod signature;

use std::collections::BTreeMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use serde::Deserialize;
use thiserror::Error;

pub use signature::{Param, Signature, TypeExpr};

const BUILTINS_TOML: &str = include_str!("builtins.toml");

static BUILTINS: Lazy<Result<Arc<StubTable>, StubError>> =
    Lazy::new(|| StubTable::from_toml_str(BUILTINS_TOML).map(Arc::new));

/// The embedded builtin table.
pub fn builtins() -> Result<Arc<StubTable>, StubError> {
    BUILTINS.clone()
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StubError {
    #[error("invalid stub TOML: {0}")]
    Toml(String),

    #[error("bad signature {text:?}: {message}")]
    Signature { text: String, message: String },

    #[error("class {class} has unknown base {base}")]
    UnknownBase { class: String, base: String },

    #[error("{context} refers to unknown class {name}")]
    UnknownType { context: String, name: String },

    #[error("{0} is declared twice")]
    Duplicate(String),
}

#[derive(Debug, Deserialize)]
struct RawTable {
    #[serde(default)]
    classes: Vec<RawClass>,
    #[serde(default)]
    functions: Vec<RawFunction>,
    #[serde(default)]
    modules: Vec<RawModule>,
}

#[derive(Debug, Deserialize)]
struct RawClass {
    name: String,
    #[serde(default)]
    bases: Vec<String>,
    #[serde(default)]
    template: Vec<String>,
    #[serde(default)]
    methods: Vec<RawFunction>,
    #[serde(default)]
    attributes: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct RawFunction {
    name: String,
    signatures: Vec<String>,
    #[serde(default)]
    mutates: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawModule {
    name: String,
    #[serde(default)]
    functions: Vec<RawFunction>,
    #[serde(default)]
    classes: Vec<RawClass>,
    #[serde(default)]
    attributes: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StubFunction {
    /// Qualified name: `len`, `list.append`, `os.path.join`.
    pub name: String,
    pub signatures: Vec<Signature>,
    /// Type parameters of `self` that absorb the matching type variables.
    pub mutates: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StubClass {
    /// Qualified name: `int`, `codecs.Codec`.
    pub name: String,
    pub bases: Vec<String>,
    pub template: Vec<String>,
    pub methods: BTreeMap<String, StubFunction>,
    pub attributes: BTreeMap<String, TypeExpr>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ModuleMember {
    Function(String),
    Class(String),
    Attribute(TypeExpr),
}

#[derive(Debug, Clone, PartialEq)]
pub struct StubModule {
    pub name: String,
    pub members: BTreeMap<String, ModuleMember>,
}

/// Parsed signature table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StubTable {
    classes: BTreeMap<String, StubClass>,
    functions: BTreeMap<String, StubFunction>,
    modules: BTreeMap<String, StubModule>,
}

impl StubTable {
    pub fn from_toml_str(text: &str) -> Result<Self, StubError> {
        let raw: RawTable = toml::from_str(text).map_err(|e| StubError::Toml(e.to_string()))?;
        let mut table = StubTable::default();
        for class in raw.classes {
            table.insert_class(class, None)?;
        }
        for function in raw.functions {
            let f = convert_function(function, None)?;
            if table.functions.insert(f.name.clone(), f.clone()).is_some() {
                return Err(StubError::Duplicate(f.name));
            }
        }
        for module in raw.modules {
            let mut members = BTreeMap::new();
            for class in module.classes {
                let short = class.name.clone();
                let qualified = table.insert_class(class, Some(&module.name))?;
                members.insert(short, ModuleMember::Class(qualified));
            }
            for function in module.functions {
                let short = function.name.clone();
                let f = convert_function(function, Some(&module.name))?;
                members.insert(short, ModuleMember::Function(f.name.clone()));
                table.functions.insert(f.name.clone(), f);
            }
            for (name, ty) in module.attributes {
                members.insert(name, ModuleMember::Attribute(parse_type(&ty)?));
            }
            if table.modules.contains_key(&module.name) {
                return Err(StubError::Duplicate(module.name));
            }
            table.modules.insert(
                module.name.clone(),
                StubModule {
                    name: module.name,
                    members,
                },
            );
        }
        table.check()?;
        Ok(table)
    }

    fn insert_class(&mut self, raw: RawClass, module: Option<&str>) -> Result<String, StubError> {
        let name = qualify(module, &raw.name);
        let mut methods = BTreeMap::new();
        for method in raw.methods {
            let short = method.name.clone();
            let f = convert_function(method, Some(&name))?;
            methods.insert(short, f);
        }
        let mut attributes = BTreeMap::new();
        for (attr, ty) in raw.attributes {
            attributes.insert(attr, parse_type(&ty)?);
        }
        let class = StubClass {
            name: name.clone(),
            bases: raw.bases,
            template: raw.template,
            methods,
            attributes,
        };
        if self.classes.insert(name.clone(), class).is_some() {
            return Err(StubError::Duplicate(name));
        }
        Ok(name)
    }

    /// Every base and every class mentioned in a type must be declared.
    fn check(&self) -> Result<(), StubError> {
        for class in self.classes.values() {
            for base in &class.bases {
                if !self.classes.contains_key(base) {
                    return Err(StubError::UnknownBase {
                        class: class.name.clone(),
                        base: base.clone(),
                    });
                }
            }
            for method in class.methods.values() {
                self.check_function(method)?;
            }
            for ty in class.attributes.values() {
                self.check_type(&class.name, ty)?;
            }
        }
        for function in self.functions.values() {
            self.check_function(function)?;
        }
        for module in self.modules.values() {
            for member in module.members.values() {
                if let ModuleMember::Attribute(ty) = member {
                    self.check_type(&module.name, ty)?;
                }
            }
        }
        Ok(())
    }

    fn check_function(&self, function: &StubFunction) -> Result<(), StubError> {
        for sig in &function.signatures {
            for param in &sig.params {
                if let Some(ty) = &param.ty {
                    self.check_type(&function.name, ty)?;
                }
            }
            self.check_type(&function.name, &sig.ret)?;
        }
        Ok(())
    }

    fn check_type(&self, context: &str, ty: &TypeExpr) -> Result<(), StubError> {
        for name in ty.class_names() {
            if !self.classes.contains_key(name) {
                return Err(StubError::UnknownType {
                    context: context.to_string(),
                    name: name.to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn class(&self, name: &str) -> Option<&StubClass> {
        self.classes.get(name)
    }

    pub fn function(&self, name: &str) -> Option<&StubFunction> {
        self.functions.get(name)
    }

    pub fn module(&self, name: &str) -> Option<&StubModule> {
        self.modules.get(name)
    }

    /// A builtin function or class reachable by bare name.
    pub fn has_builtin(&self, name: &str) -> bool {
        self.functions.contains_key(name) || self.classes.contains_key(name)
    }

    pub fn class_names(&self) -> impl Iterator<Item = &str> {
        self.classes.keys().map(String::as_str)
    }
}

fn qualify(prefix: Option<&str>, name: &str) -> String {
    match prefix {
        Some(prefix) => format!("{}.{}", prefix, name),
        None => name.to_string(),
    }
}

fn parse_type(text: &str) -> Result<TypeExpr, StubError> {
    // A type on its own is the return type of an empty signature.
    Signature::parse(&format!("() -> {}", text)).map(|sig| sig.ret)
}

fn convert_function(raw: RawFunction, owner: Option<&str>) -> Result<StubFunction, StubError> {
    let signatures = raw
        .signatures
        .iter()
        .map(|s| Signature::parse(s))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(StubFunction {
        name: qualify(owner, &raw.name),
        signatures,
        mutates: raw.mutates,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins_load() {
        let table = builtins().unwrap();
        let list = table.class("list").unwrap();
        assert_eq!(list.template, vec!["T".to_string()]);
        assert!(list.methods.contains_key("append"));
        assert_eq!(list.methods["append"].mutates, vec!["T".to_string()]);
        assert!(table.function("len").is_some());
        assert!(table.has_builtin("int"));
        assert!(!table.has_builtin("nonsense"));
    }

    #[test]
    fn test_modules_and_submodules() {
        let table = builtins().unwrap();
        let os = table.module("os").unwrap();
        assert!(matches!(
            os.members.get("getcwd"),
            Some(ModuleMember::Function(name)) if name == "os.getcwd"
        ));
        assert!(table.module("os.path").is_some());
        assert!(table.function("os.path.join").is_some());
        let codecs = table.module("codecs").unwrap();
        assert!(matches!(
            codecs.members.get("Codec"),
            Some(ModuleMember::Class(name)) if name == "codecs.Codec"
        ));
    }

    #[test]
    fn test_divmod_needs_two_args() {
        let table = builtins().unwrap();
        let divmod = table.function("divmod").unwrap();
        assert!(divmod.signatures.iter().all(|s| s.min_args() == 2));
    }

    #[test]
    fn test_unknown_base_rejected() {
        let err = StubTable::from_toml_str(
            r#"
            [[classes]]
            name = "A"
            bases = ["B"]
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, StubError::UnknownBase { .. }));
    }

    #[test]
    fn test_unknown_type_rejected() {
        let err = StubTable::from_toml_str(
            r#"
            [[functions]]
            name = "f"
            signatures = ["(x: nothing) -> ?"]
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, StubError::UnknownType { .. }));
    }

    #[test]
    fn test_bad_signature_rejected() {
        let err = StubTable::from_toml_str(
            r#"
            [[functions]]
            name = "f"
            signatures = ["(x: int"]
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, StubError::Signature { .. }));
    }
}
