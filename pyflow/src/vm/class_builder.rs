//! Class construction for `BUILD_CLASS` and `__build_class__`.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

use std::collections::BTreeMap;

use tracing::debug;

use crate::abstract_value::{AbstractValue, Class, ClassOrigin};
use crate::error::AnalysisError;
use crate::errorlog::{ErrorKind, ErrorRecord, ErrorReporter};
use crate::typegraph::{DataId, NodeId, VariableId};

use super::VirtualMachine;

/// C3 linearisation of a class with direct `bases`, given each base's own
/// linearisation. `None` when no consistent order exists.
pub(crate) fn c3_linearize(
    cls: DataId,
    bases: &[DataId],
    base_mros: Vec<Vec<DataId>>,
) -> Option<Vec<DataId>> {
    let mut sequences: Vec<Vec<DataId>> = base_mros;
    sequences.push(bases.to_vec());
    let mut result = vec![cls];
    loop {
        sequences.retain(|s| !s.is_empty());
        if sequences.is_empty() {
            return Some(result);
        }
        let head = sequences.iter().map(|s| s[0]).find(|candidate| {
            sequences
                .iter()
                .all(|s| !s[1..].contains(candidate))
        })?;
        result.push(head);
        for s in sequences.iter_mut() {
            if s[0] == head {
                s.remove(0);
            }
        }
    }
}

impl<E: ErrorReporter> VirtualMachine<E> {
    /// Build an interpreter class. Errors are reported and yield the give-up
    /// sentinel.
    pub(crate) fn make_class(
        &mut self,
        node: NodeId,
        name: &str,
        bases: &[VariableId],
        members: BTreeMap<String, VariableId>,
    ) -> Result<VariableId, AnalysisError> {
        let mut base_vars = Vec::with_capacity(bases.len());
        let mut base_classes = Vec::new();
        for base in bases {
            let data = self.program.data(*base, node);
            let mut usable = false;
            for d in &data {
                match self.values.get(*d) {
                    AbstractValue::Class(_) => {
                        usable = true;
                        if !base_classes.contains(d) {
                            base_classes.push(*d);
                        }
                    }
                    AbstractValue::Unknown { .. } | AbstractValue::Unsolvable => usable = true,
                    _ => {}
                }
            }
            if !usable && !data.is_empty() {
                let shown = data
                    .iter()
                    .map(|d| self.values.type_name(*d))
                    .collect::<Vec<_>>()
                    .join(" or ");
                self.report(
                    ErrorRecord::new(ErrorKind::BaseClassError, format!("Invalid base class: {}", shown))
                        .with_variables(vec![*base]),
                );
                continue;
            }
            base_vars.push(*base);
        }
        if base_vars.is_empty() && bases.is_empty() {
            let object = self.library_class("object")?;
            base_vars.push(self.library_class_var("object")?);
            base_classes.push(object);
        }

        let id = self.values.add(AbstractValue::Class(Class {
            name: name.to_string(),
            bases: base_vars,
            members,
            mro: Vec::new(),
            template: Vec::new(),
            origin: ClassOrigin::Interpreter,
        }));
        let base_mros: Vec<Vec<DataId>> = base_classes
            .iter()
            .map(|b| self.values.class(*b).map(|c| c.mro.clone()).unwrap_or_default())
            .collect();
        match c3_linearize(id, &base_classes, base_mros) {
            Some(mro) => {
                if let Some(AbstractValue::Class(class)) = self.values.get_mut(id) {
                    class.mro = mro;
                }
            }
            None => {
                self.report(ErrorRecord::new(
                    ErrorKind::MroError,
                    format!(
                        "Class {}: cannot create a consistent method resolution order (bad inheritance)",
                        name
                    ),
                ));
                return Ok(self.new_unsolvable(node));
            }
        }
        debug!(class = name, "declared class");
        Ok(self.variable_with(name, id, [], node))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_c3_diamond() {
        let (o, a, b, c, d) = (DataId(0), DataId(1), DataId(2), DataId(3), DataId(4));
        let mro_a = vec![a, o];
        let mro_b = vec![b, a, o];
        let mro_c = vec![c, a, o];
        assert_eq!(
            c3_linearize(d, &[b, c], vec![mro_b, mro_c]),
            Some(vec![d, b, c, a, o])
        );
        assert_eq!(c3_linearize(a, &[o], vec![vec![o]]), Some(mro_a));
    }

    #[test]
    fn test_c3_inconsistent() {
        let (o, a, b, c) = (DataId(0), DataId(1), DataId(2), DataId(3));
        let mro_a = vec![a, o];
        let mro_b = vec![b, a, o];
        // class C(A, B) with B a subclass of A has no consistent order.
        assert_eq!(c3_linearize(c, &[a, b], vec![mro_a, mro_b]), None);
    }

    #[test]
    fn test_c3_no_bases() {
        assert_eq!(c3_linearize(DataId(5), &[], Vec::new()), Some(vec![DataId(5)]));
    }
}
