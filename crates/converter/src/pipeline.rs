// Copyright (C) 2025 Ryan Daum <ryan.daum@gmail.com> This program is free
// software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, version
// 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! Batch driver running the module, class and function passes over a set of parsed
//! source files.

use indexmap::IndexMap;
use ofasg_syntax::Node;
use serde::Serialize;
use tracing::{info, warn};

use crate::class_pass::{ClassRecord, parse_classes};
use crate::errors::ParsingError;
use crate::function_pass::{FunctionRecord, parse_function};
use crate::module_pass::{ModuleRecord, parse_modules};
use crate::options::ConversionOptions;
use crate::system::TaxBenefitSystem;

/// A function left out because it uses a construct deliberately not supported.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TooComplexRecord {
    pub module_name: String,
    pub class_name: String,
    pub function_name: String,
    pub message: String,
    pub line: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConversionOutput {
    pub modules: IndexMap<String, ModuleRecord>,
    /// Module name, then class name.
    pub classes: IndexMap<String, IndexMap<String, ClassRecord>>,
    /// Module name, class name, then function name. Too complex functions are absent.
    pub functions: IndexMap<String, IndexMap<String, IndexMap<String, FunctionRecord>>>,
    pub too_complex: Vec<TooComplexRecord>,
}

impl ConversionOutput {
    pub fn function(&self, module: &str, class: &str, function: &str) -> Option<&FunctionRecord> {
        self.functions.get(module)?.get(class)?.get(function)
    }

    /// Adds the columns declared by the converted classes to `system`.
    pub fn register_columns(&self, system: &mut TaxBenefitSystem) -> usize {
        let mut registered = 0;
        for classes in self.classes.values() {
            for (name, class) in classes {
                if system.register_class(name, class).is_some() {
                    registered += 1;
                }
            }
        }
        registered
    }
}

/// Runs every pass. Functions raising the too-complex signal are recorded and skipped;
/// any other error aborts the batch.
pub fn convert_modules<'a>(
    trees: impl IntoIterator<Item = (&'a str, &'a [Node])>,
    options: &ConversionOptions,
    system: &TaxBenefitSystem,
) -> Result<ConversionOutput, ParsingError> {
    let modules = parse_modules(trees, options)?;
    let mut output = ConversionOutput::default();
    let mut converted = 0;

    for (module_name, module) in &modules {
        let classes = parse_classes(module)?;
        let mut module_functions = IndexMap::new();
        for (class_name, class) in &classes {
            let mut class_functions = IndexMap::new();
            for (function_name, function) in &class.class_functions {
                match parse_function(
                    function_name,
                    &function.instructions,
                    &module.auxiliary_functions,
                    system,
                    options,
                ) {
                    Ok(record) => {
                        class_functions.insert(function_name.clone(), record);
                        converted += 1;
                    }
                    Err(e) if e.is_too_complex() => {
                        warn!(
                            module = module_name,
                            class = class_name,
                            function = function_name,
                            "too complex: {}",
                            e.message()
                        );
                        output.too_complex.push(TooComplexRecord {
                            module_name: module_name.clone(),
                            class_name: class_name.clone(),
                            function_name: function_name.clone(),
                            message: e.message(),
                            line: e.context().map(|c| c.node.line),
                        });
                    }
                    Err(e) => return Err(e),
                }
            }
            module_functions.insert(class_name.clone(), class_functions);
        }
        output.classes.insert(module_name.clone(), classes);
        output.functions.insert(module_name.clone(), module_functions);
    }
    output.modules = modules;

    info!(
        modules = output.modules.len(),
        functions = converted,
        too_complex = output.too_complex.len(),
        "conversion done"
    );
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asg::Ofnode;
    use crate::system::ValueType;
    use ofasg_syntax::parse_source;
    use pretty_assertions::assert_eq;
    use unindent::unindent;

    const SOURCE: &str = r#"
        # -*- coding: utf-8 -*-
        from openfisca_france.model.base import *

        TAUX = 2

        def _aide(x):
            return x

        class salaire_double(SimpleFormulaColumn):
            column = FloatCol
            entity_class = Individus
            label = u"Salaire doublé"
            start_date = date(2015, 1, 1)

            def function(self, simulation, period):
                x = simulation.calculate('salaire', period)
                return period, x * 2

        class revenus(SimpleFormulaColumn):
            column = FloatCol
            entity_class = FoyersFiscaux

            def function(self, simulation, period):
                total = 0
                for nom in ['a', 'b']:
                    total += simulation.calculate(nom, period)
                return period, total
        "#;

    fn trees() -> Vec<(String, Vec<Node>)> {
        vec![("salaires".to_string(), parse_source(&unindent(SOURCE)).unwrap())]
    }

    fn run() -> ConversionOutput {
        let trees = trees();
        convert_modules(
            trees.iter().map(|(name, nodes)| (name.as_str(), nodes.as_slice())),
            &ConversionOptions::default(),
            &TaxBenefitSystem::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_too_complex_is_recorded() {
        let output = run();
        assert_eq!(
            output.too_complex,
            vec![TooComplexRecord {
                module_name: "salaires".into(),
                class_name: "revenus".into(),
                function_name: "function".into(),
                message: "for loop".into(),
                line: Some(25),
            }]
        );
        assert!(output.function("salaires", "revenus", "function").is_none());
        let record = output
            .function("salaires", "salaire_double", "function")
            .unwrap();
        assert!(matches!(record.return_node.as_ref(), Ofnode::Return { .. }));
    }

    #[test]
    fn test_idempotence() {
        let first = run();
        let second = run();
        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_value(&first).unwrap(),
            serde_json::to_value(&second).unwrap()
        );
    }

    #[test]
    fn test_register_columns() {
        let mut system = TaxBenefitSystem::default();
        assert_eq!(run().register_columns(&mut system), 2);
        let column = system.column("revenus").unwrap();
        assert_eq!(column.value_type, ValueType::Float);
        assert_eq!(column.entity, "foyer_fiscal");
    }

    #[test]
    fn test_other_errors_abort() {
        let nodes = parse_source("class x(Variable):\n    foobar = 1\n").unwrap();
        let err = convert_modules(
            [("m", nodes.as_slice())],
            &ConversionOptions::default(),
            &TaxBenefitSystem::default(),
        )
        .unwrap_err();
        assert_eq!(err.message(), "Unknown class variable foobar");
    }
}
