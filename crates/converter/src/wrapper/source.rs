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

//! Entry points building wrappers from source text. A single definition is cut out of
//! its file, dedented and parsed alone; the rest of the file only contributes its
//! top-level names.

use ofasg_syntax::{Node, extract_definition, parse_source};
use tracing::debug;

use super::{WrapperBuilder, WrapperId, WrapperTree};
use crate::errors::WrapperError;
use crate::options::ConversionOptions;
use crate::system::TaxBenefitSystem;

/// Builds a whole module from its parsed statements.
pub fn parse_module(
    module_name: &str,
    statements: &[Node],
    system: &TaxBenefitSystem,
    options: &ConversionOptions,
) -> Result<WrapperTree, WrapperError> {
    let mut builder = WrapperBuilder::new(module_name, system, options);
    builder.build_module(statements)?;
    Ok(builder.finish())
}

pub fn module_from_source(
    module_name: &str,
    source: &str,
    system: &TaxBenefitSystem,
    options: &ConversionOptions,
) -> Result<WrapperTree, WrapperError> {
    parse_module(module_name, &parse_source(source)?, system, options)
}

/// A builder knowing the top-level names of `source`, with no body parsed.
fn declared_module<'a>(
    source: &str,
    system: &'a TaxBenefitSystem,
    options: &'a ConversionOptions,
) -> Result<WrapperBuilder<'a>, WrapperError> {
    let mut builder = WrapperBuilder::new("__source__", system, options);
    builder.declare_module(&parse_source(source)?)?;
    Ok(builder)
}

/// Builds the top-level function `name` of `source` as an ordinary function.
pub fn function_from_source(
    source: &str,
    name: &str,
    system: &TaxBenefitSystem,
    options: &ConversionOptions,
) -> Result<(WrapperTree, WrapperId), WrapperError> {
    let text = extract_definition(source, &[name])?;
    let def = ofasg_syntax::parse_function_source(&text)?;
    let mut builder = declared_module(source, system, options)?;
    let root = builder.tree().root();
    let id = builder.add_function(root, &def, 1, false)?;
    Ok((builder.finish(), id))
}

/// Builds the method `method` of class `class` as a formula, binding its parameters
/// to the values a simulation passes in. The class must derive from a formula base
/// class. Functions of the module it calls are parsed as they are reached.
pub fn formula_from_source(
    source: &str,
    class: &str,
    method: &str,
    system: &TaxBenefitSystem,
    options: &ConversionOptions,
) -> Result<(WrapperTree, WrapperId), WrapperError> {
    let text = extract_definition(source, &[class, method])?;
    let def = ofasg_syntax::parse_function_source(&text)?;
    let mut builder = declared_module(source, system, options)?;
    if !builder.is_formula_class(class) {
        return Err(WrapperError::NotAFormulaClass(class.to_string()));
    }
    let root = builder.tree().root();
    let scope = builder
        .tree()
        .symbols(root)
        .and_then(|symbols| symbols.get(class).copied())
        .unwrap_or(root);
    debug!(class, method, "building formula");
    let id = builder.add_function(scope, &def, 1, true)?;
    Ok((builder.finish(), id))
}

/// Builds the class `name` of `source`, methods included.
pub fn class_from_source(
    source: &str,
    name: &str,
    system: &TaxBenefitSystem,
    options: &ConversionOptions,
) -> Result<(WrapperTree, WrapperId), WrapperError> {
    let text = extract_definition(source, &[name])?;
    let class = ofasg_syntax::parse_class_source(&text)?;
    let mut builder = declared_module(source, system, options)?;
    let id = builder.add_class(&class, 1)?;
    Ok((builder.finish(), id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wrapper::{Guess, WrapperKind};
    use ofasg_syntax::SyntaxError;
    use pretty_assertions::assert_eq;
    use unindent::unindent;

    fn source() -> String {
        unindent(
            "
            from openfisca_france.model.base import *

            RATE = 0.5

            def helper(x):
                return round(x * RATE)

            class revenu(Variable):
                column = FloatCol
                entity_class = Individus

                def function(self, simulation, period):
                    period = period.this_month
                    salaire = simulation.calculate('salaire', period)
                    return period, helper(salaire)
            ",
        )
    }

    #[test]
    fn test_formula_from_source() {
        let (tree, id) = formula_from_source(
            &source(),
            "revenu",
            "function",
            &TaxBenefitSystem::default(),
            &ConversionOptions::default(),
        )
        .unwrap();
        let function = tree.function(id).unwrap();
        assert!(function.formula);
        assert_eq!(function.returns.len(), 1);
        let class = tree.containing_class(id).unwrap();
        assert!(matches!(tree.kind(class), WrapperKind::Class { name, .. } if name == "revenu"));
        let salaire = tree.symbols(id).unwrap()["salaire"];
        assert_eq!(tree.guess(salaire), Some(Guess::Array));
        let helper = tree.get_variable(id, "helper").unwrap();
        assert!(!tree.function(helper).unwrap().body.is_empty());
        let WrapperKind::Return { value: Some(value) } = tree.kind(function.returns[0]) else {
            panic!("expected a return value");
        };
        let WrapperKind::Tuple { items } = tree.kind(*value) else {
            panic!("expected a tuple");
        };
        assert!(matches!(tree.kind(items[1]), WrapperKind::Call { .. }));
        assert_eq!(tree.guess(items[1]), Some(Guess::Number));
        let rate = tree.get_variable(id, "RATE").unwrap();
        assert_eq!(tree.guess(rate), Some(Guess::Number));
    }

    #[test]
    fn test_function_from_source() {
        let (tree, id) = function_from_source(
            &source(),
            "helper",
            &TaxBenefitSystem::default(),
            &ConversionOptions::default(),
        )
        .unwrap();
        let function = tree.function(id).unwrap();
        assert!(!function.formula);
        assert_eq!(function.positional_parameters, vec!["x".to_string()]);
        assert_eq!(tree.guess(function.returns[0]), Some(Guess::Number));
    }

    #[test]
    fn test_class_from_source() {
        let (tree, id) = class_from_source(
            &source(),
            "revenu",
            &TaxBenefitSystem::default(),
            &ConversionOptions::default(),
        )
        .unwrap();
        let WrapperKind::Class { bases, body, .. } = tree.kind(id) else {
            panic!("expected a class");
        };
        assert_eq!(bases, &vec!["Variable".to_string()]);
        // Two class variables and the method.
        assert_eq!(body.len(), 3);
        let function = tree.find_function(Some("revenu"), "function").unwrap();
        assert!(tree.function(function).unwrap().formula);
    }

    #[test]
    fn test_formula_from_non_formula_class() {
        let source = unindent(
            "
            class Helper(object):
                def function(self, simulation, period):
                    return period, 1
            ",
        );
        let err = formula_from_source(
            &source,
            "Helper",
            "function",
            &TaxBenefitSystem::default(),
            &ConversionOptions::default(),
        )
        .unwrap_err();
        assert_eq!(err, WrapperError::NotAFormulaClass("Helper".to_string()));
    }

    #[test]
    fn test_missing_definition() {
        let err = formula_from_source(
            &source(),
            "revenu",
            "function_2015",
            &TaxBenefitSystem::default(),
            &ConversionOptions::default(),
        )
        .unwrap_err();
        assert_eq!(
            err,
            WrapperError::Syntax(SyntaxError::DefinitionNotFound(
                "revenu.function_2015".to_string()
            ))
        );
    }

    #[test]
    fn test_module_from_source() {
        let tree = module_from_source(
            "revenu",
            &source(),
            &TaxBenefitSystem::default(),
            &ConversionOptions::default(),
        )
        .unwrap();
        let function = tree.find_function(Some("revenu"), "function").unwrap();
        let WrapperKind::Return { value: Some(value) } =
            tree.kind(tree.function(function).unwrap().returns[0])
        else {
            panic!("expected a return value");
        };
        assert_eq!(tree.guess(*value), Some(Guess::Tuple));
    }
}
