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

use std::collections::HashSet;

use indexmap::IndexSet;

use super::{Guess, WrapperId, WrapperKind, WrapperTree};
use crate::analysis::Dependencies;

const INPUT_METHODS: [&str; 9] = [
    "calculate",
    "calculate_add",
    "calculate_add_divide",
    "calculate_divide",
    "compute",
    "compute_add",
    "compute_add_divide",
    "compute_divide",
    "get_array",
];

/// Variables and legislation parameters read by a function of the wrapper tree.
///
/// Variables are the first arguments of `simulation.calculate` and its siblings; a
/// `self.__class__.__name__` argument names the formula's own class. Parameters are
/// the dotted paths read below a legislation node, keeping only the longest path of
/// each chain.
pub fn formula_dependencies(tree: &WrapperTree, function: WrapperId) -> Dependencies {
    let owned = tree.descendants(function);
    let call_subjects = owned
        .iter()
        .filter_map(|id| match tree.kind(*id) {
            WrapperKind::Call { subject, .. } => Some(*subject),
            _ => None,
        })
        .collect::<HashSet<_>>();

    let mut found = Dependencies::default();
    let mut paths: Vec<Vec<String>> = vec![];
    for id in owned {
        match tree.kind(id) {
            WrapperKind::Call {
                subject,
                positional_arguments,
                ..
            } => {
                let WrapperKind::Attribute { name, .. } = tree.kind(*subject) else {
                    continue;
                };
                if !INPUT_METHODS.contains(&name.as_str()) {
                    continue;
                }
                if let Some(variable) = positional_arguments
                    .first()
                    .and_then(|argument| input_variable(tree, function, *argument))
                {
                    found.variables.insert(variable);
                }
            }
            WrapperKind::Attribute { subject, .. }
                if !call_subjects.contains(&id) && tree.guess(*subject) == Some(Guess::LawNode) =>
            {
                if let Some(path) = law_path(tree, id, 0) {
                    paths.push(path);
                }
            }
            _ => {}
        }
    }

    // `a.b` is dropped when `a.b.c` is read too.
    let dotted = paths.iter().map(|p| p.join(".")).collect::<IndexSet<_>>();
    for path in &dotted {
        let prefix = format!("{path}.");
        if !path.is_empty() && !dotted.iter().any(|other| other.starts_with(&prefix)) {
            found.parameters.insert(path.clone());
        }
    }
    found
}

fn input_variable(tree: &WrapperTree, function: WrapperId, argument: WrapperId) -> Option<String> {
    match tree.kind(tree.resolve(argument)) {
        WrapperKind::String { value } => Some(value.clone()),
        WrapperKind::Attribute { name, .. } if name == "__name__" => {
            let class = tree.containing_class(function)?;
            match tree.kind(class) {
                WrapperKind::Class { name, .. } => Some(name.clone()),
                _ => None,
            }
        }
        _ => None,
    }
}

/// Names from the legislation root down to `id`.
fn law_path(tree: &WrapperTree, id: WrapperId, depth: usize) -> Option<Vec<String>> {
    if depth > tree.len() {
        return None;
    }
    match tree.kind(id) {
        WrapperKind::LawNode { .. } => Some(vec![]),
        WrapperKind::Variable {
            value: Some(value), ..
        } => law_path(tree, *value, depth + 1),
        WrapperKind::Call { subject, .. } => match tree.kind(*subject) {
            WrapperKind::Attribute { name, .. } if name == "legislation_at" => Some(vec![]),
            _ => None,
        },
        WrapperKind::Attribute { subject, name } => {
            let mut path = law_path(tree, *subject, depth + 1)?;
            path.push(name.clone());
            Some(path)
        }
        WrapperKind::Key { subject, value } => {
            let mut path = law_path(tree, *subject, depth + 1)?;
            match tree.kind(tree.resolve(*value)) {
                WrapperKind::String { value } => path.push(value.clone()),
                _ => return None,
            }
            Some(path)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::ConversionOptions;
    use crate::system::TaxBenefitSystem;
    use crate::wrapper::formula_from_source;
    use pretty_assertions::assert_eq;
    use unindent::unindent;

    fn dependencies(source: &str) -> Dependencies {
        let (tree, id) = formula_from_source(
            &unindent(source),
            "salaire_net",
            "function",
            &TaxBenefitSystem::default(),
            &ConversionOptions::default(),
        )
        .unwrap();
        formula_dependencies(&tree, id)
    }

    #[test]
    fn test_variables_and_parameters() {
        let found = dependencies(
            "
            class salaire_net(Variable):
                def function(self, simulation, period):
                    period = period.start.offset('first-of', 'month').period('month')
                    salaire_brut = simulation.calculate('salaire_brut', period)
                    csg = simulation.calculate_add('csg', period)
                    legislation = simulation.legislation_at(period.start)
                    taux = legislation.cotsoc.taux
                    bareme = legislation.ir.bareme
                    return period, bareme.calc(salaire_brut * taux) - csg
            ",
        );
        assert_eq!(
            found.variables.into_iter().collect::<Vec<_>>(),
            vec!["salaire_brut".to_string(), "csg".to_string()]
        );
        assert_eq!(
            found.parameters.into_iter().collect::<Vec<_>>(),
            vec!["cotsoc.taux".to_string(), "ir.bareme".to_string()]
        );
    }

    #[test]
    fn test_variable_names_through_bindings() {
        let found = dependencies(
            "
            class salaire_net(Variable):
                def function(self, simulation, period):
                    name = 'salaire_brut'
                    own = simulation.calculate(self.__class__.__name__, period.last_month)
                    return period, simulation.calculate(name, period) + own
            ",
        );
        assert_eq!(
            found.variables.into_iter().collect::<Vec<_>>(),
            vec!["salaire_net".to_string(), "salaire_brut".to_string()]
        );
        assert!(found.parameters.is_empty());
    }

    #[test]
    fn test_law_subscripts() {
        let found = dependencies(
            "
            class salaire_net(Variable):
                def function(self, simulation, period):
                    law = simulation.legislation_at(period.start)
                    return period, law.prestations['af'].taux
            ",
        );
        assert_eq!(
            found.parameters.into_iter().collect::<Vec<_>>(),
            vec!["prestations.af.taux".to_string()]
        );
    }
}
