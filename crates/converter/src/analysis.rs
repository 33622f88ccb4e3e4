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

//! Dependency extraction: which variables and legislation parameters a formula reads.

use std::collections::HashSet;

use indexmap::IndexSet;
use ofasg_syntax::{Node, NodeKind};
use serde::Serialize;

use crate::asg::{NodeRef, Ofnode};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Dependencies {
    /// Variables read through `simulation.calculate` and friends, first use first.
    pub variables: IndexSet<String>,
    /// Dotted parameter paths.
    pub parameters: IndexSet<String>,
}

/// Collects the dependencies of an ASG. Shared nodes are visited once.
pub fn dependencies(root: &NodeRef) -> Dependencies {
    let mut found = Dependencies::default();
    let mut seen = HashSet::new();
    let mut stack = vec![root.clone()];
    while let Some(node) = stack.pop() {
        if !seen.insert(std::rc::Rc::as_ptr(&node)) {
            continue;
        }
        match node.as_ref() {
            Ofnode::VariableForPeriod { variable_name, .. } => {
                found.variables.insert(variable_name.clone());
            }
            Ofnode::Parameter { path, .. } if !path.is_empty() => {
                found.parameters.insert(path.join("."));
            }
            _ => {}
        }
        // Reversed so that children pop in field order.
        stack.extend(node.children().into_iter().rev().cloned());
    }
    found
}

/// Chain items of `simulation.<method>(...)` when `method` is one of `methods`.
fn simulation_call<'a>(node: &'a Node, methods: &[&str]) -> Option<&'a [Node]> {
    let NodeKind::Atomtrailers(items) = &node.kind else {
        return None;
    };
    let [base, method, call, ..] = items.as_slice() else {
        return None;
    };
    let matches = base.as_name() == Some("simulation")
        && method.as_name().is_some_and(|m| methods.contains(&m))
        && matches!(call.kind, NodeKind::Call(_));
    matches.then_some(items.as_slice())
}

/// Variable names passed as string literals to `simulation.calculate` or
/// `simulation.compute`, read straight from the syntax tree.
pub fn find_dependencies(statements: &[Node]) -> Vec<String> {
    let mut names = vec![];
    for statement in statements {
        statement.walk(&mut |node| {
            let Some(items) = simulation_call(node, &["calculate", "compute"]) else {
                return;
            };
            if let NodeKind::Call(arguments) = &items[2].kind
                && let Some(name) = arguments.first().and_then(|a| a.value.as_str())
            {
                names.push(name.to_string());
            }
        });
    }
    names
}

/// Dotted paths read from `simulation.legislation_at(instant).a.b`, from the syntax tree.
/// Only the attribute names directly following the call are kept.
pub fn find_parameters(statements: &[Node]) -> Vec<String> {
    let mut paths = vec![];
    for statement in statements {
        statement.walk(&mut |node| {
            let Some(items) = simulation_call(node, &["legislation_at"]) else {
                return;
            };
            let path: Vec<&str> = items[3..].iter().map_while(Node::as_name).collect();
            if !path.is_empty() {
                paths.push(path.join("."));
            }
        });
    }
    paths
}
