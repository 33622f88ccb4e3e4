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

use serde::Serialize;
use strum::Display;

use super::{WrapperId, WrapperKind, WrapperTree};

/// Best-effort category of the value a wrapper evaluates to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Guess {
    Array,
    Date,
    DateTime64,
    DatedHolder,
    Dict,
    Entity,
    Enum,
    Formula,
    Function,
    Holder,
    Instant,
    LawNode,
    List,
    Logger,
    Math,
    Number,
    Period,
    Simulation,
    String,
    Tuple,
    Type,
}

const CALCULATE_METHODS: [&str; 8] = [
    "calculate",
    "calculate_add",
    "calculate_add_divide",
    "calculate_divide",
    "compute",
    "compute_add",
    "compute_add_divide",
    "compute_divide",
];

const ENTITY_METHODS: [&str; 5] = [
    "sum_by_entity",
    "filter_role",
    "cast_from_entity_to_roles",
    "any_by_roles",
    "cast_from_entity_to_role",
];

/// Free functions computing element-wise over their arguments.
const ARRAY_FUNCTIONS: [&str; 18] = [
    "min_", "max_", "mini", "maxi", "round", "around", "not_", "or_", "and_", "abs", "floor",
    "ceil", "maximum", "minimum", "where", "select", "logical_not", "sum",
];

const PERIOD_ATTRIBUTES: [&str; 6] = [
    "this_month",
    "last_month",
    "this_year",
    "last_year",
    "n_2",
    "last_3_months",
];

pub(crate) fn infer(tree: &WrapperTree, kind: &WrapperKind) -> Option<Guess> {
    match kind {
        WrapperKind::Variable { value, .. } => value.and_then(|v| tree.guess(v)),
        WrapperKind::Return { value } => value.and_then(|v| tree.guess(v)),
        WrapperKind::Number { .. } => Some(Guess::Number),
        WrapperKind::String { .. } => Some(Guess::String),
        WrapperKind::Tuple { .. } => Some(Guess::Tuple),
        WrapperKind::List { .. } => Some(Guess::List),
        WrapperKind::Dict { .. } => Some(Guess::Dict),
        WrapperKind::Function(_) | WrapperKind::Lambda { .. } => Some(Guess::Function),
        WrapperKind::Type { .. } => Some(Guess::Type),
        WrapperKind::Enum { .. } => Some(Guess::Enum),
        WrapperKind::Period => Some(Guess::Period),
        WrapperKind::Instant => Some(Guess::Instant),
        WrapperKind::Simulation => Some(Guess::Simulation),
        WrapperKind::Formula => Some(Guess::Formula),
        WrapperKind::Holder => Some(Guess::Holder),
        WrapperKind::Entity => Some(Guess::Entity),
        WrapperKind::Logger => Some(Guess::Logger),
        WrapperKind::Math => Some(Guess::Math),
        WrapperKind::Date => Some(Guess::Date),
        WrapperKind::DateTime64 => Some(Guess::DateTime64),
        WrapperKind::LawNode { .. } => Some(Guess::LawNode),
        WrapperKind::Array { .. } => Some(Guess::Array),
        WrapperKind::DatedHolder { .. } => Some(Guess::DatedHolder),
        WrapperKind::Attribute { subject, name } => attribute(tree.guess(*subject)?, name),
        WrapperKind::Call {
            subject,
            positional_arguments,
            ..
        } => call(tree, *subject, positional_arguments),
        WrapperKind::Key { subject, .. } => match tree.guess(*subject)? {
            Guess::Dict | Guess::Array => Some(Guess::Array),
            Guess::LawNode => Some(Guess::LawNode),
            _ => None,
        },
        WrapperKind::BinaryOperation { left, right, .. }
        | WrapperKind::BooleanOperation { left, right, .. } => {
            operation(tree.guess(*left), tree.guess(*right))
        }
        WrapperKind::Comparison { left, right, .. } => {
            if [*left, *right]
                .iter()
                .any(|side| tree.guess(*side) == Some(Guess::Array))
            {
                Some(Guess::Array)
            } else {
                Some(Guess::Number)
            }
        }
        WrapperKind::UnaryOperation { operand, .. } => match tree.guess(*operand)? {
            Guess::Array => Some(Guess::Array),
            Guess::Number | Guess::LawNode => Some(Guess::Number),
            _ => None,
        },
        WrapperKind::Ternary { value, orelse, .. } => {
            let (value, orelse) = (tree.guess(*value), tree.guess(*orelse));
            if value == orelse {
                value
            } else if value == Some(Guess::Array) || orelse == Some(Guess::Array) {
                Some(Guess::Array)
            } else {
                None
            }
        }
        _ => None,
    }
}

fn attribute(subject: Guess, name: &str) -> Option<Guess> {
    match (subject, name) {
        (Guess::Period, "start" | "stop") => Some(Guess::Instant),
        (Guess::Period, name) if PERIOD_ATTRIBUTES.contains(&name) => Some(Guess::Period),
        (Guess::Period | Guess::Instant, "date") => Some(Guess::Date),
        (Guess::Instant, "year" | "month" | "day") => Some(Guess::Number),
        (Guess::LawNode, _) => Some(Guess::LawNode),
        (Guess::Formula, "holder") => Some(Guess::Holder),
        (Guess::Holder, "entity") => Some(Guess::Entity),
        (Guess::Entity | Guess::Formula, "simulation") => Some(Guess::Simulation),
        _ => None,
    }
}

fn operation(left: Option<Guess>, right: Option<Guess>) -> Option<Guess> {
    match (left?, right?) {
        (Guess::Array, _) | (_, Guess::Array) => Some(Guess::Array),
        (Guess::DateTime64, _) | (_, Guess::DateTime64) => Some(Guess::DateTime64),
        (Guess::Number | Guess::LawNode, Guess::Number | Guess::LawNode) => Some(Guess::Number),
        (Guess::String, Guess::String) => Some(Guess::String),
        _ => None,
    }
}

/// Name of the function a call subject stands for, looking through variables.
fn callee_name(tree: &WrapperTree, subject: WrapperId) -> Option<&str> {
    match tree.kind(tree.resolve(subject)) {
        WrapperKind::Builtin { name } | WrapperKind::External { name, .. } => Some(name),
        WrapperKind::Function(function) => Some(&function.name),
        _ => match tree.kind(subject) {
            WrapperKind::Variable { name, .. } => Some(name),
            _ => None,
        },
    }
}

fn call(
    tree: &WrapperTree,
    subject: WrapperId,
    arguments: &[WrapperId],
) -> Option<Guess> {
    if let WrapperKind::Attribute {
        subject: receiver,
        name,
    } = tree.kind(subject)
    {
        let name = name.as_str();
        return match (tree.guess(*receiver)?, name) {
            (Guess::Instant, "offset") => Some(Guess::Instant),
            (Guess::Period, "offset") => Some(Guess::Period),
            (Guess::Instant, "period") => Some(Guess::Period),
            (Guess::Simulation, name) if CALCULATE_METHODS.contains(&name) => Some(Guess::Array),
            (Guess::Simulation, "legislation_at") => Some(Guess::LawNode),
            (Guess::Formula, "split_by_roles") => Some(Guess::Dict),
            (Guess::Formula, name) if ENTITY_METHODS.contains(&name) => Some(Guess::Array),
            (Guess::LawNode, "calc" | "calc_max") => Some(Guess::Array),
            (Guess::Array, "astype") => Some(Guess::Array),
            (Guess::Array, "any" | "all") => Some(Guess::Number),
            (Guess::DatedHolder, "at") => Some(Guess::Array),
            (Guess::Math, _) => Some(Guess::Number),
            _ => None,
        };
    }
    if let Some(function) = tree.function(tree.resolve(subject)) {
        return function.returns.first().and_then(|r| tree.guess(*r));
    }
    match callee_name(tree, subject)? {
        "date" => Some(Guess::Date),
        "datetime64" => Some(Guess::DateTime64),
        "apply_thresholds" => Some(Guess::Array),
        "len" | "int" | "float" | "bool" => Some(Guess::Number),
        "str" => Some(Guess::String),
        name if ARRAY_FUNCTIONS.contains(&name) => {
            if arguments
                .iter()
                .any(|a| tree.guess(*a) == Some(Guess::Array))
            {
                Some(Guess::Array)
            } else {
                Some(Guess::Number)
            }
        }
        _ => None,
    }
}
