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

//! The abstract semantic graph built by the function pass. Nodes are immutable once
//! built and shared through `Rc`, so a local variable read twice yields the same node
//! and graph edges can be keyed by identity.

use std::rc::Rc;

use indexmap::IndexMap;
use serde::Serialize;
use strum::Display;

pub type NodeRef = Rc<Ofnode>;
pub type ArgDict = IndexMap<String, NodeRef>;

/// Semantic category of a node, the `type` key of its flattened form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Value,
    Period,
    Instant,
    Parameter,
    Role,
    Simulation,
    #[strum(serialize = "self")]
    #[serde(rename = "self")]
    SelfEntity,
    Return,
    SplitByRoles,
    String,
    List,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Ofnode {
    /// The `period` argument of a formula.
    BuiltinPeriod,
    Simulation,
    SelfEntity,
    Role {
        name: String,
    },
    Int {
        value: i64,
    },
    Float {
        value: f64,
    },
    String {
        value: String,
    },
    List {
        items: Vec<NodeRef>,
    },
    /// Operators and comparisons, tagged with the operator as written.
    ArithmeticOperation {
        op: String,
        operands: Vec<NodeRef>,
    },
    /// A call to an arithmetic builtin such as `max_(a, b)`.
    ArithmeticCall {
        op: String,
        arg_list: Vec<NodeRef>,
        arg_dict: ArgDict,
    },
    /// `period.this_year`, `period.last_year`...
    PeriodOperation {
        operator: String,
        operands: Vec<NodeRef>,
    },
    /// `period.start`
    PeriodToInstant {
        operator: String,
        operands: Vec<NodeRef>,
    },
    /// `period.offset(...)`
    PeriodOffset {
        operator: String,
        arg_list: Vec<NodeRef>,
        arg_dict: ArgDict,
        input_period: NodeRef,
    },
    /// `instant.offset(...)` or `datetime64(...)`.
    InstantOperation {
        op: String,
        arg_list: Vec<NodeRef>,
        arg_dict: ArgDict,
        input_instant: Option<NodeRef>,
    },
    /// `instant.period(...)`
    InstantToPeriod {
        op: String,
        arg_list: Vec<NodeRef>,
        arg_dict: ArgDict,
        input_instant: NodeRef,
    },
    /// `simulation.calculate('name', period)` and friends.
    VariableForPeriod {
        operator: String,
        variable_name: String,
        period: Option<NodeRef>,
        arg_dict: ArgDict,
    },
    /// A legislation parameter: `simulation.legislation_at(instant).a.b`.
    Parameter {
        instant: NodeRef,
        path: Vec<String>,
    },
    /// `self.sum_by_entity(...)`, `self.filter_role(...)`...
    SelfOperation {
        operator: String,
        arg_list: Vec<NodeRef>,
        arg_dict: ArgDict,
    },
    SplitByRoles {
        operator: String,
        arg_list: Vec<NodeRef>,
        arg_dict: ArgDict,
    },
    /// `self.split_by_roles(...)[ROLE]`
    SplitByRolesWithRole {
        operator: String,
        split_arg_list: Vec<NodeRef>,
        split_arg_dict: ArgDict,
        role: NodeRef,
    },
    ApplyThresholds {
        arg_list: Vec<NodeRef>,
        arg_dict: ArgDict,
    },
    Return {
        period: NodeRef,
        value: NodeRef,
    },
}

fn args<'a>(list: &'a [NodeRef], dict: &'a ArgDict) -> Vec<&'a NodeRef> {
    list.iter().chain(dict.values()).collect()
}

impl Ofnode {
    pub fn node_type(&self) -> NodeType {
        match self {
            Ofnode::BuiltinPeriod
            | Ofnode::PeriodOperation { .. }
            | Ofnode::PeriodOffset { .. }
            | Ofnode::InstantToPeriod { .. } => NodeType::Period,
            Ofnode::PeriodToInstant { .. } | Ofnode::InstantOperation { .. } => NodeType::Instant,
            Ofnode::Simulation => NodeType::Simulation,
            Ofnode::SelfEntity => NodeType::SelfEntity,
            Ofnode::Role { .. } => NodeType::Role,
            Ofnode::String { .. } => NodeType::String,
            Ofnode::List { .. } => NodeType::List,
            Ofnode::Parameter { .. } => NodeType::Parameter,
            Ofnode::SplitByRoles { .. } => NodeType::SplitByRoles,
            Ofnode::Return { .. } => NodeType::Return,
            Ofnode::Int { .. }
            | Ofnode::Float { .. }
            | Ofnode::ArithmeticOperation { .. }
            | Ofnode::ArithmeticCall { .. }
            | Ofnode::VariableForPeriod { .. }
            | Ofnode::SelfOperation { .. }
            | Ofnode::SplitByRolesWithRole { .. }
            | Ofnode::ApplyThresholds { .. } => NodeType::Value,
        }
    }

    /// Operation discriminator, the `nodetype` key of the flattened form.
    pub fn nodetype(&self) -> &'static str {
        match self {
            Ofnode::BuiltinPeriod => "builtin-period",
            Ofnode::Simulation => "simulation",
            Ofnode::SelfEntity => "self",
            Ofnode::Role { .. } => "role",
            Ofnode::Int { .. } => "int",
            Ofnode::Float { .. } => "float",
            Ofnode::String { .. } => "string",
            Ofnode::List { .. } => "list",
            Ofnode::ArithmeticOperation { .. } | Ofnode::ArithmeticCall { .. } => {
                "arithmetic_operation"
            }
            Ofnode::PeriodOperation { .. } => "period-operation",
            Ofnode::PeriodToInstant { .. } => "period-to-instant",
            Ofnode::PeriodOffset { .. } => "period_operation",
            Ofnode::InstantOperation { .. } => "instant_op",
            Ofnode::InstantToPeriod { .. } => "instant_to_period",
            Ofnode::VariableForPeriod { .. } => "variable_for_period",
            Ofnode::Parameter { .. } => "parameter",
            Ofnode::SelfOperation { .. } => "self_operation",
            Ofnode::SplitByRoles { .. } => "split_by_roles",
            Ofnode::SplitByRolesWithRole { .. } => "split_by_roles_with_role",
            Ofnode::ApplyThresholds { .. } => "apply_thresholds",
            Ofnode::Return { .. } => "return",
        }
    }

    /// Direct child nodes, in field order.
    pub fn children(&self) -> Vec<&NodeRef> {
        match self {
            Ofnode::BuiltinPeriod
            | Ofnode::Simulation
            | Ofnode::SelfEntity
            | Ofnode::Role { .. }
            | Ofnode::Int { .. }
            | Ofnode::Float { .. }
            | Ofnode::String { .. } => vec![],
            Ofnode::List { items } => items.iter().collect(),
            Ofnode::ArithmeticOperation { operands, .. }
            | Ofnode::PeriodOperation { operands, .. }
            | Ofnode::PeriodToInstant { operands, .. } => operands.iter().collect(),
            Ofnode::ArithmeticCall {
                arg_list, arg_dict, ..
            }
            | Ofnode::SelfOperation {
                arg_list, arg_dict, ..
            }
            | Ofnode::SplitByRoles {
                arg_list, arg_dict, ..
            }
            | Ofnode::ApplyThresholds { arg_list, arg_dict } => args(arg_list, arg_dict),
            Ofnode::PeriodOffset {
                arg_list,
                arg_dict,
                input_period,
                ..
            } => {
                let mut children = args(arg_list, arg_dict);
                children.push(input_period);
                children
            }
            Ofnode::InstantOperation {
                arg_list,
                arg_dict,
                input_instant,
                ..
            } => {
                let mut children = args(arg_list, arg_dict);
                children.extend(input_instant);
                children
            }
            Ofnode::InstantToPeriod {
                arg_list,
                arg_dict,
                input_instant,
                ..
            } => {
                let mut children = args(arg_list, arg_dict);
                children.push(input_instant);
                children
            }
            Ofnode::VariableForPeriod {
                period, arg_dict, ..
            } => period.iter().chain(arg_dict.values()).collect(),
            Ofnode::Parameter { instant, .. } => vec![instant],
            Ofnode::SplitByRolesWithRole {
                split_arg_list,
                split_arg_dict,
                role,
                ..
            } => {
                let mut children = args(split_arg_list, split_arg_dict);
                children.push(role);
                children
            }
            Ofnode::Return { period, value } => vec![period, value],
        }
    }

    pub fn int(value: i64) -> NodeRef {
        Rc::new(Ofnode::Int { value })
    }

    pub fn arithmetic(op: impl Into<String>, operands: Vec<NodeRef>) -> NodeRef {
        Rc::new(Ofnode::ArithmeticOperation {
            op: op.into(),
            operands,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_categories() {
        let period = Rc::new(Ofnode::BuiltinPeriod);
        let start = Ofnode::PeriodToInstant {
            operator: "start".into(),
            operands: vec![period.clone()],
        };
        assert_eq!(start.node_type(), NodeType::Instant);
        assert_eq!(start.nodetype(), "period-to-instant");
        assert_eq!(Ofnode::SelfEntity.node_type().to_string(), "self");
        assert_eq!(NodeType::SplitByRoles.to_string(), "split_by_roles");
    }

    #[test]
    fn test_children_follow_field_order() {
        let period = Rc::new(Ofnode::BuiltinPeriod);
        let two = Ofnode::int(2);
        let node = Ofnode::Return {
            period: period.clone(),
            value: two.clone(),
        };
        let children = node.children();
        assert!(Rc::ptr_eq(children[0], &period));
        assert!(Rc::ptr_eq(children[1], &two));
    }
}
