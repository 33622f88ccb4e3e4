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

//! Generic dictionary form of ASG nodes, the shape exchanged with external consumers.
//! Sharing survives flattening: a node reachable along several paths becomes a single
//! shared `Record`.

use std::collections::HashMap;
use std::rc::Rc;

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;

use crate::asg::{ArgDict, NodeRef, Ofnode};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Field {
    Scalar(Value),
    Node(Rc<Record>),
    List(Vec<Field>),
    Map(IndexMap<String, Field>),
}

impl Field {
    pub fn as_node(&self) -> Option<&Rc<Record>> {
        match self {
            Field::Node(record) => Some(record),
            _ => None,
        }
    }

    /// Whether any node appears inside this field.
    pub fn holds_nodes(&self) -> bool {
        match self {
            Field::Scalar(_) => false,
            Field::Node(_) => true,
            Field::List(items) => items.iter().any(Field::holds_nodes),
            Field::Map(entries) => entries.values().any(Field::holds_nodes),
        }
    }

    /// Plain JSON for a field holding no nodes.
    pub fn to_json(&self) -> Option<Value> {
        match self {
            Field::Scalar(value) => Some(value.clone()),
            Field::Node(_) => None,
            Field::List(items) => items
                .iter()
                .map(Field::to_json)
                .collect::<Option<Vec<_>>>()
                .map(Value::Array),
            Field::Map(entries) => entries
                .iter()
                .map(|(k, v)| v.to_json().map(|v| (k.clone(), v)))
                .collect::<Option<serde_json::Map<_, _>>>()
                .map(Value::Object),
        }
    }

    /// The inverse of `to_json`.
    pub fn from_json(value: Value) -> Field {
        match value {
            Value::Array(items) => Field::List(items.into_iter().map(Field::from_json).collect()),
            Value::Object(entries) => Field::Map(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, Field::from_json(v)))
                    .collect(),
            ),
            scalar => Field::Scalar(scalar),
        }
    }
}

/// An ordered attribute dictionary.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(transparent)]
pub struct Record {
    fields: IndexMap<String, Field>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, field: Field) -> Self {
        self.fields.insert(key.into(), field);
        self
    }

    /// Adds a plain value; arrays and objects become `List` and `Map` fields.
    pub fn with_value(self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(key, Field::from_json(value.into()))
    }

    pub fn insert(&mut self, key: impl Into<String>, field: Field) -> Option<Field> {
        self.fields.insert(key.into(), field)
    }

    pub fn get(&self, key: &str) -> Option<&Field> {
        self.fields.get(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<Field> {
        self.fields.shift_remove(key)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&String, &Field)> {
        self.fields.iter()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// The `type` key, when it is a string.
    pub fn type_name(&self) -> Option<&str> {
        match self.fields.get("type") {
            Some(Field::Scalar(Value::String(name))) => Some(name),
            _ => None,
        }
    }
}

/// Flattens ASG nodes, memoizing by node identity.
#[derive(Debug, Default)]
pub struct Flattener {
    memo: HashMap<*const Ofnode, Rc<Record>>,
}

impl Flattener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn flatten(&mut self, node: &NodeRef) -> Rc<Record> {
        let key = Rc::as_ptr(node);
        if let Some(record) = self.memo.get(&key) {
            return record.clone();
        }
        let record = Rc::new(self.build(node));
        self.memo.insert(key, record.clone());
        record
    }

    fn node(&mut self, node: &NodeRef) -> Field {
        Field::Node(self.flatten(node))
    }

    fn list(&mut self, nodes: &[NodeRef]) -> Field {
        Field::List(nodes.iter().map(|n| self.node(n)).collect())
    }

    fn dict(&mut self, dict: &ArgDict) -> Field {
        Field::Map(dict.iter().map(|(k, n)| (k.clone(), self.node(n))).collect())
    }

    fn build(&mut self, node: &NodeRef) -> Record {
        let record = Record::new()
            .with_value("type", node.node_type().to_string())
            .with_value("nodetype", node.nodetype());
        match node.as_ref() {
            Ofnode::BuiltinPeriod | Ofnode::Simulation | Ofnode::SelfEntity => record,
            Ofnode::Role { name } => record.with_value("name", name.clone()),
            Ofnode::Int { value } => record.with_value("value", *value),
            Ofnode::Float { value } => record.with_value("value", *value),
            Ofnode::String { value } => record.with_value("value", value.clone()),
            Ofnode::List { items } => record.with("items", self.list(items)),
            Ofnode::ArithmeticOperation { op, operands } => record
                .with_value("op", op.clone())
                .with("operands", self.list(operands)),
            Ofnode::ArithmeticCall {
                op,
                arg_list,
                arg_dict,
            } => record
                .with_value("op", op.clone())
                .with("arg_list", self.list(arg_list))
                .with("arg_dict", self.dict(arg_dict)),
            Ofnode::PeriodOperation { operator, operands }
            | Ofnode::PeriodToInstant { operator, operands } => record
                .with_value("operator", operator.clone())
                .with("operands", self.list(operands)),
            Ofnode::PeriodOffset {
                operator,
                arg_list,
                arg_dict,
                input_period,
            } => record
                .with_value("operator", operator.clone())
                .with("arg_list", self.list(arg_list))
                .with("arg_dict", self.dict(arg_dict))
                .with("input_period", self.node(input_period)),
            Ofnode::InstantOperation {
                op,
                arg_list,
                arg_dict,
                input_instant,
            } => {
                let record = record
                    .with_value("op", op.clone())
                    .with("arg_list", self.list(arg_list))
                    .with("arg_dict", self.dict(arg_dict));
                match input_instant {
                    Some(instant) => record.with("input_instant", self.node(instant)),
                    None => record,
                }
            }
            Ofnode::InstantToPeriod {
                op,
                arg_list,
                arg_dict,
                input_instant,
            } => record
                .with_value("op", op.clone())
                .with("arg_list", self.list(arg_list))
                .with("arg_dict", self.dict(arg_dict))
                .with("input_instant", self.node(input_instant)),
            Ofnode::VariableForPeriod {
                operator,
                variable_name,
                period,
                arg_dict,
            } => {
                let record = record
                    .with_value("operator", operator.clone())
                    .with_value("variable_name", variable_name.clone());
                let record = match period {
                    Some(period) => record.with("period", self.node(period)),
                    None => record,
                };
                record.with("arg_dict", self.dict(arg_dict))
            }
            Ofnode::Parameter { instant, path } => record
                .with("instant", self.node(instant))
                .with_value("path", path.clone()),
            Ofnode::SelfOperation {
                operator,
                arg_list,
                arg_dict,
            }
            | Ofnode::SplitByRoles {
                operator,
                arg_list,
                arg_dict,
            } => record
                .with_value("operator", operator.clone())
                .with("arg_list", self.list(arg_list))
                .with("arg_dict", self.dict(arg_dict)),
            Ofnode::SplitByRolesWithRole {
                operator,
                split_arg_list,
                split_arg_dict,
                role,
            } => record
                .with_value("operator", operator.clone())
                .with("split_arg_list", self.list(split_arg_list))
                .with("split_arg_dict", self.dict(split_arg_dict))
                .with("role", self.node(role)),
            Ofnode::ApplyThresholds { arg_list, arg_dict } => record
                .with("arg_list", self.list(arg_list))
                .with("arg_dict", self.dict(arg_dict)),
            Ofnode::Return { period, value } => record
                .with("period", self.node(period))
                .with("value", self.node(value)),
        }
    }
}

/// Flattens one ASG root.
pub fn flatten(node: &NodeRef) -> Rc<Record> {
    Flattener::new().flatten(node)
}
