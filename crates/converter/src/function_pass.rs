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

//! Function pass: a symbolic evaluator over a formula body. Statements are run in order
//! against a table of local bindings; expressions evaluate to ASG nodes. Attribute chains
//! such as `simulation.calculate('x', period)` go through a pending stage: the attribute
//! produces a `Pending` marker that the following call turns into a concrete node.

use std::fmt::{Debug, Formatter};
use std::rc::Rc;

use indexmap::IndexMap;
use ofasg_syntax::{ArgumentKind, CallArgument, FunctionDef, Node, NodeKind};
use serde::Serialize;
use tracing::{debug, trace};

use crate::asg::{ArgDict, NodeRef, NodeType, Ofnode};
use crate::errors::{ParsingError, ensure};
use crate::options::ConversionOptions;
use crate::system::TaxBenefitSystem;

const PERIOD_OPERATIONS: [&str; 4] = ["this_month", "n_2", "last_year", "this_year"];
const SIMULATION_OPERATIONS: [&str; 4] = ["calculate", "calculate_add", "compute", "compute_add"];
const SELF_OPERATIONS: [&str; 4] = [
    "split_by_roles",
    "sum_by_entity",
    "filter_role",
    "cast_from_entity_to_roles",
];
/// Operators for which `(a op b) op c` and `a op b op c` mean the same.
const ASSOCIATIVE_OPERATORS: [&str; 6] = ["+", "*", "and", "or", "&", "|"];

/// The outcome of converting one function.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionRecord {
    pub return_node: NodeRef,
}

impl Serialize for FunctionRecord {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry("return", &crate::record::flatten(&self.return_node))?;
        map.end()
    }
}

/// An operation named by an attribute or a free name, awaiting its call.
#[derive(Debug, Clone)]
enum Pending {
    ArithmeticCall { op: String },
    InstantOp { op: String, input_instant: Option<NodeRef> },
    PeriodOffset { input_period: NodeRef },
    SimulationOp { operator: String },
    LegislationAt,
    SelfOp { operator: String },
    ApplyThresholds,
}

#[derive(Debug, Clone)]
enum Base {
    Resolved(NodeRef),
    Pending(Pending),
}

/// State while walking an attribute chain: the value of the segments seen so far.
#[derive(Debug)]
struct ChainContext {
    base: Base,
}

/// State of one function conversion.
pub struct FunctionContext<'a> {
    pub function_name: &'a str,
    local_variables: IndexMap<String, NodeRef>,
    auxiliary_functions: &'a IndexMap<String, FunctionDef>,
    system: &'a TaxBenefitSystem,
    options: &'a ConversionOptions,
    return_node: Option<NodeRef>,
}

impl Debug for FunctionContext<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionContext")
            .field("function_name", &self.function_name)
            .field("local_variables", &self.local_variables)
            .field(
                "auxiliary_functions",
                &self.auxiliary_functions.keys().collect::<Vec<_>>(),
            )
            .field("return_node", &self.return_node)
            .finish()
    }
}

impl<'a> FunctionContext<'a> {
    pub fn new(
        function_name: &'a str,
        auxiliary_functions: &'a IndexMap<String, FunctionDef>,
        system: &'a TaxBenefitSystem,
        options: &'a ConversionOptions,
    ) -> Self {
        Self {
            function_name,
            local_variables: IndexMap::new(),
            auxiliary_functions,
            system,
            options,
            return_node: None,
        }
    }

    pub fn local_variables(&self) -> &IndexMap<String, NodeRef> {
        &self.local_variables
    }

    /// Runs one statement of the function body.
    pub fn statement(&mut self, node: &Node) -> Result<(), ParsingError> {
        match &node.kind {
            NodeKind::Comment(_) | NodeKind::String(_) => Ok(()),
            NodeKind::Assignment {
                target,
                operator,
                value,
            } => self.assignment(node, target, operator, value),
            NodeKind::Return(value) => self.return_statement(node, value.as_deref()),
            NodeKind::For { .. } => Err(ParsingError::too_complex("for loop", node, self)),
            NodeKind::While { .. } => Err(ParsingError::too_complex("while loop", node, self)),
            NodeKind::Def(_) => Err(ParsingError::too_complex("inner function", node, self)),
            _ => Err(ParsingError::not_implemented(
                format!("Function visitor not declared for type=\"{}\"", node.tag()),
                node,
                self,
            )),
        }
    }

    fn assignment(
        &mut self,
        node: &Node,
        target: &Node,
        operator: &str,
        value: &Node,
    ) -> Result<(), ParsingError> {
        let Some(name) = target.as_name() else {
            return Err(ParsingError::too_complex(
                "assignment target is not a name",
                node,
                self,
            ));
        };
        let mut value = self.expression(value)?;
        if !operator.is_empty() {
            if !self.options.augmented_assignment {
                return Err(ParsingError::not_implemented(
                    format!("Augmented assignment {operator}="),
                    node,
                    self,
                ));
            }
            let Some(previous) = self.local_variables.get(name) else {
                return Err(ParsingError::assertion(
                    format!("Augmented assignment to unbound name {name}"),
                    node,
                    self,
                ));
            };
            value = self.operation(operator, vec![previous.clone(), value]);
        }
        trace!(function = self.function_name, name, "binding");
        self.local_variables.insert(name.to_string(), value);
        Ok(())
    }

    fn return_statement(&mut self, node: &Node, value: Option<&Node>) -> Result<(), ParsingError> {
        let Some(NodeKind::Tuple(items)) = value.map(|v| &v.kind) else {
            return Err(ParsingError::assertion(
                "Return value is not a tuple",
                node,
                self,
            ));
        };
        let [period, value] = items.as_slice() else {
            return Err(ParsingError::assertion(
                format!("Returned tuple has {} elements", items.len()),
                node,
                self,
            ));
        };
        let period = self.expression(period)?;
        ensure(
            period.node_type() == NodeType::Period,
            || format!("Returned period has type {}", period.node_type()),
            node,
            self,
        )?;
        let value = self.expression(value)?;
        ensure(
            value.node_type() == NodeType::Value,
            || format!("Returned value has type {}", value.node_type()),
            node,
            self,
        )?;
        ensure(
            self.return_node.is_none(),
            || "Function returns more than once".into(),
            node,
            self,
        )?;
        self.return_node = Some(Rc::new(Ofnode::Return { period, value }));
        Ok(())
    }

    /// Evaluates a value-producing expression.
    pub fn expression(&self, node: &Node) -> Result<NodeRef, ParsingError> {
        match &node.kind {
            NodeKind::Name(_) | NodeKind::Atomtrailers(_) => {
                let base = match &node.kind {
                    NodeKind::Atomtrailers(items) => self.chain(items)?,
                    _ => self.name(node)?,
                };
                match base {
                    Base::Resolved(value) => Ok(value),
                    Base::Pending(pending) => Err(ParsingError::not_implemented(
                        format!("Incomplete expression: {pending:?}"),
                        node,
                        self,
                    )),
                }
            }
            NodeKind::Int(value) => Ok(Ofnode::int(*value)),
            NodeKind::Float(value) => Ok(Rc::new(Ofnode::Float { value: *value })),
            NodeKind::String(value) => Ok(Rc::new(Ofnode::String {
                value: value.clone(),
            })),
            NodeKind::List(items) => {
                let items = items
                    .iter()
                    .map(|item| self.expression(item))
                    .collect::<Result<_, _>>()?;
                Ok(Rc::new(Ofnode::List { items }))
            }
            NodeKind::AssociativeParenthesis(inner) => self.expression(inner),
            NodeKind::BinaryOperator { op, first, second }
            | NodeKind::BooleanOperator { op, first, second }
            | NodeKind::Comparison { op, first, second } => {
                let operands = vec![self.expression(first)?, self.expression(second)?];
                Ok(self.operation(op, operands))
            }
            NodeKind::UnitaryOperator { op, target } => {
                Ok(Ofnode::arithmetic(op.clone(), vec![self.expression(target)?]))
            }
            _ => Err(ParsingError::not_implemented(
                format!("Function visitor not declared for type=\"{}\"", node.tag()),
                node,
                self,
            )),
        }
    }

    /// An arithmetic operation, merging nested operands of associative operators when asked.
    fn operation(&self, op: &str, operands: Vec<NodeRef>) -> NodeRef {
        if !self.options.flatten_nested_operators || !ASSOCIATIVE_OPERATORS.contains(&op) {
            return Ofnode::arithmetic(op, operands);
        }
        let mut flat = Vec::with_capacity(operands.len());
        for operand in operands {
            match operand.as_ref() {
                Ofnode::ArithmeticOperation {
                    op: inner,
                    operands,
                } if inner == op => flat.extend(operands.iter().cloned()),
                _ => flat.push(operand),
            }
        }
        Ofnode::arithmetic(op, flat)
    }

    /// A free name at the start of an expression.
    fn name(&self, node: &Node) -> Result<Base, ParsingError> {
        let Some(name) = node.as_name() else {
            return Err(ParsingError::assertion("Expected a name", node, self));
        };
        if let Some(value) = self.local_variables.get(name) {
            return Ok(Base::Resolved(value.clone()));
        }
        if self.auxiliary_functions.contains_key(name) {
            return Err(ParsingError::too_complex(
                format!("auxiliary function {name} used"),
                node,
                self,
            ));
        }
        let resolved = match name {
            "period" => Ofnode::BuiltinPeriod,
            "simulation" => Ofnode::Simulation,
            "self" => Ofnode::SelfEntity,
            "datetime64" => {
                return Ok(Base::Pending(Pending::InstantOp {
                    op: name.to_string(),
                    input_instant: None,
                }));
            }
            "apply_thresholds" => return Ok(Base::Pending(Pending::ApplyThresholds)),
            _ if self.options.is_arithmetic_builtin(name) => {
                return Ok(Base::Pending(Pending::ArithmeticCall {
                    op: name.to_string(),
                }));
            }
            _ if self.system.is_role(name) => Ofnode::Role {
                name: name.to_string(),
            },
            _ => {
                return Err(ParsingError::not_implemented(
                    format!("Unknown name {name}"),
                    node,
                    self,
                ));
            }
        };
        Ok(Base::Resolved(Rc::new(resolved)))
    }

    fn chain(&self, items: &[Node]) -> Result<Base, ParsingError> {
        let Some((first, segments)) = items.split_first() else {
            return Err(ParsingError::assertion(
                "Empty chain",
                &Node::new(NodeKind::Atomtrailers(vec![]), 0),
                self,
            ));
        };
        let first = match &first.kind {
            NodeKind::Name(_) => self.name(first)?,
            _ => Base::Resolved(self.expression(first)?),
        };
        let mut chain = ChainContext { base: first };
        for segment in segments {
            chain.base = match &segment.kind {
                NodeKind::Name(name) => self.attribute(&chain, name, segment)?,
                NodeKind::Call(arguments) => self.call(&chain, arguments, segment)?,
                NodeKind::Getitem(index) => self.getitem(&chain, index, segment)?,
                _ => {
                    return Err(ParsingError::not_implemented(
                        format!("Function visitor not declared for type=\"{}\"", segment.tag()),
                        segment,
                        &(self, &chain),
                    ));
                }
            };
        }
        Ok(chain.base)
    }

    fn attribute(
        &self,
        chain: &ChainContext,
        name: &str,
        node: &Node,
    ) -> Result<Base, ParsingError> {
        let state = &(self, chain);
        let base = match &chain.base {
            Base::Resolved(base) => base,
            Base::Pending(_) => {
                return Err(ParsingError::not_implemented(
                    format!("Unknown op {name}"),
                    node,
                    state,
                ));
            }
        };
        let pending = match (base.node_type(), name) {
            (NodeType::Instant, "offset" | "period") => Pending::InstantOp {
                op: name.to_string(),
                input_instant: Some(base.clone()),
            },
            (NodeType::Instant, _) => {
                return Err(ParsingError::not_implemented(
                    format!("Unknown instant operand {name}"),
                    node,
                    state,
                ));
            }
            (NodeType::Period, _) if PERIOD_OPERATIONS.contains(&name) => {
                return Ok(Base::Resolved(Rc::new(Ofnode::PeriodOperation {
                    operator: name.to_string(),
                    operands: vec![base.clone()],
                })));
            }
            (NodeType::Period, "start") => {
                return Ok(Base::Resolved(Rc::new(Ofnode::PeriodToInstant {
                    operator: name.to_string(),
                    operands: vec![base.clone()],
                })));
            }
            (NodeType::Period, "offset") => Pending::PeriodOffset {
                input_period: base.clone(),
            },
            (NodeType::Period, _) => {
                return Err(ParsingError::not_implemented(
                    format!("Unknown period operand {name}"),
                    node,
                    state,
                ));
            }
            (NodeType::Simulation, _) if SIMULATION_OPERATIONS.contains(&name) => {
                Pending::SimulationOp {
                    operator: name.to_string(),
                }
            }
            (NodeType::Simulation, "legislation_at") => Pending::LegislationAt,
            (NodeType::Simulation, _) => {
                return Err(ParsingError::not_implemented(
                    format!("Unknown simulation op {name}"),
                    node,
                    state,
                ));
            }
            (NodeType::SelfEntity, _) if SELF_OPERATIONS.contains(&name) => Pending::SelfOp {
                operator: name.to_string(),
            },
            (NodeType::SelfEntity, _) => {
                return Err(ParsingError::not_implemented(
                    format!("Unknown self op {name}"),
                    node,
                    state,
                ));
            }
            (NodeType::Parameter, _) => {
                let Ofnode::Parameter { instant, path } = base.as_ref() else {
                    return Err(ParsingError::assertion("Malformed parameter", node, state));
                };
                let mut path = path.clone();
                path.push(name.to_string());
                return Ok(Base::Resolved(Rc::new(Ofnode::Parameter {
                    instant: instant.clone(),
                    path,
                })));
            }
            _ => {
                return Err(ParsingError::not_implemented(
                    format!("Unknown op {name}"),
                    node,
                    state,
                ));
            }
        };
        Ok(Base::Pending(pending))
    }

    fn arguments(
        &self,
        chain: &ChainContext,
        arguments: &[CallArgument],
        node: &Node,
    ) -> Result<(Vec<NodeRef>, ArgDict), ParsingError> {
        let state = &(self, chain);
        let mut arg_list = vec![];
        let mut arg_dict = ArgDict::new();
        for argument in arguments {
            if argument.kind != ArgumentKind::Plain {
                return Err(ParsingError::not_implemented(
                    "Star arguments",
                    node,
                    state,
                ));
            }
            let value = self.expression(&argument.value)?;
            match &argument.target {
                Some(target) => {
                    arg_dict.insert(target.clone(), value);
                }
                None => {
                    ensure(
                        arg_dict.is_empty(),
                        || "Positional argument after keyword argument".into(),
                        node,
                        state,
                    )?;
                    arg_list.push(value);
                }
            }
        }
        Ok((arg_list, arg_dict))
    }

    fn call(
        &self,
        chain: &ChainContext,
        arguments: &[CallArgument],
        node: &Node,
    ) -> Result<Base, ParsingError> {
        let (arg_list, arg_dict) = self.arguments(chain, arguments, node)?;
        let state = &(self, chain);
        let pending = match &chain.base {
            Base::Pending(pending) => pending,
            Base::Resolved(_) => {
                return Err(ParsingError::not_implemented("Unknown caller", node, state));
            }
        };
        let resolved = match pending {
            Pending::SimulationOp { operator } => {
                ensure(
                    matches!(arg_list.len(), 1 | 2),
                    || format!("{operator} takes 1 or 2 positional arguments"),
                    node,
                    state,
                )?;
                let Ofnode::String {
                    value: variable_name,
                } = arg_list[0].as_ref()
                else {
                    return Err(ParsingError::assertion(
                        "Variable name must be a string",
                        node,
                        state,
                    ));
                };
                let period = arg_list.get(1).cloned();
                if let Some(period) = &period {
                    ensure(
                        period.node_type() == NodeType::Period,
                        || format!("{operator} period has type {}", period.node_type()),
                        node,
                        state,
                    )?;
                }
                Ofnode::VariableForPeriod {
                    operator: operator.clone(),
                    variable_name: variable_name.clone(),
                    period,
                    arg_dict,
                }
            }
            Pending::LegislationAt => {
                ensure(
                    arg_list.len() == 1 && arg_dict.is_empty(),
                    || "legislation_at takes one instant".into(),
                    node,
                    state,
                )?;
                let instant = arg_list[0].clone();
                ensure(
                    instant.node_type() == NodeType::Instant,
                    || format!("legislation_at argument has type {}", instant.node_type()),
                    node,
                    state,
                )?;
                Ofnode::Parameter {
                    instant,
                    path: vec![],
                }
            }
            Pending::SelfOp { operator } if operator == "split_by_roles" => Ofnode::SplitByRoles {
                operator: operator.clone(),
                arg_list,
                arg_dict,
            },
            Pending::SelfOp { operator } => Ofnode::SelfOperation {
                operator: operator.clone(),
                arg_list,
                arg_dict,
            },
            Pending::InstantOp { op, input_instant } if op == "period" => {
                let Some(input_instant) = input_instant.clone() else {
                    return Err(ParsingError::assertion("period() needs an instant", node, state));
                };
                Ofnode::InstantToPeriod {
                    op: op.clone(),
                    arg_list,
                    arg_dict,
                    input_instant,
                }
            }
            Pending::InstantOp { op, input_instant } => Ofnode::InstantOperation {
                op: op.clone(),
                arg_list,
                arg_dict,
                input_instant: input_instant.clone(),
            },
            Pending::ArithmeticCall { op } => Ofnode::ArithmeticCall {
                op: op.clone(),
                arg_list,
                arg_dict,
            },
            Pending::PeriodOffset { input_period } => Ofnode::PeriodOffset {
                operator: "offset".to_string(),
                arg_list,
                arg_dict,
                input_period: input_period.clone(),
            },
            Pending::ApplyThresholds => Ofnode::ApplyThresholds { arg_list, arg_dict },
        };
        Ok(Base::Resolved(Rc::new(resolved)))
    }

    fn getitem(
        &self,
        chain: &ChainContext,
        index: &Node,
        node: &Node,
    ) -> Result<Base, ParsingError> {
        let state = &(self, chain);
        let Base::Resolved(base) = &chain.base else {
            return Err(ParsingError::not_implemented("Unknown getitem source.", node, state));
        };
        let Ofnode::SplitByRoles {
            operator,
            arg_list,
            arg_dict,
        } = base.as_ref()
        else {
            return Err(ParsingError::not_implemented("Unknown getitem source.", node, state));
        };
        let role = self.expression(index)?;
        ensure(
            role.node_type() == NodeType::Role,
            || format!("Subscript has type {}", role.node_type()),
            node,
            state,
        )?;
        Ok(Base::Resolved(Rc::new(Ofnode::SplitByRolesWithRole {
            operator: operator.clone(),
            split_arg_list: arg_list.clone(),
            split_arg_dict: arg_dict.clone(),
            role,
        })))
    }

    /// Finishes the conversion, requiring exactly one return.
    pub fn finish(self, function: &Node) -> Result<FunctionRecord, ParsingError> {
        match &self.return_node {
            Some(return_node) => Ok(FunctionRecord {
                return_node: return_node.clone(),
            }),
            None => Err(ParsingError::assertion("Function has no return", function, &self)),
        }
    }
}

/// Converts a function body into its return node.
pub fn parse_function(
    function_name: &str,
    instructions: &[Node],
    auxiliary_functions: &IndexMap<String, FunctionDef>,
    system: &TaxBenefitSystem,
    options: &ConversionOptions,
) -> Result<FunctionRecord, ParsingError> {
    let mut context = FunctionContext::new(function_name, auxiliary_functions, system, options);
    for node in instructions {
        context.statement(node)?;
    }
    let anchor = instructions
        .last()
        .cloned()
        .unwrap_or_else(|| Node::new(NodeKind::Pass, 0));
    let record = context.finish(&anchor)?;
    debug!(function = function_name, "parsed function");
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Field, flatten};
    use ofasg_syntax::parse_source;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use test_case::test_case;
    use unindent::unindent;

    fn convert_with(
        source: &str,
        auxiliary_functions: &IndexMap<String, FunctionDef>,
        options: &ConversionOptions,
    ) -> Result<FunctionRecord, ParsingError> {
        let nodes = parse_source(&unindent(source)).unwrap();
        let NodeKind::Def(function) = &nodes[0].kind else {
            panic!("expected a function");
        };
        parse_function(
            &function.name,
            &function.body,
            auxiliary_functions,
            &TaxBenefitSystem::default(),
            options,
        )
    }

    fn convert(source: &str) -> Result<FunctionRecord, ParsingError> {
        convert_with(source, &IndexMap::new(), &ConversionOptions::default())
    }

    fn returned_value(source: &str) -> serde_json::Value {
        let record = convert(source).unwrap();
        let Ofnode::Return { value, .. } = record.return_node.as_ref() else {
            panic!("expected a return node");
        };
        serde_json::to_value(flatten(value)).unwrap()
    }

    #[test]
    fn test_calculate_times_two() {
        let record = convert(
            "
            def function(self, simulation, period):
                x = simulation.calculate('salaire', period)
                return period, x * 2
            ",
        )
        .unwrap();
        let Ofnode::Return { period, value } = record.return_node.as_ref() else {
            panic!("expected a return node");
        };
        assert_eq!(period.node_type(), NodeType::Period);
        assert_eq!(period.nodetype(), "builtin-period");
        assert_eq!(value.nodetype(), "arithmetic_operation");
        let Ofnode::ArithmeticOperation { op, operands } = value.as_ref() else {
            panic!("expected an arithmetic operation");
        };
        assert_eq!(op, "*");
        assert_eq!(operands.len(), 2);
        let Ofnode::VariableForPeriod { variable_name, .. } = operands[0].as_ref() else {
            panic!("expected variable_for_period");
        };
        assert_eq!(variable_name, "salaire");
        assert_eq!(operands[1].as_ref(), &Ofnode::Int { value: 2 });
    }

    #[test]
    fn test_locals_are_shared() {
        let record = convert(
            "
            def function(self, simulation, period):
                x = simulation.calculate('salaire', period)
                return period, x + x
            ",
        )
        .unwrap();
        let return_record = flatten(&record.return_node);
        let Some(Field::Node(value)) = return_record.get("value") else {
            panic!("expected a value");
        };
        let Some(Field::List(operands)) = value.get("operands") else {
            panic!("expected operands");
        };
        assert!(Rc::ptr_eq(
            operands[0].as_node().unwrap(),
            operands[1].as_node().unwrap()
        ));
    }

    #[test]
    fn test_parameter_path() {
        let value = returned_value(
            "
            def function(self, simulation, period):
                P = simulation.legislation_at(period.start).ir.taux
                return period, P * 1
            ",
        );
        assert_eq!(
            value["operands"][0],
            json!({
                "type": "parameter",
                "nodetype": "parameter",
                "instant": {
                    "type": "instant",
                    "nodetype": "period-to-instant",
                    "operator": "start",
                    "operands": [{"type": "period", "nodetype": "builtin-period"}],
                },
                "path": ["ir", "taux"],
            })
        );
    }

    #[test]
    fn test_split_by_roles() {
        let value = returned_value(
            "
            def function(self, simulation, period):
                revenus = self.split_by_roles(simulation.calculate('revenu', period), roles = [VOUS, CONJ])
                return period, revenus[VOUS]
            ",
        );
        assert_eq!(value["nodetype"], "split_by_roles_with_role");
        assert_eq!(value["role"], json!({"type": "role", "nodetype": "role", "name": "VOUS"}));
        assert_eq!(value["split_arg_dict"]["roles"]["nodetype"], "list");
    }

    #[test]
    fn test_period_and_instant_operations() {
        let value = returned_value(
            "
            def function(self, simulation, period):
                period = period.this_year
                past = period.start.offset(-1, 'year').period('year')
                return period, simulation.calculate_add('salaire', past)
            ",
        );
        assert_eq!(value["nodetype"], "variable_for_period");
        assert_eq!(value["period"]["nodetype"], "instant_to_period");
        assert_eq!(value["period"]["input_instant"]["nodetype"], "instant_op");
        assert_eq!(
            value["period"]["input_instant"]["input_instant"]["nodetype"],
            "period-to-instant"
        );
        assert_eq!(
            value["period"]["input_instant"]["input_instant"]["operands"][0]["nodetype"],
            "period-operation"
        );
    }

    #[test]
    fn test_arithmetic_builtin() {
        let value = returned_value(
            "
            def function(self, simulation, period):
                return period, max_(simulation.calculate('a', period) - 3, 0)
            ",
        );
        assert_eq!(value["op"], "max_");
        assert_eq!(value["arg_list"][0]["op"], "-");
    }

    #[test]
    fn test_augmented_assignment() {
        let value = returned_value(
            "
            def function(self, simulation, period):
                x = 1
                x += 2
                return period, x
            ",
        );
        assert_eq!(
            value,
            json!({
                "type": "value",
                "nodetype": "arithmetic_operation",
                "op": "+",
                "operands": [
                    {"type": "value", "nodetype": "int", "value": 1},
                    {"type": "value", "nodetype": "int", "value": 2},
                ],
            })
        );
    }

    #[test]
    fn test_flatten_nested_operators() {
        let options = ConversionOptions {
            flatten_nested_operators: true,
            ..Default::default()
        };
        let record = convert_with(
            "
            def function(self, simulation, period):
                return period, 1 + 2 + 3 - 4
            ",
            &IndexMap::new(),
            &options,
        )
        .unwrap();
        let Ofnode::Return { value, .. } = record.return_node.as_ref() else {
            panic!("expected a return node");
        };
        let Ofnode::ArithmeticOperation { op, operands } = value.as_ref() else {
            panic!("expected an operation");
        };
        assert_eq!(op, "-");
        assert_eq!(operands[0].children().len(), 3);
    }

    #[test_case("for i in range(3):\n        pass"; "for loop")]
    #[test_case("while True:\n        pass"; "while loop")]
    #[test_case("def inner():\n        return 1"; "inner function")]
    #[test_case("a, b = 1, 2"; "tuple target")]
    #[test_case("x = helper(period)"; "auxiliary function")]
    fn test_too_complex(statement: &str) {
        let source = format!("def function(self, simulation, period):\n    {statement}\n    return period, 1\n");
        let mut auxiliary = IndexMap::new();
        let helper = parse_source("def helper(x):\n    return x\n").unwrap();
        if let NodeKind::Def(def) = &helper[0].kind {
            auxiliary.insert(def.name.clone(), def.clone());
        }
        let err = convert_with(&source, &auxiliary, &ConversionOptions::default()).unwrap_err();
        assert!(err.is_too_complex(), "{err}");
    }

    #[test_case("return period, foo", "Unknown name foo"; "unknown name")]
    #[test_case("return period, simulation.calculate", "Incomplete expression: SimulationOp { operator: \"calculate\" }"; "pending")]
    #[test_case("return period, simulation.frobnicate('x')", "Unknown simulation op frobnicate"; "simulation op")]
    #[test_case("if True:\n        pass\n    return period, 1", "Function visitor not declared for type=\"if\""; "if statement")]
    fn test_not_implemented(body: &str, message: &str) {
        let source = format!("def function(self, simulation, period):\n    {body}\n");
        let err = convert(&source).unwrap_err();
        assert!(matches!(err, ParsingError::NotImplemented { .. }), "{err}");
        assert_eq!(err.message(), message);
    }

    #[test_case("return period, 1\n    return period, 2"; "duplicate return")]
    #[test_case("x = 1"; "missing return")]
    #[test_case("return 1"; "not a tuple")]
    #[test_case("return 1, 2"; "period type")]
    #[test_case("return period, period"; "value type")]
    #[test_case("return period, simulation.calculate(3, period)"; "variable name")]
    #[test_case("return period, self.split_by_roles(1)[2]"; "role subscript")]
    fn test_assertions(body: &str) {
        let source = format!("def function(self, simulation, period):\n    {body}\n");
        assert!(matches!(
            convert(&source),
            Err(ParsingError::Assertion { .. })
        ));
    }

    #[test]
    fn test_docstring_and_comments_ignored() {
        assert!(
            convert(
                r#"
                def function(self, simulation, period):
                    """Docstring"""
                    # comment
                    return period, 0
                "#,
            )
            .is_ok()
        );
    }
}
