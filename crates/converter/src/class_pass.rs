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

//! Class pass: turns the body of a captured class into its declared attributes and its
//! methods, whose bodies are kept unparsed for the function pass.

use indexmap::IndexMap;
use ofasg_syntax::{ArgumentKind, Node, NodeKind};
use serde::Serialize;
use tracing::{debug, trace};

use crate::errors::{ParsingError, ensure};
use crate::module_pass::{CapturedClass, ModuleRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Date {
    pub year: i64,
    pub month: i64,
    pub day: i64,
}

/// The `column` attribute: a column type, called with keyword arguments or not.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnDescriptor {
    pub name: String,
    /// Keyword arguments in source order, `None` for a bare column type.
    #[serde(rename = "column_args", skip_serializing_if = "Option::is_none")]
    pub args: Option<IndexMap<String, Node>>,
}

/// Attributes declared in a class body. Each is set at most once.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ClassVariables {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<ColumnDescriptor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_class: Option<String>,
    /// Kept raw: a single string or several concatenated ones.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<Node>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_date: Option<Date>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_date: Option<Date>,
    /// Kept raw: a string or a tuple of strings.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<Node>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variable: Option<String>,
    /// Kept raw: a string or a dict keyed by role.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cerfa_field: Option<Node>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_permanent: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_function: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub calculate_output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub set_input: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassFunction {
    pub arguments: Vec<String>,
    pub decorators: Vec<Node>,
    /// The function body, unparsed.
    pub instructions: Vec<Node>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ClassRecord {
    pub class_variables: ClassVariables,
    pub class_functions: IndexMap<String, ClassFunction>,
}

/// Parses `date(year, month, day)` with three positional integer arguments.
pub fn parse_date(node: &Node, state: &impl std::fmt::Debug) -> Result<Date, ParsingError> {
    let NodeKind::Atomtrailers(items) = &node.kind else {
        return Err(ParsingError::assertion("Expected a call to date", node, state));
    };
    ensure(items.len() == 2, || "Expected date(...)".into(), node, state)?;
    ensure(
        items[0].as_name() == Some("date"),
        || format!("Expected a call to date, found {}", items[0]),
        node,
        state,
    )?;
    let NodeKind::Call(arguments) = &items[1].kind else {
        return Err(ParsingError::assertion("Expected a call to date", node, state));
    };
    ensure(
        arguments.len() == 3,
        || format!("date takes 3 arguments, found {}", arguments.len()),
        node,
        state,
    )?;
    let mut parts = [0i64; 3];
    for (part, argument) in parts.iter_mut().zip(arguments) {
        ensure(
            argument.target.is_none() && argument.kind == ArgumentKind::Plain,
            || "date arguments must be positional".into(),
            node,
            state,
        )?;
        *part = argument
            .value
            .as_int()
            .ok_or_else(|| {
                ParsingError::assertion("date arguments must be integers", node, state)
            })?;
    }
    let [year, month, day] = parts;
    Ok(Date { year, month, day })
}

/// Stores `value` unless the attribute was already declared, returning whether it was.
fn set_once<T>(slot: &mut Option<T>, value: T) -> bool {
    if slot.is_some() {
        return true;
    }
    *slot = Some(value);
    false
}

#[derive(Debug)]
struct ClassVisitor<'a> {
    class_name: &'a str,
    record: ClassRecord,
}

impl ClassVisitor<'_> {
    fn visit(&mut self, node: &Node) -> Result<(), ParsingError> {
        match &node.kind {
            NodeKind::Comment(_) | NodeKind::String(_) => Ok(()),
            NodeKind::Assignment {
                target,
                operator,
                value,
            } => self.assignment(node, target, operator, value),
            NodeKind::Def(function) => {
                let mut arguments = Vec::with_capacity(function.arguments.len());
                for argument in &function.arguments {
                    ensure(
                        argument.kind == ArgumentKind::Plain && argument.default.is_none(),
                        || format!("Unsupported parameter {}", argument.name),
                        node,
                        self,
                    )?;
                    arguments.push(argument.name.clone());
                }
                ensure(
                    !self.record.class_functions.contains_key(&function.name),
                    || format!("Duplicate function {}", function.name),
                    node,
                    self,
                )?;
                self.record.class_functions.insert(
                    function.name.clone(),
                    ClassFunction {
                        arguments,
                        decorators: function.decorators.clone(),
                        instructions: function.body.clone(),
                    },
                );
                Ok(())
            }
            _ => Err(ParsingError::not_implemented(
                format!("Class visitor not declared for type=\"{}\"", node.tag()),
                node,
                self,
            )),
        }
    }

    /// A bare name on the right-hand side, as required by most attributes.
    fn name_value(&self, node: &Node, value: &Node) -> Result<String, ParsingError> {
        value
            .as_name()
            .map(str::to_string)
            .ok_or_else(|| ParsingError::assertion("Expected a name", node, self))
    }

    fn assignment(
        &mut self,
        node: &Node,
        target: &Node,
        operator: &str,
        value: &Node,
    ) -> Result<(), ParsingError> {
        ensure(operator.is_empty(), || "Augmented class variable".into(), node, self)?;
        let Some(name) = target.as_name() else {
            return Err(ParsingError::assertion("Class variable target is not a name", node, self));
        };
        trace!(class = self.class_name, attribute = name, "class variable");
        let duplicate = match name {
            "column" => {
                let column = self.column(node, value)?;
                set_once(&mut self.record.class_variables.column, column)
            }
            "entity_class" | "variable" | "base_function" | "calculate_output" | "set_input"
            | "role" => {
                let value = self.name_value(node, value)?;
                let vars = &mut self.record.class_variables;
                let slot = match name {
                    "entity_class" => &mut vars.entity_class,
                    "variable" => &mut vars.variable,
                    "base_function" => &mut vars.base_function,
                    "calculate_output" => &mut vars.calculate_output,
                    "set_input" => &mut vars.set_input,
                    _ => &mut vars.role,
                };
                set_once(slot, value)
            }
            "label" | "url" | "cerfa_field" => {
                let vars = &mut self.record.class_variables;
                let slot = match name {
                    "label" => &mut vars.label,
                    "url" => &mut vars.url,
                    _ => &mut vars.cerfa_field,
                };
                set_once(slot, value.clone())
            }
            "start_date" => {
                let date = parse_date(value, self)?;
                set_once(&mut self.record.class_variables.start_date, date)
            }
            "stop_date" => {
                let date = parse_date(value, self)?;
                set_once(&mut self.record.class_variables.stop_date, date)
            }
            "operation" => {
                let Some(operation) = value.as_str() else {
                    return Err(ParsingError::assertion("operation must be a string", node, self));
                };
                set_once(
                    &mut self.record.class_variables.operation,
                    operation.to_string(),
                )
            }
            "is_permanent" => {
                let flag = match value.as_name() {
                    Some("True") => true,
                    Some("False") => false,
                    _ => {
                        return Err(ParsingError::assertion(
                            "is_permanent must be True or False",
                            node,
                            self,
                        ));
                    }
                };
                set_once(&mut self.record.class_variables.is_permanent, flag)
            }
            _ => {
                return Err(ParsingError::not_implemented(
                    format!("Unknown class variable {name}"),
                    node,
                    self,
                ));
            }
        };
        if duplicate {
            return Err(ParsingError::assertion(
                format!("Duplicate class variable {name}"),
                node,
                self,
            ));
        }
        Ok(())
    }

    fn column(&self, node: &Node, value: &Node) -> Result<ColumnDescriptor, ParsingError> {
        match &value.kind {
            NodeKind::Name(name) => Ok(ColumnDescriptor {
                name: name.clone(),
                args: None,
            }),
            NodeKind::Atomtrailers(items) => {
                ensure(items.len() == 2, || "Expected Column(...)".into(), node, self)?;
                let name = self.name_value(node, &items[0])?;
                let NodeKind::Call(arguments) = &items[1].kind else {
                    return Err(ParsingError::assertion("Expected Column(...)", node, self));
                };
                let mut args = IndexMap::new();
                for argument in arguments {
                    let Some(target) = &argument.target else {
                        return Err(ParsingError::assertion(
                            "Column arguments must be keywords",
                            node,
                            self,
                        ));
                    };
                    args.insert(target.clone(), argument.value.clone());
                }
                Ok(ColumnDescriptor {
                    name,
                    args: Some(args),
                })
            }
            _ => Err(ParsingError::not_implemented("Unknown type", node, self)),
        }
    }
}

pub fn parse_class(class: &CapturedClass) -> Result<ClassRecord, ParsingError> {
    let mut visitor = ClassVisitor {
        class_name: &class.name,
        record: ClassRecord::default(),
    };
    for node in &class.body {
        visitor.visit(node)?;
    }
    debug!(
        class = class.name,
        functions = visitor.record.class_functions.len(),
        "parsed class"
    );
    Ok(visitor.record)
}

/// Parses every class captured by the module pass, keyed by class name.
pub fn parse_classes(module: &ModuleRecord) -> Result<IndexMap<String, ClassRecord>, ParsingError> {
    module
        .classes
        .iter()
        .map(|class| Ok((class.name.clone(), parse_class(class)?)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ofasg_syntax::{parse_expression, parse_source};
    use pretty_assertions::assert_eq;
    use test_case::test_case;
    use unindent::unindent;

    fn class(source: &str) -> CapturedClass {
        let nodes = parse_source(&unindent(source)).unwrap();
        let NodeKind::Class(def) = &nodes[0].kind else {
            panic!("expected a class");
        };
        CapturedClass {
            name: def.name.clone(),
            bases: vec![],
            body: def.body.clone(),
            line: nodes[0].line,
        }
    }

    #[test]
    fn test_parse_date() {
        let node = parse_expression("date(2020, 1, 15)").unwrap();
        assert_eq!(
            parse_date(&node, &()).unwrap(),
            Date {
                year: 2020,
                month: 1,
                day: 15
            }
        );
    }

    #[test_case("date(2020, 1)"; "wrong arity")]
    #[test_case("date(2020, 1, 15, 3)"; "too many")]
    #[test_case("date(2020, 'janvier', 15)"; "non integer")]
    #[test_case("date(2020, month=1, day=15)"; "keywords")]
    #[test_case("datetime(2020, 1, 15)"; "other function")]
    #[test_case("2020"; "not a call")]
    fn test_parse_date_rejects(source: &str) {
        let node = parse_expression(source).unwrap();
        assert!(matches!(
            parse_date(&node, &()),
            Err(ParsingError::Assertion { .. })
        ));
    }

    #[test]
    fn test_class_variables() {
        let record = parse_class(&class(
            r#"
            class salaire_net(SimpleFormulaColumn):
                """Salaire net"""
                column = FloatCol(default = 0, val_type = "monetary")
                entity_class = Individus
                label = u"Salaire net"
                start_date = date(2015, 1, 1)
                stop_date = date(2016, 12, 31)
                is_permanent = True

                # the formula
                def function(self, simulation, period):
                    return period, 0
            "#,
        ))
        .unwrap();
        let vars = &record.class_variables;
        let column = vars.column.as_ref().unwrap();
        assert_eq!(column.name, "FloatCol");
        assert_eq!(
            column.args.as_ref().unwrap().keys().collect::<Vec<_>>(),
            vec!["default", "val_type"]
        );
        assert_eq!(vars.entity_class.as_deref(), Some("Individus"));
        assert_eq!(vars.label.as_ref().and_then(Node::as_str), Some("Salaire net"));
        assert_eq!(
            vars.start_date,
            Some(Date {
                year: 2015,
                month: 1,
                day: 1
            })
        );
        assert_eq!(
            vars.stop_date,
            Some(Date {
                year: 2016,
                month: 12,
                day: 31
            })
        );
        assert_eq!(vars.is_permanent, Some(true));
        let function = &record.class_functions["function"];
        assert_eq!(function.arguments, vec!["self", "simulation", "period"]);
        assert_eq!(function.instructions.len(), 1);
    }

    #[test]
    fn test_bare_column() {
        let record = parse_class(&class(
            "
            class age(Variable):
                column = AgeCol
            ",
        ))
        .unwrap();
        let column = record.class_variables.column.unwrap();
        assert_eq!(column.name, "AgeCol");
        assert!(column.args.is_none());
    }

    #[test]
    fn test_unknown_class_variable() {
        let err = parse_class(&class(
            "
            class x(Variable):
                foobar = 1
            ",
        ))
        .unwrap_err();
        assert!(matches!(err, ParsingError::NotImplemented { .. }));
        assert_eq!(err.message(), "Unknown class variable foobar");
    }

    #[test]
    fn test_duplicate_start_date() {
        let err = parse_class(&class(
            "
            class x(Variable):
                start_date = date(2015, 1, 1)
                start_date = date(2016, 1, 1)
            ",
        ))
        .unwrap_err();
        assert!(matches!(err, ParsingError::Assertion { .. }));
        assert_eq!(err.message(), "Duplicate class variable start_date");
    }

    #[test_case("def function(self, simulation, period = None):\n        return period, 0"; "default value")]
    #[test_case("def function(self, *args):\n        return 0"; "varargs")]
    fn test_method_parameters_rejected(method: &str) {
        let source = format!("class x(Variable):\n    {method}\n");
        let nodes = parse_source(&source).unwrap();
        let NodeKind::Class(def) = &nodes[0].kind else {
            panic!("expected a class");
        };
        let captured = CapturedClass {
            name: def.name.clone(),
            bases: vec![],
            body: def.body.clone(),
            line: 1,
        };
        assert!(matches!(
            parse_class(&captured),
            Err(ParsingError::Assertion { .. })
        ));
    }

    #[test]
    fn test_unexpected_statement() {
        let err = parse_class(&class(
            "
            class x(Variable):
                for i in range(3):
                    pass
            ",
        ))
        .unwrap_err();
        assert_eq!(err.message(), "Class visitor not declared for type=\"for\"");
    }
}
