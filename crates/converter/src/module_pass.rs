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

//! Module pass: sorts the top-level statements of a source file into imports, classes,
//! enums, helper functions and constants. Class and function bodies are captured as
//! they are, for the later passes.

use indexmap::IndexMap;
use ofasg_syntax::{ArgumentKind, FunctionDef, Node, NodeKind};
use serde::Serialize;
use tracing::{debug, info};

use crate::errors::{ParsingError, ensure};
use crate::options::ConversionOptions;

/// A class definition captured without looking into its body.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CapturedClass {
    pub name: String,
    /// Base class names, in declaration order.
    pub bases: Vec<String>,
    pub body: Vec<Node>,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnumDeclaration {
    pub name: String,
    pub items: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "type", content = "value")]
pub enum ConstantValue {
    #[serde(rename = "int")]
    Int(i64),
    None,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Constant {
    pub name: String,
    #[serde(flatten)]
    pub value: ConstantValue,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ModuleRecord {
    /// Import statements, unmodified.
    pub imports: Vec<Node>,
    pub classes: Vec<CapturedClass>,
    pub enums: Vec<EnumDeclaration>,
    pub auxiliary_functions: IndexMap<String, FunctionDef>,
    pub constants: Vec<Constant>,
}

#[derive(Debug)]
struct ModuleVisitor<'a> {
    module_name: &'a str,
    record: ModuleRecord,
    options: &'a ConversionOptions,
}

impl ModuleVisitor<'_> {
    fn visit(&mut self, node: &Node) -> Result<(), ParsingError> {
        match &node.kind {
            NodeKind::Comment(_) => Ok(()),
            NodeKind::Import(_) | NodeKind::FromImport { .. } => {
                self.record.imports.push(node.clone());
                Ok(())
            }
            NodeKind::Class(class) => {
                if self.options.excluded_classes.contains(&class.name) {
                    debug!(
                        module = self.module_name,
                        class = class.name,
                        "skipping excluded class"
                    );
                    return Ok(());
                }
                ensure(
                    class.decorators.is_empty(),
                    || "Decorated class".into(),
                    node,
                    self,
                )?;
                let mut bases = Vec::with_capacity(class.bases.len());
                for base in &class.bases {
                    let Some(name) = base.as_name() else {
                        return Err(ParsingError::assertion(
                            format!("Base class {base} is not a name"),
                            node,
                            self,
                        ));
                    };
                    bases.push(name.to_string());
                }
                self.record.classes.push(CapturedClass {
                    name: class.name.clone(),
                    bases,
                    body: class.body.clone(),
                    line: node.line,
                });
                Ok(())
            }
            NodeKind::Def(function) => {
                if self.options.excluded_functions.contains(&function.name) {
                    debug!(
                        module = self.module_name,
                        function = function.name,
                        "skipping excluded helper"
                    );
                    return Ok(());
                }
                self.record
                    .auxiliary_functions
                    .insert(function.name.clone(), function.clone());
                Ok(())
            }
            NodeKind::Assignment {
                target,
                operator,
                value,
            } => self.assignment(node, target, operator, value),
            _ => Err(ParsingError::not_implemented(
                format!("Module visitor not declared for type=\"{}\"", node.tag()),
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
        ensure(operator.is_empty(), || "Augmented assignment".into(), node, self)?;
        let Some(name) = target.as_name() else {
            return Err(ParsingError::assertion("Assignment target is not a name", node, self));
        };
        if self.options.excluded_constants.iter().any(|c| c == name) {
            return Ok(());
        }
        let name = name.to_string();
        match &value.kind {
            NodeKind::Int(value) => {
                self.record.constants.push(Constant {
                    name,
                    value: ConstantValue::Int(*value),
                });
                Ok(())
            }
            NodeKind::Name(value) => {
                ensure(
                    value == "None",
                    || format!("Constant aliases {value}"),
                    node,
                    self,
                )?;
                self.record.constants.push(Constant {
                    name,
                    value: ConstantValue::None,
                });
                Ok(())
            }
            NodeKind::Atomtrailers(items) => match items[0].as_name() {
                Some("Enum") => {
                    let items = self.enum_items(node, items)?;
                    self.record.enums.push(EnumDeclaration { name, items });
                    Ok(())
                }
                Some("logging") => Ok(()),
                Some(_) => Err(ParsingError::not_implemented("Unknown atomtrailers", node, self)),
                None => Err(ParsingError::assertion(
                    "Atomtrailers base is not a name",
                    node,
                    self,
                )),
            },
            _ => Err(ParsingError::not_implemented("Unknown type", node, self)),
        }
    }

    /// `Enum([u'a', u'b', ...])`
    fn enum_items(&self, node: &Node, items: &[Node]) -> Result<Vec<String>, ParsingError> {
        ensure(items.len() == 2, || "Expected Enum([...])".into(), node, self)?;
        let NodeKind::Call(arguments) = &items[1].kind else {
            return Err(ParsingError::assertion("Expected Enum([...])", node, self));
        };
        let [argument] = arguments.as_slice() else {
            return Err(ParsingError::assertion("Enum takes one argument", node, self));
        };
        ensure(
            argument.target.is_none() && argument.kind == ArgumentKind::Plain,
            || "Enum argument must be positional".into(),
            node,
            self,
        )?;
        let NodeKind::List(elements) = &argument.value.kind else {
            return Err(ParsingError::assertion("Enum argument must be a list", node, self));
        };
        elements
            .iter()
            .map(|element| {
                element
                    .as_str()
                    .map(str::to_string)
                    .ok_or_else(|| {
                        ParsingError::assertion("Enum items must be strings", node, self)
                    })
            })
            .collect()
    }
}

/// Visits the top-level statements of one module. Any unrecognized statement aborts the
/// whole module.
pub fn parse_module(
    module_name: &str,
    statements: &[Node],
    options: &ConversionOptions,
) -> Result<ModuleRecord, ParsingError> {
    let mut visitor = ModuleVisitor {
        module_name,
        record: ModuleRecord::default(),
        options,
    };
    for node in statements {
        visitor.visit(node)?;
    }
    let record = visitor.record;
    debug!(
        module = module_name,
        classes = record.classes.len(),
        functions = record.auxiliary_functions.len(),
        constants = record.constants.len(),
        enums = record.enums.len(),
        "parsed module"
    );
    Ok(record)
}

pub fn parse_modules<'a>(
    trees: impl IntoIterator<Item = (&'a str, &'a [Node])>,
    options: &ConversionOptions,
) -> Result<IndexMap<String, ModuleRecord>, ParsingError> {
    let mut modules = IndexMap::new();
    for (name, statements) in trees {
        modules.insert(name.to_string(), parse_module(name, statements, options)?);
    }
    info!(modules = modules.len(), "module pass done");
    Ok(modules)
}
