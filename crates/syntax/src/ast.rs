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

/// A node of the host-language parse tree, with the line it starts on.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Node {
    pub kind: NodeKind,
    /// 1-based line of the node's first token in the source text.
    pub line: usize,
}

/// Parameter flavour, shared between `def` parameters and call arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ArgumentKind {
    Plain,
    /// `*args`
    List,
    /// `**kwargs`
    Dict,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DefArgument {
    pub name: String,
    pub default: Option<Node>,
    pub kind: ArgumentKind,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallArgument {
    /// Keyword name for `f(name=value)`.
    pub target: Option<String>,
    pub value: Node,
    pub kind: ArgumentKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportName {
    /// Dotted path, e.g. `openfisca_core.columns`.
    pub name: String,
    pub alias: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassDef {
    pub name: String,
    pub bases: Vec<Node>,
    pub decorators: Vec<Node>,
    pub body: Vec<Node>,
    pub end_line: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionDef {
    pub name: String,
    pub arguments: Vec<DefArgument>,
    pub decorators: Vec<Node>,
    pub body: Vec<Node>,
    pub end_line: usize,
}

/// One arm of an `if`/`elif`/`else` statement. `test` is `None` for the `else` arm.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IfBranch {
    pub test: Option<Node>,
    pub body: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum NodeKind {
    // Statements
    Comment(String),
    Import(Vec<ImportName>),
    FromImport {
        module: String,
        names: Vec<ImportName>,
    },
    Class(ClassDef),
    Def(FunctionDef),
    Assignment {
        target: Box<Node>,
        /// Empty for plain `=`, otherwise the operator of an augmented assignment (`+` for `+=`).
        operator: String,
        value: Box<Node>,
    },
    Return(Option<Box<Node>>),
    For {
        target: Box<Node>,
        iterator: Box<Node>,
        body: Vec<Node>,
    },
    While {
        test: Box<Node>,
        body: Vec<Node>,
    },
    If(Vec<IfBranch>),
    Pass,
    Break,
    Continue,

    // Expressions
    Name(String),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<Node>),
    Tuple(Vec<Node>),
    Dict(Vec<(Node, Node)>),
    AssociativeParenthesis(Box<Node>),
    /// A base expression followed by attribute, call and subscript segments. The first
    /// element is the base, attribute segments are `Name` nodes.
    Atomtrailers(Vec<Node>),
    Call(Vec<CallArgument>),
    Getitem(Box<Node>),
    BinaryOperator {
        op: String,
        first: Box<Node>,
        second: Box<Node>,
    },
    BooleanOperator {
        op: String,
        first: Box<Node>,
        second: Box<Node>,
    },
    Comparison {
        op: String,
        first: Box<Node>,
        second: Box<Node>,
    },
    UnitaryOperator {
        op: String,
        target: Box<Node>,
    },
    Ternary {
        value: Box<Node>,
        test: Box<Node>,
        orelse: Box<Node>,
    },
    Lambda {
        arguments: Vec<DefArgument>,
        value: Box<Node>,
    },
}

/// The tag of a node, as printed in diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "snake_case")]
pub enum Tag {
    Comment,
    Import,
    FromImport,
    Class,
    Def,
    Assignment,
    Return,
    For,
    While,
    If,
    Pass,
    Break,
    Continue,
    Name,
    Int,
    Float,
    String,
    List,
    Tuple,
    Dict,
    AssociativeParenthesis,
    Atomtrailers,
    Call,
    Getitem,
    BinaryOperator,
    BooleanOperator,
    Comparison,
    UnitaryOperator,
    TernaryOperator,
    Lambda,
}

impl Node {
    pub fn new(kind: NodeKind, line: usize) -> Self {
        Self { kind, line }
    }

    pub fn tag(&self) -> Tag {
        match &self.kind {
            NodeKind::Comment(_) => Tag::Comment,
            NodeKind::Import(_) => Tag::Import,
            NodeKind::FromImport { .. } => Tag::FromImport,
            NodeKind::Class(_) => Tag::Class,
            NodeKind::Def(_) => Tag::Def,
            NodeKind::Assignment { .. } => Tag::Assignment,
            NodeKind::Return(_) => Tag::Return,
            NodeKind::For { .. } => Tag::For,
            NodeKind::While { .. } => Tag::While,
            NodeKind::If(_) => Tag::If,
            NodeKind::Pass => Tag::Pass,
            NodeKind::Break => Tag::Break,
            NodeKind::Continue => Tag::Continue,
            NodeKind::Name(_) => Tag::Name,
            NodeKind::Int(_) => Tag::Int,
            NodeKind::Float(_) => Tag::Float,
            NodeKind::String(_) => Tag::String,
            NodeKind::List(_) => Tag::List,
            NodeKind::Tuple(_) => Tag::Tuple,
            NodeKind::Dict(_) => Tag::Dict,
            NodeKind::AssociativeParenthesis(_) => Tag::AssociativeParenthesis,
            NodeKind::Atomtrailers(_) => Tag::Atomtrailers,
            NodeKind::Call(_) => Tag::Call,
            NodeKind::Getitem(_) => Tag::Getitem,
            NodeKind::BinaryOperator { .. } => Tag::BinaryOperator,
            NodeKind::BooleanOperator { .. } => Tag::BooleanOperator,
            NodeKind::Comparison { .. } => Tag::Comparison,
            NodeKind::UnitaryOperator { .. } => Tag::UnitaryOperator,
            NodeKind::Ternary { .. } => Tag::TernaryOperator,
            NodeKind::Lambda { .. } => Tag::Lambda,
        }
    }

    /// The identifier if this is a bare `Name` node.
    pub fn as_name(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::Name(name) => Some(name),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match &self.kind {
            NodeKind::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::String(value) => Some(value),
            _ => None,
        }
    }

    /// Chain segments of an `Atomtrailers` node; a lone expression is its own one-element chain.
    pub fn chain(&self) -> &[Node] {
        match &self.kind {
            NodeKind::Atomtrailers(items) => items,
            _ => std::slice::from_ref(self),
        }
    }
}

impl Node {
    /// Visits this node and then every node below it, in source order.
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a Node)) {
        fn walk_all<'a>(nodes: &'a [Node], visit: &mut impl FnMut(&'a Node)) {
            for node in nodes {
                node.walk(visit);
            }
        }
        visit(self);
        match &self.kind {
            NodeKind::Comment(_)
            | NodeKind::Import(_)
            | NodeKind::FromImport { .. }
            | NodeKind::Pass
            | NodeKind::Break
            | NodeKind::Continue
            | NodeKind::Name(_)
            | NodeKind::Int(_)
            | NodeKind::Float(_)
            | NodeKind::String(_) => {}
            NodeKind::Class(class) => {
                walk_all(&class.decorators, visit);
                walk_all(&class.bases, visit);
                walk_all(&class.body, visit);
            }
            NodeKind::Def(function) => {
                walk_all(&function.decorators, visit);
                for argument in &function.arguments {
                    if let Some(default) = &argument.default {
                        default.walk(visit);
                    }
                }
                walk_all(&function.body, visit);
            }
            NodeKind::Assignment { target, value, .. } => {
                target.walk(visit);
                value.walk(visit);
            }
            NodeKind::Return(value) => {
                if let Some(value) = value {
                    value.walk(visit);
                }
            }
            NodeKind::For {
                target,
                iterator,
                body,
            } => {
                target.walk(visit);
                iterator.walk(visit);
                walk_all(body, visit);
            }
            NodeKind::While { test, body } => {
                test.walk(visit);
                walk_all(body, visit);
            }
            NodeKind::If(branches) => {
                for branch in branches {
                    if let Some(test) = &branch.test {
                        test.walk(visit);
                    }
                    walk_all(&branch.body, visit);
                }
            }
            NodeKind::List(items) | NodeKind::Tuple(items) | NodeKind::Atomtrailers(items) => {
                walk_all(items, visit)
            }
            NodeKind::Dict(pairs) => {
                for (key, value) in pairs {
                    key.walk(visit);
                    value.walk(visit);
                }
            }
            NodeKind::AssociativeParenthesis(inner) | NodeKind::Getitem(inner) => inner.walk(visit),
            NodeKind::Call(arguments) => {
                for argument in arguments {
                    argument.value.walk(visit);
                }
            }
            NodeKind::BinaryOperator { first, second, .. }
            | NodeKind::BooleanOperator { first, second, .. }
            | NodeKind::Comparison { first, second, .. } => {
                first.walk(visit);
                second.walk(visit);
            }
            NodeKind::UnitaryOperator { target, .. } => target.walk(visit),
            NodeKind::Ternary {
                value,
                test,
                orelse,
            } => {
                value.walk(visit);
                test.walk(visit);
                orelse.walk(visit);
            }
            NodeKind::Lambda { arguments, value } => {
                for argument in arguments {
                    if let Some(default) = &argument.default {
                        default.walk(visit);
                    }
                }
                value.walk(visit);
            }
        }
    }
}

impl std::fmt::Display for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&crate::unparse::unparse_node(self))
    }
}
