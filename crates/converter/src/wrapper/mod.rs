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

//! The general wrapper layer: a fuller object model of the host language than the
//! function pass accepts. Every construct becomes a [`Wrapper`] in a [`WrapperTree`]
//! arena. Wrappers point at their enclosing scope (module, class, function or lambda)
//! through `container`, and names resolve by walking those links up to the module.
//!
//! Each wrapper carries a [`Guess`], a best-effort category inferred from a few pattern
//! rules when the wrapper is built.

mod builder;
mod dependencies;
mod guess;
mod source;

use std::ops::Index;

use indexmap::IndexMap;
use serde::Serialize;

use crate::system::ValueType;

pub use builder::WrapperBuilder;
pub use dependencies::formula_dependencies;
pub use guess::Guess;
pub use source::{
    class_from_source, formula_from_source, function_from_source, module_from_source,
    parse_module,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct WrapperId(usize);

impl WrapperId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Names bound in a scope, in binding order. Rebinding a name replaces its entry.
pub type Symbols = IndexMap<String, WrapperId>;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Wrapper {
    /// The enclosing scope. Only the module has none.
    pub container: Option<WrapperId>,
    pub line: usize,
    pub kind: WrapperKind,
    pub guess: Option<Guess>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Function {
    pub name: String,
    /// Set for methods of formula classes, whose parameters are bound by name.
    pub formula: bool,
    pub positional_parameters: Vec<String>,
    /// Parameters with a default, mapped to the default's wrapper.
    pub named_parameters: IndexMap<String, WrapperId>,
    pub star_parameter: Option<String>,
    pub keyword_parameter: Option<String>,
    pub decorators: Vec<WrapperId>,
    pub symbols: Symbols,
    pub body: Vec<WrapperId>,
    /// Every `return` statement met in the body, in source order.
    pub returns: Vec<WrapperId>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Branch {
    /// `None` for the `else` arm.
    pub test: Option<WrapperId>,
    pub body: Vec<WrapperId>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum WrapperKind {
    // Scopes
    Module {
        name: String,
        symbols: Symbols,
        body: Vec<WrapperId>,
        /// Modules named by `from x import *`, searched for otherwise unknown names.
        star_imports: Vec<String>,
    },
    Class {
        name: String,
        bases: Vec<String>,
        symbols: Symbols,
        body: Vec<WrapperId>,
    },
    Function(Function),
    Lambda {
        parameters: Vec<String>,
        symbols: Symbols,
        value: Option<WrapperId>,
    },

    // Statements
    Assignment {
        targets: Vec<WrapperId>,
        /// Empty for `=`, the arithmetic operator for augmented assignments.
        operator: String,
        values: Vec<WrapperId>,
    },
    Return {
        value: Option<WrapperId>,
    },
    If {
        branches: Vec<Branch>,
    },
    For {
        targets: Vec<WrapperId>,
        iterator: WrapperId,
        body: Vec<WrapperId>,
    },
    While {
        test: WrapperId,
        body: Vec<WrapperId>,
    },
    Pass,
    Break,
    Continue,
    Decorator {
        name: String,
        subject: WrapperId,
    },

    // Expressions
    /// A name, either read or bound. `value` is the wrapper the name stood for at that
    /// point of the program.
    Variable {
        name: String,
        value: Option<WrapperId>,
    },
    Attribute {
        subject: WrapperId,
        name: String,
    },
    Call {
        subject: WrapperId,
        positional_arguments: Vec<WrapperId>,
        named_arguments: IndexMap<String, WrapperId>,
        star_argument: Option<WrapperId>,
        keyword_argument: Option<WrapperId>,
    },
    Key {
        subject: WrapperId,
        value: WrapperId,
    },
    BinaryOperation {
        operator: String,
        left: WrapperId,
        right: WrapperId,
    },
    BooleanOperation {
        operator: String,
        left: WrapperId,
        right: WrapperId,
    },
    Comparison {
        operator: String,
        left: WrapperId,
        right: WrapperId,
    },
    UnaryOperation {
        operator: String,
        operand: WrapperId,
    },
    Ternary {
        test: WrapperId,
        value: WrapperId,
        orelse: WrapperId,
    },
    Number {
        value: String,
    },
    String {
        value: String,
    },
    Tuple {
        items: Vec<WrapperId>,
    },
    List {
        items: Vec<WrapperId>,
    },
    Dict {
        items: Vec<(WrapperId, WrapperId)>,
    },

    // Values standing behind names
    /// A parameter of an ordinary function.
    Argument {
        name: String,
    },
    /// A name imported from another module.
    External {
        module: Option<String>,
        name: String,
    },
    Builtin {
        name: String,
    },
    Type {
        name: String,
    },
    Enum {
        name: String,
        items: Vec<String>,
    },
    Period,
    Instant,
    Simulation,
    Formula,
    Holder,
    Entity,
    Logger,
    Math,
    Date,
    DateTime64,
    LawNode {
        is_reference: bool,
    },
    Array {
        column: String,
        value_type: ValueType,
        entity: String,
    },
    DatedHolder {
        column: String,
        value_type: ValueType,
        entity: String,
    },
}

impl WrapperKind {
    fn symbols(&self) -> Option<&Symbols> {
        match self {
            WrapperKind::Module { symbols, .. }
            | WrapperKind::Class { symbols, .. }
            | WrapperKind::Lambda { symbols, .. } => Some(symbols),
            WrapperKind::Function(function) => Some(&function.symbols),
            _ => None,
        }
    }

    fn symbols_mut(&mut self) -> Option<&mut Symbols> {
        match self {
            WrapperKind::Module { symbols, .. }
            | WrapperKind::Class { symbols, .. }
            | WrapperKind::Lambda { symbols, .. } => Some(symbols),
            WrapperKind::Function(function) => Some(&mut function.symbols),
            _ => None,
        }
    }

    /// Wrappers owned by this one. Names read through a `Variable` are references and
    /// are not included.
    pub fn children(&self) -> Vec<WrapperId> {
        match self {
            WrapperKind::Module { body, .. } | WrapperKind::Class { body, .. } => body.clone(),
            WrapperKind::Function(function) => function
                .decorators
                .iter()
                .chain(function.named_parameters.values())
                .chain(&function.body)
                .copied()
                .collect(),
            WrapperKind::Lambda { value, .. } => value.iter().copied().collect(),
            WrapperKind::Assignment {
                targets, values, ..
            } => targets.iter().chain(values).copied().collect(),
            WrapperKind::Return { value } => value.iter().copied().collect(),
            WrapperKind::If { branches } => branches
                .iter()
                .flat_map(|branch| branch.test.iter().chain(&branch.body))
                .copied()
                .collect(),
            WrapperKind::For {
                targets,
                iterator,
                body,
            } => targets
                .iter()
                .chain(std::iter::once(iterator))
                .chain(body)
                .copied()
                .collect(),
            WrapperKind::While { test, body } => {
                std::iter::once(test).chain(body).copied().collect()
            }
            WrapperKind::Decorator { subject, .. } | WrapperKind::Attribute { subject, .. } => {
                vec![*subject]
            }
            WrapperKind::Call {
                subject,
                positional_arguments,
                named_arguments,
                star_argument,
                keyword_argument,
            } => std::iter::once(subject)
                .chain(positional_arguments)
                .chain(named_arguments.values())
                .chain(star_argument)
                .chain(keyword_argument)
                .copied()
                .collect(),
            WrapperKind::Key { subject, value } => vec![*subject, *value],
            WrapperKind::BinaryOperation { left, right, .. }
            | WrapperKind::BooleanOperation { left, right, .. }
            | WrapperKind::Comparison { left, right, .. } => vec![*left, *right],
            WrapperKind::UnaryOperation { operand, .. } => vec![*operand],
            WrapperKind::Ternary {
                test,
                value,
                orelse,
            } => vec![*value, *test, *orelse],
            WrapperKind::Tuple { items } | WrapperKind::List { items } => items.clone(),
            WrapperKind::Dict { items } => items.iter().flat_map(|(k, v)| [*k, *v]).collect(),
            _ => vec![],
        }
    }
}

/// Arena holding every wrapper of one module. The module itself is the first entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WrapperTree {
    wrappers: Vec<Wrapper>,
}

impl Index<WrapperId> for WrapperTree {
    type Output = Wrapper;

    fn index(&self, id: WrapperId) -> &Wrapper {
        &self.wrappers[id.0]
    }
}

impl WrapperTree {
    pub fn root(&self) -> WrapperId {
        WrapperId(0)
    }

    pub fn len(&self) -> usize {
        self.wrappers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wrappers.is_empty()
    }

    pub fn get(&self, id: WrapperId) -> Option<&Wrapper> {
        self.wrappers.get(id.0)
    }

    pub fn kind(&self, id: WrapperId) -> &WrapperKind {
        &self[id].kind
    }

    pub fn guess(&self, id: WrapperId) -> Option<Guess> {
        self.get(id).and_then(|w| w.guess)
    }

    pub fn container(&self, id: WrapperId) -> Option<WrapperId> {
        self.get(id).and_then(|w| w.container)
    }

    pub fn symbols(&self, scope: WrapperId) -> Option<&Symbols> {
        self.get(scope).and_then(|w| w.kind.symbols())
    }

    pub fn function(&self, id: WrapperId) -> Option<&Function> {
        match self.get(id).map(|w| &w.kind) {
            Some(WrapperKind::Function(function)) => Some(function),
            _ => None,
        }
    }

    /// Looks `name` up in `scope`, then in each enclosing scope up to the module.
    pub fn get_variable(&self, scope: WrapperId, name: &str) -> Option<WrapperId> {
        let mut current = Some(scope);
        while let Some(id) = current {
            if let Some(found) = self.symbols(id).and_then(|symbols| symbols.get(name)) {
                return Some(*found);
            }
            current = self.container(id);
        }
        None
    }

    pub fn has_variable(&self, scope: WrapperId, name: &str) -> bool {
        self.get_variable(scope, name).is_some()
    }

    /// Follows `Variable` values down to the wrapper a name finally stands for.
    pub fn resolve(&self, mut id: WrapperId) -> WrapperId {
        // Bounded by the arena size so a self-referencing binding cannot loop.
        for _ in 0..self.wrappers.len() {
            match self.kind(id) {
                WrapperKind::Variable {
                    value: Some(value), ..
                } => id = *value,
                _ => break,
            }
        }
        id
    }

    /// The closest function or lambda enclosing `id`, `id` included.
    pub fn containing_function(&self, id: WrapperId) -> Option<WrapperId> {
        self.ancestors(id).find(|a| {
            matches!(
                self.kind(*a),
                WrapperKind::Function(_) | WrapperKind::Lambda { .. }
            )
        })
    }

    pub fn containing_class(&self, id: WrapperId) -> Option<WrapperId> {
        self.ancestors(id)
            .find(|a| matches!(self.kind(*a), WrapperKind::Class { .. }))
    }

    fn ancestors(&self, id: WrapperId) -> impl Iterator<Item = WrapperId> + '_ {
        std::iter::successors(Some(id), |a| self.container(*a))
    }

    /// A top-level function, or a method when `class` is given.
    pub fn find_function(&self, class: Option<&str>, name: &str) -> Option<WrapperId> {
        let scope = match class {
            Some(class) => *self.symbols(self.root())?.get(class)?,
            None => self.root(),
        };
        let id = *self.symbols(scope)?.get(name)?;
        self.function(id).map(|_| id)
    }

    /// Every wrapper owned, directly or not, by `id`, in preorder.
    pub fn descendants(&self, id: WrapperId) -> Vec<WrapperId> {
        let mut found = vec![];
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            found.push(current);
            stack.extend(self.kind(current).children().into_iter().rev());
        }
        found
    }

    pub(crate) fn push(
        &mut self,
        container: Option<WrapperId>,
        line: usize,
        kind: WrapperKind,
    ) -> WrapperId {
        let guess = guess::infer(self, &kind);
        self.wrappers.push(Wrapper {
            container,
            line,
            kind,
            guess,
        });
        WrapperId(self.wrappers.len() - 1)
    }

    pub(crate) fn kind_mut(&mut self, id: WrapperId) -> &mut WrapperKind {
        &mut self.wrappers[id.0].kind
    }

    pub(crate) fn function_mut(&mut self, id: WrapperId) -> Option<&mut Function> {
        match self.kind_mut(id) {
            WrapperKind::Function(function) => Some(function),
            _ => None,
        }
    }

    /// Binds `name` in `scope`, which must be a module, class, function or lambda.
    pub(crate) fn bind(&mut self, scope: WrapperId, name: &str, value: WrapperId) {
        if let Some(symbols) = self.kind_mut(scope).symbols_mut() {
            symbols.insert(name.to_string(), value);
        }
    }

    /// Fills the value slot of a variable declared ahead of its assignment.
    pub(crate) fn set_value(&mut self, variable: WrapperId, new_value: WrapperId) {
        if let WrapperKind::Variable { value, .. } = self.kind_mut(variable) {
            *value = Some(new_value);
        }
        self.refresh_guess(variable);
    }

    pub(crate) fn refresh_guess(&mut self, id: WrapperId) {
        let guess = guess::infer(self, self.kind(id));
        self.wrappers[id.0].guess = guess;
    }
}
