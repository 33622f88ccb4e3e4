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

use std::fmt::{Display, Formatter};

use ofasg_syntax::{Node, SyntaxError};
use thiserror::Error;

/// The offending syntax node and the visitor state it was met in.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorContext {
    pub node: Box<Node>,
    /// Debug rendering of the visitor state, for reproducing the failure.
    pub state: String,
}

impl Display for ErrorContext {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "line {}: `{}`", self.node.line, self.node)
    }
}

/// Failures of the module, class and function passes.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParsingError {
    /// A valid host construct with no mapping defined yet.
    #[error("Not implemented: {message} ({context})")]
    NotImplemented {
        message: String,
        context: ErrorContext,
    },
    /// The input did not have the expected shape.
    #[error("Assertion failed: {message} ({context})")]
    Assertion {
        message: String,
        context: ErrorContext,
    },
    /// A construct deliberately left unsupported. Batch drivers record these and move on.
    #[error("Function too complex: {message} ({context})")]
    TooComplex {
        message: String,
        context: ErrorContext,
    },
    #[error(transparent)]
    Syntax(#[from] SyntaxError),
}

impl ParsingError {
    pub fn not_implemented(
        message: impl Into<String>,
        node: &Node,
        state: &impl std::fmt::Debug,
    ) -> Self {
        ParsingError::NotImplemented {
            message: message.into(),
            context: ErrorContext {
                node: Box::new(node.clone()),
                state: format!("{state:?}"),
            },
        }
    }

    pub fn assertion(
        message: impl Into<String>,
        node: &Node,
        state: &impl std::fmt::Debug,
    ) -> Self {
        ParsingError::Assertion {
            message: message.into(),
            context: ErrorContext {
                node: Box::new(node.clone()),
                state: format!("{state:?}"),
            },
        }
    }

    pub fn too_complex(
        message: impl Into<String>,
        node: &Node,
        state: &impl std::fmt::Debug,
    ) -> Self {
        ParsingError::TooComplex {
            message: message.into(),
            context: ErrorContext {
                node: Box::new(node.clone()),
                state: format!("{state:?}"),
            },
        }
    }

    pub fn is_too_complex(&self) -> bool {
        matches!(self, ParsingError::TooComplex { .. })
    }

    pub fn message(&self) -> String {
        match self {
            ParsingError::NotImplemented { message, .. }
            | ParsingError::Assertion { message, .. }
            | ParsingError::TooComplex { message, .. } => message.clone(),
            ParsingError::Syntax(e) => e.to_string(),
        }
    }

    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            ParsingError::NotImplemented { context, .. }
            | ParsingError::Assertion { context, .. }
            | ParsingError::TooComplex { context, .. } => Some(context),
            ParsingError::Syntax(_) => None,
        }
    }
}

/// Fails with an assertion error unless `condition` holds.
pub fn ensure(
    condition: bool,
    message: impl FnOnce() -> String,
    node: &Node,
    state: &impl std::fmt::Debug,
) -> Result<(), ParsingError> {
    if condition {
        Ok(())
    } else {
        Err(ParsingError::assertion(message(), node, state))
    }
}

/// Failures of the general wrapper layer.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum WrapperError {
    #[error("Unexpected {found} at line {line} while parsing {construct}: `{source_text}`")]
    UnexpectedNode {
        construct: &'static str,
        found: String,
        line: usize,
        source_text: String,
    },
    #[error("Undefined variable `{name}` at line {line}")]
    UndefinedVariable { name: String, line: usize },
    #[error("Undefined input variable `{0}` in formula parameters")]
    UndefinedInputVariable(String),
    #[error("Not implemented at line {line}: {message}")]
    NotImplemented { message: String, line: usize },
    /// A formula was asked for from a class with no formula base class.
    #[error("`{0}` is not a formula class")]
    NotAFormulaClass(String),
    #[error(transparent)]
    Syntax(#[from] SyntaxError),
}

impl WrapperError {
    pub fn unexpected(construct: &'static str, node: &Node) -> Self {
        WrapperError::UnexpectedNode {
            construct,
            found: node.tag().to_string(),
            line: node.line,
            source_text: node.to_string(),
        }
    }
}

/// Failures converting to and from the graph exchange format.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("Cycle detected through node {0}")]
    Cycle(String),
    #[error("Unknown label : {0}")]
    UnknownLabel(String),
    #[error("Malformed graph: {0}")]
    Malformed(String),
    #[error("Field `{0}` mixes nodes and plain values")]
    MixedField(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Unable to load conversion options: {0}")]
    Load(#[from] Box<figment::Error>),
}
