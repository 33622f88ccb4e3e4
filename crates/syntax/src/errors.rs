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

use thiserror::Error;

/// Failures while turning source text into a syntax tree.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SyntaxError {
    #[error("Failure to parse source @ {line}/{column}: {message}")]
    ParseError {
        line: usize,
        column: usize,
        /// The offending logical line.
        context: String,
        message: String,
    },
    #[error("Failure to lex string literal @ line {line}: {message}")]
    StringLexError { line: usize, message: String },
    #[error("Inconsistent indentation @ line {line}: {message}")]
    IndentationError { line: usize, message: String },
    #[error("Definition not found in source: {0}")]
    DefinitionNotFound(String),
    #[error("Expected a single {expected} definition, found: {found}")]
    UnexpectedDefinition { expected: String, found: String },
}

impl SyntaxError {
    pub fn line(&self) -> Option<usize> {
        match self {
            SyntaxError::ParseError { line, .. }
            | SyntaxError::StringLexError { line, .. }
            | SyntaxError::IndentationError { line, .. } => Some(*line),
            SyntaxError::DefinitionNotFound(_) | SyntaxError::UnexpectedDefinition { .. } => None,
        }
    }
}
