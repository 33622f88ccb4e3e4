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

//! Syntax trees for the formula dialect of Python: a layout-aware pest parser, the
//! tree model consumed by the conversion passes, and an unparser for diagnostics.

#[macro_use]
extern crate pest_derive;

mod ast;
mod errors;
mod parse;
mod source;
mod unparse;

pub use ast::{
    ArgumentKind, CallArgument, ClassDef, DefArgument, FunctionDef, IfBranch, ImportName, Node,
    NodeKind, Tag,
};
pub use errors::SyntaxError;
pub use parse::{parse_expression, parse_source, unescape};
pub use source::{dedent, extract_definition, parse_class_source, parse_function_source};
pub use unparse::{quote_str, unparse, unparse_expr, unparse_node};
