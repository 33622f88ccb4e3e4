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

//! Translation of OpenFisca formulas into an abstract semantic graph (ASG).
//!
//! The module pass sorts the top-level statements of a formula module, the class pass
//! reads the declarative attributes of each variable class, and the function pass
//! evaluates formula bodies symbolically into [`asg::Ofnode`] graphs. The [`wrapper`]
//! layer models a larger part of the host language with name resolution and type
//! guessing, and [`json_graph`] moves graphs to and from a generic exchange format.

pub mod analysis;
pub mod asg;
pub mod class_pass;
mod errors;
pub mod function_pass;
pub mod json_graph;
pub mod module_pass;
mod options;
pub mod pipeline;
pub mod record;
pub mod system;
pub mod wrapper;

pub use crate::asg::{NodeRef, NodeType, Ofnode};
pub use crate::class_pass::{ClassRecord, Date, parse_class, parse_classes, parse_date};
pub use crate::errors::{ConfigError, ErrorContext, GraphError, ParsingError, WrapperError};
pub use crate::function_pass::{FunctionContext, FunctionRecord, parse_function};
pub use crate::json_graph::{JsonGraph, asg_to_json_graph, json_graph_to_asg, nodes_to_json_graph};
pub use crate::module_pass::{ModuleRecord, parse_module, parse_modules};
pub use crate::options::ConversionOptions;
pub use crate::pipeline::{ConversionOutput, TooComplexRecord, convert_modules};
pub use crate::record::{Field, Record, flatten};
pub use crate::system::TaxBenefitSystem;
