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

use std::path::Path;

use figment::Figment;
use figment::providers::{Format, Json, Serialized, Yaml};
use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;

/// Knobs for the conversion passes.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversionOptions {
    /// Classes the module pass skips entirely.
    pub excluded_classes: Vec<String>,
    /// Module-level helper functions the module pass skips.
    pub excluded_functions: Vec<String>,
    /// Module-level constants the module pass skips.
    pub excluded_constants: Vec<String>,
    /// Free names evaluating to a pending arithmetic call in formula bodies.
    pub arithmetic_builtins: Vec<String>,
    /// Base classes marking a class as a formula for the wrapper layer, which then binds
    /// the parameters of its `function` methods by name.
    pub formula_base_classes: Vec<String>,
    /// Whether `x += y` in a formula body folds into an arithmetic operation over the
    /// previous binding of `x`. When off, augmented assignment is rejected.
    pub augmented_assignment: bool,
    /// Whether `(a + b) + c` becomes a single `+` over three operands. Applies to `+`, `*`,
    /// `and`, `or`, `&` and `|`.
    pub flatten_nested_operators: bool,
}

impl Default for ConversionOptions {
    fn default() -> Self {
        let strings = |items: &[&str]| items.iter().map(|s| s.to_string()).collect();
        Self {
            excluded_classes: strings(&["rsa_ressource_calculator"]),
            excluded_functions: strings(&["_revprim", "preload_zone_apl"]),
            excluded_constants: strings(&["zone_apl_by_depcom"]),
            arithmetic_builtins: strings(&[
                "round", "around", "sum", "not_", "or_", "and_", "min_", "max_", "mini", "maxi",
            ]),
            formula_base_classes: strings(&[
                "Variable",
                "DatedVariable",
                "SimpleFormulaColumn",
                "DatedFormulaColumn",
                "EntityToPersonColumn",
                "PersonToEntityColumn",
            ]),
            augmented_assignment: true,
            flatten_nested_operators: false,
        }
    }
}

impl ConversionOptions {
    /// Layers a YAML or JSON file (chosen by extension) over the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let figment = Figment::new().merge(Serialized::defaults(Self::default()));
        let figment = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => figment.merge(Json::file(path)),
            _ => figment.merge(Yaml::file(path)),
        };
        figment.extract().map_err(|e| ConfigError::Load(Box::new(e)))
    }

    pub fn is_arithmetic_builtin(&self, name: &str) -> bool {
        self.arithmetic_builtins.iter().any(|b| b == name)
    }
}
