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

//! Read-only view of the tax-benefit system the formulas are written against: the column
//! registry and the roles of each entity.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tracing::trace;

use crate::class_pass::ClassRecord;

/// Value type of a column, from the column class used to declare it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    Float,
    Int,
    Bool,
    Str,
    Date,
    Enum,
    Age,
}

impl ValueType {
    pub fn from_column_class(name: &str) -> Option<Self> {
        Some(match name {
            "FloatCol" => ValueType::Float,
            "IntCol" | "PeriodSizeIndependentIntCol" => ValueType::Int,
            "BoolCol" => ValueType::Bool,
            "StrCol" | "FixedStrCol" => ValueType::Str,
            "DateCol" => ValueType::Date,
            "EnumCol" => ValueType::Enum,
            "AgeCol" => ValueType::Age,
            _ => return None,
        })
    }
}

/// Entity key from the name of its class.
pub fn entity_name(entity_class: &str) -> Option<&'static str> {
    Some(match entity_class {
        "Familles" => "famille",
        "FoyersFiscaux" => "foyer_fiscal",
        "Individus" => "individus",
        "Menages" => "menage",
        _ => return None,
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub value_type: ValueType,
    /// Entity key, `individus` for person-level columns.
    pub entity: String,
    #[serde(default)]
    pub label: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxBenefitSystem {
    columns: IndexMap<String, Column>,
    /// Roles of each group entity, in ordinal order.
    roles: IndexMap<String, Vec<String>>,
    /// Names standing for several roles at once, such as `ENFS`.
    role_groups: IndexMap<String, Vec<String>>,
}

fn numbered(prefix: &str, count: usize) -> impl Iterator<Item = String> + '_ {
    (1..=count).map(move |i| format!("{prefix}{i}"))
}

impl Default for TaxBenefitSystem {
    fn default() -> Self {
        let roles = |first: &[&str], numbered_prefix: &str| -> Vec<String> {
            first
                .iter()
                .map(|r| r.to_string())
                .chain(numbered(numbered_prefix, 9))
                .collect()
        };
        let mut role_groups = IndexMap::new();
        role_groups.insert("ENFS".to_string(), numbered("ENF", 9).collect());
        Self {
            columns: IndexMap::new(),
            roles: IndexMap::from([
                ("famille".to_string(), roles(&["CHEF", "PART"], "ENF")),
                ("foyer_fiscal".to_string(), roles(&["VOUS", "CONJ"], "PAC")),
                ("menage".to_string(), roles(&["PREF", "CREF"], "ENF")),
            ]),
            role_groups,
        }
    }
}

impl TaxBenefitSystem {
    pub fn add_column(&mut self, column: Column) {
        self.columns.insert(column.name.clone(), column);
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.get(name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    pub fn columns(&self) -> impl Iterator<Item = &Column> {
        self.columns.values()
    }

    /// Registers the column a parsed class declares. Classes without a recognized column
    /// type or entity are not columns and are left out.
    pub fn register_class(&mut self, class_name: &str, class: &ClassRecord) -> Option<&Column> {
        let vars = &class.class_variables;
        let value_type = ValueType::from_column_class(&vars.column.as_ref()?.name)?;
        let entity = entity_name(vars.entity_class.as_deref()?)?;
        let label = vars
            .label
            .as_ref()
            .and_then(|label| label.as_str())
            .map(str::to_string);
        trace!(column = class_name, %value_type, entity, "registering column");
        self.add_column(Column {
            name: class_name.to_string(),
            value_type,
            entity: entity.to_string(),
            label,
        });
        self.columns.get(class_name)
    }

    /// All roles of a group entity.
    pub fn roles(&self, entity: &str) -> Option<&[String]> {
        self.roles.get(entity).map(Vec::as_slice)
    }

    /// The ordinal of a role within its entity.
    pub fn role_ordinal(&self, role: &str) -> Option<usize> {
        self.roles
            .values()
            .find_map(|roles| roles.iter().position(|r| r == role))
    }

    pub fn is_role(&self, name: &str) -> bool {
        self.role_ordinal(name).is_some() || self.role_groups.contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class_pass::{ClassVariables, ColumnDescriptor};
    use ofasg_syntax::parse_expression;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    #[test_case("CHEF", Some(0))]
    #[test_case("PART", Some(1))]
    #[test_case("VOUS", Some(0))]
    #[test_case("CONJ", Some(1))]
    #[test_case("PAC1", Some(2))]
    #[test_case("PAC3", Some(4))]
    #[test_case("PREF", Some(0))]
    #[test_case("CREF", Some(1))]
    #[test_case("ENFS", None)]
    #[test_case("salaire", None)]
    fn test_role_ordinal(role: &str, ordinal: Option<usize>) {
        assert_eq!(TaxBenefitSystem::default().role_ordinal(role), ordinal);
    }

    #[test]
    fn test_role_groups() {
        let system = TaxBenefitSystem::default();
        assert!(system.is_role("ENFS"));
        assert!(system.is_role("VOUS"));
        assert!(!system.is_role("period"));
        assert_eq!(system.roles("famille").unwrap()[..3], ["CHEF", "PART", "ENF1"]);
    }

    #[test]
    fn test_register_class() {
        let mut system = TaxBenefitSystem::default();
        let record = ClassRecord {
            class_variables: ClassVariables {
                column: Some(ColumnDescriptor {
                    name: "FloatCol".into(),
                    args: None,
                }),
                entity_class: Some("FoyersFiscaux".into()),
                label: Some(parse_expression("u'Revenu fiscal'").unwrap()),
                ..Default::default()
            },
            ..Default::default()
        };
        let column = system.register_class("rfr", &record).unwrap().clone();
        assert_eq!(
            column,
            Column {
                name: "rfr".into(),
                value_type: ValueType::Float,
                entity: "foyer_fiscal".into(),
                label: Some("Revenu fiscal".into()),
            }
        );
        assert!(system.has_column("rfr"));
        assert!(system.register_class("other", &ClassRecord::default()).is_none());
    }
}
