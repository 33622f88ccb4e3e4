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

use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;
use ofasg_syntax::{
    ArgumentKind, CallArgument, ClassDef, DefArgument, FunctionDef, Node, NodeKind,
};
use tracing::{debug, trace};

use super::{Branch, Function, WrapperId, WrapperKind, WrapperTree};
use crate::errors::WrapperError;
use crate::options::ConversionOptions;
use crate::system::TaxBenefitSystem;

const BUILTINS: [&str; 27] = [
    "abs", "all", "any", "bool", "dict", "enumerate", "float", "getattr", "hasattr", "int",
    "isinstance", "len", "list", "max", "min", "range", "round", "set", "sorted", "str", "sum",
    "tuple", "zip", "None", "__name__", "NotImplementedError", "ValueError",
];

/// Fixed role numbers of the legacy formula modules.
const ROLE_DEFAULTS: [(&str, &str); 10] = [
    ("CHEF", "0"),
    ("CONJ", "1"),
    ("CREF", "1"),
    ("PAC1", "2"),
    ("PAC2", "3"),
    ("PAC3", "4"),
    ("PART", "1"),
    ("PREF", "0"),
    ("TAUX_DE_PRIME", "0.25"),
    ("VOUS", "0"),
];

/// What phase one created for a top-level statement.
#[derive(Debug, Clone)]
enum Declared {
    Function(WrapperId),
    Class(WrapperId),
    /// Name targets of a plain assignment, with their value slots still empty.
    Variables(Vec<WrapperId>),
    Nothing,
}

/// Builds the wrappers of one module into a [`WrapperTree`].
pub struct WrapperBuilder<'a> {
    tree: WrapperTree,
    system: &'a TaxBenefitSystem,
    options: &'a ConversionOptions,
    /// Top-level functions declared but not parsed yet.
    pending: HashMap<WrapperId, FunctionDef>,
    /// Functions whose body is being parsed, so recursive calls stop there.
    in_progress: HashSet<WrapperId>,
}

impl<'a> WrapperBuilder<'a> {
    /// Starts a tree holding only the module and its default symbols.
    pub fn new(
        module_name: &str,
        system: &'a TaxBenefitSystem,
        options: &'a ConversionOptions,
    ) -> Self {
        let mut tree = WrapperTree::default();
        let module = tree.push(
            None,
            0,
            WrapperKind::Module {
                name: module_name.to_string(),
                symbols: IndexMap::new(),
                body: vec![],
                star_imports: vec![],
            },
        );
        let mut builder = Self {
            tree,
            system,
            options,
            pending: HashMap::new(),
            in_progress: HashSet::new(),
        };
        builder.declare_defaults(module);
        builder
    }

    pub fn tree(&self) -> &WrapperTree {
        &self.tree
    }

    pub fn finish(self) -> WrapperTree {
        self.tree
    }

    fn declare_defaults(&mut self, module: WrapperId) {
        let mut defaults: Vec<(String, WrapperKind)> = ROLE_DEFAULTS
            .iter()
            .map(|(name, value)| {
                (
                    name.to_string(),
                    WrapperKind::Number {
                        value: value.to_string(),
                    },
                )
            })
            .collect();
        defaults.extend([
            ("True".to_string(), number("True")),
            ("False".to_string(), number("False")),
            (
                "law".to_string(),
                WrapperKind::LawNode {
                    is_reference: false,
                },
            ),
            ("log".to_string(), WrapperKind::Logger),
            ("math".to_string(), WrapperKind::Math),
            ("int16".to_string(), type_named("int16")),
            ("int32".to_string(), type_named("int32")),
            (
                "CAT".to_string(),
                WrapperKind::Enum {
                    name: "CAT".to_string(),
                    items: vec![],
                },
            ),
        ]);
        for name in BUILTINS
            .iter()
            .map(|b| b.to_string())
            .chain(self.options.arithmetic_builtins.iter().cloned())
        {
            defaults.push((name.clone(), WrapperKind::Builtin { name }));
        }
        for (name, kind) in defaults {
            if !self.tree.has_variable(module, &name) {
                let id = self.tree.push(Some(module), 0, kind);
                self.tree.bind(module, &name, id);
            }
        }
        // Roles without a fixed number take their ordinal in the entity.
        let system = self.system;
        for roles in ["famille", "foyer_fiscal", "menage"]
            .into_iter()
            .filter_map(|entity| system.roles(entity))
        {
            for role in roles {
                if self.tree.has_variable(module, role) {
                    continue;
                }
                if let Some(ordinal) = system.role_ordinal(role) {
                    let id = self.tree.push(Some(module), 0, number(&ordinal.to_string()));
                    self.tree.bind(module, role, id);
                }
            }
        }
    }

    /// Builds every top-level statement. Phase one declares functions, classes,
    /// imports and constants so that bodies can refer to names defined further down.
    /// Phase two evaluates top-level statements, then parses class and function bodies.
    /// A function is parsed the first time its name is used, so callers always see
    /// its returns whatever the definition order.
    pub fn build_module(&mut self, statements: &[Node]) -> Result<(), WrapperError> {
        let module = self.tree.root();
        let declared = self.declare(module, statements)?;
        let mut body: Vec<Vec<WrapperId>> = vec![vec![]; statements.len()];
        for (index, (statement, declared)) in statements.iter().zip(&declared).enumerate() {
            match declared {
                Declared::Function(_) | Declared::Class(_) => {}
                Declared::Variables(variables) => {
                    body[index].push(self.define_constant(module, statement, variables)?);
                }
                Declared::Nothing => body[index] = self.parse_statement(module, statement)?,
            }
        }
        for (index, (statement, declared)) in statements.iter().zip(&declared).enumerate() {
            match (declared, &statement.kind) {
                (Declared::Function(id), NodeKind::Def(_)) => {
                    self.ensure_parsed(*id)?;
                    body[index].push(*id);
                }
                (Declared::Class(id), NodeKind::Class(class)) => {
                    self.define_class(*id, class)?;
                    body[index].push(*id);
                }
                _ => {}
            }
        }
        let body = body.into_iter().flatten().collect::<Vec<_>>();
        if let WrapperKind::Module { body: slot, .. } = self.tree.kind_mut(module) {
            *slot = body;
        }
        debug!(wrappers = self.tree.len(), "module built");
        Ok(())
    }

    /// Phase one over top-level statements.
    fn declare(
        &mut self,
        module: WrapperId,
        statements: &[Node],
    ) -> Result<Vec<Declared>, WrapperError> {
        let mut declared = Vec::with_capacity(statements.len());
        for statement in statements {
            let item = match &statement.kind {
                NodeKind::Def(def) => {
                    let id = self.function_shell(module, statement.line, &def.name);
                    self.pending.insert(id, def.clone());
                    Declared::Function(id)
                }
                NodeKind::Class(class) => {
                    let id = self.tree.push(
                        Some(module),
                        statement.line,
                        WrapperKind::Class {
                            name: class.name.clone(),
                            bases: class.bases.iter().map(|b| b.to_string()).collect(),
                            symbols: IndexMap::new(),
                            body: vec![],
                        },
                    );
                    self.tree.bind(module, &class.name, id);
                    Declared::Class(id)
                }
                NodeKind::Import(_) | NodeKind::FromImport { .. } => {
                    self.import(module, statement)?;
                    Declared::Nothing
                }
                NodeKind::Assignment {
                    target,
                    operator,
                    value: _,
                } if operator.is_empty() && is_name_target(target) => {
                    let mut variables = vec![];
                    for name in target_names(target) {
                        let id = self.tree.push(
                            Some(module),
                            statement.line,
                            WrapperKind::Variable {
                                name: name.to_string(),
                                value: None,
                            },
                        );
                        self.tree.bind(module, name, id);
                        variables.push(id);
                    }
                    Declared::Variables(variables)
                }
                _ => Declared::Nothing,
            };
            declared.push(item);
        }
        Ok(declared)
    }

    /// Declares the names of a module without evaluating anything but its constants.
    /// Its functions are parsed when first referred to.
    pub fn declare_module(&mut self, statements: &[Node]) -> Result<(), WrapperError> {
        let module = self.tree.root();
        let declared = self.declare(module, statements)?;
        for (statement, declared) in statements.iter().zip(&declared) {
            if let Declared::Variables(variables) = declared {
                self.define_constant(module, statement, variables)?;
            }
        }
        Ok(())
    }

    /// Parses a declared function's body unless it is done or under way.
    fn ensure_parsed(&mut self, id: WrapperId) -> Result<(), WrapperError> {
        if self.in_progress.contains(&id) {
            return Ok(());
        }
        let Some(def) = self.pending.remove(&id) else {
            return Ok(());
        };
        trace!(function = %def.name, "parsing function on first use");
        self.in_progress.insert(id);
        let result = self.define_function(id, &def, false);
        self.in_progress.remove(&id);
        result
    }

    fn function_shell(&mut self, scope: WrapperId, line: usize, name: &str) -> WrapperId {
        let id = self.tree.push(
            Some(scope),
            line,
            WrapperKind::Function(Function {
                name: name.to_string(),
                ..Function::default()
            }),
        );
        self.tree.bind(scope, name, id);
        id
    }

    fn define_constant(
        &mut self,
        scope: WrapperId,
        node: &Node,
        variables: &[WrapperId],
    ) -> Result<WrapperId, WrapperError> {
        let NodeKind::Assignment { target, value, .. } = &node.kind else {
            return Err(WrapperError::unexpected("assignment", node));
        };
        let values = self.assigned_values(scope, target, value)?;
        for (variable, value) in variables.iter().zip(&values) {
            if let Some(value) = value {
                self.tree.set_value(*variable, *value);
            }
        }
        Ok(self.tree.push(
            Some(scope),
            node.line,
            WrapperKind::Assignment {
                targets: variables.to_vec(),
                operator: String::new(),
                values: values.into_iter().flatten().collect(),
            },
        ))
    }

    fn import(&mut self, scope: WrapperId, node: &Node) -> Result<(), WrapperError> {
        match &node.kind {
            NodeKind::Import(names) => {
                for import in names {
                    let (bound, module) = match &import.alias {
                        Some(alias) => (alias.as_str(), import.name.as_str()),
                        // `import a.b` binds `a`.
                        None => {
                            let head = import.name.split('.').next().unwrap_or(&import.name);
                            (head, head)
                        }
                    };
                    let id = self.tree.push(
                        Some(scope),
                        node.line,
                        WrapperKind::External {
                            module: Some(module.to_string()),
                            name: module.to_string(),
                        },
                    );
                    self.tree.bind(scope, bound, id);
                }
                Ok(())
            }
            NodeKind::FromImport { module, names } => {
                for import in names {
                    if import.name == "*" {
                        let root = self.tree.root();
                        if let WrapperKind::Module { star_imports, .. } = self.tree.kind_mut(root) {
                            star_imports.push(module.clone());
                        }
                        continue;
                    }
                    let id = self.tree.push(
                        Some(scope),
                        node.line,
                        WrapperKind::External {
                            module: Some(module.clone()),
                            name: import.name.clone(),
                        },
                    );
                    self.tree
                        .bind(scope, import.alias.as_deref().unwrap_or(&import.name), id);
                }
                Ok(())
            }
            _ => Err(WrapperError::unexpected("import", node)),
        }
    }

    fn define_class(&mut self, id: WrapperId, class: &ClassDef) -> Result<(), WrapperError> {
        let formula = class.bases.iter().any(|base| {
            base.chain()
                .last()
                .and_then(|segment| segment.as_name())
                .is_some_and(|name| self.options.formula_base_classes.iter().any(|b| b == name))
        });
        trace!(class = %class.name, formula, "defining class");
        let mut body = vec![];
        for statement in &class.body {
            match &statement.kind {
                NodeKind::Def(def) => {
                    let method = self.function_shell(id, statement.line, &def.name);
                    self.define_function(method, def, formula)?;
                    body.push(method);
                }
                NodeKind::String(_) | NodeKind::Comment(_) => {}
                _ => body.extend(self.parse_statement(id, statement)?),
            }
        }
        if let WrapperKind::Class { body: slot, .. } = self.tree.kind_mut(id) {
            *slot = body;
        }
        Ok(())
    }

    /// Fills a function declared by [`Self::function_shell`]: decorators, parameters and
    /// body. Formula functions bind their parameters to the values OpenFisca passes in.
    pub(crate) fn define_function(
        &mut self,
        id: WrapperId,
        def: &FunctionDef,
        formula: bool,
    ) -> Result<(), WrapperError> {
        let scope = self.tree.container(id).unwrap_or(self.tree.root());
        let mut decorators = vec![];
        for decorator in &def.decorators {
            let subject = self.parse_value(scope, decorator)?;
            let name = decorator
                .chain()
                .first()
                .and_then(|head| head.as_name())
                .unwrap_or_default()
                .to_string();
            decorators.push(self.tree.push(
                Some(scope),
                decorator.line,
                WrapperKind::Decorator { name, subject },
            ));
        }
        let mut function = Function {
            name: def.name.clone(),
            formula,
            decorators,
            ..Function::default()
        };
        let mut bindings = vec![];
        for DefArgument {
            name,
            default,
            kind,
        } in &def.arguments
        {
            match (kind, default) {
                (ArgumentKind::Plain, Some(default)) => {
                    let value = self.parse_value(scope, default)?;
                    function.named_parameters.insert(name.clone(), value);
                    bindings.push((name.clone(), value));
                }
                (ArgumentKind::Plain, None) => {
                    function.positional_parameters.push(name.clone());
                    let value = if formula {
                        self.formula_parameter(id, name)?
                    } else {
                        self.argument(id, name)
                    };
                    bindings.push((name.clone(), value));
                }
                (ArgumentKind::List, _) => {
                    function.star_parameter = Some(name.clone());
                    bindings.push((name.clone(), self.argument(id, name)));
                }
                (ArgumentKind::Dict, _) => {
                    function.keyword_parameter = Some(name.clone());
                    bindings.push((name.clone(), self.argument(id, name)));
                }
            }
        }
        function.symbols = bindings.into_iter().collect();
        *self.tree.kind_mut(id) = WrapperKind::Function(function);
        let body = self.parse_suite(id, &def.body)?;
        if let Some(function) = self.tree.function_mut(id) {
            function.body = body;
        }
        self.tree.refresh_guess(id);
        Ok(())
    }

    fn argument(&mut self, scope: WrapperId, name: &str) -> WrapperId {
        self.tree.push(
            Some(scope),
            0,
            WrapperKind::Argument {
                name: name.to_string(),
            },
        )
    }

    /// The value OpenFisca passes for a formula parameter, chosen by its name.
    fn formula_parameter(
        &mut self,
        scope: WrapperId,
        name: &str,
    ) -> Result<WrapperId, WrapperError> {
        let kind = match name {
            "self" => WrapperKind::Formula,
            "simulation" => WrapperKind::Simulation,
            "period" => WrapperKind::Period,
            "_P" | "_defaultP" => WrapperKind::LawNode {
                is_reference: name == "_defaultP",
            },
            _ => {
                let (column_name, holder) = match name.strip_suffix("_holder") {
                    Some(column_name) => (column_name, true),
                    None => (name, false),
                };
                let column = self
                    .system
                    .column(column_name)
                    .ok_or_else(|| WrapperError::UndefinedInputVariable(name.to_string()))?;
                let (column, value_type, entity) =
                    (column.name.clone(), column.value_type, column.entity.clone());
                if holder {
                    WrapperKind::DatedHolder {
                        column,
                        value_type,
                        entity,
                    }
                } else {
                    WrapperKind::Array {
                        column,
                        value_type,
                        entity,
                    }
                }
            }
        };
        Ok(self.tree.push(Some(scope), 0, kind))
    }

    /// Parses a block of statements in `scope`.
    pub fn parse_suite(
        &mut self,
        scope: WrapperId,
        statements: &[Node],
    ) -> Result<Vec<WrapperId>, WrapperError> {
        let mut body = vec![];
        for statement in statements {
            body.extend(self.parse_statement(scope, statement)?);
        }
        Ok(body)
    }

    /// One statement. Comments and imports leave nothing in the body.
    fn parse_statement(
        &mut self,
        scope: WrapperId,
        node: &Node,
    ) -> Result<Vec<WrapperId>, WrapperError> {
        let line = node.line;
        let id = match &node.kind {
            NodeKind::Comment(_) => return Ok(vec![]),
            NodeKind::Import(_) | NodeKind::FromImport { .. } => {
                self.import(scope, node)?;
                return Ok(vec![]);
            }
            NodeKind::Assignment {
                target,
                operator,
                value,
            } => self.assignment(scope, node, target, operator, value)?,
            NodeKind::Return(value) => {
                let function = self
                    .tree
                    .containing_function(scope)
                    .ok_or_else(|| WrapperError::unexpected("function body", node))?;
                let value = match value {
                    Some(value) => Some(self.parse_value(scope, value)?),
                    None => None,
                };
                let id = self.tree.push(Some(scope), line, WrapperKind::Return { value });
                if let Some(function) = self.tree.function_mut(function) {
                    function.returns.push(id);
                }
                id
            }
            NodeKind::If(branches) => {
                let mut parsed = vec![];
                for branch in branches {
                    let test = match &branch.test {
                        Some(test) => Some(self.parse_value(scope, test)?),
                        None => None,
                    };
                    let body = self.parse_suite(scope, &branch.body)?;
                    parsed.push(Branch { test, body });
                }
                self.tree
                    .push(Some(scope), line, WrapperKind::If { branches: parsed })
            }
            NodeKind::For {
                target,
                iterator,
                body,
            } => {
                let iterator = self.parse_value(scope, iterator)?;
                let mut targets = vec![];
                for name in target_names(target) {
                    let variable = self.tree.push(
                        Some(scope),
                        target.line,
                        WrapperKind::Variable {
                            name: name.to_string(),
                            value: None,
                        },
                    );
                    self.tree.bind(scope, name, variable);
                    targets.push(variable);
                }
                let body = self.parse_suite(scope, body)?;
                self.tree.push(
                    Some(scope),
                    line,
                    WrapperKind::For {
                        targets,
                        iterator,
                        body,
                    },
                )
            }
            NodeKind::While { test, body } => {
                let test = self.parse_value(scope, test)?;
                let body = self.parse_suite(scope, body)?;
                self.tree
                    .push(Some(scope), line, WrapperKind::While { test, body })
            }
            NodeKind::Pass => self.tree.push(Some(scope), line, WrapperKind::Pass),
            NodeKind::Break => self.tree.push(Some(scope), line, WrapperKind::Break),
            NodeKind::Continue => self.tree.push(Some(scope), line, WrapperKind::Continue),
            NodeKind::Def(def) => {
                let id = self.function_shell(scope, line, &def.name);
                self.define_function(id, def, false)?;
                id
            }
            NodeKind::Class(class) => {
                let id = self.tree.push(
                    Some(scope),
                    line,
                    WrapperKind::Class {
                        name: class.name.clone(),
                        bases: class.bases.iter().map(|b| b.to_string()).collect(),
                        symbols: IndexMap::new(),
                        body: vec![],
                    },
                );
                self.tree.bind(scope, &class.name, id);
                self.define_class(id, class)?;
                id
            }
            _ => self.parse_value(scope, node)?,
        };
        Ok(vec![id])
    }

    /// Right-hand values for each name of `target`. A tuple assigned to a tuple pairs up
    /// item by item; otherwise the only value goes to the only name.
    fn assigned_values(
        &mut self,
        scope: WrapperId,
        target: &Node,
        value: &Node,
    ) -> Result<Vec<Option<WrapperId>>, WrapperError> {
        match (&target.kind, &value.kind) {
            (NodeKind::Tuple(targets), NodeKind::Tuple(values)) => {
                if targets.len() != values.len() {
                    return Err(WrapperError::NotImplemented {
                        message: format!(
                            "unpacking {} values into {} names",
                            values.len(),
                            targets.len()
                        ),
                        line: value.line,
                    });
                }
                values
                    .iter()
                    .map(|v| self.parse_value(scope, v).map(Some))
                    .collect()
            }
            (NodeKind::Tuple(targets), _) => {
                // The value is parsed for its own sake; the names stay unbound to it.
                self.parse_value(scope, value)?;
                Ok(vec![None; targets.len()])
            }
            _ => Ok(vec![Some(self.parse_value(scope, value)?)]),
        }
    }

    fn assignment(
        &mut self,
        scope: WrapperId,
        node: &Node,
        target: &Node,
        operator: &str,
        value: &Node,
    ) -> Result<WrapperId, WrapperError> {
        if !operator.is_empty() {
            let Some(name) = target.as_name() else {
                return Err(WrapperError::unexpected("augmented assignment", target));
            };
            let previous = self.name(scope, name, target.line)?;
            let right = self.parse_value(scope, value)?;
            let combined = self.tree.push(
                Some(scope),
                node.line,
                WrapperKind::BinaryOperation {
                    operator: operator.to_string(),
                    left: previous,
                    right,
                },
            );
            let variable = self.tree.push(
                Some(scope),
                target.line,
                WrapperKind::Variable {
                    name: name.to_string(),
                    value: Some(combined),
                },
            );
            self.tree.bind(scope, name, variable);
            return Ok(self.tree.push(
                Some(scope),
                node.line,
                WrapperKind::Assignment {
                    targets: vec![variable],
                    operator: operator.to_string(),
                    values: vec![right],
                },
            ));
        }
        if !is_name_target(target) {
            // Item or attribute assignment, such as `x[condition] = 0`.
            let target = self.parse_value(scope, target)?;
            let value = self.parse_value(scope, value)?;
            return Ok(self.tree.push(
                Some(scope),
                node.line,
                WrapperKind::Assignment {
                    targets: vec![target],
                    operator: String::new(),
                    values: vec![value],
                },
            ));
        }
        let values = self.assigned_values(scope, target, value)?;
        let mut targets = vec![];
        for (name, value) in target_names(target).into_iter().zip(&values) {
            let variable = self.tree.push(
                Some(scope),
                target.line,
                WrapperKind::Variable {
                    name: name.to_string(),
                    value: *value,
                },
            );
            self.tree.bind(scope, name, variable);
            targets.push(variable);
        }
        Ok(self.tree.push(
            Some(scope),
            node.line,
            WrapperKind::Assignment {
                targets,
                operator: String::new(),
                values: values.into_iter().flatten().collect(),
            },
        ))
    }

    /// Reads `name` in `scope`. Names missing everywhere come from a star import when
    /// the module has one, and are an error otherwise.
    fn name(
        &mut self,
        scope: WrapperId,
        name: &str,
        line: usize,
    ) -> Result<WrapperId, WrapperError> {
        let target = match self.tree.get_variable(scope, name) {
            Some(target) => target,
            None => {
                let root = self.tree.root();
                let WrapperKind::Module { star_imports, .. } = self.tree.kind(root) else {
                    return Err(WrapperError::UndefinedVariable {
                        name: name.to_string(),
                        line,
                    });
                };
                if star_imports.is_empty() {
                    return Err(WrapperError::UndefinedVariable {
                        name: name.to_string(),
                        line,
                    });
                }
                let module = match star_imports.as_slice() {
                    [only] => Some(only.clone()),
                    _ => None,
                };
                trace!(name, ?module, "name taken from a star import");
                let external = self.tree.push(
                    Some(root),
                    line,
                    WrapperKind::External {
                        module,
                        name: name.to_string(),
                    },
                );
                self.tree.bind(root, name, external);
                external
            }
        };
        self.ensure_parsed(self.tree.resolve(target))?;
        Ok(self.tree.push(
            Some(scope),
            line,
            WrapperKind::Variable {
                name: name.to_string(),
                value: Some(target),
            },
        ))
    }

    /// Parses an expression.
    pub fn parse_value(
        &mut self,
        scope: WrapperId,
        node: &Node,
    ) -> Result<WrapperId, WrapperError> {
        let line = node.line;
        let kind = match &node.kind {
            NodeKind::Name(name) => return self.name(scope, name, line),
            NodeKind::Int(value) => number(&value.to_string()),
            NodeKind::Float(value) => number(&value.to_string()),
            NodeKind::String(value) => WrapperKind::String {
                value: value.clone(),
            },
            NodeKind::List(items) => WrapperKind::List {
                items: self.parse_values(scope, items)?,
            },
            NodeKind::Tuple(items) => WrapperKind::Tuple {
                items: self.parse_values(scope, items)?,
            },
            NodeKind::Dict(pairs) => {
                let mut items = vec![];
                for (key, value) in pairs {
                    items.push((self.parse_value(scope, key)?, self.parse_value(scope, value)?));
                }
                WrapperKind::Dict { items }
            }
            NodeKind::AssociativeParenthesis(inner) => return self.parse_value(scope, inner),
            NodeKind::Atomtrailers(items) => return self.parse_power(scope, node, items),
            NodeKind::BinaryOperator { op, first, second } => WrapperKind::BinaryOperation {
                operator: op.clone(),
                left: self.parse_value(scope, first)?,
                right: self.parse_value(scope, second)?,
            },
            NodeKind::BooleanOperator { op, first, second } => WrapperKind::BooleanOperation {
                operator: op.clone(),
                left: self.parse_value(scope, first)?,
                right: self.parse_value(scope, second)?,
            },
            NodeKind::Comparison { op, first, second } => WrapperKind::Comparison {
                operator: op.clone(),
                left: self.parse_value(scope, first)?,
                right: self.parse_value(scope, second)?,
            },
            NodeKind::UnitaryOperator { op, target } => WrapperKind::UnaryOperation {
                operator: op.clone(),
                operand: self.parse_value(scope, target)?,
            },
            NodeKind::Ternary {
                value,
                test,
                orelse,
            } => {
                let test = self.parse_value(scope, test)?;
                WrapperKind::Ternary {
                    test,
                    value: self.parse_value(scope, value)?,
                    orelse: self.parse_value(scope, orelse)?,
                }
            }
            NodeKind::Lambda { arguments, value } => {
                return self.lambda(scope, node, arguments, value);
            }
            _ => return Err(WrapperError::unexpected("value", node)),
        };
        Ok(self.tree.push(Some(scope), line, kind))
    }

    fn parse_values(
        &mut self,
        scope: WrapperId,
        nodes: &[Node],
    ) -> Result<Vec<WrapperId>, WrapperError> {
        nodes.iter().map(|n| self.parse_value(scope, n)).collect()
    }

    /// A chain: the head value, then one wrapper per attribute, call or subscript
    /// segment, each taking the previous one as subject.
    pub fn parse_power(
        &mut self,
        scope: WrapperId,
        node: &Node,
        items: &[Node],
    ) -> Result<WrapperId, WrapperError> {
        let Some((head, trailers)) = items.split_first() else {
            return Err(WrapperError::unexpected("chain", node));
        };
        let mut subject = self.parse_value(scope, head)?;
        for trailer in trailers {
            let kind = match &trailer.kind {
                NodeKind::Name(name) => WrapperKind::Attribute {
                    subject,
                    name: name.clone(),
                },
                NodeKind::Call(arguments) => self.call(scope, subject, trailer, arguments)?,
                NodeKind::Getitem(key) => WrapperKind::Key {
                    subject,
                    value: self.parse_value(scope, key)?,
                },
                _ => return Err(WrapperError::unexpected("chain segment", trailer)),
            };
            subject = self.tree.push(Some(scope), trailer.line, kind);
        }
        Ok(subject)
    }

    fn call(
        &mut self,
        scope: WrapperId,
        subject: WrapperId,
        node: &Node,
        arguments: &[CallArgument],
    ) -> Result<WrapperKind, WrapperError> {
        let mut positional_arguments = vec![];
        let mut named_arguments = IndexMap::new();
        let mut star_argument = None;
        let mut keyword_argument = None;
        for argument in arguments {
            let value = self.parse_value(scope, &argument.value)?;
            match (&argument.target, argument.kind) {
                (Some(name), _) => {
                    named_arguments.insert(name.clone(), value);
                }
                (None, ArgumentKind::Plain) => positional_arguments.push(value),
                (None, ArgumentKind::List) if star_argument.is_none() => {
                    star_argument = Some(value)
                }
                (None, ArgumentKind::Dict) if keyword_argument.is_none() => {
                    keyword_argument = Some(value)
                }
                _ => return Err(WrapperError::unexpected("call arguments", node)),
            }
        }
        Ok(WrapperKind::Call {
            subject,
            positional_arguments,
            named_arguments,
            star_argument,
            keyword_argument,
        })
    }

    fn lambda(
        &mut self,
        scope: WrapperId,
        node: &Node,
        arguments: &[DefArgument],
        value: &Node,
    ) -> Result<WrapperId, WrapperError> {
        let id = self.tree.push(
            Some(scope),
            node.line,
            WrapperKind::Lambda {
                parameters: arguments.iter().map(|a| a.name.clone()).collect(),
                symbols: IndexMap::new(),
                value: None,
            },
        );
        for argument in arguments {
            let bound = match &argument.default {
                Some(default) => self.parse_value(scope, default)?,
                None => self.argument(id, &argument.name),
            };
            self.tree.bind(id, &argument.name, bound);
        }
        let body = self.parse_value(id, value)?;
        if let WrapperKind::Lambda { value, .. } = self.tree.kind_mut(id) {
            *value = Some(body);
        }
        Ok(id)
    }

    /// Declares a fresh function in `scope` and fills it from `def`.
    pub fn add_function(
        &mut self,
        scope: WrapperId,
        def: &FunctionDef,
        line: usize,
        formula: bool,
    ) -> Result<WrapperId, WrapperError> {
        let id = self.function_shell(scope, line, &def.name);
        self.define_function(id, def, formula)?;
        Ok(id)
    }

    /// Defines a class body into the class `id` declared by [`Self::declare_module`],
    /// or into a fresh one when the module does not have it.
    pub fn add_class(&mut self, class: &ClassDef, line: usize) -> Result<WrapperId, WrapperError> {
        let root = self.tree.root();
        let id = match self.tree.symbols(root).and_then(|s| s.get(&class.name)) {
            Some(id) if matches!(self.tree.kind(*id), WrapperKind::Class { .. }) => *id,
            _ => {
                let id = self.tree.push(
                    Some(root),
                    line,
                    WrapperKind::Class {
                        name: class.name.clone(),
                        bases: class.bases.iter().map(|b| b.to_string()).collect(),
                        symbols: IndexMap::new(),
                        body: vec![],
                    },
                );
                self.tree.bind(root, &class.name, id);
                id
            }
        };
        self.define_class(id, class)?;
        Ok(id)
    }

    /// Whether a class with these bases is a formula class.
    pub fn is_formula_class(&self, class: &str) -> bool {
        let root = self.tree.root();
        let Some(id) = self.tree.symbols(root).and_then(|s| s.get(class)) else {
            return false;
        };
        match self.tree.kind(*id) {
            WrapperKind::Class { bases, .. } => bases.iter().any(|base| {
                let name = base.rsplit('.').next().unwrap_or(base);
                self.options.formula_base_classes.iter().any(|b| b == name)
            }),
            _ => false,
        }
    }
}

fn number(value: &str) -> WrapperKind {
    WrapperKind::Number {
        value: value.to_string(),
    }
}

fn type_named(name: &str) -> WrapperKind {
    WrapperKind::Type {
        name: name.to_string(),
    }
}

fn is_name_target(target: &Node) -> bool {
    match &target.kind {
        NodeKind::Name(_) => true,
        NodeKind::Tuple(items) => items.iter().all(|item| item.as_name().is_some()),
        _ => false,
    }
}

fn target_names(target: &Node) -> Vec<&str> {
    match &target.kind {
        NodeKind::Tuple(items) => items.iter().filter_map(|item| item.as_name()).collect(),
        _ => target.as_name().into_iter().collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::{Column, ValueType};
    use crate::wrapper::Guess;
    use ofasg_syntax::parse_source;
    use pretty_assertions::assert_eq;
    use test_case::test_case;
    use unindent::unindent;

    fn build(source: &str, system: &TaxBenefitSystem) -> Result<WrapperTree, WrapperError> {
        let options = ConversionOptions::default();
        let statements = parse_source(&unindent(source))?;
        let mut builder = WrapperBuilder::new("module", system, &options);
        builder.build_module(&statements)?;
        Ok(builder.finish())
    }

    fn formula_guess(expression: &str) -> Option<Guess> {
        let source = format!(
            "from datetime import date\nfrom numpy import datetime64\n\nclass x(Variable):\n    def function(self, simulation, period):\n        value = {expression}\n        return period, value\n"
        );
        let tree = build(&source, &TaxBenefitSystem::default()).unwrap();
        let function = tree.find_function(Some("x"), "function").unwrap();
        let value = tree.symbols(function).unwrap()["value"];
        tree.guess(value)
    }

    #[test_case("date(2015, 1, 1)", Some(Guess::Date); "date call")]
    #[test_case("datetime64('2015-01-01')", Some(Guess::DateTime64); "datetime64 call")]
    #[test_case("period.start", Some(Guess::Instant); "period start")]
    #[test_case("period.stop", Some(Guess::Instant); "period stop")]
    #[test_case("period.start.offset(-1, 'year')", Some(Guess::Instant); "instant offset")]
    #[test_case("period.offset(-1)", Some(Guess::Period); "period offset")]
    #[test_case("period.start.period('year')", Some(Guess::Period); "instant period")]
    #[test_case("period.this_year", Some(Guess::Period); "period attribute")]
    #[test_case("simulation.calculate('salaire', period)", Some(Guess::Array); "calculate")]
    #[test_case("simulation.compute_add('salaire', period)", Some(Guess::Array); "compute add")]
    #[test_case("simulation.legislation_at(period.start)", Some(Guess::LawNode); "legislation")]
    #[test_case("simulation.legislation_at(period.start).ir.taux", Some(Guess::LawNode); "law attribute")]
    #[test_case("self.split_by_roles(simulation.calculate('x', period))", Some(Guess::Dict); "split by roles")]
    #[test_case("self.split_by_roles(simulation.calculate('x', period))[CHEF]", Some(Guess::Array); "split by roles item")]
    #[test_case("simulation.calculate('a', period) * 2", Some(Guess::Array); "array arithmetic")]
    #[test_case("-simulation.calculate('a', period)", Some(Guess::Array); "array negation")]
    #[test_case("simulation.calculate('a', period) > 0", Some(Guess::Array); "array comparison")]
    #[test_case("max_(simulation.calculate('a', period), 0)", Some(Guess::Array); "builtin over array")]
    #[test_case("1 + 2", Some(Guess::Number); "number arithmetic")]
    #[test_case("'text'", Some(Guess::String); "string")]
    #[test_case("self.holder.entity.simulation", Some(Guess::Simulation); "simulation through holder")]
    #[test_case("law.ir", Some(Guess::LawNode); "module law")]
    #[test_case("(period, 1)", Some(Guess::Tuple); "tuple")]
    fn test_guess(expression: &str, expected: Option<Guess>) {
        assert_eq!(formula_guess(expression), expected);
    }

    #[test]
    fn test_functions_may_call_later_functions() {
        let tree = build(
            "
            def f(x):
                return g(x)

            def g(y):
                return y
            ",
            &TaxBenefitSystem::default(),
        )
        .unwrap();
        let f = tree.find_function(None, "f").unwrap();
        let g = tree.find_function(None, "g").unwrap();
        let function = tree.function(f).unwrap();
        let WrapperKind::Return { value: Some(call) } = tree.kind(function.returns[0]) else {
            panic!("expected a return value");
        };
        let WrapperKind::Call { subject, .. } = tree.kind(*call) else {
            panic!("expected a call");
        };
        assert_eq!(tree.resolve(*subject), g);
        assert_eq!(function.positional_parameters, vec!["x".to_string()]);
    }

    #[test_case("def g():\n    return 1\n\ndef f():\n    return g()\n"; "callee first")]
    #[test_case("def f():\n    return g()\n\ndef g():\n    return 1\n"; "caller first")]
    #[test_case("X = f()\n\ndef f():\n    return g()\n\ndef g():\n    return 1\n"; "constant calls first")]
    fn test_call_guess_ignores_definition_order(source: &str) {
        let tree = build(source, &TaxBenefitSystem::default()).unwrap();
        let f = tree.find_function(None, "f").unwrap();
        let function = tree.function(f).unwrap();
        let WrapperKind::Return { value: Some(call) } = tree.kind(function.returns[0]) else {
            panic!("expected a return value");
        };
        assert!(matches!(tree.kind(*call), WrapperKind::Call { .. }));
        assert_eq!(tree.guess(*call), Some(Guess::Number));
    }

    #[test]
    fn test_recursive_function_is_parsed_once() {
        let tree = build(
            "
            def f(x):
                return f(x)
            ",
            &TaxBenefitSystem::default(),
        )
        .unwrap();
        let f = tree.find_function(None, "f").unwrap();
        let function = tree.function(f).unwrap();
        assert_eq!(function.returns.len(), 1);
        let WrapperKind::Return { value: Some(call) } = tree.kind(function.returns[0]) else {
            panic!("expected a return value");
        };
        assert_eq!(tree.guess(*call), None);
    }

    #[test]
    fn test_undefined_variable() {
        let err = build(
            "
            def f():
                return unknown
            ",
            &TaxBenefitSystem::default(),
        )
        .unwrap_err();
        assert_eq!(
            err,
            WrapperError::UndefinedVariable {
                name: "unknown".to_string(),
                line: 2,
            }
        );
    }

    #[test]
    fn test_star_import_supplies_unknown_names() {
        let tree = build(
            "
            from openfisca_france.model.base import *

            class salaire(Variable):
                column = FloatCol
                entity_class = Individus
            ",
            &TaxBenefitSystem::default(),
        )
        .unwrap();
        let individus = tree.get_variable(tree.root(), "Individus").unwrap();
        assert_eq!(
            tree.kind(individus),
            &WrapperKind::External {
                module: Some("openfisca_france.model.base".to_string()),
                name: "Individus".to_string(),
            }
        );
    }

    #[test]
    fn test_formula_parameters_bound_by_name() {
        let mut system = TaxBenefitSystem::default();
        system.add_column(Column {
            name: "salaire_brut".to_string(),
            value_type: ValueType::Float,
            entity: "individus".to_string(),
            label: None,
        });
        let tree = build(
            "
            class salaire_net(Variable):
                def function(self, simulation, period, _P, salaire_brut, salaire_brut_holder):
                    return period, salaire_brut * _P.taux
            ",
            &system,
        )
        .unwrap();
        let function = tree.find_function(Some("salaire_net"), "function").unwrap();
        let symbols = tree.symbols(function).unwrap();
        let kinds = symbols
            .values()
            .map(|id| tree.guess(*id))
            .collect::<Vec<_>>();
        assert_eq!(
            kinds,
            vec![
                Some(Guess::Formula),
                Some(Guess::Simulation),
                Some(Guess::Period),
                Some(Guess::LawNode),
                Some(Guess::Array),
                Some(Guess::DatedHolder),
            ]
        );
        assert!(tree.function(function).unwrap().formula);
    }

    #[test]
    fn test_undefined_input_variable() {
        let err = build(
            "
            class salaire_net(Variable):
                def function(self, simulation, period, salaire_brut):
                    return period, salaire_brut
            ",
            &TaxBenefitSystem::default(),
        )
        .unwrap_err();
        assert_eq!(
            err,
            WrapperError::UndefinedInputVariable("salaire_brut".to_string())
        );
    }

    #[test]
    fn test_plain_class_methods_take_arguments() {
        let tree = build(
            "
            class Helper(object):
                def function(self, anything):
                    return anything
            ",
            &TaxBenefitSystem::default(),
        )
        .unwrap();
        let function = tree.find_function(Some("Helper"), "function").unwrap();
        let anything = tree.symbols(function).unwrap()["anything"];
        assert_eq!(
            tree.kind(anything),
            &WrapperKind::Argument {
                name: "anything".to_string()
            }
        );
    }

    #[test]
    fn test_assignments_rebind() {
        let tree = build(
            "
            class x(Variable):
                def function(self, simulation, period):
                    montant = simulation.calculate('a', period)
                    montant += 1
                    a, b = 1, 'text'
                    return period, montant
            ",
            &TaxBenefitSystem::default(),
        )
        .unwrap();
        let function = tree.find_function(Some("x"), "function").unwrap();
        let symbols = tree.symbols(function).unwrap();
        let montant = symbols["montant"];
        let WrapperKind::Variable {
            value: Some(value), ..
        } = tree.kind(montant)
        else {
            panic!("expected a bound variable");
        };
        assert!(matches!(
            tree.kind(*value),
            WrapperKind::BinaryOperation { operator, .. } if operator == "+"
        ));
        assert_eq!(tree.guess(montant), Some(Guess::Array));
        assert_eq!(tree.guess(symbols["a"]), Some(Guess::Number));
        assert_eq!(tree.guess(symbols["b"]), Some(Guess::String));
    }

    #[test]
    fn test_control_flow_and_lambda() {
        let tree = build(
            "
            def f(values, limit=10):
                total = 0
                for value in values:
                    if value > limit:
                        continue
                    elif value < 0:
                        break
                    else:
                        total += value
                while total > limit:
                    total = total - 1
                pick = lambda item: item * 2
                return pick(total)
            ",
            &TaxBenefitSystem::default(),
        )
        .unwrap();
        let f = tree.find_function(None, "f").unwrap();
        let function = tree.function(f).unwrap();
        assert_eq!(function.named_parameters.len(), 1);
        let kinds = function
            .body
            .iter()
            .map(|id| match tree.kind(*id) {
                WrapperKind::Assignment { .. } => "assignment",
                WrapperKind::For { .. } => "for",
                WrapperKind::While { .. } => "while",
                WrapperKind::Return { .. } => "return",
                _ => "other",
            })
            .collect::<Vec<_>>();
        assert_eq!(
            kinds,
            vec!["assignment", "for", "while", "assignment", "return"]
        );
        let pick = tree.symbols(f).unwrap()["pick"];
        assert_eq!(tree.guess(pick), Some(Guess::Function));
    }

    #[test]
    fn test_decorators_are_recorded() {
        let tree = build(
            "
            from datetime import date

            class x(DatedVariable):
                @dated_function(start = date(2015, 1, 1))
                def function_2015(self, simulation, period):
                    return period, 1
            ",
            &TaxBenefitSystem::default(),
        );
        // `dated_function` is neither imported nor a builtin.
        assert_eq!(
            tree.unwrap_err(),
            WrapperError::UndefinedVariable {
                name: "dated_function".to_string(),
                line: 4,
            }
        );
        let tree = build(
            "
            from datetime import date
            from openfisca_core.formulas import dated_function

            class x(DatedVariable):
                @dated_function(start = date(2015, 1, 1))
                def function_2015(self, simulation, period):
                    return period, 1
            ",
            &TaxBenefitSystem::default(),
        )
        .unwrap();
        let function = tree.find_function(Some("x"), "function_2015").unwrap();
        let decorators = &tree.function(function).unwrap().decorators;
        assert_eq!(decorators.len(), 1);
        let WrapperKind::Decorator { name, subject } = tree.kind(decorators[0]) else {
            panic!("expected a decorator");
        };
        assert_eq!(name, "dated_function");
        let WrapperKind::Call {
            named_arguments, ..
        } = tree.kind(*subject)
        else {
            panic!("expected a call");
        };
        assert_eq!(tree.guess(named_arguments["start"]), Some(Guess::Date));
    }

    #[test]
    fn test_return_outside_function() {
        let err = build("return 1\n", &TaxBenefitSystem::default()).unwrap_err();
        assert!(matches!(
            err,
            WrapperError::UnexpectedNode {
                construct: "function body",
                ..
            }
        ));
    }
}
