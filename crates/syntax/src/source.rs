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

//! Source extraction for single definitions: locate a class or function in a file,
//! cut out its text, dedent it and parse it on its own.

use crate::ast::{ClassDef, FunctionDef, Node, NodeKind};
use crate::errors::SyntaxError;
use crate::parse::parse_source;

/// Removes the indentation common to every line of `text`.
pub fn dedent(text: &str) -> String {
    // `unindent` keeps its first line untouched, so hand it an empty one.
    unindent::unindent(&format!("\n{text}"))
}

fn first_line(node: &Node) -> usize {
    let decorators = match &node.kind {
        NodeKind::Class(class) => &class.decorators,
        NodeKind::Def(function) => &function.decorators,
        _ => return node.line,
    };
    decorators
        .iter()
        .map(|d| d.line)
        .chain(std::iter::once(node.line))
        .min()
        .unwrap_or(node.line)
}

fn definition_name(node: &Node) -> Option<(&str, &[Node], usize)> {
    match &node.kind {
        NodeKind::Class(class) => Some((&class.name, &class.body, class.end_line)),
        NodeKind::Def(function) => Some((&function.name, &function.body, function.end_line)),
        _ => None,
    }
}

/// Finds the definition at `path` (e.g. `["irpp", "function"]`) and returns its
/// source text, decorators included, dedented.
pub fn extract_definition(source: &str, path: &[&str]) -> Result<String, SyntaxError> {
    let tree = parse_source(source)?;
    let mut statements: &[Node] = &tree;
    let mut found = None;
    for name in path {
        let node = statements
            .iter()
            .find(|node| definition_name(node).is_some_and(|(n, _, _)| n == *name))
            .ok_or_else(|| SyntaxError::DefinitionNotFound(path.join(".")))?;
        if let Some((_, body, _)) = definition_name(node) {
            statements = body;
        }
        found = Some(node);
    }
    let node = found.ok_or_else(|| SyntaxError::DefinitionNotFound(path.join(".")))?;
    let end_line = definition_name(node).map_or(node.line, |(_, _, end)| end);
    let text = source
        .lines()
        .skip(first_line(node) - 1)
        .take(end_line + 1 - first_line(node))
        .collect::<Vec<_>>()
        .join("\n");
    Ok(dedent(&text))
}

fn single_definition(text: &str) -> Result<Node, SyntaxError> {
    let tree = parse_source(&dedent(text))?;
    let mut definitions = tree
        .into_iter()
        .filter(|node| !matches!(node.kind, NodeKind::Comment(_)));
    match (definitions.next(), definitions.next()) {
        (Some(node), None) => Ok(node),
        (first, _) => Err(SyntaxError::UnexpectedDefinition {
            expected: "definition".to_string(),
            found: first.map_or("nothing".to_string(), |n| n.tag().to_string()),
        }),
    }
}

/// Parses text holding exactly one (possibly indented) function definition.
pub fn parse_function_source(text: &str) -> Result<FunctionDef, SyntaxError> {
    let node = single_definition(text)?;
    match node.kind {
        NodeKind::Def(function) => Ok(function),
        _ => Err(SyntaxError::UnexpectedDefinition {
            expected: "def".to_string(),
            found: node.tag().to_string(),
        }),
    }
}

/// Parses text holding exactly one (possibly indented) class definition.
pub fn parse_class_source(text: &str) -> Result<ClassDef, SyntaxError> {
    let node = single_definition(text)?;
    match node.kind {
        NodeKind::Class(class) => Ok(class),
        _ => Err(SyntaxError::UnexpectedDefinition {
            expected: "class".to_string(),
            found: node.tag().to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use unindent::unindent;

    fn sample() -> String {
        unindent(
            "
            class salaire_net(Variable):
                column = FloatCol

                @dated_function(start=date(2015, 1, 1))
                def function(self, simulation, period):
                    return period, 1

            def helper(x):
                return x
            ",
        )
    }

    #[test]
    fn test_extract_method_is_dedented() {
        let text = extract_definition(&sample(), &["salaire_net", "function"]).unwrap();
        assert_eq!(
            text,
            "@dated_function(start=date(2015, 1, 1))\ndef function(self, simulation, period):\n    return period, 1"
        );
        let function = parse_function_source(&text).unwrap();
        assert_eq!(function.name, "function");
        assert_eq!(function.decorators.len(), 1);
    }

    #[test]
    fn test_extract_missing_definition() {
        let err = extract_definition(&sample(), &["salaire_net", "nope"]).unwrap_err();
        assert_eq!(err, SyntaxError::DefinitionNotFound("salaire_net.nope".to_string()));
    }

    #[test]
    fn test_parse_indented_function_source() {
        let function = parse_function_source("    def f(a):\n        return a\n").unwrap();
        assert_eq!(function.name, "f");
        assert_eq!(function.body.len(), 1);
    }

    #[test]
    fn test_class_source_rejects_function() {
        let err = parse_class_source("def f():\n    pass\n").unwrap_err();
        assert_eq!(
            err,
            SyntaxError::UnexpectedDefinition {
                expected: "class".to_string(),
                found: "def".to_string(),
            }
        );
    }

    #[test]
    fn test_two_definitions_rejected() {
        assert!(parse_function_source("def f():\n    pass\ndef g():\n    pass\n").is_err());
    }
}
