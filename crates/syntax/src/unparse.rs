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

//! Renders syntax trees back into source text. Used for diagnostics and for
//! re-emitting rewritten definitions.

use itertools::Itertools;

use crate::ast::{ArgumentKind, CallArgument, DefArgument, IfBranch, ImportName, Node, NodeKind};

const INDENT_LEVEL: usize = 4;

/// Binding strength of an expression node; higher binds tighter.
fn precedence(node: &Node) -> u8 {
    match &node.kind {
        NodeKind::Lambda { .. } => 1,
        NodeKind::Ternary { .. } => 2,
        NodeKind::BooleanOperator { op, .. } if op == "or" => 3,
        NodeKind::BooleanOperator { .. } => 4,
        NodeKind::UnitaryOperator { op, .. } if op == "not" => 5,
        NodeKind::Comparison { .. } => 6,
        NodeKind::BinaryOperator { op, .. } => binary_precedence(op),
        NodeKind::UnitaryOperator { .. } => 13,
        NodeKind::Tuple(_) => 0,
        _ => 16,
    }
}

fn binary_precedence(op: &str) -> u8 {
    match op {
        "|" => 7,
        "^" => 8,
        "&" => 9,
        "<<" | ">>" => 10,
        "+" | "-" => 11,
        "*" | "/" | "//" | "%" => 12,
        "**" => 14,
        _ => 12,
    }
}

fn wrap(node: &Node, needs_parens: bool) -> String {
    let text = unparse_expr(node);
    if needs_parens { format!("({text})") } else { text }
}

/// Quotes a string value as a single-quoted literal.
pub fn quote_str(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('\'');
    for c in value.chars() {
        match c {
            '\\' => quoted.push_str("\\\\"),
            '\'' => quoted.push_str("\\'"),
            '\n' => quoted.push_str("\\n"),
            '\t' => quoted.push_str("\\t"),
            '\r' => quoted.push_str("\\r"),
            c if c.is_control() => quoted.push_str(&format!("\\x{:02x}", c as u32)),
            c => quoted.push(c),
        }
    }
    quoted.push('\'');
    quoted
}

fn unparse_parameters(arguments: &[DefArgument]) -> String {
    arguments
        .iter()
        .map(|argument| {
            let prefix = match argument.kind {
                ArgumentKind::Plain => "",
                ArgumentKind::List => "*",
                ArgumentKind::Dict => "**",
            };
            match &argument.default {
                Some(default) => format!("{prefix}{}={}", argument.name, unparse_expr(default)),
                None => format!("{prefix}{}", argument.name),
            }
        })
        .join(", ")
}

fn unparse_call_arguments(arguments: &[CallArgument]) -> String {
    arguments
        .iter()
        .map(|argument| {
            let value = unparse_expr(&argument.value);
            match (&argument.target, argument.kind) {
                (Some(target), _) => format!("{target}={value}"),
                (None, ArgumentKind::List) => format!("*{value}"),
                (None, ArgumentKind::Dict) => format!("**{value}"),
                (None, ArgumentKind::Plain) => value,
            }
        })
        .join(", ")
}

fn unparse_import_names(names: &[ImportName]) -> String {
    names
        .iter()
        .map(|name| match &name.alias {
            Some(alias) => format!("{} as {alias}", name.name),
            None => name.name.clone(),
        })
        .join(", ")
}

fn unparse_tuple(items: &[Node]) -> String {
    match items {
        [single] => format!("{},", unparse_expr(single)),
        _ => items.iter().map(unparse_expr).join(", "),
    }
}

/// Renders an expression node on one line.
pub fn unparse_expr(node: &Node) -> String {
    match &node.kind {
        NodeKind::Name(name) => name.clone(),
        NodeKind::Int(value) => value.to_string(),
        NodeKind::Float(value) => format!("{value:?}"),
        NodeKind::String(value) => quote_str(value),
        NodeKind::List(items) => format!("[{}]", items.iter().map(unparse_expr).join(", ")),
        NodeKind::Tuple(items) => format!("({})", unparse_tuple(items)),
        NodeKind::Dict(items) => format!(
            "{{{}}}",
            items
                .iter()
                .map(|(key, value)| format!("{}: {}", unparse_expr(key), unparse_expr(value)))
                .join(", ")
        ),
        NodeKind::AssociativeParenthesis(inner) => format!("({})", unparse_expr(inner)),
        NodeKind::Atomtrailers(chain) => {
            let mut text = String::new();
            for (i, segment) in chain.iter().enumerate() {
                match &segment.kind {
                    NodeKind::Name(name) if i > 0 => {
                        text.push('.');
                        text.push_str(name);
                    }
                    NodeKind::Call(_) | NodeKind::Getitem(_) if i > 0 => {
                        text.push_str(&unparse_expr(segment));
                    }
                    _ => text.push_str(&wrap(segment, precedence(segment) < 16)),
                }
            }
            text
        }
        NodeKind::Call(arguments) => format!("({})", unparse_call_arguments(arguments)),
        NodeKind::Getitem(index) => match &index.kind {
            NodeKind::Tuple(items) => format!("[{}]", unparse_tuple(items)),
            _ => format!("[{}]", unparse_expr(index)),
        },
        NodeKind::BinaryOperator { op, first, second } => {
            let own = binary_precedence(op);
            let right_assoc = op == "**";
            let left_parens = precedence(first) < own || (right_assoc && precedence(first) == own);
            let right_parens =
                precedence(second) < own || (!right_assoc && precedence(second) == own);
            format!(
                "{} {op} {}",
                wrap(first, left_parens),
                wrap(second, right_parens)
            )
        }
        NodeKind::BooleanOperator { op, first, second }
        | NodeKind::Comparison { op, first, second } => {
            let own = precedence(node);
            format!(
                "{} {op} {}",
                wrap(first, precedence(first) < own),
                wrap(second, precedence(second) <= own)
            )
        }
        NodeKind::UnitaryOperator { op, target } => {
            let operand = wrap(target, precedence(target) < precedence(node));
            if op == "not" {
                format!("not {operand}")
            } else {
                format!("{op}{operand}")
            }
        }
        NodeKind::Ternary {
            value,
            test,
            orelse,
        } => format!(
            "{} if {} else {}",
            wrap(value, precedence(value) <= 2),
            wrap(test, precedence(test) <= 2),
            unparse_expr(orelse)
        ),
        NodeKind::Lambda { arguments, value } => {
            if arguments.is_empty() {
                format!("lambda: {}", unparse_expr(value))
            } else {
                format!(
                    "lambda {}: {}",
                    unparse_parameters(arguments),
                    unparse_expr(value)
                )
            }
        }
        // Statements rendered inline, for diagnostics.
        _ => {
            let mut out = vec![];
            unparse_statement(node, 0, &mut out);
            out.join("\n")
        }
    }
}

fn push_suite(body: &[Node], indent: usize, out: &mut Vec<String>) {
    if body.is_empty() {
        out.push(format!("{}pass", " ".repeat(indent)));
    }
    for statement in body {
        unparse_statement(statement, indent, out);
    }
}

fn unparse_statement(node: &Node, indent: usize, out: &mut Vec<String>) {
    let pad = " ".repeat(indent);
    let inner = indent + INDENT_LEVEL;
    match &node.kind {
        NodeKind::Comment(text) => out.push(format!("{pad}# {text}")),
        NodeKind::Import(names) => out.push(format!("{pad}import {}", unparse_import_names(names))),
        NodeKind::FromImport { module, names } => out.push(format!(
            "{pad}from {module} import {}",
            unparse_import_names(names)
        )),
        NodeKind::Class(class) => {
            for decorator in &class.decorators {
                out.push(format!("{pad}@{}", unparse_expr(decorator)));
            }
            if class.bases.is_empty() {
                out.push(format!("{pad}class {}:", class.name));
            } else {
                out.push(format!(
                    "{pad}class {}({}):",
                    class.name,
                    class.bases.iter().map(unparse_expr).join(", ")
                ));
            }
            push_suite(&class.body, inner, out);
        }
        NodeKind::Def(function) => {
            for decorator in &function.decorators {
                out.push(format!("{pad}@{}", unparse_expr(decorator)));
            }
            out.push(format!(
                "{pad}def {}({}):",
                function.name,
                unparse_parameters(&function.arguments)
            ));
            push_suite(&function.body, inner, out);
        }
        NodeKind::Assignment {
            target,
            operator,
            value,
        } => {
            let target = match &target.kind {
                NodeKind::Tuple(items) => unparse_tuple(items),
                _ => unparse_expr(target),
            };
            let value = match &value.kind {
                NodeKind::Tuple(items) => unparse_tuple(items),
                _ => unparse_expr(value),
            };
            out.push(format!("{pad}{target} {operator}= {value}"));
        }
        NodeKind::Return(value) => match value.as_deref() {
            Some(Node {
                kind: NodeKind::Tuple(items),
                ..
            }) => out.push(format!("{pad}return {}", unparse_tuple(items))),
            Some(value) => out.push(format!("{pad}return {}", unparse_expr(value))),
            None => out.push(format!("{pad}return")),
        },
        NodeKind::For {
            target,
            iterator,
            body,
        } => {
            out.push(format!(
                "{pad}for {} in {}:",
                unparse_expr(target),
                unparse_expr(iterator)
            ));
            push_suite(body, inner, out);
        }
        NodeKind::While { test, body } => {
            out.push(format!("{pad}while {}:", unparse_expr(test)));
            push_suite(body, inner, out);
        }
        NodeKind::If(branches) => {
            for (i, IfBranch { test, body }) in branches.iter().enumerate() {
                match (i, test) {
                    (0, Some(test)) => out.push(format!("{pad}if {}:", unparse_expr(test))),
                    (_, Some(test)) => out.push(format!("{pad}elif {}:", unparse_expr(test))),
                    (_, None) => out.push(format!("{pad}else:")),
                }
                push_suite(body, inner, out);
            }
        }
        NodeKind::Pass => out.push(format!("{pad}pass")),
        NodeKind::Break => out.push(format!("{pad}break")),
        NodeKind::Continue => out.push(format!("{pad}continue")),
        _ => out.push(format!("{pad}{}", unparse_expr(node))),
    }
}

/// Renders a statement or expression node.
pub fn unparse_node(node: &Node) -> String {
    let mut out = vec![];
    unparse_statement(node, 0, &mut out);
    out.join("\n")
}

/// Renders a sequence of statements as a source file.
pub fn unparse(statements: &[Node]) -> String {
    let mut out = vec![];
    for statement in statements {
        unparse_statement(statement, 0, &mut out);
    }
    let mut text = out.join("\n");
    text.push('\n');
    text
}
