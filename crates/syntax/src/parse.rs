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

/// Kicks off the Pest parser over the layout of a file and assembles its blocks into our tree.
use std::sync::LazyLock;

use pest::Parser;
use pest::error::LineColLocation;
use pest::iterators::{Pair, Pairs};
use pest::pratt_parser::{Assoc, Op, PrattParser};
use tracing::trace;

use crate::ast::{
    ArgumentKind, CallArgument, ClassDef, DefArgument, FunctionDef, IfBranch, ImportName, Node,
    NodeKind,
};
use crate::errors::SyntaxError;

pub mod formula {
    #[derive(Parser)]
    #[grammar = "src/formula.pest"]
    pub struct FormulaParser;
}

pub use formula::{FormulaParser, Rule};

static PRATT: LazyLock<PrattParser<Rule>> = LazyLock::new(|| {
    // Following Python's precedence table, loosest binding first.
    PrattParser::new()
        .op(Op::postfix(Rule::ternary))
        .op(Op::infix(Rule::or_op, Assoc::Left))
        .op(Op::infix(Rule::and_op, Assoc::Left))
        .op(Op::prefix(Rule::not_op))
        .op(Op::infix(Rule::cmp_op, Assoc::Left))
        .op(Op::infix(Rule::bit_or, Assoc::Left))
        .op(Op::infix(Rule::bit_xor, Assoc::Left))
        .op(Op::infix(Rule::bit_and, Assoc::Left))
        .op(Op::infix(Rule::shift_op, Assoc::Left))
        .op(Op::infix(Rule::arith_op, Assoc::Left))
        .op(Op::infix(Rule::term_op, Assoc::Left))
        // Unary minus binds looser than `**`: `-x ** 2` is `-(x ** 2)`.
        .op(Op::prefix(Rule::unary_op))
        .op(Op::infix(Rule::power_op, Assoc::Right))
});

/// Compound statement header, before its suite has been attached.
#[derive(Debug)]
enum Header {
    Class { name: String, bases: Vec<Node> },
    Def { name: String, arguments: Vec<DefArgument> },
    If(Node),
    Elif(Node),
    Else,
    For { target: Node, iterator: Node },
    While(Node),
}

/// What one logical line parsed into.
#[derive(Debug)]
enum LineItem {
    Simple(Vec<Node>),
    Decorator(Node),
    Header {
        header: Header,
        inline: Option<Vec<Node>>,
    },
}

fn is_keyword(rule: Rule) -> bool {
    matches!(
        rule,
        Rule::kw_as
            | Rule::kw_class
            | Rule::kw_def
            | Rule::kw_elif
            | Rule::kw_else
            | Rule::kw_for
            | Rule::kw_from
            | Rule::kw_if
            | Rule::kw_import
            | Rule::kw_in
            | Rule::kw_lambda
            | Rule::kw_return
            | Rule::kw_while
    )
}

/// Children of `pair` with keyword tokens filtered out.
fn significant<'i>(pair: Pair<'i, Rule>) -> impl Iterator<Item = Pair<'i, Rule>> {
    pair.into_inner().filter(|p| !is_keyword(p.as_rule()))
}

/// Converts the pest pairs of a single logical line into syntax nodes.
struct TreeTransformer {
    /// Physical line the logical line starts on.
    line_offset: usize,
}

impl TreeTransformer {
    fn line_of(&self, pair: &Pair<Rule>) -> usize {
        self.line_offset + pair.line_col().0 - 1
    }

    fn malformed(&self, pair: &Pair<Rule>, message: &str) -> SyntaxError {
        let (line, column) = pair.line_col();
        SyntaxError::ParseError {
            line: self.line_offset + line - 1,
            column,
            context: pair.as_str().to_string(),
            message: message.to_string(),
        }
    }

    fn expect<'i>(
        &self,
        parent: &Pair<'i, Rule>,
        child: Option<Pair<'i, Rule>>,
        what: &str,
    ) -> Result<Pair<'i, Rule>, SyntaxError> {
        child.ok_or_else(|| self.malformed(parent, &format!("expected {what}")))
    }

    fn parse_expr(&self, pairs: Pairs<Rule>) -> Result<Node, SyntaxError> {
        PRATT
            .map_primary(|primary| self.parse_primary(primary))
            .map_infix(|lhs, op, rhs| {
                let (first, second) = (Box::new(lhs?), Box::new(rhs?));
                let line = first.line;
                let kind = match op.as_rule() {
                    Rule::or_op | Rule::and_op => NodeKind::BooleanOperator {
                        op: op.as_str().to_string(),
                        first,
                        second,
                    },
                    Rule::cmp_op => NodeKind::Comparison {
                        op: op.as_str().split_whitespace().collect::<Vec<_>>().join(" "),
                        first,
                        second,
                    },
                    _ => NodeKind::BinaryOperator {
                        op: op.as_str().to_string(),
                        first,
                        second,
                    },
                };
                Ok(Node::new(kind, line))
            })
            .map_prefix(|op, rhs| {
                Ok(Node::new(
                    NodeKind::UnitaryOperator {
                        op: op.as_str().to_string(),
                        target: Box::new(rhs?),
                    },
                    self.line_of(&op),
                ))
            })
            .map_postfix(|lhs, op| {
                let value = lhs?;
                let line = value.line;
                let mut inner = significant(op.clone());
                let test = self.expect(&op, inner.next(), "condition")?;
                let orelse = self.expect(&op, inner.next(), "else branch")?;
                Ok(Node::new(
                    NodeKind::Ternary {
                        value: Box::new(value),
                        test: Box::new(self.parse_expr(test.into_inner())?),
                        orelse: Box::new(self.parse_expr(orelse.into_inner())?),
                    },
                    line,
                ))
            })
            .parse(pairs)
    }

    fn parse_primary(&self, pair: Pair<Rule>) -> Result<Node, SyntaxError> {
        match pair.as_rule() {
            Rule::power => self.parse_power(pair),
            Rule::lambda_expr => {
                let line = self.line_of(&pair);
                let mut arguments = vec![];
                let mut value = None;
                for child in significant(pair.clone()) {
                    match child.as_rule() {
                        Rule::parameters => arguments = self.parse_parameters(child)?,
                        Rule::expr => value = Some(self.parse_expr(child.into_inner())?),
                        _ => return Err(self.malformed(&child, "unexpected lambda element")),
                    }
                }
                let value = value.ok_or_else(|| self.malformed(&pair, "lambda without body"))?;
                Ok(Node::new(
                    NodeKind::Lambda {
                        arguments,
                        value: Box::new(value),
                    },
                    line,
                ))
            }
            _ => Err(self.malformed(&pair, "unexpected primary expression")),
        }
    }

    fn parse_power(&self, pair: Pair<Rule>) -> Result<Node, SyntaxError> {
        let mut inner = pair.clone().into_inner();
        let atom = self.expect(&pair, inner.next(), "atom")?;
        let base = self.parse_atom(atom)?;
        let trailers = inner
            .map(|trailer| self.parse_trailer(trailer))
            .collect::<Result<Vec<_>, _>>()?;
        if trailers.is_empty() {
            return Ok(base);
        }
        let line = base.line;
        let mut chain = Vec::with_capacity(trailers.len() + 1);
        chain.push(base);
        chain.extend(trailers);
        Ok(Node::new(NodeKind::Atomtrailers(chain), line))
    }

    fn parse_trailer(&self, pair: Pair<Rule>) -> Result<Node, SyntaxError> {
        let line = self.line_of(&pair);
        match pair.as_rule() {
            Rule::attribute => {
                let ident = self.expect(&pair, pair.clone().into_inner().next(), "attribute name")?;
                Ok(Node::new(NodeKind::Name(ident.as_str().to_string()), line))
            }
            Rule::call => {
                let arguments = pair
                    .into_inner()
                    .map(|argument| self.parse_call_argument(argument))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Node::new(NodeKind::Call(arguments), line))
            }
            Rule::getitem => {
                let testlist = self.expect(&pair, pair.clone().into_inner().next(), "subscript")?;
                Ok(Node::new(
                    NodeKind::Getitem(Box::new(self.parse_testlist(testlist)?)),
                    line,
                ))
            }
            _ => Err(self.malformed(&pair, "unexpected trailer")),
        }
    }

    fn parse_call_argument(&self, pair: Pair<Rule>) -> Result<CallArgument, SyntaxError> {
        let rule = pair.as_rule();
        let mut inner = pair.clone().into_inner();
        match rule {
            Rule::kwarg => {
                let name = self.expect(&pair, inner.next(), "keyword")?;
                let value = self.expect(&pair, inner.next(), "keyword value")?;
                Ok(CallArgument {
                    target: Some(name.as_str().to_string()),
                    value: self.parse_expr(value.into_inner())?,
                    kind: ArgumentKind::Plain,
                })
            }
            Rule::positional_arg | Rule::star_arg | Rule::dstar_arg => {
                let value = self.expect(&pair, inner.next(), "argument")?;
                let kind = match rule {
                    Rule::star_arg => ArgumentKind::List,
                    Rule::dstar_arg => ArgumentKind::Dict,
                    _ => ArgumentKind::Plain,
                };
                Ok(CallArgument {
                    target: None,
                    value: self.parse_expr(value.into_inner())?,
                    kind,
                })
            }
            _ => Err(self.malformed(&pair, "unexpected call argument")),
        }
    }

    fn parse_atom(&self, pair: Pair<Rule>) -> Result<Node, SyntaxError> {
        let line = self.line_of(&pair);
        let kind = match pair.as_rule() {
            Rule::ident => NodeKind::Name(pair.as_str().to_string()),
            Rule::integer => NodeKind::Int(self.parse_integer(&pair)?),
            Rule::float => match pair.as_str().parse::<f64>() {
                Ok(value) => NodeKind::Float(value),
                Err(e) => {
                    return Err(self.malformed(&pair, &format!("invalid float literal: {e}")));
                }
            },
            Rule::strings => {
                let mut value = String::new();
                for string in pair.clone().into_inner() {
                    value.push_str(&self.parse_string(string)?);
                }
                NodeKind::String(value)
            }
            Rule::paren => {
                let mut items = vec![];
                let mut commas = 0;
                for child in pair.into_inner() {
                    match child.as_rule() {
                        Rule::comma => commas += 1,
                        _ => items.push(self.parse_expr(child.into_inner())?),
                    }
                }
                if items.len() == 1 && commas == 0 {
                    let inner = items.remove(0);
                    NodeKind::AssociativeParenthesis(Box::new(inner))
                } else {
                    NodeKind::Tuple(items)
                }
            }
            Rule::list => NodeKind::List(
                pair.into_inner()
                    .map(|item| self.parse_expr(item.into_inner()))
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            Rule::dict => {
                let mut items = vec![];
                for item in pair.into_inner() {
                    let mut inner = item.clone().into_inner();
                    let key = self.expect(&item, inner.next(), "dict key")?;
                    let value = self.expect(&item, inner.next(), "dict value")?;
                    items.push((
                        self.parse_expr(key.into_inner())?,
                        self.parse_expr(value.into_inner())?,
                    ));
                }
                NodeKind::Dict(items)
            }
            _ => return Err(self.malformed(&pair, "unexpected atom")),
        };
        Ok(Node::new(kind, line))
    }

    fn parse_integer(&self, pair: &Pair<Rule>) -> Result<i64, SyntaxError> {
        let text = pair.as_str().trim_end_matches(['l', 'L']);
        let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
            Some(hex) => i64::from_str_radix(hex, 16),
            None => text.parse::<i64>(),
        };
        parsed.map_err(|e| self.malformed(pair, &format!("invalid integer literal: {e}")))
    }

    fn parse_string(&self, pair: Pair<Rule>) -> Result<String, SyntaxError> {
        let mut raw = false;
        let mut body = None;
        for child in pair.clone().into_inner() {
            match child.as_rule() {
                Rule::string_prefix => raw = child.as_str().contains(['r', 'R']),
                _ => body = Some(child),
            }
        }
        let body = self.expect(&pair, body, "string body")?;
        let quotes = match body.as_rule() {
            Rule::long_string_dq | Rule::long_string_sq => 3,
            _ => 1,
        };
        let text = body.as_str();
        let contents = &text[quotes..text.len() - quotes];
        if raw {
            return Ok(contents.to_string());
        }
        unescape(contents).map_err(|message| SyntaxError::StringLexError {
            line: self.line_of(&pair),
            message,
        })
    }

    /// A bare expression for one element, a tuple otherwise.
    fn parse_testlist(&self, pair: Pair<Rule>) -> Result<Node, SyntaxError> {
        let line = self.line_of(&pair);
        let mut items = vec![];
        let mut commas = 0;
        for child in pair.into_inner() {
            match child.as_rule() {
                Rule::comma => commas += 1,
                Rule::expr => items.push(self.parse_expr(child.into_inner())?),
                Rule::power => items.push(self.parse_power(child)?),
                _ => return Err(self.malformed(&child, "unexpected list element")),
            }
        }
        if items.len() == 1 && commas == 0 {
            return Ok(items.remove(0));
        }
        Ok(Node::new(NodeKind::Tuple(items), line))
    }

    fn parse_parameters(&self, pair: Pair<Rule>) -> Result<Vec<DefArgument>, SyntaxError> {
        let mut arguments = vec![];
        for param in pair.into_inner() {
            let rule = param.as_rule();
            let mut inner = param.clone().into_inner();
            let name = self
                .expect(&param, inner.next(), "parameter name")?
                .as_str()
                .to_string();
            let (kind, default) = match rule {
                Rule::plain_param => (ArgumentKind::Plain, None),
                Rule::list_param => (ArgumentKind::List, None),
                Rule::dict_param => (ArgumentKind::Dict, None),
                Rule::default_param => {
                    let value = self.expect(&param, inner.next(), "default value")?;
                    (ArgumentKind::Plain, Some(self.parse_expr(value.into_inner())?))
                }
                _ => return Err(self.malformed(&param, "unexpected parameter")),
            };
            arguments.push(DefArgument {
                name,
                default,
                kind,
            });
        }
        Ok(arguments)
    }

    fn parse_import_name(&self, pair: Pair<Rule>) -> Result<ImportName, SyntaxError> {
        let mut inner = significant(pair.clone());
        let name = self.expect(&pair, inner.next(), "imported name")?;
        Ok(ImportName {
            name: name.as_str().to_string(),
            alias: inner.next().map(|alias| alias.as_str().to_string()),
        })
    }

    fn parse_simple_statement(&self, pair: Pair<Rule>) -> Result<Node, SyntaxError> {
        let line = self.line_of(&pair);
        let kind = match pair.as_rule() {
            Rule::pass_stmt => NodeKind::Pass,
            Rule::break_stmt => NodeKind::Break,
            Rule::continue_stmt => NodeKind::Continue,
            Rule::return_stmt => {
                let value = significant(pair)
                    .next()
                    .map(|testlist| self.parse_testlist(testlist))
                    .transpose()?;
                NodeKind::Return(value.map(Box::new))
            }
            Rule::import_stmt => NodeKind::Import(
                significant(pair)
                    .map(|name| self.parse_import_name(name))
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            Rule::from_import_stmt => {
                let mut inner = significant(pair.clone());
                let module = self.expect(&pair, inner.next(), "module")?;
                let names = inner
                    .map(|name| match name.as_rule() {
                        Rule::import_star => Ok(ImportName {
                            name: "*".to_string(),
                            alias: None,
                        }),
                        _ => self.parse_import_name(name),
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                NodeKind::FromImport {
                    module: module.as_str().to_string(),
                    names,
                }
            }
            Rule::assign_stmt => {
                let mut inner = pair.clone().into_inner();
                let target = self.expect(&pair, inner.next(), "assignment target")?;
                let op = self.expect(&pair, inner.next(), "assignment operator")?;
                let value = self.expect(&pair, inner.next(), "assigned value")?;
                NodeKind::Assignment {
                    target: Box::new(self.parse_testlist(target)?),
                    operator: op.as_str().trim_end_matches('=').to_string(),
                    value: Box::new(self.parse_testlist(value)?),
                }
            }
            Rule::expr_stmt => {
                let testlist = self.expect(&pair, pair.clone().into_inner().next(), "expression")?;
                return self.parse_testlist(testlist);
            }
            _ => return Err(self.malformed(&pair, "unexpected statement")),
        };
        Ok(Node::new(kind, line))
    }

    fn parse_simple_statements(&self, pair: Pair<Rule>) -> Result<Vec<Node>, SyntaxError> {
        pair.into_inner()
            .map(|statement| self.parse_simple_statement(statement))
            .collect()
    }

    /// Splits a header's children into its leading parts and the optional inline body.
    fn header_parts<'i>(
        &self,
        pair: Pair<'i, Rule>,
    ) -> Result<(Vec<Pair<'i, Rule>>, Option<Vec<Node>>), SyntaxError> {
        let mut parts = vec![];
        let mut inline = None;
        for child in significant(pair) {
            match child.as_rule() {
                Rule::simple_stmts => inline = Some(self.parse_simple_statements(child)?),
                _ => parts.push(child),
            }
        }
        Ok((parts, inline))
    }

    fn parse_header(&self, pair: Pair<Rule>) -> Result<LineItem, SyntaxError> {
        let rule = pair.as_rule();
        let (parts, inline) = self.header_parts(pair.clone())?;
        let mut parts = parts.into_iter();
        let header = match rule {
            Rule::class_header => {
                let name = self.expect(&pair, parts.next(), "class name")?;
                let bases = match parts.next() {
                    Some(bases) => bases
                        .into_inner()
                        .map(|base| self.parse_expr(base.into_inner()))
                        .collect::<Result<Vec<_>, _>>()?,
                    None => vec![],
                };
                Header::Class {
                    name: name.as_str().to_string(),
                    bases,
                }
            }
            Rule::def_header => {
                let name = self.expect(&pair, parts.next(), "function name")?;
                let arguments = match parts.next() {
                    Some(parameters) => self.parse_parameters(parameters)?,
                    None => vec![],
                };
                Header::Def {
                    name: name.as_str().to_string(),
                    arguments,
                }
            }
            Rule::if_header | Rule::elif_header | Rule::while_header => {
                let test = self.expect(&pair, parts.next(), "condition")?;
                let test = self.parse_expr(test.into_inner())?;
                match rule {
                    Rule::if_header => Header::If(test),
                    Rule::elif_header => Header::Elif(test),
                    _ => Header::While(test),
                }
            }
            Rule::else_header => Header::Else,
            Rule::for_header => {
                let target = self.expect(&pair, parts.next(), "loop target")?;
                let iterator = self.expect(&pair, parts.next(), "loop iterable")?;
                Header::For {
                    target: self.parse_testlist(target)?,
                    iterator: self.parse_testlist(iterator)?,
                }
            }
            _ => return Err(self.malformed(&pair, "unexpected compound statement")),
        };
        Ok(LineItem::Header { header, inline })
    }

    fn parse_line(&self, pair: Pair<Rule>) -> Result<LineItem, SyntaxError> {
        let item = pair
            .clone()
            .into_inner()
            .find(|p| p.as_rule() != Rule::EOI);
        let item = self.expect(&pair, item, "statement")?;
        match item.as_rule() {
            Rule::simple_stmts => Ok(LineItem::Simple(self.parse_simple_statements(item)?)),
            Rule::decorator => {
                let power = self.expect(&item, item.clone().into_inner().next(), "decorator")?;
                Ok(LineItem::Decorator(self.parse_power(power)?))
            }
            _ => self.parse_header(item),
        }
    }
}

fn parse_error(e: pest::error::Error<Rule>, line_offset: usize) -> SyntaxError {
    let (line, column) = match e.line_col {
        LineColLocation::Pos(lc) => lc,
        LineColLocation::Span(begin, _) => begin,
    };
    SyntaxError::ParseError {
        line: line_offset + line - 1,
        column,
        context: e.line().to_string(),
        message: e.variant.message().to_string(),
    }
}

fn parse_logical_line(text: &str, line_offset: usize) -> Result<LineItem, SyntaxError> {
    let mut pairs =
        FormulaParser::parse(Rule::line, text).map_err(|e| parse_error(e, line_offset))?;
    let transformer = TreeTransformer { line_offset };
    match pairs.next() {
        Some(line) => transformer.parse_line(line),
        None => Err(SyntaxError::ParseError {
            line: line_offset,
            column: 1,
            context: text.to_string(),
            message: "empty line".to_string(),
        }),
    }
}

fn starts_with_keyword(text: &str, keyword: &str) -> bool {
    text.strip_prefix(keyword)
        .is_some_and(|rest| !rest.starts_with(|c: char| c.is_ascii_alphanumeric() || c == '_'))
}

fn indentation_error(line: usize, message: &str) -> SyntaxError {
    SyntaxError::IndentationError {
        line,
        message: message.to_string(),
    }
}

/// One `statement` pair of the layout: a logical line and the block indented under it.
struct Statement<'i> {
    text: &'i str,
    line: usize,
    column: usize,
    end_line: usize,
    block: Option<Pair<'i, Rule>>,
}

impl<'i> Statement<'i> {
    fn new(pair: Pair<'i, Rule>) -> Self {
        let (line, column) = pair.line_col();
        let end_line = pair.as_span().end_pos().line_col().0;
        let mut inner = pair.into_inner();
        let text = inner.next().map_or("", |p| p.as_str());
        Self {
            text,
            line,
            column,
            end_line,
            block: inner.next(),
        }
    }

    fn item(&self) -> Result<LineItem, SyntaxError> {
        parse_logical_line(self.text, self.line)
    }

    /// Simple statements and decorators take no indented block.
    fn unexpected_block(&self) -> Result<(), SyntaxError> {
        match &self.block {
            Some(block) => {
                let line = block
                    .clone()
                    .into_inner()
                    .find(|p| p.as_rule() == Rule::statement)
                    .map_or(self.line + 1, |p| p.line_col().0);
                Err(indentation_error(line, "unexpected indent"))
            }
            None => Ok(()),
        }
    }

    fn body(&self, inline: Option<Vec<Node>>) -> Result<Vec<Node>, SyntaxError> {
        match (inline, &self.block) {
            (Some(inline), _) => {
                self.unexpected_block()?;
                Ok(inline)
            }
            (None, Some(block)) => BlockBuilder::new(block.clone()).suite(),
            (None, None) => Err(indentation_error(self.line, "expected an indented block")),
        }
    }

    fn orphan_decorator(&self) -> SyntaxError {
        SyntaxError::ParseError {
            line: self.line,
            column: self.column,
            context: self.text.to_string(),
            message: "decorator not followed by a definition".to_string(),
        }
    }
}

/// Builds a suite out of the statements and comment lines of one layout level.
struct BlockBuilder<'i> {
    items: Vec<Pair<'i, Rule>>,
    pos: usize,
}

impl<'i> BlockBuilder<'i> {
    fn new(pair: Pair<'i, Rule>) -> Self {
        Self {
            items: pair.into_inner().filter(|p| p.as_rule() != Rule::EOI).collect(),
            pos: 0,
        }
    }

    fn suite(&mut self) -> Result<Vec<Node>, SyntaxError> {
        let mut body = vec![];
        let mut decorators = vec![];
        while let Some(item) = self.items.get(self.pos).cloned() {
            self.pos += 1;
            match item.as_rule() {
                Rule::comment => {
                    let text = item.as_str().trim_start_matches('#').trim().to_string();
                    body.push(Node::new(NodeKind::Comment(text), item.line_col().0));
                }
                Rule::statement => {
                    let statement = Statement::new(item);
                    match statement.item()? {
                        LineItem::Simple(nodes) => {
                            statement.unexpected_block()?;
                            if !decorators.is_empty() {
                                return Err(statement.orphan_decorator());
                            }
                            body.extend(nodes);
                        }
                        LineItem::Decorator(node) => {
                            statement.unexpected_block()?;
                            decorators.push(node);
                        }
                        LineItem::Header { header, inline } => {
                            let decorators = std::mem::take(&mut decorators);
                            body.push(self.compound(header, inline, &statement, decorators)?);
                        }
                    }
                }
                _ => {
                    return Err(indentation_error(
                        item.line_col().0,
                        "unindent does not match any outer indentation level",
                    ));
                }
            }
        }
        if let Some(decorator) = decorators.first() {
            return Err(SyntaxError::ParseError {
                line: decorator.line,
                column: 1,
                context: decorator.to_string(),
                message: "decorator not followed by a definition".to_string(),
            });
        }
        Ok(body)
    }

    fn compound(
        &mut self,
        header: Header,
        inline: Option<Vec<Node>>,
        statement: &Statement,
        decorators: Vec<Node>,
    ) -> Result<Node, SyntaxError> {
        if !decorators.is_empty() && !matches!(header, Header::Class { .. } | Header::Def { .. }) {
            return Err(statement.orphan_decorator());
        }
        let body = statement.body(inline)?;
        let kind = match header {
            Header::Class { name, bases } => NodeKind::Class(ClassDef {
                name,
                bases,
                decorators,
                body,
                end_line: statement.end_line,
            }),
            Header::Def { name, arguments } => NodeKind::Def(FunctionDef {
                name,
                arguments,
                decorators,
                body,
                end_line: statement.end_line,
            }),
            Header::If(test) => {
                let mut branches = vec![IfBranch {
                    test: Some(test),
                    body,
                }];
                self.else_branches(&mut branches)?;
                NodeKind::If(branches)
            }
            Header::Elif(_) | Header::Else => {
                return Err(SyntaxError::ParseError {
                    line: statement.line,
                    column: statement.column,
                    context: statement.text.to_string(),
                    message: "elif/else without a matching if".to_string(),
                });
            }
            Header::For { target, iterator } => NodeKind::For {
                target: Box::new(target),
                iterator: Box::new(iterator),
                body,
            },
            Header::While(test) => NodeKind::While {
                test: Box::new(test),
                body,
            },
        };
        Ok(Node::new(kind, statement.line))
    }

    /// Chains the `elif`/`else` statements following an `if` at the same level. Comment
    /// lines in between are dropped.
    fn else_branches(&mut self, branches: &mut Vec<IfBranch>) -> Result<(), SyntaxError> {
        loop {
            let mut next = self.pos;
            while self.items.get(next).is_some_and(|p| p.as_rule() == Rule::comment) {
                next += 1;
            }
            let Some(candidate) = self
                .items
                .get(next)
                .filter(|p| p.as_rule() == Rule::statement)
                .cloned()
            else {
                return Ok(());
            };
            let candidate = Statement::new(candidate);
            if !(starts_with_keyword(candidate.text, "elif")
                || starts_with_keyword(candidate.text, "else"))
            {
                return Ok(());
            }
            self.pos = next + 1;
            match candidate.item()? {
                LineItem::Header {
                    header: Header::Elif(test),
                    inline,
                } => {
                    let body = candidate.body(inline)?;
                    branches.push(IfBranch {
                        test: Some(test),
                        body,
                    });
                }
                LineItem::Header {
                    header: Header::Else,
                    inline,
                } => {
                    let body = candidate.body(inline)?;
                    branches.push(IfBranch { test: None, body });
                    return Ok(());
                }
                _ => {
                    return Err(SyntaxError::ParseError {
                        line: candidate.line,
                        column: candidate.column,
                        context: candidate.text.to_string(),
                        message: "malformed elif/else clause".to_string(),
                    });
                }
            }
        }
    }
}

/// Parses a whole source file into its top-level statements.
pub fn parse_source(source: &str) -> Result<Vec<Node>, SyntaxError> {
    let layout = FormulaParser::parse(Rule::source, source)
        .map_err(|e| parse_error(e, 1))?
        .next()
        .ok_or_else(|| SyntaxError::ParseError {
            line: 1,
            column: 1,
            context: String::new(),
            message: "empty layout".to_string(),
        })?;
    let mut builder = BlockBuilder::new(layout);
    trace!(items = builder.items.len(), "Parsing source");
    builder.suite()
}

/// Parses a single expression, e.g. a column's keyword argument.
pub fn parse_expression(text: &str) -> Result<Node, SyntaxError> {
    let mut nodes = match parse_logical_line(text, 1)? {
        LineItem::Simple(nodes) => nodes,
        _ => vec![],
    };
    if nodes.len() != 1 || matches!(nodes[0].kind, NodeKind::Assignment { .. }) {
        return Err(SyntaxError::ParseError {
            line: 1,
            column: 1,
            context: text.to_string(),
            message: "expected a single expression".to_string(),
        });
    }
    Ok(nodes.remove(0))
}

/// Decodes the backslash escapes of a (non-raw) string literal body.
pub fn unescape(s: &str) -> Result<String, String> {
    let mut output = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            output.push(c);
            continue;
        }
        match chars.next() {
            Some('\n') => {}
            Some('\\') => output.push('\\'),
            Some('\'') => output.push('\''),
            Some('"') => output.push('"'),
            Some('n') => output.push('\n'),
            Some('t') => output.push('\t'),
            Some('r') => output.push('\r'),
            Some('a') => output.push('\x07'),
            Some('b') => output.push('\x08'),
            Some('f') => output.push('\x0c'),
            Some('v') => output.push('\x0b'),
            Some(d @ '0'..='7') => {
                let mut code = d.to_digit(8).unwrap_or(0);
                for _ in 0..2 {
                    match chars.peek().and_then(|c| c.to_digit(8)) {
                        Some(digit) => {
                            code = code * 8 + digit;
                            chars.next();
                        }
                        None => break,
                    }
                }
                output.push(char::from_u32(code).ok_or("invalid octal escape")?);
            }
            Some(kind @ ('x' | 'u' | 'U')) => {
                let width = match kind {
                    'x' => 2,
                    'u' => 4,
                    _ => 8,
                };
                let digits: String = chars.by_ref().take(width).collect();
                if digits.len() != width {
                    return Err(format!("truncated \\{kind} escape"));
                }
                let code = u32::from_str_radix(&digits, 16)
                    .map_err(|e| format!("invalid \\{kind} escape: {e}"))?;
                output.push(char::from_u32(code).ok_or("escape is not a valid character")?);
            }
            Some(other) => {
                output.push('\\');
                output.push(other);
            }
            None => return Err("unexpected end of string".to_string()),
        }
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use test_case::test_case;
    use unindent::unindent;

    fn name(name: &str, line: usize) -> Node {
        Node::new(NodeKind::Name(name.to_string()), line)
    }

    fn only_value(source: &str) -> Node {
        let mut tree = parse_source(source).unwrap();
        assert_eq!(tree.len(), 1);
        match tree.remove(0).kind {
            NodeKind::Assignment { value, .. } => *value,
            other => panic!("expected an assignment, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_formula_class() {
        let source = unindent(
            "
            from openfisca_core.columns import FloatCol

            class salaire_net(Variable):
                column = FloatCol(default = 0)
                entity_class = Individus
                label = u\"Salaire net\"

                def function(self, simulation, period):
                    salaire = simulation.calculate('salaire', period)
                    return period, salaire * 2
            ",
        );
        let tree = parse_source(&source).unwrap();
        assert_eq!(tree.len(), 2);
        assert_eq!(
            tree[0].kind,
            NodeKind::FromImport {
                module: "openfisca_core.columns".to_string(),
                names: vec![ImportName {
                    name: "FloatCol".to_string(),
                    alias: None
                }],
            }
        );
        let NodeKind::Class(class) = &tree[1].kind else {
            panic!("expected a class");
        };
        assert_eq!(class.name, "salaire_net");
        assert_eq!(class.bases, vec![name("Variable", 3)]);
        assert_eq!(class.body.len(), 4);
        assert_eq!(class.end_line, 10);
        let NodeKind::Def(function) = &class.body[3].kind else {
            panic!("expected a def");
        };
        assert_eq!(class.body[3].line, 8);
        assert_eq!(
            function.arguments.iter().map(|a| a.name.as_str()).collect::<Vec<_>>(),
            vec!["self", "simulation", "period"]
        );
        assert_eq!(function.body.len(), 2);
        assert_eq!(function.body[1].tag().to_string(), "return");
    }

    #[test]
    fn test_column_keyword_arguments() {
        let value = only_value("column = FloatCol(default = 0, val_type = 'monetary')");
        let NodeKind::Atomtrailers(chain) = &value.kind else {
            panic!("expected a chain");
        };
        let NodeKind::Call(arguments) = &chain[1].kind else {
            panic!("expected a call");
        };
        assert_eq!(arguments[0].target.as_deref(), Some("default"));
        assert_eq!(arguments[0].value.kind, NodeKind::Int(0));
        assert_eq!(arguments[1].value.kind, NodeKind::String("monetary".to_string()));
    }

    #[test]
    fn test_power_binds_tighter_than_unary_minus() {
        let value = only_value("x = -a ** 2");
        assert_eq!(
            value.kind,
            NodeKind::UnitaryOperator {
                op: "-".to_string(),
                target: Box::new(Node::new(
                    NodeKind::BinaryOperator {
                        op: "**".to_string(),
                        first: Box::new(name("a", 1)),
                        second: Box::new(Node::new(NodeKind::Int(2), 1)),
                    },
                    1
                )),
            }
        );
    }

    #[test]
    fn test_comparison_is_not_a_keyword_argument() {
        let value = only_value("x = f(a == 1)");
        let NodeKind::Atomtrailers(chain) = &value.kind else {
            panic!("expected a chain");
        };
        let NodeKind::Call(arguments) = &chain[1].kind else {
            panic!("expected a call");
        };
        assert_eq!(arguments[0].target, None);
        assert_eq!(arguments[0].value.tag().to_string(), "comparison");
    }

    #[test_case("x = 10L", NodeKind::Int(10); "python 2 long")]
    #[test_case("x = 0x1F", NodeKind::Int(31); "hex")]
    #[test_case("x = 1e-3", NodeKind::Float(0.001); "exponent")]
    #[test_case("x = .5", NodeKind::Float(0.5); "leading dot")]
    #[test_case("x = u'caf\\xe9'", NodeKind::String("café".to_string()); "unicode escape")]
    #[test_case("x = r'a\\n'", NodeKind::String("a\\n".to_string()); "raw string")]
    #[test_case("x = 'a' 'b'", NodeKind::String("ab".to_string()); "implicit concatenation")]
    #[test_case("x = None", NodeKind::Name("None".to_string()); "none is a name")]
    fn test_literals(source: &str, expected: NodeKind) {
        assert_eq!(only_value(source).kind, expected);
    }

    #[test]
    fn test_if_elif_else_with_comments() {
        let source = unindent(
            "
            if a:
                x = 1
            # between
            elif b:
                x = 2
            else:
                x = 3
            y = x
            ",
        );
        let tree = parse_source(&source).unwrap();
        assert_eq!(tree.len(), 2);
        let NodeKind::If(branches) = &tree[0].kind else {
            panic!("expected an if");
        };
        assert_eq!(branches.len(), 3);
        assert!(branches[2].test.is_none());
    }

    #[test]
    fn test_inline_bodies() {
        let tree = parse_source("def f(x): return x\nif x: y = 1; z = 2\n").unwrap();
        let NodeKind::Def(function) = &tree[0].kind else {
            panic!("expected a def");
        };
        assert_eq!(function.body.len(), 1);
        let NodeKind::If(branches) = &tree[1].kind else {
            panic!("expected an if");
        };
        assert_eq!(branches[0].body.len(), 2);
    }

    #[test]
    fn test_multiline_call_keeps_line_numbers() {
        let source = "x = f(\n    a,\n    b)\ny = 2\n";
        let tree = parse_source(source).unwrap();
        assert_eq!(tree[1].line, 4);
        let NodeKind::Assignment { value, .. } = &tree[0].kind else {
            panic!("expected an assignment");
        };
        let NodeKind::Atomtrailers(chain) = &value.kind else {
            panic!("expected a chain");
        };
        let NodeKind::Call(arguments) = &chain[1].kind else {
            panic!("expected a call");
        };
        assert_eq!(arguments[1].value.line, 3);
    }

    #[test]
    fn test_unexpected_indent() {
        let err = parse_source("x = 1\n    y = 2\n").unwrap_err();
        assert_eq!(
            err,
            SyntaxError::IndentationError {
                line: 2,
                message: "unexpected indent".to_string()
            }
        );
    }

    #[test]
    fn test_missing_block() {
        let err = parse_source("def f():\nx = 1\n").unwrap_err();
        assert_eq!(err.line(), Some(1));
    }

    #[test]
    fn test_syntax_error_reports_line() {
        let err = parse_source("x = 1\ny = (2 +\n").unwrap_err();
        assert_eq!(err.line(), Some(2));
    }

    #[test]
    fn test_brackets_join_lines() {
        let source = unindent(
            "
            x = f(a,
                  b)  # trailing
            y = 1
            ",
        );
        let tree = parse_source(&source).unwrap();
        assert_eq!(tree.len(), 2);
        assert_eq!(tree[1].line, 3);
    }

    #[test]
    fn test_comment_lines_belong_to_the_following_block() {
        let tree = parse_source("def f():\n\n    # note\n    return 1\n# done\n").unwrap();
        assert_eq!(tree.len(), 2);
        let NodeKind::Def(function) = &tree[0].kind else {
            panic!("expected a def");
        };
        assert_eq!(function.body[0], Node::new(NodeKind::Comment("note".to_string()), 3));
        assert_eq!(function.body.len(), 2);
        assert_eq!(function.end_line, 4);
        assert_eq!(tree[1], Node::new(NodeKind::Comment("done".to_string()), 5));
    }

    #[test]
    fn test_triple_quoted_string_spans_lines() {
        let tree = parse_source("x = u\"\"\"a\n# not a comment\nb\"\"\"\ny = 2\n").unwrap();
        assert_eq!(tree.len(), 2);
        assert_eq!(tree[1].line, 4);
        let NodeKind::Assignment { value, .. } = &tree[0].kind else {
            panic!("expected an assignment");
        };
        assert_eq!(value.kind, NodeKind::String("a\n# not a comment\nb".to_string()));
    }

    #[test]
    fn test_backslash_continuation() {
        let tree = parse_source("x = 1 + \\\n    2\ny = x\n").unwrap();
        assert_eq!(tree.len(), 2);
        assert_eq!(tree[1].line, 3);
    }

    #[test]
    fn test_hash_inside_string_is_kept() {
        let value = only_value("x = '#1' # comment\n");
        assert_eq!(value.kind, NodeKind::String("#1".to_string()));
    }

    #[test]
    fn test_unterminated_string() {
        let err = parse_source("x = 'abc\n").unwrap_err();
        assert_eq!(err.line(), Some(1));
    }

    #[test]
    fn test_nested_blocks_dedent() {
        let source = unindent(
            "
            def f(x):
                if x:
                    return 1
                return 2
            y = f(1)
            ",
        );
        let tree = parse_source(&source).unwrap();
        assert_eq!(tree.len(), 2);
        let NodeKind::Def(function) = &tree[0].kind else {
            panic!("expected a def");
        };
        assert_eq!(function.body.len(), 2);
        assert_eq!(function.end_line, 4);
        assert_eq!(tree[1].line, 5);
    }

    #[test]
    fn test_unindent_mismatch() {
        let err = parse_source("if a:\n        x = 1\n    y = 2\n").unwrap_err();
        assert_eq!(
            err,
            SyntaxError::IndentationError {
                line: 3,
                message: "unindent does not match any outer indentation level".to_string()
            }
        );
    }

    #[test]
    fn test_unescape() {
        assert_eq!(unescape(r"a\tb\\c\'").unwrap(), "a\tb\\c'");
        assert_eq!(unescape(r"\101").unwrap(), "A");
        assert_eq!(unescape(r"\q").unwrap(), "\\q");
        assert!(unescape(r"\x4").is_err());
    }
}
