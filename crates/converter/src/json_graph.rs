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

//! Conversion between flattened ASG records and the directed JSON graph exchange format:
//! `{"graph": {"directed": true, "nodes": [...], "edges": [...]}}`.
//!
//! Node fields holding nodes become edges. A single node field `f` gives an edge labelled
//! `f`, a list of nodes gives `f[0]`, `f[1]`... and a map of nodes gives `f.key`. Other
//! fields stay on the node as JSON attributes. Edges sharing both endpoints are folded into
//! one whose label joins the individual labels with newlines.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::rc::Rc;
use std::sync::LazyLock;

use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::asg::NodeRef;
use crate::errors::GraphError;
use crate::record::{Field, Flattener, Record};

/// Fields holding a single node.
const SINGULAR_FIELDS: [&str; 11] = [
    "input_period",
    "output_period",
    "operand",
    "parameter",
    "instant",
    "variable",
    "period",
    "formula",
    "value",
    "input_instant",
    "role",
];
/// Fields holding a list of nodes.
const LIST_FIELDS: [&str; 5] = ["operands", "arg_list", "split_arg_list", "items", "variables"];
/// Fields holding a map of nodes.
const MAP_FIELDS: [&str; 2] = ["arg_dict", "split_arg_dict"];

static INDEXED_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<field>[A-Za-z_][A-Za-z0-9_]*)\[(?P<index>\d+)\]$").unwrap()
});
static KEYED_LABEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?P<field>[A-Za-z_][A-Za-z0-9_]*)\.(?P<key>.+)$").unwrap());

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JsonGraph {
    pub graph: Graph,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Graph {
    pub directed: bool,
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<Edge>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: usize,
    #[serde(flatten)]
    pub attributes: IndexMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub source: usize,
    pub target: usize,
    pub label: String,
}

impl JsonGraph {
    pub fn from_json(value: Value) -> Result<Self, GraphError> {
        serde_json::from_value(value).map_err(|e| GraphError::Malformed(e.to_string()))
    }
}

#[derive(Default)]
struct GraphBuilder {
    /// Ids are handed out in visit order, starting at 0 for each conversion.
    next_id: usize,
    ids: HashMap<*const Record, usize>,
    in_progress: HashSet<*const Record>,
    nodes: Vec<GraphNode>,
    edges: Vec<Edge>,
    edge_positions: HashMap<(usize, usize), usize>,
}

impl GraphBuilder {
    fn add_edge(&mut self, source: usize, target: usize, label: String) {
        match self.edge_positions.get(&(source, target)) {
            Some(&position) => {
                let edge = &mut self.edges[position];
                edge.label.push('\n');
                edge.label.push_str(&label);
            }
            None => {
                self.edge_positions.insert((source, target), self.edges.len());
                self.edges.push(Edge {
                    source,
                    target,
                    label,
                });
            }
        }
    }

    fn visit(&mut self, record: &Rc<Record>) -> Result<usize, GraphError> {
        let key = Rc::as_ptr(record);
        if let Some(&id) = self.ids.get(&key) {
            return Ok(id);
        }
        if self.in_progress.contains(&key) {
            return Err(GraphError::Cycle(
                record.type_name().unwrap_or("<untyped>").to_string(),
            ));
        }
        let id = self.next_id;
        self.next_id += 1;
        self.in_progress.insert(key);

        let mut attributes = IndexMap::new();
        for (name, field) in record.fields() {
            match field {
                Field::Node(child) => {
                    let target = self.visit(child)?;
                    self.add_edge(id, target, name.clone());
                }
                Field::List(items) if field.holds_nodes() => {
                    for (index, item) in items.iter().enumerate() {
                        let child = item
                            .as_node()
                            .ok_or_else(|| GraphError::MixedField(name.clone()))?;
                        let target = self.visit(child)?;
                        self.add_edge(id, target, format!("{name}[{index}]"));
                    }
                }
                Field::Map(entries) if field.holds_nodes() => {
                    for (entry, item) in entries {
                        let child = item
                            .as_node()
                            .ok_or_else(|| GraphError::MixedField(name.clone()))?;
                        let target = self.visit(child)?;
                        self.add_edge(id, target, format!("{name}.{entry}"));
                    }
                }
                _ => {
                    let value = field
                        .to_json()
                        .ok_or_else(|| GraphError::MixedField(name.clone()))?;
                    attributes.insert(name.clone(), value);
                }
            }
        }

        self.in_progress.remove(&key);
        self.ids.insert(key, id);
        self.nodes.push(GraphNode { id, attributes });
        Ok(id)
    }
}

/// Converts records to the graph format. A record reachable along several paths is
/// emitted once.
pub fn asg_to_json_graph(roots: &[Rc<Record>]) -> Result<JsonGraph, GraphError> {
    let mut builder = GraphBuilder::default();
    for root in roots {
        builder.visit(root)?;
    }
    debug!(
        nodes = builder.nodes.len(),
        edges = builder.edges.len(),
        "built json graph"
    );
    Ok(JsonGraph {
        graph: Graph {
            directed: true,
            nodes: builder.nodes,
            edges: builder.edges,
        },
    })
}

/// Flattens ASG roots, keeping the nodes they share, and converts them.
pub fn nodes_to_json_graph(roots: &[NodeRef]) -> Result<JsonGraph, GraphError> {
    let mut flattener = Flattener::new();
    let records: Vec<_> = roots.iter().map(|root| flattener.flatten(root)).collect();
    asg_to_json_graph(&records)
}

/// Where an edge label puts its target in the source record.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Slot {
    Singular(String),
    Indexed(String, usize),
    Keyed(String, String),
}

fn parse_label(label: &str) -> Result<Slot, GraphError> {
    if SINGULAR_FIELDS.contains(&label) {
        return Ok(Slot::Singular(label.to_string()));
    }
    if let Some(captures) = INDEXED_LABEL.captures(label) {
        let field = &captures["field"];
        if LIST_FIELDS.contains(&field) {
            let index = captures["index"]
                .parse()
                .map_err(|_| GraphError::UnknownLabel(label.to_string()))?;
            return Ok(Slot::Indexed(field.to_string(), index));
        }
    }
    if let Some(captures) = KEYED_LABEL.captures(label) {
        let field = &captures["field"];
        if MAP_FIELDS.contains(&field) {
            return Ok(Slot::Keyed(field.to_string(), captures["key"].to_string()));
        }
    }
    Err(GraphError::UnknownLabel(label.to_string()))
}

struct RecordBuilder<'g> {
    nodes: IndexMap<usize, &'g GraphNode>,
    /// Outgoing slots of each node, in edge order.
    outgoing: HashMap<usize, Vec<(Slot, usize)>>,
    built: HashMap<usize, Rc<Record>>,
    in_progress: HashSet<usize>,
}

impl RecordBuilder<'_> {
    fn build(&mut self, id: usize) -> Result<Rc<Record>, GraphError> {
        if let Some(record) = self.built.get(&id) {
            return Ok(record.clone());
        }
        if !self.in_progress.insert(id) {
            return Err(GraphError::Cycle(id.to_string()));
        }
        let node = self
            .nodes
            .get(&id)
            .copied()
            .ok_or_else(|| GraphError::Malformed(format!("no node with id {id}")))?;
        let mut record = Record::new();
        for (name, value) in &node.attributes {
            record.insert(name.clone(), Field::from_json(value.clone()));
        }

        let mut lists: IndexMap<String, BTreeMap<usize, Rc<Record>>> = IndexMap::new();
        let mut maps: IndexMap<String, IndexMap<String, Field>> = IndexMap::new();
        let outgoing = self.outgoing.remove(&id).unwrap_or_default();
        for (slot, target) in outgoing {
            let child = self.build(target)?;
            let duplicate = match slot {
                Slot::Singular(field) => {
                    let duplicate = record.get(&field).is_some();
                    record.insert(field.clone(), Field::Node(child));
                    duplicate.then_some(field)
                }
                Slot::Indexed(field, index) => {
                    let items = lists.entry(field.clone()).or_default();
                    items
                        .insert(index, child)
                        .map(|_| format!("{field}[{index}]"))
                }
                Slot::Keyed(field, key) => {
                    let entries = maps.entry(field.clone()).or_default();
                    entries
                        .insert(key.clone(), Field::Node(child))
                        .map(|_| format!("{field}.{key}"))
                }
            };
            if let Some(label) = duplicate {
                return Err(GraphError::Malformed(format!(
                    "node {id} has several edges labelled {label}"
                )));
            }
        }
        for (field, items) in lists {
            if items.keys().copied().ne(0..items.len()) {
                return Err(GraphError::Malformed(format!(
                    "indices of {field} on node {id} are not contiguous"
                )));
            }
            record.insert(field, Field::List(items.into_values().map(Field::Node).collect()));
        }
        for (field, entries) in maps {
            record.insert(field, Field::Map(entries));
        }

        self.in_progress.remove(&id);
        let record = Rc::new(record);
        self.built.insert(id, record.clone());
        Ok(record)
    }
}

/// Rebuilds records from the graph format, keyed by node id in node order. Folded edge
/// labels are split back into their individual edges.
pub fn json_graph_to_asg(graph: &JsonGraph) -> Result<IndexMap<usize, Rc<Record>>, GraphError> {
    let graph = &graph.graph;
    if !graph.directed {
        return Err(GraphError::Malformed("graph is not directed".into()));
    }
    let mut nodes = IndexMap::new();
    for node in &graph.nodes {
        if nodes.insert(node.id, node).is_some() {
            return Err(GraphError::Malformed(format!("duplicate node id {}", node.id)));
        }
    }
    let mut outgoing: HashMap<usize, Vec<(Slot, usize)>> = HashMap::new();
    for edge in &graph.edges {
        for endpoint in [edge.source, edge.target] {
            if !nodes.contains_key(&endpoint) {
                return Err(GraphError::Malformed(format!(
                    "edge refers to unknown node {endpoint}"
                )));
            }
        }
        for label in edge.label.split('\n') {
            outgoing
                .entry(edge.source)
                .or_default()
                .push((parse_label(label)?, edge.target));
        }
    }

    let ids: Vec<usize> = nodes.keys().copied().collect();
    let mut builder = RecordBuilder {
        nodes,
        outgoing,
        built: HashMap::new(),
        in_progress: HashSet::new(),
    };
    let mut records = IndexMap::new();
    for id in ids {
        records.insert(id, builder.build(id)?);
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function_pass::parse_function;
    use crate::options::ConversionOptions;
    use crate::record::flatten;
    use crate::system::TaxBenefitSystem;
    use ofasg_syntax::{NodeKind, parse_source};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use unindent::unindent;

    fn formula(body: &str) -> NodeRef {
        let source = format!("def function(self, simulation, period):\n{}", unindent(body));
        let source = source
            .lines()
            .enumerate()
            .map(|(i, line)| if i == 0 { line.to_string() } else { format!("    {line}") })
            .collect::<Vec<_>>()
            .join("\n");
        let nodes = parse_source(&source).unwrap();
        let NodeKind::Def(function) = &nodes[0].kind else {
            panic!("expected a function");
        };
        parse_function(
            "function",
            &function.body,
            &IndexMap::new(),
            &TaxBenefitSystem::default(),
            &ConversionOptions::default(),
        )
        .unwrap()
        .return_node
    }

    #[test]
    fn test_round_trip() {
        let root = formula(
            "
            x = simulation.calculate('salaire', period.last_year)
            P = simulation.legislation_at(period.start).ir
            return period, max_(x * P.taux, 0)
            ",
        );
        let graph = nodes_to_json_graph(std::slice::from_ref(&root)).unwrap();
        let records = json_graph_to_asg(&graph).unwrap();
        assert_eq!(records[&0], flatten(&root));
    }

    #[test]
    fn test_round_trip_through_text() {
        let root = formula(
            "
            return period, simulation.calculate('salaire', period) * 2
            ",
        );
        let text = serde_json::to_string(&nodes_to_json_graph(&[root.clone()]).unwrap()).unwrap();
        let graph = JsonGraph::from_json(serde_json::from_str(&text).unwrap()).unwrap();
        assert_eq!(json_graph_to_asg(&graph).unwrap()[&0], flatten(&root));
    }

    #[test]
    fn test_graph_shape() {
        let root = formula(
            "
            return period, simulation.calculate('salaire', period) * 2
            ",
        );
        let graph = serde_json::to_value(nodes_to_json_graph(&[root]).unwrap()).unwrap();
        assert_eq!(
            graph,
            json!({
                "graph": {
                    "directed": true,
                    "nodes": [
                        {"id": 1, "type": "period", "nodetype": "builtin-period"},
                        {"id": 4, "type": "period", "nodetype": "builtin-period"},
                        {
                            "id": 3,
                            "type": "value",
                            "nodetype": "variable_for_period",
                            "operator": "calculate",
                            "variable_name": "salaire",
                            "arg_dict": {},
                        },
                        {"id": 5, "type": "value", "nodetype": "int", "value": 2},
                        {"id": 2, "type": "value", "nodetype": "arithmetic_operation", "op": "*"},
                        {"id": 0, "type": "return", "nodetype": "return"},
                    ],
                    "edges": [
                        {"source": 0, "target": 1, "label": "period"},
                        {"source": 3, "target": 4, "label": "period"},
                        {"source": 2, "target": 3, "label": "operands[0]"},
                        {"source": 2, "target": 5, "label": "operands[1]"},
                        {"source": 0, "target": 2, "label": "value"},
                    ],
                }
            })
        );
    }

    #[test]
    fn test_parallel_edges_are_folded() {
        let root = formula(
            "
            x = simulation.calculate('salaire', period)
            return period, x + x
            ",
        );
        let graph = nodes_to_json_graph(&[root.clone()]).unwrap();
        let folded: Vec<_> = graph
            .graph
            .edges
            .iter()
            .filter(|edge| edge.label.contains('\n'))
            .collect();
        assert_eq!(folded.len(), 1);
        assert_eq!(folded[0].label, "operands[0]\noperands[1]");
        assert_eq!(json_graph_to_asg(&graph).unwrap()[&0], flatten(&root));
    }

    #[test]
    fn test_shared_nodes_are_emitted_once() {
        let root = formula(
            "
            x = simulation.calculate('salaire', period)
            y = x * 2
            return period, y + x
            ",
        );
        let graph = nodes_to_json_graph(&[root]).unwrap();
        let variables = graph
            .graph
            .nodes
            .iter()
            .filter(|node| node.attributes["nodetype"] == "variable_for_period")
            .count();
        assert_eq!(variables, 1);
    }

    fn graph(edges: Value) -> JsonGraph {
        JsonGraph::from_json(json!({
            "graph": {
                "directed": true,
                "nodes": [
                    {"id": 0, "type": "return", "nodetype": "return"},
                    {"id": 1, "type": "value", "nodetype": "int", "value": 1},
                ],
                "edges": edges,
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_unknown_label() {
        let err = json_graph_to_asg(&graph(json!([
            {"source": 0, "target": 1, "label": "foo"}
        ])))
        .unwrap_err();
        assert_eq!(err.to_string(), "Unknown label : foo");
    }

    #[test]
    fn test_cycle_is_rejected() {
        let err = json_graph_to_asg(&graph(json!([
            {"source": 0, "target": 1, "label": "value"},
            {"source": 1, "target": 0, "label": "value"},
        ])))
        .unwrap_err();
        assert!(matches!(err, GraphError::Cycle(_)));
    }

    #[test]
    fn test_gapped_indices_are_rejected() {
        let err = json_graph_to_asg(&graph(json!([
            {"source": 0, "target": 1, "label": "operands[1]"}
        ])))
        .unwrap_err();
        assert!(matches!(err, GraphError::Malformed(_)));
    }

    #[test]
    fn test_undirected_graph_is_rejected() {
        let graph = JsonGraph::from_json(json!({
            "graph": {"directed": false, "nodes": [], "edges": []}
        }))
        .unwrap();
        assert!(matches!(
            json_graph_to_asg(&graph),
            Err(GraphError::Malformed(_))
        ));
        assert!(JsonGraph::from_json(json!({"graph": {}, "other": 1})).is_err());
    }

    #[test]
    fn test_mixed_list_is_rejected() {
        let node = Rc::new(Record::new().with_value("type", "value"));
        let record = Rc::new(Record::new().with(
            "operands",
            Field::List(vec![Field::Node(node), Field::Scalar(json!(1))]),
        ));
        assert_eq!(
            asg_to_json_graph(&[record]).unwrap_err(),
            GraphError::MixedField("operands".into())
        );
    }
}
