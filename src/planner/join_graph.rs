//! Join path search over a metric's declared joins.
//!
//! Tables are nodes and declared joins are undirected edges, so a join can
//! be walked from either side. Routes start at the metric's base table.

use std::collections::{HashMap, VecDeque};

use petgraph::graph::{EdgeIndex, NodeIndex, UnGraph};
use petgraph::visit::EdgeRef;

use crate::error::{ComponentPath, MetricError, MetricResult};
use crate::model::metric::{JoinSpec, Metric, PinnedPath};

/// Candidate paths listed in an ambiguity error.
const MAX_LISTED_PATHS: usize = 8;

/// One walked join edge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinHop {
    /// Index into the metric's `joins`.
    pub join: usize,
    pub from: String,
    pub to: String,
    /// Walked from the join's `table` side back to its `from` side.
    pub reversed: bool,
}

pub struct JoinGraph<'a> {
    graph: UnGraph<&'a str, usize>,
    nodes: HashMap<&'a str, NodeIndex>,
    joins: &'a [JoinSpec],
    pins: &'a [PinnedPath],
    base: &'a str,
}

impl<'a> JoinGraph<'a> {
    pub fn new(metric: &'a Metric) -> Self {
        let mut graph = UnGraph::new_undirected();
        let mut nodes = HashMap::new();

        for key in metric.table_keys() {
            nodes.entry(key).or_insert_with(|| graph.add_node(key));
        }
        for (i, join) in metric.joins.iter().enumerate() {
            let from = *nodes
                .entry(join.from.as_str())
                .or_insert_with(|| graph.add_node(join.from.as_str()));
            let to = *nodes
                .entry(join.table.name.as_str())
                .or_insert_with(|| graph.add_node(join.table.name.as_str()));
            graph.add_edge(from, to, i);
        }

        Self {
            graph,
            nodes,
            joins: &metric.joins,
            pins: &metric.pinned_paths,
            base: &metric.table.name,
        }
    }

    pub fn base(&self) -> &str {
        self.base
    }

    /// Route from the base table to `table`.
    ///
    /// A pinned path wins. Otherwise the shortest path must be unique.
    pub fn route(&self, table: &str, path: &ComponentPath) -> MetricResult<Vec<JoinHop>> {
        if table == self.base {
            return Ok(Vec::new());
        }

        if let Some((i, pin)) = self
            .pins
            .iter()
            .enumerate()
            .find(|(_, pin)| pin.table == table)
        {
            return self.pinned_route(pin, &ComponentPath::root().index("pinned_paths", i));
        }

        let no_path = || MetricError::NoJoinPath {
            path: path.clone(),
            from: self.base.to_string(),
            to: table.to_string(),
        };
        let (Some(&start), Some(&target)) = (self.nodes.get(self.base), self.nodes.get(table))
        else {
            return Err(no_path());
        };

        let mut routes = self.shortest_routes(start, target, MAX_LISTED_PATHS);
        match routes.len() {
            0 => Err(no_path()),
            1 => Ok(routes.remove(0)),
            _ => Err(MetricError::AmbiguousJoinPath {
                path: path.clone(),
                table: table.to_string(),
                paths: routes
                    .iter()
                    .map(|hops| {
                        std::iter::once(self.base.to_string())
                            .chain(hops.iter().map(|h| h.to.clone()))
                            .collect()
                    })
                    .collect(),
            }),
        }
    }

    /// Follow `base -> via.. -> table`, requiring a declared join for each hop.
    fn pinned_route(&self, pin: &PinnedPath, path: &ComponentPath) -> MetricResult<Vec<JoinHop>> {
        let stops: Vec<&str> = std::iter::once(self.base)
            .chain(pin.via.iter().map(String::as_str))
            .chain(std::iter::once(pin.table.as_str()))
            .collect();

        let mut hops = Vec::with_capacity(stops.len() - 1);
        for pair in stops.windows(2) {
            let (from, to) = (pair[0], pair[1]);
            let edge = match (self.nodes.get(from), self.nodes.get(to)) {
                (Some(&a), Some(&b)) => self.graph.find_edge(a, b),
                _ => None,
            };
            let Some(edge) = edge else {
                return Err(MetricError::validation(
                    path.clone(),
                    format!("pinned hop {} -> {} is not a declared join", from, to),
                ));
            };
            hops.push(self.hop(edge, from, to));
        }
        Ok(hops)
    }

    fn hop(&self, edge: EdgeIndex, from: &str, to: &str) -> JoinHop {
        let join = self.graph[edge];
        JoinHop {
            join,
            from: from.to_string(),
            to: to.to_string(),
            reversed: self.joins[join].table.name != to,
        }
    }

    /// All shortest routes from `start` to `target`, up to `limit`.
    fn shortest_routes(
        &self,
        start: NodeIndex,
        target: NodeIndex,
        limit: usize,
    ) -> Vec<Vec<JoinHop>> {
        // BFS keeping every parent at the shortest distance.
        let mut depth: HashMap<NodeIndex, usize> = HashMap::new();
        let mut parents: HashMap<NodeIndex, Vec<(NodeIndex, EdgeIndex)>> = HashMap::new();
        let mut queue = VecDeque::new();

        depth.insert(start, 0);
        queue.push_back(start);

        while let Some(current) = queue.pop_front() {
            let d = depth[&current];
            if depth.get(&target).is_some_and(|&t| d >= t) {
                break;
            }
            for edge in self.graph.edges(current) {
                let neighbor = if edge.source() == current {
                    edge.target()
                } else {
                    edge.source()
                };
                match depth.get(&neighbor) {
                    None => {
                        depth.insert(neighbor, d + 1);
                        parents.insert(neighbor, vec![(current, edge.id())]);
                        queue.push_back(neighbor);
                    }
                    Some(&n) if n == d + 1 => {
                        parents.entry(neighbor).or_default().push((current, edge.id()));
                    }
                    Some(_) => {}
                }
            }
        }

        if !depth.contains_key(&target) {
            return Vec::new();
        }

        let mut routes = Vec::new();
        let mut suffix = Vec::new();
        self.collect_routes(start, target, &parents, &mut suffix, &mut routes, limit);
        routes
    }

    fn collect_routes(
        &self,
        start: NodeIndex,
        node: NodeIndex,
        parents: &HashMap<NodeIndex, Vec<(NodeIndex, EdgeIndex)>>,
        suffix: &mut Vec<JoinHop>,
        routes: &mut Vec<Vec<JoinHop>>,
        limit: usize,
    ) {
        if routes.len() >= limit {
            return;
        }
        if node == start {
            routes.push(suffix.iter().rev().cloned().collect());
            return;
        }
        for &(parent, edge) in parents.get(&node).map(Vec::as_slice).unwrap_or_default() {
            suffix.push(self.hop(edge, self.graph[parent], self.graph[node]));
            self.collect_routes(start, parent, parents, suffix, routes, limit);
            suffix.pop();
        }
    }
}
