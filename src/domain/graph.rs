//! Directed graph of named vertices
//!
//! Vertices and edges live in arenas and are addressed by stable ids, so two
//! edges between the same pair of vertices stay distinguishable and removal
//! never invalidates other handles. Traversals are driven by a FIFO queue fed
//! with each vertex's outgoing edges in insertion order, which keeps every
//! ordering reproducible for an identical sequence of insertions.
//!
//! Cycle detection is delegated to petgraph over a projection of the live
//! edges.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;

use petgraph::algo::{is_cyclic_directed, tarjan_scc};
use petgraph::graph::{DiGraph, NodeIndex};

/// Handle to a vertex owned by a [`Graph`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VertexId(usize);

/// Handle to an edge owned by a [`Graph`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EdgeId(usize);

/// A named vertex
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vertex {
    name: String,
}

impl Vertex {
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// An ordered (parent, child) pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    pub parent: VertexId,
    pub child: VertexId,
}

/// A rooted directed graph
#[derive(Debug, Default, Clone)]
pub struct Graph {
    root: Option<VertexId>,
    vertices: Vec<Vertex>,
    /// Outgoing edges per vertex, in insertion order
    adjacency: Vec<Vec<EdgeId>>,
    /// Every edge ever added; `None` once removed
    edges: Vec<Option<Edge>>,
}

impl Graph {
    /// Creates an empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a vertex by name, returning the existing one if already present
    pub fn add_vertex(&mut self, name: &str) -> VertexId {
        if let Some(id) = self.find_vertex(name) {
            return id;
        }

        let id = VertexId(self.vertices.len());
        self.vertices.push(Vertex {
            name: name.to_string(),
        });
        self.adjacency.push(Vec::new());
        id
    }

    /// Designates the root vertex, adding it if needed
    ///
    /// Calling this twice with different names moves the root; edges already
    /// attached to the previous root stay where they are.
    pub fn add_root(&mut self, name: &str) -> VertexId {
        let id = self.add_vertex(name);
        self.root = Some(id);
        id
    }

    /// Returns the root vertex, if one was designated
    pub fn root(&self) -> Option<VertexId> {
        self.root
    }

    /// Adds an edge from `parent` (or the root when `None`) to `child`
    ///
    /// Returns `None` when no parent was given and the graph has no root.
    pub fn add_edge(&mut self, parent: Option<VertexId>, child: VertexId) -> Option<EdgeId> {
        let parent = parent.or(self.root)?;

        let id = EdgeId(self.edges.len());
        self.edges.push(Some(Edge { parent, child }));
        self.adjacency[parent.0].push(id);
        Some(id)
    }

    /// Adds an edge between two vertices identified by name, creating them as needed
    pub fn add_edge_between(&mut self, parent: &str, child: &str) -> EdgeId {
        let parent = self.add_vertex(parent);
        let child = self.add_vertex(child);

        let id = EdgeId(self.edges.len());
        self.edges.push(Some(Edge { parent, child }));
        self.adjacency[parent.0].push(id);
        id
    }

    /// Removes an edge by handle; returns false if it was already gone
    pub fn remove_edge(&mut self, id: EdgeId) -> bool {
        let Some(edge) = self.edges.get_mut(id.0).and_then(Option::take) else {
            return false;
        };

        self.adjacency[edge.parent.0].retain(|e| *e != id);
        true
    }

    /// Finds a vertex by name (linear scan)
    pub fn find_vertex(&self, name: &str) -> Option<VertexId> {
        self.vertices
            .iter()
            .position(|v| v.name == name)
            .map(VertexId)
    }

    /// Returns the vertex behind a handle
    pub fn vertex(&self, id: VertexId) -> &Vertex {
        &self.vertices[id.0]
    }

    /// Returns the name of a vertex
    pub fn name(&self, id: VertexId) -> &str {
        &self.vertices[id.0].name
    }

    /// Returns a live edge
    pub fn edge(&self, id: EdgeId) -> Option<&Edge> {
        self.edges.get(id.0).and_then(Option::as_ref)
    }

    /// Iterates over live edges in insertion order
    pub fn edges(&self) -> impl Iterator<Item = (EdgeId, &Edge)> {
        self.edges
            .iter()
            .enumerate()
            .filter_map(|(i, e)| e.as_ref().map(|e| (EdgeId(i), e)))
    }

    /// Returns live edges as (parent name, child name) pairs in insertion order
    pub fn edge_names(&self) -> Vec<(&str, &str)> {
        self.edges()
            .map(|(_, e)| (self.name(e.parent), self.name(e.child)))
            .collect()
    }

    /// Returns the number of live edges
    pub fn edge_count(&self) -> usize {
        self.edges().count()
    }

    /// Returns the number of vertices
    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    /// Returns true if the graph has no vertices
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    /// Returns the direct children of a vertex, following edge insertion order
    pub fn children(&self, id: VertexId) -> impl Iterator<Item = VertexId> + '_ {
        self.adjacency[id.0]
            .iter()
            .filter_map(|e| self.edge(*e))
            .map(|e| e.child)
    }

    /// Visits every vertex reachable from `start` exactly once
    ///
    /// Vertices are taken from a FIFO queue; after a vertex is visited, the
    /// children of its outgoing edges are appended in insertion order. The
    /// visitor returns false to stop the traversal immediately.
    pub fn visit<F>(&self, start: VertexId, mut visitor: F)
    where
        F: FnMut(VertexId, &Vertex) -> bool,
    {
        let mut visited = HashSet::new();
        let mut pending = VecDeque::from([start]);

        while let Some(id) = pending.pop_front() {
            if !visited.insert(id) {
                continue;
            }

            if !visitor(id, self.vertex(id)) {
                return;
            }

            pending.extend(self.children(id));
        }
    }

    /// Collects the traversal of [`Graph::visit`] into a list
    pub fn vertex_list(&self, start: VertexId) -> Vec<VertexId> {
        let mut result = Vec::new();
        self.visit(start, |id, _| {
            result.push(id);
            true
        });
        result
    }

    /// Like [`Graph::vertex_list`], starting from the root
    pub fn vertex_list_from_root(&self) -> Vec<VertexId> {
        self.root.map(|r| self.vertex_list(r)).unwrap_or_default()
    }

    /// Returns the vertices reachable from `start` in topological order
    ///
    /// Uses the same queue discipline as [`Graph::visit`], but a vertex is
    /// only released once every edge reaching it from the explored subgraph
    /// has been consumed. Vertices sitting on a cycle are never released.
    pub fn topological_order(&self, start: VertexId) -> Vec<VertexId> {
        let reachable = self.vertex_list(start);

        let mut indegree: HashMap<VertexId, usize> = HashMap::new();
        for id in &reachable {
            for child in self.children(*id) {
                *indegree.entry(child).or_default() += 1;
            }
        }

        let mut order = Vec::with_capacity(reachable.len());
        let mut pending = VecDeque::from([start]);
        while let Some(id) = pending.pop_front() {
            order.push(id);
            for child in self.children(id) {
                if let Some(remaining) = indegree.get_mut(&child) {
                    *remaining -= 1;
                    if *remaining == 0 {
                        pending.push_back(child);
                    }
                }
            }
        }

        order
    }

    /// Removes edges implied by longer paths, and duplicate edges
    ///
    /// For each vertex reachable from the root, any direct edge to a vertex
    /// that can also be reached through one of its children's outgoing edges
    /// is dropped. Applying it a second time changes nothing.
    pub fn transitive_reduction(&mut self) {
        let Some(root) = self.root else {
            return;
        };

        let mut processed = HashSet::new();
        let mut pending = VecDeque::from([root]);

        while let Some(id) = pending.pop_front() {
            if !processed.insert(id) {
                continue;
            }

            let upper: Vec<(EdgeId, VertexId)> = self.adjacency[id.0]
                .iter()
                .filter_map(|e| self.edge(*e).map(|edge| (*e, edge.child)))
                .collect();

            let mut targets = HashSet::new();
            for (edge, child) in &upper {
                if !targets.insert(*child) {
                    self.remove_edge(*edge);
                }
            }

            // A -> B -> C & A -> C: upper edges A->B, A->C; lower edge B->C
            let lower_children: Vec<VertexId> = upper
                .iter()
                .flat_map(|(_, child)| self.children(*child).collect::<Vec<_>>())
                .collect();

            for lower in lower_children {
                let below: HashSet<VertexId> = self.vertex_list(lower).into_iter().collect();
                for (edge, child) in &upper {
                    if below.contains(child) {
                        self.remove_edge(*edge);
                    }
                }
            }

            pending.extend(self.children(id));
        }
    }

    /// Returns true if any cycle exists anywhere in the graph, self-loops included
    pub fn has_cycles(&self) -> bool {
        is_cyclic_directed(&self.projection())
    }

    /// Returns the names of the vertices on each cycle, sorted within each group
    pub fn cycle_members(&self) -> Vec<Vec<String>> {
        let graph = self.projection();

        let mut cycles: Vec<Vec<String>> = tarjan_scc(&graph)
            .into_iter()
            .filter(|scc| scc.len() > 1 || graph.contains_edge(scc[0], scc[0]))
            .map(|scc| {
                let mut names: Vec<String> = scc
                    .into_iter()
                    .map(|n| self.vertices[graph[n]].name.clone())
                    .collect();
                names.sort();
                names
            })
            .collect();

        cycles.sort();
        cycles
    }

    /// Builds a petgraph view of the live edges; node weights are arena indices
    fn projection(&self) -> DiGraph<usize, ()> {
        let mut graph = DiGraph::with_capacity(self.vertices.len(), self.edges.len());
        let nodes: Vec<NodeIndex> = (0..self.vertices.len())
            .map(|i| graph.add_node(i))
            .collect();

        for (_, edge) in self.edges() {
            graph.add_edge(nodes[edge.parent.0], nodes[edge.child.0], ());
        }

        graph
    }
}

impl fmt::Display for Graph {
    /// Writes one `parent -> child` line per edge reachable from the root
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(root) = self.root else {
            return Ok(());
        };

        for id in self.vertex_list(root) {
            for child in self.children(id) {
                writeln!(f, "{} -> {}", self.name(id), self.name(child))?;
            }
        }
        Ok(())
    }
}
