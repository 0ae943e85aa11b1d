//! Arena-backed directed graph with cycle detection, cycle breaking and
//! topological grouping.
//!
//! Vertices and edges live in vectors and are addressed by index. Removal
//! tombstones the slot, so ids stay stable for the lifetime of the graph.

use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VertexId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EdgeId(pub usize);

#[derive(Debug, Clone, PartialEq)]
pub struct Edge<E> {
    pub source: VertexId,
    pub target: VertexId,
    pub data: E,
}

/// A cycle as the ordered list of vertices on it; the last vertex has an
/// edge back to the first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cycle {
    pub path: Vec<VertexId>,
}

#[derive(Debug, Clone)]
pub struct Graph<V, E> {
    vertices: Vec<Option<V>>,
    edges: Vec<Option<Edge<E>>>,
    outgoing: Vec<Vec<EdgeId>>,
    incoming: Vec<Vec<EdgeId>>,
}

impl<V, E> Default for Graph<V, E> {
    fn default() -> Self {
        Self {
            vertices: Vec::new(),
            edges: Vec::new(),
            outgoing: Vec::new(),
            incoming: Vec::new(),
        }
    }
}

impl<V, E> Graph<V, E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_vertex(&mut self, data: V) -> VertexId {
        let id = VertexId(self.vertices.len());
        self.vertices.push(Some(data));
        self.outgoing.push(Vec::new());
        self.incoming.push(Vec::new());
        id
    }

    /// Add an edge between two live vertices. Returns `None` if either is gone.
    pub fn add_edge(&mut self, source: VertexId, target: VertexId, data: E) -> Option<EdgeId> {
        if self.vertex(source).is_none() || self.vertex(target).is_none() {
            return None;
        }
        let id = EdgeId(self.edges.len());
        self.edges.push(Some(Edge {
            source,
            target,
            data,
        }));
        self.outgoing[source.0].push(id);
        self.incoming[target.0].push(id);
        Some(id)
    }

    pub fn vertex(&self, id: VertexId) -> Option<&V> {
        self.vertices.get(id.0).and_then(Option::as_ref)
    }

    pub fn edge(&self, id: EdgeId) -> Option<&Edge<E>> {
        self.edges.get(id.0).and_then(Option::as_ref)
    }

    /// Live vertex ids in insertion order.
    pub fn vertex_ids(&self) -> impl Iterator<Item = VertexId> + '_ {
        self.vertices
            .iter()
            .enumerate()
            .filter(|(_, v)| v.is_some())
            .map(|(i, _)| VertexId(i))
    }

    pub fn vertices(&self) -> impl Iterator<Item = (VertexId, &V)> + '_ {
        self.vertices
            .iter()
            .enumerate()
            .filter_map(|(i, v)| v.as_ref().map(|v| (VertexId(i), v)))
    }

    pub fn edges(&self) -> impl Iterator<Item = (EdgeId, &Edge<E>)> + '_ {
        self.edges
            .iter()
            .enumerate()
            .filter_map(|(i, e)| e.as_ref().map(|e| (EdgeId(i), e)))
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.iter().filter(|v| v.is_some()).count()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.iter().filter(|e| e.is_some()).count()
    }

    pub fn out_edges(&self, id: VertexId) -> impl Iterator<Item = (EdgeId, &Edge<E>)> + '_ {
        self.outgoing
            .get(id.0)
            .into_iter()
            .flatten()
            .filter_map(|e| self.edge(*e).map(|edge| (*e, edge)))
    }

    pub fn in_edges(&self, id: VertexId) -> impl Iterator<Item = (EdgeId, &Edge<E>)> + '_ {
        self.incoming
            .get(id.0)
            .into_iter()
            .flatten()
            .filter_map(|e| self.edge(*e).map(|edge| (*e, edge)))
    }

    pub fn in_degree(&self, id: VertexId) -> usize {
        self.in_edges(id).count()
    }

    pub fn has_edge(&self, source: VertexId, target: VertexId) -> bool {
        self.out_edges(source).any(|(_, e)| e.target == target)
    }

    pub fn remove_edge(&mut self, id: EdgeId) -> Option<Edge<E>> {
        let edge = self.edges.get_mut(id.0)?.take()?;
        self.outgoing[edge.source.0].retain(|e| *e != id);
        self.incoming[edge.target.0].retain(|e| *e != id);
        Some(edge)
    }

    /// Remove a vertex together with every edge touching it.
    pub fn remove_vertex(&mut self, id: VertexId) -> Option<V> {
        let data = self.vertices.get_mut(id.0)?.take()?;
        let touching: Vec<EdgeId> = self.outgoing[id.0]
            .iter()
            .chain(self.incoming[id.0].iter())
            .copied()
            .collect();
        for edge in touching {
            self.remove_edge(edge);
        }
        Some(data)
    }

    /// Depth-first search from every vertex, reporting each back edge as a
    /// cycle with its full path.
    pub fn cycles(&self) -> Vec<Cycle> {
        let mut visited = vec![false; self.vertices.len()];
        let mut on_stack = vec![false; self.vertices.len()];
        let mut stack = Vec::new();
        let mut cycles = Vec::new();

        for id in self.vertex_ids() {
            if !visited[id.0] {
                self.visit(id, &mut visited, &mut on_stack, &mut stack, &mut cycles);
            }
        }
        cycles
    }

    fn visit(
        &self,
        id: VertexId,
        visited: &mut [bool],
        on_stack: &mut [bool],
        stack: &mut Vec<VertexId>,
        cycles: &mut Vec<Cycle>,
    ) {
        visited[id.0] = true;
        on_stack[id.0] = true;
        stack.push(id);

        let targets: Vec<VertexId> = self.out_edges(id).map(|(_, e)| e.target).collect();
        for target in targets {
            if on_stack[target.0] {
                if let Some(start) = stack.iter().position(|v| *v == target) {
                    cycles.push(Cycle {
                        path: stack[start..].to_vec(),
                    });
                }
            } else if !visited[target.0] {
                self.visit(target, visited, on_stack, stack, cycles);
            }
        }

        stack.pop();
        on_stack[id.0] = false;
    }

    /// True while every consecutive pair of the cycle is still connected.
    fn is_intact(&self, cycle: &Cycle) -> bool {
        let n = cycle.path.len();
        (0..n).all(|i| self.has_edge(cycle.path[i], cycle.path[(i + 1) % n]))
    }

    /// Remove edges until the graph is acyclic.
    ///
    /// For each cycle the vertices are tried in reverse path order; the first
    /// vertex whose incoming edges from within the cycle are all removable
    /// loses those edges. Returns the removed edges, or the first cycle that
    /// has no such vertex.
    pub fn break_cycles<F>(&mut self, is_removable: F) -> Result<Vec<Edge<E>>, Cycle>
    where
        F: Fn(&E) -> bool,
    {
        let mut removed = Vec::new();
        loop {
            let cycles = self.cycles();
            if cycles.is_empty() {
                return Ok(removed);
            }

            for cycle in cycles {
                if !self.is_intact(&cycle) {
                    continue;
                }
                let members: HashSet<VertexId> = cycle.path.iter().copied().collect();

                let candidate = cycle.path.iter().rev().find_map(|vertex| {
                    let in_cycle: Vec<(EdgeId, &Edge<E>)> = self
                        .in_edges(*vertex)
                        .filter(|(_, e)| members.contains(&e.source))
                        .collect();
                    let all_removable =
                        !in_cycle.is_empty() && in_cycle.iter().all(|(_, e)| is_removable(&e.data));
                    all_removable.then(|| in_cycle.iter().map(|(id, _)| *id).collect::<Vec<_>>())
                });

                match candidate {
                    Some(edge_ids) => {
                        for id in edge_ids {
                            if let Some(edge) = self.remove_edge(id) {
                                removed.push(edge);
                            }
                        }
                    }
                    None => return Err(cycle),
                }
            }
        }
    }

    /// Group vertices into dependency levels: each level holds every vertex
    /// whose predecessors all sit in earlier levels. Within a level, vertices
    /// are sorted by `sort_key`. Returns the unplaced vertices if the graph
    /// still has a cycle.
    pub fn grouped<K, F>(&self, sort_key: F) -> Result<Vec<Vec<VertexId>>, Vec<VertexId>>
    where
        K: Ord,
        F: Fn(&V) -> K,
    {
        let mut in_degree = vec![0usize; self.vertices.len()];
        let mut remaining: Vec<VertexId> = self.vertex_ids().collect();
        for id in &remaining {
            in_degree[id.0] = self.in_degree(*id);
        }

        let mut groups = Vec::new();
        while !remaining.is_empty() {
            let (mut ready, rest): (Vec<VertexId>, Vec<VertexId>) =
                remaining.into_iter().partition(|id| in_degree[id.0] == 0);
            if ready.is_empty() {
                return Err(rest);
            }

            ready.sort_by_key(|id| self.vertex(*id).map(&sort_key));
            for id in &ready {
                for (_, edge) in self.out_edges(*id) {
                    in_degree[edge.target.0] = in_degree[edge.target.0].saturating_sub(1);
                }
            }
            groups.push(ready);
            remaining = rest;
        }
        Ok(groups)
    }
}
