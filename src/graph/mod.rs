//! Generic directed-graph primitives: construction, validation with full
//! cycle reporting, transitive reduction, and subsumption of dynamically
//! built subgraphs. Edge direction follows execution order: an edge
//! `A -> B` means A runs before B and B observes A's effects.

mod walker;

pub use walker::{walk, CancelToken, NodeResult, WalkOpts};

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::error::GraphError;

pub trait GraphNode {
    /// Stable display name, used for rendering and cycle reports.
    fn node_name(&self) -> String;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

/// Nodes are stored behind `Arc` so the walker's worker threads can execute
/// a node while the scheduler keeps ownership of the structure.
pub struct Graph<N> {
    nodes: Vec<Option<Arc<N>>>,
    down: Vec<BTreeSet<usize>>,
    up: Vec<BTreeSet<usize>>,
}

impl<N: GraphNode> Default for Graph<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<N: GraphNode> Graph<N> {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            down: Vec::new(),
            up: Vec::new(),
        }
    }

    pub fn add(&mut self, node: N) -> NodeId {
        self.add_arc(Arc::new(node))
    }

    pub fn add_arc(&mut self, node: Arc<N>) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(Some(node));
        self.down.push(BTreeSet::new());
        self.up.push(BTreeSet::new());
        NodeId(id)
    }

    pub fn remove(&mut self, id: NodeId) {
        if self.nodes.get(id.0).map(|n| n.is_none()).unwrap_or(true) {
            return;
        }
        for succ in self.down[id.0].clone() {
            self.up[succ].remove(&id.0);
        }
        for pred in self.up[id.0].clone() {
            self.down[pred].remove(&id.0);
        }
        self.down[id.0].clear();
        self.up[id.0].clear();
        self.nodes[id.0] = None;
    }

    /// Add the edge `from -> to`. Self-loops and duplicates are ignored.
    pub fn connect(&mut self, from: NodeId, to: NodeId) {
        if from == to || !self.is_live(from) || !self.is_live(to) {
            return;
        }
        self.down[from.0].insert(to.0);
        self.up[to.0].insert(from.0);
    }

    pub fn disconnect(&mut self, from: NodeId, to: NodeId) {
        if from.0 < self.down.len() {
            self.down[from.0].remove(&to.0);
        }
        if to.0 < self.up.len() {
            self.up[to.0].remove(&from.0);
        }
    }

    pub fn is_live(&self, id: NodeId) -> bool {
        self.nodes.get(id.0).map(|n| n.is_some()).unwrap_or(false)
    }

    pub fn node(&self, id: NodeId) -> Option<&Arc<N>> {
        self.nodes.get(id.0).and_then(|n| n.as_ref())
    }

    /// Replace a node in place, keeping its edges. Used by transformers
    /// that attach data to existing vertices.
    pub fn replace(&mut self, id: NodeId, node: N) {
        if self.is_live(id) {
            self.nodes[id.0] = Some(Arc::new(node));
        }
    }

    pub fn ids(&self) -> Vec<NodeId> {
        (0..self.nodes.len())
            .filter(|&i| self.nodes[i].is_some())
            .map(NodeId)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn successors(&self, id: NodeId) -> Vec<NodeId> {
        self.down
            .get(id.0)
            .map(|s| s.iter().map(|&i| NodeId(i)).collect())
            .unwrap_or_default()
    }

    pub fn predecessors(&self, id: NodeId) -> Vec<NodeId> {
        self.up
            .get(id.0)
            .map(|s| s.iter().map(|&i| NodeId(i)).collect())
            .unwrap_or_default()
    }

    /// Vertices with no outgoing edges.
    pub fn sinks(&self) -> Vec<NodeId> {
        self.ids()
            .into_iter()
            .filter(|id| self.down[id.0].is_empty())
            .collect()
    }

    /// All vertices reachable from `seed` following edges forward,
    /// excluding the seed itself.
    pub fn descendants(&self, seed: NodeId) -> BTreeSet<NodeId> {
        self.reach(seed, false)
    }

    /// All vertices reachable from `seed` following edges backward,
    /// excluding the seed itself.
    pub fn ancestors(&self, seed: NodeId) -> BTreeSet<NodeId> {
        self.reach(seed, true)
    }

    fn reach(&self, seed: NodeId, backward: bool) -> BTreeSet<NodeId> {
        let mut seen = BTreeSet::new();
        let mut stack = vec![seed.0];
        while let Some(v) = stack.pop() {
            let next = if backward { &self.up[v] } else { &self.down[v] };
            for &w in next {
                if self.nodes[w].is_some() && seen.insert(NodeId(w)) {
                    stack.push(w);
                }
            }
        }
        seen
    }

    /// Detect cycles; returns every offending strongly-connected component.
    fn find_cycles(&self) -> Vec<Vec<usize>> {
        let n = self.nodes.len();
        let mut index = vec![usize::MAX; n];
        let mut low = vec![0usize; n];
        let mut on_stack = vec![false; n];
        let mut stack: Vec<usize> = Vec::new();
        let mut next_index = 0usize;
        let mut cycles = Vec::new();

        for start in 0..n {
            if self.nodes[start].is_none() || index[start] != usize::MAX {
                continue;
            }
            let mut call: Vec<(usize, Vec<usize>, usize)> = Vec::new();
            index[start] = next_index;
            low[start] = next_index;
            next_index += 1;
            stack.push(start);
            on_stack[start] = true;
            call.push((start, self.down[start].iter().copied().collect(), 0));

            while let Some(frame) = call.last_mut() {
                let v = frame.0;
                if frame.2 < frame.1.len() {
                    let w = frame.1[frame.2];
                    frame.2 += 1;
                    if self.nodes[w].is_none() {
                        continue;
                    }
                    if index[w] == usize::MAX {
                        index[w] = next_index;
                        low[w] = next_index;
                        next_index += 1;
                        stack.push(w);
                        on_stack[w] = true;
                        call.push((w, self.down[w].iter().copied().collect(), 0));
                    } else if on_stack[w] {
                        low[v] = low[v].min(index[w]);
                    }
                } else {
                    if low[v] == index[v] {
                        let mut scc = Vec::new();
                        loop {
                            let w = stack.pop().unwrap();
                            on_stack[w] = false;
                            scc.push(w);
                            if w == v {
                                break;
                            }
                        }
                        if scc.len() > 1 || self.down[v].contains(&v) {
                            scc.reverse();
                            cycles.push(scc);
                        }
                    }
                    call.pop();
                    if let Some(parent) = call.last() {
                        let p = parent.0;
                        low[p] = low[p].min(low[v]);
                    }
                }
            }
        }

        cycles
    }

    /// Check acyclicity and, when requested, that exactly one sink (the
    /// synthetic root) remains.
    pub fn validate(&self, expect_root: bool) -> Result<(), GraphError> {
        let cycles = self.find_cycles();
        if !cycles.is_empty() {
            let named = cycles
                .into_iter()
                .map(|cycle| {
                    cycle
                        .into_iter()
                        .map(|i| {
                            self.nodes[i]
                                .as_ref()
                                .map(|n| n.node_name())
                                .unwrap_or_default()
                        })
                        .collect()
                })
                .collect();
            return Err(GraphError::Cycles(named));
        }
        if expect_root {
            let sinks = self.sinks();
            if sinks.len() != 1 {
                return Err(GraphError::BadRoot(sinks.len()));
            }
        }
        Ok(())
    }

    /// Remove edges implied by longer paths.
    pub fn transitive_reduction(&mut self) {
        for u in self.ids() {
            let direct: Vec<NodeId> = self.successors(u);
            for &v in &direct {
                let reachable = self.descendants(v);
                for &w in &direct {
                    if w != v && reachable.contains(&w) {
                        self.disconnect(u, w);
                    }
                }
            }
        }
    }

    /// Drain another graph's vertices and edges into this one, returning
    /// the new id for each of the other graph's slots.
    pub fn subsume(&mut self, other: Graph<N>) -> Vec<Option<NodeId>> {
        let mut mapping: Vec<Option<NodeId>> = Vec::with_capacity(other.nodes.len());
        for node in other.nodes.into_iter() {
            mapping.push(node.map(|n| self.add_arc(n)));
        }
        for (from, succs) in other.down.into_iter().enumerate() {
            let Some(new_from) = mapping[from] else { continue };
            for to in succs {
                if let Some(new_to) = mapping[to] {
                    self.connect(new_from, new_to);
                }
            }
        }
        mapping
    }

    /// Stable textual rendering for debugging: nodes sorted by name, each
    /// followed by its successor list.
    pub fn debug_render(&self) -> String {
        let mut lines: Vec<(String, Vec<String>)> = self
            .ids()
            .into_iter()
            .map(|id| {
                let name = self.node(id).unwrap().node_name();
                let mut succs: Vec<String> = self
                    .successors(id)
                    .into_iter()
                    .map(|s| self.node(s).unwrap().node_name())
                    .collect();
                succs.sort();
                (name, succs)
            })
            .collect();
        lines.sort();

        let mut out = String::new();
        for (name, succs) in lines {
            out.push_str(&name);
            out.push('\n');
            for succ in succs {
                out.push_str("  -> ");
                out.push_str(&succ);
                out.push('\n');
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Named(&'static str);

    impl GraphNode for Named {
        fn node_name(&self) -> String {
            self.0.to_string()
        }
    }

    fn diamond() -> (Graph<Named>, NodeId, NodeId, NodeId, NodeId) {
        let mut g = Graph::new();
        let a = g.add(Named("a"));
        let b = g.add(Named("b"));
        let c = g.add(Named("c"));
        let d = g.add(Named("d"));
        g.connect(a, b);
        g.connect(a, c);
        g.connect(b, d);
        g.connect(c, d);
        (g, a, b, c, d)
    }

    #[test]
    fn validate_accepts_dag_and_reports_cycles() {
        let (mut g, a, _, _, d) = diamond();
        assert!(g.validate(true).is_ok());

        g.connect(d, a);
        match g.validate(false) {
            Err(GraphError::Cycles(cycles)) => {
                assert_eq!(cycles.len(), 1);
                assert_eq!(cycles[0].len(), 4);
            }
            other => panic!("expected cycle error, got {:?}", other),
        }
    }

    #[test]
    fn validate_counts_roots() {
        let (mut g, _, _, _, _) = diamond();
        g.add(Named("stray"));
        assert!(matches!(g.validate(true), Err(GraphError::BadRoot(2))));
    }

    #[test]
    fn transitive_reduction_removes_shortcuts() {
        let (mut g, a, _, _, d) = diamond();
        g.connect(a, d);
        assert_eq!(g.successors(a).len(), 3);
        g.transitive_reduction();
        assert_eq!(g.successors(a).len(), 2);
        // The essential edges survive.
        assert!(g.validate(true).is_ok());
    }

    #[test]
    fn remove_strips_edges() {
        let (mut g, a, b, _, d) = diamond();
        g.remove(b);
        assert_eq!(g.len(), 3);
        assert!(!g.successors(a).contains(&b));
        assert!(!g.predecessors(d).contains(&b));
    }

    #[test]
    fn subsume_remaps_edges() {
        let mut main = Graph::new();
        let root = main.add(Named("root"));

        let mut sub = Graph::new();
        let x = sub.add(Named("x"));
        let y = sub.add(Named("y"));
        sub.connect(x, y);

        let mapping = main.subsume(sub);
        let new_x = mapping[x.0].unwrap();
        let new_y = mapping[y.0].unwrap();
        main.connect(root, new_x);

        assert_eq!(main.len(), 3);
        assert!(main.successors(new_x).contains(&new_y));
    }

    #[test]
    fn self_loop_is_rejected_silently() {
        let mut g = Graph::new();
        let a = g.add(Named("a"));
        g.connect(a, a);
        assert!(g.successors(a).is_empty());
        assert!(g.validate(false).is_ok());
    }

    #[test]
    fn debug_render_is_stable() {
        let (g, _, _, _, _) = diamond();
        let text = g.debug_render();
        let expected = "a\n  -> b\n  -> c\nb\n  -> d\nc\n  -> d\nd\n";
        assert_eq!(text, expected);
    }

    #[test]
    fn descendants_and_ancestors() {
        let (g, a, b, _, d) = diamond();
        assert_eq!(g.descendants(a).len(), 3);
        assert_eq!(g.ancestors(d).len(), 3);
        assert_eq!(g.descendants(b), [d].into_iter().collect());
    }
}
