//! Directed graph over string-keyed nodes stored as an index arena with
//! adjacency lists. Edges have set semantics.

use std::collections::{HashMap, HashSet, VecDeque};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeIndex(usize);

impl NodeIndex {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, Default)]
pub struct DiGraph {
    keys: Vec<String>,
    lookup: HashMap<String, NodeIndex>,
    outgoing: Vec<Vec<NodeIndex>>,
    in_degree: Vec<usize>,
    edge_set: HashSet<(NodeIndex, NodeIndex)>,
}

impl DiGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a graph from node keys and `(source, target)` key pairs. Pairs
    /// naming unknown keys are dropped.
    pub fn from_edges<'a, N, E>(nodes: N, edges: E) -> Self
    where
        N: IntoIterator<Item = &'a str>,
        E: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut graph = Self::new();
        for key in nodes {
            graph.add_node(key);
        }
        for (source, target) in edges {
            if let (Some(source), Some(target)) = (graph.index_of(source), graph.index_of(target)) {
                graph.add_edge(source, target);
            }
        }
        graph
    }

    /// Returns the existing index when the key is already present.
    pub fn add_node(&mut self, key: &str) -> NodeIndex {
        if let Some(index) = self.lookup.get(key) {
            return *index;
        }
        let index = NodeIndex(self.keys.len());
        self.keys.push(key.to_owned());
        self.lookup.insert(key.to_owned(), index);
        self.outgoing.push(Vec::new());
        self.in_degree.push(0);
        index
    }

    /// Returns `false` when the edge already existed.
    pub fn add_edge(&mut self, source: NodeIndex, target: NodeIndex) -> bool {
        if !self.edge_set.insert((source, target)) {
            return false;
        }
        self.outgoing[source.0].push(target);
        self.in_degree[target.0] += 1;
        true
    }

    pub fn node_count(&self) -> usize {
        self.keys.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edge_set.len()
    }

    pub fn index_of(&self, key: &str) -> Option<NodeIndex> {
        self.lookup.get(key).copied()
    }

    pub fn key(&self, index: NodeIndex) -> &str {
        &self.keys[index.0]
    }

    pub fn successors(&self, index: NodeIndex) -> &[NodeIndex] {
        &self.outgoing[index.0]
    }

    pub fn in_degree(&self, index: NodeIndex) -> usize {
        self.in_degree[index.0]
    }

    pub fn in_degree_of(&self, key: &str) -> Option<usize> {
        self.index_of(key).map(|index| self.in_degree(index))
    }

    /// Every node reachable from any of `roots`, roots included.
    pub fn reachable_from<I>(&self, roots: I) -> HashSet<NodeIndex>
    where
        I: IntoIterator<Item = NodeIndex>,
    {
        let mut seen = HashSet::new();
        let mut queue = VecDeque::new();
        for root in roots {
            if seen.insert(root) {
                queue.push_back(root);
            }
        }

        while let Some(current) = queue.pop_front() {
            for next in self.successors(current) {
                if seen.insert(*next) {
                    queue.push_back(*next);
                }
            }
        }

        seen
    }

    /// Simple paths from `source` to `target` with at most `max_hops` edges,
    /// in depth-first discovery order. Stops after `limit` paths. A node is
    /// never a path to itself.
    pub fn simple_paths(
        &self,
        source: NodeIndex,
        target: NodeIndex,
        max_hops: usize,
        limit: usize,
    ) -> Vec<Vec<NodeIndex>> {
        let mut found = Vec::new();
        if source == target || max_hops == 0 || limit == 0 {
            return found;
        }

        let mut path = vec![source];
        let mut on_path = HashSet::from([source]);
        // Each frame holds a node on the path and the next successor slot to try.
        let mut stack = vec![(source, 0usize)];

        while let Some((node, cursor)) = stack.last_mut() {
            let successors = self.successors(*node);
            if *cursor >= successors.len() {
                if let Some((done, _)) = stack.pop() {
                    on_path.remove(&done);
                }
                path.pop();
                continue;
            }

            let next = successors[*cursor];
            *cursor += 1;

            if next == target {
                let mut complete = path.clone();
                complete.push(next);
                found.push(complete);
                if found.len() >= limit {
                    break;
                }
                continue;
            }

            if !on_path.contains(&next) && path.len() < max_hops {
                path.push(next);
                on_path.insert(next);
                stack.push((next, 0));
            }
        }

        found
    }

    pub fn paths_as_keys(&self, paths: &[Vec<NodeIndex>]) -> Vec<Vec<String>> {
        paths
            .iter()
            .map(|path| path.iter().map(|index| self.key(*index).to_owned()).collect())
            .collect()
    }
}
