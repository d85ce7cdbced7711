//! Directed Acyclic Graph for Operation Dependencies
//!
//! Builds a DAG either from a plan (inferring dependencies from the paths
//! each operation produces, vacates and touches) or from journaled entries
//! (reusing the dependencies recorded at `begin`), then groups operations
//! into levels that can run in parallel.

use crate::plan::Plan;
use crate::security::PathValidator;
use crate::wal::entry::WALEntry;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

/// Error types for DAG operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DAGError {
    /// A cycle was detected in the dependency graph
    #[error("Cycle detected in operation dependencies")]
    CycleDetected,
    /// A referenced dependency was not found
    #[error("Dependency not found: {0}")]
    DependencyNotFound(String),
    /// Two nodes share one operation id
    #[error("Duplicate operation id: {0}")]
    DuplicateOperation(String),
}

impl From<DAGError> for String {
    fn from(err: DAGError) -> Self {
        err.to_string()
    }
}

/// Node payload: the operation id and its position in plan order
#[derive(Debug, Clone)]
struct DagNode {
    id: String,
    sequence: u32,
}

/// Paths an operation interacts with, normalized for prefix comparison
struct Footprint {
    produced: Option<PathBuf>,
    vacated: Option<PathBuf>,
    touched: Vec<PathBuf>,
}

fn normalize(path: &Path) -> PathBuf {
    PathValidator::normalize_path(path).unwrap_or_else(|_| path.to_path_buf())
}

/// True when `path` is `base` or nested under it (component-wise)
fn is_same_or_under(path: &Path, base: &Path) -> bool {
    path.starts_with(base)
}

fn is_strictly_under(path: &Path, base: &Path) -> bool {
    path != base && path.starts_with(base)
}

/// Whether operation `b` must wait for `a`, wherever each sits in the plan
fn must_follow(a: &Footprint, b: &Footprint) -> bool {
    // b works inside something a brings into existence
    if let Some(produced) = &a.produced {
        if b.touched.iter().any(|p| is_same_or_under(p, produced)) {
            return true;
        }
    }

    // b puts something where a clears the way
    if let (Some(vacated), Some(produced)) = (&a.vacated, &b.produced) {
        if is_same_or_under(produced, vacated) {
            return true;
        }
    }

    // b removes an ancestor of something a still needs
    if let Some(vacated) = &b.vacated {
        if a.touched.iter().any(|p| is_strictly_under(p, vacated)) {
            return true;
        }
    }

    false
}

/// A Directed Acyclic Graph for managing operation execution order
///
/// Operations are nodes in the graph, and edges represent "must complete before"
/// relationships. The graph is organized into levels where each level's operations
/// can be executed in parallel.
#[derive(Debug)]
pub struct ExecutionDAG {
    /// The underlying petgraph structure
    graph: DiGraph<DagNode, ()>,
    /// Mapping from operation id to graph node index
    id_to_index: HashMap<String, NodeIndex>,
    /// Operations grouped by execution level (parallel groups)
    levels: Vec<Vec<NodeIndex>>,
}

impl ExecutionDAG {
    /// Build the DAG for a plan by inferring path dependencies
    pub fn from_plan(plan: &Plan) -> Result<Self, DAGError> {
        let footprints: Vec<Footprint> = plan
            .operations
            .iter()
            .map(|op| Footprint {
                produced: op.produced_path().as_deref().map(normalize),
                vacated: op.vacated_path().as_deref().map(normalize),
                touched: op.touched_paths().iter().map(|p| normalize(p)).collect(),
            })
            .collect();

        // Each pair is checked both ways. When both orders are required,
        // plan order wins.
        let mut edges: Vec<(usize, usize)> = Vec::new();
        for b in 0..footprints.len() {
            for a in 0..b {
                if must_follow(&footprints[a], &footprints[b]) {
                    edges.push((a, b));
                } else if must_follow(&footprints[b], &footprints[a]) {
                    edges.push((b, a));
                }
            }
        }

        let nodes = plan
            .operations
            .iter()
            .enumerate()
            .map(|(i, op)| DagNode {
                id: op.id.clone(),
                sequence: i as u32,
            })
            .collect();

        Self::build(nodes, edges)
    }

    /// Rebuild the DAG from journaled entries.
    ///
    /// Dependencies on operations outside `entries` (already completed) are
    /// treated as satisfied.
    pub fn from_entries(entries: &[&WALEntry]) -> Result<Self, DAGError> {
        let index_of: HashMap<&str, usize> = entries
            .iter()
            .enumerate()
            .map(|(i, e)| (e.operation_id.as_str(), i))
            .collect();

        let mut edges = Vec::new();
        for (i, entry) in entries.iter().enumerate() {
            for dep in &entry.depends_on {
                if let Some(&j) = index_of.get(dep.as_str()) {
                    edges.push((j, i));
                }
            }
        }

        let nodes = entries
            .iter()
            .map(|e| DagNode {
                id: e.operation_id.clone(),
                sequence: e.sequence,
            })
            .collect();

        Self::build(nodes, edges)
    }

    fn build(nodes: Vec<DagNode>, edges: Vec<(usize, usize)>) -> Result<Self, DAGError> {
        let mut graph: DiGraph<DagNode, ()> = DiGraph::new();
        let mut id_to_index: HashMap<String, NodeIndex> = HashMap::new();
        let mut indices = Vec::with_capacity(nodes.len());

        for node in nodes {
            let id = node.id.clone();
            let idx = graph.add_node(node);
            if id_to_index.insert(id.clone(), idx).is_some() {
                return Err(DAGError::DuplicateOperation(id));
            }
            indices.push(idx);
        }

        // Edge direction: dependency -> dependent
        for (from, to) in edges {
            graph.update_edge(indices[from], indices[to], ());
        }

        if toposort(&graph, None).is_err() {
            return Err(DAGError::CycleDetected);
        }

        let mut dag = ExecutionDAG {
            graph,
            id_to_index,
            levels: Vec::new(),
        };
        dag.compute_levels()?;

        Ok(dag)
    }

    /// Group nodes into levels by repeatedly removing nodes with no
    /// remaining incoming edges. Within a level, plan order is kept.
    fn compute_levels(&mut self) -> Result<(), DAGError> {
        let mut indegree: HashMap<NodeIndex, usize> = self
            .graph
            .node_indices()
            .map(|idx| {
                let incoming = self.graph.neighbors_directed(idx, Direction::Incoming).count();
                (idx, incoming)
            })
            .collect();

        let mut ready: Vec<NodeIndex> = indegree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(idx, _)| *idx)
            .collect();
        let mut placed = 0;
        let mut levels = Vec::new();

        while !ready.is_empty() {
            ready.sort_by_key(|idx| self.graph[*idx].sequence);
            let mut next = Vec::new();
            for idx in &ready {
                for dependent in self.graph.neighbors_directed(*idx, Direction::Outgoing) {
                    if let Some(d) = indegree.get_mut(&dependent) {
                        *d -= 1;
                        if *d == 0 {
                            next.push(dependent);
                        }
                    }
                }
            }
            placed += ready.len();
            levels.push(std::mem::replace(&mut ready, next));
        }

        if placed != self.graph.node_count() {
            return Err(DAGError::CycleDetected);
        }

        self.levels = levels;
        Ok(())
    }

    /// Operation ids grouped by level.
    ///
    /// Levels must be executed in order (level 0, then level 1, etc.).
    pub fn levels(&self) -> Vec<Vec<String>> {
        self.levels
            .iter()
            .map(|level| level.iter().map(|idx| self.graph[*idx].id.clone()).collect())
            .collect()
    }

    /// Direct dependencies of every operation, in plan order
    pub fn dependency_map(&self) -> HashMap<String, Vec<String>> {
        self.id_to_index
            .keys()
            .map(|id| (id.clone(), self.dependencies_of(id)))
            .collect()
    }

    /// Operation ids that `id` depends on
    pub fn dependencies_of(&self, id: &str) -> Vec<String> {
        self.neighbors(id, Direction::Incoming)
    }

    /// Operation ids that depend on `id`
    pub fn dependents_of(&self, id: &str) -> Vec<String> {
        self.neighbors(id, Direction::Outgoing)
    }

    fn neighbors(&self, id: &str, direction: Direction) -> Vec<String> {
        let Some(idx) = self.id_to_index.get(id) else {
            return Vec::new();
        };
        let mut nodes: Vec<&DagNode> = self
            .graph
            .neighbors_directed(*idx, direction)
            .map(|n| &self.graph[n])
            .collect();
        nodes.sort_by_key(|n| n.sequence);
        let mut seen = HashSet::new();
        nodes
            .into_iter()
            .filter(|n| seen.insert(n.id.as_str()))
            .map(|n| n.id.clone())
            .collect()
    }

    /// Get the total number of operations in the DAG
    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    /// Check if the DAG is empty
    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Get the number of execution levels
    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    /// Compute statistics about the DAG
    pub fn stats(&self) -> DAGStats {
        let level_sizes: Vec<usize> = self.levels.iter().map(|l| l.len()).collect();
        let max_parallelism = level_sizes.iter().max().copied().unwrap_or(0);

        DAGStats {
            total_operations: self.len(),
            level_count: self.level_count(),
            level_sizes,
            max_parallelism,
        }
    }
}

/// Statistics about the DAG structure
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DAGStats {
    pub total_operations: usize,
    pub level_count: usize,
    pub level_sizes: Vec<usize>,
    /// Maximum number of operations that can run in parallel
    pub max_parallelism: usize,
}
