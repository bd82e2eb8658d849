//! Graph validation and the immutable [`CompiledGraph`].
//!
//! Compilation runs in a single pass over the built [`Graph`]:
//!
//! 1. The entry point is set and names a registered node.
//! 2. Every simple-edge source and target is known (targets may be `END`).
//! 3. A path from the entry to `END` exists. Router return values cannot be
//!    precomputed, so a conditional edge is assumed able to reach any node
//!    and `END`.
//! 4. No cycle consists purely of simple edges. A node with a conditional
//!    edge has no simple edges, so such a cycle could never exit.
//! 5. Every fork (a node with two or more simple targets) has a unique join
//!    node that all branches pass through before `END`.
//!
//! Nodes unreachable from the entry are permitted but reported with a
//! warning. The result is an immutable snapshot safe to share across
//! concurrent runs, carrying the precomputed reachability set and fork/join
//! pairs the runner consumes.

use super::builder::Graph;
use super::edge::{is_end, NodeFn, NodeId, RouterFn};
use crate::error::GraphError;
use crate::runner::{BranchHook, ForkJoinConfig};
use crate::state::GraphState;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;

/// A fork node's branch heads and the unique node they converge on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForkJoinPair {
    /// Branch entry nodes, in edge insertion order.
    pub branches: Vec<NodeId>,
    /// The node all branches reach before `END`.
    pub join: NodeId,
}

/// Immutable, validated snapshot of a [`Graph`], safe for concurrent runs.
#[derive(Clone)]
pub struct CompiledGraph<S: GraphState> {
    pub(crate) nodes: HashMap<NodeId, NodeFn<S>>,
    pub(crate) simple_edges: HashMap<NodeId, Vec<NodeId>>,
    pub(crate) routers: HashMap<NodeId, RouterFn<S>>,
    pub(crate) entry: NodeId,
    pub(crate) fork_joins: HashMap<NodeId, ForkJoinPair>,
    pub(crate) reachable: HashSet<NodeId>,
    pub(crate) branch_hook: Option<Arc<dyn BranchHook<S>>>,
    pub(crate) fork_config: ForkJoinConfig,
}

impl<S: GraphState> CompiledGraph<S> {
    /// The entry node id.
    pub fn entry(&self) -> &str {
        &self.entry
    }

    /// Ids of all registered nodes, sorted.
    pub fn node_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.nodes.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    /// Number of registered nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Whether `id` names a registered node.
    pub fn has_node(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    /// Whether `id` is a fork node.
    pub fn is_fork(&self, id: &str) -> bool {
        self.fork_joins.contains_key(id)
    }

    /// The fork/join pair rooted at `id`, if it is a fork.
    pub fn fork_join(&self, id: &str) -> Option<&ForkJoinPair> {
        self.fork_joins.get(id)
    }

    /// Nodes reachable from the entry (conditional edges counted as
    /// reaching every node).
    pub fn reachable(&self) -> &HashSet<NodeId> {
        &self.reachable
    }
}

impl<S: GraphState> fmt::Debug for CompiledGraph<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledGraph")
            .field("entry", &self.entry)
            .field("nodes", &self.node_ids())
            .field("forks", &self.fork_joins.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Single-pass validation; see the module docs for the checks performed.
pub(crate) fn compile<S: GraphState>(graph: Graph<S>) -> Result<CompiledGraph<S>, GraphError> {
    let entry = graph
        .entry
        .clone()
        .ok_or_else(|| GraphError::Compilation("entry point is not set".into()))?;
    if !graph.nodes.contains_key(&entry) {
        return Err(GraphError::Compilation(format!(
            "entry point '{entry}' is not a registered node"
        )));
    }

    validate_edge_endpoints(&graph)?;
    ensure_path_to_end(&graph, &entry)?;
    ensure_no_dead_cycles(&graph)?;
    let fork_joins = identify_fork_joins(&graph)?;
    let reachable = reachable_from(&graph, &entry);

    let unreachable: Vec<&NodeId> = {
        let mut ids: Vec<&NodeId> = graph
            .nodes
            .keys()
            .filter(|id| !reachable.contains(*id))
            .collect();
        ids.sort_unstable();
        ids
    };
    if !unreachable.is_empty() {
        tracing::warn!(nodes = ?unreachable, "graph has nodes unreachable from the entry");
    }

    Ok(CompiledGraph {
        nodes: graph.nodes,
        simple_edges: graph.simple_edges,
        routers: graph.routers,
        entry,
        fork_joins,
        reachable,
        branch_hook: graph.branch_hook,
        fork_config: graph.fork_config,
    })
}

fn validate_edge_endpoints<S: GraphState>(graph: &Graph<S>) -> Result<(), GraphError> {
    for (from, targets) in &graph.simple_edges {
        if !graph.nodes.contains_key(from) {
            return Err(GraphError::Compilation(format!(
                "edge source '{from}' is not a registered node"
            )));
        }
        for to in targets {
            if !is_end(to) && !graph.nodes.contains_key(to) {
                return Err(GraphError::Compilation(format!(
                    "edge target '{to}' (from '{from}') is not a registered node"
                )));
            }
        }
        if targets.len() > 1 && targets.iter().any(|t| is_end(t)) {
            return Err(GraphError::Compilation(format!(
                "fork at '{from}' cannot target END"
            )));
        }
    }
    for from in graph.routers.keys() {
        if !graph.nodes.contains_key(from) {
            return Err(GraphError::Compilation(format!(
                "conditional edge source '{from}' is not a registered node"
            )));
        }
    }
    Ok(())
}

/// A path from `entry` to END exists, counting a conditional edge as able
/// to return END directly.
fn ensure_path_to_end<S: GraphState>(graph: &Graph<S>, entry: &str) -> Result<(), GraphError> {
    let mut queue = VecDeque::from([entry.to_string()]);
    let mut seen = HashSet::from([entry.to_string()]);

    while let Some(node) = queue.pop_front() {
        if graph.routers.contains_key(&node) {
            return Ok(());
        }
        for target in graph.simple_edges.get(&node).into_iter().flatten() {
            if is_end(target) {
                return Ok(());
            }
            if seen.insert(target.clone()) {
                queue.push_back(target.clone());
            }
        }
    }

    Err(GraphError::Compilation(format!(
        "no path from entry '{entry}' to END"
    )))
}

/// Reject cycles made purely of simple edges: no node on such a cycle can
/// hold the conditional edge needed to break out of it.
fn ensure_no_dead_cycles<S: GraphState>(graph: &Graph<S>) -> Result<(), GraphError> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        InProgress,
        Done,
    }

    let mut marks: HashMap<&NodeId, Mark> = HashMap::new();
    // Iterate in sorted order so failure messages are deterministic.
    let mut sources: Vec<&NodeId> = graph.simple_edges.keys().collect();
    sources.sort_unstable();

    for start in sources {
        if marks.contains_key(start) {
            continue;
        }
        // Iterative DFS with an explicit path stack.
        let mut stack: Vec<(&NodeId, usize)> = vec![(start, 0)];
        marks.insert(start, Mark::InProgress);
        let mut path: Vec<&NodeId> = vec![start];

        loop {
            let (node, idx) = match stack.last_mut() {
                None => break,
                Some((node, next_idx)) => {
                    let idx = *next_idx;
                    *next_idx += 1;
                    (*node, idx)
                }
            };
            let target = graph.simple_edges.get(node).and_then(|t| t.get(idx));
            match target {
                Some(target) if is_end(target) => {}
                Some(target) => match marks.get(target) {
                    Some(Mark::InProgress) => {
                        let pos = path.iter().position(|n| *n == target).unwrap_or(0);
                        let cycle: Vec<&str> = path[pos..].iter().map(|n| n.as_str()).collect();
                        return Err(GraphError::Compilation(format!(
                            "cycle without a conditional exit: {} -> {}",
                            cycle.join(" -> "),
                            target
                        )));
                    }
                    Some(Mark::Done) => {}
                    None => {
                        marks.insert(target, Mark::InProgress);
                        path.push(target);
                        stack.push((target, 0));
                    }
                },
                None => {
                    marks.insert(node, Mark::Done);
                    path.pop();
                    stack.pop();
                }
            }
        }
    }
    Ok(())
}

/// Nodes reachable from `entry`. A conditional edge may return any node, so
/// touching one makes every node reachable.
fn reachable_from<S: GraphState>(graph: &Graph<S>, entry: &str) -> HashSet<NodeId> {
    let mut queue = VecDeque::from([entry.to_string()]);
    let mut seen = HashSet::from([entry.to_string()]);

    while let Some(node) = queue.pop_front() {
        if graph.routers.contains_key(&node) {
            return graph.nodes.keys().cloned().collect();
        }
        for target in graph.simple_edges.get(&node).into_iter().flatten() {
            if !is_end(target) && seen.insert(target.clone()) {
                queue.push_back(target.clone());
            }
        }
    }
    seen
}

/// Identify the join node for every fork. See the module docs for the
/// criteria; conditional edges inside a branch make the join undecidable.
fn identify_fork_joins<S: GraphState>(
    graph: &Graph<S>,
) -> Result<HashMap<NodeId, ForkJoinPair>, GraphError> {
    let mut pairs = HashMap::new();

    for (fork, targets) in &graph.simple_edges {
        if targets.len() < 2 {
            continue;
        }

        let mut depth_maps = Vec::with_capacity(targets.len());
        for branch in targets {
            depth_maps.push(branch_depths(graph, fork, branch)?);
        }

        // Candidates appear in every branch's reachable set.
        let mut candidates: Vec<&NodeId> = depth_maps[0]
            .keys()
            .filter(|node| depth_maps.iter().all(|m| m.contains_key(*node)))
            .collect();
        candidates.sort_unstable();
        if candidates.is_empty() {
            return Err(GraphError::Compilation(format!(
                "branches of fork '{fork}' never converge on a join node"
            )));
        }

        // The join is the earliest common node: minimal worst-case depth.
        let max_depth = |node: &&NodeId| -> usize {
            depth_maps
                .iter()
                .map(|m| *m.get(*node).unwrap_or(&usize::MAX))
                .max()
                .unwrap_or(usize::MAX)
        };
        let best = candidates
            .iter()
            .map(|node| max_depth(node))
            .min()
            .unwrap_or(usize::MAX);
        let joins: Vec<&NodeId> = candidates
            .into_iter()
            .filter(|node| max_depth(node) == best)
            .collect();
        if joins.len() > 1 {
            let names: Vec<&str> = joins.iter().map(|n| n.as_str()).collect();
            return Err(GraphError::Compilation(format!(
                "fork '{fork}' has no unique join node (candidates: {})",
                names.join(", ")
            )));
        }
        let join = joins[0].clone();

        // Every branch must pass through the join before END.
        for branch in targets {
            if reaches_end_avoiding(graph, branch, &join) {
                return Err(GraphError::Compilation(format!(
                    "branch '{branch}' of fork '{fork}' can reach END without passing join '{join}'"
                )));
            }
        }

        pairs.insert(
            fork.clone(),
            ForkJoinPair {
                branches: targets.clone(),
                join,
            },
        );
    }

    Ok(pairs)
}

/// BFS depth map over simple edges from a branch head, not traversing END.
fn branch_depths<S: GraphState>(
    graph: &Graph<S>,
    fork: &str,
    branch: &str,
) -> Result<BTreeMap<NodeId, usize>, GraphError> {
    let mut depths = BTreeMap::from([(branch.to_string(), 0usize)]);
    let mut queue = VecDeque::from([branch.to_string()]);

    while let Some(node) = queue.pop_front() {
        if graph.routers.contains_key(&node) {
            return Err(GraphError::Compilation(format!(
                "conditional edge at '{node}' inside a branch of fork '{fork}' makes the join undecidable"
            )));
        }
        let depth = depths[&node];
        for target in graph.simple_edges.get(&node).into_iter().flatten() {
            if is_end(target) || depths.contains_key(target) {
                continue;
            }
            depths.insert(target.clone(), depth + 1);
            queue.push_back(target.clone());
        }
    }
    Ok(depths)
}

/// Whether END is reachable from `start` over simple edges while never
/// visiting `avoid`.
fn reaches_end_avoiding<S: GraphState>(graph: &Graph<S>, start: &str, avoid: &str) -> bool {
    if start == avoid {
        return false;
    }
    let mut queue = VecDeque::from([start.to_string()]);
    let mut seen = HashSet::from([start.to_string()]);

    while let Some(node) = queue.pop_front() {
        for target in graph.simple_edges.get(&node).into_iter().flatten() {
            if is_end(target) {
                return true;
            }
            if target == avoid {
                continue;
            }
            if seen.insert(target.clone()) {
                queue.push_back(target.clone());
            }
        }
    }
    false
}
