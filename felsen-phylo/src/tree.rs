//! Rooted tree topology for likelihood evaluation.
//!
//! Uses arena-style storage: nodes are numbered `0..N` and referenced by
//! `NodeId` (a `usize` index). Tips occupy `0..T`, internal nodes `T..N`.
//! The pruning order (every node after all of its children, root last) is
//! computed once at construction and never changes afterwards.

use std::collections::VecDeque;

use felsen_core::{FelsenError, Result, Summarizable};
use tracing::debug;

/// Index into the tree's node arena.
pub type NodeId = usize;

/// A directed parent-child edge with its branch length.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Branch {
    pub child: NodeId,
    pub parent: NodeId,
    pub length: f64,
}

/// Per-node parent layout, the shape a tree is serialized in.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TreeLayout {
    pub n_tips: usize,
    /// Parent of each node; `None` for the root.
    pub parents: Vec<Option<NodeId>>,
    /// Branch length above each node; the root's entry is ignored.
    pub branch_lengths: Vec<f64>,
}

/// A validated rooted tree with a cached pruning order.
#[derive(Debug, Clone)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(try_from = "TreeLayout", into = "TreeLayout")
)]
pub struct PruningTree {
    n_tips: usize,
    parents: Vec<Option<NodeId>>,
    branch_lengths: Vec<f64>,
    children: Vec<Vec<NodeId>>,
    root: NodeId,
    order: Vec<NodeId>,
}

impl PruningTree {
    /// Build a tree from parallel edge arrays.
    ///
    /// `parents[b]`, `children[b]` and `lengths[b]` describe edge `b`. Nodes
    /// `0..n_tips` must be tips and nodes `n_tips..n_nodes` internal.
    ///
    /// # Errors
    ///
    /// [`FelsenError::MalformedTree`] for structural violations (cycles,
    /// zero or multiple roots, unreachable nodes, a node with two parents,
    /// out-of-range indices, tips with children, childless internal nodes).
    /// [`FelsenError::InvalidBranchLength`] for negative or non-finite lengths.
    pub fn from_edges(
        n_nodes: usize,
        n_tips: usize,
        parents: &[NodeId],
        children: &[NodeId],
        lengths: &[f64],
    ) -> Result<Self> {
        if parents.len() != children.len() || parents.len() != lengths.len() {
            return Err(FelsenError::MalformedTree(format!(
                "edge arrays disagree in length: {} parents, {} children, {} lengths",
                parents.len(),
                children.len(),
                lengths.len()
            )));
        }
        check_counts(n_nodes, n_tips)?;

        let mut parent_of: Vec<Option<NodeId>> = vec![None; n_nodes];
        let mut length_of = vec![0.0; n_nodes];
        for (edge, ((&parent, &child), &length)) in
            parents.iter().zip(children).zip(lengths).enumerate()
        {
            if parent >= n_nodes || child >= n_nodes {
                return Err(FelsenError::MalformedTree(format!(
                    "edge {} ({} -> {}) references a node outside 0..{}",
                    edge, parent, child, n_nodes
                )));
            }
            if parent == child {
                return Err(FelsenError::MalformedTree(format!(
                    "edge {} is a self-loop on node {}",
                    edge, child
                )));
            }
            if parent_of[child].is_some() {
                return Err(FelsenError::MalformedTree(format!(
                    "node {} has more than one parent",
                    child
                )));
            }
            check_branch_length(child, length)?;
            parent_of[child] = Some(parent);
            length_of[child] = length;
        }

        Self::build(n_tips, parent_of, length_of)
    }

    /// Build a tree from a per-node parent array.
    ///
    /// `parents[n]` is the parent of node `n` (`None` for the root) and
    /// `branch_lengths[n]` the length of the branch above `n`. The root's
    /// branch length is ignored.
    pub fn from_parents(
        parents: &[Option<NodeId>],
        branch_lengths: &[f64],
        n_tips: usize,
    ) -> Result<Self> {
        let n_nodes = parents.len();
        if branch_lengths.len() != n_nodes {
            return Err(FelsenError::MalformedTree(format!(
                "{} parents but {} branch lengths",
                n_nodes,
                branch_lengths.len()
            )));
        }
        check_counts(n_nodes, n_tips)?;

        let mut length_of = vec![0.0; n_nodes];
        for (node, (&parent, &length)) in parents.iter().zip(branch_lengths).enumerate() {
            let Some(parent) = parent else {
                continue;
            };
            if parent >= n_nodes {
                return Err(FelsenError::MalformedTree(format!(
                    "node {} has parent {} outside 0..{}",
                    node, parent, n_nodes
                )));
            }
            if parent == node {
                return Err(FelsenError::MalformedTree(format!(
                    "node {} is its own parent",
                    node
                )));
            }
            check_branch_length(node, length)?;
            length_of[node] = length;
        }

        Self::build(n_tips, parents.to_vec(), length_of)
    }

    fn build(n_tips: usize, parents: Vec<Option<NodeId>>, branch_lengths: Vec<f64>) -> Result<Self> {
        let n_nodes = parents.len();

        let roots: Vec<NodeId> = (0..n_nodes).filter(|&n| parents[n].is_none()).collect();
        let root = match roots.as_slice() {
            [root] => *root,
            [] => {
                return Err(FelsenError::MalformedTree(
                    "no root: every node has a parent".into(),
                ))
            }
            _ => {
                return Err(FelsenError::MalformedTree(format!(
                    "{} roots found ({:?}); expected exactly one",
                    roots.len(),
                    roots
                )))
            }
        };

        let mut children: Vec<Vec<NodeId>> = vec![Vec::new(); n_nodes];
        for (node, parent) in parents.iter().enumerate() {
            if let Some(p) = parent {
                children[*p].push(node);
            }
        }

        for (node, kids) in children.iter().enumerate() {
            if node < n_tips && !kids.is_empty() {
                return Err(FelsenError::MalformedTree(format!(
                    "tip {} has {} children; tips must be numbered 0..{}",
                    node,
                    kids.len(),
                    n_tips
                )));
            }
            if node >= n_tips && kids.is_empty() {
                return Err(FelsenError::MalformedTree(format!(
                    "internal node {} has no children",
                    node
                )));
            }
        }

        let order = pruning_order(&parents, &children, n_tips);
        if order.len() != n_nodes {
            let mut seen = vec![false; n_nodes];
            for &n in &order {
                seen[n] = true;
            }
            let stuck: Vec<NodeId> = (0..n_nodes).filter(|&n| !seen[n]).take(8).collect();
            return Err(FelsenError::MalformedTree(format!(
                "cycle or unreachable nodes: {} of {} nodes cannot reach the root (e.g. {:?})",
                n_nodes - order.len(),
                n_nodes,
                stuck
            )));
        }

        debug!(n_nodes, n_tips, root, "built pruning tree");
        Ok(Self {
            n_tips,
            parents,
            branch_lengths,
            children,
            root,
            order,
        })
    }

    /// Number of tips (leaves), numbered `0..n_tips()`.
    pub fn n_tips(&self) -> usize {
        self.n_tips
    }

    /// Total number of nodes.
    pub fn n_nodes(&self) -> usize {
        self.parents.len()
    }

    /// Number of parent-child edges (`n_nodes() - 1`).
    pub fn n_branches(&self) -> usize {
        self.n_nodes() - 1
    }

    /// The root node id.
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// True if `node` is a tip.
    pub fn is_tip(&self, node: NodeId) -> bool {
        node < self.n_tips
    }

    /// Parent of `node`, `None` for the root or an out-of-range id.
    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.parents.get(node).copied().flatten()
    }

    /// Length of the branch above `node`, `None` for the root.
    pub fn branch_length(&self, node: NodeId) -> Option<f64> {
        self.parent(node).map(|_| self.branch_lengths[node])
    }

    /// Children of `node` (empty for tips and out-of-range ids).
    pub fn children(&self, node: NodeId) -> &[NodeId] {
        match self.children.get(node) {
            Some(kids) => kids,
            None => &[],
        }
    }

    /// Every node, each after all of its children, ending at the root.
    pub fn pruning_order(&self) -> &[NodeId] {
        &self.order
    }

    /// Branches in pruning order: each child is final before its branch is
    /// folded into the parent.
    pub fn branches(&self) -> impl Iterator<Item = Branch> + '_ {
        self.order.iter().filter_map(move |&child| {
            self.parents[child].map(|parent| Branch {
                child,
                parent,
                length: self.branch_lengths[child],
            })
        })
    }

    /// Sum of all branch lengths.
    pub fn total_branch_length(&self) -> f64 {
        self.branches().map(|b| b.length).sum()
    }

    /// Maximum number of edges from the root to any tip.
    pub fn depth(&self) -> usize {
        let mut depth = vec![0usize; self.n_nodes()];
        let mut max = 0;
        for &node in self.order.iter().rev() {
            if let Some(p) = self.parents[node] {
                depth[node] = depth[p] + 1;
                max = max.max(depth[node]);
            }
        }
        max
    }

    /// The per-node parent layout of this tree.
    pub fn layout(&self) -> TreeLayout {
        TreeLayout {
            n_tips: self.n_tips,
            parents: self.parents.clone(),
            branch_lengths: self.branch_lengths.clone(),
        }
    }
}

impl TryFrom<TreeLayout> for PruningTree {
    type Error = FelsenError;

    fn try_from(layout: TreeLayout) -> Result<Self> {
        Self::from_parents(&layout.parents, &layout.branch_lengths, layout.n_tips)
    }
}

impl From<PruningTree> for TreeLayout {
    fn from(tree: PruningTree) -> Self {
        tree.layout()
    }
}

impl Summarizable for PruningTree {
    fn summary(&self) -> String {
        format!(
            "PruningTree: {} nodes ({} tips, {} internal), total branch length {:.4}",
            self.n_nodes(),
            self.n_tips,
            self.n_nodes() - self.n_tips,
            self.total_branch_length()
        )
    }
}

fn check_counts(n_nodes: usize, n_tips: usize) -> Result<()> {
    if n_tips == 0 {
        return Err(FelsenError::MalformedTree("tree has no tips".into()));
    }
    if n_nodes <= n_tips {
        return Err(FelsenError::MalformedTree(format!(
            "{} nodes cannot hold {} tips and an internal root",
            n_nodes, n_tips
        )));
    }
    Ok(())
}

fn check_branch_length(node: NodeId, length: f64) -> Result<()> {
    if !length.is_finite() || length < 0.0 {
        return Err(FelsenError::InvalidBranchLength(format!(
            "branch above node {} has length {}",
            node, length
        )));
    }
    Ok(())
}

/// Kahn-style traversal from the tips: a parent is queued once its last
/// outstanding child has been emitted. Nodes on a cycle never reach zero
/// outstanding children, so the returned order is short exactly when the
/// parent pointers contain a cycle.
fn pruning_order(parents: &[Option<NodeId>], children: &[Vec<NodeId>], n_tips: usize) -> Vec<NodeId> {
    let n_nodes = parents.len();
    let mut pending: Vec<usize> = children.iter().map(Vec::len).collect();
    let mut queue: VecDeque<NodeId> = (0..n_tips).collect();
    let mut order = Vec::with_capacity(n_nodes);

    while let Some(node) = queue.pop_front() {
        order.push(node);
        if let Some(p) = parents[node] {
            pending[p] -= 1;
            if pending[p] == 0 {
                queue.push_back(p);
            }
        }
    }
    order
}
