//! Cycle-equivalence classes via the bracket-set algorithm.
//!
//! Two edges are cycle equivalent iff every cycle containing one contains
//! the other; classes of the undirected CFG (with the synthetic
//! exit-to-entry back-edge) delimit single-entry single-exit regions.
//!
//! Spanning-tree nodes are processed in reverse DFS order, children
//! before parents. Each node maintains a bracket list: the ordered set of
//! back-edges currently crossing it on the path to the root, kept as an
//! intrusive doubly-linked list over the edge arena so push, delete, and
//! child-list concatenation are O(1). Capping back-edges model the
//! constraints of overlapping cycles reaching a node from more than one
//! subtree; they live in the same arena, tagged, and carry no cycle class
//! of their own.
//!
//! Class ids come from a monotonically increasing counter and carry no
//! meaning beyond equality partitioning; class 0 is an ordinary allocated
//! class (the artificial-back-edge convention).

use crate::ir::BlockId;
use crate::sese::spanning::SpanningTree;
use crate::utils::errors::{SeseError, SeseErrorKind};
use serde::{Serialize, Deserialize};

/// A unique identifier for cycle-equivalence edges (tree, back, capping).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CeEdgeId(pub u32);

/// What a cycle-equivalence edge is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CeEdgeKind {
    /// A spanning-tree edge (parent to child)
    Tree,
    /// A real back-edge (the synthetic exit-to-entry edge included)
    Back,
    /// A synthesized capping back-edge
    Capping,
}

const RECENT_UNSET: usize = usize::MAX;

/// One edge of the cycle-equivalence graph.
#[derive(Debug, Clone)]
pub struct CeEdge {
    /// Tree / back / capping
    pub kind: CeEdgeKind,
    /// Tree: the parent; back: the from-node
    pub source: BlockId,
    /// Tree: the child; back: the to-node
    pub target: BlockId,
    /// The assigned class; None for capping edges and before computation
    pub cycle_class: Option<u32>,
    recent_size: usize,
    recent_class: u32,
    prev: Option<CeEdgeId>,
    next: Option<CeEdgeId>,
}

/// An ordered, stack-like collection of open brackets. Intrusive links
/// live in the edge arena; the list only tracks the ends and the size.
#[derive(Debug, Clone, Default)]
struct BracketList {
    head: Option<CeEdgeId>,
    tail: Option<CeEdgeId>,
    size: usize,
}

impl BracketList {
    fn new() -> Self {
        Self::default()
    }

    /// The most recently pushed bracket.
    fn top(&self) -> Option<CeEdgeId> {
        self.head
    }

    fn push(&mut self, edges: &mut [CeEdge], e: CeEdgeId) {
        edges[e.0 as usize].prev = None;
        edges[e.0 as usize].next = self.head;
        if let Some(old) = self.head {
            edges[old.0 as usize].prev = Some(e);
        }
        self.head = Some(e);
        if self.tail.is_none() {
            self.tail = Some(e);
        }
        self.size += 1;
    }

    fn delete(&mut self, edges: &mut [CeEdge], e: CeEdgeId) {
        let (prev, next) = (edges[e.0 as usize].prev, edges[e.0 as usize].next);
        match prev {
            Some(p) => edges[p.0 as usize].next = next,
            None => self.head = next,
        }
        match next {
            Some(nx) => edges[nx.0 as usize].prev = prev,
            None => self.tail = prev,
        }
        edges[e.0 as usize].prev = None;
        edges[e.0 as usize].next = None;
        self.size -= 1;
    }

    /// Append `other`'s chain below this list's brackets.
    fn concat(&mut self, edges: &mut [CeEdge], other: BracketList) {
        if other.size == 0 {
            return;
        }
        match self.tail {
            Some(tail) => {
                edges[tail.0 as usize].next = other.head;
                if let Some(oh) = other.head {
                    edges[oh.0 as usize].prev = Some(tail);
                }
            }
            None => self.head = other.head,
        }
        self.tail = other.tail;
        self.size += other.size;
    }
}

/// The cycle-equivalence graph: every tree edge and back-edge annotated
/// with its class.
#[derive(Debug, Clone)]
pub struct CycleEquivalenceGraph {
    edges: Vec<CeEdge>,
    tree_edge_to: Vec<Option<CeEdgeId>>,
    adjacency: Vec<Vec<CeEdgeId>>,
    synthetic: CeEdgeId,
    entry: BlockId,
    exit: BlockId,
    num_classes: u32,
}

impl CycleEquivalenceGraph {
    /// Run the bracket-set algorithm over `tree`.
    ///
    /// An empty bracket list where a parent-edge class must be assigned
    /// means the graph does not satisfy the single-entry/single-exit
    /// precondition; that surfaces as [`SeseErrorKind::MissingBracket`],
    /// never a silently defaulted class.
    pub fn compute(tree: &SpanningTree) -> Result<Self, SeseError> {
        let n = tree.order.len();
        let nblocks = tree.order.iter().map(|b| b.0 as usize + 1).max().unwrap_or(0);

        let mut edges: Vec<CeEdge> = Vec::new();
        let mut tree_edge_to: Vec<Option<CeEdgeId>> = vec![None; nblocks];
        let mut adjacency: Vec<Vec<CeEdgeId>> = vec![Vec::new(); nblocks];
        let new_edge = |edges: &mut Vec<CeEdge>, kind, source: BlockId, target: BlockId| {
            let id = CeEdgeId(edges.len() as u32);
            edges.push(CeEdge {
                kind,
                source,
                target,
                cycle_class: None,
                recent_size: RECENT_UNSET,
                recent_class: 0,
                prev: None,
                next: None,
            });
            id
        };

        for &block in &tree.order {
            if let Some(parent) = tree.parent(block) {
                let id = new_edge(&mut edges, CeEdgeKind::Tree, parent, block);
                tree_edge_to[block.0 as usize] = Some(id);
                adjacency[parent.0 as usize].push(id);
                adjacency[block.0 as usize].push(id);
            }
        }
        // Real back-edges, in registration order; the synthetic edge is
        // the last one the spanning tree registered.
        let mut back_ids: Vec<CeEdgeId> = Vec::new();
        for &(from, to) in tree.backedges() {
            let id = new_edge(&mut edges, CeEdgeKind::Back, from, to);
            back_ids.push(id);
            adjacency[from.0 as usize].push(id);
            if to != from {
                adjacency[to.0 as usize].push(id);
            }
        }
        let synthetic = *back_ids.last().expect("spanning tree always has the synthetic back-edge");

        let mut this = Self {
            edges,
            tree_edge_to,
            adjacency,
            synthetic,
            entry: tree.root(),
            exit: tree.exit(),
            num_classes: 0,
        };

        let mut hi: Vec<usize> = vec![usize::MAX; nblocks];
        let mut blists: Vec<Option<BracketList>> = (0..nblocks).map(|_| None).collect();
        let mut capping_at: Vec<Vec<CeEdgeId>> = vec![Vec::new(); nblocks];

        // Reverse DFS order: children before parents.
        for i in (0..n).rev() {
            let node = tree.order[i];
            let ni = node.0 as usize;
            let n_dfs = i;

            // hi0: lowest dfs index reachable through one back-edge at
            // this node.
            let mut hi0 = usize::MAX;
            for &be in tree.backedges_at(node) {
                let (from, to) = tree.backedge(be);
                let other = if from == node { to } else { from };
                let other_dfs = tree
                    .dfs_index(other)
                    .expect("back-edge endpoint outside the spanning tree");
                hi0 = hi0.min(other_dfs);
            }

            // hi1/hi2: the two smallest among the children's hi values.
            let mut hi1 = usize::MAX;
            let mut hi2 = usize::MAX;
            for &child in tree.children(node) {
                let child_hi = hi[child.0 as usize];
                if child_hi < hi1 {
                    hi2 = hi1;
                    hi1 = child_hi;
                } else if child_hi < hi2 {
                    hi2 = child_hi;
                }
            }
            hi[ni] = hi0.min(hi1);

            let mut blist = BracketList::new();
            for &child in tree.children(node) {
                let child_list = blists[child.0 as usize]
                    .take()
                    .expect("child bracket list consumed twice");
                blist.concat(&mut this.edges, child_list);
            }

            // Remove capping back-edges registered against this node.
            for cap in capping_at[ni].drain(..) {
                blist.delete(&mut this.edges, cap);
            }

            // Remove real back-edges from descendants to this node; a
            // removal assigns a fresh class if the edge has none yet.
            for &be in tree.backedges_at(node) {
                let (from, to) = tree.backedge(be);
                let other = if from == node { to } else { from };
                let edge_id = back_ids[be.0 as usize];
                if other == node {
                    // Self-loop: its own singleton cycle, never a bracket.
                    if this.edges[edge_id.0 as usize].cycle_class.is_none() {
                        let class = this.fresh_class();
                        this.edges[edge_id.0 as usize].cycle_class = Some(class);
                    }
                    continue;
                }
                let other_dfs = tree.dfs_index(other).unwrap();
                if other_dfs > n_dfs {
                    blist.delete(&mut this.edges, edge_id);
                    if this.edges[edge_id.0 as usize].cycle_class.is_none() {
                        let class = this.fresh_class();
                        this.edges[edge_id.0 as usize].cycle_class = Some(class);
                    }
                }
            }

            // Push back-edges from this node to proper ancestors.
            for &be in tree.backedges_at(node) {
                let (from, to) = tree.backedge(be);
                let other = if from == node { to } else { from };
                if other == node {
                    continue;
                }
                let other_dfs = tree.dfs_index(other).unwrap();
                if other_dfs < n_dfs {
                    blist.push(&mut this.edges, back_ids[be.0 as usize]);
                }
            }

            // Capping back-edge: brackets reached this node from more
            // than one subtree. The target must be a proper ancestor
            // (hi2 above this node), which also keeps self-capping out.
            if hi2 < hi0 && hi2 < n_dfs {
                let target = tree.order[hi2];
                if target != node {
                    let cap = {
                        let id = CeEdgeId(this.edges.len() as u32);
                        this.edges.push(CeEdge {
                            kind: CeEdgeKind::Capping,
                            source: node,
                            target,
                            cycle_class: None,
                            recent_size: RECENT_UNSET,
                            recent_class: 0,
                            prev: None,
                            next: None,
                        });
                        id
                    };
                    blist.push(&mut this.edges, cap);
                    capping_at[target.0 as usize].push(cap);
                }
            }

            // Assign the parent tree edge's class from the top bracket.
            if let Some(parent_edge) = this.tree_edge_to[ni] {
                let Some(top) = blist.top() else {
                    return Err(SeseError::new(
                        SeseErrorKind::MissingBracket,
                        format!(
                            "empty bracket list at block {} while assigning its parent edge",
                            node
                        ),
                    ));
                };
                if this.edges[top.0 as usize].recent_size != blist.size {
                    let fresh = this.fresh_class();
                    this.edges[top.0 as usize].recent_size = blist.size;
                    this.edges[top.0 as usize].recent_class = fresh;
                }
                let class = this.edges[top.0 as usize].recent_class;
                this.edges[parent_edge.0 as usize].cycle_class = Some(class);
                if this.edges[top.0 as usize].recent_size == 1 {
                    // The single remaining bracket and the tree edge are
                    // cycle equivalent.
                    this.edges[top.0 as usize].cycle_class = Some(class);
                }
            }

            blists[ni] = Some(blist);
        }

        log::debug!(
            "cycle equivalence: {} edges, {} classes",
            this.edges.len(),
            this.num_classes
        );
        Ok(this)
    }

    fn fresh_class(&mut self) -> u32 {
        let class = self.num_classes;
        self.num_classes += 1;
        class
    }

    /// The entry block (traversal start for region finding).
    pub fn entry(&self) -> BlockId {
        self.entry
    }

    /// The unified exit block.
    pub fn exit(&self) -> BlockId {
        self.exit
    }

    /// Number of allocated classes.
    pub fn num_classes(&self) -> u32 {
        self.num_classes
    }

    /// Number of blocks covered by the graph.
    pub fn num_blocks(&self) -> usize {
        self.adjacency.len()
    }

    /// Fetch an edge.
    pub fn edge(&self, id: CeEdgeId) -> &CeEdge {
        &self.edges[id.0 as usize]
    }

    /// All edge ids, capping edges included.
    pub fn edge_ids(&self) -> impl Iterator<Item = CeEdgeId> {
        (0..self.edges.len() as u32).map(CeEdgeId)
    }

    /// The class of an edge. Capping edges have none; every tree and
    /// back-edge has one after computation.
    pub fn class_of(&self, id: CeEdgeId) -> Option<u32> {
        self.edges[id.0 as usize].cycle_class
    }

    /// The tree edge from `block`'s parent down to `block`.
    pub fn tree_edge_to(&self, block: BlockId) -> Option<CeEdgeId> {
        self.tree_edge_to[block.0 as usize]
    }

    /// Tree and real back-edges incident to `block` (capping edges are
    /// not part of the traversable graph).
    pub fn edges_at(&self, block: BlockId) -> &[CeEdgeId] {
        &self.adjacency[block.0 as usize]
    }

    /// The endpoint of `edge` that is not `block`.
    pub fn other_endpoint(&self, edge: CeEdgeId, block: BlockId) -> BlockId {
        let e = self.edge(edge);
        if e.source == block {
            e.target
        } else {
            debug_assert_eq!(e.target, block);
            e.source
        }
    }

    /// The synthetic exit-to-entry back-edge.
    pub fn synthetic_edge(&self) -> CeEdgeId {
        self.synthetic
    }
}
