//! Undirected CFG view and depth-first spanning tree.
//!
//! Cycle equivalence is defined on the undirected multigraph underlying
//! the CFG, with one synthetic back-edge from the unified exit to the
//! entry making the procedure's outermost acyclic structure part of one
//! cycle. This module builds that view and a DFS spanning tree with
//! back-edges classified on both endpoints.

use crate::ir::{BlockId, Function};
use crate::utils::errors::{CfgError, CfgErrorKind};
use serde::{Serialize, Deserialize};
use std::collections::BTreeSet;

/// A unique identifier for undirected CFG edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UEdgeId(pub u32);

/// An unordered CFG adjacency pair.
#[derive(Debug, Clone, Copy)]
pub struct UndirectedEdge {
    /// One endpoint (the source of the original directed edge)
    pub a: BlockId,
    /// The other endpoint
    pub b: BlockId,
}

/// The undirected multigraph underlying a single-entry, unified-exit CFG.
///
/// Duplicate edges between the same block pair are preserved, not
/// deduplicated: multi-edges carry distinct control semantics (switch
/// cases).
#[derive(Debug, Clone)]
pub struct UndirectedCfg {
    edges: Vec<UndirectedEdge>,
    adjacency: Vec<Vec<UEdgeId>>,
    entry: BlockId,
    exit: BlockId,
}

impl UndirectedCfg {
    /// Build the undirected view of `function`'s CFG.
    ///
    /// Fails (without crashing) when a non-entry block has zero
    /// predecessors: unreachable blocks invalidate the view. Aborts when
    /// no zero-successor exit exists, since the unify-exit precondition
    /// guarantees exactly one; more than one exit is reported as an
    /// error so the caller can run exit unification first.
    pub fn from_function(function: &Function) -> Result<Self, CfgError> {
        if function.num_blocks() == 0 {
            return Err(CfgError::new(
                CfgErrorKind::EmptyFunction,
                "cannot build an undirected view of a function with no blocks",
            ));
        }
        let entry = function.entry();
        for block in function.block_ids() {
            if block != entry && function.block(block).predecessors.is_empty() {
                return Err(CfgError::new(
                    CfgErrorKind::UnreachableBlock,
                    format!("block {} has no predecessors", block),
                ));
            }
        }

        let exits = function.exit_blocks();
        assert!(
            !exits.is_empty(),
            "no exit block: the unify-exit precondition was not established"
        );
        if exits.len() > 1 {
            return Err(CfgError::new(
                CfgErrorKind::MultipleExits,
                format!("{} exit blocks; run exit unification first", exits.len()),
            ));
        }
        let exit = exits[0];

        let mut edges = Vec::new();
        let mut adjacency = vec![Vec::new(); function.num_blocks()];
        for block in function.block_ids() {
            for &succ in &function.block(block).successors {
                let id = UEdgeId(edges.len() as u32);
                edges.push(UndirectedEdge { a: block, b: succ });
                adjacency[block.0 as usize].push(id);
                if succ != block {
                    adjacency[succ.0 as usize].push(id);
                }
            }
        }

        Ok(Self {
            edges,
            adjacency,
            entry,
            exit,
        })
    }

    /// The entry block.
    pub fn entry(&self) -> BlockId {
        self.entry
    }

    /// The unified exit block.
    pub fn exit(&self) -> BlockId {
        self.exit
    }

    /// Number of blocks.
    pub fn num_blocks(&self) -> usize {
        self.adjacency.len()
    }

    /// Number of undirected edges.
    pub fn num_edges(&self) -> usize {
        self.edges.len()
    }

    /// Fetch an edge.
    pub fn edge(&self, id: UEdgeId) -> UndirectedEdge {
        self.edges[id.0 as usize]
    }

    /// Edges incident to `block`.
    pub fn edges_at(&self, block: BlockId) -> &[UEdgeId] {
        &self.adjacency[block.0 as usize]
    }

    /// The endpoint of `edge` that is not `block`.
    pub fn other_endpoint(&self, edge: UEdgeId, block: BlockId) -> BlockId {
        let e = self.edge(edge);
        if e.a == block {
            e.b
        } else {
            debug_assert_eq!(e.b, block);
            e.a
        }
    }
}

/// A unique identifier for spanning-tree back-edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BackedgeId(pub u32);

/// A DFS spanning tree of the undirected CFG, rooted at the entry.
///
/// `dfs_index` is the pre-order visitation number (0 = root). Undirected
/// edges not used by the tree become back-edges, registered on both
/// endpoints and deduplicated by endpoint-pair identity. One synthetic
/// back-edge from the exit to the root is appended after the tree is
/// built; it gives the algorithm its virtual source/sink cycle.
#[derive(Debug, Clone)]
pub struct SpanningTree {
    dfs_index: Vec<Option<usize>>,
    /// Pre-order block sequence; `order[i]` has dfs index `i`
    pub order: Vec<BlockId>,
    parent: Vec<Option<BlockId>>,
    parent_edge: Vec<Option<UEdgeId>>,
    children: Vec<Vec<BlockId>>,
    backedges: Vec<(BlockId, BlockId)>,
    backedges_at: Vec<Vec<BackedgeId>>,
    synthetic: BackedgeId,
    root: BlockId,
    exit: BlockId,
}

impl SpanningTree {
    /// Build the spanning tree of `cfg` with an explicit work-stack.
    pub fn new(cfg: &UndirectedCfg) -> Self {
        let n = cfg.num_blocks();
        let mut tree = Self {
            dfs_index: vec![None; n],
            order: Vec::with_capacity(n),
            parent: vec![None; n],
            parent_edge: vec![None; n],
            children: vec![Vec::new(); n],
            backedges: Vec::new(),
            backedges_at: vec![Vec::new(); n],
            synthetic: BackedgeId(0),
            root: cfg.entry(),
            exit: cfg.exit(),
        };

        let mut registered: BTreeSet<(BlockId, BlockId)> = BTreeSet::new();
        // One frame per block being expanded: (block, next adjacency
        // position).
        let mut frames: Vec<(BlockId, usize)> = vec![(cfg.entry(), 0)];
        while let Some(&(block, pos)) = frames.last() {
            let bi = block.0 as usize;
            if pos == 0 {
                tree.dfs_index[bi] = Some(tree.order.len());
                tree.order.push(block);
            }

            let Some(&edge) = cfg.edges_at(block).get(pos) else {
                frames.pop();
                continue;
            };
            frames.last_mut().unwrap().1 += 1;

            if tree.parent_edge[bi] == Some(edge) {
                continue;
            }
            let neighbor = cfg.other_endpoint(edge, block);
            let ni = neighbor.0 as usize;
            if tree.dfs_index[ni].is_none() {
                tree.parent[ni] = Some(block);
                tree.parent_edge[ni] = Some(edge);
                tree.children[bi].push(neighbor);
                frames.push((neighbor, 0));
            } else {
                // Dedupe by endpoint pair: the same undirected edge is
                // encountered from both sides.
                let pair = normalize(block, neighbor);
                if registered.insert(pair) {
                    tree.register_backedge(block, neighbor);
                }
            }
        }

        // The synthetic exit-to-entry back-edge establishes the cycle
        // structure the bracket algorithm requires.
        tree.synthetic = tree.register_backedge(tree.exit, tree.root);
        tree
    }

    fn register_backedge(&mut self, from: BlockId, to: BlockId) -> BackedgeId {
        let id = BackedgeId(self.backedges.len() as u32);
        self.backedges.push((from, to));
        self.backedges_at[from.0 as usize].push(id);
        if to != from {
            self.backedges_at[to.0 as usize].push(id);
        }
        id
    }

    /// The tree root (the CFG entry).
    pub fn root(&self) -> BlockId {
        self.root
    }

    /// The CFG exit.
    pub fn exit(&self) -> BlockId {
        self.exit
    }

    /// Pre-order index of `block`. Blocks unreachable in the undirected
    /// view have none.
    pub fn dfs_index(&self, block: BlockId) -> Option<usize> {
        self.dfs_index[block.0 as usize]
    }

    /// The tree parent of `block`.
    pub fn parent(&self, block: BlockId) -> Option<BlockId> {
        self.parent[block.0 as usize]
    }

    /// The tree children of `block`, in visitation order.
    pub fn children(&self, block: BlockId) -> &[BlockId] {
        &self.children[block.0 as usize]
    }

    /// All back-edges as (from, to) pairs; the synthetic exit-to-entry
    /// edge is included.
    pub fn backedges(&self) -> &[(BlockId, BlockId)] {
        &self.backedges
    }

    /// Fetch a back-edge.
    pub fn backedge(&self, id: BackedgeId) -> (BlockId, BlockId) {
        self.backedges[id.0 as usize]
    }

    /// Back-edges attributed to `block` (either endpoint).
    pub fn backedges_at(&self, block: BlockId) -> &[BackedgeId] {
        &self.backedges_at[block.0 as usize]
    }

    /// The synthetic exit-to-entry back-edge.
    pub fn synthetic_backedge(&self) -> BackedgeId {
        self.synthetic
    }
}

fn normalize(a: BlockId, b: BlockId) -> (BlockId, BlockId) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}
