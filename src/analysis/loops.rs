//! Loop-nest summaries and classification inputs.
//!
//! The classifier consumes facts produced by external loop analyses: the
//! loop nesting structure, the per-loop loop-carried dependence edge sets,
//! induction-variable descriptors, and a memory-cloning oracle. This
//! module reifies those contracts as plain data.

use crate::graph::{DependenceGraph, EdgeId};
use crate::ir::{BlockId, Function, ValueId};
use serde::{Serialize, Deserialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// A unique identifier for loops within one nest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LoopId(pub u32);

/// One natural loop.
#[derive(Debug, Clone)]
pub struct Loop {
    /// The loop header block
    pub header: BlockId,
    /// All member blocks, header included
    pub blocks: BTreeSet<BlockId>,
    /// The enclosing loop, None for the nest root
    pub parent: Option<LoopId>,
}

/// A loop nest: the outermost loop plus its subloops.
#[derive(Debug, Clone, Default)]
pub struct LoopNest {
    loops: Vec<Loop>,
}

impl LoopNest {
    /// Create an empty nest.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a loop. The first loop added is the nest root and must
    /// have no parent.
    pub fn add_loop(
        &mut self,
        header: BlockId,
        blocks: impl IntoIterator<Item = BlockId>,
        parent: Option<LoopId>,
    ) -> LoopId {
        let id = LoopId(self.loops.len() as u32);
        if id.0 == 0 {
            assert!(parent.is_none(), "the first loop is the nest root");
        } else {
            assert!(parent.is_some(), "non-root loops need a parent");
        }
        let mut blocks: BTreeSet<BlockId> = blocks.into_iter().collect();
        blocks.insert(header);
        self.loops.push(Loop {
            header,
            blocks,
            parent,
        });
        id
    }

    /// The outermost loop of the nest.
    pub fn root(&self) -> LoopId {
        assert!(!self.loops.is_empty(), "loop nest is empty");
        LoopId(0)
    }

    /// Fetch a loop.
    pub fn loop_info(&self, id: LoopId) -> &Loop {
        &self.loops[id.0 as usize]
    }

    /// All loop ids, root first.
    pub fn loop_ids(&self) -> impl Iterator<Item = LoopId> {
        (0..self.loops.len() as u32).map(LoopId)
    }

    /// The innermost loop containing `block`, if any.
    pub fn loop_of_block(&self, block: BlockId) -> Option<LoopId> {
        self.loop_ids()
            .filter(|&id| self.loop_info(id).blocks.contains(&block))
            .min_by_key(|&id| self.loop_info(id).blocks.len())
    }

    /// The innermost loop containing an instruction, if any.
    pub fn loop_of_instruction(&self, function: &Function, value: ValueId) -> Option<LoopId> {
        self.loop_of_block(function.block_of(value)?)
    }

    /// The root loop's header block.
    pub fn root_header(&self) -> BlockId {
        self.loop_info(self.root()).header
    }
}

/// Per-loop sets of loop-carried dependence edges.
#[derive(Debug, Clone, Default)]
pub struct LoopCarriedDependencies {
    per_loop: BTreeMap<LoopId, BTreeSet<EdgeId>>,
}

impl LoopCarriedDependencies {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attribute a loop-carried edge to a loop.
    pub fn add(&mut self, loop_id: LoopId, edge: EdgeId) {
        self.per_loop.entry(loop_id).or_default().insert(edge);
    }

    /// The loop-carried edges of one loop.
    pub fn edges_for_loop(&self, loop_id: LoopId) -> impl Iterator<Item = EdgeId> + '_ {
        self.per_loop
            .get(&loop_id)
            .into_iter()
            .flat_map(|s| s.iter().copied())
    }

    /// Loops with at least one attributed edge.
    pub fn loops(&self) -> impl Iterator<Item = LoopId> + '_ {
        self.per_loop.keys().copied()
    }

    /// Attribute every `is_loop_carried` edge of `graph` to the innermost
    /// loop containing both its endpoints (the nest root when the
    /// endpoints disagree or sit outside any subloop). A convenience for
    /// hosts without a finer-grained loop-carried analysis.
    pub fn collect_from_graph(
        graph: &DependenceGraph,
        function: &Function,
        nest: &LoopNest,
    ) -> Self {
        let mut out = Self::new();
        for e in graph.edge_ids() {
            let edge = graph.edge(e);
            if !edge.is_loop_carried {
                continue;
            }
            let from = graph.node(edge.from).value;
            let to = graph.node(edge.to).value;
            let from_loop = nest.loop_of_instruction(function, from);
            let to_loop = nest.loop_of_instruction(function, to);
            let attributed = match (from_loop, to_loop) {
                (Some(a), Some(b)) if a == b => a,
                _ => nest.root(),
            };
            out.add(attributed, e);
        }
        out
    }
}

/// Attribution of the loop-governing condition to an induction variable:
/// the header compare/branch pair plus the derivation of the compared
/// value.
#[derive(Debug, Clone)]
pub struct LoopGoverningAttribution {
    /// The header exit comparison
    pub header_cmp: ValueId,
    /// The header conditional branch
    pub header_br: ValueId,
    /// Instructions deriving the compared condition value
    pub condition_derivation: BTreeSet<ValueId>,
    /// Whether the SCC containing the IV is exactly the IV derivation
    /// plus the exit condition
    pub is_well_formed: bool,
}

/// An induction-variable descriptor from the external IV analysis.
#[derive(Debug, Clone)]
pub struct InductionVariable {
    /// The loop this IV belongs to
    pub loop_id: LoopId,
    /// The loop-entry PHI
    pub loop_entry_phi: ValueId,
    /// The IV's full derivation chain (PHI, step, wraps/casts)
    pub all_instructions: BTreeSet<ValueId>,
    /// Present when this IV governs the loop exit
    pub governing: Option<LoopGoverningAttribution>,
}

/// A provably loop-private memory location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LocationId(pub u32);

/// The memory-cloning oracle: which instructions access memory locations
/// that can be privatized per parallel worker.
#[derive(Debug, Clone, Default)]
pub struct MemoryCloningAnalysis {
    clonable: HashMap<ValueId, LocationId>,
}

impl MemoryCloningAnalysis {
    /// Create an oracle with no clonable locations.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `instruction` accesses clonable location `location`.
    pub fn mark_clonable(&mut self, instruction: ValueId, location: LocationId) {
        self.clonable.insert(instruction, location);
    }

    /// The clonable location accessed by `instruction`, if resolvable.
    pub fn clonable_location_for(&self, instruction: ValueId) -> Option<LocationId> {
        self.clonable.get(&instruction).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Opcode, TypeKind};

    #[test]
    fn test_innermost_loop_lookup() {
        let mut f = Function::new("nest");
        let entry = f.add_block("entry");
        let outer = f.add_block("outer");
        let inner = f.add_block("inner");
        f.add_edge(entry, outer);
        f.add_edge(outer, inner);
        f.add_edge(inner, outer);

        let mut nest = LoopNest::new();
        let root = nest.add_loop(outer, [outer, inner], None);
        let sub = nest.add_loop(inner, [inner], Some(root));

        assert_eq!(nest.loop_of_block(inner), Some(sub));
        assert_eq!(nest.loop_of_block(outer), Some(root));
        assert_eq!(nest.loop_of_block(entry), None);
        assert_eq!(nest.root(), root);
    }

    #[test]
    fn test_collect_loop_carried_from_graph() {
        let mut f = Function::new("loop");
        let header = f.add_block("header");
        let phi = f.add_instruction(header, "%i", Opcode::Phi, TypeKind::Int);
        let step = f.add_instruction(header, "%i.next", Opcode::Add, TypeKind::Int);

        let mut nest = LoopNest::new();
        let root = nest.add_loop(header, [header], None);

        let mut g = DependenceGraph::new();
        g.add_node(phi);
        g.add_node(step);
        g.add_data_dependence(phi, step, false);
        let carried = g.add_data_dependence(step, phi, true);

        let lcd = LoopCarriedDependencies::collect_from_graph(&g, &f, &nest);
        let edges: Vec<EdgeId> = lcd.edges_for_loop(root).collect();
        assert_eq!(edges, vec![carried]);
    }
}
