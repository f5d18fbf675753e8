//! SESE region tree construction and queries.
//!
//! Region boundaries are pairs of cycle-equivalent edges met consecutively
//! during a depth-first walk of the cycle-equivalence graph. A second walk
//! reifies the boundaries into a nested Region forest with exactly one
//! Block-enclosing leaf per basic block, then annotation and scoping
//! queries run directly over the forest.
//!
//! The synthetic exit-to-entry edge acts as the procedure's virtual
//! enclosing bracket: it is pre-opened for its class before the walk
//! starts and never re-traversed, so the outermost straight-line portion
//! of the procedure reifies as an ordinary canonical region.

use crate::ir::{Annotation, BlockId, Function, ValueId};
use crate::sese::cycle_equiv::{CeEdgeId, CycleEquivalenceGraph};
use crate::utils::errors::{SeseError, SeseErrorKind};
use crate::utils::intern::Symbol;
use serde::{Serialize, Deserialize};
use std::collections::{HashMap, HashSet, VecDeque};

/// A unique identifier for regions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RegionId(pub u32);

/// Whether a region was delimited by a cycle-equivalence boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StructureKind {
    /// Delimited by a matched pair of cycle-equivalent edges
    Canonical,
    /// A fallback region (the root, or a block leaf filling the bijection)
    NonCanonical,
}

/// What a region wraps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EnclosesKind {
    /// Exactly one basic block (leaf)
    Block,
    /// Child regions
    Region,
}

/// A node of the SESE region forest.
#[derive(Debug, Clone)]
pub struct Region {
    /// Canonical / non-canonical
    pub structure: StructureKind,
    /// Block leaf or region interior
    pub encloses: EnclosesKind,
    /// Distance from the root
    pub depth: usize,
    /// Parent region, None for the root
    pub parent: Option<RegionId>,
    /// Child regions
    pub children: Vec<RegionId>,
    /// The wrapped block, for Block-enclosing regions
    pub block: Option<BlockId>,
    /// The delimiting start/end edges, for boundary-derived regions
    pub boundary: Option<(CeEdgeId, CeEdgeId)>,
    /// The region's annotation
    pub annotation: Annotation,
}

/// The SESE region tree of one procedure.
#[derive(Debug, Clone)]
pub struct RegionTree {
    regions: Vec<Region>,
    root: RegionId,
    block_region: Vec<RegionId>,
}

/// A matched boundary: the open edge and the edge that closed against it.
#[derive(Debug, Clone, Copy)]
struct Boundary {
    start: CeEdgeId,
    end: CeEdgeId,
}

impl RegionTree {
    /// Build the region tree over a computed cycle-equivalence graph.
    pub fn build(graph: &CycleEquivalenceGraph) -> Result<Self, SeseError> {
        let boundaries = find_boundaries(graph);
        reify(graph, &boundaries)
    }

    /// The root region.
    pub fn root(&self) -> RegionId {
        self.root
    }

    /// Fetch a region.
    pub fn region(&self, id: RegionId) -> &Region {
        &self.regions[id.0 as usize]
    }

    /// All region ids.
    pub fn region_ids(&self) -> impl Iterator<Item = RegionId> {
        (0..self.regions.len() as u32).map(RegionId)
    }

    /// Number of regions.
    pub fn num_regions(&self) -> usize {
        self.regions.len()
    }

    /// The unique Block-enclosing region wrapping `block`.
    pub fn innermost_region_for_block(&self, block: BlockId) -> RegionId {
        self.block_region[block.0 as usize]
    }

    /// The parent region.
    pub fn out(&self, id: RegionId) -> Option<RegionId> {
        self.region(id).parent
    }

    /// The first child region.
    pub fn in_(&self, id: RegionId) -> Option<RegionId> {
        self.region(id).children.first().copied()
    }

    /// The nearest Canonical ancestor.
    pub fn out_canonical(&self, id: RegionId) -> Option<RegionId> {
        let mut current = self.region(id).parent;
        while let Some(r) = current {
            if self.region(r).structure == StructureKind::Canonical {
                return Some(r);
            }
            current = self.region(r).parent;
        }
        None
    }

    /// The nearest Canonical descendant (breadth-first, shallowest wins).
    pub fn in_canonical(&self, id: RegionId) -> Option<RegionId> {
        let mut queue: VecDeque<RegionId> = self.region(id).children.iter().copied().collect();
        while let Some(r) = queue.pop_front() {
            if self.region(r).structure == StructureKind::Canonical {
                return Some(r);
            }
            queue.extend(self.region(r).children.iter().copied());
        }
        None
    }

    /// The first common ancestor of two regions: equalize depth, then walk
    /// both toward the root in lockstep. Returns None when the only common
    /// ancestor is the top-level region, meaning "no common ancestor
    /// scoped below top level".
    pub fn first_common_ancestor(&self, a: RegionId, b: RegionId) -> Option<RegionId> {
        let (mut a, mut b) = (a, b);
        while self.region(a).depth > self.region(b).depth {
            a = self.region(a).parent?;
        }
        while self.region(b).depth > self.region(a).depth {
            b = self.region(b).parent?;
        }
        while a != b {
            a = self.region(a).parent?;
            b = self.region(b).parent?;
        }
        if a == self.root {
            None
        } else {
            Some(a)
        }
    }

    /// Populate region annotations from block-level annotations: leaves
    /// take their block's agreed annotation, interior regions keep the
    /// keys/values all their children share.
    pub fn seed_annotations(&mut self, function: &Function) {
        let mut by_depth: Vec<RegionId> = self.region_ids().collect();
        by_depth.sort_by_key(|&r| std::cmp::Reverse(self.region(r).depth));
        for id in by_depth {
            let annotation = match self.region(id).block {
                Some(block) => function.block_annotation(block),
                None => {
                    let mut common: Option<Annotation> = None;
                    for &child in &self.region(id).children {
                        let child_ann = &self.region(child).annotation;
                        match &mut common {
                            None => common = Some(child_ann.clone()),
                            Some(acc) => acc.retain(|k, v| child_ann.get(k) == Some(v)),
                        }
                    }
                    common.unwrap_or_default()
                }
            };
            self.regions[id.0 as usize].annotation = annotation;
        }
    }

    /// Is an annotation key applicable across both instructions? True iff
    /// every immediate child of the first common ancestor of the
    /// instructions' innermost regions carries the key (the ancestor's own
    /// annotation decides when it is a leaf).
    pub fn valid_annotation(
        &self,
        function: &Function,
        i1: ValueId,
        i2: ValueId,
        key: Symbol,
    ) -> bool {
        let (Some(b1), Some(b2)) = (function.block_of(i1), function.block_of(i2)) else {
            return false;
        };
        let r1 = self.innermost_region_for_block(b1);
        let r2 = self.innermost_region_for_block(b2);
        let Some(fca) = self.first_common_ancestor(r1, r2) else {
            return false;
        };
        let fca_region = self.region(fca);
        if fca_region.children.is_empty() {
            return fca_region.annotation.contains_key(&key);
        }
        fca_region
            .children
            .iter()
            .all(|&child| self.region(child).annotation.contains_key(&key))
    }
}

/// Edges at `block`, unvisited first encounter order: descending cycle
/// class, ties broken by discovery (adjacency) order.
fn sorted_edges(graph: &CycleEquivalenceGraph, block: BlockId) -> Vec<CeEdgeId> {
    let mut edges: Vec<CeEdgeId> = graph.edges_at(block).to_vec();
    edges.sort_by_key(|&e| {
        std::cmp::Reverse(
            graph
                .class_of(e)
                .expect("traversable edge without a cycle class"),
        )
    });
    edges
}

struct FindFrame {
    block: BlockId,
    pos: usize,
    edges: Vec<CeEdgeId>,
    open: HashMap<u32, CeEdgeId>,
}

/// Phase 1: walk the graph depth-first, one open edge per cycle class,
/// copy-on-recurse. Traversing an edge whose class is already open closes
/// a boundary.
fn find_boundaries(graph: &CycleEquivalenceGraph) -> Vec<Boundary> {
    let mut boundaries = Vec::new();
    let mut visited_edges: HashSet<CeEdgeId> = HashSet::new();
    let mut visited_blocks: HashSet<BlockId> = HashSet::new();

    // The synthetic edge is pre-opened for its class and never traversed.
    let synthetic = graph.synthetic_edge();
    visited_edges.insert(synthetic);
    let mut initial_open = HashMap::new();
    if let Some(class) = graph.class_of(synthetic) {
        initial_open.insert(class, synthetic);
    }

    visited_blocks.insert(graph.entry());
    let mut frames = vec![FindFrame {
        block: graph.entry(),
        pos: 0,
        edges: sorted_edges(graph, graph.entry()),
        open: initial_open,
    }];

    while let Some(frame) = frames.last_mut() {
        let Some(&edge) = frame.edges.get(frame.pos) else {
            frames.pop();
            continue;
        };
        frame.pos += 1;
        if !visited_edges.insert(edge) {
            continue;
        }
        let class = graph.class_of(edge).expect("traversable edge without a class");
        if let Some(&open_edge) = frame.open.get(&class) {
            boundaries.push(Boundary {
                start: open_edge,
                end: edge,
            });
        }
        let target = graph.other_endpoint(edge, frame.block);
        if visited_blocks.insert(target) {
            let mut open = frame.open.clone();
            open.insert(class, edge);
            frames.push(FindFrame {
                block: target,
                pos: 0,
                edges: sorted_edges(graph, target),
                open,
            });
        }
    }
    log::debug!("region boundary finding: {} boundaries", boundaries.len());
    boundaries
}

struct ReifyFrame {
    block: BlockId,
    pos: usize,
    edges: Vec<CeEdgeId>,
    region: RegionId,
}

/// Phase 2: walk again in the identical order, deepening into a fresh
/// region at each boundary start and returning to the parent at each
/// matching end, then fix up Block leaves and the bijection.
fn reify(graph: &CycleEquivalenceGraph, boundaries: &[Boundary]) -> Result<RegionTree, SeseError> {
    let mut start_of: HashMap<CeEdgeId, usize> = HashMap::new();
    let mut end_of: HashMap<CeEdgeId, usize> = HashMap::new();
    for (i, b) in boundaries.iter().enumerate() {
        let start_clash = start_of.insert(b.start, i).is_some();
        let end_clash = end_of.insert(b.end, i).is_some();
        if start_clash || end_clash {
            return Err(SeseError::new(
                SeseErrorKind::UnbalancedBoundary,
                "an edge delimits more than one region boundary on the same side",
            ));
        }
    }

    let mut regions = vec![Region {
        structure: StructureKind::NonCanonical,
        encloses: EnclosesKind::Region,
        depth: 0,
        parent: None,
        children: Vec::new(),
        block: None,
        boundary: None,
        annotation: Annotation::new(),
    }];
    let root = RegionId(0);
    let mut boundary_region: Vec<Option<RegionId>> = vec![None; boundaries.len()];
    let mut direct_blocks: Vec<Vec<BlockId>> = vec![Vec::new()];

    let mut open_region = |regions: &mut Vec<Region>,
                           direct_blocks: &mut Vec<Vec<BlockId>>,
                           boundary_region: &mut Vec<Option<RegionId>>,
                           parent: RegionId,
                           b: usize|
     -> RegionId {
        let id = RegionId(regions.len() as u32);
        let depth = regions[parent.0 as usize].depth + 1;
        regions.push(Region {
            structure: StructureKind::Canonical,
            encloses: EnclosesKind::Region,
            depth,
            parent: Some(parent),
            children: Vec::new(),
            block: None,
            boundary: Some((boundaries[b].start, boundaries[b].end)),
            annotation: Annotation::new(),
        });
        regions[parent.0 as usize].children.push(id);
        direct_blocks.push(Vec::new());
        boundary_region[b] = Some(id);
        id
    };

    let mut visited_edges: HashSet<CeEdgeId> = HashSet::new();
    let mut visited_blocks: HashSet<BlockId> = HashSet::new();
    let synthetic = graph.synthetic_edge();
    visited_edges.insert(synthetic);

    // The boundary opened by the synthetic edge encloses the procedure's
    // outermost material.
    let mut entry_region = root;
    if let Some(&b) = start_of.get(&synthetic) {
        entry_region = open_region(
            &mut regions,
            &mut direct_blocks,
            &mut boundary_region,
            root,
            b,
        );
    }

    visited_blocks.insert(graph.entry());
    direct_blocks[entry_region.0 as usize].push(graph.entry());
    let mut frames = vec![ReifyFrame {
        block: graph.entry(),
        pos: 0,
        edges: sorted_edges(graph, graph.entry()),
        region: entry_region,
    }];

    while let Some(frame) = frames.last_mut() {
        let Some(&edge) = frame.edges.get(frame.pos) else {
            frames.pop();
            continue;
        };
        frame.pos += 1;
        if !visited_edges.insert(edge) {
            continue;
        }
        let block = frame.block;
        let mut region = frame.region;

        if let Some(&b) = end_of.get(&edge) {
            let expected = boundary_region[b];
            if expected != Some(region) {
                return Err(SeseError::new(
                    SeseErrorKind::UnbalancedBoundary,
                    format!("boundary closed outside its region at block {}", block),
                ));
            }
            region = regions[region.0 as usize]
                .parent
                .expect("boundary region always has a parent");
        }
        if let Some(&b) = start_of.get(&edge) {
            region = open_region(
                &mut regions,
                &mut direct_blocks,
                &mut boundary_region,
                region,
                b,
            );
        }

        let target = graph.other_endpoint(edge, block);
        if visited_blocks.insert(target) {
            direct_blocks[region.0 as usize].push(target);
            frames.push(ReifyFrame {
                block: target,
                pos: 0,
                edges: sorted_edges(graph, target),
                region,
            });
        }
    }

    // Collapse single-block boundary regions into Block leaves; every
    // other directly-captured block gets a non-canonical leaf, keeping the
    // block-to-region bijection.
    let num_blocks = graph.num_blocks();
    let mut block_region: Vec<Option<RegionId>> = vec![None; num_blocks];
    for i in 0..regions.len() {
        let id = RegionId(i as u32);
        let blocks = std::mem::take(&mut direct_blocks[i]);
        let is_leafable = id != root && blocks.len() == 1 && regions[i].children.is_empty();
        if is_leafable {
            regions[i].encloses = EnclosesKind::Block;
            regions[i].block = Some(blocks[0]);
            block_region[blocks[0].0 as usize] = Some(id);
            continue;
        }
        for block in blocks {
            let leaf = RegionId(regions.len() as u32);
            let depth = regions[i].depth + 1;
            regions.push(Region {
                structure: StructureKind::NonCanonical,
                encloses: EnclosesKind::Block,
                depth,
                parent: Some(id),
                children: Vec::new(),
                block: Some(block),
                boundary: None,
                annotation: Annotation::new(),
            });
            regions[i].children.push(leaf);
            block_region[block.0 as usize] = Some(leaf);
        }
    }

    let block_region: Vec<RegionId> = block_region
        .into_iter()
        .enumerate()
        .map(|(b, r)| {
            r.unwrap_or_else(|| panic!("block bb{} captured by no region", b))
        })
        .collect();

    log::debug!("region tree: {} regions over {} blocks", regions.len(), num_blocks);
    Ok(RegionTree {
        regions,
        root,
        block_region,
    })
}
