//! # PdgOpt - Program Dependence Analysis for Parallelization
//!
//! A toolkit for analyzing a procedure's dependence structure and program
//! structure ahead of loop parallelization:
//! - A typed dependence multigraph over IR values
//! - SCC condensation (Tarjan) with sub-edge provenance and ordering
//!   queries
//! - Per-SCC classification: independent, reducible, or sequential, plus
//!   clonability
//! - Cycle-equivalence analysis of the CFG (Program Structure Tree
//!   bracket algorithm)
//! - SESE region trees scoping source-level annotations
//!
//! ## Architecture
//!
//! ```text
//! IR facade ─┬→ DependenceGraph → SCCDAG → SCC attributes → parallelizers
//!            └→ UndirectedCFG → SpanningTree → CycleEquivalence → Regions
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use pdgopt::prelude::*;
//!
//! let mut function = Function::new("kernel");
//! // ... build blocks, instructions, CFG edges, dependence facts ...
//! let analysis = pdgopt::analysis::build_scc_analysis(&graph, &inputs);
//! let regions = pdgopt::build_region_tree(&function)?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(dead_code)] // During development

pub mod ir;
pub mod graph;
pub mod analysis;
pub mod sese;
pub mod utils;

// Re-export commonly used types
pub mod prelude {
    //! Convenient re-exports of commonly used types and traits.

    pub use crate::ir::{Annotation, BlockId, Function, Opcode, TypeKind, ValueId};
    pub use crate::graph::{
        DependenceGraph, DependenceKind, EdgeId, MemoryKind, Mustness, NodeId,
    };
    pub use crate::analysis::{
        build_scc_analysis, ClassifierInputs, InductionVariable, LoopCarriedDependencies,
        LoopNest, MemoryCloningAnalysis, SccAnalysis, SccDag, SccDagAttrs, SccId, SccKind,
    };
    pub use crate::sese::{
        CycleEquivalenceGraph, RegionId, RegionTree, SpanningTree, UndirectedCfg,
    };
    pub use crate::utils::errors::*;
    pub use crate::utils::intern::{intern, Symbol};
}

use anyhow::Context;
use anyhow::Result;
use ir::Function;
use sese::{CycleEquivalenceGraph, RegionTree, SpanningTree, UndirectedCfg};

/// Build the SESE region tree of `function`.
///
/// The function must already satisfy the structural preconditions: a
/// single entry, no unreachable blocks, and a unified exit (see
/// [`Function::unify_exit_nodes`]).
pub fn build_region_tree(function: &Function) -> Result<RegionTree> {
    let cfg = UndirectedCfg::from_function(function)
        .context("building the undirected CFG view")?;
    let tree = SpanningTree::new(&cfg);
    let graph = CycleEquivalenceGraph::compute(&tree)
        .context("computing cycle equivalence")?;
    RegionTree::build(&graph).context("reifying SESE regions")
}

/// Split blocks wherever the applicable annotation changes, then build
/// the region tree and seed region annotations from the (now
/// homogeneous) blocks.
///
/// Splitting mutates the CFG, so any previously derived CFG structure is
/// invalid afterwards; the returned tree is built from the post-split
/// function.
pub fn annotate_and_scope(function: &mut Function) -> Result<RegionTree> {
    function.split_at_annotation_changes();
    function.unify_exit_nodes();
    let mut tree = build_region_tree(function)?;
    tree.seed_annotations(function);
    Ok(tree)
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
