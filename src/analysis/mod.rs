//! Dependence condensation and parallelization classification.

pub mod sccdag;
pub mod loops;
pub mod attrs;

pub use sccdag::{CondEdge, CondEdgeId, Scc, SccDag, SccId};
pub use loops::{
    InductionVariable, LocationId, Loop, LoopCarriedDependencies, LoopGoverningAttribution,
    LoopId, LoopNest, MemoryCloningAnalysis,
};
pub use attrs::{ClassifierInputs, ReductionVariable, SccAttrs, SccDagAttrs, SccKind};

use crate::graph::DependenceGraph;

/// The condensation plus its per-SCC classification: what the
/// parallelization schemes consume.
pub struct SccAnalysis {
    /// The condensation DAG
    pub dag: SccDag,
    /// Per-SCC attributes
    pub attrs: SccDagAttrs,
}

/// Condense `graph` and classify every SCC.
pub fn build_scc_analysis(graph: &DependenceGraph, inputs: &ClassifierInputs) -> SccAnalysis {
    let dag = SccDag::from_graph(graph);
    let attrs = SccDagAttrs::analyze(&dag, inputs);
    SccAnalysis { dag, attrs }
}
