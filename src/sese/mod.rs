//! Program-structure analysis: cycle equivalence and SESE regions.

pub mod spanning;
pub mod cycle_equiv;
pub mod region;

pub use spanning::{BackedgeId, SpanningTree, UEdgeId, UndirectedCfg, UndirectedEdge};
pub use cycle_equiv::{CeEdge, CeEdgeId, CeEdgeKind, CycleEquivalenceGraph};
pub use region::{EnclosesKind, Region, RegionId, RegionTree, StructureKind};
