//! Dependence graph structures.

pub mod dependence;

pub use dependence::{
    DependenceEdge, DependenceGraph, DependenceKind, DependenceNode, EdgeId, MemoryKind, Mustness,
    NodeId,
};
