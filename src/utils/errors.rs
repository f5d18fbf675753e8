//! Error types for the dependence and region analyses.
//!
//! This module defines all error types used throughout the crate,
//! organized by the phase that produces them.
//!
//! Two error classes exist. Malformed *input* (a CFG with unreachable
//! blocks, a function whose exits were never unified) is reported through
//! these types and leaves the analysis unbuilt. Contract violations by the
//! caller or by upstream producers (dangling edge endpoints, querying a
//! stale reachability relation, looking up a value outside its graph) are
//! fatal assertions, not `Err` values: downstream parallelization
//! correctness depends on exact structural guarantees, so there is no
//! partial recovery path.

use thiserror::Error;
use std::fmt;

/// Top-level error type for the crate.
#[derive(Error, Debug)]
pub enum PdgOptError {
    /// Error while building a CFG-derived view
    #[error("CFG structure error: {0}")]
    Cfg(#[from] CfgError),

    /// Error during cycle-equivalence or region construction
    #[error("SESE analysis error: {0}")]
    Sese(#[from] SeseError),

    /// Internal invariant failure surfaced as an error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Error while deriving the undirected view or spanning tree of a CFG.
#[derive(Error, Debug, Clone)]
pub struct CfgError {
    /// The error message
    pub message: String,
    /// The kind of CFG error
    pub kind: CfgErrorKind,
}

impl fmt::Display for CfgError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl CfgError {
    pub(crate) fn new(kind: CfgErrorKind, message: impl Into<String>) -> Self {
        Self { message: message.into(), kind }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CfgErrorKind {
    /// A non-entry block has no predecessors
    UnreachableBlock,
    /// The function has more than one exit block
    MultipleExits,
    /// The function has no blocks at all
    EmptyFunction,
}

/// Error during cycle-equivalence or SESE region construction.
#[derive(Error, Debug, Clone)]
pub struct SeseError {
    /// The error message
    pub message: String,
    /// The kind of SESE error
    pub kind: SeseErrorKind,
}

impl fmt::Display for SeseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl SeseError {
    pub(crate) fn new(kind: SeseErrorKind, message: impl Into<String>) -> Self {
        Self { message: message.into(), kind }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeseErrorKind {
    /// A non-root node had an empty bracket list when its parent edge
    /// needed a cycle class. The input graph does not satisfy the
    /// single-entry/single-exit precondition (most often a missing
    /// unify-exit transform).
    MissingBracket,
    /// A region boundary closed without a matching open edge
    UnbalancedBoundary,
}

/// Result type using PdgOptError.
pub type PdgResult<T> = Result<T, PdgOptError>;
