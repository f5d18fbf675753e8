//! DOT exports of the attributed condensation and the region tree.
//!
//! Diagnostic side channel: the output is for human inspection and is not
//! part of the functional contract.

use crate::analysis::attrs::SccDagAttrs;
use crate::analysis::sccdag::SccDag;
use crate::graph::DependenceGraph;
use crate::ir::Function;
use crate::sese::region::{EnclosesKind, RegionTree, StructureKind};
use std::fmt::Write;

/// Render the condensation with per-SCC attributes as a DOT digraph.
pub fn sccdag_to_dot(
    function: &Function,
    graph: &DependenceGraph,
    dag: &SccDag,
    attrs: &SccDagAttrs,
) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "digraph sccdag {{");
    let _ = writeln!(out, "  node [shape=box];");
    for scc in dag.scc_ids() {
        let info = attrs.scc_attrs(scc);
        let mut label = String::new();
        let _ = write!(label, "{}\\nType: ", scc);
        if info.can_execute_independently() {
            label.push_str("Independent ");
        }
        if info.can_execute_reducibly() {
            label.push_str("Reducible ");
        }
        if info.must_execute_sequentially() {
            label.push_str("Sequential ");
        }
        if info.can_be_cloned() {
            label.push_str("Clonable ");
        }
        if info.is_induction_variable_scc {
            label.push_str("IV ");
        }
        for node in dag.scc(scc).internal_nodes() {
            let value = graph.node(node).value;
            let _ = write!(label, "\\n{}", function.value(value).name);
        }
        let _ = writeln!(out, "  \"{}\" [label=\"{}\"];", scc, label);
    }
    for e in dag.cond_edge_ids() {
        let edge = dag.cond_edge(e);
        let _ = writeln!(
            out,
            "  \"{}\" -> \"{}\" [label=\"{}\"];",
            edge.from,
            edge.to,
            edge.sub_edges().len()
        );
    }
    let _ = writeln!(out, "}}");
    out
}

/// Render the region tree as a DOT digraph, parent to child.
pub fn region_tree_to_dot(function: &Function, tree: &RegionTree) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "digraph regions {{");
    let _ = writeln!(out, "  node [shape=box];");
    for id in tree.region_ids() {
        let region = tree.region(id);
        let structure = match region.structure {
            StructureKind::Canonical => "canonical",
            StructureKind::NonCanonical => "non-canonical",
        };
        let label = match (region.encloses, region.block) {
            (EnclosesKind::Block, Some(block)) => {
                let name = function
                    .block(block)
                    .name
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| block.to_string());
                format!("r{} {}\\nblock {}", id.0, structure, name)
            }
            _ => format!("r{} {}\\ndepth {}", id.0, structure, region.depth),
        };
        let _ = writeln!(out, "  r{} [label=\"{}\"];", id.0, label);
    }
    for id in tree.region_ids() {
        for &child in &tree.region(id).children {
            let _ = writeln!(out, "  r{} -> r{};", id.0, child.0);
        }
    }
    let _ = writeln!(out, "}}");
    out
}
