//! The program dependence graph.
//!
//! A directed multigraph over IR values. Nodes wrap one value each; edges
//! carry the dependence fact (data/memory/control, must/may, memory
//! subtype, loop-carried flag). Multiple parallel edges between the same
//! node pair are permitted: each records a distinct dependence fact.

use crate::ir::ValueId;
use serde::{Serialize, Deserialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;

/// A unique identifier for dependence-graph nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// A unique identifier for dependence edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EdgeId(pub u32);

impl fmt::Display for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "e{}", self.0)
    }
}

/// The kind of a dependence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DependenceKind {
    /// Register/SSA data dependence
    Data,
    /// Dependence through memory
    Memory,
    /// Control dependence
    Control,
}

/// Whether a dependence certainly holds or only may hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Mustness {
    /// The dependence always holds
    Must,
    /// The dependence may hold (conservative alias result)
    May,
}

/// Memory dependence subtype.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MemoryKind {
    /// Read-after-write (true/flow dependence)
    Raw,
    /// Write-after-read (anti dependence)
    War,
    /// Write-after-write (output dependence)
    Waw,
    /// Read-after-read (input dependence)
    Rar,
}

impl MemoryKind {
    /// Short name for printing.
    pub fn short_name(&self) -> &'static str {
        match self {
            MemoryKind::Raw => "RAW",
            MemoryKind::War => "WAR",
            MemoryKind::Waw => "WAW",
            MemoryKind::Rar => "RAR",
        }
    }
}

/// One dependence fact: a directed edge from producer to consumer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependenceEdge {
    /// Producer node
    pub from: NodeId,
    /// Consumer node
    pub to: NodeId,
    /// Data / memory / control
    pub kind: DependenceKind,
    /// Must / may
    pub mustness: Mustness,
    /// Memory subtype, present only for memory dependences
    pub memory_kind: Option<MemoryKind>,
    /// Does this dependence cross a loop iteration boundary?
    pub is_loop_carried: bool,
}

impl DependenceEdge {
    /// Is this a register/SSA data dependence?
    pub fn is_data_dependence(&self) -> bool {
        self.kind == DependenceKind::Data
    }

    /// Is this a dependence through memory?
    pub fn is_memory_dependence(&self) -> bool {
        self.kind == DependenceKind::Memory
    }

    /// Is this a control dependence?
    pub fn is_control_dependence(&self) -> bool {
        self.kind == DependenceKind::Control
    }

    /// Does this dependence certainly hold?
    pub fn is_must(&self) -> bool {
        self.mustness == Mustness::Must
    }
}

/// A node wrapping one IR value.
#[derive(Debug, Clone)]
pub struct DependenceNode {
    /// The wrapped value
    pub value: ValueId,
    outgoing: Vec<EdgeId>,
    incoming: Vec<EdgeId>,
}

impl DependenceNode {
    /// Outgoing edge ids.
    pub fn outgoing_edges(&self) -> &[EdgeId] {
        &self.outgoing
    }

    /// Incoming edge ids.
    pub fn incoming_edges(&self) -> &[EdgeId] {
        &self.incoming
    }
}

/// A directed dependence multigraph over IR values.
#[derive(Debug, Clone, Default)]
pub struct DependenceGraph {
    nodes: Vec<DependenceNode>,
    edges: Vec<DependenceEdge>,
    value_to_node: HashMap<ValueId, NodeId>,
}

impl DependenceGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node wrapping `value`, or return the existing node. A value
    /// is never duplicated within one graph.
    pub fn add_node(&mut self, value: ValueId) -> NodeId {
        if let Some(&id) = self.value_to_node.get(&value) {
            return id;
        }
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(DependenceNode {
            value,
            outgoing: Vec::new(),
            incoming: Vec::new(),
        });
        self.value_to_node.insert(value, id);
        id
    }

    /// Record a dependence fact between two values already in the graph.
    ///
    /// Both endpoints must exist; a dangling endpoint is an upstream
    /// contract violation and aborts.
    pub fn add_dependence(
        &mut self,
        from: ValueId,
        to: ValueId,
        kind: DependenceKind,
        mustness: Mustness,
        memory_kind: Option<MemoryKind>,
        is_loop_carried: bool,
    ) -> EdgeId {
        let from = *self
            .value_to_node
            .get(&from)
            .expect("dependence source value is not in the graph");
        let to = *self
            .value_to_node
            .get(&to)
            .expect("dependence destination value is not in the graph");
        assert!(
            (kind == DependenceKind::Memory) == memory_kind.is_some(),
            "memory subtype present iff the dependence is a memory dependence"
        );
        let id = EdgeId(self.edges.len() as u32);
        self.edges.push(DependenceEdge {
            from,
            to,
            kind,
            mustness,
            memory_kind,
            is_loop_carried,
        });
        self.nodes[from.0 as usize].outgoing.push(id);
        self.nodes[to.0 as usize].incoming.push(id);
        id
    }

    /// Shorthand: must data dependence.
    pub fn add_data_dependence(&mut self, from: ValueId, to: ValueId, loop_carried: bool) -> EdgeId {
        self.add_dependence(from, to, DependenceKind::Data, Mustness::Must, None, loop_carried)
    }

    /// Shorthand: memory dependence with a subtype.
    pub fn add_memory_dependence(
        &mut self,
        from: ValueId,
        to: ValueId,
        memory_kind: MemoryKind,
        mustness: Mustness,
        loop_carried: bool,
    ) -> EdgeId {
        self.add_dependence(from, to, DependenceKind::Memory, mustness, Some(memory_kind), loop_carried)
    }

    /// Shorthand: control dependence.
    pub fn add_control_dependence(&mut self, from: ValueId, to: ValueId, loop_carried: bool) -> EdgeId {
        self.add_dependence(from, to, DependenceKind::Control, Mustness::Must, None, loop_carried)
    }

    /// The node wrapping `value`, if present.
    pub fn node_of_value(&self, value: ValueId) -> Option<NodeId> {
        self.value_to_node.get(&value).copied()
    }

    /// Fetch a node.
    pub fn node(&self, id: NodeId) -> &DependenceNode {
        &self.nodes[id.0 as usize]
    }

    /// Fetch an edge.
    pub fn edge(&self, id: EdgeId) -> &DependenceEdge {
        &self.edges[id.0 as usize]
    }

    /// All node ids.
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> {
        (0..self.nodes.len() as u32).map(NodeId)
    }

    /// All edge ids.
    pub fn edge_ids(&self) -> impl Iterator<Item = EdgeId> {
        (0..self.edges.len() as u32).map(EdgeId)
    }

    /// Number of nodes.
    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Number of edges.
    pub fn num_edges(&self) -> usize {
        self.edges.len()
    }

    /// All parallel edges from `from` to `to`.
    pub fn edges_between(&self, from: NodeId, to: NodeId) -> Vec<EdgeId> {
        self.nodes[from.0 as usize]
            .outgoing
            .iter()
            .copied()
            .filter(|&e| self.edges[e.0 as usize].to == to)
            .collect()
    }

    /// Build the induced subgraph over `values` (one loop body, usually).
    /// Edges are kept when both endpoints survive; attributes are copied
    /// unchanged.
    pub fn subgraph_from_values(&self, values: &BTreeSet<ValueId>) -> DependenceGraph {
        let mut sub = DependenceGraph::new();
        for node in &self.nodes {
            if values.contains(&node.value) {
                sub.add_node(node.value);
            }
        }
        for edge in &self.edges {
            let from = self.nodes[edge.from.0 as usize].value;
            let to = self.nodes[edge.to.0 as usize].value;
            if values.contains(&from) && values.contains(&to) {
                sub.add_dependence(from, to, edge.kind, edge.mustness, edge.memory_kind, edge.is_loop_carried);
            }
        }
        sub
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Function, Opcode, TypeKind};

    fn two_value_graph() -> (DependenceGraph, ValueId, ValueId) {
        let mut f = Function::new("g");
        let bb = f.add_block("entry");
        let a = f.add_instruction(bb, "%a", Opcode::Add, TypeKind::Int);
        let b = f.add_instruction(bb, "%b", Opcode::Mul, TypeKind::Int);
        let mut g = DependenceGraph::new();
        g.add_node(a);
        g.add_node(b);
        (g, a, b)
    }

    #[test]
    fn test_no_duplicate_nodes_per_value() {
        let (mut g, a, _) = two_value_graph();
        let n1 = g.node_of_value(a).unwrap();
        let n2 = g.add_node(a);
        assert_eq!(n1, n2);
        assert_eq!(g.num_nodes(), 2);
    }

    #[test]
    fn test_parallel_edges_are_kept() {
        let (mut g, a, b) = two_value_graph();
        g.add_data_dependence(a, b, false);
        g.add_memory_dependence(a, b, MemoryKind::Raw, Mustness::May, true);
        let (na, nb) = (g.node_of_value(a).unwrap(), g.node_of_value(b).unwrap());
        assert_eq!(g.edges_between(na, nb).len(), 2);
    }

    #[test]
    #[should_panic(expected = "not in the graph")]
    fn test_dangling_endpoint_aborts() {
        let (mut g, a, _) = two_value_graph();
        g.add_data_dependence(a, ValueId(999), false);
    }

    #[test]
    fn test_subgraph_keeps_induced_edges() {
        let mut f = Function::new("g");
        let bb = f.add_block("entry");
        let a = f.add_instruction(bb, "%a", Opcode::Add, TypeKind::Int);
        let b = f.add_instruction(bb, "%b", Opcode::Mul, TypeKind::Int);
        let c = f.add_instruction(bb, "%c", Opcode::Load, TypeKind::Int);
        let mut g = DependenceGraph::new();
        for v in [a, b, c] {
            g.add_node(v);
        }
        g.add_data_dependence(a, b, false);
        g.add_data_dependence(b, c, false);

        let keep: BTreeSet<ValueId> = [a, b].into_iter().collect();
        let sub = g.subgraph_from_values(&keep);
        assert_eq!(sub.num_nodes(), 2);
        assert_eq!(sub.num_edges(), 1);
    }
}
