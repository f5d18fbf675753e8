//! Strongly-connected-component condensation of a dependence graph.
//!
//! Tarjan's algorithm extracts one SCC per maximal cycle (singletons
//! included), then the condensation DAG is built: one node per SCC, one
//! aggregated edge per ordered SCC pair with a crossing dependence, each
//! carrying the original edges it summarizes as sub-edges. A transitive
//! reachability relation over SCCs supports before/after ordering queries;
//! it goes stale on merge and must be recomputed explicitly.

use crate::graph::{DependenceGraph, EdgeId, NodeId};
use crate::utils::bitmatrix::BitMatrix;
use serde::{Serialize, Deserialize};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::fmt;

/// A unique identifier for SCCs within one condensation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SccId(pub u32);

impl fmt::Display for SccId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "scc{}", self.0)
    }
}

/// A unique identifier for condensation edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CondEdgeId(pub u32);

/// One strongly connected component: a maximal set of mutually reachable
/// dependence-graph nodes.
#[derive(Debug, Clone)]
pub struct Scc {
    nodes: BTreeSet<NodeId>,
}

impl Scc {
    fn new(nodes: BTreeSet<NodeId>) -> Self {
        Self { nodes }
    }

    /// Is `node` internal to this SCC?
    pub fn is_internal(&self, node: NodeId) -> bool {
        self.nodes.contains(&node)
    }

    /// The internal nodes.
    pub fn internal_nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.iter().copied()
    }

    /// Number of internal nodes.
    pub fn num_internal_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Edges of the host graph with both endpoints inside this SCC.
    pub fn internal_edges<'g>(&'g self, graph: &'g DependenceGraph) -> impl Iterator<Item = EdgeId> + 'g {
        graph.edge_ids().filter(move |&e| {
            let edge = graph.edge(e);
            self.is_internal(edge.from) && self.is_internal(edge.to)
        })
    }

    /// Edges of the host graph crossing this SCC's boundary, in either
    /// direction.
    pub fn boundary_edges<'g>(&'g self, graph: &'g DependenceGraph) -> impl Iterator<Item = EdgeId> + 'g {
        graph.edge_ids().filter(move |&e| {
            let edge = graph.edge(e);
            self.is_internal(edge.from) != self.is_internal(edge.to)
        })
    }
}

/// An aggregated dependence between two SCCs, summarizing every original
/// edge that crosses between them in this direction.
#[derive(Debug, Clone)]
pub struct CondEdge {
    /// Producer SCC
    pub from: SccId,
    /// Consumer SCC
    pub to: SccId,
    sub_edges: Vec<EdgeId>,
}

impl CondEdge {
    /// The original dependence edges this condensation edge summarizes.
    pub fn sub_edges(&self) -> &[EdgeId] {
        &self.sub_edges
    }
}

struct Reachability {
    dense: HashMap<SccId, usize>,
    matrix: BitMatrix,
}

/// The condensation DAG of a dependence graph.
pub struct SccDag {
    sccs: Vec<Option<Scc>>,
    cond_edges: Vec<Option<CondEdge>>,
    edge_index: HashMap<(SccId, SccId), CondEdgeId>,
    node_to_scc: HashMap<NodeId, SccId>,
    reachability: Option<Reachability>,
    ordered_dirty: bool,
}

impl SccDag {
    /// Compute the condensation of `graph`.
    ///
    /// Runs Tarjan's algorithm, assigns every node to exactly one SCC,
    /// builds the aggregated inter-SCC edges with sub-edge provenance, and
    /// computes the initial reachability relation. An empty graph yields
    /// an empty DAG.
    pub fn from_graph(graph: &DependenceGraph) -> Self {
        let mut dag = Self {
            sccs: Vec::new(),
            cond_edges: Vec::new(),
            edge_index: HashMap::new(),
            node_to_scc: HashMap::new(),
            reachability: None,
            ordered_dirty: true,
        };
        dag.run_tarjan(graph);
        dag.mark_values_in_scc();
        dag.mark_edges_and_sub_edges(graph);
        dag.compute_reachability_among_sccs();
        log::debug!(
            "condensation: {} nodes -> {} SCCs, {} edges",
            graph.num_nodes(),
            dag.num_sccs(),
            dag.cond_edge_ids().count()
        );
        dag
    }

    /// Tarjan's algorithm with an explicit work-stack. One SCC per maximal
    /// cycle; acyclic nodes form singleton SCCs.
    fn run_tarjan(&mut self, graph: &DependenceGraph) {
        const UNVISITED: u32 = u32::MAX;
        let n = graph.num_nodes();
        let mut index = vec![UNVISITED; n];
        let mut lowlink = vec![0u32; n];
        let mut on_stack = vec![false; n];
        let mut stack: Vec<NodeId> = Vec::new();
        let mut next_index = 0u32;

        // One frame per node being expanded: (node, next outgoing-edge
        // position to look at).
        let mut frames: Vec<(NodeId, usize)> = Vec::new();

        for root in graph.node_ids() {
            if index[root.0 as usize] != UNVISITED {
                continue;
            }
            frames.push((root, 0));
            while let Some(&(node, pos)) = frames.last() {
                let ni = node.0 as usize;
                if pos == 0 {
                    index[ni] = next_index;
                    lowlink[ni] = next_index;
                    next_index += 1;
                    stack.push(node);
                    on_stack[ni] = true;
                }

                let outgoing = graph.node(node).outgoing_edges();
                if let Some(&edge) = outgoing.get(pos) {
                    frames.last_mut().unwrap().1 += 1;
                    let succ = graph.edge(edge).to;
                    let si = succ.0 as usize;
                    if index[si] == UNVISITED {
                        frames.push((succ, 0));
                    } else if on_stack[si] {
                        lowlink[ni] = lowlink[ni].min(index[si]);
                    }
                    continue;
                }

                // Node fully expanded.
                frames.pop();
                if let Some(&(parent, _)) = frames.last() {
                    let pi = parent.0 as usize;
                    lowlink[pi] = lowlink[pi].min(lowlink[ni]);
                }
                if lowlink[ni] == index[ni] {
                    let mut members = BTreeSet::new();
                    loop {
                        let popped = stack.pop().expect("Tarjan stack underflow");
                        on_stack[popped.0 as usize] = false;
                        members.insert(popped);
                        if popped == node {
                            break;
                        }
                    }
                    self.sccs.push(Some(Scc::new(members)));
                }
            }
        }
    }

    /// Rebuild the node-to-SCC reverse map.
    pub fn mark_values_in_scc(&mut self) {
        let mut map = HashMap::new();
        for (i, scc) in self.sccs.iter().enumerate() {
            if let Some(scc) = scc {
                for &node in &scc.nodes {
                    map.insert(node, SccId(i as u32));
                }
            }
        }
        self.node_to_scc = map;
    }

    /// Rebuild the condensation edges from the host graph's crossing
    /// edges. For each boundary crossing, find-or-create the single
    /// condensation edge between the two owning SCCs and attach the
    /// crossing edge as a sub-edge. Sub-edges accumulated by a previous
    /// call are cleared exactly once per condensation edge.
    pub fn mark_edges_and_sub_edges(&mut self, graph: &DependenceGraph) {
        let mut cleared: BTreeSet<CondEdgeId> = BTreeSet::new();
        for e in graph.edge_ids() {
            let edge = graph.edge(e);
            let from_scc = self.scc_of_node(edge.from);
            let to_scc = self.scc_of_node(edge.to);
            if from_scc == to_scc {
                continue;
            }
            let cond_id = match self.edge_index.get(&(from_scc, to_scc)) {
                Some(&id) => id,
                None => {
                    let id = CondEdgeId(self.cond_edges.len() as u32);
                    self.cond_edges.push(Some(CondEdge {
                        from: from_scc,
                        to: to_scc,
                        sub_edges: Vec::new(),
                    }));
                    self.edge_index.insert((from_scc, to_scc), id);
                    id
                }
            };
            let cond = self.cond_edges[cond_id.0 as usize]
                .as_mut()
                .expect("edge index points at a removed condensation edge");
            if cleared.insert(cond_id) {
                cond.sub_edges.clear();
            }
            cond.sub_edges.push(e);
        }
    }

    /// Merge a set of SCCs into one. A set with fewer than two SCCs is a
    /// no-op. The merged SCC's node set is the union of the inputs'; the
    /// old SCCs and their incident condensation edges are removed, and the
    /// node map and condensation edges are rebuilt. The reachability
    /// relation goes stale.
    pub fn merge_sccs(&mut self, graph: &DependenceGraph, scc_set: &BTreeSet<SccId>) {
        if scc_set.len() < 2 {
            return;
        }
        let mut merged_nodes = BTreeSet::new();
        for &id in scc_set {
            merged_nodes.extend(self.scc(id).nodes.iter().copied());
        }

        self.sccs.push(Some(Scc::new(merged_nodes)));
        for &id in scc_set {
            self.sccs[id.0 as usize] = None;
        }
        // Drop condensation edges incident to the removed SCCs.
        let mut removed_edges = Vec::new();
        self.edge_index.retain(|&(from, to), &mut edge_id| {
            if scc_set.contains(&from) || scc_set.contains(&to) {
                removed_edges.push(edge_id);
                false
            } else {
                true
            }
        });
        for id in removed_edges {
            self.cond_edges[id.0 as usize] = None;
        }

        self.mark_values_in_scc();
        self.mark_edges_and_sub_edges(graph);
        self.ordered_dirty = true;
        log::debug!("merged {} SCCs; reachability is stale", scc_set.len());
    }

    /// Live SCC ids.
    pub fn scc_ids(&self) -> impl Iterator<Item = SccId> + '_ {
        self.sccs
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|_| SccId(i as u32)))
    }

    /// Number of live SCCs.
    pub fn num_sccs(&self) -> usize {
        self.sccs.iter().filter(|s| s.is_some()).count()
    }

    /// Fetch an SCC. Panics on a removed or out-of-range id.
    pub fn scc(&self, id: SccId) -> &Scc {
        self.sccs[id.0 as usize]
            .as_ref()
            .expect("SCC id refers to a removed SCC")
    }

    /// The SCC owning a dependence-graph node. A miss is an upstream
    /// contract violation and aborts.
    pub fn scc_of_node(&self, node: NodeId) -> SccId {
        *self
            .node_to_scc
            .get(&node)
            .expect("node is not mapped to any SCC")
    }

    /// The SCC owning the node wrapping `value` in `graph`.
    pub fn scc_of_value(&self, graph: &DependenceGraph, value: crate::ir::ValueId) -> SccId {
        let node = graph
            .node_of_value(value)
            .expect("value is not in the dependence graph");
        self.scc_of_node(node)
    }

    /// Live condensation edge ids.
    pub fn cond_edge_ids(&self) -> impl Iterator<Item = CondEdgeId> + '_ {
        self.cond_edges
            .iter()
            .enumerate()
            .filter_map(|(i, e)| e.as_ref().map(|_| CondEdgeId(i as u32)))
    }

    /// Fetch a condensation edge. Panics on a removed or out-of-range id.
    pub fn cond_edge(&self, id: CondEdgeId) -> &CondEdge {
        self.cond_edges[id.0 as usize]
            .as_ref()
            .expect("condensation edge id refers to a removed edge")
    }

    /// The condensation edge from `from` to `to`, if one exists.
    pub fn cond_edge_between(&self, from: SccId, to: SccId) -> Option<CondEdgeId> {
        self.edge_index.get(&(from, to)).copied()
    }

    /// Condensation edges into `scc`.
    pub fn incoming_cond_edges(&self, scc: SccId) -> Vec<CondEdgeId> {
        self.cond_edge_ids()
            .filter(|&e| self.cond_edge(e).to == scc)
            .collect()
    }

    /// Condensation edges out of `scc`.
    pub fn outgoing_cond_edges(&self, scc: SccId) -> Vec<CondEdgeId> {
        self.cond_edge_ids()
            .filter(|&e| self.cond_edge(e).from == scc)
            .collect()
    }

    /// SCCs with no incoming condensation edges.
    pub fn top_level_sccs(&self) -> Vec<SccId> {
        self.scc_ids()
            .filter(|&s| self.incoming_cond_edges(s).is_empty())
            .collect()
    }

    /// Direct successors of `scc` in the condensation DAG.
    pub fn next_depth_sccs(&self, scc: SccId) -> Vec<SccId> {
        self.outgoing_cond_edges(scc)
            .into_iter()
            .map(|e| self.cond_edge(e).to)
            .collect()
    }

    /// Recompute the transitive reachability relation over the live SCCs.
    /// Must be re-run after any merge before ordering queries.
    pub fn compute_reachability_among_sccs(&mut self) {
        let live: Vec<SccId> = self.scc_ids().collect();
        let dense: HashMap<SccId, usize> =
            live.iter().enumerate().map(|(i, &s)| (s, i)).collect();
        let mut matrix = BitMatrix::new(live.len());
        for e in self.cond_edge_ids() {
            let edge = self.cond_edge(e);
            matrix.set(dense[&edge.from], dense[&edge.to]);
        }
        matrix.transitive_closure();
        self.reachability = Some(Reachability { dense, matrix });
        self.ordered_dirty = false;
    }

    /// Is `early` ordered strictly before `late` in the condensation?
    ///
    /// Requires a fresh reachability relation; querying after a merge
    /// without recomputation is a caller contract violation and aborts.
    pub fn ordered_before(&self, early: SccId, late: SccId) -> bool {
        assert!(
            !self.ordered_dirty,
            "must run compute_reachability_among_sccs() first"
        );
        let reach = self
            .reachability
            .as_ref()
            .expect("reachability relation was never computed");
        matrix_test(reach, early, late)
    }

    /// Is `early` ordered before any SCC in `lates`?
    pub fn ordered_before_any(&self, early: SccId, lates: &[SccId]) -> bool {
        lates.iter().any(|&l| self.ordered_before(early, l))
    }

    /// Is any SCC in `earlies` ordered before `late`?
    pub fn any_ordered_before(&self, earlies: &[SccId], late: SccId) -> bool {
        earlies.iter().any(|&e| self.ordered_before(e, late))
    }

    /// Breadth-first SCC traversal order from the top level.
    pub fn bfs_order(&self) -> Vec<SccId> {
        let mut order = Vec::new();
        let mut seen: BTreeSet<SccId> = BTreeSet::new();
        let mut queue: VecDeque<SccId> = self.top_level_sccs().into();
        seen.extend(queue.iter().copied());
        while let Some(scc) = queue.pop_front() {
            order.push(scc);
            for next in self.next_depth_sccs(scc) {
                if seen.insert(next) {
                    queue.push_back(next);
                }
            }
        }
        order
    }
}

fn matrix_test(reach: &Reachability, early: SccId, late: SccId) -> bool {
    let early = *reach
        .dense
        .get(&early)
        .expect("SCC is not part of the reachability relation");
    let late = *reach
        .dense
        .get(&late)
        .expect("SCC is not part of the reachability relation");
    reach.matrix.test(early, late)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Function, Opcode, TypeKind, ValueId};

    /// a -> b -> c -> b (cycle b,c), c -> d
    fn diamond_with_cycle() -> (DependenceGraph, Vec<ValueId>) {
        let mut f = Function::new("t");
        let bb = f.add_block("entry");
        let vals: Vec<ValueId> = (0..4)
            .map(|i| f.add_instruction(bb, &format!("%v{}", i), Opcode::Add, TypeKind::Int))
            .collect();
        let mut g = DependenceGraph::new();
        for &v in &vals {
            g.add_node(v);
        }
        g.add_data_dependence(vals[0], vals[1], false);
        g.add_data_dependence(vals[1], vals[2], false);
        g.add_data_dependence(vals[2], vals[1], true);
        g.add_data_dependence(vals[2], vals[3], false);
        (g, vals)
    }

    #[test]
    fn test_sccs_partition_nodes() {
        let (g, _) = diamond_with_cycle();
        let dag = SccDag::from_graph(&g);
        assert_eq!(dag.num_sccs(), 3);
        let mut seen = BTreeSet::new();
        for id in dag.scc_ids() {
            for node in dag.scc(id).internal_nodes() {
                assert!(seen.insert(node), "node in two SCCs");
            }
        }
        assert_eq!(seen.len(), g.num_nodes());
    }

    #[test]
    fn test_cycle_collapses_into_one_scc() {
        let (g, vals) = diamond_with_cycle();
        let dag = SccDag::from_graph(&g);
        let b = dag.scc_of_node(g.node_of_value(vals[1]).unwrap());
        let c = dag.scc_of_node(g.node_of_value(vals[2]).unwrap());
        assert_eq!(b, c);
        assert_eq!(dag.scc(b).num_internal_nodes(), 2);
    }

    #[test]
    fn test_condensation_is_acyclic_and_ordered() {
        let (g, vals) = diamond_with_cycle();
        let dag = SccDag::from_graph(&g);
        let a = dag.scc_of_node(g.node_of_value(vals[0]).unwrap());
        let bc = dag.scc_of_node(g.node_of_value(vals[1]).unwrap());
        let d = dag.scc_of_node(g.node_of_value(vals[3]).unwrap());
        assert!(dag.ordered_before(a, bc));
        assert!(dag.ordered_before(a, d));
        assert!(dag.ordered_before(bc, d));
        assert!(!dag.ordered_before(d, a));
        assert!(!dag.ordered_before(a, a));
    }

    #[test]
    fn test_sub_edge_attribution() {
        let (g, vals) = diamond_with_cycle();
        let dag = SccDag::from_graph(&g);
        let a = dag.scc_of_node(g.node_of_value(vals[0]).unwrap());
        let bc = dag.scc_of_node(g.node_of_value(vals[1]).unwrap());
        let e = dag.cond_edge_between(a, bc).unwrap();
        assert_eq!(dag.cond_edge(e).sub_edges().len(), 1);
        let sub = dag.cond_edge(e).sub_edges()[0];
        assert_eq!(g.edge(sub).from, g.node_of_value(vals[0]).unwrap());
    }

    #[test]
    fn test_empty_graph_yields_empty_dag() {
        let g = DependenceGraph::new();
        let dag = SccDag::from_graph(&g);
        assert_eq!(dag.num_sccs(), 0);
        assert_eq!(dag.cond_edge_ids().count(), 0);
    }

    #[test]
    fn test_merge_sccs_unions_nodes() {
        let (g, vals) = diamond_with_cycle();
        let mut dag = SccDag::from_graph(&g);
        let a = dag.scc_of_node(g.node_of_value(vals[0]).unwrap());
        let bc = dag.scc_of_node(g.node_of_value(vals[1]).unwrap());

        // Singleton merge is a no-op.
        dag.merge_sccs(&g, &[a].into_iter().collect());
        assert_eq!(dag.num_sccs(), 3);

        dag.merge_sccs(&g, &[a, bc].into_iter().collect());
        assert_eq!(dag.num_sccs(), 2);
        let merged = dag.scc_of_node(g.node_of_value(vals[0]).unwrap());
        assert_eq!(merged, dag.scc_of_node(g.node_of_value(vals[1]).unwrap()));
        assert_eq!(dag.scc(merged).num_internal_nodes(), 3);

        // One condensation edge remains: merged -> d, carrying one sub-edge.
        let d = dag.scc_of_node(g.node_of_value(vals[3]).unwrap());
        let e = dag.cond_edge_between(merged, d).unwrap();
        assert_eq!(dag.cond_edge(e).sub_edges().len(), 1);
    }

    #[test]
    #[should_panic(expected = "compute_reachability_among_sccs")]
    fn test_stale_reachability_aborts() {
        let (g, vals) = diamond_with_cycle();
        let mut dag = SccDag::from_graph(&g);
        let a = dag.scc_of_node(g.node_of_value(vals[0]).unwrap());
        let bc = dag.scc_of_node(g.node_of_value(vals[1]).unwrap());
        dag.merge_sccs(&g, &[a, bc].into_iter().collect());
        let d = dag.scc_of_node(g.node_of_value(vals[3]).unwrap());
        let merged = dag.scc_of_node(g.node_of_value(vals[0]).unwrap());
        dag.ordered_before(merged, d);
    }
}
