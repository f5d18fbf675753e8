//! Per-SCC classification for parallelization.
//!
//! Each SCC of the condensation is tagged with how it can execute across
//! loop iterations: independently, as a reduction, or sequentially.
//! Orthogonally, an SCC may be clonable (cheap enough to duplicate into
//! every parallel worker instead of communicating its values), possibly by
//! privatizing loop-local memory.
//!
//! Several clonability rules short-circuit on "no outgoing condensation
//! edges". That models a scheme-level concern (an SCC nobody consumes
//! needs no cloning) and is preserved here as observed behavior; lifting
//! it into the parallelization schemes is a known candidate cleanup.

use crate::analysis::loops::{
    InductionVariable, LocationId, LoopCarriedDependencies, LoopNest, MemoryCloningAnalysis,
};
use crate::analysis::sccdag::{CondEdgeId, SccDag, SccId};
use crate::graph::{DependenceGraph, EdgeId};
use crate::ir::{Function, Opcode, TypeKind, ValueId};
use serde::{Serialize, Deserialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// How an SCC can execute across loop iterations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SccKind {
    /// No loop-carried dependence at all
    Independent,
    /// A single reduction variable with an associative/commutative
    /// evolution
    Reducible,
    /// Must execute without decomposition across iterations
    Sequential,
}

/// The reduction variable of a reducible SCC.
#[derive(Debug, Clone)]
pub struct ReductionVariable {
    /// The loop-entry PHI accumulating the reduction in the outermost
    /// loop's header
    pub phi: ValueId,
    /// The operator combining the accumulator each iteration
    pub evolution_opcode: Opcode,
    /// The instructions applying the operator
    pub update_instructions: BTreeSet<ValueId>,
}

/// Classification record for one SCC. Created once at classification
/// time; never mutated afterwards.
#[derive(Debug, Clone)]
pub struct SccAttrs {
    /// Independent / reducible / sequential
    pub kind: SccKind,
    /// Can this SCC be duplicated per worker?
    pub is_clonable: bool,
    /// Clonable by privatizing loop-local memory
    pub is_clonable_using_local_memory: bool,
    /// Contains only induction-variable instructions
    pub is_induction_variable_scc: bool,
    /// Present iff `kind == Reducible`
    pub reduction: Option<ReductionVariable>,
    /// Clonable memory locations backing local-memory cloning
    pub clonable_locations: BTreeSet<LocationId>,
}

impl SccAttrs {
    /// Can this SCC execute each iteration independently?
    pub fn can_execute_independently(&self) -> bool {
        self.kind == SccKind::Independent
    }

    /// Can this SCC execute as a reduction?
    pub fn can_execute_reducibly(&self) -> bool {
        self.kind == SccKind::Reducible
    }

    /// Must this SCC execute sequentially?
    pub fn must_execute_sequentially(&self) -> bool {
        self.kind == SccKind::Sequential
    }

    /// Can this SCC be duplicated per worker?
    pub fn can_be_cloned(&self) -> bool {
        self.is_clonable
    }
}

/// Everything the classifier consumes besides the condensation itself.
pub struct ClassifierInputs<'a> {
    /// The host function
    pub function: &'a Function,
    /// The dependence graph the condensation was built from
    pub graph: &'a DependenceGraph,
    /// The loop nest under analysis
    pub nest: &'a LoopNest,
    /// Per-loop loop-carried dependence edges
    pub loop_carried: &'a LoopCarriedDependencies,
    /// Induction variables at all loop levels
    pub induction_variables: &'a [InductionVariable],
    /// The memory-cloning oracle
    pub memory_cloning: &'a MemoryCloningAnalysis,
    /// Permit floating-point reductions (reassociation changes results)
    pub enable_float_as_real: bool,
}

/// Classification of every SCC in a condensation.
pub struct SccDagAttrs {
    attrs: BTreeMap<SccId, SccAttrs>,
    scc_to_loop_carried: BTreeMap<SccId, BTreeSet<EdgeId>>,
    parents_via_clones: BTreeMap<SccId, BTreeSet<SccId>>,
    edges_via_clones: BTreeMap<SccId, BTreeSet<CondEdgeId>>,
}

impl SccDagAttrs {
    /// Classify every SCC of `dag`.
    pub fn analyze(dag: &SccDag, inputs: &ClassifierInputs) -> Self {
        let mut this = Self {
            attrs: BTreeMap::new(),
            scc_to_loop_carried: BTreeMap::new(),
            parents_via_clones: BTreeMap::new(),
            edges_via_clones: BTreeMap::new(),
        };
        this.collect_loop_carried_dependencies(dag, inputs);

        for scc in dag.scc_ids() {
            let is_iv_scc = this.check_if_scc_only_contains_induction_variables(dag, inputs, scc);

            let mut attrs = SccAttrs {
                kind: SccKind::Sequential,
                is_clonable: false,
                is_clonable_using_local_memory: false,
                is_induction_variable_scc: is_iv_scc,
                reduction: None,
                clonable_locations: BTreeSet::new(),
            };
            this.check_if_clonable(dag, inputs, scc, &mut attrs);

            if this.check_if_independent(scc) {
                attrs.kind = SccKind::Independent;
            } else if let Some(reduction) = this.check_if_reducible(dag, inputs, scc) {
                attrs.kind = SccKind::Reducible;
                attrs.reduction = Some(reduction);
            } else {
                attrs.kind = SccKind::Sequential;
            }
            this.attrs.insert(scc, attrs);
        }

        this.collect_scc_graph_assuming_distributed_clones(dag);
        log::debug!(
            "classified {} SCCs: {} independent, {} reducible, {} sequential",
            this.attrs.len(),
            this.sccs_of_kind(SccKind::Independent).count(),
            this.sccs_of_kind(SccKind::Reducible).count(),
            this.sccs_of_kind(SccKind::Sequential).count(),
        );
        this
    }

    /// The classification of one SCC. A miss is a contract violation.
    pub fn scc_attrs(&self, scc: SccId) -> &SccAttrs {
        self.attrs
            .get(&scc)
            .expect("SCC was not part of this classification")
    }

    /// SCCs of a given kind.
    pub fn sccs_of_kind(&self, kind: SccKind) -> impl Iterator<Item = SccId> + '_ {
        self.attrs
            .iter()
            .filter(move |(_, a)| a.kind == kind)
            .map(|(&s, _)| s)
    }

    /// SCCs with at least one loop-carried dependence.
    pub fn sccs_with_loop_carried_dependencies(&self) -> BTreeSet<SccId> {
        self.scc_to_loop_carried.keys().copied().collect()
    }

    /// SCCs with a loop-carried control dependence.
    pub fn sccs_with_loop_carried_control_dependencies(
        &self,
        graph: &DependenceGraph,
    ) -> BTreeSet<SccId> {
        self.scc_to_loop_carried
            .iter()
            .filter(|(_, deps)| deps.iter().any(|&e| graph.edge(e).is_control_dependence()))
            .map(|(&s, _)| s)
            .collect()
    }

    /// SCCs with a loop-carried data dependence.
    pub fn sccs_with_loop_carried_data_dependencies(
        &self,
        graph: &DependenceGraph,
    ) -> BTreeSet<SccId> {
        self.scc_to_loop_carried
            .iter()
            .filter(|(_, deps)| deps.iter().any(|&e| graph.edge(e).is_data_dependence()))
            .map(|(&s, _)| s)
            .collect()
    }

    /// Is `edge` one of `scc`'s loop-carried dependences?
    pub fn is_a_loop_carried_dependence(&self, scc: SccId, edge: EdgeId) -> bool {
        self.scc_to_loop_carried
            .get(&scc)
            .map(|deps| deps.contains(&edge))
            .unwrap_or(false)
    }

    /// Visit `scc`'s loop-carried data dependences until `f` returns true.
    pub fn iterate_over_loop_carried_data_dependences(
        &self,
        graph: &DependenceGraph,
        scc: SccId,
        mut f: impl FnMut(EdgeId) -> bool,
    ) {
        let Some(deps) = self.scc_to_loop_carried.get(&scc) else {
            return;
        };
        for &e in deps {
            if !graph.edge(e).is_data_dependence() {
                continue;
            }
            if f(e) {
                return;
            }
        }
    }

    /// Do all of `scc`'s instructions sit strictly inside subloops of the
    /// nest root?
    pub fn is_scc_contained_in_subloop(
        &self,
        dag: &SccDag,
        inputs: &ClassifierInputs,
        scc: SccId,
    ) -> bool {
        dag.scc(scc).internal_nodes().all(|node| {
            let value = inputs.graph.node(node).value;
            match inputs.nest.loop_of_instruction(inputs.function, value) {
                Some(l) => l != inputs.nest.root(),
                None => false,
            }
        })
    }

    /// Is the loop governed by exactly this SCC? Breadth-first traversal
    /// from the condensation's top level, skipping past SCCs that can
    /// execute independently, then requiring a single surviving top-level
    /// SCC equal to the candidate.
    pub fn is_loop_governed_by_scc(&self, dag: &SccDag, governing: SccId) -> bool {
        let mut to_traverse: VecDeque<SccId> = dag.top_level_sccs().into();
        let mut top_level: BTreeSet<SccId> = BTreeSet::new();
        let mut seen: BTreeSet<SccId> = to_traverse.iter().copied().collect();
        while let Some(scc) = to_traverse.pop_front() {
            if self.scc_attrs(scc).can_execute_independently() {
                for next in dag.next_depth_sccs(scc) {
                    if seen.insert(next) {
                        to_traverse.push_back(next);
                    }
                }
                continue;
            }
            top_level.insert(scc);
        }
        top_level.len() == 1 && top_level.contains(&governing)
    }

    /// Ancestor SCCs reachable when clonable SCCs are assumed distributed
    /// into their consumers.
    pub fn parents_via_clones(&self, scc: SccId) -> impl Iterator<Item = SccId> + '_ {
        self.parents_via_clones
            .get(&scc)
            .into_iter()
            .flat_map(|s| s.iter().copied())
    }

    /// Condensation edges subsumed by clone distribution into `scc`.
    pub fn edges_via_clones(&self, scc: SccId) -> impl Iterator<Item = CondEdgeId> + '_ {
        self.edges_via_clones
            .get(&scc)
            .into_iter()
            .flat_map(|s| s.iter().copied())
    }

    fn collect_loop_carried_dependencies(&mut self, dag: &SccDag, inputs: &ClassifierInputs) {
        for loop_id in inputs.nest.loop_ids() {
            for edge_id in inputs.loop_carried.edges_for_loop(loop_id) {
                let edge = inputs.graph.edge(edge_id);
                let producer_scc = dag.scc_of_node(edge.from);
                let consumer_scc = dag.scc_of_node(edge.to);
                self.scc_to_loop_carried
                    .entry(producer_scc)
                    .or_default()
                    .insert(edge_id);
                self.scc_to_loop_carried
                    .entry(consumer_scc)
                    .or_default()
                    .insert(edge_id);
            }
        }
    }

    /// The SCC is independent iff it has no loop-carried dependence.
    fn check_if_independent(&self, scc: SccId) -> bool {
        !self.scc_to_loop_carried.contains_key(&scc)
    }

    /// A reducible SCC tracks one loop-carried value whose evolution can
    /// be reassociated across iterations.
    fn check_if_reducible(
        &self,
        dag: &SccDag,
        inputs: &ClassifierInputs,
        scc: SccId,
    ) -> Option<ReductionVariable> {
        let deps = self.scc_to_loop_carried.get(&scc)?;
        let scc_ref = dag.scc(scc);
        let root_header = inputs.nest.root_header();

        let mut loop_carried_phis: BTreeSet<ValueId> = BTreeSet::new();
        for &dep in deps {
            let edge = inputs.graph.edge(dep);

            // Memory locations are not reduced.
            if edge.is_memory_dependence() {
                return None;
            }

            // External control dependences are tolerated; internal ones
            // disqualify.
            if edge.is_control_dependence() {
                if scc_ref.is_internal(edge.from) {
                    return None;
                }
                continue;
            }

            let consumer = inputs.graph.node(edge.to).value;
            let consumer_opcode = inputs.function.opcode_of(consumer);
            assert!(
                consumer_opcode.map(Opcode::is_phi).unwrap_or(false),
                "all consumers of loop-carried data dependences must be PHIs"
            );

            // External consumers may be last-live-out propagations.
            if !scc_ref.is_internal(edge.to) {
                continue;
            }

            // Subloop accumulators do not need reducing here.
            if inputs.function.block_of(consumer) != Some(root_header) {
                continue;
            }

            loop_carried_phis.insert(consumer);
        }

        if loop_carried_phis.len() != 1 {
            return None;
        }
        let phi = *loop_carried_phis.iter().next().unwrap();

        let reduction = self.evolution_of(dag, inputs, scc, phi)?;

        // Floating-point accumulators reduce only when floats may be
        // treated as reals.
        let phi_is_float = inputs.function.value(phi).ty == TypeKind::Float;
        if (phi_is_float || reduction.evolution_opcode.is_float_op())
            && !inputs.enable_float_as_real
        {
            return None;
        }

        Some(reduction)
    }

    /// Analyze the PHI's evolution: every internal non-PHI instruction
    /// must apply one shared associative, commutative operator.
    fn evolution_of(
        &self,
        dag: &SccDag,
        inputs: &ClassifierInputs,
        scc: SccId,
        phi: ValueId,
    ) -> Option<ReductionVariable> {
        let mut evolution: Option<Opcode> = None;
        let mut updates: BTreeSet<ValueId> = BTreeSet::new();
        for node in dag.scc(scc).internal_nodes() {
            let value = inputs.graph.node(node).value;
            let opcode = inputs.function.opcode_of(value)?;
            if opcode.is_phi() {
                continue;
            }
            if !opcode.is_associative() || !opcode.is_commutative() {
                return None;
            }
            match evolution {
                None => evolution = Some(opcode),
                Some(op) if op == opcode => {}
                Some(_) => return None,
            }
            updates.insert(value);
        }
        let evolution_opcode = evolution?;
        Some(ReductionVariable {
            phi,
            evolution_opcode,
            update_instructions: updates,
        })
    }

    /// Does the SCC contain only induction-variable instructions plus
    /// their well-formed loop-governing condition?
    fn check_if_scc_only_contains_induction_variables(
        &self,
        dag: &SccDag,
        inputs: &ClassifierInputs,
        scc: SccId,
    ) -> bool {
        let scc_ref = dag.scc(scc);

        let mut contained_ivs: Vec<&InductionVariable> = Vec::new();
        let mut contained_insts: BTreeSet<ValueId> = BTreeSet::new();
        for iv in inputs.induction_variables {
            let phi_node = inputs.graph.node_of_value(iv.loop_entry_phi);
            if phi_node.map(|n| scc_ref.is_internal(n)).unwrap_or(false) {
                contained_insts.extend(iv.all_instructions.iter().copied());
                contained_ivs.push(iv);
            }
        }
        if contained_ivs.is_empty() {
            return false;
        }

        // A governing IV must carry a well-formed exit condition, whose
        // instructions then also count as contained.
        for iv in &contained_ivs {
            let Some(governing) = &iv.governing else {
                continue;
            };
            if !governing.is_well_formed {
                return false;
            }
            contained_insts.insert(governing.header_cmp);
            contained_insts.insert(governing.header_br);
            contained_insts.extend(governing.condition_derivation.iter().copied());
        }

        // Nothing with side effects may remain.
        for node in scc_ref.internal_nodes() {
            let value = inputs.graph.node(node).value;
            if contained_insts.contains(&value) {
                continue;
            }
            match inputs.function.opcode_of(value) {
                Some(op)
                    if op.is_unconditional_branch()
                        || op.is_syntactic_sugar()
                        || op.is_cmp() =>
                {
                    continue
                }
                _ => return false,
            }
        }
        true
    }

    fn check_if_clonable(
        &self,
        dag: &SccDag,
        inputs: &ClassifierInputs,
        scc: SccId,
        attrs: &mut SccAttrs,
    ) {
        if self.is_clonable_by_induction_vars(dag, scc, attrs)
            || self.is_clonable_by_syntactic_sugar_instrs(dag, inputs, scc)
            || self.is_clonable_by_cmp_br_instrs(dag, inputs, scc)
            || self.is_clonable_by_having_no_memory_or_loop_carried_data_dependencies(
                dag, inputs, scc,
            )
        {
            attrs.is_clonable = true;
            return;
        }
        self.check_if_clonable_by_using_local_memory(dag, inputs, scc, attrs);
    }

    fn is_clonable_by_induction_vars(&self, dag: &SccDag, scc: SccId, attrs: &SccAttrs) -> bool {
        if dag.outgoing_cond_edges(scc).is_empty() {
            return false;
        }
        attrs.is_induction_variable_scc
    }

    fn is_clonable_by_syntactic_sugar_instrs(
        &self,
        dag: &SccDag,
        inputs: &ClassifierInputs,
        scc: SccId,
    ) -> bool {
        if dag.outgoing_cond_edges(scc).is_empty() {
            return false;
        }
        let scc_ref = dag.scc(scc);
        if scc_ref.num_internal_nodes() > 1 {
            return false;
        }
        let node = scc_ref.internal_nodes().next().unwrap();
        let value = inputs.graph.node(node).value;
        inputs
            .function
            .opcode_of(value)
            .map(Opcode::is_syntactic_sugar)
            .unwrap_or(false)
    }

    fn is_clonable_by_cmp_br_instrs(
        &self,
        dag: &SccDag,
        inputs: &ClassifierInputs,
        scc: SccId,
    ) -> bool {
        dag.scc(scc).internal_nodes().all(|node| {
            let value = inputs.graph.node(node).value;
            matches!(
                inputs.function.opcode_of(value),
                Some(op) if op.is_cmp() || op.is_terminator()
            )
        })
    }

    fn is_clonable_by_having_no_memory_or_loop_carried_data_dependencies(
        &self,
        dag: &SccDag,
        inputs: &ClassifierInputs,
        scc: SccId,
    ) -> bool {
        if dag.outgoing_cond_edges(scc).is_empty() {
            return false;
        }

        let scc_ref = dag.scc(scc);
        let no_memory = scc_ref
            .internal_edges(inputs.graph)
            .chain(scc_ref.boundary_edges(inputs.graph))
            .all(|e| !inputs.graph.edge(e).is_memory_dependence());
        if !no_memory {
            return false;
        }

        let Some(deps) = self.scc_to_loop_carried.get(&scc) else {
            return true;
        };
        // A loop-carried dependence at the outermost level keeps the SCC
        // from being cloned.
        for &dep in deps {
            let edge = inputs.graph.edge(dep);
            for value in [
                inputs.graph.node(edge.from).value,
                inputs.graph.node(edge.to).value,
            ] {
                if inputs.nest.loop_of_instruction(inputs.function, value)
                    == Some(inputs.nest.root())
                {
                    return false;
                }
            }
        }
        true
    }

    fn check_if_clonable_by_using_local_memory(
        &self,
        _dag: &SccDag,
        inputs: &ClassifierInputs,
        scc: SccId,
        attrs: &mut SccAttrs,
    ) {
        let Some(deps) = self.scc_to_loop_carried.get(&scc) else {
            return;
        };

        let mut locations: BTreeSet<LocationId> = BTreeSet::new();
        for &dep in deps {
            let producer = inputs.graph.node(inputs.graph.edge(dep).from).value;
            if inputs.function.opcode_of(producer).is_none() {
                return;
            }
            match inputs.memory_cloning.clonable_location_for(producer) {
                Some(location) => {
                    locations.insert(location);
                }
                None => return,
            }
        }
        if locations.is_empty() {
            return;
        }
        attrs.is_clonable_using_local_memory = true;
        attrs.clonable_locations = locations;
    }

    fn collect_scc_graph_assuming_distributed_clones(&mut self, dag: &SccDag) {
        for child in dag.scc_ids() {
            let mut to_check: VecDeque<SccId> = VecDeque::new();
            let mut analyzed: BTreeSet<SccId> = BTreeSet::new();
            analyzed.insert(child);
            self.enqueue_clone_parents(dag, child, child, &mut to_check);

            while let Some(scc) = to_check.pop_front() {
                self.parents_via_clones.entry(child).or_default().insert(scc);
                if !self.scc_attrs(scc).can_be_cloned() {
                    continue;
                }
                if !analyzed.insert(scc) {
                    continue;
                }
                self.enqueue_clone_parents(dag, child, scc, &mut to_check);
            }
        }
    }

    fn enqueue_clone_parents(
        &mut self,
        dag: &SccDag,
        child: SccId,
        of: SccId,
        queue: &mut VecDeque<SccId>,
    ) {
        let mut parents = BTreeSet::new();
        for edge_id in dag.incoming_cond_edges(of) {
            parents.insert(dag.cond_edge(edge_id).from);
            self.edges_via_clones.entry(child).or_default().insert(edge_id);
        }
        queue.extend(parents);
    }
}
