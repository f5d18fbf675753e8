//! Integration tests for the dependence and region pipelines.

use pdgopt::prelude::*;
use pdgopt::analysis::{LocationId, SccDag};
use pdgopt::graph::EdgeId;
use pdgopt::sese::{CeEdgeKind, EnclosesKind, StructureKind};
use pdgopt::{annotate_and_scope, build_region_tree};
use std::collections::{BTreeSet, HashSet};

/// A wide dependence graph: `width` independent chains feeding one
/// accumulator cycle.
fn chained_graph(width: u32) -> (Function, DependenceGraph, Vec<ValueId>, ValueId, ValueId) {
    let mut f = Function::new("wide");
    let header = f.add_block("header");
    let latch = f.add_block("latch");
    let exit = f.add_block("exit");
    f.add_edge(header, latch);
    f.add_edge(latch, header);
    f.add_edge(header, exit);

    let mut g = DependenceGraph::new();
    let mut chain_heads = Vec::new();
    let phi = f.add_instruction(header, "%acc", Opcode::Phi, TypeKind::Int);
    let add = f.add_instruction(latch, "%acc.next", Opcode::Add, TypeKind::Int);
    g.add_node(phi);
    g.add_node(add);
    for i in 0..width {
        let head = f.add_instruction(latch, &format!("%h{}", i), Opcode::Mul, TypeKind::Int);
        let tail = f.add_instruction(latch, &format!("%t{}", i), Opcode::Mul, TypeKind::Int);
        g.add_node(head);
        g.add_node(tail);
        g.add_data_dependence(head, tail, false);
        g.add_data_dependence(tail, add, false);
        chain_heads.push(head);
    }
    g.add_data_dependence(phi, add, false);
    g.add_data_dependence(add, phi, true);
    (f, g, chain_heads, phi, add)
}

#[test]
fn test_scc_partition_and_maximality() {
    let (_, g, _, phi, add) = chained_graph(8);
    let dag = SccDag::from_graph(&g);

    // Every node is in exactly one SCC.
    let mut seen: BTreeSet<NodeId> = BTreeSet::new();
    for scc in dag.scc_ids() {
        for node in dag.scc(scc).internal_nodes() {
            assert!(seen.insert(node), "node assigned to two SCCs");
        }
    }
    assert_eq!(seen.len(), g.num_nodes());

    // No cycle spans two SCCs: the only multi-node SCC is the
    // accumulator, everything else is a singleton.
    let acc = dag.scc_of_value(&g, phi);
    assert_eq!(acc, dag.scc_of_value(&g, add));
    assert_eq!(dag.scc(acc).num_internal_nodes(), 2);
    for scc in dag.scc_ids() {
        if scc != acc {
            assert_eq!(dag.scc(scc).num_internal_nodes(), 1);
        }
    }
}

#[test]
fn test_condensation_acyclicity_and_reachability() {
    let (_, g, _, phi, _) = chained_graph(6);
    let dag = SccDag::from_graph(&g);

    let sccs: Vec<SccId> = dag.scc_ids().collect();
    for &a in &sccs {
        // Irreflexive.
        assert!(!dag.ordered_before(a, a));
        for &b in &sccs {
            // Antisymmetric (acyclicity of the condensation).
            if dag.ordered_before(a, b) {
                assert!(!dag.ordered_before(b, a));
            }
            // Transitive.
            for &c in &sccs {
                if dag.ordered_before(a, b) && dag.ordered_before(b, c) {
                    assert!(dag.ordered_before(a, c));
                }
            }
        }
    }

    // Chains are ordered before the accumulator they feed.
    let acc = dag.scc_of_value(&g, phi);
    assert!(dag
        .scc_ids()
        .filter(|&s| s != acc)
        .any(|s| dag.ordered_before(s, acc)));
}

#[test]
fn test_merge_matches_direct_derivation() {
    let (_, g, chain_heads, _, _) = chained_graph(2);
    let mut dag = SccDag::from_graph(&g);

    // Merge a chain head with the tail it feeds (adjacent SCCs).
    let head_node = g.node_of_value(chain_heads[0]).unwrap();
    let tail_edge = g.node(head_node).outgoing_edges()[0];
    let tail_value = g.node(g.edge(tail_edge).to).value;
    let head0 = dag.scc_of_value(&g, chain_heads[0]);
    let tail0 = dag.scc_of_value(&g, tail_value);
    let merged_set: BTreeSet<SccId> = [head0, tail0].into_iter().collect();
    dag.merge_sccs(&g, &merged_set);
    dag.compute_reachability_among_sccs();

    let merged = dag.scc_of_value(&g, chain_heads[0]);
    assert_eq!(merged, dag.scc_of_value(&g, tail_value));
    assert_eq!(dag.scc(merged).num_internal_nodes(), 2);

    // Condensation edges match re-deriving from the union: every
    // crossing edge of the host graph appears as a sub-edge exactly once.
    let mut from_subedges: BTreeSet<EdgeId> = BTreeSet::new();
    for e in dag.cond_edge_ids() {
        for &sub in dag.cond_edge(e).sub_edges() {
            assert!(from_subedges.insert(sub), "sub-edge attributed twice");
        }
    }
    let expected: BTreeSet<EdgeId> = g
        .edge_ids()
        .filter(|&e| {
            let edge = g.edge(e);
            dag.scc_of_node(edge.from) != dag.scc_of_node(edge.to)
        })
        .collect();
    assert_eq!(from_subedges, expected);
}

#[test]
fn test_classification_exclusivity() {
    let (f, g, _, phi, _) = chained_graph(4);
    let mut nest = LoopNest::new();
    let header = f.block_of(phi).unwrap();
    let blocks: Vec<BlockId> = f.block_ids().collect();
    nest.add_loop(header, [blocks[0], blocks[1]], None);

    let lcd = LoopCarriedDependencies::collect_from_graph(&g, &f, &nest);
    let ivs = Vec::new();
    let cloning = MemoryCloningAnalysis::new();
    let inputs = ClassifierInputs {
        function: &f,
        graph: &g,
        nest: &nest,
        loop_carried: &lcd,
        induction_variables: &ivs,
        memory_cloning: &cloning,
        enable_float_as_real: false,
    };
    let analysis = build_scc_analysis(&g, &inputs);

    for scc in analysis.dag.scc_ids() {
        let attrs = analysis.attrs.scc_attrs(scc);
        // Exactly one type; a reduction descriptor only on reducible
        // SCCs; independent SCCs have no loop-carried dependence to
        // reduce.
        match attrs.kind {
            SccKind::Reducible => assert!(attrs.reduction.is_some()),
            _ => assert!(attrs.reduction.is_none()),
        }
        if attrs.kind == SccKind::Independent {
            assert!(!analysis
                .attrs
                .sccs_with_loop_carried_dependencies()
                .contains(&scc));
        }
    }

    // The accumulator is the reducible one.
    let acc = analysis.dag.scc_of_value(&g, phi);
    assert_eq!(analysis.attrs.scc_attrs(acc).kind, SccKind::Reducible);
}

#[test]
fn test_sum_reduction_worked_example() {
    // %sum = phi [0, entry], [%sum.next, latch]
    // %sum.next = add %sum, %x     with %x loop-invariant
    let mut f = Function::new("sum");
    let entry = f.add_block("entry");
    let header = f.add_block("header");
    let latch = f.add_block("latch");
    let exit = f.add_block("exit");
    f.add_edge(entry, header);
    f.add_edge(header, latch);
    f.add_edge(latch, header);
    f.add_edge(header, exit);

    let x = f.add_argument("%x", TypeKind::Int);
    let sum = f.add_instruction(header, "%sum", Opcode::Phi, TypeKind::Int);
    let sum_next = f.add_instruction(latch, "%sum.next", Opcode::Add, TypeKind::Int);

    let mut g = DependenceGraph::new();
    g.add_node(x);
    g.add_node(sum);
    g.add_node(sum_next);
    g.add_data_dependence(sum, sum_next, false);
    g.add_data_dependence(x, sum_next, false);
    g.add_data_dependence(sum_next, sum, true);

    let mut nest = LoopNest::new();
    nest.add_loop(header, [header, latch], None);
    let lcd = LoopCarriedDependencies::collect_from_graph(&g, &f, &nest);
    let ivs = Vec::new();
    let cloning = MemoryCloningAnalysis::new();
    let inputs = ClassifierInputs {
        function: &f,
        graph: &g,
        nest: &nest,
        loop_carried: &lcd,
        induction_variables: &ivs,
        memory_cloning: &cloning,
        enable_float_as_real: false,
    };

    let analysis = build_scc_analysis(&g, &inputs);
    let scc = analysis.dag.scc_of_value(&g, sum);
    let attrs = analysis.attrs.scc_attrs(scc);
    assert_eq!(attrs.kind, SccKind::Reducible);
    let reduction = attrs.reduction.as_ref().unwrap();
    assert_eq!(reduction.phi, sum);
    assert_eq!(reduction.evolution_opcode, Opcode::Add);
    assert!(reduction.update_instructions.contains(&sum_next));
}

#[test]
fn test_simple_loop_cycle_classes() {
    // entry -> header -> body -> header (back-edge) ; header -> exit
    let mut f = Function::new("loop");
    let entry = f.add_block("entry");
    let header = f.add_block("header");
    let body = f.add_block("body");
    let exit = f.add_block("exit");
    f.add_edge(entry, header);
    f.add_edge(header, body);
    f.add_edge(body, header);
    f.add_edge(header, exit);

    let cfg = UndirectedCfg::from_function(&f).unwrap();
    let tree = SpanningTree::new(&cfg);
    let graph = CycleEquivalenceGraph::compute(&tree).unwrap();

    let entry_header = graph.tree_edge_to(header).unwrap();
    let header_body = graph.tree_edge_to(body).unwrap();
    let header_exit = graph.tree_edge_to(exit).unwrap();
    let body_header = graph
        .edge_ids()
        .find(|&e| {
            let edge = graph.edge(e);
            edge.kind == CeEdgeKind::Back && edge.source == body
        })
        .unwrap();

    // One natural loop = one SESE region: the loop edges share one
    // class, the surrounding edges another.
    assert_eq!(graph.class_of(header_body), graph.class_of(body_header));
    assert_eq!(graph.class_of(entry_header), graph.class_of(header_exit));
    assert_ne!(graph.class_of(header_body), graph.class_of(entry_header));
}

#[test]
fn test_diamond_end_to_end() {
    // entry -> {a, b} -> merge -> exit, no cycles
    let mut f = Function::new("diamond");
    let entry = f.add_block("entry");
    let a = f.add_block("a");
    let b = f.add_block("b");
    let merge = f.add_block("merge");
    let exit = f.add_block("exit");
    f.add_edge(entry, a);
    f.add_edge(entry, b);
    f.add_edge(a, merge);
    f.add_edge(b, merge);
    f.add_edge(merge, exit);

    let tree = build_region_tree(&f).unwrap();

    // A single region encloses the branch structure: the common
    // ancestor of a's and b's regions, bounded by the procedure-entry
    // bracket and the merge edge.
    let ra = tree.innermost_region_for_block(a);
    let rb = tree.innermost_region_for_block(b);
    let branch = tree.first_common_ancestor(ra, rb).unwrap();
    assert_eq!(tree.region(branch).structure, StructureKind::Canonical);
    assert_eq!(tree.region(branch).encloses, EnclosesKind::Region);

    // The branch region holds entry, a, b, merge; exit stays outside.
    let mut enclosed = HashSet::new();
    let mut stack = vec![branch];
    while let Some(r) = stack.pop() {
        if let Some(block) = tree.region(r).block {
            enclosed.insert(block);
        }
        stack.extend(tree.region(r).children.iter().copied());
    }
    let expected: HashSet<BlockId> = [entry, a, b, merge].into_iter().collect();
    assert_eq!(enclosed, expected);
}

#[test]
fn test_region_bijection_nested_loops() {
    let mut f = Function::new("nest");
    let entry = f.add_block("entry");
    let h1 = f.add_block("h1");
    let h2 = f.add_block("h2");
    let body = f.add_block("body");
    let latch = f.add_block("latch");
    let exit = f.add_block("exit");
    f.add_edge(entry, h1);
    f.add_edge(h1, h2);
    f.add_edge(h2, body);
    f.add_edge(body, h2);
    f.add_edge(h2, latch);
    f.add_edge(latch, h1);
    f.add_edge(h1, exit);

    let tree = build_region_tree(&f).unwrap();

    // Bijection: exactly one Block region per block.
    let mut block_regions = HashSet::new();
    for block in f.block_ids() {
        let r = tree.innermost_region_for_block(block);
        assert_eq!(tree.region(r).block, Some(block));
        assert!(block_regions.insert(r));
    }
    let leaf_count = tree
        .region_ids()
        .filter(|&r| tree.region(r).encloses == EnclosesKind::Block)
        .count();
    assert_eq!(leaf_count, f.num_blocks());

    // Nesting well-formedness: block sets nest or are disjoint.
    let blocks_of = |r: RegionId| -> HashSet<BlockId> {
        let mut out = HashSet::new();
        let mut stack = vec![r];
        while let Some(x) = stack.pop() {
            if let Some(bk) = tree.region(x).block {
                out.insert(bk);
            }
            stack.extend(tree.region(x).children.iter().copied());
        }
        out
    };
    let all: Vec<RegionId> = tree.region_ids().collect();
    for &r1 in &all {
        for &r2 in &all {
            if r1 == r2 {
                continue;
            }
            let (s1, s2) = (blocks_of(r1), blocks_of(r2));
            let inter = s1.intersection(&s2).count();
            assert!(inter == 0 || inter == s1.len() || inter == s2.len());
        }
    }

    // The inner loop's region nests strictly inside the outer loop's.
    let inner = tree.out(tree.innermost_region_for_block(body)).unwrap();
    let rh2 = tree.innermost_region_for_block(h2);
    let outer = tree.first_common_ancestor(rh2, tree.innermost_region_for_block(latch));
    if let Some(outer) = outer {
        let mut anc = tree.out(inner);
        let mut found = false;
        while let Some(r) = anc {
            if r == outer {
                found = true;
                break;
            }
            anc = tree.out(r);
        }
        assert!(found, "inner loop region does not nest in the outer");
    }
}

#[test]
fn test_annotation_pipeline_with_splitting() {
    let mut f = Function::new("scoped");
    let entry = f.add_block("entry");
    let work = f.add_block("work");
    let exit = f.add_block("exit");
    f.add_edge(entry, work);
    f.add_edge(work, exit);

    let key = intern("independent");
    let pre = f.add_instruction(work, "%pre", Opcode::Load, TypeKind::Int);
    let w1 = f.add_instruction(work, "%w1", Opcode::Mul, TypeKind::Int);
    let w2 = f.add_instruction(work, "%w2", Opcode::Add, TypeKind::Int);
    let post = f.add_instruction(work, "%post", Opcode::Store, TypeKind::Other);
    f.add_instruction(work, "br", Opcode::Br, TypeKind::Other);
    f.set_annotation(w1, key, 1);
    f.set_annotation(w2, key, 1);
    let _ = pre;

    let tree = annotate_and_scope(&mut f).unwrap();

    // The annotated instructions now share an annotation-homogeneous
    // block and the key is applicable across them.
    assert_eq!(f.block_of(w1), f.block_of(w2));
    assert!(tree.valid_annotation(&f, w1, w2, key));
    // It is not applicable across the unannotated tail.
    assert!(!tree.valid_annotation(&f, w1, post, key));
}

#[test]
fn test_clonable_via_local_memory_end_to_end() {
    let mut f = Function::new("privat");
    let header = f.add_block("header");
    let latch = f.add_block("latch");
    let exit = f.add_block("exit");
    f.add_edge(header, latch);
    f.add_edge(latch, header);
    f.add_edge(header, exit);

    let store = f.add_instruction(latch, "store.tmp", Opcode::Store, TypeKind::Other);
    let load = f.add_instruction(latch, "%tmp", Opcode::Load, TypeKind::Int);

    let mut g = DependenceGraph::new();
    g.add_node(store);
    g.add_node(load);
    g.add_data_dependence(load, store, false);
    g.add_memory_dependence(store, load, MemoryKind::Raw, Mustness::Must, true);

    let mut nest = LoopNest::new();
    nest.add_loop(header, [header, latch], None);
    let lcd = LoopCarriedDependencies::collect_from_graph(&g, &f, &nest);
    let mut cloning = MemoryCloningAnalysis::new();
    cloning.mark_clonable(store, LocationId(7));
    let ivs = Vec::new();
    let inputs = ClassifierInputs {
        function: &f,
        graph: &g,
        nest: &nest,
        loop_carried: &lcd,
        induction_variables: &ivs,
        memory_cloning: &cloning,
        enable_float_as_real: false,
    };

    let analysis = build_scc_analysis(&g, &inputs);
    let scc = analysis.dag.scc_of_value(&g, store);
    let attrs = analysis.attrs.scc_attrs(scc);
    assert_eq!(attrs.kind, SccKind::Sequential);
    assert!(attrs.is_clonable_using_local_memory);
    assert_eq!(
        attrs.clonable_locations.iter().copied().collect::<Vec<_>>(),
        vec![LocationId(7)]
    );
}

#[test]
fn test_dot_dumps_are_wellformed() {
    let (f, g, _, phi, _) = chained_graph(2);
    let mut nest = LoopNest::new();
    let header = f.block_of(phi).unwrap();
    let blocks: Vec<BlockId> = f.block_ids().collect();
    nest.add_loop(header, [blocks[0], blocks[1]], None);
    let lcd = LoopCarriedDependencies::collect_from_graph(&g, &f, &nest);
    let ivs = Vec::new();
    let cloning = MemoryCloningAnalysis::new();
    let inputs = ClassifierInputs {
        function: &f,
        graph: &g,
        nest: &nest,
        loop_carried: &lcd,
        induction_variables: &ivs,
        memory_cloning: &cloning,
        enable_float_as_real: false,
    };
    let analysis = build_scc_analysis(&g, &inputs);

    let dot = pdgopt::utils::sccdag_to_dot(&f, &g, &analysis.dag, &analysis.attrs);
    assert!(dot.starts_with("digraph sccdag {"));
    assert!(dot.contains("Reducible"));
    assert!(dot.ends_with("}\n"));

    let tree = build_region_tree(&f).unwrap();
    let dot = pdgopt::utils::region_tree_to_dot(&f, &tree);
    assert!(dot.starts_with("digraph regions {"));
}
