//! Benchmarks for the dependence and region analyses.
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use pdgopt::prelude::*;
use pdgopt::analysis::SccDag;

/// A wide dependence graph: `width` chains feeding one accumulator cycle.
fn wide_graph(width: u32) -> (Function, DependenceGraph) {
    let mut f = Function::new("wide");
    let header = f.add_block("header");
    let latch = f.add_block("latch");
    let exit = f.add_block("exit");
    f.add_edge(header, latch);
    f.add_edge(latch, header);
    f.add_edge(header, exit);

    let mut g = DependenceGraph::new();
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
    }
    g.add_data_dependence(phi, add, false);
    g.add_data_dependence(add, phi, true);
    (f, g)
}

/// A ladder CFG: `rungs` stacked diamonds between entry and exit.
fn ladder_cfg(rungs: u32) -> Function {
    let mut f = Function::new("ladder");
    let mut prev = f.add_block("entry");
    for i in 0..rungs {
        let left = f.add_block(&format!("l{}", i));
        let right = f.add_block(&format!("r{}", i));
        let join = f.add_block(&format!("j{}", i));
        f.add_edge(prev, left);
        f.add_edge(prev, right);
        f.add_edge(left, join);
        f.add_edge(right, join);
        prev = join;
    }
    let exit = f.add_block("exit");
    f.add_edge(prev, exit);
    f
}

/// Benchmark SCC condensation of a wide dependence graph.
fn bench_condensation(c: &mut Criterion) {
    let (_, g) = wide_graph(512);
    c.bench_function("condense_wide_512", |b| {
        b.iter(|| SccDag::from_graph(black_box(&g)))
    });
}

/// Benchmark region construction over a deep ladder CFG.
fn bench_region_tree(c: &mut Criterion) {
    let f = ladder_cfg(128);
    c.bench_function("regions_ladder_128", |b| {
        b.iter(|| pdgopt::build_region_tree(black_box(&f)).unwrap())
    });
}

criterion_group!(benches, bench_condensation, bench_region_tree);
criterion_main!(benches);
