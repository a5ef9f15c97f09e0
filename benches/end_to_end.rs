//! End-to-end latency benchmark for the graph compiler.
//!
//! Measures each stage of the build pipeline on synthetic layered
//! models:
//! 1. Graph construction (builder -> frozen graph)
//! 2. Stock transform pipeline
//! 3. Source composition (parallel emitters)
//! 4. Binary model export
//! 5. Total end-to-end from a JSON manifest

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use lithograph::emit::{Composer, EmitterRegistry};
use lithograph::export;
use lithograph::frontend;
use lithograph::ir::{ElementType, Graph, GraphBuilder, Payload, TensorInfo};
use lithograph::pipeline::{default_passes, Pipeline};
use lithograph::transform::PassRegistry;

const WIDTH: usize = 16;

/// Build a dense chain of `layers` matmul+relu blocks with baked
/// weights, the shape a converted classifier typically has.
fn layered_graph(layers: usize) -> Graph {
    let mut b = GraphBuilder::new("bench");
    b.input("x", ElementType::F32, &[1, WIDTH]);
    let mut previous = "x".to_string();
    for i in 0..layers {
        let w = format!("w{}", i);
        let fc = format!("fc{}", i);
        let relu = format!("relu{}", i);
        b.constant(
            &w,
            Payload::F32(vec![0.125; WIDTH * WIDTH]),
            &[WIDTH, WIDTH],
        );
        b.node(
            &fc,
            "MatMul",
            &[&previous, &w],
            vec![TensorInfo::new(ElementType::F32, Some(vec![1, WIDTH]))],
        );
        b.node(
            &relu,
            "Relu",
            &[&fc],
            vec![TensorInfo::new(ElementType::F32, Some(vec![1, WIDTH]))],
        );
        previous = relu;
    }
    b.build(&[&previous]).expect("bench graph builds")
}

fn transformed(layers: usize) -> Graph {
    let registry = PassRegistry::with_builtins();
    let stages = Pipeline::from_specs(&registry, &default_passes()).expect("stock passes");
    stages.run(layered_graph(layers)).expect("pipeline runs")
}

/// Benchmark: builder -> frozen graph (ordering + validation).
fn bench_graph_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("graph_build");
    group.bench_function("16_layers", |b| b.iter(|| layered_graph(black_box(16))));
    group.bench_function("64_layers", |b| b.iter(|| layered_graph(black_box(64))));
    group.finish();
}

/// Benchmark: the stock pass pipeline.
fn bench_pipeline(c: &mut Criterion) {
    let registry = PassRegistry::with_builtins();
    let stages = Pipeline::from_specs(&registry, &default_passes()).expect("stock passes");
    let graph_16 = layered_graph(16);
    let graph_64 = layered_graph(64);

    let mut group = c.benchmark_group("pipeline");
    group.bench_function("16_layers", |b| {
        b.iter(|| stages.run(black_box(graph_16.clone())).expect("pipeline"))
    });
    group.bench_function("64_layers", |b| {
        b.iter(|| stages.run(black_box(graph_64.clone())).expect("pipeline"))
    });
    group.finish();
}

/// Benchmark: source composition over the emitter registry.
fn bench_compose(c: &mut Criterion) {
    let registry = EmitterRegistry::with_builtins();
    let composer = Composer::new();
    let graph = transformed(64);

    c.bench_function("compose_64_layers", |b| {
        b.iter(|| composer.compose(black_box(&graph), &registry).expect("compose"))
    });
}

/// Benchmark: binary model export.
fn bench_export(c: &mut Criterion) {
    let graph = transformed(64);

    c.bench_function("export_64_layers", |b| {
        b.iter(|| export::export(black_box(&graph)).expect("export"))
    });
}

/// Benchmark: manifest text -> passes -> both artifact kinds.
fn bench_end_to_end(c: &mut Criterion) {
    let manifest = serde_json::to_string(&frontend::to_manifest(&layered_graph(16)))
        .expect("manifest serializes");
    let registry = PassRegistry::with_builtins();
    let emitters = EmitterRegistry::with_builtins();
    let composer = Composer::new();

    c.bench_function("end_to_end_16_layers", |b| {
        b.iter(|| {
            let parsed = serde_json::from_str(black_box(&manifest)).expect("parse");
            let graph = frontend::from_manifest(&parsed).expect("build");
            let stages =
                Pipeline::from_specs(&registry, &default_passes()).expect("stock passes");
            let graph = stages.run(graph).expect("pipeline");
            let _artifacts = composer.compose(&graph, &emitters).expect("compose");
            let _bytes = export::export(&graph).expect("export");
        })
    });
}

criterion_group!(
    benches,
    bench_graph_build,
    bench_pipeline,
    bench_compose,
    bench_export,
    bench_end_to_end,
);
criterion_main!(benches);
