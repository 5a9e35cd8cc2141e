// Benchmarks for query compilation and batched/cached existence checks
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use fieldguard::prelude::*;
use fieldguard::{DocumentCompiler, QueryCompiler, RelationalCompiler};
use futures::future::join_all;
use rand::prelude::*;
use serde_json::json;

fn generate_tree(leaves: usize) -> Vec<ConditionNode> {
    let mut rng = rand::rng();
    let mut nodes = Vec::with_capacity(leaves);
    for i in 0..leaves {
        let leaf = ConditionNode::leaf(format!("field_{}", i % 8), rng.random_range(0..10_000));
        let leaf = if rng.random_bool(0.5) { leaf.or() } else { leaf };
        // Nest every fourth leaf one level down
        if i % 4 == 3 {
            nodes.push(ConditionNode::group(vec![leaf, ConditionNode::leaf("flag", true).or()]));
        } else {
            nodes.push(leaf);
        }
    }
    nodes
}

fn seeded_store(size: usize) -> MemoryDocumentStore {
    let store = MemoryDocumentStore::new();
    for i in 0..size {
        store
            .insert("users", json!({ "id": i, "email": format!("user{}@example.com", i) }))
            .unwrap();
    }
    store
}

fn benchmark_compile(c: &mut Criterion) {
    let mut group = c.benchmark_group("compile");
    let exclude = vec![ConditionNode::leaf("id", 42)];

    for leaves in [4, 32, 256].iter() {
        let tree = generate_tree(*leaves);
        group.bench_with_input(BenchmarkId::new("relational", leaves), &tree, |b, tree| {
            let compiler = RelationalCompiler::new();
            b.iter(|| compiler.compile(black_box("users"), black_box(tree), &exclude).unwrap());
        });
        group.bench_with_input(BenchmarkId::new("document", leaves), &tree, |b, tree| {
            let compiler = DocumentCompiler::new();
            b.iter(|| compiler.compile(black_box("users"), black_box(tree), &exclude).unwrap());
        });
    }

    group.finish();
}

fn benchmark_exists(c: &mut Criterion) {
    let mut group = c.benchmark_group("exists");
    let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();

    let engine = ExistenceEngine::new(Backend::document(seeded_store(10_000)));
    let check = ExistenceCheck::field("users", "email", "user42@example.com");
    rt.block_on(engine.exists(&check)).unwrap();
    group.bench_function("cached", |b| {
        b.iter(|| rt.block_on(engine.exists(black_box(&check))).unwrap());
    });

    for batch in [1, 16, 128].iter() {
        group.bench_with_input(BenchmarkId::new("batched", batch), batch, |b, &batch| {
            let engine = ExistenceEngine::new(Backend::document(seeded_store(1_000)));
            let mut rng = rand::rng();
            b.iter(|| {
                engine.clear_cache();
                let checks: Vec<_> = (0..batch)
                    .map(|_| {
                        let id = rng.random_range(0..2_000);
                        ExistenceCheck::field("users", "email", format!("user{}@example.com", id))
                    })
                    .collect();
                rt.block_on(join_all(checks.iter().map(|check| engine.exists(check))))
            });
        });
    }

    group.finish();
}

criterion_group!(benches, benchmark_compile, benchmark_exists);
criterion_main!(benches);
