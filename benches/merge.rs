use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use serde_json::{json, Value};

use clinmerge::overlay::overlay;
use clinmerge::patch::diff;
use clinmerge::{
    CallerContext, InMemoryDocumentStore, MergeConfig, MergeEngine, MergeRequest,
    SecurityTagSystem,
};

fn patient(i: usize, gender: &str) -> Value {
    json!({
        "resourceType": "Patient",
        "id": format!("p{i}"),
        "meta": {
            "source": "http://ehr-a/Patient",
            "security": [
                {"system": SecurityTagSystem::OWNER, "code": "orgA"},
                {"system": SecurityTagSystem::ACCESS, "code": "orgA"}
            ]
        },
        "gender": gender,
        "name": [{"id": "n1", "family": "Doe", "given": ["Jane", format!("{i}")]}],
        "generalPractitioner": [{"reference": "Practitioner/dr1"}]
    })
}

fn caller() -> CallerContext {
    CallerContext::new("bench").with_scope_string("user/*.* access/*.*")
}

fn batch(size: usize, gender: &str) -> Value {
    Value::Array((0..size).map(|i| patient(i, gender)).collect())
}

fn bench_diff(c: &mut Criterion) {
    let current = patient(1, "female");
    let mut incoming = patient(1, "male");
    incoming["birthDate"] = json!("1990-01-01");
    incoming["name"] = json!([{"id": "n2", "family": "Roe"}]);

    c.bench_function("merge/overlay_and_diff", |b| {
        b.iter(|| {
            let merged = overlay(black_box(&current), black_box(&incoming));
            diff(&current, &merged)
        });
    });
}

fn bench_batch_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("merge/batch_insert");
    for size in [10usize, 100, 500] {
        group.throughput(Throughput::Elements(size as u64));
        group.bench_function(format!("{size}"), |b| {
            b.iter_batched(
                || {
                    let engine =
                        MergeEngine::new(Arc::new(InMemoryDocumentStore::new()), MergeConfig::default())
                            .expect("engine");
                    (engine, batch(size, "female"))
                },
                |(engine, resources)| engine.merge(MergeRequest::new(resources, caller())),
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

fn bench_batch_update(c: &mut Criterion) {
    let size = 100usize;
    let mut group = c.benchmark_group("merge/batch_update");
    group.throughput(Throughput::Elements(size as u64));
    group.bench_function("changed", |b| {
        b.iter_batched(
            || {
                let engine =
                    MergeEngine::new(Arc::new(InMemoryDocumentStore::new()), MergeConfig::default())
                        .expect("engine");
                engine
                    .merge(MergeRequest::new(batch(size, "female"), caller()))
                    .expect("seed");
                (engine, batch(size, "male"))
            },
            |(engine, resources)| engine.merge(MergeRequest::new(resources, caller())),
            BatchSize::SmallInput,
        );
    });
    group.bench_function("unchanged", |b| {
        let engine =
            MergeEngine::new(Arc::new(InMemoryDocumentStore::new()), MergeConfig::default())
                .expect("engine");
        engine
            .merge(MergeRequest::new(batch(size, "female"), caller()))
            .expect("seed");
        b.iter(|| engine.merge(MergeRequest::new(batch(size, "female"), caller())));
    });
    group.finish();
}

criterion_group!(benches, bench_diff, bench_batch_insert, bench_batch_update);
criterion_main!(benches);
