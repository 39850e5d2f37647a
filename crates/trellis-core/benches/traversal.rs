//! Traversal benchmarks.
//!
//! Measures single hops and full queries as the number of inputs grows. Each
//! step is one batched fetch, so cost should track rows touched rather than
//! the number of inputs.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use trellis_core::{
    Association, Catalog, EngineConfig, Entity, EntityRow, EntityType, MemoryStore, QueryExecutor,
    Relationship, Store, TraversalEngine,
};

const ENTRIES_PER_BLOG: i64 = 5;

fn catalog() -> Catalog {
    let catalog = Catalog::new();
    catalog
        .register(EntityType::new("bench", "Blog").with_field("name"))
        .unwrap();
    catalog
        .register(EntityType::new("bench", "Entry").with_fields(["headline", "rating"]))
        .unwrap();
    catalog
        .register(EntityType::new("bench", "Author").with_field("name"))
        .unwrap();
    catalog
        .add_relationship("Blog", Relationship::reverse_multi("entry_set", "Entry", "blog_id"))
        .unwrap();
    catalog
        .add_relationship("Entry", Relationship::forward_single("blog", "Blog", "blog_id"))
        .unwrap();
    catalog
        .add_relationship(
            "Entry",
            Relationship::many_to_many(
                "authors",
                "Author",
                Association::new("bench__Entry_authors", "entry_id", "author_id"),
            ),
        )
        .unwrap();
    catalog.freeze().unwrap();
    catalog
}

fn store(blogs: i64) -> MemoryStore {
    let store = MemoryStore::new();
    for blog in 1..=blogs {
        store.insert(EntityRow::new("bench__Blog", blog).with_field("name", format!("blog {}", blog)));
        for n in 0..ENTRIES_PER_BLOG {
            let entry = blog * 100 + n;
            store.insert(
                EntityRow::new("bench__Entry", entry)
                    .with_field("blog_id", blog)
                    .with_field("rating", n)
                    .with_field("headline", format!("entry {}", entry)),
            );
            store.insert_link("bench__Entry_authors", ("entry_id", entry), ("author_id", n));
        }
    }
    for author in 0..ENTRIES_PER_BLOG {
        store.insert(EntityRow::new("bench__Author", author).with_field("name", "author"));
    }
    store
}

fn bench_single_hop(c: &mut Criterion) {
    let mut group = c.benchmark_group("traversal/hop");
    let catalog = catalog();

    for inputs in [10, 100, 1000] {
        let store = store(inputs);
        let engine = TraversalEngine::new(&catalog, &store, EngineConfig::default());
        let blogs: Vec<Entity> = store
            .scan("bench__Blog")
            .unwrap()
            .into_iter()
            .map(Entity::Row)
            .collect();
        let entry_set = catalog.resolve_relationship("Blog", "entry_set").unwrap();

        group.bench_with_input(BenchmarkId::new("reverse_multi", inputs), &blogs, |b, blogs| {
            b.iter(|| {
                black_box(engine.execute_step(blogs, &entry_set, &[]).unwrap());
            });
        });
    }

    group.finish();
}

fn bench_query(c: &mut Criterion) {
    let mut group = c.benchmark_group("traversal/query");
    let catalog = catalog();

    for inputs in [10, 100, 1000] {
        let store = store(inputs);
        let executor = QueryExecutor::new(&catalog, &store);

        group.bench_with_input(BenchmarkId::new("blogs", inputs), &inputs, |b, _| {
            b.iter(|| {
                black_box(
                    executor
                        .run_query("Blog Blog.entry_set(rating__gte=2) Entry.authors")
                        .unwrap(),
                );
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_single_hop, bench_query);
criterion_main!(benches);
