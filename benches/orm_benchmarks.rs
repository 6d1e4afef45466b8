//! Criterion benchmarks for rust_orm_system

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rust_orm_system::core::{InsertBuilder, SelectBuilder};
use rust_orm_system::mapping::{registry, Materializer, RowGraph};
use rust_orm_system::prelude::*;

#[derive(Debug, Default, Clone)]
struct Item {
    id: i64,
    sku: String,
    title: String,
    price: Decimal,
    stock: i32,
    active: bool,
    parts: Vec<Part>,
}

#[derive(Debug, Default, Clone)]
struct Part {
    id: i64,
    item_id: i64,
    label: String,
}

impl Entity for Item {
    fn schema() -> EntitySchema<Self> {
        EntitySchema::table("items")
            .identity("id", PrimitiveKind::Int64, |i: &Item| &i.id, |i: &mut Item| &mut i.id)
            .column("sku", PrimitiveKind::Varchar, |i: &Item| &i.sku, |i: &mut Item| &mut i.sku)
            .column("title", PrimitiveKind::Text, |i: &Item| &i.title, |i: &mut Item| &mut i.title)
            .column("price", PrimitiveKind::Decimal, |i: &Item| &i.price, |i: &mut Item| &mut i.price)
            .column("stock", PrimitiveKind::Int32, |i: &Item| &i.stock, |i: &mut Item| &mut i.stock)
            .column("active", PrimitiveKind::Boolean, |i: &Item| &i.active, |i: &mut Item| &mut i.active)
            .one_to_many(
                "parts",
                ForeignKey::single("id", "item_id"),
                |i: &Item| &i.parts,
                |i: &mut Item| &mut i.parts,
            )
    }
}

impl Entity for Part {
    fn schema() -> EntitySchema<Self> {
        EntitySchema::table("parts")
            .identity("id", PrimitiveKind::Int64, |p: &Part| &p.id, |p: &mut Part| &mut p.id)
            .column("item_id", PrimitiveKind::Int64, |p: &Part| &p.item_id, |p: &mut Part| &mut p.item_id)
            .column("label", PrimitiveKind::Varchar, |p: &Part| &p.label, |p: &mut Part| &mut p.label)
    }
}

fn sample_item(parts: usize) -> Item {
    Item {
        id: 42,
        sku: "SKU-0042".into(),
        title: "mechanical keyboard".into(),
        price: Decimal::new("89.90").unwrap(),
        stock: 17,
        active: true,
        parts: (0..parts)
            .map(|n| Part {
                id: n as i64 + 1,
                item_id: 42,
                label: format!("part {}", n),
            })
            .collect(),
    }
}

// ============================================================================
// Statement Rendering Benchmarks
// ============================================================================

fn bench_statement_rendering(c: &mut Criterion) {
    let map = registry::resolve::<Item>().unwrap();
    let row = map.map_into_row(&sample_item(0)).unwrap();

    let mut group = c.benchmark_group("statement_rendering");
    group.throughput(Throughput::Elements(1));

    for backend in [DatabaseType::Mysql, DatabaseType::Mssql, DatabaseType::Sqlite] {
        group.bench_with_input(BenchmarkId::new("upsert", backend), &backend, |b, backend| {
            b.iter(|| {
                let statement = InsertBuilder::new(&map, *backend)
                    .upsert(true)
                    .row(black_box(&row))
                    .build()
                    .unwrap();
                black_box(statement)
            });
        });
    }

    group.bench_function("select_three_predicates", |b| {
        b.iter(|| {
            let condition = WhereCondition::all_equal([
                ("sku", DatabaseValue::from("SKU-0042")),
                ("stock", DatabaseValue::from(17)),
                ("active", DatabaseValue::from(true)),
            ])
            .unwrap();
            let statement = SelectBuilder::new(&map, DatabaseType::Mysql)
                .filter(black_box(condition))
                .build()
                .unwrap();
            black_box(statement)
        });
    });

    group.finish();
}

// ============================================================================
// Object Mapping Benchmarks
// ============================================================================

fn bench_object_mapping(c: &mut Criterion) {
    let map = registry::resolve::<Item>().unwrap();
    let mut group = c.benchmark_group("object_mapping");

    for parts in [0usize, 10, 100] {
        let item = sample_item(parts);
        group.throughput(Throughput::Elements(parts as u64 + 1));

        group.bench_with_input(BenchmarkId::new("stage", parts), &item, |b, item| {
            b.iter(|| {
                let mut graph = RowGraph::new();
                let root = map.stage(black_box(item), &mut graph, None).unwrap();
                black_box((graph, root))
            });
        });

        let mut graph = RowGraph::new();
        let root = map.stage(&item, &mut graph, None).unwrap();
        group.bench_with_input(BenchmarkId::new("materialize", parts), &graph, |b, graph| {
            b.iter(|| {
                let item: Item = Materializer::new(graph).materialize(&map, root).unwrap();
                black_box(item)
            });
        });
    }

    group.finish();
}

// ============================================================================
// SQLite Round Trip Benchmarks
// ============================================================================

fn bench_sqlite_round_trip(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bench.db").to_string_lossy().into_owned();
    tokio_test::block_on(async {
        let setup = SqliteDatabase::new();
        setup.connect(&path).await?;
        setup
            .execute("CREATE TABLE items (id INTEGER PRIMARY KEY, sku TEXT, title TEXT, price TEXT, stock INTEGER, active INTEGER)")
            .await?;
        setup
            .execute("CREATE TABLE parts (id INTEGER PRIMARY KEY, item_id INTEGER, label TEXT)")
            .await?;
        setup.disconnect().await
    })
    .unwrap();

    let db = DataBase::open_blocking(DataBaseConfig::new(DatabaseType::Sqlite, path)).unwrap();
    let mut group = c.benchmark_group("sqlite_round_trip");
    group.sample_size(20);

    group.bench_function("save_item_with_parts", |b| {
        let mut item = sample_item(10);
        b.iter(|| {
            let status = db.save_blocking(black_box(&mut item)).unwrap();
            black_box(status)
        });
    });

    group.bench_function("load_item_with_parts", |b| {
        b.iter(|| {
            let status = db.load_by_key_blocking::<Item>(black_box(42i64)).unwrap();
            black_box(status)
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_statement_rendering,
    bench_object_mapping,
    bench_sqlite_round_trip
);
criterion_main!(benches);
