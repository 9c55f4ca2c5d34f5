use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use std::sync::Arc;
use std::time::Duration;

use stockgate_core::{ProductId, UserId};
use stockgate_infra::{InMemoryProductStore, InMemoryStockCache, ReservationEvaluator, StockCache};
use stockgate_products::Product;
use stockgate_sales::{NewOrder, OrderItem, aggregate_demand};

const CATALOG_SIZE: i64 = 1_000;

fn catalog() -> Vec<Product> {
    (1..=CATALOG_SIZE)
        .map(|i| Product::new(ProductId::new(i), format!("product-{i}"), 100, 1_000_000))
        .collect()
}

fn items(lines: usize) -> Vec<OrderItem> {
    (0..lines)
        .map(|i| OrderItem::new(ProductId::new((i as i64 % CATALOG_SIZE) + 1), 1, 100))
        .collect()
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn bench_aggregate_demand(c: &mut Criterion) {
    let mut group = c.benchmark_group("aggregate_demand");

    for lines in [1usize, 10, 100].iter() {
        group.throughput(Throughput::Elements(*lines as u64));
        let order = NewOrder::new(UserId::new(1), items(*lines));
        group.bench_with_input(BenchmarkId::new("lines", lines), &order, |b, order| {
            b.iter(|| black_box(aggregate_demand(&order.items).unwrap()));
        });
    }

    group.finish();
}

fn bench_evaluation(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("reservation_evaluation");

    let store = Arc::new(InMemoryProductStore::with_products(catalog()));
    let warm = Arc::new(InMemoryStockCache::new());
    rt.block_on(warm.set_many(&catalog(), Duration::from_secs(3600)))
        .unwrap();
    let cold = Arc::new(InMemoryStockCache::new());

    let cached = ReservationEvaluator::new(store.clone(), warm, Duration::from_secs(1));
    let fallback = ReservationEvaluator::new(store, cold, Duration::from_secs(1));

    for lines in [1usize, 10, 100].iter() {
        group.throughput(Throughput::Elements(*lines as u64));
        let order_items = items(*lines);

        group.bench_with_input(BenchmarkId::new("cache_hit", lines), &order_items, |b, order_items| {
            b.to_async(&rt)
                .iter(|| async { black_box(cached.evaluate(order_items).await.unwrap()) });
        });

        group.bench_with_input(
            BenchmarkId::new("store_fallback", lines),
            &order_items,
            |b, order_items| {
                b.to_async(&rt)
                    .iter(|| async { black_box(fallback.evaluate(order_items).await.unwrap()) });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_aggregate_demand, bench_evaluation);
criterion_main!(benches);
