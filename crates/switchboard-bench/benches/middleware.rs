//! Middleware chain overhead.
//!
//! These benchmarks measure the cost the chain adds around an operation,
//! alone and through the facade.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::json;
use std::sync::Arc;
use switchboard_bench::{chain, runtime, switchboard};
use switchboard_core::{MiddlewareContext, Operation, Provider};
use switchboard_mock::MockProvider;

/// Benchmark a bare chain around a no-op operation.
fn bench_chain_depth(c: &mut Criterion) {
    let mut group = c.benchmark_group("chain_depth");
    let rt = runtime();
    let provider: Arc<dyn Provider> = Arc::new(MockProvider::new());

    for depth in [0, 1, 4, 16].iter() {
        let chain = chain(*depth);
        group.bench_with_input(BenchmarkId::from_parameter(depth), depth, |b, _| {
            b.to_async(&rt).iter(|| {
                let context = MiddlewareContext::new(Arc::clone(&provider), Operation::Publish);
                chain.execute(context, |ctx| async move { Ok(black_box(ctx.operation)) })
            });
        });
    }

    group.finish();
}

/// Benchmark a facade publish with an empty and a loaded chain.
fn bench_facade_publish(c: &mut Criterion) {
    let mut group = c.benchmark_group("facade_publish");
    let rt = runtime();

    for depth in [0, 4].iter() {
        let (switchboard, provider) = switchboard(*depth).unwrap();
        let switchboard = Arc::new(tokio::sync::Mutex::new(switchboard));
        rt.block_on(async {
            switchboard.lock().await.connect(None).await.unwrap();
        });

        group.bench_with_input(BenchmarkId::from_parameter(depth), depth, |b, _| {
            b.to_async(&rt).iter(|| {
                let switchboard = Arc::clone(&switchboard);
                async move {
                    switchboard
                        .lock()
                        .await
                        .publish("bench", "tick", black_box(json!({ "n": 1 })))
                        .await
                        .unwrap();
                }
            });
        });

        rt.block_on(async {
            provider.settled().await;
            switchboard.lock().await.destroy().await.unwrap();
        });
    }

    group.finish();
}

criterion_group!(benches, bench_chain_depth, bench_facade_publish);
criterion_main!(benches);
