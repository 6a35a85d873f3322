use criterion::{criterion_group, criterion_main, Criterion};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;

use tollbooth::store::MemoryStore;
use tollbooth::{CategoryPolicy, PolicyTable, QuotaEnforcer, Tier};

fn bench_check(c: &mut Criterion) {
    let rt = Runtime::new().expect("tokio runtime");

    let table = PolicyTable::builder()
        .category(
            "bench",
            CategoryPolicy::flat(Duration::from_secs(3_600), u64::MAX, "Limit reached."),
        )
        .build()
        .expect("valid table");
    let enforcer = QuotaEnforcer::new(Arc::new(MemoryStore::new()), table);

    c.bench_function("check_memory_store", |b| {
        b.to_async(&rt).iter(|| {
            let enforcer = enforcer.clone();
            async move { enforcer.check("user-1", "bench", Tier::Free).await.unwrap() }
        })
    });

    c.bench_function("check_memory_store_many_identities", |b| {
        let mut n: u64 = 0;
        b.to_async(&rt).iter(|| {
            n = n.wrapping_add(1);
            let enforcer = enforcer.clone();
            let identity = format!("user-{}", n % 10_000);
            async move { enforcer.check(&identity, "bench", Tier::Free).await.unwrap() }
        })
    });
}

criterion_group!(benches, bench_check);
criterion_main!(benches);
