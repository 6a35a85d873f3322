//! Failover continuity: store outages must be invisible to callers.

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use common::FlakyStore;
use tollbooth::store::failover::ReconnectPolicy;
use tollbooth::store::{CounterStore, FailoverStore, MemoryStore};
use tollbooth::{
    Backoff, CategoryPolicy, Jitter, PolicyTable, QuotaEnforcer, Tier, TrackingSleeper,
};

fn table(limit: u64) -> PolicyTable {
    PolicyTable::builder()
        .category(
            "op",
            CategoryPolicy::flat(Duration::from_secs(3_600), limit, "Limit reached."),
        )
        .build()
        .unwrap()
}

fn instant_probes(max: usize) -> ReconnectPolicy {
    ReconnectPolicy::new(max, Backoff::constant(Duration::from_millis(1)))
        .with_jitter(Jitter::none())
        .with_sleeper(TrackingSleeper::new())
}

async fn wait_until(deadline: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    cond()
}

#[tokio::test]
async fn outage_mid_window_keeps_decisions_flowing() {
    let primary = FlakyStore::new();
    let store = FailoverStore::new(primary.clone(), MemoryStore::new())
        .with_reconnect(instant_probes(1));
    let enforcer = QuotaEnforcer::new(Arc::new(store), table(3));

    // Two hits land on the primary.
    assert!(enforcer.check("u", "op", Tier::Free).await.unwrap().is_allowed());
    assert!(enforcer.check("u", "op", Tier::Free).await.unwrap().is_allowed());

    primary.fail();

    // No error, no hang: decisions keep coming from the fallback's own
    // counter, which starts fresh (degraded accuracy is the accepted cost).
    for expected_count in 1..=3u64 {
        let decision = enforcer.check("u", "op", Tier::Free).await.unwrap();
        assert!(
            decision.is_allowed(),
            "fallback count {expected_count} is within the limit of 3"
        );
    }
    assert!(!enforcer.check("u", "op", Tier::Free).await.unwrap().is_allowed());
}

#[tokio::test]
async fn decisions_stay_bounded_in_time_during_outage() {
    let primary = FlakyStore::new();
    let store = FailoverStore::new(primary.clone(), MemoryStore::new())
        .with_reconnect(instant_probes(1));
    let enforcer = QuotaEnforcer::new(Arc::new(store), table(100));

    primary.fail();
    let start = Instant::now();
    for _ in 0..50 {
        enforcer.check("u", "op", Tier::Free).await.unwrap();
    }
    // The flaky store fails instantly; the point is that nothing in the
    // failover path ever blocks a check on reconnection.
    assert!(start.elapsed() < Duration::from_secs(1));
}

#[tokio::test]
async fn recovery_returns_to_the_shared_counter() {
    let primary = FlakyStore::new();
    let reconnect = ReconnectPolicy::new(20, Backoff::constant(Duration::from_millis(25)))
        .with_jitter(Jitter::none());
    let store =
        FailoverStore::new(primary.clone(), MemoryStore::new()).with_reconnect(reconnect);
    let store_handle = store.clone();
    let enforcer = QuotaEnforcer::new(Arc::new(store), table(10));

    enforcer.check("u", "op", Tier::Free).await.unwrap();
    primary.fail();
    enforcer.check("u", "op", Tier::Free).await.unwrap();
    assert!(!store_handle.is_connected());

    primary.heal();
    assert!(wait_until(Duration::from_secs(2), || store_handle.is_connected()).await);

    // Back on the primary, which still remembers the pre-outage count.
    let calls_before = primary.calls();
    enforcer.check("u", "op", Tier::Free).await.unwrap();
    assert_eq!(primary.calls(), calls_before + 1);
}

#[tokio::test]
async fn probe_schedule_is_bounded_and_backed_off() {
    let primary = FlakyStore::new();
    let sleeper = TrackingSleeper::new();
    let reconnect = ReconnectPolicy::new(4, Backoff::exponential(Duration::from_millis(250)))
        .with_jitter(Jitter::none())
        .with_sleeper(sleeper.clone());
    let store =
        FailoverStore::new(primary.clone(), MemoryStore::new()).with_reconnect(reconnect);

    primary.fail();
    store.incr("rl:op:u", Duration::from_secs(60)).await.unwrap();

    assert!(wait_until(Duration::from_secs(1), || sleeper.calls().len() == 4).await);
    assert_eq!(
        sleeper.calls(),
        vec![
            Duration::from_millis(250),
            Duration::from_millis(500),
            Duration::from_millis(1_000),
            Duration::from_millis(2_000),
        ]
    );

    // Budget exhausted; the store stays pinned to the fallback.
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(sleeper.calls().len(), 4);
    assert!(!store.is_connected());
}
