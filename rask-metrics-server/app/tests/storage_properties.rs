use proptest::prelude::*;
use rask_metrics_core::{Metric, MetricKind};
use rask_metrics_server::storage::{MemStorage, MetricStore, Storage};

fn finite_gauge() -> impl Strategy<Value = f64> {
    -1.0e12f64..1.0e12f64
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// The last gauge write wins.
    #[test]
    fn gauge_reads_back_last_write(values in prop::collection::vec(finite_gauge(), 1..32)) {
        let mut store = MetricStore::default();
        for value in &values {
            store.apply(&Metric::gauge("Load", *value)).unwrap();
        }
        let last = *values.last().unwrap();
        prop_assert_eq!(store.get("Load", MetricKind::Gauge), Some(Metric::gauge("Load", last)));
    }

    /// Counter totals are the sum of deltas, whatever the order.
    #[test]
    fn counter_sums_deltas_in_any_order(
        deltas in prop::collection::vec(-1_000_000i64..1_000_000, 1..32),
        seed in any::<u64>(),
    ) {
        let expected: i64 = deltas.iter().sum();

        let mut forward = MetricStore::default();
        for delta in &deltas {
            forward.apply(&Metric::counter("Hits", *delta)).unwrap();
        }

        let mut shuffled = deltas.clone();
        let len = shuffled.len();
        shuffled.rotate_left((seed as usize) % len);
        shuffled.reverse();
        let mut backward = MetricStore::default();
        for delta in &shuffled {
            backward.apply(&Metric::counter("Hits", *delta)).unwrap();
        }

        prop_assert_eq!(forward.get("Hits", MetricKind::Counter), Some(Metric::counter("Hits", expected)));
        prop_assert_eq!(backward.get("Hits", MetricKind::Counter), Some(Metric::counter("Hits", expected)));
    }

    /// Replaying a gauge-only batch changes nothing; replaying counters adds
    /// their deltas again.
    #[test]
    fn batch_replay_is_idempotent_for_gauges_only(
        gauge in finite_gauge(),
        delta in 1i64..1_000_000,
    ) {
        let batch = vec![Metric::gauge("Load", gauge), Metric::counter("Hits", delta)];
        let mut store = MetricStore::default();
        store.apply_batch(&batch).unwrap();
        let once = store.clone();
        store.apply_batch(&batch).unwrap();

        prop_assert_eq!(store.get("Load", MetricKind::Gauge), once.get("Load", MetricKind::Gauge));
        prop_assert_eq!(store.get("Hits", MetricKind::Counter), Some(Metric::counter("Hits", delta * 2)));
    }

    /// A batch with any invalid entry leaves the store untouched.
    #[test]
    fn failed_batch_applies_nothing(valid in prop::collection::vec(1i64..100, 0..8)) {
        let mut store = MetricStore::default();
        store.apply(&Metric::gauge("Taken", 1.0)).unwrap();
        let before = store.clone();

        let mut batch: Vec<Metric> = valid
            .iter()
            .enumerate()
            .map(|(i, d)| Metric::counter(format!("C{i}"), *d))
            .collect();
        batch.push(Metric::counter("Taken", 1));

        prop_assert!(store.apply_batch(&batch).is_err());
        prop_assert_eq!(store, before);
    }
}

#[tokio::test]
async fn test_batch_result_follows_input_order() {
    let storage = MemStorage::new();
    let stored = storage
        .append_metrics(vec![
            Metric::counter("B", 1),
            Metric::gauge("A", 2.0),
            Metric::counter("B", 2),
        ])
        .await
        .unwrap();
    assert_eq!(
        stored,
        vec![
            Metric::counter("B", 1),
            Metric::gauge("A", 2.0),
            Metric::counter("B", 3),
        ]
    );

    let all = storage.get_all_metrics().await.unwrap();
    assert_eq!(all, vec![Metric::gauge("A", 2.0), Metric::counter("B", 3)]);
}
