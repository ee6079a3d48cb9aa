use serde::Serialize;
use std::time::Duration;

/// Bytes moved by one successful transfer probe and how long it took.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferOutcome {
    pub bytes: u64,
    pub elapsed: Duration,
}

impl TransferOutcome {
    pub const fn new(bytes: u64, elapsed: Duration) -> Self {
        Self { bytes, elapsed }
    }

    pub fn speed(&self) -> f64 {
        bytes_per_second(self.bytes, self.elapsed)
    }
}

/// Combined result of one direction of the concurrent throughput phase.
///
/// `time` is the mean duration of the successful chunks, and `speed` is
/// `bytes / time`. Everything is zero when no chunk succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct TransferSummary {
    pub bytes: u64,
    pub time: Duration,
    pub speed: f64,
    pub successes: usize,
}

/// Fold per-chunk outcomes into a [`TransferSummary`]; failed chunks
/// (`None`) are ignored. The result does not depend on outcome order.
pub fn aggregate_transfers(
    outcomes: &[Option<TransferOutcome>],
) -> TransferSummary {
    let (bytes, total_time, successes) = outcomes.iter().flatten().fold(
        (0_u64, Duration::ZERO, 0_usize),
        |(bytes, time, count), outcome| {
            (bytes + outcome.bytes, time + outcome.elapsed, count + 1)
        },
    );

    if successes == 0 {
        return TransferSummary::default();
    }

    let time = total_time / successes as u32;

    TransferSummary { bytes, time, speed: bytes_per_second(bytes, time), successes }
}

/// Throughput in bytes per second, zero for an empty interval.
pub fn bytes_per_second(bytes: u64, elapsed: Duration) -> f64 {
    let seconds = elapsed.as_secs_f64();
    if seconds <= 0.0 {
        return 0.0;
    }

    bytes as f64 / seconds
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ok(bytes: u64, ms: u64) -> Option<TransferOutcome> {
        Some(TransferOutcome::new(bytes, Duration::from_millis(ms)))
    }

    #[test]
    fn test_aggregate_uses_average_chunk_duration() {
        let outcomes = [ok(1000, 100), ok(2000, 200), None, ok(500, 50)];
        let summary = aggregate_transfers(&outcomes);

        let expected = 3500.0 / ((100.0 + 200.0 + 50.0) / 3.0 / 1000.0);
        assert_eq!(summary.bytes, 3500);
        assert_eq!(summary.successes, 3);
        assert!((summary.speed - expected).abs() / expected < 1e-6);
    }

    #[test]
    fn test_aggregate_is_order_independent() {
        let outcomes = [ok(1000, 100), ok(2000, 200), None, ok(500, 50)];
        let expected = aggregate_transfers(&outcomes);

        let orders = [[3, 2, 1, 0], [2, 0, 3, 1], [1, 3, 0, 2]];
        for order in orders {
            let shuffled: Vec<_> = order.iter().map(|i| outcomes[*i]).collect();
            assert_eq!(aggregate_transfers(&shuffled), expected);
        }
    }

    #[test]
    fn test_aggregate_all_failed() {
        let summary = aggregate_transfers(&[None, None, None, None]);
        assert_eq!(summary, TransferSummary::default());
        assert_eq!(summary.speed, 0.0);
    }

    #[test]
    fn test_aggregate_empty() {
        assert_eq!(aggregate_transfers(&[]), TransferSummary::default());
    }

    #[test]
    fn test_bytes_per_second_zero_duration() {
        assert_eq!(bytes_per_second(1024, Duration::ZERO), 0.0);
        assert_eq!(bytes_per_second(1024, Duration::from_millis(500)), 2048.0);
    }

    #[test]
    fn test_outcome_speed() {
        let outcome = TransferOutcome::new(4096, Duration::from_secs(2));
        assert_eq!(outcome.speed(), 2048.0);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn aggregate_ignores_collection_order(
            mut outcomes in prop::collection::vec(
                prop::option::of((0u64..10_000_000, 1u64..10_000)),
                0..8,
            ),
        ) {
            let as_outcomes = |items: &[Option<(u64, u64)>]| {
                items
                    .iter()
                    .map(|o| o.map(|(b, ms)| {
                        TransferOutcome::new(b, Duration::from_millis(ms))
                    }))
                    .collect::<Vec<_>>()
            };

            let forward = aggregate_transfers(&as_outcomes(&outcomes));
            outcomes.reverse();
            let backward = aggregate_transfers(&as_outcomes(&outcomes));

            prop_assert_eq!(forward, backward);
            prop_assert!(forward.speed.is_finite());
            prop_assert!(forward.speed >= 0.0);
        }
    }
}
