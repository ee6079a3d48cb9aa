use serde::Serialize;
use std::time::Duration;

/// Summary of a latency sample set.
///
/// `average` is zero when no sample succeeded. `packet_loss` is a percentage
/// in `[0, 100]` of failed attempts over the attempted total.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct LatencyStats {
    pub average: Duration,
    pub jitter: Duration,
    pub packet_loss: f64,
}

impl LatencyStats {
    /// True when every attempt failed.
    pub fn is_total_loss(&self) -> bool {
        self.packet_loss >= 100.0
    }
}

/// Build [`LatencyStats`] from the successful samples and the failure count
/// out of `total` attempts.
pub fn latency_stats(
    successes: &[Duration],
    failed: usize,
    total: usize,
) -> LatencyStats {
    LatencyStats {
        average: mean(successes),
        jitter: std_dev(successes),
        packet_loss: packet_loss(failed, total),
    }
}

pub fn mean(samples: &[Duration]) -> Duration {
    if samples.is_empty() {
        return Duration::ZERO;
    }

    let total = samples.iter().sum::<Duration>();

    total / samples.len() as u32
}

/// Population standard deviation of the samples.
///
/// Squared deviations are summed as integer nanoseconds so the result does
/// not depend on sample order.
pub fn std_dev(samples: &[Duration]) -> Duration {
    if samples.is_empty() {
        return Duration::ZERO;
    }

    let average = mean(samples).as_nanos() as i128;
    let squared = samples
        .iter()
        .map(|sample| {
            let diff = sample.as_nanos() as i128 - average;
            diff * diff
        })
        .sum::<i128>();
    let variance = squared as f64 / samples.len() as f64;

    Duration::from_nanos(variance.sqrt() as u64)
}

/// Percentage of failed attempts. An empty attempt set has no loss.
pub fn packet_loss(failed: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }

    failed.min(total) as f64 / total as f64 * 100.0
}
