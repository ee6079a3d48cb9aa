//! Classification of proxy results.
//!
//! [`Thresholds`] decides whether a result is *usable* (kept at all) or
//! *good* (kept and listed first). [`Grade`] buckets single metrics for the
//! coloured report.

use std::cmp::Ordering;
use std::time::Duration;

use crate::results::ProxyResult;

pub const MIB: f64 = 1024.0 * 1024.0;

/// Convert a rate given in MB/s (as on the command line) to bytes/s.
pub fn mb_per_second(value: f64) -> f64 {
    value * MIB
}

/// Limits a result has to meet. Speeds are in bytes per second.
#[derive(Debug, Clone, PartialEq)]
pub struct Thresholds {
    /// Zero disables the latency check.
    pub max_latency: Duration,
    pub min_download_speed: f64,
    pub open_speed: f64,
    pub good_download_speed: f64,
    pub good_open_speed: f64,
    /// Whether must-reach URLs were configured for the run.
    pub extra_connect_configured: bool,
    /// Whether an extra download URL was configured for the run.
    pub extra_download_configured: bool,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            max_latency: Duration::from_millis(800),
            min_download_speed: mb_per_second(0.1),
            open_speed: mb_per_second(0.01),
            good_download_speed: mb_per_second(1.0),
            good_open_speed: mb_per_second(0.03),
            extra_connect_configured: false,
            extra_download_configured: false,
        }
    }
}

impl Thresholds {
    pub fn usable(&self, result: &ProxyResult) -> bool {
        let latency_ok = self.max_latency.is_zero()
            || result.latency <= self.max_latency;
        let open_ok = !self.extra_connect_configured
            || result.extra_url_open_speed >= self.open_speed;
        let extra_download_ok = !self.extra_download_configured
            || result.extra_download_speed >= self.min_download_speed;

        latency_ok
            && result.extra_url_connectivity
            && open_ok
            && result.download_speed >= self.min_download_speed
            && extra_download_ok
    }

    pub fn good(&self, result: &ProxyResult) -> bool {
        let open_ok = !self.extra_connect_configured
            || result.extra_url_open_speed >= self.good_open_speed;
        let extra_download_ok = !self.extra_download_configured
            || result.extra_download_speed >= self.good_download_speed;

        self.usable(result)
            && result.download_speed >= self.good_download_speed
            && open_ok
            && extra_download_ok
    }
}

/// Sort good results before the rest, each group by download speed,
/// fastest first. Ties keep their input order.
pub fn rank(results: &mut [ProxyResult], thresholds: &Thresholds) {
    results.sort_by(|a, b| {
        match (thresholds.good(a), thresholds.good(b)) {
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            _ => b.download_speed.total_cmp(&a.download_speed),
        }
    });
}

/// Fast-mode filter: the proxy answered and stayed within the latency limit.
pub fn reachable(result: &ProxyResult, thresholds: &Thresholds) -> bool {
    result.packet_loss < 100.0
        && (thresholds.max_latency.is_zero()
            || result.latency <= thresholds.max_latency)
}

/// Lowest latency first, ties broken by packet loss.
pub fn rank_by_latency(results: &mut [ProxyResult]) {
    results.sort_by(|a, b| {
        a.latency
            .cmp(&b.latency)
            .then(a.packet_loss.total_cmp(&b.packet_loss))
    });
}

/// Coarse rating of one metric, ordered from worst to best.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Grade {
    Poor,
    Fair,
    Good,
}

impl Grade {
    /// Zero means nothing was measured.
    pub fn latency(value: Duration) -> Self {
        if value.is_zero() || value >= Duration::from_millis(1500) {
            Grade::Poor
        } else if value >= Duration::from_millis(800) {
            Grade::Fair
        } else {
            Grade::Good
        }
    }

    pub fn packet_loss(percent: f64) -> Self {
        if percent < 10.0 {
            Grade::Good
        } else if percent < 20.0 {
            Grade::Fair
        } else {
            Grade::Poor
        }
    }

    /// Download speeds: good from the good threshold, fair a little above
    /// the minimum.
    pub fn download(speed: f64, thresholds: &Thresholds) -> Self {
        if speed >= thresholds.good_download_speed {
            Grade::Good
        } else if speed >= thresholds.min_download_speed + mb_per_second(0.1)
        {
            Grade::Fair
        } else {
            Grade::Poor
        }
    }

    pub fn upload(speed: f64) -> Self {
        if speed >= mb_per_second(0.5) {
            Grade::Good
        } else if speed >= mb_per_second(0.2) {
            Grade::Fair
        } else {
            Grade::Poor
        }
    }

    pub fn open_speed(speed: f64, thresholds: &Thresholds) -> Self {
        if speed >= thresholds.open_speed * 3.0 {
            Grade::Good
        } else if speed >= thresholds.open_speed * 2.0 {
            Grade::Fair
        } else {
            Grade::Poor
        }
    }
}
