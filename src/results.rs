//! Per-proxy result records and the run report.
//!
//! Every field of [`ProxyResult`] is filled by the engine; phases that were
//! never run leave their fields at zero. All structures implement Serialize
//! for JSON output, with durations written as milliseconds.

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::time::Duration;

use crate::proxy::{ProxyHandle, ProxyKind, RawProxyConfig};
use crate::stats::LatencyStats;

/// How far the test pipeline got for one proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TestStatus {
    /// Every phase ran.
    Complete,
    /// Fast mode: only latency was measured.
    LatencyOnly,
    /// The speed-test server never answered a latency probe.
    PrimaryUnreachable,
    /// One of the must-reach URLs never answered.
    ExtraUnreachable,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProxyResult {
    pub proxy_name: String,
    pub proxy_type: ProxyKind,
    /// Config entry the proxy was built from, echoed for saving.
    pub proxy_config: RawProxyConfig,
    #[serde(rename = "latency_ms", serialize_with = "as_millis")]
    pub latency: Duration,
    #[serde(rename = "jitter_ms", serialize_with = "as_millis")]
    pub jitter: Duration,
    /// Percentage in [0, 100].
    pub packet_loss: f64,
    pub download_size: u64,
    #[serde(rename = "download_time_ms", serialize_with = "as_millis")]
    pub download_time: Duration,
    /// Bytes per second.
    pub download_speed: f64,
    pub upload_size: u64,
    #[serde(rename = "upload_time_ms", serialize_with = "as_millis")]
    pub upload_time: Duration,
    pub upload_speed: f64,
    pub extra_url_connectivity: bool,
    pub extra_url_open_speed: f64,
    pub extra_download_speed: f64,
    pub status: TestStatus,
}

impl ProxyResult {
    /// An empty record for `proxy`, before any probe has run. The name is
    /// prefixed with the proxy's source document stem when it has one.
    pub fn for_proxy(proxy: &ProxyHandle) -> Self {
        Self {
            proxy_name: proxy.display_name(),
            proxy_type: proxy.kind(),
            proxy_config: proxy.config().clone(),
            latency: Duration::ZERO,
            jitter: Duration::ZERO,
            packet_loss: 0.0,
            download_size: 0,
            download_time: Duration::ZERO,
            download_speed: 0.0,
            upload_size: 0,
            upload_time: Duration::ZERO,
            upload_speed: 0.0,
            extra_url_connectivity: false,
            extra_url_open_speed: 0.0,
            extra_download_speed: 0.0,
            status: TestStatus::PrimaryUnreachable,
        }
    }

    pub(crate) fn apply_latency(&mut self, stats: &LatencyStats) {
        self.latency = stats.average;
        self.jitter = stats.jitter;
        self.packet_loss = stats.packet_loss;
    }

    pub fn format_latency(&self) -> String {
        format_millis(self.latency)
    }

    pub fn format_jitter(&self) -> String {
        format_millis(self.jitter)
    }

    pub fn format_packet_loss(&self) -> String {
        format!("{:.1}%", self.packet_loss)
    }

    pub fn format_download_speed(&self) -> String {
        format_speed(self.download_speed)
    }

    pub fn format_upload_speed(&self) -> String {
        format_speed(self.upload_speed)
    }

    pub fn format_extra_url_connectivity(&self) -> String {
        if self.extra_url_connectivity { "yes" } else { "no" }.to_string()
    }

    pub fn format_extra_url_open_speed(&self) -> String {
        format_speed(self.extra_url_open_speed)
    }

    pub fn format_extra_download_speed(&self) -> String {
        format_speed(self.extra_download_speed)
    }
}

/// Human readable rate, stepping through units by powers of 1024.
pub fn format_speed(bytes_per_second: f64) -> String {
    const UNITS: [&str; 5] = ["B/s", "KB/s", "MB/s", "GB/s", "TB/s"];

    let mut speed = bytes_per_second;
    let mut unit = 0;
    while speed >= 1024.0 && unit < UNITS.len() - 1 {
        speed /= 1024.0;
        unit += 1;
    }

    format!("{:.2}{}", speed, UNITS[unit])
}

fn format_millis(duration: Duration) -> String {
    if duration.is_zero() {
        return "N/A".to_string();
    }

    format!("{}ms", duration.as_millis())
}

fn as_millis<S: Serializer>(
    duration: &Duration,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(duration.as_secs_f64() * 1000.0)
}

/// Everything a run produced, as printed with `--json`.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Timestamp when the run finished
    pub timestamp: DateTime<Utc>,
    pub server_url: String,
    pub fast_mode: bool,
    pub tested: usize,
    pub usable: usize,
    pub good: usize,
    /// Ranked results, good proxies first.
    pub results: Vec<ProxyResult>,
}

impl RunReport {
    pub fn new(
        server_url: String,
        fast_mode: bool,
        results: Vec<ProxyResult>,
        usable: usize,
        good: usize,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            server_url,
            fast_mode,
            tested: results.len(),
            usable,
            good,
            results,
        }
    }
}
