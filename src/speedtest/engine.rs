use super::connection::HttpClient;
use super::extra::probe_extra;
use super::latency::Sampler;
use super::requests::{endpoint, Download, Request};
use super::throughput::{measure_throughput, ThroughputPlan};
use crate::errors::SpeedTestError;
use crate::proxy::ProxyHandle;
use crate::results::{ProxyResult, TestStatus};
use log::{debug, info};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

pub const DEFAULT_SERVER_URL: &str = "https://speed.cloudflare.com";
pub const DEFAULT_DOWNLOAD_SIZE: u64 = 50 * 1024 * 1024;
pub const DEFAULT_UPLOAD_SIZE: u64 = 20 * 1024 * 1024;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_CONCURRENCY: usize = 4;
pub const DEFAULT_LATENCY_SAMPLES: usize = 6;
pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_millis(100);

/// Sizes used when a total of zero bytes is requested.
const FALLBACK_DOWNLOAD_SIZE: u64 = 100 * 1024 * 1024;
const FALLBACK_UPLOAD_SIZE: u64 = 10 * 1024 * 1024;

/// Configuration for a speed test run.
#[derive(Debug, Clone, PartialEq)]
pub struct TestConfig {
    /// Base URL of a server answering `/__down` and `/__up`
    pub server_url: String,
    /// Total bytes downloaded per proxy, split over the concurrent transfers
    pub download_size: u64,
    /// Total bytes uploaded per proxy, split over the concurrent transfers
    pub upload_size: u64,
    /// Deadline of every single probe
    pub timeout: Duration,
    /// Number of parallel transfers in each throughput phase
    pub concurrent: usize,
    /// Requests per latency measurement
    pub latency_samples: usize,
    /// Pause before each latency request
    pub probe_interval: Duration,
    /// URLs that must be reachable through a proxy, probed in order
    pub extra_connect_urls: Vec<String>,
    /// File downloaded once per proxy after the must-reach URLs
    pub extra_download_url: Option<String>,
    /// Only measure latency
    pub fast_mode: bool,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            download_size: DEFAULT_DOWNLOAD_SIZE,
            upload_size: DEFAULT_UPLOAD_SIZE,
            timeout: DEFAULT_TIMEOUT,
            concurrent: DEFAULT_CONCURRENCY,
            latency_samples: DEFAULT_LATENCY_SAMPLES,
            probe_interval: DEFAULT_PROBE_INTERVAL,
            extra_connect_urls: Vec::new(),
            extra_download_url: None,
            fast_mode: false,
        }
    }
}

/// Measures proxies one at a time.
#[derive(Debug)]
pub struct SpeedTester {
    config: TestConfig,
    ping: Download,
    sampler: Sampler,
    extra_connect: Vec<Url>,
    extra_download: Option<Url>,
    throughput: ThroughputPlan,
}

impl SpeedTester {
    /// Validate `config` and prepare the probe endpoints.
    ///
    /// A concurrency of zero becomes one and zero transfer sizes fall back
    /// to 100 MiB down and 10 MiB up.
    pub fn new(mut config: TestConfig) -> Result<Self, SpeedTestError> {
        if config.concurrent == 0 {
            config.concurrent = 1;
        }
        if config.download_size == 0 {
            config.download_size = FALLBACK_DOWNLOAD_SIZE;
        }
        if config.upload_size == 0 {
            config.upload_size = FALLBACK_UPLOAD_SIZE;
        }
        if config.latency_samples == 0 {
            return Err(SpeedTestError::config(
                "at least one latency sample is required",
            ));
        }
        if config.timeout.is_zero() {
            return Err(SpeedTestError::config("timeout must be positive"));
        }

        let server = parse_url(&config.server_url, "server url")?;
        let extra_connect = config
            .extra_connect_urls
            .iter()
            .map(|url| parse_url(url, "extra connect url"))
            .collect::<Result<Vec<_>, _>>()?;
        let extra_download = config
            .extra_download_url
            .as_deref()
            .map(|url| parse_url(url, "extra download url"))
            .transpose()?;

        let ping = Download::sized(&endpoint(&server, "__down"), 0);
        let sampler = Sampler {
            samples: config.latency_samples,
            interval: config.probe_interval,
            timeout: config.timeout,
        };
        let throughput = ThroughputPlan::new(
            endpoint(&server, "__down"),
            endpoint(&server, "__up"),
            config.download_size,
            config.upload_size,
            config.concurrent,
            config.timeout,
        );

        Ok(Self {
            config,
            ping,
            sampler,
            extra_connect,
            extra_download,
            throughput,
        })
    }

    /// The configuration after normalisation.
    pub fn config(&self) -> &TestConfig {
        &self.config
    }

    /// Run the whole pipeline for one proxy.
    ///
    /// Latency comes first; a proxy that never reaches the speed-test
    /// server is not probed any further. Then the must-reach URLs, and
    /// only if all of them answered, the throughput phases.
    pub async fn test_proxy(&self, proxy: &ProxyHandle) -> ProxyResult {
        let mut result = ProxyResult::for_proxy(proxy);
        let client = Arc::new(HttpClient::new(proxy.dialer()));

        debug!("Testing {} ({})", proxy.name(), proxy.kind());
        let latency =
            self.sampler.probe_latency(&client, self.ping.url()).await;
        result.apply_latency(&latency);

        if latency.is_total_loss() {
            info!("{}: speed-test server unreachable", proxy.name());
            result.status = TestStatus::PrimaryUnreachable;
            return result;
        }

        if self.config.fast_mode {
            result.status = TestStatus::LatencyOnly;
            return result;
        }

        let extra = probe_extra(
            &client,
            &self.sampler,
            &self.extra_connect,
            self.extra_download.as_ref(),
        )
        .await;
        result.extra_url_connectivity = extra.connectivity;
        result.extra_url_open_speed = extra.open_speed;
        result.extra_download_speed = extra.download_speed;

        if !extra.connectivity {
            info!("{}: a must-reach url is unreachable", proxy.name());
            result.status = TestStatus::ExtraUnreachable;
            return result;
        }

        let throughput = measure_throughput(&client, &self.throughput).await;
        result.download_size = throughput.download.bytes;
        result.download_time = throughput.download.time;
        result.download_speed = throughput.download.speed;
        result.upload_size = throughput.upload.bytes;
        result.upload_time = throughput.upload.time;
        result.upload_speed = throughput.upload.speed;
        result.status = TestStatus::Complete;

        info!(
            "{}: latency {:?}, download {:.0} B/s, upload {:.0} B/s",
            proxy.name(),
            result.latency,
            result.download_speed,
            result.upload_speed
        );

        result
    }

    /// Test `proxies` in order, handing each result to `on_result` as soon
    /// as it is complete.
    pub async fn test_proxies(
        &self,
        proxies: &[ProxyHandle],
        mut on_result: impl FnMut(ProxyResult),
    ) {
        for proxy in proxies {
            on_result(self.test_proxy(proxy).await);
        }
    }
}

fn parse_url(text: &str, what: &str) -> Result<Url, SpeedTestError> {
    let url = Url::parse(text.trim()).map_err(|e| {
        SpeedTestError::config(format!("invalid {} `{}`: {}", what, text, e))
            .with_source(e)
    })?;

    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(SpeedTestError::config(format!(
            "{} `{}` must be an http(s) url",
            what, text
        )));
    }

    Ok(url)
}
