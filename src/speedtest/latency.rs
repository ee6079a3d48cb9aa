use super::connection::HttpClient;
use super::requests::Download;
use super::{check_status, remaining, timed};
use crate::errors::SpeedTestError;
use crate::stats::{latency_stats, LatencyStats};
use log::debug;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use url::Url;

/// Repeated `GET` probing of one URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Sampler {
    pub samples: usize,
    /// Pause before every sample.
    pub interval: Duration,
    pub timeout: Duration,
}

/// Everything learned from sampling one URL.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub(crate) struct Sampling {
    pub stats: LatencyStats,
    /// Body bytes read by the successful samples.
    pub body_bytes: u64,
    /// Request start to body end, summed over the successful samples.
    pub body_time: Duration,
}

struct Ping {
    latency: Duration,
    body_bytes: u64,
    body_time: Duration,
}

impl Sampler {
    pub async fn probe_latency(
        &self,
        client: &HttpClient,
        url: &Url,
    ) -> LatencyStats {
        self.sample(client, url).await.stats
    }

    /// Send exactly `samples` sequential requests to `url`.
    ///
    /// A sample succeeds when a success status arrives within the timeout;
    /// its latency is the time to the response head. The body is read
    /// afterwards, outside the latency, and counted even when cut short.
    pub async fn sample(&self, client: &HttpClient, url: &Url) -> Sampling {
        let mut latencies = Vec::with_capacity(self.samples);
        let mut failed = 0;
        let mut body_bytes = 0;
        let mut body_time = Duration::ZERO;

        for attempt in 1..=self.samples {
            sleep(self.interval).await;

            match self.ping(client, url).await {
                Ok(ping) => {
                    latencies.push(ping.latency);
                    body_bytes += ping.body_bytes;
                    body_time += ping.body_time;
                }
                Err(e) => {
                    debug!("Ping {}/{} failed: {}", attempt, self.samples, e);
                    failed += 1;
                }
            }
        }

        let stats = latency_stats(&latencies, failed, self.samples);
        debug!(
            "{}: latency {:?}, jitter {:?}, loss {:.1}%",
            url, stats.average, stats.jitter, stats.packet_loss
        );

        Sampling { stats, body_bytes, body_time }
    }

    async fn ping(
        &self,
        client: &HttpClient,
        url: &Url,
    ) -> Result<Ping, SpeedTestError> {
        let request = Download::new(url.clone());

        let start = Instant::now();
        let mut response =
            timed(self.timeout, url, client.send(&request)).await?;
        let latency = start.elapsed();
        check_status(url, response.status())?;

        if let Err(e) =
            timed(remaining(start, self.timeout), url, response.drain()).await
        {
            debug!("Body of {} not read to the end: {}", url, e);
        }

        Ok(Ping {
            latency,
            body_bytes: response.bytes_read(),
            body_time: start.elapsed(),
        })
    }
}
