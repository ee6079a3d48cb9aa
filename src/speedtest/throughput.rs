use super::connection::HttpClient;
use super::pool::run_all;
use super::transfer::{probe_transfer, Direction};
use crate::measurements::{aggregate_transfers, TransferSummary};
use log::info;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Endpoints and chunk sizes of the throughput phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ThroughputPlan {
    pub download_url: Url,
    pub upload_url: Url,
    pub download_chunk: u64,
    pub upload_chunk: u64,
    pub concurrency: usize,
    pub timeout: Duration,
}

impl ThroughputPlan {
    /// Split the totals evenly over `concurrency` transfers.
    pub fn new(
        download_url: Url,
        upload_url: Url,
        download_size: u64,
        upload_size: u64,
        concurrency: usize,
        timeout: Duration,
    ) -> Self {
        let concurrency = concurrency.max(1);

        Self {
            download_url,
            upload_url,
            download_chunk: download_size / concurrency as u64,
            upload_chunk: upload_size / concurrency as u64,
            concurrency,
            timeout,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub(crate) struct Throughput {
    pub download: TransferSummary,
    pub upload: TransferSummary,
}

/// All downloads run together and finish before any upload starts.
pub(crate) async fn measure_throughput(
    client: &Arc<HttpClient>,
    plan: &ThroughputPlan,
) -> Throughput {
    let download = run_phase(
        client,
        plan,
        Direction::Download,
        &plan.download_url,
        plan.download_chunk,
    )
    .await;

    let upload = run_phase(
        client,
        plan,
        Direction::Upload,
        &plan.upload_url,
        plan.upload_chunk,
    )
    .await;

    Throughput { download, upload }
}

async fn run_phase(
    client: &Arc<HttpClient>,
    plan: &ThroughputPlan,
    direction: Direction,
    url: &Url,
    chunk: u64,
) -> TransferSummary {
    let probes = (0..plan.concurrency).map(|_| {
        let client = Arc::clone(client);
        let url = url.clone();
        let timeout = plan.timeout;
        async move {
            probe_transfer(&client, &url, direction, Some(chunk), timeout).await
        }
    });

    let summary = aggregate_transfers(&run_all(probes).await);
    info!(
        "{}: {}/{} transfers succeeded, {} bytes, {:.0} B/s",
        direction,
        summary.successes,
        plan.concurrency,
        summary.bytes,
        summary.speed
    );

    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::speedtest::testing::{speed_server, FakeDialer, Recorded, Reply};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;
    use std::time::Instant;

    fn plan(concurrency: usize) -> ThroughputPlan {
        ThroughputPlan::new(
            Url::parse("http://speed.test/__down").unwrap(),
            Url::parse("http://speed.test/__up").unwrap(),
            400_000,
            100_001,
            concurrency,
            Duration::from_secs(5),
        )
    }

    #[test]
    fn test_plan_splits_sizes() {
        let split = plan(4);
        assert_eq!(split.download_chunk, 100_000);
        assert_eq!(split.upload_chunk, 25_000);

        let single = plan(0);
        assert_eq!(single.concurrency, 1);
        assert_eq!(single.download_chunk, 400_000);
    }

    #[tokio::test]
    async fn test_downloads_finish_before_uploads() {
        let dialer = Arc::new(FakeDialer::new(speed_server));
        let client = Arc::new(HttpClient::new(dialer.clone()));

        let throughput = measure_throughput(&client, &plan(4)).await;

        assert_eq!(throughput.download.successes, 4);
        assert_eq!(throughput.download.bytes, 400_000);
        assert_eq!(throughput.upload.successes, 4);
        assert_eq!(throughput.upload.bytes, 100_000);
        assert!(throughput.download.speed > 0.0);

        let requests = dialer.requests();
        let last_download = requests
            .iter()
            .rposition(|r| r.path() == "/__down")
            .unwrap();
        let first_upload =
            requests.iter().position(|r| r.path() == "/__up").unwrap();
        assert!(last_download < first_upload);
        assert!(requests
            .iter()
            .filter(|r| r.path() == "/__down")
            .all(|r| r.bytes_query() == Some(100_000)));
    }

    #[tokio::test]
    async fn test_failed_chunks_are_left_out() {
        let dialer = Arc::new(FakeDialer::new(|request: &Recorded| {
            match request.path() {
                "/__down" => Reply::Body(request.bytes_query().unwrap_or(0)),
                _ => Reply::Status(500),
            }
        }));
        let client = Arc::new(HttpClient::new(dialer));

        let throughput = measure_throughput(&client, &plan(2)).await;

        assert_eq!(throughput.download.successes, 2);
        assert_eq!(throughput.upload, TransferSummary::default());
    }

    #[tokio::test]
    async fn test_hung_download_only_fails_itself() {
        let timeout = Duration::from_millis(300);
        let started = Instant::now();
        let hung = Arc::new(AtomicBool::new(false));
        let first_upload_at = Arc::new(Mutex::new(None));

        let route = {
            let hung = Arc::clone(&hung);
            let first_upload_at = Arc::clone(&first_upload_at);
            move |request: &Recorded| match request.path() {
                "/__down" if !hung.swap(true, Ordering::SeqCst) => Reply::Hang,
                "/__up" => {
                    first_upload_at
                        .lock()
                        .unwrap()
                        .get_or_insert(started.elapsed());
                    speed_server(request)
                }
                _ => speed_server(request),
            }
        };
        let dialer = Arc::new(FakeDialer::new(route));
        let client = Arc::new(HttpClient::new(dialer.clone()));

        let mut short = plan(4);
        short.timeout = timeout;
        let throughput = measure_throughput(&client, &short).await;

        assert_eq!(throughput.download.successes, 3);
        assert_eq!(throughput.download.bytes, 300_000);
        assert_eq!(throughput.upload.successes, 4);
        assert_eq!(throughput.upload.bytes, 100_000);

        let requests = dialer.requests();
        let first_upload =
            requests.iter().position(|r| r.path() == "/__up").unwrap();
        assert!(first_upload >= 4);
        assert_eq!(requests.iter().filter(|r| r.path() == "/__down").count(), 4);

        let upload_started = first_upload_at.lock().unwrap().unwrap();
        assert!(upload_started >= timeout, "uploads began at {:?}", upload_started);
    }
}
