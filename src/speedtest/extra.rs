use super::connection::HttpClient;
use super::latency::Sampler;
use super::transfer::{probe_transfer, Direction};
use crate::measurements::bytes_per_second;
use log::info;
use std::time::Duration;
use url::Url;

/// What the proxy achieved against the must-reach URLs.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub(crate) struct ExtraOutcome {
    pub connectivity: bool,
    /// Body bytes per second over all must-reach URLs.
    pub open_speed: f64,
    pub download_speed: f64,
}

/// Sample every must-reach URL in order, stopping at the first one that
/// never answers. When all of them answered and `download_url` is set, it
/// is downloaded once as given.
pub(crate) async fn probe_extra(
    client: &HttpClient,
    sampler: &Sampler,
    connect_urls: &[Url],
    download_url: Option<&Url>,
) -> ExtraOutcome {
    let mut bytes = 0;
    let mut time = Duration::ZERO;

    for url in connect_urls {
        let sampling = sampler.sample(client, url).await;
        if sampling.stats.is_total_loss() {
            info!("{} is unreachable through this proxy", url);
            return ExtraOutcome::default();
        }

        bytes += sampling.body_bytes;
        time += sampling.body_time;
    }

    let open_speed =
        if bytes > 0 { bytes_per_second(bytes, time) } else { 0.0 };

    let download_speed = match download_url {
        Some(url) => probe_transfer(
            client,
            url,
            Direction::Download,
            None,
            sampler.timeout,
        )
        .await
        .map_or(0.0, |outcome| outcome.speed()),
        None => 0.0,
    };

    ExtraOutcome { connectivity: true, open_speed, download_speed }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::speedtest::testing::{FakeDialer, Recorded, Reply};
    use std::sync::Arc;

    fn sampler() -> Sampler {
        Sampler {
            samples: 6,
            interval: Duration::from_millis(1),
            timeout: Duration::from_secs(5),
        }
    }

    fn urls(list: &[&str]) -> Vec<Url> {
        list.iter().map(|u| Url::parse(u).unwrap()).collect()
    }

    fn sites(request: &Recorded) -> Reply {
        match request.host.as_str() {
            "b.test" => Reply::Status(404),
            "files.test" => Reply::Body(64 * 1024),
            _ => Reply::Body(1000),
        }
    }

    #[tokio::test]
    async fn test_stops_at_first_unreachable_url() {
        let dialer = Arc::new(FakeDialer::new(sites));
        let client = HttpClient::new(dialer.clone());
        let download = Url::parse("http://files.test/f").unwrap();

        let outcome = probe_extra(
            &client,
            &sampler(),
            &urls(&["http://a.test/", "http://b.test/", "http://c.test/"]),
            Some(&download),
        )
        .await;

        assert!(!outcome.connectivity);
        assert_eq!(outcome.open_speed, 0.0);
        assert_eq!(outcome.download_speed, 0.0);
        assert_eq!(dialer.requests_to("a.test"), 6);
        assert_eq!(dialer.requests_to("b.test"), 6);
        assert_eq!(dialer.requests_to("c.test"), 0);
        assert_eq!(dialer.requests_to("files.test"), 0);
    }

    #[tokio::test]
    async fn test_open_speed_and_download() {
        let dialer = Arc::new(FakeDialer::new(sites));
        let client = HttpClient::new(dialer.clone());
        let download = Url::parse("http://files.test/f?id=1").unwrap();

        let outcome = probe_extra(
            &client,
            &sampler(),
            &urls(&["http://a.test/", "http://c.test/"]),
            Some(&download),
        )
        .await;

        assert!(outcome.connectivity);
        assert!(outcome.open_speed > 0.0);
        assert!(outcome.download_speed > 0.0);
        assert_eq!(dialer.count(|r| r.is("files.test", "/f")), 1);
        assert_eq!(dialer.requests()[12].target, "/f?id=1");
    }

    #[tokio::test]
    async fn test_empty_list_keeps_connectivity() {
        let dialer = Arc::new(FakeDialer::new(sites));
        let client = HttpClient::new(dialer.clone());

        let outcome = probe_extra(&client, &sampler(), &[], None).await;

        assert_eq!(
            outcome,
            ExtraOutcome {
                connectivity: true,
                open_speed: 0.0,
                download_speed: 0.0
            }
        );
        assert!(dialer.requests().is_empty());
    }

    #[tokio::test]
    async fn test_failed_extra_download_is_zero() {
        let dialer = Arc::new(
            FakeDialer::new(sites).refusing("files.test"),
        );
        let client = HttpClient::new(dialer);
        let download = Url::parse("http://files.test/f").unwrap();

        let outcome = probe_extra(
            &client,
            &sampler(),
            &urls(&["http://a.test/"]),
            Some(&download),
        )
        .await;

        assert!(outcome.connectivity);
        assert!(outcome.open_speed > 0.0);
        assert_eq!(outcome.download_speed, 0.0);
    }
}
