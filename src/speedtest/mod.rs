//! Speed measurement engine.
//!
//! For every proxy the engine measures latency against the speed-test
//! server, checks a list of must-reach URLs, then measures download and
//! upload throughput with concurrent transfers. All traffic goes through
//! the proxy's dial capability.

mod connection;
mod engine;
mod extra;
mod latency;
mod pool;
mod requests;
#[cfg(test)]
pub(crate) mod testing;
mod throughput;
mod transfer;

pub use engine::{
    SpeedTester, TestConfig, DEFAULT_CONCURRENCY, DEFAULT_DOWNLOAD_SIZE,
    DEFAULT_LATENCY_SAMPLES, DEFAULT_PROBE_INTERVAL, DEFAULT_SERVER_URL,
    DEFAULT_TIMEOUT, DEFAULT_UPLOAD_SIZE,
};
pub use transfer::Direction;

use crate::errors::{to_speed_test_error, SpeedTestError};
use http::StatusCode;
use std::future::Future;
use std::io;
use std::time::Duration;
use tokio::time::Instant;
use url::Url;

/// Run one network step against `url` under `limit`.
async fn timed<T>(
    limit: Duration,
    url: &Url,
    step: impl Future<Output = io::Result<T>>,
) -> Result<T, SpeedTestError> {
    match tokio::time::timeout(limit, step).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(step_error(url, e)),
        Err(_) => Err(SpeedTestError::timeout(format!(
            "{} did not finish within {:?}",
            url, limit
        ))),
    }
}

/// Transport failures are network errors whatever their message says;
/// anything else is classified by its message.
fn step_error(url: &Url, error: io::Error) -> SpeedTestError {
    match error.kind() {
        io::ErrorKind::ConnectionRefused
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::NotConnected
        | io::ErrorKind::BrokenPipe
        | io::ErrorKind::UnexpectedEof => {
            SpeedTestError::network(format!("{}: {}", url, error))
                .with_source(error)
        }
        _ => to_speed_test_error(Box::new(error), url.as_str()),
    }
}

/// Time left of `limit` since `start`.
fn remaining(start: Instant, limit: Duration) -> Duration {
    limit.saturating_sub(start.elapsed())
}

fn check_status(url: &Url, status: StatusCode) -> Result<(), SpeedTestError> {
    if status.is_success() {
        return Ok(());
    }

    Err(SpeedTestError::status(format!("{} answered {}", url, status)))
}
