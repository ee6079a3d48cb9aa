use super::connection::HttpClient;
use super::requests::{Download, Upload};
use super::{check_status, remaining, timed};
use crate::errors::SpeedTestError;
use crate::measurements::TransferOutcome;
use log::debug;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Download,
    Upload,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Download => write!(f, "download"),
            Direction::Upload => write!(f, "upload"),
        }
    }
}

/// Move `size` bytes through `client` once and time it.
///
/// Downloads `GET` the URL, adding a `bytes=<size>` query when a size is
/// given, and are timed to the end of the body. Uploads `POST` `size` zero
/// bytes and are timed to the response head. Any failure, including the
/// timeout, yields `None`.
pub(crate) async fn probe_transfer(
    client: &HttpClient,
    url: &Url,
    direction: Direction,
    size: Option<u64>,
    timeout: Duration,
) -> Option<TransferOutcome> {
    let outcome = match direction {
        Direction::Download => download(client, url, size, timeout).await,
        Direction::Upload => {
            upload(client, url, size.unwrap_or(0), timeout).await
        }
    };

    match outcome {
        Ok(outcome) => {
            debug!(
                "{} of {} bytes via {} took {:?}",
                direction, outcome.bytes, url, outcome.elapsed
            );
            Some(outcome)
        }
        Err(e) => {
            debug!("{} probe failed: {}", direction, e);
            None
        }
    }
}

async fn download(
    client: &HttpClient,
    url: &Url,
    size: Option<u64>,
    limit: Duration,
) -> Result<TransferOutcome, SpeedTestError> {
    let request = match size {
        Some(bytes) => Download::sized(url, bytes),
        None => Download::new(url.clone()),
    };

    let start = Instant::now();
    let mut response = timed(limit, url, client.send(&request)).await?;
    check_status(url, response.status())?;
    let bytes = timed(remaining(start, limit), url, response.drain()).await?;

    Ok(TransferOutcome::new(bytes, start.elapsed()))
}

async fn upload(
    client: &HttpClient,
    url: &Url,
    bytes: u64,
    limit: Duration,
) -> Result<TransferOutcome, SpeedTestError> {
    let request = Upload::new(url.clone(), bytes);

    let start = Instant::now();
    let mut response = timed(limit, url, client.send(&request)).await?;
    let elapsed = start.elapsed();
    check_status(url, response.status())?;

    // Only read so the connection can be reused.
    if let Err(e) =
        timed(remaining(start, limit), url, response.drain()).await
    {
        debug!("Upload response body not read: {}", e);
    }

    Ok(TransferOutcome::new(bytes, elapsed))
}
