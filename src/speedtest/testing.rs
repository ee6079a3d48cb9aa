//! In-process HTTP/1.1 server behind a fake dial capability.
//!
//! Every dial spawns a server task on one end of a `tokio::io::duplex`
//! pipe. Requests are recorded before they are answered, so tests can count
//! what reached which host.

use crate::proxy::{BoxedStream, Dial, ProxyHandle, ProxyKind};
use futures::future::BoxFuture;
use futures::FutureExt;
use http::StatusCode;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{
    AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, DuplexStream,
};

const PIPE_CAPACITY: usize = 64 * 1024;
static ZEROS: [u8; 8 * 1024] = [0; 8 * 1024];

/// How the fake server answers one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Reply {
    /// `200` with a `Content-Length` body of that many bytes.
    Body(u64),
    /// `200` with a chunked body made of chunks of these sizes.
    Chunked(Vec<usize>),
    /// `200` announcing `declared` bytes, then closing after `sent`.
    Truncated { declared: u64, sent: u64 },
    /// `200` without framing, body ends when the connection closes.
    UntilClose(u64),
    /// Given status with an empty body.
    Status(u16),
    /// `200` with an empty body and `Connection: close`.
    CloseAfter,
    /// Never answer.
    Hang,
    /// Close the connection without answering.
    Drop,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Recorded {
    pub host: String,
    pub method: String,
    /// Path and query, as sent on the request line.
    pub target: String,
    pub body_len: u64,
}

impl Recorded {
    pub fn is(&self, host: &str, path: &str) -> bool {
        self.host == host && self.path() == path
    }

    pub fn path(&self) -> &str {
        self.target.split('?').next().unwrap_or_default()
    }

    /// Value of the `bytes` query parameter, if any.
    pub fn bytes_query(&self) -> Option<u64> {
        let (_, query) = self.target.split_once('?')?;
        query
            .split('&')
            .find_map(|pair| pair.strip_prefix("bytes="))
            .and_then(|value| value.parse().ok())
    }
}

type Route = dyn Fn(&Recorded) -> Reply + Send + Sync;

pub(crate) struct FakeDialer {
    route: Arc<Route>,
    refused: Vec<String>,
    delay: Duration,
    requests: Arc<Mutex<Vec<Recorded>>>,
    dials: Mutex<Vec<String>>,
}

impl FakeDialer {
    pub fn new(
        route: impl Fn(&Recorded) -> Reply + Send + Sync + 'static,
    ) -> Self {
        Self {
            route: Arc::new(route),
            refused: Vec::new(),
            delay: Duration::ZERO,
            requests: Arc::new(Mutex::new(Vec::new())),
            dials: Mutex::new(Vec::new()),
        }
    }

    /// Refuse every dial to `host`.
    pub fn refusing(mut self, host: &str) -> Self {
        self.refused.push(host.to_string());
        self
    }

    /// Wait this long before answering each request.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }

    pub fn count(&self, predicate: impl Fn(&Recorded) -> bool) -> usize {
        self.requests.lock().unwrap().iter().filter(|r| predicate(r)).count()
    }

    pub fn requests_to(&self, host: &str) -> usize {
        self.count(|r| r.host == host)
    }

    pub fn dials_to(&self, host: &str) -> usize {
        self.dials.lock().unwrap().iter().filter(|h| *h == host).count()
    }

    pub fn into_handle(self: Arc<Self>, name: &str) -> ProxyHandle {
        ProxyHandle::new(name, ProxyKind::Direct, Default::default(), self)
    }
}

impl Dial for FakeDialer {
    fn dial<'a>(
        &'a self,
        host: &'a str,
        _port: u16,
    ) -> BoxFuture<'a, io::Result<BoxedStream>> {
        async move {
            self.dials.lock().unwrap().push(host.to_string());
            if self.refused.iter().any(|h| h == host) {
                return Err(io::Error::new(
                    io::ErrorKind::ConnectionRefused,
                    format!("{} refused the connection", host),
                ));
            }

            let (client, server) = tokio::io::duplex(PIPE_CAPACITY);
            tokio::spawn(serve(
                server,
                host.to_string(),
                Arc::clone(&self.route),
                Arc::clone(&self.requests),
                self.delay,
            ));

            Ok(Box::new(client) as BoxedStream)
        }
        .boxed()
    }
}

/// Answers the way the speed-test server does: `/__down?bytes=N` sends N
/// bytes, `/__up` accepts anything, everything else is a 404.
pub(crate) fn speed_server(request: &Recorded) -> Reply {
    match request.path() {
        "/__down" => Reply::Body(request.bytes_query().unwrap_or(0)),
        "/__up" => Reply::Status(200),
        _ => Reply::Status(404),
    }
}

async fn serve(
    stream: DuplexStream,
    host: String,
    route: Arc<Route>,
    requests: Arc<Mutex<Vec<Recorded>>>,
    delay: Duration,
) {
    let mut stream = BufReader::new(stream);

    loop {
        let Some(recorded) = read_request(&mut stream, &host).await else {
            return;
        };
        requests.lock().unwrap().push(recorded.clone());

        let reply = route(&recorded);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        match write_reply(&mut stream, reply).await {
            Ok(true) => continue,
            Ok(false) | Err(_) => return,
        }
    }
}

async fn read_request(
    stream: &mut BufReader<DuplexStream>,
    host: &str,
) -> Option<Recorded> {
    let mut head = Vec::new();
    loop {
        let mut line = String::new();
        if stream.read_line(&mut line).await.ok()? == 0 {
            return None;
        }
        if line == "\r\n" {
            break;
        }
        head.push(line.trim_end().to_string());
    }

    let mut request_line = head.first()?.split_whitespace();
    let method = request_line.next()?.to_string();
    let target = request_line.next()?.to_string();
    let body_len = head
        .iter()
        .skip(1)
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse().ok())
        .unwrap_or(0);

    let mut body = (&mut *stream).take(body_len);
    let received = tokio::io::copy(&mut body, &mut tokio::io::sink()).await.ok()?;
    if received != body_len {
        return None;
    }

    Some(Recorded { host: host.to_string(), method, target, body_len })
}

/// Returns whether the connection stays open.
async fn write_reply(
    stream: &mut BufReader<DuplexStream>,
    reply: Reply,
) -> io::Result<bool> {
    let keep_open = match reply {
        Reply::Body(len) => {
            write_head(stream, 200, &format!("Content-Length: {}", len)).await?;
            write_zeros(stream, len).await?;
            true
        }
        Reply::Chunked(sizes) => {
            write_head(stream, 200, "Transfer-Encoding: chunked").await?;
            for size in sizes {
                stream.write_all(format!("{:x}\r\n", size).as_bytes()).await?;
                write_zeros(stream, size as u64).await?;
                stream.write_all(b"\r\n").await?;
            }
            stream.write_all(b"0\r\n\r\n").await?;
            true
        }
        Reply::Truncated { declared, sent } => {
            write_head(stream, 200, &format!("Content-Length: {}", declared))
                .await?;
            write_zeros(stream, sent).await?;
            false
        }
        Reply::UntilClose(len) => {
            write_head(stream, 200, "Connection: close").await?;
            write_zeros(stream, len).await?;
            false
        }
        Reply::Status(code) => {
            write_head(stream, code, "Content-Length: 0").await?;
            true
        }
        Reply::CloseAfter => {
            write_head(stream, 200, "Content-Length: 0\r\nConnection: close")
                .await?;
            false
        }
        Reply::Hang => {
            std::future::pending::<()>().await;
            false
        }
        Reply::Drop => false,
    };

    stream.flush().await?;
    Ok(keep_open)
}

async fn write_head(
    stream: &mut BufReader<DuplexStream>,
    code: u16,
    headers: &str,
) -> io::Result<()> {
    let reason = StatusCode::from_u16(code)
        .ok()
        .and_then(|status| status.canonical_reason())
        .unwrap_or("Unknown");
    let head = format!("HTTP/1.1 {} {}\r\n{}\r\n\r\n", code, reason, headers);
    stream.write_all(head.as_bytes()).await
}

async fn write_zeros(
    stream: &mut BufReader<DuplexStream>,
    mut len: u64,
) -> io::Result<()> {
    while len > 0 {
        let n = ZEROS.len().min(len as usize);
        stream.write_all(&ZEROS[..n]).await?;
        len -= n as u64;
    }
    Ok(())
}
