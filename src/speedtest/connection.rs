//! HTTP/1.1 over a proxy's dial capability.
//!
//! Streams come from the proxy's [`Dial`], wrapped in TLS for https, and
//! hyper speaks HTTP on top. Senders whose response was read to the end go
//! back to a per-origin idle list and are reused by the next request to the
//! same origin.

use super::requests::Request;
use crate::proxy::{authority, BoxedStream, Dial};
use crate::tls;
use bytes::Bytes;
use http::header::{
    HeaderMap, HeaderName, HeaderValue, CONNECTION, CONTENT_LENGTH, HOST,
};
use http::{StatusCode, Uri, Version};
use http_body_util::BodyExt;
use hyper::body::{Body, Frame, Incoming, SizeHint};
use hyper::client::conn::http1::{self, SendRequest};
use hyper_util::rt::TokioIo;
use log::debug;
use std::collections::HashMap;
use std::convert::Infallible;
use std::error::Error as _;
use std::fmt;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use url::{Position, Url};

const MAX_IDLE_PER_ORIGIN: usize = 8;
static ZEROS: [u8; 16 * 1024] = [0; 16 * 1024];

type Sender = SendRequest<Zeros>;

/// Request body of `remaining` zero bytes, produced a slice at a time.
#[derive(Debug)]
pub(crate) struct Zeros {
    remaining: u64,
}

impl Zeros {
    pub fn new(len: u64) -> Self {
        Self { remaining: len }
    }
}

impl Body for Zeros {
    type Data = Bytes;
    type Error = Infallible;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Bytes>, Infallible>>> {
        if self.remaining == 0 {
            return Poll::Ready(None);
        }

        let n = ZEROS
            .len()
            .min(usize::try_from(self.remaining).unwrap_or(usize::MAX));
        self.remaining -= n as u64;
        Poll::Ready(Some(Ok(Frame::data(Bytes::from_static(&ZEROS[..n])))))
    }

    fn is_end_stream(&self) -> bool {
        self.remaining == 0
    }

    fn size_hint(&self) -> SizeHint {
        SizeHint::with_exact(self.remaining)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Origin {
    tls: bool,
    host: String,
    port: u16,
}

impl Origin {
    fn of(url: &Url) -> io::Result<Self> {
        let tls = match url.scheme() {
            "http" => false,
            "https" => true,
            other => {
                return Err(invalid_input(format!(
                    "unsupported url scheme `{}`",
                    other
                )))
            }
        };
        let host = url
            .host_str()
            .ok_or_else(|| invalid_input(format!("{} has no host", url)))?
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();
        let port = url
            .port_or_known_default()
            .ok_or_else(|| invalid_input(format!("{} has no port", url)))?;

        Ok(Self { tls, host, port })
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scheme = if self.tls { "https" } else { "http" };
        write!(f, "{}://{}", scheme, authority(&self.host, self.port))
    }
}

/// HTTP client bound to one proxy.
pub(crate) struct HttpClient {
    dialer: Arc<dyn Dial>,
    idle: Mutex<HashMap<Origin, Vec<Sender>>>,
}

impl HttpClient {
    pub fn new(dialer: Arc<dyn Dial>) -> Self {
        Self { dialer, idle: Mutex::new(HashMap::new()) }
    }

    /// Send `request` and wait for the response head.
    ///
    /// An idle connection is tried first; if it turns out to be closed
    /// before the request went out, the request is sent once more on a
    /// fresh connection.
    pub async fn send<R: Request>(
        &self,
        request: &R,
    ) -> io::Result<Response<'_>> {
        let origin = Origin::of(request.url())?;

        if let Some(mut sender) = self.checkout(&origin) {
            match exchange(&mut sender, build_request(request)?).await {
                Ok(response) => {
                    return Ok(Response::new(self, origin, sender, response))
                }
                Err(e) if is_stale(&e) => {
                    debug!("Idle connection to {} was closed: {}", origin, e);
                }
                Err(e) => return Err(io_error(e)),
            }
        }

        let mut sender = self.connect(&origin).await?;
        let response = exchange(&mut sender, build_request(request)?)
            .await
            .map_err(io_error)?;
        Ok(Response::new(self, origin, sender, response))
    }

    async fn connect(&self, origin: &Origin) -> io::Result<Sender> {
        debug!("Dialing {}", origin);
        let stream = self.dialer.dial(&origin.host, origin.port).await?;
        let stream: BoxedStream = if origin.tls {
            Box::new(tls::connect(stream, &origin.host).await?)
        } else {
            stream
        };

        let (sender, connection) =
            http1::handshake(TokioIo::new(stream)).await.map_err(io_error)?;

        let name = origin.to_string();
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                debug!("Connection to {} ended: {}", name, e);
            }
        });

        Ok(sender)
    }

    fn idle(&self) -> MutexGuard<'_, HashMap<Origin, Vec<Sender>>> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn checkout(&self, origin: &Origin) -> Option<Sender> {
        let mut idle = self.idle();
        let list = idle.get_mut(origin)?;
        while let Some(sender) = list.pop() {
            if !sender.is_closed() {
                return Some(sender);
            }
        }
        None
    }

    fn checkin(&self, origin: Origin, sender: Sender) {
        if sender.is_closed() {
            return;
        }

        let mut idle = self.idle();
        let list = idle.entry(origin).or_default();
        if list.len() < MAX_IDLE_PER_ORIGIN {
            list.push(sender);
        }
    }

    #[cfg(test)]
    fn idle_connections(&self) -> usize {
        self.idle().values().map(Vec::len).sum()
    }
}

async fn exchange(
    sender: &mut Sender,
    request: http::Request<Zeros>,
) -> hyper::Result<http::Response<Incoming>> {
    sender.ready().await?;
    sender.send_request(request).await
}

/// A response whose head has arrived. The body stays on the connection
/// until [`Response::drain`] is called.
pub(crate) struct Response<'a> {
    status: StatusCode,
    body: Option<Incoming>,
    sender: Option<Sender>,
    keep_alive: bool,
    origin: Origin,
    client: &'a HttpClient,
    bytes_read: u64,
}

impl<'a> Response<'a> {
    fn new(
        client: &'a HttpClient,
        origin: Origin,
        sender: Sender,
        response: http::Response<Incoming>,
    ) -> Self {
        let keep_alive = response.version() != Version::HTTP_10
            && !has_token(response.headers(), &CONNECTION, "close");
        let status = response.status();

        Self {
            status,
            body: Some(response.into_body()),
            sender: Some(sender),
            keep_alive,
            origin,
            client,
            bytes_read: 0,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Body bytes read so far, including those of an interrupted drain.
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Read the body to its end and discard it, returning its length.
    ///
    /// A body shorter than its framing announced is an error.
    pub async fn drain(&mut self) -> io::Result<u64> {
        let Some(body) = self.body.as_mut() else {
            return Ok(self.bytes_read);
        };

        while let Some(frame) = body.frame().await {
            let frame = frame.map_err(io_error)?;
            if let Some(data) = frame.data_ref() {
                self.bytes_read += data.len() as u64;
            }
        }
        self.body = None;

        if let Some(sender) = self.sender.take() {
            if self.keep_alive {
                self.client.checkin(self.origin.clone(), sender);
            }
        }

        Ok(self.bytes_read)
    }
}

/// Origin-form request with an explicit `Host`, since a bare hyper
/// connection adds none.
fn build_request<R: Request>(request: &R) -> io::Result<http::Request<Zeros>> {
    let url = request.url();
    let target = &url[Position::BeforePath..Position::AfterQuery];
    let uri = Uri::try_from(target).map_err(|e| {
        invalid_input(format!("invalid request target {:?}: {}", target, e))
    })?;
    let host = HeaderValue::from_str(&host_header(url))
        .map_err(|e| invalid_input(format!("invalid host in {}: {}", url, e)))?;

    let len = request.body_len();
    let mut built = http::Request::new(Zeros::new(len.unwrap_or(0)));
    *built.method_mut() = R::METHOD;
    *built.uri_mut() = uri;
    *built.version_mut() = Version::HTTP_11;

    let headers = built.headers_mut();
    headers.insert(HOST, host);
    headers.extend(request.headers());
    if let Some(len) = len {
        headers.insert(CONTENT_LENGTH, HeaderValue::from(len));
    }

    Ok(built)
}

fn host_header(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    }
}

fn has_token(headers: &HeaderMap, name: &HeaderName, token: &str) -> bool {
    headers.get_all(name).iter().any(|value| {
        value.to_str().is_ok_and(|value| {
            value.split(',').any(|part| part.trim().eq_ignore_ascii_case(token))
        })
    })
}

/// Errors a pooled sender shows when the peer already closed it.
fn is_stale(error: &hyper::Error) -> bool {
    error.is_closed() || error.is_canceled() || error.is_incomplete_message()
}

/// Keep the kind of an underlying transport error so timeouts, refusals
/// and short bodies stay recognisable upstream.
fn io_error(error: hyper::Error) -> io::Error {
    let kind = if error.is_incomplete_message() {
        io::ErrorKind::UnexpectedEof
    } else {
        let mut source = error.source();
        let mut kind = io::ErrorKind::Other;
        while let Some(cause) = source {
            if let Some(inner) = cause.downcast_ref::<io::Error>() {
                kind = inner.kind();
                break;
            }
            source = cause.source();
        }
        kind
    };

    io::Error::new(kind, error)
}

fn invalid_input(message: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, message.into())
}
