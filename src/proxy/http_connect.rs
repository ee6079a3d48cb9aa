use super::{authority, resolve_host, BoxedStream, Dial};
use crate::tls;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use futures::future::BoxFuture;
use futures::FutureExt;
use hickory_resolver::TokioAsyncResolver;
use log::debug;
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Upper bound for the proxy's CONNECT response head.
const MAX_HEAD_BYTES: usize = 8 * 1024;

/// Tunnels through an HTTP proxy with the CONNECT method, optionally
/// speaking TLS to the proxy itself.
pub(crate) struct HttpConnectDialer {
    server: String,
    port: u16,
    authorization: Option<String>,
    tls_server_name: Option<String>,
    resolver: Arc<TokioAsyncResolver>,
}

impl HttpConnectDialer {
    pub(crate) fn new(
        server: String,
        port: u16,
        credentials: Option<(String, String)>,
        resolver: Arc<TokioAsyncResolver>,
    ) -> Self {
        let authorization = credentials.map(|(user, pass)| {
            format!("Basic {}", BASE64.encode(format!("{}:{}", user, pass)))
        });

        Self { server, port, authorization, tls_server_name: None, resolver }
    }

    /// Wrap the connection to the proxy in TLS, verifying `sni` (or the
    /// server address when absent).
    pub(crate) fn with_tls(mut self, sni: Option<String>) -> Self {
        self.tls_server_name = Some(sni.unwrap_or_else(|| self.server.clone()));
        self
    }

    fn connect_request(&self, host: &str, port: u16) -> String {
        let target = authority(host, port);
        let mut request = format!(
            "CONNECT {target} HTTP/1.1\r\n\
            Host: {target}\r\n\
            Proxy-Connection: keep-alive\r\n"
        );
        if let Some(ref authorization) = self.authorization {
            request.push_str(&format!(
                "Proxy-Authorization: {}\r\n",
                authorization
            ));
        }
        request.push_str("\r\n");
        request
    }
}

impl Dial for HttpConnectDialer {
    fn dial<'a>(
        &'a self,
        host: &'a str,
        port: u16,
    ) -> BoxFuture<'a, io::Result<BoxedStream>> {
        async move {
            let proxy_ip = resolve_host(&self.resolver, &self.server).await?;
            let tcp = TcpStream::connect((proxy_ip, self.port)).await?;
            tcp.set_nodelay(true)?;

            let mut stream: BoxedStream = match self.tls_server_name {
                Some(ref name) => Box::new(tls::connect(tcp, name).await?),
                None => Box::new(tcp),
            };

            let request = self.connect_request(host, port);
            debug!("HTTP CONNECT {}:{} via {}", host, port, self.server);
            stream.write_all(request.as_bytes()).await?;
            stream.flush().await?;

            let head = read_head(&mut stream).await?;
            let status = parse_connect_status(&head)?;
            if !(200..300).contains(&status) {
                return Err(io::Error::new(
                    io::ErrorKind::ConnectionRefused,
                    format!(
                        "http proxy {} refused CONNECT with status {}",
                        self.server, status
                    ),
                ));
            }

            Ok(stream)
        }
        .boxed()
    }
}

/// Read the response head one byte at a time so nothing of the tunnelled
/// stream is consumed.
async fn read_head(stream: &mut BoxedStream) -> io::Result<Vec<u8>> {
    let mut head = Vec::with_capacity(128);
    let mut byte = [0_u8];

    while !head.ends_with(b"\r\n\r\n") {
        if stream.read(&mut byte).await? == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "http proxy closed the connection during CONNECT",
            ));
        }
        head.push(byte[0]);
        if head.len() > MAX_HEAD_BYTES {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "http proxy CONNECT response head too large",
            ));
        }
    }

    Ok(head)
}

fn parse_connect_status(head: &[u8]) -> io::Result<u16> {
    let text = String::from_utf8_lossy(head);
    text.lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|code| code.parse::<u16>().ok())
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                "malformed http proxy CONNECT response",
            )
        })
}
