use super::{resolve_host, BoxedStream, Dial};
use futures::future::BoxFuture;
use futures::FutureExt;
use hickory_resolver::TokioAsyncResolver;
use log::debug;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_socks::tcp::Socks5Stream;

/// Tunnels through a SOCKS5 server, letting the server resolve the
/// destination hostname.
pub(crate) struct Socks5Dialer {
    server: String,
    port: u16,
    credentials: Option<(String, String)>,
    resolver: Arc<TokioAsyncResolver>,
}

impl Socks5Dialer {
    pub(crate) fn new(
        server: String,
        port: u16,
        credentials: Option<(String, String)>,
        resolver: Arc<TokioAsyncResolver>,
    ) -> Self {
        Self { server, port, credentials, resolver }
    }
}

impl Dial for Socks5Dialer {
    fn dial<'a>(
        &'a self,
        host: &'a str,
        port: u16,
    ) -> BoxFuture<'a, io::Result<BoxedStream>> {
        async move {
            let proxy_ip = resolve_host(&self.resolver, &self.server).await?;
            let proxy = SocketAddr::new(proxy_ip, self.port);
            let target = host.trim_start_matches('[').trim_end_matches(']');
            debug!("SOCKS5 connect to {}:{} via {}", target, port, proxy);

            let stream = match &self.credentials {
                Some((username, password)) => {
                    Socks5Stream::connect_with_password(
                        proxy,
                        (target, port),
                        username,
                        password,
                    )
                    .await
                }
                None => Socks5Stream::connect(proxy, (target, port)).await,
            }
            .map_err(|e| {
                io::Error::other(format!("socks5 proxy {}: {}", proxy, e))
            })?;

            Ok(Box::new(stream) as BoxedStream)
        }
        .boxed()
    }
}
