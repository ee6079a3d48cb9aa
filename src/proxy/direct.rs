use super::{resolve_host, BoxedStream, Dial};
use futures::future::BoxFuture;
use futures::FutureExt;
use hickory_resolver::TokioAsyncResolver;
use log::debug;
use std::io;
use std::sync::Arc;
use tokio::net::TcpStream;

/// Connects straight to the destination, used as a baseline entry.
pub(crate) struct DirectDialer {
    resolver: Arc<TokioAsyncResolver>,
}

impl DirectDialer {
    pub(crate) fn new(resolver: Arc<TokioAsyncResolver>) -> Self {
        Self { resolver }
    }
}

impl Dial for DirectDialer {
    fn dial<'a>(
        &'a self,
        host: &'a str,
        port: u16,
    ) -> BoxFuture<'a, io::Result<BoxedStream>> {
        async move {
            let address = resolve_host(&self.resolver, host).await?;
            debug!("Direct connect to {} ({}:{})", host, address, port);

            let stream = TcpStream::connect((address, port)).await?;
            stream.set_nodelay(true)?;

            Ok(Box::new(stream) as BoxedStream)
        }
        .boxed()
    }
}
