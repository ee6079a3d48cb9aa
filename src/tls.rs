//! Client-side TLS used for https probes and TLS-wrapped proxies.

use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore};
use std::io;
use std::sync::{Arc, OnceLock};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

static CLIENT_CONFIG: OnceLock<Arc<ClientConfig>> = OnceLock::new();

/// Shared client configuration trusting the bundled webpki roots.
pub fn client_config() -> Arc<ClientConfig> {
    CLIENT_CONFIG
        .get_or_init(|| {
            let roots = RootCertStore {
                roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
            };
            let provider = Arc::new(rustls::crypto::ring::default_provider());
            let config = ClientConfig::builder_with_provider(provider)
                .with_safe_default_protocol_versions()
                .map(|builder| {
                    builder.with_root_certificates(roots.clone())
                })
                .unwrap_or_else(|_| {
                    ClientConfig::builder().with_root_certificates(roots)
                })
                .with_no_client_auth();
            Arc::new(config)
        })
        .clone()
}

/// Perform a TLS handshake for `host` over an established stream.
pub async fn connect<S>(stream: S, host: &str) -> io::Result<TlsStream<S>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let host = host.trim_start_matches('[').trim_end_matches(']');
    let server_name = ServerName::try_from(host.to_string()).map_err(|e| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid tls server name {}: {}", host, e),
        )
    })?;

    TlsConnector::from(client_config()).connect(server_name, stream).await
}
