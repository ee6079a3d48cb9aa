//! Proxy directory: turns raw proxy config entries into dialable handles.
//!
//! The engine never looks inside a proxy's configuration. It only sees
//! [`ProxyHandle`]s, and a handle is only ever built for a kind this
//! directory can tunnel through, so everything handed to the engine is
//! testable.

pub mod config;
mod direct;
mod http_connect;
mod socks5;

use crate::errors::SpeedTestError;
use futures::future::BoxFuture;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::TokioAsyncResolver;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use std::io;
use std::net::IpAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};

use self::config::{ConfigDocument, ProxyFilter};
use self::direct::DirectDialer;
use self::http_connect::HttpConnectDialer;
use self::socks5::Socks5Dialer;

/// A proxy entry exactly as it appeared in its config document.
pub type RawProxyConfig = serde_json::Map<String, Value>;

pub trait ProxyStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> ProxyStream for T {}

pub type BoxedStream = Box<dyn ProxyStream>;

/// Capability to open a byte stream to `host:port` through one proxy.
///
/// Implementations hold no per-connection state and may be called from
/// many tasks at once; every call yields an independent connection.
pub trait Dial: Send + Sync {
    fn dial<'a>(
        &'a self,
        host: &'a str,
        port: u16,
    ) -> BoxFuture<'a, io::Result<BoxedStream>>;
}

/// Protocol kinds recognised in config documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyKind {
    Direct,
    Http,
    Socks5,
    Ss,
    Ssr,
    Snell,
    Vmess,
    Vless,
    Trojan,
    Hysteria,
    Hysteria2,
    #[serde(rename = "wireguard")]
    WireGuard,
    Tuic,
    Ssh,
}

serde_plain::derive_display_from_serialize!(ProxyKind);
serde_plain::derive_fromstr_from_deserialize!(ProxyKind);

impl ProxyKind {
    /// Whether this build can open tunnelled connections for the kind.
    pub fn is_dialable(&self) -> bool {
        matches!(self, ProxyKind::Direct | ProxyKind::Http | ProxyKind::Socks5)
    }
}

/// A named proxy together with its dial capability.
#[derive(Clone)]
pub struct ProxyHandle {
    name: String,
    kind: ProxyKind,
    config: RawProxyConfig,
    dialer: Arc<dyn Dial>,
    source: Option<String>,
}

impl ProxyHandle {
    pub fn new(
        name: impl Into<String>,
        kind: ProxyKind,
        config: RawProxyConfig,
        dialer: Arc<dyn Dial>,
    ) -> Self {
        Self { name: name.into(), kind, config, dialer, source: None }
    }

    /// Tag the handle with the stem of the document it came from.
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    /// `<source>_<name>` for handles loaded from a document, the bare name
    /// otherwise.
    pub fn display_name(&self) -> String {
        match &self.source {
            Some(source) => format!("{}_{}", source, self.name),
            None => self.name.clone(),
        }
    }

    pub fn kind(&self) -> ProxyKind {
        self.kind
    }

    pub fn config(&self) -> &RawProxyConfig {
        &self.config
    }

    /// Shared dial capability, cheap to clone into concurrent tasks.
    pub fn dialer(&self) -> Arc<dyn Dial> {
        Arc::clone(&self.dialer)
    }

    pub async fn dial(&self, host: &str, port: u16) -> io::Result<BoxedStream> {
        self.dialer.dial(host, port).await
    }
}

impl fmt::Debug for ProxyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyHandle")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

/// Upstream address shared by the socks5 and http entries.
#[derive(Debug, Deserialize)]
struct ServerEntry {
    server: String,
    port: u16,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
    #[serde(default)]
    tls: bool,
    #[serde(default)]
    sni: Option<String>,
}

impl ServerEntry {
    fn credentials(&self) -> Option<(String, String)> {
        match (&self.username, &self.password) {
            (Some(user), Some(pass)) if !user.is_empty() => {
                Some((user.clone(), pass.clone()))
            }
            _ => None,
        }
    }
}

/// Resolves raw config entries into [`ProxyHandle`]s.
#[derive(Clone)]
pub struct ProxyDirectory {
    resolver: Arc<TokioAsyncResolver>,
}

impl ProxyDirectory {
    /// Build a directory that resolves hostnames with the system DNS
    /// configuration, falling back to the resolver defaults.
    pub fn new() -> Self {
        let resolver = TokioAsyncResolver::tokio_from_system_conf()
            .unwrap_or_else(|e| {
                debug!("System DNS configuration unavailable: {}", e);
                TokioAsyncResolver::tokio(
                    ResolverConfig::default(),
                    ResolverOpts::default(),
                )
            });

        Self { resolver: Arc::new(resolver) }
    }

    /// Build a handle for one raw entry.
    ///
    /// Fails with a configuration error for malformed entries and with an
    /// unsupported error for kinds that cannot be dialed.
    pub fn resolve(
        &self,
        config: RawProxyConfig,
    ) -> Result<ProxyHandle, SpeedTestError> {
        let name = config
            .get("name")
            .and_then(Value::as_str)
            .filter(|name| !name.is_empty())
            .ok_or_else(|| SpeedTestError::config("proxy entry without a name"))?
            .to_string();

        let kind_str =
            config.get("type").and_then(Value::as_str).ok_or_else(|| {
                SpeedTestError::config(format!("proxy `{}` has no type", name))
            })?;

        let kind: ProxyKind = kind_str.parse().map_err(|_| {
            SpeedTestError::unsupported(format!(
                "proxy `{}` has unknown type `{}`",
                name, kind_str
            ))
        })?;

        let dialer: Arc<dyn Dial> = match kind {
            ProxyKind::Direct => {
                Arc::new(DirectDialer::new(Arc::clone(&self.resolver)))
            }
            ProxyKind::Socks5 => {
                let entry = server_entry(&name, &config)?;
                Arc::new(Socks5Dialer::new(
                    entry.server.clone(),
                    entry.port,
                    entry.credentials(),
                    Arc::clone(&self.resolver),
                ))
            }
            ProxyKind::Http => {
                let entry = server_entry(&name, &config)?;
                let mut dialer = HttpConnectDialer::new(
                    entry.server.clone(),
                    entry.port,
                    entry.credentials(),
                    Arc::clone(&self.resolver),
                );
                if entry.tls {
                    dialer = dialer.with_tls(entry.sni.clone());
                }
                Arc::new(dialer)
            }
            other => {
                return Err(SpeedTestError::unsupported(format!(
                    "{} proxy `{}` cannot be dialed",
                    other, name
                )))
            }
        };

        Ok(ProxyHandle::new(name, kind, config, dialer))
    }

    /// Resolve every entry of the documents in order.
    ///
    /// Names rejected by `filter` are dropped before anything else looks at
    /// the entry. Entries that fail to resolve are logged and skipped, as are
    /// names already seen in an earlier entry. Handles carry the stem of
    /// their document.
    pub fn resolve_documents<'a>(
        &self,
        documents: impl IntoIterator<Item = &'a ConfigDocument>,
        filter: &ProxyFilter,
    ) -> Vec<ProxyHandle> {
        collect_handles(documents, filter, |entry| self.resolve(entry.clone()))
    }
}

fn collect_handles<'a>(
    documents: impl IntoIterator<Item = &'a ConfigDocument>,
    filter: &ProxyFilter,
    mut resolve: impl FnMut(&RawProxyConfig) -> Result<ProxyHandle, SpeedTestError>,
) -> Vec<ProxyHandle> {
    let mut seen = HashSet::new();
    let mut handles = Vec::new();

    for document in documents {
        for entry in &document.proxies {
            let name =
                entry.get("name").and_then(Value::as_str).unwrap_or_default();
            if !name.is_empty() && !filter.matches(name) {
                debug!("Proxy `{}` filtered out", name);
                continue;
            }

            let handle = match resolve(entry) {
                Ok(handle) => handle,
                Err(e) => {
                    warn!("Skipping proxy: {}", e);
                    continue;
                }
            };
            let handle = match &document.source {
                Some(source) => handle.with_source(source.as_str()),
                None => handle,
            };

            if !seen.insert(handle.name().to_string()) {
                debug!("Proxy `{}` already loaded", handle.name());
                continue;
            }

            handles.push(handle);
        }
    }

    handles
}

impl Default for ProxyDirectory {
    fn default() -> Self {
        Self::new()
    }
}

fn server_entry(
    name: &str,
    config: &RawProxyConfig,
) -> Result<ServerEntry, SpeedTestError> {
    serde_json::from_value(Value::Object(config.clone())).map_err(|e| {
        SpeedTestError::config(format!("proxy `{}`: {}", name, e))
            .with_source(e)
    })
}

/// Resolve `host` to one address, preferring IPv4.
pub(crate) async fn resolve_host(
    resolver: &TokioAsyncResolver,
    host: &str,
) -> io::Result<IpAddr> {
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(ip);
    }

    let response = resolver.lookup_ip(host).await.map_err(|e| {
        io::Error::other(format!("dns lookup for {} failed: {}", host, e))
    })?;

    let mut fallback = None;
    for address in response.iter() {
        if address.is_ipv4() {
            return Ok(address);
        }
        fallback.get_or_insert(address);
    }

    fallback.ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::NotFound,
            format!("dns lookup for {}: no record", host),
        )
    })
}

/// `host:port` with IPv6 literals bracketed.
pub(crate) fn authority(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use serde_json::json;

    fn raw(value: Value) -> RawProxyConfig {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected an object"),
        }
    }

    #[test]
    fn test_proxy_kind_text_form() {
        assert_eq!(ProxyKind::WireGuard.to_string(), "wireguard");
        assert_eq!(ProxyKind::Hysteria2.to_string(), "hysteria2");
        assert_eq!("socks5".parse::<ProxyKind>().unwrap(), ProxyKind::Socks5);
        assert!("carrier-pigeon".parse::<ProxyKind>().is_err());
    }

    #[test]
    fn test_only_tunnelable_kinds_are_dialable() {
        assert!(ProxyKind::Direct.is_dialable());
        assert!(ProxyKind::Http.is_dialable());
        assert!(ProxyKind::Socks5.is_dialable());
        assert!(!ProxyKind::Vmess.is_dialable());
        assert!(!ProxyKind::Trojan.is_dialable());
    }

    #[test]
    fn test_authority_brackets_ipv6() {
        assert_eq!(authority("example.com", 443), "example.com:443");
        assert_eq!(authority("::1", 80), "[::1]:80");
        assert_eq!(authority("[::1]", 80), "[::1]:80");
    }

    #[tokio::test]
    async fn test_resolve_socks5() {
        let directory = ProxyDirectory::new();
        let handle = directory
            .resolve(raw(json!({
                "name": "hk-01",
                "type": "socks5",
                "server": "127.0.0.1",
                "port": 1080,
            })))
            .unwrap();

        assert_eq!(handle.name(), "hk-01");
        assert_eq!(handle.kind(), ProxyKind::Socks5);
        assert_eq!(handle.config()["port"], json!(1080));
    }

    #[tokio::test]
    async fn test_resolve_rejects_unsupported_kind() {
        let directory = ProxyDirectory::new();
        let error = directory
            .resolve(raw(json!({
                "name": "jp-vmess",
                "type": "vmess",
                "server": "jp.example.com",
                "port": 443,
            })))
            .unwrap_err();

        assert_eq!(error.kind, ErrorKind::Unsupported);
        assert!(error.message.contains("jp-vmess"));
    }

    #[tokio::test]
    async fn test_resolve_rejects_malformed_entries() {
        let directory = ProxyDirectory::new();

        let missing_port = directory.resolve(raw(json!({
            "name": "no-port",
            "type": "http",
            "server": "proxy.example.com",
        })));
        assert_eq!(missing_port.unwrap_err().kind, ErrorKind::Config);

        let missing_name = directory.resolve(raw(json!({ "type": "direct" })));
        assert_eq!(missing_name.unwrap_err().kind, ErrorKind::Config);

        let unknown = directory.resolve(raw(json!({
            "name": "weird",
            "type": "carrier-pigeon",
        })));
        assert_eq!(unknown.unwrap_err().kind, ErrorKind::Unsupported);
    }

    #[tokio::test]
    async fn test_resolve_documents_skips_failures_and_duplicates() {
        let directory = ProxyDirectory::new();
        let first = ConfigDocument::from_json(
            r#"{"proxies": [
                {"name": "a", "type": "direct"},
                {"name": "b", "type": "trojan", "server": "t", "port": 1},
                {"name": "c", "type": "direct"}
            ]}"#,
        )
        .unwrap();
        let second = ConfigDocument::from_json(
            r#"{"proxies": [
                {"name": "a", "type": "socks5", "server": "s", "port": 2},
                {"name": "d", "type": "direct"}
            ]}"#,
        )
        .unwrap();

        let filter = ProxyFilter::new(".+", "d").unwrap();
        let handles = directory.resolve_documents([&first, &second], &filter);
        let names: Vec<_> = handles.iter().map(|h| h.name()).collect();

        assert_eq!(names, vec!["a", "c"]);
        assert_eq!(handles[0].kind(), ProxyKind::Direct);
    }

    #[tokio::test]
    async fn test_filtered_entries_are_never_resolved() {
        let directory = ProxyDirectory::new();
        let document = ConfigDocument::from_yaml(
            r#"
proxies:
  - {name: us-vmess, type: vmess, server: v, port: 1}
  - {name: us-broken, type: http}
  - {name: hk-direct, type: direct}
"#,
        )
        .unwrap();

        let filter = ProxyFilter::new(".+", "us").unwrap();
        let mut visited = Vec::new();
        let handles = collect_handles([&document], &filter, |entry| {
            visited.push(entry["name"].clone());
            directory.resolve(entry.clone())
        });

        assert_eq!(visited, vec![json!("hk-direct")]);
        assert_eq!(handles.len(), 1);
        assert_eq!(handles[0].name(), "hk-direct");
    }

    #[tokio::test]
    async fn test_handles_carry_document_stem() {
        let directory = ProxyDirectory::new();
        let mut document = ConfigDocument::from_yaml(
            "proxies:\n  - {name: hk-01, type: direct}\n",
        )
        .unwrap();
        document.source = Some("airport".to_string());

        let handles =
            directory.resolve_documents([&document], &ProxyFilter::default());
        assert_eq!(handles[0].name(), "hk-01");
        assert_eq!(handles[0].source(), Some("airport"));
        assert_eq!(handles[0].display_name(), "airport_hk-01");

        let bare = directory
            .resolve(raw(json!({"name": "local", "type": "direct"})))
            .unwrap();
        assert_eq!(bare.display_name(), "local");
    }
}
