use http::header::{
    HeaderMap, HeaderValue, ACCEPT, CACHE_CONTROL, CONTENT_TYPE, USER_AGENT,
};
use http::Method;
use url::Url;

pub(crate) const UA: &str =
    concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// One HTTP exchange the client can send through a proxy.
pub(crate) trait Request {
    const METHOD: Method = Method::GET;

    fn url(&self) -> &Url;

    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();

        headers.insert(USER_AGENT, HeaderValue::from_static(UA));
        headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));

        headers
    }

    /// Length of the zero-filled body to stream after the head.
    fn body_len(&self) -> Option<u64> {
        None
    }
}

/// `GET` of any URL; with a size, a `bytes=<n>` query asks the speed-test
/// server for that many bytes.
#[derive(Debug, Clone)]
pub(crate) struct Download {
    url: Url,
}

impl Download {
    pub fn new(url: Url) -> Self {
        Self { url }
    }

    pub fn sized(url: &Url, bytes: u64) -> Self {
        let mut url = url.clone();
        url.query_pairs_mut().append_pair("bytes", &bytes.to_string());

        Self { url }
    }
}

impl Request for Download {
    fn url(&self) -> &Url {
        &self.url
    }
}

/// `POST` of `bytes` zero bytes.
#[derive(Debug, Clone)]
pub(crate) struct Upload {
    url: Url,
    bytes: u64,
}

impl Upload {
    pub fn new(url: Url, bytes: u64) -> Self {
        Self { url, bytes }
    }
}

impl Request for Upload {
    const METHOD: Method = Method::POST;

    fn url(&self) -> &Url {
        &self.url
    }

    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();

        headers.insert(USER_AGENT, HeaderValue::from_static(UA));
        headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/octet-stream"),
        );

        headers
    }

    fn body_len(&self) -> Option<u64> {
        Some(self.bytes)
    }
}

/// `<server>/<name>`, keeping any path prefix of the server URL.
pub(crate) fn endpoint(server: &Url, name: &str) -> Url {
    let mut url = server.clone();
    let path = format!("{}/{}", url.path().trim_end_matches('/'), name);
    url.set_path(&path);
    url.set_query(None);
    url
}
