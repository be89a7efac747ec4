//! Immutable description of the HTTP call a worker pool issues repeatedly.
use std::fmt;

use bytes::Bytes;
use http::{
    HeaderMap, HeaderName, HeaderValue, Method, Request, Uri,
    header::{ACCEPT_ENCODING, CONNECTION, HOST},
    uri::{PathAndQuery, Scheme},
};
use http_body_util::Full;

use crate::error::BuildError;

/// Transport behaviour toggled per request template.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TransportOptions {
    /// Do not ask the server for a gzip-encoded response.
    pub disable_compression: bool,
    /// Close the connection after every exchange instead of pooling it.
    pub disable_keepalive: bool,
    /// Report redirect responses as-is instead of following them.
    pub disable_redirects: bool,
}

/// One HTTP call: method, URL, headers, body and transport toggles.
///
/// A template is read-only once a worker pool starts; all workers of the pool
/// share the same instance.
#[derive(Clone, Debug)]
pub struct RequestTemplate {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
    options: TransportOptions,
}

impl RequestTemplate {
    /// Creates a template for `method` and `url` without headers or body.
    ///
    /// Fails when the method is not a valid token, the URL does not parse, or it
    /// is not an absolute `http`/`https` URL with a host.
    pub fn new(method: &str, url: &str) -> Result<Self, BuildError> {
        let method = Method::from_bytes(method.as_bytes())
            .map_err(|source| BuildError::InvalidMethod { method: method.to_string(), source })?;
        let uri = parse_url(url)?;
        Ok(Self {
            method,
            uri,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            options: TransportOptions::default(),
        })
    }

    /// Appends a header value; repeated names keep every value.
    pub fn with_header(mut self, name: &str, value: &str) -> Result<Self, BuildError> {
        let key = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| BuildError::InvalidHeaderName { name: name.to_string() })?;
        let value = HeaderValue::from_str(value)
            .map_err(|_| BuildError::InvalidHeaderValue { name: name.to_string() })?;
        self.headers.append(key, value);
        Ok(self)
    }

    /// Appends a header given as a `Name: value` line.
    pub fn with_header_line(self, line: &str) -> Result<Self, BuildError> {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| BuildError::BadHeader { header: line.to_string() })?;
        self.with_header(name.trim(), value.trim())
    }

    /// Sets the request body sent with every attempt.
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Sets the transport toggles.
    pub fn with_options(mut self, options: TransportOptions) -> Self {
        self.options = options;
        self
    }

    /// The request method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The absolute request URL.
    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// The configured headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// The request body.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// The transport toggles.
    pub fn options(&self) -> TransportOptions {
        self.options
    }

    /// `"<METHOD> <URL>"`, identifying the request in results and logs.
    pub fn identity(&self) -> String {
        self.to_string()
    }

    /// Builds the wire request for one attempt against `uri`.
    ///
    /// `uri` differs from [`Self::uri`] only while following redirects. The body
    /// is a cheap clone of the shared bytes, so every attempt reads its own copy.
    pub(crate) fn request(&self, method: &Method, uri: &Uri, with_body: bool) -> Request<Full<Bytes>> {
        let body = if with_body { self.body.clone() } else { Bytes::new() };
        let mut req = Request::new(Full::new(body));
        *req.method_mut() = method.clone();
        *req.uri_mut() = Uri::from(uri.path_and_query().cloned().unwrap_or_else(|| PathAndQuery::from_static("/")));

        let headers = req.headers_mut();
        *headers = self.headers.clone();
        if !headers.contains_key(HOST)
            && let Some(host) = uri.authority().and_then(|a| HeaderValue::from_str(a.as_str()).ok())
        {
            headers.insert(HOST, host);
        }
        if !self.options.disable_compression && !headers.contains_key(ACCEPT_ENCODING) {
            headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("gzip"));
        }
        if self.options.disable_keepalive {
            headers.insert(CONNECTION, HeaderValue::from_static("close"));
        }
        req
    }
}

impl fmt::Display for RequestTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.uri)
    }
}

/// Parses an absolute `http`/`https` URL with a host.
pub(crate) fn parse_url(url: &str) -> Result<Uri, BuildError> {
    let uri: Uri = url
        .parse()
        .map_err(|source| BuildError::InvalidUrl { url: url.to_string(), source })?;
    match uri.scheme() {
        Some(s) if *s == Scheme::HTTP || *s == Scheme::HTTPS => {}
        _ => return Err(BuildError::UnsupportedScheme { url: url.to_string() }),
    }
    if uri.host().is_none_or(str::is_empty) {
        return Err(BuildError::MissingHost { url: url.to_string() });
    }
    Ok(uri)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_bad_method_and_urls() {
        assert!(matches!(RequestTemplate::new("GE T", "http://a/"), Err(BuildError::InvalidMethod { .. })));
        assert!(matches!(RequestTemplate::new("GET", "http://a b/"), Err(BuildError::InvalidUrl { .. })));
        assert!(matches!(RequestTemplate::new("GET", "/relative"), Err(BuildError::UnsupportedScheme { .. })));
        assert!(matches!(RequestTemplate::new("GET", "ftp://host/x"), Err(BuildError::UnsupportedScheme { .. })));
    }

    #[test]
    fn header_lines_are_split_on_first_colon() {
        let t = RequestTemplate::new("GET", "http://example/x")
            .unwrap()
            .with_header_line(" X-Trace : a:b:c ")
            .unwrap()
            .with_header_line("X-Trace: d")
            .unwrap();
        let values: Vec<_> = t.headers().get_all("x-trace").iter().map(|v| v.to_str().unwrap()).collect();
        assert_eq!(values, ["a:b:c", "d"]);

        let err = t.with_header_line("no separator").unwrap_err();
        assert!(matches!(err, BuildError::BadHeader { header } if header == "no separator"));
    }

    #[test]
    fn request_carries_host_and_transport_headers() {
        let t = RequestTemplate::new("POST", "http://example:8080/x?y=1")
            .unwrap()
            .with_body("payload")
            .with_options(TransportOptions { disable_keepalive: true, ..Default::default() });
        let req = t.request(t.method(), t.uri(), true);

        assert_eq!(req.method(), Method::POST);
        assert_eq!(req.uri(), "/x?y=1");
        assert_eq!(req.headers()[HOST], "example:8080");
        assert_eq!(req.headers()[ACCEPT_ENCODING], "gzip");
        assert_eq!(req.headers()[CONNECTION], "close");
    }

    #[test]
    fn explicit_headers_win_over_defaults() {
        let t = RequestTemplate::new("GET", "http://example/")
            .unwrap()
            .with_header("Host", "virtual.example")
            .unwrap()
            .with_header("Accept-Encoding", "br")
            .unwrap();
        let req = t.request(t.method(), t.uri(), true);
        assert_eq!(req.headers()[HOST], "virtual.example");
        assert_eq!(req.headers()[ACCEPT_ENCODING], "br");
        assert!(req.headers().get(CONNECTION).is_none());

        let no_gzip = t.clone().with_options(TransportOptions { disable_compression: true, ..Default::default() });
        let fresh = RequestTemplate::new("GET", "http://example").unwrap().with_options(no_gzip.options());
        let req = fresh.request(fresh.method(), fresh.uri(), true);
        assert!(req.headers().get(ACCEPT_ENCODING).is_none());
        assert_eq!(req.uri(), "/");
    }

    #[test]
    fn identity_is_method_and_url() {
        let t = RequestTemplate::new("GET", "http://example/x").unwrap();
        assert_eq!(t.identity(), "GET http://example/x");
    }
}
