//! Engine-neutral view of one request/response exchange.
//!
//! The proxy adapter builds a [`Flow`] from the intercepted request, hands it
//! to the interceptor chain, and reads back the response slot. Interceptors
//! signal "respond now" by filling [`Flow::response`]; leaving it empty means
//! the request continues to its real destination.

use std::collections::BTreeMap;

use bytes::Bytes;

/// Header map keyed by lowercased header name.
pub type Headers = BTreeMap<String, String>;

/// The request half of a flow.
#[derive(Debug, Clone, Default)]
pub struct FlowRequest {
    /// HTTP method (e.g. `GET`).
    pub method: String,
    /// Absolute URL as seen by the client.
    pub url: String,
    /// Host name without port.
    pub host: String,
    /// Path including the query string.
    pub path: String,
    /// Request headers.
    pub headers: Headers,
    /// Request body.
    pub body: Bytes,
}

impl FlowRequest {
    /// Creates a request from a method and absolute URL, deriving host and path.
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        let url = url.into();
        let (host, path) = split_url(&url);
        Self {
            method: method.into(),
            host,
            path,
            url,
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    /// Adds a header, joining repeated names with `", "`.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        insert_header(&mut self.headers, name, value);
        self
    }

    /// Sets the body.
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }
}

/// The response half of a flow.
#[derive(Debug, Clone, Default)]
pub struct FlowResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response headers.
    pub headers: Headers,
    /// Response body. Empty for streaming responses.
    pub body: Bytes,
    /// Whether the body is delivered incrementally instead of buffered.
    pub streaming: bool,
    /// Body length when known without buffering (e.g. from `Content-Length`).
    pub declared_length: Option<usize>,
}

impl FlowResponse {
    /// Creates a response with the given status and no body.
    pub fn new(status: u16) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }

    /// Adds a header, joining repeated names with `", "`.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        insert_header(&mut self.headers, name, value);
        self
    }

    /// Sets the body.
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Marks the response for incremental delivery.
    pub fn streaming(mut self) -> Self {
        self.streaming = true;
        self
    }

    /// Returns the body length used for logging.
    pub fn content_length(&self) -> usize {
        if self.body.is_empty() {
            self.declared_length.unwrap_or(0)
        } else {
            self.body.len()
        }
    }
}

/// One request/response exchange flowing through the chain.
#[derive(Debug, Clone, Default)]
pub struct Flow {
    /// The intercepted request.
    pub request: FlowRequest,
    /// The response, once produced by an interceptor or the upstream server.
    pub response: Option<FlowResponse>,
}

impl Flow {
    /// Creates a flow with no response yet.
    pub fn new(request: FlowRequest) -> Self {
        Self {
            request,
            response: None,
        }
    }

    /// Returns the response status, if a response is present.
    pub fn status(&self) -> Option<u16> {
        self.response.as_ref().map(|r| r.status)
    }

    /// Returns true if the response is marked as streaming.
    pub fn is_streaming(&self) -> bool {
        self.response.as_ref().is_some_and(|r| r.streaming)
    }
}

/// Inserts a header under its lowercased name, joining repeats.
pub fn insert_header(headers: &mut Headers, name: &str, value: &str) {
    headers
        .entry(name.to_ascii_lowercase())
        .and_modify(|existing| {
            existing.push_str(", ");
            existing.push_str(value);
        })
        .or_insert_with(|| value.to_string());
}

/// Splits an absolute URL into host (without port) and path-with-query.
fn split_url(url: &str) -> (String, String) {
    let rest = match url.find("://") {
        Some(idx) => &url[idx + 3..],
        None => url,
    };
    let (authority, path) = match rest.find('/') {
        Some(idx) => (&rest[..idx], &rest[idx..]),
        None => (rest, "/"),
    };
    let authority = authority.rsplit('@').next().unwrap_or(authority);
    let host = match authority.strip_prefix('[') {
        Some(v6) => v6.split(']').next().unwrap_or(v6),
        None => authority.split(':').next().unwrap_or(authority),
    };
    (host.to_string(), path.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_derives_host_and_path() {
        let req = FlowRequest::new("GET", "https://api.example.com:8443/v1/x?y=1");
        assert_eq!(req.host, "api.example.com");
        assert_eq!(req.path, "/v1/x?y=1");
    }

    #[test]
    fn request_without_path_defaults_to_root() {
        let req = FlowRequest::new("GET", "http://example.com");
        assert_eq!(req.host, "example.com");
        assert_eq!(req.path, "/");
    }

    #[test]
    fn request_with_ipv6_host() {
        let req = FlowRequest::new("GET", "http://[::1]:8080/a");
        assert_eq!(req.host, "::1");
        assert_eq!(req.path, "/a");
    }

    #[test]
    fn headers_are_lowercased_and_joined() {
        let req = FlowRequest::new("GET", "http://a.test/")
            .with_header("Accept", "text/html")
            .with_header("accept", "application/json");
        assert_eq!(
            req.headers.get("accept").map(String::as_str),
            Some("text/html, application/json")
        );
    }

    #[test]
    fn content_length_prefers_body() {
        let res = FlowResponse::new(200).with_body("hello");
        assert_eq!(res.content_length(), 5);

        let mut streamed = FlowResponse::new(200).streaming();
        assert_eq!(streamed.content_length(), 0);
        streamed.declared_length = Some(1024);
        assert_eq!(streamed.content_length(), 1024);
    }

    #[test]
    fn flow_status_and_streaming() {
        let mut flow = Flow::new(FlowRequest::new("GET", "http://a.test/"));
        assert_eq!(flow.status(), None);
        assert!(!flow.is_streaming());

        flow.response = Some(FlowResponse::new(200).streaming());
        assert_eq!(flow.status(), Some(200));
        assert!(flow.is_streaming());
    }
}
