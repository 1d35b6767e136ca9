use http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use http::{HeaderMap, HeaderValue, Method, StatusCode};

/// An outbound request handed to the pipeline by the host proxy.
///
/// The host forwards the (possibly rewritten) request upstream unless
/// [`response`](Self::response) is set, in which case it answers the client
/// with that response instead.
#[derive(Debug, Clone)]
pub struct InterceptedRequest {
    pub method: Method,
    /// `"http"` or `"https"`.
    pub scheme: String,
    /// Upstream host (no port).
    pub host: String,
    /// Path including any query string.
    pub path: String,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
    /// Set by the pipeline to short-circuit the request.
    pub response: Option<SyntheticResponse>,
}

impl InterceptedRequest {
    pub fn new(method: Method, host: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method,
            scheme: "https".to_string(),
            host: host.into(),
            path: path.into(),
            headers: HeaderMap::new(),
            body: Vec::new(),
            response: None,
        }
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Path without the query string.
    pub fn path_only(&self) -> &str {
        self.path.split('?').next().unwrap_or(&self.path)
    }

    pub fn pretty_url(&self) -> String {
        format!("{}://{}{}", self.scheme, self.host, self.path)
    }

    /// The body as UTF-8 text, if it is valid UTF-8.
    pub fn text(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }

    /// Replace the body with `text`, keeping `Content-Length` consistent.
    pub fn set_text(&mut self, text: String) {
        self.body = text.into_bytes();
        if self.headers.contains_key(CONTENT_LENGTH) {
            self.headers
                .insert(CONTENT_LENGTH, HeaderValue::from(self.body.len()));
        }
    }
}

/// A response the pipeline produces instead of forwarding the request.
#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl SyntheticResponse {
    /// A `text/plain` response.
    pub fn text(status: StatusCode, body: impl Into<String>) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
        Self {
            status,
            headers,
            body: body.into().into_bytes(),
        }
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}
