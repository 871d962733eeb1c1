//! Mutable response builder owned by the session for the lifetime of one
//! exchange. Chainable setters mutate in place; `send()`/`text()`/`json()`
//! finalize the body.

use std::path::Path;

use super::headers::Headers;
use crate::errors::Error;

const DEFAULT_STATUS: u16 = 200;

pub struct Response {
    status: Option<u16>,
    pub headers: Headers,
    body: Vec<u8>,
    status_set: bool,
    body_set: bool,
    content_type_set: bool,
}

impl Default for Response {
    fn default() -> Self {
        Self::new()
    }
}

impl Response {
    pub fn new() -> Self {
        Response {
            status: None,
            headers: Headers::new(),
            body: Vec::new(),
            status_set: false,
            body_set: false,
            content_type_set: false,
        }
    }

    /// Current status, defaulting to 200 if nothing set it yet.
    pub fn status_code(&self) -> u16 {
        self.status.unwrap_or(DEFAULT_STATUS)
    }

    pub fn body_set(&self) -> bool {
        self.body_set
    }

    pub fn content_type_set(&self) -> bool {
        self.content_type_set
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Set the status code. Out-of-range codes (outside 100–599) panic in
    /// debug builds and silently become 500 in release builds.
    pub fn status(&mut self, code: u16) -> &mut Self {
        if !(100..=599).contains(&code) {
            debug_assert!(false, "invalid HTTP status code: {code}");
            self.status = Some(500);
            self.status_set = true;
            return self;
        }
        self.status = Some(code);
        self.status_set = true;
        self
    }

    pub fn header(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        let name = name.into();
        if name.eq_ignore_ascii_case("content-type") {
            self.content_type_set = true;
        }
        self.headers.set(name, value);
        self
    }

    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.headers.append(name, value);
        self
    }

    pub fn content_type(&mut self, mime: impl Into<String>) -> &mut Self {
        self.content_type_set = true;
        self.headers.set("Content-Type", mime);
        self
    }

    pub fn redirect(&mut self, code: Option<u16>, url: impl AsRef<str>) -> &mut Self {
        let url = url.as_ref();
        self.status(code.unwrap_or(302));
        self.headers.set("Location", url.to_string());
        let body = format!(
            "<html><body>Redirecting to <a href=\"{url}\">{url}</a></body></html>"
        );
        self.text(body)
    }

    pub fn text(&mut self, body: impl Into<String>) -> &mut Self {
        let body = body.into();
        if !self.content_type_set {
            self.content_type("text/plain; charset=utf-8");
        }
        self.set_body(body.into_bytes())
    }

    pub fn json(&mut self, value: &serde_json::Value) -> &mut Self {
        let body = serde_json::to_vec(value).unwrap_or_else(|_| b"{}".to_vec());
        if !self.content_type_set {
            self.content_type("application/json");
        }
        self.set_body(body)
    }

    /// `send(string)` behaves as `text`; `send(json-like)` behaves as `json`.
    pub fn send(&mut self, value: impl Into<SendValue>) -> &mut Self {
        match value.into() {
            SendValue::Text(s) => self.text(s),
            SendValue::Json(v) => self.json(&v),
        }
    }

    fn set_body(&mut self, bytes: Vec<u8>) -> &mut Self {
        self.body = bytes;
        self.body_set = true;
        self
    }

    /// Read `path` into the body, set Content-Type by extension, set
    /// `X-Content-Type-Options: nosniff`, and default `Cache-Control` when
    /// unset. Returns an error mapping to 404 (missing) or 500 (read error).
    pub fn file(&mut self, path: impl AsRef<Path>) -> Result<&mut Self, Error> {
        let mut path = path.as_ref().to_path_buf();
        if path.to_string_lossy().contains("..") {
            return Err(Error::NotFound {
                method: "GET".into(),
                path: path.to_string_lossy().into_owned(),
            });
        }
        if path.is_dir() {
            path.push("index.html");
        }
        let bytes = std::fs::read(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => Error::NotFound {
                method: "GET".into(),
                path: path.to_string_lossy().into_owned(),
            },
            _ => Error::Io(e),
        })?;

        let mime = mime_for_extension(
            path.extension()
                .and_then(|e| e.to_str())
                .unwrap_or("")
                .to_ascii_lowercase()
                .as_str(),
            &bytes,
        );
        self.content_type(mime);
        self.headers.set("X-Content-Type-Options", "nosniff");
        if !self.headers.contains("Cache-Control") {
            self.headers.set("Cache-Control", "public, max-age=3600");
        }
        Ok(self.set_body(bytes))
    }

    /// Finalize headers that must reflect the final body: Content-Length,
    /// and for 204/304 responses, force an empty body.
    pub fn finalize(&mut self) {
        let status = self.status_code();
        if status == 204 || status == 304 {
            self.body.clear();
            self.headers.set("Content-Length", "0");
        } else {
            self.headers.set("Content-Length", self.body.len().to_string());
        }
    }

    /// Strip the body for a HEAD response while keeping all other headers,
    /// including the Content-Length the GET handler would have produced.
    pub fn strip_body_for_head(&mut self) {
        self.finalize();
        self.body.clear();
    }
}

pub enum SendValue {
    Text(String),
    Json(serde_json::Value),
}

impl From<String> for SendValue {
    fn from(s: String) -> Self {
        SendValue::Text(s)
    }
}

impl From<&str> for SendValue {
    fn from(s: &str) -> Self {
        SendValue::Text(s.to_string())
    }
}

impl From<serde_json::Value> for SendValue {
    fn from(v: serde_json::Value) -> Self {
        SendValue::Json(v)
    }
}

const KNOWN_EXTENSIONS: &[(&str, &str)] = &[
    ("html", "text/html; charset=utf-8"),
    ("css", "text/css; charset=utf-8"),
    ("js", "application/javascript; charset=utf-8"),
    ("json", "application/json"),
    ("png", "image/png"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("gif", "image/gif"),
    ("svg", "image/svg+xml"),
    ("ico", "image/x-icon"),
    ("txt", "text/plain; charset=utf-8"),
    ("woff", "font/woff"),
    ("woff2", "font/woff2"),
];

fn mime_for_extension(ext: &str, body: &[u8]) -> &'static str {
    for (known_ext, mime) in KNOWN_EXTENSIONS {
        if *known_ext == ext {
            return mime;
        }
    }
    if looks_like_html(body) {
        "text/html; charset=utf-8"
    } else {
        "application/octet-stream"
    }
}

fn looks_like_html(body: &[u8]) -> bool {
    let head = &body[..body.len().min(512)];
    let text = String::from_utf8_lossy(head).to_ascii_lowercase();
    text.trim_start().starts_with("<!doctype html") || text.trim_start().starts_with("<html")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_status_is_200() {
        let r = Response::new();
        assert_eq!(r.status_code(), 200);
    }

    #[test]
    fn finalize_sets_content_length() {
        let mut r = Response::new();
        r.text("hello");
        r.finalize();
        assert_eq!(r.headers.get("content-length"), Some("5"));
    }

    #[test]
    fn finalize_clears_body_for_204() {
        let mut r = Response::new();
        r.status(204);
        r.text("should be dropped");
        r.finalize();
        assert_eq!(r.body(), b"");
        assert_eq!(r.headers.get("content-length"), Some("0"));
    }

    #[test]
    fn redirect_defaults_to_302() {
        let mut r = Response::new();
        r.redirect(None, "/login");
        assert_eq!(r.status_code(), 302);
        assert_eq!(r.headers.get("location"), Some("/login"));
    }

    #[test]
    fn send_json_sets_content_type() {
        let mut r = Response::new();
        r.send(serde_json::json!({"a": 1}));
        assert_eq!(r.headers.get("content-type"), Some("application/json"));
    }
}
