//! Immutable request view: headers, path, params, lazily parsed query/JSON.

use std::collections::HashMap;
use std::sync::OnceLock;

use super::headers::Headers;
use super::query;
use super::types::{Method, Version};
use crate::errors::{Error, Result};
use crate::state::StateBag;

pub struct Request {
    pub method: Method,
    pub version: Version,
    /// Path with the query string stripped.
    pub path: String,
    /// Full request target as sent on the wire (path + optional `?query`).
    pub target: String,
    pub headers: Headers,
    pub params: HashMap<String, String>,
    pub body: Vec<u8>,
    query_cache: OnceLock<HashMap<String, String>>,
    json_cache: OnceLock<std::result::Result<serde_json::Value, String>>,
    state: StateBag,
}

impl Request {
    pub fn new(
        method: Method,
        version: Version,
        target: String,
        headers: Headers,
        body: Vec<u8>,
    ) -> Self {
        let path = match target.find('?') {
            Some(idx) => target[..idx].to_string(),
            None => target.clone(),
        };
        Request {
            method,
            version,
            path,
            target,
            headers,
            params: HashMap::new(),
            body,
            query_cache: OnceLock::new(),
            json_cache: OnceLock::new(),
            state: StateBag::new(),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// Route parameter, or `fallback` when the key wasn't bound by the trie.
    pub fn param<'a>(&'a self, key: &str, fallback: &'a str) -> &'a str {
        self.params
            .get(key)
            .map(String::as_str)
            .unwrap_or(fallback)
    }

    pub fn query(&self) -> &HashMap<String, String> {
        self.query_cache.get_or_init(|| {
            let raw = self.target.split_once('?').map(|(_, q)| q).unwrap_or("");
            query::parse(raw)
        })
    }

    pub fn query_param(&self, key: &str) -> Option<&str> {
        self.query().get(key).map(String::as_str)
    }

    /// Parse the body as JSON, caching the result (and the parse error).
    pub fn json(&self) -> Result<&serde_json::Value> {
        let cached = self
            .json_cache
            .get_or_init(|| serde_json::from_slice(&self.body).map_err(|e| e.to_string()));
        cached
            .as_ref()
            .map_err(|e| Error::Parse(format!("invalid JSON body: {e}")))
    }

    pub fn has_state<T: 'static>(&self) -> bool {
        self.state.has::<T>()
    }

    pub fn state<T: 'static>(&self) -> Option<&T> {
        self.state.get::<T>()
    }

    pub fn try_state<T: 'static>(&self) -> Option<&T> {
        self.state.try_get::<T>()
    }

    pub fn set_state<T: Send + Sync + 'static>(&mut self, value: T) {
        self.state.set(value);
    }

    pub fn emplace_state<T: Send + Sync + 'static>(&mut self, value: T) -> &T {
        self.state.emplace(value)
    }

    /// `Connection: keep-alive` either explicit, or implied by HTTP/1.1 with
    /// the header absent.
    pub fn wants_keep_alive(&self) -> bool {
        match self.header("connection") {
            Some(v) if v.eq_ignore_ascii_case("keep-alive") => true,
            Some(v) if v.eq_ignore_ascii_case("close") => false,
            _ => matches!(self.version, Version::Http11),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(target: &str, body: &[u8]) -> Request {
        Request::new(
            Method::Get,
            Version::Http11,
            target.to_string(),
            Headers::new(),
            body.to_vec(),
        )
    }

    #[test]
    fn path_strips_query() {
        let r = req("/users/42?expand=profile", b"");
        assert_eq!(r.path, "/users/42");
        assert_eq!(r.query_param("expand"), Some("profile"));
    }

    #[test]
    fn json_parse_error_is_cached_and_typed() {
        let r = req("/echo", b"not json");
        assert!(matches!(r.json(), Err(Error::Parse(_))));
        assert!(matches!(r.json(), Err(Error::Parse(_))));
    }

    #[test]
    fn json_roundtrip() {
        let r = req("/echo", br#"{"a":1}"#);
        assert_eq!(r.json().unwrap()["a"], 1);
    }

    #[test]
    fn keep_alive_default_for_http11() {
        let r = req("/", b"");
        assert!(r.wants_keep_alive());
    }
}
