//! Trie-indexed router: literal/parameter child precedence, per-method
//! dispatch, HEAD/OPTIONS synthesis, not-found handling.

use std::collections::HashMap;
use std::sync::Arc;

use crate::http::types::Method;
use crate::middleware::{Context, HandlerFn, MiddlewareEntry, MiddlewareFn};

#[derive(Debug, Clone, Default)]
pub struct RouteDoc {
    pub summary: String,
    pub description: String,
    pub tags: Vec<String>,
    pub extra: serde_json::Value,
}

impl RouteDoc {
    pub fn is_empty(&self) -> bool {
        self.summary.is_empty()
            && self.description.is_empty()
            && self.tags.is_empty()
            && (self.extra.is_null() || self.extra == serde_json::json!({}))
    }
}

#[derive(Default, Clone, Copy)]
pub struct RouteOptions {
    pub heavy: bool,
}

struct RouteEntry {
    handler: HandlerFn,
    heavy: bool,
    doc: RouteDoc,
    middlewares: Vec<MiddlewareFn>,
}

#[derive(Default)]
struct Node {
    children: HashMap<String, Node>,
    param_child: Option<Box<Node>>,
    param_name: Option<String>,
    methods: HashMap<Method, RouteEntry>,
}

pub struct RouteInfo {
    pub method: Method,
    pub path: String,
    pub heavy: bool,
    pub doc: RouteDoc,
}

/// Builder-style router. Call [`Router::freeze`] before handing it to the
/// server — no mutation is possible on a frozen (`Arc`-wrapped) router.
pub struct Router {
    root: Node,
    middleware: Vec<MiddlewareEntry>,
    not_found: Option<HandlerFn>,
    routes: Vec<RouteInfo>,
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl Router {
    pub fn new() -> Self {
        Router {
            root: Node::default(),
            middleware: Vec::new(),
            not_found: None,
            routes: Vec::new(),
        }
    }

    pub fn set_not_found(&mut self, handler: HandlerFn) {
        self.not_found = Some(handler);
    }

    /// Append a global middleware (empty prefix).
    pub fn use_mw(&mut self, mw: MiddlewareFn) {
        self.middleware.push(MiddlewareEntry::new(String::new(), mw));
    }

    /// Insert a global middleware ahead of every middleware registered so
    /// far, so it wraps the whole chain (outermost `next()` call). Used by
    /// the server to install the access log around user middleware that was
    /// already registered on this router.
    pub fn use_mw_outermost(&mut self, mw: MiddlewareFn) {
        self.middleware
            .insert(0, MiddlewareEntry::new(String::new(), mw));
    }

    /// Append a middleware scoped to `prefix`.
    pub fn use_prefix(&mut self, prefix: &str, mw: MiddlewareFn) {
        self.middleware
            .push(MiddlewareEntry::new(normalize_prefix(prefix), mw));
    }

    /// Alias for [`Router::use_prefix`].
    pub fn protect(&mut self, prefix: &str, mw: MiddlewareFn) {
        self.use_prefix(prefix, mw);
    }

    /// Register `path`-scoped middleware that only runs on an exact path
    /// match, passing through untouched otherwise.
    pub fn protect_exact(&mut self, path: &str, mw: MiddlewareFn) {
        let exact = path.to_string();
        let wrapped: MiddlewareFn = Arc::new(move |ctx, next| {
            let exact = exact.clone();
            let mw = mw.clone();
            Box::pin(async move {
                if ctx.req.path == exact {
                    mw(ctx, next).await
                } else {
                    next.call(ctx).await
                }
            })
        });
        self.middleware
            .push(MiddlewareEntry::new(normalize_prefix(path), wrapped));
    }

    fn collect_middleware(&self, path: &str) -> Vec<MiddlewareFn> {
        self.middleware
            .iter()
            .filter(|entry| entry.matches(path))
            .map(|entry| entry.mw.clone())
            .collect()
    }

    pub fn add_route(
        &mut self,
        method: Method,
        path: &str,
        handler: HandlerFn,
        opts: RouteOptions,
        doc: RouteDoc,
    ) {
        let middlewares = self.collect_middleware(path);
        let segments = split_path(path);

        insert(
            &mut self.root,
            &segments,
            method,
            RouteEntry {
                handler,
                heavy: opts.heavy,
                doc: doc.clone(),
                middlewares,
            },
        );
        self.routes.push(RouteInfo {
            method,
            path: path.to_string(),
            heavy: opts.heavy,
            doc,
        });
    }

    pub fn has_route(&self, method: Method, path: &str) -> bool {
        let segments = split_path(path);
        matches(&self.root, &segments, 0, &mut HashMap::new())
            .map(|node| node.methods.contains_key(&method))
            .unwrap_or(false)
    }

    /// Re-run the match read-only and return the terminal node's heavy flag
    /// (`false` if there's no match).
    pub fn is_heavy(&self, method: Method, path: &str) -> bool {
        let segments = split_path(path);
        match matches(&self.root, &segments, 0, &mut HashMap::new()) {
            Some(node) => node
                .methods
                .get(&method)
                .or_else(|| {
                    if method == Method::Head {
                        node.methods.get(&Method::Get)
                    } else {
                        None
                    }
                })
                .map(|e| e.heavy)
                .unwrap_or(false),
            None => false,
        }
    }

    pub fn routes(&self) -> &[RouteInfo] {
        &self.routes
    }

    pub fn freeze(self) -> Arc<Router> {
        Arc::new(self)
    }
}

/// Outcome of matching a request against the frozen router.
pub enum Dispatch {
    /// Run `middlewares` then `handler`; if `strip_body` is set, drop the
    /// body afterwards and keep only the computed headers (HEAD semantics).
    Found {
        handler: HandlerFn,
        middlewares: Vec<MiddlewareFn>,
        strip_body: bool,
    },
    NotFound,
}

impl Router {
    /// Match `method`/`path`, synthesizing OPTIONS and HEAD at dispatch time
    /// rather than by expanding the trie, and binding route parameters into
    /// `ctx.req.params`.
    pub fn dispatch(&self, method: Method, path: &str, params: &mut HashMap<String, String>) -> Dispatch {
        let segments = split_path(path);
        let node = match matches(&self.root, &segments, 0, params) {
            Some(n) => n,
            None => return Dispatch::NotFound,
        };

        if let Some(entry) = node.methods.get(&method) {
            return Dispatch::Found {
                handler: entry.handler.clone(),
                middlewares: entry.middlewares.clone(),
                strip_body: false,
            };
        }

        if method == Method::Head {
            if let Some(entry) = node.methods.get(&Method::Get) {
                return Dispatch::Found {
                    handler: entry.handler.clone(),
                    middlewares: entry.middlewares.clone(),
                    strip_body: true,
                };
            }
        }

        if method == Method::Options && !node.methods.is_empty() {
            return Dispatch::Found {
                handler: default_options_handler(),
                middlewares: self.collect_middleware(path),
                strip_body: false,
            };
        }

        Dispatch::NotFound
    }

    pub fn not_found_handler(&self) -> Option<HandlerFn> {
        self.not_found.clone()
    }
}

fn default_options_handler() -> HandlerFn {
    Arc::new(|mut ctx: Context| {
        Box::pin(async move {
            if !ctx.res.body_set() {
                ctx.res.status(204);
                ctx.res.header("Connection", "close");
            }
            ctx
        })
    })
}

fn split_path(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

pub fn normalize_prefix(prefix: &str) -> String {
    if prefix.is_empty() {
        return String::new();
    }
    if prefix == "/" {
        return "/".to_string();
    }
    let mut p = prefix.to_string();
    if !p.starts_with('/') {
        p.insert(0, '/');
    }
    while p.len() > 1 && p.ends_with('/') {
        p.pop();
    }
    p
}

fn insert(node: &mut Node, segments: &[&str], method: Method, entry: RouteEntry) {
    if segments.is_empty() {
        node.methods.insert(method, entry);
        return;
    }
    let seg = segments[0];
    if let Some(param_name) = seg.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
        let child = node.param_child.get_or_insert_with(|| {
            let mut n = Box::new(Node::default());
            n.param_name = Some(param_name.to_string());
            n
        });
        insert(child, &segments[1..], method, entry);
    } else {
        let child = node.children.entry(seg.to_string()).or_default();
        insert(child, &segments[1..], method, entry);
    }
}

/// At each node, commit to a literal child match if one exists; otherwise
/// descend into the parameter child if present; otherwise fail. This is a
/// single forward walk with no retry: a literal match at segment `i` that
/// dead-ends later never backtracks to try the parameter child at `i`.
fn matches<'n>(
    node: &'n Node,
    segments: &[&str],
    idx: usize,
    params: &mut HashMap<String, String>,
) -> Option<&'n Node> {
    if idx == segments.len() {
        return Some(node);
    }
    let seg = segments[idx];
    if let Some(child) = node.children.get(seg) {
        return matches(child, segments, idx + 1, params);
    }
    if let Some(child) = &node.param_child {
        let name = child.param_name.clone().unwrap_or_default();
        params.insert(name, seg.to_string());
        return matches(child, segments, idx + 1, params);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop_handler() -> HandlerFn {
        Arc::new(|ctx| Box::pin(async move { ctx }))
    }

    #[test]
    fn literal_beats_param() {
        let mut r = Router::new();
        r.add_route(Method::Get, "/users/me", noop_handler(), RouteOptions::default(), RouteDoc::default());
        r.add_route(Method::Get, "/users/{id}", noop_handler(), RouteOptions::default(), RouteDoc::default());

        let mut params = HashMap::new();
        let d = r.dispatch(Method::Get, "/users/me", &mut params);
        assert!(matches!(d, Dispatch::Found { .. }));
        assert!(params.is_empty());

        let mut params2 = HashMap::new();
        let d2 = r.dispatch(Method::Get, "/users/7", &mut params2);
        assert!(matches!(d2, Dispatch::Found { .. }));
        assert_eq!(params2.get("id").map(String::as_str), Some("7"));
    }

    #[test]
    fn head_falls_back_to_get() {
        let mut r = Router::new();
        r.add_route(Method::Get, "/hello", noop_handler(), RouteOptions::default(), RouteDoc::default());
        let mut params = HashMap::new();
        match r.dispatch(Method::Head, "/hello", &mut params) {
            Dispatch::Found { strip_body, .. } => assert!(strip_body),
            Dispatch::NotFound => panic!("expected a match"),
        }
    }

    #[test]
    fn options_synthesized_at_dispatch() {
        let mut r = Router::new();
        r.add_route(Method::Get, "/hello", noop_handler(), RouteOptions::default(), RouteDoc::default());
        let mut params = HashMap::new();
        assert!(matches!(
            r.dispatch(Method::Options, "/hello", &mut params),
            Dispatch::Found { .. }
        ));
    }

    #[test]
    fn prefix_scoping_excludes_lookalikes() {
        assert_eq!(normalize_prefix("/api"), "/api");
        assert_eq!(normalize_prefix("/api/"), "/api");
        assert_eq!(normalize_prefix(""), "");
        assert_eq!(normalize_prefix("/"), "/");
    }

    #[test]
    fn no_route_is_not_found() {
        let r = Router::new();
        let mut params = HashMap::new();
        assert!(matches!(
            r.dispatch(Method::Get, "/nope", &mut params),
            Dispatch::NotFound
        ));
    }

    #[test]
    fn options_on_path_with_no_routes_is_not_found() {
        let mut r = Router::new();
        r.add_route(Method::Get, "/a/b", noop_handler(), RouteOptions::default(), RouteDoc::default());
        let mut params = HashMap::new();
        // "/a" is a reachable trie node (parent of "/a/b") but has no
        // registered methods of its own, so OPTIONS there is still 404.
        assert!(matches!(
            r.dispatch(Method::Options, "/a", &mut params),
            Dispatch::NotFound
        ));
    }

    #[test]
    fn literal_commit_does_not_backtrack_to_param_sibling() {
        let mut r = Router::new();
        r.add_route(Method::Get, "/a/{x}/z", noop_handler(), RouteOptions::default(), RouteDoc::default());
        r.add_route(Method::Get, "/a/b", noop_handler(), RouteOptions::default(), RouteDoc::default());

        // Segment 1 commits to the literal child "b" (matching /a/b), which
        // has no further child "z", so the match must fail rather than
        // retrying against the sibling parameter child {x}.
        let mut params = HashMap::new();
        assert!(matches!(
            r.dispatch(Method::Get, "/a/b/z", &mut params),
            Dispatch::NotFound
        ));
    }

    #[test]
    fn is_heavy_reflects_registered_flag() {
        let mut r = Router::new();
        r.add_route(
            Method::Get,
            "/slow",
            noop_handler(),
            RouteOptions { heavy: true },
            RouteDoc::default(),
        );
        assert!(r.is_heavy(Method::Get, "/slow"));
        assert!(!r.is_heavy(Method::Post, "/slow"));
    }
}
