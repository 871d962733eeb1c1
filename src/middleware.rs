//! Middleware pipeline: call-once continuation, prefix scoping, auto-send.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::http::request::Request;
use crate::http::response::Response;
use crate::router::normalize_prefix;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Request + response carried through the middleware chain and handler.
pub struct Context {
    pub req: Request,
    pub res: Response,
}

pub type HandlerFn = Arc<dyn Fn(Context) -> BoxFuture<'static, Context> + Send + Sync>;
pub type MiddlewareFn =
    Arc<dyn Fn(Context, Next) -> BoxFuture<'static, Context> + Send + Sync>;

type NextInner = Box<dyn FnOnce(Context) -> BoxFuture<'static, Context> + Send>;

/// Call-once continuation passed to each middleware. A second call is a
/// no-op that returns the context unchanged — it never re-enters the
/// downstream frame.
pub struct Next {
    inner: Option<NextInner>,
}

impl Next {
    pub fn new(inner: NextInner) -> Self {
        Next { inner: Some(inner) }
    }

    pub fn called(&self) -> bool {
        self.inner.is_none()
    }

    pub async fn call(&mut self, ctx: Context) -> Context {
        match self.inner.take() {
            Some(f) => f(ctx).await,
            None => ctx,
        }
    }
}

pub(crate) struct MiddlewareEntry {
    prefix: String,
    pub mw: MiddlewareFn,
}

impl MiddlewareEntry {
    pub fn new(prefix: String, mw: MiddlewareFn) -> Self {
        MiddlewareEntry { prefix, mw }
    }

    pub fn matches(&self, path: &str) -> bool {
        if self.prefix.is_empty() {
            return true;
        }
        path == self.prefix || path.starts_with(&format!("{}/", self.prefix))
    }
}

/// Drive a collected middleware list, then the terminal handler, by index.
/// Each middleware's `next` advances to the following stage; once every
/// middleware has called `next`, the handler runs.
pub fn run_chain(
    middlewares: Vec<MiddlewareFn>,
    handler: HandlerFn,
) -> impl Fn(Context) -> BoxFuture<'static, Context> {
    move |ctx: Context| {
        let middlewares = middlewares.clone();
        let handler = handler.clone();
        Box::pin(drive(middlewares, 0, handler, ctx))
    }
}

fn drive(
    middlewares: Vec<MiddlewareFn>,
    index: usize,
    handler: HandlerFn,
    ctx: Context,
) -> BoxFuture<'static, Context> {
    if index >= middlewares.len() {
        return (handler)(ctx);
    }
    let mw = middlewares[index].clone();
    let next = Next::new(Box::new(move |ctx| {
        drive(middlewares.clone(), index + 1, handler.clone(), ctx)
    }));
    mw(ctx, next)
}

/// A value a handler can hand to [`Context::respond`] for auto-send.
pub trait AutoSend {
    fn auto_send(self, res: &mut Response);
}

impl AutoSend for () {
    fn auto_send(self, _res: &mut Response) {}
}

impl AutoSend for String {
    fn auto_send(self, res: &mut Response) {
        res.text(self);
    }
}

impl AutoSend for &str {
    fn auto_send(self, res: &mut Response) {
        res.text(self.to_string());
    }
}

impl AutoSend for serde_json::Value {
    fn auto_send(self, res: &mut Response) {
        res.json(&self);
    }
}

impl<T: AutoSend> AutoSend for (u16, T) {
    fn auto_send(self, res: &mut Response) {
        res.status(self.0);
        self.1.auto_send(res);
    }
}

impl Context {
    /// Auto-send `value` only if nothing has written the body yet and no
    /// Content-Length has been set.
    pub fn respond(&mut self, value: impl AutoSend) {
        if !self.res.body_set() {
            value.auto_send(&mut self.res);
        }
    }
}

pub fn prefix_matches(prefix: &str, path: &str) -> bool {
    let normalized = normalize_prefix(prefix);
    if normalized.is_empty() {
        return true;
    }
    path == normalized || path.starts_with(&format!("{}/", normalized))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::types::{Method, Version};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn ctx(path: &str) -> Context {
        Context {
            req: Request::new(
                Method::Get,
                Version::Http11,
                path.to_string(),
                crate::http::Headers::new(),
                Vec::new(),
            ),
            res: Response::new(),
        }
    }

    #[test]
    fn next_call_is_idempotent() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        let handler: HandlerFn = Arc::new(move |ctx| {
            calls2.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move { ctx })
        });

        let mw: MiddlewareFn = Arc::new(|ctx, mut next| {
            Box::pin(async move {
                let ctx = next.call(ctx).await;
                // Calling again must not re-enter the handler.
                next.call(ctx).await
            })
        });

        let chain = run_chain(vec![mw], handler);
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(chain(ctx("/x")));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn middleware_can_short_circuit() {
        let handler: HandlerFn = Arc::new(|_| panic!("handler must not run"));
        let mw: MiddlewareFn = Arc::new(|mut ctx, _next| {
            Box::pin(async move {
                ctx.res.status(401);
                ctx
            })
        });
        let chain = run_chain(vec![mw], handler);
        let rt = tokio::runtime::Runtime::new().unwrap();
        let ctx = rt.block_on(chain(ctx("/x")));
        assert_eq!(ctx.res.status_code(), 401);
    }

    #[test]
    fn prefix_matching_rules() {
        assert!(prefix_matches("/api", "/api"));
        assert!(prefix_matches("/api", "/api/x"));
        assert!(prefix_matches("/api", "/api/x/y"));
        assert!(!prefix_matches("/api", "/apix"));
        assert!(prefix_matches("", "/anything"));
    }

    #[test]
    fn auto_send_respects_existing_body() {
        let mut res = Response::new();
        res.text("already set");
        let mut c = Context {
            req: Request::new(
                Method::Get,
                Version::Http11,
                "/".into(),
                crate::http::Headers::new(),
                Vec::new(),
            ),
            res,
        };
        c.respond("ignored".to_string());
        assert_eq!(c.res.body(), b"already set");
    }
}
