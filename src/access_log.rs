//! Request-timing access log, installed as global middleware when
//! `VIX_ACCESS_LOGS` is enabled.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tracing::debug;

use crate::middleware::MiddlewareFn;

static REQUEST_SEQ: AtomicU64 = AtomicU64::new(0);

/// Build a middleware that logs method/path/status/duration at debug level
/// after the downstream chain runs, with a monotonic per-process request id.
pub fn access_log_middleware() -> MiddlewareFn {
    Arc::new(|ctx, mut next| {
        Box::pin(async move {
            let rid = REQUEST_SEQ.fetch_add(1, Ordering::Relaxed) + 1;
            let method = ctx.req.method;
            let path = ctx.req.path.clone();
            let start = Instant::now();

            let ctx = next.call(ctx).await;

            debug!(
                rid,
                method = %method,
                path = %path,
                status = ctx.res.status_code(),
                duration_ms = start.elapsed().as_millis() as u64,
                "request_done",
            );
            ctx
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::request::Request;
    use crate::http::response::Response;
    use crate::http::types::{Method, Version};
    use crate::middleware::{run_chain, Context, HandlerFn};

    #[tokio::test]
    async fn passes_through_and_preserves_response() {
        let handler: HandlerFn = Arc::new(|mut ctx| {
            Box::pin(async move {
                ctx.res.status(201);
                ctx
            })
        });
        let chain = run_chain(vec![access_log_middleware()], handler);
        let ctx = Context {
            req: Request::new(
                Method::Get,
                Version::Http11,
                "/x".into(),
                crate::http::Headers::new(),
                Vec::new(),
            ),
            res: Response::new(),
        };
        let ctx = chain(ctx).await;
        assert_eq!(ctx.res.status_code(), 201);
    }
}
