//! Per-connection state machine: read with body limits, WAF gate, dispatch
//! (inline or via the executor), write, keep-alive loop.
//!
//! One `Session` owns one socket and runs its entire lifecycle sequentially
//! on a single tokio task; a new read only ever starts after the previous
//! response has been fully written, so writes stay serialized for this
//! connection without an extra lock. Heavy routes leave this task
//! temporarily (via the executor) but the write that follows still happens
//! here, in order — the per-connection strand the design calls for falls out
//! of the task itself rather than a dedicated type.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::errors::{Error, ErrorBody};
use crate::executor::{Executor, TaskOptions};
use crate::http::parser::{self, ParseError};
use crate::http::request::Request;
use crate::http::response::Response;
use crate::http::types::Version;
use crate::middleware::{run_chain, Context};
use crate::router::{Dispatch, Router};
use crate::waf::{self, WafConfig};

const INITIAL_READ_BUF: usize = 4 * 1024;
pub const MAX_REQUEST_BODY_SIZE: usize = 10 * 1024 * 1024;

/// Immutable per-session configuration, shared (via `Arc`) across every
/// connection a [`crate::server::Server`] accepts.
pub struct SessionOptions {
    pub max_body_bytes: usize,
    /// Idle/read timeout per request (and between keep-alive requests),
    /// sourced from `session.timeout_sec`.
    pub read_timeout: Duration,
    /// Advisory timeout passed to the executor for heavy routes, sourced
    /// from `server.request_timeout`.
    pub task_timeout: Duration,
    pub waf: WafConfig,
    pub is_dev: bool,
    pub server_header: String,
}

enum ReadOutcome {
    Request(Request),
    BodyTooLarge,
    ParseFailed,
    Eof,
    TimedOut,
}

pub struct Session {
    stream: TcpStream,
    peer: SocketAddr,
    router: Arc<Router>,
    executor: Arc<Executor>,
    opts: Arc<SessionOptions>,
    buf: Vec<u8>,
}

impl Session {
    pub fn new(
        stream: TcpStream,
        peer: SocketAddr,
        router: Arc<Router>,
        executor: Arc<Executor>,
        opts: Arc<SessionOptions>,
    ) -> Self {
        Session {
            stream,
            peer,
            router,
            executor,
            opts,
            buf: Vec::with_capacity(INITIAL_READ_BUF),
        }
    }

    /// Drive the connection: Reading -> Dispatching -> Writing, looping back
    /// to Reading on keep-alive, until something moves it to Closed.
    pub async fn run(mut self) {
        loop {
            let outcome = match tokio::time::timeout(
                self.opts.read_timeout,
                self.read_request(),
            )
            .await
            {
                Ok(outcome) => outcome,
                Err(_) => ReadOutcome::TimedOut,
            };

            let request = match outcome {
                ReadOutcome::Request(req) => req,
                ReadOutcome::Eof => break,
                ReadOutcome::TimedOut => {
                    debug!(peer = %self.peer, "session read timed out");
                    break;
                }
                ReadOutcome::BodyTooLarge => {
                    self.write_and_maybe_continue(error_response(&Error::BodyTooLarge, self.opts.is_dev), false)
                        .await;
                    break;
                }
                ReadOutcome::ParseFailed => {
                    self.write_and_maybe_continue(
                        error_response(&Error::Parse("malformed request".into()), self.opts.is_dev),
                        false,
                    )
                    .await;
                    break;
                }
            };

            let keep_alive_requested = request.wants_keep_alive();
            let version = request.version;

            if !waf::check(&request, &self.opts.waf) {
                let res = error_response(&Error::WafRejected, self.opts.is_dev);
                self.write_and_maybe_continue(res, false).await;
                break;
            }

            let res = self.dispatch(request).await;
            let close_requested = res
                .headers
                .get("connection")
                .map(|v| v.eq_ignore_ascii_case("close"))
                .unwrap_or(false);

            let keep_alive = keep_alive_requested && !close_requested;
            if !self.write_response(&res, version).await {
                break;
            }
            if !keep_alive {
                break;
            }
            self.buf.clear();
        }

        self.close().await;
    }

    async fn read_request(&mut self) -> ReadOutcome {
        let mut read_chunk = [0u8; INITIAL_READ_BUF];
        loop {
            match parser::try_parse(&self.buf, self.opts.max_body_bytes) {
                Ok(Some(parsed)) => {
                    self.buf.drain(..parsed.consumed);
                    return ReadOutcome::Request(parsed.request);
                }
                Ok(None) => {}
                Err(ParseError::InvalidFormat(msg)) if msg.contains("exceeds configured limit") => {
                    return ReadOutcome::BodyTooLarge;
                }
                Err(_) => return ReadOutcome::ParseFailed,
            }

            match self.stream.read(&mut read_chunk).await {
                Ok(0) => return ReadOutcome::Eof,
                Ok(n) => self.buf.extend_from_slice(&read_chunk[..n]),
                Err(_) => return ReadOutcome::Eof,
            }
        }
    }

    async fn dispatch(&self, request: Request) -> Response {
        let method = request.method;
        let path = request.path.clone();
        let mut params = std::collections::HashMap::new();

        match self.router.dispatch(method, &path, &mut params) {
            Dispatch::Found {
                handler,
                middlewares,
                strip_body,
            } => {
                let mut request = request;
                request.params = params;
                let heavy = self.router.is_heavy(method, &path);
                let ctx = Context {
                    req: request,
                    res: Response::new(),
                };

                let mut ctx = if heavy {
                    self.run_heavy(middlewares, handler, ctx).await
                } else {
                    self.run_inline(middlewares, handler, ctx, &method, &path).await
                };

                apply_common_headers(&mut ctx.res, &self.opts.server_header);
                if strip_body {
                    ctx.res.strip_body_for_head();
                } else {
                    ctx.res.finalize();
                }
                ctx.res
            }
            Dispatch::NotFound => {
                let mut res = match self.router.not_found_handler() {
                    Some(handler) => {
                        let ctx = Context {
                            req: request,
                            res: Response::new(),
                        };
                        self.run_inline(Vec::new(), handler, ctx, &method, &path).await.res
                    }
                    None => not_found_response(method.as_str(), &path),
                };
                apply_common_headers(&mut res, &self.opts.server_header);
                res.finalize();
                res
            }
        }
    }

    async fn run_inline(
        &self,
        middlewares: Vec<crate::middleware::MiddlewareFn>,
        handler: crate::middleware::HandlerFn,
        ctx: Context,
        method: &crate::http::types::Method,
        path: &str,
    ) -> Context {
        let chain = run_chain(middlewares, handler);
        match tokio::spawn(chain(ctx)).await {
            Ok(ctx) => ctx,
            Err(_) => {
                warn!(method = %method, path, "handler panicked");
                Context {
                    req: Request::new(
                        *method,
                        Version::Http11,
                        path.to_string(),
                        crate::http::Headers::new(),
                        Vec::new(),
                    ),
                    res: error_response(
                        &Error::HandlerPanic(format!("{method} {path}")),
                        self.opts.is_dev,
                    ),
                }
            }
        }
    }

    async fn run_heavy(
        &self,
        middlewares: Vec<crate::middleware::MiddlewareFn>,
        handler: crate::middleware::HandlerFn,
        ctx: Context,
    ) -> Context {
        let method = ctx.req.method;
        let path = ctx.req.path.clone();
        let chain = run_chain(middlewares, handler);
        let opts = TaskOptions {
            timeout: self.opts.task_timeout,
            ..TaskOptions::default()
        };
        let rx = self.executor.submit_async(opts, chain(ctx));

        match rx.await {
            Ok(Ok(ctx)) => ctx,
            Ok(Err(e)) => Context {
                req: Request::new(
                    method,
                    Version::Http11,
                    path.clone(),
                    crate::http::Headers::new(),
                    Vec::new(),
                ),
                res: error_response(&e, self.opts.is_dev),
            },
            Err(_) => Context {
                req: Request::new(
                    method,
                    Version::Http11,
                    path,
                    crate::http::Headers::new(),
                    Vec::new(),
                ),
                res: error_response(&Error::ExecutorRejected, self.opts.is_dev),
            },
        }
    }

    /// Write `res`, returning whether the connection should stay open. Used
    /// for single-shot error paths where no further keep-alive logic applies.
    async fn write_and_maybe_continue(&mut self, mut res: Response, keep_alive: bool) -> bool {
        apply_common_headers(&mut res, &self.opts.server_header);
        res.finalize();
        let ok = self.write_response(&res, Version::Http11).await;
        ok && keep_alive
    }

    async fn write_response(&mut self, res: &Response, version: Version) -> bool {
        let bytes = encode_response(res, version);
        if let Err(e) = self.stream.write_all(&bytes).await {
            warn!(peer = %self.peer, error = %e, "write failed");
            return false;
        }
        true
    }

    async fn close(mut self) {
        match self.stream.shutdown().await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotConnected => {}
            Err(e) => warn!(peer = %self.peer, error = %e, "error shutting down socket"),
        }
    }
}

fn apply_common_headers(res: &mut Response, server_header: &str) {
    if !res.headers.contains("Server") {
        res.headers.set("Server", server_header.to_string());
    }
    if !res.headers.contains("Date") {
        res.headers
            .set("Date", httpdate::fmt_http_date(SystemTime::now()));
    }
}

fn not_found_response(method: &str, path: &str) -> Response {
    let mut res = Response::new();
    res.status(404);
    res.header("Connection", "close");
    res.json(&serde_json::json!({
        "error": "Route not found",
        "method": method,
        "path": path,
    }));
    res
}

fn error_response(err: &Error, is_dev: bool) -> Response {
    let mut res = Response::new();
    res.status(err.status_code());
    if is_dev {
        let body = format!(
            "<html><body><h1>{}</h1><pre>{}</pre></body></html>",
            err.status_code(),
            err
        );
        res.content_type("text/html; charset=utf-8");
        res.text(body);
    } else {
        let body: ErrorBody = err.into();
        res.json(&serde_json::json!({ "error": body.error, "hint": body.hint }));
    }
    res
}

fn status_text(code: u16) -> &'static str {
    match code {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        301 => "Moved Permanently",
        302 => "Found",
        304 => "Not Modified",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        413 => "Payload Too Large",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}

fn encode_response(res: &Response, version: Version) -> Vec<u8> {
    let mut out = Vec::with_capacity(256 + res.body().len());
    out.extend_from_slice(version.as_str().as_bytes());
    out.extend_from_slice(b" ");
    out.extend_from_slice(res.status_code().to_string().as_bytes());
    out.extend_from_slice(b" ");
    out.extend_from_slice(status_text(res.status_code()).as_bytes());
    out.extend_from_slice(b"\r\n");
    for (name, value) in res.headers.iter() {
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(value.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(res.body());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_body_matches_schema() {
        let res = not_found_response("DELETE", "/unknown");
        assert_eq!(res.status_code(), 404);
        assert_eq!(res.headers.get("connection"), Some("close"));
    }

    #[test]
    fn encode_response_includes_status_line_and_body() {
        let mut res = Response::new();
        res.text("hi");
        res.finalize();
        let bytes = encode_response(&res, Version::Http11);
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.ends_with("hi"));
    }

    #[test]
    fn release_error_response_is_json() {
        let res = error_response(&Error::WafRejected, false);
        assert_eq!(res.status_code(), 400);
        assert_eq!(res.headers.get("content-type"), Some("application/json"));
    }

    #[test]
    fn dev_error_response_is_html() {
        let res = error_response(&Error::WafRejected, true);
        assert_eq!(res.headers.get("content-type"), Some("text/html; charset=utf-8"));
    }
}
