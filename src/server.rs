//! Accepts TCP connections and spawns a [`Session`] per connection.
//!
//! Owns the listener, a shared `Router`, a shared `Executor`, and a watch
//! channel used to signal shutdown to every accept loop and in-flight
//! session.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpSocket};
use tracing::{error, info};

use crate::access_log;
use crate::config::Config;
use crate::errors::Result;
use crate::executor::Executor;
use crate::router::Router;
use crate::session::{Session, SessionOptions};
use crate::waf::WafConfig;

/// Builder for a [`Server`]; mirrors the fields a caller would otherwise
/// pass into `Config` by hand.
pub struct ServerBuilder {
    addr: String,
    router: Router,
    executor_threads: usize,
    executor_max_threads: usize,
    executor_max_periodic: usize,
    access_logs: bool,
    opts: SessionOptionsBuilder,
}

struct SessionOptionsBuilder {
    max_body_bytes: usize,
    read_timeout: Duration,
    task_timeout: Duration,
    waf: WafConfig,
    is_dev: bool,
    server_header: String,
}

impl ServerBuilder {
    pub fn new(router: Router) -> Self {
        let cfg = Config::default();
        ServerBuilder {
            addr: cfg.server_addr(),
            router,
            executor_threads: num_cpus::get().max(1),
            executor_max_threads: (num_cpus::get() * 4).max(4),
            executor_max_periodic: 8,
            access_logs: cfg.access_logs,
            opts: SessionOptionsBuilder {
                max_body_bytes: crate::session::MAX_REQUEST_BODY_SIZE,
                read_timeout: Duration::from_secs(cfg.session_timeout_sec),
                task_timeout: Duration::from_millis(cfg.request_timeout_ms),
                waf: WafConfig {
                    mode: cfg.waf_mode,
                    max_target_len: cfg.waf_max_target_len,
                    max_body_bytes: cfg.waf_max_body_bytes,
                },
                is_dev: cfg.is_dev(),
                server_header: format!("vix/{}", env!("CARGO_PKG_VERSION")),
            },
        }
    }

    /// Build from a loaded `Config` rather than defaults.
    pub fn from_config(router: Router, cfg: &Config) -> Self {
        let mut builder = Self::new(router);
        builder.addr = cfg.server_addr();
        builder.executor_threads = cfg.io_threads.max(1);
        builder.executor_max_threads = (cfg.io_threads * 4).max(4);
        builder.opts.read_timeout = Duration::from_secs(cfg.session_timeout_sec);
        builder.opts.task_timeout = Duration::from_millis(cfg.request_timeout_ms);
        builder.opts.waf = WafConfig {
            mode: cfg.waf_mode,
            max_target_len: cfg.waf_max_target_len,
            max_body_bytes: cfg.waf_max_body_bytes,
        };
        builder.opts.is_dev = cfg.is_dev();
        builder.access_logs = cfg.access_logs;
        builder
    }

    pub fn bind(mut self, addr: impl Into<String>) -> Self {
        self.addr = addr.into();
        self
    }

    pub fn executor_threads(mut self, threads: usize, max_threads: usize) -> Self {
        self.executor_threads = threads;
        self.executor_max_threads = max_threads;
        self
    }

    /// Bind the listener and construct the running `Server`. Does not start
    /// accepting yet — call [`Server::serve`] for that.
    pub async fn build(self) -> Result<Server> {
        let addr: SocketAddr = self
            .addr
            .parse()
            .map_err(|_| crate::errors::Error::Parse(format!("invalid bind address: {}", self.addr)))?;

        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.set_reuseaddr(true)?;
        socket.bind(addr)?;
        let listener = socket.listen(1024)?;
        let bound_port = listener.local_addr()?.port();

        let executor = Executor::new(
            self.executor_threads,
            self.executor_max_threads,
            0,
            self.executor_max_periodic,
        );

        let mut router = self.router;
        if self.access_logs {
            router.use_mw_outermost(access_log::access_log_middleware());
        }
        let router = router.freeze();
        let session_opts = Arc::new(SessionOptions {
            max_body_bytes: self.opts.max_body_bytes,
            read_timeout: self.opts.read_timeout,
            task_timeout: self.opts.task_timeout,
            waf: self.opts.waf,
            is_dev: self.opts.is_dev,
            server_header: self.opts.server_header,
        });

        Ok(Server {
            listener,
            router,
            executor,
            session_opts,
            bound_port: AtomicU16::new(bound_port),
            shutdown_tx: tokio::sync::watch::Sender::new(false),
        })
    }
}

/// A bound, not-yet-serving server. Wrap in `Arc` and call `serve()` to
/// start accepting; call `stop()` from another handle to the same `Arc` to
/// request shutdown.
pub struct Server {
    listener: TcpListener,
    router: Arc<Router>,
    executor: Arc<Executor>,
    session_opts: Arc<SessionOptions>,
    bound_port: AtomicU16,
    shutdown_tx: tokio::sync::watch::Sender<bool>,
}

impl Server {
    pub fn router(router: Router) -> ServerBuilder {
        ServerBuilder::new(router)
    }

    /// The TCP port actually bound — useful when constructed with port `0`.
    pub fn bound_port(&self) -> u16 {
        self.bound_port.load(Ordering::Relaxed)
    }

    pub fn executor(&self) -> &Arc<Executor> {
        &self.executor
    }

    /// Accept connections until `stop()` is called. Each connection is
    /// spawned as its own session task.
    pub async fn serve(self: Arc<Self>) {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        info!(port = self.bound_port(), "server accepting connections");

        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.changed() => {
                    break;
                }
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            let _ = stream.set_nodelay(true);
                            let session = Session::new(
                                stream,
                                peer,
                                self.router.clone(),
                                self.executor.clone(),
                                self.session_opts.clone(),
                            );
                            tokio::spawn(session.run());
                        }
                        Err(e) => error!(error = %e, "accept failed"),
                    }
                }
            }
        }

        info!("server accept loop stopped");
    }

    /// Signal the accept loop to stop taking new connections.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// `stop()` plus wait for the executor to drain in-flight heavy tasks.
    pub fn stop_blocking(&self) {
        self.stop();
        self.executor.wait_idle();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::HandlerFn;
    use crate::router::{RouteDoc, RouteOptions};
    use crate::http::types::Method;

    #[tokio::test]
    async fn bound_port_is_nonzero_on_ephemeral_bind() {
        let mut router = Router::new();
        let handler: HandlerFn = std::sync::Arc::new(|ctx| Box::pin(async move { ctx }));
        router.add_route(Method::Get, "/ping", handler, RouteOptions::default(), RouteDoc::default());

        let server = ServerBuilder::new(router)
            .bind("127.0.0.1:0")
            .build()
            .await
            .expect("bind should succeed");

        assert_ne!(server.bound_port(), 0);
    }
}
