//! vix: an embeddable HTTP/1.1 application server library.
//!
//! A [`Router`] collects routes and middleware, a [`Server`] binds a socket
//! and drives one [`session`] per connection, and an [`Executor`] runs
//! routes marked heavy off the accepting task. [`Config`] loads the whole
//! stack's tunables from the environment.

pub mod access_log;
pub mod config;
pub mod errors;
pub mod executor;
pub mod http;
pub mod logging;
pub mod middleware;
pub mod router;
pub mod server;
pub mod session;
pub mod state;
pub mod waf;

pub use config::Config;
pub use errors::{Error, Result};
pub use executor::{Executor, TaskOptions};
pub use http::{Headers, Method, Request, Response, Version};
pub use middleware::{Context, HandlerFn, MiddlewareFn, Next};
pub use router::{Dispatch, RouteDoc, RouteOptions, Router};
pub use server::{Server, ServerBuilder};
pub use session::{Session, SessionOptions};
pub use state::StateBag;
pub use waf::{WafConfig, WafMode};
