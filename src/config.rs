//! Environment-driven configuration.
//!
//! Every key has a hardcoded default and can be overridden by an environment
//! variable (optionally loaded from a `.env` file via `dotenvy`). Mirrors the
//! config key table: `server.port`, `server.request_timeout`,
//! `server.io_threads`, `logging.*`, `waf.*`, `session.timeout_sec`.

use crate::waf::WafMode;

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_str_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server_port: u16,
    pub request_timeout_ms: u64,
    pub io_threads: usize,
    pub log_level: String,
    pub log_format: LogFormat,
    pub log_async: bool,
    pub log_queue_max: usize,
    pub log_drop_on_overflow: bool,
    pub access_logs: bool,
    pub docs: bool,
    pub mode: Mode,
    pub waf_mode: WafMode,
    pub waf_max_target_len: usize,
    pub waf_max_body_bytes: usize,
    pub session_timeout_sec: u64,
    pub no_color: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Plain,
    Pretty,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            _ => Ok(LogFormat::Plain),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Dev,
    Run,
}

impl Config {
    /// Load configuration from `.env` (if present) and the process environment.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();

        let server_port: u16 = env_or("VIX_SERVER_PORT", 8080);
        let io_threads: usize = env_or("VIX_IO_THREADS", 0);
        let io_threads = if io_threads == 0 {
            num_cpus::get()
        } else {
            io_threads
        };

        let waf_mode = env_str_or("VIX_WAF_MODE", "basic")
            .parse()
            .unwrap_or(WafMode::Basic);

        let mode = match env_str_or("VIX_MODE", "dev").to_ascii_lowercase().as_str() {
            "run" => Mode::Run,
            _ => Mode::Dev,
        };

        Config {
            server_port,
            request_timeout_ms: env_or("VIX_REQUEST_TIMEOUT_MS", 2000),
            io_threads,
            log_level: env_str_or("VIX_LOG_LEVEL", "info"),
            log_format: env_str_or("VIX_LOG_FORMAT", "plain").parse().unwrap(),
            log_async: env_or("VIX_LOG_ASYNC", true),
            log_queue_max: env_or("VIX_LOG_QUEUE_MAX", 20_000),
            log_drop_on_overflow: env_or("VIX_LOG_DROP_ON_OVERFLOW", true),
            access_logs: env_or("VIX_ACCESS_LOGS", true),
            docs: env_or("VIX_DOCS", true),
            mode,
            waf_mode,
            waf_max_target_len: env_or("VIX_WAF_MAX_TARGET_LEN", 4096),
            waf_max_body_bytes: env_or("VIX_WAF_MAX_BODY_BYTES", 1024 * 1024),
            session_timeout_sec: env_or("VIX_SESSION_TIMEOUT_SEC", 20),
            no_color: std::env::var("NO_COLOR").is_ok(),
        }
    }

    pub fn is_dev(&self) -> bool {
        self.mode == Mode::Dev
    }

    pub fn server_addr(&self) -> String {
        format!("0.0.0.0:{}", self.server_port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server_port: 8080,
            request_timeout_ms: 2000,
            io_threads: num_cpus::get(),
            log_level: "info".into(),
            log_format: LogFormat::Plain,
            log_async: true,
            log_queue_max: 20_000,
            log_drop_on_overflow: true,
            access_logs: true,
            docs: true,
            mode: Mode::Dev,
            waf_mode: WafMode::Basic,
            waf_max_target_len: 4096,
            waf_max_body_bytes: 1024 * 1024,
            session_timeout_sec: 20,
            no_color: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_implementation() {
        let cfg = Config::default();
        assert_eq!(cfg.server_port, 8080);
        assert_eq!(cfg.waf_max_target_len, 4096);
        assert_eq!(cfg.waf_max_body_bytes, 1024 * 1024);
        assert_eq!(cfg.session_timeout_sec, 20);
    }
}
