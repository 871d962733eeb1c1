//! Layer-7 request filtering gate, applied after a request is read and
//! before it is dispatched to the router.

use std::sync::OnceLock;

use regex::Regex;

use crate::http::request::Request;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WafMode {
    Off,
    Basic,
    Strict,
}

impl std::str::FromStr for WafMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "off" => Ok(WafMode::Off),
            "strict" => Ok(WafMode::Strict),
            _ => Ok(WafMode::Basic),
        }
    }
}

fn xss_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?is)<script.*?>.*?</script>").expect("static XSS regex is valid")
    })
}

fn sql_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(UNION|SELECT|INSERT|DELETE|UPDATE|DROP)\b")
            .expect("static SQL regex is valid")
    })
}

pub struct WafConfig {
    pub mode: WafMode,
    pub max_target_len: usize,
    pub max_body_bytes: usize,
}

/// Apply the WAF rules in spec order; `true` means accept the request.
pub fn check(req: &Request, cfg: &WafConfig) -> bool {
    if cfg.mode == WafMode::Off {
        return true;
    }

    if req.target.len() > cfg.max_target_len
        || req.target.bytes().any(|b| matches!(b, 0 | b'\r' | b'\n'))
    {
        return false;
    }

    let lowered_target = req.target.to_ascii_lowercase();
    let suspicious = ["<", "script", "union", "select", "drop"]
        .iter()
        .any(|needle| lowered_target.contains(needle));
    if suspicious {
        match std::panic::catch_unwind(|| xss_regex().is_match(&req.target)) {
            Ok(true) => return false,
            Ok(false) => {} // suspicious but not a match: fall through to later checks
            Err(_) => return false, // fail closed on regex evaluation error
        }
    }

    if !req.method.is_mutating() {
        return true;
    }

    if req.body.is_empty() {
        return true;
    }

    if req.body.len() > cfg.max_body_bytes {
        return false;
    }

    let body_text = String::from_utf8_lossy(&req.body);
    let lowered_body = body_text.to_ascii_lowercase();
    let body_trigger = lowered_body.contains('<')
        || ["union", "select", "drop", "insert", "delete", "update"]
            .iter()
            .any(|needle| lowered_body.contains(needle));

    if cfg.mode == WafMode::Basic && !body_trigger {
        return true;
    }

    match (
        std::panic::catch_unwind(|| sql_regex().is_match(&body_text)),
        std::panic::catch_unwind(|| xss_regex().is_match(&body_text)),
    ) {
        (Ok(sql_hit), Ok(xss_hit)) => !(sql_hit || xss_hit),
        _ => false, // fail closed on any regex evaluation error
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::types::{Method, Version};
    use crate::http::Headers;

    fn req(method: Method, target: &str, body: &[u8]) -> Request {
        Request::new(method, Version::Http11, target.to_string(), Headers::new(), body.to_vec())
    }

    fn cfg(mode: WafMode) -> WafConfig {
        WafConfig {
            mode,
            max_target_len: 4096,
            max_body_bytes: 1024 * 1024,
        }
    }

    #[test]
    fn off_mode_accepts_everything() {
        let r = req(Method::Post, "/x", b"UNION SELECT * FROM users");
        assert!(check(&r, &cfg(WafMode::Off)));
    }

    #[test]
    fn strict_mode_rejects_sqli_body() {
        let r = req(Method::Post, "/login", b"UNION SELECT * FROM users");
        assert!(!check(&r, &cfg(WafMode::Strict)));
    }

    #[test]
    fn get_requests_skip_body_inspection() {
        let r = req(Method::Get, "/search?q=union", b"");
        // "union" in the query makes the target suspicious but doesn't match
        // the XSS regex, so it falls through; body is empty -> accept.
        assert!(check(&r, &cfg(WafMode::Strict)));
    }

    #[test]
    fn overlong_target_rejected() {
        let long = "/".to_string() + &"a".repeat(5000);
        let r = req(Method::Get, &long, b"");
        assert!(!check(&r, &cfg(WafMode::Basic)));
    }

    #[test]
    fn basic_mode_without_trigger_accepts() {
        let r = req(Method::Post, "/items", b"{\"name\":\"widget\"}");
        assert!(check(&r, &cfg(WafMode::Basic)));
    }

    #[test]
    fn script_tag_rejected() {
        let r = req(Method::Get, "/<script>alert(1)</script>", b"");
        assert!(!check(&r, &cfg(WafMode::Basic)));
    }
}
