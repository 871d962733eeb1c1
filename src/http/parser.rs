//! Incremental HTTP/1.1 request-line + header + body parser.
//!
//! Owned rather than zero-copy: the session reads into a growing `Vec<u8>`
//! across possibly many `read()` calls, so there is no single buffer whose
//! lifetime could anchor borrowed slices the way a single-shot parse could.

use std::collections::HashMap;

use super::headers::Headers;
use super::request::Request;
use super::types::{Method, Version};

pub const MAX_HEADERS: usize = 64;

#[derive(Debug)]
pub enum ParseError {
    Incomplete,
    InvalidFormat(&'static str),
    TooManyHeaders,
}

pub struct Parsed {
    pub request: Request,
    /// Bytes consumed from the front of the buffer.
    pub consumed: usize,
}

/// Try to parse one full request out of `buf`. `Ok(None)` means more bytes
/// are needed; the caller should read more and retry from the start.
pub fn try_parse(buf: &[u8], max_body_bytes: usize) -> Result<Option<Parsed>, ParseError> {
    let header_end = match find_header_end(buf) {
        Some(idx) => idx,
        None => return Ok(None),
    };

    let head = &buf[..header_end];
    let mut lines = head.split(|&b| b == b'\n').map(strip_cr);

    let request_line = lines.next().ok_or(ParseError::InvalidFormat("empty request"))?;
    let (method, target, version) = parse_request_line(request_line)?;

    let mut headers = Headers::new();
    let mut content_length: Option<usize> = None;
    let mut chunked = false;
    let mut count = 0usize;

    for line in lines {
        if line.is_empty() {
            continue;
        }
        count += 1;
        if count > MAX_HEADERS {
            return Err(ParseError::TooManyHeaders);
        }
        let colon = line
            .iter()
            .position(|&b| b == b':')
            .ok_or(ParseError::InvalidFormat("header missing colon"))?;
        let name = std::str::from_utf8(&line[..colon])
            .map_err(|_| ParseError::InvalidFormat("non-utf8 header name"))?
            .trim();
        let value = std::str::from_utf8(&line[colon + 1..])
            .map_err(|_| ParseError::InvalidFormat("non-utf8 header value"))?
            .trim();

        if name.eq_ignore_ascii_case("content-length") {
            content_length = Some(
                value
                    .parse()
                    .map_err(|_| ParseError::InvalidFormat("bad content-length"))?,
            );
        } else if name.eq_ignore_ascii_case("transfer-encoding")
            && value.eq_ignore_ascii_case("chunked")
        {
            chunked = true;
        }
        headers.insert_raw(name.to_string(), value.to_string());
    }

    let body_start = header_end + 4; // past the terminating "\r\n\r\n"
    let remaining = &buf[body_start..];

    let (body, body_consumed) = if chunked {
        match decode_chunked(remaining, max_body_bytes)? {
            Some(v) => v,
            None => return Ok(None),
        }
    } else {
        let expected = content_length.unwrap_or(0);
        if expected > max_body_bytes {
            return Err(ParseError::InvalidFormat("body exceeds configured limit"));
        }
        if remaining.len() < expected {
            return Ok(None);
        }
        (remaining[..expected].to_vec(), expected)
    };

    let request = Request::new(method, version, target, headers, body);

    Ok(Some(Parsed {
        request,
        consumed: body_start + body_consumed,
    }))
}

fn strip_cr(line: &[u8]) -> &[u8] {
    if line.last() == Some(&b'\r') {
        &line[..line.len() - 1]
    } else {
        line
    }
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    memchr::memmem::find(buf, b"\r\n\r\n")
}

fn parse_request_line(line: &[u8]) -> Result<(Method, String, Version), ParseError> {
    let text =
        std::str::from_utf8(line).map_err(|_| ParseError::InvalidFormat("non-utf8 request line"))?;
    let mut parts = text.split(' ');
    let method_str = parts.next().ok_or(ParseError::InvalidFormat("missing method"))?;
    let target = parts.next().ok_or(ParseError::InvalidFormat("missing target"))?;
    let version_str = parts.next().ok_or(ParseError::InvalidFormat("missing version"))?;

    let method = Method::from_bytes(method_str.as_bytes())
        .ok_or(ParseError::InvalidFormat("unsupported method"))?;
    let version = match version_str {
        "HTTP/1.1" => Version::Http11,
        "HTTP/1.0" => Version::Http10,
        _ => return Err(ParseError::InvalidFormat("unsupported version")),
    };

    Ok((method, target.to_string(), version))
}

/// Decode `Transfer-Encoding: chunked` data, returning the decoded body and
/// the number of raw bytes consumed, or `None` if the chunk stream isn't
/// fully available yet.
fn decode_chunked(
    buf: &[u8],
    max_body_bytes: usize,
) -> Result<Option<(Vec<u8>, usize)>, ParseError> {
    let mut out = Vec::new();
    let mut pos = 0usize;

    loop {
        let line_end = match memchr::memchr2(b'\r', b'\n', &buf[pos..]) {
            Some(i) => pos + i,
            None => return Ok(None),
        };
        if line_end + 1 >= buf.len() || buf[line_end] != b'\r' || buf[line_end + 1] != b'\n' {
            return Ok(None);
        }
        let size_str = std::str::from_utf8(&buf[pos..line_end])
            .map_err(|_| ParseError::InvalidFormat("bad chunk size"))?;
        let chunk_len = usize::from_str_radix(size_str.trim(), 16)
            .map_err(|_| ParseError::InvalidFormat("bad chunk size"))?;

        let data_start = line_end + 2;
        if chunk_len == 0 {
            let trailer_end = data_start + 2;
            if buf.len() < trailer_end {
                return Ok(None);
            }
            return Ok(Some((out, trailer_end)));
        }

        if out.len() + chunk_len > max_body_bytes {
            return Err(ParseError::InvalidFormat("chunked body exceeds configured limit"));
        }

        let data_end = data_start + chunk_len;
        if buf.len() < data_end + 2 {
            return Ok(None);
        }
        out.extend_from_slice(&buf[data_start..data_end]);
        pos = data_end + 2;
    }
}

/// `?a=1&a=2&b=` -> last value wins, used by both `Request::query` and the
/// extractor layer.
pub fn parse_query(raw: &str) -> HashMap<String, String> {
    super::query::parse(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_basic_request() {
        let raw = b"GET /some/path?foo=bar HTTP/1.1\r\nHost: localhost\r\nContent-Length: 11\r\n\r\nBodyContent";
        let parsed = try_parse(raw, 1 << 20).unwrap().unwrap();
        assert_eq!(parsed.request.method, Method::Get);
        assert_eq!(parsed.request.path, "/some/path");
        assert_eq!(parsed.request.body, b"BodyContent");
        assert_eq!(parsed.consumed, raw.len());
    }

    #[test]
    fn incomplete_request_returns_none() {
        let raw = b"GET /some/path?foo=bar HTT";
        assert!(try_parse(raw, 1 << 20).unwrap().is_none());
    }

    #[test]
    fn chunked_body_decodes() {
        let raw = b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n4\r\nWiki\r\n5\r\npedia\r\n0\r\n\r\n";
        let parsed = try_parse(raw, 1 << 20).unwrap().unwrap();
        assert_eq!(parsed.request.body, b"Wikipedia");
    }

    #[test]
    fn oversized_content_length_rejected() {
        let raw = b"POST / HTTP/1.1\r\nContent-Length: 99999999\r\n\r\n";
        assert!(matches!(
            try_parse(raw, 1024),
            Err(ParseError::InvalidFormat(_))
        ));
    }
}
