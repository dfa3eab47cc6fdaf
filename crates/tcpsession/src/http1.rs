//! HTTP/1.x completeness scanning and typed message views.
//!
//! A reassembled message is a byte buffer; whether it is a *finished* HTTP
//! message is decided here: headers fully received, and the body either
//! satisfies its `Content-Length`, ends with the terminal chunk of a
//! chunked transfer, or is absent by the rules of RFC 7230 §3.3.3.

use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri};

/// HTTP request parsed out of reassembled bytes.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    /// Request method
    pub method: Method,
    /// Request target
    pub uri: Uri,
    /// Header fields, multi-valued headers preserved
    pub headers: HeaderMap,
    /// Decoded body (chunked bodies are de-chunked)
    pub body: Vec<u8>,
}

/// HTTP response parsed out of reassembled bytes.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// Status code
    pub status: StatusCode,
    /// Header fields, multi-valued headers preserved
    pub headers: HeaderMap,
    /// Decoded body (chunked bodies are de-chunked)
    pub body: Vec<u8>,
}

/// How the end of a message body is delimited (RFC 7230 §3.3.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Framing {
    /// `Content-Length: n`
    ContentLength(usize),
    /// `Transfer-Encoding: chunked`
    Chunked,
    /// Neither header present
    Unframed,
}

/// Check if data starts like an HTTP/1.x request line.
pub fn is_request(data: &[u8]) -> bool {
    const METHODS: [&[u8]; 8] = [
        b"GET ", b"POST ", b"PUT ", b"DELETE ", b"HEAD ", b"OPTIONS ", b"PATCH ", b"CONNECT ",
    ];
    METHODS.iter().any(|m| data.starts_with(m))
}

/// Check if data starts like an HTTP/1.x status line.
pub fn is_response(data: &[u8]) -> bool {
    data.starts_with(b"HTTP/1.0") || data.starts_with(b"HTTP/1.1")
}

/// True once `data` holds one complete HTTP/1.x request.
///
/// A request without explicit framing is complete at the end of its
/// headers, unless the method ordinarily carries a body (POST, PUT,
/// PATCH) — then the body is still in flight and the message is not done.
pub fn request_complete(data: &[u8]) -> bool {
    let mut headers = [httparse::EMPTY_HEADER; 64];
    let mut req = httparse::Request::new(&mut headers);
    let Ok(httparse::Status::Complete(offset)) = req.parse(data) else {
        return false;
    };
    let body = &data[offset..];
    match framing(req.headers) {
        Some(Framing::ContentLength(n)) => body.len() >= n,
        Some(Framing::Chunked) => walk_chunks(body, |_| {}).is_some(),
        Some(Framing::Unframed) => !method_expects_body(req.method),
        None => false,
    }
}

/// True once `data` holds one complete HTTP/1.x response.
///
/// Responses without framing use read-until-close semantics, which a
/// passive observer cannot witness; they are never complete here and are
/// surfaced by the expiration sweep instead.
pub fn response_complete(data: &[u8]) -> bool {
    let mut headers = [httparse::EMPTY_HEADER; 64];
    let mut res = httparse::Response::new(&mut headers);
    let Ok(httparse::Status::Complete(offset)) = res.parse(data) else {
        return false;
    };
    let body = &data[offset..];
    match framing(res.headers) {
        Some(Framing::ContentLength(n)) => body.len() >= n,
        Some(Framing::Chunked) => walk_chunks(body, |_| {}).is_some(),
        Some(Framing::Unframed) => res.code.is_some_and(bodiless_status),
        None => false,
    }
}

/// Parse a complete request; `None` while headers or body are still
/// partial.
pub fn try_parse_request(data: &[u8]) -> Option<HttpRequest> {
    let mut headers = [httparse::EMPTY_HEADER; 64];
    let mut req = httparse::Request::new(&mut headers);
    let Ok(httparse::Status::Complete(offset)) = req.parse(data) else {
        return None;
    };

    let body = match framing(req.headers)? {
        Framing::ContentLength(n) => {
            let body = &data[offset..];
            if body.len() < n {
                return None;
            }
            body[..n].to_vec()
        }
        Framing::Chunked => decode_chunked(&data[offset..])?,
        Framing::Unframed => {
            if method_expects_body(req.method) {
                return None;
            }
            Vec::new()
        }
    };

    Some(HttpRequest {
        method: Method::from_bytes(req.method?.as_bytes()).ok()?,
        uri: req.path?.parse().ok()?,
        headers: header_map(req.headers),
        body,
    })
}

/// Parse a complete response; `None` while headers or body are still
/// partial (including unframed bodies, which only end at connection
/// close).
pub fn try_parse_response(data: &[u8]) -> Option<HttpResponse> {
    let mut headers = [httparse::EMPTY_HEADER; 64];
    let mut res = httparse::Response::new(&mut headers);
    let Ok(httparse::Status::Complete(offset)) = res.parse(data) else {
        return None;
    };

    let body = match framing(res.headers)? {
        Framing::ContentLength(n) => {
            let body = &data[offset..];
            if body.len() < n {
                return None;
            }
            body[..n].to_vec()
        }
        Framing::Chunked => decode_chunked(&data[offset..])?,
        Framing::Unframed => {
            if !res.code.is_some_and(bodiless_status) {
                return None;
            }
            Vec::new()
        }
    };

    Some(HttpResponse {
        status: StatusCode::from_u16(res.code?).ok()?,
        headers: header_map(res.headers),
        body,
    })
}

/// Methods that ordinarily carry a body even without framing headers.
fn method_expects_body(method: Option<&str>) -> bool {
    matches!(method, Some("POST") | Some("PUT") | Some("PATCH"))
}

/// 1xx, 204 and 304 responses have no body regardless of headers.
fn bodiless_status(code: u16) -> bool {
    (100..200).contains(&code) || code == 204 || code == 304
}

/// Determine body framing from the header fields. `None` means the
/// framing headers are present but unusable (for instance a non-numeric
/// `Content-Length`), which can never complete.
fn framing(headers: &[httparse::Header<'_>]) -> Option<Framing> {
    for h in headers {
        if h.name.eq_ignore_ascii_case("Content-Length") {
            let n = std::str::from_utf8(h.value).ok()?.trim().parse().ok()?;
            return Some(Framing::ContentLength(n));
        }
    }
    for h in headers {
        if h.name.eq_ignore_ascii_case("Transfer-Encoding")
            && let Ok(value) = std::str::from_utf8(h.value)
            && value.to_ascii_lowercase().contains("chunked")
        {
            return Some(Framing::Chunked);
        }
    }
    Some(Framing::Unframed)
}

fn header_map(headers: &[httparse::Header<'_>]) -> HeaderMap {
    let mut map = HeaderMap::new();
    for h in headers {
        if let Ok(name) = HeaderName::from_bytes(h.name.as_bytes())
            && let Ok(value) = HeaderValue::from_bytes(h.value)
        {
            map.append(name, value);
        }
    }
    map
}

/// Walk chunk boundaries, feeding each chunk's data to `sink`. Returns the
/// offset just past the terminal chunk, or `None` while the body is
/// incomplete or malformed.
///
/// Chunk format: `[hex-size][;ext]\r\n[data]\r\n`, terminated by
/// `0\r\n\r\n` (possibly with trailer fields before the final CRLF).
fn walk_chunks(data: &[u8], mut sink: impl FnMut(&[u8])) -> Option<usize> {
    let mut pos = 0;

    loop {
        let line_end = find(data, pos, b"\r\n")?;
        let size_line = &data[pos..line_end];
        let size_part = match size_line.iter().position(|&b| b == b';') {
            Some(semi) => &size_line[..semi],
            None => size_line,
        };
        let size_str = std::str::from_utf8(size_part).ok()?;
        let chunk_size = usize::from_str_radix(size_str.trim(), 16).ok()?;
        pos = line_end + 2;

        if chunk_size == 0 {
            // Terminal chunk: a bare CRLF, or trailer fields ending in one.
            if pos + 2 > data.len() {
                return None;
            }
            if &data[pos..pos + 2] == b"\r\n" {
                return Some(pos + 2);
            }
            return find(data, pos, b"\r\n\r\n").map(|at| at + 4);
        }

        if pos + chunk_size + 2 > data.len() {
            return None;
        }
        sink(&data[pos..pos + chunk_size]);
        pos += chunk_size;
        if &data[pos..pos + 2] != b"\r\n" {
            return None;
        }
        pos += 2;
    }
}

/// Decode a chunked body into contiguous bytes, or `None` if incomplete.
pub(crate) fn decode_chunked(data: &[u8]) -> Option<Vec<u8>> {
    let mut decoded = Vec::new();
    walk_chunks(data, |chunk| decoded.extend_from_slice(chunk))?;
    Some(decoded)
}

/// Position of `needle` in `data` at or after `from`.
fn find(data: &[u8], from: usize, needle: &[u8]) -> Option<usize> {
    if from >= data.len() {
        return None;
    }
    data[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| from + p)
}
