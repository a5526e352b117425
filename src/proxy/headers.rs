//! Hop-by-hop header stripping.
//!
//! # Responsibilities
//! - Drop headers that only apply to a single transport leg
//! - Drop `content-length` on the outbound request path
//!
//! # Design Decisions
//! - Returns a fresh map; the caller's headers are never touched
//! - Matching is case-insensitive (`HeaderName` is always lowercase)

use http::header::{HeaderMap, HeaderName, CONTENT_LENGTH};

/// Headers never relayed in either direction.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "public",
    "proxy-authenticate",
    "transfer-encoding",
    "upgrade",
];

/// Which leg of the relay a header map is travelling on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Inbound request headers about to be sent to the origin.
    Request,
    /// Origin response headers about to be sent back to the caller.
    Response,
}

/// Returns true if `name` must not cross the proxy in `direction`.
pub fn is_stripped(name: &HeaderName, direction: Direction) -> bool {
    if direction == Direction::Request && name == CONTENT_LENGTH {
        return true;
    }
    HOP_BY_HOP.contains(&name.as_str())
}

/// Copy `headers` without hop-by-hop (and, for requests, framing) headers.
///
/// Multi-valued headers keep all of their values in their original order.
pub fn sanitize(headers: &HeaderMap, direction: Direction) -> HeaderMap {
    let mut clean = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers.iter() {
        if !is_stripped(name, direction) {
            clean.append(name.clone(), value.clone());
        }
    }
    clean
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.append(
                HeaderName::from_bytes(k.as_bytes()).unwrap(),
                HeaderValue::from_str(v).unwrap(),
            );
        }
        map
    }

    #[test]
    fn strips_hop_by_hop_in_any_casing() {
        let input = headers(&[
            ("Connection", "keep-alive"),
            ("KEEP-ALIVE", "timeout=5"),
            ("Public", "GET"),
            ("Proxy-Authenticate", "Basic"),
            ("Transfer-Encoding", "chunked"),
            ("UpGrade", "websocket"),
            ("X-Foo", "bar"),
        ]);

        for direction in [Direction::Request, Direction::Response] {
            let clean = sanitize(&input, direction);
            assert_eq!(clean.len(), 1);
            assert_eq!(clean.get("x-foo").unwrap(), "bar");
        }
    }

    #[test]
    fn content_length_only_stripped_on_requests() {
        let input = headers(&[("Content-Length", "5"), ("Content-Type", "text/plain")]);

        let request = sanitize(&input, Direction::Request);
        assert!(request.get(CONTENT_LENGTH).is_none());
        assert_eq!(request.get("content-type").unwrap(), "text/plain");

        let response = sanitize(&input, Direction::Response);
        assert_eq!(response.get(CONTENT_LENGTH).unwrap(), "5");
    }

    #[test]
    fn input_is_left_untouched() {
        let input = headers(&[("Connection", "close"), ("Accept", "*/*")]);
        let before = input.clone();
        let _ = sanitize(&input, Direction::Request);
        assert_eq!(input, before);
    }

    #[test]
    fn keeps_every_value_of_repeated_headers() {
        let input = headers(&[("Set-Cookie", "a=1"), ("Set-Cookie", "b=2"), ("Upgrade", "h2c")]);
        let clean = sanitize(&input, Direction::Response);
        let cookies: Vec<_> = clean.get_all("set-cookie").iter().collect();
        assert_eq!(cookies, ["a=1", "b=2"]);
    }
}
