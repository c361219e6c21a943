//! Header list type and the hop-by-hop filtering rules applied at every relay boundary.

/// An ordered list of header name/value pairs, preserving duplicates and original casing
/// the way a wire-level HTTP/1.x message does.
pub type HeaderList = Vec<(String, String)>;

/// The fixed set of hop-by-hop header names a proxy must strip before relaying a message,
/// per RFC 7230 §6.1 plus the de-facto `Proxy-Connection` header.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

#[inline]
pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP.iter().any(|h| h.eq_ignore_ascii_case(name))
}

/// Extra header names nominated by a `Connection:` header's value (e.g. `Connection: X-Foo`
/// means `X-Foo` is also hop-by-hop for this message only).
fn connection_header_tokens(headers: &HeaderList) -> Vec<String> {
    let mut tokens = Vec::new();
    for (name, value) in headers {
        if name.eq_ignore_ascii_case("connection") {
            for tok in value.split(',') {
                let tok = tok.trim();
                if !tok.is_empty() {
                    tokens.push(tok.to_ascii_lowercase());
                }
            }
        }
    }
    tokens
}

/// Returns a copy of `headers` with every hop-by-hop header removed: the fixed set plus
/// anything the message's own `Connection:` header nominates.
pub fn strip_hop_by_hop(headers: &HeaderList) -> HeaderList {
    let extra = connection_header_tokens(headers);
    headers
        .iter()
        .filter(|(name, _)| !is_hop_by_hop(name) && !extra.iter().any(|t| t.eq_ignore_ascii_case(name)))
        .cloned()
        .collect()
}

pub fn get_header<'a>(headers: &'a HeaderList, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_fixed_hop_by_hop_set() {
        let headers = vec![
            ("Host".to_string(), "example.com".to_string()),
            ("Connection".to_string(), "keep-alive".to_string()),
            ("Proxy-Authorization".to_string(), "Basic xyz".to_string()),
        ];
        let filtered = strip_hop_by_hop(&headers);
        assert_eq!(filtered, vec![("Host".to_string(), "example.com".to_string())]);
    }

    #[test]
    fn strips_headers_named_in_connection_value() {
        let headers = vec![
            ("Host".to_string(), "example.com".to_string()),
            ("Connection".to_string(), "X-Foo, Keep-Alive".to_string()),
            ("X-Foo".to_string(), "bar".to_string()),
        ];
        let filtered = strip_hop_by_hop(&headers);
        assert_eq!(filtered, vec![("Host".to_string(), "example.com".to_string())]);
    }

    #[test]
    fn get_header_is_case_insensitive() {
        let headers = vec![("Content-Length".to_string(), "12".to_string())];
        assert_eq!(get_header(&headers, "content-length"), Some("12"));
    }
}
