//! Internal request record built by the framing layer.
//!
//! Matching and forwarding both consume this snapshot of the incoming
//! request: the query is kept raw for bit-identical forwarding and parsed
//! into an ordered multimap for matching; header names are lowercased once
//! here so every downstream comparison is case-insensitive for free.

use bytes::Bytes;
use hyper::HeaderMap;
use std::collections::HashMap;

/// Snapshot of an incoming request.
#[derive(Debug, Clone, Default)]
pub struct RequestRecord {
    pub method: String,
    /// Path without the query component.
    pub path: String,
    /// Original query string, exactly as the client sent it.
    pub raw_query: Option<String>,
    /// Parsed query multimap, in wire order.
    pub query: Vec<(String, String)>,
    /// Header multimap with lowercased names.
    pub headers: HashMap<String, Vec<String>>,
    /// Raw body bytes.
    pub body: Bytes,
}

impl RequestRecord {
    pub fn new(method: &hyper::Method, uri: &hyper::Uri, headers: &HeaderMap, body: Bytes) -> Self {
        let raw_query = uri.query().map(str::to_string);
        let query = raw_query.as_deref().map(parse_query).unwrap_or_default();

        let mut header_map: HashMap<String, Vec<String>> = HashMap::new();
        for (name, value) in headers {
            header_map
                .entry(name.as_str().to_lowercase())
                .or_default()
                .push(String::from_utf8_lossy(value.as_bytes()).into_owned());
        }

        RequestRecord {
            method: method.as_str().to_string(),
            path: uri.path().to_string(),
            raw_query,
            query,
            headers: header_map,
            body,
        }
    }

    /// Best-effort UTF-8 view of the body.
    pub fn body_text(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }

    /// Iterate the query as a name→values multimap.
    pub fn query_entries(&self) -> Vec<(String, Vec<String>)> {
        let mut out: Vec<(String, Vec<String>)> = Vec::new();
        for (name, value) in &self.query {
            match out.iter_mut().find(|(n, _)| n == name) {
                Some((_, values)) => values.push(value.clone()),
                None => out.push((name.clone(), vec![value.clone()])),
            }
        }
        out
    }

    /// The query to forward upstream: the raw form when available,
    /// otherwise rebuilt from the parsed multimap with stable encoding.
    pub fn forward_query(&self) -> Option<String> {
        if let Some(raw) = &self.raw_query {
            return Some(raw.clone());
        }
        if self.query.is_empty() {
            return None;
        }
        Some(encode_query(&self.query))
    }
}

/// Parse a raw query string into ordered pairs, percent-decoding both
/// sides. Bare keys parse with an empty value; empty segments are skipped.
pub fn parse_query(raw: &str) -> Vec<(String, String)> {
    raw.split('&')
        .filter(|segment| !segment.is_empty())
        .map(|segment| {
            let (key, value) = match segment.split_once('=') {
                Some((k, v)) => (k, v),
                None => (segment, ""),
            };
            (decode_component(key), decode_component(value))
        })
        .collect()
}

/// Stable re-encoding of parsed query pairs, preserving pair order.
pub fn encode_query(pairs: &[(String, String)]) -> String {
    pairs
        .iter()
        .map(|(k, v)| {
            if v.is_empty() {
                urlencoding::encode(k).into_owned()
            } else {
                format!("{}={}", urlencoding::encode(k), urlencoding::encode(v))
            }
        })
        .collect::<Vec<_>>()
        .join("&")
}

fn decode_component(component: &str) -> String {
    let plus_decoded = component.replace('+', " ");
    urlencoding::decode(&plus_decoded)
        .map(|c| c.into_owned())
        .unwrap_or(plus_decoded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_query_multivalued() {
        let pairs = parse_query("a=1&a=2&b=x");
        assert_eq!(
            pairs,
            vec![
                ("a".to_string(), "1".to_string()),
                ("a".to_string(), "2".to_string()),
                ("b".to_string(), "x".to_string()),
            ]
        );
    }

    #[test]
    fn parse_query_decodes() {
        let pairs = parse_query("name=hello%20world&flag");
        assert_eq!(pairs[0].1, "hello world");
        assert_eq!(pairs[1], ("flag".to_string(), String::new()));
    }

    #[test]
    fn encode_query_round_trips_order() {
        let pairs = parse_query("a=1&a=2&b=c%2Fd");
        assert_eq!(encode_query(&pairs), "a=1&a=2&b=c%2Fd");
    }

    #[test]
    fn record_from_parts() {
        let uri: hyper::Uri = "http://localhost/api/users?a=1&a=2".parse().unwrap();
        let mut headers = HeaderMap::new();
        headers.insert("X-Api-Key", "secret".parse().unwrap());
        headers.append("Accept", "text/plain".parse().unwrap());
        headers.append("accept", "application/json".parse().unwrap());

        let record = RequestRecord::new(
            &hyper::Method::GET,
            &uri,
            &headers,
            Bytes::from_static(b"body"),
        );

        assert_eq!(record.method, "GET");
        assert_eq!(record.path, "/api/users");
        assert_eq!(record.raw_query.as_deref(), Some("a=1&a=2"));
        assert_eq!(record.headers["x-api-key"], vec!["secret"]);
        assert_eq!(record.headers["accept"].len(), 2);
        assert_eq!(record.body_text(), Some("body"));
    }

    #[test]
    fn query_entries_groups_by_name() {
        let record = RequestRecord {
            query: parse_query("a=1&b=x&a=2"),
            ..Default::default()
        };
        let entries = record.query_entries();
        assert_eq!(entries[0].0, "a");
        assert_eq!(entries[0].1, vec!["1", "2"]);
        assert_eq!(entries[1].0, "b");
    }

    #[test]
    fn forward_query_prefers_raw() {
        let record = RequestRecord {
            raw_query: Some("a=%31".to_string()),
            query: parse_query("a=%31"),
            ..Default::default()
        };
        // Raw bytes preserved even though the parsed form decodes them.
        assert_eq!(record.forward_query().as_deref(), Some("a=%31"));
    }
}
