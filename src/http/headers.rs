//! Header fields as they appear on the wire.
//!
//! Names compare case-insensitively and entries keep arrival order. Lookups
//! are first-value-wins: when a name repeats, [`Headers::get`] returns the
//! value that arrived first. [`Headers::get_all`] exposes the rest.

use std::fmt;

use bytes::{BufMut, BytesMut};

/// An ordered, case-insensitive multi-map of header fields.
///
/// # Examples
///
/// ```
/// use switchyard::http::Headers;
///
/// let mut headers = Headers::new();
/// headers.insert("Connection", "keep-alive, Upgrade");
/// headers.insert("X-Trace", "a");
/// headers.insert("x-trace", "b");
///
/// assert!(headers.has_token("connection", "upgrade"));
/// assert_eq!(headers.get("X-TRACE"), Some("a"));
/// assert_eq!(headers.get_all("x-trace").count(), 2);
/// ```
#[derive(Debug, Clone, Default)]
pub struct Headers {
    fields: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a field. Earlier fields with the same name are kept.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields.push((name.into(), value.into()));
    }

    /// Replaces every field named `name` with a single `name: value` field.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.remove(&name);
        self.fields.push((name, value.into()));
    }

    /// Adds one `Name: value` line from a request head.
    ///
    /// The line is split on its first colon and both sides are trimmed.
    /// Returns `false`, adding nothing, for a line without a colon.
    pub fn push_line(&mut self, line: &str) -> bool {
        match line.split_once(':') {
            Some((name, value)) => {
                self.insert(name.trim(), value.trim());
                true
            }
            None => false,
        }
    }

    /// Whether the comma-separated field `name` lists `token`, ignoring case,
    /// as in `Connection: keep-alive, Upgrade`.
    pub fn has_token(&self, name: &str, token: &str) -> bool {
        self.get_all(name)
            .flat_map(|value| value.split(','))
            .any(|item| item.trim().eq_ignore_ascii_case(token))
    }

    /// The first value of `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(field, _)| field.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Every value of `name`, in arrival order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.fields
            .iter()
            .filter(move |(field, _)| field.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Drops every field named `name`. Returns whether anything was dropped.
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.fields.len();
        self.fields.retain(|(field, _)| !field.eq_ignore_ascii_case(name));
        self.fields.len() != before
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Number of fields, counting repeated names separately.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value.as_str()))
    }

    /// Writes every field as a `Name: value\r\n` line.
    pub fn encode(&self, buf: &mut BytesMut) {
        for (name, value) in &self.fields {
            buf.reserve(name.len() + value.len() + 4);
            buf.put_slice(name.as_bytes());
            buf.put_slice(b": ");
            buf.put_slice(value.as_bytes());
            buf.put_slice(b"\r\n");
        }
    }
}

impl fmt::Display for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fields
            .iter()
            .try_for_each(|(name, value)| write!(f, "{name}: {value}\r\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Headers {
        let mut h = Headers::new();
        h.insert("Host", "a.example");
        h.insert("Accept", "*/*");
        h.insert("host", "b.example");
        h
    }

    #[test]
    fn lookups_ignore_case_and_prefer_first() {
        let h = sample();
        assert_eq!(h.get("HOST"), Some("a.example"));
        assert_eq!(h.get_all("Host").collect::<Vec<_>>(), ["a.example", "b.example"]);
        assert!(h.contains("accept"));
        assert!(!h.contains("cookie"));
        assert_eq!(h.len(), 3);
    }

    #[test]
    fn set_and_remove() {
        let mut h = sample();
        h.set("HOST", "c.example");
        assert_eq!(h.get_all("host").collect::<Vec<_>>(), ["c.example"]);

        assert!(h.remove("accept"));
        assert!(!h.remove("accept"));
        assert_eq!(h.len(), 1);
    }

    #[test]
    fn header_lines() {
        let mut h = Headers::new();
        assert!(h.push_line("Content-Length:  12 "));
        assert!(h.push_line("X-Time: 10:30"));
        assert!(!h.push_line("garbage"));
        assert_eq!(h.get("content-length"), Some("12"));
        assert_eq!(h.get("x-time"), Some("10:30"));
        assert_eq!(h.len(), 2);
    }

    #[test]
    fn token_lists() {
        let mut h = Headers::new();
        h.insert("Connection", "keep-alive, Upgrade");
        assert!(h.has_token("connection", "upgrade"));
        assert!(h.has_token("connection", "Keep-Alive"));
        assert!(!h.has_token("connection", "close"));
    }

    #[test]
    fn wire_encoding_keeps_order() {
        let mut buf = BytesMut::new();
        sample().encode(&mut buf);
        assert_eq!(
            &buf[..],
            b"Host: a.example\r\nAccept: */*\r\nhost: b.example\r\n"
        );
        assert_eq!(sample().to_string().as_bytes(), &buf[..]);
    }
}
