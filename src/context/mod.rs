//! Per-request context handed to handlers and middleware.
//!
//! A [`Context`] bundles the parsed [`Request`] with the path [`Parameters`]
//! captured by the router when it matched the route template.

use std::collections::HashMap;

use serde::de::DeserializeOwned;

use crate::http::{Body, BodyError, Request};

/// Path parameters extracted from the matched route.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct Parameters {
    map: HashMap<String, String>,
}

impl Parameters {
    /// Create a new empty parameters map
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a value into the parameters map
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.map.insert(key.into(), value.into());
    }

    /// Get a value from the parameters map
    pub fn get(&self, key: &str) -> Option<&str> {
        self.map.get(key).map(String::as_str)
    }

    /// Remove a value from the parameters map
    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.map.remove(key)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.map.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Parameters {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = Self::new();
        for (key, value) in iter {
            params.insert(key, value);
        }
        params
    }
}

/// Per-request context: the request plus its route parameters.
#[derive(Debug)]
pub struct Context {
    request: Request,
    params: Parameters,
}

impl Context {
    pub fn new(request: Request, params: Parameters) -> Self {
        Self { request, params }
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn params(&self) -> &Parameters {
        &self.params
    }

    /// Shorthand for `self.params().get(name)`.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name)
    }

    pub fn body(&self) -> &Body {
        self.request.body()
    }

    /// Reads the request body and deserializes it from JSON.
    pub async fn json<T>(&self) -> Result<T, BodyError>
    where
        T: DeserializeOwned,
    {
        self.request.body().json().await
    }

    pub fn into_request(self) -> Request {
        self.request
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn params_from_pairs() {
        let params: Parameters = [("id", "42"), ("slug", "hello")].into_iter().collect();
        assert_eq!(params.len(), 2);
        assert_eq!(params.get("id"), Some("42"));
        assert_eq!(params.get("missing"), None);
    }

    #[test]
    fn context_exposes_request_and_params() {
        let request = Request::from_head(b"GET /users/7 HTTP/1.1\r\n").unwrap();
        let mut params = Parameters::new();
        params.insert("id", "7");

        let ctx = Context::new(request, params);
        assert_eq!(ctx.param("id"), Some("7"));
        assert_eq!(ctx.request().path(), "/users/7");
        assert!(ctx.body().is_empty());
    }
}
