//! `Cache-Control` route metadata.

use std::fmt;

/// A `Cache-Control` value attached to a route.
///
/// Directives are rendered in the order they were added. The connection only
/// applies it when the handler did not set `Cache-Control` itself.
///
/// ```
/// use switchyard::http::CacheControl;
///
/// let control = CacheControl::new().public().max_age(3600).immutable();
/// assert_eq!(control.to_string(), "public, max-age=3600, immutable");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheControl {
    directives: Vec<String>,
}

impl CacheControl {
    pub fn new() -> Self {
        Self::default()
    }

    fn flag(mut self, name: &str) -> Self {
        self.directives.push(name.to_owned());
        self
    }

    fn seconds(mut self, name: &str, value: u64) -> Self {
        self.directives.push(format!("{name}={value}"));
        self
    }

    #[must_use]
    pub fn max_age(self, seconds: u64) -> Self {
        self.seconds("max-age", seconds)
    }

    #[must_use]
    pub fn s_maxage(self, seconds: u64) -> Self {
        self.seconds("s-maxage", seconds)
    }

    #[must_use]
    pub fn stale_while_revalidate(self, seconds: u64) -> Self {
        self.seconds("stale-while-revalidate", seconds)
    }

    #[must_use]
    pub fn stale_if_error(self, seconds: u64) -> Self {
        self.seconds("stale-if-error", seconds)
    }

    #[must_use]
    pub fn no_cache(self) -> Self {
        self.flag("no-cache")
    }

    #[must_use]
    pub fn no_store(self) -> Self {
        self.flag("no-store")
    }

    #[must_use]
    pub fn no_transform(self) -> Self {
        self.flag("no-transform")
    }

    #[must_use]
    pub fn must_revalidate(self) -> Self {
        self.flag("must-revalidate")
    }

    #[must_use]
    pub fn proxy_revalidate(self) -> Self {
        self.flag("proxy-revalidate")
    }

    #[must_use]
    pub fn public(self) -> Self {
        self.flag("public")
    }

    #[must_use]
    pub fn private(self) -> Self {
        self.flag("private")
    }

    #[must_use]
    pub fn immutable(self) -> Self {
        self.flag("immutable")
    }

    pub fn is_empty(&self) -> bool {
        self.directives.is_empty()
    }
}

impl fmt::Display for CacheControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.directives.join(", "))
    }
}
