//! Request routing — map path templates and HTTP methods to handlers.
//!
//! A template such as `/users/{id}/posts/{post}` compiles to a regular
//! expression in which every `{name}` placeholder becomes a named capture
//! matching one or more characters of any kind, slashes included:
//!
//! | Template             | Example match              | Captured params                |
//! |----------------------|----------------------------|--------------------------------|
//! | `/users`             | `/users`                   | *(none)*                       |
//! | `/users/{id}`        | `/users/42`                | `id → "42"`                    |
//! | `/files/{path}`      | `/files/docs/readme.txt`   | `path → "docs/readme.txt"`     |
//!
//! Templates without placeholders are matched literally. Resolution first looks
//! the `(path, method)` pair up directly, then scans every route in
//! registration order. A path that matches only under other methods resolves to
//! [`RouteError::MethodNotAllowed`], which is distinct from
//! [`RouteError::NotFound`]. One trailing slash is stripped from the request
//! path before matching, so `/users/42/` resolves exactly like `/users/42`.
//!
//! Successful resolutions are memoized in a bounded LRU cache which is cleared
//! whenever the route table changes.

use std::collections::HashMap;
use std::future::Future;
use std::num::NonZeroUsize;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};

use lru::LruCache;
use regex::Regex;
use thiserror::Error;

use crate::context::{Context, Parameters};
use crate::http::{CacheControl, HandlerResult, HttpError, Method, Reply};
use crate::middleware::MiddlewareHandler;
use crate::websocket::ServerWebSocket;

/// Default number of memoized resolutions.
pub const DEFAULT_CACHE_CAPACITY: usize = 2048;

/// Boxed future returned by an HTTP [`Handler`].
pub type HandlerFuture = Pin<Box<dyn Future<Output = HandlerResult> + Send>>;

/// Type-erased, heap-allocated async handler that processes a [`Context`].
///
/// In practice you never construct this type directly — use [`Router::get`],
/// [`Router::post`], and the other method-specific helpers instead.
pub type Handler = Arc<dyn Fn(Context) -> HandlerFuture + Send + Sync + 'static>;

/// Boxed future returned by a [`WebSocketHandler`].
pub type WebSocketFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Handler that owns an upgraded WebSocket connection for its whole lifetime.
pub type WebSocketHandler = Arc<dyn Fn(Context, ServerWebSocket) -> WebSocketFuture + Send + Sync + 'static>;

/// Conversion trait for async HTTP handler functions.
///
/// Any `Fn(Context) -> impl Future<Output = Result<R, HttpError>>` where `R`
/// converts into a [`Reply`] implements this automatically.
pub trait IntoHandler: Send + Sync + 'static {
    /// Call the handler with the given context, boxing the returned future.
    fn call(&self, ctx: Context) -> HandlerFuture;
}

impl<T, F, R> IntoHandler for T
where
    T: Fn(Context) -> F + Send + Sync + 'static,
    F: Future<Output = Result<R, HttpError>> + Send + 'static,
    R: Into<Reply>,
{
    fn call(&self, ctx: Context) -> HandlerFuture {
        let fut = (self)(ctx);
        Box::pin(async move { fut.await.map(Into::into) })
    }
}

/// Conversion trait for async WebSocket handler functions.
pub trait IntoWebSocketHandler: Send + Sync + 'static {
    fn call(&self, ctx: Context, socket: ServerWebSocket) -> WebSocketFuture;
}

impl<T, F> IntoWebSocketHandler for T
where
    T: Fn(Context, ServerWebSocket) -> F + Send + Sync + 'static,
    F: Future<Output = ()> + Send + 'static,
{
    fn call(&self, ctx: Context, socket: ServerWebSocket) -> WebSocketFuture {
        Box::pin((self)(ctx, socket))
    }
}

/// Failure to resolve a request path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteError {
    #[error("no route matches {path}")]
    NotFound { path: String },

    #[error("{method} is not allowed for {path}")]
    MethodNotAllowed {
        path: String,
        method: Method,
        allowed: Vec<Method>,
    },
}

impl From<RouteError> for HttpError {
    fn from(err: RouteError) -> Self {
        match err {
            RouteError::NotFound { .. } => HttpError::not_found(),
            RouteError::MethodNotAllowed { allowed, .. } => HttpError::method_not_allowed(&allowed),
        }
    }
}

/// Failure to add a route to a [`Router`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistrationError {
    #[error("a {method} route for {path} is already registered")]
    Duplicate { path: String, method: Method },

    #[error("invalid route template {template:?}: {reason}")]
    InvalidTemplate { template: String, reason: String },
}

/// What a route dispatches to.
#[derive(Clone)]
pub enum Endpoint {
    Http(Handler),
    WebSocket(WebSocketHandler),
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Endpoint::Http(_) => f.write_str("Http"),
            Endpoint::WebSocket(_) => f.write_str("WebSocket"),
        }
    }
}

/// A route: template, method, endpoint, plus per-route metadata.
#[derive(Clone)]
pub struct Route {
    path: String,
    method: Method,
    endpoint: Endpoint,
    cache_control: Option<CacheControl>,
    middleware: Vec<MiddlewareHandler>,
    subprotocols: Vec<String>,
}

impl Route {
    /// An HTTP route.
    pub fn new(path: impl Into<String>, method: Method, handler: impl IntoHandler) -> Self {
        let handler: Handler = Arc::new(move |ctx| handler.call(ctx));
        Self::with_endpoint(path, method, Endpoint::Http(handler))
    }

    /// A WebSocket route. WebSocket routes always answer `GET`.
    pub fn websocket(path: impl Into<String>, handler: impl IntoWebSocketHandler) -> Self {
        let handler: WebSocketHandler = Arc::new(move |ctx, socket| handler.call(ctx, socket));
        Self::with_endpoint(path, Method::Get, Endpoint::WebSocket(handler))
    }

    fn with_endpoint(path: impl Into<String>, method: Method, endpoint: Endpoint) -> Self {
        Self {
            path: path.into(),
            method,
            endpoint,
            cache_control: None,
            middleware: Vec::new(),
            subprotocols: Vec::new(),
        }
    }

    /// Attaches `Cache-Control` metadata applied to this route's responses.
    #[must_use]
    pub fn cache(mut self, control: CacheControl) -> Self {
        self.cache_control = Some(control);
        self
    }

    /// Appends a middleware that wraps only this route.
    #[must_use]
    pub fn layer(mut self, middleware: MiddlewareHandler) -> Self {
        self.middleware.push(middleware);
        self
    }

    /// Subprotocols this WebSocket route accepts, in order of preference.
    #[must_use]
    pub fn subprotocols<I, S>(mut self, protocols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.subprotocols = protocols.into_iter().map(Into::into).collect();
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn is_websocket(&self) -> bool {
        matches!(self.endpoint, Endpoint::WebSocket(_))
    }

    pub fn cache_control(&self) -> Option<&CacheControl> {
        self.cache_control.as_ref()
    }

    pub fn middleware(&self) -> &[MiddlewareHandler] {
        &self.middleware
    }

    pub fn supported_subprotocols(&self) -> &[String] {
        &self.subprotocols
    }
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route")
            .field("path", &self.path)
            .field("method", &self.method)
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

/// A successful resolution: the route and the parameters captured from the path.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub route: Arc<Route>,
    pub params: Parameters,
}

// A compiled template.
#[derive(Debug, Clone)]
enum Matcher {
    Literal(String),
    Pattern(Regex),
}

impl Matcher {
    fn captures(&self, path: &str) -> Option<Parameters> {
        match self {
            Matcher::Literal(literal) => (literal == path).then(Parameters::new),
            Matcher::Pattern(regex) => {
                let caps = regex.captures(path)?;
                Some(
                    regex
                        .capture_names()
                        .flatten()
                        .filter_map(|name| Some((name, caps.name(name)?.as_str())))
                        .collect(),
                )
            }
        }
    }
}

/// Compiles a route template to its lookup key and matcher.
///
/// The key is the template itself when it has no placeholders, otherwise the
/// anchored regular expression source.
fn compile_template(template: &str) -> Result<(String, Matcher), RegistrationError> {
    let invalid = |reason: &str| RegistrationError::InvalidTemplate {
        template: template.to_owned(),
        reason: reason.to_owned(),
    };

    if !template.starts_with('/') {
        return Err(invalid("templates must start with '/'"));
    }

    let mut source = String::with_capacity(template.len() + 16);
    let mut placeholders = 0;
    let mut rest = template;

    while let Some(open) = rest.find(['{', '}']) {
        if rest.as_bytes()[open] == b'}' {
            return Err(invalid("unbalanced '}'"));
        }
        source.push_str(&regex::escape(&rest[..open]));

        let after = &rest[open + 1..];
        let close = after.find('}').ok_or_else(|| invalid("unterminated '{'"))?;
        let name = &after[..close];
        if !is_identifier(name) {
            return Err(invalid("placeholder names must be identifiers"));
        }

        source.push_str(&format!("(?P<{name}>.+)"));
        placeholders += 1;
        rest = &after[close + 1..];
    }

    if placeholders == 0 {
        return Ok((template.to_owned(), Matcher::Literal(template.to_owned())));
    }

    source.push_str(&regex::escape(rest));
    let anchored = format!("^(?:{source})$");
    let regex = Regex::new(&anchored).map_err(|e| invalid(&e.to_string()))?;
    // Literal keys always start with '/', so an anchored key never collides
    // with one.
    Ok((anchored, Matcher::Pattern(regex)))
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

struct Entry {
    key: String,
    matcher: Matcher,
    route: Arc<Route>,
}

/// HTTP request router.
///
/// # Examples
///
/// ```rust
/// use switchyard::context::Context;
/// use switchyard::http::HttpError;
/// use switchyard::{Method, Router};
///
/// let mut router = Router::new();
///
/// router.get("/ping", |_ctx: Context| async { Ok::<_, HttpError>("pong") }).unwrap();
/// router
///     .get("/users/{id}", |ctx: Context| async move {
///         let id = ctx.param("id").unwrap_or("unknown").to_owned();
///         Ok::<_, HttpError>(id)
///     })
///     .unwrap();
///
/// let resolved = router.resolve("/users/42", Method::Get).unwrap();
/// assert_eq!(resolved.params.get("id"), Some("42"));
/// ```
pub struct Router {
    prefix: String,
    // Direct lookup by (compiled key, method).
    by_key: HashMap<(String, Method), usize>,
    // Registration order, for the linear scan.
    entries: Vec<Entry>,
    middleware: Vec<MiddlewareHandler>,
    cache: Mutex<LruCache<(String, Method), Resolved>>,
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl Router {
    /// Create a new, empty `Router` with no registered routes.
    pub fn new() -> Self {
        Self::with_cache_capacity(DEFAULT_CACHE_CAPACITY)
    }

    /// A router whose resolution cache holds at most `capacity` entries
    /// (at least one).
    pub fn with_cache_capacity(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            prefix: String::new(),
            by_key: HashMap::new(),
            entries: Vec::new(),
            middleware: Vec::new(),
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Resizes the resolution cache, evicting the least recently used entries
    /// when it shrinks.
    pub fn set_cache_capacity(&mut self, capacity: usize) {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        self.cache
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .resize(capacity);
    }

    /// A router that prepends `prefix` to every template registered on it.
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        let mut router = Self::new();
        router.prefix = prefix.into().trim_end_matches('/').to_owned();
        router
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Adds a route. The router's prefix is prepended to its template.
    ///
    /// # Errors
    ///
    /// - [`RegistrationError::Duplicate`] when a route with the same compiled
    ///   template and method exists.
    /// - [`RegistrationError::InvalidTemplate`] for a malformed template.
    pub fn add(&mut self, mut route: Route) -> Result<(), RegistrationError> {
        if !self.prefix.is_empty() {
            route.path = if route.path == "/" {
                self.prefix.clone()
            } else {
                format!("{}{}", self.prefix, route.path)
            };
        }

        let (key, matcher) = compile_template(&route.path)?;
        let lookup = (key, route.method);
        if self.by_key.contains_key(&lookup) {
            return Err(RegistrationError::Duplicate {
                path: route.path,
                method: route.method,
            });
        }

        tracing::debug!(path = %route.path, method = %route.method, "route registered");
        self.by_key.insert(lookup.clone(), self.entries.len());
        self.entries.push(Entry {
            key: lookup.0,
            matcher,
            route: Arc::new(route),
        });
        self.clear_cache();
        Ok(())
    }

    /// Registers `handler` for `method` requests matching `path`.
    pub fn register(
        &mut self,
        path: &str,
        method: Method,
        handler: impl IntoHandler,
    ) -> Result<(), RegistrationError> {
        self.add(Route::new(path, method, handler))
    }

    /// Register a handler for `GET` requests matching `path`.
    pub fn get(&mut self, path: &str, handler: impl IntoHandler) -> Result<(), RegistrationError> {
        self.register(path, Method::Get, handler)
    }

    /// Register a handler for `POST` requests matching `path`.
    pub fn post(&mut self, path: &str, handler: impl IntoHandler) -> Result<(), RegistrationError> {
        self.register(path, Method::Post, handler)
    }

    /// Register a handler for `PUT` requests matching `path`.
    pub fn put(&mut self, path: &str, handler: impl IntoHandler) -> Result<(), RegistrationError> {
        self.register(path, Method::Put, handler)
    }

    /// Register a handler for `DELETE` requests matching `path`.
    pub fn delete(&mut self, path: &str, handler: impl IntoHandler) -> Result<(), RegistrationError> {
        self.register(path, Method::Delete, handler)
    }

    /// Register a handler for `OPTIONS` requests matching `path`.
    pub fn options(&mut self, path: &str, handler: impl IntoHandler) -> Result<(), RegistrationError> {
        self.register(path, Method::Options, handler)
    }

    /// Register a handler for `PATCH` requests matching `path`.
    pub fn patch(&mut self, path: &str, handler: impl IntoHandler) -> Result<(), RegistrationError> {
        self.register(path, Method::Patch, handler)
    }

    /// Register a WebSocket handler for `path`.
    pub fn websocket(
        &mut self,
        path: &str,
        handler: impl IntoWebSocketHandler,
    ) -> Result<(), RegistrationError> {
        self.add(Route::websocket(path, handler))
    }

    /// Appends a middleware that wraps every route of this router.
    pub fn middleware(&mut self, middleware: MiddlewareHandler) {
        self.middleware.push(middleware);
    }

    /// Removes the route registered for `path` (the full template, prefix
    /// included) and `method`.
    pub fn remove(&mut self, path: &str, method: Method) -> Option<Arc<Route>> {
        let (key, _) = compile_template(path).ok()?;
        let index = self.by_key.remove(&(key, method))?;
        let entry = self.entries.remove(index);

        // Indices after the removed entry shift down by one.
        for slot in self.by_key.values_mut() {
            if *slot > index {
                *slot -= 1;
            }
        }
        self.clear_cache();
        Some(entry.route)
    }

    /// Moves every route of `other` into this router, under this router's
    /// prefix. `other`'s router-wide middleware stays attached to its routes.
    pub fn merge(&mut self, other: Router) -> Result<(), RegistrationError> {
        for entry in other.entries {
            let mut route = Arc::unwrap_or_clone(entry.route);
            let mut chain = other.middleware.clone();
            chain.append(&mut route.middleware);
            route.middleware = chain;
            self.add(route)?;
        }
        Ok(())
    }

    /// Return the number of routes registered in this router.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Return `true` if no routes have been registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates the routes in registration order.
    pub fn routes(&self) -> impl Iterator<Item = &Route> {
        self.entries.iter().map(|entry| entry.route.as_ref())
    }

    /// Middleware chain for `route`: router-wide layers first, then the route's own.
    pub fn chain_for(&self, route: &Route) -> Vec<MiddlewareHandler> {
        self.middleware
            .iter()
            .chain(route.middleware.iter())
            .cloned()
            .collect()
    }

    /// Resolves `path` and `method` to a route.
    ///
    /// # Errors
    ///
    /// - [`RouteError::MethodNotAllowed`] when the path matches only under other
    ///   methods; `allowed` lists them.
    /// - [`RouteError::NotFound`] when no template matches.
    pub fn resolve(&self, path: &str, method: Method) -> Result<Resolved, RouteError> {
        let cache_key = (path.to_owned(), method);
        if let Some(hit) = self.lock_cache().get(&cache_key) {
            return Ok(hit.clone());
        }

        // One trailing slash is dropped before matching, so `.+` captures
        // never swallow it.
        let target = match path.strip_suffix('/') {
            Some(stripped) if !stripped.is_empty() => stripped,
            _ => path,
        };
        let resolved = self.lookup(target, method)?;

        self.lock_cache().put(cache_key, resolved.clone());
        Ok(resolved)
    }

    fn lookup(&self, path: &str, method: Method) -> Result<Resolved, RouteError> {
        match self.find(path, method) {
            // HEAD falls back to the GET route when no HEAD route exists.
            Err(RouteError::MethodNotAllowed { .. }) if method == Method::Head => {
                self.find(path, Method::Get)
            }
            other => other,
        }
    }

    fn find(&self, path: &str, method: Method) -> Result<Resolved, RouteError> {
        if let Some(&index) = self.by_key.get(&(path.to_owned(), method)) {
            let entry = &self.entries[index];
            if let Matcher::Literal(_) = entry.matcher {
                return Ok(Resolved {
                    route: Arc::clone(&entry.route),
                    params: Parameters::new(),
                });
            }
        }

        let mut allowed = Vec::new();
        for entry in &self.entries {
            let Some(params) = entry.matcher.captures(path) else {
                continue;
            };
            if entry.route.method == method {
                return Ok(Resolved {
                    route: Arc::clone(&entry.route),
                    params,
                });
            }
            allowed.push(entry.route.method);
        }

        if allowed.is_empty() {
            return Err(RouteError::NotFound {
                path: path.to_owned(),
            });
        }

        if allowed.contains(&Method::Get) {
            allowed.push(Method::Head);
        }
        allowed.sort();
        allowed.dedup();
        Err(RouteError::MethodNotAllowed {
            path: path.to_owned(),
            method,
            allowed,
        })
    }

    fn lock_cache(&self) -> std::sync::MutexGuard<'_, LruCache<(String, Method), Resolved>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn clear_cache(&mut self) {
        self.cache
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    #[cfg(test)]
    fn cached(&self) -> usize {
        self.lock_cache().len()
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("prefix", &self.prefix)
            .field(
                "routes",
                &self
                    .entries
                    .iter()
                    .map(|e| (e.key.as_str(), e.route.method))
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::Request;

    async fn ok(_ctx: Context) -> Result<&'static str, HttpError> {
        Ok("ok")
    }

    fn router_with(routes: &[(&str, Method)]) -> Router {
        let mut router = Router::new();
        for &(path, method) in routes {
            router.register(path, method, ok).unwrap();
        }
        router
    }

    // ── Template compilation ─────────────────────────────────────────────────

    #[test]
    fn literal_templates_compile_to_themselves() {
        let (key, matcher) = compile_template("/about.html").unwrap();
        assert_eq!(key, "/about.html");
        assert!(matches!(matcher, Matcher::Literal(_)));
    }

    #[test]
    fn placeholders_become_named_captures() {
        let (key, matcher) = compile_template("/users/{id}").unwrap();
        assert_eq!(key, "^(?:/users/(?P<id>.+))$");

        let params = matcher.captures("/users/42").unwrap();
        assert_eq!(params.get("id"), Some("42"));
        assert!(matcher.captures("/users/").is_none());
    }

    #[test]
    fn literal_parts_are_escaped() {
        let (_, matcher) = compile_template("/v1.0/{name}.json").unwrap();
        assert!(matcher.captures("/v1.0/report.json").is_some());
        assert!(matcher.captures("/v1x0/report.json").is_none());
    }

    #[test]
    fn placeholders_span_slashes() {
        let (_, matcher) = compile_template("/files/{path}").unwrap();
        let params = matcher.captures("/files/docs/readme.txt").unwrap();
        assert_eq!(params.get("path"), Some("docs/readme.txt"));
    }

    #[test]
    fn malformed_templates_are_rejected() {
        for template in ["/users/{id", "/users/id}", "/users/{}", "/users/{1id}", "users", "/{a}/{a}"] {
            assert!(
                matches!(compile_template(template), Err(RegistrationError::InvalidTemplate { .. })),
                "{template} should be rejected"
            );
        }
    }

    // ── Resolution ───────────────────────────────────────────────────────────

    #[test]
    fn resolves_literal_and_parameterized_routes() {
        let router = router_with(&[("/ping", Method::Get), ("/users/{id}", Method::Get)]);

        let resolved = router.resolve("/ping", Method::Get).unwrap();
        assert_eq!(resolved.route.path(), "/ping");
        assert!(resolved.params.is_empty());

        let resolved = router.resolve("/users/7", Method::Get).unwrap();
        assert_eq!(resolved.params.get("id"), Some("7"));
    }

    #[test]
    fn not_found_vs_method_not_allowed() {
        let router = router_with(&[("/items", Method::Get), ("/items", Method::Post)]);

        assert_eq!(
            router.resolve("/missing", Method::Get).unwrap_err(),
            RouteError::NotFound {
                path: "/missing".into()
            }
        );

        match router.resolve("/items", Method::Delete) {
            Err(RouteError::MethodNotAllowed { allowed, method, .. }) => {
                assert_eq!(method, Method::Delete);
                assert_eq!(allowed, vec![Method::Get, Method::Head, Method::Post]);
            }
            other => panic!("expected 405, got {other:?}"),
        }
    }

    #[test]
    fn registration_order_decides_overlaps() {
        let mut router = Router::new();
        router.get("/a/{rest}", ok).unwrap();
        router.get("/a/{x}/{y}", ok).unwrap();

        let resolved = router.resolve("/a/b/c", Method::Get).unwrap();
        assert_eq!(resolved.route.path(), "/a/{rest}");
        assert_eq!(resolved.params.get("rest"), Some("b/c"));
    }

    #[test]
    fn trailing_slash_is_stripped_once() {
        let router = router_with(&[("/users", Method::Get)]);
        assert!(router.resolve("/users/", Method::Get).is_ok());
        assert!(router.resolve("/users//", Method::Get).is_err());

        let root = router_with(&[("/", Method::Get)]);
        assert!(root.resolve("/", Method::Get).is_ok());
    }

    #[test]
    fn trailing_slash_does_not_leak_into_params() {
        let router = router_with(&[("/users/{id}", Method::Get)]);
        let plain = router.resolve("/users/42", Method::Get).unwrap();
        let slashed = router.resolve("/users/42/", Method::Get).unwrap();
        assert_eq!(plain.params.get("id"), Some("42"));
        assert_eq!(slashed.params.get("id"), Some("42"));
        assert_eq!(slashed.route.path(), "/users/{id}");
    }

    #[test]
    fn literal_spelling_a_pattern_is_not_a_duplicate() {
        let mut router = router_with(&[("/users/{id}", Method::Get)]);
        router.get("/users/(?P<id>.+)", ok).unwrap();
        assert_eq!(router.len(), 2);

        let literal = router.resolve("/users/(?P<id>.+)", Method::Get).unwrap();
        assert_eq!(literal.route.path(), "/users/(?P<id>.+)");
        assert!(literal.params.get("id").is_none());
    }

    #[test]
    fn head_falls_back_to_get() {
        let router = router_with(&[("/page", Method::Get)]);
        let resolved = router.resolve("/page", Method::Head).unwrap();
        assert_eq!(resolved.route.method(), Method::Get);
    }

    #[test]
    fn duplicate_registration_fails() {
        let mut router = router_with(&[("/users/{id}", Method::Get)]);
        assert_eq!(
            router.get("/users/{id}", ok).unwrap_err(),
            RegistrationError::Duplicate {
                path: "/users/{id}".into(),
                method: Method::Get
            }
        );
        // Same template under another method is fine.
        router.post("/users/{id}", ok).unwrap();
        assert_eq!(router.len(), 2);
    }

    // ── Cache ────────────────────────────────────────────────────────────────

    #[test]
    fn resolutions_are_cached_and_invalidated() {
        let mut router = router_with(&[("/a", Method::Get)]);
        router.resolve("/a", Method::Get).unwrap();
        router.resolve("/a", Method::Get).unwrap();
        assert_eq!(router.cached(), 1);

        // Failures are not cached.
        assert!(router.resolve("/b", Method::Get).is_err());
        assert_eq!(router.cached(), 1);

        router.get("/b", ok).unwrap();
        assert_eq!(router.cached(), 0);
        assert!(router.resolve("/b", Method::Get).is_ok());
    }

    #[test]
    fn cache_is_bounded() {
        let mut router = Router::with_cache_capacity(2);
        router.get("/n/{n}", ok).unwrap();
        for n in 0..5 {
            router.resolve(&format!("/n/{n}"), Method::Get).unwrap();
        }
        assert_eq!(router.cached(), 2);
    }

    #[test]
    fn removal_invalidates_cache() {
        let mut router = router_with(&[("/a", Method::Get), ("/b/{id}", Method::Get)]);
        router.resolve("/b/1", Method::Get).unwrap();

        let removed = router.remove("/b/{id}", Method::Get).unwrap();
        assert_eq!(removed.path(), "/b/{id}");
        assert!(router.resolve("/b/1", Method::Get).is_err());
        assert!(router.resolve("/a", Method::Get).is_ok());
        assert!(router.remove("/b/{id}", Method::Get).is_none());

        // Direct lookup still works after indices shifted.
        router.get("/c", ok).unwrap();
        assert_eq!(router.resolve("/c", Method::Get).unwrap().route.path(), "/c");
    }

    // ── Composition ──────────────────────────────────────────────────────────

    #[test]
    fn prefix_and_merge() {
        let mut api = Router::with_prefix("/api/");
        api.get("/users", ok).unwrap();
        api.get("/", ok).unwrap();

        let mut root = Router::new();
        root.get("/", ok).unwrap();
        root.merge(api).unwrap();

        assert_eq!(root.len(), 3);
        assert!(root.resolve("/api/users", Method::Get).is_ok());
        assert!(root.resolve("/api", Method::Get).is_ok());
        assert!(root.resolve("/users", Method::Get).is_err());
    }

    #[test]
    fn merge_reports_conflicts() {
        let mut a = router_with(&[("/x", Method::Get)]);
        let b = router_with(&[("/x", Method::Get)]);
        assert!(matches!(a.merge(b), Err(RegistrationError::Duplicate { .. })));
    }

    #[test]
    fn websocket_routes_are_get() {
        let mut router = Router::new();
        router
            .websocket("/ws", |_ctx: Context, _socket: ServerWebSocket| async {})
            .unwrap();

        let resolved = router.resolve("/ws", Method::Get).unwrap();
        assert!(resolved.route.is_websocket());
        assert!(matches!(
            router.resolve("/ws", Method::Post),
            Err(RouteError::MethodNotAllowed { .. })
        ));
    }

    #[tokio::test]
    async fn resolved_handler_runs() {
        let mut router = Router::new();
        router
            .get("/hello/{name}", |ctx: Context| async move {
                Ok::<_, HttpError>(format!("hello {}", ctx.param("name").unwrap_or("?")))
            })
            .unwrap();

        let resolved = router.resolve("/hello/world", Method::Get).unwrap();
        let Endpoint::Http(handler) = resolved.route.endpoint().clone() else {
            panic!("expected an HTTP route");
        };

        let request = Request::from_head(b"GET /hello/world HTTP/1.1\r\n").unwrap();
        let reply = handler(Context::new(request, resolved.params)).await.unwrap();
        assert!(matches!(reply, Reply::Text(t) if t == "hello world"));
    }

    #[test]
    fn route_errors_map_to_http_errors() {
        let err: HttpError = RouteError::MethodNotAllowed {
            path: "/x".into(),
            method: Method::Put,
            allowed: vec![Method::Get],
        }
        .into();
        assert_eq!(err.status, crate::StatusCode::MethodNotAllowed);
        assert_eq!(err.headers.get("allow"), Some("GET"));
    }
}
