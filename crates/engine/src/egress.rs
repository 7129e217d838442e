//! Upstream egress routes and per-call route selection.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use rand::seq::IndexedRandom;
use ratewatch_types::FetchError;
use ratewatch_util::redact_sensitive;

use crate::config::{EgressConfig, EgressRouteConfig};

/// One proxy an adapter may send its traffic through.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct EgressRoute {
    pub server: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl fmt::Debug for EgressRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EgressRoute")
            .field("server", &redact_sensitive(&self.server))
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl fmt::Display for EgressRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&redact_sensitive(&self.server))
    }
}

impl From<&EgressRouteConfig> for EgressRoute {
    fn from(config: &EgressRouteConfig) -> Self {
        Self {
            server: config.server.clone(),
            username: config.username.clone(),
            password: config.password.clone(),
        }
    }
}

impl EgressRoute {
    pub fn new(server: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            username: None,
            password: None,
        }
    }

    /// Build the reqwest proxy for this route.
    pub fn to_proxy(&self) -> Result<reqwest::Proxy, FetchError> {
        let proxy = reqwest::Proxy::all(&self.server).map_err(|error| FetchError::resource(format!("invalid egress route {self}: {error}")))?;
        Ok(match &self.username {
            Some(username) => proxy.basic_auth(username, self.password.as_deref().unwrap_or_default()),
            None => proxy,
        })
    }
}

/// Picks the egress route for one adapter invocation.
pub trait RouteSelector: Send + Sync + fmt::Debug {
    /// `None` means direct egress.
    fn select(&self) -> Option<EgressRoute>;
}

/// Uniform random choice over the configured pool.
#[derive(Debug, Clone, Default)]
pub struct UniformRouteSelector {
    routes: Vec<EgressRoute>,
}

impl UniformRouteSelector {
    pub fn new(routes: Vec<EgressRoute>) -> Self {
        Self { routes }
    }

    pub fn from_config(config: &EgressConfig) -> Self {
        Self::new(config.routes.iter().map(EgressRoute::from).collect())
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl RouteSelector for UniformRouteSelector {
    fn select(&self) -> Option<EgressRoute> {
        self.routes.choose(&mut rand::rng()).cloned()
    }
}

/// Always returns the same route (or direct egress).
#[derive(Debug, Clone, Default)]
pub struct FixedRouteSelector {
    route: Option<EgressRoute>,
}

impl FixedRouteSelector {
    pub fn new(route: Option<EgressRoute>) -> Self {
        Self { route }
    }

    pub fn direct() -> Self {
        Self::default()
    }
}

impl RouteSelector for FixedRouteSelector {
    fn select(&self) -> Option<EgressRoute> {
        self.route.clone()
    }
}

/// Reusable HTTP clients, one per egress route.
///
/// The route is still chosen per call; only the client (and its connection
/// pool) for that route is reused.
pub struct RouteClients {
    configure: Box<dyn Fn() -> reqwest::ClientBuilder + Send + Sync>,
    clients: Mutex<HashMap<Option<EgressRoute>, reqwest::Client>>,
}

impl fmt::Debug for RouteClients {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteClients").field("routes", &self.len()).finish_non_exhaustive()
    }
}

impl RouteClients {
    /// `configure` yields the builder for each new client; the route's proxy is added on top.
    pub fn new(configure: impl Fn() -> reqwest::ClientBuilder + Send + Sync + 'static) -> Self {
        Self {
            configure: Box::new(configure),
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Clients with reqwest defaults plus the route proxy.
    pub fn plain() -> Self {
        Self::new(reqwest::Client::builder)
    }

    /// Client for `route`, built on first use.
    pub fn client_for(&self, route: Option<&EgressRoute>) -> Result<reqwest::Client, FetchError> {
        let mut clients = self.clients.lock().expect("route clients lock poisoned");
        if let Some(client) = clients.get(&route.cloned()) {
            return Ok(client.clone());
        }
        let mut builder = (self.configure)();
        if let Some(route) = route {
            builder = builder.proxy(route.to_proxy()?);
        }
        let client = builder
            .build()
            .map_err(|error| FetchError::resource(format!("building HTTP client: {error}")))?;
        clients.insert(route.cloned(), client.clone());
        Ok(client)
    }

    /// Number of routes with a client built.
    pub fn len(&self) -> usize {
        self.clients.lock().expect("route clients lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Shared selector built from configuration.
pub fn selector_from_config(config: &EgressConfig) -> Arc<dyn RouteSelector> {
    Arc::new(UniformRouteSelector::from_config(config))
}
