//! Ordered HTTP router.
//!
//! Routes are matched in registration order and the first match wins; there is
//! no most-specific heuristic, so a wildcard registered early shadows every
//! route registered after it. When nothing matches and trailing-slash
//! redirection is enabled, the path is retried with a `/` appended and a
//! [`Resolution::Redirect`] is produced instead of dispatching.
use std::collections::HashMap;

use eyre::Result;

use crate::core::{
    error::{HttpError, RouteDeclarationError},
    pattern::RawParams,
    request::Request,
    route::{Route, RouteOptions},
    view::View,
};

/// Outcome of resolving a request path.
#[derive(Debug)]
pub enum Resolution<'r> {
    Matched(&'r Route, RawParams),
    /// Slash-suffixed URL (query string preserved) that would match.
    Redirect(String),
    NotFound,
}

#[derive(Debug, Default, Clone)]
pub struct HttpRouter {
    routes: Vec<Route>,
    by_pattern: HashMap<String, usize>,
    by_name: HashMap<String, usize>,
}

impl HttpRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build and register a route.
    pub fn route(
        &mut self,
        pattern: &str,
        view: impl Into<View>,
        options: RouteOptions,
    ) -> Result<&Route, RouteDeclarationError> {
        let route = Route::new(pattern, view, options)?;
        self.add_route(route)
    }

    /// Register a route. Registering a pattern again replaces the previous
    /// route in place, keeping its priority.
    pub fn add_route(&mut self, route: Route) -> Result<&Route, RouteDeclarationError> {
        let existing = self.by_pattern.get(route.pattern().source()).copied();
        if let Some(&index) = self.by_name.get(route.name()) {
            if Some(index) != existing {
                return Err(RouteDeclarationError::DuplicateName {
                    name: route.name().to_string(),
                });
            }
        }

        let index = match existing {
            Some(index) => {
                let previous = std::mem::replace(&mut self.routes[index], route);
                self.by_name.remove(previous.name());
                tracing::debug!("Replaced route {}", previous.pattern().source());
                index
            }
            None => {
                self.routes.push(route);
                self.routes.len() - 1
            }
        };
        let route = &self.routes[index];
        self.by_pattern
            .insert(route.pattern().source().to_string(), index);
        self.by_name.insert(route.name().to_string(), index);
        tracing::debug!(
            "Registered route {} as '{}'",
            route.pattern().source(),
            route.name()
        );
        Ok(&self.routes[index])
    }

    /// Copy every route of `other` under `prefix`, prepending `namespace:` to
    /// their names when given.
    pub fn include(
        &mut self,
        other: &HttpRouter,
        prefix: &str,
        namespace: Option<&str>,
    ) -> Result<(), RouteDeclarationError> {
        for route in &other.routes {
            self.add_route(route.with_prefix(prefix, namespace)?)?;
        }
        Ok(())
    }

    /// First route, in registration order, whose pattern matches `path`.
    pub fn match_path(&self, path: &str) -> Option<(&Route, RawParams)> {
        self.routes
            .iter()
            .find_map(|route| route.pattern().match_path(path).map(|params| (route, params)))
    }

    /// Match the request path, falling back to a trailing-slash redirect.
    ///
    /// Matching runs on the decoded path. The redirect location is built from
    /// the raw path so escaped reserved characters stay escaped.
    pub fn resolve(&self, req: &Request, redirect_trailing_slash: bool) -> Resolution<'_> {
        let path = req.path();
        if let Some((route, params)) = self.match_path(path) {
            return Resolution::Matched(route, params);
        }
        if redirect_trailing_slash
            && !path.ends_with('/')
            && self.match_path(&format!("{path}/")).is_some()
        {
            let url = match req.query_string() {
                Some(query) if !query.is_empty() => format!("{}/?{query}", req.uri().path()),
                _ => format!("{}/", req.uri().path()),
            };
            return Resolution::Redirect(url);
        }
        Resolution::NotFound
    }

    pub fn get_route_or_404(&self, name: &str) -> Result<&Route, HttpError> {
        self.by_name
            .get(name)
            .map(|&index| &self.routes[index])
            .ok_or_else(HttpError::not_found)
    }

    /// Build the URL of the route registered as `name`.
    pub fn url_for(&self, name: &str, params: &HashMap<String, String>) -> Result<String> {
        let route = self.get_route_or_404(name)?;
        Ok(route.pattern().format(params)?)
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
