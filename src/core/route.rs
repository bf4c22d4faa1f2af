//! A compiled pattern bound to a resolved view.
use std::{collections::HashSet, sync::Arc};

use http::{HeaderValue, header};

use crate::core::{
    context::Context,
    converter::Converter,
    error::{HttpError, RouteDeclarationError},
    handler::HandlerResult,
    pattern::CompiledPattern,
    view::{MethodTable, View},
};

/// Options accepted by `App::route`.
#[derive(Debug, Clone, Default)]
pub struct RouteOptions {
    /// Methods of a function view; ignored for class views.
    pub methods: Option<Vec<String>>,
    /// Route name; defaults to the view name.
    pub name: Option<String>,
    /// Prepended to the name as `namespace:name`.
    pub namespace: Option<String>,
}

impl RouteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn methods(mut self, methods: &[&str]) -> Self {
        self.methods = Some(methods.iter().map(|m| m.to_string()).collect());
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }
}

#[derive(Clone)]
pub struct Route {
    pattern: CompiledPattern,
    name: String,
    view: View,
    table: MethodTable,
}

impl Route {
    /// Compile `pattern`, check it against the view signature and resolve the view.
    pub fn new(
        pattern: &str,
        view: impl Into<View>,
        options: RouteOptions,
    ) -> Result<Self, RouteDeclarationError> {
        let mut view = view.into();
        if let Some(methods) = &options.methods {
            view.override_methods(methods);
        }
        let pattern = CompiledPattern::new(pattern)?;
        let base_name = options.name.unwrap_or_else(|| view.name().to_string());
        let name = match options.namespace {
            Some(namespace) => format!("{namespace}:{base_name}"),
            None => base_name,
        };
        Self::build(pattern, name, view)
    }

    fn build(
        pattern: CompiledPattern,
        name: String,
        view: View,
    ) -> Result<Self, RouteDeclarationError> {
        check_signature(&pattern, &view)?;
        let converter = Arc::new(Converter::new(view.signature(), &pattern));
        let table = view.resolve(&converter)?;
        Ok(Self {
            pattern,
            name,
            view,
            table,
        })
    }

    /// Same route underneath a static prefix, optionally namespaced.
    pub(crate) fn with_prefix(
        &self,
        prefix: &str,
        namespace: Option<&str>,
    ) -> Result<Self, RouteDeclarationError> {
        let name = match namespace {
            Some(namespace) => format!("{namespace}:{}", self.name),
            None => self.name.clone(),
        };
        Self::build(self.pattern.with_prefix(prefix)?, name, self.view.clone())
    }

    pub fn pattern(&self) -> &CompiledPattern {
        &self.pattern
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn view_name(&self) -> &str {
        self.view.name()
    }

    pub fn methods(&self) -> &MethodTable {
        &self.table
    }

    /// Run the endpoint registered for the request method, or fail with 405.
    pub(crate) async fn dispatch(&self, ctx: &mut Context) -> HandlerResult {
        let Some(endpoint) = self.table.resolve(ctx.req.method()) else {
            let allowed = self
                .table
                .allowed()
                .iter()
                .map(|m| m.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            if let Ok(value) = HeaderValue::from_str(&allowed) {
                ctx.res.headers.insert(header::ALLOW, value);
            }
            return Err(HttpError::method_not_allowed().into());
        };
        endpoint.call(ctx).await
    }
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route")
            .field("pattern", &self.pattern.source())
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Every pattern parameter must be a view path parameter exactly once, and
/// every view path parameter must appear in the pattern.
fn check_signature(pattern: &CompiledPattern, view: &View) -> Result<(), RouteDeclarationError> {
    let signature = view.signature();
    let mut declared = HashSet::new();
    for name in signature.path_names() {
        if !declared.insert(name) {
            return Err(RouteDeclarationError::DuplicateParameter {
                pattern: pattern.source().to_string(),
                param: name.to_string(),
            });
        }
        if pattern.param(name).is_none() {
            return Err(RouteDeclarationError::UndeclaredPathParameter {
                pattern: pattern.source().to_string(),
                param: name.to_string(),
                view: view.name().to_string(),
            });
        }
    }
    for name in signature.query_names() {
        if declared.contains(name) || pattern.param(name).is_some() {
            return Err(RouteDeclarationError::ConflictingParameter {
                view: view.name().to_string(),
                param: name.to_string(),
            });
        }
    }
    for param in pattern.params() {
        if !declared.contains(param.name.as_str()) {
            return Err(RouteDeclarationError::MissingHandlerParameter {
                pattern: pattern.source().to_string(),
                param: param.name.clone(),
                view: view.name().to_string(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{converter::Signature, view::FunctionView};

    fn view(signature: Signature) -> FunctionView {
        FunctionView::new("add", |_ctx| Box::pin(async { Ok(()) })).signature(signature)
    }

    #[test]
    fn test_pattern_param_missing_from_signature() {
        let err = Route::new(
            "/add/{x:d}/{y:d}",
            view(Signature::new().param("x")),
            RouteOptions::new(),
        )
        .unwrap_err();
        assert_eq!(
            err,
            RouteDeclarationError::MissingHandlerParameter {
                pattern: "/add/{x:d}/{y:d}".to_string(),
                param: "y".to_string(),
                view: "add".to_string(),
            }
        );
    }

    #[test]
    fn test_signature_param_missing_from_pattern() {
        let err = Route::new(
            "/add/{x:d}",
            view(Signature::new().param("x").param("y")),
            RouteOptions::new(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            RouteDeclarationError::UndeclaredPathParameter { ref param, .. } if param == "y"
        ));
    }

    #[test]
    fn test_query_param_cannot_shadow_path_param() {
        let err = Route::new(
            "/items/{id}",
            view(Signature::new().param("id").query("id", 1)),
            RouteOptions::new(),
        )
        .unwrap_err();
        assert!(matches!(err, RouteDeclarationError::ConflictingParameter { .. }));
    }

    #[test]
    fn test_names() {
        let route = Route::new("/", view(Signature::new()), RouteOptions::new()).unwrap();
        assert_eq!(route.name(), "add");

        let route = Route::new(
            "/",
            view(Signature::new()),
            RouteOptions::new().name("sum").namespace("math"),
        )
        .unwrap();
        assert_eq!(route.name(), "math:sum");

        let prefixed = route.with_prefix("/calc", Some("tools")).unwrap();
        assert_eq!(prefixed.name(), "tools:math:sum");
        assert_eq!(prefixed.pattern().source(), "/calc/");
    }

    #[test]
    fn test_route_options_override_function_view_methods() {
        let route = Route::new(
            "/",
            view(Signature::new()),
            RouteOptions::new().methods(&["post"]),
        )
        .unwrap();
        assert_eq!(route.methods().allowed(), vec![http::Method::POST]);
    }
}
