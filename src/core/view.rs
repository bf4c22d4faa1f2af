//! Function-based and class-based views.
//!
//! Both variants are resolved once, when the route is registered, into a
//! [`MethodTable`] mapping HTTP methods to endpoints. Every resolved endpoint is
//! composed as `converter(hooks(handler))`: parameters are converted before any
//! hook runs, and a validation failure skips the hooks entirely.
use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use http::Method;

use crate::core::{
    context::Context,
    converter::{Converter, Signature},
    error::RouteDeclarationError,
    handler::{Endpoint, Handler, HandlerResult},
    hooks::HookAttachment,
};

/// Methods a view may declare, in lowercase.
pub const HTTP_METHODS: [&str; 7] = ["get", "head", "post", "put", "delete", "options", "patch"];

/// Pseudo-method mapping a function view to the catch-all handler.
pub const ALL_METHODS: &str = "all";

#[derive(Clone)]
struct MethodHandler {
    endpoint: Endpoint,
    hooks: Vec<HookAttachment>,
}

impl MethodHandler {
    fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            hooks: Vec::new(),
        }
    }

    fn compose(&self, converter: &Arc<Converter>) -> Endpoint {
        let hooked = self
            .hooks
            .iter()
            .fold(self.endpoint.clone(), |inner, hook| hook.wrap(inner));
        Arc::new(Converting {
            converter: converter.clone(),
            inner: hooked,
        })
    }
}

struct Converting {
    converter: Arc<Converter>,
    inner: Endpoint,
}

#[async_trait]
impl Handler for Converting {
    async fn call(&self, ctx: &mut Context) -> HandlerResult {
        ctx.params = self
            .converter
            .convert(&ctx.raw_params, ctx.req.query_params())?;
        self.inner.call(ctx).await
    }
}

/// A view handling the request with a single endpoint.
#[derive(Clone)]
pub struct FunctionView {
    name: String,
    handler: MethodHandler,
    methods: Vec<String>,
    signature: Signature,
}

impl FunctionView {
    pub fn new<F>(name: impl Into<String>, handler: F) -> Self
    where
        F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a, HandlerResult> + Send + Sync + 'static,
    {
        Self::from_endpoint(name, Arc::new(handler))
    }

    pub fn from_endpoint(name: impl Into<String>, endpoint: Endpoint) -> Self {
        Self {
            name: name.into(),
            handler: MethodHandler::new(endpoint),
            methods: vec!["get".to_string()],
            signature: Signature::default(),
        }
    }

    /// Methods served by this view; defaults to `get`. `all` serves every method.
    pub fn methods(mut self, methods: &[&str]) -> Self {
        self.methods = methods.iter().map(|m| m.to_ascii_lowercase()).collect();
        self
    }

    pub fn signature(mut self, signature: Signature) -> Self {
        self.signature = signature;
        self
    }

    pub fn hook(mut self, attachment: HookAttachment) -> Self {
        self.handler.hooks.push(attachment);
        self
    }
}

/// A view with one endpoint per HTTP method, or a single `handle`.
#[derive(Clone)]
pub struct ClassView {
    name: String,
    handlers: Vec<(String, MethodHandler)>,
    handle: Option<MethodHandler>,
    signature: Signature,
}

impl ClassView {
    /// Create a class view; `HelloWorld` is registered under the name `hello_world`.
    pub fn new(class_name: &str) -> Self {
        Self {
            name: camel_to_snake(class_name),
            handlers: Vec::new(),
            handle: None,
            signature: Signature::default(),
        }
    }

    /// Set the handler for `method`, replacing a previous one.
    pub fn method(mut self, method: &str, endpoint: Endpoint) -> Self {
        let method = method.to_ascii_lowercase();
        let handler = MethodHandler::new(endpoint);
        match self.handlers.iter_mut().find(|(name, _)| *name == method) {
            Some((_, existing)) => *existing = handler,
            None => self.handlers.push((method, handler)),
        }
        self
    }

    pub fn get<F>(self, handler: F) -> Self
    where
        F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a, HandlerResult> + Send + Sync + 'static,
    {
        self.method("get", Arc::new(handler))
    }

    pub fn head<F>(self, handler: F) -> Self
    where
        F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a, HandlerResult> + Send + Sync + 'static,
    {
        self.method("head", Arc::new(handler))
    }

    pub fn post<F>(self, handler: F) -> Self
    where
        F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a, HandlerResult> + Send + Sync + 'static,
    {
        self.method("post", Arc::new(handler))
    }

    pub fn put<F>(self, handler: F) -> Self
    where
        F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a, HandlerResult> + Send + Sync + 'static,
    {
        self.method("put", Arc::new(handler))
    }

    pub fn patch<F>(self, handler: F) -> Self
    where
        F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a, HandlerResult> + Send + Sync + 'static,
    {
        self.method("patch", Arc::new(handler))
    }

    pub fn delete<F>(self, handler: F) -> Self
    where
        F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a, HandlerResult> + Send + Sync + 'static,
    {
        self.method("delete", Arc::new(handler))
    }

    pub fn options<F>(self, handler: F) -> Self
    where
        F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a, HandlerResult> + Send + Sync + 'static,
    {
        self.method("options", Arc::new(handler))
    }

    /// Catch-all handler. When present every other method handler is ignored.
    pub fn handle<F>(mut self, handler: F) -> Self
    where
        F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a, HandlerResult> + Send + Sync + 'static,
    {
        self.handle = Some(MethodHandler::new(Arc::new(handler)));
        self
    }

    pub fn signature(mut self, signature: Signature) -> Self {
        self.signature = signature;
        self
    }

    /// Attach a hook to every method handler declared so far.
    pub fn hook(mut self, attachment: HookAttachment) -> Self {
        for (_, handler) in &mut self.handlers {
            handler.hooks.push(attachment.clone());
        }
        if let Some(handle) = &mut self.handle {
            handle.hooks.push(attachment);
        }
        self
    }

    /// Attach a hook to a single method handler, if it is declared.
    pub fn hook_method(mut self, method: &str, attachment: HookAttachment) -> Self {
        let method = method.to_ascii_lowercase();
        if method == "handle" {
            if let Some(handle) = &mut self.handle {
                handle.hooks.push(attachment);
            }
        } else if let Some((_, handler)) = self.handlers.iter_mut().find(|(m, _)| *m == method) {
            handler.hooks.push(attachment);
        }
        self
    }
}

/// Closed set of view shapes accepted by the router.
#[derive(Clone)]
pub enum View {
    Function(FunctionView),
    Class(ClassView),
}

impl View {
    pub fn function<F>(name: impl Into<String>, handler: F) -> FunctionView
    where
        F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a, HandlerResult> + Send + Sync + 'static,
    {
        FunctionView::new(name, handler)
    }

    pub fn class(class_name: &str) -> ClassView {
        ClassView::new(class_name)
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Function(view) => &view.name,
            Self::Class(view) => &view.name,
        }
    }

    pub fn signature(&self) -> &Signature {
        match self {
            Self::Function(view) => &view.signature,
            Self::Class(view) => &view.signature,
        }
    }

    pub(crate) fn override_methods(&mut self, methods: &[String]) {
        if let Self::Function(view) = self {
            view.methods = methods.iter().map(|m| m.to_ascii_lowercase()).collect();
        }
    }

    /// Resolve the view into its method dispatch table.
    pub(crate) fn resolve(
        &self,
        converter: &Arc<Converter>,
    ) -> Result<MethodTable, RouteDeclarationError> {
        let mut table = MethodTable::default();
        match self {
            Self::Function(view) => {
                for method in &view.methods {
                    if method == ALL_METHODS {
                        table.fallback = Some(view.handler.compose(converter));
                    } else {
                        let parsed = parse_method(&view.name, method)?;
                        table.handlers.insert(parsed, view.handler.compose(converter));
                    }
                }
            }
            Self::Class(view) => {
                for (method, _) in &view.handlers {
                    parse_method(&view.name, method)?;
                }
                if let Some(handle) = &view.handle {
                    table.fallback = Some(handle.compose(converter));
                } else {
                    for (method, handler) in &view.handlers {
                        let parsed = parse_method(&view.name, method)?;
                        table.handlers.insert(parsed, handler.compose(converter));
                    }
                }
            }
        }

        if table.fallback.is_none() && table.handlers.is_empty() {
            return Err(RouteDeclarationError::EmptyView {
                view: self.name().to_string(),
            });
        }
        if !table.handlers.contains_key(&Method::HEAD) {
            if let Some(get) = table.handlers.get(&Method::GET).cloned() {
                table.handlers.insert(Method::HEAD, get);
            }
        }
        Ok(table)
    }
}

impl From<FunctionView> for View {
    fn from(view: FunctionView) -> Self {
        Self::Function(view)
    }
}

impl From<ClassView> for View {
    fn from(view: ClassView) -> Self {
        Self::Class(view)
    }
}

fn parse_method(view: &str, method: &str) -> Result<Method, RouteDeclarationError> {
    if !HTTP_METHODS.contains(&method) {
        return Err(RouteDeclarationError::UnknownMethod {
            view: view.to_string(),
            method: method.to_string(),
        });
    }
    Method::from_bytes(method.to_ascii_uppercase().as_bytes()).map_err(|_| {
        RouteDeclarationError::UnknownMethod {
            view: view.to_string(),
            method: method.to_string(),
        }
    })
}

/// Resolved per-method endpoints of one route.
#[derive(Clone, Default)]
pub struct MethodTable {
    handlers: HashMap<Method, Endpoint>,
    fallback: Option<Endpoint>,
}

impl MethodTable {
    /// The endpoint serving `method`; a catch-all handler wins over everything.
    pub fn resolve(&self, method: &Method) -> Option<&Endpoint> {
        self.fallback.as_ref().or_else(|| self.handlers.get(method))
    }

    /// Explicitly handled methods, sorted; empty when a catch-all is present.
    pub fn allowed(&self) -> Vec<Method> {
        if self.fallback.is_some() {
            return Vec::new();
        }
        let mut methods: Vec<_> = self.handlers.keys().cloned().collect();
        methods.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        methods
    }
}

/// `HelloWorld` -> `hello_world`, `HTTPStatus` -> `http_status`.
pub fn camel_to_snake(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let mut snake = String::with_capacity(name.len() + 4);
    for (i, &c) in chars.iter().enumerate() {
        if c.is_uppercase() {
            let prev = i.checked_sub(1).map(|j| chars[j]);
            let next = chars.get(i + 1).copied();
            let boundary = match prev {
                Some(p) if p.is_lowercase() || p.is_ascii_digit() => true,
                Some(p) if p.is_uppercase() => next.is_some_and(char::is_lowercase),
                _ => false,
            };
            if boundary {
                snake.push('_');
            }
            snake.extend(c.to_lowercase());
        } else {
            snake.push(c);
        }
    }
    snake
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{handler::endpoint, pattern::CompiledPattern};

    fn ok() -> Endpoint {
        endpoint(|_ctx| Box::pin(async { Ok(()) }))
    }

    fn converter() -> Arc<Converter> {
        let pattern = CompiledPattern::new("/").unwrap();
        Arc::new(Converter::new(&Signature::new(), &pattern))
    }

    #[test]
    fn test_camel_to_snake() {
        assert_eq!(camel_to_snake("HelloWorld"), "hello_world");
        assert_eq!(camel_to_snake("HTTPStatus"), "http_status");
        assert_eq!(camel_to_snake("Item2Detail"), "item2_detail");
        assert_eq!(camel_to_snake("index"), "index");
    }

    #[test]
    fn test_function_view_defaults_to_get_and_head() {
        let view: View = FunctionView::from_endpoint("index", ok()).into();
        let table = view.resolve(&converter()).unwrap();
        assert_eq!(table.allowed(), vec![Method::GET, Method::HEAD]);
        assert!(table.resolve(&Method::POST).is_none());
    }

    #[test]
    fn test_function_view_all_serves_every_method() {
        let view: View = FunctionView::from_endpoint("any", ok()).methods(&["all"]).into();
        let table = view.resolve(&converter()).unwrap();
        assert!(table.resolve(&Method::DELETE).is_some());
        assert!(table.resolve(&Method::PATCH).is_some());
    }

    #[test]
    fn test_unknown_method_is_a_declaration_error() {
        let view: View = FunctionView::from_endpoint("index", ok())
            .methods(&["get", "fetch"])
            .into();
        assert_eq!(
            view.resolve(&converter()).err(),
            Some(RouteDeclarationError::UnknownMethod {
                view: "index".to_string(),
                method: "fetch".to_string(),
            })
        );
    }

    #[test]
    fn test_class_view_head_aliases_get() {
        let view: View = ClassView::new("Items").method("get", ok()).into();
        let table = view.resolve(&converter()).unwrap();
        assert!(table.resolve(&Method::HEAD).is_some());
        assert!(table.resolve(&Method::PUT).is_none());
        assert_eq!(view.name(), "items");
    }

    #[test]
    fn test_class_view_handle_overrides_everything() {
        let view: View = ClassView::new("Everything")
            .method("get", ok())
            .method("post", ok())
            .handle(|_ctx| Box::pin(async { Ok(()) }))
            .into();
        let table = view.resolve(&converter()).unwrap();
        assert!(table.resolve(&Method::PUT).is_some());
        assert!(table.allowed().is_empty());
    }

    #[test]
    fn test_empty_class_view_is_rejected() {
        let view: View = ClassView::new("Nothing").into();
        assert!(matches!(
            view.resolve(&converter()),
            Err(RouteDeclarationError::EmptyView { .. })
        ));
    }
}
