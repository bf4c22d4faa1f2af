//! Per-request context handed to views, hooks, middleware and error handlers.
use std::{collections::HashMap, sync::Arc};

use eyre::Result;
use http::Extensions;

use crate::core::{
    app::App,
    converter::Params,
    handler::HandlerResult,
    pattern::RawParams,
    providers::{self, Instance},
    request::{Request, Response},
};

pub struct Context {
    pub req: Request,
    pub res: Response,
    /// Route parameters; converted once the view's converter has run.
    pub params: Params,
    /// Free-form values shared between middleware, hooks and views.
    pub extensions: Extensions,
    pub(crate) raw_params: RawParams,
    app: Arc<App>,
    providers: HashMap<String, Instance>,
}

impl Context {
    pub(crate) fn new(app: Arc<App>, req: Request) -> Self {
        let res = Response::new(app.media());
        Self {
            req,
            res,
            params: Params::new(),
            extensions: Extensions::new(),
            raw_params: RawParams::new(),
            app,
            providers: HashMap::new(),
        }
    }

    #[cfg(test)]
    pub(crate) fn for_path(app: Arc<App>, path: &str) -> Self {
        let uri = path.parse().unwrap_or_default();
        Self::new(
            app,
            Request::new(
                http::Method::GET,
                uri,
                http::HeaderMap::new(),
                bytes::Bytes::new(),
            ),
        )
    }

    pub(crate) fn set_raw_params(&mut self, raw: RawParams) {
        self.params = Params::from_raw(&raw);
        self.raw_params = raw;
    }

    pub fn app(&self) -> &Arc<App> {
        &self.app
    }

    /// Reverse a named route, see [`App::url_for`].
    pub fn url_for<I, K, V>(&self, name: &str, params: I) -> Result<String>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: ToString,
    {
        self.app.url_for(name, params)
    }

    /// Redirect to a named route.
    pub fn redirect_to<I, K, V>(&mut self, name: &str, params: I, permanent: bool) -> HandlerResult
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: ToString,
    {
        let url = self.app.url_for(name, params)?;
        self.res.redirect(&url, permanent)?;
        Ok(())
    }

    /// Resolve a named provider. Request-scoped values are cached on this context.
    pub async fn provider<T: Send + Sync + 'static>(&mut self, name: &str) -> Result<Arc<T>> {
        let instance = self
            .app
            .providers()
            .resolve(name, &mut self.providers)
            .await?;
        providers::downcast(name, instance)
    }
}
