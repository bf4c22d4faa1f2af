//! axum transport adapter: binds the listener, applies the outer tower layers
//! and forwards every request to the application.
use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    Router,
    extract::{FromRequestParts, Request, State, ws::WebSocketUpgrade},
    http::{HeaderName, HeaderValue, Method},
    middleware,
    response::Response,
};
use eyre::{Result, WrapErr};
use tower_http::{
    compression::{
        CompressionLayer,
        predicate::{NotForContentType, Predicate, SizeAbove},
    },
    cors::{AllowHeaders, AllowMethods, AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::Instrument;

use crate::{
    adapters::{
        middleware::{
            create_allowed_hosts_middleware, hsts_middleware, request_id_middleware,
            request_timing_middleware,
        },
        websocket,
    },
    config::CorsConfig,
    core::app::App,
    tracing_setup::configure_component_tracing,
    utils::GracefulShutdown,
};

/// Entry point for every request reaching the axum router.
async fn dispatch(State(app): State<Arc<App>>, req: Request) -> Response {
    let (mut parts, body) = req.into_parts();
    match WebSocketUpgrade::from_request_parts(&mut parts, &()).await {
        Ok(upgrade) => websocket::upgrade(app, parts, upgrade).await,
        Err(_) => app.handle(Request::from_parts(parts, body)).await,
    }
}

/// Build the axum router serving `app` with the outer layers its
/// configuration enables.
pub fn build_router(app: Arc<App>) -> Router {
    let config = app.config().clone();
    let mut router = Router::new().fallback(dispatch).with_state(app);

    if config.request_id {
        router = router.layer(middleware::from_fn(request_id_middleware));
    }
    if let Some(cors) = &config.cors {
        router = router.layer(cors_layer(cors));
    }
    if config.gzip {
        router = router.layer(
            CompressionLayer::new()
                .gzip(true)
                .compress_when(SizeAbove::new(config.gzip_min_size).and(NotForContentType::SSE)),
        );
    }
    if config.hsts {
        router = router.layer(middleware::from_fn(hsts_middleware));
    }

    router
        .layer(middleware::from_fn(create_allowed_hosts_middleware(Arc::new(
            config.allowed_hosts.clone(),
        ))))
        .layer(middleware::from_fn(request_timing_middleware))
        .layer(TraceLayer::new_for_http())
}

fn cors_layer(cors: &CorsConfig) -> CorsLayer {
    let mut layer = CorsLayer::new();

    layer = if cors.allow_origins.iter().any(|origin| origin == "*") {
        layer.allow_origin(Any)
    } else {
        layer.allow_origin(AllowOrigin::list(
            cors.allow_origins
                .iter()
                .filter_map(|origin| HeaderValue::from_str(origin).ok()),
        ))
    };

    layer = layer.allow_methods(AllowMethods::list(
        cors.allow_methods
            .iter()
            .filter_map(|method| method.to_ascii_uppercase().parse::<Method>().ok()),
    ));

    layer = if cors.allow_headers.iter().any(|name| name == "*") {
        layer.allow_headers(Any)
    } else {
        layer.allow_headers(AllowHeaders::list(
            cors.allow_headers
                .iter()
                .filter_map(|name| name.parse::<HeaderName>().ok()),
        ))
    };

    if let Some(secs) = cors.max_age_secs {
        layer = layer.max_age(Duration::from_secs(secs));
    }
    layer
}

/// Serve `app` until `shutdown` is triggered.
///
/// Runs the startup lifespan before accepting connections and the shutdown
/// lifespan once the server drained.
pub async fn serve(app: App, shutdown: GracefulShutdown) -> Result<()> {
    let app = Arc::new(app);
    let addr: SocketAddr = app
        .config()
        .listen_addr
        .parse()
        .wrap_err_with(|| format!("Invalid listen address: {}", app.config().listen_addr))?;

    app.startup().await.wrap_err("Application startup failed")?;

    let router = build_router(app.clone());
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .wrap_err("Failed to bind to address")?;
    tracing::info!("panino server listening on {}", addr);

    let token = shutdown.token();
    let result = axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let reason = token.wait().await;
            tracing::info!("Shutdown signal received: {:?}", reason);
        })
        .await
        .wrap_err("Server error");

    let stopped = app.shutdown().await;
    result?;
    stopped?;
    tracing::info!("Graceful shutdown completed");
    Ok(())
}

/// Serve `app` until SIGINT or SIGTERM.
pub async fn run(app: App) -> Result<()> {
    let shutdown = GracefulShutdown::new();
    let signals = shutdown.clone();
    tokio::spawn(
        async move {
            if let Err(e) = signals.run_signal_handler().await {
                tracing::error!("Signal handler failed: {:?}", e);
            }
        }
        .instrument(configure_component_tracing("signals")),
    );
    serve(app, shutdown)
        .instrument(configure_component_tracing("server"))
        .await
}
