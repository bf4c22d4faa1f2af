//! Outer transport middleware attached to the axum `Router` in front of the
//! application.
//!
//! These run before the application sees the request, so they work on raw
//! `http` types and never touch routing. Each is a plain `from_fn` function;
//! the ones needing configuration take it as an extra `Arc` argument.
use std::{sync::Arc, time::Instant};

use axum::{
    body::Body,
    extract::Request,
    http::{HeaderValue, StatusCode, Uri, header},
    middleware::Next,
    response::Response,
};

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Reject requests whose `Host` header is not allowed with 400.
///
/// `*` allows any host, `*.example.com` allows any subdomain of example.com.
pub async fn allowed_hosts_middleware(
    req: Request,
    next: Next,
    allowed_hosts: Arc<Vec<String>>,
) -> Response {
    let host = request_host(&req);
    let allowed = allowed_hosts.iter().any(|pattern| pattern == "*")
        || host
            .as_deref()
            .is_some_and(|host| allowed_hosts.iter().any(|pattern| host_matches(pattern, host)));
    if !allowed {
        tracing::warn!("Rejected request for disallowed host {:?}", host);
        return plain(StatusCode::BAD_REQUEST, "Invalid host header");
    }
    next.run(req).await
}

/// Create a cloneable closure wrapping [`allowed_hosts_middleware`].
pub fn create_allowed_hosts_middleware(
    allowed_hosts: Arc<Vec<String>>,
) -> impl Fn(Request, Next) -> std::pin::Pin<Box<dyn std::future::Future<Output = Response> + Send>>
+ Clone {
    move |req, next| {
        let allowed_hosts = allowed_hosts.clone();
        Box::pin(async move { allowed_hosts_middleware(req, next, allowed_hosts).await })
    }
}

/// Host name of the request without the port, from the URI or `Host` header.
fn request_host(req: &Request) -> Option<String> {
    let host = match req.uri().host() {
        Some(host) => host.to_string(),
        None => req.headers().get(header::HOST)?.to_str().ok()?.to_string(),
    };
    let host = match host.rsplit_once(':') {
        Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) => name.to_string(),
        _ => host,
    };
    Some(host.to_ascii_lowercase())
}

pub fn host_matches(pattern: &str, host: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    match pattern.strip_prefix("*.") {
        Some(domain) => host
            .strip_suffix(domain)
            .is_some_and(|sub| sub.len() > 1 && sub.ends_with('.')),
        None => pattern.eq_ignore_ascii_case(host),
    }
}

/// Redirect plain HTTP requests to HTTPS with a 301.
///
/// The scheme is taken from the URI or, behind a proxy, from
/// `X-Forwarded-Proto`.
pub async fn hsts_middleware(req: Request, next: Next) -> Response {
    let scheme = req
        .headers()
        .get("x-forwarded-proto")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .or_else(|| req.uri().scheme_str().map(str::to_string))
        .unwrap_or_else(|| "http".to_string());
    if scheme.eq_ignore_ascii_case("https") {
        return next.run(req).await;
    }

    let Some(host) = request_host(&req) else {
        return plain(StatusCode::BAD_REQUEST, "Missing host header");
    };
    let path_and_query = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let location = format!("https://{host}{path_and_query}");
    match location.parse::<Uri>().ok().and_then(|uri| HeaderValue::from_str(&uri.to_string()).ok()) {
        Some(location) => {
            let mut response = plain(StatusCode::MOVED_PERMANENTLY, "");
            response.headers_mut().insert(header::LOCATION, location);
            response
        }
        None => plain(StatusCode::BAD_REQUEST, "Invalid request target"),
    }
}

/// Log start/end of a request including latency.
pub async fn request_timing_middleware(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().clone();
    let uri = req.uri().clone();
    let version = req.version();

    tracing::info!("Started processing {} {} {:?}", method, uri, version);

    let response = next.run(req).await;
    let duration = start.elapsed();

    tracing::info!(
        "Completed {} {} {:?} - {} in {:?}",
        method,
        uri,
        version,
        response.status(),
        duration
    );

    response
}

/// Tag the request and the response with an `X-Request-ID`, keeping one sent
/// by the client.
pub async fn request_id_middleware(mut req: Request, next: Next) -> Response {
    let request_id = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .cloned()
        .or_else(|| HeaderValue::from_str(&uuid::Uuid::new_v4().to_string()).ok());

    if let Some(id) = &request_id {
        req.headers_mut().insert(REQUEST_ID_HEADER, id.clone());
    }

    let mut response = next.run(req).await;

    if let Some(id) = request_id {
        response.headers_mut().insert(REQUEST_ID_HEADER, id);
    }

    response
}

fn plain(status: StatusCode, body: &'static str) -> Response {
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    response
}

#[cfg(test)]
mod tests {
    use axum::{Router, middleware, routing::get};
    use tower::ServiceExt; // for oneshot

    use super::*;

    fn router() -> Router {
        Router::new().route("/", get(|| async { "ok" }))
    }

    #[test]
    fn test_host_matches() {
        assert!(host_matches("*", "anything.test"));
        assert!(host_matches("example.com", "EXAMPLE.com"));
        assert!(host_matches("*.example.com", "api.example.com"));
        assert!(!host_matches("*.example.com", "example.com"));
        assert!(!host_matches("*.example.com", "badexample.com"));
        assert!(!host_matches("example.com", "other.com"));
    }

    #[tokio::test]
    async fn test_allowed_hosts_middleware() {
        let hosts = Arc::new(vec!["example.com".to_string()]);
        let app = router().layer(middleware::from_fn(create_allowed_hosts_middleware(hosts)));

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/")
                    .header("host", "example.com:8000")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/")
                    .header("host", "evil.test")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_hsts_middleware_redirects_plain_http() {
        let app = router().layer(middleware::from_fn(hsts_middleware));

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/?page=2")
                    .header("host", "example.com")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::MOVED_PERMANENTLY);
        assert_eq!(
            response.headers().get(header::LOCATION).unwrap(),
            "https://example.com/?page=2"
        );

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/")
                    .header("host", "example.com")
                    .header("x-forwarded-proto", "https")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_request_id_middleware() {
        let app = router().layer(middleware::from_fn(request_id_middleware));

        let response = app
            .clone()
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let request_id = response.headers().get(REQUEST_ID_HEADER).unwrap().to_str().unwrap();
        assert!(uuid::Uuid::parse_str(request_id).is_ok());

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/")
                    .header(REQUEST_ID_HEADER, "abc-123")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.headers().get(REQUEST_ID_HEADER).unwrap(), "abc-123");
    }
}
