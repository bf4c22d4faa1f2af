// Streamed bodies, server-sent events, file attachments and background tasks,
// exercised through the in-process test client
#[cfg(test)]
mod test {
    use std::{sync::Arc, time::Duration};

    use futures_util::stream;
    use http::StatusCode;
    use panino::{App, FunctionView, RouteOptions, ServerSentEvent, testing::TestClient};
    use serde_json::json;
    use tokio::sync::{Mutex, oneshot};

    #[tokio::test]
    async fn test_streamed_body() {
        let mut app = App::new();
        app.route(
            "/count",
            FunctionView::new("count", |ctx| {
                Box::pin(async move {
                    ctx.res
                        .stream(stream::iter((1..=3).map(|n| format!("{n}\n"))));
                    Ok(())
                })
            }),
            RouteOptions::new(),
        )
        .unwrap();
        let client = TestClient::new(app);

        let response = client.get("/count").await;
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.text(), "1\n2\n3\n");
        assert_eq!(response.header("content-type"), Some("text/plain; charset=utf-8"));
        assert_eq!(response.header("content-length"), None);

        let response = client.head("/count").await;
        assert_eq!(response.status, StatusCode::OK);
        assert!(response.body.is_empty());
    }

    #[tokio::test]
    async fn test_event_stream() {
        let mut app = App::new();
        app.route(
            "/events",
            FunctionView::new("events", |ctx| {
                Box::pin(async move {
                    let events = vec![
                        ServerSentEvent::new().name("greeting").data("hello"),
                        ServerSentEvent::new().id(2).json(&json!({"n": 2}))?,
                    ];
                    ctx.res.event_stream(stream::iter(events));
                    Ok(())
                })
            }),
            RouteOptions::new(),
        )
        .unwrap();

        let response = TestClient::new(app).get("/events").await;
        assert_eq!(response.header("content-type"), Some("text/event-stream"));
        assert_eq!(response.header("cache-control"), Some("no-cache"));
        assert_eq!(
            response.text(),
            "event: greeting\ndata: hello\n\nid: 2\ndata: {\"n\":2}\n\n"
        );
    }

    #[tokio::test]
    async fn test_background_task_runs_after_response() {
        let (tx, rx) = oneshot::channel();
        let tx = Arc::new(Mutex::new(Some(tx)));
        let mut app = App::new();
        app.route(
            "/signup",
            FunctionView::new("signup", move |ctx| {
                let tx = tx.clone();
                Box::pin(async move {
                    ctx.res.text("welcome").background(async move {
                        if let Some(tx) = tx.lock().await.take() {
                            let _ = tx.send("email sent");
                        }
                        Ok(())
                    });
                    Ok(())
                })
            }),
            RouteOptions::new(),
        )
        .unwrap();

        let response = TestClient::new(app).get("/signup").await;
        assert_eq!(response.text(), "welcome");
        let sent = tokio::time::timeout(Duration::from_secs(5), rx)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(sent, "email sent");
    }

    #[tokio::test]
    async fn test_file_attachment_and_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.csv");
        std::fs::write(&path, "a,b\n1,2\n").unwrap();

        let mut app = App::new();
        app.route(
            "/report",
            FunctionView::new("report", move |ctx| {
                let path = path.clone();
                Box::pin(async move {
                    ctx.res.file(&path, true).await?;
                    Ok(())
                })
            }),
            RouteOptions::new(),
        )
        .unwrap();
        let missing = dir.path().join("missing.csv");
        app.route(
            "/missing",
            FunctionView::new("missing", move |ctx| {
                let missing = missing.clone();
                Box::pin(async move {
                    ctx.res.file(&missing, false).await?;
                    Ok(())
                })
            }),
            RouteOptions::new(),
        )
        .unwrap();
        let client = TestClient::new(app);

        let response = client.get("/report").await;
        assert_eq!(response.text(), "a,b\n1,2\n");
        assert_eq!(
            response.header("content-disposition"),
            Some("attachment; filename=\"report.csv\"")
        );
        assert_eq!(response.header("content-type"), Some("application/octet-stream"));

        assert_eq!(client.get("/missing").await.status, StatusCode::NOT_FOUND);
    }
}
