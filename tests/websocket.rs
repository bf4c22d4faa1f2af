// WebSocket views routed through the application: in-memory connections via
// the test client, and real sockets through the axum adapter
#[cfg(test)]
mod test {
    use std::{convert::Infallible, sync::Arc};

    use axum::body::Body;
    use futures_util::{SinkExt, StreamExt};
    use panino::{
        App, Recipe, WebSocketOptions,
        adapters::build_router,
        core::{Mount, websocket::ValueType},
        ports::websocket::WsMessage,
        testing::{ServerEvent, TestClient},
    };
    use serde_json::json;
    use tokio::net::TcpListener;
    use tokio_tungstenite::{connect_async, tungstenite};

    fn echo_app() -> App {
        let mut app = App::new();
        app.websocket_route(
            "/echo",
            |ws| {
                Box::pin(async move {
                    while let Some(message) = ws.next().await? {
                        ws.send(message).await?;
                    }
                    Ok(())
                })
            },
            WebSocketOptions::new(),
        )
        .unwrap();
        app
    }

    #[tokio::test]
    async fn test_echo_until_client_closes() {
        let client = TestClient::new(echo_app());
        let (task, mut ws) = client.websocket("/echo");

        ws.send_text("hello");
        ws.send_text("again");
        ws.close(1000);

        assert_eq!(ws.next_event().await, Some(ServerEvent::Accepted));
        assert_eq!(
            ws.next_event().await,
            Some(ServerEvent::Message(WsMessage::Text("hello".to_string())))
        );
        assert_eq!(
            ws.next_event().await,
            Some(ServerEvent::Message(WsMessage::Text("again".to_string())))
        );
        assert_eq!(ws.next_event().await, None);
        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_json_messages() {
        let mut app = App::new();
        app.websocket_route(
            "/sum",
            |ws| {
                Box::pin(async move {
                    let numbers: Vec<i64> = ws.receive_json().await?;
                    ws.send_json(&json!({"sum": numbers.iter().sum::<i64>()})).await?;
                    Ok(())
                })
            },
            WebSocketOptions::new().value_type(ValueType::Json),
        )
        .unwrap();

        let (task, mut ws) = TestClient::new(app).websocket("/sum");
        ws.send_text("[1, 2, 3]");

        assert_eq!(ws.next_event().await, Some(ServerEvent::Accepted));
        let Some(ServerEvent::Message(WsMessage::Text(text))) = ws.next_event().await else {
            panic!("expected a text message");
        };
        assert_eq!(serde_json::from_str::<serde_json::Value>(&text).unwrap(), json!({"sum": 6}));
        assert_eq!(ws.next_event().await, Some(ServerEvent::Closed(1000)));
        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_unexpected_message_type_closes_with_1011() {
        let mut app = App::new();
        app.websocket_route(
            "/text",
            |ws| {
                Box::pin(async move {
                    ws.receive_text().await?;
                    Ok(())
                })
            },
            WebSocketOptions::new(),
        )
        .unwrap();

        let (task, mut ws) = TestClient::new(app).websocket("/text");
        ws.send_bytes(vec![1u8, 2, 3]);

        assert_eq!(ws.next_event().await, Some(ServerEvent::Accepted));
        assert_eq!(ws.next_event().await, Some(ServerEvent::Closed(1011)));
        assert!(task.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn test_unmatched_path_closes_with_403() {
        let (task, mut ws) = TestClient::new(echo_app()).websocket("/nowhere");
        assert_eq!(ws.next_event().await, Some(ServerEvent::Closed(403)));
        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_recipe_and_mounted_app_websockets() {
        let mut recipe = Recipe::new("chat");
        recipe
            .websocket_route(
                "/room/{name}",
                |ws| {
                    Box::pin(async move {
                        let name = ws.params.str("name").unwrap_or_default().to_string();
                        ws.send_text(format!("joined {name}")).await?;
                        Ok(())
                    })
                },
                WebSocketOptions::new(),
            )
            .unwrap();

        let mut app = App::new();
        app.recipe(&recipe).unwrap();
        app.mount("/v2", echo_app()).unwrap();
        let legacy = tower::service_fn(|_req: http::Request<Body>| async {
            Ok::<_, Infallible>(http::Response::new(Body::empty()))
        });
        app.mount("/legacy", Mount::service(legacy)).unwrap();
        let client = TestClient::new(app);

        let (_, mut ws) = client.websocket("/chat/room/lobby");
        assert_eq!(ws.next_event().await, Some(ServerEvent::Accepted));
        assert_eq!(
            ws.next_event().await,
            Some(ServerEvent::Message(WsMessage::Text("joined lobby".to_string())))
        );

        let (_, mut ws) = client.websocket("/v2/echo");
        ws.send_text("mounted");
        assert_eq!(ws.next_event().await, Some(ServerEvent::Accepted));
        assert_eq!(
            ws.next_event().await,
            Some(ServerEvent::Message(WsMessage::Text("mounted".to_string())))
        );

        let (_, mut ws) = client.websocket("/legacy/socket");
        assert_eq!(ws.next_event().await, Some(ServerEvent::Closed(403)));
    }

    async fn spawn_server(app: App) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let router = build_router(Arc::new(app));
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("ws://{addr}")
    }

    #[tokio::test]
    async fn test_echo_over_axum() {
        let base = spawn_server(echo_app()).await;
        let (mut socket, _) = connect_async(format!("{base}/echo")).await.unwrap();

        socket
            .send(tungstenite::Message::Text("over the wire".into()))
            .await
            .unwrap();
        let reply = socket.next().await.unwrap().unwrap();
        assert_eq!(reply, tungstenite::Message::Text("over the wire".into()));

        socket.close(None).await.unwrap();
    }

    #[tokio::test]
    async fn test_rejected_handshake_over_axum() {
        let base = spawn_server(echo_app()).await;
        let err = connect_async(format!("{base}/nowhere")).await.unwrap_err();
        match err {
            tungstenite::Error::Http(response) => assert_eq!(response.status(), 403),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_server_close_code_over_axum() {
        let mut app = App::new();
        app.websocket_route(
            "/once",
            |ws| {
                Box::pin(async move {
                    ws.send_text("bye").await?;
                    Ok(())
                })
            },
            WebSocketOptions::new(),
        )
        .unwrap();

        let base = spawn_server(app).await;
        let (mut socket, _) = connect_async(format!("{base}/once")).await.unwrap();
        assert_eq!(
            socket.next().await.unwrap().unwrap(),
            tungstenite::Message::Text("bye".into())
        );
        match socket.next().await.unwrap().unwrap() {
            tungstenite::Message::Close(Some(frame)) => assert_eq!(u16::from(frame.code), 1000),
            other => panic!("expected a close frame, got {other:?}"),
        }
    }
}
