//! API routes

use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::auth::{auth_middleware, AppState};
use crate::handlers::{health, messages, release};

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    let state = Arc::new(state);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Health check routes (no auth required)
    let health_routes = Router::new()
        .route("/", get(health::health))
        .route("/live", get(health::liveness))
        .route("/ready", get(health::readiness))
        .with_state(state.clone());

    // API v1 routes with authentication
    let api_v1 = Router::new()
        .route(
            "/messages",
            get(messages::list_messages).delete(messages::delete_messages),
        )
        .route("/messages/read", put(messages::set_read))
        .route("/message/:id", get(messages::get_message))
        .route("/message/:id/raw", get(messages::get_raw))
        .route("/message/:id/headers", get(messages::get_headers))
        .route("/message/:id/release", post(release::release_message))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
        .with_state(state);

    Router::new()
        .nest("/health", health_routes)
        .nest("/api/v1", api_v1)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::hash_api_key;
    use crate::handlers::messages::{AffectedResponse, MessageListResponse, MessageSummary};
    use crate::handlers::release::ErrorResponse;
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request, StatusCode};
    use axum::response::Response;
    use holdbox_core::{RelayPolicy, ReleasePipeline, Transport, TransportError};
    use holdbox_storage::{DatabasePool, MessageRepository, MessageRepositoryTrait};
    use lettre::Address;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;
    use std::sync::Mutex;
    use tower::ServiceExt;

    const RAW: &[u8] = b"From: Alice <alice@example.com>\r\n\
To: bob@example.com\r\n\
Bcc: hidden@example.com\r\n\
Subject: Hello\r\n\
Received: from a\r\n\
Received: from b\r\n\
\r\n\
Hello Bob\r\n";

    #[derive(Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<(String, Vec<String>, Vec<u8>)>>,
        fail_with: Option<String>,
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn send(
            &self,
            sender: &Address,
            recipients: &[Address],
            raw: &[u8],
        ) -> Result<(), TransportError> {
            if let Some(text) = &self.fail_with {
                return Err(TransportError(text.clone()));
            }
            self.sent.lock().unwrap().push((
                sender.to_string(),
                recipients.iter().map(|r| r.to_string()).collect(),
                raw.to_vec(),
            ));
            Ok(())
        }
    }

    async fn setup() -> (AppState, MessageRepository) {
        let db = DatabasePool::in_memory().await.unwrap();
        db.migrate().await.unwrap();
        let state = AppState::new(db);
        let messages = state.messages.clone();
        (state, messages)
    }

    fn with_relay(
        state: AppState,
        policy: RelayPolicy,
        transport: Arc<RecordingTransport>,
    ) -> AppState {
        let pipeline = ReleasePipeline::new(
            Arc::new(state.messages.clone()),
            transport,
            Arc::new(policy),
        );
        state.with_release(Arc::new(pipeline))
    }

    async fn call(app: &Router, request: Request<Body>) -> Response {
        app.clone().oneshot(request).await.unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn json(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_bytes(response: Response) -> Vec<u8> {
        to_bytes(response.into_body(), usize::MAX).await.unwrap().to_vec()
    }

    async fn body_json<T: serde::de::DeserializeOwned>(response: Response) -> T {
        serde_json::from_slice(&body_bytes(response).await).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let (state, _) = setup().await;
        let app = create_router(state);

        let response = call(&app, get("/health")).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body: serde_json::Value = body_json(response).await;
        assert_eq!(body["relay_enabled"], false);

        assert_eq!(call(&app, get("/health/live")).await.status(), StatusCode::OK);
        assert_eq!(call(&app, get("/health/ready")).await.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_list_and_get_messages() {
        let (state, repo) = setup().await;
        let first = repo.create(RAW).await.unwrap();
        let second = repo.create(RAW).await.unwrap();
        repo.set_read(&[first.id], true).await.unwrap();
        let app = create_router(state);

        let response = call(&app, get("/api/v1/messages?limit=1")).await;
        assert_eq!(response.status(), StatusCode::OK);
        let list: MessageListResponse = body_json(response).await;
        assert_eq!(list.total, 2);
        assert_eq!(list.unread, 1);
        assert_eq!(list.count, 1);
        assert_eq!(list.messages[0].id, second.id);
        assert_eq!(list.messages[0].from.as_deref(), Some("alice@example.com"));
        assert_eq!(list.messages[0].to, vec!["bob@example.com".to_string()]);

        let response = call(&app, get("/api/v1/message/latest")).await;
        let summary: MessageSummary = body_json(response).await;
        assert_eq!(summary.id, second.id);

        let response = call(&app, get(&format!("/api/v1/message/{}", first.id))).await;
        let summary: MessageSummary = body_json(response).await;
        assert!(summary.read);

        assert_eq!(
            call(&app, get("/api/v1/message/nope")).await.status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            call(&app, get(&format!("/api/v1/message/{}", uuid::Uuid::now_v7()))).await.status(),
            StatusCode::NOT_FOUND
        );
    }

    #[tokio::test]
    async fn test_raw_and_headers() {
        let (state, repo) = setup().await;
        let stored = repo.create(RAW).await.unwrap();
        let app = create_router(state);

        let response = call(&app, get(&format!("/api/v1/message/{}/raw", stored.id))).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers()[header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("text/plain"));
        assert_eq!(body_bytes(response).await, RAW.to_vec());

        let response = call(&app, get("/api/v1/message/latest/headers")).await;
        let headers: BTreeMap<String, Vec<String>> = body_json(response).await;
        assert_eq!(headers["Subject"], vec!["Hello".to_string()]);
        assert_eq!(
            headers["Received"],
            vec!["from a".to_string(), "from b".to_string()]
        );
    }

    #[tokio::test]
    async fn test_set_read_and_delete() {
        let (state, repo) = setup().await;
        let first = repo.create(RAW).await.unwrap();
        let second = repo.create(RAW).await.unwrap();
        repo.create(RAW).await.unwrap();
        let app = create_router(state);

        let response = call(
            &app,
            json(
                "PUT",
                "/api/v1/messages/read",
                serde_json::json!({ "ids": [first.id, second.id], "read": true }),
            ),
        )
        .await;
        let affected: AffectedResponse = body_json(response).await;
        assert_eq!(affected.affected, 2);
        assert_eq!(repo.count_unread().await.unwrap(), 1);

        let response = call(
            &app,
            json("DELETE", "/api/v1/messages", serde_json::json!({ "ids": [first.id] })),
        )
        .await;
        let affected: AffectedResponse = body_json(response).await;
        assert_eq!(affected.affected, 1);

        let request = Request::builder()
            .method("DELETE")
            .uri("/api/v1/messages")
            .body(Body::empty())
            .unwrap();
        let affected: AffectedResponse = body_json(call(&app, request).await).await;
        assert_eq!(affected.affected, 2);
        assert_eq!(repo.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_set_read_without_ids_marks_everything() {
        let (state, repo) = setup().await;
        repo.create(RAW).await.unwrap();
        repo.create(RAW).await.unwrap();
        repo.create(RAW).await.unwrap();
        let app = create_router(state);

        let response = call(
            &app,
            json("PUT", "/api/v1/messages/read", serde_json::json!({ "read": true })),
        )
        .await;
        let affected: AffectedResponse = body_json(response).await;
        assert_eq!(affected.affected, 3);
        assert_eq!(repo.count_unread().await.unwrap(), 0);

        let response = call(
            &app,
            json(
                "PUT",
                "/api/v1/messages/read",
                serde_json::json!({ "ids": [], "read": false }),
            ),
        )
        .await;
        let affected: AffectedResponse = body_json(response).await;
        assert_eq!(affected.affected, 3);
        assert_eq!(repo.count_unread().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_raw_download() {
        let (state, repo) = setup().await;
        repo.create(RAW).await.unwrap();
        let stored = repo.create(RAW).await.unwrap();
        let app = create_router(state);

        let response = call(&app, get("/api/v1/message/latest/raw?dl=1")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION].to_str().unwrap(),
            format!("attachment; filename=\"{}.eml\"", stored.id)
        );
        assert_eq!(body_bytes(response).await, RAW.to_vec());

        let response = call(&app, get(&format!("/api/v1/message/{}/raw?dl=0", stored.id))).await;
        assert!(response.headers().get(header::CONTENT_DISPOSITION).is_none());

        let response = call(
            &app,
            get(&format!("/api/v1/message/{}/raw?dl=1", uuid::Uuid::now_v7())),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_release_disabled() {
        let (state, repo) = setup().await;
        let stored = repo.create(RAW).await.unwrap();
        let app = create_router(state);

        let response = call(
            &app,
            json(
                "POST",
                &format!("/api/v1/message/{}/release", stored.id),
                serde_json::json!({ "To": ["bob@example.com"] }),
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let error: ErrorResponse = body_json(response).await;
        assert_eq!(error.error, "RELAY_DISABLED");
    }

    #[tokio::test]
    async fn test_release_ok() {
        let (state, repo) = setup().await;
        let stored = repo.create(RAW).await.unwrap();
        let transport = Arc::new(RecordingTransport::default());
        let app = create_router(with_relay(state, RelayPolicy::default(), transport.clone()));

        let response = call(
            &app,
            json(
                "POST",
                &format!("/api/v1/message/{}/release", stored.id),
                serde_json::json!({ "To": ["Bob <bob@example.com>"] }),
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers()[header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("text/plain"));
        assert_eq!(body_bytes(response).await, b"ok".to_vec());

        let response = call(
            &app,
            json(
                "POST",
                "/api/v1/message/latest/release",
                serde_json::json!({ "to": ["carol@example.com"] }),
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let sent = transport.sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].0, "alice@example.com");
        assert_eq!(sent[0].1, vec!["bob@example.com".to_string()]);
        assert!(!String::from_utf8_lossy(&sent[0].2).contains("hidden@example.com"));
        assert_eq!(sent[1].1, vec!["carol@example.com".to_string()]);

        // The stored copy is untouched.
        let raw = repo
            .load_raw(holdbox_common::types::MessageRef::Id(stored.id))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(raw, RAW.to_vec());
    }

    #[tokio::test]
    async fn test_release_failures() {
        let (state, repo) = setup().await;
        let stored = repo.create(RAW).await.unwrap();
        let transport = Arc::new(RecordingTransport::default());
        let policy = RelayPolicy::new(
            Some(regex_for_example_com()),
            None,
        );
        let app = create_router(with_relay(state, policy, transport.clone()));
        let uri = format!("/api/v1/message/{}/release", stored.id);

        let cases = [
            (uri.clone(), serde_json::json!({ "To": ["eve@attacker.test"] }), StatusCode::BAD_REQUEST, "RECIPIENT_NOT_ALLOWED"),
            (uri.clone(), serde_json::json!({ "To": ["not an address"] }), StatusCode::BAD_REQUEST, "INVALID_ADDRESS"),
            (uri.clone(), serde_json::json!({ "To": [] }), StatusCode::BAD_REQUEST, "EMPTY_RECIPIENT_LIST"),
            (uri.clone(), serde_json::json!({}), StatusCode::BAD_REQUEST, "EMPTY_RECIPIENT_LIST"),
            (
                format!("/api/v1/message/{}/release", uuid::Uuid::now_v7()),
                serde_json::json!({ "To": ["bob@example.com"] }),
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
            ),
            (
                "/api/v1/message/garbage/release".to_string(),
                serde_json::json!({ "To": ["bob@example.com"] }),
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
            ),
            (
                "/api/v1/message/garbage/release".to_string(),
                serde_json::json!({ "To": [] }),
                StatusCode::BAD_REQUEST,
                "EMPTY_RECIPIENT_LIST",
            ),
        ];

        for (uri, body, status, code) in cases {
            let response = call(&app, json("POST", &uri, body.clone())).await;
            assert_eq!(response.status(), status, "{} {}", uri, body);
            let error: ErrorResponse = body_json(response).await;
            assert_eq!(error.error, code, "{} {}", uri, body);
        }

        assert!(transport.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_release_delivery_failure() {
        let (state, repo) = setup().await;
        let stored = repo.create(RAW).await.unwrap();
        let transport = Arc::new(RecordingTransport {
            fail_with: Some("connection refused".to_string()),
            ..RecordingTransport::default()
        });
        let app = create_router(with_relay(state, RelayPolicy::default(), transport));

        let response = call(
            &app,
            json(
                "POST",
                &format!("/api/v1/message/{}/release", stored.id),
                serde_json::json!({ "To": ["bob@example.com"] }),
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let error: ErrorResponse = body_json(response).await;
        assert_eq!(error.error, "DELIVERY_FAILED");
        assert_eq!(error.message, "SMTP error: connection refused");
    }

    #[tokio::test]
    async fn test_api_key_required_when_configured() {
        let (state, _) = setup().await;
        let app = create_router(state.with_api_keys(vec![hash_api_key("secret")]));

        assert_eq!(call(&app, get("/health")).await.status(), StatusCode::OK);
        assert_eq!(
            call(&app, get("/api/v1/messages")).await.status(),
            StatusCode::UNAUTHORIZED
        );

        let request = Request::builder()
            .uri("/api/v1/messages")
            .header("x-api-key", "wrong")
            .body(Body::empty())
            .unwrap();
        assert_eq!(call(&app, request).await.status(), StatusCode::UNAUTHORIZED);

        let request = Request::builder()
            .uri("/api/v1/messages")
            .header("authorization", "Bearer secret")
            .body(Body::empty())
            .unwrap();
        assert_eq!(call(&app, request).await.status(), StatusCode::OK);
    }

    fn regex_for_example_com() -> regex::Regex {
        regex::Regex::new(r"^.*@example\.com$").unwrap()
    }
}
