//! REST transport against a mock support backend

use std::sync::Arc;

use serde_json::json;
use support_chat::{
    HttpTransport, MessageKind, SessionManager, SessionStatus, SupportChatConfig,
    SupportChatError, TransportAdapter,
};
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config_for(server: &MockServer) -> SupportChatConfig {
    SupportChatConfig {
        api_base: format!("{}/api", server.uri()),
        auth_token: Some("test-token".to_string()),
        customer_id: "cust-1".to_string(),
        poll_interval_ms: 3_600_000,
        ..SupportChatConfig::default()
    }
}

fn session_json(id: &str, status: &str) -> serde_json::Value {
    json!({ "id": id, "status": status, "createdAt": "2024-05-01T10:00:00Z" })
}

#[tokio::test]
async fn test_list_sessions_sends_bearer_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/chat/sessions"))
        .and(header("authorization", "Bearer test-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            session_json("S2", "WAITING_STAFF"),
            session_json("S1", "CLOSED"),
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let transport = HttpTransport::new(&config_for(&server)).unwrap();
    let sessions = transport.list_sessions().await.unwrap();

    assert_eq!(sessions.len(), 2);
    assert_eq!(sessions[0].id, "S2");
    assert_eq!(sessions[0].status, SessionStatus::WaitingStaff);
    assert_eq!(sessions[1].status, SessionStatus::Closed);
}

#[tokio::test]
async fn test_get_messages_decodes_history() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/chat/sessions/S1/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {
                "id": "m1",
                "sessionId": "S1",
                "senderId": "staff-7",
                "senderName": "Dana",
                "content": "Hello!",
                "createdAt": "2024-05-01T10:00:05Z"
            }
        ])))
        .mount(&server)
        .await;

    let transport = HttpTransport::new(&config_for(&server)).unwrap();
    let messages = transport.get_messages("S1").await.unwrap();

    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].sender_name.as_deref(), Some("Dana"));
    assert!(!messages[0].is_pending());
}

#[tokio::test]
async fn test_send_message_posts_text_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat/sessions/S1/messages"))
        .and(body_json(json!({ "content": "hi", "type": "TEXT" })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let transport = HttpTransport::new(&config_for(&server)).unwrap();
    let ack = transport
        .send_message("S1", "hi", MessageKind::Text)
        .await
        .unwrap();

    assert_eq!(ack.message_id, None);
}

#[tokio::test]
async fn test_status_codes_are_classified() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/chat/sessions"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/chat/sessions/quick"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/chat/sessions/S1/messages"))
        .respond_with(ResponseTemplate::new(409).set_body_string("session not connected"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/chat/sessions/S1/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
        .mount(&server)
        .await;

    let transport = HttpTransport::new(&config_for(&server)).unwrap();

    let err = transport.list_sessions().await.unwrap_err();
    assert!(err.is_authentication());

    let err = transport.quick_create().await.unwrap_err();
    assert!(err.is_transient());
    assert!(err.to_string().contains("maintenance"));

    let err = transport
        .send_message("S1", "hi", MessageKind::Text)
        .await
        .unwrap_err();
    assert!(matches!(err, SupportChatError::ServerRejection(_)));

    let err = transport.get_messages("S1").await.unwrap_err();
    assert!(matches!(err, SupportChatError::InvalidResponse(_)));
}

#[tokio::test]
async fn test_unreachable_backend_is_transient() {
    let config = SupportChatConfig {
        api_base: "http://127.0.0.1:9/api".to_string(),
        ..SupportChatConfig::default()
    };
    let transport = HttpTransport::new(&config).unwrap();

    let err = transport.list_sessions().await.unwrap_err();
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_manager_connects_over_http() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/chat/sessions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/chat/sessions/quick"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(session_json("S1", "WAITING_STAFF")),
        )
        .expect(1)
        .mount(&server)
        .await;

    let config = config_for(&server);
    let transport = Arc::new(HttpTransport::new(&config).unwrap());
    let manager = SessionManager::new(transport, config);

    let binding = manager.select_staff().await.unwrap();
    assert_eq!(binding.session_id, "S1");
    assert_eq!(binding.status, SessionStatus::WaitingStaff);

    let err = manager.send("hello").await.unwrap_err();
    assert!(matches!(
        err,
        SupportChatError::SendNotPermitted(SessionStatus::WaitingStaff)
    ));
    manager.close();
}
