//! End-to-end flows of the session manager against the in-memory desk

mod common;

use std::time::Duration;

use common::{at, drain, setup, setup_manual, CUSTOMER_ID};
use support_chat::{
    ChatMode, SessionEvent, SessionStatus, SupportChatError, TransportOp, STAFF_SENDER_ID,
};

#[tokio::test(start_paused = true)]
async fn test_waiting_customer_cannot_send_until_staff_accepts() {
    let (desk, manager) = setup(Duration::from_secs(1));

    let binding = manager.select_staff().await.unwrap();
    assert_eq!(binding.status, SessionStatus::WaitingStaff);
    assert_eq!(manager.mode(), ChatMode::Staff);

    let err = manager.send("hello").await.unwrap_err();
    assert!(matches!(
        err,
        SupportChatError::SendNotPermitted(SessionStatus::WaitingStaff)
    ));
    assert_eq!(desk.calls(TransportOp::SendMessage), 0);

    desk.accept(&binding.session_id).unwrap();
    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert_eq!(manager.state(), SessionStatus::StaffConnected);

    let ack = manager.send("hello").await.unwrap();
    assert!(ack.message_id.is_some());

    let messages = manager.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].content, "hello");
    assert_eq!(messages[0].sender_id, CUSTOMER_ID);
    assert!(!messages[0].is_pending());
}

#[tokio::test]
async fn test_reuses_existing_session_with_ordered_history() {
    let (desk, manager) = setup_manual();
    let s1 = desk.open_session(SessionStatus::StaffConnected);
    desk.seed_message(&s1.id, STAFF_SENDER_ID, "third", at(30));
    desk.seed_message(&s1.id, CUSTOMER_ID, "first", at(10));
    desk.seed_message(&s1.id, STAFF_SENDER_ID, "second", at(20));

    let binding = manager.select_staff().await.unwrap();

    assert_eq!(binding.session_id, s1.id);
    assert_eq!(binding.status, SessionStatus::StaffConnected);
    assert_eq!(desk.calls(TransportOp::QuickCreate), 0);
    let contents: Vec<String> = manager.messages().into_iter().map(|m| m.content).collect();
    assert_eq!(contents, ["first", "second", "third"]);
}

#[tokio::test]
async fn test_follows_server_side_merge_once() {
    let (desk, manager) = setup_manual();
    let s1 = desk.open_session(SessionStatus::StaffConnected);
    desk.post_staff_message(&s1.id, "how can I help?");
    manager.select_staff().await.unwrap();
    let mut rx = manager.subscribe();

    let s2 = desk.merge_into_new(&s1.id).unwrap();
    let report = manager.refresh().await.unwrap();

    assert!(report.rebound);
    assert_eq!(manager.binding().unwrap().session_id, s2.id);
    assert_eq!(desk.message_fetches(&s2.id), 1);
    let messages = manager.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].session_id, s2.id);
    let events = drain(&mut rx);
    assert!(events.contains(&SessionEvent::Rebound {
        from: s1.id.clone(),
        to: s2.id.clone(),
    }));

    let report = manager.refresh().await.unwrap();
    assert!(!report.rebound);
    assert_eq!(desk.message_fetches(&s2.id), 2);
    assert!(!drain(&mut rx)
        .iter()
        .any(|e| matches!(e, SessionEvent::Rebound { .. })));
}

#[tokio::test]
async fn test_concurrent_select_staff_binds_one_session() {
    let (desk, manager) = setup_manual();

    let (a, b) = tokio::join!(manager.select_staff(), manager.select_staff());

    assert_eq!(a.unwrap().session_id, b.unwrap().session_id);
    assert_eq!(desk.calls(TransportOp::QuickCreate), 1);
    assert_eq!(desk.sessions().len(), 1);
}

#[tokio::test]
async fn test_failed_revalidation_keeps_binding() {
    let (desk, manager) = setup_manual();
    let binding = manager.select_staff().await.unwrap();
    let mut rx = manager.subscribe();

    desk.fail_next(
        TransportOp::ListSessions,
        SupportChatError::TransientNetwork("connection reset".to_string()),
    );
    let err = manager.select_staff().await.unwrap_err();

    assert!(matches!(err, SupportChatError::ConnectFailed(_)));
    assert!(err.is_transient());
    assert_eq!(manager.binding().unwrap().session_id, binding.session_id);
    assert!(drain(&mut rx)
        .iter()
        .any(|e| matches!(e, SessionEvent::ConnectFailed { .. })));
}

#[tokio::test]
async fn test_failed_first_connect_stays_in_ai_mode() {
    let (desk, manager) = setup_manual();
    desk.fail_next(
        TransportOp::QuickCreate,
        SupportChatError::TransientNetwork("timeout".to_string()),
    );

    let err = manager.select_staff().await.unwrap_err();

    assert!(matches!(err, SupportChatError::ConnectFailed(_)));
    assert!(manager.binding().is_none());
    assert_eq!(manager.mode(), ChatMode::Ai);
    assert!(!manager.is_polling());

    // Retrying is an ordinary select_staff.
    manager.select_staff().await.unwrap();
    assert_eq!(manager.state(), SessionStatus::WaitingStaff);
}

#[tokio::test]
async fn test_switching_to_ai_during_connect_wins() {
    let (desk, manager) = setup_manual();
    desk.open_session(SessionStatus::StaffConnected);

    let hold = desk.hold_next_fetch();
    let connecting = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.select_staff().await })
    };
    hold.entered().await;
    manager.select_ai();
    hold.release();

    let err = connecting.await.unwrap().unwrap_err();
    assert!(matches!(err, SupportChatError::Superseded));
    assert!(manager.binding().is_none());
    assert_eq!(manager.mode(), ChatMode::Ai);
    assert_eq!(manager.state(), SessionStatus::Ai);
    assert!(!manager.is_polling());
}

#[tokio::test]
async fn test_server_rejection_is_surfaced() {
    let (desk, manager) = setup_manual();
    let s1 = desk.open_session(SessionStatus::StaffConnected);
    manager.select_staff().await.unwrap();
    let mut rx = manager.subscribe();

    desk.requeue(&s1.id).unwrap();
    let err = manager.send("are you there?").await.unwrap_err();

    assert!(matches!(err, SupportChatError::ServerRejection(_)));
    assert!(manager.messages().is_empty());
    assert!(drain(&mut rx)
        .iter()
        .any(|e| matches!(e, SessionEvent::SendRejected { .. })));

    manager.refresh().await.unwrap();
    assert_eq!(manager.state(), SessionStatus::WaitingStaff);
}

#[tokio::test]
async fn test_server_closure_keeps_history_and_blocks_sending() {
    let (desk, manager) = setup_manual();
    let s1 = desk.open_session(SessionStatus::StaffConnected);
    desk.post_staff_message(&s1.id, "anything else?");
    manager.select_staff().await.unwrap();
    let mut rx = manager.subscribe();

    desk.close_session(&s1.id).unwrap();
    let report = manager.refresh().await.unwrap();

    assert!(report.closed);
    assert_eq!(manager.state(), SessionStatus::Closed);
    assert_eq!(manager.messages().len(), 1);
    assert!(drain(&mut rx).contains(&SessionEvent::ClosedByServer {
        session_id: s1.id.clone(),
    }));
    assert!(matches!(
        manager.send("wait").await,
        Err(SupportChatError::SendNotPermitted(SessionStatus::Closed))
    ));

    let idle = manager.refresh().await.unwrap();
    assert!(idle.idle);

    let fresh = manager.select_staff().await.unwrap();
    assert_ne!(fresh.session_id, s1.id);
    assert_eq!(fresh.status, SessionStatus::WaitingStaff);
    assert!(manager.messages().is_empty());
}

#[tokio::test]
async fn test_select_ai_then_staff_rederives_from_server() {
    let (desk, manager) = setup_manual();
    let first = manager.select_staff().await.unwrap();
    desk.accept(&first.session_id).unwrap();
    desk.post_staff_message(&first.session_id, "hi there");

    manager.select_ai();
    assert_eq!(manager.mode(), ChatMode::Ai);
    assert!(manager.messages().is_empty());

    let again = manager.select_staff().await.unwrap();
    assert_eq!(again.session_id, first.session_id);
    assert_eq!(again.status, SessionStatus::StaffConnected);
    assert_eq!(manager.messages().len(), 1);
    assert_eq!(desk.calls(TransportOp::QuickCreate), 1);
}

#[tokio::test]
async fn test_transitions_are_recorded() {
    let (desk, manager) = setup_manual();
    let binding = manager.select_staff().await.unwrap();
    desk.accept(&binding.session_id).unwrap();
    manager.refresh().await.unwrap();
    manager.close();

    let path: Vec<SessionStatus> = manager
        .transition_history()
        .iter()
        .filter(|t| t.changed)
        .map(|t| t.to)
        .collect();
    assert_eq!(
        path,
        [
            SessionStatus::WaitingStaff,
            SessionStatus::StaffConnected,
            SessionStatus::Closed
        ]
    );
}
