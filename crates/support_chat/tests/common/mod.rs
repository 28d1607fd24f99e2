//! Shared fixtures for support chat integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use support_chat::{InMemoryTransport, SessionEvent, SessionManager, SupportChatConfig};
use tokio::sync::broadcast;

pub const CUSTOMER_ID: &str = "cust-1";

pub fn config(poll_interval: Duration) -> SupportChatConfig {
    SupportChatConfig {
        customer_id: CUSTOMER_ID.to_string(),
        poll_interval_ms: poll_interval.as_millis() as u64,
        ..SupportChatConfig::default()
    }
}

/// Desk plus manager. Ticks fire every `poll_interval`.
pub fn setup(poll_interval: Duration) -> (Arc<InMemoryTransport>, Arc<SessionManager>) {
    let desk = Arc::new(InMemoryTransport::new(CUSTOMER_ID));
    let manager = Arc::new(SessionManager::new(desk.clone(), config(poll_interval)));
    (desk, manager)
}

/// Desk plus manager whose scheduled ticks never fire during a test;
/// refreshes are driven with `SessionManager::refresh`.
pub fn setup_manual() -> (Arc<InMemoryTransport>, Arc<SessionManager>) {
    setup(Duration::from_secs(3600))
}

pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_714_557_600 + secs, 0).unwrap()
}

/// Everything received so far, without waiting.
pub fn drain(rx: &mut broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
