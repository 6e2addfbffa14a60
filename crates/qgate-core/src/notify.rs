//! Notification sink seam.
//!
//! The engine emits a structured [`NotificationEvent`] on verdict changes
//! and on every override transition. Delivery (chat, email, webhook) is the
//! sink's concern; a failed delivery is logged and never fails the
//! transition that triggered it.

use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::obs;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    VerdictChanged,
    OverrideRequested,
    OverrideApproved,
    OverrideDenied,
    OverrideExpired,
}

impl NotificationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::VerdictChanged => "verdict_changed",
            Self::OverrideRequested => "override_requested",
            Self::OverrideApproved => "override_approved",
            Self::OverrideDenied => "override_denied",
            Self::OverrideExpired => "override_expired",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub event_type: NotificationKind,
    pub change_set_id: String,
    pub check_id: Option<String>,
    pub actor: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub payload: serde_json::Value,
}

impl NotificationEvent {
    pub fn new(
        event_type: NotificationKind,
        change_set_id: impl Into<String>,
        timestamp: DateTime<Utc>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            event_type,
            change_set_id: change_set_id.into(),
            check_id: None,
            actor: None,
            timestamp,
            payload,
        }
    }

    pub fn with_check(mut self, check_id: impl Into<String>) -> Self {
        self.check_id = Some(check_id.into());
        self
    }

    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, event: NotificationEvent) -> anyhow::Result<()>;
}

/// Deliver `event`, logging instead of propagating failures.
pub async fn deliver(sink: &dyn NotificationSink, event: NotificationEvent) {
    let kind = event.event_type;
    if let Err(e) = sink.notify(event).await {
        obs::emit_notification_failed(kind.as_str(), &e);
    }
}

/// Writes each notification as a tracing event.
#[derive(Debug, Default, Clone)]
pub struct TracingSink;

#[async_trait]
impl NotificationSink for TracingSink {
    async fn notify(&self, event: NotificationEvent) -> anyhow::Result<()> {
        tracing::info!(
            event = "notification",
            event_type = event.event_type.as_str(),
            change_set = %event.change_set_id,
            check_id = event.check_id.as_deref().unwrap_or(""),
            actor = event.actor.as_deref().unwrap_or(""),
        );
        Ok(())
    }
}

/// Records notifications in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<NotificationEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<NotificationEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn count(&self, kind: NotificationKind) -> usize {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|e| e.event_type == kind)
            .count()
    }
}

#[async_trait]
impl NotificationSink for MemorySink {
    async fn notify(&self, event: NotificationEvent) -> anyhow::Result<()> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
        Ok(())
    }
}

/// Forwards notifications to an unbounded channel, e.g. a delivery task.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<NotificationEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<NotificationEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl NotificationSink for ChannelSink {
    async fn notify(&self, event: NotificationEvent) -> anyhow::Result<()> {
        self.tx
            .send(event)
            .map_err(|_| anyhow::anyhow!("notification receiver dropped"))
    }
}
