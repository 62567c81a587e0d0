use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::store::{Collection, DocumentStore, Txn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum NotifyTarget {
    User(String),
    Role(String),
}

impl NotifyTarget {
    pub fn admins() -> Self {
        Self::Role("admin".to_string())
    }
}

impl fmt::Display for NotifyTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User(id) => write!(f, "user:{id}"),
            Self::Role(role) => write!(f, "role:{role}"),
        }
    }
}

/// Append-only notification sink. Delivery is best-effort.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, target: &NotifyTarget, message: &str) -> anyhow::Result<()>;
}

/// Sends through `notifier`, logging instead of propagating failures.
pub async fn notify_best_effort(notifier: &dyn Notifier, target: NotifyTarget, message: String) {
    if let Err(e) = notifier.notify(&target, &message).await {
        warn!(%target, error = %e, "notification dropped");
    }
}

/// Writes notifications to the log only.
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify(&self, target: &NotifyTarget, message: &str) -> anyhow::Result<()> {
        info!(%target, message, "notification");
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub target: NotifyTarget,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

/// Appends notifications to the `notifications` collection.
pub struct StoreNotifier {
    store: Arc<dyn DocumentStore>,
}

impl StoreNotifier {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Notifier for StoreNotifier {
    async fn notify(&self, target: &NotifyTarget, message: &str) -> anyhow::Result<()> {
        let mut tx = Txn::begin(Arc::clone(&self.store));
        let notification = Notification {
            id: Uuid::new_v4().to_string(),
            target: target.clone(),
            message: message.to_string(),
            created_at: tx.now(),
        };
        tx.create(Collection::Notifications, &notification.id, &notification)?;
        tx.commit().await?;
        Ok(())
    }
}
