//! Translates Postgres notifications into store events.
//!
//! The row triggers publish one JSON payload per changed row on
//! [`CHANNEL`]:
//!
//! ```text
//! {"kind": "permission.created", "id": 7}
//! {"kind": "permissions.deleting", "id": 7, "collection": "articles"}
//! {"kind": "roles.changed", "id": "editor"}
//! ```
//!
//! Notifications are delivered on commit, after the rows are gone for a
//! delete, so the `deleting` payload carries the collection itself.
use rbac_sync_core::{PermissionId, RbacStore, StoreEvent, StoreObserver};
use serde::Deserialize;
use serde_json::Value;
use sqlx::postgres::PgListener;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

pub const CHANNEL: &str = "rbac_sync_events";

const RETRY_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Deserialize)]
struct Notification {
    kind: String,
    id: Value,
    #[serde(default)]
    collection: Option<String>,
}

/// Parse one notification payload. Unknown kinds and malformed payloads yield `None`.
pub fn parse_notification(payload: &str) -> Option<StoreEvent> {
    let notification: Notification = serde_json::from_str(payload).ok()?;
    let permission_id = || notification.id.as_i64().map(PermissionId);
    let event = match notification.kind.as_str() {
        "permission.created" => StoreEvent::PermissionCreated {
            id: permission_id()?,
        },
        "permissions.updated" => StoreEvent::PermissionsUpdated {
            ids: vec![permission_id()?],
        },
        "permissions.deleting" => StoreEvent::PermissionsDeleting {
            ids: vec![permission_id()?],
            collection: notification.collection.clone(),
        },
        "permissions.deleted" => StoreEvent::PermissionsDeleted {
            ids: vec![permission_id()?],
        },
        "roles.changed" => StoreEvent::RolesChanged {
            ids: vec![notification.id.as_str()?.to_string()],
        },
        _ => return None,
    };
    Some(event)
}

pub(crate) type Observers = Arc<RwLock<Vec<Arc<dyn StoreObserver>>>>;

/// Receive notifications until the listener task is aborted.
///
/// Receive errors are logged and retried; `PgListener` reconnects and
/// re-subscribes on the next `recv`.
pub(crate) async fn run_listener(
    mut listener: PgListener,
    store: Arc<dyn RbacStore>,
    observers: Observers,
) {
    loop {
        let notification = match listener.recv().await {
            Ok(notification) => notification,
            Err(err) => {
                tracing::warn!(error = %err, "rbac notification listener failed; retrying");
                tokio::time::sleep(RETRY_DELAY).await;
                continue;
            }
        };
        let Some(event) = parse_notification(notification.payload()) else {
            tracing::warn!(payload = notification.payload(), "ignoring malformed rbac notification");
            continue;
        };
        metrics::counter!("rbac_sync_notifications_total", "event" => event.kind()).increment(1);
        let current = observers.read().await.clone();
        for observer in current {
            if let Err(err) = observer.observe(store.as_ref(), &event).await {
                tracing::warn!(event = event.kind(), error = %err, "store observer failed");
            }
        }
    }
}
