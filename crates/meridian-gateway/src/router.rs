use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use meridian_types::events::GatewayEvent;
use meridian_types::models::{Message, ProjectChangeEvent, ProjectChangeKind};

use crate::registry::{Channel, Registry};

/// Relays facts the thread service already committed to the relevant
/// channels. Never persists anything itself.
#[derive(Clone)]
pub struct Router {
    registry: Registry,
    /// Per-thread sequencing locks: held by the REST handler across
    /// persist + publish so one thread's events go out in commit order.
    /// No ordering is promised across threads or channels.
    thread_order: Arc<Mutex<HashMap<Uuid, Arc<Mutex<()>>>>>,
}

impl Router {
    pub fn new(registry: Registry) -> Self {
        Self {
            registry,
            thread_order: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Acquire the append sequencer for a thread. The guard must span the
    /// durable write and the matching `notify_message` call.
    pub async fn lock_thread(&self, thread_id: Uuid) -> OwnedMutexGuard<()> {
        let lock = {
            let mut order = self.thread_order.lock().await;
            order.entry(thread_id).or_default().clone()
        };
        lock.lock_owned().await
    }

    /// Fan out a durably appended message: once to the thread channel (open
    /// viewers) and once to the recipient's identity channel (unread counts,
    /// toasts). Both publishes carry the same committed message; connections
    /// reached by the thread publish are excluded from the identity publish
    /// so no tab sees the event twice.
    pub async fn notify_message(&self, message: &Message, recipient: Uuid) {
        let event = GatewayEvent::MessageReceived {
            thread_id: message.thread_id,
            message: message.clone(),
        };

        let viewers = self
            .registry
            .publish(Channel::Thread(message.thread_id), event.clone())
            .await;
        self.registry
            .publish_excluding(Channel::User(recipient), event, &viewers)
            .await;
    }

    /// Fan out a committed project change: the owner's identity channel gets
    /// the client-facing event, the admin broadcast channel gets the
    /// dashboard event.
    pub async fn notify_project_change(&self, change: ProjectChangeEvent, owner: Uuid) {
        let owner_event = match change.change_kind {
            ProjectChangeKind::Created => GatewayEvent::ProjectCreated {
                project: change.snapshot.clone(),
            },
            ProjectChangeKind::Updated => GatewayEvent::ProjectUpdated {
                project: change.snapshot.clone(),
            },
        };
        self.registry.publish(Channel::User(owner), owner_event).await;

        self.registry
            .publish(
                Channel::Admin,
                GatewayEvent::AdminProjectUpdate {
                    project: change.snapshot,
                    change_kind: change.change_kind,
                    owner_id: owner,
                },
            )
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn message(thread_id: Uuid, sender: Uuid, content: &str) -> Message {
        Message {
            id: Uuid::new_v4(),
            thread_id,
            sender_id: sender,
            sender_username: "sender".to_string(),
            content: content.to_string(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn message_reaches_thread_viewers_and_recipient() {
        let registry = Registry::new();
        let router = Router::new(registry.clone());
        let thread = Uuid::new_v4();
        let sender = Uuid::new_v4();
        let recipient = Uuid::new_v4();

        // A third party viewing the thread, plus the recipient with one tab
        // on the thread and one tab elsewhere in the app.
        let (viewer_conn, mut viewer_rx) = registry.register(Uuid::new_v4(), false).await;
        registry.subscribe(viewer_conn, thread).await;
        let (recip_viewing, mut recip_viewing_rx) = registry.register(recipient, false).await;
        registry.subscribe(recip_viewing, thread).await;
        let (_recip_idle, mut recip_idle_rx) = registry.register(recipient, false).await;

        router.notify_message(&message(thread, sender, "hello"), recipient).await;

        for rx in [&mut viewer_rx, &mut recip_viewing_rx, &mut recip_idle_rx] {
            match rx.recv().await {
                Some(GatewayEvent::MessageReceived { thread_id, message }) => {
                    assert_eq!(thread_id, thread);
                    assert_eq!(message.content, "hello");
                }
                other => panic!("unexpected event: {:?}", other),
            }
            // Dual-channel publish must not double-deliver to any one tab.
            assert!(rx.try_recv().is_err());
        }
    }

    #[tokio::test]
    async fn no_live_subscriber_is_a_noop() {
        let registry = Registry::new();
        let router = Router::new(registry);
        // Nobody registered: a DeliveryMiss is not an error.
        router
            .notify_message(&message(Uuid::new_v4(), Uuid::new_v4(), "void"), Uuid::new_v4())
            .await;
    }

    #[tokio::test]
    async fn thread_events_delivered_in_append_order() {
        let registry = Registry::new();
        let router = Router::new(registry.clone());
        let thread = Uuid::new_v4();
        let recipient = Uuid::new_v4();

        let (conn, mut rx) = registry.register(recipient, false).await;
        registry.subscribe(conn, thread).await;

        for i in 0..5 {
            let _order = router.lock_thread(thread).await;
            router
                .notify_message(&message(thread, Uuid::new_v4(), &i.to_string()), recipient)
                .await;
        }

        for i in 0..5 {
            match rx.recv().await {
                Some(GatewayEvent::MessageReceived { message, .. }) => {
                    assert_eq!(message.content, i.to_string());
                }
                other => panic!("unexpected event: {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn project_change_fans_out_to_owner_and_admins() {
        let registry = Registry::new();
        let router = Router::new(registry.clone());
        let owner = Uuid::new_v4();

        let (_owner_conn, mut owner_rx) = registry.register(owner, false).await;
        let (_admin_conn, mut admin_rx) = registry.register(Uuid::new_v4(), true).await;
        let (_other_conn, mut other_rx) = registry.register(Uuid::new_v4(), false).await;

        let change = ProjectChangeEvent {
            project_id: Uuid::new_v4(),
            change_kind: ProjectChangeKind::Updated,
            snapshot: serde_json::json!({"status": "in_review"}),
        };
        router.notify_project_change(change, owner).await;

        assert!(matches!(
            owner_rx.recv().await,
            Some(GatewayEvent::ProjectUpdated { .. })
        ));
        match admin_rx.recv().await {
            Some(GatewayEvent::AdminProjectUpdate { owner_id, change_kind, .. }) => {
                assert_eq!(owner_id, owner);
                assert_eq!(change_kind, ProjectChangeKind::Updated);
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(other_rx.try_recv().is_err());
    }
}
