use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use tracing::{debug, warn};
use uuid::Uuid;

use meridian_types::events::GatewayEvent;

/// Per-connection outbound queue depth. A connection that falls this far
/// behind gets events dropped (`try_send`) rather than stalling fan-out to
/// everyone else; the client recovers by refetching over REST.
const EVENT_QUEUE_CAPACITY: usize = 256;

/// A named push destination: a user's identity channel, a thread channel,
/// or the admin broadcast channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    User(Uuid),
    Thread(Uuid),
    Admin,
}

/// Tracks every live connection and its channel memberships.
///
/// Cheap to clone; all clones share the same state. Scoped to whatever owns
/// request handling — there is no global instance.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<RwLock<RegistryInner>>,
}

struct ConnectionHandle {
    user_id: Uuid,
    tx: mpsc::Sender<GatewayEvent>,
}

#[derive(Default)]
struct RegistryInner {
    /// conn_id -> live handle
    connections: HashMap<Uuid, ConnectionHandle>,
    /// user_id -> conn_ids (multi-tab: many connections per identity)
    user_channels: HashMap<Uuid, HashSet<Uuid>>,
    /// thread_id -> subscribed conn_ids
    thread_channels: HashMap<Uuid, HashSet<Uuid>>,
    /// conn_ids subscribed to the admin broadcast channel
    admin_channel: HashSet<Uuid>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(RegistryInner::default())),
        }
    }

    /// Admit a connection under the user's identity channel. Admin identities
    /// auto-join the admin broadcast channel. Returns the connection id and
    /// the receiving half of its outbound queue.
    pub async fn register(
        &self,
        user_id: Uuid,
        is_admin: bool,
    ) -> (Uuid, mpsc::Receiver<GatewayEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);

        let mut inner = self.inner.write().await;
        inner
            .connections
            .insert(conn_id, ConnectionHandle { user_id, tx });
        inner.user_channels.entry(user_id).or_default().insert(conn_id);
        if is_admin {
            inner.admin_channel.insert(conn_id);
        }

        debug!("connection {} registered for user {}", conn_id, user_id);
        (conn_id, rx)
    }

    /// Add a thread subscription. Idempotent; a no-op for unknown
    /// connections. Authorization (participant membership) is the caller's
    /// responsibility and is checked at subscribe time, never cached.
    pub async fn subscribe(&self, conn_id: Uuid, thread_id: Uuid) {
        let mut inner = self.inner.write().await;
        if !inner.connections.contains_key(&conn_id) {
            return;
        }
        inner
            .thread_channels
            .entry(thread_id)
            .or_default()
            .insert(conn_id);
    }

    /// Remove a connection from its identity channel and every subscription
    /// it held. Idempotent: the close and error paths may both call this.
    pub async fn unregister(&self, conn_id: Uuid) {
        let mut inner = self.inner.write().await;
        let Some(handle) = inner.connections.remove(&conn_id) else {
            return;
        };

        if let Some(conns) = inner.user_channels.get_mut(&handle.user_id) {
            conns.remove(&conn_id);
            if conns.is_empty() {
                inner.user_channels.remove(&handle.user_id);
            }
        }
        inner.admin_channel.remove(&conn_id);
        inner.thread_channels.retain(|_, conns| {
            conns.remove(&conn_id);
            !conns.is_empty()
        });

        debug!("connection {} unregistered", conn_id);
    }

    /// Deliver an event to every live member of a channel. Best-effort and
    /// at-most-once: a full or closed queue is skipped, never awaited.
    /// Returns the conn_ids the event was queued for.
    pub async fn publish(&self, channel: Channel, event: GatewayEvent) -> Vec<Uuid> {
        self.publish_excluding(channel, event, &[]).await
    }

    /// `publish`, minus connections already covered by an earlier publish of
    /// the same event on another channel.
    pub async fn publish_excluding(
        &self,
        channel: Channel,
        event: GatewayEvent,
        exclude: &[Uuid],
    ) -> Vec<Uuid> {
        // Snapshot the member senders under the read lock, deliver after
        // dropping it, so a slow send can never hold up registry mutation.
        let targets: Vec<(Uuid, mpsc::Sender<GatewayEvent>)> = {
            let inner = self.inner.read().await;
            let members: Vec<Uuid> = match channel {
                Channel::User(user_id) => inner
                    .user_channels
                    .get(&user_id)
                    .map(|s| s.iter().copied().collect())
                    .unwrap_or_default(),
                Channel::Thread(thread_id) => inner
                    .thread_channels
                    .get(&thread_id)
                    .map(|s| s.iter().copied().collect())
                    .unwrap_or_default(),
                Channel::Admin => inner.admin_channel.iter().copied().collect(),
            };

            members
                .into_iter()
                .filter(|conn_id| !exclude.contains(conn_id))
                .filter_map(|conn_id| {
                    inner
                        .connections
                        .get(&conn_id)
                        .map(|h| (conn_id, h.tx.clone()))
                })
                .collect()
        };

        let mut delivered = Vec::with_capacity(targets.len());
        for (conn_id, tx) in targets {
            match tx.try_send(event.clone()) {
                Ok(()) => delivered.push(conn_id),
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!("connection {} outbound queue full, dropping event", conn_id);
                }
                // Receiver already gone; unregister will clean up shortly.
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }
        delivered
    }

    /// Number of live connections for a user. Used by tests and logging.
    pub async fn connection_count(&self, user_id: Uuid) -> usize {
        self.inner
            .read()
            .await
            .user_channels
            .get(&user_id)
            .map_or(0, |s| s.len())
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
