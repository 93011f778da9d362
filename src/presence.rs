use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Identifier handed out for each registered connection.
pub type ConnId = u64;

/// Sender half of a connection's push channel. Cloned by the delivery
/// pipeline to push frames to a specific client.
pub type PushSender = mpsc::UnboundedSender<String>;

/// In-memory registry mapping each user to their live connections, with a
/// reverse index for cleanup. Process-lifetime scoped: durable presence is
/// reconciled to offline at startup, never from this map.
///
/// Owned by the server state and passed by handle, so tests can drive it
/// directly and a pub/sub-backed registry can replace it later.
pub struct PresenceRegistry {
    inner: Mutex<Inner>,
    next_id: AtomicU64,
}

#[derive(Default)]
struct Inner {
    by_user: HashMap<Uuid, HashMap<ConnId, PushSender>>,
    by_conn: HashMap<ConnId, Uuid>,
}

impl Default for PresenceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Bind a connection to a user. Returns the connection id and whether
    /// the user transitioned to online (first live connection).
    ///
    /// `on_online` runs inside the registry's critical section when the
    /// transition happens, so mirror writes land in transition order: a
    /// racing disconnect cannot persist its offline state after this
    /// connection's online state.
    pub fn register(
        &self,
        user: Uuid,
        sender: PushSender,
        on_online: impl FnOnce(),
    ) -> (ConnId, bool) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut guard = self.inner.lock();
        let conns = guard.by_user.entry(user).or_default();
        let went_online = conns.is_empty();
        conns.insert(id, sender);
        guard.by_conn.insert(id, user);
        if went_online {
            on_online();
        }
        (id, went_online)
    }

    /// Remove a connection by id. Returns the user it was bound to and
    /// whether that user transitioned to offline (last connection closed).
    /// `on_offline` runs inside the critical section, as for `register`.
    pub fn unregister(&self, conn: ConnId, on_offline: impl FnOnce(Uuid)) -> Option<(Uuid, bool)> {
        let mut guard = self.inner.lock();
        let user = guard.by_conn.remove(&conn)?;
        let went_offline = match guard.by_user.get_mut(&user) {
            Some(conns) => {
                conns.remove(&conn);
                conns.is_empty()
            }
            None => false,
        };
        if went_offline {
            guard.by_user.remove(&user);
            on_offline(user);
        }
        Some((user, went_offline))
    }

    /// Point-in-time snapshot of a user's live connections.
    pub fn connections_for(&self, user: Uuid) -> Vec<PushSender> {
        let guard = self.inner.lock();
        guard
            .by_user
            .get(&user)
            .map(|conns| conns.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn is_online(&self, user: Uuid) -> bool {
        let guard = self.inner.lock();
        guard.by_user.get(&user).is_some_and(|c| !c.is_empty())
    }
}
