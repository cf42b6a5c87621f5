//! Presence registry: who is online, on which connections.
//!
//! Joins broadcast the new snapshot immediately. Leaves schedule a broadcast
//! after the debounce window so a quick reconnect does not flicker the user
//! offline; the timer reads the registry when it fires, never a stale copy.

use std::{collections::HashMap, sync::Arc, time::Duration};

use {
    async_trait::async_trait,
    murmur_protocol::{PresenceEntry, ServerEvent},
    tokio::{sync::RwLock, task::JoinHandle},
    tracing::{debug, info},
};

use crate::{
    router::ChannelRouter,
    state::{ConnectionHandle, send_to_all},
};

struct Member {
    handle: ConnectionHandle,
    /// Registration order, used to order snapshot entries.
    seq: u64,
}

#[derive(Default)]
struct Registry {
    /// conn_id → member
    members: HashMap<String, Member>,
    /// user_id → conn_ids, in join order
    by_user: HashMap<String, Vec<String>>,
    next_seq: u64,
}

impl Registry {
    fn insert(&mut self, handle: ConnectionHandle) {
        self.remove(&handle.conn_id);
        self.next_seq += 1;
        self.by_user
            .entry(handle.user_id().to_string())
            .or_default()
            .push(handle.conn_id.clone());
        self.members.insert(handle.conn_id.clone(), Member {
            handle,
            seq: self.next_seq,
        });
    }

    fn remove(&mut self, conn_id: &str) -> Option<ConnectionHandle> {
        let member = self.members.remove(conn_id)?;
        let user_id = member.handle.user_id();
        if let Some(conns) = self.by_user.get_mut(user_id) {
            conns.retain(|c| c != conn_id);
            if conns.is_empty() {
                self.by_user.remove(user_id);
            }
        }
        Some(member.handle)
    }

    fn ordered(&self) -> Vec<&ConnectionHandle> {
        let mut members: Vec<_> = self.members.values().collect();
        members.sort_by_key(|m| m.seq);
        members.into_iter().map(|m| &m.handle).collect()
    }

    fn snapshot(&self, dedupe_by_user: bool) -> Vec<PresenceEntry> {
        let mut entries: Vec<PresenceEntry> = Vec::with_capacity(self.members.len());
        for handle in self.ordered() {
            if dedupe_by_user && entries.iter().any(|e| e.user_id == handle.user_id()) {
                continue;
            }
            entries.push(PresenceEntry::from(&handle.identity));
        }
        entries
    }

    fn resolve(&self, user_id: &str) -> Vec<ConnectionHandle> {
        self.by_user
            .get(user_id)
            .into_iter()
            .flatten()
            .filter_map(|conn_id| self.members.get(conn_id))
            .map(|m| m.handle.clone())
            .collect()
    }

    /// Send the current snapshot to every registered connection.
    fn broadcast(&self, dedupe_by_user: bool) -> usize {
        let event = ServerEvent::OnlineUsers(self.snapshot(dedupe_by_user));
        send_to_all(self.members.values().map(|m| &m.handle), &event)
    }
}

/// Tracks identity-bearing connections and broadcasts presence snapshots.
pub struct PresenceRegistry {
    inner: RwLock<Registry>,
    debounce: Duration,
    dedupe_by_user: bool,
}

impl PresenceRegistry {
    pub fn new(debounce: Duration, dedupe_by_user: bool) -> Self {
        Self {
            inner: RwLock::new(Registry::default()),
            debounce,
            dedupe_by_user,
        }
    }

    /// Register a connection and immediately broadcast the new snapshot.
    ///
    /// The broadcast happens under the same lock as the insert, so
    /// connections observe snapshots in mutation order.
    pub async fn join(&self, handle: ConnectionHandle) {
        let mut inner = self.inner.write().await;
        info!(
            conn_id = %handle.conn_id,
            user_id = %handle.identity.user_id,
            username = %handle.identity.username,
            "user joined"
        );
        inner.insert(handle);
        let delivered = inner.broadcast(self.dedupe_by_user);
        debug!(delivered, "presence broadcast after join");
    }

    /// Remove a connection and schedule a debounced broadcast.
    ///
    /// Unknown connections (e.g. ones that never authenticated) still
    /// schedule the broadcast; it is harmless.
    pub async fn leave(
        self: &Arc<Self>,
        conn_id: &str,
    ) -> (Option<ConnectionHandle>, JoinHandle<()>) {
        let removed = self.inner.write().await.remove(conn_id);
        if let Some(handle) = &removed {
            info!(conn_id, user_id = %handle.identity.user_id, "user left");
        }

        let registry = Arc::clone(self);
        let timer = tokio::spawn(async move {
            tokio::time::sleep(registry.debounce).await;
            let delivered = registry.broadcast_snapshot().await;
            debug!(delivered, "presence broadcast after leave");
        });
        (removed, timer)
    }

    /// Presence entries for every live connection, in registration order.
    pub async fn snapshot(&self) -> Vec<PresenceEntry> {
        self.inner.read().await.snapshot(self.dedupe_by_user)
    }

    /// Broadcast the registry's current state to every connection.
    pub async fn broadcast_snapshot(&self) -> usize {
        self.inner.read().await.broadcast(self.dedupe_by_user)
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.read().await.members.len()
    }

    pub async fn online_user_count(&self) -> usize {
        self.inner.read().await.by_user.len()
    }
}

#[async_trait]
impl ChannelRouter for PresenceRegistry {
    async fn resolve(&self, user_id: &str) -> Vec<ConnectionHandle> {
        self.inner.read().await.resolve(user_id)
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        murmur_protocol::Identity,
        tokio::sync::mpsc::{self, UnboundedReceiver, error::TryRecvError},
    };

    const DEBOUNCE: Duration = Duration::from_millis(500);

    fn connect(
        conn_id: &str,
        user_id: &str,
        name: &str,
    ) -> (ConnectionHandle, UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            ConnectionHandle::new(conn_id, Identity::new(user_id, name), tx),
            rx,
        )
    }

    fn online(rx: &mut UnboundedReceiver<String>) -> Vec<String> {
        let frame = rx.try_recv().unwrap();
        match ServerEvent::from_frame(&frame).unwrap() {
            ServerEvent::OnlineUsers(entries) => entries.into_iter().map(|e| e.username).collect(),
            other => panic!("expected onlineUsers, got {other:?}"),
        }
    }

    fn registry(dedupe: bool) -> Arc<PresenceRegistry> {
        Arc::new(PresenceRegistry::new(DEBOUNCE, dedupe))
    }

    #[tokio::test]
    async fn join_broadcasts_to_everyone_in_registration_order() {
        let reg = registry(false);
        let (alice, mut alice_rx) = connect("c1", "u1", "alice");
        let (bob, mut bob_rx) = connect("c2", "u2", "bob");

        reg.join(alice).await;
        assert_eq!(online(&mut alice_rx), ["alice"]);

        reg.join(bob).await;
        assert_eq!(online(&mut alice_rx), ["alice", "bob"]);
        assert_eq!(online(&mut bob_rx), ["alice", "bob"]);
    }

    #[tokio::test]
    async fn snapshot_keeps_one_entry_per_connection() {
        let reg = registry(false);
        let (phone, _r1) = connect("c1", "u1", "alice");
        let (laptop, _r2) = connect("c2", "u1", "alice");
        reg.join(phone).await;
        reg.join(laptop).await;

        assert_eq!(reg.snapshot().await.len(), 2);
        assert_eq!(reg.connection_count().await, 2);
        assert_eq!(reg.online_user_count().await, 1);
    }

    #[tokio::test]
    async fn snapshot_can_dedupe_by_user() {
        let reg = registry(true);
        let (phone, _r1) = connect("c1", "u1", "alice");
        let (laptop, _r2) = connect("c2", "u1", "alice");
        let (bob, _r3) = connect("c3", "u2", "bob");
        reg.join(phone).await;
        reg.join(laptop).await;
        reg.join(bob).await;

        let names: Vec<_> = reg.snapshot().await.into_iter().map(|e| e.username).collect();
        assert_eq!(names, ["alice", "bob"]);
    }

    #[tokio::test(start_paused = true)]
    async fn leave_broadcasts_only_after_debounce() {
        let reg = registry(false);
        let (alice, mut alice_rx) = connect("c1", "u1", "alice");
        let (bob, bob_rx) = connect("c2", "u2", "bob");
        reg.join(alice).await;
        reg.join(bob).await;
        online(&mut alice_rx);
        online(&mut alice_rx);

        let started = tokio::time::Instant::now();
        let (removed, _timer) = reg.leave("c2").await;
        drop(bob_rx);
        assert_eq!(removed.unwrap().identity.username, "bob");
        // Registry already reflects the leave; the broadcast does not yet.
        assert_eq!(reg.snapshot().await.len(), 1);
        assert!(matches!(alice_rx.try_recv(), Err(TryRecvError::Empty)));

        assert!(
            tokio::time::timeout(Duration::from_millis(400), alice_rx.recv())
                .await
                .is_err()
        );

        let frame = alice_rx.recv().await.unwrap();
        assert!(started.elapsed() >= DEBOUNCE);
        let ServerEvent::OnlineUsers(entries) = ServerEvent::from_frame(&frame).unwrap() else {
            panic!("expected onlineUsers");
        };
        assert_eq!(entries, vec![PresenceEntry {
            user_id: "u1".into(),
            username: "alice".into(),
        }]);
    }

    #[tokio::test(start_paused = true)]
    async fn rejoin_before_timer_fires_is_reflected_in_broadcast() {
        let reg = registry(false);
        let (alice, mut alice_rx) = connect("c1", "u1", "alice");
        let (bob, _bob_rx) = connect("c2", "u2", "bob");
        reg.join(alice).await;
        reg.join(bob).await;
        online(&mut alice_rx);
        online(&mut alice_rx);

        let (_, timer) = reg.leave("c2").await;
        let (bob_again, mut bob_again_rx) = connect("c3", "u2", "bob");
        reg.join(bob_again).await;
        assert_eq!(online(&mut alice_rx), ["alice", "bob"]);

        timer.await.unwrap();
        // The delayed broadcast still happens and shows bob online.
        assert_eq!(online(&mut alice_rx), ["alice", "bob"]);
        online(&mut bob_again_rx);
        assert_eq!(online(&mut bob_again_rx), ["alice", "bob"]);
    }

    #[tokio::test(start_paused = true)]
    async fn multi_device_user_stays_present_until_last_leave() {
        let reg = registry(false);
        let (watcher, mut watcher_rx) = connect("w", "u0", "carol");
        let (phone, _r1) = connect("c1", "u1", "alice");
        let (laptop, _r2) = connect("c2", "u1", "alice");
        reg.join(watcher).await;
        reg.join(phone).await;
        reg.join(laptop).await;
        while watcher_rx.try_recv().is_ok() {}

        let (_, t1) = reg.leave("c1").await;
        t1.await.unwrap();
        assert_eq!(online(&mut watcher_rx), ["carol", "alice"]);

        let (_, t2) = reg.leave("c2").await;
        t2.await.unwrap();
        assert_eq!(online(&mut watcher_rx), ["carol"]);
    }

    #[tokio::test(start_paused = true)]
    async fn independent_timers_each_broadcast() {
        let reg = registry(false);
        let (watcher, mut watcher_rx) = connect("w", "u0", "carol");
        let (a, _ra) = connect("c1", "u1", "alice");
        let (b, _rb) = connect("c2", "u2", "bob");
        reg.join(watcher).await;
        reg.join(a).await;
        reg.join(b).await;
        while watcher_rx.try_recv().is_ok() {}

        let (_, t1) = reg.leave("c1").await;
        let (_, t2) = reg.leave("c2").await;
        t1.await.unwrap();
        t2.await.unwrap();

        // Both timers fire against current state, not the state at leave time.
        assert_eq!(online(&mut watcher_rx), ["carol"]);
        assert_eq!(online(&mut watcher_rx), ["carol"]);
    }

    #[tokio::test(start_paused = true)]
    async fn leave_of_unknown_connection_is_harmless() {
        let reg = registry(false);
        let (removed, timer) = reg.leave("never-joined").await;
        assert!(removed.is_none());
        timer.await.unwrap();
        assert!(reg.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn resolve_returns_live_connections_for_user() {
        let reg = registry(false);
        let (phone, _r1) = connect("c1", "u1", "alice");
        let (laptop, _r2) = connect("c2", "u1", "alice");
        let (bob, _r3) = connect("c3", "u2", "bob");
        reg.join(phone).await;
        reg.join(laptop).await;
        reg.join(bob).await;

        let conns: Vec<_> = reg.resolve("u1").await.into_iter().map(|h| h.conn_id).collect();
        assert_eq!(conns, ["c1", "c2"]);
        assert!(reg.resolve("nobody").await.is_empty());

        let (_, timer) = reg.leave("c1").await;
        timer.abort();
        let conns: Vec<_> = reg.resolve("u1").await.into_iter().map(|h| h.conn_id).collect();
        assert_eq!(conns, ["c2"]);
    }
}
