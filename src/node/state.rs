//! Per-node coordination state
//!
//! The client registry, the coordinator and the logical clock share one
//! lock, so every registry change and the coordinator recomputation it
//! triggers are observed atomically. Outbound lines go through unbounded
//! channels: sending never blocks, so no `.await` happens under the lock.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;

use crate::common::ClientId;
use crate::protocol::Response;

/// Outbound line channel of one connection
pub type Outbox = mpsc::UnboundedSender<String>;

/// What a connection holds once registered
#[derive(Debug, Clone)]
pub struct ClientHandle {
    pub id: ClientId,
    /// Distinguishes connections that present the same id
    pub session: u64,
    pub outbox: Outbox,
}

impl ClientHandle {
    /// Queue a line for this connection. False once the connection's writer is gone.
    pub fn send(&self, response: &Response) -> bool {
        self.outbox.send(response.to_string()).is_ok()
    }
}

struct ClientEntry {
    session: u64,
    outbox: Outbox,
}

#[derive(Default)]
struct Inner {
    /// Connections per id, oldest first. Several connections may present
    /// the same id, e.g. a gateway forward reusing a live client's id.
    clients: BTreeMap<ClientId, Vec<ClientEntry>>,
    coordinator: Option<ClientId>,
    clock: u64,
    next_session: u64,
}

impl Inner {
    /// Send `line` to every connection except session `except`; returns the
    /// connections whose channel is closed.
    fn deliver(&self, line: &str, except: Option<u64>) -> Vec<(ClientId, u64)> {
        self.clients
            .iter()
            .flat_map(|(id, entries)| entries.iter().map(move |entry| (*id, entry)))
            .filter(|(_, entry)| Some(entry.session) != except)
            .filter(|(_, entry)| entry.outbox.send(line.to_string()).is_err())
            .map(|(id, entry)| (id, entry.session))
            .collect()
    }

    /// Coordinator := highest registered id, announced to everyone.
    /// Clients found dead while announcing are dropped and the election repeats.
    fn elect(&mut self) {
        loop {
            self.coordinator = self.clients.keys().next_back().copied();
            let Some(coordinator) = self.coordinator else {
                tracing::info!("registry empty, no coordinator");
                return;
            };

            let line = Response::Coordinator(coordinator.to_string()).to_string();
            let dead = self.deliver(&line, None);
            if dead.is_empty() {
                tracing::info!(coordinator, clients = self.clients.len(), "coordinator elected");
                return;
            }
            self.remove_dead(&dead);
        }
    }

    /// Drop one connection's entry; the id stays while other connections hold it
    fn remove(&mut self, id: ClientId, session: u64) -> bool {
        let Some(entries) = self.clients.get_mut(&id) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|entry| entry.session != session);
        let removed = entries.len() != before;
        if entries.is_empty() {
            self.clients.remove(&id);
        }
        removed
    }

    fn remove_dead(&mut self, dead: &[(ClientId, u64)]) {
        for &(id, session) in dead {
            tracing::debug!(client_id = id, session, "dropping client with closed channel");
            self.remove(id, session);
        }
    }

    fn prune(&mut self, dead: &[(ClientId, u64)]) {
        if dead.is_empty() {
            return;
        }
        self.remove_dead(dead);
        if self.coordinator != self.clients.keys().next_back().copied() {
            self.elect();
        }
    }
}

/// Client registry, coordinator and logical clock of one node
#[derive(Default)]
pub struct NodeState {
    inner: Mutex<Inner>,
}

impl NodeState {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert a client and run an election. A connection presenting an id
    /// that is already registered gets its own entry next to the first.
    pub fn register(&self, id: ClientId, outbox: Outbox) -> ClientHandle {
        let mut inner = self.lock();
        inner.next_session += 1;
        let session = inner.next_session;
        inner.clients.entry(id).or_default().push(ClientEntry {
            session,
            outbox: outbox.clone(),
        });
        inner.elect();
        ClientHandle {
            id,
            session,
            outbox,
        }
    }

    /// Remove the handle's own entry. Re-elects when the last connection
    /// holding the coordinator's id leaves. Returns false when the entry was
    /// already gone.
    pub fn unregister(&self, handle: &ClientHandle) -> bool {
        let mut inner = self.lock();
        if !inner.remove(handle.id, handle.session) {
            return false;
        }
        if inner.coordinator == Some(handle.id) && !inner.clients.contains_key(&handle.id) {
            tracing::info!(client_id = handle.id, "coordinator left, starting new election");
            inner.elect();
        }
        true
    }

    pub fn run_election(&self) -> Option<ClientId> {
        let mut inner = self.lock();
        inner.elect();
        inner.coordinator
    }

    /// Best-effort send to every connection but `except`
    pub fn broadcast_except(&self, except: &ClientHandle, response: &Response) {
        let mut inner = self.lock();
        let dead = inner.deliver(&response.to_string(), Some(except.session));
        inner.prune(&dead);
    }

    pub fn is_registered(&self, handle: &ClientHandle) -> bool {
        self.lock()
            .clients
            .get(&handle.id)
            .is_some_and(|entries| entries.iter().any(|entry| entry.session == handle.session))
    }

    /// Advance the logical clock, returning the new value
    pub fn tick(&self) -> u64 {
        let mut inner = self.lock();
        inner.clock += 1;
        inner.clock
    }

    pub fn clock(&self) -> u64 {
        self.lock().clock
    }

    pub fn coordinator(&self) -> Option<ClientId> {
        self.lock().coordinator
    }

    pub fn client_ids(&self) -> Vec<ClientId> {
        self.lock().clients.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn channel() -> (Outbox, UnboundedReceiver<String>) {
        mpsc::unbounded_channel()
    }

    fn drain(rx: &mut UnboundedReceiver<String>) -> Vec<String> {
        let mut lines = Vec::new();
        while let Ok(line) = rx.try_recv() {
            lines.push(line);
        }
        lines
    }

    #[test]
    fn test_empty_registry_has_no_coordinator() {
        let state = NodeState::new();
        assert_eq!(state.run_election(), None);
        assert_eq!(state.coordinator(), None);
    }

    #[test]
    fn test_coordinator_is_max_id() {
        let state = NodeState::new();
        let (tx3, mut rx3) = channel();
        let (tx7, mut rx7) = channel();
        let (tx5, _rx5) = channel();

        state.register(3, tx3);
        assert_eq!(state.coordinator(), Some(3));
        state.register(7, tx7);
        assert_eq!(state.coordinator(), Some(7));
        state.register(5, tx5);
        assert_eq!(state.coordinator(), Some(7));

        assert_eq!(
            drain(&mut rx3),
            vec!["COORDINATOR 3", "COORDINATOR 7", "COORDINATOR 7"]
        );
        assert_eq!(drain(&mut rx7), vec!["COORDINATOR 7", "COORDINATOR 7"]);
    }

    #[test]
    fn test_coordinator_recomputed_after_disconnect() {
        let state = NodeState::new();
        let (tx3, mut rx3) = channel();
        let (tx7, _rx7) = channel();
        state.register(3, tx3);
        let seven = state.register(7, tx7);
        drain(&mut rx3);

        assert!(state.unregister(&seven));
        assert_eq!(state.coordinator(), Some(3));
        assert_eq!(drain(&mut rx3), vec!["COORDINATOR 3"]);
    }

    #[test]
    fn test_non_coordinator_disconnect_keeps_coordinator() {
        let state = NodeState::new();
        let (tx3, _rx3) = channel();
        let (tx7, mut rx7) = channel();
        let three = state.register(3, tx3);
        state.register(7, tx7);
        drain(&mut rx7);

        assert!(state.unregister(&three));
        assert_eq!(state.coordinator(), Some(7));
        assert!(drain(&mut rx7).is_empty());
    }

    #[test]
    fn test_dead_client_dropped_during_election() {
        let state = NodeState::new();
        let (tx2, mut rx2) = channel();
        let (tx9, rx9) = channel();
        state.register(2, tx2);
        state.register(9, tx9);
        drop(rx9);
        drain(&mut rx2);

        assert_eq!(state.run_election(), Some(2));
        assert_eq!(state.client_ids(), vec![2]);
        // the announcement of 9 reached 2 before 9 was found dead
        assert_eq!(drain(&mut rx2), vec!["COORDINATOR 9", "COORDINATOR 2"]);
    }

    #[test]
    fn test_broadcast_skips_sender_and_prunes() {
        let state = NodeState::new();
        let (tx1, mut rx1) = channel();
        let (tx2, mut rx2) = channel();
        let (tx3, rx3) = channel();
        let one = state.register(1, tx1);
        state.register(2, tx2);
        state.register(3, tx3);
        drop(rx3);
        drain(&mut rx1);
        drain(&mut rx2);

        state.broadcast_except(&one, &Response::FileAdded("a.txt".into()));
        // losing 3 moves the coordinator, which everyone hears about
        assert_eq!(drain(&mut rx1), vec!["COORDINATOR 2"]);
        assert_eq!(drain(&mut rx2), vec!["FILE_ADDED a.txt", "COORDINATOR 2"]);
        assert_eq!(state.client_ids(), vec![1, 2]);
        assert_eq!(state.coordinator(), Some(2));
    }

    #[test]
    fn test_shared_id_entries_are_independent() {
        let state = NodeState::new();
        let (first_tx, _first_rx) = channel();
        let (second_tx, _second_rx) = channel();
        let first = state.register(999, first_tx);
        let second = state.register(999, second_tx);

        assert!(state.unregister(&first));
        assert!(!state.unregister(&first));
        assert!(state.is_registered(&second));
        assert_eq!(state.coordinator(), Some(999));
        assert!(state.unregister(&second));
        assert_eq!(state.coordinator(), None);
    }

    #[test]
    fn test_short_lived_duplicate_leaves_live_client_registered() {
        let state = NodeState::new();
        let (tx3, mut rx3) = channel();
        let (live_tx, mut live_rx) = channel();
        let (forward_tx, mut forward_rx) = channel();
        let three = state.register(3, tx3);
        let live = state.register(999, live_tx);
        let forward = state.register(999, forward_tx);
        assert_eq!(drain(&mut forward_rx), vec!["COORDINATOR 999"]);

        assert!(state.unregister(&forward));
        assert_eq!(state.client_ids(), vec![3, 999]);
        assert_eq!(state.coordinator(), Some(999));
        assert!(state.is_registered(&live));
        drain(&mut rx3);
        drain(&mut live_rx);

        state.broadcast_except(&three, &Response::FileAdded("a.txt".into()));
        assert_eq!(drain(&mut live_rx), vec!["FILE_ADDED a.txt"]);
        assert!(drain(&mut rx3).is_empty());
    }

    #[test]
    fn test_clock_counts() {
        let state = NodeState::new();
        assert_eq!(state.tick(), 1);
        assert_eq!(state.tick(), 2);
        assert_eq!(state.clock(), 2);
    }
}
