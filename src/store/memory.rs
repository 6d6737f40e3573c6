//! In-process coordination store
//!
//! A [`MemoryCluster`] holds one shared tree; every [`MemoryStore`] obtained
//! from [`MemoryCluster::connect`] is an independent client with its own
//! session, so several job instances in one process behave like separate
//! processes talking to the same ensemble.
//!
//! Session loss is simulated with [`MemoryStore::expire_session`]: the
//! client's locks are released and all of its ephemeral nodes are dropped in
//! one step before the resulting removal events are published.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{broadcast, OwnedMutexGuard};
use uuid::Uuid;

use super::error::{StoreError, StoreResult};
use super::event::{ConnectionState, StoreSubscription, TreeEvent, TreeEventKind};
use super::{parent_path, validate_path, CoordinationStore, LockToken, TransactionOp};

type SessionId = u64;

const EVENT_CHANNEL_CAPACITY: usize = 4096;

// ============================================================================
// Tree primitives
// ============================================================================

#[derive(Debug, Clone)]
struct Node {
    value: String,
    owner: Option<SessionId>,
}

type Tree = BTreeMap<String, Node>;

fn lock_or_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn ensure_parents(tree: &mut Tree, path: &str, events: &mut Vec<TreeEvent>) {
    let mut missing = Vec::new();
    let mut current = parent_path(path);
    while let Some(parent) = current {
        if parent == "/" || tree.contains_key(parent) {
            break;
        }
        missing.push(parent.to_string());
        current = parent_path(parent);
    }

    for parent in missing.into_iter().rev() {
        tree.insert(
            parent.clone(),
            Node {
                value: String::new(),
                owner: None,
            },
        );
        events.push(TreeEvent::new(TreeEventKind::Added, parent, ""));
    }
}

fn put_node(
    tree: &mut Tree,
    path: &str,
    value: &str,
    owner: Option<SessionId>,
    events: &mut Vec<TreeEvent>,
) {
    ensure_parents(tree, path, events);
    let node = Node {
        value: value.to_string(),
        owner,
    };
    let kind = match tree.insert(path.to_string(), node) {
        Some(_) => TreeEventKind::Updated,
        None => TreeEventKind::Added,
    };
    events.push(TreeEvent::new(kind, path, value));
}

fn remove_subtree(tree: &mut Tree, path: &str, events: &mut Vec<TreeEvent>) {
    let prefix = format!("{path}/");
    let descendants: Vec<String> = tree
        .range(prefix.clone()..)
        .take_while(|(key, _)| key.starts_with(&prefix))
        .map(|(key, _)| key.clone())
        .collect();

    // Deepest nodes first
    for key in descendants.iter().rev() {
        if let Some(node) = tree.remove(key) {
            events.push(TreeEvent::new(TreeEventKind::Removed, key.clone(), node.value));
        }
    }
    if let Some(node) = tree.remove(path) {
        events.push(TreeEvent::new(TreeEventKind::Removed, path, node.value));
    }
}

fn children_of(tree: &Tree, path: &str) -> Vec<String> {
    let prefix = if path == "/" {
        "/".to_string()
    } else {
        format!("{path}/")
    };
    tree.range(prefix.clone()..)
        .take_while(|(key, _)| key.starts_with(&prefix))
        .filter_map(|(key, _)| {
            let rest = &key[prefix.len()..];
            (!rest.is_empty() && !rest.contains('/')).then(|| rest.to_string())
        })
        .collect()
}

// ============================================================================
// Memory Cluster
// ============================================================================

struct ClusterState {
    tree: Mutex<Tree>,
    tree_events: broadcast::Sender<TreeEvent>,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    sequence: AtomicU64,
    next_session: AtomicU64,
    clock_offset_ms: AtomicI64,
}

impl ClusterState {
    fn publish(&self, events: Vec<TreeEvent>) {
        for event in events {
            // No subscribers is fine
            let _ = self.tree_events.send(event);
        }
    }

    fn mutate<T>(&self, f: impl FnOnce(&mut Tree, &mut Vec<TreeEvent>) -> T) -> T {
        let mut events = Vec::new();
        let result = {
            let mut tree = lock_or_recover(&self.tree);
            f(&mut tree, &mut events)
        };
        self.publish(events);
        result
    }

    fn new_session(&self) -> SessionId {
        self.next_session.fetch_add(1, Ordering::SeqCst)
    }

    fn lock_handle(&self, name: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = lock_or_recover(&self.locks);
        Arc::clone(
            locks
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
        )
    }

    fn drop_session(&self, session: SessionId) {
        self.mutate(|tree, events| {
            let owned: Vec<String> = tree
                .iter()
                .filter(|(_, node)| node.owner == Some(session))
                .map(|(key, _)| key.clone())
                .collect();
            for key in owned {
                remove_subtree(tree, &key, events);
            }
        });
    }
}

/// Shared in-memory tree that several clients connect to
#[derive(Clone)]
pub struct MemoryCluster {
    state: Arc<ClusterState>,
}

impl MemoryCluster {
    /// Create an empty cluster
    pub fn new() -> Self {
        let (tree_events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            state: Arc::new(ClusterState {
                tree: Mutex::new(BTreeMap::new()),
                tree_events,
                locks: Mutex::new(HashMap::new()),
                sequence: AtomicU64::new(0),
                next_session: AtomicU64::new(1),
                clock_offset_ms: AtomicI64::new(0),
            }),
        }
    }

    /// Open a new client session
    pub fn connect(&self) -> Arc<MemoryStore> {
        let (connection_events, _) = broadcast::channel(64);
        Arc::new(MemoryStore {
            cluster: Arc::clone(&self.state),
            session: AtomicU64::new(self.state.new_session()),
            connected: AtomicBool::new(true),
            connection_events,
            held_locks: Mutex::new(HashMap::new()),
        })
    }

    /// Shift the store's clock relative to the local clock
    pub fn set_clock_offset(&self, offset: chrono::Duration) {
        self.state
            .clock_offset_ms
            .store(offset.num_milliseconds(), Ordering::SeqCst);
    }

    /// Snapshot of every node path and value
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        lock_or_recover(&self.state.tree)
            .iter()
            .map(|(key, node)| (key.clone(), node.value.clone()))
            .collect()
    }

    /// Number of nodes in the tree
    pub fn node_count(&self) -> usize {
        lock_or_recover(&self.state.tree).len()
    }
}

impl Default for MemoryCluster {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Memory Store (one client session)
// ============================================================================

/// One client of a [`MemoryCluster`]
pub struct MemoryStore {
    cluster: Arc<ClusterState>,
    session: AtomicU64,
    connected: AtomicBool,
    connection_events: broadcast::Sender<ConnectionState>,
    held_locks: Mutex<HashMap<Uuid, OwnedMutexGuard<()>>>,
}

impl MemoryStore {
    /// Current session id
    pub fn session_id(&self) -> u64 {
        self.session.load(Ordering::SeqCst)
    }

    /// Check whether the client is connected
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Simulate a session expiry
    ///
    /// Subscribers are told about the loss first; then held locks are
    /// released and every ephemeral node of the old session is removed.
    /// The client stays disconnected until [`MemoryStore::reconnect`].
    pub fn expire_session(&self) {
        self.connected.store(false, Ordering::SeqCst);
        let _ = self.connection_events.send(ConnectionState::Lost);

        lock_or_recover(&self.held_locks).clear();
        let old = self
            .session
            .swap(self.cluster.new_session(), Ordering::SeqCst);
        self.cluster.drop_session(old);

        tracing::debug!(session = old, "Memory store session expired");
    }

    /// Simulate a transient connection loss that keeps the session
    pub fn suspend(&self) {
        self.connected.store(false, Ordering::SeqCst);
        let _ = self.connection_events.send(ConnectionState::Lost);
    }

    /// Re-establish the connection after [`suspend`](Self::suspend) or expiry
    pub fn reconnect(&self) {
        self.connected.store(true, Ordering::SeqCst);
        let _ = self.connection_events.send(ConnectionState::Reconnected);
    }

    /// Close the session gracefully, dropping its ephemeral nodes
    pub fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
        lock_or_recover(&self.held_locks).clear();
        self.cluster.drop_session(self.session_id());
    }

    fn check_connected(&self) -> StoreResult<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(StoreError::ConnectionLoss)
        }
    }

    fn check(&self, key: &str) -> StoreResult<()> {
        self.check_connected()?;
        validate_path(key)
    }

    fn next_sequence_path(&self, key: &str) -> String {
        let seq = self.cluster.sequence.fetch_add(1, Ordering::SeqCst);
        format!("{key}{seq:010}")
    }
}

#[async_trait]
impl CoordinationStore for MemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.check(key)?;
        Ok(lock_or_recover(&self.cluster.tree)
            .get(key)
            .map(|node| node.value.clone()))
    }

    async fn is_existed(&self, key: &str) -> StoreResult<bool> {
        self.check(key)?;
        Ok(lock_or_recover(&self.cluster.tree).contains_key(key))
    }

    async fn get_children_keys(&self, key: &str) -> StoreResult<Vec<String>> {
        self.check(key)?;
        Ok(children_of(&lock_or_recover(&self.cluster.tree), key))
    }

    async fn persist(&self, key: &str, value: &str) -> StoreResult<()> {
        self.check(key)?;
        self.cluster
            .mutate(|tree, events| put_node(tree, key, value, None, events));
        Ok(())
    }

    async fn update(&self, key: &str, value: &str) -> StoreResult<()> {
        self.check(key)?;
        self.cluster.mutate(|tree, events| match tree.get_mut(key) {
            Some(node) => {
                node.value = value.to_string();
                events.push(TreeEvent::new(TreeEventKind::Updated, key, value));
                Ok(())
            }
            None => Err(StoreError::not_found(key)),
        })
    }

    async fn persist_ephemeral(&self, key: &str, value: &str) -> StoreResult<()> {
        self.check(key)?;
        let session = self.session_id();
        self.cluster
            .mutate(|tree, events| put_node(tree, key, value, Some(session), events));
        Ok(())
    }

    async fn persist_sequential(&self, key: &str, value: &str) -> StoreResult<String> {
        self.check(key)?;
        let path = self.next_sequence_path(key);
        self.cluster
            .mutate(|tree, events| put_node(tree, &path, value, None, events));
        Ok(path)
    }

    async fn persist_ephemeral_sequential(&self, key: &str) -> StoreResult<String> {
        self.check(key)?;
        let path = self.next_sequence_path(key);
        let session = self.session_id();
        self.cluster
            .mutate(|tree, events| put_node(tree, &path, "", Some(session), events));
        Ok(path)
    }

    async fn remove(&self, key: &str) -> StoreResult<()> {
        self.check(key)?;
        if key == "/" {
            return Err(StoreError::InvalidPath {
                path: key.to_string(),
            });
        }
        self.cluster
            .mutate(|tree, events| remove_subtree(tree, key, events));
        Ok(())
    }

    async fn server_time(&self) -> StoreResult<DateTime<Utc>> {
        self.check_connected()?;
        let offset = self.cluster.clock_offset_ms.load(Ordering::SeqCst);
        Ok(Utc::now() + chrono::Duration::milliseconds(offset))
    }

    async fn transaction(&self, ops: Vec<TransactionOp>) -> StoreResult<()> {
        self.check_connected()?;
        for op in &ops {
            validate_path(op.path())?;
        }

        self.cluster.mutate(|tree, events| {
            // Apply on a copy so a failing step leaves the tree untouched
            let mut staged = tree.clone();
            let mut staged_events = Vec::new();
            for op in &ops {
                match op {
                    TransactionOp::CheckExists(path) => {
                        if !staged.contains_key(path) {
                            return Err(StoreError::transaction(format!("{path} does not exist")));
                        }
                    }
                    TransactionOp::Create { path, value } => {
                        if staged.contains_key(path) {
                            return Err(StoreError::transaction(format!("{path} already exists")));
                        }
                        put_node(&mut staged, path, value, None, &mut staged_events);
                    }
                    TransactionOp::Put { path, value } => {
                        put_node(&mut staged, path, value, None, &mut staged_events);
                    }
                    TransactionOp::Delete(path) => {
                        if !staged.contains_key(path) {
                            return Err(StoreError::transaction(format!("{path} does not exist")));
                        }
                        remove_subtree(&mut staged, path, &mut staged_events);
                    }
                }
            }
            *tree = staged;
            events.extend(staged_events);
            Ok(())
        })
    }

    async fn acquire_lock(&self, name: &str, timeout: Duration) -> StoreResult<Option<LockToken>> {
        self.check(name)?;
        let mutex = self.cluster.lock_handle(name);
        match tokio::time::timeout(timeout, mutex.lock_owned()).await {
            Ok(guard) => {
                let token = LockToken::new(name);
                lock_or_recover(&self.held_locks).insert(token.id(), guard);
                Ok(Some(token))
            }
            Err(_) => Ok(None),
        }
    }

    async fn release_lock(&self, token: LockToken) -> StoreResult<()> {
        match lock_or_recover(&self.held_locks).remove(&token.id()) {
            Some(_guard) => Ok(()),
            None => Err(StoreError::Backend {
                reason: format!("lock '{}' is not held by this session", token.name()),
            }),
        }
    }

    fn subscribe(&self) -> StoreSubscription {
        StoreSubscription::new(
            self.cluster.tree_events.subscribe(),
            self.connection_events.subscribe(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreEvent;

    #[tokio::test]
    async fn test_persist_creates_parents() {
        let cluster = MemoryCluster::new();
        let store = cluster.connect();

        store.persist("/job/sharding/0/instance", "a").await.unwrap();

        assert!(store.is_existed("/job/sharding/0").await.unwrap());
        assert_eq!(
            store.get_children_keys("/job/sharding").await.unwrap(),
            vec!["0".to_string()]
        );
        assert_eq!(
            store.get("/job/sharding/0/instance").await.unwrap(),
            Some("a".to_string())
        );
    }

    #[tokio::test]
    async fn test_remove_is_recursive() {
        let cluster = MemoryCluster::new();
        let store = cluster.connect();

        store.persist("/job/sharding/0/instance", "a").await.unwrap();
        store.persist("/job/sharding/1/instance", "b").await.unwrap();
        store.remove("/job/sharding").await.unwrap();

        assert!(!store.is_existed("/job/sharding/0/instance").await.unwrap());
        assert!(store.get_children_keys("/job").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_requires_existing_node() {
        let cluster = MemoryCluster::new();
        let store = cluster.connect();

        assert!(matches!(
            store.update("/job/instances/a", "TRIGGER").await,
            Err(StoreError::NodeNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_session_expiry_drops_only_own_ephemerals() {
        let cluster = MemoryCluster::new();
        let first = cluster.connect();
        let second = cluster.connect();

        first.persist_ephemeral("/job/instances/a", "").await.unwrap();
        second.persist_ephemeral("/job/instances/b", "").await.unwrap();
        first.persist("/job/servers/10.0.0.1", "").await.unwrap();

        first.expire_session();

        assert!(!second.is_existed("/job/instances/a").await.unwrap());
        assert!(second.is_existed("/job/instances/b").await.unwrap());
        assert!(second.is_existed("/job/servers/10.0.0.1").await.unwrap());
        assert!(matches!(
            first.get("/job/instances/a").await,
            Err(StoreError::ConnectionLoss)
        ));
    }

    #[tokio::test]
    async fn test_expiry_notifies_loss_before_removals() {
        let cluster = MemoryCluster::new();
        let store = cluster.connect();
        store.persist_ephemeral("/job/instances/a", "").await.unwrap();

        let mut subscription = store.subscribe();
        store.expire_session();

        assert_eq!(
            subscription.recv().await,
            Some(StoreEvent::Connection(ConnectionState::Lost))
        );
        match subscription.recv().await {
            Some(StoreEvent::Tree(event)) => {
                assert_eq!(event.kind, TreeEventKind::Removed);
                assert_eq!(event.path, "/job/instances/a");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_transaction_is_all_or_nothing() {
        let cluster = MemoryCluster::new();
        let store = cluster.connect();
        store.persist("/job/leader/sharding/necessary", "").await.unwrap();

        let result = store
            .transaction(vec![
                TransactionOp::Put {
                    path: "/job/sharding/0/instance".to_string(),
                    value: "a".to_string(),
                },
                TransactionOp::Delete("/job/leader/sharding/missing".to_string()),
            ])
            .await;
        assert!(matches!(result, Err(StoreError::TransactionFailed { .. })));
        assert!(!store.is_existed("/job/sharding/0/instance").await.unwrap());

        store
            .transaction(vec![
                TransactionOp::Put {
                    path: "/job/sharding/0/instance".to_string(),
                    value: "a".to_string(),
                },
                TransactionOp::Delete("/job/leader/sharding/necessary".to_string()),
            ])
            .await
            .unwrap();
        assert!(store.is_existed("/job/sharding/0/instance").await.unwrap());
        assert!(!store.is_existed("/job/leader/sharding/necessary").await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_session_releases_locks() {
        let cluster = MemoryCluster::new();
        let holder = cluster.connect();
        let waiter = cluster.connect();

        let _token = holder
            .acquire_lock("/job/leader/election/latch", Duration::from_millis(50))
            .await
            .unwrap()
            .unwrap();
        holder.expire_session();

        let token = waiter
            .acquire_lock("/job/leader/election/latch", Duration::from_millis(50))
            .await
            .unwrap();
        assert!(token.is_some());
    }

    #[tokio::test]
    async fn test_sequential_nodes_are_ordered() {
        let cluster = MemoryCluster::new();
        let store = cluster.connect();

        let first = store.persist_sequential("/job/seq/n-", "").await.unwrap();
        let second = store.persist_ephemeral_sequential("/job/seq/n-").await.unwrap();

        assert!(first < second);
        assert_eq!(store.get_children_keys("/job/seq").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_server_time_offset() {
        let cluster = MemoryCluster::new();
        let store = cluster.connect();
        cluster.set_clock_offset(chrono::Duration::seconds(120));

        let drift = store.server_time().await.unwrap() - Utc::now();
        assert!(drift.num_seconds() >= 119);
    }
}
