use std::collections::{HashMap, HashSet};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::dispatcher::lease::LeaseTimer;
use crate::error::{DispatcherError, Result};
use crate::types::Node;

/// Liveness bookkeeping for one registered node.
#[derive(Debug)]
pub struct RegisteredNode {
    pub session_id: Uuid,
    /// Descriptor accepted at registration time.
    pub node: Node,
    pub ttl: Duration,
    pub registered_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
    lease: LeaseTimer,
    /// Current assigned task list. Watch streams subscribe to it.
    tasks_tx: watch::Sender<Vec<String>>,
    /// Open watch stream, if any.
    watch_token: Option<CancellationToken>,
}

impl RegisteredNode {
    fn close(&mut self) {
        self.lease.cancel();
        if let Some(token) = self.watch_token.take() {
            token.cancel();
        }
    }
}

/// Point-in-time view of a registration, safe to hand out of the lock.
#[derive(Debug, Clone, Serialize)]
pub struct RegistrationInfo {
    pub node_id: String,
    pub session_id: Uuid,
    pub heartbeat_ttl_ms: u64,
    pub registered_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
    /// Time left on the lease. `None` once it has fired.
    pub lease_expires_in_ms: Option<u64>,
    pub assigned_tasks: Vec<String>,
    pub watching: bool,
}

impl From<&RegisteredNode> for RegistrationInfo {
    fn from(record: &RegisteredNode) -> Self {
        Self {
            node_id: record.node.id.clone(),
            session_id: record.session_id,
            heartbeat_ttl_ms: record.ttl.as_millis() as u64,
            registered_at: record.registered_at,
            last_heartbeat: record.last_heartbeat,
            lease_expires_in_ms: record.lease.remaining().map(|d| d.as_millis() as u64),
            assigned_tasks: record.tasks_tx.borrow().clone(),
            watching: record
                .watch_token
                .as_ref()
                .is_some_and(|t| !t.is_cancelled()),
        }
    }
}

#[derive(Debug, Default)]
struct RegistryInner {
    nodes: HashMap<String, RegisteredNode>,
    /// Ids whose registration is writing to the store.
    pending: HashSet<String>,
    /// Set by `drain`. No registration is accepted afterwards.
    closed: bool,
}

/// In-memory map of live nodes.
///
/// Every method takes the lock, touches only memory, and releases it before
/// returning. Nothing here awaits, so callers can never hold the lock across
/// store I/O or stream sends.
#[derive(Debug, Default)]
pub struct NodeRegistry {
    inner: Mutex<RegistryInner>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `node_id` for a registration in progress.
    ///
    /// Fails with `AlreadyRegistered` if the id is live or another
    /// registration for it is still in flight, and with `ShuttingDown` once
    /// the registry has been drained. The claim is released when the
    /// returned reservation is dropped without being committed.
    pub fn reserve(&self, node_id: &str) -> Result<Reservation<'_>> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(DispatcherError::ShuttingDown);
        }
        if inner.nodes.contains_key(node_id) || inner.pending.contains(node_id) {
            return Err(DispatcherError::AlreadyRegistered(node_id.to_string()));
        }
        inner.pending.insert(node_id.to_string());
        Ok(Reservation {
            registry: self,
            node_id: node_id.to_string(),
            committed: false,
        })
    }

    /// Reset the node's lease. Fails with `NotRegistered` when the node is
    /// absent or its lease has already fired.
    pub fn heartbeat(&self, node_id: &str, ttl: Duration) -> Result<()> {
        let mut inner = self.inner.lock();
        let record = inner
            .nodes
            .get_mut(node_id)
            .ok_or_else(|| DispatcherError::NotRegistered(node_id.to_string()))?;

        if !record.lease.reset(ttl) {
            return Err(DispatcherError::NotRegistered(node_id.to_string()));
        }
        record.ttl = ttl;
        record.last_heartbeat = Utc::now();
        Ok(())
    }

    /// Remove the node's registration, cancelling its lease and ending its
    /// watch stream. With `session` set, only that registration is removed.
    pub fn remove(&self, node_id: &str, session: Option<Uuid>) -> Option<RegisteredNode> {
        let mut record = {
            let mut inner = self.inner.lock();
            match (inner.nodes.get(node_id), session) {
                (None, _) => return None,
                (Some(record), Some(session)) if record.session_id != session => return None,
                _ => {}
            }
            inner.nodes.remove(node_id)?
        };
        record.close();
        Some(record)
    }

    /// Replace the node's assigned task list and wake its watcher.
    pub fn assign_tasks(&self, node_id: &str, tasks: Vec<String>) -> Result<()> {
        let inner = self.inner.lock();
        let record = inner
            .nodes
            .get(node_id)
            .ok_or_else(|| DispatcherError::NotRegistered(node_id.to_string()))?;
        record.tasks_tx.send_replace(tasks);
        Ok(())
    }

    /// Open the node's single watch slot, superseding any previous watcher.
    pub fn subscribe(
        &self,
        node_id: &str,
    ) -> Result<(watch::Receiver<Vec<String>>, CancellationToken)> {
        let mut inner = self.inner.lock();
        let record = inner
            .nodes
            .get_mut(node_id)
            .ok_or_else(|| DispatcherError::NotRegistered(node_id.to_string()))?;

        if let Some(previous) = record.watch_token.take() {
            previous.cancel();
        }
        let token = CancellationToken::new();
        record.watch_token = Some(token.clone());
        Ok((record.tasks_tx.subscribe(), token))
    }

    pub fn contains(&self, node_id: &str) -> bool {
        self.inner.lock().nodes.contains_key(node_id)
    }

    pub fn info(&self, node_id: &str) -> Option<RegistrationInfo> {
        self.inner.lock().nodes.get(node_id).map(RegistrationInfo::from)
    }

    /// All live registrations, sorted by node id.
    pub fn list(&self) -> Vec<RegistrationInfo> {
        let mut nodes: Vec<RegistrationInfo> = self
            .inner
            .lock()
            .nodes
            .values()
            .map(RegistrationInfo::from)
            .collect();
        nodes.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        nodes
    }

    pub fn len(&self) -> usize {
        self.inner.lock().nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().nodes.is_empty()
    }

    /// Remove every registration, cancelling leases and watch streams, and
    /// close the registry to new and in-flight registrations.
    pub fn drain(&self) -> Vec<RegisteredNode> {
        let drained: Vec<RegisteredNode> = {
            let mut inner = self.inner.lock();
            inner.closed = true;
            inner.nodes.drain().map(|(_, record)| record).collect()
        };
        drained
            .into_iter()
            .map(|mut record| {
                record.close();
                record
            })
            .collect()
    }
}

/// Claim on a node id held while its registration writes to the store.
#[derive(Debug)]
pub struct Reservation<'a> {
    registry: &'a NodeRegistry,
    node_id: String,
    committed: bool,
}

impl Reservation<'_> {
    /// Turn the claim into a live registration.
    ///
    /// `start_lease` runs under the registry lock so the lease cannot fire
    /// before its record is visible to the expiry path. If the registry was
    /// drained while the claim was held, nothing is inserted and no lease is
    /// started.
    pub fn commit<F>(
        mut self,
        session_id: Uuid,
        node: Node,
        ttl: Duration,
        start_lease: F,
    ) -> Result<()>
    where
        F: FnOnce() -> LeaseTimer,
    {
        let mut inner = self.registry.inner.lock();
        inner.pending.remove(&self.node_id);
        self.committed = true;
        if inner.closed {
            return Err(DispatcherError::ShuttingDown);
        }
        let now = Utc::now();
        let (tasks_tx, _) = watch::channel(Vec::new());
        inner.nodes.insert(
            self.node_id.clone(),
            RegisteredNode {
                session_id,
                node,
                ttl,
                registered_at: now,
                last_heartbeat: now,
                lease: start_lease(),
                tasks_tx,
                watch_token: None,
            },
        );
        Ok(())
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.registry.inner.lock().pending.remove(&self.node_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn idle_lease() -> LeaseTimer {
        LeaseTimer::start(Duration::from_secs(60), || async {})
    }

    fn register(registry: &NodeRegistry, id: &str) -> Uuid {
        let session = Uuid::new_v4();
        registry
            .reserve(id)
            .unwrap()
            .commit(session, Node::new(id), Duration::from_secs(60), idle_lease)
            .unwrap();
        session
    }

    #[tokio::test]
    async fn reserve_rejects_live_and_pending_ids() {
        let registry = NodeRegistry::new();
        register(&registry, "a");
        assert!(matches!(
            registry.reserve("a"),
            Err(DispatcherError::AlreadyRegistered(_))
        ));

        let pending = registry.reserve("b").unwrap();
        assert!(matches!(
            registry.reserve("b"),
            Err(DispatcherError::AlreadyRegistered(_))
        ));
        drop(pending);
        assert!(registry.reserve("b").is_ok());
        assert!(!registry.contains("b"));
    }

    #[tokio::test]
    async fn remove_respects_session() {
        let registry = NodeRegistry::new();
        let session = register(&registry, "a");

        assert!(registry.remove("a", Some(Uuid::new_v4())).is_none());
        assert!(registry.contains("a"));

        let removed = registry.remove("a", Some(session)).unwrap();
        assert_eq!(removed.node.id, "a");
        assert!(!registry.contains("a"));
        assert!(registry.remove("a", None).is_none());
    }

    #[tokio::test]
    async fn heartbeat_unknown_node_fails() {
        let registry = NodeRegistry::new();
        assert!(matches!(
            registry.heartbeat("ghost", Duration::from_secs(1)),
            Err(DispatcherError::NotRegistered(_))
        ));
    }

    #[tokio::test]
    async fn subscribe_supersedes_previous_watcher() {
        let registry = NodeRegistry::new();
        register(&registry, "a");

        let (_rx1, first) = registry.subscribe("a").unwrap();
        let (_rx2, second) = registry.subscribe("a").unwrap();
        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());

        registry.remove("a", None);
        assert!(second.is_cancelled());
    }

    #[tokio::test]
    async fn assign_tasks_updates_snapshot() {
        let registry = NodeRegistry::new();
        register(&registry, "a");

        registry
            .assign_tasks("a", vec!["t1".into(), "t2".into()])
            .unwrap();
        assert_eq!(
            registry.info("a").unwrap().assigned_tasks,
            vec!["t1".to_string(), "t2".to_string()]
        );
        assert!(registry.assign_tasks("ghost", vec![]).is_err());
    }

    #[tokio::test]
    async fn drain_empties_registry() {
        let registry = NodeRegistry::new();
        register(&registry, "b");
        register(&registry, "a");

        let ids: Vec<String> = registry.list().into_iter().map(|i| i.node_id).collect();
        assert_eq!(ids, vec!["a", "b"]);

        assert_eq!(registry.drain().len(), 2);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn drain_closes_registry() {
        let registry = NodeRegistry::new();
        let in_flight = registry.reserve("a").unwrap();

        registry.drain();

        assert!(matches!(
            registry.reserve("b"),
            Err(DispatcherError::ShuttingDown)
        ));
        let mut lease_started = false;
        let result = in_flight.commit(
            Uuid::new_v4(),
            Node::new("a"),
            Duration::from_secs(60),
            || {
                lease_started = true;
                idle_lease()
            },
        );
        assert!(matches!(result, Err(DispatcherError::ShuttingDown)));
        assert!(!lease_started);
        assert!(!registry.contains("a"));
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_after_lease_fired_is_rejected() {
        let registry = NodeRegistry::new();
        registry
            .reserve("a")
            .unwrap()
            .commit(Uuid::new_v4(), Node::new("a"), Duration::from_millis(1), || {
                // Expiry that never reaches the registry, so the record lingers
                LeaseTimer::start(Duration::from_millis(1), || async {})
            })
            .unwrap();

        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(registry.contains("a"));
        assert!(matches!(
            registry.heartbeat("a", Duration::from_secs(5)),
            Err(DispatcherError::NotRegistered(id)) if id == "a"
        ));
        assert!(registry.info("a").unwrap().lease_expires_in_ms.is_none());
    }
}
