//! Node liveness and task synchronization.
//!
//! The dispatcher is the manager-side endpoint nodes talk to:
//! - **Register**: a node announces itself, its record is persisted as READY
//!   and a lease is started
//! - **Heartbeat**: the node renews its lease before the TTL runs out
//! - **Node down**: lease expiry (or a graceful shutdown report) removes the
//!   registration and marks the durable record DOWN
//! - **Task sync**: the node watches its full assigned task list and reports
//!   per-task status back
//!
//! # Components
//!
//! - [`NodeRegistry`]: live registrations behind a single lock
//! - [`LeaseTimer`]: per-node resettable expiry alarm
//! - [`TtlPolicy`]: chooses the TTL handed back to nodes
//! - [`Store`]: durable node and task records
//!
//! # Ordering
//!
//! A node is removed from the registry before its durable status is set to
//! DOWN, never the other way round. Store writes and stream sends happen
//! outside the registry lock.

pub mod lease;
pub mod registry;
pub mod ttl;

use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

use crate::config::DispatcherConfig;
use crate::error::{DispatcherError, Result};
use crate::store::{Store, StoreError};
use crate::types::{Node, NodeStatus, Task, TaskStatus};

pub use lease::LeaseTimer;
pub use registry::{NodeRegistry, RegistrationInfo};
pub use ttl::{FixedTtl, JitteredTtl, TtlPolicy};

/// Stream of full task-list snapshots for one node.
///
/// Ends when the node goes down, when a newer watch for the same node is
/// opened, or when the dispatcher shuts down.
pub type TaskWatch = Pin<Box<dyn tokio_stream::Stream<Item = Vec<String>> + Send>>;

pub struct Dispatcher {
    registry: NodeRegistry,
    store: Arc<dyn Store>,
    ttl_policy: Arc<dyn TtlPolicy>,
    watch_buffer: usize,
    /// Handed to lease callbacks so a pending expiry never keeps the
    /// dispatcher alive.
    me: Weak<Dispatcher>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("registry", &self.registry)
            .field("ttl_policy", &self.ttl_policy)
            .field("watch_buffer", &self.watch_buffer)
            .finish()
    }
}

impl Dispatcher {
    pub fn new(config: &DispatcherConfig, store: Arc<dyn Store>) -> Arc<Self> {
        Self::with_ttl_policy(config, store, ttl::policy_from_config(config))
    }

    pub fn with_ttl_policy(
        config: &DispatcherConfig,
        store: Arc<dyn Store>,
        ttl_policy: Arc<dyn TtlPolicy>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            registry: NodeRegistry::new(),
            store,
            ttl_policy,
            watch_buffer: config.watch_buffer.max(1),
            me: me.clone(),
        })
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Register a node and start its lease. Returns the TTL the node must
    /// heartbeat within.
    ///
    /// The durable record is written as READY (created, or updated when it
    /// survived an earlier dispatcher). If that write fails nothing is
    /// registered.
    pub async fn register(&self, mut node: Node) -> Result<Duration> {
        if node.id.trim().is_empty() {
            return Err(DispatcherError::InvalidArgument(
                "node id cannot be empty".to_string(),
            ));
        }

        let reservation = self.registry.reserve(&node.id).inspect_err(|_| {
            tracing::warn!(node_id = %node.id, "Rejected duplicate registration");
        })?;

        node.status = NodeStatus::Ready;
        let node = self.store.upsert_node(node).await?;

        let ttl = self.elect_ttl();
        let session_id = Uuid::new_v4();
        let node_id = node.id.clone();
        let me = self.me.clone();
        let expiring_id = node_id.clone();
        reservation
            .commit(session_id, node, ttl, move || {
                LeaseTimer::start(ttl, move || async move {
                    if let Some(dispatcher) = me.upgrade() {
                        dispatcher.expire(expiring_id, session_id).await;
                    }
                })
            })
            .inspect_err(|_| {
                tracing::warn!(node_id = %node_id, "Registration finished after shutdown");
            })?;

        tracing::info!(
            node_id = %node_id,
            session_id = %session_id,
            ttl_ms = ttl.as_millis() as u64,
            "Node registered"
        );
        Ok(ttl)
    }

    /// Renew the node's lease. Returns the TTL for the next heartbeat.
    pub async fn heartbeat(&self, node_id: &str) -> Result<Duration> {
        let ttl = self.elect_ttl();
        self.registry.heartbeat(node_id, ttl).inspect_err(|_| {
            tracing::debug!(node_id, "Heartbeat from unregistered node");
        })?;
        tracing::debug!(node_id, ttl_ms = ttl.as_millis() as u64, "Heartbeat");
        Ok(ttl)
    }

    /// Voluntary status report from a node.
    ///
    /// DOWN takes the node down immediately (same effect as lease expiry)
    /// and is a no-op for a node that is already gone. READY only confirms a
    /// live registration.
    pub async fn update_node_status(&self, node_id: &str, status: NodeStatus) -> Result<()> {
        match status {
            NodeStatus::Down => {
                if self.node_down(node_id, None).await? {
                    tracing::info!(node_id, "Node reported graceful shutdown");
                }
                Ok(())
            }
            NodeStatus::Ready if self.registry.contains(node_id) => Ok(()),
            NodeStatus::Ready => Err(DispatcherError::NotRegistered(node_id.to_string())),
            NodeStatus::Unknown => Err(DispatcherError::InvalidArgument(format!(
                "unsupported node status: {}",
                status
            ))),
        }
    }

    /// Record a task status reported by the node running it.
    pub async fn update_task_status(
        &self,
        node_id: &str,
        task_id: &str,
        status: TaskStatus,
        message: Option<String>,
    ) -> Result<Task> {
        if !self.registry.contains(node_id) {
            tracing::warn!(node_id, task_id, "Task status from unregistered node");
            return Err(DispatcherError::NotRegistered(node_id.to_string()));
        }

        let mut task = self.store.get_task(task_id).await.map_err(|e| match e {
            StoreError::NotFound(_) => DispatcherError::TaskNotFound(task_id.to_string()),
            other => other.into(),
        })?;

        if task.node_id != node_id {
            return Err(DispatcherError::TaskNotAssigned {
                task_id: task_id.to_string(),
                node_id: node_id.to_string(),
            });
        }

        if task.status.is_terminal() {
            if task.status == status {
                return Ok(task);
            }
            return Err(DispatcherError::InvalidArgument(format!(
                "task {} is already {}",
                task_id, task.status
            )));
        }

        let previous = task.status;
        task.status = status;
        task.message = message;
        let task = self.store.update_task(task).await.map_err(|e| match e {
            StoreError::NotFound(_) => DispatcherError::TaskNotFound(task_id.to_string()),
            other => other.into(),
        })?;

        tracing::debug!(
            node_id,
            task_id,
            from = %previous,
            to = %task.status,
            "Task status updated"
        );
        Ok(task)
    }

    /// Replace the full task list assigned to a node. Called by the
    /// scheduler; wakes the node's watch stream.
    pub fn assign_tasks(&self, node_id: &str, task_ids: Vec<String>) -> Result<()> {
        let count = task_ids.len();
        self.registry.assign_tasks(node_id, task_ids)?;
        tracing::debug!(node_id, tasks = count, "Task assignment updated");
        Ok(())
    }

    /// Open the node's task stream. The current list is sent immediately,
    /// then the full list again on every change.
    pub fn watch_tasks(&self, node_id: &str) -> Result<TaskWatch> {
        let (mut tasks_rx, token) = self.registry.subscribe(node_id)?;
        let (tx, rx) = tokio::sync::mpsc::channel(self.watch_buffer);
        let node_id = node_id.to_string();

        tokio::spawn(async move {
            let initial = tasks_rx.borrow_and_update().clone();
            if tx.send(initial).await.is_err() {
                return;
            }

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tx.closed() => break,
                    changed = tasks_rx.changed() => {
                        if changed.is_err() {
                            // Registration removed
                            break;
                        }
                        let snapshot = tasks_rx.borrow_and_update().clone();
                        if tx.send(snapshot).await.is_err() {
                            break;
                        }
                    }
                }
            }
            token.cancel();
            tracing::debug!(node_id = %node_id, "Task watch closed");
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    pub fn is_registered(&self, node_id: &str) -> bool {
        self.registry.contains(node_id)
    }

    pub fn registration(&self, node_id: &str) -> Option<RegistrationInfo> {
        self.registry.info(node_id)
    }

    pub fn registered_nodes(&self) -> Vec<RegistrationInfo> {
        self.registry.list()
    }

    /// Drop every registration without touching durable status. Leases are
    /// cancelled and watch streams end. Registrations still writing to the
    /// store when this runs fail with `ShuttingDown` and start no lease.
    pub fn shutdown(&self) {
        let drained = self.registry.drain();
        tracing::info!(nodes = drained.len(), "Dispatcher stopped");
    }

    /// Remove the node and mark it DOWN in the store.
    ///
    /// Returns false if no matching registration existed. A failed store
    /// write is returned, but the node stays removed.
    ///
    /// The DOWN write is not fenced against a new session: if the node
    /// re-registers while it is in flight, the store can briefly show DOWN
    /// for a live node until the next registration writes READY again.
    async fn node_down(&self, node_id: &str, session: Option<Uuid>) -> Result<bool> {
        let Some(record) = self.registry.remove(node_id, session) else {
            return Ok(false);
        };

        let down = record.node.clone().with_status(NodeStatus::Down);
        self.store.update_node(down).await.map_err(|e| {
            tracing::warn!(node_id, error = %e, "Failed to mark node down");
            DispatcherError::Store(e)
        })?;

        tracing::info!(node_id, session_id = %record.session_id, "Node marked down");
        Ok(true)
    }

    async fn expire(&self, node_id: String, session_id: Uuid) {
        tracing::info!(node_id = %node_id, "Heartbeat not received within TTL");
        if let Err(e) = self.node_down(&node_id, Some(session_id)).await {
            tracing::error!(
                node_id = %node_id,
                error = %e,
                "Error deregistering node after heartbeat was not received"
            );
        }
    }

    fn elect_ttl(&self) -> Duration {
        self.ttl_policy.elect_ttl(self.registry.len())
    }
}
