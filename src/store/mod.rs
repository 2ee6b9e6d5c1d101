//! Durable record store consumed by the dispatcher.
//!
//! The dispatcher never talks to the consensus layer directly. Everything it
//! needs from the replicated store goes through [`Store`]:
//!
//! - **Nodes**: create-if-absent, update, lookup
//! - **Tasks**: lookup and status updates reported by nodes
//!
//! A successful return means the write is durable and visible to subsequent
//! reads. [`StoreError::AlreadyExists`] and [`StoreError::NotFound`] are the
//! only conditions callers branch on; every other failure is opaque.

pub mod memory;

use async_trait::async_trait;
use thiserror::Error;

use crate::types::{Node, Task};

pub use memory::MemoryStore;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("record already exists: {0}")]
    AlreadyExists(String),

    #[error("record not found: {0}")]
    NotFound(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store error: {0}")]
    Other(String),
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Create a node record. Fails with `AlreadyExists` if the id is taken.
    async fn create_node(&self, node: Node) -> Result<Node, StoreError>;

    /// Replace an existing node record. Fails with `NotFound` if absent.
    async fn update_node(&self, node: Node) -> Result<Node, StoreError>;

    async fn get_node(&self, id: &str) -> Result<Node, StoreError>;

    async fn list_nodes(&self) -> Result<Vec<Node>, StoreError>;

    async fn create_task(&self, task: Task) -> Result<Task, StoreError>;

    async fn update_task(&self, task: Task) -> Result<Task, StoreError>;

    async fn get_task(&self, id: &str) -> Result<Task, StoreError>;

    async fn list_tasks(&self) -> Result<Vec<Task>, StoreError>;

    /// Create the node record, falling back to an update when a record with
    /// the same id survived from an earlier dispatcher instance.
    async fn upsert_node(&self, node: Node) -> Result<Node, StoreError> {
        match self.create_node(node.clone()).await {
            Err(StoreError::AlreadyExists(_)) => self.update_node(node).await,
            other => other,
        }
    }
}
