use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::store::{Store, StoreError};
use crate::types::{Node, Task};

/// In-process store. Writes are linearizable per key, which is the
/// guarantee the dispatcher expects from the replicated store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    nodes: RwLock<HashMap<String, Node>>,
    tasks: RwLock<HashMap<String, Task>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_node(&self, mut node: Node) -> Result<Node, StoreError> {
        let mut nodes = self.nodes.write().await;
        if nodes.contains_key(&node.id) {
            return Err(StoreError::AlreadyExists(node.id));
        }
        node.version = 1;
        node.updated_at = Utc::now();
        nodes.insert(node.id.clone(), node.clone());
        Ok(node)
    }

    async fn update_node(&self, mut node: Node) -> Result<Node, StoreError> {
        let mut nodes = self.nodes.write().await;
        let existing = nodes
            .get_mut(&node.id)
            .ok_or_else(|| StoreError::NotFound(node.id.clone()))?;
        node.version = existing.version + 1;
        node.updated_at = Utc::now();
        *existing = node.clone();
        Ok(node)
    }

    async fn get_node(&self, id: &str) -> Result<Node, StoreError> {
        self.nodes
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn list_nodes(&self) -> Result<Vec<Node>, StoreError> {
        let mut nodes: Vec<Node> = self.nodes.read().await.values().cloned().collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(nodes)
    }

    async fn create_task(&self, mut task: Task) -> Result<Task, StoreError> {
        let mut tasks = self.tasks.write().await;
        if tasks.contains_key(&task.id) {
            return Err(StoreError::AlreadyExists(task.id));
        }
        task.version = 1;
        task.updated_at = Utc::now();
        tasks.insert(task.id.clone(), task.clone());
        Ok(task)
    }

    async fn update_task(&self, mut task: Task) -> Result<Task, StoreError> {
        let mut tasks = self.tasks.write().await;
        let existing = tasks
            .get_mut(&task.id)
            .ok_or_else(|| StoreError::NotFound(task.id.clone()))?;
        task.version = existing.version + 1;
        task.updated_at = Utc::now();
        *existing = task.clone();
        Ok(task)
    }

    async fn get_task(&self, id: &str) -> Result<Task, StoreError> {
        self.tasks
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn list_tasks(&self) -> Result<Vec<Task>, StoreError> {
        let mut tasks: Vec<Task> = self.tasks.read().await.values().cloned().collect();
        tasks.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(tasks)
    }
}
