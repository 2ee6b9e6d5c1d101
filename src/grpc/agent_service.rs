use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio_stream::StreamExt;
use tonic::{Request, Response, Status};

use crate::dispatcher::Dispatcher;
use crate::proto::agent_server::Agent;
use crate::proto::{
    self, HeartbeatRequest, HeartbeatResponse, RegisterNodeRequest, RegisterNodeResponse,
    UpdateNodeStatusRequest, UpdateNodeStatusResponse, UpdateTaskStatusRequest,
    UpdateTaskStatusResponse, WatchTasksRequest, WatchTasksResponse,
};
use crate::types::{Node, NodeDescription, NodeStatus, TaskStatus};

/// [`Agent`] implementation backed by the dispatcher.
#[derive(Debug, Clone)]
pub struct AgentService {
    dispatcher: Arc<Dispatcher>,
}

impl AgentService {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }
}

type TaskStream = Pin<Box<dyn tokio_stream::Stream<Item = Result<WatchTasksResponse, Status>> + Send>>;

#[tonic::async_trait]
impl Agent for AgentService {
    type WatchTasksStream = TaskStream;

    async fn register_node(
        &self,
        request: Request<RegisterNodeRequest>,
    ) -> Result<Response<RegisterNodeResponse>, Status> {
        let req = request.into_inner();
        let node = req
            .node
            .ok_or_else(|| Status::invalid_argument("Node descriptor is required"))?;
        let node = node_from_proto(node)?;

        let ttl = self.dispatcher.register(node).await?;
        Ok(Response::new(RegisterNodeResponse {
            heartbeat_ttl_ms: ttl_to_ms(ttl),
        }))
    }

    async fn heartbeat(
        &self,
        request: Request<HeartbeatRequest>,
    ) -> Result<Response<HeartbeatResponse>, Status> {
        let req = request.into_inner();
        require_id(&req.node_id, "Node ID")?;

        let ttl = self.dispatcher.heartbeat(&req.node_id).await?;
        Ok(Response::new(HeartbeatResponse {
            heartbeat_ttl_ms: ttl_to_ms(ttl),
        }))
    }

    async fn update_node_status(
        &self,
        request: Request<UpdateNodeStatusRequest>,
    ) -> Result<Response<UpdateNodeStatusResponse>, Status> {
        let req = request.into_inner();
        require_id(&req.node_id, "Node ID")?;
        let status = node_status_from_proto(req.status)?;

        self.dispatcher
            .update_node_status(&req.node_id, status)
            .await?;
        Ok(Response::new(UpdateNodeStatusResponse {}))
    }

    async fn update_task_status(
        &self,
        request: Request<UpdateTaskStatusRequest>,
    ) -> Result<Response<UpdateTaskStatusResponse>, Status> {
        let req = request.into_inner();
        require_id(&req.node_id, "Node ID")?;
        require_id(&req.task_id, "Task ID")?;
        let status = task_status_from_proto(req.status)?;
        let message = if req.message.is_empty() {
            None
        } else {
            Some(req.message)
        };

        self.dispatcher
            .update_task_status(&req.node_id, &req.task_id, status, message)
            .await?;
        Ok(Response::new(UpdateTaskStatusResponse {}))
    }

    async fn watch_tasks(
        &self,
        request: Request<WatchTasksRequest>,
    ) -> Result<Response<Self::WatchTasksStream>, Status> {
        let req = request.into_inner();
        require_id(&req.node_id, "Node ID")?;

        let watch = self.dispatcher.watch_tasks(&req.node_id)?;
        let stream = watch.map(|task_ids| Ok(WatchTasksResponse { task_ids }));
        Ok(Response::new(Box::pin(stream) as Self::WatchTasksStream))
    }
}

fn require_id(id: &str, what: &str) -> Result<(), Status> {
    if id.trim().is_empty() {
        return Err(Status::invalid_argument(format!("{} cannot be empty", what)));
    }
    Ok(())
}

fn ttl_to_ms(ttl: Duration) -> u64 {
    ttl.as_millis() as u64
}

/// Status reported by the node is ignored; registration always forces READY.
fn node_from_proto(node: proto::Node) -> Result<Node, Status> {
    require_id(&node.id, "Node ID")?;
    let description = node
        .description
        .map(|d| NodeDescription {
            hostname: d.hostname,
            labels: d.labels,
        })
        .unwrap_or_default();
    Ok(Node::new(node.id).with_description(description))
}

fn node_status_from_proto(status: i32) -> Result<NodeStatus, Status> {
    match proto::NodeStatus::try_from(status) {
        Ok(proto::NodeStatus::Ready) => Ok(NodeStatus::Ready),
        Ok(proto::NodeStatus::Down) => Ok(NodeStatus::Down),
        Ok(proto::NodeStatus::Unknown) | Err(_) => Err(Status::invalid_argument(format!(
            "Invalid node status: {}",
            status
        ))),
    }
}

fn task_status_from_proto(status: i32) -> Result<TaskStatus, Status> {
    let status = match proto::TaskStatus::try_from(status) {
        Ok(proto::TaskStatus::Pending) => TaskStatus::Pending,
        Ok(proto::TaskStatus::Assigned) => TaskStatus::Assigned,
        Ok(proto::TaskStatus::Accepted) => TaskStatus::Accepted,
        Ok(proto::TaskStatus::Running) => TaskStatus::Running,
        Ok(proto::TaskStatus::Completed) => TaskStatus::Completed,
        Ok(proto::TaskStatus::Failed) => TaskStatus::Failed,
        Ok(proto::TaskStatus::Rejected) => TaskStatus::Rejected,
        Ok(proto::TaskStatus::Unspecified) | Err(_) => {
            return Err(Status::invalid_argument(format!(
                "Invalid task status: {}",
                status
            )))
        }
    };
    Ok(status)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_status_conversion() {
        assert_eq!(
            node_status_from_proto(proto::NodeStatus::Down as i32).unwrap(),
            NodeStatus::Down
        );
        assert!(node_status_from_proto(proto::NodeStatus::Unknown as i32).is_err());
        assert!(node_status_from_proto(42).is_err());
    }

    #[test]
    fn task_status_conversion() {
        assert_eq!(
            task_status_from_proto(proto::TaskStatus::Running as i32).unwrap(),
            TaskStatus::Running
        );
        let err = task_status_from_proto(0).unwrap_err();
        assert_eq!(err.code(), tonic::Code::InvalidArgument);
    }

    #[test]
    fn node_from_proto_requires_id() {
        let err = node_from_proto(proto::Node {
            id: "  ".to_string(),
            status: proto::NodeStatus::Ready as i32,
            description: None,
        })
        .unwrap_err();
        assert_eq!(err.code(), tonic::Code::InvalidArgument);
    }

    #[test]
    fn node_from_proto_keeps_description() {
        let mut labels = std::collections::HashMap::new();
        labels.insert("zone".to_string(), "us-east".to_string());
        let node = node_from_proto(proto::Node {
            id: "a".to_string(),
            status: proto::NodeStatus::Down as i32,
            description: Some(proto::NodeDescription {
                hostname: "host-a".to_string(),
                labels,
            }),
        })
        .unwrap();
        assert_eq!(node.id, "a");
        assert_eq!(node.description.hostname, "host-a");
        assert_eq!(node.description.labels["zone"], "us-east");
        assert_eq!(node.status, NodeStatus::Unknown);
    }
}
