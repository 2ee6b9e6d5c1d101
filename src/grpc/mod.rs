pub mod agent_service;
pub mod server;

pub use agent_service::AgentService;
pub use server::GrpcServer;

pub use crate::proto::agent_client::AgentClient;
pub use crate::proto::agent_server::{Agent, AgentServer};
