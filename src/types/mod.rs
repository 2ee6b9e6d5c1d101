pub mod node;
pub mod task;

pub use node::{Node, NodeDescription, NodeStatus};
pub use task::{Task, TaskStatus};
