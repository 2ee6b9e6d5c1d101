pub mod config;
pub mod dashboard;
pub mod dispatcher;
pub mod error;
pub mod grpc;
pub mod node;
pub mod proto;
pub mod shutdown;
pub mod store;
pub mod types;
