use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;

use crate::dispatcher::Dispatcher;
use crate::grpc::AgentService;
use crate::proto::agent_server::AgentServer;

/// Serves the agent RPC surface until the shutdown token is cancelled.
pub struct GrpcServer {
    addr: SocketAddr,
    dispatcher: Arc<Dispatcher>,
}

impl GrpcServer {
    pub fn new(addr: SocketAddr, dispatcher: Arc<Dispatcher>) -> Self {
        Self { addr, dispatcher }
    }

    pub async fn run(self, shutdown: CancellationToken) -> Result<(), tonic::transport::Error> {
        tracing::info!(addr = %self.addr, "Starting gRPC server");

        Server::builder()
            .add_service(AgentServer::new(AgentService::new(self.dispatcher)))
            .serve_with_shutdown(self.addr, shutdown.cancelled_owned())
            .await
    }

    /// Serve on an already bound listener. Lets callers pick port 0 and read
    /// the real address back before connecting.
    pub async fn run_with_listener(
        self,
        listener: TcpListener,
        shutdown: CancellationToken,
    ) -> Result<(), tonic::transport::Error> {
        tracing::info!(addr = %self.addr, "Starting gRPC server");

        Server::builder()
            .add_service(AgentServer::new(AgentService::new(self.dispatcher)))
            .serve_with_incoming_shutdown(
                TcpListenerStream::new(listener),
                shutdown.cancelled_owned(),
            )
            .await
    }
}
