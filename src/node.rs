use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::DispatcherConfig;
use crate::dashboard::{run_dashboard, DashboardState};
use crate::dispatcher::Dispatcher;
use crate::grpc::GrpcServer;
use crate::store::Store;

/// Manager process: owns the dispatcher and the surfaces around it.
pub struct ManagerNode {
    pub config: DispatcherConfig,
    pub dispatcher: Arc<Dispatcher>,
}

impl ManagerNode {
    pub fn new(config: DispatcherConfig, store: Arc<dyn Store>) -> Self {
        let dispatcher = Dispatcher::new(&config, store);
        Self { config, dispatcher }
    }

    /// Run until `shutdown` is cancelled.
    ///
    /// Serves the agent RPCs on `listen_addr` and the dashboard if
    /// configured. On shutdown every registration is dropped without marking
    /// nodes down: they re-register with whichever manager comes up next.
    /// Dropping registrations also ends open watch streams, which lets the
    /// gRPC server finish its graceful shutdown.
    pub async fn run(self, shutdown: CancellationToken) {
        let grpc = {
            let server = GrpcServer::new(self.config.listen_addr, self.dispatcher.clone());
            let token = shutdown.clone();
            tokio::spawn(async move {
                if let Err(e) = server.run(token.clone()).await {
                    tracing::error!(error = %e, "gRPC server failed");
                    token.cancel();
                }
            })
        };

        let dashboard = self.config.dashboard_addr.map(|addr| {
            let state = DashboardState {
                dispatcher: self.dispatcher.clone(),
            };
            let token = shutdown.clone();
            tokio::spawn(async move {
                run_dashboard(addr, state, token).await;
            })
        });

        tracing::info!(
            listen_addr = %self.config.listen_addr,
            dashboard_addr = ?self.config.dashboard_addr,
            heartbeat_ttl_ms = self.config.heartbeat_ttl.as_millis() as u64,
            "Dispatcher running"
        );

        shutdown.cancelled().await;
        self.dispatcher.shutdown();

        if let Err(e) = grpc.await {
            tracing::warn!(error = %e, "gRPC task ended abnormally");
        }
        if let Some(handle) = dashboard {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Dashboard task ended abnormally");
            }
        }
    }
}
