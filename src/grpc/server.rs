//! gRPC server implementation.

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server;
use tracing::{error, info};

use super::proto::ratekeeper::v1::rate_keeper_server::RateKeeperServer;
use super::service::RateKeeperService;
use crate::error::{RateKeeperError, Result};
use crate::ratelimit::RateLimiterBackend;

/// gRPC server for the RateKeeper service.
pub struct GrpcServer<R: RateLimiterBackend + 'static> {
    /// Address to bind to
    addr: SocketAddr,
    /// The rate limiter instance
    rate_limiter: Arc<R>,
}

impl<R: RateLimiterBackend + 'static> GrpcServer<R> {
    /// Create a new gRPC server around a rate limiter.
    pub fn new(addr: SocketAddr, rate_limiter: Arc<R>) -> Self {
        Self { addr, rate_limiter }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    fn service(&self) -> RateKeeperServer<RateKeeperService<R>> {
        RateKeeperServer::new(RateKeeperService::new(self.rate_limiter.clone()))
    }

    /// Start the gRPC server with graceful shutdown.
    ///
    /// The server will shut down when the provided signal resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send,
    {
        info!(addr = %self.addr, "Starting gRPC server for RateKeeper");

        Server::builder()
            .add_service(self.service())
            .serve_with_shutdown(self.addr, signal)
            .await
            .map_err(|e| {
                error!(error = %e, "gRPC server failed");
                RateKeeperError::Grpc(e)
            })
    }

    /// Serve on an already-bound listener, ignoring the configured address.
    ///
    /// Lets callers bind port 0 and learn the real address before serving.
    pub async fn serve_listener_with_shutdown<F>(self, listener: TcpListener, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send,
    {
        info!(addr = ?listener.local_addr().ok(), "Starting gRPC server for RateKeeper");

        Server::builder()
            .add_service(self.service())
            .serve_with_incoming_shutdown(TcpListenerStream::new(listener), signal)
            .await
            .map_err(|e| {
                error!(error = %e, "gRPC server failed");
                RateKeeperError::Grpc(e)
            })
    }
}
