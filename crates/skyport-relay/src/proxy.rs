//! Relay proxy workers
//!
//! One worker per TCP service port. Each worker owns its listener on the
//! tunnel-local address and forwards every accepted connection to the real
//! service at `destination:local_port`. Workers share nothing, so a bind
//! failure or a misbehaving destination on one port never affects another.

use crate::error::RelayError;
use crate::session::ProxySession;
use skyport_proto::ServicePort;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// How a worker handles simultaneous connections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionMode {
    /// One session at a time per port; later connections wait in the backlog
    #[default]
    Sequential,
    /// A task per connection, at most `limit` at once
    Concurrent { limit: usize },
}

/// Relay configuration for a set of service ports
#[derive(Debug, Clone)]
pub struct RelayProxy {
    listen_address: IpAddr,
    destination: IpAddr,
    services: Vec<ServicePort>,
    mode: SessionMode,
}

impl RelayProxy {
    pub fn new(listen_address: IpAddr, destination: IpAddr, services: &[ServicePort]) -> Self {
        Self {
            listen_address,
            destination,
            services: services.to_vec(),
            mode: SessionMode::default(),
        }
    }

    pub fn with_mode(mut self, mode: SessionMode) -> Self {
        self.mode = mode;
        self
    }

    /// Bind every TCP port and start its worker.
    ///
    /// Bind failures are isolated to their port and reported through
    /// [`RelayHandle::failures`]; the remaining workers keep running.
    pub async fn spawn(self) -> RelayHandle {
        let mut workers = Vec::new();
        let mut failures = Vec::new();

        for service in &self.services {
            if !service.is_tcp() {
                warn!(port = service.port, "UDP relaying is not supported, skipping {}", service);
                continue;
            }

            let listen = SocketAddr::new(self.listen_address, service.port);
            let destination = SocketAddr::new(self.destination, service.local_port);

            let listener = match TcpListener::bind(listen).await {
                Ok(listener) => listener,
                Err(e) => {
                    let err = RelayError::ProxyBind {
                        address: listen,
                        reason: e.to_string(),
                    };
                    error!(port = service.port, "{}", err);
                    failures.push(err);
                    continue;
                }
            };
            let local_addr = listener.local_addr().unwrap_or(listen);

            info!(listen = %local_addr, destination = %destination, "Relay listening");

            let worker = RelayWorker {
                listener,
                destination,
                mode: self.mode,
            };
            workers.push(WorkerHandle {
                service: *service,
                local_addr,
                task: tokio::spawn(worker.run()),
            });
        }

        RelayHandle { workers, failures }
    }
}

struct RelayWorker {
    listener: TcpListener,
    destination: SocketAddr,
    mode: SessionMode,
}

impl RelayWorker {
    async fn run(self) {
        let semaphore = match self.mode {
            SessionMode::Sequential => None,
            SessionMode::Concurrent { limit } => Some(Arc::new(Semaphore::new(limit.max(1)))),
        };

        loop {
            // In concurrent mode a permit is taken before accepting, so excess
            // connections queue in the listen backlog
            let permit = match &semaphore {
                Some(semaphore) => match semaphore.clone().acquire_owned().await {
                    Ok(permit) => Some(permit),
                    Err(_) => return,
                },
                None => None,
            };

            let (inbound, peer) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!(destination = %self.destination, "Failed to accept connection: {}", e);
                    continue;
                }
            };
            debug!(peer = %peer, destination = %self.destination, "Accepted connection");

            let destination = self.destination;
            match permit {
                None => handle_session(inbound, peer, destination).await,
                Some(permit) => {
                    tokio::spawn(async move {
                        handle_session(inbound, peer, destination).await;
                        drop(permit);
                    });
                }
            }
        }
    }
}

async fn handle_session(inbound: TcpStream, peer: SocketAddr, destination: SocketAddr) {
    match ProxySession::connect(inbound, peer, destination).await {
        Ok(session) => {
            session.relay().await;
        }
        Err(e) => {
            // The inbound socket is dropped here, which closes it
            warn!(peer = %peer, "{}", e);
        }
    }
}

/// A running worker
#[derive(Debug)]
pub struct WorkerHandle {
    pub service: ServicePort,
    pub local_addr: SocketAddr,
    task: JoinHandle<()>,
}

/// Owns every worker started by [`RelayProxy::spawn`]
#[derive(Debug)]
pub struct RelayHandle {
    workers: Vec<WorkerHandle>,
    failures: Vec<RelayError>,
}

impl RelayHandle {
    /// Ports that failed to start
    pub fn failures(&self) -> &[RelayError] {
        &self.failures
    }

    pub fn workers(&self) -> &[WorkerHandle] {
        &self.workers
    }

    /// Addresses of the running listeners
    pub fn listening(&self) -> Vec<SocketAddr> {
        self.workers.iter().map(|w| w.local_addr).collect()
    }

    /// Whether any worker is still accepting
    pub fn is_running(&self) -> bool {
        self.workers.iter().any(|w| !w.task.is_finished())
    }

    /// Stop all workers. In-flight sessions are not drained.
    pub fn shutdown(&mut self) {
        for worker in self.workers.drain(..) {
            worker.task.abort();
            debug!(listen = %worker.local_addr, "Relay worker stopped");
        }
    }
}

impl Drop for RelayHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
