//! TCP listeners and the hub task.
//!
//! Accept loops and per-socket I/O tasks only move bytes. They report to a
//! single hub task over an mpsc channel, and the hub is the only place that
//! touches the [`Server`]. Each socket task gets its own channel back for
//! outbound bytes and the close command.

use super::hub::{Admission, Drained, Server};
use crate::error::{ProtocolError, Result};
use crate::session::ConnectionId;
use crate::utils::metrics::Metrics;
use bytes::Bytes;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

const READ_CHUNK: usize = 4096;
const EVENT_QUEUE: usize = 1024;

/// Bans are purged of expired entries this often.
const BAN_PURGE_INTERVAL: Duration = Duration::from_secs(60);

/// Commands from the hub to a socket task.
#[derive(Debug)]
enum Outbound {
    Data(Bytes),
    Close,
}

/// Events from listeners and socket tasks to the hub.
#[derive(Debug)]
enum Event {
    Incoming { stream: TcpStream, peer: SocketAddr },
    Data { id: ConnectionId, bytes: Bytes },
    Closed { id: ConnectionId },
}

/// A bound server, ready to run.
pub struct SessionServer {
    server: Server,
    listeners: Vec<TcpListener>,
}

impl SessionServer {
    /// Binds the IPv4 listener and, if configured, the IPv6 one.
    ///
    /// # Errors
    /// Any bind failure. Nothing is listening in that case.
    pub async fn bind(server: Server) -> Result<Self> {
        let network = &server.config().network;
        let mut addresses = vec![network.address.clone()];
        addresses.extend(network.ipv6_address.clone());

        let mut listeners = Vec::with_capacity(addresses.len());
        for address in &addresses {
            let listener = TcpListener::bind(address).await.map_err(|e| {
                ProtocolError::ConfigError(format!("Failed to bind {address}: {e}"))
            })?;
            info!(address = %listener.local_addr()?, "Listening");
            listeners.push(listener);
        }
        Ok(Self { server, listeners })
    }

    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.listeners
            .iter()
            .filter_map(|l| l.local_addr().ok())
            .collect()
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        self.server.metrics()
    }

    /// Runs until Ctrl-C.
    pub async fn run(self) -> Result<()> {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
        tokio::spawn(wait_for_ctrl_c(tokio::signal::ctrl_c(), shutdown_tx));
        self.run_with_shutdown(shutdown_rx).await
    }

    /// Runs until a message arrives on `shutdown_rx` or its sender is dropped.
    #[instrument(skip_all)]
    pub async fn run_with_shutdown(self, mut shutdown_rx: mpsc::Receiver<()>) -> Result<()> {
        let Self {
            mut server,
            listeners,
        } = self;
        let (events_tx, mut events_rx) = mpsc::channel::<Event>(EVENT_QUEUE);

        let accept_tasks: Vec<JoinHandle<()>> = listeners
            .into_iter()
            .map(|listener| tokio::spawn(accept_loop(listener, events_tx.clone())))
            .collect();

        let mut writers: HashMap<ConnectionId, mpsc::UnboundedSender<Outbound>> = HashMap::new();
        let mut ticker = tokio::time::interval(server.config().network.tick_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut last_purge = Instant::now();

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Shutting down server, closing connections");
                    break;
                }

                Some(event) = events_rx.recv() => {
                    handle_event(&mut server, &mut writers, &events_tx, event);
                }

                _ = ticker.tick() => {
                    let now = Instant::now();
                    server.check_timeouts(now);
                    if now.duration_since(last_purge) >= BAN_PURGE_INTERVAL {
                        server.purge_expired_bans(SystemTime::now());
                        last_purge = now;
                    }
                    flush_all(&mut server, &mut writers);
                }
            }
        }

        for task in accept_tasks {
            task.abort();
        }
        server.shutdown();
        flush_all(&mut server, &mut writers);
        server.metrics().log_summary();
        Ok(())
    }
}

/// Requests shutdown once `signal` fires. If the signal handler cannot be
/// installed the sender is held forever and the server keeps running.
async fn wait_for_ctrl_c<F>(signal: F, shutdown: mpsc::Sender<()>)
where
    F: std::future::Future<Output = std::io::Result<()>>,
{
    match signal.await {
        Ok(()) => {
            info!("Received CTRL+C signal, shutting down");
            let _ = shutdown.send(()).await;
        }
        Err(e) => {
            error!(error = %e, "Failed to listen for CTRL+C, running without signal shutdown");
            std::future::pending::<()>().await;
        }
    }
}

async fn accept_loop(listener: TcpListener, events: mpsc::Sender<Event>) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                if events.send(Event::Incoming { stream, peer }).await.is_err() {
                    return;
                }
            }
            Err(e) => {
                error!(error = %e, "Error accepting connection");
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
}

fn handle_event(
    server: &mut Server,
    writers: &mut HashMap<ConnectionId, mpsc::UnboundedSender<Outbound>>,
    events: &mpsc::Sender<Event>,
    event: Event,
) {
    match event {
        Event::Incoming { stream, peer } => match server.accept(peer, Instant::now()) {
            Admission::Admitted(id) => {
                if let Err(e) = stream.set_nodelay(true) {
                    debug!(conn_id = id, error = %e, "Failed to set TCP_NODELAY");
                }
                let (tx, rx) = mpsc::unbounded_channel();
                writers.insert(id, tx);
                tokio::spawn(socket_task(id, stream, events.clone(), rx));
            }
            // the stream is dropped here, which closes it without a reply
            Admission::Banned | Admission::Rejected(_) => {}
        },
        Event::Data { id, bytes } => {
            server.handle_data(id, &bytes, Instant::now());
            flush(server, writers, id);
        }
        Event::Closed { id } => {
            server.handle_closed(id);
            writers.remove(&id);
        }
    }
}

fn flush(
    server: &mut Server,
    writers: &mut HashMap<ConnectionId, mpsc::UnboundedSender<Outbound>>,
    id: ConnectionId,
) {
    let Drained { data, close } = server.drain(id);
    let Some(writer) = writers.get(&id) else {
        return;
    };
    // a failed send means the socket task is already gone
    if let Some(bytes) = data {
        let _ = writer.send(Outbound::Data(bytes));
    }
    if close {
        let _ = writer.send(Outbound::Close);
        writers.remove(&id);
    }
}

fn flush_all(
    server: &mut Server,
    writers: &mut HashMap<ConnectionId, mpsc::UnboundedSender<Outbound>>,
) {
    for id in server.connection_ids() {
        flush(server, writers, id);
    }
}

async fn socket_task(
    id: ConnectionId,
    stream: TcpStream,
    events: mpsc::Sender<Event>,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
) {
    let (mut reader, mut writer) = stream.into_split();
    let mut buf = vec![0u8; READ_CHUNK];

    loop {
        tokio::select! {
            read = reader.read(&mut buf) => match read {
                Ok(0) => break,
                Ok(n) => {
                    let bytes = Bytes::copy_from_slice(&buf[..n]);
                    if events.send(Event::Data { id, bytes }).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    debug!(conn_id = id, error = %e, "Read failed");
                    break;
                }
            },

            command = outbound.recv() => match command {
                Some(Outbound::Data(bytes)) => {
                    if let Err(e) = writer.write_all(&bytes).await {
                        warn!(conn_id = id, error = %e, "Write failed");
                        break;
                    }
                }
                Some(Outbound::Close) | None => {
                    let _ = writer.shutdown().await;
                    break;
                }
            },
        }
    }

    let _ = events.send(Event::Closed { id }).await;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_signal_failure_keeps_server_running() {
        let (tx, mut rx) = mpsc::channel::<()>(1);
        let failing = async { Err(std::io::Error::other("no signal support")) };
        let waiter = tokio::spawn(wait_for_ctrl_c(failing, tx));

        let outcome = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
        assert!(outcome.is_err(), "shutdown channel must stay open");
        waiter.abort();
    }

    #[tokio::test]
    async fn test_signal_requests_shutdown() {
        let (tx, mut rx) = mpsc::channel::<()>(1);
        tokio::spawn(wait_for_ctrl_c(async { Ok(()) }, tx));
        assert_eq!(rx.recv().await, Some(()));
    }
}
