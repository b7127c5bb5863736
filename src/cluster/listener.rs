//! Cluster Listener
//!
//! Accepts inbound peer connections and hands each to a bounded worker pool.
//! Connections arriving while every worker is busy are closed.
//! A worker reads the HELLO handshake, then decodes messages and passes
//! them to a [`MessageProcessor`] until the processor reports a terminal
//! message, the stream ends, or the listener shuts down.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch, Semaphore, TryAcquireError};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, trace, warn, Instrument};

use crate::codec::{FrameError, FrameReader};
use crate::config::ClusterConfig;
use crate::protocol::ClusterMessage;

/// Handles messages decoded from inbound connections
#[async_trait]
pub trait MessageProcessor: Send + Sync + 'static {
    /// Process one message. Returning true ends the connection.
    async fn process(&self, message: ClusterMessage) -> bool;

    /// Called after an inbound connection has closed
    async fn connection_closed(&self) {}
}

/// Listener tuning taken from [`ClusterConfig`]
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    pub pool_name: String,
    pub pool_size: usize,
    pub queue_capacity: usize,
    pub read_timeout: Duration,
    pub accept_timeout: Duration,
}

impl From<&ClusterConfig> for ListenerConfig {
    fn from(config: &ClusterConfig) -> Self {
        Self {
            pool_name: config.worker_pool_name.clone(),
            pool_size: config.worker_pool_size,
            queue_capacity: config.work_queue_capacity,
            read_timeout: config.read_timeout,
            accept_timeout: config.accept_timeout,
        }
    }
}

type Work = (TcpStream, SocketAddr);

pub struct ClusterListener {
    local_addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ClusterListener {
    /// Bind `addr` and start accepting connections
    pub async fn start(
        addr: SocketAddr,
        config: ListenerConfig,
        processor: Arc<dyn MessageProcessor>,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        info!("Cluster listening on {}", local_addr);

        let (shutdown_tx, _) = watch::channel(false);
        let (work_tx, work_rx) = mpsc::channel(config.queue_capacity);

        let accept = tokio::spawn(accept_loop(
            listener,
            work_tx,
            config.accept_timeout,
            shutdown_tx.subscribe(),
        ));
        let dispatch = tokio::spawn(dispatch_loop(
            work_rx,
            processor,
            config,
            shutdown_tx.subscribe(),
        ));

        Ok(Self {
            local_addr,
            shutdown_tx,
            tasks: Mutex::new(vec![accept, dispatch]),
        })
    }

    /// Get the bound address
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_running(&self) -> bool {
        !*self.shutdown_tx.borrow()
    }

    /// Stop accepting and signal workers to finish after their current message.
    ///
    /// The listening socket is closed when this returns.
    pub async fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);

        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                warn!("Cluster listener task failed: {}", e);
            }
        }
        debug!("Cluster listener on {} stopped", self.local_addr);
    }
}

impl Drop for ClusterListener {
    fn drop(&mut self) {
        self.shutdown_tx.send_replace(true);
    }
}

async fn accept_loop(
    listener: TcpListener,
    work_tx: mpsc::Sender<Work>,
    accept_timeout: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    while !*shutdown_rx.borrow() {
        tokio::select! {
            biased;

            _ = shutdown_rx.changed() => break,

            accepted = tokio::time::timeout(accept_timeout, listener.accept()) => {
                match accepted {
                    Err(_) => trace!("Accept timeout, checking for shutdown"),
                    Ok(Ok((stream, addr))) => match work_tx.try_send((stream, addr)) {
                        Ok(()) => trace!("Queued connection from {}", addr),
                        Err(TrySendError::Full((stream, addr))) => {
                            warn!("Cluster worker pool saturated, closing connection from {}", addr);
                            drop(stream);
                        }
                        Err(TrySendError::Closed(_)) => break,
                    },
                    Ok(Err(e)) => error!("Error while listening: {}", e),
                }
            }
        }
    }
    debug!("Cluster accept loop stopped");
}

async fn dispatch_loop(
    mut work_rx: mpsc::Receiver<Work>,
    processor: Arc<dyn MessageProcessor>,
    config: ListenerConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let workers = Arc::new(Semaphore::new(config.pool_size));

    while !*shutdown_rx.borrow() {
        let (stream, addr) = tokio::select! {
            biased;
            _ = shutdown_rx.changed() => break,
            work = work_rx.recv() => match work {
                Some(work) => work,
                None => break,
            },
        };

        // Inbound connections live as long as their peer, so a full pool
        // sheds new ones instead of leaving them unread
        let permit = match workers.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(TryAcquireError::NoPermits) => {
                warn!(
                    "Cluster worker pool {} exhausted ({} workers), closing connection from {}",
                    config.pool_name, config.pool_size, addr
                );
                drop(stream);
                continue;
            }
            Err(TryAcquireError::Closed) => break,
        };

        let span = info_span!(
            "worker",
            pool = %config.pool_name,
            remote = %addr,
            member = tracing::field::Empty
        );
        let processor = processor.clone();
        let read_timeout = config.read_timeout;
        let shutdown_rx = shutdown_rx.clone();
        tokio::spawn(
            async move {
                serve_connection(stream, processor, read_timeout, shutdown_rx).await;
                drop(permit);
            }
            .instrument(span),
        );
    }
    debug!("Cluster dispatch loop stopped");
}

async fn serve_connection(
    stream: TcpStream,
    processor: Arc<dyn MessageProcessor>,
    read_timeout: Duration,
    shutdown_rx: watch::Receiver<bool>,
) {
    let mut reader = FrameReader::new(stream).with_read_timeout(read_timeout);

    match reader.read_hello().await {
        Ok(member) => {
            tracing::Span::current().record("member", member.as_str());
            debug!("Reading messages from {}", member);
            read_messages(&mut reader, processor.as_ref(), &shutdown_rx).await;
        }
        Err(FrameError::Decode(e)) => warn!("Received invalid hello: {}", e),
        Err(e) => debug!("Connection closed before hello: {}", e),
    }

    let mut stream = reader.into_inner();
    if let Err(e) = stream.shutdown().await {
        trace!("Error closing connection: {}", e);
    }
    processor.connection_closed().await;
}

async fn read_messages(
    reader: &mut FrameReader<TcpStream>,
    processor: &dyn MessageProcessor,
    shutdown_rx: &watch::Receiver<bool>,
) {
    loop {
        match reader.read_message().await {
            Ok(message) => {
                trace!(kind = message.type_name(), "Received {}", message);
                if processor.process(message).await {
                    debug!("Received leave, disconnecting");
                    return;
                }
            }
            Err(FrameError::Eof) => {
                debug!("End of stream, disconnecting");
                return;
            }
            Err(FrameError::Timeout) => {
                info!("Timeout waiting for message, disconnecting");
                return;
            }
            Err(FrameError::Decode(e)) => {
                warn!("Invalid message, disconnecting: {}", e);
                return;
            }
            Err(FrameError::Io(e)) => {
                info!("IO error reading message, disconnecting: {}", e);
                return;
            }
        }

        if *shutdown_rx.borrow() {
            debug!("Listener shutting down, disconnecting");
            return;
        }
    }
}
