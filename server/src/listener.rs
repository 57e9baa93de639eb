//! Accept loop: owns the listening socket and turns accepted sockets into
//! connection actors.

use dashmap::DashMap;
use log::{error, info, warn};
use shared::ClientMessage;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

use crate::config::ConnectionConfig;
use crate::connection::{cancelled, CloseReason, Connection, ConnectionId, FrameHandler};
use crate::error::ServerError;

/// How long `stop` waits for the accept loop to exit.
const STOP_TIMEOUT: Duration = Duration::from_secs(2);

/// Pause after an accept error before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(10);

type LiveConnections = Arc<DashMap<ConnectionId, Connection>>;

enum ListenerState {
    Idle,
    Running {
        local_addr: SocketAddr,
        shutdown: watch::Sender<bool>,
        task: JoinHandle<()>,
        connections: LiveConnections,
    },
    Stopped,
}

/// TCP accept loop.
///
/// Identities are minted in accept order starting at 1 and never reused for
/// the lifetime of the listener. The handler sees `on_connect` for a socket
/// before the next socket is accepted and before any of its frames.
pub struct Listener {
    config: ConnectionConfig,
    state: Mutex<ListenerState>,
}

impl Listener {
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            state: Mutex::new(ListenerState::Idle),
        }
    }

    /// Binds `addr` and starts accepting. Returns the bound address.
    /// Starting a running listener returns its address again.
    pub async fn start<H: FrameHandler>(
        &self,
        addr: SocketAddr,
        handler: Arc<H>,
    ) -> Result<SocketAddr, ServerError> {
        let mut state = self.state.lock().await;
        match &*state {
            ListenerState::Running { local_addr, .. } => return Ok(*local_addr),
            ListenerState::Stopped => return Err(ServerError::AlreadyStopped("listener")),
            ListenerState::Idle => {}
        }

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::bind(addr, e))?;
        let local_addr = listener.local_addr()?;
        info!("TCP server started on {}. Listening...", local_addr);

        let connections: LiveConnections = Arc::new(DashMap::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let tracked = Arc::new(Tracked {
            inner: handler,
            live: Arc::clone(&connections),
        });
        let task = tokio::spawn(accept_loop(listener, shutdown_rx, self.config, tracked));

        *state = ListenerState::Running {
            local_addr,
            shutdown: shutdown_tx,
            task,
            connections,
        };
        Ok(local_addr)
    }

    /// Stops accepting and closes every live connection. Idempotent.
    pub async fn stop(&self) {
        let mut state = self.state.lock().await;
        let (shutdown, mut task, connections) =
            match std::mem::replace(&mut *state, ListenerState::Stopped) {
                ListenerState::Running {
                    shutdown,
                    task,
                    connections,
                    ..
                } => (shutdown, task, connections),
                ListenerState::Idle => {
                    *state = ListenerState::Idle;
                    return;
                }
                ListenerState::Stopped => return,
            };

        shutdown.send_replace(true);
        match timeout(STOP_TIMEOUT, &mut task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Accept loop panicked: {}", e),
            Err(_) => {
                warn!("Accept loop did not exit within {:?}, aborting", STOP_TIMEOUT);
                task.abort();
            }
        }

        for entry in connections.iter() {
            entry.value().close();
        }
        info!("TCP server stopped.");
    }

    pub async fn local_addr(&self) -> Option<SocketAddr> {
        match &*self.state.lock().await {
            ListenerState::Running { local_addr, .. } => Some(*local_addr),
            _ => None,
        }
    }

    /// Number of sockets currently open.
    pub async fn connection_count(&self) -> usize {
        match &*self.state.lock().await {
            ListenerState::Running { connections, .. } => connections.len(),
            _ => 0,
        }
    }
}

/// Keeps the listener's set of live connections in step with the actors.
struct Tracked<H> {
    inner: Arc<H>,
    live: LiveConnections,
}

impl<H: FrameHandler> FrameHandler for Tracked<H> {
    fn on_connect(&self, connection: &Connection) {
        self.live.insert(connection.id(), connection.clone());
        self.inner.on_connect(connection);
    }

    fn on_frame(
        &self,
        connection: &Connection,
        message: ClientMessage,
    ) -> impl Future<Output = ()> + Send {
        self.inner.on_frame(connection, message)
    }

    async fn on_disconnect(&self, connection: &Connection, reason: &CloseReason) {
        self.live.remove(&connection.id());
        self.inner.on_disconnect(connection, reason).await;
    }
}

async fn accept_loop<H: FrameHandler>(
    listener: TcpListener,
    mut shutdown: watch::Receiver<bool>,
    config: ConnectionConfig,
    handler: Arc<Tracked<H>>,
) {
    let mut next_id: ConnectionId = 1;

    loop {
        let accepted = tokio::select! {
            biased;
            _ = cancelled(&mut shutdown) => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, addr)) => {
                let id = next_id;
                next_id += 1;

                match Connection::open(stream, id, config) {
                    Ok((connection, io)) => {
                        info!("Client connected from {} with id {}", addr, id);
                        handler.on_connect(&connection);
                        io.spawn(connection, Arc::clone(&handler));
                    }
                    Err(e) => warn!("Could not set up connection from {}: {}", addr, e),
                }
            }
            Err(e) => {
                error!("Error accepting client: {}", e);
                sleep(ACCEPT_BACKOFF).await;
            }
        }
    }

    info!("Accept loop exited");
}
