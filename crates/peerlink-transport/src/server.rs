//! TCP server endpoint.

use std::{
    net::SocketAddr,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use peerlink_core::{
    ClientId, CoreVerb, EventLabel, EventSink, Message, NetworkEndpoint, SessionParams,
    TransportError,
};
use serde_json::{Value, json};
use tokio::{
    net::{TcpListener, TcpStream},
    runtime::Runtime,
    sync::{mpsc, oneshot, watch},
    task::{JoinHandle, JoinSet},
};
use uuid::Uuid;

use crate::{
    connection::{self, ReadEnd},
    protocol,
};

/// Upper bound on waiting for background tasks when closing.
pub(crate) const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// How long a connection's writer may keep flushing after its reader ends.
const WRITER_GRACE: Duration = Duration::from_millis(500);

/// How long a rejected connection lingers so the client reads the rejection.
const REJECT_LINGER: Duration = Duration::from_secs(1);

/// Pause after a failed accept so a persistent error does not spin.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

struct Connection {
    id: ClientId,
    outbound: mpsc::UnboundedSender<Message>,
    kick: oneshot::Sender<()>,
}

/// Live connections in arrival order.
#[derive(Default)]
struct ConnectionTable {
    entries: Vec<Connection>,
}

impl ConnectionTable {
    fn len(&self) -> usize {
        self.entries.len()
    }

    fn remove(&mut self, id: ClientId) -> Option<Connection> {
        let index = self.entries.iter().position(|c| c.id == id)?;
        Some(self.entries.remove(index))
    }
}

type SharedTable = Arc<Mutex<ConnectionTable>>;

fn lock(table: &SharedTable) -> MutexGuard<'_, ConnectionTable> {
    table.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Accepts clients and exchanges messages with them.
///
/// All socket work runs on a runtime owned by the server; the accept loop
/// and each connection are tasks on it. Closing raises a shutdown flag,
/// waits for every task, then tears the runtime down.
pub struct TcpServer {
    identity: Uuid,
    sink: EventSink,
    runtime: Option<Runtime>,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
    connections: SharedTable,
}

impl TcpServer {
    /// Start binding and accepting in the background.
    ///
    /// Bind success or failure arrives later as `InitSuccess`/`InitFailure`.
    ///
    /// # Errors
    /// Returns error if the background runtime cannot be created.
    pub fn open(params: &SessionParams, sink: EventSink) -> Result<Self, TransportError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("peerlink-server")
            .enable_all()
            .build()?;

        let (shutdown, _) = watch::channel(false);
        let connections = SharedTable::default();

        let mut tasks = vec![runtime.spawn(accept_loop(
            params.address(),
            params.max_connections,
            sink.clone(),
            Arc::clone(&connections),
            shutdown.subscribe(),
        ))];

        #[cfg(feature = "policy")]
        tasks.extend(params.policy_port.map(|port| {
            runtime.spawn(crate::policy::serve(
                format!("{}:{port}", params.host),
                sink.clone(),
                shutdown.subscribe(),
            ))
        }));

        Ok(Self {
            identity: Uuid::new_v4(),
            sink,
            runtime: Some(runtime),
            shutdown,
            tasks,
            connections,
        })
    }
}

impl NetworkEndpoint for TcpServer {
    fn identity(&self) -> Uuid {
        self.identity
    }

    fn send(&mut self, message: Message) {
        let table = lock(&self.connections);
        if table.entries.is_empty() {
            tracing::debug!(verb = ?message.verb, "Broadcast with no connected clients");
        }
        for connection in &table.entries {
            if let Err(mpsc::error::SendError(message)) = connection.outbound.send(message.clone())
            {
                self.sink
                    .send_failed(message, Some(connection.id), "connection closing");
            }
        }
    }

    fn send_to(&mut self, client: ClientId, message: Message) {
        let table = lock(&self.connections);
        let outbound = table.entries.iter().find(|c| c.id == client);
        let failed = match outbound {
            Some(connection) => connection
                .outbound
                .send(message)
                .err()
                .map(|e| (e.0, "connection closing")),
            None => Some((message, "unknown client")),
        };
        if let Some((message, error)) = failed {
            self.sink.send_failed(message, Some(client), error);
        }
    }

    fn disconnect(&mut self, client: ClientId) {
        let removed = lock(&self.connections).remove(client);
        if let Some(connection) = removed {
            tracing::info!(%client, "Disconnecting client");
            let _ = connection.kick.send(());
        }
    }

    fn clients(&self) -> Vec<ClientId> {
        lock(&self.connections).entries.iter().map(|c| c.id).collect()
    }

    fn close(&mut self) {
        let Some(runtime) = self.runtime.take() else {
            return;
        };
        self.shutdown.send_replace(true);

        let tasks = std::mem::take(&mut self.tasks);
        runtime.block_on(async {
            if tokio::time::timeout(CLOSE_GRACE, futures::future::join_all(tasks))
                .await
                .is_err()
            {
                tracing::warn!("Server tasks did not stop in time");
            }
        });
        runtime.shutdown_timeout(CLOSE_GRACE);
        tracing::info!(identity = %self.identity, "Server closed");
    }
}

impl Drop for TcpServer {
    fn drop(&mut self) {
        self.close();
    }
}

async fn accept_loop(
    address: String,
    max_connections: usize,
    sink: EventSink,
    table: SharedTable,
    mut shutdown: watch::Receiver<bool>,
) {
    let listener = match TcpListener::bind(&address).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(%address, "Bind failed: {e}");
            sink.signal(
                EventLabel::InitFailure,
                json!({ "address": address, "error": e.to_string() }),
            );
            return;
        }
    };

    let local = listener
        .local_addr()
        .map_or_else(|_| address.clone(), |addr| addr.to_string());
    tracing::info!(address = %local, "Server listening");
    sink.signal(EventLabel::InitSuccess, json!({ "address": local }));

    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            () = connection::shutdown_requested(&mut shutdown) => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, remote)) => {
                    if lock(&table).len() >= max_connections {
                        tracing::warn!(%remote, max_connections, "Server full, rejecting client");
                        connections.spawn(reject(stream, remote));
                    } else {
                        let (id, outbound_rx, kick_rx) = register(&table);
                        tracing::info!(client = %id, %remote, "Client connected");
                        sink.message(
                            EventLabel::Connected,
                            Message::untagged(json!({ "address": remote.to_string() })),
                            Some(id),
                        );
                        connections.spawn(serve_connection(
                            stream,
                            id,
                            outbound_rx,
                            kick_rx,
                            shutdown.clone(),
                            sink.clone(),
                            Arc::clone(&table),
                        ));
                    }
                }
                Err(e) => {
                    tracing::warn!("Accept failed: {e}");
                    sink.signal(EventLabel::SecurityError, json!({ "error": e.to_string() }));
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            },
        }

        while connections.try_join_next().is_some() {}
    }

    drop(listener);
    lock(&table).entries.clear();
    while connections.join_next().await.is_some() {}

    sink.signal(EventLabel::Closed, json!({ "address": local }));
}

fn register(
    table: &SharedTable,
) -> (
    ClientId,
    mpsc::UnboundedReceiver<Message>,
    oneshot::Receiver<()>,
) {
    let id = Uuid::new_v4();
    let (outbound, outbound_rx) = mpsc::unbounded_channel();
    let (kick, kick_rx) = oneshot::channel();
    lock(table).entries.push(Connection { id, outbound, kick });
    (id, outbound_rx, kick_rx)
}

/// Tell an over-capacity client it was rejected, then close.
async fn reject(mut stream: TcpStream, remote: SocketAddr) {
    let frame = match protocol::encode(&Message::core(CoreVerb::ServerFull, Value::Null)) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::error!("Failed to encode rejection: {e}");
            return;
        }
    };
    if let Err(e) = connection::write_and_close(&mut stream, &frame, REJECT_LINGER).await {
        tracing::debug!(%remote, "Failed to notify rejected client: {e}");
    }
}

async fn serve_connection(
    stream: TcpStream,
    id: ClientId,
    outbound_rx: mpsc::UnboundedReceiver<Message>,
    kick: oneshot::Receiver<()>,
    mut shutdown: watch::Receiver<bool>,
    sink: EventSink,
    table: SharedTable,
) {
    let _ = stream.set_nodelay(true);
    let (reader, writer) = stream.into_split();
    let mut writer_task = tokio::spawn(connection::write_loop(
        writer,
        outbound_rx,
        sink.clone(),
        Some(id),
    ));

    let stop = async move {
        tokio::select! {
            () = connection::shutdown_requested(&mut shutdown) => {}
            _ = kick => {}
        }
    };
    let end = connection::read_loop(reader, &sink, Some(id), stop).await;

    // Dropping the table entry drops the outbound sender, ending the writer.
    lock(&table).remove(id);
    if tokio::time::timeout(WRITER_GRACE, &mut writer_task)
        .await
        .is_err()
    {
        writer_task.abort();
    }

    if let ReadEnd::Failed(e) = &end {
        tracing::warn!(client = %id, "Connection failed: {e}");
    }
    tracing::info!(client = %id, reason = %end.reason(), "Client disconnected");
    sink.message(
        EventLabel::Disconnected,
        Message::untagged(json!({ "reason": end.reason() })),
        Some(id),
    );
}
