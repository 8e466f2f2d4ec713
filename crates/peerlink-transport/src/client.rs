//! TCP client endpoint.

use std::time::Duration;

use peerlink_core::{
    ClientId, EventLabel, EventSink, Message, NetworkEndpoint, SessionParams, TransportError,
};
use serde_json::json;
use tokio::{
    net::TcpStream,
    runtime::Runtime,
    sync::{mpsc, watch},
    task::JoinHandle,
};
use uuid::Uuid;

use crate::{
    connection::{self, ReadEnd},
    server::CLOSE_GRACE,
};

/// Connects to one server and exchanges messages with it.
///
/// Messages sent before the connection is up are queued and written once
/// it is.
pub struct TcpClient {
    identity: Uuid,
    sink: EventSink,
    runtime: Option<Runtime>,
    shutdown: watch::Sender<bool>,
    outbound: mpsc::UnboundedSender<Message>,
    task: Option<JoinHandle<()>>,
}

impl TcpClient {
    /// Start connecting in the background.
    ///
    /// The outcome arrives later as `InitSuccess` + `Connected`, or `InitFailure`.
    ///
    /// # Errors
    /// Returns error if the background runtime cannot be created.
    pub fn open(params: &SessionParams, sink: EventSink) -> Result<Self, TransportError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("peerlink-client")
            .enable_all()
            .build()?;

        let (shutdown, shutdown_rx) = watch::channel(false);
        let (outbound, outbound_rx) = mpsc::unbounded_channel();

        let task = runtime.spawn(run(
            params.address(),
            params.connect_timeout(),
            outbound_rx,
            sink.clone(),
            shutdown_rx,
        ));

        Ok(Self {
            identity: Uuid::new_v4(),
            sink,
            runtime: Some(runtime),
            shutdown,
            outbound,
            task: Some(task),
        })
    }
}

impl NetworkEndpoint for TcpClient {
    fn identity(&self) -> Uuid {
        self.identity
    }

    fn send(&mut self, message: Message) {
        if let Err(mpsc::error::SendError(message)) = self.outbound.send(message) {
            self.sink.send_failed(message, None, "connection closed");
        }
    }

    fn send_to(&mut self, _client: ClientId, message: Message) {
        self.send(message);
    }

    fn disconnect(&mut self, _client: ClientId) {}

    fn clients(&self) -> Vec<ClientId> {
        Vec::new()
    }

    fn close(&mut self) {
        let Some(runtime) = self.runtime.take() else {
            return;
        };
        self.shutdown.send_replace(true);

        if let Some(task) = self.task.take() {
            runtime.block_on(async {
                if tokio::time::timeout(CLOSE_GRACE, task).await.is_err() {
                    tracing::warn!("Client task did not stop in time");
                }
            });
        }
        runtime.shutdown_timeout(CLOSE_GRACE);
        tracing::info!(identity = %self.identity, "Client closed");
    }
}

impl Drop for TcpClient {
    fn drop(&mut self) {
        self.close();
    }
}

async fn run(
    address: String,
    connect_timeout: Duration,
    outbound_rx: mpsc::UnboundedReceiver<Message>,
    sink: EventSink,
    mut shutdown: watch::Receiver<bool>,
) {
    let connect = tokio::time::timeout(connect_timeout, TcpStream::connect(&address));
    let stream = tokio::select! {
        () = connection::shutdown_requested(&mut shutdown) => return,
        connected = connect => match connected {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                tracing::warn!(%address, "Connect failed: {e}");
                sink.signal(
                    EventLabel::InitFailure,
                    json!({ "address": address, "error": e.to_string() }),
                );
                return;
            }
            Err(_) => {
                tracing::warn!(%address, ?connect_timeout, "Connect timed out");
                sink.signal(
                    EventLabel::InitFailure,
                    json!({ "address": address, "error": "connect timed out" }),
                );
                return;
            }
        },
    };

    let _ = stream.set_nodelay(true);
    tracing::info!(%address, "Connected to server");
    sink.signal(EventLabel::InitSuccess, json!({ "address": address }));
    sink.signal(EventLabel::Connected, json!({ "address": address }));

    let (reader, writer) = stream.into_split();
    let writer_task = tokio::spawn(connection::write_loop(
        writer,
        outbound_rx,
        sink.clone(),
        None,
    ));

    let stop = async move { connection::shutdown_requested(&mut shutdown).await };
    let end = connection::read_loop(reader, &sink, None, stop).await;

    // The endpoint keeps the outbound sender alive, so the writer has to be stopped here.
    writer_task.abort();
    let _ = writer_task.await;

    if let ReadEnd::Failed(e) = &end {
        tracing::warn!(%address, "Connection failed: {e}");
    }
    sink.signal(
        EventLabel::Closed,
        json!({ "address": address, "reason": end.reason() }),
    );
}
