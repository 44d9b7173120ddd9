//! IPC server implementation.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{RwLock, broadcast, mpsc};
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};
use tracing::{debug, error, info, warn};

use crate::error::IpcResult;
use crate::events::{Event, EventType};
use crate::messages::{Method, Request, Response};

/// Longest accepted request line, in bytes.
const MAX_LINE_LENGTH: usize = 64 * 1024;

/// A request forwarded to the daemon's event loop.
#[derive(Debug)]
pub struct IncomingRequest {
    pub client_id: u64,
    pub request: Request,
    /// Where the daemon sends the response
    pub reply: mpsc::Sender<Response>,
}

/// IPC server that listens for client connections.
pub struct IpcServer {
    listener: UnixListener,
    socket_path: PathBuf,
    clients: Arc<RwLock<HashMap<u64, ClientHandle>>>,
    next_client_id: AtomicU64,
    event_tx: broadcast::Sender<Event>,
    request_tx: mpsc::Sender<IncomingRequest>,
}

struct ClientHandle {
    /// Empty means every event
    subscriptions: Vec<EventType>,
}

impl IpcServer {
    /// Create a new IPC server bound to the given socket path.
    ///
    /// # Errors
    /// Returns an error if the socket cannot be created.
    pub async fn bind(socket_path: &Path) -> IpcResult<(Self, mpsc::Receiver<IncomingRequest>)> {
        // Ensure parent directory exists
        if let Some(parent) = socket_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Remove stale socket file if it exists
        if socket_path.exists() {
            tokio::fs::remove_file(socket_path).await?;
        }

        let listener = UnixListener::bind(socket_path)?;
        info!(?socket_path, "IPC server listening");

        let (event_tx, _) = broadcast::channel(256);
        let (request_tx, request_rx) = mpsc::channel(64);

        Ok((
            Self {
                listener,
                socket_path: socket_path.to_path_buf(),
                clients: Arc::new(RwLock::new(HashMap::new())),
                next_client_id: AtomicU64::new(1),
                event_tx,
                request_tx,
            },
            request_rx,
        ))
    }

    /// Run the server, accepting connections.
    pub async fn run(&self) {
        loop {
            match self.listener.accept().await {
                Ok((stream, _)) => {
                    let client_id = self.next_client_id.fetch_add(1, Ordering::SeqCst);
                    info!(client_id, "Client connected");

                    let clients = Arc::clone(&self.clients);
                    let event_rx = self.event_tx.subscribe();
                    let request_tx = self.request_tx.clone();

                    tokio::spawn(async move {
                        if let Err(e) =
                            Self::handle_client(client_id, stream, clients, event_rx, request_tx)
                                .await
                        {
                            error!(client_id, error = %e, "Client error");
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "Accept error");
                }
            }
        }
    }

    /// Get a clone of the event sender for broadcasting from other tasks.
    pub fn event_sender(&self) -> broadcast::Sender<Event> {
        self.event_tx.clone()
    }

    /// Path the listener is bound to.
    #[must_use]
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Number of connected clients.
    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }

    async fn handle_client(
        client_id: u64,
        stream: UnixStream,
        clients: Arc<RwLock<HashMap<u64, ClientHandle>>>,
        mut event_rx: broadcast::Receiver<Event>,
        request_tx: mpsc::Sender<IncomingRequest>,
    ) -> IpcResult<()> {
        let (reader, writer) = stream.into_split();
        let mut lines = FramedRead::new(reader, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));
        let mut writer = FramedWrite::new(writer, LinesCodec::new());

        let (response_tx, mut response_rx) = mpsc::channel::<Response>(16);

        // Register client
        clients.write().await.insert(client_id, ClientHandle { subscriptions: Vec::new() });

        loop {
            tokio::select! {
                // Read request from client
                line = lines.next() => {
                    match line {
                        None => {
                            debug!(client_id, "Client disconnected");
                            break;
                        }
                        Some(Ok(line)) => {
                            let Ok(request) = serde_json::from_str::<Request>(&line) else {
                                warn!(client_id, "Invalid request format");
                                continue;
                            };
                            debug!(client_id, request_id = request.id, method = request.method.name(), "Received request");

                            if let Some(response) = Self::handle_subscription(client_id, &clients, &request).await {
                                let _ = response_tx.send(response).await;
                                continue;
                            }

                            let incoming = IncomingRequest { client_id, request, reply: response_tx.clone() };
                            if request_tx.send(incoming).await.is_err() {
                                warn!(client_id, "Daemon stopped accepting requests");
                                break;
                            }
                        }
                        Some(Err(e)) => {
                            error!(client_id, error = %e, "Read error");
                            break;
                        }
                    }
                }

                // Send response to client
                Some(response) = response_rx.recv() => {
                    let json = serde_json::to_string(&response)?;
                    if let Err(e) = writer.send(json).await {
                        error!(client_id, error = %e, "Write error");
                        break;
                    }
                }

                // Forward events to client
                Ok(event) = event_rx.recv() => {
                    let wanted = clients.read().await.get(&client_id).is_some_and(|handle| {
                        handle.subscriptions.is_empty() || handle.subscriptions.contains(&event.event)
                    });
                    if wanted {
                        let json = serde_json::to_string(&event)?;
                        if let Err(e) = writer.send(json).await {
                            error!(client_id, error = %e, "Event write error");
                            break;
                        }
                    }
                }
            }
        }

        // Unregister client
        clients.write().await.remove(&client_id);

        info!(client_id, "Client handler exiting");
        Ok(())
    }

    /// Apply subscription changes locally; these never reach the daemon.
    async fn handle_subscription(
        client_id: u64,
        clients: &RwLock<HashMap<u64, ClientHandle>>,
        request: &Request,
    ) -> Option<Response> {
        let mut clients = clients.write().await;
        let handle = clients.get_mut(&client_id)?;

        match &request.method {
            Method::Subscribe { events } => {
                for event in events {
                    if !handle.subscriptions.contains(event) {
                        handle.subscriptions.push(*event);
                    }
                }
                debug!(client_id, ?events, "Client subscribed to events");
            }
            Method::Unsubscribe { events } => {
                handle.subscriptions.retain(|e| !events.contains(e));
                debug!(client_id, ?events, "Client unsubscribed from events");
            }
            _ => return None,
        }

        Some(Response { id: request.id, result: Ok(json!({ "success": true })) })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use fprint_core::ObjectPath;

    use super::*;
    use crate::client::IpcClient;
    use crate::events::{DeviceAddedData, DeviceRemovedData};

    #[tokio::test]
    async fn test_subscription_filters_events() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("manager.sock");
        let (server, _request_rx) = IpcServer::bind(&socket).await.unwrap();
        let event_tx = server.event_sender();
        tokio::spawn(async move { server.run().await });

        let mut client = IpcClient::connect(&socket).await.unwrap();
        client.subscribe(vec![EventType::DeviceRemoved]).await.unwrap();

        let path = ObjectPath::new("/net/reactivated/Fprint/Device/0");
        let added = DeviceAddedData { path: path.clone(), name: "Sensor".into() };
        event_tx.send(Event::new(EventType::DeviceAdded, &added)).unwrap();
        event_tx.send(Event::new(EventType::DeviceRemoved, &DeviceRemovedData { path })).unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), client.events().recv()).await.unwrap().unwrap();
        assert_eq!(event.event, EventType::DeviceRemoved);
        assert_eq!(event.data["path"], json!("/net/reactivated/Fprint/Device/0"));
    }

    #[tokio::test]
    async fn test_bind_replaces_stale_socket() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("nested/manager.sock");

        let (first, _rx) = IpcServer::bind(&socket).await.unwrap();
        drop(first);
        let (second, _rx) = IpcServer::bind(&socket).await.unwrap();

        assert_eq!(second.socket_path(), socket.as_path());
        assert_eq!(second.client_count().await, 0);
    }
}
