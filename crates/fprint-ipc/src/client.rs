//! IPC client implementation.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use fprint_core::{DeviceProperties, ObjectPath, StateSnapshot, register_error_domain};
use futures::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::net::UnixStream;
use tokio::net::unix::OwnedWriteHalf;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};
use tracing::{debug, error, warn};

use crate::error::{IpcError, IpcResult};
use crate::events::{Event, EventType};
use crate::messages::{Method, Request, Response};

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<Response>>>>;

/// IPC client for connecting to the fprint daemon.
pub struct IpcClient {
    writer: Mutex<FramedWrite<OwnedWriteHalf, LinesCodec>>,
    next_id: AtomicU64,
    pending: PendingMap,
    /// Set once the reader task has stopped
    closed: Arc<AtomicBool>,
    event_rx: mpsc::Receiver<Event>,
}

impl IpcClient {
    /// Connect to the daemon at the given socket path.
    ///
    /// # Errors
    /// Returns an error if the connection fails.
    pub async fn connect(socket_path: &Path) -> IpcResult<Self> {
        // Needed to map remote error names back to kinds.
        register_error_domain();

        let stream = UnixStream::connect(socket_path).await?;
        let (reader, writer) = stream.into_split();

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let (event_tx, event_rx) = mpsc::channel(64);

        let closed = Arc::new(AtomicBool::new(false));

        // Spawn reader task
        let pending_clone = Arc::clone(&pending);
        let closed_clone = Arc::clone(&closed);
        tokio::spawn(async move {
            let mut lines = FramedRead::new(reader, LinesCodec::new());

            loop {
                match lines.next().await {
                    None => {
                        debug!("Connection closed");
                        break;
                    }
                    Some(Ok(line)) => {
                        // Try to parse as response first
                        if let Ok(response) = serde_json::from_str::<Response>(&line) {
                            let mut pending = pending_clone.lock().await;
                            if let Some(tx) = pending.remove(&response.id) {
                                let _ = tx.send(response);
                            }
                        }
                        // Try to parse as event
                        else if let Ok(event) = serde_json::from_str::<Event>(&line) {
                            let _ = event_tx.send(event).await;
                        } else {
                            warn!("Unknown message format");
                        }
                    }
                    Some(Err(e)) => {
                        error!(error = %e, "Read error");
                        break;
                    }
                }
            }

            // Fail outstanding and later requests instead of leaving them hanging.
            let mut pending = pending_clone.lock().await;
            closed_clone.store(true, Ordering::SeqCst);
            pending.clear();
        });

        Ok(Self {
            writer: Mutex::new(FramedWrite::new(writer, LinesCodec::new())),
            next_id: AtomicU64::new(1),
            pending,
            closed,
            event_rx,
        })
    }

    /// Connect to the daemon at the default socket path.
    ///
    /// # Errors
    /// Returns an error if the connection fails.
    pub async fn connect_default() -> IpcResult<Self> {
        Self::connect(&crate::socket_path()).await
    }

    /// Send a request and wait for a response.
    ///
    /// # Errors
    /// Returns an error if the request fails to send or the connection closes.
    pub async fn request(&self, path: ObjectPath, method: Method) -> IpcResult<Response> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = Request { id, path, method };

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            if self.is_closed() {
                return Err(IpcError::ConnectionClosed);
            }
            pending.insert(id, tx);
        }

        let json = serde_json::to_string(&request)?;
        self.writer.lock().await.send(json).await?;

        rx.await.map_err(|_| IpcError::ConnectionClosed)
    }

    /// Whether the daemon has closed the connection.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Send a request and decode a successful result.
    ///
    /// # Errors
    /// Remote failures are returned as [`IpcError::Remote`].
    pub async fn call_method<T: DeserializeOwned>(&self, path: ObjectPath, method: Method) -> IpcResult<T> {
        let response = self.request(path, method).await?;
        match response.result {
            Ok(value) => Ok(serde_json::from_value(value)?),
            Err(info) => Err(IpcError::Remote { name: info.name, message: info.message }),
        }
    }

    /// Paths of all devices, oldest first.
    ///
    /// # Errors
    /// Returns an error if the request fails.
    pub async fn get_devices(&self) -> IpcResult<Vec<ObjectPath>> {
        self.call_method(ObjectPath::manager(), Method::GetDevices).await
    }

    /// Path of the default device.
    ///
    /// # Errors
    /// Returns a remote `NoSuchDevice` error when no device is present.
    pub async fn get_default_device(&self) -> IpcResult<ObjectPath> {
        self.call_method(ObjectPath::manager(), Method::GetDefaultDevice).await
    }

    /// Diagnostic snapshot of the manager.
    ///
    /// # Errors
    /// Returns an error if the request fails.
    pub async fn get_state(&self) -> IpcResult<StateSnapshot> {
        self.call_method(ObjectPath::manager(), Method::GetState).await
    }

    /// Properties of the device at `path`.
    ///
    /// # Errors
    /// Returns an error if the object does not exist.
    pub async fn properties(&self, path: &ObjectPath) -> IpcResult<DeviceProperties> {
        self.call_method(path.clone(), Method::GetProperties).await
    }

    /// Invoke a device member.
    ///
    /// # Errors
    /// Device errors are returned as [`IpcError::Remote`].
    pub async fn call(&self, path: &ObjectPath, member: &str, args: Value) -> IpcResult<Value> {
        self.call_method(path.clone(), Method::Call { member: member.to_string(), args }).await
    }

    /// Only receive the given event types.
    ///
    /// # Errors
    /// Returns an error if the request fails.
    pub async fn subscribe(&self, events: Vec<EventType>) -> IpcResult<()> {
        let _: Value = self.call_method(ObjectPath::manager(), Method::Subscribe { events }).await?;
        Ok(())
    }

    /// Get the event receiver for incoming events.
    pub fn events(&mut self) -> &mut mpsc::Receiver<Event> {
        &mut self.event_rx
    }
}
