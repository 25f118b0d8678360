use std::path::Path;
use std::sync::Arc;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use super::connection::{self, ConnectionError, RequestReader};
use super::protocol::{self, Notification, Request, Response};
use crate::api::ApiHandler;
use crate::events::DaemonEvent;

#[derive(Debug, thiserror::Error)]
pub enum IpcServerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),
}

pub type Result<T> = std::result::Result<T, IpcServerError>;

/// What the reader half of a connection produced.
enum Incoming {
    Request(Request),
    Malformed(String),
}

pub struct IpcServer {
    socket_path: String,
    api_handler: Arc<ApiHandler>,
}

impl IpcServer {
    pub fn new(socket_path: String, api_handler: Arc<ApiHandler>) -> Self {
        Self {
            socket_path,
            api_handler,
        }
    }

    pub fn socket_path(&self) -> &str {
        &self.socket_path
    }

    /// Accept clients until `shutdown` is cancelled, then remove the socket.
    pub async fn start(self: Arc<Self>, shutdown: CancellationToken) -> Result<()> {
        let path = Path::new(&self.socket_path);
        if path.exists() {
            std::fs::remove_file(path)?;
        }

        let listener = UnixListener::bind(&self.socket_path)?;
        tracing::info!("IPC server listening on {}", self.socket_path);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, _addr)) => {
                        let server = self.clone();
                        let token = shutdown.child_token();
                        tokio::spawn(async move {
                            if let Err(e) = server.handle_connection(stream, token).await {
                                tracing::error!("Connection error: {}", e);
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!("Failed to accept connection: {}", e);
                    }
                },
            }
        }

        if let Err(e) = std::fs::remove_file(&self.socket_path) {
            tracing::warn!("Failed to remove socket {}: {}", self.socket_path, e);
        }
        tracing::info!("IPC server stopped");
        Ok(())
    }

    async fn handle_connection(&self, stream: UnixStream, token: CancellationToken) -> Result<()> {
        tracing::debug!("New client connected");

        let (reader, mut writer) = connection::split(stream);

        let (request_tx, mut request_rx) = mpsc::channel::<Incoming>(32);
        let reader_task = tokio::spawn(read_requests(reader, request_tx));

        let (notif_tx, mut notif_rx) = mpsc::channel::<Notification>(100);
        let forwarder =
            tokio::spawn(forward_events(self.api_handler.subscribe_events(), notif_tx));

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                incoming = request_rx.recv() => {
                    let response = match incoming {
                        Some(Incoming::Request(request)) => {
                            tracing::debug!("Received request: {}", request.method);
                            self.handle_request(request).await
                        }
                        Some(Incoming::Malformed(message)) => protocol::malformed(message),
                        None => {
                            tracing::debug!("Client disconnected");
                            break;
                        }
                    };
                    if let Err(e) = writer.write_response(&response).await {
                        tracing::error!("Failed to write response: {}", e);
                        break;
                    }
                }
                Some(notification) = notif_rx.recv() => {
                    if let Err(e) = writer.write_notification(&notification).await {
                        tracing::warn!("Failed to send notification: {}", e);
                        break;
                    }
                }
            }
        }

        reader_task.abort();
        forwarder.abort();
        Ok(())
    }

    async fn handle_request(&self, request: Request) -> Response {
        if let Err(error) = request.validate() {
            return Response::error(error, request.id);
        }

        let outcome = self
            .api_handler
            .handle(&request.method, request.params)
            .await;
        if let Err(ref error) = outcome {
            tracing::debug!("Request {} failed: {}", request.method, error);
        }
        protocol::reply(request.id, outcome)
    }
}

async fn read_requests(mut reader: RequestReader, tx: mpsc::Sender<Incoming>) {
    loop {
        let incoming = match reader.read_request().await {
            Ok(request) => Incoming::Request(request),
            Err(ConnectionError::Json(e)) => Incoming::Malformed(format!("Parse error: {}", e)),
            Err(ConnectionError::Closed) => break,
            Err(e) => {
                tracing::warn!("Failed to read request: {}", e);
                break;
            }
        };

        if tx.send(incoming).await.is_err() {
            break;
        }
    }
}

/// Forward daemon events to one client as notifications.
async fn forward_events(mut event_rx: broadcast::Receiver<DaemonEvent>, tx: mpsc::Sender<Notification>) {
    loop {
        let event = match event_rx.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!("Client lagging, dropped {} events", skipped);
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };

        let (method, params) = match &event {
            DaemonEvent::Timer(e) => ("timer.event", serde_json::to_value(e)),
            DaemonEvent::Session(e) => ("session.event", serde_json::to_value(e)),
            DaemonEvent::Sync(e) => ("sync.event", serde_json::to_value(e)),
        };

        let notification = Notification::new(method, params.unwrap_or(serde_json::Value::Null));

        if tx.send(notification).await.is_err() {
            tracing::debug!("Event forwarder stopping, client disconnected");
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::tests::test_api;
    use crate::ipc::protocol::RequestId;
    use serde_json::json;

    #[tokio::test]
    async fn test_handle_request_maps_errors() {
        let api = test_api();
        let server = IpcServer::new("/tmp/unused.sock".to_string(), Arc::new(api.handler));

        let response = server
            .handle_request(Request::new(
                "timer.stop",
                Some(json!({"task_id": "task-a"})),
                RequestId::Number(1),
            ))
            .await;
        let error = response.error.unwrap();
        assert_eq!(error.code, -32000);
        assert_eq!(error.message, "Cannot stop timer for this task");

        let response = server
            .handle_request(Request::new("nope", None, RequestId::Number(2)))
            .await;
        assert_eq!(response.error.unwrap().code, -32601);
    }

    #[tokio::test]
    async fn test_rejects_wrong_version() {
        let api = test_api();
        let server = IpcServer::new("/tmp/unused.sock".to_string(), Arc::new(api.handler));

        let mut request = Request::new("timer.list", None, RequestId::Number(3));
        request.jsonrpc = "1.0".to_string();

        let response = server.handle_request(request).await;
        assert_eq!(response.error.unwrap().code, -32600);
    }
}
