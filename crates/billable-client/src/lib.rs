//! Billable Client Library
//!
//! Talks to the billable daemon over its Unix socket.

use anyhow::Result;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter, WriteHalf};
use tokio::net::UnixStream;
use tokio::sync::{mpsc, oneshot, Mutex};

pub use billable_core::rpc::{Message, Notification, Request, RequestId, Response, RpcError};

type Pending = Arc<Mutex<HashMap<i64, oneshot::Sender<Response>>>>;

/// Persistent connection state
struct PersistentConnection {
    writer: Mutex<BufWriter<WriteHalf<UnixStream>>>,
    pending: Pending,
}

/// Billable daemon client
pub struct BillableClient {
    socket_path: String,
    request_counter: AtomicI64,
    persistent_conn: Mutex<Option<Arc<PersistentConnection>>>,
}

impl BillableClient {
    pub fn new(socket_path: impl Into<String>) -> Self {
        Self {
            socket_path: socket_path.into(),
            request_counter: AtomicI64::new(1),
            persistent_conn: Mutex::new(None),
        }
    }

    pub fn socket_path(&self) -> &str {
        &self.socket_path
    }

    /// Open a persistent connection and receive daemon notifications on it.
    /// Later calls go over the same connection.
    pub async fn subscribe_notifications(&self) -> Result<mpsc::Receiver<Notification>> {
        let mut conn_lock = self.persistent_conn.lock().await;

        if conn_lock.is_some() {
            anyhow::bail!("Already subscribed to notifications");
        }

        let stream = self.connect().await?;
        let (read_half, write_half) = tokio::io::split(stream);

        let (notif_tx, notif_rx) = mpsc::channel::<Notification>(100);
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));

        let pending_clone = pending.clone();
        tokio::spawn(async move {
            let mut reader = BufReader::new(read_half);
            let mut line = String::new();

            loop {
                line.clear();
                match reader.read_line(&mut line).await {
                    Ok(0) | Err(_) => break,
                    Ok(_) => match Message::parse(&line) {
                        Some(Message::Notification(notification)) => {
                            let _ = notif_tx.send(notification).await;
                        }
                        Some(Message::Response(response)) => {
                            if let RequestId::Number(id) = response.id {
                                if let Some(tx) = pending_clone.lock().await.remove(&id) {
                                    let _ = tx.send(response);
                                }
                            }
                        }
                        None => {}
                    },
                }
            }

            // Wake callers still waiting on a closed connection
            pending_clone.lock().await.clear();
        });

        *conn_lock = Some(Arc::new(PersistentConnection {
            writer: Mutex::new(BufWriter::new(write_half)),
            pending,
        }));

        Ok(notif_rx)
    }

    /// Send a request and wait for its result.
    ///
    /// Uses the persistent connection when one is open, otherwise a one-shot
    /// connection. A JSON-RPC error comes back as an [`RpcError`].
    pub async fn call(&self, method: impl Into<String>, params: Option<Value>) -> Result<Value> {
        let conn = self.persistent_conn.lock().await.clone();
        match conn {
            Some(conn) => self.call_persistent(&conn, method, params).await,
            None => self.call_oneshot(method, params).await,
        }
    }

    async fn call_persistent(
        &self,
        conn: &PersistentConnection,
        method: impl Into<String>,
        params: Option<Value>,
    ) -> Result<Value> {
        let id = self.next_id();
        let request = Request::new(method, params, RequestId::Number(id));

        let (tx, rx) = oneshot::channel();
        conn.pending.lock().await.insert(id, tx);

        {
            let mut writer = conn.writer.lock().await;
            let request_json = serde_json::to_string(&request)?;
            writer.write_all(request_json.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await?;
        }

        let response = rx
            .await
            .map_err(|_| anyhow::anyhow!("Connection closed before a response arrived"))?;
        Ok(response.into_result()?)
    }

    async fn call_oneshot(&self, method: impl Into<String>, params: Option<Value>) -> Result<Value> {
        let mut stream = self.connect().await?;
        let request = Request::new(method, params, RequestId::Number(self.next_id()));

        let request_json = serde_json::to_string(&request)?;
        stream.write_all(request_json.as_bytes()).await?;
        stream.write_all(b"\n").await?;
        stream.flush().await?;

        // Skip notifications broadcast before our response
        let mut reader = BufReader::new(stream);
        let mut line = String::new();
        loop {
            line.clear();
            if reader.read_line(&mut line).await? == 0 {
                anyhow::bail!("Daemon closed the connection");
            }
            if let Some(Message::Response(response)) = Message::parse(&line) {
                return Ok(response.into_result()?);
            }
        }
    }

    async fn connect(&self) -> Result<UnixStream> {
        UnixStream::connect(&self.socket_path).await.map_err(|e| {
            anyhow::anyhow!(
                "Cannot reach daemon at {}: {} (is billabled running?)",
                self.socket_path,
                e
            )
        })
    }

    fn next_id(&self) -> i64 {
        self.request_counter.fetch_add(1, Ordering::SeqCst)
    }

    // Timer methods

    /// Start (or resume) a task's timer
    pub async fn timer_start(&self, task_id: &str, project_id: &str) -> Result<Value> {
        self.call(
            "timer.start",
            Some(json!({
                "task_id": task_id,
                "project_id": project_id,
            })),
        )
        .await
    }

    pub async fn timer_pause(&self, task_id: &str) -> Result<Value> {
        self.call("timer.pause", Some(json!({ "task_id": task_id })))
            .await
    }

    pub async fn timer_resume(&self, task_id: &str) -> Result<Value> {
        self.call("timer.resume", Some(json!({ "task_id": task_id })))
            .await
    }

    pub async fn timer_stop(&self, task_id: &str) -> Result<Value> {
        self.call("timer.stop", Some(json!({ "task_id": task_id })))
            .await
    }

    pub async fn timer_reset(&self, task_id: &str) -> Result<Value> {
        self.call("timer.reset", Some(json!({ "task_id": task_id })))
            .await
    }

    pub async fn timer_get(&self, task_id: &str, project_id: Option<&str>) -> Result<Value> {
        self.call(
            "timer.get",
            Some(json!({
                "task_id": task_id,
                "project_id": project_id,
            })),
        )
        .await
    }

    pub async fn timer_list(&self) -> Result<Value> {
        self.call("timer.list", None).await
    }

    // Session methods

    pub async fn session_get(&self) -> Result<Value> {
        self.call("session.get", None).await
    }

    pub async fn session_stats(&self, refresh: bool) -> Result<Value> {
        self.call("session.stats", Some(json!({ "refresh": refresh })))
            .await
    }

    // Sync methods

    pub async fn sync_status(&self) -> Result<Value> {
        self.call("sync.status", None).await
    }

    pub async fn sync_heartbeat(&self) -> Result<Value> {
        self.call("sync.heartbeat", None).await
    }

    // Account methods

    pub async fn sign_out(&self) -> Result<Value> {
        self.call("account.sign_out", None).await
    }

    // Config methods

    pub async fn config_get(&self) -> Result<Value> {
        self.call("config.get", None).await
    }

    pub async fn config_update_sync(&self, update: Value) -> Result<Value> {
        self.call("config.update_sync", Some(update)).await
    }

    pub async fn config_update_remote(&self, update: Value) -> Result<Value> {
        self.call("config.update_remote", Some(update)).await
    }

    pub async fn config_reset(&self) -> Result<Value> {
        self.call("config.reset", None).await
    }
}
