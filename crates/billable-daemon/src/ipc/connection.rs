use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter, ReadHalf, WriteHalf};
use tokio::net::UnixStream;

use super::protocol::{Notification, Request, Response};

#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Connection closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, ConnectionError>;

/// Reads newline-delimited requests from a client.
pub struct RequestReader {
    reader: BufReader<ReadHalf<UnixStream>>,
}

/// Writes newline-delimited responses and notifications to a client.
pub struct MessageWriter {
    writer: BufWriter<WriteHalf<UnixStream>>,
}

/// Split a client stream into its reading and writing halves.
pub fn split(stream: UnixStream) -> (RequestReader, MessageWriter) {
    let (read_half, write_half) = tokio::io::split(stream);
    (
        RequestReader {
            reader: BufReader::new(read_half),
        },
        MessageWriter {
            writer: BufWriter::new(write_half),
        },
    )
}

impl RequestReader {
    /// Next request. Blank lines are skipped; EOF is `Closed`.
    pub async fn read_request(&mut self) -> Result<Request> {
        let mut line = String::new();
        loop {
            line.clear();
            let bytes_read = self.reader.read_line(&mut line).await?;

            if bytes_read == 0 {
                return Err(ConnectionError::Closed);
            }
            if !line.trim().is_empty() {
                break;
            }
        }

        let request: Request = serde_json::from_str(line.trim())?;
        Ok(request)
    }
}

impl MessageWriter {
    pub async fn write_response(&mut self, response: &Response) -> Result<()> {
        self.write_line(&serde_json::to_string(response)?).await
    }

    pub async fn write_notification(&mut self, notification: &Notification) -> Result<()> {
        self.write_line(&serde_json::to_string(notification)?).await
    }

    async fn write_line(&mut self, json: &str) -> Result<()> {
        self.writer.write_all(json.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::protocol::RequestId;
    use serde_json::json;
    use tempfile::TempDir;
    use tokio::net::UnixListener;

    #[tokio::test]
    async fn test_request_response_framing() {
        let temp_dir = TempDir::new().unwrap();
        let socket_path = temp_dir.path().join("test.sock");
        let listener = UnixListener::bind(&socket_path).unwrap();

        let client = tokio::spawn(async move {
            let stream = UnixStream::connect(socket_path).await.unwrap();
            let (read_half, mut write_half) = tokio::io::split(stream);
            write_half
                .write_all(b"\n{\"jsonrpc\":\"2.0\",\"method\":\"timer.list\",\"params\":null,\"id\":7}\n")
                .await
                .unwrap();

            let mut reader = BufReader::new(read_half);
            let mut line = String::new();
            reader.read_line(&mut line).await.unwrap();
            line
        });

        let (stream, _) = listener.accept().await.unwrap();
        let (mut reader, mut writer) = split(stream);

        let request = reader.read_request().await.unwrap();
        assert_eq!(request.method, "timer.list");
        assert_eq!(request.id, RequestId::Number(7));

        writer
            .write_response(&Response::success(json!([]), request.id))
            .await
            .unwrap();

        let line = client.await.unwrap();
        let response: Response = serde_json::from_str(line.trim()).unwrap();
        assert_eq!(response.result, Some(json!([])));
    }

    #[tokio::test]
    async fn test_eof_is_closed() {
        let temp_dir = TempDir::new().unwrap();
        let socket_path = temp_dir.path().join("test.sock");
        let listener = UnixListener::bind(&socket_path).unwrap();

        tokio::spawn(async move {
            let _stream = UnixStream::connect(socket_path).await.unwrap();
        });

        let (stream, _) = listener.accept().await.unwrap();
        let (mut reader, _writer) = split(stream);
        assert!(matches!(
            reader.read_request().await,
            Err(ConnectionError::Closed)
        ));
    }
}
