use super::{no_request_in_flight, AnalyzerTransport};
use async_trait::async_trait;
use offload_proto::{
    framing::{read_response, write_request},
    with_timeout, Timeouts, TransportError, WireError,
};
use std::path::PathBuf;
use tokio::net::UnixStream;
use tracing::instrument;

/// Client side of the framed domain-socket protocol.
#[derive(Debug)]
pub struct UnixTransport {
    socket_path: PathBuf,
    timeouts: Timeouts,
    max_result_bytes: usize,
    stream: Option<UnixStream>,
}

impl UnixTransport {
    pub fn new(socket_path: PathBuf, timeouts: Timeouts, max_result_bytes: usize) -> Self {
        Self {
            socket_path,
            timeouts,
            max_result_bytes,
            stream: None,
        }
    }

    async fn connect(&self) -> Result<UnixStream, WireError> {
        let endpoint = self.endpoint();
        with_timeout(
            self.timeouts.connect,
            "connecting",
            async move {
                UnixStream::connect(&self.socket_path)
                    .await
                    .map_err(|source| TransportError::ConnectFailed { endpoint, source })
            },
        )
        .await
    }
}

#[async_trait]
impl AnalyzerTransport for UnixTransport {
    #[instrument(skip(self, payload), fields(bytes = payload.len()))]
    async fn transmit(&mut self, payload: &[u8]) -> Result<(), WireError> {
        self.stream = None;
        let mut stream = self.connect().await?;
        with_timeout(
            self.timeouts.write,
            "writing request",
            write_request(&mut stream, payload),
        )
        .await?;
        self.stream = Some(stream);
        Ok(())
    }

    async fn await_response(&mut self) -> Result<Vec<u8>, WireError> {
        let mut stream = self.stream.take().ok_or_else(no_request_in_flight)?;
        let result = with_timeout(
            self.timeouts.read,
            "reading response",
            read_response(&mut stream, self.max_result_bytes),
        )
        .await?;
        tracing::debug!("Received {} byte result from {}", result.len(), self.endpoint());
        Ok(result)
    }

    fn kind(&self) -> &'static str {
        "unix"
    }

    fn endpoint(&self) -> String {
        format!("unix:{}", self.socket_path.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use offload_proto::{
        framing::{read_request, write_response},
        ProtocolError,
    };
    use std::time::Duration;
    use tokio::net::UnixListener;

    fn socket_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("fp-unix-{}-{}.socket", name, std::process::id()))
    }

    fn listen(path: &PathBuf) -> UnixListener {
        let _ = std::fs::remove_file(path);
        UnixListener::bind(path).unwrap()
    }

    #[tokio::test]
    async fn test_round_trip_against_echo_server() {
        let path = socket_path("echo");
        let listener = listen(&path);
        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let payload = read_request(&mut stream, 1024).await.unwrap();
            let answer = format!("{{\"bytes\":{}}}", payload.len());
            write_response(&mut stream, answer.as_bytes()).await.unwrap();
        });

        let mut transport = UnixTransport::new(path.clone(), Timeouts::default(), 1024);
        transport.transmit(b"frame-bytes").await.unwrap();
        let result = transport.await_response().await.unwrap();

        assert_eq!(result, br#"{"bytes":11}"#);
        server.await.unwrap();
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_missing_socket_is_connect_failure() {
        let path = socket_path("missing");
        let _ = std::fs::remove_file(&path);

        let mut transport = UnixTransport::new(path, Timeouts::default(), 1024);
        let err = transport.transmit(b"frame").await.unwrap_err();

        assert!(matches!(
            err,
            WireError::Transport(TransportError::ConnectFailed { .. })
        ));
    }

    #[tokio::test]
    async fn test_silent_server_times_out() {
        let path = socket_path("silent");
        let listener = listen(&path);
        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let _ = read_request(&mut stream, 1024).await;
            tokio::time::sleep(Duration::from_millis(300)).await;
        });

        let timeouts = Timeouts::from_millis(500, 50, 500);
        let mut transport = UnixTransport::new(path.clone(), timeouts, 1024);
        transport.transmit(b"frame").await.unwrap();
        let err = transport.await_response().await.unwrap_err();

        assert!(matches!(
            err,
            WireError::Transport(TransportError::Timeout {
                stage: "reading response",
                ..
            })
        ));
        server.await.unwrap();
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_oversized_result_rejected() {
        let path = socket_path("oversized");
        let listener = listen(&path);
        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let _ = read_request(&mut stream, 1024).await;
            let _ = write_response(&mut stream, &[b'x'; 64]).await;
        });

        let mut transport = UnixTransport::new(path.clone(), Timeouts::default(), 16);
        transport.transmit(b"frame").await.unwrap();
        let err = transport.await_response().await.unwrap_err();

        assert!(matches!(
            err,
            WireError::Protocol(ProtocolError::MalformedLength(_))
        ));
        server.await.unwrap();
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_await_without_transmit_fails() {
        let mut transport = UnixTransport::new(socket_path("idle"), Timeouts::default(), 16);
        assert!(transport.await_response().await.is_err());
    }
}
