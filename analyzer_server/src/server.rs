use crate::{
    analyzer::{Analyzer, AnalyzerError},
    config::Config,
    stats_analyzer::FrameStatsAnalyzer,
};
use offload_proto::{framing, with_timeout, WireError};
use std::{
    future::Future,
    io,
    path::{Path, PathBuf},
    time::Duration,
};
use tokio::{
    io::AsyncWriteExt,
    net::{UnixListener, UnixStream},
    signal,
};
use tracing::instrument;

const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub socket_path: PathBuf,
    pub max_payload: usize,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
}

impl From<&Config> for ServerSettings {
    fn from(config: &Config) -> Self {
        Self {
            socket_path: config.server.socket_path.clone(),
            max_payload: config.frame.max_payload(),
            read_timeout: config.server.read_timeout(),
            write_timeout: config.server.write_timeout(),
        }
    }
}

/// Accepts framed requests on a Unix socket and runs them through a single
/// analyzer, one connection at a time.
///
/// Serving is strictly sequential: a connection is read, analyzed, answered
/// and closed before the next one is accepted. Concurrent producers queue in
/// the listen backlog, so a slow analyzer throttles all of them.
pub struct FramedServer<A: Analyzer> {
    listener: UnixListener,
    analyzer: A,
    settings: ServerSettings,
    served: u64,
}

impl<A: Analyzer> FramedServer<A> {
    /// Binds the socket, replacing whatever a previous instance left behind.
    pub fn bind(analyzer: A, settings: ServerSettings) -> io::Result<Self> {
        remove_socket_file(&settings.socket_path)?;
        let listener = UnixListener::bind(&settings.socket_path)?;

        Ok(Self {
            listener,
            analyzer,
            settings,
            served: 0,
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.settings.socket_path
    }

    pub async fn run(mut self, shutdown: impl Future<Output = ()>) -> io::Result<()> {
        tracing::info!(
            "Analyzer server listening on {} (max payload {} bytes)",
            self.settings.socket_path.display(),
            self.settings.max_payload
        );
        tokio::pin!(shutdown);

        loop {
            let stream = tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, _)) => stream,
                    Err(e) => {
                        tracing::error!("Failed to accept connection: {:?}", e);
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                        continue;
                    }
                },
                _ = &mut shutdown => {
                    tracing::info!("Shutdown signal received, stopping accept loop");
                    break;
                }
            };

            match self.serve_connection(stream).await {
                Ok(()) => self.served += 1,
                Err(e) => tracing::warn!("Dropping connection: {}", e),
            }
        }

        remove_socket_file(&self.settings.socket_path)?;
        tracing::info!("Analyzer server stopped after {} requests", self.served);
        Ok(())
    }

    #[instrument(skip(self, stream))]
    async fn serve_connection(&mut self, mut stream: UnixStream) -> Result<(), WireError> {
        let payload = with_timeout(
            self.settings.read_timeout,
            "reading request",
            framing::read_request(&mut stream, self.settings.max_payload),
        )
        .await?;
        tracing::debug!("Received {} byte payload", payload.len());

        let result = match self.analyzer.analyze(&payload) {
            Ok(result) => result,
            Err(e) => {
                tracing::error!("Analyzer failed: {}", e);
                error_document(&e)
            }
        };

        with_timeout(
            self.settings.write_timeout,
            "writing response",
            framing::write_response(&mut stream, result.as_bytes()),
        )
        .await?;

        if let Err(e) = stream.shutdown().await {
            tracing::debug!("Peer gone before shutdown: {}", e);
        }
        Ok(())
    }
}

fn error_document(err: &AnalyzerError) -> String {
    serde_json::json!({ "error": err.to_string() }).to_string()
}

fn remove_socket_file(path: &Path) -> io::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            tracing::info!("Removed socket file {}", path.display());
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

pub async fn start_server(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let analyzer = FrameStatsAnalyzer::new(&config.frame);
    let server = FramedServer::bind(analyzer, ServerSettings::from(&config))?;

    server.run(shutdown_signal()).await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;
    use tokio::{io::AsyncReadExt, sync::oneshot, task::JoinHandle};

    static SOCKET_COUNTER: AtomicUsize = AtomicUsize::new(0);

    fn socket_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "analyzer-{}-{}-{}.sock",
            name,
            std::process::id(),
            SOCKET_COUNTER.fetch_add(1, Ordering::SeqCst)
        ))
    }

    fn settings(path: PathBuf) -> ServerSettings {
        ServerSettings {
            socket_path: path,
            max_payload: 1024,
            read_timeout: Duration::from_millis(200),
            write_timeout: Duration::from_millis(200),
        }
    }

    struct EchoAnalyzer {
        delay: Duration,
    }

    impl Analyzer for EchoAnalyzer {
        fn analyze(&mut self, payload: &[u8]) -> Result<String, AnalyzerError> {
            std::thread::sleep(self.delay);
            Ok(format!("echo:{}", String::from_utf8_lossy(payload)))
        }
    }

    struct FailingAnalyzer;

    impl Analyzer for FailingAnalyzer {
        fn analyze(&mut self, _payload: &[u8]) -> Result<String, AnalyzerError> {
            Err(AnalyzerError::Failed("model unavailable".to_string()))
        }
    }

    fn spawn_server<A: Analyzer>(
        analyzer: A,
        settings: ServerSettings,
    ) -> (oneshot::Sender<()>, JoinHandle<io::Result<()>>) {
        let server = FramedServer::bind(analyzer, settings).unwrap();
        let (tx, rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(server.run(async move {
            rx.await.ok();
        }));
        (tx, handle)
    }

    async fn request(path: &Path, payload: &[u8]) -> Result<String, WireError> {
        let mut stream = UnixStream::connect(path).await?;
        framing::write_request(&mut stream, payload).await?;
        let result = framing::read_response(&mut stream, 4096).await?;
        Ok(String::from_utf8(result).unwrap())
    }

    async fn assert_closed_without_reply(stream: &mut UnixStream) {
        let mut buf = [0u8; 16];
        let read = tokio::time::timeout(Duration::from_secs(2), stream.read(&mut buf))
            .await
            .expect("server must not block on a rejected connection");
        assert_eq!(read.unwrap_or(0), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_round_trip() {
        let path = socket_path("round-trip");
        let (tx, handle) = spawn_server(
            EchoAnalyzer {
                delay: Duration::ZERO,
            },
            settings(path.clone()),
        );

        let result = request(&path, b"frame-1").await.unwrap();
        assert_eq!(result, "echo:frame-1");

        tx.send(()).unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_oversized_and_zero_lengths_rejected() {
        let path = socket_path("bounds");
        let (tx, handle) = spawn_server(
            EchoAnalyzer {
                delay: Duration::ZERO,
            },
            settings(path.clone()),
        );

        let mut oversized = UnixStream::connect(&path).await.unwrap();
        oversized.write_all(&1025u32.to_le_bytes()).await.unwrap();
        assert_closed_without_reply(&mut oversized).await;

        let mut zero = UnixStream::connect(&path).await.unwrap();
        zero.write_all(&0u32.to_le_bytes()).await.unwrap();
        assert_closed_without_reply(&mut zero).await;

        let result = request(&path, b"still serving").await.unwrap();
        assert_eq!(result, "echo:still serving");

        tx.send(()).unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_short_read_only_drops_that_connection() {
        let path = socket_path("short-read");
        let (tx, handle) = spawn_server(
            EchoAnalyzer {
                delay: Duration::ZERO,
            },
            settings(path.clone()),
        );

        let mut truncated = UnixStream::connect(&path).await.unwrap();
        truncated.write_all(&10u32.to_le_bytes()).await.unwrap();
        truncated.write_all(b"abc").await.unwrap();
        truncated.shutdown().await.unwrap();
        assert_closed_without_reply(&mut truncated).await;

        let result = request(&path, b"next").await.unwrap();
        assert_eq!(result, "echo:next");

        tx.send(()).unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stalled_client_times_out() {
        let path = socket_path("stalled");
        let (tx, handle) = spawn_server(
            EchoAnalyzer {
                delay: Duration::ZERO,
            },
            settings(path.clone()),
        );

        let _silent = UnixStream::connect(&path).await.unwrap();
        let started = Instant::now();
        let result = request(&path, b"patient").await.unwrap();

        assert_eq!(result, "echo:patient");
        assert!(started.elapsed() >= Duration::from_millis(150));

        tx.send(()).unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_clients_are_served_one_at_a_time() {
        let path = socket_path("serial");
        let service_time = Duration::from_millis(50);
        let clients = 4;
        let (tx, handle) = spawn_server(
            EchoAnalyzer {
                delay: service_time,
            },
            settings(path.clone()),
        );

        let started = Instant::now();
        let requests: Vec<_> = (0..clients)
            .map(|i| {
                let path = path.clone();
                tokio::spawn(async move {
                    let payload = format!("client-{}", i);
                    let result = request(&path, payload.as_bytes()).await.unwrap();
                    (payload, result)
                })
            })
            .collect();

        for task in requests {
            let (payload, result) = task.await.unwrap();
            assert_eq!(result, format!("echo:{}", payload));
        }
        assert!(started.elapsed() >= service_time * clients);

        tx.send(()).unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stale_socket_path_replaced_and_removed_on_shutdown() {
        let path = socket_path("stale");
        std::fs::write(&path, b"left over").unwrap();

        let (tx, handle) = spawn_server(
            EchoAnalyzer {
                delay: Duration::ZERO,
            },
            settings(path.clone()),
        );
        assert_eq!(request(&path, b"fresh").await.unwrap(), "echo:fresh");

        tx.send(()).unwrap();
        handle.await.unwrap().unwrap();
        assert!(!path.exists());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_analyzer_error_still_answers() {
        let path = socket_path("failing");
        let (tx, handle) = spawn_server(FailingAnalyzer, settings(path.clone()));

        let result = request(&path, b"frame").await.unwrap();
        let json: serde_json::Value = serde_json::from_str(&result).unwrap();
        assert_eq!(json["error"], "Analysis failed: model unavailable");

        tx.send(()).unwrap();
        handle.await.unwrap().unwrap();
    }
}
