use super::{
    no_request_in_flight,
    response::{parse_response, HttpResponse, ResponseLimits},
    AnalyzerTransport,
};
use async_trait::async_trait;
use offload_proto::{framing::write_full, with_timeout, Timeouts, TransportError, WireError};
use tokio::{io::BufReader, net::TcpStream};
use tracing::instrument;

#[derive(Debug, Clone, Copy)]
pub struct PostRequest<'a> {
    pub path: &'a str,
    pub content_type: &'a str,
    pub headers: &'a [(&'a str, &'a str)],
    pub body: &'a [u8],
}

impl PostRequest<'_> {
    fn head(&self, host: &str, port: u16) -> String {
        let mut head = format!(
            "POST {} HTTP/1.1\r\nHost: {}:{}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n",
            self.path,
            host,
            port,
            self.content_type,
            self.body.len()
        );
        for (name, value) in self.headers {
            head.push_str(name);
            head.push_str(": ");
            head.push_str(value);
            head.push_str("\r\n");
        }
        head.push_str("\r\n");
        head
    }
}

/// One-shot HTTP/1.1 client: a fresh connection per POST.
#[derive(Debug, Clone)]
pub struct HttpClient {
    host: String,
    port: u16,
    timeouts: Timeouts,
    max_body: usize,
}

impl HttpClient {
    pub fn new(host: String, port: u16, timeouts: Timeouts, max_body: usize) -> Self {
        Self {
            host,
            port,
            timeouts,
            max_body,
        }
    }

    pub fn endpoint(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    pub async fn connect(&self) -> Result<TcpStream, WireError> {
        let endpoint = self.endpoint();
        with_timeout(self.timeouts.connect, "connecting", async move {
            TcpStream::connect((self.host.as_str(), self.port))
                .await
                .map_err(|source| TransportError::ConnectFailed { endpoint, source })
        })
        .await
    }

    pub async fn send_post(
        &self,
        stream: &mut TcpStream,
        request: &PostRequest<'_>,
    ) -> Result<(), WireError> {
        let head = request.head(&self.host, self.port);
        with_timeout(self.timeouts.write, "writing request", async {
            write_full(&mut *stream, head.as_bytes()).await?;
            write_full(&mut *stream, request.body).await
        })
        .await
    }

    pub async fn read_response(&self, stream: TcpStream) -> Result<HttpResponse, WireError> {
        let mut reader = BufReader::new(stream);
        with_timeout(
            self.timeouts.read,
            "reading response",
            parse_response(&mut reader, ResponseLimits::new(self.max_body)),
        )
        .await
    }

    #[instrument(skip(self, request), fields(path = request.path, bytes = request.body.len()))]
    pub async fn post(&self, request: &PostRequest<'_>) -> Result<HttpResponse, WireError> {
        let mut stream = self.connect().await?;
        self.send_post(&mut stream, request).await?;
        self.read_response(stream).await
    }
}

/// Analyzer transport over plain HTTP/1.1 POST.
#[derive(Debug)]
pub struct HttpTransport {
    client: HttpClient,
    path: String,
    content_type: String,
    stream: Option<TcpStream>,
}

impl HttpTransport {
    pub fn new(client: HttpClient, path: String, content_type: String) -> Self {
        Self {
            client,
            path,
            content_type,
            stream: None,
        }
    }
}

#[async_trait]
impl AnalyzerTransport for HttpTransport {
    #[instrument(skip(self, payload), fields(bytes = payload.len()))]
    async fn transmit(&mut self, payload: &[u8]) -> Result<(), WireError> {
        self.stream = None;
        let mut stream = self.client.connect().await?;
        let request = PostRequest {
            path: &self.path,
            content_type: &self.content_type,
            headers: &[],
            body: payload,
        };
        self.client.send_post(&mut stream, &request).await?;
        self.stream = Some(stream);
        Ok(())
    }

    async fn await_response(&mut self) -> Result<Vec<u8>, WireError> {
        let stream = self.stream.take().ok_or_else(no_request_in_flight)?;
        let response = self.client.read_response(stream).await?;
        tracing::debug!(
            "Received {} byte result from {}{}",
            response.body.len(),
            self.client.endpoint(),
            self.path
        );
        Ok(response.body)
    }

    fn kind(&self) -> &'static str {
        "http"
    }

    fn endpoint(&self) -> String {
        format!("{}{}", self.client.endpoint(), self.path)
    }
}
