//! Minimal HTTP/1.1 response reader: status line, headers, and a
//! Content-Length delimited body. Nothing else is understood.

use offload_proto::{framing::read_full, ProtocolError, TransportError, WireError};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseState {
    AwaitStatusLine,
    AwaitHeaderLine,
    Done,
}

#[derive(Debug, Clone, Copy)]
pub struct ResponseLimits {
    pub max_line: usize,
    pub max_body: usize,
}

impl ResponseLimits {
    pub fn new(max_body: usize) -> Self {
        Self {
            max_line: 8 * 1024,
            max_body,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

#[derive(Debug)]
pub struct ResponseParser {
    state: ParseState,
    limits: ResponseLimits,
    status: u16,
    headers: Vec<(String, String)>,
    content_length: Option<usize>,
}

impl ResponseParser {
    pub fn new(limits: ResponseLimits) -> Self {
        Self {
            state: ParseState::AwaitStatusLine,
            limits,
            status: 0,
            headers: Vec::new(),
            content_length: None,
        }
    }

    pub fn state(&self) -> ParseState {
        self.state
    }

    /// Drives the parser through all three states. On error `state` tells
    /// how far it got; on a non-200 status the reader is left positioned
    /// right after the status line.
    pub async fn parse<R: AsyncBufRead + Unpin>(
        &mut self,
        reader: &mut R,
    ) -> Result<HttpResponse, WireError> {
        loop {
            match self.state {
                ParseState::AwaitStatusLine => {
                    let line = read_line(reader, self.limits.max_line).await?;
                    self.status = parse_status_line(&line)?;
                    self.state = ParseState::AwaitHeaderLine;
                }
                ParseState::AwaitHeaderLine => {
                    let line = read_line(reader, self.limits.max_line).await?;
                    if line.is_empty() {
                        self.state = ParseState::Done;
                    } else {
                        self.accept_header(&line)?;
                    }
                }
                ParseState::Done => {
                    let mut body = vec![0u8; self.content_length.unwrap_or(0)];
                    read_full(reader, &mut body).await?;
                    return Ok(HttpResponse {
                        status: self.status,
                        headers: std::mem::take(&mut self.headers),
                        body,
                    });
                }
            }
        }
    }

    fn accept_header(&mut self, line: &str) -> Result<(), ProtocolError> {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| ProtocolError::MalformedHeader(line.to_string()))?;
        let value = value.trim_start();

        if name.eq_ignore_ascii_case("content-length") {
            let length: usize = value.trim_end().parse().map_err(|_| {
                ProtocolError::MalformedLength(format!("invalid Content-Length {:?}", value))
            })?;
            if length > self.limits.max_body {
                return Err(ProtocolError::MalformedLength(format!(
                    "Content-Length {} exceeds the maximum of {}",
                    length, self.limits.max_body
                )));
            }
            if self.content_length.is_some_and(|previous| previous != length) {
                return Err(ProtocolError::MalformedHeader(format!(
                    "conflicting Content-Length {}",
                    value.trim_end()
                )));
            }
            self.content_length = Some(length);
        } else if name.eq_ignore_ascii_case("transfer-encoding")
            && value
                .split(',')
                .any(|coding| coding.trim().eq_ignore_ascii_case("chunked"))
        {
            return Err(ProtocolError::UnsupportedTransferEncoding(value.to_string()));
        }

        self.headers.push((name.to_string(), value.to_string()));
        Ok(())
    }
}

pub async fn parse_response<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    limits: ResponseLimits,
) -> Result<HttpResponse, WireError> {
    let mut parser = ResponseParser::new(limits);
    parser.parse(reader).await
}

fn parse_status_line(line: &str) -> Result<u16, ProtocolError> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.len() < 3 {
        return Err(ProtocolError::MalformedHeader(format!(
            "status line {:?}",
            line
        )));
    }
    let status: u16 = tokens[1]
        .parse()
        .map_err(|_| ProtocolError::MalformedHeader(format!("status code {:?}", tokens[1])))?;
    if status != 200 {
        return Err(ProtocolError::UnexpectedStatus(status));
    }
    Ok(status)
}

/// Reads one `\n` terminated line without the line ending. Scans the
/// buffered bytes in place and fails once `max_line` is exceeded.
async fn read_line<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    max_line: usize,
) -> Result<String, WireError> {
    let mut line = Vec::new();
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Err(TransportError::ShortRead {
                expected: line.len() + 1,
                actual: line.len(),
            }
            .into());
        }

        let (chunk, found) = match available.iter().position(|b| *b == b'\n') {
            Some(idx) => (&available[..idx], Some(idx)),
            None => (available, None),
        };
        if line.len() + chunk.len() > max_line {
            return Err(ProtocolError::MalformedHeader(format!(
                "line exceeds {} bytes",
                max_line
            ))
            .into());
        }
        line.extend_from_slice(chunk);

        match found {
            Some(idx) => {
                reader.consume(idx + 1);
                break;
            }
            None => {
                let consumed = chunk.len();
                reader.consume(consumed);
            }
        }
    }

    if line.last() == Some(&b'\r') {
        line.pop();
    }
    String::from_utf8(line)
        .map_err(|_| ProtocolError::MalformedHeader("line is not valid UTF-8".to_string()).into())
}
