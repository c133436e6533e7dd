//! Length-prefixed request / NUL-terminated response framing.
//!
//! A request is `[u32 little-endian length][length bytes of payload]`. The
//! response is the analyzer's text result followed by a single `0x00`. Each
//! connection carries exactly one request and one response.

use crate::error::{ProtocolError, TransportError, WireError};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

pub const LENGTH_PREFIX_LEN: usize = 4;
pub const RESULT_TERMINATOR: u8 = 0;

pub fn encode_length(len: usize) -> Result<[u8; LENGTH_PREFIX_LEN], ProtocolError> {
    let len = u32::try_from(len).map_err(|_| {
        ProtocolError::MalformedLength(format!(
            "{} bytes does not fit the 32-bit length field",
            len
        ))
    })?;
    Ok(len.to_le_bytes())
}

/// Checks a received length field against the configured bound. Runs before
/// any payload buffer is allocated.
pub fn decode_length(
    prefix: [u8; LENGTH_PREFIX_LEN],
    max_payload: usize,
) -> Result<usize, ProtocolError> {
    let len = u32::from_le_bytes(prefix) as usize;
    if len == 0 {
        return Err(ProtocolError::MalformedLength(
            "zero-length payload".to_string(),
        ));
    }
    if len > max_payload {
        return Err(ProtocolError::MalformedLength(format!(
            "{} bytes exceeds the maximum of {}",
            len, max_payload
        )));
    }
    Ok(len)
}

/// Fills `buf` completely or reports how far it got before the peer closed.
pub async fn read_full<R: AsyncRead + Unpin>(
    reader: &mut R,
    buf: &mut [u8],
) -> Result<(), TransportError> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            return Err(TransportError::ShortRead {
                expected: buf.len(),
                actual: filled,
            });
        }
        filled += n;
    }
    Ok(())
}

pub async fn write_full<W: AsyncWrite + Unpin>(
    writer: &mut W,
    bytes: &[u8],
) -> Result<(), TransportError> {
    writer
        .write_all(bytes)
        .await
        .map_err(|source| TransportError::ShortWrite {
            expected: bytes.len(),
            source,
        })?;
    writer
        .flush()
        .await
        .map_err(|source| TransportError::ShortWrite {
            expected: bytes.len(),
            source,
        })
}

pub async fn write_request<W: AsyncWrite + Unpin>(
    writer: &mut W,
    payload: &[u8],
) -> Result<(), WireError> {
    if payload.is_empty() {
        return Err(ProtocolError::MalformedLength("empty payload".to_string()).into());
    }
    let prefix = encode_length(payload.len())?;

    let mut message = Vec::with_capacity(LENGTH_PREFIX_LEN + payload.len());
    message.extend_from_slice(&prefix);
    message.extend_from_slice(payload);
    write_full(writer, &message).await?;
    Ok(())
}

pub async fn read_request<R: AsyncRead + Unpin>(
    reader: &mut R,
    max_payload: usize,
) -> Result<Vec<u8>, WireError> {
    let mut prefix = [0u8; LENGTH_PREFIX_LEN];
    read_full(reader, &mut prefix).await?;
    let len = decode_length(prefix, max_payload)?;

    let mut payload = vec![0u8; len];
    read_full(reader, &mut payload).await?;
    Ok(payload)
}

pub async fn write_response<W: AsyncWrite + Unpin>(
    writer: &mut W,
    result: &[u8],
) -> Result<(), WireError> {
    if let Some(offset) = result.iter().position(|b| *b == RESULT_TERMINATOR) {
        return Err(ProtocolError::EmbeddedTerminator(offset).into());
    }

    let mut message = Vec::with_capacity(result.len() + 1);
    message.extend_from_slice(result);
    message.push(RESULT_TERMINATOR);
    write_full(writer, &message).await?;
    Ok(())
}

/// Reads a terminator-delimited result of at most `max_result` bytes. The
/// terminator is stripped from the returned bytes.
pub async fn read_response<R: AsyncRead + Unpin>(
    reader: &mut R,
    max_result: usize,
) -> Result<Vec<u8>, WireError> {
    let limit = max_result as u64 + 1;
    let mut limited = BufReader::new(reader.take(limit));
    let mut buf = Vec::new();
    limited.read_until(RESULT_TERMINATOR, &mut buf).await?;

    match buf.last() {
        Some(&RESULT_TERMINATOR) => {
            buf.pop();
            Ok(buf)
        }
        _ if buf.len() > max_result => Err(ProtocolError::MalformedLength(format!(
            "result exceeds the maximum of {} bytes",
            max_result
        ))
        .into()),
        _ => Err(TransportError::ShortRead {
            expected: buf.len() + 1,
            actual: buf.len(),
        }
        .into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn test_request_round_trip() {
        let (mut client, mut server) = duplex(1024);
        let payload = b"raw frame bytes".to_vec();

        write_request(&mut client, &payload).await.unwrap();
        let received = read_request(&mut server, 64).await.unwrap();

        assert_eq!(received, payload);
    }

    #[tokio::test]
    async fn test_length_prefix_is_little_endian() {
        let (mut client, mut server) = duplex(1024);
        write_request(&mut client, &[7u8; 258]).await.unwrap();

        let mut prefix = [0u8; 4];
        server.read_exact(&mut prefix).await.unwrap();
        assert_eq!(prefix, [2, 1, 0, 0]);
    }

    #[test]
    fn test_zero_length_rejected() {
        let err = decode_length([0, 0, 0, 0], 100).unwrap_err();
        assert!(matches!(err, ProtocolError::MalformedLength(_)));
    }

    #[test]
    fn test_oversized_length_rejected() {
        let err = decode_length(101u32.to_le_bytes(), 100).unwrap_err();
        assert!(matches!(err, ProtocolError::MalformedLength(_)));
        assert_eq!(decode_length(100u32.to_le_bytes(), 100).unwrap(), 100);
    }

    #[tokio::test]
    async fn test_oversized_request_rejected_without_reading_payload() {
        let mut input: &[u8] = &[0xff, 0xff, 0xff, 0x7f, 1, 2, 3];
        let err = read_request(&mut input, 1024).await.unwrap_err();

        assert!(matches!(
            err,
            WireError::Protocol(ProtocolError::MalformedLength(_))
        ));
        assert_eq!(input, &[1, 2, 3]);
    }

    #[tokio::test]
    async fn test_short_payload_is_short_read() {
        let mut input = Vec::new();
        input.extend_from_slice(&10u32.to_le_bytes());
        input.extend_from_slice(b"abc");
        let mut reader: &[u8] = &input;

        let err = read_request(&mut reader, 1024).await.unwrap_err();
        assert!(matches!(
            err,
            WireError::Transport(TransportError::ShortRead {
                expected: 10,
                actual: 3
            })
        ));
    }

    #[tokio::test]
    async fn test_empty_payload_not_sent() {
        let mut sink = Vec::new();
        let err = write_request(&mut sink, &[]).await.unwrap_err();
        assert!(matches!(
            err,
            WireError::Protocol(ProtocolError::MalformedLength(_))
        ));
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn test_response_round_trip() {
        let (mut client, mut server) = duplex(1024);
        write_response(&mut server, br#"{"results":[]}"#).await.unwrap();
        drop(server);

        let result = read_response(&mut client, 1024).await.unwrap();
        assert_eq!(result, br#"{"results":[]}"#);
    }

    #[tokio::test]
    async fn test_response_without_terminator_is_short_read() {
        let mut reader: &[u8] = b"{\"partial\"";
        let err = read_response(&mut reader, 1024).await.unwrap_err();
        assert!(matches!(
            err,
            WireError::Transport(TransportError::ShortRead { .. })
        ));
    }

    #[tokio::test]
    async fn test_response_over_bound_rejected() {
        let mut reader: &[u8] = b"0123456789\0";
        let err = read_response(&mut reader, 4).await.unwrap_err();
        assert!(matches!(
            err,
            WireError::Protocol(ProtocolError::MalformedLength(_))
        ));
    }

    #[tokio::test]
    async fn test_embedded_terminator_rejected() {
        let mut sink = Vec::new();
        let err = write_response(&mut sink, b"ab\0cd").await.unwrap_err();
        assert!(matches!(
            err,
            WireError::Protocol(ProtocolError::EmbeddedTerminator(2))
        ));
    }
}
