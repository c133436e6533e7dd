use std::io;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Splits a byte stream of back-to-back raw frames (for example a decoder
/// writing rawvideo to stdout) into fixed-size frames.
pub struct RawFrameSource<R> {
    reader: R,
    buffer: Vec<u8>,
}

impl<R: AsyncRead + Unpin> RawFrameSource<R> {
    pub fn new(reader: R, frame_len: usize) -> Self {
        Self {
            reader,
            buffer: vec![0u8; frame_len],
        }
    }

    pub fn frame_len(&self) -> usize {
        self.buffer.len()
    }

    /// Returns the next full frame, or `None` on a clean end of stream. A
    /// stream that ends mid-frame is an `UnexpectedEof` error.
    pub async fn next_frame(&mut self) -> io::Result<Option<&[u8]>> {
        let mut filled = 0;
        while filled < self.buffer.len() {
            let n = self.reader.read(&mut self.buffer[filled..]).await?;
            if n == 0 {
                if filled == 0 {
                    return Ok(None);
                }
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!(
                        "stream ended {} bytes into a {} byte frame",
                        filled,
                        self.buffer.len()
                    ),
                ));
            }
            filled += n;
        }
        Ok(Some(&self.buffer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frames_split_until_clean_eof() {
        let stream: &[u8] = &[1, 1, 1, 2, 2, 2];
        let mut source = RawFrameSource::new(stream, 3);

        assert_eq!(source.next_frame().await.unwrap(), Some(&[1u8, 1, 1][..]));
        assert_eq!(source.next_frame().await.unwrap(), Some(&[2u8, 2, 2][..]));
        assert_eq!(source.next_frame().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_partial_trailing_frame_is_an_error() {
        let stream: &[u8] = &[1, 1, 1, 2];
        let mut source = RawFrameSource::new(stream, 3);

        source.next_frame().await.unwrap();
        let err = source.next_frame().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn test_frames_arriving_in_pieces() {
        let (mut writer, reader) = tokio::io::duplex(2);
        let feeder = tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            writer.write_all(&[9u8; 8]).await.unwrap();
        });

        let mut source = RawFrameSource::new(reader, 4);
        assert_eq!(source.next_frame().await.unwrap(), Some(&[9u8; 4][..]));
        assert_eq!(source.next_frame().await.unwrap(), Some(&[9u8; 4][..]));
        feeder.await.unwrap();
        assert_eq!(source.next_frame().await.unwrap(), None);
    }
}
