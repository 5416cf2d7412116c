//! Frame-level reading and writing over async byte streams

use crate::codec::{decode, Frame, FramingError};
use log::{trace, warn};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on buffered bytes that have not yet formed a frame
pub const MAX_PENDING_BYTES: usize = 64 * 1024;

const READ_CHUNK: usize = 4096;

/// Accumulates bytes from a reader and hands out whole frames
///
/// Malformed input is dropped with a diagnostic and reading continues, so a
/// single bad frame never tears down the connection.
pub struct FrameReader<R> {
    reader: R,
    buffer: Vec<u8>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buffer: Vec::with_capacity(READ_CHUNK),
        }
    }

    /// Waits for the next complete frame
    ///
    /// Returns `Ok(None)` once the peer closes the stream in an orderly way.
    /// A partial frame left in the buffer at that point is discarded.
    pub async fn next_frame(&mut self) -> io::Result<Option<Frame>> {
        let mut chunk = [0u8; READ_CHUNK];

        loop {
            match decode(&self.buffer) {
                Ok((frame, rest)) => {
                    let consumed = self.buffer.len() - rest.len();
                    self.buffer.drain(..consumed);
                    trace!("<- {}", frame);
                    return Ok(Some(frame));
                }
                Err(FramingError::Malformed { skip, reason }) => {
                    warn!("Dropping {} bytes of malformed input: {}", skip, reason);
                    self.buffer.drain(..skip);
                    continue;
                }
                Err(FramingError::Incomplete) => {}
            }

            if self.buffer.len() > MAX_PENDING_BYTES {
                warn!(
                    "Discarding {} buffered bytes without a frame terminator",
                    self.buffer.len()
                );
                self.buffer.clear();
            }

            let read = self.reader.read(&mut chunk).await?;
            if read == 0 {
                if !self.buffer.iter().all(u8::is_ascii_whitespace) {
                    warn!(
                        "Stream closed with {} bytes of an unfinished frame",
                        self.buffer.len()
                    );
                }
                return Ok(None);
            }
            self.buffer.extend_from_slice(&chunk[..read]);
        }
    }
}

/// Writes one encoded frame and flushes it
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, frame: &Frame) -> io::Result<()> {
    trace!("-> {}", frame);
    writer.write_all(frame.encode().as_bytes()).await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    #[tokio::test]
    async fn test_frames_split_across_reads() {
        let mock = Builder::new()
            .read(b"<newt")
            .read(b"urn:4")
            .read(b"2><ok:")
            .read(b"x>")
            .build();
        let mut reader = FrameReader::new(mock);

        assert_eq!(
            reader.next_frame().await.unwrap(),
            Some(Frame::new("newturn", "42"))
        );
        assert_eq!(
            reader.next_frame().await.unwrap(),
            Some(Frame::new("ok", "x"))
        );
        assert_eq!(reader.next_frame().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_frames_sharing_one_read() {
        let mock = Builder::new()
            .read(b"<picknick:>\n<newmap:>\n")
            .build();
        let mut reader = FrameReader::new(mock);

        assert_eq!(
            reader.next_frame().await.unwrap(),
            Some(Frame::bare("picknick"))
        );
        assert_eq!(
            reader.next_frame().await.unwrap(),
            Some(Frame::bare("newmap"))
        );
        assert_eq!(reader.next_frame().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_malformed_frame_is_skipped() {
        let mock = Builder::new()
            .read(b"garbage<nocolon><chat:bob:hi>")
            .build();
        let mut reader = FrameReader::new(mock);

        assert_eq!(
            reader.next_frame().await.unwrap(),
            Some(Frame::new("chat", "bob:hi"))
        );
    }

    #[tokio::test]
    async fn test_orderly_close_with_partial_frame() {
        let mock = Builder::new().read(b"<chat:bob").build();
        let mut reader = FrameReader::new(mock);
        assert_eq!(reader.next_frame().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_read_error_is_reported() {
        let mock = Builder::new()
            .read_error(io::Error::new(io::ErrorKind::ConnectionReset, "reset"))
            .build();
        let mut reader = FrameReader::new(mock);
        let err = reader.next_frame().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);
    }

    #[tokio::test]
    async fn test_write_frame() {
        let mut mock = Builder::new().write(b"<setnick:alice>").build();
        write_frame(&mut mock, &Frame::new("setnick", "alice"))
            .await
            .unwrap();
    }
}
