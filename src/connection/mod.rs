use bytes::BytesMut;
use std::io;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter};

use crate::resp::{Decoded, RespError, RespType};

#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("protocol error: {0}")]
    Protocol(#[from] RespError),
    #[error("connection closed in the middle of a frame ({0} bytes pending)")]
    Truncated(usize),
}

/// Buffered frame decoder over the read half of a connection.
#[derive(Debug)]
pub struct FrameReader<R> {
    reader: R,
    buffer: BytesMut,
    // Buffer length below which re-parsing can't produce a frame.
    needed: usize,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buffer: BytesMut::with_capacity(4096),
            needed: 0,
        }
    }

    /// Waits for the next complete frame.
    ///
    /// `Ok(None)` means the peer closed the stream cleanly between frames.
    pub async fn read_frame(&mut self) -> Result<Option<RespType>, ConnectionError> {
        loop {
            if self.buffer.len() >= self.needed {
                match RespType::decode(&mut self.buffer)? {
                    Decoded::Frame(frame) => {
                        self.needed = 0;
                        return Ok(Some(frame));
                    }
                    Decoded::Incomplete { needed } => self.needed = needed,
                }
            }

            if self.reader.read_buf(&mut self.buffer).await? == 0 {
                if self.buffer.is_empty() {
                    return Ok(None);
                }
                return Err(ConnectionError::Truncated(self.buffer.len()));
            }
        }
    }
}

#[derive(Debug)]
pub struct FrameWriter<W: AsyncWrite> {
    writer: BufWriter<W>,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: BufWriter::new(writer),
        }
    }

    pub async fn write_frame(&mut self, frame: &RespType) -> io::Result<()> {
        let mut buf = BytesMut::new();
        frame.encode(&mut buf);
        self.writer.write_all(&buf).await?;
        self.writer.flush().await
    }
}
