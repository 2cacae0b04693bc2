use std::fmt;
use std::io;
use std::net::SocketAddr;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::command::{Command, CommandError};
use crate::connection::{ConnectionError, FrameReader, FrameWriter};
use crate::server::dispatch::{DispatchClosed, DispatchHandle, Message};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerId(pub u64);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    pub id: PeerId,
    pub addr: SocketAddr,
}

#[derive(Error, Debug)]
pub enum PeerError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error("bad command: {0}")]
    Command(#[from] CommandError),
    #[error("failed to write reply: {0}")]
    Write(#[from] io::Error),
    #[error("dispatch loop is gone")]
    DispatchClosed,
}

impl From<DispatchClosed> for PeerError {
    fn from(_: DispatchClosed) -> Self {
        PeerError::DispatchClosed
    }
}

/// One connected client. Decodes commands from its socket, hands them to the
/// dispatch loop and writes the replies back on the same socket.
pub struct Peer<R, W: AsyncWrite> {
    info: PeerInfo,
    reader: FrameReader<R>,
    writer: FrameWriter<W>,
    dispatch: DispatchHandle,
}

impl Peer<OwnedReadHalf, OwnedWriteHalf> {
    pub fn from_stream(
        id: PeerId,
        stream: TcpStream,
        addr: SocketAddr,
        dispatch: DispatchHandle,
    ) -> Self {
        let (reader, writer) = stream.into_split();
        Self::new(PeerInfo { id, addr }, reader, writer, dispatch)
    }
}

impl<R, W> Peer<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(info: PeerInfo, reader: R, writer: W, dispatch: DispatchHandle) -> Self {
        Self {
            info,
            reader: FrameReader::new(reader),
            writer: FrameWriter::new(writer),
            dispatch,
        }
    }

    /// Runs the peer until the client hangs up or sends something
    /// unrecoverable. The dispatch loop hears about the disconnect either way.
    pub async fn run(mut self) -> Result<(), PeerError> {
        self.dispatch.connected(self.info.clone()).await?;

        let result = self.read_loop().await;

        if self.dispatch.disconnected(self.info.clone()).await.is_err() {
            debug!(peer = %self.info.addr, "dispatch loop stopped before disconnect");
        }
        result
    }

    async fn read_loop(&mut self) -> Result<(), PeerError> {
        while let Some(frame) = self.reader.read_frame().await? {
            let cmd = match Command::from_resp(frame) {
                Ok(cmd) => cmd,
                Err(err) if err.is_fatal() => return Err(err.into()),
                Err(err) => {
                    warn!(peer = %self.info.addr, error = %err, "unhandled command");
                    continue;
                }
            };

            let (reply_tx, reply_rx) = oneshot::channel();
            self.dispatch
                .submit(Message {
                    peer: self.info.id,
                    cmd,
                    reply: reply_tx,
                })
                .await?;

            match reply_rx.await {
                Ok(Some(reply)) => self.writer.write_frame(&reply).await?,
                Ok(None) => {}
                Err(_) => return Err(PeerError::DispatchClosed),
            }
        }

        Ok(())
    }
}
