//! Minimal client for the server, mainly used by the test suite.
//!
//! Every call dials a fresh connection, sends one command and reads at most
//! one reply. The server stays silent on a missed `GET`, so `get` waits for
//! `reply_timeout` and reports `None` if nothing arrives.

use bytes::Bytes;
use std::io;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::time;

use crate::connection::{ConnectionError, FrameReader, FrameWriter};
use crate::resp::RespType;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error("server closed the connection without replying")]
    NoReply,
    #[error("unexpected reply: {0:?}")]
    UnexpectedReply(RespType),
}

#[derive(Debug, Clone)]
pub struct Client {
    addr: String,
    reply_timeout: Duration,
}

impl Client {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            reply_timeout: Duration::from_secs(1),
        }
    }

    pub fn with_reply_timeout(mut self, reply_timeout: Duration) -> Self {
        self.reply_timeout = reply_timeout;
        self
    }

    pub async fn set(&self, key: &[u8], value: &[u8]) -> Result<(), ClientError> {
        let reply = self.round_trip(&[b"SET", key, value]).await?;
        expect_ok(reply)
    }

    pub async fn set_with_ttl(
        &self,
        key: &[u8],
        value: &[u8],
        ttl: Duration,
    ) -> Result<(), ClientError> {
        let millis = ttl.as_millis().to_string();
        let reply = self
            .round_trip(&[b"SET", key, value, b"PX", millis.as_bytes()])
            .await?;
        expect_ok(reply)
    }

    pub async fn get(&self, key: &[u8]) -> Result<Option<Bytes>, ClientError> {
        match self.round_trip(&[b"GET", key]).await? {
            None => Ok(None),
            Some(RespType::BulkString(value)) => Ok(value),
            Some(other) => Err(ClientError::UnexpectedReply(other)),
        }
    }

    /// Sends the handshake and returns the server's reply map.
    pub async fn hello(&self) -> Result<Vec<(String, String)>, ClientError> {
        let pairs = match self.round_trip(&[b"HELLO", b"3"]).await? {
            Some(RespType::Map(pairs)) => pairs,
            other => return Err(unexpected(other)),
        };

        pairs
            .into_iter()
            .map(|pair| match pair {
                (RespType::SimpleString(k), RespType::SimpleString(v)) => Ok((k, v)),
                (k, v) => Err(ClientError::UnexpectedReply(RespType::Map(vec![(k, v)]))),
            })
            .collect()
    }

    async fn round_trip(&self, args: &[&[u8]]) -> Result<Option<RespType>, ClientError> {
        let stream = TcpStream::connect(&self.addr).await?;
        let (reader, writer) = stream.into_split();
        let mut writer = FrameWriter::new(writer);
        let mut reader = FrameReader::new(reader);

        writer.write_frame(&RespType::command(args)).await?;
        match time::timeout(self.reply_timeout, reader.read_frame()).await {
            Err(_elapsed) => Ok(None),
            Ok(Ok(Some(reply))) => Ok(Some(reply)),
            Ok(Ok(None)) => Err(ClientError::NoReply),
            Ok(Err(err)) => Err(err.into()),
        }
    }
}

fn expect_ok(reply: Option<RespType>) -> Result<(), ClientError> {
    match reply {
        Some(RespType::SimpleString(s)) if s == "OK" => Ok(()),
        other => Err(unexpected(other)),
    }
}

fn unexpected(reply: Option<RespType>) -> ClientError {
    match reply {
        Some(reply) => ClientError::UnexpectedReply(reply),
        None => ClientError::NoReply,
    }
}
