//! TCP store client
//!
//! One TCP connection speaking RESP2. A background task reads and decodes
//! replies into a channel; another drains flushed command batches onto the
//! socket. The tick thread never blocks: commands are encoded into a local
//! buffer and only handed to the writer task on `flush`.

use std::net::SocketAddr;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::task::JoinHandle;

use shoal_core::{CommandHandle, ShoalError, ShoalResult};
use shoal_store::{Command, Reply, StoreClient};

use crate::resp::{decode_reply, encode_command};

/// Initial capacity of the read buffer
const READ_BUFFER_SIZE: usize = 16 * 1024;

/// Reply receiver channel
pub type ReplyReceiver = mpsc::UnboundedReceiver<Reply>;

/// Outbound batch sender channel
pub type BatchSender = mpsc::UnboundedSender<Bytes>;

/// RESP-over-TCP connection to the backing store
pub struct TcpStoreClient {
    peer_addr: SocketAddr,
    outbound: BytesMut,
    batches: BatchSender,
    replies: ReplyReceiver,
    next_send: CommandHandle,
    next_reply: CommandHandle,
    closed: bool,
    read_task: JoinHandle<()>,
}

impl TcpStoreClient {
    /// Connect and select the logical database
    pub async fn connect<A: ToSocketAddrs>(addr: A, db: u32) -> ShoalResult<Self> {
        let mut stream = TcpStream::connect(addr)
            .await
            .map_err(|e| ShoalError::Transport(e.to_string()))?;
        stream
            .set_nodelay(true)
            .map_err(|e| ShoalError::Transport(e.to_string()))?;
        let peer_addr = stream
            .peer_addr()
            .map_err(|e| ShoalError::Transport(e.to_string()))?;

        select_db(&mut stream, db).await?;

        let (read_half, write_half) = stream.into_split();
        let (batch_tx, batch_rx) = mpsc::unbounded_channel();
        let (reply_tx, reply_rx) = mpsc::unbounded_channel();

        let read_task = tokio::spawn(read_loop(read_half, reply_tx));
        tokio::spawn(write_loop(write_half, batch_rx));

        tracing::debug!(%peer_addr, db, "store connection established");

        Ok(TcpStoreClient {
            peer_addr,
            outbound: BytesMut::new(),
            batches: batch_tx,
            replies: reply_rx,
            next_send: CommandHandle::default(),
            next_reply: CommandHandle::default(),
            closed: false,
            read_task,
        })
    }

    /// Get peer address
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Check whether the connection has been lost
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl StoreClient for TcpStoreClient {
    fn send_command(&mut self, command: Command) -> ShoalResult<CommandHandle> {
        if self.closed {
            return Err(ShoalError::ConnectionClosed);
        }

        encode_command(&command, &mut self.outbound);
        let handle = self.next_send;
        self.next_send = handle.next();
        Ok(handle)
    }

    fn try_receive(&mut self) -> Option<(CommandHandle, Reply)> {
        match self.replies.try_recv() {
            Ok(reply) => {
                let handle = self.next_reply;
                self.next_reply = handle.next();
                Some((handle, reply))
            }
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                if !self.closed {
                    tracing::warn!(peer = %self.peer_addr, "store connection lost");
                    self.closed = true;
                }
                None
            }
        }
    }

    fn flush(&mut self) -> ShoalResult<()> {
        if self.outbound.is_empty() {
            return Ok(());
        }

        let batch = self.outbound.split().freeze();
        self.batches.send(batch).map_err(|_| {
            self.closed = true;
            ShoalError::ConnectionClosed
        })
    }
}

impl Drop for TcpStoreClient {
    fn drop(&mut self) {
        self.read_task.abort();
    }
}

/// Send SELECT and wait for its acknowledgement before going asynchronous
async fn select_db(stream: &mut TcpStream, db: u32) -> ShoalResult<()> {
    let mut out = BytesMut::new();
    encode_command(&Command::Select(db), &mut out);
    stream
        .write_all(&out)
        .await
        .map_err(|e| ShoalError::Transport(e.to_string()))?;

    let mut buf = BytesMut::with_capacity(64);
    loop {
        if let Some(reply) = decode_reply(&mut buf)? {
            return match reply {
                Reply::Status(_) => Ok(()),
                Reply::Error(e) => Err(ShoalError::Backend(e)),
                other => Err(ShoalError::UnexpectedReply {
                    command: "SELECT",
                    reply: format!("{other:?}"),
                }),
            };
        }

        let n = stream
            .read_buf(&mut buf)
            .await
            .map_err(|e| ShoalError::Transport(e.to_string()))?;
        if n == 0 {
            return Err(ShoalError::ConnectionClosed);
        }
    }
}

async fn read_loop(mut socket: OwnedReadHalf, tx: mpsc::UnboundedSender<Reply>) {
    let mut buf = BytesMut::with_capacity(READ_BUFFER_SIZE);

    loop {
        loop {
            match decode_reply(&mut buf) {
                Ok(Some(reply)) => {
                    if tx.send(reply).is_err() {
                        return; // Client dropped
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!("store reply decode error: {}", e);
                    return;
                }
            }
        }

        match socket.read_buf(&mut buf).await {
            Ok(0) => {
                tracing::debug!("store closed the connection");
                return;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!("store receive error: {}", e);
                return;
            }
        }
    }
}

async fn write_loop(mut socket: OwnedWriteHalf, mut rx: mpsc::UnboundedReceiver<Bytes>) {
    while let Some(batch) = rx.recv().await {
        if let Err(e) = socket.write_all(&batch).await {
            tracing::warn!("store send error: {}", e);
            return;
        }
    }
    let _ = socket.shutdown().await;
}
