//! One live client stream with an exclusive send guard
//!
//! A connection can be written two ways. The handshake takes the guard with
//! [`Connection::lock`] and streams snapshot frames directly. Broadcasts go
//! through [`Connection::deliver`], which only pushes into a bounded outbox;
//! the writer task spawned by [`spawn_writer`] drains it under the same
//! guard, so a stalled peer never blocks the dispatcher and frames never
//! interleave mid-write.

use dungeon_shared::{write_frame, Frame};
use log::{debug, warn};
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch, Mutex, MutexGuard};
use tokio::task::JoinHandle;

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("outbox is full")]
    Full,
    #[error("connection is closed")]
    Closed,
}

pub struct Connection {
    id: u32,
    peer: SocketAddr,
    writer: Arc<Mutex<BoxedWriter>>,
    nick: OnceLock<String>,
    outbox: mpsc::Sender<Frame>,
    dropped: watch::Sender<bool>,
}

/// Frames waiting for the writer task
pub struct Outbox {
    rx: mpsc::Receiver<Frame>,
    writer: Arc<Mutex<BoxedWriter>>,
}

/// Held while writing; other senders wait until it drops
pub struct SendGuard<'a> {
    writer: MutexGuard<'a, BoxedWriter>,
}

impl SendGuard<'_> {
    pub async fn send(&mut self, frame: &Frame) -> io::Result<()> {
        write_frame(&mut *self.writer, frame).await
    }
}

impl Connection {
    pub fn new<W>(id: u32, peer: SocketAddr, writer: W, outbox_capacity: usize) -> (Arc<Self>, Outbox)
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let writer: Arc<Mutex<BoxedWriter>> = Arc::new(Mutex::new(Box::new(writer)));
        let (tx, rx) = mpsc::channel(outbox_capacity.max(1));
        let connection = Arc::new(Self {
            id,
            peer,
            writer: Arc::clone(&writer),
            nick: OnceLock::new(),
            outbox: tx,
            dropped: watch::channel(false).0,
        });
        (connection, Outbox { rx, writer })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Nickname bound by the handshake, if any
    pub fn nick(&self) -> Option<&str> {
        self.nick.get().map(String::as_str)
    }

    /// Binds the nickname once; later calls are refused
    pub fn bind_nick(&self, nick: impl Into<String>) -> bool {
        self.nick.set(nick.into()).is_ok()
    }

    /// Takes the send guard, waiting for any writer in progress
    pub async fn lock(&self) -> SendGuard<'_> {
        SendGuard {
            writer: self.writer.lock().await,
        }
    }

    /// Writes one frame under the guard and waits for the transport to take it
    pub async fn send(&self, frame: &Frame) -> io::Result<()> {
        self.lock().await.send(frame).await
    }

    /// Queues a frame for the writer task without waiting
    pub fn deliver(&self, frame: Frame) -> Result<(), DeliveryError> {
        self.outbox.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryError::Full,
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }

    pub fn is_closed(&self) -> bool {
        self.outbox.is_closed()
    }

    /// Asks the connection's handler to end the session
    pub fn drop_peer(&self) {
        self.dropped.send_replace(true);
    }

    pub fn is_dropped(&self) -> bool {
        *self.dropped.borrow()
    }

    /// Resolves once [`Connection::drop_peer`] has been called
    pub async fn dropped(&self) {
        let mut rx = self.dropped.subscribe();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("nick", &self.nick.get())
            .finish()
    }
}

/// Drains the outbox until the connection is dropped or a write fails
///
/// The task holds no reference to the `Connection` itself; it ends once every
/// owner has let go and the outbox is empty.
pub fn spawn_writer(id: u32, outbox: Outbox) -> JoinHandle<()> {
    let Outbox { mut rx, writer } = outbox;
    tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let mut guard = writer.lock().await;
            if let Err(e) = write_frame(&mut *guard, &frame).await {
                warn!("Send to client {} failed: {}", id, e);
                return;
            }
        }
        debug!("Writer for client {} finished", id);
        let _ = writer.lock().await.shutdown().await;
    })
}
