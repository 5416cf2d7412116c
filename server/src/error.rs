//! Server error types

use crate::notification::QueueClosed;
use crate::world::ActionError;
use dungeon_shared::ProtocolError;
use std::net::SocketAddr;
use std::path::PathBuf;
use thiserror::Error;

/// Errors loading or validating the server configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Reasons a player cannot join
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum JoinError {
    #[error("invalid nickname `{0}`")]
    InvalidNickname(String),
    #[error("nickname `{0}` is already in use")]
    NicknameTaken(String),
    #[error("no free seat")]
    NoFreeSeat,
    #[error("server is full")]
    ServerFull,
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Ends the whole session
    #[error("fatal protocol violation from {peer}: {source}")]
    Protocol {
        peer: SocketAddr,
        #[source]
        source: ProtocolError,
    },
    #[error(transparent)]
    QueueClosed(#[from] QueueClosed),
    #[error(transparent)]
    Join(#[from] JoinError),
    #[error("peer closed the connection during the handshake")]
    HandshakeAborted,
    #[error("world change rejected: {0}")]
    Action(#[from] ActionError),
    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl ServerError {
    /// True for errors that must stop the server rather than one session
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ServerError::Protocol { .. } | ServerError::QueueClosed(_) | ServerError::Task(_)
        )
    }
}
