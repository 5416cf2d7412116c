//! Per-connection session: join handshake, then the request loop
//!
//! Handshake: `hello` → `picknick` → `setnick`, then the world snapshot, one
//! frame at a time, each answered with `ok` before the next goes out. The
//! send guard is held for the whole snapshot so broadcasts raised meanwhile
//! wait in the connection's outbox and follow the snapshot in order.

use crate::connection::{spawn_writer, Connection};
use crate::error::{JoinError, ServerError};
use crate::network::ServerContext;
use crate::notification::NotificationKind;
use crate::world::ActionError;
use dungeon_shared::{
    ClientRequest, Frame, FrameReader, ProtocolError, ServerMessage, PROTOCOL_VERSION,
    SERVER_NICK,
};
use log::{debug, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};

/// Runs one client session to completion
///
/// Returns `Ok` when the peer leaves or is dropped. Errors for which
/// [`ServerError::is_fatal`] holds must end the server.
pub async fn handle_connection<R, W>(
    context: ServerContext,
    id: u32,
    peer: SocketAddr,
    reader: R,
    writer: W,
) -> Result<(), ServerError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Send + Unpin + 'static,
{
    let (connection, outbox) = Connection::new(id, peer, writer, context.config.outbox_capacity);
    spawn_writer(id, outbox);

    let mut session = Session {
        context,
        connection,
        frames: FrameReader::new(reader),
        joined: false,
    };
    let result = session.run().await;
    session.leave().await;
    result
}

struct Session<R> {
    context: ServerContext,
    connection: Arc<Connection>,
    frames: FrameReader<R>,
    joined: bool,
}

impl<R: AsyncRead + Unpin> Session<R> {
    async fn run(&mut self) -> Result<(), ServerError> {
        let nick = match self.handshake().await {
            Ok(nick) => nick,
            Err(ServerError::Join(e)) => {
                warn!("Rejecting client {}: {}", self.connection.peer(), e);
                let notice = ServerMessage::Chat {
                    nick: SERVER_NICK.to_string(),
                    message: rejection_text(&e).to_string(),
                };
                let _ = self.connection.send(&notice.to_frame()).await;
                return Err(ServerError::Join(e));
            }
            Err(e) => return Err(e),
        };
        info!(
            "Client {} ({}) finished joining as {}",
            self.connection.id(),
            self.connection.peer(),
            nick
        );

        loop {
            let frame = tokio::select! {
                frame = self.frames.next_frame() => frame?,
                _ = self.connection.dropped() => {
                    warn!("Session for {} ended: peer could not keep up", nick);
                    return Ok(());
                }
            };
            let Some(frame) = frame else {
                return Ok(());
            };
            if let Some(request) = self.parse(&frame)? {
                self.apply(&nick, request).await?;
            }
        }
    }

    /// Decodes a frame; malformed arguments drop it, anything else unknown is fatal
    fn parse(&self, frame: &Frame) -> Result<Option<ClientRequest>, ServerError> {
        match ClientRequest::from_frame(frame) {
            Ok(request) => Ok(Some(request)),
            Err(e) if !e.is_fatal() => {
                warn!("Dropping frame from {}: {}", self.connection.peer(), e);
                Ok(None)
            }
            Err(source) => Err(self.violation(source)),
        }
    }

    fn violation(&self, source: ProtocolError) -> ServerError {
        ServerError::Protocol {
            peer: self.connection.peer(),
            source,
        }
    }

    fn unexpected(&self, request: &ClientRequest) -> ServerError {
        self.violation(ProtocolError::UnexpectedCommand {
            command: request.command().to_string(),
        })
    }

    /// Next request, skipping malformed frames; the peer closing is an error here
    async fn next_request(&mut self) -> Result<ClientRequest, ServerError> {
        loop {
            let frame = self
                .frames
                .next_frame()
                .await?
                .ok_or(ServerError::HandshakeAborted)?;
            if let Some(request) = self.parse(&frame)? {
                return Ok(request);
            }
        }
    }

    async fn handshake(&mut self) -> Result<String, ServerError> {
        let version = match self.next_request().await? {
            ClientRequest::Hello { version } => version,
            other => return Err(self.unexpected(&other)),
        };
        self.context
            .chat
            .write()
            .await
            .server_info(format!("Client connect with version: {}", version));
        if version != PROTOCOL_VERSION {
            warn!(
                "Client {} speaks version {}, server is {}",
                self.connection.peer(),
                version,
                PROTOCOL_VERSION
            );
        }

        self.connection
            .send(&ServerMessage::PickNick.to_frame())
            .await?;
        let nick = loop {
            match self.next_request().await? {
                ClientRequest::SetNick { nick } => break nick,
                ClientRequest::Ok { .. } => continue,
                other => return Err(self.unexpected(&other)),
            }
        };
        self.context
            .chat
            .write()
            .await
            .server_info(format!("Client nick is: {}", nick));

        if self.context.clients.read().await.is_full() {
            return Err(JoinError::ServerFull.into());
        }

        let connection = Arc::clone(&self.connection);
        let mut guard = connection.lock().await;
        let snapshot = self.join(&nick).await?;

        for message in snapshot {
            guard.send(&message.to_frame()).await?;
            self.await_ack().await?;
        }
        drop(guard);
        Ok(nick)
    }

    /// Seats the player and enters the broadcast set in one world-locked step
    ///
    /// Every event raised after the snapshot is taken reaches this
    /// connection's outbox.
    async fn join(&mut self, nick: &str) -> Result<Vec<ServerMessage>, ServerError> {
        let mut world = self.context.world.write().await;
        world.add_player(nick)?;
        self.joined = true;
        self.connection.bind_nick(nick);

        let snapshot = world.snapshot_messages(nick).unwrap_or_default();
        self.context
            .clients
            .write()
            .await
            .add_client(Arc::clone(&self.connection))?;
        Ok(snapshot)
    }

    async fn await_ack(&mut self) -> Result<(), ServerError> {
        match self.next_request().await? {
            ClientRequest::Ok { echo } => {
                debug!("ok:{} from {}", echo, self.connection.peer());
                Ok(())
            }
            other => Err(self.unexpected(&other)),
        }
    }

    async fn apply(&mut self, nick: &str, request: ClientRequest) -> Result<(), ServerError> {
        match request {
            ClientRequest::Ok { .. } => Ok(()),
            ClientRequest::Chat {
                nick: speaker,
                message,
            } => {
                self.context
                    .chat
                    .write()
                    .await
                    .push(speaker.clone(), message.clone());
                self.context.notifier.enqueue(NotificationKind::Chat {
                    nick: speaker,
                    message,
                })?;
                Ok(())
            }
            ClientRequest::PickUp { player, creature } => {
                let mut world = self.context.world.write().await;
                let outcome = world.pick_up_creature(&player, &creature);
                self.raise(outcome)
            }
            ClientRequest::Drop { player, x, y } => {
                let mut world = self.context.world.write().await;
                let outcome = world.drop_creature(&player, x, y);
                self.raise(outcome)
            }
            ClientRequest::MarkTile { x, y, marked } => {
                let mut world = self.context.world.write().await;
                if let Err(e) = world.mark_tile(nick, x, y, marked) {
                    debug!("Ignoring markTile from {}: {}", nick, e);
                }
                Ok(())
            }
            other @ (ClientRequest::Hello { .. } | ClientRequest::SetNick { .. }) => {
                Err(self.unexpected(&other))
            }
        }
    }

    /// Raises the events of an applied action; a rejected one changes nothing
    fn raise(
        &self,
        outcome: Result<Vec<NotificationKind>, ActionError>,
    ) -> Result<(), ServerError> {
        match outcome {
            Ok(events) => {
                for kind in events {
                    self.context.notifier.enqueue(kind)?;
                }
            }
            Err(e) => debug!("Ignoring request from {}: {}", self.connection.peer(), e),
        }
        Ok(())
    }

    /// Leaves the broadcast set and frees the seat
    async fn leave(&mut self) {
        self.context
            .clients
            .write()
            .await
            .remove_client(&self.connection.id());

        if !self.joined {
            return;
        }
        if let Some(nick) = self.connection.nick() {
            self.context.world.write().await.remove_player(nick);
            self.context
                .chat
                .write()
                .await
                .server_info(format!("Client disconnect: {}", nick));
        }
    }
}

fn rejection_text(error: &JoinError) -> &'static str {
    match error {
        JoinError::InvalidNickname(_) => "Nickname rejected",
        JoinError::NicknameTaken(_) => "Nickname already in use",
        JoinError::NoFreeSeat => "No free seat",
        JoinError::ServerFull => "Server full",
    }
}
