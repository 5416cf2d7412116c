use crate::error::ClientError;
use crate::game::ClientWorld;
use dungeon_shared::{
    write_frame, ClientRequest, FrameReader, ServerMessage, PROTOCOL_VERSION,
};
use log::{debug, info, warn};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

/// One connection to a dungeon server
///
/// Snapshot frames are acknowledged as they are read, so the join completes
/// while the caller reads messages with [`Client::next_message`].
pub struct Client<R, W> {
    reader: FrameReader<R>,
    writer: W,
    nick: String,
    world: ClientWorld,
}

impl Client<OwnedReadHalf, OwnedWriteHalf> {
    pub async fn connect(server_addr: &str, nick: &str) -> Result<Self, ClientError> {
        info!("Connecting to {} as {}", server_addr, nick);
        let stream = TcpStream::connect(server_addr).await?;
        stream.set_nodelay(true)?;
        let (reader, writer) = stream.into_split();
        Self::join(reader, writer, nick).await
    }
}

impl<R, W> Client<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Greets the server and asks for `nick`
    pub async fn join(reader: R, writer: W, nick: &str) -> Result<Self, ClientError> {
        let mut client = Client {
            reader: FrameReader::new(reader),
            writer,
            nick: nick.to_string(),
            world: ClientWorld::new(),
        };

        client
            .send(&ClientRequest::Hello {
                version: PROTOCOL_VERSION.to_string(),
            })
            .await?;
        loop {
            match client.read_message().await? {
                ServerMessage::PickNick => break,
                other => client.world.apply(&other),
            }
        }
        client
            .send(&ClientRequest::SetNick {
                nick: nick.to_string(),
            })
            .await?;
        Ok(client)
    }

    pub fn nick(&self) -> &str {
        &self.nick
    }

    pub fn world(&self) -> &ClientWorld {
        &self.world
    }

    pub async fn send(&mut self, request: &ClientRequest) -> Result<(), ClientError> {
        let frame = request.to_frame();
        debug!("-> {}", frame);
        write_frame(&mut self.writer, &frame).await?;
        Ok(())
    }

    /// Reads the next message without applying it; the stream closing is an error
    async fn read_message(&mut self) -> Result<ServerMessage, ClientError> {
        loop {
            let Some(frame) = self.reader.next_frame().await? else {
                return Err(self.closed());
            };
            debug!("<- {}", frame);
            match ServerMessage::from_frame(&frame) {
                Ok(message) => return Ok(message),
                Err(e) if !e.is_fatal() => warn!("Dropping frame: {}", e),
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Explains a close: a server notice right before it means we were turned away
    fn closed(&self) -> ClientError {
        match self.world.server_notices().last() {
            Some(reason) if self.world.seat.is_none() => ClientError::Rejected(reason.to_string()),
            _ => ClientError::Closed,
        }
    }

    /// Reads, applies and if needed acknowledges the next message
    ///
    /// Returns `None` once the server closes the stream after we were seated.
    pub async fn next_message(&mut self) -> Result<Option<ServerMessage>, ClientError> {
        let message = match self.read_message().await {
            Ok(message) => message,
            Err(ClientError::Closed) => return Ok(None),
            Err(e) => return Err(e),
        };
        self.world.apply(&message);
        if message.requires_ack() {
            let ack = ClientRequest::Ok {
                echo: message.command().to_string(),
            };
            self.send(&ack).await?;
        }
        Ok(Some(message))
    }

    /// Reads messages until the server announces turn `turn`
    pub async fn wait_for_turn(&mut self, turn: u64) -> Result<(), ClientError> {
        while self.world.turn < turn {
            if self.next_message().await?.is_none() {
                return Err(ClientError::Closed);
            }
        }
        Ok(())
    }

    pub async fn chat(&mut self, message: &str) -> Result<(), ClientError> {
        let request = ClientRequest::Chat {
            nick: self.nick.clone(),
            message: message.to_string(),
        };
        self.send(&request).await
    }

    pub async fn pick_up(&mut self, creature: &str) -> Result<(), ClientError> {
        let request = ClientRequest::PickUp {
            player: self.nick.clone(),
            creature: creature.to_string(),
        };
        self.send(&request).await
    }

    pub async fn drop_at(&mut self, x: i32, y: i32) -> Result<(), ClientError> {
        let request = ClientRequest::Drop {
            player: self.nick.clone(),
            x,
            y,
        };
        self.send(&request).await
    }

    pub async fn mark_tile(&mut self, x: i32, y: i32, marked: bool) -> Result<(), ClientError> {
        self.send(&ClientRequest::MarkTile { x, y, marked }).await
    }
}
