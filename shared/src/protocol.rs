//! Typed messages exchanged over the frame codec
//!
//! `ClientRequest` covers everything a client may send, `ServerMessage`
//! everything the server may send. Both convert to and from `Frame`.

use crate::codec::Frame;
use crate::world::{Creature, CreatureClass, MapLight, Position, Room, Seat, Tile};
use std::str::FromStr;
use thiserror::Error;

/// Version string announced in `hello`
pub const PROTOCOL_VERSION: &str = "0.1.0";
/// Port the server listens on unless configured otherwise
pub const DEFAULT_PORT: u16 = 31222;
/// Nickname used for server-generated chat lines
pub const SERVER_NICK: &str = "SERVER_INFORMATION";

/// Command names on the wire
pub mod command {
    pub const HELLO: &str = "hello";
    pub const PICK_NICK: &str = "picknick";
    pub const SET_NICK: &str = "setnick";
    pub const OK: &str = "ok";
    pub const CHAT: &str = "chat";
    pub const NEW_MAP: &str = "newmap";
    pub const ADD_SEAT: &str = "addseat";
    pub const TURNS_PER_SECOND: &str = "turnsPerSecond";
    pub const ADD_PLAYER: &str = "addplayer";
    pub const ADD_TILE: &str = "addtile";
    pub const ADD_MAP_LIGHT: &str = "addmaplight";
    pub const REMOVE_MAP_LIGHT: &str = "removeMapLight";
    pub const ADD_ROOM: &str = "addroom";
    pub const ADD_CLASS: &str = "addclass";
    pub const ADD_CREATURE: &str = "addcreature";
    pub const NEW_TURN: &str = "newturn";
    pub const ADD_DESTINATION: &str = "animatedObjectAddDestination";
    pub const CLEAR_DESTINATIONS: &str = "animatedObjectClearDestinations";
    pub const CREATURE_PICK_UP: &str = "creaturePickUp";
    pub const CREATURE_DROP: &str = "creatureDrop";
    pub const ANIMATION_STATE: &str = "setObjectAnimationState";
    pub const TILE_FULLNESS: &str = "tileFullnessChange";
    pub const MARK_TILE: &str = "markTile";
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("unknown command `{command}` (arguments `{arguments}`)")]
    UnknownCommand { command: String, arguments: String },
    #[error("command `{command}` is not valid at this point of the session")]
    UnexpectedCommand { command: String },
    #[error("malformed arguments `{arguments}` for `{command}`: {reason}")]
    MalformedArguments {
        command: String,
        arguments: String,
        reason: String,
    },
}

impl ProtocolError {
    fn malformed(frame: &Frame, reason: impl ToString) -> Self {
        ProtocolError::MalformedArguments {
            command: frame.command.clone(),
            arguments: frame.arguments.clone(),
            reason: reason.to_string(),
        }
    }

    /// Fatal errors end the session; malformed arguments only drop one frame
    pub fn is_fatal(&self) -> bool {
        !matches!(self, ProtocolError::MalformedArguments { .. })
    }
}

fn field<T: FromStr>(frame: &Frame, value: &str, name: &str) -> Result<T, ProtocolError> {
    value
        .parse()
        .map_err(|_| ProtocolError::malformed(frame, format!("invalid {name} `{value}`")))
}

fn exact_fields<'a>(frame: &'a Frame, n: usize) -> Result<Vec<&'a str>, ProtocolError> {
    let fields = frame.fields(n);
    if fields.len() != n {
        return Err(ProtocolError::malformed(
            frame,
            format!("expected {n} fields, got {}", fields.len()),
        ));
    }
    Ok(fields)
}

fn payload<T>(frame: &Frame) -> Result<T, ProtocolError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    frame
        .arguments
        .parse()
        .map_err(|e: T::Err| ProtocolError::malformed(frame, e))
}

/// Anything a client sends
#[derive(Debug, Clone, PartialEq)]
pub enum ClientRequest {
    Hello { version: String },
    SetNick { nick: String },
    /// Acknowledges one server frame; the echo is informational only
    Ok { echo: String },
    Chat { nick: String, message: String },
    PickUp { player: String, creature: String },
    Drop { player: String, x: i32, y: i32 },
    MarkTile { x: i32, y: i32, marked: bool },
}

impl ClientRequest {
    pub fn command(&self) -> &'static str {
        match self {
            ClientRequest::Hello { .. } => command::HELLO,
            ClientRequest::SetNick { .. } => command::SET_NICK,
            ClientRequest::Ok { .. } => command::OK,
            ClientRequest::Chat { .. } => command::CHAT,
            ClientRequest::PickUp { .. } => command::CREATURE_PICK_UP,
            ClientRequest::Drop { .. } => command::CREATURE_DROP,
            ClientRequest::MarkTile { .. } => command::MARK_TILE,
        }
    }

    pub fn to_frame(&self) -> Frame {
        let name = self.command();
        match self {
            ClientRequest::Hello { version } => Frame::new(name, version.as_str()),
            ClientRequest::SetNick { nick } => Frame::new(name, nick.as_str()),
            ClientRequest::Ok { echo } => Frame::new(name, echo.as_str()),
            ClientRequest::Chat { nick, message } => {
                Frame::with_fields(name, [nick.as_str(), message.as_str()])
            }
            ClientRequest::PickUp { player, creature } => {
                Frame::with_fields(name, [player.as_str(), creature.as_str()])
            }
            ClientRequest::Drop { player, x, y } => {
                Frame::with_fields(name, [player.clone(), x.to_string(), y.to_string()])
            }
            ClientRequest::MarkTile { x, y, marked } => {
                Frame::with_fields(name, [x.to_string(), y.to_string(), marked.to_string()])
            }
        }
    }

    pub fn from_frame(frame: &Frame) -> Result<Self, ProtocolError> {
        let request = match frame.command.as_str() {
            command::HELLO => ClientRequest::Hello {
                version: frame.arguments.clone(),
            },
            command::SET_NICK => ClientRequest::SetNick {
                nick: frame.arguments.clone(),
            },
            command::OK => ClientRequest::Ok {
                echo: frame.arguments.clone(),
            },
            command::CHAT => {
                let fields = exact_fields(frame, 2)?;
                ClientRequest::Chat {
                    nick: fields[0].to_string(),
                    message: fields[1].to_string(),
                }
            }
            command::CREATURE_PICK_UP => {
                let fields = exact_fields(frame, 2)?;
                ClientRequest::PickUp {
                    player: fields[0].to_string(),
                    creature: fields[1].to_string(),
                }
            }
            command::CREATURE_DROP => {
                let fields = exact_fields(frame, 3)?;
                ClientRequest::Drop {
                    player: fields[0].to_string(),
                    x: field(frame, fields[1], "tile x")?,
                    y: field(frame, fields[2], "tile y")?,
                }
            }
            command::MARK_TILE => {
                let fields = exact_fields(frame, 3)?;
                ClientRequest::MarkTile {
                    x: field(frame, fields[0], "tile x")?,
                    y: field(frame, fields[1], "tile y")?,
                    // Anything but the literal "true" clears the mark.
                    marked: fields[2] == "true",
                }
            }
            _ => {
                return Err(ProtocolError::UnknownCommand {
                    command: frame.command.clone(),
                    arguments: frame.arguments.clone(),
                })
            }
        };
        Ok(request)
    }
}

/// Anything the server sends
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    PickNick,
    NewMap,
    AddSeat(Seat),
    TurnsPerSecond(f64),
    AddPlayer { nick: String, color: u32 },
    AddTile(Tile),
    AddMapLight(MapLight),
    RemoveMapLight { name: String },
    AddRoom(Room),
    AddClass(CreatureClass),
    AddCreature(Creature),
    NewTurn(u64),
    AddDestination { entity: String, position: Position },
    ClearDestinations { entity: String },
    CreaturePickUp { player: String, creature: String },
    CreatureDrop { player: String, x: i32, y: i32 },
    AnimationState { entity: String, state: String, looping: bool },
    TileFullness { fullness: f64, x: i32, y: i32 },
    Chat { nick: String, message: String },
}

impl ServerMessage {
    pub fn command(&self) -> &'static str {
        match self {
            ServerMessage::PickNick => command::PICK_NICK,
            ServerMessage::NewMap => command::NEW_MAP,
            ServerMessage::AddSeat(_) => command::ADD_SEAT,
            ServerMessage::TurnsPerSecond(_) => command::TURNS_PER_SECOND,
            ServerMessage::AddPlayer { .. } => command::ADD_PLAYER,
            ServerMessage::AddTile(_) => command::ADD_TILE,
            ServerMessage::AddMapLight(_) => command::ADD_MAP_LIGHT,
            ServerMessage::RemoveMapLight { .. } => command::REMOVE_MAP_LIGHT,
            ServerMessage::AddRoom(_) => command::ADD_ROOM,
            ServerMessage::AddClass(_) => command::ADD_CLASS,
            ServerMessage::AddCreature(_) => command::ADD_CREATURE,
            ServerMessage::NewTurn(_) => command::NEW_TURN,
            ServerMessage::AddDestination { .. } => command::ADD_DESTINATION,
            ServerMessage::ClearDestinations { .. } => command::CLEAR_DESTINATIONS,
            ServerMessage::CreaturePickUp { .. } => command::CREATURE_PICK_UP,
            ServerMessage::CreatureDrop { .. } => command::CREATURE_DROP,
            ServerMessage::AnimationState { .. } => command::ANIMATION_STATE,
            ServerMessage::TileFullness { .. } => command::TILE_FULLNESS,
            ServerMessage::Chat { .. } => command::CHAT,
        }
    }

    /// Frames a client acknowledges with `ok:` while joining
    pub fn requires_ack(&self) -> bool {
        matches!(
            self,
            ServerMessage::NewMap
                | ServerMessage::AddSeat(_)
                | ServerMessage::TurnsPerSecond(_)
                | ServerMessage::AddPlayer { .. }
                | ServerMessage::AddTile(_)
                | ServerMessage::AddMapLight(_)
                | ServerMessage::AddRoom(_)
                | ServerMessage::AddClass(_)
                | ServerMessage::AddCreature(_)
        )
    }

    pub fn to_frame(&self) -> Frame {
        let name = self.command();
        match self {
            ServerMessage::PickNick | ServerMessage::NewMap => Frame::bare(name),
            ServerMessage::AddSeat(seat) => Frame::new(name, seat.to_string()),
            ServerMessage::TurnsPerSecond(rate) => Frame::new(name, rate.to_string()),
            ServerMessage::AddPlayer { nick, color } => {
                Frame::with_fields(name, [nick.clone(), color.to_string()])
            }
            ServerMessage::AddTile(tile) => Frame::new(name, tile.to_string()),
            ServerMessage::AddMapLight(light) => Frame::new(name, light.to_string()),
            ServerMessage::RemoveMapLight { name: light } => Frame::new(name, light.as_str()),
            ServerMessage::AddRoom(room) => Frame::new(name, room.to_string()),
            ServerMessage::AddClass(class) => Frame::new(name, class.to_string()),
            ServerMessage::AddCreature(creature) => Frame::new(name, creature.to_string()),
            ServerMessage::NewTurn(turn) => Frame::new(name, turn.to_string()),
            ServerMessage::AddDestination { entity, position } => Frame::with_fields(
                name,
                [
                    entity.clone(),
                    position.x.to_string(),
                    position.y.to_string(),
                    position.z.to_string(),
                ],
            ),
            ServerMessage::ClearDestinations { entity } => Frame::new(name, entity.as_str()),
            ServerMessage::CreaturePickUp { player, creature } => {
                Frame::with_fields(name, [player.as_str(), creature.as_str()])
            }
            ServerMessage::CreatureDrop { player, x, y } => {
                Frame::with_fields(name, [player.clone(), x.to_string(), y.to_string()])
            }
            ServerMessage::AnimationState {
                entity,
                state,
                looping,
            } => Frame::with_fields(name, [entity.clone(), state.clone(), looping.to_string()]),
            ServerMessage::TileFullness { fullness, x, y } => {
                Frame::with_fields(name, [fullness.to_string(), x.to_string(), y.to_string()])
            }
            ServerMessage::Chat { nick, message } => {
                Frame::with_fields(name, [nick.as_str(), message.as_str()])
            }
        }
    }

    pub fn from_frame(frame: &Frame) -> Result<Self, ProtocolError> {
        let message = match frame.command.as_str() {
            command::PICK_NICK => ServerMessage::PickNick,
            command::NEW_MAP => ServerMessage::NewMap,
            command::ADD_SEAT => ServerMessage::AddSeat(payload(frame)?),
            command::TURNS_PER_SECOND => {
                ServerMessage::TurnsPerSecond(field(frame, &frame.arguments, "rate")?)
            }
            command::ADD_PLAYER => {
                let fields = exact_fields(frame, 2)?;
                ServerMessage::AddPlayer {
                    nick: fields[0].to_string(),
                    color: field(frame, fields[1], "color")?,
                }
            }
            command::ADD_TILE => ServerMessage::AddTile(payload(frame)?),
            command::ADD_MAP_LIGHT => ServerMessage::AddMapLight(payload(frame)?),
            command::REMOVE_MAP_LIGHT => ServerMessage::RemoveMapLight {
                name: frame.arguments.clone(),
            },
            command::ADD_ROOM => ServerMessage::AddRoom(payload(frame)?),
            command::ADD_CLASS => ServerMessage::AddClass(payload(frame)?),
            command::ADD_CREATURE => ServerMessage::AddCreature(payload(frame)?),
            command::NEW_TURN => ServerMessage::NewTurn(field(frame, &frame.arguments, "turn")?),
            command::ADD_DESTINATION => {
                let fields = exact_fields(frame, 4)?;
                ServerMessage::AddDestination {
                    entity: fields[0].to_string(),
                    position: Position::new(
                        field(frame, fields[1], "x")?,
                        field(frame, fields[2], "y")?,
                        field(frame, fields[3], "z")?,
                    ),
                }
            }
            command::CLEAR_DESTINATIONS => ServerMessage::ClearDestinations {
                entity: frame.arguments.clone(),
            },
            command::CREATURE_PICK_UP => {
                let fields = exact_fields(frame, 2)?;
                ServerMessage::CreaturePickUp {
                    player: fields[0].to_string(),
                    creature: fields[1].to_string(),
                }
            }
            command::CREATURE_DROP => {
                let fields = exact_fields(frame, 3)?;
                ServerMessage::CreatureDrop {
                    player: fields[0].to_string(),
                    x: field(frame, fields[1], "tile x")?,
                    y: field(frame, fields[2], "tile y")?,
                }
            }
            command::ANIMATION_STATE => {
                let fields = exact_fields(frame, 3)?;
                ServerMessage::AnimationState {
                    entity: fields[0].to_string(),
                    state: fields[1].to_string(),
                    looping: fields[2] == "true",
                }
            }
            command::TILE_FULLNESS => {
                let fields = exact_fields(frame, 3)?;
                ServerMessage::TileFullness {
                    fullness: field(frame, fields[0], "fullness")?,
                    x: field(frame, fields[1], "tile x")?,
                    y: field(frame, fields[2], "tile y")?,
                }
            }
            command::CHAT => {
                let fields = exact_fields(frame, 2)?;
                ServerMessage::Chat {
                    nick: fields[0].to_string(),
                    message: fields[1].to_string(),
                }
            }
            _ => {
                return Err(ProtocolError::UnknownCommand {
                    command: frame.command.clone(),
                    arguments: frame.arguments.clone(),
                })
            }
        };
        Ok(message)
    }
}
