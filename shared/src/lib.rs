//! Protocol pieces shared by the dungeon server and its clients: the
//! `<command:arguments>` frame codec, async frame streams, the typed request
//! and message sets, and the world records carried in snapshot frames.

pub mod codec;
pub mod protocol;
pub mod stream;
pub mod world;

pub use codec::{decode, encode, Frame, FramingError};
pub use protocol::{
    ClientRequest, ProtocolError, ServerMessage, DEFAULT_PORT, PROTOCOL_VERSION, SERVER_NICK,
};
pub use stream::{write_frame, FrameReader};
pub use world::{
    Creature, CreatureClass, MapLight, ParseWorldError, Position, Room, RoomType, Seat, Tile,
    TileType,
};
