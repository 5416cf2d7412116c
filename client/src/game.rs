//! Client-side mirror of the server's world
//!
//! Built only from server frames; the client never changes it on its own.

use dungeon_shared::{
    Creature, CreatureClass, MapLight, Room, Seat, ServerMessage, Tile, SERVER_NICK,
};
use log::{debug, warn};
use std::collections::{BTreeMap, VecDeque};

#[derive(Debug, Clone, Default)]
pub struct ClientWorld {
    pub turn: u64,
    pub turns_per_second: f64,
    /// Our own seat, known once `addseat` arrives
    pub seat: Option<Seat>,
    /// Other players by nick, with their seat colour
    pub players: BTreeMap<String, u32>,
    pub tiles: BTreeMap<(i32, i32), Tile>,
    pub lights: BTreeMap<String, MapLight>,
    pub rooms: Vec<Room>,
    pub classes: BTreeMap<String, CreatureClass>,
    pub creatures: BTreeMap<String, Creature>,
    /// Creatures held by each player, first one dropped next
    pub hands: BTreeMap<String, VecDeque<Creature>>,
    pub chat: Vec<(String, String)>,
}

impl ClientWorld {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tile(&self, x: i32, y: i32) -> Option<&Tile> {
        self.tiles.get(&(x, y))
    }

    pub fn hand(&self, player: &str) -> impl Iterator<Item = &Creature> {
        self.hands.get(player).into_iter().flatten()
    }

    /// Chat lines sent by the server itself
    pub fn server_notices(&self) -> impl Iterator<Item = &str> {
        self.chat
            .iter()
            .filter(|(nick, _)| nick == SERVER_NICK)
            .map(|(_, message)| message.as_str())
    }

    /// Applies one server message
    pub fn apply(&mut self, message: &ServerMessage) {
        match message {
            ServerMessage::PickNick => {}
            ServerMessage::NewMap => *self = Self::default(),
            ServerMessage::AddSeat(seat) => self.seat = Some(seat.clone()),
            ServerMessage::TurnsPerSecond(rate) => self.turns_per_second = *rate,
            ServerMessage::AddPlayer { nick, color } => {
                self.players.insert(nick.clone(), *color);
            }
            ServerMessage::AddTile(tile) => {
                self.tiles.insert((tile.x, tile.y), tile.clone());
            }
            ServerMessage::AddMapLight(light) => {
                self.lights.insert(light.name.clone(), light.clone());
            }
            ServerMessage::RemoveMapLight { name } => {
                self.lights.remove(name);
            }
            ServerMessage::AddRoom(room) => self.rooms.push(room.clone()),
            ServerMessage::AddClass(class) => {
                self.classes.insert(class.name.clone(), class.clone());
            }
            ServerMessage::AddCreature(creature) => {
                self.creatures.insert(creature.name.clone(), creature.clone());
            }
            ServerMessage::NewTurn(turn) => self.turn = *turn,
            ServerMessage::AddDestination { entity, position } => {
                if let Some(creature) = self.creatures.get_mut(entity) {
                    creature.destinations.push_back(*position);
                }
            }
            ServerMessage::ClearDestinations { entity } => {
                if let Some(creature) = self.creatures.get_mut(entity) {
                    creature.destinations.clear();
                }
            }
            ServerMessage::CreaturePickUp { player, creature } => {
                match self.creatures.remove(creature) {
                    Some(picked) => self
                        .hands
                        .entry(player.clone())
                        .or_default()
                        .push_front(picked),
                    None => warn!("{} picked up unknown creature {}", player, creature),
                }
            }
            ServerMessage::CreatureDrop { player, x, y } => {
                let dropped = self.hands.get_mut(player).and_then(VecDeque::pop_front);
                match dropped {
                    Some(mut creature) => {
                        creature.position.x = *x as f64;
                        creature.position.y = *y as f64;
                        creature.position.z = 0.0;
                        creature.destinations.clear();
                        self.creatures.insert(creature.name.clone(), creature);
                    }
                    None => warn!("{} dropped from an empty hand", player),
                }
            }
            ServerMessage::AnimationState { entity, state, .. } => {
                if let Some(creature) = self.creatures.get_mut(entity) {
                    creature.animation = state.clone();
                }
            }
            ServerMessage::TileFullness { fullness, x, y } => {
                match self.tiles.get_mut(&(*x, *y)) {
                    Some(tile) => tile.fullness = *fullness,
                    None => debug!("Fullness change for unknown tile {},{}", x, y),
                }
            }
            ServerMessage::Chat { nick, message } => {
                self.chat.push((nick.clone(), message.clone()));
            }
        }
    }
}
