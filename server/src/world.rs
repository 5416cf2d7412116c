//! Authoritative world state
//!
//! The server keeps one `World` behind a lock shared by the simulation and
//! every connection handler. Mutating operations never touch the network;
//! they return the notifications the change should produce and the caller
//! raises them while it still holds the lock, so events reach the queue in
//! the order the changes were applied.

use crate::behavior::{CreatureBehavior, TurnContext, TurnOutcome};
use crate::config::ServerConfig;
use crate::error::JoinError;
use crate::notification::NotificationKind;
use dungeon_shared::codec::is_frame_safe;
use dungeon_shared::{
    Creature, CreatureClass, MapLight, Position, Room, RoomType, Seat, ServerMessage, Tile,
    TileType, SERVER_NICK,
};
use log::{debug, info};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use thiserror::Error;

pub const MAX_NICK_LEN: usize = 32;
/// Creatures of this class dig rate or less cannot be dropped on raw dirt
pub const MIN_DROP_DIG_RATE: f64 = 0.1;

/// A client request that was understood but could not be applied
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ActionError {
    #[error("unknown player `{0}`")]
    UnknownPlayer(String),
    #[error("unknown creature `{0}`")]
    UnknownCreature(String),
    #[error("creature `{0}` is down and cannot be picked up")]
    CreatureDown(String),
    #[error("player `{0}` holds nothing")]
    EmptyHand(String),
    #[error("no tile at {x},{y}")]
    UnknownTile { x: i32, y: i32 },
    #[error("cannot drop on tile {x},{y}")]
    NotDroppable { x: i32, y: i32 },
    #[error("unknown light `{0}`")]
    UnknownLight(String),
    #[error("invalid simulation rate {0}")]
    InvalidRate(f64),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Player {
    pub nick: String,
    pub seat: Seat,
    /// Held creatures, most recently picked up first
    pub hand: VecDeque<Creature>,
    pub marked_tiles: BTreeSet<(i32, i32)>,
}

/// Checks that a nickname can travel in frames and is not reserved
pub fn validate_nick(nick: &str) -> Result<(), JoinError> {
    let valid = !nick.is_empty()
        && nick.len() <= MAX_NICK_LEN
        && nick != SERVER_NICK
        && is_frame_safe(nick)
        && !nick.chars().any(|c| c.is_whitespace() || c.is_control());
    if valid {
        Ok(())
    } else {
        Err(JoinError::InvalidNickname(nick.to_string()))
    }
}

#[derive(Debug, Clone)]
pub struct World {
    width: i32,
    height: i32,
    turns_per_second: f64,
    tiles: BTreeMap<(i32, i32), Tile>,
    seats: Vec<Seat>,
    lights: Vec<MapLight>,
    next_light_id: u32,
    rooms: Vec<Room>,
    classes: Vec<CreatureClass>,
    creatures: BTreeMap<String, Creature>,
    players: BTreeMap<String, Player>,
}

impl World {
    pub fn new(width: i32, height: i32, turns_per_second: f64) -> Self {
        Self {
            width,
            height,
            turns_per_second,
            tiles: BTreeMap::new(),
            seats: Vec::new(),
            lights: Vec::new(),
            next_light_id: 1,
            rooms: Vec::new(),
            classes: Vec::new(),
            creatures: BTreeMap::new(),
            players: BTreeMap::new(),
        }
    }

    /// Builds the starting map used when no level is loaded
    ///
    /// Rock border, dirt interior with scattered gold, and a claimed dungeon
    /// temple with a light for every seat. Creatures start inside the
    /// temples. The same config always yields the same world.
    pub fn demo(config: &ServerConfig) -> Self {
        let (width, height) = (config.map_width, config.map_height);
        let mut rng = StdRng::seed_from_u64(config.seed);
        let mut world = World::new(width, height, config.turns_per_second);

        for x in 0..width {
            for y in 0..height {
                let border = x == 0 || y == 0 || x == width - 1 || y == height - 1;
                let kind = if border {
                    TileType::Rock
                } else if rng.gen_bool(0.1) {
                    TileType::Gold
                } else {
                    TileType::Dirt
                };
                world.insert_tile(Tile::new(x, y, kind, 1.0));
            }
        }

        let size = 3i32.min(width - 2).min(height - 2);
        let corners = [
            (1, 1),
            (width - 1 - size, 1),
            (1, height - 1 - size),
            (width - 1 - size, height - 1 - size),
        ];
        let seat_count = if width >= 2 * size + 2 && height >= 2 * size + 2 {
            corners.len()
        } else {
            1
        };

        for (index, &(left, top)) in corners.iter().take(seat_count).enumerate() {
            let color = index as u32 + 1;
            world.add_seat(Seat {
                color,
                faction: "Keeper".to_string(),
            });

            let mut room_tiles = Vec::new();
            for x in left..left + size {
                for y in top..top + size {
                    let mut tile = Tile::new(x, y, TileType::Claimed, 0.0);
                    tile.color = color;
                    world.insert_tile(tile);
                    room_tiles.push((x, y));
                }
            }
            world.add_room(Room {
                name: format!("Room_{}", index + 1),
                kind: RoomType::DungeonTemple,
                color,
                tiles: room_tiles,
            });

            let center = (size - 1) as f64 / 2.0;
            world.add_light(
                Position::new(left as f64 + center, top as f64 + center, 3.0),
                [0.6, 0.45, 0.3],
            );
        }

        for class in default_classes() {
            world.add_class(class);
        }

        for i in 0..config.creature_count {
            let seat = i % seat_count;
            let (left, top) = corners[seat];
            let class = world.classes[rng.gen_range(0..world.classes.len())].clone();
            let position = Position::new(
                (left + rng.gen_range(0..size)) as f64,
                (top + rng.gen_range(0..size)) as f64,
                0.0,
            );
            let name = format!("{}_{}", class.name, i + 1);
            world.add_creature(Creature::new(name, &class, position, seat as u32 + 1));
        }

        info!(
            "Built {}x{} demo map with {} seats and {} creatures",
            width,
            height,
            world.seats.len(),
            world.creatures.len()
        );
        world
    }

    pub fn width(&self) -> i32 {
        self.width
    }

    pub fn height(&self) -> i32 {
        self.height
    }

    pub fn turns_per_second(&self) -> f64 {
        self.turns_per_second
    }

    pub fn insert_tile(&mut self, tile: Tile) {
        self.tiles.insert((tile.x, tile.y), tile);
    }

    pub fn tile(&self, x: i32, y: i32) -> Option<&Tile> {
        self.tiles.get(&(x, y))
    }

    pub fn tiles(&self) -> impl Iterator<Item = &Tile> {
        self.tiles.values()
    }

    pub fn add_seat(&mut self, seat: Seat) {
        self.seats.push(seat);
    }

    pub fn seats(&self) -> &[Seat] {
        &self.seats
    }

    pub fn add_room(&mut self, room: Room) {
        self.rooms.push(room);
    }

    pub fn rooms(&self) -> &[Room] {
        &self.rooms
    }

    pub fn add_class(&mut self, class: CreatureClass) {
        self.classes.retain(|existing| existing.name != class.name);
        self.classes.push(class);
    }

    pub fn class(&self, name: &str) -> Option<&CreatureClass> {
        self.classes.iter().find(|class| class.name == name)
    }

    pub fn classes(&self) -> &[CreatureClass] {
        &self.classes
    }

    pub fn add_creature(&mut self, creature: Creature) {
        self.creatures.insert(creature.name.clone(), creature);
    }

    pub fn creature(&self, name: &str) -> Option<&Creature> {
        self.creatures.get(name)
    }

    pub fn creatures(&self) -> impl Iterator<Item = &Creature> {
        self.creatures.values()
    }

    pub fn lights(&self) -> &[MapLight] {
        &self.lights
    }

    pub fn player(&self, nick: &str) -> Option<&Player> {
        self.players.get(nick)
    }

    pub fn players(&self) -> impl Iterator<Item = &Player> {
        self.players.values()
    }

    /// Seats a new player in the first seat nobody holds
    pub fn add_player(&mut self, nick: &str) -> Result<&Player, JoinError> {
        validate_nick(nick)?;
        if self.players.contains_key(nick) {
            return Err(JoinError::NicknameTaken(nick.to_string()));
        }
        let seat = self
            .seats
            .iter()
            .find(|seat| self.players.values().all(|p| p.seat.color != seat.color))
            .cloned()
            .ok_or(JoinError::NoFreeSeat)?;

        info!("Player {} takes seat {}", nick, seat.color);
        let player = Player {
            nick: nick.to_string(),
            seat,
            hand: VecDeque::new(),
            marked_tiles: BTreeSet::new(),
        };
        Ok(self.players.entry(nick.to_string()).or_insert(player))
    }

    /// Frees the player's seat; creatures still in hand leave with them
    pub fn remove_player(&mut self, nick: &str) -> Option<Player> {
        let player = self.players.remove(nick)?;
        if !player.hand.is_empty() {
            info!(
                "Player {} left holding {} creatures",
                nick,
                player.hand.len()
            );
        }
        Some(player)
    }

    /// Moves a live creature into the player's hand
    pub fn pick_up_creature(
        &mut self,
        player: &str,
        creature: &str,
    ) -> Result<Vec<NotificationKind>, ActionError> {
        if !self.players.contains_key(player) {
            return Err(ActionError::UnknownPlayer(player.to_string()));
        }
        match self.creatures.get(creature) {
            None => return Err(ActionError::UnknownCreature(creature.to_string())),
            Some(found) if !found.is_alive() => {
                return Err(ActionError::CreatureDown(creature.to_string()))
            }
            Some(_) => {}
        }

        let mut events = Vec::new();
        let Some(mut picked) = self.creatures.remove(creature) else {
            return Err(ActionError::UnknownCreature(creature.to_string()));
        };
        if !picked.destinations.is_empty() {
            picked.destinations.clear();
            events.push(NotificationKind::ClearDestinations {
                entity: picked.name.clone(),
            });
        }
        events.push(NotificationKind::CreaturePickUp {
            player: player.to_string(),
            creature: picked.name.clone(),
        });

        if let Some(holder) = self.players.get_mut(player) {
            holder.hand.push_front(picked);
        }
        Ok(events)
    }

    /// Puts the first creature in the player's hand back on the map
    pub fn drop_creature(
        &mut self,
        player: &str,
        x: i32,
        y: i32,
    ) -> Result<Vec<NotificationKind>, ActionError> {
        let holder = self
            .players
            .get(player)
            .ok_or_else(|| ActionError::UnknownPlayer(player.to_string()))?;
        let held = holder
            .hand
            .front()
            .ok_or_else(|| ActionError::EmptyHand(player.to_string()))?;
        let tile = self.tile(x, y).ok_or(ActionError::UnknownTile { x, y })?;

        let dig_rate = self.class(&held.class_name).map_or(0.0, |c| c.dig_rate);
        let droppable = tile.fullness < 1.0
            && match tile.kind {
                TileType::Dirt => dig_rate > MIN_DROP_DIG_RATE,
                TileType::Claimed => tile.color == holder.seat.color,
                _ => false,
            };
        if !droppable {
            return Err(ActionError::NotDroppable { x, y });
        }

        let Some(mut dropped) = self
            .players
            .get_mut(player)
            .and_then(|holder| holder.hand.pop_front())
        else {
            return Err(ActionError::EmptyHand(player.to_string()));
        };
        dropped.position = Position::new(x as f64, y as f64, 0.0);
        dropped.destinations.clear();
        self.creatures.insert(dropped.name.clone(), dropped);

        Ok(vec![NotificationKind::CreatureDrop {
            player: player.to_string(),
            x,
            y,
        }])
    }

    /// Marks or unmarks a tile for digging by the player's creatures
    ///
    /// Returns whether the mark changed.
    pub fn mark_tile(
        &mut self,
        player: &str,
        x: i32,
        y: i32,
        marked: bool,
    ) -> Result<bool, ActionError> {
        if !self.tiles.contains_key(&(x, y)) {
            return Err(ActionError::UnknownTile { x, y });
        }
        let holder = self
            .players
            .get_mut(player)
            .ok_or_else(|| ActionError::UnknownPlayer(player.to_string()))?;
        let changed = if marked {
            holder.marked_tiles.insert((x, y))
        } else {
            holder.marked_tiles.remove(&(x, y))
        };
        Ok(changed)
    }

    /// True when a player in the seat of `color` marked the tile
    pub fn is_marked_for(&self, color: u32, x: i32, y: i32) -> bool {
        self.players
            .values()
            .any(|p| p.seat.color == color && p.marked_tiles.contains(&(x, y)))
    }

    /// Removes up to `amount` fullness from a dirt or gold tile
    ///
    /// Returns the new fullness, or `None` if the tile cannot be dug.
    pub fn dig_tile(&mut self, x: i32, y: i32, amount: f64) -> Option<f64> {
        let tile = self.tiles.get_mut(&(x, y))?;
        if !matches!(tile.kind, TileType::Dirt | TileType::Gold) || tile.fullness <= 0.0 {
            return None;
        }
        tile.fullness = (tile.fullness - amount).max(0.0);
        if tile.fullness == 0.0 {
            for player in self.players.values_mut() {
                player.marked_tiles.remove(&(x, y));
            }
        }
        Some(tile.fullness)
    }

    pub fn set_turns_per_second(&mut self, rate: f64) -> Result<NotificationKind, ActionError> {
        if !(rate.is_finite() && rate > 0.0) {
            return Err(ActionError::InvalidRate(rate));
        }
        info!("Simulation rate set to {} turns per second", rate);
        self.turns_per_second = rate;
        Ok(NotificationKind::TurnsPerSecond { rate })
    }

    /// Adds a light with a generated name
    pub fn add_light(&mut self, position: Position, diffuse: [f64; 3]) -> NotificationKind {
        let light = MapLight {
            name: format!("Light_{}", self.next_light_id),
            position,
            diffuse,
        };
        self.next_light_id += 1;
        self.lights.push(light.clone());
        NotificationKind::AddMapLight(light)
    }

    pub fn remove_light(&mut self, name: &str) -> Result<NotificationKind, ActionError> {
        let index = self
            .lights
            .iter()
            .position(|light| light.name == name)
            .ok_or_else(|| ActionError::UnknownLight(name.to_string()))?;
        self.lights.remove(index);
        Ok(NotificationKind::RemoveMapLight {
            name: name.to_string(),
        })
    }

    /// Runs one turn of every live creature
    ///
    /// Creatures are walked in name order. A creature whose behaviour asks
    /// for removal stays in the live set until every creature has had its
    /// turn.
    pub fn do_turn(
        &mut self,
        turn: u64,
        behavior: &mut dyn CreatureBehavior,
    ) -> Vec<NotificationKind> {
        let names: Vec<String> = self.creatures.keys().cloned().collect();
        let mut events = Vec::new();
        let mut removals = Vec::new();

        for name in names {
            // Taken out so the behaviour can borrow the rest of the world.
            let Some(mut creature) = self.creatures.remove(&name) else {
                continue;
            };
            let outcome = {
                let mut context = TurnContext::new(turn, self, &mut events);
                behavior.do_turn(&mut creature, &mut context)
            };
            if outcome == TurnOutcome::Remove {
                removals.push(name.clone());
            }
            self.creatures.insert(name, creature);
        }

        for name in removals {
            if self.creatures.remove(&name).is_some() {
                debug!("Creature {} removed at end of turn {}", name, turn);
            }
        }
        events
    }

    /// Frames that bring a joining player up to date, in send order
    ///
    /// Identical world state always produces identical frames.
    pub fn snapshot_messages(&self, joiner: &str) -> Option<Vec<ServerMessage>> {
        let seat = self.players.get(joiner)?.seat.clone();
        let mut messages = vec![
            ServerMessage::NewMap,
            ServerMessage::AddSeat(seat),
            ServerMessage::TurnsPerSecond(self.turns_per_second),
        ];
        messages.extend(
            self.players
                .values()
                .filter(|p| p.nick != joiner)
                .map(|p| ServerMessage::AddPlayer {
                    nick: p.nick.clone(),
                    color: p.seat.color,
                }),
        );
        messages.extend(self.tiles.values().cloned().map(ServerMessage::AddTile));
        messages.extend(self.lights.iter().cloned().map(ServerMessage::AddMapLight));
        messages.extend(self.rooms.iter().cloned().map(ServerMessage::AddRoom));
        messages.extend(self.classes.iter().cloned().map(ServerMessage::AddClass));
        messages.extend(
            self.creatures
                .values()
                .cloned()
                .map(ServerMessage::AddCreature),
        );
        Some(messages)
    }
}

fn default_classes() -> Vec<CreatureClass> {
    vec![
        CreatureClass {
            name: "Imp".to_string(),
            max_hp: 20.0,
            dig_rate: 0.3,
            move_speed: 1.5,
        },
        CreatureClass {
            name: "Goblin".to_string(),
            max_hp: 40.0,
            dig_rate: 0.05,
            move_speed: 1.0,
        },
        CreatureClass {
            name: "Troll".to_string(),
            max_hp: 80.0,
            dig_rate: 0.15,
            move_speed: 0.6,
        },
    ]
}
