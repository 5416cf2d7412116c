//! World data that crosses the wire
//!
//! Every type here has a whitespace-separated text form (`Display` +
//! `FromStr`) used as a frame payload. Names are single tokens and must stay
//! free of whitespace and frame delimiters.

use std::collections::VecDeque;
use std::fmt;
use std::str::{FromStr, SplitWhitespace};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseWorldError {
    #[error("missing field `{0}`")]
    MissingField(&'static str),
    #[error("invalid value `{value}` for field `{field}`")]
    InvalidField { field: &'static str, value: String },
    #[error("unexpected trailing data `{0}`")]
    TrailingData(String),
}

/// Reads typed fields off a whitespace-separated record
struct Fields<'a> {
    inner: SplitWhitespace<'a>,
}

impl<'a> Fields<'a> {
    fn new(s: &'a str) -> Self {
        Self {
            inner: s.split_whitespace(),
        }
    }

    fn text(&mut self, field: &'static str) -> Result<&'a str, ParseWorldError> {
        self.inner.next().ok_or(ParseWorldError::MissingField(field))
    }

    fn parse<T: FromStr>(&mut self, field: &'static str) -> Result<T, ParseWorldError> {
        let value = self.text(field)?;
        value.parse().map_err(|_| ParseWorldError::InvalidField {
            field,
            value: value.to_string(),
        })
    }

    fn finish(mut self) -> Result<(), ParseWorldError> {
        match self.inner.next() {
            Some(extra) => Err(ParseWorldError::TrailingData(extra.to_string())),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Position {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn distance_to(&self, other: &Position) -> f64 {
        let (dx, dy, dz) = (other.x - self.x, other.y - self.y, other.z - self.z);
        (dx * dx + dy * dy + dz * dz).sqrt()
    }

    /// The tile this position lies on
    pub fn tile(&self) -> (i32, i32) {
        (self.x.round() as i32, self.y.round() as i32)
    }
}

/// A player slot with its colour
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Seat {
    pub color: u32,
    pub faction: String,
}

impl fmt::Display for Seat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.color, self.faction)
    }
}

impl FromStr for Seat {
    type Err = ParseWorldError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut fields = Fields::new(s);
        let seat = Seat {
            color: fields.parse("color")?,
            faction: fields.text("faction")?.to_string(),
        };
        fields.finish()?;
        Ok(seat)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TileType {
    Dirt,
    Gold,
    Rock,
    Water,
    Lava,
    Claimed,
}

impl TileType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TileType::Dirt => "dirt",
            TileType::Gold => "gold",
            TileType::Rock => "rock",
            TileType::Water => "water",
            TileType::Lava => "lava",
            TileType::Claimed => "claimed",
        }
    }
}

impl FromStr for TileType {
    type Err = ParseWorldError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dirt" => Ok(TileType::Dirt),
            "gold" => Ok(TileType::Gold),
            "rock" => Ok(TileType::Rock),
            "water" => Ok(TileType::Water),
            "lava" => Ok(TileType::Lava),
            "claimed" => Ok(TileType::Claimed),
            other => Err(ParseWorldError::InvalidField {
                field: "type",
                value: other.to_string(),
            }),
        }
    }
}

/// One map cell. Fullness 0 is open floor, 1 is solid.
#[derive(Debug, Clone, PartialEq)]
pub struct Tile {
    pub x: i32,
    pub y: i32,
    pub kind: TileType,
    pub fullness: f64,
    pub color: u32,
}

impl Tile {
    pub fn new(x: i32, y: i32, kind: TileType, fullness: f64) -> Self {
        Self {
            x,
            y,
            kind,
            fullness,
            color: 0,
        }
    }

    pub fn is_passable(&self) -> bool {
        self.fullness <= 0.0 && !matches!(self.kind, TileType::Water | TileType::Lava)
    }
}

impl fmt::Display for Tile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {}",
            self.x,
            self.y,
            self.kind.as_str(),
            self.fullness,
            self.color
        )
    }
}

impl FromStr for Tile {
    type Err = ParseWorldError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut fields = Fields::new(s);
        let tile = Tile {
            x: fields.parse("x")?,
            y: fields.parse("y")?,
            kind: fields.parse("type")?,
            fullness: fields.parse("fullness")?,
            color: fields.parse("color")?,
        };
        fields.finish()?;
        Ok(tile)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MapLight {
    pub name: String,
    pub position: Position,
    pub diffuse: [f64; 3],
}

impl fmt::Display for MapLight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [r, g, b] = self.diffuse;
        write!(
            f,
            "{} {} {} {} {} {} {}",
            self.name, self.position.x, self.position.y, self.position.z, r, g, b
        )
    }
}

impl FromStr for MapLight {
    type Err = ParseWorldError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut fields = Fields::new(s);
        let light = MapLight {
            name: fields.text("name")?.to_string(),
            position: Position::new(fields.parse("x")?, fields.parse("y")?, fields.parse("z")?),
            diffuse: [fields.parse("r")?, fields.parse("g")?, fields.parse("b")?],
        };
        fields.finish()?;
        Ok(light)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomType {
    DungeonTemple,
    Quarters,
    Treasury,
    Portal,
}

impl RoomType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoomType::DungeonTemple => "DungeonTemple",
            RoomType::Quarters => "Quarters",
            RoomType::Treasury => "Treasury",
            RoomType::Portal => "Portal",
        }
    }
}

impl FromStr for RoomType {
    type Err = ParseWorldError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DungeonTemple" => Ok(RoomType::DungeonTemple),
            "Quarters" => Ok(RoomType::Quarters),
            "Treasury" => Ok(RoomType::Treasury),
            "Portal" => Ok(RoomType::Portal),
            other => Err(ParseWorldError::InvalidField {
                field: "room type",
                value: other.to_string(),
            }),
        }
    }
}

/// A room and the tiles it covers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Room {
    pub name: String,
    pub kind: RoomType,
    pub color: u32,
    pub tiles: Vec<(i32, i32)>,
}

impl fmt::Display for Room {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {}",
            self.name,
            self.kind.as_str(),
            self.color,
            self.tiles.len()
        )?;
        for (x, y) in &self.tiles {
            write!(f, " {} {}", x, y)?;
        }
        Ok(())
    }
}

impl FromStr for Room {
    type Err = ParseWorldError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut fields = Fields::new(s);
        let name = fields.text("name")?.to_string();
        let kind = fields.parse("room type")?;
        let color = fields.parse("color")?;
        let count: usize = fields.parse("tile count")?;
        let mut tiles = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            tiles.push((fields.parse("tile x")?, fields.parse("tile y")?));
        }
        fields.finish()?;
        Ok(Room {
            name,
            kind,
            color,
            tiles,
        })
    }
}

/// Template shared by every creature of one kind
#[derive(Debug, Clone, PartialEq)]
pub struct CreatureClass {
    pub name: String,
    pub max_hp: f64,
    pub dig_rate: f64,
    pub move_speed: f64,
}

impl fmt::Display for CreatureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {}",
            self.name, self.max_hp, self.dig_rate, self.move_speed
        )
    }
}

impl FromStr for CreatureClass {
    type Err = ParseWorldError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut fields = Fields::new(s);
        let class = CreatureClass {
            name: fields.text("name")?.to_string(),
            max_hp: fields.parse("hp")?,
            dig_rate: fields.parse("dig rate")?,
            move_speed: fields.parse("move speed")?,
        };
        fields.finish()?;
        Ok(class)
    }
}

pub const IDLE_ANIMATION: &str = "Idle";
pub const WALK_ANIMATION: &str = "Walk";
pub const DIG_ANIMATION: &str = "Dig";

/// A live entity
///
/// Only identity, class, position, colour and hit points travel in the
/// `addcreature` payload; the walk queue and animation are replayed through
/// notifications.
#[derive(Debug, Clone, PartialEq)]
pub struct Creature {
    pub name: String,
    pub class_name: String,
    pub position: Position,
    pub color: u32,
    pub hp: f64,
    pub destinations: VecDeque<Position>,
    pub animation: String,
}

impl Creature {
    pub fn new(name: impl Into<String>, class: &CreatureClass, position: Position, color: u32) -> Self {
        Self {
            name: name.into(),
            class_name: class.name.clone(),
            position,
            color,
            hp: class.max_hp,
            destinations: VecDeque::new(),
            animation: IDLE_ANIMATION.to_string(),
        }
    }

    pub fn is_alive(&self) -> bool {
        self.hp > 0.0
    }
}

impl fmt::Display for Creature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {} {} {}",
            self.class_name,
            self.name,
            self.position.x,
            self.position.y,
            self.position.z,
            self.color,
            self.hp
        )
    }
}

impl FromStr for Creature {
    type Err = ParseWorldError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut fields = Fields::new(s);
        let class_name = fields.text("class")?.to_string();
        let name = fields.text("name")?.to_string();
        let position = Position::new(fields.parse("x")?, fields.parse("y")?, fields.parse("z")?);
        let color = fields.parse("color")?;
        let hp = fields.parse("hp")?;
        fields.finish()?;
        Ok(Creature {
            name,
            class_name,
            position,
            color,
            hp,
            destinations: VecDeque::new(),
            animation: IDLE_ANIMATION.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn imp_class() -> CreatureClass {
        CreatureClass {
            name: "Imp".to_string(),
            max_hp: 20.0,
            dig_rate: 0.3,
            move_speed: 1.5,
        }
    }

    #[test]
    fn test_tile_text_form() {
        let mut tile = Tile::new(3, 4, TileType::Claimed, 0.0);
        tile.color = 2;
        assert_eq!(tile.to_string(), "3 4 claimed 0 2");

        let parsed: Tile = "3 4 claimed 0 2".parse().unwrap();
        assert_eq!(parsed, tile);
    }

    #[test]
    fn test_tile_parse_errors() {
        assert_eq!(
            "3 4".parse::<Tile>(),
            Err(ParseWorldError::MissingField("type"))
        );
        assert!(matches!(
            "3 4 marble 1 0".parse::<Tile>(),
            Err(ParseWorldError::InvalidField { field: "type", .. })
        ));
        assert!(matches!(
            "3 4 dirt 1 0 extra".parse::<Tile>(),
            Err(ParseWorldError::TrailingData(_))
        ));
    }

    #[test]
    fn test_tile_passability() {
        assert!(Tile::new(0, 0, TileType::Dirt, 0.0).is_passable());
        assert!(!Tile::new(0, 0, TileType::Dirt, 0.5).is_passable());
        assert!(!Tile::new(0, 0, TileType::Lava, 0.0).is_passable());
    }

    #[test]
    fn test_light_text_form() {
        let light = MapLight {
            name: "Light_1".to_string(),
            position: Position::new(2.0, 3.5, 4.0),
            diffuse: [0.6, 0.4, 0.2],
        };
        let parsed: MapLight = light.to_string().parse().unwrap();
        assert_eq!(parsed.name, "Light_1");
        assert_approx_eq!(parsed.position.y, 3.5);
        assert_approx_eq!(parsed.diffuse[2], 0.2);
    }

    #[test]
    fn test_room_text_form() {
        let room = Room {
            name: "Room_1".to_string(),
            kind: RoomType::DungeonTemple,
            color: 1,
            tiles: vec![(2, 2), (2, 3)],
        };
        assert_eq!(room.to_string(), "Room_1 DungeonTemple 1 2 2 2 2 3");
        assert_eq!(room.to_string().parse::<Room>().unwrap(), room);
    }

    #[test]
    fn test_room_with_short_tile_list() {
        assert_eq!(
            "Room_1 Quarters 1 2 5 5".parse::<Room>(),
            Err(ParseWorldError::MissingField("tile x"))
        );
    }

    #[test]
    fn test_creature_text_form() {
        let class = imp_class();
        let creature = Creature::new("Imp_1", &class, Position::new(4.0, 5.0, 0.0), 1);
        assert_eq!(creature.to_string(), "Imp Imp_1 4 5 0 1 20");

        let parsed: Creature = creature.to_string().parse().unwrap();
        assert_eq!(parsed, creature);
        assert!(parsed.is_alive());
    }

    #[test]
    fn test_class_text_form() {
        let class = imp_class();
        let parsed: CreatureClass = class.to_string().parse().unwrap();
        assert_eq!(parsed.name, "Imp");
        assert_approx_eq!(parsed.dig_rate, 0.3);
        assert_approx_eq!(parsed.move_speed, 1.5);
    }

    #[test]
    fn test_seat_text_form() {
        let seat = Seat {
            color: 3,
            faction: "Keeper".to_string(),
        };
        assert_eq!(seat.to_string(), "3 Keeper");
        assert_eq!("3 Keeper".parse::<Seat>().unwrap(), seat);
    }

    #[test]
    fn test_position_helpers() {
        let a = Position::new(0.0, 0.0, 0.0);
        let b = Position::new(3.0, 4.0, 0.0);
        assert_approx_eq!(a.distance_to(&b), 5.0);
        assert_eq!(Position::new(2.4, 2.6, 0.0).tile(), (2, 3));
    }
}
