//! Per-creature turn logic
//!
//! The simulation hands every live creature to a [`CreatureBehavior`] once
//! per turn. Behaviours see the rest of the world through a [`TurnContext`]
//! and raise notifications through it; they never talk to the network.

use crate::notification::NotificationKind;
use crate::world::World;
use dungeon_shared::world::{DIG_ANIMATION, IDLE_ANIMATION, WALK_ANIMATION};
use dungeon_shared::{Creature, Position, TileType};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const NEIGHBOURS: [(i32, i32); 4] = [(0, -1), (1, 0), (0, 1), (-1, 0)];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    Keep,
    /// Leave the live set once the current turn is over
    Remove,
}

pub struct TurnContext<'a> {
    turn: u64,
    world: &'a mut World,
    events: &'a mut Vec<NotificationKind>,
}

impl<'a> TurnContext<'a> {
    pub fn new(turn: u64, world: &'a mut World, events: &'a mut Vec<NotificationKind>) -> Self {
        Self {
            turn,
            world,
            events,
        }
    }

    pub fn turn(&self) -> u64 {
        self.turn
    }

    /// The world without the creature whose turn it is
    pub fn world(&self) -> &World {
        &*self.world
    }

    pub fn world_mut(&mut self) -> &mut World {
        &mut *self.world
    }

    pub fn raise(&mut self, kind: NotificationKind) {
        self.events.push(kind);
    }
}

pub trait CreatureBehavior: Send {
    fn do_turn(&mut self, creature: &mut Creature, context: &mut TurnContext<'_>) -> TurnOutcome;
}

/// Walks creatures around at random and digs tiles their keeper marked
pub struct WanderBehavior {
    rng: StdRng,
    wander_chance: f64,
}

impl WanderBehavior {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            wander_chance: 0.5,
        }
    }

    pub fn with_wander_chance(mut self, chance: f64) -> Self {
        self.wander_chance = chance.clamp(0.0, 1.0);
        self
    }

    fn neighbours(creature: &Creature) -> impl Iterator<Item = (i32, i32)> {
        let (x, y) = creature.position.tile();
        NEIGHBOURS.iter().map(move |(dx, dy)| (x + dx, y + dy))
    }

    fn marked_neighbour(creature: &Creature, world: &World) -> Option<(i32, i32)> {
        Self::neighbours(creature).find(|&(x, y)| {
            world.is_marked_for(creature.color, x, y)
                && world.tile(x, y).is_some_and(|tile| {
                    matches!(tile.kind, TileType::Dirt | TileType::Gold) && tile.fullness > 0.0
                })
        })
    }
}

impl CreatureBehavior for WanderBehavior {
    fn do_turn(&mut self, creature: &mut Creature, context: &mut TurnContext<'_>) -> TurnOutcome {
        if !creature.is_alive() {
            return TurnOutcome::Remove;
        }
        let Some(class) = context.world().class(&creature.class_name).cloned() else {
            return TurnOutcome::Keep;
        };

        if let Some(target) = creature.destinations.front().copied() {
            step_toward(creature, target, class.move_speed);
            if creature.destinations.is_empty() {
                set_animation(creature, context, IDLE_ANIMATION);
            }
            return TurnOutcome::Keep;
        }

        if class.dig_rate > 0.0 {
            if let Some((x, y)) = Self::marked_neighbour(creature, context.world()) {
                if let Some(fullness) = context.world_mut().dig_tile(x, y, class.dig_rate) {
                    set_animation(creature, context, DIG_ANIMATION);
                    context.raise(NotificationKind::TileFullness { fullness, x, y });
                    return TurnOutcome::Keep;
                }
            }
        }

        if self.rng.gen_bool(self.wander_chance) {
            let open: Vec<(i32, i32)> = Self::neighbours(creature)
                .filter(|&(x, y)| context.world().tile(x, y).is_some_and(|t| t.is_passable()))
                .collect();
            if !open.is_empty() {
                let (x, y) = open[self.rng.gen_range(0..open.len())];
                let target = Position::new(x as f64, y as f64, creature.position.z);
                creature.destinations.push_back(target);
                context.raise(NotificationKind::AddDestination {
                    entity: creature.name.clone(),
                    position: target,
                });
                set_animation(creature, context, WALK_ANIMATION);
                return TurnOutcome::Keep;
            }
        }

        set_animation(creature, context, IDLE_ANIMATION);
        TurnOutcome::Keep
    }
}

/// Moves up to `speed` tiles toward `target`, popping it once reached
fn step_toward(creature: &mut Creature, target: Position, speed: f64) {
    let distance = creature.position.distance_to(&target);
    if distance <= speed {
        creature.position = target;
        creature.destinations.pop_front();
        return;
    }
    let t = speed / distance;
    let from = creature.position;
    creature.position = Position::new(
        from.x + (target.x - from.x) * t,
        from.y + (target.y - from.y) * t,
        from.z + (target.z - from.z) * t,
    );
}

fn set_animation(creature: &mut Creature, context: &mut TurnContext<'_>, state: &str) {
    if creature.animation == state {
        return;
    }
    creature.animation = state.to_string();
    context.raise(NotificationKind::AnimationState {
        entity: creature.name.clone(),
        state: state.to_string(),
        looping: true,
    });
}
