//! Outbound state-change events and the queue that carries them
//!
//! Any task that mutates the world raises a [`Notification`] through a
//! cloneable [`NotificationSender`]; the dispatcher owns the single
//! [`NotificationReceiver`]. Raising an event counts it as pending for its
//! turn on the shared [`TurnClock`] before it becomes visible to the
//! consumer, so the clock can never observe an in-flight event as drained.
//!
//! Stamping an event with the current turn and starting a new turn share one
//! lock, so every event of turn N is queued after `newturn:N`.

use crate::turn_clock::{TurnClock, TurnClockError};
use dungeon_shared::{MapLight, Position, ServerMessage};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("notification queue is closed")]
pub struct QueueClosed;

/// Every kind of event the dispatcher knows how to deliver
#[derive(Debug, Clone, PartialEq)]
pub enum NotificationKind {
    TurnStarted,
    AddDestination { entity: String, position: Position },
    ClearDestinations { entity: String },
    CreaturePickUp { player: String, creature: String },
    CreatureDrop { player: String, x: i32, y: i32 },
    AnimationState { entity: String, state: String, looping: bool },
    TurnsPerSecond { rate: f64 },
    TileFullness { fullness: f64, x: i32, y: i32 },
    AddMapLight(MapLight),
    RemoveMapLight { name: String },
    Chat { nick: String, message: String },
    /// Tells the dispatcher to stop after everything queued before it
    Shutdown,
}

/// An immutable event stamped with the turn it was raised in
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub turn: u64,
    pub kind: NotificationKind,
}

impl Notification {
    /// The frame to broadcast, or `None` for control events
    pub fn to_message(&self) -> Option<ServerMessage> {
        let message = match &self.kind {
            NotificationKind::TurnStarted => ServerMessage::NewTurn(self.turn),
            NotificationKind::AddDestination { entity, position } => {
                ServerMessage::AddDestination {
                    entity: entity.clone(),
                    position: *position,
                }
            }
            NotificationKind::ClearDestinations { entity } => ServerMessage::ClearDestinations {
                entity: entity.clone(),
            },
            NotificationKind::CreaturePickUp { player, creature } => {
                ServerMessage::CreaturePickUp {
                    player: player.clone(),
                    creature: creature.clone(),
                }
            }
            NotificationKind::CreatureDrop { player, x, y } => ServerMessage::CreatureDrop {
                player: player.clone(),
                x: *x,
                y: *y,
            },
            NotificationKind::AnimationState {
                entity,
                state,
                looping,
            } => ServerMessage::AnimationState {
                entity: entity.clone(),
                state: state.clone(),
                looping: *looping,
            },
            NotificationKind::TurnsPerSecond { rate } => ServerMessage::TurnsPerSecond(*rate),
            NotificationKind::TileFullness { fullness, x, y } => ServerMessage::TileFullness {
                fullness: *fullness,
                x: *x,
                y: *y,
            },
            NotificationKind::AddMapLight(light) => ServerMessage::AddMapLight(light.clone()),
            NotificationKind::RemoveMapLight { name } => {
                ServerMessage::RemoveMapLight { name: name.clone() }
            }
            NotificationKind::Chat { nick, message } => ServerMessage::Chat {
                nick: nick.clone(),
                message: message.clone(),
            },
            NotificationKind::Shutdown => return None,
        };
        Some(message)
    }
}

/// Creates a queue whose pending counts live on `clock`
pub fn notification_queue(clock: Arc<TurnClock>) -> (NotificationSender, NotificationReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        NotificationSender {
            tx,
            clock: Arc::clone(&clock),
            stamp: Arc::new(Mutex::new(())),
        },
        NotificationReceiver { rx, clock },
    )
}

/// Producer side; clone one per task
#[derive(Debug, Clone)]
pub struct NotificationSender {
    tx: mpsc::UnboundedSender<Notification>,
    clock: Arc<TurnClock>,
    stamp: Arc<Mutex<()>>,
}

impl NotificationSender {
    /// Raises `kind` in the current turn and returns that turn
    pub fn enqueue(&self, kind: NotificationKind) -> Result<u64, QueueClosed> {
        let _stamp = self.lock_stamp();
        let turn = self.clock.current_turn();
        self.enqueue_at(turn, kind)?;
        Ok(turn)
    }

    /// Advances the clock and queues the new turn's `TurnStarted` as one step.
    /// Only the simulation loop calls this.
    pub fn start_turn(&self) -> Result<u64, QueueClosed> {
        let _stamp = self.lock_stamp();
        let turn = self.clock.advance();
        self.enqueue_at(turn, NotificationKind::TurnStarted)?;
        Ok(turn)
    }

    /// Raises `kind` stamped with an explicit turn
    pub fn enqueue_at(&self, turn: u64, kind: NotificationKind) -> Result<(), QueueClosed> {
        self.clock.register_pending(turn);
        if self.tx.send(Notification { turn, kind }).is_err() {
            // The event never reached a consumer, so it must not stay counted.
            let _ = self.clock.release_pending(turn);
            return Err(QueueClosed);
        }
        Ok(())
    }

    pub fn clock(&self) -> &Arc<TurnClock> {
        &self.clock
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    fn lock_stamp(&self) -> MutexGuard<'_, ()> {
        // The guarded section cannot leave anything half-written.
        self.stamp.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// The single consumer side
#[derive(Debug)]
pub struct NotificationReceiver {
    rx: mpsc::UnboundedReceiver<Notification>,
    clock: Arc<TurnClock>,
}

impl NotificationReceiver {
    /// Waits for the next event; `None` once every sender is gone
    pub async fn dequeue(&mut self) -> Option<Notification> {
        self.rx.recv().await
    }

    pub fn try_dequeue(&mut self) -> Option<Notification> {
        self.rx.try_recv().ok()
    }

    /// Marks a dequeued event as dispatched
    pub fn release(&self, notification: &Notification) -> Result<usize, TurnClockError> {
        self.clock.release_pending(notification.turn)
    }

    pub fn clock(&self) -> &Arc<TurnClock> {
        &self.clock
    }
}
