//! Fixed-rate simulation loop
//!
//! One iteration is one turn: advance the clock, announce the turn, let every
//! creature act, then sleep out whatever is left of the turn budget. A late
//! turn is logged and the next one starts immediately; the loop never runs
//! extra turns to catch up.

use crate::behavior::CreatureBehavior;
use crate::config::ServerConfig;
use crate::notification::{NotificationSender, QueueClosed};
use crate::turn_clock::TurnClock;
use crate::world::World;
use log::{debug, info, warn};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, RwLock};

/// Shared stop request, observed by the loop between turns
#[derive(Debug, Clone)]
pub struct StopFlag {
    tx: Arc<watch::Sender<bool>>,
}

impl StopFlag {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn request_stop(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once a stop has been requested
    pub async fn stopped(&self) {
        let mut rx = self.tx.subscribe();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

impl Default for StopFlag {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TurnTiming {
    pub turn: u64,
    pub elapsed: Duration,
    pub budget: Duration,
}

impl TurnTiming {
    pub fn is_late(&self) -> bool {
        self.elapsed > self.budget
    }

    /// Time left in the budget, zero for a late turn
    pub fn remaining(&self) -> Duration {
        self.budget.saturating_sub(self.elapsed)
    }
}

pub struct SimulationLoop {
    world: Arc<RwLock<World>>,
    notifier: NotificationSender,
    behavior: Box<dyn CreatureBehavior>,
    stop: StopFlag,
    timings: VecDeque<TurnTiming>,
    timing_history: usize,
    backlog_warning: usize,
}

impl SimulationLoop {
    pub fn new(
        world: Arc<RwLock<World>>,
        notifier: NotificationSender,
        behavior: Box<dyn CreatureBehavior>,
        stop: StopFlag,
        config: &ServerConfig,
    ) -> Self {
        Self {
            world,
            notifier,
            behavior,
            stop,
            timings: VecDeque::with_capacity(config.timing_history + 1),
            timing_history: config.timing_history,
            backlog_warning: config.backlog_warning,
        }
    }

    fn clock(&self) -> &Arc<TurnClock> {
        self.notifier.clock()
    }

    /// Recent turn timings, oldest first
    pub fn timings(&self) -> impl Iterator<Item = &TurnTiming> {
        self.timings.iter()
    }

    /// Runs exactly one turn without sleeping
    pub async fn step(&mut self) -> Result<TurnTiming, QueueClosed> {
        let start = Instant::now();

        let (turn, budget) = {
            let mut world = self.world.write().await;
            let turn = self.notifier.start_turn()?;
            for kind in world.do_turn(turn, self.behavior.as_mut()) {
                self.notifier.enqueue_at(turn, kind)?;
            }
            (turn, Duration::from_secs_f64(1.0 / world.turns_per_second()))
        };

        let timing = TurnTiming {
            turn,
            elapsed: start.elapsed(),
            budget,
        };
        self.record(timing);
        Ok(timing)
    }

    /// Keeps the last `timing_history` samples, dropping older ones only
    /// once nothing raised in their turn awaits dispatch
    fn record(&mut self, timing: TurnTiming) {
        self.timings.push_back(timing);
        while self.timings.len() > self.timing_history {
            match self.timings.front() {
                Some(oldest) if self.clock().is_drained_through(oldest.turn) => {
                    self.timings.pop_front();
                }
                _ => break,
            }
        }
    }

    /// Runs turns until a stop is requested
    ///
    /// Fails only when the dispatcher has gone away.
    pub async fn run(mut self) -> Result<(), QueueClosed> {
        info!("Simulation loop started");

        while !self.stop.is_stopped() {
            let timing = self.step().await?;

            if timing.is_late() {
                warn!(
                    "Turn {} ran late by {} µs",
                    timing.turn,
                    (timing.elapsed - timing.budget).as_micros()
                );
                continue;
            }
            debug!(
                "Turn {} finished early by {} µs",
                timing.turn,
                timing.remaining().as_micros()
            );

            let mut sleep = timing.remaining();
            let backlog = self.clock().backlog();
            if backlog > self.backlog_warning {
                warn!(
                    "Dispatch backlog at {} notifications, oldest from turn {:?}",
                    backlog,
                    self.clock().oldest_pending_turn()
                );
                sleep += timing.budget / 2;
            }

            tokio::select! {
                _ = tokio::time::sleep(sleep) => {}
                _ = self.stop.stopped() => {}
            }
        }

        info!("Simulation loop stopped at turn {}", self.clock().current_turn());
        Ok(())
    }
}
