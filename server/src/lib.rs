//! # Dungeon Sync Server Library
//!
//! Authoritative server for a turn-based multiplayer dungeon game. It owns the
//! canonical world, advances it at a fixed number of turns per second and
//! keeps every connected client in step by broadcasting each change as a
//! text frame of the form `<command:arguments>`.
//!
//! ## Core Responsibilities
//!
//! ### Authoritative Simulation
//! The simulation loop advances a shared turn counter, announces the turn with
//! `newturn:N` and then lets every live creature act. Creatures never talk to
//! the network; whatever they change comes back as notifications.
//!
//! ### Client Lifecycle
//! Each accepted TCP stream gets its own handler task, which:
//! - Runs the join handshake (`hello`, `picknick`, `setnick`)
//! - Streams a full world snapshot, waiting for `ok` after every frame
//! - Applies chat, pick-up, drop and mark-tile requests to the shared world
//! - Frees the player's seat when the peer goes away
//!
//! ### Event Broadcasting
//! Every state change is raised into a single notification queue and sent to
//! all clients by one dispatcher task, so each client observes the same
//! events in the same order.
//!
//! ## Architecture Design
//!
//! ### Turn Accounting
//! Every queued notification is counted against the turn it was raised in
//! until the dispatcher has delivered it. The simulation uses these counts to
//! tell how far delivery lags behind.
//!
//! ### Failure Isolation
//! The dispatcher never writes to a socket itself. It pushes frames into a
//! bounded per-connection outbox and a writer task drains it; a peer whose
//! outbox overflows or closes is dropped without delaying anybody else.
//!
//! ### Fatal Protocol Errors
//! An unknown command from any client ends the whole session: the error is
//! funnelled back to [`network::Server::run`], which stops the simulation,
//! flushes what is queued and returns it.
//!
//! ## Module Organization
//!
//! - [`turn_clock`]: current turn and per-turn pending counts
//! - [`notification`]: notification kinds and the queue between producers and dispatcher
//! - [`simulation`]: fixed-rate turn loop and stop flag
//! - [`dispatcher`]: queue consumer that broadcasts frames
//! - [`connection`]: one client stream with its send guard and outbox
//! - [`client_manager`]: the broadcast set
//! - [`handler`]: handshake and request loop for one client
//! - [`world`] and [`behavior`]: game state, rules and creature logic
//! - [`network`]: listener, task wiring and [`network::ServerHandle`]
//! - [`config`], [`chat`], [`error`]
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use dungeon_server::config::ServerConfig;
//! use dungeon_server::network::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig {
//!         turns_per_second: 2.0,
//!         ..ServerConfig::default()
//!     };
//!     let server = Server::bind(config).await?;
//!     let handle = server.handle();
//!
//!     tokio::spawn(async move {
//!         tokio::signal::ctrl_c().await.ok();
//!         handle.stop();
//!     });
//!
//!     // Returns early with the first fatal protocol error.
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod behavior;
pub mod chat;
pub mod client_manager;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod network;
pub mod notification;
pub mod simulation;
pub mod turn_clock;
pub mod world;
