//! # Dungeon Sync Client Library
//!
//! Headless client for the dungeon sync server. It joins a session, keeps a
//! local mirror of the world built purely from server frames, and can send
//! chat, pick-up, drop and mark-tile requests on behalf of its player.
//!
//! ## Module Organization
//!
//! ### Network Module (`network`)
//! Handles the TCP stream and the join handshake:
//! - `hello`, then `setnick` once the server asks with `picknick`
//! - Acknowledges every snapshot frame with `ok:` as it is read
//! - Reports a refused join with the server's reason
//!
//! ### Game Module (`game`)
//! The `ClientWorld` mirror: tiles, lights, rooms, creature classes, live
//! creatures, players' hands and the chat log, updated message by message.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use dungeon_client::network::Client;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut client = Client::connect("127.0.0.1:31222", "alice").await?;
//!
//!     // The snapshot is acknowledged while we wait.
//!     client.wait_for_turn(1).await?;
//!     client.chat("hello everyone").await?;
//!
//!     while let Some(message) = client.next_message().await? {
//!         println!("{:?}", message);
//!     }
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod game;
pub mod network;
