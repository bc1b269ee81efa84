//! # World Streaming Server Library
//!
//! Authoritative server for the tile-based multiplayer world. It owns the
//! canonical simulation, validates client-reported movement, and streams each
//! player the slice of the world around them.
//!
//! ## Core Responsibilities
//!
//! ### Authoritative Simulation
//! The server runs the definitive version of every layer: terrain cells,
//! player objects, NPCs and items. Clients predict locally but always conform
//! to the server's state, delivered as per-player snapshots.
//!
//! ### World Streaming
//! Terrain is partitioned into fixed-size chunks loaded on demand. Each
//! player observes the chunk window around their position; windows are diffed
//! per snapshot so a client only ever receives chunks entering its view,
//! coordinates leaving it, and individual cell edits in between. Chunks no
//! observer covers are persisted and evicted by a background sweep.
//!
//! ### Input Validation and Reconciliation
//! Clients report displacements, not positions. Each report is bounded by the
//! movement speed and the elapsed time it claims; violations are clamped and
//! answered with a one-time authoritative correction the client must apply
//! exactly once.
//!
//! ## Module Organization
//!
//! - [`world`]: chunk storage, terrain generation and disk persistence
//! - [`entity_index`]: simulated objects and spatial queries
//! - [`streamer`]: per-observer window diffing and the unload sweep
//! - [`game`]: the simulation context, tick advancement and input validation
//! - [`snapshot`]: per-player snapshot composition
//! - [`client_manager`]: connection lifecycle, input queues, correction queues
//! - [`network`]: UDP transport and the main server loop
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::network::Server;
//! use std::path::Path;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut server = Server::new(
//!         "127.0.0.1:8080",
//!         Duration::from_millis(50), // 20Hz simulation
//!         32,
//!         Path::new("world_data"),
//!         42,
//!     ).await?;
//!
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod client_manager;
pub mod entity_index;
pub mod game;
pub mod network;
pub mod snapshot;
pub mod streamer;
pub mod world;
