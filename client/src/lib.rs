//! # World Streaming Client Library
//!
//! Headless client for the tile-based multiplayer world. It predicts its own
//! movement immediately, reconciles against authoritative snapshots, and
//! plays back everything else on a delayed timeline so remote motion stays
//! smooth across lost or reordered datagrams.
//!
//! ## Module Organization
//!
//! - [`buffer`]: delayed playback buffering with a fixed server clock offset
//! - [`interpolate`]: blending between buffered samples, shortest-arc headings
//! - [`world`]: the streamed chunk mirror
//! - [`game`]: prediction, reconciliation, correction handling
//! - [`input`]: sequenced fixed-rate input generation
//! - [`network`]: UDP transport and the client loop

pub mod buffer;
pub mod game;
pub mod input;
pub mod interpolate;
pub mod network;
pub mod world;
