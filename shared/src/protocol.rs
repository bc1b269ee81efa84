//! Wire protocol between the authoritative server and its clients.
//!
//! Snapshots are self-contained: a lost datagram costs one update, never
//! consistency, so the transport needs no application-level retransmission.

use crate::cell::{CellUpdate, ChunkPayload};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum Packet {
    Connect {
        client_version: u32,
        username: String,
    },
    /// Client-reported displacement for one input tick, throttled to a fixed
    /// rate independent of the client's render rate.
    Input {
        sequence: u32,
        timestamp: u64,
        dir: f32,
        dx: f32,
        dy: f32,
        last_snapshot_ack: u32,
    },
    Disconnect,

    Connected {
        client_id: u32,
        object_id: u64,
        layer: i32,
        x: f32,
        y: f32,
    },
    Snapshot(Box<Snapshot>),
    Disconnected {
        reason: String,
    },
}

/// One timestamped state bundle, built per connected player per send tick.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Snapshot {
    /// Server clock in unix milliseconds, stamped at composition time.
    pub t: u64,
    pub tick: u32,
    /// Highest input sequence the server has applied for this player.
    pub last_processed_input: u32,
    pub me: PlayerState,
    /// One-time corrections, drained from the server queue on send.
    pub corrections: Vec<Correction>,
    pub others: Vec<PlayerState>,
    pub entities: Vec<EntityState>,
    pub world: WorldLoad,
}

/// Chunk window transitions for one player for one tick.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct WorldLoad {
    pub load_chunks: Vec<ChunkPayload>,
    pub unload_chunks: Vec<(i32, i32)>,
    pub updated_cells: Vec<CellUpdate>,
}

impl WorldLoad {
    pub fn is_empty(&self) -> bool {
        self.load_chunks.is_empty() && self.unload_chunks.is_empty() && self.updated_cells.is_empty()
    }
}

/// Fields that interpolate between snapshots (or are taken from an endpoint,
/// for the non-scalar `falling`).
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct DynamicState {
    pub x: f32,
    pub y: f32,
    /// Heading in radians, in (-pi, pi].
    pub dir: f32,
    pub scale: f32,
    pub health: f32,
    pub falling: bool,
}

impl Default for DynamicState {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            dir: 0.0,
            scale: 1.0,
            health: 100.0,
            falling: false,
        }
    }
}

/// Static identity plus dynamic state for one player.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PlayerState {
    pub id: u32,
    pub username: String,
    pub color: u32,
    pub dynamic: DynamicState,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Npc { asset: u16 },
    Item { item: u16 },
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct EntityState {
    pub id: u64,
    pub kind: EntityKind,
    pub dynamic: DynamicState,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum PlayerMode {
    Normal,
    Ghost,
    Spectator,
}

/// Authoritative one-time correction. Each carries a per-connection monotone
/// sequence number; the client keeps an applied-watermark so a duplicated
/// delivery is a no-op.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum Correction {
    SetPosition { seq: u64, x: f32, y: f32 },
    Push { seq: u64, dx: f32, dy: f32 },
    SetColor { seq: u64, color: u32 },
    SetMode { seq: u64, mode: PlayerMode },
}

impl Correction {
    pub fn seq(&self) -> u64 {
        match self {
            Correction::SetPosition { seq, .. }
            | Correction::Push { seq, .. }
            | Correction::SetColor { seq, .. }
            | Correction::SetMode { seq, .. } => *seq,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::Cell;
    use crate::CHUNK_SIZE;

    fn sample_snapshot() -> Snapshot {
        Snapshot {
            t: 123_456_789,
            tick: 42,
            last_processed_input: 17,
            me: PlayerState {
                id: 1,
                username: "ada".to_string(),
                color: 0x00ff_ccaa,
                dynamic: DynamicState {
                    x: 10.5,
                    y: -3.25,
                    dir: 1.5,
                    ..DynamicState::default()
                },
            },
            corrections: vec![Correction::Push {
                seq: 3,
                dx: -1.0,
                dy: 0.5,
            }],
            others: vec![],
            entities: vec![EntityState {
                id: 900,
                kind: EntityKind::Item { item: 12 },
                dynamic: DynamicState::default(),
            }],
            world: WorldLoad {
                load_chunks: vec![ChunkPayload {
                    cx: 0,
                    cy: 0,
                    cells: vec![Cell::default(); CHUNK_SIZE * CHUNK_SIZE],
                }],
                unload_chunks: vec![(-1, 0)],
                updated_cells: vec![CellUpdate {
                    x: 5,
                    y: 5,
                    cell: Cell {
                        block: Some(7),
                        floor: Some(1),
                        ceiling: None,
                    },
                }],
            },
        }
    }

    #[test]
    fn test_packet_serialization_connect() {
        let packet = Packet::Connect {
            client_version: 1,
            username: "ada".to_string(),
        };
        let serialized = bincode::serialize(&packet).unwrap();
        let deserialized: Packet = bincode::deserialize(&serialized).unwrap();

        match deserialized {
            Packet::Connect {
                client_version,
                username,
            } => {
                assert_eq!(client_version, 1);
                assert_eq!(username, "ada");
            }
            _ => panic!("Wrong packet type after deserialization"),
        }
    }

    #[test]
    fn test_packet_serialization_input() {
        let packet = Packet::Input {
            sequence: 123,
            timestamp: 456_789,
            dir: -2.5,
            dx: 0.4,
            dy: -0.1,
            last_snapshot_ack: 40,
        };

        let serialized = bincode::serialize(&packet).unwrap();
        let deserialized: Packet = bincode::deserialize(&serialized).unwrap();

        match deserialized {
            Packet::Input {
                sequence,
                timestamp,
                dir,
                dx,
                dy,
                last_snapshot_ack,
            } => {
                assert_eq!(sequence, 123);
                assert_eq!(timestamp, 456_789);
                assert_eq!(dir, -2.5);
                assert_eq!(dx, 0.4);
                assert_eq!(dy, -0.1);
                assert_eq!(last_snapshot_ack, 40);
            }
            _ => panic!("Wrong packet type after deserialization"),
        }
    }

    #[test]
    fn test_snapshot_serialization_roundtrip() {
        let snapshot = sample_snapshot();
        let packet = Packet::Snapshot(Box::new(snapshot.clone()));

        let serialized = bincode::serialize(&packet).unwrap();
        let deserialized: Packet = bincode::deserialize(&serialized).unwrap();

        match deserialized {
            Packet::Snapshot(got) => assert_eq!(*got, snapshot),
            _ => panic!("Wrong packet type after deserialization"),
        }
    }

    #[test]
    fn test_correction_seq_accessor() {
        assert_eq!(Correction::SetPosition { seq: 9, x: 0.0, y: 0.0 }.seq(), 9);
        assert_eq!(Correction::Push { seq: 10, dx: 0.0, dy: 0.0 }.seq(), 10);
        assert_eq!(Correction::SetColor { seq: 11, color: 0 }.seq(), 11);
        assert_eq!(
            Correction::SetMode {
                seq: 12,
                mode: PlayerMode::Ghost
            }
            .seq(),
            12
        );
    }

    #[test]
    fn test_world_load_is_empty() {
        assert!(WorldLoad::default().is_empty());
        let load = WorldLoad {
            unload_chunks: vec![(0, 0)],
            ..WorldLoad::default()
        };
        assert!(!load.is_empty());
    }
}
