//! World cells and the chunk-shaped payloads that carry them on the wire.

use crate::CHUNK_SIZE;
use serde::{Deserialize, Serialize};

/// Smallest addressable world unit. Holds optional block/floor/ceiling
/// references into the (out-of-scope) definition tables.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct Cell {
    pub block: Option<u16>,
    pub floor: Option<u16>,
    pub ceiling: Option<u16>,
}

impl Cell {
    pub fn has_floor(&self) -> bool {
        self.floor.is_some()
    }
}

/// Full cell grid of one chunk, sent when a chunk enters a player's window.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ChunkPayload {
    pub cx: i32,
    pub cy: i32,
    pub cells: Vec<Cell>,
}

/// In-place edit of a single cell, addressed by world coordinates. The only
/// channel for terrain edits inside chunks a client already holds.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct CellUpdate {
    pub x: i32,
    pub y: i32,
    pub cell: Cell,
}

/// Chunk coordinates of the cell containing a world position.
pub fn chunk_of(x: f32, y: f32) -> (i32, i32) {
    let size = CHUNK_SIZE as i64;
    (
        (x.floor() as i64).div_euclid(size) as i32,
        (y.floor() as i64).div_euclid(size) as i32,
    )
}

/// Local cell coordinates of an integer world position within its chunk.
pub fn local_coords(x: i32, y: i32) -> (usize, usize) {
    let size = CHUNK_SIZE as i32;
    (x.rem_euclid(size) as usize, y.rem_euclid(size) as usize)
}

/// Row-major index of a local cell coordinate.
pub fn cell_index(lx: usize, ly: usize) -> usize {
    ly * CHUNK_SIZE + lx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_of_positive() {
        assert_eq!(chunk_of(0.0, 0.0), (0, 0));
        assert_eq!(chunk_of(15.9, 15.9), (0, 0));
        assert_eq!(chunk_of(16.0, 32.0), (1, 2));
    }

    #[test]
    fn test_chunk_of_negative() {
        assert_eq!(chunk_of(-0.1, -0.1), (-1, -1));
        assert_eq!(chunk_of(-16.0, -17.0), (-1, -2));
        assert_eq!(chunk_of(-16.1, 0.0), (-2, 0));
    }

    #[test]
    fn test_local_coords_wrap() {
        assert_eq!(local_coords(0, 0), (0, 0));
        assert_eq!(local_coords(17, 33), (1, 1));
        assert_eq!(local_coords(-1, -16), (15, 0));
    }

    #[test]
    fn test_cell_index_row_major() {
        assert_eq!(cell_index(0, 0), 0);
        assert_eq!(cell_index(15, 0), 15);
        assert_eq!(cell_index(0, 1), CHUNK_SIZE);
        assert_eq!(cell_index(15, 15), CHUNK_SIZE * CHUNK_SIZE - 1);
    }

    #[test]
    fn test_cell_has_floor() {
        let mut cell = Cell::default();
        assert!(!cell.has_floor());
        cell.floor = Some(3);
        assert!(cell.has_floor());
    }

    #[test]
    fn test_chunk_payload_serialization() {
        let payload = ChunkPayload {
            cx: -3,
            cy: 7,
            cells: vec![Cell::default(); CHUNK_SIZE * CHUNK_SIZE],
        };

        let serialized = bincode::serialize(&payload).unwrap();
        let deserialized: ChunkPayload = bincode::deserialize(&serialized).unwrap();
        assert_eq!(payload, deserialized);
    }
}
