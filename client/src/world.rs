//! Client-side mirror of the streamed chunk window.
//!
//! Holds exactly the chunks the server has streamed in, applies the per-tick
//! window diffs, and answers cell queries for rendering and local prediction.

use log::{debug, warn};
use shared::{cell_index, chunk_of, local_coords, Cell, WorldLoad, CHUNK_SIZE};
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct ClientWorld {
    chunks: HashMap<(i32, i32), Vec<Cell>>,
}

impl ClientWorld {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies one snapshot's window diff: full chunks in, coordinates out,
    /// then individual cell edits.
    pub fn apply(&mut self, load: &WorldLoad) {
        for payload in &load.load_chunks {
            if payload.cells.len() != CHUNK_SIZE * CHUNK_SIZE {
                warn!(
                    "Dropping malformed chunk ({}, {}) with {} cells",
                    payload.cx,
                    payload.cy,
                    payload.cells.len()
                );
                continue;
            }
            self.chunks
                .insert((payload.cx, payload.cy), payload.cells.clone());
        }

        for coord in &load.unload_chunks {
            self.chunks.remove(coord);
        }

        for update in &load.updated_cells {
            let chunk = chunk_of(update.x as f32, update.y as f32);
            let (lx, ly) = local_coords(update.x, update.y);
            if let Some(cells) = self.chunks.get_mut(&chunk) {
                cells[cell_index(lx, ly)] = update.cell.clone();
            }
        }

        if !load.is_empty() {
            debug!(
                "World diff: +{} chunks, -{} chunks, {} cell edits, {} resident",
                load.load_chunks.len(),
                load.unload_chunks.len(),
                load.updated_cells.len(),
                self.chunks.len()
            );
        }
    }

    /// Cell at world coordinates, if its chunk is streamed in.
    pub fn cell(&self, x: i32, y: i32) -> Option<&Cell> {
        let chunk = chunk_of(x as f32, y as f32);
        let (lx, ly) = local_coords(x, y);
        self.chunks.get(&chunk).map(|cells| &cells[cell_index(lx, ly)])
    }

    pub fn chunk_loaded(&self, cx: i32, cy: i32) -> bool {
        self.chunks.contains_key(&(cx, cy))
    }

    pub fn loaded_count(&self) -> usize {
        self.chunks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{CellUpdate, ChunkPayload};

    fn flat_chunk(cx: i32, cy: i32) -> ChunkPayload {
        ChunkPayload {
            cx,
            cy,
            cells: vec![
                Cell {
                    block: None,
                    floor: Some(1),
                    ceiling: None,
                };
                CHUNK_SIZE * CHUNK_SIZE
            ],
        }
    }

    #[test]
    fn test_load_then_query() {
        let mut world = ClientWorld::new();
        world.apply(&WorldLoad {
            load_chunks: vec![flat_chunk(0, 0), flat_chunk(-1, 0)],
            ..Default::default()
        });

        assert_eq!(world.loaded_count(), 2);
        assert_eq!(world.cell(3, 3).unwrap().floor, Some(1));
        // (-5, 3) lives in chunk (-1, 0)
        assert!(world.cell(-5, 3).is_some());
        assert!(world.cell(50, 3).is_none());
    }

    #[test]
    fn test_unload_drops_chunk() {
        let mut world = ClientWorld::new();
        world.apply(&WorldLoad {
            load_chunks: vec![flat_chunk(0, 0)],
            ..Default::default()
        });
        world.apply(&WorldLoad {
            unload_chunks: vec![(0, 0)],
            ..Default::default()
        });

        assert_eq!(world.loaded_count(), 0);
        assert!(world.cell(3, 3).is_none());
    }

    #[test]
    fn test_cell_update_applies_in_place() {
        let mut world = ClientWorld::new();
        world.apply(&WorldLoad {
            load_chunks: vec![flat_chunk(0, 0)],
            ..Default::default()
        });

        world.apply(&WorldLoad {
            updated_cells: vec![CellUpdate {
                x: 5,
                y: 7,
                cell: Cell {
                    block: Some(9),
                    floor: Some(1),
                    ceiling: None,
                },
            }],
            ..Default::default()
        });

        assert_eq!(world.cell(5, 7).unwrap().block, Some(9));
        assert_eq!(world.cell(5, 8).unwrap().block, None);
    }

    #[test]
    fn test_update_for_missing_chunk_ignored() {
        let mut world = ClientWorld::new();
        world.apply(&WorldLoad {
            updated_cells: vec![CellUpdate {
                x: 100,
                y: 100,
                cell: Cell::default(),
            }],
            ..Default::default()
        });
        assert_eq!(world.loaded_count(), 0);
    }

    #[test]
    fn test_malformed_chunk_rejected() {
        let mut world = ClientWorld::new();
        world.apply(&WorldLoad {
            load_chunks: vec![ChunkPayload {
                cx: 0,
                cy: 0,
                cells: vec![Cell::default(); 3],
            }],
            ..Default::default()
        });
        assert_eq!(world.loaded_count(), 0);
    }
}
