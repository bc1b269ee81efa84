//! Per-observer chunk window diffing and the background unload sweep.
//!
//! Each observer sees the (2R+1)x(2R+1) chunk window centered on their
//! current chunk. Every snapshot tick the window is diffed against the one
//! from the previous snapshot: chunks entering the window are fully
//! serialized, chunks leaving it are named by coordinates only, and chunks
//! in both windows contribute their pending cell mutations.

use crate::world::{Layer, WorldStore};
use log::info;
use shared::{CellUpdate, WorldLoad, CHUNK_SIZE, WINDOW_RADIUS};
use std::collections::HashSet;

/// The full window of chunk coordinates centered on `center`.
pub fn window(center: (i32, i32)) -> Vec<(i32, i32)> {
    let mut coords = Vec::with_capacity(((2 * WINDOW_RADIUS + 1) * (2 * WINDOW_RADIUS + 1)) as usize);
    for dy in -WINDOW_RADIUS..=WINDOW_RADIUS {
        for dx in -WINDOW_RADIUS..=WINDOW_RADIUS {
            coords.push((center.0 + dx, center.1 + dy));
        }
    }
    coords
}

/// Computes one observer's `WorldLoad` for this tick.
///
/// Does not touch mutation lists: those are reset once per tick after every
/// observer has been served, so two players over the same chunk both see its
/// deltas.
pub fn stream_world(
    layer: &mut Layer,
    store: &WorldStore,
    prev_center: Option<(i32, i32)>,
    center: (i32, i32),
) -> WorldLoad {
    let new_window: HashSet<(i32, i32)> = window(center).into_iter().collect();
    let old_window: HashSet<(i32, i32)> = match prev_center {
        Some(prev) => window(prev).into_iter().collect(),
        None => HashSet::new(),
    };

    let mut load = WorldLoad::default();

    // Cell deltas for chunks visible before and after. Runs even when the
    // window did not move, so in-place edits always reach the client.
    for &(cx, cy) in new_window.intersection(&old_window) {
        if let Some(chunk) = layer.get_chunk(store, cx, cy, false) {
            for &(lx, ly) in chunk.mutated_cells() {
                load.updated_cells.push(CellUpdate {
                    x: cx * CHUNK_SIZE as i32 + lx as i32,
                    y: cy * CHUNK_SIZE as i32 + ly as i32,
                    cell: chunk.cell(lx as usize, ly as usize).clone(),
                });
            }
        }
    }

    if prev_center == Some(center) {
        return load;
    }

    for &(cx, cy) in new_window.difference(&old_window) {
        // Void chunks (out of bounds) contribute nothing.
        if let Some(chunk) = layer.get_chunk(store, cx, cy, true) {
            load.load_chunks.push(chunk.payload());
        }
    }

    for &(cx, cy) in old_window.difference(&new_window) {
        load.unload_chunks.push((cx, cy));
    }

    load
}

/// Evicts every resident chunk not covered by any observer's window,
/// persisting each first. Runs on its own slower timer, always between
/// ticks, never interleaved with one.
pub fn sweep_unobserved(layer: &mut Layer, store: &WorldStore, observers: &[(i32, i32)]) {
    let mut covered: HashSet<(i32, i32)> = HashSet::new();
    for &center in observers {
        covered.extend(window(center));
    }

    let stale: Vec<(i32, i32)> = layer
        .loaded_chunks()
        .map(|c| (c.cx, c.cy))
        .filter(|coord| !covered.contains(coord))
        .collect();

    if !stale.is_empty() {
        info!(
            "Layer {}: sweeping {} chunks outside {} observer windows",
            layer.z,
            stale.len(),
            observers.len()
        );
    }
    for (cx, cy) in stale {
        layer.unload_chunk(store, cx, cy);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::Cell;
    use tempfile::TempDir;

    fn setup() -> (TempDir, WorldStore, Layer) {
        let dir = TempDir::new().unwrap();
        let store = WorldStore::new(dir.path()).unwrap();
        (dir, store, Layer::new(0, 99))
    }

    #[test]
    fn test_window_is_full_block() {
        let coords = window((0, 0));
        assert_eq!(coords.len(), 9);
        assert!(coords.contains(&(0, 0)));
        assert!(coords.contains(&(-1, -1)));
        assert!(coords.contains(&(1, 1)));
    }

    #[test]
    fn test_first_snapshot_loads_full_window() {
        let (_dir, store, mut layer) = setup();
        let load = stream_world(&mut layer, &store, None, (0, 0));

        assert_eq!(load.load_chunks.len(), 9);
        assert!(load.unload_chunks.is_empty());
        assert!(load.updated_cells.is_empty());
    }

    #[test]
    fn test_move_one_chunk_east() {
        let (_dir, store, mut layer) = setup();
        stream_world(&mut layer, &store, None, (0, 0));
        let load = stream_world(&mut layer, &store, Some((0, 0)), (1, 0));

        let mut loaded: Vec<(i32, i32)> =
            load.load_chunks.iter().map(|c| (c.cx, c.cy)).collect();
        loaded.sort();
        assert_eq!(loaded, vec![(2, -1), (2, 0), (2, 1)]);

        let mut unloaded = load.unload_chunks.clone();
        unloaded.sort();
        assert_eq!(unloaded, vec![(-1, -1), (-1, 0), (-1, 1)]);
    }

    #[test]
    fn test_union_covers_new_window_and_never_overlaps_unload() {
        let (_dir, store, mut layer) = setup();
        let moves = [
            (None, (0, 0)),
            (Some((0, 0)), (1, 0)),
            (Some((1, 0)), (3, 3)), // teleport: disjoint windows
            (Some((3, 3)), (3, 4)),
            (Some((3, 4)), (3, 4)), // no movement
        ];

        for (prev, cur) in moves {
            let load = stream_world(&mut layer, &store, prev, cur);
            let new_window: HashSet<(i32, i32)> = window(cur).into_iter().collect();
            let loaded: HashSet<(i32, i32)> =
                load.load_chunks.iter().map(|c| (c.cx, c.cy)).collect();

            // Everything loaded belongs to the new window.
            assert!(loaded.is_subset(&new_window));
            // to_load is exactly new - same: together with the retained
            // same-window chunks it covers the full new window.
            if let Some(prev) = prev {
                let old_window: HashSet<(i32, i32)> = window(prev).into_iter().collect();
                let same: HashSet<(i32, i32)> =
                    new_window.intersection(&old_window).copied().collect();
                let union: HashSet<(i32, i32)> = same.union(&loaded).copied().collect();
                assert_eq!(union, new_window);
            } else {
                assert_eq!(loaded, new_window);
            }
            // Unloads never name a chunk in the new window.
            for coord in &load.unload_chunks {
                assert!(!new_window.contains(coord));
            }
        }
    }

    #[test]
    fn test_stationary_window_still_emits_cell_deltas() {
        let (_dir, store, mut layer) = setup();
        stream_world(&mut layer, &store, None, (0, 0));

        layer.set_cell(5, 5, Cell {
            block: Some(7),
            floor: Some(1),
            ceiling: None,
        });

        let load = stream_world(&mut layer, &store, Some((0, 0)), (0, 0));
        assert!(load.load_chunks.is_empty());
        assert!(load.unload_chunks.is_empty());
        assert_eq!(load.updated_cells.len(), 1);
        assert_eq!(load.updated_cells[0].x, 5);
        assert_eq!(load.updated_cells[0].cell.block, Some(7));

        // Mutations survive until the per-tick reset so every observer can
        // consume them; a second observer over the same window sees them too.
        let second = stream_world(&mut layer, &store, Some((0, 0)), (0, 0));
        assert_eq!(second.updated_cells.len(), 1);

        layer.reset_mutations();
        let after_reset = stream_world(&mut layer, &store, Some((0, 0)), (0, 0));
        assert!(after_reset.updated_cells.is_empty());
    }

    #[test]
    fn test_deltas_only_for_retained_chunks() {
        let (_dir, store, mut layer) = setup();
        stream_world(&mut layer, &store, None, (0, 0));

        // Mutate a chunk that is about to leave the window.
        layer.set_cell(-1, 0, Cell::default());
        let load = stream_world(&mut layer, &store, Some((0, 0)), (1, 0));
        assert!(load.updated_cells.is_empty());
    }

    #[test]
    fn test_sweep_unloads_outside_union() {
        let (_dir, store, mut layer) = setup();
        stream_world(&mut layer, &store, None, (0, 0));
        stream_world(&mut layer, &store, None, (5, 5));
        assert_eq!(layer.loaded_count(), 18);

        // Second observer walked away; their old chunks become stale.
        sweep_unobserved(&mut layer, &store, &[(0, 0)]);
        assert_eq!(layer.loaded_count(), 9);
        for (cx, cy) in window((0, 0)) {
            assert!(layer.chunk_loaded(cx, cy));
        }

        // No observers at all: everything is evicted, but persisted.
        sweep_unobserved(&mut layer, &store, &[]);
        assert_eq!(layer.loaded_count(), 0);
        assert!(store.chunk_exists(0, 0, 0));
    }
}
