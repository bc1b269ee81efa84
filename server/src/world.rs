//! Authoritative world state: layers, chunks, and their on-disk records.
//!
//! A `Layer` is one independently simulated plane. It owns the only
//! authoritative copy of its terrain (a map of loaded `Chunk`s) plus the
//! `EntityIndex` of everything simulated on it. `WorldStore` is the
//! persistence backend: a bincode cell-grid record and a co-located JSON
//! entity record per chunk, keyed by `(layer, cx, cy)`.

use crate::entity_index::{EntityIndex, ObjectKind, SimObject};
use log::{debug, error, info};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use shared::{cell_index, local_coords, Cell, ChunkPayload, CHUNK_SIZE, WORLD_RADIUS_CHUNKS};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("chunk io: {0}")]
    Io(#[from] std::io::Error),
    #[error("chunk record corrupt: {0}")]
    Codec(#[from] bincode::Error),
    #[error("entity record corrupt: {0}")]
    Json(#[from] serde_json::Error),
}

/// Persisted form of one non-player object, co-located with its chunk.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EntityRecord {
    Npc {
        id: u64,
        asset: u16,
        x: f32,
        y: f32,
        dir: f32,
        health: f32,
    },
    Item {
        id: u64,
        item: u16,
        x: f32,
        y: f32,
    },
}

impl EntityRecord {
    fn from_object(object: &SimObject) -> Option<Self> {
        match object.kind {
            ObjectKind::Npc { asset } => Some(EntityRecord::Npc {
                id: object.id,
                asset,
                x: object.x,
                y: object.y,
                dir: object.dir,
                health: object.health,
            }),
            ObjectKind::Item { item, .. } => Some(EntityRecord::Item {
                id: object.id,
                item,
                x: object.x,
                y: object.y,
            }),
            ObjectKind::Player { .. } => None,
        }
    }

    /// Rebuilds the object under its persisted id, so references held across
    /// an unload/reload cycle stay valid.
    fn restore(self, index: &mut EntityIndex) {
        match self {
            EntityRecord::Npc {
                id,
                asset,
                x,
                y,
                dir,
                health,
            } => {
                let mut object = SimObject::new(id, ObjectKind::Npc { asset }, x, y);
                object.dir = dir;
                object.health = health;
                index.insert(object);
            }
            EntityRecord::Item { id, item, x, y } => {
                index.insert(SimObject::new(
                    id,
                    ObjectKind::Item {
                        item,
                        despawn_tick: None,
                    },
                    x,
                    y,
                ));
            }
        }
    }
}

/// Fixed-size cell grid at integer chunk coordinates, owned by its layer.
/// Carries the transient list of cells mutated since the last broadcast
/// reset, the only channel for in-place terrain deltas.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub cx: i32,
    pub cy: i32,
    cells: Vec<Cell>,
    mutated: Vec<(u8, u8)>,
}

impl Chunk {
    pub fn new(cx: i32, cy: i32, cells: Vec<Cell>) -> Self {
        debug_assert_eq!(cells.len(), CHUNK_SIZE * CHUNK_SIZE);
        Self {
            cx,
            cy,
            cells,
            mutated: Vec::new(),
        }
    }

    pub fn cell(&self, lx: usize, ly: usize) -> &Cell {
        &self.cells[cell_index(lx, ly)]
    }

    /// Replaces a cell and records the mutation for delta emission.
    pub fn set_cell(&mut self, lx: usize, ly: usize, cell: Cell) {
        self.cells[cell_index(lx, ly)] = cell;
        let key = (lx as u8, ly as u8);
        if !self.mutated.contains(&key) {
            self.mutated.push(key);
        }
    }

    pub fn mutated_cells(&self) -> &[(u8, u8)] {
        &self.mutated
    }

    /// Clears the mutation list. Called at exactly one point per tick,
    /// after every subscribed observer's diff has consumed it.
    pub fn reset_mutations(&mut self) {
        self.mutated.clear();
    }

    /// Full wire payload (entire cell grid).
    pub fn payload(&self) -> ChunkPayload {
        ChunkPayload {
            cx: self.cx,
            cy: self.cy,
            cells: self.cells.clone(),
        }
    }

    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }
}

/// Persistence backend. Writes are whole-record and the serialized bytes are
/// produced before any yield point, so in-memory chunks stay immutable for
/// the duration of a write.
#[derive(Debug, Clone)]
pub struct WorldStore {
    dir: PathBuf,
}

impl WorldStore {
    pub fn new(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        fs::create_dir_all(dir.as_ref())?;
        Ok(Self {
            dir: dir.as_ref().to_path_buf(),
        })
    }

    fn chunk_path(&self, z: i32, cx: i32, cy: i32) -> PathBuf {
        self.dir.join(format!("{}.{}.{}.chunk", z, cx, cy))
    }

    fn entities_path(&self, z: i32, cx: i32, cy: i32) -> PathBuf {
        self.dir.join(format!("{}.{}.{}.entities.json", z, cx, cy))
    }

    pub fn chunk_exists(&self, z: i32, cx: i32, cy: i32) -> bool {
        self.chunk_path(z, cx, cy).exists()
    }

    /// Reads a persisted chunk record. `Ok(None)` means no record exists;
    /// a corrupt record is an error the caller downgrades to regeneration.
    pub fn load_chunk(&self, z: i32, cx: i32, cy: i32) -> Result<Option<Chunk>, StoreError> {
        let path = self.chunk_path(z, cx, cy);
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&path)?;
        let cells: Vec<Cell> = bincode::deserialize(&bytes)?;
        if cells.len() != CHUNK_SIZE * CHUNK_SIZE {
            return Err(StoreError::Codec(Box::new(bincode::ErrorKind::Custom(
                format!("cell grid has {} cells", cells.len()),
            ))));
        }
        Ok(Some(Chunk::new(cx, cy, cells)))
    }

    /// Reads the entity record co-located with a chunk. Missing or corrupt
    /// records yield an empty list; corruption is logged by the caller.
    pub fn load_entities(&self, z: i32, cx: i32, cy: i32) -> Result<Vec<EntityRecord>, StoreError> {
        let path = self.entities_path(z, cx, cy);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let text = fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Writes both records for a chunk: the cell grid and the JSON list of
    /// non-player entities currently inside it.
    pub fn save_chunk(
        &self,
        z: i32,
        chunk: &Chunk,
        entities: &[EntityRecord],
    ) -> Result<(), StoreError> {
        let bytes = bincode::serialize(chunk.cells())?;
        fs::write(self.chunk_path(z, chunk.cx, chunk.cy), bytes)?;

        let entities_path = self.entities_path(z, chunk.cx, chunk.cy);
        if entities.is_empty() {
            if entities_path.exists() {
                fs::remove_file(entities_path)?;
            }
        } else {
            let text = serde_json::to_string(entities)?;
            fs::write(entities_path, text)?;
        }
        Ok(())
    }
}

/// One independent world plane: terrain chunks plus the objects on them.
#[derive(Debug)]
pub struct Layer {
    pub z: i32,
    pub seed: u64,
    chunks: HashMap<(i32, i32), Chunk>,
    pub objects: EntityIndex,
}

impl Layer {
    pub fn new(z: i32, seed: u64) -> Self {
        Self {
            z,
            seed,
            chunks: HashMap::new(),
            objects: EntityIndex::new(),
        }
    }

    fn in_bounds(cx: i32, cy: i32) -> bool {
        cx.abs() <= WORLD_RADIUS_CHUNKS && cy.abs() <= WORLD_RADIUS_CHUNKS
    }

    /// Returns the chunk at chunk coordinates, loading or generating it if
    /// allowed. Out-of-bounds coordinates are solid void: always `None`.
    pub fn get_chunk(
        &mut self,
        store: &WorldStore,
        cx: i32,
        cy: i32,
        allow_generate: bool,
    ) -> Option<&Chunk> {
        if !Self::in_bounds(cx, cy) {
            return None;
        }
        if self.chunks.contains_key(&(cx, cy)) {
            return self.chunks.get(&(cx, cy));
        }
        if !allow_generate {
            return None;
        }

        // The entity record is independent of the cell record: restore it
        // even when the cell grid is corrupt and has to be regenerated.
        match store.load_entities(self.z, cx, cy) {
            Ok(records) => {
                for record in records {
                    record.restore(&mut self.objects);
                }
            }
            Err(e) => {
                error!(
                    "Discarding corrupt entity record for layer {} chunk ({}, {}): {}",
                    self.z, cx, cy, e
                );
            }
        }

        let chunk = match store.load_chunk(self.z, cx, cy) {
            Ok(Some(chunk)) => chunk,
            Ok(None) => self.generate_chunk(cx, cy),
            Err(e) => {
                // Never fatal: regenerate over the bad record.
                error!(
                    "Discarding corrupt chunk record for layer {} chunk ({}, {}): {}",
                    self.z, cx, cy, e
                );
                self.generate_chunk(cx, cy)
            }
        };

        debug!("Layer {} loaded chunk ({}, {})", self.z, cx, cy);
        self.chunks.entry((cx, cy)).or_insert(chunk);
        self.chunks.get(&(cx, cy))
    }

    pub fn chunk_loaded(&self, cx: i32, cy: i32) -> bool {
        self.chunks.contains_key(&(cx, cy))
    }

    pub fn loaded_chunks(&self) -> impl Iterator<Item = &Chunk> {
        self.chunks.values()
    }

    pub fn loaded_count(&self) -> usize {
        self.chunks.len()
    }

    /// Deterministic terrain fill seeded from (seed, z, cx, cy).
    fn generate_chunk(&self, cx: i32, cy: i32) -> Chunk {
        let mix = self
            .seed
            .wrapping_mul(0x9e37_79b9_7f4a_7c15)
            .wrapping_add((self.z as u64).wrapping_mul(0xc2b2_ae3d_27d4_eb4f))
            .wrapping_add((cx as i64 as u64).wrapping_mul(0x1656_67b1_9e37_79f9))
            .wrapping_add(cy as i64 as u64);
        let mut rng = StdRng::seed_from_u64(mix);

        let mut cells = Vec::with_capacity(CHUNK_SIZE * CHUNK_SIZE);
        for _ in 0..CHUNK_SIZE * CHUNK_SIZE {
            let mut cell = Cell {
                floor: Some(rng.gen_range(1..=4)),
                ..Cell::default()
            };
            // Sparse obstacles and the occasional pit.
            match rng.gen_range(0..100) {
                0..=4 => cell.block = Some(rng.gen_range(1..=8)),
                5 => cell.floor = None,
                _ => {}
            }
            cells.push(cell);
        }
        Chunk::new(cx, cy, cells)
    }

    /// Persists a chunk together with the non-player objects inside it, then
    /// drops it from memory (eviction, not deletion).
    pub fn unload_chunk(&mut self, store: &WorldStore, cx: i32, cy: i32) {
        let Some(chunk) = self.chunks.get(&(cx, cy)) else {
            return;
        };

        let min_x = (cx * CHUNK_SIZE as i32) as f32;
        let min_y = (cy * CHUNK_SIZE as i32) as f32;
        let max_x = min_x + CHUNK_SIZE as f32;
        let max_y = min_y + CHUNK_SIZE as f32;

        let resident: Vec<u64> = self
            .objects
            .iter()
            .filter(|o| {
                !o.is_player() && o.x >= min_x && o.x < max_x && o.y >= min_y && o.y < max_y
            })
            .map(|o| o.id)
            .collect();
        let records: Vec<EntityRecord> = resident
            .iter()
            .filter_map(|id| self.objects.get(*id).and_then(EntityRecord::from_object))
            .collect();

        if let Err(e) = store.save_chunk(self.z, chunk, &records) {
            error!(
                "Failed to persist layer {} chunk ({}, {}): {}",
                self.z, cx, cy, e
            );
            return;
        }

        for id in resident {
            self.objects.remove_now(id);
        }
        self.chunks.remove(&(cx, cy));
        debug!("Layer {} unloaded chunk ({}, {})", self.z, cx, cy);
    }

    /// Cell lookup by integer world coordinates. Unloaded or out-of-bounds
    /// cells are void.
    pub fn cell(&self, x: i32, y: i32) -> Option<&Cell> {
        let cx = x.div_euclid(CHUNK_SIZE as i32);
        let cy = y.div_euclid(CHUNK_SIZE as i32);
        let (lx, ly) = local_coords(x, y);
        self.chunks.get(&(cx, cy)).map(|c| c.cell(lx, ly))
    }

    /// Replaces a cell by world coordinates, recording the mutation on the
    /// owning chunk. Returns false when the chunk is not resident.
    pub fn set_cell(&mut self, x: i32, y: i32, cell: Cell) -> bool {
        let cx = x.div_euclid(CHUNK_SIZE as i32);
        let cy = y.div_euclid(CHUNK_SIZE as i32);
        let (lx, ly) = local_coords(x, y);
        match self.chunks.get_mut(&(cx, cy)) {
            Some(chunk) => {
                chunk.set_cell(lx, ly, cell);
                true
            }
            None => false,
        }
    }

    /// True when none of the cells overlapped by the half-extent square
    /// around (x, y) has floor terrain.
    pub fn is_over_void(&self, x: f32, y: f32, half: f32) -> bool {
        let x0 = (x - half).floor() as i32;
        let x1 = (x + half).floor() as i32;
        let y0 = (y - half).floor() as i32;
        let y1 = (y + half).floor() as i32;
        for wy in y0..=y1 {
            for wx in x0..=x1 {
                if let Some(cell) = self.cell(wx, wy) {
                    if cell.has_floor() {
                        return false;
                    }
                }
            }
        }
        true
    }

    /// Single mutation reset point, run after all player snapshots for this
    /// tick have been built.
    pub fn reset_mutations(&mut self) {
        for chunk in self.chunks.values_mut() {
            chunk.reset_mutations();
        }
    }

    /// Persists every resident chunk without evicting. Shutdown path.
    pub fn save_all(&self, store: &WorldStore) {
        let mut saved = 0usize;
        for chunk in self.chunks.values() {
            let min_x = (chunk.cx * CHUNK_SIZE as i32) as f32;
            let min_y = (chunk.cy * CHUNK_SIZE as i32) as f32;
            let records: Vec<EntityRecord> = self
                .objects
                .iter()
                .filter(|o| {
                    !o.is_player()
                        && o.x >= min_x
                        && o.x < min_x + CHUNK_SIZE as f32
                        && o.y >= min_y
                        && o.y < min_y + CHUNK_SIZE as f32
                })
                .filter_map(EntityRecord::from_object)
                .collect();
            match store.save_chunk(self.z, chunk, &records) {
                Ok(()) => saved += 1,
                Err(e) => error!(
                    "Failed final save of layer {} chunk ({}, {}): {}",
                    self.z, chunk.cx, chunk.cy, e
                ),
            }
        }
        info!("Layer {}: saved {} chunks", self.z, saved);
    }
}
