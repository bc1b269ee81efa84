//! Spatial registry of simulated objects (players, NPCs, ground items)
//!
//! One index lives inside each layer and owns every object simulated on that
//! plane. Removals requested while a tick is iterating the index are deferred
//! and applied by `flush_removals` at end of tick, so a single pass never
//! invalidates its iterator and never visits an object twice.

use log::debug;
use shared::{DynamicState, EntityKind, EntityState, PlayerMode};
use std::collections::HashMap;

/// Role-specific fields of a simulated object.
#[derive(Debug, Clone, PartialEq)]
pub enum ObjectKind {
    Player {
        client_id: u32,
        username: String,
        color: u32,
        mode: PlayerMode,
    },
    Npc {
        asset: u16,
    },
    Item {
        item: u16,
        /// Server tick after which the item despawns.
        despawn_tick: Option<u32>,
    },
}

/// One simulated object: position, heading, and a falling/scale lifecycle.
#[derive(Debug, Clone)]
pub struct SimObject {
    pub id: u64,
    pub kind: ObjectKind,
    pub x: f32,
    pub y: f32,
    pub dir: f32,
    pub scale: f32,
    pub health: f32,
    pub falling: bool,
}

/// Seconds a falling object takes to shrink from full scale to zero.
const FALL_SHRINK_SECONDS: f32 = 1.0;

impl SimObject {
    pub fn new(id: u64, kind: ObjectKind, x: f32, y: f32) -> Self {
        Self {
            id,
            kind,
            x,
            y,
            dir: 0.0,
            scale: 1.0,
            health: 100.0,
            falling: false,
        }
    }

    pub fn is_player(&self) -> bool {
        matches!(self.kind, ObjectKind::Player { .. })
    }

    /// Advances the object's own lifecycle for one tick. Falling objects
    /// shrink toward zero scale; grounded objects recover.
    pub fn tick(&mut self, dt: f32) {
        if self.falling {
            self.scale = (self.scale - dt / FALL_SHRINK_SECONDS).max(0.0);
        } else if self.scale < 1.0 {
            self.scale = (self.scale + dt / FALL_SHRINK_SECONDS).min(1.0);
        }
    }

    pub fn dynamic(&self) -> DynamicState {
        DynamicState {
            x: self.x,
            y: self.y,
            dir: self.dir,
            scale: self.scale,
            health: self.health,
            falling: self.falling,
        }
    }

    /// Wire representation for non-player objects. Returns None for players,
    /// which travel in the `others` list instead.
    pub fn entity_state(&self) -> Option<EntityState> {
        let kind = match self.kind {
            ObjectKind::Npc { asset } => EntityKind::Npc { asset },
            ObjectKind::Item { item, .. } => EntityKind::Item { item },
            ObjectKind::Player { .. } => return None,
        };
        Some(EntityState {
            id: self.id,
            kind,
            dynamic: self.dynamic(),
        })
    }
}

/// Id-keyed object registry with rectangular proximity queries.
#[derive(Debug, Default)]
pub struct EntityIndex {
    objects: HashMap<u64, SimObject>,
    pending_removals: Vec<u64>,
    next_id: u64,
}

impl EntityIndex {
    pub fn new() -> Self {
        Self {
            objects: HashMap::new(),
            pending_removals: Vec::new(),
            next_id: 1,
        }
    }

    /// Inserts an object built by the caller-provided constructor, handing it
    /// a fresh id. Returns the id.
    pub fn spawn(&mut self, kind: ObjectKind, x: f32, y: f32) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.objects.insert(id, SimObject::new(id, kind, x, y));
        id
    }

    /// Re-inserts a fully formed object (chunk reload path). Keeps the id
    /// counter ahead of every restored id.
    pub fn insert(&mut self, object: SimObject) {
        self.next_id = self.next_id.max(object.id + 1);
        self.objects.insert(object.id, object);
    }

    pub fn get(&self, id: u64) -> Option<&SimObject> {
        self.objects.get(&id)
    }

    pub fn get_mut(&mut self, id: u64) -> Option<&mut SimObject> {
        self.objects.get_mut(&id)
    }

    /// Queues a removal. Takes effect at `flush_removals`, never mid-pass.
    pub fn remove_deferred(&mut self, id: u64) {
        self.pending_removals.push(id);
    }

    /// Removes an object immediately. Only valid outside a tick pass
    /// (disconnect handling, chunk eviction).
    pub fn remove_now(&mut self, id: u64) -> Option<SimObject> {
        self.objects.remove(&id)
    }

    /// Applies deferred removals. Called once at end of tick.
    pub fn flush_removals(&mut self) {
        for id in self.pending_removals.drain(..) {
            if self.objects.remove(&id).is_some() {
                debug!("Removed object {}", id);
            }
        }
    }

    /// Objects within the axis-aligned rectangle around (x, y). O(n) scan;
    /// the membership test is the contract, not the scan strategy.
    pub fn nearby(
        &self,
        x: f32,
        y: f32,
        half_width: f32,
        half_height: f32,
    ) -> impl Iterator<Item = &SimObject> {
        self.objects.values().filter(move |o| {
            (o.x - x).abs() <= half_width && (o.y - y).abs() <= half_height
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &SimObject> {
        self.objects.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut SimObject> {
        self.objects.values_mut()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}
