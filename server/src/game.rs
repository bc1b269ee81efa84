//! Authoritative simulation context and input validation.
//!
//! `World` is an explicit context object threaded through the tick and
//! snapshot code paths; multiple isolated worlds can coexist, which the
//! tests rely on. Within one tick everything runs to completion in order:
//! input application, object ticking, snapshot building, then the single
//! mutation-list reset.

use crate::client_manager::{Client, InputState};
use crate::world::{Layer, WorldStore};
use log::{debug, warn};
use shared::{MAX_ACK_LAG_TICKS, INPUT_INTERVAL_MS, MOVE_EPSILON, PLAYER_HALF, PLAYER_SPEED};
use crate::entity_index::ObjectKind;
use shared::PlayerMode;
use std::collections::HashMap;

/// Layer players spawn into.
pub const SPAWN_LAYER: i32 = 0;

/// Upper bound on the elapsed time credited to a single input, so a client
/// cannot bank distance by withholding timestamps.
const MAX_INPUT_ELAPSED_MS: u64 = 250;

/// Allowance for network jitter and batching in the cumulative time credit:
/// claimed input time may run this far ahead of the server's own clock.
const INPUT_CREDIT_SLACK_MS: u64 = 250;

pub struct World {
    pub store: WorldStore,
    pub layers: HashMap<i32, Layer>,
    pub tick: u32,
    seed: u64,
}

impl World {
    /// Creates a world with its layers (surface and underground planes).
    pub fn new(store: WorldStore, seed: u64) -> Self {
        let mut layers = HashMap::new();
        for z in [0, -1] {
            layers.insert(z, Layer::new(z, seed.wrapping_add(z as u64)));
        }
        Self {
            store,
            layers,
            tick: 0,
            seed,
        }
    }

    pub fn layer_mut(&mut self, z: i32) -> Option<&mut Layer> {
        self.layers.get_mut(&z)
    }

    /// Spawns a player object into the spawn layer, keeping spawn points
    /// spread out so players do not stack. Returns (object id, x, y).
    pub fn spawn_player(&mut self, client_id: u32, username: String, color: u32) -> (u64, f32, f32) {
        let spawn_x = 4.0 + (client_id as f32 * 3.0) % 8.0;
        let spawn_y = 4.0 + (client_id as f32 * 5.0) % 8.0;

        let seed = self.seed;
        let layer = self
            .layers
            .entry(SPAWN_LAYER)
            .or_insert_with(|| Layer::new(SPAWN_LAYER, seed));
        // Make sure the spawn chunk is resident before the player stands on it.
        layer.get_chunk(&self.store, 0, 0, true);

        let object_id = layer.objects.spawn(
            ObjectKind::Player {
                client_id,
                username,
                color,
                mode: PlayerMode::Normal,
            },
            spawn_x,
            spawn_y,
        );
        debug!(
            "Spawned player object {} for client {} at ({}, {})",
            object_id, client_id, spawn_x, spawn_y
        );
        (object_id, spawn_x, spawn_y)
    }

    /// Removes a player object immediately (disconnect path, outside the
    /// tick pass).
    pub fn despawn_player(&mut self, layer: i32, object_id: u64) {
        if let Some(layer) = self.layers.get_mut(&layer) {
            layer.objects.remove_now(object_id);
        }
    }

    /// Applies one validated input to the player's object.
    ///
    /// The reported displacement is trusted only up to
    /// `speed * elapsed + epsilon`; anything beyond is clamped to the bound
    /// and answered with an authoritative `SetPosition`. The elapsed term is
    /// itself bounded: the running total of claimed input time may never
    /// outrun the server clock (`now`) by more than a fixed slack, so
    /// inflated timestamps buy no extra distance. A client whose snapshot
    /// acknowledgements have fallen far behind gets the same resync, since
    /// dropped updates mean its prediction base is stale.
    pub fn apply_input(&mut self, client: &mut Client, input: &InputState, now: u64) {
        let Some(layer) = self.layers.get_mut(&client.layer) else {
            return;
        };
        let Some(object) = layer.objects.get(client.object_id) else {
            return;
        };
        let (old_x, old_y) = (object.x, object.y);

        if !(input.dx.is_finite() && input.dy.is_finite() && input.dir.is_finite()) {
            warn!(
                "Client {} sent a non-finite input delta, dropping it",
                client.id
            );
            if client.pending_correction_count() == 0 {
                client.queue_set_position(old_x, old_y);
            }
            return;
        }

        let claimed_ms = if client.last_input_timestamp == 0 {
            INPUT_INTERVAL_MS
        } else {
            input
                .timestamp
                .saturating_sub(client.last_input_timestamp)
                .clamp(1, MAX_INPUT_ELAPSED_MS)
        };
        let credit_start = *client.input_credit_start.get_or_insert(now);
        let wall_budget = now.saturating_sub(credit_start) + INPUT_CREDIT_SLACK_MS;
        let available_ms = wall_budget.saturating_sub(client.credited_input_ms);
        let elapsed_ms = claimed_ms.min(available_ms).max(1);
        client.credited_input_ms += elapsed_ms;

        let max_distance = PLAYER_SPEED * (elapsed_ms as f32 / 1000.0) + MOVE_EPSILON;

        let mut dx = input.dx;
        let mut dy = input.dy;
        let distance = (dx * dx + dy * dy).sqrt();
        let clamped = distance > max_distance;
        if clamped {
            let factor = max_distance / distance;
            dx *= factor;
            dy *= factor;
            warn!(
                "Client {} reported {:.2} units in {}ms (max {:.2}), clamping",
                client.id, distance, elapsed_ms, max_distance
            );
        }

        let new_x = old_x + dx;
        let new_y = old_y + dy;
        let falling = layer.is_over_void(new_x, new_y, PLAYER_HALF);

        if let Some(object) = layer.objects.get_mut(client.object_id) {
            object.x = new_x;
            object.y = new_y;
            object.dir = input.dir;
            object.falling = falling;
        }

        if clamped {
            client.queue_set_position(new_x, new_y);
        } else if self.ack_stale(client) && client.pending_correction_count() == 0 {
            warn!(
                "Client {} ack stalled at tick {} (server tick {}), forcing resync",
                client.id, client.last_snapshot_ack, self.tick
            );
            client.queue_set_position(new_x, new_y);
        }
    }

    fn ack_stale(&self, client: &Client) -> bool {
        // Only meaningful once at least one snapshot has been sent.
        client.last_window.is_some()
            && self.tick.saturating_sub(client.last_snapshot_ack) > MAX_ACK_LAG_TICKS
    }

    /// Advances every object's own lifecycle and prunes expired items.
    /// Removals are deferred within the pass and flushed at its end.
    pub fn step(&mut self, dt: f32) {
        self.tick += 1;
        let tick = self.tick;

        for layer in self.layers.values_mut() {
            let expired: Vec<u64> = layer
                .objects
                .iter()
                .filter(|o| match o.kind {
                    ObjectKind::Item {
                        despawn_tick: Some(deadline),
                        ..
                    } => tick >= deadline,
                    _ => false,
                })
                .map(|o| o.id)
                .collect();

            for object in layer.objects.iter_mut() {
                object.tick(dt);
            }
            for id in expired {
                layer.objects.remove_deferred(id);
            }
            layer.objects.flush_removals();

            refresh_falling(layer);
        }
    }

    /// Single per-tick mutation reset, after all snapshots are built.
    pub fn reset_mutations(&mut self) {
        for layer in self.layers.values_mut() {
            layer.reset_mutations();
        }
    }

    /// Final save of every layer. Shutdown path.
    pub fn save_all(&self) {
        for layer in self.layers.values() {
            layer.save_all(&self.store);
        }
    }
}

/// Re-derives the falling flag of every non-player object from the floor
/// cells it overlaps. Player flags are refreshed on input application.
fn refresh_falling(layer: &mut Layer) {
    let flags: Vec<(u64, bool)> = layer
        .objects
        .iter()
        .filter(|o| !o.is_player())
        .map(|o| (o.id, layer.is_over_void(o.x, o.y, PLAYER_HALF)))
        .collect();
    for (id, falling) in flags {
        if let Some(object) = layer.objects.get_mut(id) {
            object.falling = falling;
        }
    }
}
