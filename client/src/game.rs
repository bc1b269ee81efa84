//! Client-side game state: prediction, reconciliation and delayed playback.
//!
//! The local player is predicted immediately from sent inputs and folded back
//! onto the server's confirmed state when snapshots arrive. Everything else,
//! remote players and entities, is never predicted: their states go into
//! playback buffers and are sampled `render_delay` in the past.

use crate::buffer::PlaybackBuffer;
use crate::world::ClientWorld;
use log::{debug, info, warn};
use shared::{
    Correction, DynamicState, EntityKind, PlayerMode, Snapshot, CONNECTION_LOST_MS,
};
use std::collections::HashMap;

/// Inputs kept for replay during reconciliation; anything older has either
/// been acknowledged or is beyond saving.
const MAX_INPUT_HISTORY: usize = 128;

/// Remote state whose newest buffered sample is older than this (on the
/// server timeline) belongs to someone who left the view.
const REMOTE_STALE_MS: u64 = 1000;

/// One sent-but-maybe-unacknowledged displacement.
#[derive(Debug, Clone)]
pub struct PendingInput {
    pub sequence: u32,
    pub dx: f32,
    pub dy: f32,
    pub dir: f32,
}

/// A remote player mirrored from snapshots.
#[derive(Debug)]
pub struct RemotePlayer {
    pub username: String,
    pub color: u32,
    pub buffer: PlaybackBuffer<DynamicState>,
}

/// A server-driven entity (NPC or dropped item) mirrored from snapshots.
#[derive(Debug)]
pub struct RemoteEntity {
    pub kind: EntityKind,
    pub buffer: PlaybackBuffer<DynamicState>,
}

/// A remote player's state sampled for one rendered frame.
#[derive(Debug, Clone)]
pub struct RenderPlayer {
    pub id: u32,
    pub username: String,
    pub color: u32,
    pub state: DynamicState,
}

pub struct ClientGameState {
    pub client_id: u32,
    pub object_id: u64,
    pub layer: i32,

    /// Locally predicted own state, rendered without playback delay.
    pub predicted: DynamicState,
    pub color: u32,
    pub mode: PlayerMode,

    pub world: ClientWorld,
    players: HashMap<u32, RemotePlayer>,
    entities: HashMap<u64, RemoteEntity>,

    input_history: Vec<PendingInput>,
    /// Highest correction sequence applied on this connection. Corrections
    /// arrive in every retransmitted snapshot copy; the watermark makes each
    /// take effect exactly once.
    applied_correction_seq: u64,

    render_delay: u64,
    pub last_snapshot_tick: u32,
    last_snapshot_local: Option<u64>,
    pub ping_ms: u64,
}

impl ClientGameState {
    pub fn new(client_id: u32, object_id: u64, layer: i32, x: f32, y: f32, render_delay: u64) -> Self {
        Self {
            client_id,
            object_id,
            layer,
            predicted: DynamicState {
                x,
                y,
                ..Default::default()
            },
            color: 0,
            mode: PlayerMode::Normal,
            world: ClientWorld::new(),
            players: HashMap::new(),
            entities: HashMap::new(),
            input_history: Vec::new(),
            applied_correction_seq: 0,
            render_delay,
            last_snapshot_tick: 0,
            last_snapshot_local: None,
            ping_ms: 0,
        }
    }

    /// Applies one input locally, before the server has seen it.
    pub fn predict(&mut self, input: PendingInput) {
        self.predicted.x += input.dx;
        self.predicted.y += input.dy;
        self.predicted.dir = input.dir;

        self.input_history.push(input);
        if self.input_history.len() > MAX_INPUT_HISTORY {
            let excess = self.input_history.len() - MAX_INPUT_HISTORY;
            self.input_history.drain(..excess);
        }
    }

    /// Folds one snapshot into the local state.
    ///
    /// Safe to call with duplicated or reordered snapshots: world diffs are
    /// idempotent per tick, playback buffers sort by timestamp, and the
    /// correction watermark skips anything already applied.
    pub fn apply_snapshot(&mut self, snapshot: &Snapshot, local_now: u64) {
        self.last_snapshot_tick = self.last_snapshot_tick.max(snapshot.tick);
        self.last_snapshot_local = Some(local_now);
        self.ping_ms = local_now.saturating_sub(snapshot.t);

        self.world.apply(&snapshot.world);
        self.reconcile(snapshot);
        self.apply_corrections(&snapshot.corrections);
        self.mirror_remotes(snapshot, local_now);
    }

    /// Rebases prediction on the server's confirmed own state, replaying the
    /// displacements the server has not acknowledged yet.
    fn reconcile(&mut self, snapshot: &Snapshot) {
        self.input_history
            .retain(|input| input.sequence > snapshot.last_processed_input);

        let mut state = snapshot.me.dynamic.clone();
        for input in &self.input_history {
            state.x += input.dx;
            state.y += input.dy;
            state.dir = input.dir;
        }
        self.predicted = state;
        self.color = snapshot.me.color;
    }

    /// Applies corrections newer than the watermark, in sequence order.
    fn apply_corrections(&mut self, corrections: &[Correction]) {
        let mut pending: Vec<&Correction> = corrections
            .iter()
            .filter(|c| c.seq() > self.applied_correction_seq)
            .collect();
        pending.sort_by_key(|c| c.seq());

        for correction in pending {
            debug!("Applying correction {:?}", correction);
            match correction {
                Correction::SetPosition { x, y, .. } => {
                    self.predicted.x = *x;
                    self.predicted.y = *y;
                    // Unacknowledged displacements predate the snap; replaying
                    // them would drift right back off the corrected position.
                    self.input_history.clear();
                }
                Correction::Push { dx, dy, .. } => {
                    self.predicted.x += dx;
                    self.predicted.y += dy;
                }
                Correction::SetColor { color, .. } => {
                    self.color = *color;
                }
                Correction::SetMode { mode, .. } => {
                    info!("Mode changed to {:?}", mode);
                    self.mode = *mode;
                }
            }
            self.applied_correction_seq = correction.seq();
        }
    }

    /// Feeds remote players and entities into their playback buffers and
    /// forgets anyone who has left the view.
    fn mirror_remotes(&mut self, snapshot: &Snapshot, local_now: u64) {
        let render_delay = self.render_delay;

        for other in &snapshot.others {
            if other.id == self.client_id {
                warn!("Snapshot listed us among others, ignoring");
                continue;
            }
            let remote = self
                .players
                .entry(other.id)
                .or_insert_with(|| RemotePlayer {
                    username: other.username.clone(),
                    color: other.color,
                    buffer: PlaybackBuffer::new(render_delay),
                });
            remote.color = other.color;
            remote.buffer.push(snapshot.t, other.dynamic.clone(), local_now);
        }

        for entity in &snapshot.entities {
            let remote = self
                .entities
                .entry(entity.id)
                .or_insert_with(|| RemoteEntity {
                    kind: entity.kind,
                    buffer: PlaybackBuffer::new(render_delay),
                });
            remote.buffer.push(snapshot.t, entity.dynamic.clone(), local_now);
        }

        let horizon = snapshot.t.saturating_sub(REMOTE_STALE_MS);
        self.players
            .retain(|_, p| p.buffer.latest_timestamp().unwrap_or(0) >= horizon);
        self.entities
            .retain(|_, e| e.buffer.latest_timestamp().unwrap_or(0) >= horizon);
    }

    /// Remote players sampled at the delayed playback instant.
    pub fn render_players(&self, local_now: u64) -> Vec<RenderPlayer> {
        self.players
            .iter()
            .filter_map(|(id, remote)| {
                remote.buffer.sample(local_now).map(|state| RenderPlayer {
                    id: *id,
                    username: remote.username.clone(),
                    color: remote.color,
                    state,
                })
            })
            .collect()
    }

    /// Remote entities sampled at the delayed playback instant.
    pub fn render_entities(&self, local_now: u64) -> Vec<(u64, EntityKind, DynamicState)> {
        self.entities
            .iter()
            .filter_map(|(id, remote)| {
                remote
                    .buffer
                    .sample(local_now)
                    .map(|state| (*id, remote.kind, state))
            })
            .collect()
    }

    /// Display-only: true when no snapshot has arrived for a while. The
    /// connection itself is left alone; the server decides actual timeouts.
    pub fn connection_lost(&self, local_now: u64) -> bool {
        match self.last_snapshot_local {
            Some(at) => local_now.saturating_sub(at) > CONNECTION_LOST_MS,
            None => false,
        }
    }

    pub fn pending_input_count(&self) -> usize {
        self.input_history.len()
    }

    pub fn remote_player_count(&self) -> usize {
        self.players.len()
    }
}
