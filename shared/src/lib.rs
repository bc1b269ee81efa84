pub mod cell;
pub mod protocol;

pub use cell::{cell_index, chunk_of, local_coords, Cell, CellUpdate, ChunkPayload};
pub use protocol::{
    Correction, DynamicState, EntityKind, EntityState, Packet, PlayerMode, PlayerState, Snapshot,
    WorldLoad,
};

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Cells per chunk edge. One cell is 1.0 world units.
pub const CHUNK_SIZE: usize = 16;

/// Streaming window radius in chunks. Radius 1 is the 3x3 window shared by
/// the server streamer and the client render distance.
pub const WINDOW_RADIUS: i32 = 1;

/// World bounds in chunk coordinates. Chunks outside are void.
pub const WORLD_RADIUS_CHUNKS: i32 = 256;

/// Rectangular entity visibility half-extents in world units. Distinct from
/// the chunk window: entity visibility may be narrower than loaded terrain.
pub const VIEW_HALF_WIDTH: f32 = 24.0;
pub const VIEW_HALF_HEIGHT: f32 = 18.0;

/// Player movement speed in world units per second.
pub const PLAYER_SPEED: f32 = 30.0;

/// Half-extent of a player's collision square in world units.
pub const PLAYER_HALF: f32 = 0.4;

/// Slack added to the per-input displacement bound.
pub const MOVE_EPSILON: f32 = 0.001;

/// Client input send interval, fixed and independent of the render rate.
pub const INPUT_INTERVAL_MS: u64 = 100;

/// Intentional playback lag so at least one future snapshot is normally
/// buffered and interpolation never extrapolates.
pub const DEFAULT_RENDER_DELAY_MS: u64 = 100;

/// Snapshots are built and sent every Nth server tick.
pub const SNAPSHOT_EVERY_TICKS: u32 = 2;

/// Display-only flag threshold: elapsed time since the last received
/// snapshot after which the client reports the connection as lost.
pub const CONNECTION_LOST_MS: u64 = 3000;

/// Inputs a client is allowed to leave unacknowledged before the server
/// forces a position resync.
pub const MAX_ACK_LAG_TICKS: u32 = 120;

/// Current unix time in milliseconds, saturating into u64.
pub fn now_millis() -> u64 {
    let since_epoch = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0));
    (since_epoch.as_millis().min(u64::MAX as u128)) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_millis_advances() {
        let a = now_millis();
        std::thread::sleep(Duration::from_millis(2));
        let b = now_millis();
        assert!(b > a);
    }

    #[test]
    fn test_window_covers_chunk_size() {
        // A full window spans (2R+1) chunks of CHUNK_SIZE cells.
        let span = (2 * WINDOW_RADIUS + 1) as usize * CHUNK_SIZE;
        assert_eq!(span, 48);
        assert!(WORLD_RADIUS_CHUNKS > WINDOW_RADIUS);
    }
}
