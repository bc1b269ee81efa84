//! Interpolated sampling over playback buffers.

use crate::buffer::PlaybackBuffer;
use shared::DynamicState;

pub fn lerp(a: f32, b: f32, alpha: f32) -> f32 {
    a + (b - a) * alpha
}

/// Interpolates an angle in radians along the shortest arc, so a heading
/// crossing the pi/-pi seam never sweeps the long way around.
pub fn lerp_angle(a: f32, b: f32, alpha: f32) -> f32 {
    let tau = std::f32::consts::TAU;
    let mut diff = (b - a) % tau;
    if diff > std::f32::consts::PI {
        diff -= tau;
    } else if diff < -std::f32::consts::PI {
        diff += tau;
    }
    a + diff * alpha
}

/// State that can be blended between two buffered samples.
pub trait Interpolate {
    fn interpolate(&self, other: &Self, alpha: f32) -> Self;
}

impl Interpolate for DynamicState {
    fn interpolate(&self, other: &Self, alpha: f32) -> Self {
        DynamicState {
            x: lerp(self.x, other.x, alpha),
            y: lerp(self.y, other.y, alpha),
            dir: lerp_angle(self.dir, other.dir, alpha),
            scale: lerp(self.scale, other.scale, alpha),
            health: lerp(self.health, other.health, alpha),
            falling: other.falling,
        }
    }
}

impl<T: Interpolate + Clone> PlaybackBuffer<T> {
    /// State at the current playback instant.
    ///
    /// Interpolates between the two entries bracketing the playback time.
    /// Never extrapolates: past the newest entry the newest state is held
    /// as-is until fresher data arrives, and before the oldest entry the
    /// oldest state is returned.
    pub fn sample(&self, local_now: u64) -> Option<T> {
        let target = self.playback_time(local_now)?;
        let entries = self.entries();

        let base = match self.base_index(target) {
            Some(base) => base,
            // Playback sits before everything buffered (heavy reordering);
            // hold the oldest known state.
            None => return entries.first().map(|(_, v)| v.clone()),
        };

        let (t0, v0) = &entries[base];
        match entries.get(base + 1) {
            Some((t1, v1)) if t1 > t0 => {
                let alpha = (target - t0) as f32 / (t1 - t0) as f32;
                Some(v0.interpolate(v1, alpha.clamp(0.0, 1.0)))
            }
            // Equal timestamps or no future entry yet.
            Some((_, v1)) => Some(v1.clone()),
            None => Some(v0.clone()),
        }
    }
}
