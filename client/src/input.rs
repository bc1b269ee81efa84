//! Input generation with sequencing and fixed-rate throttling.
//!
//! Headless client: movement comes from a scripted wander rather than a
//! keyboard, but the throttling and sequencing are exactly what a rendered
//! client would use. Inputs go out at a fixed interval regardless of how
//! fast the rest of the client loop runs.

use rand::Rng;
use shared::{now_millis, INPUT_INTERVAL_MS, PLAYER_SPEED};
use std::time::{Duration, Instant};

/// One displacement report, ready to be sent and predicted.
#[derive(Debug, Clone)]
pub struct OutgoingInput {
    pub sequence: u32,
    pub timestamp: u64,
    pub dir: f32,
    pub dx: f32,
    pub dy: f32,
}

pub struct InputGenerator {
    next_sequence: u32,
    last_sent: Option<Instant>,
    heading: f32,
    /// Fraction of full speed to wander at; full speed leaves no headroom
    /// and a single timing hiccup would trip the server's movement bound.
    throttle: f32,
}

impl InputGenerator {
    pub fn new() -> Self {
        Self {
            next_sequence: 1,
            last_sent: None,
            heading: 0.0,
            throttle: 0.6,
        }
    }

    /// Produces the next input if the send interval has elapsed.
    pub fn poll(&mut self) -> Option<OutgoingInput> {
        let interval = Duration::from_millis(INPUT_INTERVAL_MS);
        if let Some(last) = self.last_sent {
            if last.elapsed() < interval {
                return None;
            }
        }
        self.last_sent = Some(Instant::now());

        let mut rng = rand::thread_rng();
        // Drunken walk: nudge the heading, occasionally turn hard.
        self.heading += rng.gen_range(-0.3..0.3);
        if rng.gen_bool(0.05) {
            self.heading += std::f32::consts::PI * rng.gen_range(-0.5..0.5);
        }
        self.heading = self.heading.rem_euclid(std::f32::consts::TAU);
        if self.heading > std::f32::consts::PI {
            self.heading -= std::f32::consts::TAU;
        }

        let distance = PLAYER_SPEED * self.throttle * (INPUT_INTERVAL_MS as f32 / 1000.0);
        let input = OutgoingInput {
            sequence: self.next_sequence,
            timestamp: now_millis(),
            dir: self.heading,
            dx: self.heading.cos() * distance,
            dy: self.heading.sin() * distance,
        };
        self.next_sequence += 1;
        Some(input)
    }
}

impl Default for InputGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::MOVE_EPSILON;

    #[test]
    fn test_sequences_are_monotone() {
        let mut gen = InputGenerator::new();
        let a = gen.poll().unwrap();
        gen.last_sent = None; // bypass throttling
        let b = gen.poll().unwrap();
        assert_eq!(b.sequence, a.sequence + 1);
    }

    #[test]
    fn test_throttled_between_intervals() {
        let mut gen = InputGenerator::new();
        assert!(gen.poll().is_some());
        assert!(gen.poll().is_none());
    }

    #[test]
    fn test_displacement_within_server_bound() {
        let mut gen = InputGenerator::new();
        for _ in 0..50 {
            gen.last_sent = None;
            let input = gen.poll().unwrap();
            let distance = (input.dx * input.dx + input.dy * input.dy).sqrt();
            let max = PLAYER_SPEED * (INPUT_INTERVAL_MS as f32 / 1000.0) + MOVE_EPSILON;
            assert!(distance <= max, "distance {} exceeds bound {}", distance, max);
            assert!(input.dir > -std::f32::consts::PI - 0.001);
            assert!(input.dir <= std::f32::consts::PI + 0.001);
        }
    }
}
