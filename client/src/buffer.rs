//! Delayed playback buffering for server-timestamped state.
//!
//! The client renders remote state slightly in the past: snapshots are held
//! in a buffer keyed by server timestamp, and playback runs `render_delay`
//! milliseconds behind the estimated server clock, so under normal jitter a
//! future sample is always available to interpolate towards.

/// Buffer of timestamped values replayed on a delayed server timeline.
///
/// The server clock offset is estimated once, from the first value received:
/// thereafter `local now - offset` maps local time onto the delayed server
/// timeline. A fixed first-sample estimate keeps playback speed exactly 1.0;
/// a running estimate would stretch or compress time with every jitter spike.
#[derive(Debug)]
pub struct PlaybackBuffer<T> {
    entries: Vec<(u64, T)>,
    /// `local_receive - server_timestamp + render_delay`, set on first push.
    /// Signed: a client clock behind the server's makes it negative.
    server_delay: Option<i64>,
    render_delay: u64,
}

impl<T> PlaybackBuffer<T> {
    pub fn new(render_delay: u64) -> Self {
        Self {
            entries: Vec::new(),
            server_delay: None,
            render_delay,
        }
    }

    /// Inserts a value stamped with server time, keeping entries ordered.
    ///
    /// Out-of-order arrival is expected over UDP; an entry older than the
    /// current playback position is still inserted and simply never sampled.
    pub fn push(&mut self, server_time: u64, value: T, local_now: u64) {
        if self.server_delay.is_none() {
            self.server_delay =
                Some(local_now as i64 - server_time as i64 + self.render_delay as i64);
        }

        let pos = self
            .entries
            .iter()
            .position(|(t, _)| *t > server_time)
            .unwrap_or(self.entries.len());
        self.entries.insert(pos, (server_time, value));

        if let Some(target) = self.playback_time(local_now) {
            self.purge_before(target);
        }
    }

    /// Server-timeline instant currently being played back, `render_delay`
    /// behind the live server clock. None before the first push.
    pub fn playback_time(&self, local_now: u64) -> Option<u64> {
        let delay = self.server_delay?;
        let t = local_now as i64 - delay;
        Some(t.max(0) as u64)
    }

    /// Index of the newest entry at or before `target`.
    pub fn base_index(&self, target: u64) -> Option<usize> {
        self.entries.iter().rposition(|(t, _)| *t <= target)
    }

    /// Drops entries that can no longer serve as an interpolation base:
    /// everything strictly before the newest entry at or before `target`.
    fn purge_before(&mut self, target: u64) {
        if let Some(base) = self.base_index(target) {
            if base > 0 {
                self.entries.drain(..base);
            }
        }
    }

    pub fn entries(&self) -> &[(u64, T)] {
        &self.entries
    }

    pub fn latest(&self) -> Option<&T> {
        self.entries.last().map(|(_, v)| v)
    }

    pub fn latest_timestamp(&self) -> Option<u64> {
        self.entries.last().map(|(t, _)| *t)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
