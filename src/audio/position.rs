//! Wraparound-safe playback position

/// Extends the device's 32-bit played-frame counter into a monotonic
/// 64-bit frame count
///
/// The counter may wrap at most once between two updates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlaybackPosition {
    last_raw: u32,
    wrap_count: u64,
}

impl PlaybackPosition {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the latest raw counter value and return the absolute frame count
    pub fn update(&mut self, raw: u32) -> u64 {
        if raw < self.last_raw {
            self.wrap_count += 1;
        }
        self.last_raw = raw;
        self.absolute()
    }

    pub fn absolute(&self) -> u64 {
        (self.wrap_count << 32) | self.last_raw as u64
    }

    pub fn wrap_count(&self) -> u64 {
        self.wrap_count
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
