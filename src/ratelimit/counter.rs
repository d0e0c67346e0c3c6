//! Rate limit counter entries and fixed-window arithmetic.

/// A fixed-window counter for a single rate-limit key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitEntry {
    /// The rate-limit key this entry belongs to
    pub key: String,
    /// Requests counted in the current window
    pub count: u64,
    /// When the current window started (ms since epoch)
    pub window_start: u64,
    /// Length of the current window in milliseconds
    pub window_ms: u64,
}

impl RateLimitEntry {
    /// Start a new window containing one request.
    pub fn new(key: &str, window_ms: u64, now_ms: u64) -> Self {
        Self {
            key: key.to_string(),
            count: 1,
            window_start: now_ms,
            window_ms,
        }
    }

    /// When the current window ends (exclusive).
    pub fn window_end(&self) -> u64 {
        self.window_start.saturating_add(self.window_ms)
    }

    /// Whether the window has elapsed at `now_ms`.
    ///
    /// Windows are half-open, so a request landing exactly on the window end
    /// belongs to the next window. A zero-length window is always expired.
    pub fn is_expired(&self, now_ms: u64) -> bool {
        self.window_ms == 0 || now_ms >= self.window_end()
    }

    /// Reset the entry in place to a fresh window containing one request.
    pub fn restart(&mut self, window_ms: u64, now_ms: u64) {
        self.count = 1;
        self.window_start = now_ms;
        self.window_ms = window_ms;
    }

    /// Count one more request, never going past `ceiling`.
    pub fn increment(&mut self, ceiling: u64) {
        if self.count < ceiling {
            self.count += 1;
        }
    }
}
