// =============================================================================
// Per-symbol cooldown — blocks re-entry for a fixed window after a close
// =============================================================================

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

pub struct Cooldowns {
    last_closed_at: RwLock<HashMap<String, Instant>>,
    window: Duration,
}

impl Cooldowns {
    pub fn new(window_sec: u64) -> Self {
        Self {
            last_closed_at: RwLock::new(HashMap::new()),
            window: Duration::from_secs(window_sec),
        }
    }

    pub fn mark_closed(&self, symbol: &str) {
        self.last_closed_at
            .write()
            .insert(symbol.to_string(), Instant::now());
    }

    /// `true` while `symbol` is still within its post-close cooldown window.
    pub fn is_active(&self, symbol: &str) -> bool {
        match self.last_closed_at.read().get(symbol) {
            Some(at) => at.elapsed() < self.window,
            None => false,
        }
    }

    pub fn remaining(&self, symbol: &str) -> Option<Duration> {
        let at = *self.last_closed_at.read().get(symbol)?;
        self.window.checked_sub(at.elapsed())
    }
}
