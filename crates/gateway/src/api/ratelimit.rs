//! Per-key fixed-window rate limiting for control-API mutations.

use std::collections::HashMap;

use parking_lot::Mutex;

pub struct RateLimiter {
    per_minute: u32,
    windows: Mutex<HashMap<String, (i64, u32)>>,
}

impl RateLimiter {
    pub fn new(per_minute: u32) -> Self {
        Self {
            per_minute,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Record one hit for `key`; false when the key is over budget for
    /// the current minute.
    pub fn check(&self, key: &str) -> bool {
        if self.per_minute == 0 {
            return true;
        }
        let minute = chrono::Utc::now().timestamp() / 60;
        let mut windows = self.windows.lock();
        // Drop stale windows opportunistically.
        windows.retain(|_, (m, _)| *m == minute);

        let entry = windows.entry(key.to_owned()).or_insert((minute, 0));
        if entry.0 != minute {
            *entry = (minute, 0);
        }
        entry.1 += 1;
        entry.1 <= self.per_minute
    }
}
