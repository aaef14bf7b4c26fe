//! Admission gate for outbound ticks.
//!
//! Lossy by construction: a tick arriving inside the window is dropped, never
//! queued, so the reader always sees the freshest value the window allows.
//!
//! One limiter is shared by every source task of a session; the window state
//! sits behind a mutex so near-simultaneous admissions cannot both win.

use ahash::AHashMap;
use parking_lot::Mutex;
use tick_core::{RateLimitMode, RateLimitPolicy, Tick};
use tokio::time::Instant;

enum Window {
    Off,
    Global(Option<Instant>),
    PerSymbol(AHashMap<String, Instant>),
}

pub struct RateLimiter {
    policy: RateLimitPolicy,
    window: Mutex<Window>,
}

impl RateLimiter {
    pub fn new(policy: RateLimitPolicy) -> Self {
        let window = match policy.mode {
            RateLimitMode::Off => Window::Off,
            RateLimitMode::Global => Window::Global(None),
            RateLimitMode::PerSymbol => Window::PerSymbol(AHashMap::new()),
        };
        Self {
            policy,
            window: Mutex::new(window),
        }
    }

    pub fn policy(&self) -> RateLimitPolicy {
        self.policy
    }

    /// Decide whether `tick` goes out at time `now`.
    ///
    /// Admits when nothing has been admitted yet for the window or when at
    /// least `interval` has elapsed since the last admission. An admission
    /// records `now` as the new window start.
    pub fn admit(&self, tick: &Tick, now: Instant) -> bool {
        let interval = self.policy.interval;
        let open = |last: Option<Instant>| match last {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= interval,
        };

        let mut window = self.window.lock();
        match &mut *window {
            Window::Off => true,
            Window::Global(last) => {
                if open(*last) {
                    *last = Some(now);
                    true
                } else {
                    false
                }
            }
            Window::PerSymbol(map) => {
                if open(map.get(tick.symbol.as_str()).copied()) {
                    map.insert(tick.symbol.clone(), now);
                    true
                } else {
                    false
                }
            }
        }
    }
}
