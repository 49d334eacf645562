use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Sliding-window admission per key (the contact form keys on sender email).
#[derive(Clone)]
pub struct ContactThrottle {
    windows: Arc<Mutex<HashMap<String, VecDeque<Instant>>>>,
    window: Duration,
    limit: u32,
    max_keys: usize,
}

impl ContactThrottle {
    /// A `limit` of zero disables throttling.
    pub fn new(window: Duration, limit: u32, max_keys: usize) -> Self {
        Self {
            windows: Arc::new(Mutex::new(HashMap::new())),
            window,
            limit,
            max_keys: max_keys.max(1),
        }
    }

    pub fn admit(&self, key: &str) -> bool {
        self.admit_at(&throttle_key(key), Instant::now())
    }

    fn admit_at(&self, key: &str, now: Instant) -> bool {
        if self.limit == 0 {
            return true;
        }

        let mut windows = match self.windows.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let events = windows.entry(key.to_string()).or_default();
        events.retain(|at| now.duration_since(*at) < self.window);
        if events.len() >= self.limit as usize {
            return false;
        }
        events.push_back(now);

        if windows.len() > self.max_keys {
            windows.retain(|_, events| {
                events.back().is_some_and(|last| now.duration_since(*last) < self.window)
            });
        }
        while windows.len() > self.max_keys {
            let Some(stalest) = windows
                .iter()
                .min_by_key(|(_, events)| events.back().copied())
                .map(|(key, _)| key.clone())
            else {
                break;
            };
            windows.remove(&stalest);
        }

        true
    }
}

fn throttle_key(raw: &str) -> String {
    let key = raw.trim().to_ascii_lowercase();
    if key.is_empty() {
        "anonymous".to_string()
    } else {
        key
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_once_limit_is_reached() {
        let throttle = ContactThrottle::new(Duration::from_secs(60), 2, 16);
        assert!(throttle.admit("a@example.com"));
        assert!(throttle.admit("A@Example.com "));
        assert!(!throttle.admit("a@example.com"));
        assert!(throttle.admit("b@example.com"));
    }

    #[test]
    fn window_slides() {
        let throttle = ContactThrottle::new(Duration::from_secs(10), 1, 16);
        let start = Instant::now();
        assert!(throttle.admit_at("k", start));
        assert!(!throttle.admit_at("k", start + Duration::from_secs(5)));
        assert!(throttle.admit_at("k", start + Duration::from_secs(11)));
    }

    #[test]
    fn zero_limit_disables_throttling() {
        let throttle = ContactThrottle::new(Duration::from_secs(60), 0, 16);
        for _ in 0..10 {
            assert!(throttle.admit(""));
        }
    }

    #[test]
    fn stalest_key_is_evicted_over_capacity() {
        let throttle = ContactThrottle::new(Duration::from_secs(60), 1, 2);
        let start = Instant::now();
        assert!(throttle.admit_at("first", start));
        assert!(throttle.admit_at("second", start + Duration::from_secs(1)));
        assert!(throttle.admit_at("third", start + Duration::from_secs(2)));

        // "first" was forgotten, so it is admitted again.
        assert!(throttle.admit_at("first", start + Duration::from_secs(3)));
        assert!(!throttle.admit_at("third", start + Duration::from_secs(3)));
    }
}
