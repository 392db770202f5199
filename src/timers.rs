// ⏱️ Timers - named elapsed times reported with every response

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

pub const OVERALL: &str = "overall";

/// Accumulating named timers. Starting a running timer is a no-op; a timer
/// can be started and stopped several times and its durations add up.
#[derive(Debug, Clone)]
pub struct Timers {
    created: Instant,
    running: BTreeMap<String, Instant>,
    elapsed: BTreeMap<String, Duration>,
}

impl Default for Timers {
    fn default() -> Self {
        Self::new()
    }
}

impl Timers {
    pub fn new() -> Self {
        Self {
            created: Instant::now(),
            running: BTreeMap::new(),
            elapsed: BTreeMap::new(),
        }
    }

    pub fn start(&mut self, name: &str) {
        self.running
            .entry(name.to_string())
            .or_insert_with(Instant::now);
    }

    pub fn stop(&mut self, name: &str) {
        if let Some(started) = self.running.remove(name) {
            self.record(name, started.elapsed());
        }
    }

    pub fn record(&mut self, name: &str, duration: Duration) {
        *self.elapsed.entry(name.to_string()).or_default() += duration;
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.running.contains_key(name)
    }

    /// Milliseconds per timer, running timers included up to now, plus the
    /// overall time since creation
    pub fn millis(&self) -> BTreeMap<String, u64> {
        let now = Instant::now();
        let mut totals = self.elapsed.clone();
        for (name, started) in &self.running {
            *totals.entry(name.clone()).or_default() += now.duration_since(*started);
        }
        let mut millis: BTreeMap<String, u64> = totals
            .into_iter()
            .map(|(name, d)| (name, d.as_millis() as u64))
            .collect();
        millis.insert(
            OVERALL.to_string(),
            now.duration_since(self.created).as_millis() as u64,
        );
        millis
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recorded_durations_accumulate() {
        let mut timers = Timers::new();
        timers.record("engine", Duration::from_millis(5));
        timers.record("engine", Duration::from_millis(7));

        let millis = timers.millis();
        assert_eq!(millis["engine"], 12);
        assert!(millis.contains_key(OVERALL));
    }

    #[test]
    fn test_start_stop() {
        let mut timers = Timers::new();
        timers.start("enqueued");
        assert!(timers.is_running("enqueued"));
        timers.stop("enqueued");
        assert!(!timers.is_running("enqueued"));

        // stopping a timer that never started changes nothing
        timers.stop("missing");
        assert!(timers.millis().contains_key("enqueued"));
        assert!(!timers.millis().contains_key("missing"));
    }
}
