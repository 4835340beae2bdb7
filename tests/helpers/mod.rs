#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use cortex::config::CortexConfig;
use cortex::engine::{Clock, Engine};
use cortex::memory::types::MemoryInput;

/// A clock pinned to an adjustable instant.
pub struct TestClock {
    now: std::sync::Mutex<DateTime<Utc>>,
}

impl TestClock {
    pub fn at(now: DateTime<Utc>) -> Arc<Self> {
        Arc::new(Self {
            now: std::sync::Mutex::new(now),
        })
    }

    pub fn advance_hours(&self, hours: i64) {
        let mut now = self.now.lock().unwrap();
        *now += chrono::Duration::hours(hours);
    }

    pub fn advance_days(&self, days: i64) {
        self.advance_hours(days * 24);
    }
}

impl Clock for TestClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

/// Fixed start instant shared by the tests.
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
}

/// Fresh in-memory engine with a controllable clock. Workers are not started;
/// tests drive ticks explicitly.
pub fn test_engine() -> (Arc<Engine>, Arc<TestClock>) {
    let clock = TestClock::at(t0());
    let engine = Engine::in_memory_with_clock(CortexConfig::default(), clock.clone()).unwrap();
    (engine, clock)
}

/// Minimal memory input.
pub fn input(title: &str, content: &str) -> MemoryInput {
    MemoryInput {
        title: title.into(),
        content: content.into(),
        ..Default::default()
    }
}

/// Memory input with an explicit salience override.
pub fn input_with_importance(title: &str, content: &str, importance: f64) -> MemoryInput {
    MemoryInput {
        importance: Some(importance),
        ..input(title, content)
    }
}
