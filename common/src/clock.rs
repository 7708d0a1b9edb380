//! Canonical wall-clock source.
//!
//! Every timestamp the autopilot persists or emits uses the same canonical
//! form: UTC, millisecond precision, trailing `Z`. The form sorts
//! lexicographically, which the marker and cursor comparisons rely on.

use chrono::{DateTime, SecondsFormat, Utc};

/// Source of the current instant. Injected so that the tick pipeline can be
/// driven with a fixed clock in tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    fn now_canonical(&self) -> String {
        canonical(self.now())
    }
}

/// Process-wide wall clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Settable clock for deterministic tests.
#[derive(Debug)]
pub struct FixedClock {
    at: std::sync::RwLock<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(at: DateTime<Utc>) -> Self {
        Self {
            at: std::sync::RwLock::new(at),
        }
    }

    pub fn set(&self, at: DateTime<Utc>) {
        if let Ok(mut slot) = self.at.write() {
            *slot = at;
        }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.at
            .read()
            .map(|slot| *slot)
            .unwrap_or(DateTime::UNIX_EPOCH)
    }
}

/// Formats an instant in the canonical form, e.g. `2026-02-28T00:00:00.000Z`.
pub fn canonical(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parses any RFC 3339 instant back to UTC. Returns `None` for malformed
/// input; callers decide whether that means "absent" or "corrupt".
pub fn parse_canonical(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|at| at.with_timezone(&Utc))
}
