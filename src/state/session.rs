//! Race sessions and the bounded archive of finished ones.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Kind of session announced by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    Practice,
    Qualifying,
    Race,
    Unknown,
}

impl SessionKind {
    /// Classify a session announcement. Matching ignores case.
    pub fn detect(text: &str) -> Self {
        let upper = text.to_ascii_uppercase();
        if upper.contains("PRACTICE") {
            Self::Practice
        } else if upper.contains("QUALIFY") {
            Self::Qualifying
        } else if upper.contains("RACE") {
            Self::Race
        } else {
            Self::Unknown
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Practice => "practice",
            Self::Qualifying => "qualifying",
            Self::Race => "race",
            Self::Unknown => "unknown",
        }
    }

    /// Numeric encoding used by the session type gauge.
    pub fn gauge_value(&self) -> f64 {
        match self {
            Self::Practice => 0.0,
            Self::Qualifying => 1.0,
            Self::Race => 2.0,
            Self::Unknown => -1.0,
        }
    }
}

impl std::fmt::Display for SessionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Session {
    pub kind: SessionKind,
    pub track: String,
    pub started_at: DateTime<Utc>,
    /// Set when the session is archived.
    pub ended_at: Option<DateTime<Utc>>,
    /// Remaining time as printed by the server (e.g. `20:00`).
    pub remaining: Option<String>,
}

impl Session {
    pub fn new(kind: SessionKind, track: impl Into<String>, remaining: Option<String>) -> Self {
        Self {
            kind,
            track: track.into(),
            started_at: Utc::now(),
            ended_at: None,
            remaining,
        }
    }

    /// Wall-clock length of the session, up to now if it is still running.
    pub fn elapsed(&self) -> Duration {
        let end = self.ended_at.unwrap_or_else(Utc::now);
        end.signed_duration_since(self.started_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    /// Remaining time in seconds, when the server printed a parseable value.
    ///
    /// Accepts `mm:ss`, `hh:mm:ss`, a bare number of minutes, or unit suffixed
    /// durations such as `20m`.
    pub fn remaining_secs(&self) -> Option<u64> {
        let raw = self.remaining.as_deref()?.trim();
        if raw.contains(':') {
            let mut total = 0u64;
            for part in raw.split(':') {
                total = total.checked_mul(60)?.checked_add(part.trim().parse().ok()?)?;
            }
            return Some(total);
        }
        if let Ok(minutes) = raw.parse::<u64>() {
            return minutes.checked_mul(60);
        }
        let compact: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
        crate::config::parse_duration(&compact.to_ascii_lowercase().replace("min", "m"))
            .ok()
            .map(|d| d.as_secs())
    }
}

/// Finished sessions, oldest first, capped at a fixed capacity.
#[derive(Debug, Clone)]
pub struct SessionHistory {
    entries: VecDeque<Session>,
    capacity: usize,
}

impl SessionHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Archive a session, evicting the oldest entry when full.
    pub fn push(&mut self, session: Session) {
        if self.capacity == 0 {
            return;
        }
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(session);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Session> {
        self.entries.iter()
    }

    pub fn latest(&self) -> Option<&Session> {
        self.entries.back()
    }
}

impl Default for SessionHistory {
    fn default() -> Self {
        Self::new(10)
    }
}
