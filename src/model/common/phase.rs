use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Optional voting window. Both ends are inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl PhaseWindow {
    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        self.start <= now && now <= self.end
    }

    pub fn is_well_formed(&self) -> bool {
        self.start < self.end
    }
}

/// The election's global open/closed state.
///
/// The `active` flag and the window are independent controls: a configured
/// window has no effect while the flag is off, and the flag is never cleared
/// automatically when the window ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectionPhase {
    pub active: bool,
    pub window: Option<PhaseWindow>,
}

impl ElectionPhase {
    /// Are authentication and vote casting permitted at `now`?
    pub fn is_open(&self, now: DateTime<Utc>) -> bool {
        self.active && self.window.map_or(true, |window| window.contains(now))
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn window_around(now: DateTime<Utc>) -> PhaseWindow {
        PhaseWindow {
            start: now - Duration::hours(1),
            end: now + Duration::hours(1),
        }
    }

    #[test]
    fn inactive_is_closed_even_inside_window() {
        let now = Utc::now();
        let phase = ElectionPhase {
            active: false,
            window: Some(window_around(now)),
        };
        assert!(!phase.is_open(now));
        assert!(!ElectionPhase::default().is_open(now));
    }

    #[test]
    fn active_without_window_is_open() {
        let phase = ElectionPhase {
            active: true,
            window: None,
        };
        assert!(phase.is_open(Utc::now()));
    }

    #[test]
    fn window_bounds_are_inclusive() {
        let now = Utc::now();
        let window = window_around(now);
        let phase = ElectionPhase {
            active: true,
            window: Some(window),
        };
        assert!(phase.is_open(window.start));
        assert!(phase.is_open(window.end));
        assert!(!phase.is_open(window.start - Duration::seconds(1)));
        assert!(!phase.is_open(window.end + Duration::seconds(1)));
    }

    #[test]
    fn window_well_formedness() {
        let now = Utc::now();
        assert!(window_around(now).is_well_formed());
        let empty = PhaseWindow {
            start: now,
            end: now,
        };
        assert!(!empty.is_well_formed());
    }
}
