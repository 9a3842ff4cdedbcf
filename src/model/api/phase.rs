use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::common::phase::{ElectionPhase, PhaseWindow};

/// The election phase as seen at a particular moment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseDescription {
    /// The stored on/off flag.
    pub active: bool,
    /// Whether voting is permitted right now, taking the window into account.
    pub open: bool,
    pub window: Option<PhaseWindow>,
}

impl PhaseDescription {
    pub fn at(phase: ElectionPhase, now: DateTime<Utc>) -> Self {
        Self {
            active: phase.active,
            open: phase.is_open(now),
            window: phase.window,
        }
    }
}
