use chrono::{DateTime, Utc};
use mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime;
use serde::{Deserialize, Serialize};

use crate::model::common::phase::{ElectionPhase, PhaseWindow};

/// `_id` of the singleton phase document in the settings collection.
pub const PHASE_SETTING_ID: &str = "election_phase";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbPhaseWindow {
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub start: DateTime<Utc>,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub end: DateTime<Utc>,
}

/// The persisted election phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseSetting {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub window: Option<DbPhaseWindow>,
}

impl From<PhaseWindow> for DbPhaseWindow {
    fn from(window: PhaseWindow) -> Self {
        Self {
            start: window.start,
            end: window.end,
        }
    }
}

impl From<DbPhaseWindow> for PhaseWindow {
    fn from(window: DbPhaseWindow) -> Self {
        Self {
            start: window.start,
            end: window.end,
        }
    }
}

impl From<PhaseSetting> for ElectionPhase {
    fn from(setting: PhaseSetting) -> Self {
        Self {
            active: setting.active,
            window: setting.window.map(Into::into),
        }
    }
}
