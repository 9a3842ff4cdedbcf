use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{
    api::id::ApiId,
    common::{
        candidate::{CandidateId, Slate},
        voter::{VoterCategory, VoterHandle},
    },
    db::ballot::BallotEvent,
};

/// Identity and token as typed in by a voter.
#[derive(Clone, Deserialize, Serialize)]
pub struct VoterLogin {
    pub identity: String,
    pub token: String,
}

/// A ballot submission. Voters hold no session, so every submission carries
/// its own credentials.
#[derive(Clone, Deserialize, Serialize)]
pub struct BallotRequest {
    #[serde(flatten)]
    pub login: VoterLogin,
    pub candidate: CandidateId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoterHandleDescription {
    pub voter_id: ApiId,
    pub category: VoterCategory,
    pub has_voted: bool,
}

impl From<VoterHandle> for VoterHandleDescription {
    fn from(handle: VoterHandle) -> Self {
        Self {
            voter_id: handle.voter_id.into(),
            category: handle.category,
            has_voted: handle.has_voted,
        }
    }
}

/// Confirmation of a committed ballot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CastReceipt {
    pub voter_id: ApiId,
    pub category: VoterCategory,
    pub candidate_id: CandidateId,
    pub slate: Slate,
    pub cast_at: DateTime<Utc>,
}

impl From<BallotEvent> for CastReceipt {
    fn from(event: BallotEvent) -> Self {
        Self {
            voter_id: event.voter_id.into(),
            category: event.category,
            candidate_id: event.candidate_id,
            slate: event.slate,
            cast_at: event.cast_at,
        }
    }
}
