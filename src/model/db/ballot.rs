use chrono::{DateTime, TimeZone, Utc};
use mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime;
use serde::{Deserialize, Serialize};

use crate::model::{
    common::{
        candidate::{CandidateId, Slate},
        voter::VoterCategory,
    },
    db::{candidate::Candidate, voter::Voter},
    mongodb::Id,
};

/// The immutable record of one cast vote. At most one may exist per voter;
/// the database enforces this with a unique index on `voter_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BallotEvent {
    pub voter_id: Id,
    pub category: VoterCategory,
    pub candidate_id: CandidateId,
    pub slate: Slate,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub cast_at: DateTime<Utc>,
}

impl BallotEvent {
    pub fn new(voter: &Voter, candidate: &Candidate, cast_at: DateTime<Utc>) -> Self {
        Self {
            voter_id: voter.id,
            category: voter.category(),
            candidate_id: candidate.id,
            slate: candidate.slate,
            // Millisecond precision, to match what the database keeps.
            cast_at: Utc
                .timestamp_millis_opt(cast_at.timestamp_millis())
                .single()
                .unwrap_or(cast_at),
        }
    }
}
