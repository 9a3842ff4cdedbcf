use serde::{Deserialize, Serialize};

use crate::model::{
    common::candidate::{CandidateId, Slate},
    db::candidate::Candidate,
};

/// Public candidate information, without any counts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateDescription {
    pub id: CandidateId,
    pub slate: Slate,
    pub number: u32,
    pub name: String,
}

impl From<Candidate> for CandidateDescription {
    fn from(candidate: Candidate) -> Self {
        Self {
            id: candidate.id,
            slate: candidate.slate,
            number: candidate.number,
            name: candidate.name,
        }
    }
}

/// Vote count for a single candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateTally {
    #[serde(flatten)]
    pub candidate: CandidateDescription,
    pub votes: u64,
}

/// Restricts which ballots and candidates a tally covers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TallyFilter {
    pub slate: Option<Slate>,
    /// Only count ballots from voters in this cohort.
    pub cohort: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TallyReport {
    pub filter: TallyFilter,
    pub tallies: Vec<CandidateTally>,
    pub total: u64,
}

impl TallyReport {
    pub fn new(filter: TallyFilter, tallies: Vec<CandidateTally>) -> Self {
        let total = tallies.iter().map(|tally| tally.votes).sum();
        Self {
            filter,
            tallies,
            total,
        }
    }

    /// Votes for the given candidate, if it is part of this report.
    pub fn votes_for(&self, candidate: CandidateId) -> Option<u64> {
        self.tallies
            .iter()
            .find(|tally| tally.candidate.id == candidate)
            .map(|tally| tally.votes)
    }
}
