use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{
    api::id::ApiId,
    common::{
        candidate::{CandidateId, Slate},
        voter::VoterCategory,
    },
    db::{ballot::BallotEvent, candidate::Candidate},
    mongodb::Id,
};

/// A candidate together with its cached vote counter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedTotal {
    pub candidate_id: CandidateId,
    pub slate: Slate,
    pub name: String,
    pub vote_count: u64,
}

/// API-friendly ballot event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BallotRecord {
    pub voter_id: ApiId,
    pub category: VoterCategory,
    pub candidate_id: CandidateId,
    pub slate: Slate,
    pub cast_at: DateTime<Utc>,
}

impl From<BallotEvent> for BallotRecord {
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

/// Everything needed to audit the ledger, read from one consistent snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerDump {
    pub candidates: Vec<CachedTotal>,
    pub ballots: Vec<BallotRecord>,
    /// Voters whose `has_voted` flag is set.
    pub voted_voters: Vec<ApiId>,
}

/// Raw snapshot as read from storage.
#[derive(Debug, Clone, Default)]
pub struct LedgerSnapshot {
    pub candidates: Vec<Candidate>,
    pub ballots: Vec<BallotEvent>,
    pub voted_voters: Vec<Id>,
}

impl From<LedgerSnapshot> for LedgerDump {
    fn from(snapshot: LedgerSnapshot) -> Self {
        let mut voted_voters: Vec<ApiId> =
            snapshot.voted_voters.into_iter().map(Into::into).collect();
        voted_voters.sort();
        Self {
            candidates: snapshot
                .candidates
                .into_iter()
                .map(|candidate| CachedTotal {
                    candidate_id: candidate.id,
                    slate: candidate.slate,
                    name: candidate.name,
                    vote_count: candidate.vote_count,
                })
                .collect(),
            ballots: snapshot.ballots.into_iter().map(Into::into).collect(),
            voted_voters,
        }
    }
}

/// A candidate whose cached counter disagrees with the ballot events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TallyDrift {
    pub candidate_id: CandidateId,
    pub cached: u64,
    pub counted: u64,
}

/// Result of reconciling the cached counters and voter flags against the
/// ballot events.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsistencyReport {
    pub tally_drift: Vec<TallyDrift>,
    /// Voters with more than one ballot event.
    pub duplicate_ballots: Vec<ApiId>,
    /// Voters flagged as having voted but without a ballot event.
    pub flagged_without_ballot: Vec<ApiId>,
    /// Voters with a ballot event but without the flag.
    pub ballot_without_flag: Vec<ApiId>,
    /// Voters whose ballot references a candidate that does not exist.
    pub unknown_candidate: Vec<ApiId>,
}

impl ConsistencyReport {
    pub fn is_consistent(&self) -> bool {
        self.tally_drift.is_empty()
            && self.duplicate_ballots.is_empty()
            && self.flagged_without_ballot.is_empty()
            && self.ballot_without_flag.is_empty()
            && self.unknown_candidate.is_empty()
    }
}

impl LedgerDump {
    /// Count ballot events per candidate. Every known candidate is present,
    /// even with zero votes.
    pub fn counted(&self) -> BTreeMap<CandidateId, u64> {
        let mut counts: BTreeMap<CandidateId, u64> = self
            .candidates
            .iter()
            .map(|candidate| (candidate.candidate_id, 0))
            .collect();
        for ballot in &self.ballots {
            *counts.entry(ballot.candidate_id).or_default() += 1;
        }
        counts
    }

    /// Check every invariant the ledger is supposed to maintain.
    pub fn verify(&self) -> ConsistencyReport {
        let counted = self.counted();
        let tally_drift = self
            .candidates
            .iter()
            .filter_map(|candidate| {
                let counted = counted.get(&candidate.candidate_id).copied().unwrap_or(0);
                (counted != candidate.vote_count).then_some(TallyDrift {
                    candidate_id: candidate.candidate_id,
                    cached: candidate.vote_count,
                    counted,
                })
            })
            .collect();

        let mut ballots_per_voter: HashMap<ApiId, u64> = HashMap::new();
        for ballot in &self.ballots {
            *ballots_per_voter.entry(ballot.voter_id).or_default() += 1;
        }
        let mut duplicate_ballots: Vec<ApiId> = ballots_per_voter
            .iter()
            .filter(|(_, count)| **count > 1)
            .map(|(voter, _)| *voter)
            .collect();
        duplicate_ballots.sort();

        let flagged: BTreeSet<ApiId> = self.voted_voters.iter().copied().collect();
        let with_ballot: BTreeSet<ApiId> = ballots_per_voter.keys().copied().collect();
        let flagged_without_ballot = flagged.difference(&with_ballot).copied().collect();
        let ballot_without_flag = with_ballot.difference(&flagged).copied().collect();

        let known: BTreeSet<CandidateId> = self
            .candidates
            .iter()
            .map(|candidate| candidate.candidate_id)
            .collect();
        let mut unknown_candidate: Vec<ApiId> = self
            .ballots
            .iter()
            .filter(|ballot| !known.contains(&ballot.candidate_id))
            .map(|ballot| ballot.voter_id)
            .collect();
        unknown_candidate.sort();

        ConsistencyReport {
            tally_drift,
            duplicate_ballots,
            flagged_without_ballot,
            ballot_without_flag,
            unknown_candidate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(id: CandidateId, vote_count: u64) -> CachedTotal {
        CachedTotal {
            candidate_id: id,
            slate: Slate::Senior,
            name: format!("Candidate {id}"),
            vote_count,
        }
    }

    fn ballot(voter: ApiId, candidate_id: CandidateId) -> BallotRecord {
        BallotRecord {
            voter_id: voter,
            category: VoterCategory::Student,
            candidate_id,
            slate: Slate::Senior,
            cast_at: Utc::now(),
        }
    }

    #[test]
    fn consistent_ledger() {
        let (a, b) = (ApiId::from(Id::new()), ApiId::from(Id::new()));
        let dump = LedgerDump {
            candidates: vec![candidate(7, 2), candidate(8, 0)],
            ballots: vec![ballot(a, 7), ballot(b, 7)],
            voted_voters: vec![a, b],
        };
        let report = dump.verify();
        assert!(report.is_consistent(), "{report:?}");
        assert_eq!(dump.counted().get(&8), Some(&0));
    }

    #[test]
    fn detects_every_kind_of_drift() {
        let (a, b, c) = (
            ApiId::from(Id::new()),
            ApiId::from(Id::new()),
            ApiId::from(Id::new()),
        );
        let dump = LedgerDump {
            candidates: vec![candidate(7, 1)],
            ballots: vec![ballot(a, 7), ballot(a, 7), ballot(b, 99)],
            voted_voters: vec![a, c],
        };
        let report = dump.verify();
        assert!(!report.is_consistent());
        assert_eq!(
            report.tally_drift,
            vec![TallyDrift {
                candidate_id: 7,
                cached: 1,
                counted: 2
            }]
        );
        assert_eq!(report.duplicate_ballots, vec![a]);
        assert_eq!(report.flagged_without_ballot, vec![c]);
        assert_eq!(report.ballot_without_flag, vec![b]);
        assert_eq!(report.unknown_candidate, vec![b]);
    }
}
