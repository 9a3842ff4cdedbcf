use crate::{
    model::api::{
        ledger::{ConsistencyReport, LedgerDump},
        tally::{CandidateTally, TallyFilter, TallyReport},
    },
    store::DynStore,
};

use super::VoteError;

/// Read-only view of the election's counts.
#[derive(Clone)]
pub struct TallyQueryService {
    store: DynStore,
}

impl TallyQueryService {
    pub fn new(store: DynStore) -> Self {
        Self { store }
    }

    /// Per-candidate vote counts.
    ///
    /// Without a cohort the cached counters are served. With one, ballots are
    /// counted directly, joined against the voters' cohorts.
    pub async fn list_tallies(&self, filter: TallyFilter) -> Result<TallyReport, VoteError> {
        let candidates = self.store.candidates(filter.slate).await?;
        let tallies = match &filter.cohort {
            None => candidates
                .into_iter()
                .map(|candidate| CandidateTally {
                    votes: candidate.vote_count,
                    candidate: candidate.into(),
                })
                .collect(),
            Some(cohort) => {
                let counts = self.store.ballot_counts(Some(cohort)).await?;
                candidates
                    .into_iter()
                    .map(|candidate| CandidateTally {
                        votes: counts.get(&candidate.id).copied().unwrap_or(0),
                        candidate: candidate.into(),
                    })
                    .collect()
            }
        };
        Ok(TallyReport::new(filter, tallies))
    }

    /// Candidates, ballots and voted flags from one consistent snapshot.
    pub async fn ledger_dump(&self) -> Result<LedgerDump, VoteError> {
        Ok(self.store.ledger_snapshot().await?.into())
    }

    /// Reconcile the cached counters and voted flags against the ballots.
    /// Any discrepancy is a bug and is logged as such.
    pub async fn consistency(&self) -> Result<ConsistencyReport, VoteError> {
        let report = self.ledger_dump().await?.verify();
        if report.is_consistent() {
            debug!("Ledger consistency check passed");
        } else {
            error!("Ledger consistency check FAILED: {report:?}");
        }
        Ok(report)
    }
}
