use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use rocket::tokio::sync::{Mutex, OwnedMutexGuard};

use crate::model::{
    api::ledger::LedgerSnapshot,
    common::{
        candidate::{CandidateId, Slate},
        phase::{ElectionPhase, PhaseWindow},
        voter::VoterCategory,
    },
    db::{
        admin::{NewOperator, Operator, OperatorCore},
        ballot::BallotEvent,
        candidate::Candidate,
        voter::{Credential, NewVoter, Voter, VoterCore},
    },
    mongodb::Id,
};

use super::{LedgerTxn, Store, StoreError};

#[derive(Debug, Default)]
struct MemoryState {
    voters: BTreeMap<Id, VoterCore>,
    candidates: BTreeMap<CandidateId, Candidate>,
    /// Keyed by voter, which makes one-ballot-per-voter structural.
    ballots: BTreeMap<Id, BallotEvent>,
    phase: ElectionPhase,
    operators: BTreeMap<Id, OperatorCore>,
}

impl MemoryState {
    fn voter(&self, id: Id) -> Option<Voter> {
        self.voters.get(&id).map(|voter| Voter {
            id,
            voter: voter.clone(),
        })
    }
}

/// A store that lives in process memory.
///
/// Transactions hold the store's lock from `begin` until they finish, so they
/// are trivially serializable. The lock is per process: this store must not
/// back more than one service instance.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[rocket::async_trait]
impl Store for MemoryStore {
    async fn insert_voter(&self, voter: &NewVoter) -> Result<Id, StoreError> {
        let mut state = self.state.lock().await;
        let taken = state.voters.values().any(|existing| {
            existing.category() == voter.category() && existing.profile.key() == voter.profile.key()
        });
        if taken {
            return Err(StoreError::Duplicate);
        }
        let id = Id::new();
        state.voters.insert(id, voter.clone());
        Ok(id)
    }

    async fn voter(&self, id: Id) -> Result<Option<Voter>, StoreError> {
        Ok(self.state.lock().await.voter(id))
    }

    async fn voter_by_key(
        &self,
        category: VoterCategory,
        key: &str,
    ) -> Result<Option<Voter>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .voters
            .iter()
            .find(|(_, voter)| voter.category() == category && voter.profile.key() == key)
            .map(|(id, voter)| Voter {
                id: *id,
                voter: voter.clone(),
            }))
    }

    async fn replace_credential(
        &self,
        id: Id,
        credential: &Credential,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        match state.voters.get_mut(&id) {
            Some(voter) => {
                voter.credential = Some(credential.clone());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn insert_candidate(&self, candidate: &Candidate) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if state.candidates.contains_key(&candidate.id) {
            return Err(StoreError::Duplicate);
        }
        state.candidates.insert(candidate.id, candidate.clone());
        Ok(())
    }

    async fn candidates(&self, slate: Option<Slate>) -> Result<Vec<Candidate>, StoreError> {
        let state = self.state.lock().await;
        let mut candidates: Vec<Candidate> = state
            .candidates
            .values()
            .filter(|candidate| slate.map_or(true, |slate| candidate.slate == slate))
            .cloned()
            .collect();
        candidates.sort_by_key(|candidate| (candidate.slate, candidate.number));
        Ok(candidates)
    }

    async fn ballot_counts(
        &self,
        cohort: Option<&str>,
    ) -> Result<HashMap<CandidateId, u64>, StoreError> {
        let state = self.state.lock().await;
        let mut counts = HashMap::new();
        for ballot in state.ballots.values() {
            if let Some(cohort) = cohort {
                let in_cohort = state
                    .voters
                    .get(&ballot.voter_id)
                    .and_then(|voter| voter.cohort.as_deref())
                    == Some(cohort);
                if !in_cohort {
                    continue;
                }
            }
            *counts.entry(ballot.candidate_id).or_default() += 1;
        }
        Ok(counts)
    }

    async fn ballots_by_voter(&self, voter: Id) -> Result<Vec<BallotEvent>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.ballots.get(&voter).cloned().into_iter().collect())
    }

    async fn ledger_snapshot(&self) -> Result<LedgerSnapshot, StoreError> {
        let state = self.state.lock().await;
        Ok(LedgerSnapshot {
            candidates: state.candidates.values().cloned().collect(),
            ballots: state.ballots.values().cloned().collect(),
            voted_voters: state
                .voters
                .iter()
                .filter(|(_, voter)| voter.has_voted)
                .map(|(id, _)| *id)
                .collect(),
        })
    }

    async fn phase(&self) -> Result<ElectionPhase, StoreError> {
        Ok(self.state.lock().await.phase)
    }

    async fn set_phase_active(&self, active: bool) -> Result<ElectionPhase, StoreError> {
        let mut state = self.state.lock().await;
        state.phase.active = active;
        Ok(state.phase)
    }

    async fn set_phase_window(
        &self,
        window: Option<PhaseWindow>,
    ) -> Result<ElectionPhase, StoreError> {
        let mut state = self.state.lock().await;
        state.phase.window = window;
        Ok(state.phase)
    }

    async fn insert_operator(&self, operator: &NewOperator) -> Result<Id, StoreError> {
        let mut state = self.state.lock().await;
        if state
            .operators
            .values()
            .any(|existing| existing.username == operator.username)
        {
            return Err(StoreError::Duplicate);
        }
        let id = Id::new();
        state.operators.insert(id, operator.clone());
        Ok(id)
    }

    async fn operator(&self, id: Id) -> Result<Option<Operator>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.operators.get(&id).map(|operator| Operator {
            id,
            operator: operator.clone(),
        }))
    }

    async fn operator_by_username(&self, username: &str) -> Result<Option<Operator>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .operators
            .iter()
            .find(|(_, operator)| operator.username == username)
            .map(|(id, operator)| Operator {
                id: *id,
                operator: operator.clone(),
            }))
    }

    async fn operators(&self) -> Result<Vec<Operator>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .operators
            .iter()
            .map(|(id, operator)| Operator {
                id: *id,
                operator: operator.clone(),
            })
            .collect())
    }

    async fn delete_operator(&self, username: &str) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        let before = state.operators.len();
        state
            .operators
            .retain(|_, operator| operator.username != username);
        Ok(state.operators.len() != before)
    }

    async fn begin(&self) -> Result<Box<dyn LedgerTxn>, StoreError> {
        let state = self.state.clone().lock_owned().await;
        Ok(Box::new(MemoryTxn {
            state,
            undo: Vec::new(),
            finished: false,
        }))
    }
}

/// How to reverse one change made inside a transaction.
#[derive(Debug)]
enum Undo {
    Voted { voter: Id, previous: bool },
    BallotAppended { voter: Id },
    BallotRemoved(BallotEvent),
    Tally { candidate: CandidateId, previous: u64 },
}

/// Writes go straight to the locked state and are recorded in an undo log,
/// which is replayed backwards if the transaction does not commit.
struct MemoryTxn {
    state: OwnedMutexGuard<MemoryState>,
    undo: Vec<Undo>,
    finished: bool,
}

impl MemoryTxn {
    fn rollback(&mut self) {
        while let Some(step) = self.undo.pop() {
            match step {
                Undo::Voted { voter, previous } => {
                    if let Some(voter) = self.state.voters.get_mut(&voter) {
                        voter.has_voted = previous;
                    }
                }
                Undo::BallotAppended { voter } => {
                    self.state.ballots.remove(&voter);
                }
                Undo::BallotRemoved(event) => {
                    self.state.ballots.insert(event.voter_id, event);
                }
                Undo::Tally {
                    candidate,
                    previous,
                } => {
                    if let Some(candidate) = self.state.candidates.get_mut(&candidate) {
                        candidate.vote_count = previous;
                    }
                }
            }
        }
        self.finished = true;
    }
}

impl Drop for MemoryTxn {
    fn drop(&mut self) {
        if !self.finished {
            self.rollback();
        }
    }
}

#[rocket::async_trait]
impl LedgerTxn for MemoryTxn {
    async fn lock_voter(&mut self, id: Id) -> Result<Option<Voter>, StoreError> {
        // The whole store is already locked.
        Ok(self.state.voter(id))
    }

    async fn claim_voter(&mut self, id: Id) -> Result<Option<Voter>, StoreError> {
        Ok(self.state.voter(id))
    }

    async fn set_voted(&mut self, id: Id, has_voted: bool) -> Result<(), StoreError> {
        let voter = self
            .state
            .voters
            .get_mut(&id)
            .ok_or_else(|| StoreError::Corrupt(format!("voter {id} vanished mid-transaction")))?;
        let previous = voter.has_voted;
        voter.has_voted = has_voted;
        self.undo.push(Undo::Voted {
            voter: id,
            previous,
        });
        Ok(())
    }

    async fn candidate(&mut self, id: CandidateId) -> Result<Option<Candidate>, StoreError> {
        Ok(self.state.candidates.get(&id).cloned())
    }

    async fn append_ballot(&mut self, event: &BallotEvent) -> Result<(), StoreError> {
        if self.state.ballots.contains_key(&event.voter_id) {
            return Err(StoreError::Duplicate);
        }
        self.state.ballots.insert(event.voter_id, event.clone());
        self.undo.push(Undo::BallotAppended {
            voter: event.voter_id,
        });
        Ok(())
    }

    async fn remove_ballot(&mut self, voter: Id) -> Result<Option<BallotEvent>, StoreError> {
        let removed = self.state.ballots.remove(&voter);
        if let Some(event) = &removed {
            self.undo.push(Undo::BallotRemoved(event.clone()));
        }
        Ok(removed)
    }

    async fn adjust_tally(&mut self, candidate: CandidateId, delta: i64) -> Result<(), StoreError> {
        let record = self
            .state
            .candidates
            .get_mut(&candidate)
            .ok_or_else(|| StoreError::Corrupt(format!("candidate {candidate} does not exist")))?;
        let previous = record.vote_count;
        record.vote_count = previous.checked_add_signed(delta).ok_or_else(|| {
            StoreError::Corrupt(format!(
                "counter for candidate {candidate} would go out of range"
            ))
        })?;
        self.undo.push(Undo::Tally {
            candidate,
            previous,
        });
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        self.undo.clear();
        self.finished = true;
        Ok(())
    }

    async fn abort(&mut self) -> Result<(), StoreError> {
        self.rollback();
        Ok(())
    }
}

/// Test-only hooks for simulating damage that the core itself never causes.
#[cfg(test)]
impl MemoryStore {
    pub async fn overwrite_vote_count(&self, candidate: CandidateId, vote_count: u64) {
        let mut state = self.state.lock().await;
        state
            .candidates
            .get_mut(&candidate)
            .expect("candidate exists")
            .vote_count = vote_count;
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use crate::model::common::candidate::Slate;

    use super::*;

    async fn seeded() -> (MemoryStore, Voter, Candidate) {
        let store = MemoryStore::new();
        let id = store
            .insert_voter(&VoterCore::student_example("S-1", "7A", Slate::Junior))
            .await
            .unwrap();
        let candidate = Candidate::example(1, Slate::Junior);
        store.insert_candidate(&candidate).await.unwrap();
        let voter = store.voter(id).await.unwrap().unwrap();
        (store, voter, candidate)
    }

    #[rocket::async_test]
    async fn dropped_transaction_rolls_back() {
        let (store, voter, candidate) = seeded().await;
        {
            let mut txn = store.begin().await.unwrap();
            txn.set_voted(voter.id, true).await.unwrap();
            txn.append_ballot(&BallotEvent::new(&voter, &candidate, Utc::now()))
                .await
                .unwrap();
            txn.adjust_tally(candidate.id, 1).await.unwrap();
        }
        let snapshot = store.ledger_snapshot().await.unwrap();
        assert!(snapshot.ballots.is_empty());
        assert!(snapshot.voted_voters.is_empty());
        assert_eq!(snapshot.candidates[0].vote_count, 0);
    }

    #[rocket::async_test]
    async fn committed_transaction_is_visible() {
        let (store, voter, candidate) = seeded().await;
        let mut txn = store.begin().await.unwrap();
        txn.set_voted(voter.id, true).await.unwrap();
        txn.append_ballot(&BallotEvent::new(&voter, &candidate, Utc::now()))
            .await
            .unwrap();
        txn.adjust_tally(candidate.id, 1).await.unwrap();
        txn.commit().await.unwrap();
        drop(txn);

        let snapshot = store.ledger_snapshot().await.unwrap();
        assert_eq!(snapshot.ballots.len(), 1);
        assert_eq!(snapshot.voted_voters, vec![voter.id]);
        assert_eq!(snapshot.candidates[0].vote_count, 1);
    }

    #[rocket::async_test]
    async fn second_ballot_for_voter_is_duplicate() {
        let (store, voter, candidate) = seeded().await;
        let event = BallotEvent::new(&voter, &candidate, Utc::now());
        let mut txn = store.begin().await.unwrap();
        txn.append_ballot(&event).await.unwrap();
        assert!(matches!(
            txn.append_ballot(&event).await,
            Err(StoreError::Duplicate)
        ));
    }

    #[rocket::async_test]
    async fn counter_cannot_go_negative() {
        let (store, _, candidate) = seeded().await;
        let mut txn = store.begin().await.unwrap();
        assert!(matches!(
            txn.adjust_tally(candidate.id, -1).await,
            Err(StoreError::Corrupt(_))
        ));
        assert!(matches!(
            txn.adjust_tally(999, 1).await,
            Err(StoreError::Corrupt(_))
        ));
    }

    #[rocket::async_test]
    async fn natural_keys_unique_within_category() {
        let store = MemoryStore::new();
        store
            .insert_voter(&VoterCore::teacher_example("a@school.example", true))
            .await
            .unwrap();
        assert!(matches!(
            store
                .insert_voter(&VoterCore::teacher_example("a@school.example", false))
                .await,
            Err(StoreError::Duplicate)
        ));
        // Same e-mail in a different category is a different identity.
        store
            .insert_voter(&VoterCore::admin_staff_example("a@school.example", true))
            .await
            .unwrap();
    }

    #[rocket::async_test]
    async fn cohort_counts_join_voters() {
        let store = MemoryStore::new();
        store
            .insert_candidate(&Candidate::example(1, Slate::Junior))
            .await
            .unwrap();
        let candidate = Candidate::example(1, Slate::Junior);
        for (key, cohort) in [("S-1", "7A"), ("S-2", "7A"), ("S-3", "7B")] {
            let id = store
                .insert_voter(&VoterCore::student_example(key, cohort, Slate::Junior))
                .await
                .unwrap();
            let voter = store.voter(id).await.unwrap().unwrap();
            let mut txn = store.begin().await.unwrap();
            txn.append_ballot(&BallotEvent::new(&voter, &candidate, Utc::now()))
                .await
                .unwrap();
            txn.commit().await.unwrap();
        }
        assert_eq!(store.ballot_counts(None).await.unwrap().get(&1), Some(&3));
        assert_eq!(
            store.ballot_counts(Some("7A")).await.unwrap().get(&1),
            Some(&2)
        );
        assert_eq!(store.ballot_counts(Some("8C")).await.unwrap().get(&1), None);
    }
}
