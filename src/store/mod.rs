//! Durable state behind the voting core.
//!
//! Every piece of shared mutable state (voter flags, ballot events, cached
//! tallies) is changed only through a [`LedgerTxn`], so the serialization
//! point for concurrent casts lives in the store rather than in process
//! memory.

use std::collections::HashMap;
use std::sync::Arc;

use mongodb::{
    bson::{de::Error as BsonDeError, ser::Error as BsonSerError},
    error::Error as DbError,
};
use thiserror::Error;

use crate::model::{
    api::ledger::LedgerSnapshot,
    common::{
        candidate::{CandidateId, Slate},
        phase::{ElectionPhase, PhaseWindow},
        voter::VoterCategory,
    },
    db::{
        admin::{NewOperator, Operator},
        ballot::BallotEvent,
        candidate::Candidate,
        voter::{Credential, NewVoter, Voter},
    },
    mongodb::{
        errors::{is_duplicate_key_error, is_transient_transaction_error},
        Id,
    },
};

mod memory;
mod mongo;

pub use memory::MemoryStore;
pub use mongo::MongoStore;

/// Shared handle on whichever store backs the service.
pub type DynStore = Arc<dyn Store>;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Another transaction touched the same records; the whole transaction
    /// may be re-run.
    #[error("transaction conflicted with a concurrent writer")]
    Conflict,
    /// A uniqueness constraint was violated.
    #[error("duplicate key")]
    Duplicate,
    #[error("corrupt or missing record: {0}")]
    Corrupt(String),
    #[error(transparent)]
    Db(DbError),
}

impl From<DbError> for StoreError {
    fn from(err: DbError) -> Self {
        if is_duplicate_key_error(&err) {
            Self::Duplicate
        } else if is_transient_transaction_error(&err) {
            Self::Conflict
        } else {
            Self::Db(err)
        }
    }
}

impl From<BsonSerError> for StoreError {
    fn from(err: BsonSerError) -> Self {
        Self::Corrupt(err.to_string())
    }
}

impl From<BsonDeError> for StoreError {
    fn from(err: BsonDeError) -> Self {
        Self::Corrupt(err.to_string())
    }
}

#[rocket::async_trait]
pub trait Store: Send + Sync {
    /// Add a voter. Fails with [`StoreError::Duplicate`] if the natural key is
    /// already taken within the voter's category.
    async fn insert_voter(&self, voter: &NewVoter) -> Result<Id, StoreError>;

    async fn voter(&self, id: Id) -> Result<Option<Voter>, StoreError>;

    /// Look a voter up by its (already normalised) natural key.
    async fn voter_by_key(
        &self,
        category: VoterCategory,
        key: &str,
    ) -> Result<Option<Voter>, StoreError>;

    /// Replace a voter's credential wholesale. Returns false if there is no
    /// such voter.
    async fn replace_credential(&self, id: Id, credential: &Credential)
        -> Result<bool, StoreError>;

    async fn insert_candidate(&self, candidate: &Candidate) -> Result<(), StoreError>;

    /// All candidates, ordered by slate then ballot number.
    async fn candidates(&self, slate: Option<Slate>) -> Result<Vec<Candidate>, StoreError>;

    /// Count ballot events per candidate, straight from the ballot records.
    /// With a cohort, only ballots from voters in that cohort are counted.
    async fn ballot_counts(
        &self,
        cohort: Option<&str>,
    ) -> Result<HashMap<CandidateId, u64>, StoreError>;

    async fn ballots_by_voter(&self, voter: Id) -> Result<Vec<BallotEvent>, StoreError>;

    /// Candidates, ballots and voted flags read from one consistent snapshot.
    async fn ledger_snapshot(&self) -> Result<LedgerSnapshot, StoreError>;

    /// The stored phase; inactive with no window if never set.
    async fn phase(&self) -> Result<ElectionPhase, StoreError>;

    async fn set_phase_active(&self, active: bool) -> Result<ElectionPhase, StoreError>;

    async fn set_phase_window(
        &self,
        window: Option<PhaseWindow>,
    ) -> Result<ElectionPhase, StoreError>;

    async fn insert_operator(&self, operator: &NewOperator) -> Result<Id, StoreError>;

    async fn operator(&self, id: Id) -> Result<Option<Operator>, StoreError>;

    async fn operator_by_username(&self, username: &str) -> Result<Option<Operator>, StoreError>;

    async fn operators(&self) -> Result<Vec<Operator>, StoreError>;

    /// Returns false if there was no such operator.
    async fn delete_operator(&self, username: &str) -> Result<bool, StoreError>;

    /// Start a ledger transaction.
    async fn begin(&self) -> Result<Box<dyn LedgerTxn>, StoreError>;
}

/// A single atomic unit of work on the ledger. Nothing done through it is
/// visible to anyone else until [`LedgerTxn::commit`] succeeds; dropping it
/// without committing discards everything.
#[rocket::async_trait]
pub trait LedgerTxn: Send {
    /// Read a voter record and take a write lock on it, so that no other
    /// transaction can change it until this one ends.
    async fn lock_voter(&mut self, id: Id) -> Result<Option<Voter>, StoreError>;

    /// Like [`LedgerTxn::lock_voter`], but only locks a voter who has not
    /// voted. A voter who already has is read without taking the lock, so
    /// repeated casts for them never contend with each other.
    async fn claim_voter(&mut self, id: Id) -> Result<Option<Voter>, StoreError>;

    async fn set_voted(&mut self, id: Id, has_voted: bool) -> Result<(), StoreError>;

    async fn candidate(&mut self, id: CandidateId) -> Result<Option<Candidate>, StoreError>;

    /// Record a ballot event. Fails with [`StoreError::Duplicate`] if the
    /// voter already has one.
    async fn append_ballot(&mut self, event: &BallotEvent) -> Result<(), StoreError>;

    /// Remove and return the voter's ballot event, if any.
    async fn remove_ballot(&mut self, voter: Id) -> Result<Option<BallotEvent>, StoreError>;

    /// Change a candidate's cached counter. Fails if the candidate does not
    /// exist or the counter would go negative.
    async fn adjust_tally(&mut self, candidate: CandidateId, delta: i64) -> Result<(), StoreError>;

    async fn commit(&mut self) -> Result<(), StoreError>;

    async fn abort(&mut self) -> Result<(), StoreError>;
}
