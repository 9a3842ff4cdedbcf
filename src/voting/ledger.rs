//! The only writer of ballots, voted flags and tally counters.
//!
//! Each operation runs as one store transaction. The voter record is locked
//! before its flag is read, and a unique index on the ballot's voter id backs
//! this up, so two concurrent casts for the same voter can never both commit.
//! A cast only locks voters who have not voted yet.
//!
//! The only retry here is for a transaction that lost a write conflict to
//! another one still in flight. Every other failure goes back to the caller.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use rocket::tokio::time::sleep;

use crate::{
    model::{
        common::{candidate::CandidateId, voter::VoterHandle},
        db::ballot::BallotEvent,
        mongodb::Id,
    },
    store::{DynStore, LedgerTxn, StoreError},
};

use super::VoteError;

/// How many times a transaction is run before a write conflict is reported
/// as `StorageUnavailable`.
const MAX_ATTEMPTS: u32 = 8;

/// Base delay between attempts; grows linearly, plus up to as much again at
/// random.
const CONFLICT_BACKOFF: Duration = Duration::from_millis(15);

fn backoff(attempt: u32) -> Duration {
    let base = CONFLICT_BACKOFF * attempt;
    let jitter = rand::thread_rng().gen_range(0..=base.as_millis() as u64);
    base + Duration::from_millis(jitter)
}

#[derive(Clone)]
pub struct VoteLedger {
    store: DynStore,
    segregate_slates: bool,
}

impl VoteLedger {
    /// With `segregate_slates`, a voter restricted to one slate cannot vote
    /// for a candidate on the other.
    pub fn new(store: DynStore, segregate_slates: bool) -> Self {
        Self {
            store,
            segregate_slates,
        }
    }

    /// Record the voter's ballot for `candidate`, bump the candidate's
    /// counter and flag the voter, all or nothing.
    pub async fn cast_vote(
        &self,
        handle: &VoterHandle,
        candidate: CandidateId,
        now: DateTime<Utc>,
    ) -> Result<BallotEvent, VoteError> {
        let voter = handle.voter_id;
        let mut attempt = 1;
        loop {
            let mut txn = self.store.begin().await?;
            let result = match self.try_cast(txn.as_mut(), voter, candidate, now).await {
                Ok(event) => txn.commit().await.map(|()| event).map_err(VoteError::from),
                Err(e) => {
                    abort(txn.as_mut()).await;
                    Err(e)
                }
            };
            match result {
                Ok(event) => {
                    info!("Voter {voter} cast a ballot");
                    return Ok(event);
                }
                Err(VoteError::StorageUnavailable(StoreError::Conflict)) if attempt < MAX_ATTEMPTS => {
                    debug!("Cast for voter {voter} conflicted (attempt {attempt}), retrying");
                    sleep(backoff(attempt)).await;
                    attempt += 1;
                }
                Err(e) => {
                    report("cast", voter, &e);
                    return Err(e);
                }
            }
        }
    }

    async fn try_cast(
        &self,
        txn: &mut dyn LedgerTxn,
        voter_id: Id,
        candidate_id: CandidateId,
        now: DateTime<Utc>,
    ) -> Result<BallotEvent, VoteError> {
        let voter = txn
            .claim_voter(voter_id)
            .await?
            .ok_or(VoteError::VoterNotFound(voter_id))?;
        if voter.has_voted {
            return Err(VoteError::AlreadyVoted);
        }

        let candidate = txn
            .candidate(candidate_id)
            .await?
            .ok_or(VoteError::InvalidCandidate(candidate_id))?;
        if self.segregate_slates && !voter.may_vote_on(candidate.slate) {
            return Err(VoteError::InvalidCandidate(candidate_id));
        }

        let event = BallotEvent::new(&voter, &candidate, now);
        match txn.append_ballot(&event).await {
            Err(StoreError::Duplicate) => return Err(VoteError::AlreadyVoted),
            other => other?,
        }
        txn.adjust_tally(candidate_id, 1).await?;
        txn.set_voted(voter_id, true).await?;
        Ok(event)
    }

    /// Undo a voter's ballot: remove the event, take the vote back off the
    /// candidate's counter and clear the flag. Returns the removed event, if
    /// there was one.
    pub async fn reset_voter_ballot(&self, voter: Id) -> Result<Option<BallotEvent>, VoteError> {
        let mut attempt = 1;
        loop {
            let mut txn = self.store.begin().await?;
            let result = match try_reset(txn.as_mut(), voter).await {
                Ok(removed) => txn.commit().await.map(|()| removed).map_err(VoteError::from),
                Err(e) => {
                    abort(txn.as_mut()).await;
                    Err(e)
                }
            };
            match result {
                Ok(removed) => {
                    info!("Reset ballot of voter {voter}");
                    return Ok(removed);
                }
                Err(VoteError::StorageUnavailable(StoreError::Conflict)) if attempt < MAX_ATTEMPTS => {
                    debug!("Reset for voter {voter} conflicted (attempt {attempt}), retrying");
                    sleep(backoff(attempt)).await;
                    attempt += 1;
                }
                Err(e) => {
                    report("reset", voter, &e);
                    return Err(e);
                }
            }
        }
    }
}

async fn try_reset(txn: &mut dyn LedgerTxn, voter_id: Id) -> Result<Option<BallotEvent>, VoteError> {
    let voter = txn
        .lock_voter(voter_id)
        .await?
        .ok_or(VoteError::VoterNotFound(voter_id))?;
    let removed = txn.remove_ballot(voter_id).await?;
    match &removed {
        Some(event) => {
            if !voter.has_voted {
                warn!("Voter {voter_id} had a ballot but was not flagged as voted");
            }
            txn.adjust_tally(event.candidate_id, -1).await?;
        }
        None if voter.has_voted => {
            warn!("Voter {voter_id} was flagged as voted but had no ballot");
        }
        None => {}
    }
    if voter.has_voted {
        txn.set_voted(voter_id, false).await?;
    }
    Ok(removed)
}

async fn abort(txn: &mut dyn LedgerTxn) {
    if let Err(e) = txn.abort().await {
        warn!("Failed to abort ledger transaction: {e}");
    }
}

fn report(operation: &str, voter: Id, err: &VoteError) {
    if err.is_fault() {
        error!("Ledger {operation} for voter {voter} hit an integrity fault: {err}");
    } else if err.is_transient() {
        warn!("Ledger {operation} for voter {voter} failed: {err}");
    } else {
        debug!("Ledger {operation} for voter {voter} refused: {err}");
    }
}
