use std::collections::HashMap;

use mongodb::{
    bson::{doc, from_document, oid::ObjectId, to_bson, Document},
    error::Error as DbError,
    options::{FindOneAndUpdateOptions, FindOptions, ReturnDocument, SessionOptions},
    Client, ClientSession, Database,
};
use rocket::futures::TryStreamExt;
use serde::Deserialize;

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
        phase::{DbPhaseWindow, PhaseSetting, PHASE_SETTING_ID},
        voter::{Credential, NewVoter, Voter, VoterProfile},
    },
    mongodb::{
        ensure_indexes_exist, errors::is_unknown_commit_result, u32_id_filter, Coll, Id, VOTERS,
    },
};

use super::{LedgerTxn, Store, StoreError};

/// How many times to retry a commit whose outcome the server could not
/// confirm.
const COMMIT_ATTEMPTS: usize = 3;

/// A store backed by a MongoDB replica set. Ledger transactions are
/// multi-document transactions, so this store is safe to share between
/// several service instances.
#[derive(Clone)]
pub struct MongoStore {
    client: Client,
    db: Database,
}

#[derive(Debug, Deserialize)]
struct CandidateCount {
    #[serde(rename = "_id")]
    candidate_id: CandidateId,
    count: u64,
}

#[derive(Debug, Deserialize)]
struct IdOnly {
    #[serde(rename = "_id")]
    id: Id,
}

impl MongoStore {
    /// Connect to the given database and make sure its indexes exist.
    pub async fn connect(uri: &str, db_name: &str) -> Result<Self, DbError> {
        let client = Client::with_uri_str(uri).await?;
        let db = client.database(db_name);
        ensure_indexes_exist(&db).await?;
        Ok(Self { client, db })
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    fn voters(&self) -> Coll<Voter> {
        Coll::from_db(&self.db)
    }

    fn candidates_coll(&self) -> Coll<Candidate> {
        Coll::from_db(&self.db)
    }

    fn ballots(&self) -> Coll<BallotEvent> {
        Coll::from_db(&self.db)
    }

    fn settings(&self) -> Coll<PhaseSetting> {
        Coll::from_db(&self.db)
    }

    fn operators_coll(&self) -> Coll<Operator> {
        Coll::from_db(&self.db)
    }

    async fn update_phase(&self, update: Document) -> Result<ElectionPhase, StoreError> {
        let options = FindOneAndUpdateOptions::builder()
            .upsert(true)
            .return_document(ReturnDocument::After)
            .build();
        let setting = self
            .settings()
            .find_one_and_update(doc! { "_id": PHASE_SETTING_ID }, update, options)
            .await?
            .ok_or_else(|| StoreError::Corrupt("phase upsert returned nothing".to_string()))?;
        Ok(setting.into())
    }
}

#[rocket::async_trait]
impl Store for MongoStore {
    async fn insert_voter(&self, voter: &NewVoter) -> Result<Id, StoreError> {
        let inserted = Coll::<NewVoter>::from_db(&self.db)
            .insert_one(voter, None)
            .await?;
        inserted
            .inserted_id
            .as_object_id()
            .map(Id::from)
            .ok_or_else(|| StoreError::Corrupt("voter inserted without an ObjectId".to_string()))
    }

    async fn voter(&self, id: Id) -> Result<Option<Voter>, StoreError> {
        Ok(self.voters().find_one(id.as_doc(), None).await?)
    }

    async fn voter_by_key(
        &self,
        category: VoterCategory,
        key: &str,
    ) -> Result<Option<Voter>, StoreError> {
        let field = VoterProfile::key_field(category);
        let filter = doc! { "category": category, field: key };
        Ok(self.voters().find_one(filter, None).await?)
    }

    async fn replace_credential(
        &self,
        id: Id,
        credential: &Credential,
    ) -> Result<bool, StoreError> {
        let update = doc! { "$set": { "credential": to_bson(credential)? } };
        let result = self.voters().update_one(id.as_doc(), update, None).await?;
        Ok(result.matched_count == 1)
    }

    async fn insert_candidate(&self, candidate: &Candidate) -> Result<(), StoreError> {
        self.candidates_coll().insert_one(candidate, None).await?;
        Ok(())
    }

    async fn candidates(&self, slate: Option<Slate>) -> Result<Vec<Candidate>, StoreError> {
        let filter = slate.map(|slate| doc! { "slate": slate });
        let options = FindOptions::builder()
            .sort(doc! { "slate": 1, "number": 1 })
            .build();
        Ok(self
            .candidates_coll()
            .find(filter, options)
            .await?
            .try_collect()
            .await?)
    }

    async fn ballot_counts(
        &self,
        cohort: Option<&str>,
    ) -> Result<HashMap<CandidateId, u64>, StoreError> {
        let mut pipeline = Vec::new();
        if let Some(cohort) = cohort {
            pipeline.push(doc! {
                "$lookup": {
                    "from": VOTERS,
                    "localField": "voter_id",
                    "foreignField": "_id",
                    "as": "voter",
                }
            });
            pipeline.push(doc! { "$match": { "voter.cohort": cohort } });
        }
        pipeline.push(doc! {
            "$group": { "_id": "$candidate_id", "count": { "$sum": 1 } }
        });

        let mut counts = HashMap::new();
        let mut cursor = self.ballots().aggregate(pipeline, None).await?;
        while let Some(document) = cursor.try_next().await? {
            let count: CandidateCount = from_document(document)?;
            counts.insert(count.candidate_id, count.count);
        }
        Ok(counts)
    }

    async fn ballots_by_voter(&self, voter: Id) -> Result<Vec<BallotEvent>, StoreError> {
        Ok(self
            .ballots()
            .find(doc! { "voter_id": voter }, None)
            .await?
            .try_collect()
            .await?)
    }

    async fn ledger_snapshot(&self) -> Result<LedgerSnapshot, StoreError> {
        let session_options = SessionOptions::builder().snapshot(true).build();
        let mut session = self.client.start_session(Some(session_options)).await?;

        let candidates = self
            .candidates_coll()
            .find_with_session(None, None, &mut session)
            .await?
            .stream(&mut session)
            .try_collect()
            .await?;

        let ballots = self
            .ballots()
            .find_with_session(None, None, &mut session)
            .await?
            .stream(&mut session)
            .try_collect()
            .await?;

        let projection = FindOptions::builder().projection(doc! { "_id": 1 }).build();
        let voted_voters = self
            .voters()
            .clone_with_type::<IdOnly>()
            .find_with_session(doc! { "has_voted": true }, projection, &mut session)
            .await?
            .stream(&mut session)
            .map_ok(|voter| voter.id)
            .try_collect()
            .await?;

        Ok(LedgerSnapshot {
            candidates,
            ballots,
            voted_voters,
        })
    }

    async fn phase(&self) -> Result<ElectionPhase, StoreError> {
        let setting = self
            .settings()
            .find_one(doc! { "_id": PHASE_SETTING_ID }, None)
            .await?;
        Ok(setting.map(Into::into).unwrap_or_default())
    }

    async fn set_phase_active(&self, active: bool) -> Result<ElectionPhase, StoreError> {
        self.update_phase(doc! { "$set": { "active": active } })
            .await
    }

    async fn set_phase_window(
        &self,
        window: Option<PhaseWindow>,
    ) -> Result<ElectionPhase, StoreError> {
        let window = to_bson(&window.map(DbPhaseWindow::from))?;
        self.update_phase(doc! { "$set": { "window": window } })
            .await
    }

    async fn insert_operator(&self, operator: &NewOperator) -> Result<Id, StoreError> {
        let inserted = Coll::<NewOperator>::from_db(&self.db)
            .insert_one(operator, None)
            .await?;
        inserted
            .inserted_id
            .as_object_id()
            .map(Id::from)
            .ok_or_else(|| StoreError::Corrupt("operator inserted without an ObjectId".to_string()))
    }

    async fn operator(&self, id: Id) -> Result<Option<Operator>, StoreError> {
        Ok(self.operators_coll().find_one(id.as_doc(), None).await?)
    }

    async fn operator_by_username(&self, username: &str) -> Result<Option<Operator>, StoreError> {
        Ok(self
            .operators_coll()
            .find_one(doc! { "username": username }, None)
            .await?)
    }

    async fn operators(&self) -> Result<Vec<Operator>, StoreError> {
        Ok(self
            .operators_coll()
            .find(None, None)
            .await?
            .try_collect()
            .await?)
    }

    async fn delete_operator(&self, username: &str) -> Result<bool, StoreError> {
        let result = self
            .operators_coll()
            .delete_one(doc! { "username": username }, None)
            .await?;
        Ok(result.deleted_count == 1)
    }

    async fn begin(&self) -> Result<Box<dyn LedgerTxn>, StoreError> {
        let mut session = self.client.start_session(None).await?;
        session.start_transaction(None).await?;
        Ok(Box::new(MongoTxn {
            session,
            voters: self.voters(),
            candidates: self.candidates_coll(),
            ballots: self.ballots(),
        }))
    }
}

/// A ledger transaction on a MongoDB session. The driver aborts the
/// transaction if the session is dropped while it is still in progress.
struct MongoTxn {
    session: ClientSession,
    voters: Coll<Voter>,
    candidates: Coll<Candidate>,
    ballots: Coll<BallotEvent>,
}

impl MongoTxn {
    /// Reads do not conflict in a transaction, so write a throwaway field on
    /// the matched voter to make any concurrent writer to it fail.
    async fn write_lock(&mut self, filter: Document) -> Result<Option<Voter>, StoreError> {
        let update = doc! { "$set": { "txn_lock": ObjectId::new() } };
        let options = FindOneAndUpdateOptions::builder()
            .return_document(ReturnDocument::After)
            .build();
        Ok(self
            .voters
            .find_one_and_update_with_session(filter, update, options, &mut self.session)
            .await?)
    }
}

#[rocket::async_trait]
impl LedgerTxn for MongoTxn {
    async fn lock_voter(&mut self, id: Id) -> Result<Option<Voter>, StoreError> {
        self.write_lock(id.as_doc()).await
    }

    async fn claim_voter(&mut self, id: Id) -> Result<Option<Voter>, StoreError> {
        let mut filter = id.as_doc();
        filter.insert("has_voted", false);
        match self.write_lock(filter).await? {
            Some(voter) => Ok(Some(voter)),
            None => Ok(self
                .voters
                .find_one_with_session(id.as_doc(), None, &mut self.session)
                .await?),
        }
    }

    async fn set_voted(&mut self, id: Id, has_voted: bool) -> Result<(), StoreError> {
        let update = doc! { "$set": { "has_voted": has_voted } };
        let result = self
            .voters
            .update_one_with_session(id.as_doc(), update, None, &mut self.session)
            .await?;
        if result.matched_count == 1 {
            Ok(())
        } else {
            Err(StoreError::Corrupt(format!(
                "voter {id} vanished mid-transaction"
            )))
        }
    }

    async fn candidate(&mut self, id: CandidateId) -> Result<Option<Candidate>, StoreError> {
        Ok(self
            .candidates
            .find_one_with_session(u32_id_filter(id), None, &mut self.session)
            .await?)
    }

    async fn append_ballot(&mut self, event: &BallotEvent) -> Result<(), StoreError> {
        self.ballots
            .insert_one_with_session(event, None, &mut self.session)
            .await?;
        Ok(())
    }

    async fn remove_ballot(&mut self, voter: Id) -> Result<Option<BallotEvent>, StoreError> {
        Ok(self
            .ballots
            .find_one_and_delete_with_session(doc! { "voter_id": voter }, None, &mut self.session)
            .await?)
    }

    async fn adjust_tally(&mut self, candidate: CandidateId, delta: i64) -> Result<(), StoreError> {
        let mut filter = u32_id_filter(candidate);
        if delta < 0 {
            filter.insert("vote_count", doc! { "$gte": -delta });
        }
        let update = doc! { "$inc": { "vote_count": delta } };
        let result = self
            .candidates
            .update_one_with_session(filter, update, None, &mut self.session)
            .await?;
        if result.matched_count == 1 {
            Ok(())
        } else {
            Err(StoreError::Corrupt(format!(
                "candidate {candidate} is missing or its counter would go negative"
            )))
        }
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        let mut attempt = 1;
        loop {
            match self.session.commit_transaction().await {
                Ok(()) => return Ok(()),
                Err(err) if is_unknown_commit_result(&err) && attempt < COMMIT_ATTEMPTS => {
                    warn!("Retrying commit with unknown result: {err}");
                    attempt += 1;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    async fn abort(&mut self) -> Result<(), StoreError> {
        self.session.abort_transaction().await?;
        Ok(())
    }
}

/// These tests need a MongoDB replica set, given by `BALLOTBOX_TEST_DB_URI`.
/// Without it they pass vacuously.
#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;
    use rocket::futures::future::join_all;

    use crate::{
        model::{
            common::voter::{VoterCategory, VoterHandle},
            db::voter::VoterCore,
        },
        voting::{VoteError, VoteLedger},
    };

    use super::*;

    fn handle(voter_id: Id) -> VoterHandle {
        VoterHandle {
            voter_id,
            category: VoterCategory::Student,
            has_voted: false,
        }
    }

    async fn test_store() -> Option<MongoStore> {
        let uri = std::env::var("BALLOTBOX_TEST_DB_URI").ok()?;
        let db_name = format!("ballotbox_test_{}", Id::new());
        Some(MongoStore::connect(&uri, &db_name).await.unwrap())
    }

    #[rocket::async_test]
    async fn transaction_commits_atomically() {
        let Some(store) = test_store().await else {
            return;
        };
        let candidate = Candidate::example(7, Slate::Senior);
        store.insert_candidate(&candidate).await.unwrap();
        let id = store
            .insert_voter(&VoterCore::student_example("S-100", "9B", Slate::Senior))
            .await
            .unwrap();

        let mut txn = store.begin().await.unwrap();
        let voter = txn.lock_voter(id).await.unwrap().unwrap();
        txn.set_voted(id, true).await.unwrap();
        txn.append_ballot(&BallotEvent::new(&voter, &candidate, Utc::now()))
            .await
            .unwrap();
        txn.adjust_tally(7, 1).await.unwrap();
        txn.commit().await.unwrap();

        let snapshot = store.ledger_snapshot().await.unwrap();
        assert_eq!(snapshot.ballots.len(), 1);
        assert_eq!(snapshot.voted_voters, vec![id]);
        assert_eq!(snapshot.candidates[0].vote_count, 1);
        assert_eq!(store.ballot_counts(Some("9B")).await.unwrap().get(&7), Some(&1));

        store.database().drop(None).await.unwrap();
    }

    #[rocket::async_test]
    async fn aborted_transaction_leaves_nothing() {
        let Some(store) = test_store().await else {
            return;
        };
        let candidate = Candidate::example(1, Slate::Junior);
        store.insert_candidate(&candidate).await.unwrap();
        let id = store
            .insert_voter(&VoterCore::student_example("S-1", "7A", Slate::Junior))
            .await
            .unwrap();

        let mut txn = store.begin().await.unwrap();
        let voter = txn.lock_voter(id).await.unwrap().unwrap();
        txn.append_ballot(&BallotEvent::new(&voter, &candidate, Utc::now()))
            .await
            .unwrap();
        txn.abort().await.unwrap();

        assert!(store.ballots_by_voter(id).await.unwrap().is_empty());
        store.database().drop(None).await.unwrap();
    }

    #[rocket::async_test]
    async fn phase_defaults_then_upserts() {
        let Some(store) = test_store().await else {
            return;
        };
        assert_eq!(store.phase().await.unwrap(), ElectionPhase::default());
        let phase = store.set_phase_active(true).await.unwrap();
        assert!(phase.active);
        assert_eq!(phase.window, None);
        store.database().drop(None).await.unwrap();
    }

    #[rocket::async_test]
    async fn voted_voter_is_claimed_without_locking() {
        let Some(store) = test_store().await else {
            return;
        };
        let id = store
            .insert_voter(&VoterCore::student_example("S-1", "7A", Slate::Junior))
            .await
            .unwrap();
        let mut txn = store.begin().await.unwrap();
        txn.lock_voter(id).await.unwrap();
        txn.set_voted(id, true).await.unwrap();
        txn.commit().await.unwrap();

        // Two open transactions claiming the same voted voter must not
        // conflict with each other.
        let mut first = store.begin().await.unwrap();
        let mut second = store.begin().await.unwrap();
        assert!(first.claim_voter(id).await.unwrap().unwrap().has_voted);
        assert!(second.claim_voter(id).await.unwrap().unwrap().has_voted);
        first.abort().await.unwrap();
        second.abort().await.unwrap();

        store.database().drop(None).await.unwrap();
    }

    #[rocket::async_test]
    async fn concurrent_casts_for_one_voter_succeed_once() {
        let Some(store) = test_store().await else {
            return;
        };
        for id in [1, 2] {
            store
                .insert_candidate(&Candidate::example(id, Slate::Junior))
                .await
                .unwrap();
        }
        let voter = store
            .insert_voter(&VoterCore::student_example("S-1", "7A", Slate::Junior))
            .await
            .unwrap();
        let ledger = VoteLedger::new(Arc::new(store.clone()), true);

        let attempts = (0..16).map(|i| {
            let ledger = ledger.clone();
            let candidate = if i % 2 == 0 { 1 } else { 2 };
            rocket::tokio::spawn(async move {
                ledger.cast_vote(&handle(voter), candidate, Utc::now()).await
            })
        });
        let results: Vec<_> = join_all(attempts)
            .await
            .into_iter()
            .map(|joined| joined.unwrap())
            .collect();

        let successes = results.iter().filter(|r| r.is_ok()).count();
        let already = results
            .iter()
            .filter(|r| matches!(r, Err(VoteError::AlreadyVoted)))
            .count();
        assert_eq!(successes, 1, "{results:?}");
        assert_eq!(already, 15, "{results:?}");

        let snapshot = store.ledger_snapshot().await.unwrap();
        assert_eq!(snapshot.ballots.len(), 1);
        assert_eq!(snapshot.voted_voters, vec![voter]);
        let total: u64 = snapshot.candidates.iter().map(|c| c.vote_count).sum();
        assert_eq!(total, 1);

        store.database().drop(None).await.unwrap();
    }

    #[rocket::async_test]
    async fn concurrent_casts_for_one_candidate_lose_nothing() {
        let Some(store) = test_store().await else {
            return;
        };
        store
            .insert_candidate(&Candidate::example(1, Slate::Junior))
            .await
            .unwrap();
        let mut voters = Vec::new();
        for i in 0..16 {
            let voter = VoterCore::student_example(&format!("S-{i}"), "7A", Slate::Junior);
            voters.push(store.insert_voter(&voter).await.unwrap());
        }
        let ledger = VoteLedger::new(Arc::new(store.clone()), true);

        let casts = voters.iter().map(|&voter| {
            let ledger = ledger.clone();
            rocket::tokio::spawn(async move {
                ledger.cast_vote(&handle(voter), 1, Utc::now()).await
            })
        });
        for joined in join_all(casts).await {
            joined.unwrap().unwrap();
        }

        let candidates = store.candidates(Some(Slate::Junior)).await.unwrap();
        assert_eq!(candidates[0].vote_count, 16);
        assert_eq!(store.ballot_counts(None).await.unwrap().get(&1), Some(&16));

        store.database().drop(None).await.unwrap();
    }
}
