use std::ops::Deref;

use mongodb::{
    bson::doc, error::Error as DbError, options::IndexOptions, Collection, Database, IndexModel,
};

use crate::model::db::{
    admin::{NewOperator, Operator},
    ballot::BallotEvent,
    candidate::Candidate,
    phase::PhaseSetting,
    voter::{NewVoter, Voter},
};

/// A type that can be directly inserted/read to/from the database.
pub trait MongoCollection {
    /// The name of the collection.
    const NAME: &'static str;
}

/// A database collection of the given type.
pub struct Coll<T>(Collection<T>);

impl<T> Coll<T>
where
    T: MongoCollection,
{
    /// Get a handle on this collection in the given database.
    pub fn from_db(db: &Database) -> Self {
        Self(db.collection(T::NAME))
    }
}

// `Derive(Clone)` would only derive if `T: Clone`, but we don't need that bound.
impl<T> Clone for Coll<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T> Deref for Coll<T> {
    type Target = Collection<T>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

// Operator collections
const OPERATORS: &str = "operators";
impl MongoCollection for Operator {
    const NAME: &'static str = OPERATORS;
}
impl MongoCollection for NewOperator {
    const NAME: &'static str = OPERATORS;
}

// Voter collections
pub(crate) const VOTERS: &str = "voters";
impl MongoCollection for Voter {
    const NAME: &'static str = VOTERS;
}
impl MongoCollection for NewVoter {
    const NAME: &'static str = VOTERS;
}

// Candidate collection
const CANDIDATES: &str = "candidates";
impl MongoCollection for Candidate {
    const NAME: &'static str = CANDIDATES;
}

// Ballot collection
const BALLOTS: &str = "ballots";
impl MongoCollection for BallotEvent {
    const NAME: &'static str = BALLOTS;
}

// Settings collection
const SETTINGS: &str = "settings";
impl MongoCollection for PhaseSetting {
    const NAME: &'static str = SETTINGS;
}

/// Ensure that all the required indexes exist on the given database.
///
/// This operation is idempotent.
pub async fn ensure_indexes_exist(db: &Database) -> Result<(), DbError> {
    debug!("Ensuring collection indexes exist");

    let unique = IndexOptions::builder().unique(true).build();

    // Voter collection: natural keys are unique within a category.
    let student_index = IndexModel::builder()
        .keys(doc! {"category": 1, "student_number": 1})
        .options(
            IndexOptions::builder()
                .unique(true)
                .partial_filter_expression(doc! {"student_number": {"$exists": true}})
                .build(),
        )
        .build();
    let staff_index = IndexModel::builder()
        .keys(doc! {"category": 1, "email": 1})
        .options(
            IndexOptions::builder()
                .unique(true)
                .partial_filter_expression(doc! {"email": {"$exists": true}})
                .build(),
        )
        .build();
    Coll::<Voter>::from_db(db)
        .create_indexes([student_index, staff_index], None)
        .await?;

    // Operator collection.
    let operator_index = IndexModel::builder()
        .keys(doc! {"username": 1})
        .options(unique.clone())
        .build();
    Coll::<Operator>::from_db(db)
        .create_index(operator_index, None)
        .await?;

    // Ballot collection: one ballot per voter, and fast per-candidate counts.
    let ballot_voter_index = IndexModel::builder()
        .keys(doc! {"voter_id": 1})
        .options(unique)
        .build();
    let ballot_candidate_index = IndexModel::builder()
        .keys(doc! {"candidate_id": 1})
        .build();
    Coll::<BallotEvent>::from_db(db)
        .create_indexes([ballot_voter_index, ballot_candidate_index], None)
        .await?;

    Ok(())
}
