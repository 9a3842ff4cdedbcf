use serde::{Deserialize, Serialize};

use crate::model::common::candidate::{CandidateId, Slate};

/// A candidate, as stored in the database.
///
/// `vote_count` is a cached projection of the ballot collection. It is only
/// ever changed inside a ledger transaction, together with the ballot event
/// that justifies it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    #[serde(rename = "_id")]
    pub id: CandidateId,
    pub slate: Slate,
    /// Ballot number within the slate.
    pub number: u32,
    pub name: String,
    pub vote_count: u64,
}

/// Example data for tests.
#[cfg(test)]
pub mod examples {
    use super::*;

    impl Candidate {
        pub fn example(id: CandidateId, slate: Slate) -> Self {
            Self {
                id,
                slate,
                number: id,
                name: format!("Candidate {id}"),
                vote_count: 0,
            }
        }
    }
}
