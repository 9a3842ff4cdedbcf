use thiserror::Error;

use crate::{
    model::{common::candidate::CandidateId, mongodb::Id},
    store::StoreError,
};

/// Every way a voting operation can fail.
///
/// The first group are ordinary outcomes that the caller should show to the
/// user. [`VoteError::VoterNotFound`] and [`VoteError::Integrity`] mean the
/// stored data is inconsistent. [`VoteError::StorageUnavailable`] is
/// transient: nothing was persisted, so the caller may safely start over.
#[derive(Debug, Error)]
pub enum VoteError {
    #[error("This voter has already cast a ballot")]
    AlreadyVoted,
    #[error("The election is not open")]
    ElectionClosed,
    #[error("Unknown identity or wrong token")]
    Unauthorized,
    #[error("This voter is not currently allowed to vote")]
    Inactive,
    #[error("Candidate {0} does not exist or is not on this voter's ballot")]
    InvalidCandidate(CandidateId),
    #[error("The voting window must start before it ends")]
    InvalidWindow,
    #[error("Invalid record: {0}")]
    InvalidRecord(String),
    #[error("A record with this key already exists")]
    AlreadyExists,
    #[error("Voter {0} does not exist")]
    VoterNotFound(Id),
    #[error("Ledger integrity fault: {0}")]
    Integrity(String),
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(StoreError),
}

impl VoteError {
    /// Does this error indicate a bug or corrupt data, rather than a normal
    /// outcome or a transient failure?
    pub fn is_fault(&self) -> bool {
        matches!(self, Self::VoterNotFound(_) | Self::Integrity(_))
    }

    /// Can the whole authenticate-and-cast flow be retried?
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::StorageUnavailable(_))
    }
}

impl From<StoreError> for VoteError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Corrupt(msg) => Self::Integrity(msg),
            StoreError::Duplicate => Self::AlreadyExists,
            other => Self::StorageUnavailable(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(!VoteError::AlreadyVoted.is_fault());
        assert!(!VoteError::InvalidCandidate(3).is_fault());
        assert!(VoteError::VoterNotFound(Id::new()).is_fault());
        assert!(VoteError::from(StoreError::Corrupt("x".to_string())).is_fault());
        assert!(matches!(
            VoteError::from(StoreError::Duplicate),
            VoteError::AlreadyExists
        ));

        let transient = VoteError::from(StoreError::Conflict);
        assert!(transient.is_transient());
        assert!(!transient.is_fault());
    }
}
