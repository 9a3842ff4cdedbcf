use jsonwebtoken::errors::{Error as JwtError, ErrorKind as JwtErrorKind};
use mongodb::error::Error as DbError;
use rocket::{
    http::{Status, StatusClass},
    response::{status::Custom, Responder},
    serde::json::Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{store::StoreError, voting::VoteError};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{1}")]
    Status(Status, String),
    #[error(transparent)]
    Vote(#[from] VoteError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Db(#[from] DbError),
    #[error(transparent)]
    Jwt(#[from] JwtError),
}

impl Error {
    pub fn not_found(what: String) -> Self {
        Self::Status(Status::NotFound, format!("{what} not found"))
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::Status(Status::BadRequest, message.into())
    }

    /// HTTP status and machine-readable error code.
    fn classify(&self) -> (Status, &'static str) {
        match self {
            Self::Status(status, _) => (*status, status_code_name(*status)),
            Self::Vote(err) => match err {
                VoteError::AlreadyVoted => (Status::Conflict, "already_voted"),
                VoteError::ElectionClosed => (Status::Forbidden, "election_closed"),
                VoteError::Unauthorized => (Status::Unauthorized, "unauthorized"),
                VoteError::Inactive => (Status::Forbidden, "inactive"),
                VoteError::InvalidCandidate(_) => (Status::UnprocessableEntity, "invalid_candidate"),
                VoteError::InvalidWindow => (Status::BadRequest, "invalid_window"),
                VoteError::InvalidRecord(_) => (Status::BadRequest, "invalid_record"),
                VoteError::AlreadyExists => (Status::Conflict, "already_exists"),
                VoteError::VoterNotFound(_) => (Status::InternalServerError, "voter_not_found"),
                VoteError::Integrity(_) => (Status::InternalServerError, "integrity"),
                VoteError::StorageUnavailable(_) => {
                    (Status::ServiceUnavailable, "storage_unavailable")
                }
            },
            Self::Store(err) => match err {
                StoreError::Duplicate => (Status::Conflict, "already_exists"),
                StoreError::Corrupt(_) => (Status::InternalServerError, "integrity"),
                StoreError::Conflict | StoreError::Db(_) => {
                    (Status::ServiceUnavailable, "storage_unavailable")
                }
            },
            Self::Db(_) => (Status::ServiceUnavailable, "storage_unavailable"),
            Self::Jwt(err) => match err.kind() {
                JwtErrorKind::ExpiredSignature | JwtErrorKind::ImmatureSignature => {
                    (Status::Unauthorized, "unauthorized")
                }
                _ => (Status::BadRequest, "bad_request"),
            },
        }
    }
}

fn status_code_name(status: Status) -> &'static str {
    match status.code {
        400 => "bad_request",
        401 => "unauthorized",
        403 => "forbidden",
        404 => "not_found",
        409 => "conflict",
        422 => "unprocessable",
        503 => "storage_unavailable",
        _ if status.class() == StatusClass::ServerError => "internal",
        _ => "error",
    }
}

/// JSON body of every error response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}

impl<'r, 'o: 'r> Responder<'r, 'o> for Error {
    fn respond_to(self, request: &'r rocket::Request<'_>) -> rocket::response::Result<'o> {
        let (status, code) = self.classify();
        if status.class() == StatusClass::ServerError {
            error!("{self}");
        } else {
            debug!("{self}");
        }
        let body = ErrorBody {
            error: code.to_string(),
            message: self.to_string(),
        };
        Custom(status, Json(body)).respond_to(request)
    }
}

#[cfg(test)]
mod tests {
    use crate::model::mongodb::Id;

    use super::*;

    #[test]
    fn vote_error_statuses() {
        let cases = [
            (VoteError::AlreadyVoted, 409),
            (VoteError::ElectionClosed, 403),
            (VoteError::Unauthorized, 401),
            (VoteError::Inactive, 403),
            (VoteError::InvalidCandidate(7), 422),
            (VoteError::InvalidWindow, 400),
            (VoteError::VoterNotFound(Id::new()), 500),
            (VoteError::Integrity("drift".to_string()), 500),
            (VoteError::StorageUnavailable(StoreError::Conflict), 503),
        ];
        for (err, code) in cases {
            assert_eq!(Error::from(err).classify().0.code, code);
        }
    }

    #[test]
    fn status_errors_keep_their_status() {
        let err = Error::not_found("Voter 'x'".to_string());
        assert_eq!(err.classify(), (Status::NotFound, "not_found"));
        assert_eq!(err.to_string(), "Voter 'x' not found");
    }
}
