use argon2::Config;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::model::{
    api::id::ApiId,
    common::{
        candidate::{CandidateId, Slate},
        role::OperatorRole,
        voter::VoterCategory,
    },
    db::{
        admin::NewOperator,
        candidate::Candidate,
        voter::{Voter, VoterProfile},
    },
};

pub const MIN_PASSWORD_LENGTH: usize = 8;

/// Raw operator credentials, received from a user. These are never stored
/// directly, since the password is in plaintext.
#[derive(Clone, Deserialize, Serialize)]
pub struct AdminCredentials {
    pub username: String,
    pub password: String,
}

/// A request to create a new operator.
#[derive(Clone, Deserialize, Serialize)]
pub struct OperatorSpec {
    #[serde(flatten)]
    pub credentials: AdminCredentials,
    pub role: OperatorRole,
}

impl TryFrom<OperatorSpec> for NewOperator {
    type Error = ();

    /// Convert an [`OperatorSpec`] to a new operator by hashing the password.
    /// This enforces that the username is non-empty, and the password meets minimum length.
    fn try_from(spec: OperatorSpec) -> Result<Self, Self::Error> {
        let cred = spec.credentials;
        if cred.username.is_empty() || cred.password.len() < MIN_PASSWORD_LENGTH {
            return Err(());
        }

        // 16 bytes is recommended for password hashing:
        //  https://en.wikipedia.org/wiki/Argon2
        let mut salt = [0_u8; 16];
        rand::thread_rng().fill(&mut salt);
        let password_hash = argon2::hash_encoded(cred.password.as_bytes(), &salt, &Config::default())
            .map_err(|_| ())?;
        Ok(Self {
            username: cred.username,
            password_hash,
            role: spec.role,
        })
    }
}

/// A request to add a voter to one of the registries.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VoterSpec {
    pub category: VoterCategory,
    /// Student number or e-mail, depending on the category.
    pub key: String,
    pub name: String,
    #[serde(default)]
    pub cohort: Option<String>,
    #[serde(default)]
    pub slate: Option<Slate>,
    /// Ignored for students.
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

/// A request to add a candidate.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CandidateSpec {
    pub id: CandidateId,
    pub slate: Slate,
    pub number: u32,
    pub name: String,
}

impl From<CandidateSpec> for Candidate {
    fn from(spec: CandidateSpec) -> Self {
        Self {
            id: spec.id,
            slate: spec.slate,
            number: spec.number,
            name: spec.name,
            vote_count: 0,
        }
    }
}

/// A freshly issued token, shown to the administrator exactly once for
/// distribution to the voter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuedToken {
    pub voter_id: ApiId,
    pub token: String,
}

/// Administrative view of a voter record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoterDescription {
    pub id: ApiId,
    pub category: VoterCategory,
    pub key: String,
    pub name: String,
    pub cohort: Option<String>,
    pub slate: Option<Slate>,
    /// Only present for staff.
    pub active: Option<bool>,
    pub has_voted: bool,
    pub last_issued_token: Option<String>,
    pub token_issued_at: Option<DateTime<Utc>>,
}

impl From<Voter> for VoterDescription {
    fn from(voter: Voter) -> Self {
        let active = match voter.profile {
            VoterProfile::Student { .. } => None,
            VoterProfile::Teacher { active, .. } | VoterProfile::AdminStaff { active, .. } => {
                Some(active)
            }
        };
        let (last_issued_token, token_issued_at) = match &voter.credential {
            Some(credential) => (
                Some(credential.last_issued.clone()),
                Some(credential.issued_at),
            ),
            None => (None, None),
        };
        Self {
            id: voter.id.into(),
            category: voter.category(),
            key: voter.profile.key().to_string(),
            name: voter.voter.name,
            cohort: voter.voter.cohort,
            slate: voter.voter.slate,
            active,
            has_voted: voter.voter.has_voted,
            last_issued_token,
            token_issued_at,
        }
    }
}

/// Operator summary; never includes the password hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorSummary {
    pub username: String,
    pub role: OperatorRole,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct PhaseUpdate {
    pub active: bool,
}

/// Example data for tests.
#[cfg(test)]
pub mod examples {
    use super::*;

    impl AdminCredentials {
        pub fn example() -> Self {
            Self {
                username: "coordinator".into(),
                password: "coordinator".into(),
            }
        }

        pub fn superadmin_example() -> Self {
            Self {
                username: "returning-officer".into(),
                password: "totallysecurepassword".into(),
            }
        }

        pub fn empty() -> Self {
            Self {
                username: "".into(),
                password: "".into(),
            }
        }
    }

    impl VoterSpec {
        pub fn student_example(key: &str, cohort: &str, slate: Slate) -> Self {
            Self {
                category: VoterCategory::Student,
                key: key.to_string(),
                name: format!("Student {key}"),
                cohort: Some(cohort.to_string()),
                slate: Some(slate),
                active: true,
            }
        }

        pub fn staff_example(category: VoterCategory, email: &str, active: bool) -> Self {
            Self {
                category,
                key: email.to_string(),
                name: format!("Staff {email}"),
                cohort: None,
                slate: None,
                active,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operator_spec_hashes_password() {
        let spec = OperatorSpec {
            credentials: AdminCredentials::superadmin_example(),
            role: OperatorRole::SuperAdmin,
        };
        let operator = NewOperator::try_from(spec).unwrap();
        assert_eq!(operator.role, OperatorRole::SuperAdmin);
        assert_ne!(operator.password_hash, "totallysecurepassword");
        assert!(operator.verify_password("totallysecurepassword"));
    }

    #[test]
    fn operator_spec_rejects_weak_credentials() {
        let empty = OperatorSpec {
            credentials: AdminCredentials::empty(),
            role: OperatorRole::Admin,
        };
        assert!(NewOperator::try_from(empty).is_err());

        let short = OperatorSpec {
            credentials: AdminCredentials {
                username: "short".into(),
                password: "1234567".into(),
            },
            role: OperatorRole::Admin,
        };
        assert!(NewOperator::try_from(short).is_err());
    }
}
