use std::ops::{Deref, DerefMut};

use chrono::{DateTime, Utc};
use mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime;
use serde::{Deserialize, Serialize};

use crate::model::{
    common::{candidate::Slate, voter::VoterCategory},
    mongodb::Id,
};

/// Category-specific part of a voter record. Each variant carries its own
/// natural key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "category", rename_all = "snake_case")]
pub enum VoterProfile {
    Student { student_number: String },
    Teacher { email: String, active: bool },
    AdminStaff { email: String, active: bool },
}

impl VoterProfile {
    pub fn category(&self) -> VoterCategory {
        match self {
            Self::Student { .. } => VoterCategory::Student,
            Self::Teacher { .. } => VoterCategory::Teacher,
            Self::AdminStaff { .. } => VoterCategory::AdminStaff,
        }
    }

    /// The natural key identifying this voter within its category.
    pub fn key(&self) -> &str {
        match self {
            Self::Student { student_number } => student_number,
            Self::Teacher { email, .. } | Self::AdminStaff { email, .. } => email,
        }
    }

    /// Name of the document field holding the natural key for `category`.
    pub fn key_field(category: VoterCategory) -> &'static str {
        match category {
            VoterCategory::Student => "student_number",
            VoterCategory::Teacher | VoterCategory::AdminStaff => "email",
        }
    }
}

/// The stored hash of a voter's token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    /// Hex-encoded HMAC of the token.
    pub secret_hash: String,
    /// Plaintext of the most recently issued token, kept so administrators
    /// can re-print it. Never used for verification.
    pub last_issued: String,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub issued_at: DateTime<Utc>,
}

/// Core voter data, as stored in the database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoterCore {
    #[serde(flatten)]
    pub profile: VoterProfile,
    pub name: String,
    /// Class or homeroom the voter belongs to, used for cohort breakdowns.
    pub cohort: Option<String>,
    /// Slate the voter may vote on; `None` means any slate.
    pub slate: Option<Slate>,
    pub has_voted: bool,
    pub credential: Option<Credential>,
}

impl VoterCore {
    pub fn category(&self) -> VoterCategory {
        self.profile.category()
    }

    /// Can this voter vote for a candidate on the given slate?
    pub fn may_vote_on(&self, slate: Slate) -> bool {
        self.slate.map_or(true, |own| own == slate)
    }
}

/// A voter without an ID.
pub type NewVoter = VoterCore;

/// A voter from the database, with its unique ID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Voter {
    #[serde(rename = "_id")]
    pub id: Id,
    #[serde(flatten)]
    pub voter: VoterCore,
}

impl Deref for Voter {
    type Target = VoterCore;

    fn deref(&self) -> &Self::Target {
        &self.voter
    }
}

impl DerefMut for Voter {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.voter
    }
}


#[cfg(test)]
mod tests {
    use mongodb::bson::{doc, to_document};

    use super::*;

    #[test]
    fn profile_is_flattened_with_category_tag() {
        let voter = VoterCore::teacher_example("ms.hart@school.example", true);
        let document = to_document(&voter).unwrap();
        assert_eq!(document.get_str("category").unwrap(), "teacher");
        assert_eq!(document.get_str("email").unwrap(), "ms.hart@school.example");
        assert!(document.get_bool("active").unwrap());
        assert!(!document.contains_key("student_number"));
    }

    #[test]
    fn slate_restriction() {
        let junior = VoterCore::student_example("S-1", "7A", Slate::Junior);
        assert!(junior.may_vote_on(Slate::Junior));
        assert!(!junior.may_vote_on(Slate::Senior));

        let teacher = VoterCore::teacher_example("t@school.example", true);
        assert!(teacher.may_vote_on(Slate::Junior));
        assert!(teacher.may_vote_on(Slate::Senior));
    }

    #[test]
    fn key_field_matches_profile() {
        let student = VoterCore::student_example("S-100", "9B", Slate::Senior);
        let document = to_document(&student).unwrap();
        let field = VoterProfile::key_field(student.category());
        assert_eq!(document.get_str(field).unwrap(), student.profile.key());
        assert_eq!(doc! { field: "S-100" }, doc! { "student_number": "S-100" });
    }
}
