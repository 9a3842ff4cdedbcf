use std::fmt::{Display, Formatter};

use mongodb::bson::{to_bson, Bson};
use rocket::{
    http::{
        impl_from_uri_param_identity,
        uri::fmt::{Formatter as UriFormatter, Path, UriDisplay},
    },
    request::FromParam,
};
use serde::{Deserialize, Serialize};

use crate::model::mongodb::Id;

/// The kinds of people allowed to vote.
#[derive(Debug, Copy, Clone, Hash, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoterCategory {
    Student,
    Teacher,
    AdminStaff,
}

impl VoterCategory {
    /// Lookup order used when resolving a claimed identity. Identities are
    /// not unique across categories, so the first match wins.
    pub const PRECEDENCE: [VoterCategory; 3] = [
        VoterCategory::Student,
        VoterCategory::Teacher,
        VoterCategory::AdminStaff,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Student => "student",
            Self::Teacher => "teacher",
            Self::AdminStaff => "admin_staff",
        }
    }
}

impl Display for VoterCategory {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<VoterCategory> for Bson {
    fn from(category: VoterCategory) -> Self {
        to_bson(&category).expect("Serialisation is infallible")
    }
}

impl<'a> FromParam<'a> for VoterCategory {
    type Error = &'a str;

    fn from_param(param: &'a str) -> Result<Self, Self::Error> {
        Self::PRECEDENCE
            .into_iter()
            .find(|category| category.as_str() == param)
            .ok_or(param)
    }
}

impl UriDisplay<Path> for VoterCategory {
    fn fmt(&self, formatter: &mut UriFormatter<'_, Path>) -> std::fmt::Result {
        formatter.write_raw(self.as_str())
    }
}

impl_from_uri_param_identity!([Path] VoterCategory);

/// The result of a successful authentication.
///
/// `has_voted` is advisory: it lets the caller show a "thank you" page
/// instead of a ballot, but the ledger re-checks it under lock when casting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoterHandle {
    pub voter_id: Id,
    pub category: VoterCategory,
    pub has_voted: bool,
}
