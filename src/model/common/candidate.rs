use std::fmt::{Display, Formatter};

use mongodb::bson::{to_bson, Bson};
use rocket::{
    form::{self, FromFormField, ValueField},
    http::{
        impl_from_uri_param_identity,
        uri::fmt::{Formatter as UriFormatter, Query, UriDisplay},
    },
};
use serde::{Deserialize, Serialize};

/// Candidate unique ID. Candidate IDs are global; the ballot number shown to
/// voters is numbered independently within each slate.
pub type CandidateId = u32;

/// One of the parallel sub-contests an election may run.
#[derive(Debug, Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Slate {
    Junior,
    Senior,
}

impl Slate {
    pub const ALL: [Slate; 2] = [Slate::Junior, Slate::Senior];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Junior => "junior",
            Self::Senior => "senior",
        }
    }
}

impl Display for Slate {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<Slate> for Bson {
    fn from(slate: Slate) -> Self {
        to_bson(&slate).expect("Serialisation is infallible")
    }
}

#[rocket::async_trait]
impl<'r> FromFormField<'r> for Slate {
    fn from_value(field: ValueField<'r>) -> form::Result<'r, Self> {
        Slate::ALL
            .into_iter()
            .find(|slate| slate.as_str().eq_ignore_ascii_case(field.value))
            .ok_or_else(|| form::Error::validation("expected `junior` or `senior`").into())
    }
}

impl UriDisplay<Query> for Slate {
    fn fmt(&self, formatter: &mut UriFormatter<'_, Query>) -> std::fmt::Result {
        formatter.write_raw(self.as_str())
    }
}

impl_from_uri_param_identity!([Query] Slate);
