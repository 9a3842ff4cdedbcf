use std::fmt::Display;

use mongodb::bson::Bson;
use serde_repr::{Deserialize_repr, Serialize_repr};

/// Privilege levels of election operators.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum OperatorRole {
    Admin = 1,
    SuperAdmin = 2,
}

impl Display for OperatorRole {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            formatter,
            "{}",
            match self {
                Self::Admin => "admin",
                Self::SuperAdmin => "superadmin",
            }
        )
    }
}

impl From<OperatorRole> for Bson {
    fn from(role: OperatorRole) -> Self {
        Bson::Int32(role as i32)
    }
}
