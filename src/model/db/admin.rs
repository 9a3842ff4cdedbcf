use std::ops::{Deref, DerefMut};

use serde::{Deserialize, Serialize};

use crate::model::{common::role::OperatorRole, mongodb::Id};

/// Core operator data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorCore {
    pub username: String,
    pub password_hash: String,
    pub role: OperatorRole,
}

impl OperatorCore {
    /// Check whether the given password is correct.
    pub fn verify_password<T: AsRef<[u8]>>(&self, password: T) -> bool {
        match argon2::verify_encoded(&self.password_hash, password.as_ref()) {
            Ok(matches) => matches,
            Err(err) => {
                error!("Malformed password hash for operator {}: {err}", self.username);
                false
            }
        }
    }
}

/// An operator without an ID.
pub type NewOperator = OperatorCore;

/// An operator from the database, with its unique ID.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operator {
    #[serde(rename = "_id")]
    pub id: Id,
    #[serde(flatten)]
    pub operator: OperatorCore,
}

impl Deref for Operator {
    type Target = OperatorCore;

    fn deref(&self) -> &Self::Target {
        &self.operator
    }
}

impl DerefMut for Operator {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.operator
    }
}

/// Example data for tests.
#[cfg(test)]
pub mod examples {
    use super::*;

    impl OperatorCore {
        /// Password is "coordinator".
        pub fn example() -> Self {
            Self {
                username: "coordinator".to_string(),
                password_hash: "$argon2i$v=19$m=4096,t=2,p=1$VzJlNzBsa0ZUeGFCNVVucA$01vYAqN0vTeqhZEzW7q9PWmrZlXtzQ/Ns7NkCNE2mA0".to_string(),
                role: OperatorRole::Admin,
            }
        }
    }
}
