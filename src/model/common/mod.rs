//! Types shared between the database, the voting core and the API.

pub mod candidate;
pub mod phase;
pub mod role;
pub mod voter;
