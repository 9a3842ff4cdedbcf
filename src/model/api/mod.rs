//! API-friendly types: everything here serialises to plain JSON, with string
//! IDs and RFC 3339 datetimes.

pub mod admin;
pub mod auth;
pub mod id;
pub mod ledger;
pub mod phase;
pub mod tally;
pub mod voter;
