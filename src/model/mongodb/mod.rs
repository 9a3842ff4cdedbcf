mod bson;
mod collection;
pub mod errors;

pub use bson::{u32_id_filter, Id};
pub(crate) use collection::VOTERS;
pub use collection::{ensure_indexes_exist, Coll, MongoCollection};
