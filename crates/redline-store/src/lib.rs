pub mod store;

pub use store::{DocRecord, DocStatus, SqliteRecordStore};
