pub mod sqlite;

pub use sqlite::SqliteProgressStore;
