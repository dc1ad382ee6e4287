pub mod sqlite;

pub use sqlite::{PutOutcome, SqliteStorage};
