pub mod field;
pub mod mapping;
pub mod plan;
pub mod query;
pub mod row;
pub mod types;

pub use field::*;
pub use mapping::*;
pub use plan::*;
pub use query::*;
pub use row::*;
pub use types::*;
