pub mod mapping_catalog;
pub mod plan_executor;
pub mod sql_service;

pub use mapping_catalog::MappingCatalog;
pub use plan_executor::{PlanExecutor, NO_UPDATE_COUNT};
pub use sql_service::{RowPage, SqlResponse, SqlService};
