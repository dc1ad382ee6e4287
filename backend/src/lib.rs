pub mod api;
pub mod bridge;
pub mod config;
pub mod connector;
pub mod engine;
pub mod models;
pub mod parse;
pub mod planner;
pub mod services;
pub mod storage;
pub mod validation;

pub use models::*;
pub use services::*;
pub use validation::*;
