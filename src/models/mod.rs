pub mod audit;
pub mod fetch;
pub mod identity;
pub mod job;
pub mod operation;
pub mod query;
