pub mod explain;
pub mod query;
