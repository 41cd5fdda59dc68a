pub mod coordinator;
pub mod store;
